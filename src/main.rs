use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use btrfs_catalog::catalog::{extract_matching, parse, ParseOptions};
use btrfs_catalog::partition::{detect_btrfs_partitions, BtrfsPartition};
use btrfs_catalog::{output, stats};

#[derive(Parser)]
#[command(name = "btrfs-catalog")]
#[command(version)]
#[command(about = "Catalog every inode of a BTRFS volume inside a disk image", long_about = None)]
struct Cli {
    /// Path to the disk image
    image: PathBuf,

    /// Partition start offset: bytes, hex (0x...), or sectors (4198400s)
    #[arg(short = 'p', long, default_value = "0")]
    partition_offset: String,

    /// Scan the MBR/GPT partition table for BTRFS partitions
    #[arg(short = 'a', long)]
    auto_detect: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Console)]
    output: OutputFormat,

    /// Output file (default: stdout)
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Only show superblock info, do not parse files
    #[arg(long)]
    info_only: bool,

    /// Verbose progress on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Show only the N most recently accessed files
    #[arg(short, long, value_name = "N")]
    recent: Option<usize>,

    /// Extract regular files whose path contains this substring
    #[arg(short, long, value_name = "SUBSTRING")]
    extract: Option<String>,

    /// Destination directory for --extract
    #[arg(long, default_value = ".", value_name = "DIR")]
    dest: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Console,
    Json,
    Csv,
    Tree,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let partition_offset = if cli.auto_detect {
        choose_partition(&cli.image)?
    } else {
        parse_offset(&cli.partition_offset)?
    };

    let options = ParseOptions {
        info_only: cli.info_only,
        verbose: cli.verbose,
    };

    let (superblock, mut entries) =
        parse(&cli.image, partition_offset, &options).with_context(|| {
            format!(
                "parsing {} at offset {partition_offset:#x}",
                cli.image.display()
            )
        })?;

    if cli.info_only {
        println!("{}", superblock.describe());
        return Ok(());
    }

    if cli.verbose {
        eprintln!("{}\n", superblock.describe());
    }

    if let Some(n) = cli.recent {
        entries.retain(|e| e.is_file());
        entries.sort_by(|a, b| b.atime.cmp(&a.atime));
        entries.truncate(n);
    }

    let statistics = stats::calculate_statistics(&entries);
    let stats_path = stats::derive_stats_path(cli.file.as_deref().unwrap_or(&cli.image));
    stats::write_statistics_json(&statistics, &stats_path);
    if cli.verbose {
        eprintln!("Statistics written to {}", stats_path.display());
    }

    let rendered = match cli.output {
        OutputFormat::Console => output::to_console(&entries),
        OutputFormat::Json => output::to_json(&entries),
        OutputFormat::Csv => output::to_csv(&entries),
        OutputFormat::Tree => output::to_tree(&entries),
    };

    match &cli.file {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("writing output to {}", path.display()))?;
            if cli.verbose {
                eprintln!("Output written to {}", path.display());
            }
        }
        None => println!("{rendered}"),
    }

    if let Some(pattern) = &cli.extract {
        let written = extract_matching(&cli.image, partition_offset, pattern, &cli.dest)
            .context("extraction failed")?;
        eprintln!("Extracted {written} file(s) to {}", cli.dest.display());
    }

    Ok(())
}

/// Offset syntax: `4198400s` (512-byte sectors), `0x80280000` (hex bytes),
/// or plain decimal bytes.
fn parse_offset(value: &str) -> Result<u64> {
    let value = value.trim().to_lowercase();
    if let Some(sectors) = value.strip_suffix('s') {
        let n: u64 = sectors.parse().context("invalid sector offset")?;
        Ok(n * 512)
    } else if let Some(hex) = value.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).context("invalid hex offset")
    } else {
        value.parse().context("invalid byte offset")
    }
}

/// Scan the partition table; with several BTRFS partitions, ask which one.
fn choose_partition(image: &Path) -> Result<u64> {
    let file = std::fs::File::open(image)
        .with_context(|| format!("cannot open {}", image.display()))?;
    let mut reader = BufReader::new(file);
    let partitions = detect_btrfs_partitions(&mut reader)?;

    match partitions.len() {
        0 => bail!("no BTRFS partitions detected in {}", image.display()),
        1 => {
            eprintln!("Found 1 BTRFS partition:\n  {}\n", partitions[0]);
            Ok(partitions[0].offset)
        }
        _ => {
            eprintln!("Detected multiple BTRFS partitions:");
            for p in &partitions {
                eprintln!("  [{}] {}", p.index, p);
            }
            prompt_for_partition(&partitions)
        }
    }
}

fn prompt_for_partition(partitions: &[BtrfsPartition]) -> Result<u64> {
    let stdin = std::io::stdin();
    loop {
        eprint!("Select partition number to parse: ");
        std::io::stderr().flush().ok();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            bail!("no partition selected");
        }
        if let Ok(index) = line.trim().parse::<usize>() {
            if let Some(p) = partitions.iter().find(|p| p.index == index) {
                eprintln!("Selected: {p}\n");
                return Ok(p.offset);
            }
        }
        let valid: Vec<usize> = partitions.iter().map(|p| p.index).collect();
        eprintln!("Invalid selection. Choose from: {valid:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offset_forms() {
        assert_eq!(parse_offset("0").unwrap(), 0);
        assert_eq!(parse_offset("2149580800").unwrap(), 2149580800);
        assert_eq!(parse_offset("0x80280000").unwrap(), 0x80280000);
        assert_eq!(parse_offset("4198400s").unwrap(), 4198400 * 512);
        assert_eq!(parse_offset(" 16S ").unwrap(), 8192);
    }

    #[test]
    fn test_parse_offset_rejects_garbage() {
        assert!(parse_offset("abc").is_err());
        assert!(parse_offset("0xZZ").is_err());
        assert!(parse_offset("12ss").is_err());
    }
}
