//! Catalog statistics: aggregate counts and sizes by file extension, type,
//! and ownership, exported as JSON next to the main output.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::warn;
use serde::Serialize;

use crate::entry::FileEntry;

#[derive(Debug, Default, Clone, Serialize)]
pub struct Bucket {
    pub count: u64,
    pub total_size_bytes: u64,
}

impl Bucket {
    fn add(&mut self, size: u64) {
        self.count += 1;
        self.total_size_bytes += size;
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct OwnerBucket {
    pub uid: u32,
    pub count: u64,
    pub total_size_bytes: u64,
    pub by_gid: BTreeMap<String, GidBucket>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct GidBucket {
    pub gid: u32,
    pub count: u64,
    pub total_size_bytes: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Summary {
    pub total_files: u64,
    pub total_size_bytes: u64,
    pub total_directories: u64,
    pub total_symlinks: u64,
    pub unique_extensions: u64,
    pub unique_owners: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Statistics {
    pub summary: Summary,
    pub by_extension: BTreeMap<String, Bucket>,
    pub by_type: BTreeMap<String, Bucket>,
    pub by_ownership: BTreeMap<String, OwnerBucket>,
}

/// Normalized extension bucket key for an entry.
fn extension_of(entry: &FileEntry) -> String {
    if entry.is_directory() {
        return "(directory)".to_string();
    }
    match entry.name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => format!(".{}", ext.to_lowercase()),
        _ => "(no extension)".to_string(),
    }
}

/// Single-pass aggregation over the catalog.
pub fn calculate_statistics(entries: &[FileEntry]) -> Statistics {
    let mut stats = Statistics::default();

    for entry in entries {
        let size = entry.size;

        stats.by_extension.entry(extension_of(entry)).or_default().add(size);
        stats
            .by_type
            .entry(entry.file_type.clone())
            .or_default()
            .add(size);

        let owner = stats
            .by_ownership
            .entry(format!("uid_{}", entry.uid))
            .or_default();
        owner.uid = entry.uid;
        owner.count += 1;
        owner.total_size_bytes += size;
        let gid = owner.by_gid.entry(format!("gid_{}", entry.gid)).or_default();
        gid.gid = entry.gid;
        gid.count += 1;
        gid.total_size_bytes += size;

        match entry.file_type.as_str() {
            "directory" => stats.summary.total_directories += 1,
            "symlink" => {
                stats.summary.total_symlinks += 1;
            }
            _ => {}
        }
        if !entry.is_directory() {
            stats.summary.total_files += 1;
        }
        stats.summary.total_size_bytes += size;
    }

    stats.summary.unique_extensions = stats.by_extension.len() as u64;
    stats.summary.unique_owners = stats.by_ownership.len() as u64;
    stats
}

/// `/path/to/output.json` -> `/path/to/output_stats.json`.
pub fn derive_stats_path(base: &Path) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "catalog".to_string());
    base.with_file_name(format!("{stem}_stats.json"))
}

/// Write statistics as JSON. Failures are warnings, never fatal.
pub fn write_statistics_json(stats: &Statistics, path: &Path) {
    match serde_json::to_string_pretty(stats) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("could not write statistics to {}: {e}", path.display());
            }
        }
        Err(e) => warn!("could not serialize statistics: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, file_type: &str, size: u64, uid: u32, gid: u32) -> FileEntry {
        FileEntry {
            inode: 256,
            subvolume_id: 5,
            name: name.to_string(),
            path: format!("/{name}"),
            size,
            file_type: file_type.to_string(),
            mode: 0o100644,
            mode_str: "-rw-r--r--".to_string(),
            uid,
            uid_name: None,
            gid,
            gid_name: None,
            nlink: 1,
            atime: String::new(),
            mtime: String::new(),
            ctime: String::new(),
            otime: String::new(),
            parent_inode: None,
            generation: 1,
            transid: 1,
            flags: 0,
            flags_str: String::new(),
            xattr_count: 0,
            extent_count: 0,
            disk_bytes: 0,
            physical_offset: None,
            checksum_count: 0,
            md5: None,
            sha256: None,
        }
    }

    #[test]
    fn test_extension_buckets() {
        let entries = vec![
            entry("a.TXT", "file", 10, 0, 0),
            entry("b.txt", "file", 20, 0, 0),
            entry("Makefile", "file", 5, 0, 0),
            entry("src", "directory", 0, 0, 0),
        ];
        let stats = calculate_statistics(&entries);
        assert_eq!(stats.by_extension[".txt"].count, 2);
        assert_eq!(stats.by_extension[".txt"].total_size_bytes, 30);
        assert_eq!(stats.by_extension["(no extension)"].count, 1);
        assert_eq!(stats.by_extension["(directory)"].count, 1);
    }

    #[test]
    fn test_hidden_file_has_no_extension() {
        let stats = calculate_statistics(&[entry(".bashrc", "file", 1, 0, 0)]);
        assert_eq!(stats.by_extension["(no extension)"].count, 1);
    }

    #[test]
    fn test_summary_counts() {
        let entries = vec![
            entry("a.txt", "file", 10, 0, 0),
            entry("dir", "directory", 0, 0, 0),
            entry("link", "symlink", 9, 0, 0),
        ];
        let stats = calculate_statistics(&entries);
        assert_eq!(stats.summary.total_files, 2); // symlink counts as non-directory
        assert_eq!(stats.summary.total_directories, 1);
        assert_eq!(stats.summary.total_symlinks, 1);
        assert_eq!(stats.summary.total_size_bytes, 19);
    }

    #[test]
    fn test_ownership_nesting() {
        let entries = vec![
            entry("a", "file", 10, 1000, 1000),
            entry("b", "file", 20, 1000, 100),
            entry("c", "file", 5, 0, 0),
        ];
        let stats = calculate_statistics(&entries);
        let alice = &stats.by_ownership["uid_1000"];
        assert_eq!(alice.count, 2);
        assert_eq!(alice.total_size_bytes, 30);
        assert_eq!(alice.by_gid["gid_1000"].count, 1);
        assert_eq!(alice.by_gid["gid_100"].count, 1);
        assert_eq!(stats.summary.unique_owners, 2);
    }

    #[test]
    fn test_derive_stats_path() {
        assert_eq!(
            derive_stats_path(Path::new("/data/image.img")),
            PathBuf::from("/data/image_stats.json")
        );
        assert_eq!(
            derive_stats_path(Path::new("out.json")),
            PathBuf::from("out_stats.json")
        );
    }

    #[test]
    fn test_json_serialization_shape() {
        let stats = calculate_statistics(&[entry("a.txt", "file", 10, 1000, 1000)]);
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&stats).unwrap()).unwrap();
        assert_eq!(value["summary"]["total_files"], 1);
        assert_eq!(value["by_extension"][".txt"]["count"], 1);
        assert_eq!(value["by_ownership"]["uid_1000"]["by_gid"]["gid_1000"]["count"], 1);
    }
}
