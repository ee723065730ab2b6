//! Top-level parse pipeline: superblock → chunk bootstrap → chunk tree →
//! root tree (subvolumes) → per-subvolume fs trees → FileEntry records.
//!
//! Exactly one error is fatal past open time: a missing BTRFS magic. Every
//! other failure (unmappable block, short read, unsupported codec, bad
//! record) is localized to the affected item and logged; the affected file
//! at most loses its content hashes.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;

use log::{info, warn};
use sha2::{Digest, Sha256};

use crate::btrfs::chunk::{parse_sys_chunk_array, read_chunk_tree};
use crate::btrfs::extent::{disk_bytes, first_physical_offset, reassemble_file};
use crate::btrfs::filesystem::{build_filesystem, build_path, split_qualified, FileSystem};
use crate::btrfs::superblock::Superblock;
use crate::btrfs::tree::Volume;
use crate::btrfs::{extent_type, inode_flags_string};
use crate::entry::{file_type_string, format_timestamp, mode_string, FileEntry};
use crate::error::BtrfsError;

#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Stop after the superblock; return no entries.
    pub info_only: bool,
    /// Emit progress on the log channel.
    pub verbose: bool,
}

/// Parse a BTRFS volume inside an image file and catalog every inode.
pub fn parse(
    image: &Path,
    partition_offset: u64,
    options: &ParseOptions,
) -> Result<(Superblock, Vec<FileEntry>), BtrfsError> {
    let file = File::open(image)?;
    scan_image(BufReader::new(file), partition_offset, options)
}

/// Like [`parse`], over any seekable reader (tests use in-memory images).
pub fn scan_image<R: Read + Seek>(
    mut reader: R,
    partition_offset: u64,
    options: &ParseOptions,
) -> Result<(Superblock, Vec<FileEntry>), BtrfsError> {
    let sb = Superblock::read(&mut reader, partition_offset)?;
    if options.verbose {
        info!(
            "superblock: label='{}' nodesize={} generation={}",
            sb.label, sb.nodesize, sb.generation
        );
    }
    if options.info_only {
        return Ok((sb, Vec::new()));
    }

    let (mut volume, fs) = reconstruct(reader, partition_offset, &sb, options.verbose)?;
    let entries = emit_entries(&mut volume, &fs, options.verbose);
    Ok((sb, entries))
}

/// Build the chunk map and the merged filesystem model.
fn reconstruct<R: Read + Seek>(
    reader: R,
    partition_offset: u64,
    sb: &Superblock,
    verbose: bool,
) -> Result<(Volume<R>, FileSystem), BtrfsError> {
    let bootstrap = parse_sys_chunk_array(&sb.sys_chunk_array, partition_offset);
    if verbose {
        info!("bootstrap chunk map: {} entries", bootstrap.len());
    }

    let mut volume = Volume::new(reader, sb.nodesize, bootstrap);
    read_chunk_tree(&mut volume, sb.chunk_root)?;
    if verbose {
        info!("chunk map complete: {} entries", volume.chunk_map().len());
    }

    let fs = build_filesystem(&mut volume, sb.root)?;
    if verbose {
        info!(
            "reconstructed {} subvolumes, {} inodes, {} checksum ranges",
            fs.subvolumes.len(),
            fs.inodes.len(),
            fs.checksums.len()
        );
        for sv in &fs.subvolumes {
            info!("  subvolume {} '{}' root {:#x}", sv.id, sv.name, sv.tree_root);
        }
    }
    Ok((volume, fs))
}

/// Turn the accumulated filesystem into FileEntry records.
fn emit_entries<R: Read + Seek>(
    volume: &mut Volume<R>,
    fs: &FileSystem,
    verbose: bool,
) -> Vec<FileEntry> {
    // Paths are needed both for output and for locating /etc/passwd.
    let paths: BTreeMap<u64, String> = fs
        .inodes
        .keys()
        .map(|&qid| (qid, build_path(fs, qid)))
        .collect();

    let (uid_names, gid_names) = resolve_owner_names(volume, fs, &paths);

    let mut entries = Vec::with_capacity(fs.inodes.len());
    for (&qid, inode) in &fs.inodes {
        let (subvolume_id, inode_num) = split_qualified(qid);
        let name = fs
            .names
            .get(&qid)
            .cloned()
            .unwrap_or_else(|| "(unknown)".to_string());
        let path = paths.get(&qid).cloned().unwrap_or_else(|| "/".to_string());
        if name == "(unknown)" && path == "/" {
            // Orphaned inode with no reference anywhere; nothing to anchor
            // it to.
            continue;
        }

        let file_type = file_type_string(inode.mode).to_string();
        let extents = fs.extents.get(&qid).map(Vec::as_slice).unwrap_or(&[]);

        let physical_offset = first_physical_offset(extents, volume.chunk_map());
        let on_disk = disk_bytes(extents);
        let checksum_count = extents
            .iter()
            .filter(|e| e.extent_type != extent_type::INLINE && e.disk_bytenr != 0)
            .map(|e| fs.checksums.get(&e.disk_bytenr).copied().unwrap_or(0))
            .sum();

        let (md5sum, sha256sum) = if file_type == "file" {
            match reassemble_file(volume, extents, inode.size) {
                Ok(data) => (
                    Some(format!("{:x}", md5::compute(&data))),
                    Some(format!("{:x}", Sha256::digest(&data))),
                ),
                Err(e) => {
                    warn!("content of {path} unavailable, hashes omitted: {e}");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        entries.push(FileEntry {
            inode: inode_num,
            subvolume_id,
            name,
            path,
            size: inode.size,
            file_type,
            mode: inode.mode,
            mode_str: mode_string(inode.mode),
            uid: inode.uid,
            uid_name: uid_names.get(&inode.uid).cloned(),
            gid: inode.gid,
            gid_name: gid_names.get(&inode.gid).cloned(),
            nlink: inode.nlink,
            atime: format_timestamp(inode.atime.sec),
            mtime: format_timestamp(inode.mtime.sec),
            ctime: format_timestamp(inode.ctime.sec),
            otime: format_timestamp(inode.otime.sec),
            parent_inode: fs.parents.get(&qid).map(|&p| split_qualified(p).1),
            generation: inode.generation,
            transid: inode.transid,
            flags: inode.flags,
            flags_str: inode_flags_string(inode.flags),
            xattr_count: fs.xattrs.get(&qid).map_or(0, |v| v.len() as u64),
            extent_count: extents.len() as u64,
            disk_bytes: on_disk,
            physical_offset,
            checksum_count,
            md5: md5sum,
            sha256: sha256sum,
        });
    }

    if verbose {
        info!("emitted {} entries", entries.len());
    }
    entries
}

/// Read `/etc/passwd` and `/etc/group` out of the reconstructed tree to map
/// numeric ids to names. Every failure here is silent: the fields simply
/// stay unresolved.
fn resolve_owner_names<R: Read + Seek>(
    volume: &mut Volume<R>,
    fs: &FileSystem,
    paths: &BTreeMap<u64, String>,
) -> (HashMap<u32, String>, HashMap<u32, String>) {
    let passwd = read_by_path(volume, fs, paths, &["/etc/passwd", "/root/etc/passwd"]);
    let group = read_by_path(volume, fs, paths, &["/etc/group", "/root/etc/group"]);

    // passwd: name:x:uid:gid:gecos:home:shell; group: name:x:gid:members
    let uid_names = passwd.map(|data| parse_id_file(&data)).unwrap_or_default();
    let gid_names = group.map(|data| parse_id_file(&data)).unwrap_or_default();
    (uid_names, gid_names)
}

fn read_by_path<R: Read + Seek>(
    volume: &mut Volume<R>,
    fs: &FileSystem,
    paths: &BTreeMap<u64, String>,
    candidates: &[&str],
) -> Option<Vec<u8>> {
    for candidate in candidates {
        let found = paths.iter().find_map(|(&qid, path)| {
            if path == candidate {
                Some(qid)
            } else {
                None
            }
        });
        let Some(qid) = found else { continue };
        let Some(inode) = fs.inodes.get(&qid) else { continue };
        let extents = fs.extents.get(&qid).map(Vec::as_slice).unwrap_or(&[]);
        match reassemble_file(volume, extents, inode.size) {
            Ok(data) => return Some(data),
            Err(e) => {
                warn!("cannot read {candidate}: {e}");
                continue;
            }
        }
    }
    None
}

/// Both passwd and group keep the numeric id in field 2 and the name in
/// field 0.
fn parse_id_file(data: &[u8]) -> HashMap<u32, String> {
    let mut map = HashMap::new();
    for line in String::from_utf8_lossy(data).lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 3 {
            continue;
        }
        if let Ok(id) = fields[2].parse::<u32>() {
            map.entry(id).or_insert_with(|| fields[0].to_string());
        }
    }
    map
}

/// Reassemble every regular file whose path contains `pattern` into `dest`.
/// Existing names get a numeric suffix instead of being overwritten.
/// Returns the number of files written.
pub fn extract_matching(
    image: &Path,
    partition_offset: u64,
    pattern: &str,
    dest: &Path,
) -> Result<usize, BtrfsError> {
    let file = File::open(image)?;
    let mut reader = BufReader::new(file);
    let sb = Superblock::read(&mut reader, partition_offset)?;
    let (mut volume, fs) = reconstruct(reader, partition_offset, &sb, false)?;

    std::fs::create_dir_all(dest)?;
    let pattern_lower = pattern.to_lowercase();
    let mut written = 0;

    for (&qid, inode) in &fs.inodes {
        if file_type_string(inode.mode) != "file" {
            continue;
        }
        let path = build_path(&fs, qid);
        if !path.to_lowercase().contains(&pattern_lower) {
            continue;
        }
        let extents = fs.extents.get(&qid).map(Vec::as_slice).unwrap_or(&[]);
        let data = match reassemble_file(&mut volume, extents, inode.size) {
            Ok(d) => d,
            Err(e) => {
                warn!("skipping {path}: {e}");
                continue;
            }
        };

        let base_name = fs
            .names
            .get(&qid)
            .cloned()
            .unwrap_or_else(|| format!("inode_{}", split_qualified(qid).1));
        let mut out_path = dest.join(&base_name);
        let mut counter = 1;
        while out_path.exists() {
            out_path = dest.join(format!("{base_name}.{counter}"));
            counter += 1;
        }
        File::create(&out_path)?.write_all(&data)?;
        info!("extracted {path} -> {}", out_path.display());
        written += 1;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_file_passwd() {
        let data = b"root:x:0:0:root:/root:/bin/bash\nalice:x:1000:1000::/home/alice:/bin/sh\n";
        let map = parse_id_file(data);
        assert_eq!(map.get(&0).map(String::as_str), Some("root"));
        assert_eq!(map.get(&1000).map(String::as_str), Some("alice"));
    }

    #[test]
    fn test_parse_id_file_group() {
        let data = b"wheel:x:10:alice,bob\nusers:x:100:\n";
        let map = parse_id_file(data);
        assert_eq!(map.get(&10).map(String::as_str), Some("wheel"));
        assert_eq!(map.get(&100).map(String::as_str), Some("users"));
    }

    #[test]
    fn test_parse_id_file_ignores_malformed_lines() {
        let data = b"garbage\nalso:short\nok:x:5:\n";
        let map = parse_id_file(data);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&5).map(String::as_str), Some("ok"));
    }

    #[test]
    fn test_parse_id_file_first_entry_wins() {
        let data = b"first:x:7:\nsecond:x:7:\n";
        let map = parse_id_file(data);
        assert_eq!(map.get(&7).map(String::as_str), Some("first"));
    }
}
