//! Multi-subvolume filesystem reconstruction.
//!
//! The root tree names every subvolume tree; each subvolume tree is walked
//! once and its items folded into a single `FileSystem` accumulator. Inode
//! ids are qualified as `(subvolume_id << 48) | inode` so the root
//! directories of distinct subvolumes (always inode 256) never collide.
//! A final pass over the checksum tree records how many CRC32C sums cover
//! each logical extent start (counted, not verified).

use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Seek};

use log::warn;

use super::extent::ExtentInfo;
use super::structs::{
    le64, BtrfsDirItem, BtrfsFileExtentItem, BtrfsInodeItem, BtrfsInodeRef, BtrfsRootRef,
};
use super::tree::Volume;
use super::{item_type, objectid};
use crate::error::BtrfsError;

/// Inode numbers must fit in the lower 48 bits of a qualified id.
const INODE_MASK: u64 = (1 << 48) - 1;

/// The fs-tree root `bytenr` sits at offset 176 of a ROOT_ITEM payload
/// (after the embedded 160-byte inode item, generation, and root_dirid).
const ROOT_ITEM_BYTENR_OFFSET: usize = 176;
const ROOT_ITEM_MIN_SIZE: usize = 184;

/// Combine a subvolume id and an inode number into a qualified id.
pub fn qualify(subvol: u64, inode: u64) -> u64 {
    (subvol << 48) | (inode & INODE_MASK)
}

/// Split a qualified id back into `(subvolume_id, inode)`.
pub fn split_qualified(id: u64) -> (u64, u64) {
    (id >> 48, id & INODE_MASK)
}

/// One subvolume (or snapshot; the two are indistinguishable here).
#[derive(Debug, Clone)]
pub struct SubvolumeInfo {
    pub id: u64,
    pub name: String,
    pub tree_root: u64,
}

/// Accumulated filesystem state across all subvolumes, keyed by qualified
/// inode id.
#[derive(Debug, Default)]
pub struct FileSystem {
    pub subvolumes: Vec<SubvolumeInfo>,
    pub inodes: BTreeMap<u64, BtrfsInodeItem>,
    pub names: BTreeMap<u64, String>,
    pub parents: BTreeMap<u64, u64>,
    pub dir_entries: BTreeMap<u64, Vec<BtrfsDirItem>>,
    pub xattrs: BTreeMap<u64, Vec<(String, Vec<u8>)>>,
    pub extents: BTreeMap<u64, Vec<ExtentInfo>>,
    /// Logical extent start -> number of 4-byte CRC32C sums recorded there.
    pub checksums: BTreeMap<u64, u64>,
}

/// Walk the root tree and list every subvolume: the default fs tree
/// (object id 5) first, then user subvolumes (ids >= 256) in discovery
/// order. Reserved trees 1-7 other than 5 are not subvolumes.
pub fn discover_subvolumes<R: Read + Seek>(
    volume: &mut Volume<R>,
    root_tree: u64,
) -> Result<Vec<SubvolumeInfo>, BtrfsError> {
    let mut root_items: Vec<(u64, u64)> = Vec::new();
    let mut root_names: BTreeMap<u64, String> = BTreeMap::new();

    volume.walk_tree(root_tree, &mut |key, data| match key.item_type {
        item_type::ROOT_ITEM => {
            if data.len() >= ROOT_ITEM_MIN_SIZE {
                let bytenr = le64(data, ROOT_ITEM_BYTENR_OFFSET);
                root_items.push((key.objectid, bytenr));
            } else {
                warn!("root item for tree {} too short: {}", key.objectid, data.len());
            }
        }
        item_type::ROOT_REF => match BtrfsRootRef::parse(data, 0) {
            // key.offset is the child subvolume id
            Ok(rref) => {
                root_names.insert(key.offset, rref.name);
            }
            Err(e) => warn!("skipping malformed root ref: {e}"),
        },
        _ => {}
    })?;

    let mut subvolumes = Vec::new();
    if let Some(&(_, bytenr)) = root_items.iter().find(|(id, _)| *id == objectid::FS_TREE) {
        subvolumes.push(SubvolumeInfo {
            id: objectid::FS_TREE,
            name: "(default)".to_string(),
            tree_root: bytenr,
        });
    }
    for &(id, bytenr) in &root_items {
        if id >= objectid::FIRST_FREE {
            subvolumes.push(SubvolumeInfo {
                id,
                name: root_names
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| format!("subvol_{id}")),
                tree_root: bytenr,
            });
        }
    }
    Ok(subvolumes)
}

/// Walk one subvolume's fs tree, folding items into the accumulator under
/// qualified ids. Item types outside the handled set are ignored:
/// DIR_INDEX duplicates DIR_ITEM content and INODE_EXTREF is unused, so
/// both get explicit ignored arms.
pub fn parse_subvolume<R: Read + Seek>(
    volume: &mut Volume<R>,
    subvol: &SubvolumeInfo,
    fs: &mut FileSystem,
) -> Result<(), BtrfsError> {
    let subvol_id = subvol.id;

    volume.walk_tree(subvol.tree_root, &mut |key, data| {
        if key.objectid > INODE_MASK {
            warn!(
                "subvolume {subvol_id}: inode {} exceeds 48 bits, skipped",
                key.objectid
            );
            return;
        }
        let qid = qualify(subvol_id, key.objectid);

        match key.item_type {
            item_type::INODE_ITEM => match BtrfsInodeItem::parse(data, 0) {
                Ok(inode) => {
                    fs.inodes.insert(qid, inode);
                }
                Err(e) => warn!("subvolume {subvol_id}: bad inode {}: {e}", key.objectid),
            },
            item_type::INODE_REF => match BtrfsInodeRef::parse(data, 0) {
                Ok(iref) => {
                    fs.names.insert(qid, iref.name);
                    // key.offset holds the parent inode number.
                    fs.parents.insert(qid, qualify(subvol_id, key.offset));
                }
                Err(e) => warn!("subvolume {subvol_id}: bad inode ref {}: {e}", key.objectid),
            },
            item_type::XATTR_ITEM => match BtrfsDirItem::parse(data, 0) {
                Ok(item) => {
                    fs.xattrs
                        .entry(qid)
                        .or_default()
                        .push((item.name, item.value));
                }
                Err(e) => warn!("subvolume {subvol_id}: bad xattr {}: {e}", key.objectid),
            },
            item_type::DIR_ITEM => match BtrfsDirItem::parse(data, 0) {
                Ok(item) => {
                    fs.dir_entries.entry(qid).or_default().push(item);
                }
                Err(e) => warn!("subvolume {subvol_id}: bad dir item {}: {e}", key.objectid),
            },
            item_type::EXTENT_DATA => match BtrfsFileExtentItem::parse(data, 0) {
                Ok(item) => {
                    fs.extents
                        .entry(qid)
                        .or_default()
                        .push(ExtentInfo::from_item(key.offset, &item));
                }
                Err(e) => warn!("subvolume {subvol_id}: bad extent {}: {e}", key.objectid),
            },
            item_type::DIR_INDEX | item_type::INODE_EXTREF => {}
            _ => {}
        }
    })?;

    // Anchor the subvolume root directory with an absolute name so path
    // construction stops there.
    let root_qid = qualify(subvol_id, objectid::FIRST_FREE);
    if fs.inodes.contains_key(&root_qid) {
        let root_name = if subvol_id == objectid::FS_TREE {
            "/".to_string()
        } else {
            format!("/{}", subvol.name)
        };
        fs.names.insert(root_qid, root_name);
    }

    Ok(())
}

/// Walk the checksum tree (object id 7) if present and count the CRC32C
/// sums covering each logical start address.
pub fn parse_checksum_tree<R: Read + Seek>(
    volume: &mut Volume<R>,
    root_tree: u64,
    fs: &mut FileSystem,
) -> Result<(), BtrfsError> {
    let items = volume.search_tree(root_tree, objectid::CSUM_TREE, Some(item_type::ROOT_ITEM))?;
    let Some((_, data)) = items.first() else {
        return Ok(());
    };
    if data.len() < ROOT_ITEM_MIN_SIZE {
        warn!("checksum tree root item too short");
        return Ok(());
    }
    let csum_root = le64(data, ROOT_ITEM_BYTENR_OFFSET);

    volume.walk_tree(csum_root, &mut |key, data| {
        if key.item_type == item_type::EXTENT_CSUM {
            fs.checksums.insert(key.offset, data.len() as u64 / 4);
        }
    })?;
    Ok(())
}

/// Discover and parse every subvolume, then the checksum tree.
pub fn build_filesystem<R: Read + Seek>(
    volume: &mut Volume<R>,
    root_tree: u64,
) -> Result<FileSystem, BtrfsError> {
    let mut fs = FileSystem::default();
    fs.subvolumes = discover_subvolumes(volume, root_tree)?;

    for subvol in fs.subvolumes.clone() {
        if let Err(e) = parse_subvolume(volume, &subvol, &mut fs) {
            warn!("subvolume {} ({}) failed to parse: {e}", subvol.id, subvol.name);
        }
    }

    parse_checksum_tree(volume, root_tree, &mut fs)?;
    Ok(fs)
}

/// Maximum parent-chain length before a path is declared broken.
const MAX_PATH_DEPTH: usize = 100;

/// Build the full path for a qualified inode by walking the parent chain.
/// A name starting with `/` (a subvolume root) anchors the path. Cycles and
/// over-deep chains return the partial path prefixed with `<broken>/`.
pub fn build_path(fs: &FileSystem, id: u64) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    let mut current = id;
    let mut broken = false;

    loop {
        if parts.len() >= MAX_PATH_DEPTH {
            warn!("{}", BtrfsError::PathDepthExceeded(split_qualified(id).1));
            broken = true;
            break;
        }
        if !seen.insert(current) {
            warn!(
                "parent chain cycle at inode {} while resolving {}",
                split_qualified(current).1,
                split_qualified(id).1
            );
            broken = true;
            break;
        }
        let Some(name) = fs.names.get(&current) else {
            break;
        };
        parts.push(name);
        if name.starts_with('/') {
            break;
        }
        match fs.parents.get(&current) {
            Some(&parent) if parent != current => current = parent,
            _ => break,
        }
    }

    parts.reverse();

    let path = match parts.first() {
        None => "/".to_string(),
        Some(first) if first.starts_with('/') => {
            let rest = parts[1..].join("/");
            if *first == "/" {
                if rest.is_empty() {
                    "/".to_string()
                } else {
                    format!("/{rest}")
                }
            } else if rest.is_empty() {
                (*first).to_string()
            } else {
                format!("{first}/{rest}")
            }
        }
        Some(_) => format!("/{}", parts.join("/")),
    };

    if broken {
        format!("<broken>/{}", path.trim_start_matches('/'))
    } else {
        path
    }
}
