//! Logical-to-physical address translation.
//!
//! BTRFS trees reference blocks by logical address; the chunk map converts
//! those to byte offsets in the image. Bootstrapping is two-phase: the
//! superblock's embedded sys_chunk_array yields enough mappings to read the
//! chunk tree, and walking the chunk tree completes the map.
//!
//! Only stripe 0 of each chunk is recorded. For single and DUP profiles
//! stripe 0 is authoritative; RAID profiles are out of scope.

use std::io::{Read, Seek};

use log::warn;

use super::item_type;
use super::structs::{BtrfsChunk, BtrfsKey, KEY_SIZE};
use super::tree::Volume;
use crate::error::BtrfsError;

#[derive(Debug, Clone, Copy)]
struct ChunkMapping {
    logical: u64,
    length: u64,
    physical: u64,
}

/// Sorted set of `(logical_start, length, physical_offset)` mappings plus a
/// constant partition base added to every translation.
#[derive(Debug, Clone, Default)]
pub struct ChunkMap {
    chunks: Vec<ChunkMapping>,
    partition_offset: u64,
}

impl ChunkMap {
    pub fn new(partition_offset: u64) -> Self {
        Self {
            chunks: Vec::new(),
            partition_offset,
        }
    }

    /// Insert a mapping. A later entry with the same `logical` start
    /// replaces the earlier one (chunk-tree entries override bootstrap
    /// entries).
    pub fn add(&mut self, logical: u64, length: u64, physical: u64) {
        let mapping = ChunkMapping {
            logical,
            length,
            physical,
        };
        match self.chunks.binary_search_by_key(&logical, |c| c.logical) {
            Ok(i) => self.chunks[i] = mapping,
            Err(i) => self.chunks.insert(i, mapping),
        }
    }

    /// Translate a logical address to an absolute image offset.
    pub fn translate(&self, logical: u64) -> Result<u64, BtrfsError> {
        let idx = match self
            .chunks
            .binary_search_by_key(&logical, |c| c.logical)
        {
            Ok(i) => i,
            Err(0) => return Err(BtrfsError::UnmappedLogicalAddress(logical)),
            Err(i) => i - 1,
        };
        let chunk = &self.chunks[idx];
        if logical < chunk.logical + chunk.length {
            Ok(self.partition_offset + chunk.physical + (logical - chunk.logical))
        } else {
            Err(BtrfsError::UnmappedLogicalAddress(logical))
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Bootstrap a chunk map from the superblock's sys_chunk_array: packed
/// (key, chunk) pairs, where `key.offset` is the chunk's logical start.
/// Stops at the end of the array or at the first malformed record.
pub fn parse_sys_chunk_array(data: &[u8], partition_offset: u64) -> ChunkMap {
    let mut map = ChunkMap::new(partition_offset);
    let mut pos = 0;

    while pos + KEY_SIZE <= data.len() {
        let key = match BtrfsKey::parse(data, pos) {
            Ok(k) => k,
            Err(_) => break,
        };
        pos += KEY_SIZE;

        let chunk = match BtrfsChunk::parse(data, pos) {
            Ok(c) => c,
            Err(_) => break,
        };
        if let Some(stripe0) = chunk.stripes.first() {
            map.add(key.offset, chunk.length, stripe0.offset);
        }
        pos += chunk.total_size();
    }

    map
}

/// Walk the chunk tree and fold every CHUNK_ITEM into the volume's map.
/// After this pass the map is considered complete.
pub fn read_chunk_tree<R: Read + Seek>(
    volume: &mut Volume<R>,
    chunk_root: u64,
) -> Result<(), BtrfsError> {
    let mut found: Vec<(u64, u64, u64)> = Vec::new();
    volume.walk_tree(chunk_root, &mut |key, data| {
        if key.item_type != item_type::CHUNK_ITEM {
            return;
        }
        match BtrfsChunk::parse(data, 0) {
            Ok(chunk) => {
                if let Some(stripe0) = chunk.stripes.first() {
                    found.push((key.offset, chunk.length, stripe0.offset));
                }
            }
            Err(e) => warn!("skipping malformed chunk item at {:#x}: {e}", key.offset),
        }
    })?;

    for (logical, length, physical) in found {
        volume.chunk_map_mut().add(logical, length, physical);
    }
    Ok(())
}
