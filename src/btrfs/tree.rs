//! Tree block reading and B-tree traversal.
//!
//! `Volume` owns the image reader, the chunk map, and the nodesize, and is
//! the only place positioned reads happen. Traversal is depth-first in
//! left-to-right child order; leaves yield items in index order. A per-walk
//! visited set makes self-referential (corrupted) trees terminate: a
//! revisited block is skipped with a warning, never a panic.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use log::warn;

use super::chunk::ChunkMap;
use super::structs::{BtrfsHeader, BtrfsItem, BtrfsKey, BtrfsKeyPtr, ITEM_SIZE, KEY_PTR_SIZE};
use super::HEADER_SIZE;
use crate::error::BtrfsError;

pub struct Volume<R> {
    reader: R,
    nodesize: u32,
    chunk_map: ChunkMap,
}

impl<R: Read + Seek> Volume<R> {
    pub fn new(reader: R, nodesize: u32, chunk_map: ChunkMap) -> Self {
        Self {
            reader,
            nodesize,
            chunk_map,
        }
    }

    pub fn nodesize(&self) -> u32 {
        self.nodesize
    }

    pub fn chunk_map(&self) -> &ChunkMap {
        &self.chunk_map
    }

    pub fn chunk_map_mut(&mut self) -> &mut ChunkMap {
        &mut self.chunk_map
    }

    /// Read exactly `len` bytes at an absolute image offset.
    pub fn read_exact_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, BtrfsError> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(BtrfsError::ShortRead {
                        offset,
                        wanted: len,
                        got: filled,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf)
    }

    /// Read `len` bytes at a logical address, translated through the chunk
    /// map.
    pub fn read_logical(&mut self, logical: u64, len: usize) -> Result<Vec<u8>, BtrfsError> {
        let offset = self.chunk_map.translate(logical)?;
        self.read_exact_at(offset, len)
    }

    /// Read one `nodesize` tree block by logical address.
    pub fn read_tree_block(&mut self, logical: u64) -> Result<Vec<u8>, BtrfsError> {
        self.read_logical(logical, self.nodesize as usize)
    }

    /// Depth-first traversal of the tree rooted at `root_logical`, invoking
    /// `visitor(key, payload)` for every leaf item. Unmappable, unreadable,
    /// malformed, or revisited blocks are skipped with a warning.
    pub fn walk_tree<F>(&mut self, root_logical: u64, visitor: &mut F) -> Result<(), BtrfsError>
    where
        F: FnMut(&BtrfsKey, &[u8]),
    {
        let mut visited = HashSet::new();
        self.walk_node(root_logical, &mut visited, visitor);
        Ok(())
    }

    fn walk_node<F>(&mut self, logical: u64, visited: &mut HashSet<u64>, visitor: &mut F)
    where
        F: FnMut(&BtrfsKey, &[u8]),
    {
        if !visited.insert(logical) {
            warn!("{}", BtrfsError::Cycle(logical));
            return;
        }

        let block = match self.read_tree_block(logical) {
            Ok(b) => b,
            Err(e) => {
                warn!("skipping tree block {logical:#x}: {e}");
                return;
            }
        };

        let header = match BtrfsHeader::parse(&block, 0) {
            Ok(h) => h,
            Err(e) => {
                warn!("skipping tree block {logical:#x}: {e}");
                return;
            }
        };

        if header.nritems == 0 {
            return;
        }

        if header.level == 0 {
            self.visit_leaf(logical, &block, header.nritems, visitor);
        } else {
            let children = collect_children(&block, header.nritems);
            for child in children {
                self.walk_node(child, visited, visitor);
            }
        }
    }

    fn visit_leaf<F>(&self, logical: u64, block: &[u8], nritems: u32, visitor: &mut F)
    where
        F: FnMut(&BtrfsKey, &[u8]),
    {
        for i in 0..nritems as usize {
            let item_pos = HEADER_SIZE + i * ITEM_SIZE;
            let item = match BtrfsItem::parse(block, item_pos) {
                Ok(it) => it,
                Err(_) => {
                    warn!("leaf {logical:#x}: item {i} descriptor out of bounds");
                    break;
                }
            };
            let data_start = HEADER_SIZE + item.data_offset as usize;
            let data_end = data_start + item.data_size as usize;
            if data_end > block.len() {
                warn!(
                    "leaf {logical:#x}: item {i} payload [{data_start}..{data_end}] \
                     extends past block end"
                );
                continue;
            }
            visitor(&item.key, &block[data_start..data_end]);
        }
    }

    /// Traverse the whole tree and return all items.
    pub fn collect_tree(&mut self, root_logical: u64) -> Result<Vec<(BtrfsKey, Vec<u8>)>, BtrfsError> {
        let mut items = Vec::new();
        self.walk_tree(root_logical, &mut |key, data| {
            items.push((*key, data.to_vec()));
        })?;
        Ok(items)
    }

    /// Traverse the tree, keeping only items with a matching objectid (and
    /// item type, when given).
    pub fn search_tree(
        &mut self,
        root_logical: u64,
        objectid: u64,
        item_type: Option<u8>,
    ) -> Result<Vec<(BtrfsKey, Vec<u8>)>, BtrfsError> {
        let mut items = Vec::new();
        self.walk_tree(root_logical, &mut |key, data| {
            if key.objectid == objectid && item_type.map_or(true, |t| t == key.item_type) {
                items.push((*key, data.to_vec()));
            }
        })?;
        Ok(items)
    }
}

fn collect_children(block: &[u8], nritems: u32) -> Vec<u64> {
    let mut children = Vec::with_capacity(nritems as usize);
    for i in 0..nritems as usize {
        let ptr_pos = HEADER_SIZE + i * KEY_PTR_SIZE;
        match BtrfsKeyPtr::parse(block, ptr_pos) {
            Ok(ptr) => children.push(ptr.blockptr),
            Err(_) => break,
        }
    }
    children
}
