//! Per-file extent reassembly.
//!
//! An inode's extents arrive unordered from the tree walk. Reassembly
//! allocates a zero-filled buffer at the declared file size and copies each
//! extent's bytes at its file offset, so holes and uncovered gaps read as
//! zeros and the result length always equals the declared size.

use std::io::{Read, Seek};

use super::compress::decompress;
use super::structs::BtrfsFileExtentItem;
use super::tree::Volume;
use super::{compression, extent_type};
use crate::error::BtrfsError;

/// One extent of a file, as accumulated during the fs-tree walk. The key's
/// `offset` (the position of the extent's first byte within the file) is
/// carried as `file_offset`.
#[derive(Debug, Clone)]
pub struct ExtentInfo {
    pub file_offset: u64,
    pub disk_bytenr: u64,
    pub disk_num_bytes: u64,
    pub compression: u8,
    pub extent_type: u8,
    pub extent_offset: u64,
    pub num_bytes: u64,
    pub ram_bytes: u64,
    pub inline_data: Option<Vec<u8>>,
}

impl ExtentInfo {
    pub fn from_item(file_offset: u64, item: &BtrfsFileExtentItem) -> Self {
        Self {
            file_offset,
            disk_bytenr: item.disk_bytenr,
            disk_num_bytes: item.disk_num_bytes,
            compression: item.compression,
            extent_type: item.extent_type,
            extent_offset: item.extent_offset,
            num_bytes: item.num_bytes,
            ram_bytes: item.ram_bytes,
            inline_data: item.inline_data.clone(),
        }
    }

    /// A regular/prealloc extent with no backing disk bytes reads as zeros.
    pub fn is_hole(&self) -> bool {
        self.extent_type != extent_type::INLINE && self.disk_bytenr == 0
    }
}

/// Reassemble a file's logical bytes from its extents.
pub fn reassemble_file<R: Read + Seek>(
    volume: &mut Volume<R>,
    extents: &[ExtentInfo],
    size: u64,
) -> Result<Vec<u8>, BtrfsError> {
    let size = size as usize;
    let mut out = vec![0u8; size];

    let mut sorted: Vec<&ExtentInfo> = extents.iter().collect();
    sorted.sort_by_key(|e| e.file_offset);

    for ext in sorted {
        let file_offset = ext.file_offset as usize;
        if file_offset >= size {
            continue;
        }
        let available = size - file_offset;

        if ext.extent_type == extent_type::INLINE {
            let raw = ext.inline_data.as_deref().unwrap_or(&[]);
            let bytes;
            let data: &[u8] = if ext.compression != compression::NONE {
                bytes = decompress(ext.compression, raw, ext.ram_bytes as usize)?;
                &bytes
            } else {
                raw
            };
            let n = data.len().min(available);
            out[file_offset..file_offset + n].copy_from_slice(&data[..n]);
        } else if ext.is_hole() {
            // Already zeros.
        } else if ext.compression != compression::NONE {
            // The whole compressed run is read and decompressed, then the
            // extent's window is cut out of it.
            let offset = volume.chunk_map().translate(ext.disk_bytenr)?;
            let disk = volume.read_exact_at(offset, ext.disk_num_bytes as usize)?;
            let full = decompress(ext.compression, &disk, ext.ram_bytes as usize)?;
            let start = (ext.extent_offset as usize).min(full.len());
            let end = (ext.extent_offset as usize)
                .saturating_add(ext.num_bytes as usize)
                .min(full.len());
            let window = &full[start..end];
            let n = window.len().min(available);
            out[file_offset..file_offset + n].copy_from_slice(&window[..n]);
        } else {
            let offset = volume
                .chunk_map()
                .translate(ext.disk_bytenr + ext.extent_offset)?;
            let n = (ext.num_bytes as usize).min(available);
            let disk = volume.read_exact_at(offset, n)?;
            out[file_offset..file_offset + n].copy_from_slice(&disk);
        }
    }

    Ok(out)
}

/// Image offset of the first on-disk extent (by file offset), if any.
pub fn first_physical_offset(
    extents: &[ExtentInfo],
    chunk_map: &super::chunk::ChunkMap,
) -> Option<u64> {
    let mut sorted: Vec<&ExtentInfo> = extents.iter().collect();
    sorted.sort_by_key(|e| e.file_offset);
    sorted
        .iter()
        .find(|e| e.extent_type != extent_type::INLINE && e.disk_bytenr != 0)
        .and_then(|e| chunk_map.translate(e.disk_bytenr).ok())
}

/// Total on-disk footprint: the sum of `disk_num_bytes` over all extents.
/// Distinct from the logical size for compressed, sparse, or shared files.
pub fn disk_bytes(extents: &[ExtentInfo]) -> u64 {
    extents.iter().map(|e| e.disk_num_bytes).sum()
}
