//! Partition table scanning: locate BTRFS volumes inside a whole-disk
//! image.
//!
//! MBR primaries are tried first; a protective MBR (or no MBR hits) falls
//! through to GPT. Every candidate partition is probed for the BTRFS magic
//! at `start + 0x10000 + 0x40`, so non-BTRFS partitions never make the
//! list. 512-byte sectors are assumed for both table formats.

use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::btrfs::{BTRFS_MAGIC, SUPERBLOCK_OFFSET};
use crate::error::BtrfsError;

const SECTOR: u64 = 512;
const MBR_SIGNATURE: u16 = 0xAA55;
const MBR_TABLE_OFFSET: usize = 446;
const MBR_ENTRY_SIZE: usize = 16;
const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";

/// A partition that contains a BTRFS superblock.
#[derive(Debug, Clone)]
pub struct BtrfsPartition {
    pub index: usize,
    /// Byte offset of the partition start within the image.
    pub offset: u64,
    pub size: u64,
    /// "MBR" or "GPT".
    pub scheme: &'static str,
    pub label: Option<String>,
}

impl std::fmt::Display for BtrfsPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Partition {} | {} | Offset: {:#x} ({} bytes) | Size: {:.2} GiB",
            self.index,
            self.scheme,
            self.offset,
            self.offset,
            self.size as f64 / (1024.0 * 1024.0 * 1024.0),
        )?;
        if let Some(label) = &self.label {
            write!(f, " | Label: {label}")?;
        }
        Ok(())
    }
}

/// Scan an image for BTRFS partitions: MBR primaries first, then GPT.
/// A bare filesystem image (no partition table) yields an empty list; probe
/// offset 0 directly in that case.
pub fn detect_btrfs_partitions<R: Read + Seek>(
    reader: &mut R,
) -> Result<Vec<BtrfsPartition>, BtrfsError> {
    let mut found = Vec::new();

    for (index, start_lba, total_sectors) in read_mbr_entries(reader)? {
        let offset = start_lba as u64 * SECTOR;
        if let Some(label) = probe_btrfs(reader, offset)? {
            found.push(BtrfsPartition {
                index,
                offset,
                size: total_sectors as u64 * SECTOR,
                scheme: "MBR",
                label,
            });
        }
    }
    if !found.is_empty() {
        return Ok(found);
    }

    for (index, first_lba, last_lba, name) in read_gpt_entries(reader)? {
        let offset = first_lba * SECTOR;
        if let Some(label) = probe_btrfs(reader, offset)? {
            found.push(BtrfsPartition {
                index,
                offset,
                size: (last_lba - first_lba + 1) * SECTOR,
                scheme: "GPT",
                label: label.or(if name.is_empty() { None } else { Some(name) }),
            });
        }
    }
    Ok(found)
}

/// Check for the BTRFS magic at a partition offset. `Ok(Some(label))` means
/// a superblock is present; its label may be empty.
fn probe_btrfs<R: Read + Seek>(
    reader: &mut R,
    partition_offset: u64,
) -> Result<Option<Option<String>>, BtrfsError> {
    let mut magic = [0u8; 8];
    if reader
        .seek(SeekFrom::Start(partition_offset + SUPERBLOCK_OFFSET + 0x40))
        .is_err()
        || reader.read_exact(&mut magic).is_err()
    {
        return Ok(None);
    }
    if &magic != BTRFS_MAGIC {
        return Ok(None);
    }

    let mut label_bytes = [0u8; 256];
    let label = if reader
        .seek(SeekFrom::Start(partition_offset + SUPERBLOCK_OFFSET + 0x12B))
        .is_ok()
        && reader.read_exact(&mut label_bytes).is_ok()
    {
        let end = label_bytes.iter().position(|&b| b == 0).unwrap_or(256);
        if end > 0 {
            Some(String::from_utf8_lossy(&label_bytes[..end]).to_string())
        } else {
            None
        }
    } else {
        None
    };
    Ok(Some(label))
}

// ---- MBR ----

/// Non-empty primary entries: (index, start LBA, sector count). An absent
/// or unsigned MBR yields an empty list, never an error.
fn read_mbr_entries<R: Read + Seek>(
    reader: &mut R,
) -> Result<Vec<(usize, u32, u32)>, BtrfsError> {
    reader.seek(SeekFrom::Start(0))?;
    let mut mbr = [0u8; 512];
    if reader.read_exact(&mut mbr).is_err() {
        return Ok(Vec::new());
    }

    let mut sig = Cursor::new(&mbr[510..512]);
    if sig.read_u16::<LittleEndian>().unwrap() != MBR_SIGNATURE {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for i in 0..4 {
        let off = MBR_TABLE_OFFSET + i * MBR_ENTRY_SIZE;
        let partition_type = mbr[off + 4];
        let mut cursor = Cursor::new(&mbr[off + 8..off + 16]);
        let start_lba = cursor.read_u32::<LittleEndian>().unwrap();
        let total_sectors = cursor.read_u32::<LittleEndian>().unwrap();
        if partition_type == 0 || total_sectors == 0 {
            continue;
        }
        entries.push((i + 1, start_lba, total_sectors));
    }
    Ok(entries)
}

// ---- GPT ----

/// Non-empty GPT entries: (index, first LBA, last LBA, name). An absent GPT
/// yields an empty list.
fn read_gpt_entries<R: Read + Seek>(
    reader: &mut R,
) -> Result<Vec<(usize, u64, u64, String)>, BtrfsError> {
    reader.seek(SeekFrom::Start(SECTOR))?;
    let mut header = [0u8; 92];
    if reader.read_exact(&mut header).is_err() || &header[0..8] != GPT_SIGNATURE {
        return Ok(Vec::new());
    }

    let mut cursor = Cursor::new(&header[0x48..0x58]);
    let entry_lba = cursor.read_u64::<LittleEndian>().unwrap();
    let num_entries = cursor.read_u32::<LittleEndian>().unwrap();
    let entry_size = cursor.read_u32::<LittleEndian>().unwrap();
    if entry_size < 128 || num_entries > 1024 {
        return Ok(Vec::new());
    }

    reader.seek(SeekFrom::Start(entry_lba * SECTOR))?;
    let mut entries = Vec::new();
    let mut buf = vec![0u8; entry_size as usize];
    for i in 0..num_entries as usize {
        if reader.read_exact(&mut buf).is_err() {
            break;
        }
        if buf[0..16] == [0u8; 16] {
            continue; // unused slot
        }
        let mut cursor = Cursor::new(&buf[0x20..0x30]);
        let first_lba = cursor.read_u64::<LittleEndian>().unwrap();
        let last_lba = cursor.read_u64::<LittleEndian>().unwrap();
        let name = parse_utf16le_name(&buf[0x38..0x38 + 72]);
        entries.push((i + 1, first_lba, last_lba, name));
    }
    Ok(entries)
}

fn parse_utf16le_name(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&c| c != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
