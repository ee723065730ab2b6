//! Superblock reading and validation.
//!
//! The primary superblock lives at byte 0x10000 from the partition start
//! and is the only structure whose absence is fatal. Checksums are reported
//! (`csum_type`) but never verified.

use std::io::{Read, Seek, SeekFrom};

use uuid::Uuid;

use super::structs::{le16, le32, le64};
use super::{BTRFS_MAGIC, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};
use crate::error::BtrfsError;

/// The sys_chunk_array region holds at most 2048 bytes of (key, chunk)
/// pairs.
const SYS_CHUNK_ARRAY_MAX: usize = 2048;

/// Decoded superblock fields used by the parser.
#[derive(Debug, Clone)]
pub struct Superblock {
    pub fsid: [u8; 16],
    pub generation: u64,
    /// Logical address of the root tree root.
    pub root: u64,
    /// Logical address of the chunk tree root.
    pub chunk_root: u64,
    pub log_root: u64,
    pub total_bytes: u64,
    pub bytes_used: u64,
    pub num_devices: u64,
    pub sectorsize: u32,
    pub nodesize: u32,
    pub csum_type: u16,
    pub root_level: u8,
    pub chunk_root_level: u8,
    pub label: String,
    /// Raw (key, chunk) pairs, clamped to the declared array size.
    pub sys_chunk_array: Vec<u8>,
}

impl Superblock {
    /// Read and validate the superblock at `partition_offset + 0x10000`.
    pub fn read<R: Read + Seek>(
        reader: &mut R,
        partition_offset: u64,
    ) -> Result<Self, BtrfsError> {
        reader.seek(SeekFrom::Start(partition_offset + SUPERBLOCK_OFFSET))?;
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        reader.read_exact(&mut buf).map_err(|_| BtrfsError::ShortRead {
            offset: partition_offset + SUPERBLOCK_OFFSET,
            wanted: SUPERBLOCK_SIZE,
            got: 0,
        })?;
        Self::parse(&buf)
    }

    /// Decode a 4096-byte superblock buffer.
    pub fn parse(buf: &[u8]) -> Result<Self, BtrfsError> {
        if buf.len() < SUPERBLOCK_SIZE {
            return Err(BtrfsError::TruncatedRecord {
                what: "superblock",
                need: SUPERBLOCK_SIZE,
                have: buf.len(),
            });
        }
        if &buf[0x40..0x48] != BTRFS_MAGIC {
            return Err(BtrfsError::NotBtrfs(format!(
                "magic {:02x?} at superblock offset 0x40, expected {:02x?}",
                &buf[0x40..0x48],
                BTRFS_MAGIC
            )));
        }

        let nodesize = le32(buf, 0x94);
        if !(4096..=65536).contains(&nodesize) {
            return Err(BtrfsError::Parse(format!("invalid nodesize {nodesize}")));
        }

        let mut fsid = [0u8; 16];
        fsid.copy_from_slice(&buf[0x20..0x30]);

        let label_bytes = &buf[0x12B..0x12B + 256];
        let label_end = label_bytes.iter().position(|&b| b == 0).unwrap_or(256);
        let label = String::from_utf8_lossy(&label_bytes[..label_end]).to_string();

        let sys_chunk_array_size = (le32(buf, 0xA0) as usize).min(SYS_CHUNK_ARRAY_MAX);
        let sys_chunk_array = buf[0x32B..0x32B + sys_chunk_array_size].to_vec();

        Ok(Self {
            fsid,
            generation: le64(buf, 0x48),
            root: le64(buf, 0x50),
            chunk_root: le64(buf, 0x58),
            log_root: le64(buf, 0x60),
            total_bytes: le64(buf, 0x70),
            bytes_used: le64(buf, 0x78),
            num_devices: le64(buf, 0x88),
            sectorsize: le32(buf, 0x90),
            nodesize,
            csum_type: le16(buf, 0xC4),
            root_level: buf[0xC6],
            chunk_root_level: buf[0xC7],
            label,
            sys_chunk_array,
        })
    }

    /// Filesystem UUID as lowercase 8-4-4-4-12.
    pub fn fsid_string(&self) -> String {
        Uuid::from_bytes(self.fsid).to_string()
    }

    /// Human-readable summary, one field per line.
    pub fn describe(&self) -> String {
        let csum_name = if self.csum_type == 0 { "CRC32C" } else { "unknown" };
        format!(
            "=== BTRFS Superblock ===\n\
             Label:           {}\n\
             UUID:            {}\n\
             Generation:      {}\n\
             Total bytes:     {} ({:.2} GiB)\n\
             Bytes used:      {} ({:.2} GiB)\n\
             Node size:       {}\n\
             Sector size:     {}\n\
             Root tree addr:  {:#x}\n\
             Chunk tree addr: {:#x}\n\
             Devices:         {}\n\
             Checksum type:   {} ({})",
            if self.label.is_empty() {
                "(none)"
            } else {
                &self.label
            },
            self.fsid_string(),
            self.generation,
            self.total_bytes,
            self.total_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
            self.bytes_used,
            self.bytes_used as f64 / (1024.0 * 1024.0 * 1024.0),
            self.nodesize,
            self.sectorsize,
            self.root,
            self.chunk_root,
            self.num_devices,
            self.csum_type,
            csum_name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn superblock_bytes(label: &str) -> Vec<u8> {
        let mut buf = vec![0u8; SUPERBLOCK_SIZE];
        buf[0x20..0x30].copy_from_slice(&[0xAB; 16]);
        buf[0x40..0x48].copy_from_slice(BTRFS_MAGIC);
        buf[0x48..0x50].copy_from_slice(&9u64.to_le_bytes()); // generation
        buf[0x50..0x58].copy_from_slice(&0x2000000u64.to_le_bytes()); // root
        buf[0x58..0x60].copy_from_slice(&0x1000000u64.to_le_bytes()); // chunk_root
        buf[0x70..0x78].copy_from_slice(&(1u64 << 30).to_le_bytes());
        buf[0x78..0x80].copy_from_slice(&(1u64 << 20).to_le_bytes());
        buf[0x88..0x90].copy_from_slice(&1u64.to_le_bytes());
        buf[0x90..0x94].copy_from_slice(&4096u32.to_le_bytes());
        buf[0x94..0x98].copy_from_slice(&16384u32.to_le_bytes());
        buf[0x12B..0x12B + label.len()].copy_from_slice(label.as_bytes());
        buf
    }

    #[test]
    fn test_parse_valid() {
        let sb = Superblock::parse(&superblock_bytes("vol0")).unwrap();
        assert_eq!(sb.label, "vol0");
        assert_eq!(sb.generation, 9);
        assert_eq!(sb.root, 0x2000000);
        assert_eq!(sb.chunk_root, 0x1000000);
        assert_eq!(sb.nodesize, 16384);
        assert_eq!(sb.sectorsize, 4096);
        assert_eq!(sb.num_devices, 1);
        assert!(sb.sys_chunk_array.is_empty());
    }

    #[test]
    fn test_parse_bad_magic() {
        let mut buf = superblock_bytes("");
        buf[0x40] = 0xFF;
        let err = Superblock::parse(&buf).unwrap_err();
        assert!(matches!(err, BtrfsError::NotBtrfs(_)));
    }

    #[test]
    fn test_parse_bad_nodesize() {
        let mut buf = superblock_bytes("");
        buf[0x94..0x98].copy_from_slice(&512u32.to_le_bytes());
        assert!(matches!(
            Superblock::parse(&buf).unwrap_err(),
            BtrfsError::Parse(_)
        ));
    }

    #[test]
    fn test_read_at_partition_offset() {
        let offset = 0x100000u64;
        let mut image = vec![0u8; offset as usize];
        image.extend_from_slice(&vec![0u8; SUPERBLOCK_OFFSET as usize]);
        image.extend_from_slice(&superblock_bytes("shifted"));
        let mut cursor = Cursor::new(image);
        let sb = Superblock::read(&mut cursor, offset).unwrap();
        assert_eq!(sb.label, "shifted");
    }

    #[test]
    fn test_sys_chunk_array_size_clamped() {
        let mut buf = superblock_bytes("");
        buf[0xA0..0xA4].copy_from_slice(&10_000u32.to_le_bytes());
        let sb = Superblock::parse(&buf).unwrap();
        assert_eq!(sb.sys_chunk_array.len(), 2048);
    }

    #[test]
    fn test_fsid_string_format() {
        let sb = Superblock::parse(&superblock_bytes("")).unwrap();
        assert_eq!(sb.fsid_string(), "abababab-abab-abab-abab-abababababab");
    }
}
