//! Binary decoders for the fixed-layout BTRFS on-disk records.
//!
//! Every decoder takes `(buffer, offset)` and fails with
//! `BtrfsError::TruncatedRecord` when the required span exceeds the buffer.
//! All integers are little-endian. Variable-length fields (names, xattr
//! values, inline data) are bounded by their length prefixes, which are
//! never trusted beyond the enclosing slice.

use crate::error::BtrfsError;

// ---- Record sizes ----

pub const KEY_SIZE: usize = 17; // objectid(8) + type(1) + offset(8)
pub const ITEM_SIZE: usize = 25; // key(17) + data_offset(4) + data_size(4)
pub const KEY_PTR_SIZE: usize = 33; // key(17) + blockptr(8) + generation(8)
pub const INODE_ITEM_SIZE: usize = 160;
pub const TIMESPEC_SIZE: usize = 12; // sec(8) + nsec(4)
pub const DIR_ITEM_FIXED_SIZE: usize = 30; // location(17) + transid(8) + data_len(2) + name_len(2) + type(1)
pub const CHUNK_FIXED_SIZE: usize = 48;
pub const STRIPE_SIZE: usize = 32; // devid(8) + offset(8) + dev_uuid(16)
pub const FILE_EXTENT_INLINE_HEADER: usize = 21;
pub const FILE_EXTENT_REG_SIZE: usize = 53;

// ---- Little-endian field helpers ----

pub(crate) fn le16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

pub(crate) fn le32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

pub(crate) fn le64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

/// Bounds check shared by every decoder.
fn need(buf: &[u8], pos: usize, span: usize, what: &'static str) -> Result<(), BtrfsError> {
    if pos.checked_add(span).map_or(true, |end| end > buf.len()) {
        return Err(BtrfsError::TruncatedRecord {
            what,
            need: span,
            have: buf.len().saturating_sub(pos),
        });
    }
    Ok(())
}

// ---- Key ----

/// Universal 17-byte item identifier. Keys order lexicographically by
/// `(objectid, item_type, offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BtrfsKey {
    pub objectid: u64,
    pub item_type: u8,
    pub offset: u64,
}

impl BtrfsKey {
    pub fn parse(buf: &[u8], pos: usize) -> Result<Self, BtrfsError> {
        need(buf, pos, KEY_SIZE, "key")?;
        Ok(Self {
            objectid: le64(buf, pos),
            item_type: buf[pos + 8],
            offset: le64(buf, pos + 9),
        })
    }
}

// ---- Timespec ----

/// 12-byte timestamp: seconds(8) + nanoseconds(4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BtrfsTimespec {
    pub sec: u64,
    pub nsec: u32,
}

impl BtrfsTimespec {
    pub fn parse(buf: &[u8], pos: usize) -> Result<Self, BtrfsError> {
        need(buf, pos, TIMESPEC_SIZE, "timespec")?;
        Ok(Self {
            sec: le64(buf, pos),
            nsec: le32(buf, pos + 8),
        })
    }
}

// ---- Tree block header ----

/// 101-byte header at the start of every tree block.
#[derive(Debug, Clone)]
pub struct BtrfsHeader {
    pub bytenr: u64,
    pub generation: u64,
    pub owner: u64,
    pub nritems: u32,
    pub level: u8,
}

impl BtrfsHeader {
    pub fn parse(buf: &[u8], pos: usize) -> Result<Self, BtrfsError> {
        need(buf, pos, super::HEADER_SIZE, "tree block header")?;
        Ok(Self {
            bytenr: le64(buf, pos + 0x30),
            generation: le64(buf, pos + 0x50),
            owner: le64(buf, pos + 0x58),
            nritems: le32(buf, pos + 0x60),
            level: buf[pos + 0x64],
        })
    }
}

// ---- Leaf item descriptor ----

/// 25-byte item descriptor in a leaf. `data_offset` is relative to the end
/// of the block header; item data grows backward from the end of the block.
#[derive(Debug, Clone, Copy)]
pub struct BtrfsItem {
    pub key: BtrfsKey,
    pub data_offset: u32,
    pub data_size: u32,
}

impl BtrfsItem {
    pub fn parse(buf: &[u8], pos: usize) -> Result<Self, BtrfsError> {
        need(buf, pos, ITEM_SIZE, "leaf item")?;
        Ok(Self {
            key: BtrfsKey::parse(buf, pos)?,
            data_offset: le32(buf, pos + 17),
            data_size: le32(buf, pos + 21),
        })
    }
}

// ---- Internal key pointer ----

/// 33-byte child pointer in an internal node. `blockptr` is a logical
/// address.
#[derive(Debug, Clone, Copy)]
pub struct BtrfsKeyPtr {
    pub key: BtrfsKey,
    pub blockptr: u64,
    pub generation: u64,
}

impl BtrfsKeyPtr {
    pub fn parse(buf: &[u8], pos: usize) -> Result<Self, BtrfsError> {
        need(buf, pos, KEY_PTR_SIZE, "key pointer")?;
        Ok(Self {
            key: BtrfsKey::parse(buf, pos)?,
            blockptr: le64(buf, pos + 17),
            generation: le64(buf, pos + 25),
        })
    }
}

// ---- Inode item ----

/// 160-byte inode record.
#[derive(Debug, Clone, Default)]
pub struct BtrfsInodeItem {
    pub generation: u64,
    pub transid: u64,
    pub size: u64,
    pub nbytes: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub rdev: u64,
    pub flags: u64,
    pub atime: BtrfsTimespec,
    pub ctime: BtrfsTimespec,
    pub mtime: BtrfsTimespec,
    pub otime: BtrfsTimespec,
}

impl BtrfsInodeItem {
    /// Layout: generation(8) transid(8) size(8) nbytes(8) block_group(8)
    /// nlink(4) uid(4) gid(4) mode(4) rdev(8) flags(8) sequence(8)
    /// reserved(32) atime(12) ctime(12) mtime(12) otime(12).
    pub fn parse(buf: &[u8], pos: usize) -> Result<Self, BtrfsError> {
        need(buf, pos, INODE_ITEM_SIZE, "inode item")?;
        Ok(Self {
            generation: le64(buf, pos),
            transid: le64(buf, pos + 8),
            size: le64(buf, pos + 16),
            nbytes: le64(buf, pos + 24),
            nlink: le32(buf, pos + 40),
            uid: le32(buf, pos + 44),
            gid: le32(buf, pos + 48),
            mode: le32(buf, pos + 52),
            rdev: le64(buf, pos + 56),
            flags: le64(buf, pos + 64),
            atime: BtrfsTimespec::parse(buf, pos + 112)?,
            ctime: BtrfsTimespec::parse(buf, pos + 124)?,
            mtime: BtrfsTimespec::parse(buf, pos + 136)?,
            otime: BtrfsTimespec::parse(buf, pos + 148)?,
        })
    }
}

// ---- Directory / xattr item ----

/// Variable-length directory entry, also the carrier for xattrs
/// (`data_len > 0` means `value` holds the xattr payload).
#[derive(Debug, Clone)]
pub struct BtrfsDirItem {
    pub location: BtrfsKey,
    pub transid: u64,
    pub data_len: u16,
    pub name_len: u16,
    pub entry_type: u8,
    pub name: String,
    pub value: Vec<u8>,
}

impl BtrfsDirItem {
    pub fn parse(buf: &[u8], pos: usize) -> Result<Self, BtrfsError> {
        need(buf, pos, DIR_ITEM_FIXED_SIZE, "dir item")?;
        let location = BtrfsKey::parse(buf, pos)?;
        let transid = le64(buf, pos + 17);
        let data_len = le16(buf, pos + 25);
        let name_len = le16(buf, pos + 27);
        let entry_type = buf[pos + 29];
        need(
            buf,
            pos + DIR_ITEM_FIXED_SIZE,
            name_len as usize + data_len as usize,
            "dir item name",
        )?;
        let name_start = pos + DIR_ITEM_FIXED_SIZE;
        let name =
            String::from_utf8_lossy(&buf[name_start..name_start + name_len as usize]).to_string();
        let value_start = name_start + name_len as usize;
        let value = buf[value_start..value_start + data_len as usize].to_vec();
        Ok(Self {
            location,
            transid,
            data_len,
            name_len,
            entry_type,
            name,
            value,
        })
    }

    pub fn total_size(&self) -> usize {
        DIR_ITEM_FIXED_SIZE + self.name_len as usize + self.data_len as usize
    }
}

// ---- Inode reference ----

/// INODE_REF payload: index(8) + name_len(2) + name. The key's `offset`
/// holds the parent inode number.
#[derive(Debug, Clone)]
pub struct BtrfsInodeRef {
    pub index: u64,
    pub name: String,
}

impl BtrfsInodeRef {
    pub fn parse(buf: &[u8], pos: usize) -> Result<Self, BtrfsError> {
        need(buf, pos, 10, "inode ref")?;
        let index = le64(buf, pos);
        let name_len = le16(buf, pos + 8) as usize;
        need(buf, pos + 10, name_len, "inode ref name")?;
        let name = String::from_utf8_lossy(&buf[pos + 10..pos + 10 + name_len]).to_string();
        Ok(Self { index, name })
    }
}

// ---- Root reference ----

/// ROOT_REF payload: dirid(8) + sequence(8) + name_len(2) + name. The key's
/// `offset` holds the child subvolume id.
#[derive(Debug, Clone)]
pub struct BtrfsRootRef {
    pub dirid: u64,
    pub sequence: u64,
    pub name: String,
}

impl BtrfsRootRef {
    pub fn parse(buf: &[u8], pos: usize) -> Result<Self, BtrfsError> {
        need(buf, pos, 18, "root ref")?;
        let dirid = le64(buf, pos);
        let sequence = le64(buf, pos + 8);
        let name_len = le16(buf, pos + 16) as usize;
        need(buf, pos + 18, name_len, "root ref name")?;
        let name = String::from_utf8_lossy(&buf[pos + 18..pos + 18 + name_len]).to_string();
        Ok(Self {
            dirid,
            sequence,
            name,
        })
    }
}

// ---- Chunk ----

/// One stripe of a chunk: devid(8) + offset(8) + dev_uuid(16).
#[derive(Debug, Clone, Copy)]
pub struct BtrfsStripe {
    pub devid: u64,
    pub offset: u64,
}

/// Variable-length chunk record: 48 fixed bytes + 32 per stripe. Only
/// stripe 0 is used for address translation (single-device assumption).
#[derive(Debug, Clone)]
pub struct BtrfsChunk {
    pub length: u64,
    pub owner: u64,
    pub stripe_len: u64,
    pub chunk_type: u64,
    pub num_stripes: u16,
    pub stripes: Vec<BtrfsStripe>,
}

impl BtrfsChunk {
    pub fn parse(buf: &[u8], pos: usize) -> Result<Self, BtrfsError> {
        need(buf, pos, CHUNK_FIXED_SIZE, "chunk")?;
        let length = le64(buf, pos);
        let owner = le64(buf, pos + 8);
        let stripe_len = le64(buf, pos + 16);
        let chunk_type = le64(buf, pos + 24);
        let num_stripes = le16(buf, pos + 44);
        need(
            buf,
            pos + CHUNK_FIXED_SIZE,
            num_stripes as usize * STRIPE_SIZE,
            "chunk stripes",
        )?;
        let mut stripes = Vec::with_capacity(num_stripes as usize);
        for i in 0..num_stripes as usize {
            let sp = pos + CHUNK_FIXED_SIZE + i * STRIPE_SIZE;
            stripes.push(BtrfsStripe {
                devid: le64(buf, sp),
                offset: le64(buf, sp + 8),
            });
        }
        Ok(Self {
            length,
            owner,
            stripe_len,
            chunk_type,
            num_stripes,
            stripes,
        })
    }

    pub fn total_size(&self) -> usize {
        CHUNK_FIXED_SIZE + self.num_stripes as usize * STRIPE_SIZE
    }
}

// ---- File extent item ----

/// File extent: 21-byte prefix, then either inline payload bytes or a
/// 32-byte disk location (regular/prealloc). `disk_bytenr == 0` marks a
/// hole.
#[derive(Debug, Clone)]
pub struct BtrfsFileExtentItem {
    pub generation: u64,
    pub ram_bytes: u64,
    pub compression: u8,
    pub encryption: u8,
    pub extent_type: u8,
    pub disk_bytenr: u64,
    pub disk_num_bytes: u64,
    pub extent_offset: u64,
    pub num_bytes: u64,
    pub inline_data: Option<Vec<u8>>,
}

impl BtrfsFileExtentItem {
    pub fn parse(buf: &[u8], pos: usize) -> Result<Self, BtrfsError> {
        need(buf, pos, FILE_EXTENT_INLINE_HEADER, "file extent item")?;
        let generation = le64(buf, pos);
        let ram_bytes = le64(buf, pos + 8);
        let compression = buf[pos + 16];
        let encryption = buf[pos + 17];
        let extent_type = buf[pos + 20];

        if extent_type == super::extent_type::INLINE {
            // The rest of the item payload is the (possibly compressed) data.
            let inline = buf[pos + FILE_EXTENT_INLINE_HEADER..].to_vec();
            let num_bytes = ram_bytes;
            return Ok(Self {
                generation,
                ram_bytes,
                compression,
                encryption,
                extent_type,
                disk_bytenr: 0,
                disk_num_bytes: 0,
                extent_offset: 0,
                num_bytes,
                inline_data: Some(inline),
            });
        }

        need(buf, pos, FILE_EXTENT_REG_SIZE, "file extent item")?;
        Ok(Self {
            generation,
            ram_bytes,
            compression,
            encryption,
            extent_type,
            disk_bytenr: le64(buf, pos + 21),
            disk_num_bytes: le64(buf, pos + 29),
            extent_offset: le64(buf, pos + 37),
            num_bytes: le64(buf, pos + 45),
            inline_data: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod builders {
    //! Byte builders mirroring the decoders, used by unit and e2e tests.

    use super::*;

    pub fn key_bytes(objectid: u64, item_type: u8, offset: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(KEY_SIZE);
        buf.extend_from_slice(&objectid.to_le_bytes());
        buf.push(item_type);
        buf.extend_from_slice(&offset.to_le_bytes());
        buf
    }

    pub fn inode_item_bytes(
        mode: u32,
        size: u64,
        uid: u32,
        gid: u32,
        nlink: u32,
        flags: u64,
        times: [u64; 4],
    ) -> Vec<u8> {
        let mut data = vec![0u8; INODE_ITEM_SIZE];
        data[0..8].copy_from_slice(&1u64.to_le_bytes()); // generation
        data[8..16].copy_from_slice(&1u64.to_le_bytes()); // transid
        data[16..24].copy_from_slice(&size.to_le_bytes());
        data[24..32].copy_from_slice(&size.to_le_bytes()); // nbytes
        data[40..44].copy_from_slice(&nlink.to_le_bytes());
        data[44..48].copy_from_slice(&uid.to_le_bytes());
        data[48..52].copy_from_slice(&gid.to_le_bytes());
        data[52..56].copy_from_slice(&mode.to_le_bytes());
        data[64..72].copy_from_slice(&flags.to_le_bytes());
        for (i, sec) in times.iter().enumerate() {
            let off = 112 + i * TIMESPEC_SIZE;
            data[off..off + 8].copy_from_slice(&sec.to_le_bytes());
        }
        data
    }

    pub fn dir_item_bytes(
        location: (u64, u8, u64),
        entry_type: u8,
        name: &str,
        value: &[u8],
    ) -> Vec<u8> {
        let mut data = key_bytes(location.0, location.1, location.2);
        data.extend_from_slice(&1u64.to_le_bytes()); // transid
        data.extend_from_slice(&(value.len() as u16).to_le_bytes());
        data.extend_from_slice(&(name.len() as u16).to_le_bytes());
        data.push(entry_type);
        data.extend_from_slice(name.as_bytes());
        data.extend_from_slice(value);
        data
    }

    pub fn inode_ref_bytes(index: u64, name: &str) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&index.to_le_bytes());
        data.extend_from_slice(&(name.len() as u16).to_le_bytes());
        data.extend_from_slice(name.as_bytes());
        data
    }

    pub fn root_ref_bytes(dirid: u64, sequence: u64, name: &str) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&dirid.to_le_bytes());
        data.extend_from_slice(&sequence.to_le_bytes());
        data.extend_from_slice(&(name.len() as u16).to_le_bytes());
        data.extend_from_slice(name.as_bytes());
        data
    }

    pub fn chunk_bytes(length: u64, stripes: &[(u64, u64)]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&length.to_le_bytes());
        data.extend_from_slice(&2u64.to_le_bytes()); // owner
        data.extend_from_slice(&65536u64.to_le_bytes()); // stripe_len
        data.extend_from_slice(&1u64.to_le_bytes()); // type
        data.extend_from_slice(&4096u32.to_le_bytes()); // io_align
        data.extend_from_slice(&4096u32.to_le_bytes()); // io_width
        data.extend_from_slice(&4096u32.to_le_bytes()); // sector_size
        data.extend_from_slice(&(stripes.len() as u16).to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes()); // sub_stripes
        for &(devid, offset) in stripes {
            data.extend_from_slice(&devid.to_le_bytes());
            data.extend_from_slice(&offset.to_le_bytes());
            data.extend_from_slice(&[0u8; 16]); // dev_uuid
        }
        data
    }

    pub fn inline_extent_bytes(payload: &[u8], compression: u8, ram_bytes: u64) -> Vec<u8> {
        let mut data = vec![0u8; FILE_EXTENT_INLINE_HEADER];
        data[0..8].copy_from_slice(&1u64.to_le_bytes()); // generation
        data[8..16].copy_from_slice(&ram_bytes.to_le_bytes());
        data[16] = compression;
        data[20] = crate::btrfs::extent_type::INLINE;
        data.extend_from_slice(payload);
        data
    }

    pub fn regular_extent_bytes(
        disk_bytenr: u64,
        disk_num_bytes: u64,
        extent_offset: u64,
        num_bytes: u64,
        compression: u8,
        ram_bytes: u64,
    ) -> Vec<u8> {
        let mut data = vec![0u8; FILE_EXTENT_REG_SIZE];
        data[0..8].copy_from_slice(&1u64.to_le_bytes());
        data[8..16].copy_from_slice(&ram_bytes.to_le_bytes());
        data[16] = compression;
        data[20] = crate::btrfs::extent_type::REGULAR;
        data[21..29].copy_from_slice(&disk_bytenr.to_le_bytes());
        data[29..37].copy_from_slice(&disk_num_bytes.to_le_bytes());
        data[37..45].copy_from_slice(&extent_offset.to_le_bytes());
        data[45..53].copy_from_slice(&num_bytes.to_le_bytes());
        data
    }
}

#[cfg(test)]
mod tests {
    use super::builders::*;
    use super::*;

    #[test]
    fn test_key_round_trip() {
        let bytes = key_bytes(256, 108, 0x4000);
        let key = BtrfsKey::parse(&bytes, 0).unwrap();
        assert_eq!(key.objectid, 256);
        assert_eq!(key.item_type, 108);
        assert_eq!(key.offset, 0x4000);
        assert_eq!(key_bytes(key.objectid, key.item_type, key.offset), bytes);
    }

    #[test]
    fn test_key_ordering() {
        let a = BtrfsKey {
            objectid: 256,
            item_type: 1,
            offset: 0,
        };
        let b = BtrfsKey {
            objectid: 256,
            item_type: 12,
            offset: 0,
        };
        let c = BtrfsKey {
            objectid: 257,
            item_type: 1,
            offset: 0,
        };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_key_truncated() {
        let err = BtrfsKey::parse(&[0u8; 16], 0).unwrap_err();
        assert!(matches!(err, BtrfsError::TruncatedRecord { .. }));
    }

    #[test]
    fn test_inode_item_round_trip() {
        let bytes = inode_item_bytes(0o100644, 4096, 1000, 1000, 2, 1 << 11, [1, 2, 3, 4]);
        let inode = BtrfsInodeItem::parse(&bytes, 0).unwrap();
        assert_eq!(inode.mode, 0o100644);
        assert_eq!(inode.size, 4096);
        assert_eq!(inode.uid, 1000);
        assert_eq!(inode.gid, 1000);
        assert_eq!(inode.nlink, 2);
        assert_eq!(inode.flags, 1 << 11);
        assert_eq!(inode.atime.sec, 1);
        assert_eq!(inode.ctime.sec, 2);
        assert_eq!(inode.mtime.sec, 3);
        assert_eq!(inode.otime.sec, 4);
        let rebuilt = inode_item_bytes(
            inode.mode,
            inode.size,
            inode.uid,
            inode.gid,
            inode.nlink,
            inode.flags,
            [
                inode.atime.sec,
                inode.ctime.sec,
                inode.mtime.sec,
                inode.otime.sec,
            ],
        );
        assert_eq!(rebuilt, bytes);
    }

    #[test]
    fn test_inode_item_too_short() {
        let err = BtrfsInodeItem::parse(&[0u8; 159], 0).unwrap_err();
        assert!(matches!(
            err,
            BtrfsError::TruncatedRecord {
                what: "inode item",
                ..
            }
        ));
    }

    #[test]
    fn test_dir_item_round_trip() {
        let bytes = dir_item_bytes((257, 1, 0), 1, "hello.txt", b"");
        let item = BtrfsDirItem::parse(&bytes, 0).unwrap();
        assert_eq!(item.location.objectid, 257);
        assert_eq!(item.name, "hello.txt");
        assert_eq!(item.entry_type, 1);
        assert_eq!(item.total_size(), bytes.len());
        assert_eq!(
            dir_item_bytes(
                (
                    item.location.objectid,
                    item.location.item_type,
                    item.location.offset
                ),
                item.entry_type,
                &item.name,
                &item.value
            ),
            bytes
        );
    }

    #[test]
    fn test_dir_item_xattr_value() {
        let bytes = dir_item_bytes((256, 24, 0), 8, "user.comment", b"forty-two");
        let item = BtrfsDirItem::parse(&bytes, 0).unwrap();
        assert_eq!(item.name, "user.comment");
        assert_eq!(item.value, b"forty-two");
        assert_eq!(item.data_len, 9);
    }

    #[test]
    fn test_dir_item_name_len_beyond_item() {
        // name_len claims 200 bytes but only 3 follow
        let mut bytes = dir_item_bytes((257, 1, 0), 1, "abc", b"");
        bytes[27..29].copy_from_slice(&200u16.to_le_bytes());
        assert!(BtrfsDirItem::parse(&bytes, 0).is_err());
    }

    #[test]
    fn test_inode_ref_round_trip() {
        let bytes = inode_ref_bytes(2, "file.bin");
        let iref = BtrfsInodeRef::parse(&bytes, 0).unwrap();
        assert_eq!(iref.index, 2);
        assert_eq!(iref.name, "file.bin");
        assert_eq!(inode_ref_bytes(iref.index, &iref.name), bytes);
    }

    #[test]
    fn test_root_ref_round_trip() {
        let bytes = root_ref_bytes(256, 3, "snapshot-a");
        let rref = BtrfsRootRef::parse(&bytes, 0).unwrap();
        assert_eq!(rref.dirid, 256);
        assert_eq!(rref.sequence, 3);
        assert_eq!(rref.name, "snapshot-a");
        assert_eq!(root_ref_bytes(rref.dirid, rref.sequence, &rref.name), bytes);
    }

    #[test]
    fn test_chunk_round_trip() {
        let bytes = chunk_bytes(0x100000, &[(1, 0x400000)]);
        let chunk = BtrfsChunk::parse(&bytes, 0).unwrap();
        assert_eq!(chunk.length, 0x100000);
        assert_eq!(chunk.num_stripes, 1);
        assert_eq!(chunk.stripes[0].devid, 1);
        assert_eq!(chunk.stripes[0].offset, 0x400000);
        assert_eq!(chunk.total_size(), bytes.len());
        let rebuilt = chunk_bytes(
            chunk.length,
            &chunk
                .stripes
                .iter()
                .map(|s| (s.devid, s.offset))
                .collect::<Vec<_>>(),
        );
        assert_eq!(rebuilt, bytes);
    }

    #[test]
    fn test_chunk_stripe_count_beyond_buffer() {
        let mut bytes = chunk_bytes(0x100000, &[(1, 0x400000)]);
        bytes[44..46].copy_from_slice(&4u16.to_le_bytes());
        assert!(BtrfsChunk::parse(&bytes, 0).is_err());
    }

    #[test]
    fn test_inline_extent_parse() {
        let bytes = inline_extent_bytes(b"hello", 0, 5);
        let ext = BtrfsFileExtentItem::parse(&bytes, 0).unwrap();
        assert_eq!(ext.extent_type, crate::btrfs::extent_type::INLINE);
        assert_eq!(ext.inline_data.as_deref(), Some(&b"hello"[..]));
        assert_eq!(ext.num_bytes, 5);
        assert_eq!(ext.compression, 0);
    }

    #[test]
    fn test_regular_extent_round_trip() {
        let bytes = regular_extent_bytes(0x110000, 4096, 0, 4096, 0, 4096);
        let ext = BtrfsFileExtentItem::parse(&bytes, 0).unwrap();
        assert_eq!(ext.extent_type, crate::btrfs::extent_type::REGULAR);
        assert_eq!(ext.disk_bytenr, 0x110000);
        assert_eq!(ext.disk_num_bytes, 4096);
        assert_eq!(ext.extent_offset, 0);
        assert_eq!(ext.num_bytes, 4096);
        assert!(ext.inline_data.is_none());
        let rebuilt = regular_extent_bytes(
            ext.disk_bytenr,
            ext.disk_num_bytes,
            ext.extent_offset,
            ext.num_bytes,
            ext.compression,
            ext.ram_bytes,
        );
        assert_eq!(rebuilt, bytes);
    }

    #[test]
    fn test_regular_extent_truncated() {
        let bytes = regular_extent_bytes(0x110000, 4096, 0, 4096, 0, 4096);
        assert!(BtrfsFileExtentItem::parse(&bytes[..40], 0).is_err());
    }

    #[test]
    fn test_header_parse() {
        let mut block = vec![0u8; 256];
        block[0x30..0x38].copy_from_slice(&0x2000000u64.to_le_bytes());
        block[0x50..0x58].copy_from_slice(&7u64.to_le_bytes());
        block[0x58..0x60].copy_from_slice(&5u64.to_le_bytes());
        block[0x60..0x64].copy_from_slice(&12u32.to_le_bytes());
        block[0x64] = 1;
        let header = BtrfsHeader::parse(&block, 0).unwrap();
        assert_eq!(header.bytenr, 0x2000000);
        assert_eq!(header.generation, 7);
        assert_eq!(header.owner, 5);
        assert_eq!(header.nritems, 12);
        assert_eq!(header.level, 1);
    }
}
