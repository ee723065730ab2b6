//! BTRFS on-disk format: constants, decoders, and the read-only parsing
//! stack (superblock, chunk map, tree engine, filesystem reconstruction,
//! extent reassembly).
//!
//! Only single-device images are supported: chunk translation always uses
//! stripe 0, so RAID1/RAID10/RAID5/RAID6 profiles will read wrong data.

pub mod chunk;
pub mod compress;
pub mod extent;
pub mod filesystem;
pub mod structs;
pub mod superblock;
pub mod tree;

/// Superblock magic "_BHRfS_M" found at superblock offset 0x40.
pub const BTRFS_MAGIC: &[u8; 8] = b"_BHRfS_M";

/// Primary superblock location relative to the partition start (64 KiB).
pub const SUPERBLOCK_OFFSET: u64 = 0x10000;

/// The superblock occupies one 4 KiB sector.
pub const SUPERBLOCK_SIZE: usize = 4096;

/// Tree block header: csum(32) + fsid(16) + bytenr(8) + flags(8) +
/// chunk_tree_uuid(16) + generation(8) + owner(8) + nritems(4) + level(1).
pub const HEADER_SIZE: usize = 101;

/// Checksums in the checksum tree are 4-byte CRC32C values, one per sector.
pub const SECTOR_SIZE: u64 = 4096;

/// Well-known tree object ids.
pub mod objectid {
    pub const ROOT_TREE: u64 = 1;
    pub const EXTENT_TREE: u64 = 2;
    pub const CHUNK_TREE: u64 = 3;
    pub const DEV_TREE: u64 = 4;
    pub const FS_TREE: u64 = 5;
    pub const ROOT_TREE_DIR: u64 = 6;
    pub const CSUM_TREE: u64 = 7;
    /// First objectid available to files, directories, and subvolumes.
    pub const FIRST_FREE: u64 = 256;
}

/// Item types (`key.type` values) consumed by this parser.
pub mod item_type {
    pub const INODE_ITEM: u8 = 1;
    pub const INODE_REF: u8 = 12;
    pub const INODE_EXTREF: u8 = 13;
    pub const XATTR_ITEM: u8 = 24;
    pub const DIR_ITEM: u8 = 84;
    pub const DIR_INDEX: u8 = 96;
    pub const EXTENT_DATA: u8 = 108;
    pub const EXTENT_CSUM: u8 = 128;
    pub const ROOT_ITEM: u8 = 132;
    pub const ROOT_REF: u8 = 156;
    pub const CHUNK_ITEM: u8 = 228;
}

/// File extent types (`BtrfsFileExtentItem.extent_type`).
pub mod extent_type {
    pub const INLINE: u8 = 0;
    pub const REGULAR: u8 = 1;
    pub const PREALLOC: u8 = 2;
}

/// Compression codes stored in extent items.
pub mod compression {
    pub const NONE: u8 = 0;
    pub const ZLIB: u8 = 1;
    pub const LZO: u8 = 2;
    pub const ZSTD: u8 = 3;
}

/// Inode flag bits and their display names, in bit order.
pub const INODE_FLAG_NAMES: [&str; 12] = [
    "NODATASUM",
    "NODATACOW",
    "READONLY",
    "NOCOMPRESS",
    "PREALLOC",
    "SYNC",
    "IMMUTABLE",
    "APPEND",
    "NODUMP",
    "NOATIME",
    "DIRSYNC",
    "COMPRESS",
];

/// Render the inode `flags` field as a comma-joined name list.
pub fn inode_flags_string(flags: u64) -> String {
    let mut names = Vec::new();
    for (bit, name) in INODE_FLAG_NAMES.iter().enumerate() {
        if flags & (1 << bit) != 0 {
            names.push(*name);
        }
    }
    names.join(",")
}
