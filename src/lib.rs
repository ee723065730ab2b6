//! Read-only BTRFS disk image cataloger.
//!
//! Given a raw image (optionally carrying an MBR or GPT partition table),
//! this crate locates a BTRFS volume, rebuilds its logical-to-physical
//! chunk map, walks the root tree into every subvolume tree, and emits one
//! record per inode: full path, metadata, extent layout, and content hashes
//! for regular files. Inline, sparse, and zlib/LZO/zstd-compressed extents
//! are all reassembled.
//!
//! The parser never writes, never validates checksums (it only counts
//! them), and assumes single-device chunk profiles (stripe 0).

pub mod btrfs;
pub mod catalog;
pub mod entry;
pub mod error;
pub mod output;
pub mod partition;
pub mod stats;

pub use btrfs::superblock::Superblock;
pub use catalog::{parse, scan_image, ParseOptions};
pub use entry::FileEntry;
pub use error::BtrfsError;
