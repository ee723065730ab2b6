use thiserror::Error;

#[derive(Error, Debug)]
pub enum BtrfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a BTRFS filesystem: {0}")]
    NotBtrfs(String),

    #[error("Truncated {what}: need {need} bytes, have {have}")]
    TruncatedRecord {
        what: &'static str,
        need: usize,
        have: usize,
    },

    #[error("Logical address {0:#x} not mapped by any chunk")]
    UnmappedLogicalAddress(u64),

    #[error("Short read at offset {offset:#x}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        offset: u64,
        wanted: usize,
        got: usize,
    },

    #[error("Unsupported compression codec: {0}")]
    UnsupportedCompression(u8),

    #[error("Tree block {0:#x} revisited during traversal")]
    Cycle(u64),

    #[error("Parent chain for inode {0} exceeds depth limit")]
    PathDepthExceeded(u64),

    #[error("Parse error: {0}")]
    Parse(String),
}
