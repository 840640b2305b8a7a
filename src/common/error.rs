use thiserror::Error;

use super::types::{FrameId, PageId};

/// Storage engine error types
#[derive(Error, Debug)]
pub enum HiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Disk {op} of page {page_id} failed")]
    DiskIo { op: &'static str, page_id: PageId },

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Unknown page ID: {0}")]
    UnknownPageId(PageId),

    #[error("Frame {0} is out of range")]
    OutOfRange(FrameId),

    #[error("Buffer pool is out of memory, no evictable frames available")]
    OutOfMemory,

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Slot {index} is out of bounds for a node of max size {max}")]
    SlotOutOfBounds { index: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, HiveError>;
