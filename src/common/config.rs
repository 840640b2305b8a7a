use super::types::PageId;

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(-1);

/// Number of data pages a fresh database file is sized for.
/// The file always carries one extra reserved page in front of the data pages.
pub const DEFAULT_NUMBER_OF_PAGES: usize = 16;

/// Default K value for the LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 10;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 16;

/// Capacity of the disk scheduler's request queue
pub const DISK_SCHEDULER_QUEUE_DEPTH: usize = 128;

/// Size of the common B+Tree node header: kind, current size, max size and
/// the sibling link, 8 bytes each.
pub const NODE_HEADER_SIZE: usize = 32;
