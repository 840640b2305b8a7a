//! HiveDB - an embedded, page-based storage engine
//!
//! This crate provides a disk-backed B+Tree index on top of a fixed-size
//! buffer pool. Every page lives in a single flat file and all physical I/O
//! goes through one background worker thread.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): Handles disk I/O
//!   - `DiskManager`: Maps page IDs to offsets and reads/writes whole pages
//!     (`FileDiskManager` on a file, `MemoryDiskManager` in memory)
//!   - `DiskScheduler`: Serializes requests onto a single I/O worker
//!
//! - **Buffer Pool** (`buffer`): Memory management for pages
//!   - `BufferPoolManager`: Caches pages in a fixed number of frames
//!   - `LruKReplacer`: LRU-K page replacement policy
//!   - `FrameHeader`: Per-frame metadata and data storage
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards that release their pin on drop
//!
//! - **Index** (`index`): B+Tree over buffer pool pages
//!   - `BPlusTree`: Point lookups, inserts with node splitting, ordered scans
//!   - `LeafPage`/`InnerPage`: Typed views over node bytes
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hivedb::buffer::BufferPoolManager;
//! use hivedb::index::BPlusTree;
//! use hivedb::storage::disk::FileDiskManager;
//!
//! // Create a disk manager for a database file
//! let disk_manager = FileDiskManager::new("test.db").unwrap();
//!
//! // Create a buffer pool with 16 frames and LRU-2 replacement
//! let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
//!
//! // Build an index mapping i64 keys to i64 values
//! let mut tree = BPlusTree::<i64, i64>::new(bpm);
//! tree.insert(42, 4200).unwrap();
//!
//! assert_eq!(tree.find(&42).unwrap(), Some(4200));
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{FrameId, HiveError, PageId, Result};
