use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::common::{HiveError, PageId, Result, DEFAULT_NUMBER_OF_PAGES, PAGE_SIZE};

/// Block storage for fixed-size pages.
///
/// The disk scheduler's worker thread owns its manager exclusively, so every
/// operation takes `&mut self` and no internal locking is needed.
pub trait DiskManager: Send + 'static {
    /// Reads a page into `data`, which must be exactly `PAGE_SIZE` bytes.
    /// Reading a page that was never written yields zeros.
    fn read_page(&mut self, page_id: PageId, data: &mut [u8]) -> Result<()>;

    /// Writes `data`, which must be exactly `PAGE_SIZE` bytes, to a page.
    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Releases a page so its storage can be reused.
    fn delete_page(&mut self, page_id: PageId) -> Result<()>;

    /// Handle on the I/O counters. It stays readable after the manager has
    /// been moved into the scheduler's worker.
    fn stats(&self) -> Arc<DiskStats>;
}

/// I/O counters shared between a disk manager and its observers.
#[derive(Debug, Default)]
pub struct DiskStats {
    num_reads: AtomicU64,
    num_writes: AtomicU64,
}

impl DiskStats {
    pub(crate) fn record_read(&self) {
        self.num_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.num_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of page reads served.
    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Number of page writes served.
    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }
}

/// Validates the arguments every disk manager operation shares.
pub(crate) fn check_page_args(page_id: PageId, len: usize) -> Result<()> {
    if !page_id.is_valid() {
        return Err(HiveError::InvalidPageId(page_id));
    }
    if len != PAGE_SIZE {
        return Err(HiveError::InvalidArgument(format!(
            "page buffer must be {} bytes, got {}",
            PAGE_SIZE, len
        )));
    }
    Ok(())
}

/// FileDiskManager stores pages inside a single database file.
///
/// Logical page ids are mapped to byte offsets through an in-memory table, so
/// the position of a page is not derivable from its id once pages are
/// deleted and their slots recycled. Slot 0 of the file is reserved for a
/// system/root page; data slots start right after it.
pub struct FileDiskManager {
    /// The database file
    db_file: File,
    /// Path to the database file
    db_path: PathBuf,
    /// Number of data pages the file is currently sized for
    capacity: usize,
    /// Number of data slots handed out so far (recycled slots excluded)
    next_slot: usize,
    /// Page id -> byte offset of its slot
    pages: HashMap<PageId, u64>,
    /// Offsets of deleted pages, reused before the file grows
    free_offsets: Vec<u64>,
    /// Read and write counters
    stats: Arc<DiskStats>,
}

impl FileDiskManager {
    /// Creates a new FileDiskManager for the given database file path.
    /// Creates the file if it doesn't exist and sizes it for
    /// `DEFAULT_NUMBER_OF_PAGES` data pages plus the reserved page.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(db_path.as_ref())?;

        let capacity = DEFAULT_NUMBER_OF_PAGES;
        let reserved_len = Self::file_len_for(capacity);
        if file.metadata()?.len() < reserved_len {
            file.set_len(reserved_len)?;
        }

        Ok(Self {
            db_file: file,
            db_path: db_path.as_ref().to_path_buf(),
            capacity,
            next_slot: 0,
            pages: HashMap::new(),
            free_offsets: Vec::new(),
            stats: Arc::default(),
        })
    }

    fn file_len_for(capacity: usize) -> u64 {
        ((capacity + 1) * PAGE_SIZE) as u64
    }

    /// Hands out a byte offset for a page that has none yet.
    /// Recycled offsets are used first; otherwise the next slot is taken,
    /// doubling the file's capacity when it is exhausted.
    fn allocate_offset(&mut self) -> Result<u64> {
        if let Some(offset) = self.free_offsets.pop() {
            return Ok(offset);
        }

        if self.next_slot >= self.capacity {
            self.capacity *= 2;
            self.db_file.set_len(Self::file_len_for(self.capacity))?;
            tracing::debug!(capacity = self.capacity, "grew database file");
        }

        // +1 skips the reserved page at the front of the file
        let offset = ((self.next_slot + 1) * PAGE_SIZE) as u64;
        self.next_slot += 1;
        Ok(offset)
    }

    fn offset_of(&mut self, page_id: PageId) -> Result<u64> {
        if let Some(&offset) = self.pages.get(&page_id) {
            return Ok(offset);
        }
        let offset = self.allocate_offset()?;
        self.pages.insert(page_id, offset);
        Ok(offset)
    }

    /// Returns the number of pages that currently own a slot.
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// Returns the number of data pages the file is sized for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of disk reads performed.
    pub fn num_reads(&self) -> u64 {
        self.stats.num_reads()
    }

    /// Returns the number of disk writes performed.
    pub fn num_writes(&self) -> u64 {
        self.stats.num_writes()
    }

    /// Returns the path to the database file.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Flushes any buffered writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.db_file.sync_all()?;
        Ok(())
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&mut self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        check_page_args(page_id, data.len())?;

        let offset = self.offset_of(page_id)?;
        self.db_file.seek(SeekFrom::Start(offset))?;

        let mut bytes_read = 0;
        while bytes_read < PAGE_SIZE {
            match self.db_file.read(&mut data[bytes_read..]) {
                Ok(0) => break,
                Ok(n) => bytes_read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        // If we're reading beyond the file, fill with zeros
        if bytes_read < PAGE_SIZE {
            tracing::warn!(
                page_id = page_id.as_i64(),
                bytes_read,
                "short page read, padding with zeros"
            );
            data[bytes_read..].fill(0);
        }

        self.stats.record_read();
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        check_page_args(page_id, data.len())?;

        let offset = self.offset_of(page_id)?;
        self.db_file.seek(SeekFrom::Start(offset))?;
        self.db_file.write_all(data)?;
        self.db_file.flush()?;

        self.stats.record_write();
        Ok(())
    }

    fn delete_page(&mut self, page_id: PageId) -> Result<()> {
        if !page_id.is_valid() {
            return Err(HiveError::InvalidPageId(page_id));
        }
        let offset = self
            .pages
            .remove(&page_id)
            .ok_or(HiveError::UnknownPageId(page_id))?;

        // Recycled slots must read back as zeros
        self.db_file.seek(SeekFrom::Start(offset))?;
        self.db_file.write_all(&[0u8; PAGE_SIZE])?;
        self.db_file.flush()?;

        self.free_offsets.push(offset);
        Ok(())
    }

    fn stats(&self) -> Arc<DiskStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for FileDiskManager {
    fn drop(&mut self) {
        // Ensure all data is flushed to disk
        let _ = self.db_file.sync_all();
    }
}
