use std::collections::HashMap;
use std::sync::Arc;

use crate::common::{HiveError, PageId, Result, PAGE_SIZE};

use super::disk_manager::{check_page_args, DiskManager, DiskStats};

/// A volatile disk manager that keeps every page in memory.
///
/// Useful for tests and for trees that never need to outlive the process.
#[derive(Default)]
pub struct MemoryDiskManager {
    pages: HashMap<PageId, Box<[u8; PAGE_SIZE]>>,
    stats: Arc<DiskStats>,
}

impl MemoryDiskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pages that have been written.
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn num_reads(&self) -> u64 {
        self.stats.num_reads()
    }

    pub fn num_writes(&self) -> u64 {
        self.stats.num_writes()
    }
}

impl DiskManager for MemoryDiskManager {
    fn read_page(&mut self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        check_page_args(page_id, data.len())?;

        match self.pages.get(&page_id) {
            Some(page) => data.copy_from_slice(&page[..]),
            None => data.fill(0),
        }

        self.stats.record_read();
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        check_page_args(page_id, data.len())?;

        self.pages
            .entry(page_id)
            .or_insert_with(|| Box::new([0u8; PAGE_SIZE]))
            .copy_from_slice(data);

        self.stats.record_write();
        Ok(())
    }

    fn delete_page(&mut self, page_id: PageId) -> Result<()> {
        if !page_id.is_valid() {
            return Err(HiveError::InvalidPageId(page_id));
        }
        self.pages
            .remove(&page_id)
            .map(|_| ())
            .ok_or(HiveError::UnknownPageId(page_id))
    }

    fn stats(&self) -> Arc<DiskStats> {
        Arc::clone(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_disk_manager_read_write() {
        let mut dm = MemoryDiskManager::new();

        let mut data = [0u8; PAGE_SIZE];
        data[..8].copy_from_slice(b"ILOVEJOE");
        dm.write_page(PageId::new(0), &data).unwrap();

        let mut other = [0u8; PAGE_SIZE];
        other[..12].copy_from_slice(b"IDONTLOVEJOE");
        dm.write_page(PageId::new(1), &other).unwrap();

        let mut read = [0u8; PAGE_SIZE];
        dm.read_page(PageId::new(0), &mut read).unwrap();
        assert_eq!(&read[..8], b"ILOVEJOE");
        dm.read_page(PageId::new(1), &mut read).unwrap();
        assert_eq!(&read[..12], b"IDONTLOVEJOE");

        assert_eq!(dm.num_pages(), 2);
        assert_eq!(dm.num_writes(), 2);
        assert_eq!(dm.num_reads(), 2);
    }

    #[test]
    fn test_memory_disk_manager_unwritten_page_is_zeroed() {
        let mut dm = MemoryDiskManager::new();
        let mut read = [1u8; PAGE_SIZE];
        dm.read_page(PageId::new(100), &mut read).unwrap();
        assert!(read.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_memory_disk_manager_errors() {
        let mut dm = MemoryDiskManager::new();
        let mut data = [0u8; PAGE_SIZE];

        assert!(matches!(
            dm.read_page(PageId::new(-1), &mut data),
            Err(HiveError::InvalidPageId(_))
        ));
        assert!(matches!(
            dm.delete_page(PageId::new(3)),
            Err(HiveError::UnknownPageId(_))
        ));

        dm.write_page(PageId::new(3), &data).unwrap();
        dm.delete_page(PageId::new(3)).unwrap();
        assert_eq!(dm.num_pages(), 0);
    }
}
