use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// The bytes of one resident page.
pub type PageData = Box<[u8; PAGE_SIZE]>;

/// One slot of the buffer pool.
///
/// The bookkeeping fields are atomics so the pool can inspect a frame without
/// touching its data lock. Mapping a frame to a page happens under the pool
/// mutex, so `page_id` never races with itself.
pub struct FrameHeader {
    frame_id: FrameId,
    /// Raw id of the resident page, `INVALID_PAGE_ID` while the frame is free
    page_id: AtomicI64,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    /// Shared with page guards, which hold owned lock guards on it
    pub(crate) data: Arc<RwLock<PageData>>,
}

impl FrameHeader {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicI64::new(INVALID_PAGE_ID.as_i64()),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Page currently held by the frame.
    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_i64(), Ordering::Release);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Adds a pin, returning the count after the increment.
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drops a pin, returning the count after the decrement. An unpinned
    /// frame stays at zero and yields `None`.
    pub(crate) fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pins| pins.checked_sub(1))
            .ok()
            .map(|before| before - 1)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Anyone writing through [`FrameHeader::write_data`] marks the frame
    /// dirty here; write guards do it on release.
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    pub fn read_data(&self) -> RwLockReadGuard<'_, PageData> {
        self.data.read()
    }

    pub fn write_data(&self) -> RwLockWriteGuard<'_, PageData> {
        self.data.write()
    }

    /// Overwrites the frame's bytes with a page fetched from disk.
    pub(crate) fn load(&self, page: &[u8; PAGE_SIZE]) {
        self.data.write().copy_from_slice(page);
    }

    /// Owned copy of the bytes, handed to the disk scheduler on write-back.
    pub(crate) fn snapshot(&self) -> PageData {
        Box::new(**self.data.read())
    }

    /// Returns the frame to the free state. Stale bytes stay until the next
    /// [`FrameHeader::load`].
    pub(crate) fn reset(&self) {
        self.set_page_id(INVALID_PAGE_ID);
        self.pin_count.store(0, Ordering::Release);
        self.set_dirty(false);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_fresh_frame_is_free() {
        let frame = FrameHeader::new(FrameId::new(3));
        assert_eq!(frame.frame_id(), FrameId::new(3));
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(frame.read_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unpin_stops_at_zero() {
        let frame = FrameHeader::new(FrameId::new(0));

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), Some(1));
        assert_eq!(frame.unpin(), Some(0));
        assert_eq!(frame.unpin(), None);
        assert_eq!(frame.unpin(), None);
        assert_eq!(frame.pin_count(), 0);

        assert_eq!(frame.pin(), 1);
    }

    #[test]
    fn test_concurrent_pins_balance_out() {
        let frame = Arc::new(FrameHeader::new(FrameId::new(0)));
        frame.pin();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let frame = Arc::clone(&frame);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        frame.pin();
                        assert!(frame.unpin().is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(frame.pin_count(), 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let frame = FrameHeader::new(FrameId::new(0));

        let mut page = [0u8; PAGE_SIZE];
        page[0] = 42;
        page[PAGE_SIZE - 1] = 255;
        frame.load(&page);

        let copy = frame.snapshot();
        frame.write_data()[0] = 7;

        assert_eq!(frame.read_data()[0], 7);
        assert_eq!(copy[0], 42);
        assert_eq!(copy[PAGE_SIZE - 1], 255);
    }

    #[test]
    fn test_reset_clears_mapping() {
        let frame = FrameHeader::new(FrameId::new(0));
        frame.set_page_id(PageId::new(5));
        frame.pin();
        frame.set_dirty(true);
        frame.write_data()[0] = 1;

        frame.reset();

        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert_eq!(frame.read_data()[0], 1);
    }
}
