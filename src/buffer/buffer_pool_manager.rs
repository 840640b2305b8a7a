use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{FrameId, HiveError, PageId, Result};
use crate::storage::disk::{DiskManager, DiskScheduler, DiskStats};

use super::page_guard::ReleaseCallback;
use super::{FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Bookkeeping guarded by the pool mutex
struct PoolInner {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Free list: frames that hold no page
    free_list: VecDeque<FrameId>,
    /// Next id handed out by `allocate_page`
    next_page_id: i64,
}

/// State shared between the pool and the guards it hands out
struct BufferPoolState {
    /// The buffer pool frames
    frames: Vec<Arc<FrameHeader>>,
    inner: Mutex<PoolInner>,
    /// LRU-K replacer for eviction decisions
    replacer: LruKReplacer,
}

impl BufferPoolState {
    fn frame(&self, frame_id: FrameId) -> &Arc<FrameHeader> {
        &self.frames[frame_id.as_usize()]
    }

    /// Drops one pin taken by a guard. Ignored if the frame has since been
    /// handed to another page.
    fn release(&self, page_id: PageId, frame_id: FrameId, is_dirty: bool) {
        let _inner = self.inner.lock();
        let frame = self.frame(frame_id);
        if frame.page_id() != page_id {
            return;
        }

        if is_dirty {
            frame.set_dirty(true);
        }
        if let Some(0) = frame.unpin() {
            self.replacer.set_evictable(frame_id, true);
        }
    }
}

/// BufferPoolManager is responsible for fetching database pages from disk
/// and storing them in memory. It manages a fixed number of frames and uses
/// the LRU-K replacement policy to decide which pages to evict.
///
/// Every method takes `&self`; a single coarse mutex protects the page table
/// and free list. A thread must not flush or re-fetch a page it currently
/// holds a guard on.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// Shared state
    state: Arc<BufferPoolState>,
    /// Disk scheduler, the only path to the disk manager
    disk_scheduler: DiskScheduler,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size, k value for
    /// LRU-K, and disk manager.
    pub fn new<D: DiskManager>(pool_size: usize, k: usize, disk_manager: D) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        let state = Arc::new(BufferPoolState {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                next_page_id: 0,
            }),
            replacer: LruKReplacer::new(k, pool_size),
        });

        Self {
            pool_size,
            state,
            disk_scheduler: DiskScheduler::new(disk_manager),
        }
    }

    /// Hands out a fresh page id. Nothing is read or written until the page
    /// is requested.
    pub fn allocate_page(&self) -> PageId {
        let mut inner = self.state.inner.lock();
        let page_id = PageId::new(inner.next_page_id);
        inner.next_page_id += 1;
        page_id
    }

    /// Makes `page_id` resident and returns its frame, pinning it if `pin` is
    /// set. Pins taken here must be released with
    /// [`BufferPoolManager::decrease_pin_count`].
    pub fn request_page(&self, page_id: PageId, pin: bool) -> Result<Arc<FrameHeader>> {
        if !page_id.is_valid() {
            return Err(HiveError::InvalidPageId(page_id));
        }
        tracing::debug!(page_id = page_id.as_i64(), pin, "request page");

        let mut inner = self.state.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = self.state.frame(frame_id);
            self.state.replacer.record_access(frame_id)?;
            if pin {
                frame.pin();
            }
            self.state
                .replacer
                .set_evictable(frame_id, frame.pin_count() == 0);
            return Ok(Arc::clone(frame));
        }

        // Page fault: read first, then find a frame for it
        let page = self.disk_scheduler.schedule_read_sync(page_id)?;
        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = self.state.frame(frame_id);

        frame.load(&page);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        inner.page_table.insert(page_id, frame_id);

        self.state.replacer.record_access(frame_id)?;
        if pin {
            frame.pin();
        }
        self.state
            .replacer
            .set_evictable(frame_id, frame.pin_count() == 0);

        Ok(Arc::clone(frame))
    }

    /// Drops one pin on a resident page. Returns false if the page is not
    /// resident or was not pinned.
    pub fn decrease_pin_count(&self, page_id: PageId) -> bool {
        let inner = self.state.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };

        match self.state.frame(frame_id).unpin() {
            None => false,
            Some(0) => {
                self.state.replacer.set_evictable(frame_id, true);
                true
            }
            Some(_) => true,
        }
    }

    /// Fetches a page for read access.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.request_page(page_id, true)?;
        let release = self.release_callback(frame.frame_id());
        Ok(ReadPageGuard::new(page_id, frame, release))
    }

    /// Fetches a page for write access.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.request_page(page_id, true)?;
        let release = self.release_callback(frame.frame_id());
        Ok(WritePageGuard::new(page_id, frame, release))
    }

    /// Writes a dirty resident page back to disk, drops one pin and evicts
    /// the page once nothing pins it.
    ///
    /// Returns false without touching the disk if the page is not resident
    /// or is clean.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Err(HiveError::InvalidPageId(page_id));
        }

        let mut inner = self.state.inner.lock();
        self.flush_page_locked(&mut inner, page_id)
    }

    /// Flushes every dirty resident page. Returns true if any page was dirty.
    pub fn flush_pages(&self) -> Result<bool> {
        let mut inner = self.state.inner.lock();

        let dirty: Vec<PageId> = self
            .state
            .frames
            .iter()
            .filter(|frame| frame.is_dirty() && frame.page_id().is_valid())
            .map(|frame| frame.page_id())
            .collect();

        for &page_id in &dirty {
            self.flush_page_locked(&mut inner, page_id)?;
        }

        Ok(!dirty.is_empty())
    }

    /// Removes an unpinned page from the pool and returns the frame it
    /// occupied to the free list. A dirty page is written back first.
    pub fn evict_page(&self, page_id: PageId) -> Result<FrameId> {
        let mut inner = self.state.inner.lock();
        self.evict_page_locked(&mut inner, page_id)
    }

    /// Returns the pin count for a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.state.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frame(frame_id).pin_count())
    }

    /// Returns the dirty flag for a resident page.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let inner = self.state.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.state.frame(frame_id).is_dirty())
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.inner.lock().page_table.contains_key(&page_id)
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.state.inner.lock().free_list.len()
    }

    /// Read and write counters of the underlying disk manager.
    pub fn disk_stats(&self) -> &DiskStats {
        self.disk_scheduler.stats()
    }

    fn release_callback(&self, frame_id: FrameId) -> ReleaseCallback {
        let state = Arc::clone(&self.state);
        Box::new(move |page_id, is_dirty| state.release(page_id, frame_id, is_dirty))
    }

    fn flush_page_locked(&self, inner: &mut PoolInner, page_id: PageId) -> Result<bool> {
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = Arc::clone(self.state.frame(frame_id));
        if !frame.is_dirty() {
            return Ok(false);
        }

        tracing::debug!(page_id = page_id.as_i64(), frame_id = frame_id.as_u32(), "flush page");
        let data = frame.snapshot();
        self.disk_scheduler.schedule_write_sync(page_id, &data[..])?;
        frame.set_dirty(false);

        frame.unpin();
        if frame.pin_count() == 0 {
            self.evict_page_locked(inner, page_id)?;
        }
        Ok(true)
    }

    fn evict_page_locked(&self, inner: &mut PoolInner, page_id: PageId) -> Result<FrameId> {
        let &frame_id = inner
            .page_table
            .get(&page_id)
            .ok_or(HiveError::UnknownPageId(page_id))?;
        let frame = self.state.frame(frame_id);

        if frame.pin_count() > 0 {
            return Err(HiveError::InvariantViolation(format!(
                "cannot evict {} from {}: pinned {} time(s)",
                page_id,
                frame_id,
                frame.pin_count()
            )));
        }

        if frame.is_dirty() {
            let data = frame.snapshot();
            self.disk_scheduler.schedule_write_sync(page_id, &data[..])?;
        }

        inner.page_table.remove(&page_id);
        // Unpinned frames are evictable, so this forgets their history
        self.state.replacer.set_evictable(frame_id, true);
        self.state.replacer.remove(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);

        tracing::debug!(page_id = page_id.as_i64(), frame_id = frame_id.as_u32(), "evicted page");
        Ok(frame_id)
    }

    /// Finds a frame for an incoming page: a free frame, else the frame of a
    /// dirty unpinned page after flushing it, else the replacer's victim.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let dirty_unpinned = self
            .state
            .frames
            .iter()
            .find(|frame| {
                frame.is_dirty() && frame.pin_count() == 0 && frame.page_id().is_valid()
            })
            .map(|frame| frame.page_id());

        if let Some(page_id) = dirty_unpinned {
            self.flush_page_locked(inner, page_id)?;
            if let Some(frame_id) = inner.free_list.pop_front() {
                return Ok(frame_id);
            }
        }

        let Some(frame_id) = self.state.replacer.evict() else {
            tracing::warn!(pool_size = self.pool_size, "no evictable frame");
            return Err(HiveError::OutOfMemory);
        };

        let frame = self.state.frame(frame_id);
        if frame.pin_count() > 0 {
            tracing::error!(frame_id = frame_id.as_u32(), "replacer chose a pinned frame");
            return Err(HiveError::OutOfMemory);
        }

        self.evict_page_locked(inner, frame.page_id())?;
        inner.free_list.pop_front().ok_or_else(|| {
            HiveError::InvariantViolation(format!("{} missing from the free list", frame_id))
        })
    }
}
