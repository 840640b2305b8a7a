use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock};

use crate::common::PageId;

use super::{FrameHeader, PageData};

/// Callback type for releasing a page guard
pub(crate) type ReleaseCallback = Box<dyn FnOnce(PageId, bool) + Send + Sync>;

/// Pin bookkeeping shared by both guard kinds. Dropping it runs the release
/// callback exactly once.
struct PageGuardBase {
    /// The page ID being guarded
    page_id: PageId,
    /// Keeps the frame alive for the guard's lifetime
    _frame: Arc<FrameHeader>,
    release_callback: Option<ReleaseCallback>,
    /// Whether the page was mutably accessed
    is_dirty: bool,
}

impl PageGuardBase {
    fn new(page_id: PageId, frame: Arc<FrameHeader>, release_callback: ReleaseCallback) -> Self {
        Self {
            page_id,
            _frame: frame,
            release_callback: Some(release_callback),
            is_dirty: false,
        }
    }
}

impl Drop for PageGuardBase {
    fn drop(&mut self) {
        if let Some(callback) = self.release_callback.take() {
            callback(self.page_id, self.is_dirty);
        }
    }
}

/// RAII guard for read-only access to a page.
/// Automatically unpins the page when dropped.
pub struct ReadPageGuard {
    // Declared before `base`: the data lock is released before the unpin runs
    data_guard: ArcRwLockReadGuard<RawRwLock, PageData>,
    base: PageGuardBase,
}

impl ReadPageGuard {
    pub(crate) fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.read_arc();

        Self {
            data_guard,
            base: PageGuardBase::new(page_id, frame, release_callback),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.data_guard[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

/// RAII guard for read-write access to a page.
/// Marks the page dirty if it was mutably accessed, and unpins it when dropped.
pub struct WritePageGuard {
    data_guard: ArcRwLockWriteGuard<RawRwLock, PageData>,
    base: PageGuardBase,
}

impl WritePageGuard {
    pub(crate) fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        release_callback: ReleaseCallback,
    ) -> Self {
        let data_guard = frame.data.write_arc();

        Self {
            data_guard,
            base: PageGuardBase::new(page_id, frame, release_callback),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.data_guard[..]
    }

    /// Returns a mutable reference to the page data.
    /// Automatically marks the page as dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        &mut self.data_guard[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl AsRef<[u8]> for ReadPageGuard {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl AsRef<[u8]> for WritePageGuard {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl AsMut<[u8]> for WritePageGuard {
    fn as_mut(&mut self) -> &mut [u8] {
        self.data_mut()
    }
}
