use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::common::{HiveError, PageId, Result, DISK_SCHEDULER_QUEUE_DEPTH, PAGE_SIZE};

use super::{DiskManager, DiskStats};

/// An owned page-sized buffer that travels with a disk request.
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

/// Allocates a zeroed page buffer.
pub fn new_page_buf() -> PageBuf {
    Box::new([0u8; PAGE_SIZE])
}

/// Outcome of a disk request. The request's buffer is handed back so the
/// caller regains ownership of it (and, for reads, of the bytes read).
pub struct DiskCompletion {
    pub success: bool,
    pub data: PageBuf,
}

/// Sending half of a one-shot completion signal, carried by a request.
pub struct DiskPromise(Sender<DiskCompletion>);

impl DiskPromise {
    fn resolve(self, completion: DiskCompletion) {
        // The waiter may have given up; nothing to do then
        let _ = self.0.send(completion);
    }
}

/// Receiving half of a one-shot completion signal.
pub struct DiskFuture(Receiver<DiskCompletion>);

impl DiskFuture {
    /// Blocks until the worker has executed the request.
    pub fn wait(self) -> Result<DiskCompletion> {
        self.0.recv().map_err(|e| {
            HiveError::DiskScheduler(format!("Failed to receive completion: {}", e))
        })
    }
}

/// Represents a disk I/O request
pub enum DiskRequest {
    /// Read `page_id` into `data`
    Read {
        page_id: PageId,
        data: PageBuf,
        callback: DiskPromise,
    },
    /// Write `data` to `page_id`
    Write {
        page_id: PageId,
        data: PageBuf,
        callback: DiskPromise,
    },
    /// Stop the worker once every earlier request has been served
    Shutdown,
}

impl DiskRequest {
    pub fn read(page_id: PageId, data: PageBuf, callback: DiskPromise) -> Self {
        Self::Read {
            page_id,
            data,
            callback,
        }
    }

    pub fn write(page_id: PageId, data: PageBuf, callback: DiskPromise) -> Self {
        Self::Write {
            page_id,
            data,
            callback,
        }
    }
}

/// DiskScheduler serializes all physical I/O onto one background worker
/// thread. Requests are served strictly in submission order.
pub struct DiskScheduler {
    /// Channel sender for queuing requests
    request_sender: Sender<DiskRequest>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
    /// Counters of the manager owned by the worker
    stats: Arc<DiskStats>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler that takes ownership of the disk manager
    /// and spawns the worker thread that will drive it.
    pub fn new<D: DiskManager>(disk_manager: D) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(DISK_SCHEDULER_QUEUE_DEPTH);
        let stats = disk_manager.stats();

        let worker_handle = thread::spawn(move || {
            Self::start_worker_thread(disk_manager, receiver);
        });

        Self {
            request_sender: sender,
            worker_handle: Some(worker_handle),
            stats,
        }
    }

    /// I/O counters of the disk manager behind this scheduler.
    pub fn stats(&self) -> &DiskStats {
        &self.stats
    }

    /// Creates a one-shot completion pair for a request.
    pub fn create_promise() -> (DiskPromise, DiskFuture) {
        let (tx, rx) = bounded(1);
        (DiskPromise(tx), DiskFuture(rx))
    }

    /// Schedules a disk request for processing by the background worker.
    /// Returns as soon as the request is queued.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| HiveError::DiskScheduler(format!("Failed to schedule request: {}", e)))
    }

    /// Schedules a read request and waits for completion.
    pub fn schedule_read_sync(&self, page_id: PageId) -> Result<PageBuf> {
        let (promise, future) = Self::create_promise();
        self.schedule(DiskRequest::read(page_id, new_page_buf(), promise))?;

        let completion = future.wait()?;
        if !completion.success {
            return Err(HiveError::DiskIo {
                op: "read",
                page_id,
            });
        }
        Ok(completion.data)
    }

    /// Schedules a write request and waits for completion.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            return Err(HiveError::InvalidArgument(format!(
                "page buffer must be {} bytes, got {}",
                PAGE_SIZE,
                data.len()
            )));
        }

        let mut buf = new_page_buf();
        buf.copy_from_slice(data);

        let (promise, future) = Self::create_promise();
        self.schedule(DiskRequest::write(page_id, buf, promise))?;

        if !future.wait()?.success {
            return Err(HiveError::DiskIo {
                op: "write",
                page_id,
            });
        }
        Ok(())
    }

    /// The background worker thread function.
    /// Processes requests until a shutdown request arrives or every sender
    /// is gone.
    fn start_worker_thread<D: DiskManager>(mut disk_manager: D, receiver: Receiver<DiskRequest>) {
        while let Ok(request) = receiver.recv() {
            match request {
                DiskRequest::Shutdown => break,
                DiskRequest::Read {
                    page_id,
                    mut data,
                    callback,
                } => {
                    let success = match disk_manager.read_page(page_id, &mut data[..]) {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::error!(page_id = page_id.as_i64(), error = %e, "disk read failed");
                            false
                        }
                    };
                    callback.resolve(DiskCompletion { success, data });
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    callback,
                } => {
                    let success = match disk_manager.write_page(page_id, &data[..]) {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::error!(page_id = page_id.as_i64(), error = %e, "disk write failed");
                            false
                        }
                    };
                    callback.resolve(DiskCompletion { success, data });
                }
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Queued behind every pending request, so all of them resolve first
        let _ = self.request_sender.send(DiskRequest::Shutdown);

        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
