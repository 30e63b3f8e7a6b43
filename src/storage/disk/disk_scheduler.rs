use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::common::{LoamError, PageId, Result, PAGE_SIZE};

use super::DiskManager;

/// A disk I/O request processed by the scheduler's worker thread.
enum DiskRequest {
    Read {
        page_id: PageId,
        done: mpsc::Sender<Result<Box<[u8; PAGE_SIZE]>>>,
    },
    Write {
        page_id: PageId,
        data: Box<[u8; PAGE_SIZE]>,
        done: mpsc::Sender<Result<()>>,
    },
}

/// DiskScheduler funnels all page I/O through a background worker thread fed
/// over a bounded channel. Callers that need the result synchronously block
/// on a completion channel.
pub struct DiskScheduler {
    /// The disk manager for actual I/O operations
    disk_manager: Arc<DiskManager>,
    /// Channel sender for queuing requests
    request_sender: Sender<DiskRequest>,
    /// Flag to signal shutdown
    shutdown: Arc<AtomicBool>,
    /// Handle to the background worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Creates a new DiskScheduler and spawns its worker thread.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(64);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm = Arc::clone(&disk_manager);
        let stop = Arc::clone(&shutdown);
        let worker_handle = thread::spawn(move || Self::run_worker(dm, receiver, stop));

        Self {
            disk_manager,
            request_sender: sender,
            shutdown,
            worker_handle: Some(worker_handle),
        }
    }

    /// Reads a page through the worker thread and waits for the result.
    pub fn schedule_read_sync(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>> {
        let (done, result) = mpsc::channel();
        self.submit(DiskRequest::Read { page_id, done })?;
        result
            .recv()
            .map_err(|e| LoamError::DiskScheduler(format!("read completion lost: {e}")))?
    }

    /// Writes a page through the worker thread and waits for completion.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let mut buf = Box::new([0u8; PAGE_SIZE]);
        buf.copy_from_slice(data);

        let (done, result) = mpsc::channel();
        self.submit(DiskRequest::Write {
            page_id,
            data: buf,
            done,
        })?;
        result
            .recv()
            .map_err(|e| LoamError::DiskScheduler(format!("write completion lost: {e}")))?
    }

    /// Returns a reference to the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    fn submit(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .send(request)
            .map_err(|e| LoamError::DiskScheduler(format!("failed to queue request: {e}")))
    }

    /// Worker loop: process requests until shutdown, then drain the queue.
    fn run_worker(
        disk_manager: Arc<DiskManager>,
        receiver: Receiver<DiskRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                while let Ok(request) = receiver.try_recv() {
                    Self::process_request(&disk_manager, request);
                }
                break;
            }

            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::process_request(&disk_manager, request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        match request {
            DiskRequest::Read { page_id, done } => {
                let mut buf = Box::new([0u8; PAGE_SIZE]);
                let result = disk_manager.read_page(page_id, &mut buf[..]).map(|_| buf);
                let _ = done.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                done,
            } => {
                let _ = done.send(disk_manager.write_page(page_id, &data[..]));
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
