use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{FrameId, LoamError, PageId, Result};
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{LruReplacer, Page};

/// Write-ahead log hook. The pool reports a page id just before its dirty
/// image is written through to disk. The engine itself ships no log manager;
/// this is the seam one plugs into.
pub trait LogManager: Send + Sync {
    fn on_dirty_write(&self, page_id: PageId);
}

/// Bookkeeping protected by the pool latch. Every frame is either on the
/// free list, mapped in the page table, or pinned out to a caller - never
/// more than one of the three.
struct PoolState {
    /// Page table: maps page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames that are not currently in use
    free_list: VecDeque<FrameId>,
}

/// BufferPoolManager is responsible for fetching database pages from disk
/// and caching them in a fixed array of frames, evicting with an LRU policy
/// when the pool fills up.
///
/// Callers pin pages through `fetch_page`/`new_page` and must balance every
/// pin with exactly one `unpin_page`. A frame being re-identified is locked
/// by its own write latch inside the pool critical section and the read from
/// disk runs after the pool latch drops; only the dirty victim's write-back
/// stays inside, since the evicted page becomes re-fetchable the moment its
/// mapping disappears.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// The buffer pool frames
    pages: Vec<Arc<Page>>,
    /// Page table and free list
    latch: Mutex<PoolState>,
    /// LRU replacer for eviction decisions
    replacer: LruReplacer,
    /// Disk scheduler for async I/O
    disk_scheduler: DiskScheduler,
    /// Optional WAL hook
    log_manager: Option<Arc<dyn LogManager>>,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with the given pool size and disk
    /// manager.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut pages = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::new();

        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            pages.push(Arc::new(Page::new(frame_id)));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            pages,
            latch: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_scheduler: DiskScheduler::new(disk_manager),
            log_manager: None,
        }
    }

    /// Same as [`BufferPoolManager::new`] with a WAL hook attached.
    pub fn with_log_manager(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Arc<dyn LogManager>,
    ) -> Self {
        let mut bpm = Self::new(pool_size, disk_manager);
        bpm.log_manager = Some(log_manager);
        bpm
    }

    /// Fetches a page into the buffer pool, pinning it.
    ///
    /// If the page is resident its pin count is incremented; otherwise a
    /// frame is taken from the free list or evicted, the old image is
    /// written back if dirty, and the page is read from disk. Fails with
    /// `BufferPoolFull` when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        if page_id.is_invalid() {
            return Err(LoamError::InvalidPageId(page_id));
        }

        let mut state = self.latch.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let page = &self.pages[frame_id.as_usize()];
            page.pin();
            self.replacer.pin(frame_id);
            return Ok(Arc::clone(page));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let page = &self.pages[frame_id.as_usize()];

        // The dirty victim must reach disk before its mapping disappears: a
        // concurrent re-fetch of that page reads from disk the moment the
        // pool latch drops.
        self.write_back_victim(page)?;

        state.page_table.remove(&page.page_id());
        state.page_table.insert(page_id, frame_id);

        // Re-identify the frame under its own latch; anyone who finds the
        // new mapping blocks here until the read below completes.
        let mut data = page.data.write();
        page.set_page_id(page_id);
        page.set_dirty(false);
        page.pin();
        drop(state);

        let buf = self.disk_scheduler.schedule_read_sync(page_id)?;
        data.copy_from_slice(&buf[..]);
        drop(data);

        Ok(Arc::clone(page))
    }

    /// Allocates a fresh page on disk and pins it into a frame.
    ///
    /// The new page starts zeroed and dirty (its content has never been
    /// flushed). Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<Arc<Page>> {
        let mut state = self.latch.lock();

        let frame_id = self.acquire_frame(&mut state)?;
        let page = &self.pages[frame_id.as_usize()];

        self.write_back_victim(page)?;
        state.page_table.remove(&page.page_id());

        let page_id = self.disk_scheduler.disk_manager().allocate_page();
        state.page_table.insert(page_id, frame_id);

        let mut data = page.data.write();
        page.set_page_id(page_id);
        page.set_dirty(true);
        page.pin();
        drop(state);

        data.fill(0);
        drop(data);

        Ok(Arc::clone(page))
    }

    /// Drops one pin on the page, ORing `is_dirty` into its dirty flag.
    ///
    /// Returns false if the page is not resident or was not pinned (the
    /// latter is a caller bug). When the pin count reaches zero the frame
    /// becomes an eviction candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.latch.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let page = &self.pages[frame_id.as_usize()];
        if page.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            page.set_dirty(true);
        }
        if let Some(0) = page.unpin() {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes the page through to disk and clears its dirty flag.
    /// Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if page_id.is_invalid() {
            return Err(LoamError::InvalidPageId(page_id));
        }

        let page = {
            let state = self.latch.lock();
            match state.page_table.get(&page_id) {
                Some(&frame_id) => Arc::clone(&self.pages[frame_id.as_usize()]),
                None => return Ok(false),
            }
        };

        let data = page.data.read();
        if page.page_id() != page_id {
            // remapped between the table lookup and the latch
            return Ok(false);
        }
        if page.is_dirty() {
            if let Some(lm) = &self.log_manager {
                lm.on_dirty_write(page_id);
            }
        }
        self.disk_scheduler.schedule_write_sync(page_id, &data[..])?;
        page.set_dirty(false);
        Ok(true)
    }

    /// Writes every resident dirty page through to disk. Frames holding no
    /// page are skipped.
    pub fn flush_all_pages(&self) -> Result<()> {
        for page in &self.pages {
            let data = page.data.read();
            let page_id = page.page_id();
            if page_id.is_invalid() || !page.is_dirty() {
                continue;
            }
            if let Some(lm) = &self.log_manager {
                lm.on_dirty_write(page_id);
            }
            self.disk_scheduler.schedule_write_sync(page_id, &data[..])?;
            page.set_dirty(false);
        }
        Ok(())
    }

    /// Removes the page from the pool and deallocates it on disk.
    ///
    /// Idempotent: deleting a non-resident page returns true. Returns false
    /// while the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.latch.lock();

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(true);
        };
        let page = &self.pages[frame_id.as_usize()];
        if page.pin_count() > 0 {
            return Ok(false);
        }

        self.write_back_victim(page)?;

        state.page_table.remove(&page_id);
        // The frame moves to the free list; it must leave eviction candidacy
        self.replacer.pin(frame_id);
        page.reset();
        state.free_list.push_front(frame_id);
        drop(state);

        self.disk_scheduler.disk_manager().deallocate_page(page_id);
        Ok(true)
    }

    /// Returns the pin count for a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.latch.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.pages[frame_id.as_usize()].pin_count())
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.latch.lock().free_list.len()
    }

    /// Returns the underlying disk manager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.disk_scheduler.disk_manager()
    }

    /// Picks a frame from the free list, or evicts the LRU victim.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }
        self.replacer.victim().ok_or(LoamError::BufferPoolFull)
    }

    /// Flushes an eviction victim's old image if it is dirty. Runs under the
    /// pool latch; the frame has pin count zero, so nothing contends on it.
    fn write_back_victim(&self, page: &Page) -> Result<()> {
        let old_page_id = page.page_id();
        if old_page_id.is_invalid() || !page.is_dirty() {
            return Ok(());
        }
        log::debug!("evicting dirty page {old_page_id} from {}", page.frame_id());
        if let Some(lm) = &self.log_manager {
            lm.on_dirty_write(old_page_id);
        }
        let data = page.data.read();
        self.disk_scheduler.schedule_write_sync(old_page_id, &data[..])?;
        page.set_dirty(false);
        Ok(())
    }
}
