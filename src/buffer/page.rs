use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Page manages a single buffer frame: the in-memory image of one on-disk
/// page plus its bookkeeping metadata.
///
/// The data rwlock doubles as the per-page latch. The buffer pool takes it
/// only while re-identifying a frame during eviction; every other
/// acquisition comes from the B+tree through the page guards in this
/// module's sibling. A page is eligible for eviction iff its pin count is
/// zero.
pub struct Page {
    /// The frame ID (index in the buffer pool)
    frame_id: FrameId,
    /// The page ID stored in this frame (INVALID_PAGE_ID if empty)
    page_id: RwLock<PageId>,
    /// Pin count - number of callers currently holding this frame
    pin_count: AtomicU32,
    /// Whether the page has been modified since being read from disk
    is_dirty: AtomicBool,
    /// The actual page data (pub(crate) for page guard access)
    pub(crate) data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl Page {
    /// Creates an empty frame for the given frame ID.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: RwLock::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    /// Returns the frame ID.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID stored in this frame.
    pub fn page_id(&self) -> PageId {
        *self.page_id.read()
    }

    /// Sets the page ID stored in this frame.
    pub(crate) fn set_page_id(&self, page_id: PageId) {
        *self.page_id.write() = page_id;
    }

    /// Returns the current pin count.
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the new value.
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new value.
    /// Returns None if the pin count was already 0.
    pub(crate) fn unpin(&self) -> Option<u32> {
        loop {
            let current = self.pin_count.load(Ordering::Acquire);
            if current == 0 {
                return None;
            }
            if self
                .pin_count
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current - 1);
            }
        }
    }

    /// Returns whether the page is dirty.
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Sets the dirty flag.
    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Copies data from the frame into the given slice.
    pub fn copy_to(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        let guard = self.data.read();
        data.copy_from_slice(&**guard);
    }

    /// Resets the frame to its initial state.
    pub(crate) fn reset(&self) {
        *self.page_id.write() = INVALID_PAGE_ID;
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_new() {
        let page = Page::new(FrameId::new(0));
        assert_eq!(page.frame_id(), FrameId::new(0));
        assert_eq!(page.page_id(), INVALID_PAGE_ID);
        assert_eq!(page.pin_count(), 0);
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_page_pin_unpin() {
        let page = Page::new(FrameId::new(0));

        assert_eq!(page.pin(), 1);
        assert_eq!(page.pin(), 2);
        assert_eq!(page.pin_count(), 2);

        assert_eq!(page.unpin(), Some(1));
        assert_eq!(page.unpin(), Some(0));
        assert_eq!(page.unpin(), None);
    }

    #[test]
    fn test_page_dirty() {
        let page = Page::new(FrameId::new(0));

        assert!(!page.is_dirty());
        page.set_dirty(true);
        assert!(page.is_dirty());
        page.set_dirty(false);
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_page_reset() {
        let page = Page::new(FrameId::new(0));

        page.set_page_id(PageId::new(5));
        page.pin();
        page.set_dirty(true);
        page.data.write()[0] = 1;

        page.reset();

        assert_eq!(page.page_id(), INVALID_PAGE_ID);
        assert_eq!(page.pin_count(), 0);
        assert!(!page.is_dirty());

        let mut data = [1u8; PAGE_SIZE];
        page.copy_to(&mut data);
        assert_eq!(data[0], 0);
    }
}
