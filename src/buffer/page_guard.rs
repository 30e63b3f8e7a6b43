use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::Page;

/// RAII guard for shared access to a page's bytes.
///
/// Holding the guard holds the page's latch; it does not hold a pin. The
/// B+tree pins through the buffer pool before latching and unpins after the
/// guard is dropped, so a latch can be stored in a transaction context and
/// released far from where it was acquired.
pub struct ReadPageGuard {
    /// Read lock on the page data. Taken out first in Drop so the latch is
    /// released before the frame reference.
    guard: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
    /// Reference to the frame (kept alive for the guard's lifetime)
    page: Arc<Page>,
}

impl ReadPageGuard {
    /// Acquires the page's latch in shared mode.
    pub fn latch(page: &Arc<Page>) -> Self {
        let page = Arc::clone(page);
        let guard = page.data.read();
        // The transmuted lifetime is sound because the frame is kept alive
        // via the Arc held in the same struct, and Drop releases the lock
        // before the Arc.
        let guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            unsafe { std::mem::transmute(guard) };

        Self {
            guard: Some(guard),
            page,
        }
    }

    /// Returns the ID of the latched page.
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.guard.as_ref().unwrap()[..]
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        self.guard.take();
    }
}

/// RAII guard for exclusive access to a page's bytes.
///
/// Same pin/latch split as [`ReadPageGuard`]; whether the page is dirty is
/// reported by the caller on unpin, not tracked here.
pub struct WritePageGuard {
    /// Write lock on the page data
    guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
    /// Reference to the frame (kept alive for the guard's lifetime)
    page: Arc<Page>,
}

impl WritePageGuard {
    /// Acquires the page's latch in exclusive mode.
    pub fn latch(page: &Arc<Page>) -> Self {
        let page = Arc::clone(page);
        let guard = page.data.write();
        // Same lifetime reasoning as [`ReadPageGuard::latch`]
        let guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            unsafe { std::mem::transmute(guard) };

        Self {
            guard: Some(guard),
            page,
        }
    }

    /// Returns the ID of the latched page.
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        &self.guard.as_ref().unwrap()[..]
    }

    /// Returns a mutable reference to the page data.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.guard.as_mut().unwrap()[..]
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.guard.take();
    }
}
