use std::collections::HashSet;

use crate::buffer::{ReadPageGuard, WritePageGuard};
use crate::common::PageId;

/// A page latch held by an in-flight tree operation.
pub enum LatchedPage {
    Read(ReadPageGuard),
    Write(WritePageGuard),
}

impl LatchedPage {
    pub fn page_id(&self) -> PageId {
        match self {
            LatchedPage::Read(guard) => guard.page_id(),
            LatchedPage::Write(guard) => guard.page_id(),
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            LatchedPage::Read(guard) => guard.data(),
            LatchedPage::Write(guard) => guard.data(),
        }
    }
}

/// Per-operation context for a tree descent: the latches acquired on the way
/// down (in order), the pages condemned by merges, and whether this
/// operation holds the tree-wide root latch. Pure data holder - the tree
/// releases everything in one place.
#[derive(Default)]
pub struct Transaction {
    page_set: Vec<LatchedPage>,
    deleted_page_set: HashSet<PageId>,
    root_locked: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_into_page_set(&mut self, latched: LatchedPage) {
        self.page_set.push(latched);
    }

    pub fn add_into_deleted_page_set(&mut self, page_id: PageId) {
        self.deleted_page_set.insert(page_id);
    }

    pub fn page_set(&self) -> &[LatchedPage] {
        &self.page_set
    }

    pub fn page_set_mut(&mut self) -> &mut Vec<LatchedPage> {
        &mut self.page_set
    }

    pub fn deleted_page_set(&self) -> &HashSet<PageId> {
        &self.deleted_page_set
    }

    pub fn take_deleted_page_set(&mut self) -> HashSet<PageId> {
        std::mem::take(&mut self.deleted_page_set)
    }

    pub fn root_locked(&self) -> bool {
        self.root_locked
    }

    pub fn set_root_locked(&mut self, locked: bool) {
        self.root_locked = locked;
    }

    /// Finds the latch held on `page_id`, if this operation holds one.
    pub fn find_page_mut(&mut self, page_id: PageId) -> Option<&mut LatchedPage> {
        self.page_set
            .iter_mut()
            .find(|latched| latched.page_id() == page_id)
    }

    /// Returns the write guard at `index`. Panics if the latch there is a
    /// read latch - structural code only ever runs under write latches.
    pub fn write_guard_at(&mut self, index: usize) -> &mut WritePageGuard {
        match &mut self.page_set[index] {
            LatchedPage::Write(guard) => guard,
            LatchedPage::Read(_) => panic!("structural change attempted under a read latch"),
        }
    }

    /// Returns write guards on two distinct entries at once.
    pub fn pair_write_mut(
        &mut self,
        a: usize,
        b: usize,
    ) -> (&mut WritePageGuard, &mut WritePageGuard) {
        assert_ne!(a, b);
        let (lo, hi) = (a.min(b), a.max(b));
        let (left, right) = self.page_set.split_at_mut(hi);
        let first = match &mut left[lo] {
            LatchedPage::Write(guard) => guard,
            LatchedPage::Read(_) => panic!("structural change attempted under a read latch"),
        };
        let second = match &mut right[0] {
            LatchedPage::Write(guard) => guard,
            LatchedPage::Read(_) => panic!("structural change attempted under a read latch"),
        };
        if a < b {
            (first, second)
        } else {
            (second, first)
        }
    }
}
