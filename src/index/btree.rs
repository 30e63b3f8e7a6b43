use std::cmp::Ordering;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::lock_api::RawMutex as _;
use parking_lot::{Mutex, RawMutex};

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    LoamError, PageId, RecordId, Result, SlotId, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::storage::page::{BTreePage, HeaderPage, InternalPage, LeafPage};

use super::{BTreeIterator, IndexKey, KeyComparator, LatchedPage, Transaction};

/// What a descent intends to do to the leaf it lands on. Decides latch modes
/// and which ancestors stay latched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    ReadOnly,
    Insert,
    Delete,
}

/// Concurrent B+tree index over fixed-size nodes, one node per buffer-pool
/// page.
///
/// Point lookups, unique insertion with recursive splits, deletion with
/// coalesce/redistribute, and forward leaf iteration. Descents use latch
/// crabbing: readers hold at most a parent/child latch pair, writers keep
/// ancestors latched only until a child proves the modification cannot
/// propagate above it. The root page id is persisted in the header page
/// under the index name.
pub struct BPlusTree<K, C> {
    index_name: String,
    root_page_id: AtomicI32,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    /// Guards the root page id and its header record across writer descents.
    /// Raw because the unlock site (latch unwind) is far from the lock site;
    /// the held flag lives in the per-operation transaction context.
    root_latch: RawMutex,
    /// Serializes the empty-tree check with creation of the first root
    structure_latch: Mutex<()>,
    _key: PhantomData<K>,
}

impl<K: IndexKey, C: KeyComparator<K>> BPlusTree<K, C> {
    /// Creates a handle on a (possibly not yet existing) index. The tree is
    /// empty until the first insert allocates a root.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        assert!(leaf_max_size >= 2 && leaf_max_size <= LeafPage::<&[u8], K>::max_capacity());
        assert!(
            internal_max_size >= 3 && internal_max_size <= InternalPage::<&[u8], K>::max_capacity()
        );

        Self {
            index_name: index_name.into(),
            root_page_id: AtomicI32::new(INVALID_PAGE_ID.0),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_latch: RawMutex::INIT,
            structure_latch: Mutex::new(()),
            _key: PhantomData,
        }
    }

    /// Reopens an index persisted under `index_name`, reading its root page
    /// id back from the header page.
    pub fn open(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let tree = Self::new(index_name, bpm, comparator, leaf_max_size, internal_max_size);

        let page = tree.bpm.fetch_page(HEADER_PAGE_ID)?;
        let root_id = {
            let guard = ReadPageGuard::latch(&page);
            HeaderPage::new(guard.data()).get_root_id(&tree.index_name)
        };
        tree.bpm.unpin_page(HEADER_PAGE_ID, false);

        if let Some(root_id) = root_id {
            tree.root_page_id
                .store(root_id.0, AtomicOrdering::Release);
        }
        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id().is_invalid()
    }

    pub fn root_page_id(&self) -> PageId {
        PageId::new(self.root_page_id.load(AtomicOrdering::Acquire))
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Point query. Returns at most one value (keys are unique).
    pub fn get_value(&self, key: &K) -> Result<Option<RecordId>> {
        let mut txn = Transaction::new();
        let result = self.get_value_inner(key, &mut txn);
        self.unlock_unpin_pages(Operation::ReadOnly, &mut txn);
        result
    }

    fn get_value_inner(&self, key: &K, txn: &mut Transaction) -> Result<Option<RecordId>> {
        if self.find_leaf(key, Operation::ReadOnly, txn)?.is_none() {
            return Ok(None);
        }
        let guard = txn.page_set().last().unwrap();
        let leaf = LeafPage::<_, K>::new(guard.data());
        Ok(leaf.lookup(key, &self.comparator))
    }

    /// Inserts a unique key. Returns false (without mutating) when the key
    /// is already present.
    pub fn insert(&self, key: &K, value: RecordId) -> Result<bool> {
        loop {
            {
                let _structure = self.structure_latch.lock();
                if self.is_empty() {
                    self.start_new_tree(key, value)?;
                    return Ok(true);
                }
            }

            let mut txn = Transaction::new();
            let result = self.insert_into_leaf(key, value, &mut txn);
            self.unlock_unpin_pages(Operation::Insert, &mut txn);
            match result? {
                Some(inserted) => return Ok(inserted),
                // tree was emptied between the check and the descent
                None => continue,
            }
        }
    }

    /// Removes the key if present; absent keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let mut txn = Transaction::new();
        let result = self.remove_inner(key, &mut txn);
        self.unlock_unpin_pages(Operation::Delete, &mut txn);
        result
    }

    /// Iterator positioned at the first key of the leftmost leaf.
    pub fn begin(&self) -> Result<BTreeIterator<K>> {
        let leaf = self.find_leaf_for_scan(None)?;
        Ok(BTreeIterator::new(Arc::clone(&self.bpm), leaf, 0))
    }

    /// Iterator positioned at the first key >= `key`.
    pub fn begin_at(&self, key: &K) -> Result<BTreeIterator<K>> {
        let leaf = self.find_leaf_for_scan(Some(key))?;
        let index = match &leaf {
            Some(guard) => LeafPage::<_, K>::new(guard.data()).key_index(key, &self.comparator),
            None => 0,
        };
        Ok(BTreeIterator::new(Arc::clone(&self.bpm), leaf, index))
    }

    /// Reads whitespace-separated integers from a file and inserts a key
    /// derived from each, keyed back to itself as the record id.
    pub fn insert_from_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        for token in contents.split_whitespace() {
            let v: i64 = token
                .parse()
                .map_err(|_| LoamError::InvalidKey(token.to_string()))?;
            let value = RecordId::new(PageId::new(v as i32), SlotId::new(v as u16));
            self.insert(&K::from_integer(v), value)?;
        }
        Ok(())
    }

    /// Reads whitespace-separated integers from a file and removes the key
    /// derived from each.
    pub fn remove_from_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        for token in contents.split_whitespace() {
            let v: i64 = token
                .parse()
                .map_err(|_| LoamError::InvalidKey(token.to_string()))?;
            self.remove(&K::from_integer(v))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Descent
    // ------------------------------------------------------------------

    /// Walks from the root to the leaf covering `key`, latching per `op` and
    /// registering every held latch in the transaction. Writers take the
    /// tree-wide root latch first and shed ancestors as soon as a child is
    /// safe; readers shed them immediately.
    ///
    /// Returns None when the tree is empty. The leaf's latch is the last
    /// entry of the transaction's page set.
    fn find_leaf(&self, key: &K, op: Operation, txn: &mut Transaction) -> Result<Option<PageId>> {
        if op != Operation::ReadOnly {
            self.root_latch.lock();
            txn.set_root_locked(true);

            let root_id = self.root_page_id();
            if root_id.is_invalid() {
                // caller's unwind releases the root latch
                return Ok(None);
            }
            let root_page = self.bpm.fetch_page(root_id)?;
            txn.add_into_page_set(LatchedPage::Write(WritePageGuard::latch(&root_page)));
        } else {
            // readers skip the root latch, so the id they read may go stale
            // under a concurrent root change; latch, then re-check
            loop {
                let root_id = self.root_page_id();
                if root_id.is_invalid() {
                    return Ok(None);
                }
                let root_page = self.bpm.fetch_page(root_id)?;
                let root_latch = ReadPageGuard::latch(&root_page);
                if self.root_page_id() == root_id {
                    txn.add_into_page_set(LatchedPage::Read(root_latch));
                    break;
                }
                drop(root_latch);
                self.bpm.unpin_page(root_id, false);
            }
        }

        loop {
            let (current_id, child_id) = {
                let guard = txn.page_set().last().unwrap();
                let node = BTreePage::new(guard.data());
                if node.is_leaf() {
                    return Ok(Some(node.page_id()));
                }
                let internal = InternalPage::<_, K>::new(guard.data());
                (node.page_id(), internal.lookup(key, &self.comparator))
            };

            let child_page = self.bpm.fetch_page(child_id)?;
            match op {
                Operation::ReadOnly => {
                    let child_latch = ReadPageGuard::latch(&child_page);
                    debug_assert_eq!(
                        BTreePage::new(child_latch.data()).parent_page_id(),
                        current_id
                    );
                    self.unlock_unpin_pages(op, txn);
                    txn.add_into_page_set(LatchedPage::Read(child_latch));
                }
                _ => {
                    let child_latch = WritePageGuard::latch(&child_page);
                    debug_assert_eq!(
                        BTreePage::new(child_latch.data()).parent_page_id(),
                        current_id
                    );
                    if self.is_safe(&BTreePage::new(child_latch.data()), op) {
                        self.unlock_unpin_pages(op, txn);
                    }
                    txn.add_into_page_set(LatchedPage::Write(child_latch));
                }
            }
        }
    }

    /// Safe means the pending modification cannot propagate to the parent:
    /// an insert fits without splitting, a delete leaves enough slack that
    /// even losing one more entry cannot force a merge.
    fn is_safe<B: AsRef<[u8]>>(&self, node: &BTreePage<B>, op: Operation) -> bool {
        match op {
            Operation::ReadOnly => true,
            Operation::Insert => node.size() < node.max_size(),
            Operation::Delete => node.size() > node.min_size() + 1,
        }
    }

    /// Unwinds an operation: releases every latch in acquisition order and
    /// unpins behind it, deletes the pages condemned by merges, and drops
    /// the tree-wide root latch if this operation holds it.
    fn unlock_unpin_pages(&self, op: Operation, txn: &mut Transaction) {
        let dirty = op != Operation::ReadOnly;

        for latched in txn.page_set_mut().drain(..) {
            let page_id = latched.page_id();
            drop(latched);
            self.bpm.unpin_page(page_id, dirty);
        }

        for page_id in txn.take_deleted_page_set() {
            match self.bpm.delete_page(page_id) {
                Ok(deleted) => debug_assert!(deleted, "condemned page {page_id} still pinned"),
                Err(e) => log::warn!("failed to delete page {page_id}: {e}"),
            }
        }

        if txn.root_locked() {
            txn.set_root_locked(false);
            unsafe { self.root_latch.unlock() };
        }
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// Allocates a leaf root for the first pair. Runs under the structure
    /// latch; takes the root latch for the id/header update.
    fn start_new_tree(&self, key: &K, value: RecordId) -> Result<()> {
        let page = self.bpm.new_page()?;
        let root_id = page.page_id();

        self.root_latch.lock();
        self.root_page_id.store(root_id.0, AtomicOrdering::Release);
        if let Err(e) = self.update_root_page_id(true) {
            self.root_page_id
                .store(INVALID_PAGE_ID.0, AtomicOrdering::Release);
            unsafe { self.root_latch.unlock() };
            self.bpm.unpin_page(root_id, false);
            return Err(e);
        }

        {
            let mut guard = WritePageGuard::latch(&page);
            let mut root = LeafPage::<_, K>::new(guard.data_mut());
            root.init(root_id, INVALID_PAGE_ID, self.leaf_max_size);
            root.insert(key, value, &self.comparator);
        }
        unsafe { self.root_latch.unlock() };

        self.bpm.unpin_page(root_id, true);
        log::debug!("started new tree '{}' at root {root_id}", self.index_name);
        Ok(())
    }

    /// Returns Ok(None) when the tree emptied out from under the descent
    /// (the caller retries), otherwise whether the key was inserted.
    fn insert_into_leaf(
        &self,
        key: &K,
        value: RecordId,
        txn: &mut Transaction,
    ) -> Result<Option<bool>> {
        if self.find_leaf(key, Operation::Insert, txn)?.is_none() {
            return Ok(None);
        }
        let leaf_index = txn.page_set().len() - 1;

        {
            let guard = txn.write_guard_at(leaf_index);
            let mut leaf = LeafPage::<_, K>::new(guard.data_mut());
            if leaf.lookup(key, &self.comparator).is_some() {
                return Ok(Some(false));
            }
            if leaf.size() < leaf.max_size() {
                leaf.insert(key, value, &self.comparator);
                return Ok(Some(true));
            }
        }

        self.split_leaf_and_insert(key, value, txn, leaf_index)?;
        Ok(Some(true))
    }

    /// Splits a full leaf: the new sibling becomes the right half, the new
    /// key lands in whichever side covers it, and the separator (the right
    /// half's first key) goes up to the parent.
    fn split_leaf_and_insert(
        &self,
        key: &K,
        value: RecordId,
        txn: &mut Transaction,
        leaf_index: usize,
    ) -> Result<()> {
        let new_page = self.bpm.new_page()?;
        let new_id = new_page.page_id();
        let mut new_guard = WritePageGuard::latch(&new_page);

        let separator = {
            let old_guard = txn.write_guard_at(leaf_index);
            let mut leaf = LeafPage::<_, K>::new(old_guard.data_mut());
            let mut new_leaf = LeafPage::<_, K>::new(new_guard.data_mut());
            new_leaf.init(new_id, leaf.parent_page_id(), self.leaf_max_size);

            // split so both halves stay above the minimum once the new key
            // lands; with an odd fanout the incoming side gives up one more
            let size = leaf.size();
            let key_goes_left = leaf.key_index(key, &self.comparator) < (size + 1) / 2;
            let moved = if key_goes_left { (size + 1) / 2 } else { size / 2 };
            leaf.move_half_to(&mut new_leaf, moved);
            debug_assert_eq!(
                key_goes_left,
                self.comparator.compare(key, &new_leaf.key_at(0)) == Ordering::Less
            );
            if key_goes_left {
                leaf.insert(key, value, &self.comparator);
            } else {
                new_leaf.insert(key, value, &self.comparator);
            }

            // chain the new leaf in as the right sibling
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(new_id);

            log::debug!("split leaf {} -> {}", leaf.page_id(), new_id);
            new_leaf.key_at(0)
        };

        self.insert_into_parent(txn, leaf_index, separator, &mut new_guard)?;

        drop(new_guard);
        self.bpm.unpin_page(new_id, true);
        Ok(())
    }

    /// Hooks a freshly split-off node into the parent of the node at
    /// `old_index`, growing a new root or splitting the parent recursively
    /// when it has no room.
    fn insert_into_parent(
        &self,
        txn: &mut Transaction,
        old_index: usize,
        key: K,
        new_guard: &mut WritePageGuard,
    ) -> Result<()> {
        let (old_id, old_is_root, old_parent_id) = {
            let guard = &txn.page_set()[old_index];
            let node = BTreePage::new(guard.data());
            (node.page_id(), node.is_root(), node.parent_page_id())
        };
        let new_id = new_guard.page_id();

        if old_is_root {
            debug_assert_eq!(old_index, 0);
            let root_page = self.bpm.new_page()?;
            let root_id = root_page.page_id();
            {
                let mut root_guard = WritePageGuard::latch(&root_page);
                let mut root = InternalPage::<_, K>::new(root_guard.data_mut());
                root.init(root_id, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(old_id, &key, new_id);
            }
            {
                let old_guard = txn.write_guard_at(old_index);
                BTreePage::new(old_guard.data_mut()).set_parent_page_id(root_id);
            }
            BTreePage::new(new_guard.data_mut()).set_parent_page_id(root_id);

            self.root_page_id.store(root_id.0, AtomicOrdering::Release);
            self.update_root_page_id(false)?;
            self.bpm.unpin_page(root_id, true);
            log::debug!("tree grew a level: new root {root_id}");
            return Ok(());
        }

        let parent_index = old_index - 1;
        debug_assert_eq!(txn.page_set()[parent_index].page_id(), old_parent_id);

        let parent_has_room = {
            let guard = &txn.page_set()[parent_index];
            let parent = InternalPage::<_, K>::new(guard.data());
            parent.size() < parent.max_size()
        };

        if parent_has_room {
            {
                let parent_guard = txn.write_guard_at(parent_index);
                let mut parent = InternalPage::<_, K>::new(parent_guard.data_mut());
                parent.insert_node_after(old_id, &key, new_id);
            }
            BTreePage::new(new_guard.data_mut()).set_parent_page_id(old_parent_id);
            return Ok(());
        }

        self.split_internal_and_insert(txn, old_index, key, new_guard)
    }

    /// Splits a full internal parent. A scratch page takes every separator
    /// plus the incoming pair in order; its top half becomes the new
    /// internal node and the low half is written back behind the parent's
    /// sentinel child. Children that changed sides are reparented, the
    /// scratch page is returned to the pool, and the new separator recurses
    /// upward.
    fn split_internal_and_insert(
        &self,
        txn: &mut Transaction,
        old_index: usize,
        key: K,
        new_guard: &mut WritePageGuard,
    ) -> Result<()> {
        let parent_index = old_index - 1;
        let old_id = txn.page_set()[old_index].page_id();
        let new_id = new_guard.page_id();

        let scratch_page = self.bpm.new_page()?;
        let scratch_id = scratch_page.page_id();
        let new2_page = self.bpm.new_page()?;
        let new2_id = new2_page.page_id();
        let mut new2_guard = WritePageGuard::latch(&new2_page);

        let (separator, right_children) = {
            let parent_guard = txn.write_guard_at(parent_index);
            let mut parent = InternalPage::<_, K>::new(parent_guard.data_mut());

            let mut scratch_guard = WritePageGuard::latch(&scratch_page);
            let mut scratch = InternalPage::<_, K>::new(scratch_guard.data_mut());
            scratch.init(scratch_id, INVALID_PAGE_ID, self.internal_max_size);

            // flatten the parent's pairs with the new one in position;
            // slot 0's child stays behind in the parent
            let size = parent.size();
            scratch.set_size(size);
            let mut j = 0;
            for i in 0..size {
                if i >= 1 {
                    scratch.set_key_at(j, &parent.key_at(i));
                    scratch.set_value_at(j, parent.value_at(i));
                    j += 1;
                }
                if parent.value_at(i) == old_id {
                    scratch.set_key_at(j, &key);
                    scratch.set_value_at(j, new_id);
                    j += 1;
                }
            }
            debug_assert_eq!(j, size);

            let mut new2 = InternalPage::<_, K>::new(new2_guard.data_mut());
            new2.init(new2_id, parent.parent_page_id(), self.internal_max_size);
            scratch.move_half_to(&mut new2);
            let separator = new2.key_at(0);

            let low = scratch.size();
            parent.set_size(low + 1);
            for i in 0..low {
                parent.set_key_at(i + 1, &scratch.key_at(i));
                parent.set_value_at(i + 1, scratch.value_at(i));
            }

            let right_children: Vec<PageId> = (0..new2.size()).map(|i| new2.value_at(i)).collect();
            log::debug!("split internal {} -> {}", parent.page_id(), new2_id);
            (separator, right_children)
        };

        self.bpm.unpin_page(scratch_id, false);
        self.bpm.delete_page(scratch_id)?;

        for child_id in right_children {
            if child_id == new_id {
                BTreePage::new(new_guard.data_mut()).set_parent_page_id(new2_id);
            } else {
                self.set_parent_pointer(txn, child_id, new2_id)?;
            }
        }

        self.insert_into_parent(txn, parent_index, separator, &mut new2_guard)?;

        drop(new2_guard);
        self.bpm.unpin_page(new2_id, true);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------

    fn remove_inner(&self, key: &K, txn: &mut Transaction) -> Result<()> {
        if self.find_leaf(key, Operation::Delete, txn)?.is_none() {
            return Ok(());
        }
        let leaf_index = txn.page_set().len() - 1;

        let (size_before, size_after) = {
            let guard = txn.write_guard_at(leaf_index);
            let mut leaf = LeafPage::<_, K>::new(guard.data_mut());
            let before = leaf.size();
            (before, leaf.remove_record(key, &self.comparator))
        };
        if size_after == size_before {
            // key was not present
            return Ok(());
        }

        if self.coalesce_or_redistribute(txn, leaf_index)? {
            let page_id = txn.page_set()[leaf_index].page_id();
            txn.add_into_deleted_page_set(page_id);
        }
        Ok(())
    }

    /// Rebalances the node at `node_index` after it lost an entry. Picks
    /// the left sibling when one exists, redistributes when the pair holds
    /// more than one node's worth, merges otherwise. Returns true when the
    /// caller must condemn the node's page.
    fn coalesce_or_redistribute(&self, txn: &mut Transaction, node_index: usize) -> Result<bool> {
        let (is_root, is_leaf, size, min_size, max_size, node_id, parent_id) = {
            let guard = &txn.page_set()[node_index];
            let node = BTreePage::new(guard.data());
            (
                node.is_root(),
                node.is_leaf(),
                node.size(),
                node.min_size(),
                node.max_size(),
                node.page_id(),
                node.parent_page_id(),
            )
        };

        if is_root {
            return self.adjust_root(txn, node_index);
        }

        let meets_minimum = if is_leaf {
            size >= min_size
        } else {
            size > min_size
        };
        if meets_minimum {
            return Ok(false);
        }

        let parent_index = node_index - 1;
        debug_assert_eq!(txn.page_set()[parent_index].page_id(), parent_id);

        let (value_index, sibling_id) = {
            let guard = &txn.page_set()[parent_index];
            let parent = InternalPage::<_, K>::new(guard.data());
            let value_index = parent.value_index(node_id);
            debug_assert!(value_index < parent.size());
            let sibling_slot = if value_index == 0 { 1 } else { value_index - 1 };
            (value_index, parent.value_at(sibling_slot))
        };

        // latch the sibling and let it unwind with the rest of the descent
        let sibling_page = self.bpm.fetch_page(sibling_id)?;
        txn.add_into_page_set(LatchedPage::Write(WritePageGuard::latch(&sibling_page)));
        let sibling_index = txn.page_set().len() - 1;
        let sibling_size = BTreePage::new(txn.page_set()[sibling_index].data()).size();

        if sibling_size + size > max_size {
            self.redistribute(txn, sibling_index, node_index, parent_index, value_index)?;
            return Ok(false);
        }

        // merge; entries always land in the left-hand node
        if value_index == 0 {
            // node is the first child, so the right sibling drains into it
            self.coalesce(txn, node_index, sibling_index, parent_index, 1)?;
            txn.add_into_deleted_page_set(sibling_id);
            Ok(false)
        } else {
            self.coalesce(txn, sibling_index, node_index, parent_index, value_index)?;
            Ok(true)
        }
    }

    /// Drains the donor into its left neighbor and drops the vacated slot
    /// from the parent, recursing when that underflows the parent in turn.
    fn coalesce(
        &self,
        txn: &mut Transaction,
        recipient_index: usize,
        donor_index: usize,
        parent_index: usize,
        sep_slot: usize,
    ) -> Result<()> {
        let is_leaf = BTreePage::new(txn.page_set()[donor_index].data()).is_leaf();
        let separator = {
            let guard = &txn.page_set()[parent_index];
            InternalPage::<_, K>::new(guard.data()).key_at(sep_slot)
        };

        let moved_children = {
            let (recipient_guard, donor_guard) = txn.pair_write_mut(recipient_index, donor_index);
            if is_leaf {
                let mut donor = LeafPage::<_, K>::new(donor_guard.data_mut());
                let mut recipient = LeafPage::<_, K>::new(recipient_guard.data_mut());
                donor.move_all_to(&mut recipient);
                Vec::new()
            } else {
                let mut donor = InternalPage::<_, K>::new(donor_guard.data_mut());
                let mut recipient = InternalPage::<_, K>::new(recipient_guard.data_mut());
                let children: Vec<PageId> = (0..donor.size()).map(|i| donor.value_at(i)).collect();
                donor.move_all_to(&mut recipient, &separator);
                children
            }
        };

        let recipient_id = txn.page_set()[recipient_index].page_id();
        for child_id in moved_children {
            self.set_parent_pointer(txn, child_id, recipient_id)?;
        }

        {
            let parent_guard = txn.write_guard_at(parent_index);
            let mut parent = InternalPage::<_, K>::new(parent_guard.data_mut());
            parent.remove(sep_slot);
        }
        log::debug!(
            "coalesced {} into {}",
            txn.page_set()[donor_index].page_id(),
            recipient_id
        );

        if self.coalesce_or_redistribute(txn, parent_index)? {
            let parent_id = txn.page_set()[parent_index].page_id();
            txn.add_into_deleted_page_set(parent_id);
        }
        Ok(())
    }

    /// Moves one entry from the richer sibling into the node and rewrites
    /// the separator between them in the parent.
    fn redistribute(
        &self,
        txn: &mut Transaction,
        sibling_index: usize,
        node_index: usize,
        parent_index: usize,
        value_index: usize,
    ) -> Result<()> {
        let is_leaf = BTreePage::new(txn.page_set()[node_index].data()).is_leaf();
        let node_id = txn.page_set()[node_index].page_id();

        // the separator slot between node and sibling in the parent
        let sep_slot = if value_index == 0 { 1 } else { value_index };
        let separator = {
            let guard = &txn.page_set()[parent_index];
            InternalPage::<_, K>::new(guard.data()).key_at(sep_slot)
        };

        let (moved_child, new_separator) = {
            let (node_guard, sibling_guard) = txn.pair_write_mut(node_index, sibling_index);
            if is_leaf {
                let mut sibling = LeafPage::<_, K>::new(sibling_guard.data_mut());
                let mut node = LeafPage::<_, K>::new(node_guard.data_mut());
                if value_index == 0 {
                    // right sibling donates its first pair; the separator
                    // becomes the sibling's new first key
                    sibling.move_first_to_end_of(&mut node);
                    (INVALID_PAGE_ID, sibling.key_at(0))
                } else {
                    // left sibling donates its last pair, which becomes the
                    // node's new first key and the new separator
                    sibling.move_last_to_front_of(&mut node);
                    (INVALID_PAGE_ID, node.key_at(0))
                }
            } else {
                let mut sibling = InternalPage::<_, K>::new(sibling_guard.data_mut());
                let mut node = InternalPage::<_, K>::new(node_guard.data_mut());
                if value_index == 0 {
                    sibling.move_first_to_end_of(&mut node, &separator)
                } else {
                    sibling.move_last_to_front_of(&mut node, &separator)
                }
            }
        };

        {
            let parent_guard = txn.write_guard_at(parent_index);
            let mut parent = InternalPage::<_, K>::new(parent_guard.data_mut());
            parent.set_key_at(sep_slot, &new_separator);
        }

        if !moved_child.is_invalid() {
            self.set_parent_pointer(txn, moved_child, node_id)?;
        }
        log::debug!("redistributed into {}", node_id);
        Ok(())
    }

    /// Shrinks the tree at the top: an empty leaf root empties the tree, an
    /// internal root with a single child hands the root to that child.
    /// Returns true when the old root page must be condemned.
    fn adjust_root(&self, txn: &mut Transaction, root_index: usize) -> Result<bool> {
        let (is_leaf, size) = {
            let guard = &txn.page_set()[root_index];
            let node = BTreePage::new(guard.data());
            (node.is_leaf(), node.size())
        };

        if is_leaf {
            if size == 0 {
                self.root_page_id
                    .store(INVALID_PAGE_ID.0, AtomicOrdering::Release);
                self.update_root_page_id(false)?;
                log::debug!("tree '{}' is now empty", self.index_name);
                return Ok(true);
            }
            return Ok(false);
        }

        if size == 1 {
            let child_id = {
                let guard = &txn.page_set()[root_index];
                InternalPage::<_, K>::new(guard.data()).value_at(0)
            };
            self.root_page_id.store(child_id.0, AtomicOrdering::Release);
            self.update_root_page_id(false)?;
            self.set_parent_pointer(txn, child_id, INVALID_PAGE_ID)?;
            log::debug!("root collapsed; {child_id} promoted");
            return Ok(true);
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Rewrites a child's parent pointer, going through the latch this
    /// operation already holds when the child sits in the page set (taking
    /// the page's latch again would self-deadlock).
    fn set_parent_pointer(
        &self,
        txn: &mut Transaction,
        child_id: PageId,
        parent_id: PageId,
    ) -> Result<()> {
        if let Some(latched) = txn.find_page_mut(child_id) {
            match latched {
                LatchedPage::Write(guard) => {
                    BTreePage::new(guard.data_mut()).set_parent_page_id(parent_id);
                }
                LatchedPage::Read(_) => unreachable!("structural change under a read latch"),
            }
            return Ok(());
        }

        let page = self.bpm.fetch_page(child_id)?;
        {
            let mut guard = WritePageGuard::latch(&page);
            BTreePage::new(guard.data_mut()).set_parent_page_id(parent_id);
        }
        self.bpm.unpin_page(child_id, true);
        Ok(())
    }

    /// Records the current root page id in the header page, inserting the
    /// (name, root) record on first use and updating it afterwards.
    fn update_root_page_id(&self, insert_record: bool) -> Result<()> {
        let page = self.bpm.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = WritePageGuard::latch(&page);
            let mut header = HeaderPage::new(guard.data_mut());
            let root_id = self.root_page_id();
            if insert_record {
                header.insert_record(&self.index_name, root_id);
            } else if !header.update_record(&self.index_name, root_id) {
                header.insert_record(&self.index_name, root_id);
            }
        }
        self.bpm.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }

    /// Read-latched descent for iterators: parent latch and pin are handed
    /// off to the child at each level, so exactly one pin and one latch are
    /// held when the leaf comes back.
    fn find_leaf_for_scan(&self, key: Option<&K>) -> Result<Option<ReadPageGuard>> {
        // same stale-root re-check as the read path of find_leaf
        let mut guard = loop {
            let root_id = self.root_page_id();
            if root_id.is_invalid() {
                return Ok(None);
            }
            let root_page = self.bpm.fetch_page(root_id)?;
            let root_latch = ReadPageGuard::latch(&root_page);
            if self.root_page_id() == root_id {
                break root_latch;
            }
            drop(root_latch);
            self.bpm.unpin_page(root_id, false);
        };

        loop {
            let (is_leaf, current_id) = {
                let node = BTreePage::new(guard.data());
                (node.is_leaf(), node.page_id())
            };
            if is_leaf {
                return Ok(Some(guard));
            }

            let child_id = {
                let internal = InternalPage::<_, K>::new(guard.data());
                match key {
                    Some(key) => internal.lookup(key, &self.comparator),
                    None => internal.value_at(0),
                }
            };

            let child_page = match self.bpm.fetch_page(child_id) {
                Ok(page) => page,
                Err(e) => {
                    drop(guard);
                    self.bpm.unpin_page(current_id, false);
                    return Err(e);
                }
            };
            let child_guard = ReadPageGuard::latch(&child_page);
            drop(guard);
            self.bpm.unpin_page(current_id, false);
            guard = child_guard;
        }
    }
}
