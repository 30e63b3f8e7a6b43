use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{RecordId, Result};
use crate::storage::page::LeafPage;

use super::IndexKey;

/// Forward scan over the leaf chain in key order.
///
/// The iterator owns exactly one pin and one read latch at a time - the ones
/// on the current leaf. Crossing to the next leaf uses lock coupling: the
/// next leaf's latch is acquired before the current one is released, so a
/// concurrent structural change cannot slip between the two.
pub struct BTreeIterator<K> {
    bpm: Arc<BufferPoolManager>,
    leaf: Option<ReadPageGuard>,
    index: usize,
    _key: PhantomData<K>,
}

impl<K: IndexKey> BTreeIterator<K> {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, leaf: Option<ReadPageGuard>, index: usize) -> Self {
        Self {
            bpm,
            leaf,
            index,
            _key: PhantomData,
        }
    }

    /// True once the scan is past the last pair of the last leaf.
    pub fn is_end(&self) -> bool {
        match &self.leaf {
            None => true,
            Some(guard) => {
                let leaf = LeafPage::<_, K>::new(guard.data());
                self.index >= leaf.size() && leaf.next_page_id().is_invalid()
            }
        }
    }

    /// Yields the next pair, or None at the end of the index.
    pub fn next(&mut self) -> Result<Option<(K, RecordId)>> {
        loop {
            let Some(guard) = &self.leaf else {
                return Ok(None);
            };

            let leaf = LeafPage::<_, K>::new(guard.data());
            if self.index < leaf.size() {
                let item = leaf.item(self.index);
                self.index += 1;
                return Ok(Some(item));
            }

            let next_id = leaf.next_page_id();
            if next_id.is_invalid() {
                self.release_current();
                return Ok(None);
            }

            // lock coupling: latch the next leaf before letting go of this one
            let next_page = match self.bpm.fetch_page(next_id) {
                Ok(page) => page,
                Err(e) => {
                    self.release_current();
                    return Err(e);
                }
            };
            let next_guard = ReadPageGuard::latch(&next_page);
            self.release_current();
            self.leaf = Some(next_guard);
            self.index = 0;
        }
    }

    /// Drops the latch on the current leaf, then the pin behind it.
    fn release_current(&mut self) {
        if let Some(guard) = self.leaf.take() {
            let page_id = guard.page_id();
            drop(guard);
            self.bpm.unpin_page(page_id, false);
        }
    }
}

impl<K> Drop for BTreeIterator<K> {
    fn drop(&mut self) {
        if let Some(guard) = self.leaf.take() {
            let page_id = guard.page_id();
            drop(guard);
            self.bpm.unpin_page(page_id, false);
        }
    }
}

impl<K: IndexKey> Iterator for BTreeIterator<K> {
    type Item = Result<(K, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match BTreeIterator::next(self) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
