mod btree;
mod btree_iterator;
mod key;
mod key_comparator;
mod transaction;

pub use btree::BPlusTree;
pub use btree_iterator::BTreeIterator;
pub use key::{GenericKey, IndexKey};
pub use key_comparator::{BytewiseComparator, GenericComparator, KeyComparator};
pub use transaction::{LatchedPage, Transaction};
