//! Loam - a disk-oriented storage engine core in Rust
//!
//! This crate provides the storage primitives a database access method sits
//! on: a fixed-size buffer pool backed by a block device, and a concurrent
//! B+tree index whose nodes live one per page.
//!
//! # Architecture
//!
//! - **Storage Layer** (`storage`): disk I/O and on-page layouts
//!   - `DiskManager`: reads and writes pages in the database file
//!   - `DiskScheduler`: background-thread disk I/O with sync wrappers
//!   - `LeafPage`/`InternalPage`: the two B+tree node layouts
//!   - `HeaderPage`: page 0, mapping index names to root page ids
//!
//! - **Buffer Pool** (`buffer`): memory management for database pages
//!   - `BufferPoolManager`: pins pages into frames, evicts with LRU
//!   - `LruReplacer`: tracks eviction candidates in unpin order
//!   - `Page`: one frame - pin count, dirty flag, data and its latch
//!
//! - **Index** (`index`): the ordered access method
//!   - `BPlusTree`: lookup, unique insert, delete with rebalancing, all
//!     under latch crabbing
//!   - `BTreeIterator`: forward scan over the leaf chain with lock coupling
//!   - `GenericKey`/`GenericComparator`: fixed-width keys and their ordering
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use loam::buffer::BufferPoolManager;
//! use loam::index::{BPlusTree, GenericComparator, GenericKey};
//! use loam::storage::disk::DiskManager;
//! use loam::{PageId, RecordId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, disk_manager));
//!
//! let tree = BPlusTree::new("test_index", bpm, GenericComparator::<8>, 32, 32);
//! let key = GenericKey::<8>::from_integer(42);
//! tree.insert(&key, RecordId::new(PageId::new(1), SlotId::new(0))).unwrap();
//! assert!(tree.get_value(&key).unwrap().is_some());
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{LoamError, PageId, RecordId, Result, SlotId};
