use std::sync::Arc;

use loam::buffer::{BufferPoolManager, ReadPageGuard};
use loam::index::{BPlusTree, GenericComparator, GenericKey};
use loam::storage::disk::DiskManager;
use loam::storage::page::{BTreePage, InternalPage, LeafPage};
use loam::{PageId, RecordId, SlotId};

use tempfile::NamedTempFile;

type Key = GenericKey<8>;
type Tree = BPlusTree<Key, GenericComparator<8>>;

fn key(v: i64) -> Key {
    Key::from_integer(v)
}

fn rid(v: i64) -> RecordId {
    RecordId::new(PageId::new(v as i32), SlotId::new(0))
}

fn setup(
    pool_size: usize,
    leaf_max_size: usize,
    internal_max_size: usize,
) -> (Arc<BufferPoolManager>, Tree, NamedTempFile) {
    let temp = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, disk_manager));
    let tree = BPlusTree::new(
        "test_index",
        Arc::clone(&bpm),
        GenericComparator::<8>,
        leaf_max_size,
        internal_max_size,
    );
    (bpm, tree, temp)
}

/// Walks the whole tree checking the structural invariants - node sizes
/// within bounds, consistent parent pointers, uniform leaf depth, sorted
/// leaf chain - and returns every key in leaf order.
fn validate_tree(bpm: &Arc<BufferPoolManager>, tree: &Tree) -> Vec<i64> {
    let root_id = tree.root_page_id();
    if root_id.is_invalid() {
        return Vec::new();
    }

    let mut leaf_depth = None;
    check_node(bpm, root_id, PageId::new(-1), 0, &mut leaf_depth);

    // find the leftmost leaf, then follow the chain
    let mut current = root_id;
    loop {
        let page = bpm.fetch_page(current).unwrap();
        let (is_leaf, first_child) = {
            let guard = ReadPageGuard::latch(&page);
            let node = BTreePage::new(guard.data());
            if node.is_leaf() {
                (true, PageId::new(-1))
            } else {
                (false, InternalPage::<_, Key>::new(guard.data()).value_at(0))
            }
        };
        bpm.unpin_page(current, false);
        if is_leaf {
            break;
        }
        current = first_child;
    }

    let mut keys = Vec::new();
    loop {
        let page = bpm.fetch_page(current).unwrap();
        let next = {
            let guard = ReadPageGuard::latch(&page);
            let leaf = LeafPage::<_, Key>::new(guard.data());
            for i in 0..leaf.size() {
                keys.push(leaf.key_at(i).to_integer());
            }
            leaf.next_page_id()
        };
        bpm.unpin_page(current, false);
        if next.is_invalid() {
            break;
        }
        current = next;
    }

    assert!(
        keys.windows(2).all(|w| w[0] < w[1]),
        "leaf chain out of order: {keys:?}"
    );
    keys
}

fn check_node(
    bpm: &Arc<BufferPoolManager>,
    page_id: PageId,
    expected_parent: PageId,
    depth: usize,
    leaf_depth: &mut Option<usize>,
) {
    let page = bpm.fetch_page(page_id).unwrap();
    let children = {
        let guard = ReadPageGuard::latch(&page);
        let node = BTreePage::new(guard.data());
        assert_eq!(node.parent_page_id(), expected_parent, "page {page_id}");

        let is_root = expected_parent.is_invalid();
        if !is_root {
            if node.is_leaf() {
                assert!(node.size() >= node.min_size(), "leaf {page_id} underflow");
            } else {
                assert!(
                    node.size() >= node.min_size(),
                    "internal {page_id} underflow"
                );
            }
        }
        assert!(node.size() <= node.max_size(), "page {page_id} overflow");

        if node.is_leaf() {
            match *leaf_depth {
                Some(d) => assert_eq!(d, depth, "leaf {page_id} at wrong depth"),
                None => *leaf_depth = Some(depth),
            }
            Vec::new()
        } else {
            let internal = InternalPage::<_, Key>::new(guard.data());
            (0..internal.size()).map(|i| internal.value_at(i)).collect()
        }
    };
    bpm.unpin_page(page_id, false);

    for child in children {
        check_node(bpm, child, page_id, depth + 1, leaf_depth);
    }
}

#[test]
fn test_remove_absent_key_is_noop() {
    let (_bpm, tree, _temp) = setup(16, 4, 4);

    tree.remove(&key(1)).unwrap();
    assert!(tree.is_empty());

    tree.insert(&key(1), rid(1)).unwrap();
    tree.remove(&key(2)).unwrap();
    assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
}

#[test]
fn test_remove_twice_is_noop() {
    let (_bpm, tree, _temp) = setup(16, 4, 4);

    for v in 1..=3 {
        tree.insert(&key(v), rid(v)).unwrap();
    }
    tree.remove(&key(2)).unwrap();
    tree.remove(&key(2)).unwrap();
    assert_eq!(tree.get_value(&key(2)).unwrap(), None);
    assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
    assert_eq!(tree.get_value(&key(3)).unwrap(), Some(rid(3)));
}

#[test]
fn test_remove_last_key_empties_tree() {
    let (_bpm, tree, _temp) = setup(16, 4, 4);

    tree.insert(&key(42), rid(42)).unwrap();
    tree.remove(&key(42)).unwrap();

    assert!(tree.is_empty());
    assert!(tree.root_page_id().is_invalid());
    assert_eq!(tree.get_value(&key(42)).unwrap(), None);

    // the tree comes back from empty
    tree.insert(&key(1), rid(1)).unwrap();
    assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
}

#[test]
fn test_remove_triggers_redistribute_and_coalesce() {
    let (bpm, tree, _temp) = setup(32, 4, 3);

    for v in 1..=10 {
        tree.insert(&key(v), rid(v)).unwrap();
    }
    let deep_root = tree.root_page_id();

    // removing 5 drains a leaf below its minimum; its right sibling is rich
    // enough that the pair redistributes
    tree.remove(&key(5)).unwrap();
    assert_eq!(tree.root_page_id(), deep_root);
    assert_eq!(
        validate_tree(&bpm, &tree),
        vec![1, 2, 3, 4, 6, 7, 8, 9, 10]
    );

    // removing 4 cascades: leaf merge, internal merge, root collapse
    tree.remove(&key(4)).unwrap();
    assert_ne!(tree.root_page_id(), deep_root);
    assert_eq!(validate_tree(&bpm, &tree), vec![1, 2, 3, 6, 7, 8, 9, 10]);

    tree.remove(&key(3)).unwrap();
    assert_eq!(validate_tree(&bpm, &tree), vec![1, 2, 6, 7, 8, 9, 10]);

    for v in [3i64, 4, 5] {
        assert_eq!(tree.get_value(&key(v)).unwrap(), None, "key {v}");
    }
    for v in [1i64, 2, 6, 7, 8, 9, 10] {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "key {v}");
    }
}

#[test]
fn test_root_collapse_promotes_only_child() {
    let (bpm, tree, _temp) = setup(16, 4, 4);

    // two leaves under an internal root
    for v in 1..=5 {
        tree.insert(&key(v), rid(v)).unwrap();
    }
    let old_root = tree.root_page_id();

    // shrink until the two leaves merge and the root hands over to the
    // merged leaf
    for v in [5i64, 4, 3] {
        tree.remove(&key(v)).unwrap();
    }
    let root_id = tree.root_page_id();
    assert_ne!(root_id, old_root);

    let root_page = bpm.fetch_page(root_id).unwrap();
    {
        let guard = ReadPageGuard::latch(&root_page);
        let node = BTreePage::new(guard.data());
        assert!(node.is_leaf());
        assert!(node.parent_page_id().is_invalid());
    }
    bpm.unpin_page(root_id, false);

    assert_eq!(validate_tree(&bpm, &tree), vec![1, 2]);
}

#[test]
fn test_remove_all_descending() {
    let (bpm, tree, _temp) = setup(64, 4, 4);

    for v in 0..100 {
        tree.insert(&key(v), rid(v)).unwrap();
    }
    for v in (0..100).rev() {
        tree.remove(&key(v)).unwrap();
        validate_tree(&bpm, &tree);
    }
    assert!(tree.is_empty());
}

#[test]
fn test_remove_random_half_then_rest() {
    use rand::seq::SliceRandom;
    use rand::thread_rng;

    let (bpm, tree, _temp) = setup(64, 6, 6);

    let mut keys: Vec<i64> = (0..300).collect();
    keys.shuffle(&mut thread_rng());
    for &v in &keys {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    let (gone, kept) = keys.split_at(150);
    let mut gone = gone.to_vec();
    gone.shuffle(&mut thread_rng());
    for &v in &gone {
        tree.remove(&key(v)).unwrap();
    }

    let mut expected: Vec<i64> = kept.to_vec();
    expected.sort_unstable();
    assert_eq!(validate_tree(&bpm, &tree), expected);

    for &v in &gone {
        assert_eq!(tree.get_value(&key(v)).unwrap(), None, "key {v}");
    }
    for &v in kept {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "key {v}");
    }

    for &v in kept {
        tree.remove(&key(v)).unwrap();
    }
    assert!(tree.is_empty());

    // every page came back to rest unpinned
    let num_pages = bpm.disk_manager().num_pages();
    for id in 0..num_pages {
        let pin_count = bpm.get_pin_count(PageId::new(id));
        assert!(
            pin_count.is_none() || pin_count == Some(0),
            "page {id} still pinned: {pin_count:?}"
        );
    }
}
