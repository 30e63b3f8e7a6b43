use std::sync::Arc;

use loam::buffer::BufferPoolManager;
use loam::index::{BPlusTree, GenericComparator, GenericKey};
use loam::storage::disk::DiskManager;
use loam::{PageId, RecordId, SlotId};

type Key = GenericKey<8>;

fn main() {
    env_logger::init();

    println!("Loam - a disk-oriented storage engine core");
    println!("==========================================\n");

    let db_path = "demo.db";
    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to open database file"));
    let bpm = Arc::new(BufferPoolManager::new(64, disk_manager));
    println!("Opened {} with a 64-frame buffer pool", db_path);

    let tree = BPlusTree::new("demo_index", Arc::clone(&bpm), GenericComparator::<8>, 16, 16);

    for v in [42i64, 7, 19, 3, 88, 55, 21, 64, 11, 30] {
        let value = RecordId::new(PageId::new(v as i32), SlotId::new(0));
        tree.insert(&Key::from_integer(v), value)
            .expect("insert failed");
    }
    println!("Inserted 10 keys; root page is {}", tree.root_page_id());

    let probe = Key::from_integer(19);
    match tree.get_value(&probe).expect("lookup failed") {
        Some(value) => println!("get_value(19) -> {}", value),
        None => println!("get_value(19) -> not found"),
    }

    print!("Forward scan:");
    let mut iter = tree.begin().expect("begin failed");
    while let Some((key, _value)) = iter.next().expect("scan failed") {
        print!(" {}", key.to_integer());
    }
    println!();

    tree.remove(&Key::from_integer(42)).expect("remove failed");
    println!(
        "Removed 42; get_value(42) -> {:?}",
        tree.get_value(&Key::from_integer(42)).expect("lookup failed")
    );

    bpm.flush_all_pages().expect("flush failed");
    println!("\nFlushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("Demo completed");
}
