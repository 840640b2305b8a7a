use std::sync::Arc;

use hivedb::buffer::BufferPoolManager;
use hivedb::common::{DEFAULT_BUFFER_POOL_SIZE, DEFAULT_LRUK_K};
use hivedb::index::BPlusTree;
use hivedb::storage::disk::FileDiskManager;

fn main() -> hivedb::Result<()> {
    println!("HiveDB - a page-based storage engine in Rust");
    println!("============================================\n");

    let db_path = std::env::temp_dir().join(format!("hivedb-demo-{}.db", std::process::id()));

    let disk_manager = FileDiskManager::new(&db_path)?;
    println!("Created disk manager for: {}", db_path.display());

    let bpm = Arc::new(BufferPoolManager::new(
        DEFAULT_BUFFER_POOL_SIZE,
        DEFAULT_LRUK_K,
        disk_manager,
    ));
    println!(
        "Created buffer pool manager with {} frames\n",
        bpm.pool_size()
    );

    // Small nodes so a handful of keys already builds a few levels
    let mut tree = BPlusTree::<i64, i64>::with_max_sizes(Arc::clone(&bpm), 4, 4)?;

    let keys = [42, 7, 19, 3, 88, 61, 25, 11, 70, 34, 56, 1];
    for &key in &keys {
        tree.insert(key, key * 100)?;
    }
    println!(
        "Inserted {} keys, root is page {}",
        keys.len(),
        tree.root_page_id().as_i64()
    );

    println!("\nLookups:");
    for key in [19, 20, 88] {
        match tree.find(&key)? {
            Some(value) => println!("  - {} => {}", key, value),
            None => println!("  - {} not found", key),
        }
    }

    println!("\nRange 10..=60:");
    for (key, value) in tree.range_scan(&10, &60)? {
        println!("  - {} => {}", key, value);
    }

    println!("\nTree contents:");
    print!("{}", tree.dump_contents()?);

    // Release the file before removing it
    drop(tree);
    drop(bpm);
    std::fs::remove_file(&db_path).ok();
    println!("\nDemo completed successfully!");

    Ok(())
}
