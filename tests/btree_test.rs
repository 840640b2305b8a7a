//! Integration tests for the B+Tree index

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use hivedb::buffer::BufferPoolManager;
use hivedb::common::{HiveError, PageId};
use hivedb::index::{BPlusTree, BTreeNode};
use hivedb::storage::disk::{FileDiskManager, MemoryDiskManager};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> Arc<BufferPoolManager> {
    Arc::new(BufferPoolManager::new(pool_size, 2, MemoryDiskManager::new()))
}

fn shuffled_keys(n: i64, seed: u64) -> Vec<i64> {
    let mut keys: Vec<i64> = (0..n).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(seed));
    keys
}

/// What a structural walk of the tree found.
#[derive(Default)]
struct TreeShape {
    nodes: usize,
    leaf_depth: Option<usize>,
    leftmost_leaf: Option<PageId>,
    keys: Vec<i64>,
}

/// Checks every node under `page_id` against the tree invariants: sizes stay
/// below the maximum, keys are sorted, each child only holds keys within the
/// bounds its parent promises, and all leaves sit at the same depth.
fn check_subtree(
    bpm: &BufferPoolManager,
    page_id: PageId,
    lower: Option<i64>,
    upper: Option<i64>,
    depth: usize,
    shape: &mut TreeShape,
) {
    shape.nodes += 1;

    let guard = bpm.fetch_page_read(page_id).unwrap();
    match BTreeNode::<_, i64, i64>::decode(guard.data()).unwrap() {
        BTreeNode::Leaf(leaf) => {
            assert!(leaf.size() > 0, "empty leaf {}", page_id);
            assert!(leaf.size() < leaf.max_size(), "full leaf {}", page_id);

            let keys: Vec<i64> = leaf.entries().unwrap().into_iter().map(|(k, _)| k).collect();
            assert!(keys.windows(2).all(|w| w[0] < w[1]), "unsorted leaf {}", page_id);
            for &key in &keys {
                assert!(lower.map_or(true, |lo| key >= lo), "{} below bound", key);
                assert!(upper.map_or(true, |hi| key < hi), "{} above bound", key);
            }

            match shape.leaf_depth {
                None => shape.leaf_depth = Some(depth),
                Some(d) => assert_eq!(d, depth, "leaf {} at uneven depth", page_id),
            }
            shape.leftmost_leaf.get_or_insert(page_id);
            shape.keys.extend(keys);
        }
        BTreeNode::Inner(inner) => {
            assert!(inner.size() > 0, "inner node {} has no children", page_id);
            assert!(inner.size() < inner.max_size(), "full inner node {}", page_id);

            let (keys, children) = inner.entries().unwrap();
            assert!(keys.windows(2).all(|w| w[0] < w[1]), "unsorted inner {}", page_id);

            for (i, &child) in children.iter().enumerate() {
                let lo = if i == 0 { lower } else { Some(keys[i - 1]) };
                let hi = keys.get(i).copied().or(upper);
                check_subtree(bpm, child, lo, hi, depth + 1, shape);
            }
        }
    }
}

fn check_tree(tree: &BPlusTree<i64, i64>, bpm: &BufferPoolManager) -> TreeShape {
    let mut shape = TreeShape::default();
    check_subtree(bpm, tree.root_page_id(), None, None, 0, &mut shape);

    // The sibling chain visits the same keys as the top-down walk
    let mut chained = Vec::new();
    let mut page_id = shape.leftmost_leaf.unwrap();
    while page_id.is_valid() {
        let guard = bpm.fetch_page_read(page_id).unwrap();
        match BTreeNode::<_, i64, i64>::decode(guard.data()).unwrap() {
            BTreeNode::Leaf(leaf) => {
                chained.extend(leaf.entries().unwrap().into_iter().map(|(k, _)| k));
                page_id = leaf.next_page_id();
            }
            BTreeNode::Inner(_) => panic!("leaf chain reached inner node {}", page_id),
        }
    }
    assert_eq!(chained, shape.keys);

    shape
}

#[test]
fn test_btree_shuffled_round_trip() {
    for (n, seed) in [(50, 7), (300, 42)] {
        let bpm = create_bpm(64);
        let mut tree = BPlusTree::<i64, i64>::with_max_sizes(Arc::clone(&bpm), 4, 4).unwrap();

        let keys = shuffled_keys(n, seed);
        for &key in &keys {
            tree.insert(key, key * 3).unwrap();
        }

        for key in 0..n {
            assert_eq!(tree.find(&key).unwrap(), Some(key * 3), "missing key {}", key);
        }
        assert_eq!(tree.find(&n).unwrap(), None);
        assert_eq!(tree.find(&-1).unwrap(), None);

        let shape = check_tree(&tree, &bpm);
        assert_eq!(shape.keys, (0..n).collect::<Vec<_>>());
    }
}

#[test]
fn test_btree_smallest_fan_out_splits_inner_nodes() {
    let bpm = create_bpm(64);
    let mut tree = BPlusTree::<i64, i64>::with_max_sizes(Arc::clone(&bpm), 3, 3).unwrap();

    for key in shuffled_keys(200, 3) {
        tree.insert(key, -key).unwrap();
    }

    let shape = check_tree(&tree, &bpm);
    // Fan-out of at most two children forces several inner levels
    assert!(shape.leaf_depth.unwrap() >= 3);
    assert_eq!(shape.keys.len(), 200);

    for key in 0..200 {
        assert_eq!(tree.find(&key).unwrap(), Some(-key));
    }
}

#[test]
fn test_btree_full_pages() {
    let bpm = create_bpm(64);
    let mut tree = BPlusTree::<i64, i64>::new(Arc::clone(&bpm));

    // Enough keys to split page-sized leaves a few times
    let n = tree.leaf_max_size() as i64 * 4;
    for key in shuffled_keys(n, 11) {
        tree.insert(key, key).unwrap();
    }

    let shape = check_tree(&tree, &bpm);
    assert_eq!(shape.leaf_depth, Some(1));
    assert_eq!(shape.keys.len() as i64, n);
}

#[test]
fn test_btree_ascending_and_descending_inserts() {
    let bpm = create_bpm(64);
    let mut asc = BPlusTree::<i64, i64>::with_max_sizes(Arc::clone(&bpm), 5, 4).unwrap();
    let mut desc = BPlusTree::<i64, i64>::with_max_sizes(Arc::clone(&bpm), 4, 5).unwrap();

    for key in 0..150 {
        asc.insert(key, key).unwrap();
        desc.insert(149 - key, key).unwrap();
    }

    assert_eq!(check_tree(&asc, &bpm).keys.len(), 150);
    assert_eq!(check_tree(&desc, &bpm).keys.len(), 150);
    assert_eq!(desc.find(&0).unwrap(), Some(149));
}

#[test]
fn test_btree_iter_and_range_scan() {
    let bpm = create_bpm(64);
    let mut tree = BPlusTree::<i64, i64>::with_max_sizes(bpm, 4, 4).unwrap();

    for key in shuffled_keys(100, 5) {
        tree.insert(key * 10, key).unwrap();
    }

    let all: Vec<(i64, i64)> = tree.iter().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(all.len(), 100);
    assert!(all.iter().enumerate().all(|(i, &(k, v))| k == i as i64 * 10 && v == i as i64));

    let results = tree.range_scan(&200, &500).unwrap();
    assert_eq!(results.len(), 31);
    assert_eq!(results.first(), Some(&(200, 20)));
    assert_eq!(results.last(), Some(&(500, 50)));

    // Bounds that fall between keys
    let results = tree.range_scan(&15, &45).unwrap();
    assert_eq!(results, vec![(20, 2), (30, 3), (40, 4)]);

    assert!(tree.range_scan(&1000, &2000).unwrap().is_empty());
    assert!(tree.range_scan(&50, &10).unwrap().is_empty());
    assert_eq!(tree.range_scan(&-100, &5).unwrap(), vec![(0, 0)]);
}

#[test]
fn test_btree_upsert_keeps_single_entry() {
    let bpm = create_bpm(64);
    let mut tree = BPlusTree::<i64, i64>::with_max_sizes(Arc::clone(&bpm), 3, 3).unwrap();

    for key in 0..30 {
        tree.insert(key, 0).unwrap();
    }
    for key in (0..30).rev() {
        tree.insert(key, key + 100).unwrap();
    }

    let shape = check_tree(&tree, &bpm);
    assert_eq!(shape.keys, (0..30).collect::<Vec<_>>());
    for key in 0..30 {
        assert_eq!(tree.find(&key).unwrap(), Some(key + 100));
    }
}

#[test]
fn test_btree_remove_not_supported() {
    let mut tree = BPlusTree::<i64, i64>::new(create_bpm(8));

    tree.insert(1, 1).unwrap();
    let err = tree.remove(&1).unwrap_err();
    assert!(matches!(err, HiveError::NotImplemented(_)));
    // The failed removal leaves the entry in place
    assert_eq!(tree.find(&1).unwrap(), Some(1));
}

#[test]
fn test_btree_empty_tree_errors() {
    let tree = BPlusTree::<i64, i64>::new(create_bpm(8));

    assert!(matches!(tree.find(&0), Err(HiveError::InvalidArgument(_))));
    assert!(matches!(
        tree.dump_contents(),
        Err(HiveError::InvalidArgument(_))
    ));
    assert!(tree.iter().unwrap().next().is_none());
}

#[test]
fn test_btree_dump_contents_lists_every_node() {
    let bpm = create_bpm(64);
    let mut tree = BPlusTree::<i64, i64>::with_max_sizes(Arc::clone(&bpm), 3, 3).unwrap();

    for key in 0..20 {
        tree.insert(key, key).unwrap();
    }

    let shape = check_tree(&tree, &bpm);
    let dump = tree.dump_contents().unwrap();
    assert_eq!(dump.lines().count(), shape.nodes);

    let first = dump.lines().next().unwrap();
    assert!(first.starts_with(&format!("[level 0] page {}:", tree.root_page_id().as_i64())));
    let deepest = format!("[level {}]", shape.leaf_depth.unwrap());
    assert!(dump.lines().last().unwrap().starts_with(&deepest));
}

#[test]
fn test_btree_small_pool_on_file() {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = FileDiskManager::new(temp_file.path()).unwrap();
    let bpm = Arc::new(BufferPoolManager::new(32, 2, disk_manager));
    let mut tree = BPlusTree::<i64, i64>::with_max_sizes(Arc::clone(&bpm), 3, 3).unwrap();

    // Far more nodes than frames, so every lookup goes back to disk
    for key in shuffled_keys(150, 9) {
        tree.insert(key, key * 7).unwrap();
    }
    for key in 0..150 {
        assert_eq!(tree.find(&key).unwrap(), Some(key * 7));
    }

    let reopened = BPlusTree::<i64, i64>::open(tree.root_page_id(), Arc::clone(&bpm)).unwrap();
    assert_eq!(reopened.iter().unwrap().count(), 150);
    // No guard outlives the operation that took it
    assert_eq!(bpm.pin_count(tree.root_page_id()).unwrap_or(0), 0);
}

#[test]
fn test_btree_leaf_split_out_of_frames_leaves_tree_intact() {
    let bpm = create_bpm(3);
    let mut tree = BPlusTree::<i64, i64>::with_max_sizes(Arc::clone(&bpm), 3, 3).unwrap();
    tree.insert(1, 10).unwrap();
    tree.insert(2, 20).unwrap();
    let root = tree.root_page_id();

    // The leaf plus two new pages will not fit next to an outside pin
    let held = bpm.fetch_page_read(bpm.allocate_page()).unwrap();
    assert!(matches!(tree.insert(3, 30), Err(HiveError::OutOfMemory)));
    drop(held);

    assert_eq!(tree.root_page_id(), root);
    assert_eq!(tree.find(&3).unwrap(), None);
    assert_eq!(check_tree(&tree, &bpm).keys, vec![1, 2]);

    tree.insert(3, 30).unwrap();
    tree.insert(4, 40).unwrap();
    assert_ne!(tree.root_page_id(), root);
    assert_eq!(check_tree(&tree, &bpm).keys, vec![1, 2, 3, 4]);
    for key in 1..=4 {
        assert_eq!(tree.find(&key).unwrap(), Some(key * 10));
    }
}

#[test]
fn test_btree_inner_split_out_of_frames_leaves_tree_intact() {
    let bpm = create_bpm(5);
    let mut tree = BPlusTree::<i64, i64>::with_max_sizes(Arc::clone(&bpm), 3, 3).unwrap();
    for key in 1..=4 {
        tree.insert(key, -key).unwrap();
    }
    let root = tree.root_page_id();
    let before = tree.dump_contents().unwrap();

    // Inserting 5 splits a leaf and the root, and grows a new root
    let held = bpm.fetch_page_read(bpm.allocate_page()).unwrap();
    assert!(matches!(tree.insert(5, -5), Err(HiveError::OutOfMemory)));
    drop(held);

    assert_eq!(tree.root_page_id(), root);
    assert_eq!(tree.dump_contents().unwrap(), before);
    assert_eq!(tree.find(&5).unwrap(), None);

    tree.insert(5, -5).unwrap();
    let shape = check_tree(&tree, &bpm);
    assert_eq!(shape.leaf_depth, Some(2));
    assert_eq!(shape.keys, (1..=5).collect::<Vec<_>>());
}

#[test]
fn test_btree_concurrent_readers() {
    let bpm = create_bpm(64);
    let mut tree = BPlusTree::<i64, i64>::with_max_sizes(Arc::clone(&bpm), 8, 8).unwrap();

    for key in shuffled_keys(1000, 13) {
        tree.insert(key, key + 1).unwrap();
    }

    let tree = Arc::new(tree);
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for key in (t..1000).step_by(4) {
                    assert_eq!(tree.find(&key).unwrap(), Some(key + 1));
                }
                let scanned = tree.range_scan(&(t * 100), &(t * 100 + 99)).unwrap();
                assert_eq!(scanned.len(), 100);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_btree_other_key_types() {
    let bpm = create_bpm(32);
    let mut tree = BPlusTree::<u32, PageId>::with_max_sizes(bpm, 4, 4).unwrap();

    for key in [9u32, 2, 7, 4, 1, 8, 3] {
        tree.insert(key, PageId::new(key as i64 * 2)).unwrap();
    }

    assert_eq!(tree.find(&7).unwrap(), Some(PageId::new(14)));
    assert_eq!(tree.find(&5).unwrap(), None);
    let keys: Vec<u32> = tree.iter().unwrap().map(|entry| entry.unwrap().0).collect();
    assert_eq!(keys, vec![1, 2, 3, 4, 7, 8, 9]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_btree_matches_ordered_map(
        ops in proptest::collection::vec((-500i64..500, any::<i64>()), 1..300),
        leaf_max in 3usize..8,
        inner_max in 3usize..8,
    ) {
        let bpm = create_bpm(64);
        let mut tree = BPlusTree::<i64, i64>::with_max_sizes(Arc::clone(&bpm), leaf_max, inner_max).unwrap();
        let mut model = BTreeMap::new();

        for &(key, value) in &ops {
            tree.insert(key, value).unwrap();
            model.insert(key, value);
        }

        let entries: Vec<(i64, i64)> = tree.iter().unwrap().collect::<Result<_, _>>().unwrap();
        let expected: Vec<(i64, i64)> = model.iter().map(|(&k, &v)| (k, v)).collect();
        prop_assert_eq!(entries, expected);

        for (key, value) in &model {
            prop_assert_eq!(tree.find(key).unwrap(), Some(*value));
        }

        let shape = check_tree(&tree, &bpm);
        prop_assert_eq!(shape.keys.len(), model.len());
    }
}
