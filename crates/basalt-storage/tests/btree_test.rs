//! Storage-core integration tests.
//!
//! End-to-end scenarios across the disk manager, buffer pool, header page,
//! and B+Tree index: split propagation, borrow/merge rebalancing, iterator
//! behavior, eviction pressure, reopen-from-header persistence, and a
//! concurrent mixed workload.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::tempdir;

use basalt_buffer::{BufferPoolConfig, BufferPoolManager, FileDiskManager};
use basalt_storage::{BPlusTree, Rid};

fn make_bpm(dir: &tempfile::TempDir, pool_size: usize) -> Arc<BufferPoolManager> {
    let disk = Arc::new(FileDiskManager::new(dir.path().join("basalt.db"), false).unwrap());
    Arc::new(BufferPoolManager::new(
        BufferPoolConfig {
            pool_size,
            replacer_k: 2,
        },
        disk,
    ))
}

fn make_tree(
    dir: &tempfile::TempDir,
    pool_size: usize,
    leaf_max: u32,
    internal_max: u32,
) -> BPlusTree<i64, Rid> {
    BPlusTree::new("primary", make_bpm(dir, pool_size), leaf_max, internal_max).unwrap()
}

fn rid(key: i64) -> Rid {
    Rid::from_key(key)
}

#[test]
fn test_ascending_insert_and_scan() {
    let dir = tempdir().unwrap();
    let tree = make_tree(&dir, 32, 4, 4);

    for key in 1..=10 {
        assert!(tree.insert(key, rid(key)).unwrap());
    }

    let keys: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (1..=10).collect::<Vec<_>>());
    assert!(tree.height().unwrap() <= 3);

    for key in 1..=10 {
        assert_eq!(tree.get_value(&key).unwrap(), Some(rid(key)));
    }
    assert_eq!(tree.get_value(&0).unwrap(), None);
    assert_eq!(tree.get_value(&11).unwrap(), None);
    tree.verify_integrity().unwrap();
}

#[test]
fn test_descending_insert() {
    let dir = tempdir().unwrap();
    let tree = make_tree(&dir, 32, 4, 4);

    for key in (1..=50).rev() {
        assert!(tree.insert(key, rid(key)).unwrap());
    }

    let keys: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (1..=50).collect::<Vec<_>>());
    tree.verify_integrity().unwrap();
}

#[test]
fn test_shuffled_insert_and_lookup() {
    let dir = tempdir().unwrap();
    let tree = make_tree(&dir, 64, 4, 4);

    let mut keys: Vec<i64> = (1..=500).collect();
    let mut rng = StdRng::seed_from_u64(42);
    keys.shuffle(&mut rng);

    for &key in &keys {
        assert!(tree.insert(key, rid(key)).unwrap());
    }
    tree.verify_integrity().unwrap();

    for key in 1..=500 {
        assert_eq!(tree.get_value(&key).unwrap(), Some(rid(key)));
    }
    let scanned: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (1..=500).collect::<Vec<_>>());
}

#[test]
fn test_delete_with_borrow_and_merge() {
    let dir = tempdir().unwrap();
    let tree = make_tree(&dir, 32, 4, 4);

    for key in 1..=8 {
        tree.insert(key, rid(key)).unwrap();
    }
    tree.verify_integrity().unwrap();

    // Shrink from the right; every intermediate state keeps the size
    // invariants.
    for key in [8i64, 7, 6, 5] {
        assert!(tree.remove(&key).unwrap());
        tree.verify_integrity().unwrap();
    }

    for key in 1..=4 {
        assert_eq!(tree.get_value(&key).unwrap(), Some(rid(key)));
    }
    for key in 5..=8 {
        assert_eq!(tree.get_value(&key).unwrap(), None);
    }
    let keys: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![1, 2, 3, 4]);
}

#[test]
fn test_drain_completely_in_random_order() {
    let dir = tempdir().unwrap();
    let tree = make_tree(&dir, 64, 4, 4);

    let mut keys: Vec<i64> = (1..=200).collect();
    let mut rng = StdRng::seed_from_u64(7);
    keys.shuffle(&mut rng);
    for &key in &keys {
        tree.insert(key, rid(key)).unwrap();
    }

    keys.shuffle(&mut rng);
    for (i, &key) in keys.iter().enumerate() {
        assert!(tree.remove(&key).unwrap(), "key {key} missing");
        if i % 25 == 0 {
            tree.verify_integrity().unwrap();
        }
    }

    assert_eq!(tree.iter().unwrap().count(), 0);
    for key in 1..=200 {
        assert_eq!(tree.get_value(&key).unwrap(), None);
    }
    tree.verify_integrity().unwrap();
}

#[test]
fn test_mixed_workload_against_model() {
    let dir = tempdir().unwrap();
    let tree = make_tree(&dir, 64, 4, 5);

    let mut model: BTreeMap<i64, Rid> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(1234);

    for round in 0..2000 {
        let key = rng.gen_range(0..300);
        if rng.gen_bool(0.6) {
            let inserted = tree.insert(key, rid(key)).unwrap();
            assert_eq!(inserted, !model.contains_key(&key), "insert of {key}");
            model.entry(key).or_insert_with(|| rid(key));
        } else {
            let removed = tree.remove(&key).unwrap();
            assert_eq!(removed, model.remove(&key).is_some(), "remove of {key}");
        }
        if round % 250 == 0 {
            tree.verify_integrity().unwrap();
        }
    }

    tree.verify_integrity().unwrap();
    let scanned: Vec<(i64, Rid)> = tree.iter().unwrap().collect();
    let expected: Vec<(i64, Rid)> = model.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(scanned, expected);
}

#[test]
fn test_iter_from_positions_correctly() {
    let dir = tempdir().unwrap();
    let tree = make_tree(&dir, 32, 4, 4);

    for key in (2..=40).step_by(2) {
        tree.insert(key, rid(key)).unwrap();
    }

    // Present key: the scan starts exactly there.
    let keys: Vec<i64> = tree.iter_from(&20).unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (20..=40).step_by(2).collect::<Vec<_>>());

    // Absent key: the scan starts at the next larger key.
    let keys: Vec<i64> = tree.iter_from(&21).unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (22..=40).step_by(2).collect::<Vec<_>>());

    // Before the smallest key: the scan covers everything.
    let keys: Vec<i64> = tree.iter_from(&0).unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (2..=40).step_by(2).collect::<Vec<_>>());

    // Past the largest key: the scan is empty.
    assert_eq!(tree.iter_from(&41).unwrap().count(), 0);
}

#[test]
fn test_small_pool_forces_eviction_through_index() {
    let dir = tempdir().unwrap();
    // Sixteen frames for a tree that needs ten times as many pages.
    let tree = make_tree(&dir, 16, 4, 4);

    for key in 1..=300 {
        assert!(tree.insert(key, rid(key)).unwrap());
    }
    for key in 1..=300 {
        assert_eq!(tree.get_value(&key).unwrap(), Some(rid(key)));
    }
    let scanned: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (1..=300).collect::<Vec<_>>());
    tree.verify_integrity().unwrap();
}

#[test]
fn test_reopen_from_header_page() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("basalt.db");

    {
        let disk = Arc::new(FileDiskManager::new(&path, true).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(
            BufferPoolConfig {
                pool_size: 32,
                replacer_k: 2,
            },
            disk,
        ));
        let tree: BPlusTree<i64, Rid> = BPlusTree::new("primary", Arc::clone(&bpm), 4, 4).unwrap();
        for key in 1..=64 {
            tree.insert(key, rid(key)).unwrap();
        }
        bpm.flush_all_pages().unwrap();
    }

    {
        let disk = Arc::new(FileDiskManager::new(&path, true).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(
            BufferPoolConfig {
                pool_size: 32,
                replacer_k: 2,
            },
            disk,
        ));
        let tree: BPlusTree<i64, Rid> =
            BPlusTree::open("primary", Arc::clone(&bpm), 4, 4).unwrap();
        assert!(!tree.is_empty());
        for key in 1..=64 {
            assert_eq!(tree.get_value(&key).unwrap(), Some(rid(key)));
        }
        tree.verify_integrity().unwrap();

        // An index the header never recorded opens empty.
        let other: BPlusTree<i64, Rid> = BPlusTree::open("secondary", bpm, 4, 4).unwrap();
        assert!(other.is_empty());
    }
}

#[test]
fn test_two_indexes_share_header_page() {
    let dir = tempdir().unwrap();
    let bpm = make_bpm(&dir, 32);

    let orders: BPlusTree<i64, Rid> =
        BPlusTree::new("orders_pk", Arc::clone(&bpm), 4, 4).unwrap();
    let users: BPlusTree<i64, Rid> = BPlusTree::new("users_pk", Arc::clone(&bpm), 4, 4).unwrap();

    for key in 1..=20 {
        orders.insert(key, rid(key)).unwrap();
        users.insert(key * 100, rid(key * 100)).unwrap();
    }

    assert_ne!(orders.root_page_id(), users.root_page_id());
    for key in 1..=20 {
        assert_eq!(orders.get_value(&key).unwrap(), Some(rid(key)));
        assert_eq!(users.get_value(&(key * 100)).unwrap(), Some(rid(key * 100)));
        assert_eq!(orders.get_value(&(key * 100)).unwrap(), None);
    }
    orders.verify_integrity().unwrap();
    users.verify_integrity().unwrap();
}

#[test]
fn test_concurrent_disjoint_inserts_and_lookups() {
    let dir = tempdir().unwrap();
    let tree = Arc::new(make_tree(&dir, 64, 4, 4));

    let threads = 4;
    let per_thread = 200i64;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || {
                let base = t as i64 * per_thread;
                for key in base..base + per_thread {
                    assert!(tree.insert(key, rid(key)).unwrap());
                    // Interleave lookups of keys this thread already wrote.
                    if key % 7 == 0 {
                        assert_eq!(tree.get_value(&key).unwrap(), Some(rid(key)));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for key in 0..threads as i64 * per_thread {
        assert_eq!(tree.get_value(&key).unwrap(), Some(rid(key)));
    }
    let scanned: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (0..threads as i64 * per_thread).collect::<Vec<_>>());
    tree.verify_integrity().unwrap();
}

#[test]
fn test_concurrent_mixed_inserts_and_removes() {
    let dir = tempdir().unwrap();
    let tree = Arc::new(make_tree(&dir, 64, 4, 4));

    // Pre-load even keys, then concurrently remove them while inserting odd
    // keys, each thread on its own range.
    for key in (0..800i64).step_by(2) {
        tree.insert(key, rid(key)).unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || {
                let base = t as i64 * 200;
                for offset in (0..200i64).step_by(2) {
                    assert!(tree.remove(&(base + offset)).unwrap());
                    assert!(tree.insert(base + offset + 1, rid(base + offset + 1)).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let scanned: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(scanned, (0..800i64).filter(|k| k % 2 == 1).collect::<Vec<_>>());
    tree.verify_integrity().unwrap();
}
