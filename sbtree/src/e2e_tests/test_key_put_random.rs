//! Test inserting keys in random order, reading each back immediately.

use std::collections::BTreeMap;

use crate::e2e_tests::helpers::*;
use crate::storage::btree::RecordId;

fn put_and_read_back(tree: &MemoryTree, keys: &[i64]) -> BTreeMap<i64, RecordId> {
    let mut reference = BTreeMap::new();
    for &key in keys {
        assert_eq!(tree.put(key, rid(key)).expect("put"), None, "key {key}");
        assert_eq!(tree.get(&key).expect("get"), Some(rid(key)), "key {key}");
        reference.insert(key, rid(key));
    }
    reference
}

#[test]
fn test_uniform_random_puts() {
    let (_store, tree) = memory_tree("uniform");
    let keys = uniform_keys(0x5EED, 10_000, i64::from(i32::MAX));

    let reference = put_and_read_back(&tree, &keys);
    assert_matches(&tree, &reference);
}

#[test]
fn test_gaussian_random_puts() {
    let (_store, tree) = memory_tree("gaussian");
    // Clustered keys split the same few leaves over and over.
    let keys = gaussian_keys(0xBEEF, 10_000, 1_000_000.0, 50_000.0);

    let reference = put_and_read_back(&tree, &keys);
    assert_matches(&tree, &reference);
}

#[test]
fn test_random_puts_with_duplicates() {
    let (_store, tree) = memory_tree("duplicates");
    let keys = uniform_keys(7, 2_000, 1_000_000);

    let mut reference = put_and_read_back(&tree, &keys);
    // A second pass over a prefix replaces values without adding entries.
    for &key in &keys[..500] {
        let value = rid(key + 1);
        assert_eq!(tree.put(key, value).expect("put"), Some(rid(key)));
        reference.insert(key, value);
    }
    assert_matches(&tree, &reference);
}
