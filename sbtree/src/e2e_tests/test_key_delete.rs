//! Test removing a regular subset of keys from a populated tree.

use crate::e2e_tests::helpers::*;
use crate::storage::PageStore;

#[test]
fn test_remove_every_third_key() {
    let (_store, tree) = memory_tree("every_third");
    let mut reference = populate(&tree, 0..KEY_COUNT);

    for key in (0..KEY_COUNT).filter(|key| key % 3 == 0) {
        assert_eq!(tree.remove(&key).expect("remove"), Some(rid(key)), "key {key}");
        reference.remove(&key);
    }

    for key in 0..KEY_COUNT {
        let expected = (key % 3 != 0).then(|| rid(key));
        assert_eq!(tree.get(&key).expect("get"), expected, "key {key}");
    }
    assert_matches(&tree, &reference);
}

#[test]
fn test_remove_everything_shrinks_tree() {
    let (store, tree) = memory_tree("drain");
    let in_use_when_empty = store.total_pages() - store.free_pages();
    populate(&tree, 0..2_000);
    assert!(tree.height().expect("height") > 1);

    // Remove from both ends toward the middle so borrows and merges happen on
    // both sides of each node.
    let mut low = 0;
    let mut high = 1_999;
    while low <= high {
        assert_eq!(tree.remove(&low).expect("remove low"), Some(rid(low)));
        if low != high {
            assert_eq!(tree.remove(&high).expect("remove high"), Some(rid(high)));
        }
        low += 1;
        high -= 1;
    }

    assert_eq!(tree.size(), 0);
    assert_eq!(tree.height().expect("height"), 1);
    assert_eq!(tree.first_key().expect("first"), None);
    assert_eq!(tree.check_structure().expect("structure"), 0);
    assert_eq!(store.total_pages() - store.free_pages(), in_use_when_empty);
}

#[test]
fn test_remove_absent_keys() {
    let (_store, tree) = memory_tree("absent");
    let reference = populate(&tree, (0..1_000).map(|key| key * 2));

    for key in (0..1_000).map(|key| key * 2 + 1) {
        assert_eq!(tree.remove(&key).expect("remove"), None);
    }
    assert_eq!(tree.remove(&-1).expect("remove"), None);
    assert_eq!(tree.remove(&10_000).expect("remove"), None);
    assert_matches(&tree, &reference);
}
