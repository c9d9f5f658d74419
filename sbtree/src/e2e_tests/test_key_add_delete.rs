//! Test interleaving removals of old keys with insertions of new ones.

use std::collections::BTreeMap;

use crate::e2e_tests::helpers::*;

#[test]
fn test_interleaved_add_and_delete() {
    let (_store, tree) = memory_tree("add_delete");

    let mut reference = BTreeMap::new();
    for key in 0..KEY_COUNT {
        tree.put(key, rid(key)).expect("put");
        assert_eq!(tree.get(&key).expect("get"), Some(rid(key)));
        reference.insert(key, rid(key));
    }

    for i in 0..KEY_COUNT {
        if i % 3 == 0 {
            assert_eq!(tree.remove(&i).expect("remove"), Some(rid(i)), "key {i}");
            reference.remove(&i);
        }
        if i % 2 == 0 {
            let added = KEY_COUNT + i;
            assert_eq!(tree.put(added, rid(added)).expect("put"), None);
            reference.insert(added, rid(added));
        }
    }

    for i in 0..KEY_COUNT {
        let expected = (i % 3 != 0).then(|| rid(i));
        assert_eq!(tree.get(&i).expect("get"), expected, "key {i}");
        if i % 2 == 0 {
            let added = KEY_COUNT + i;
            assert_eq!(tree.get(&added).expect("get"), Some(rid(added)), "key {added}");
        }
    }
    assert_matches(&tree, &reference);
}

#[test]
fn test_reinsert_after_remove() {
    let (_store, tree) = memory_tree("reinsert");
    let mut reference = populate(&tree, 0..3_000);

    // Churn one region repeatedly so the same leaves merge and split again.
    for round in 0..5 {
        for key in 1_000..2_000 {
            assert!(tree.remove(&key).expect("remove").is_some(), "round {round} key {key}");
        }
        assert_eq!(tree.get(&1_500).expect("get"), None);
        for key in 1_000..2_000 {
            let value = rid(key + round);
            assert_eq!(tree.put(key, value).expect("put"), None);
            reference.insert(key, value);
        }
    }
    assert_matches(&tree, &reference);
}
