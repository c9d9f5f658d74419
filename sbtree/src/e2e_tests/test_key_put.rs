//! Test inserting a dense run of keys and reading them back.
//!
//! The scenarios run at reduced size: `KEY_COUNT` (10,000) keys on trees
//! capped at `FAN_OUT` (16) entries per node, which still builds a tree
//! several levels deep. The 500,000-key run on page-derived fan-out is kept
//! as an ignored test; run it with `cargo test -- --ignored`.

use std::sync::Arc;

use crate::config::TreeConfig;
use crate::e2e_tests::helpers::*;
use crate::storage::btree::{LongCodec, SBTree};

#[test]
fn test_sequential_puts_read_back() {
    let (_store, tree) = memory_tree("sequential");

    for key in 0..KEY_COUNT {
        assert_eq!(tree.put(key, rid(key)).expect("put"), None);
    }
    assert_eq!(tree.size(), u64::try_from(KEY_COUNT).expect("count"));
    assert!(tree.height().expect("height") >= 3);

    for key in 0..KEY_COUNT {
        assert_eq!(tree.get(&key).expect("get"), Some(rid(key)), "key {key}");
    }
    for key in KEY_COUNT..2 * KEY_COUNT {
        assert_eq!(tree.get(&key).expect("get"), None, "key {key}");
    }

    assert_eq!(tree.first_key().expect("first"), Some(0));
    assert_eq!(tree.last_key().expect("last"), Some(KEY_COUNT - 1));
    assert_eq!(
        tree.check_structure().expect("structure"),
        tree.size()
    );
}

#[test]
fn test_overwrite_returns_previous_value() {
    let (_store, tree) = memory_tree("overwrite");
    let reference = populate(&tree, 0..1_000);

    for key in (0..1_000).step_by(7) {
        let replaced = tree.put(key, rid(key + 1_000_000)).expect("put");
        assert_eq!(replaced, Some(rid(key)));
    }
    assert_eq!(tree.size(), 1_000);

    for key in (0..1_000).step_by(7) {
        assert_eq!(tree.get(&key).expect("get"), Some(rid(key + 1_000_000)));
        assert_eq!(tree.remove(&key).expect("remove"), Some(rid(key + 1_000_000)));
        assert_eq!(tree.remove(&key).expect("remove again"), None);
    }

    let expected = reference
        .into_iter()
        .filter(|(key, _)| key % 7 != 0)
        .collect();
    assert_matches(&tree, &expected);
}

#[test]
#[ignore = "full-size run: 500000 keys on page-derived fan-out"]
#[allow(clippy::disallowed_methods)]
fn test_sequential_puts_full_size() {
    const FULL: i64 = 500_000;
    let store = memory_store();
    let tree: MemoryTree = SBTree::create(
        "full",
        LongCodec,
        Arc::clone(&store),
        &TreeConfig::default(),
    )
    .expect("create");

    for key in 0..FULL {
        tree.put(key, rid(key)).expect("put");
    }
    for key in 0..FULL {
        assert_eq!(tree.get(&key).expect("get"), Some(rid(key)));
    }
    for key in FULL..2 * FULL {
        assert_eq!(tree.get(&key).expect("get"), None);
    }
}
