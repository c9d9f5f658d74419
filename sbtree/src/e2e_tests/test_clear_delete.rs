//! Test clearing and deleting populated trees.

use std::sync::Arc;

use crate::config::TreeConfig;
use crate::e2e_tests::helpers::*;
use crate::storage::PageStore;
use crate::storage::btree::{LongCodec, SBTree, TreeError};

#[test]
fn test_clear_empties_a_deep_tree() {
    let (store, mut tree) = memory_tree("clear");
    let in_use_when_empty = store.total_pages() - store.free_pages();
    populate(&tree, 0..KEY_COUNT);
    assert!(tree.height().expect("height") > 2);

    tree.clear().expect("clear");
    assert_eq!(tree.size(), 0);
    assert_eq!(tree.height().expect("height"), 1);
    assert_eq!(tree.get(&0).expect("get"), None);
    assert!(tree.values_major(&0, true, 10).expect("major").is_empty());
    assert_eq!(store.total_pages() - store.free_pages(), in_use_when_empty);

    // The cleared tree is immediately usable again.
    let reference = populate(&tree, (0..1_000).rev());
    assert_matches(&tree, &reference);
}

#[test]
#[allow(clippy::disallowed_methods)]
fn test_clear_is_persisted() {
    let (store, mut tree) = memory_tree("clear_persisted");
    populate(&tree, 0..1_000);
    tree.clear().expect("clear");
    drop(tree);

    let reopened = MemoryTree::open("clear_persisted", LongCodec, Arc::clone(&store)).expect("open");
    assert_eq!(reopened.size(), 0);
    assert_eq!(reopened.first_key().expect("first"), None);
}

#[test]
#[allow(clippy::disallowed_methods)]
fn test_delete_frees_every_page() {
    let (store, tree) = memory_tree("delete");
    let before_create = 1;
    populate(&tree, 0..KEY_COUNT);

    tree.delete().expect("delete");
    assert_eq!(store.total_pages() - store.free_pages(), before_create);

    let err = MemoryTree::open("delete", LongCodec, Arc::clone(&store)).expect_err("deleted");
    assert!(matches!(err, TreeError::TreeNotFound(_)));

    // The name can be taken again, on recycled pages.
    let total = store.total_pages();
    let tree: MemoryTree = SBTree::create(
        "delete",
        LongCodec,
        Arc::clone(&store),
        &TreeConfig::default().with_fan_out(FAN_OUT),
    )
    .expect("recreate");
    assert_eq!(tree.size(), 0);
    assert_eq!(store.total_pages(), total);
}

#[test]
#[allow(clippy::disallowed_methods)]
fn test_delete_leaves_other_trees_intact() {
    let (store, doomed) = memory_tree("doomed");
    let survivor: MemoryTree = SBTree::create(
        "survivor",
        LongCodec,
        Arc::clone(&store),
        &TreeConfig::default().with_fan_out(FAN_OUT),
    )
    .expect("create survivor");

    // Interleave the puts so both trees' pages are mixed through the store.
    let mut reference = std::collections::BTreeMap::new();
    for key in 0..3_000 {
        doomed.put(key, rid(key)).expect("put doomed");
        survivor.put(-key, rid(key)).expect("put survivor");
        reference.insert(-key, rid(key));
    }

    doomed.delete().expect("delete");
    assert_matches(&survivor, &reference);

    let err = MemoryTree::create(
        "survivor",
        LongCodec,
        Arc::clone(&store),
        &TreeConfig::default(),
    )
    .expect_err("duplicate");
    assert!(matches!(err, TreeError::AlreadyExists(name) if name == "survivor"));
}
