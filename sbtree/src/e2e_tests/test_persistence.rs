//! Test that trees survive closing and reopening their store file.

use crate::config::TreeConfig;
use crate::e2e_tests::helpers::*;
use crate::storage::PageStore;
use crate::storage::btree::{LongCodec, SBTree, TreeError};

#[test]
#[allow(clippy::disallowed_methods)]
fn test_tree_reopens_with_contents() {
    let file = StoreFile::new();
    let mut reference = {
        let store = file.open();
        let tree: FileTree = SBTree::create(
            "persisted",
            LongCodec,
            std::sync::Arc::clone(&store),
            &TreeConfig::default().with_fan_out(FAN_OUT),
        )
        .expect("create");
        let reference = populate(&tree, uniform_keys(41, 3_000, 1_000_000));
        store.sync().expect("sync");
        reference
    };

    let store = file.open();
    let tree = FileTree::open("persisted", LongCodec, store).expect("open");
    assert_eq!(tree.fan_out(), (FAN_OUT, FAN_OUT));
    assert_matches(&tree, &reference);

    // Keep working on the reopened tree.
    let removed: Vec<i64> = reference.keys().copied().step_by(2).collect();
    for key in &removed {
        assert_eq!(tree.remove(key).expect("remove"), Some(rid(*key)));
        reference.remove(key);
    }
    assert_matches(&tree, &reference);
}

#[test]
#[allow(clippy::disallowed_methods)]
fn test_several_trees_in_one_file() {
    let file = StoreFile::new();
    {
        let store = file.open();
        for (name, offset) in [("first", 0), ("second", 100_000), ("third", 200_000)] {
            let tree: FileTree = SBTree::create(
                name,
                LongCodec,
                std::sync::Arc::clone(&store),
                &TreeConfig::default().with_fan_out(FAN_OUT),
            )
            .expect("create");
            populate(&tree, offset..offset + 1_000);
        }
        store.sync().expect("sync");
    }

    let store = file.open();
    let names: Vec<String> = store
        .superblock()
        .catalog
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    assert_eq!(names.len(), 3);
    for name in ["first", "second", "third"] {
        assert!(names.iter().any(|stored| stored == name), "{name} missing");
    }

    let second = FileTree::open("second", LongCodec, std::sync::Arc::clone(&store)).expect("open");
    assert_eq!(second.size(), 1_000);
    assert_eq!(second.first_key().expect("first"), Some(100_000));
    assert_eq!(second.last_key().expect("last"), Some(100_999));

    let err = FileTree::open("fourth", LongCodec, store).expect_err("missing tree");
    assert!(matches!(err, TreeError::TreeNotFound(name) if name == "fourth"));
}

#[test]
#[allow(clippy::disallowed_methods)]
fn test_freed_pages_are_reused_after_reopen() {
    let file = StoreFile::new();
    let pages_after_first_fill = {
        let store = file.open();
        let tree: FileTree = SBTree::create(
            "reuse",
            LongCodec,
            std::sync::Arc::clone(&store),
            &TreeConfig::default().with_fan_out(FAN_OUT),
        )
        .expect("create");
        populate(&tree, 0..2_000);
        let pages = store.total_pages();
        tree.delete().expect("delete");
        store.sync().expect("sync");
        pages
    };

    let store = file.open();
    assert!(store.free_pages() > 0);
    let tree: FileTree = SBTree::create(
        "reuse",
        LongCodec,
        std::sync::Arc::clone(&store),
        &TreeConfig::default().with_fan_out(FAN_OUT),
    )
    .expect("create again");
    let reference = populate(&tree, 0..2_000);
    assert_eq!(store.total_pages(), pages_after_first_fill);
    assert_matches(&tree, &reference);
}
