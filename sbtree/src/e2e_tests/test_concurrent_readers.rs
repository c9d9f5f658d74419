//! Test scans and lookups running while a writer reshapes the tree.
//!
//! Even keys are inserted up front and never touched again. The writer
//! repeatedly inserts and removes every odd key, which splits and merges the
//! leaves the readers are walking. Readers must always see every even key,
//! in strict order, with no duplicates.

use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::e2e_tests::helpers::*;
use crate::storage::btree::Direction;

const STABLE_KEYS: i64 = 3_000;
const WRITER_ROUNDS: usize = 3;

fn odd_keys() -> impl Iterator<Item = i64> {
    (0..STABLE_KEYS).map(|k| k * 2 + 1)
}

fn scan_and_check(tree: &MemoryTree, stable: &[i64], direction: Direction) {
    let entries: Vec<(i64, crate::storage::btree::RecordId)> = tree
        .range(Bound::Unbounded, Bound::Unbounded, direction)
        .collect::<Result<_, _>>()
        .expect("scan");

    for pair in entries.windows(2) {
        match direction {
            Direction::Ascending => assert!(pair[0].0 < pair[1].0, "out of order: {pair:?}"),
            Direction::Descending => assert!(pair[0].0 > pair[1].0, "out of order: {pair:?}"),
        }
    }
    for (key, value) in &entries {
        assert_eq!(*value, rid(*key));
    }

    let mut seen: Vec<i64> = entries
        .iter()
        .map(|(key, _)| *key)
        .filter(|key| key % 2 == 0)
        .collect();
    if direction == Direction::Descending {
        seen.reverse();
    }
    assert_eq!(seen, stable);
}

#[test]
fn test_scans_see_stable_keys_during_writes() {
    let (_store, tree) = memory_tree("concurrent");
    let stable: Vec<i64> = (0..STABLE_KEYS).map(|k| k * 2).collect();
    let reference = populate(&tree, stable.iter().copied());
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let tree = &tree;
        let stable = stable.as_slice();
        let done = &done;

        scope.spawn(move || {
            for round in 0..WRITER_ROUNDS {
                for key in odd_keys() {
                    assert_eq!(tree.put(key, rid(key)).expect("put"), None, "round {round}");
                }
                for key in odd_keys() {
                    assert_eq!(tree.remove(&key).expect("remove"), Some(rid(key)), "round {round}");
                }
            }
            done.store(true, Ordering::Release);
        });

        for direction in [Direction::Ascending, Direction::Descending, Direction::Ascending] {
            scope.spawn(move || {
                loop {
                    let finished = done.load(Ordering::Acquire);
                    scan_and_check(tree, stable, direction);
                    if finished {
                        break;
                    }
                }
            });
        }

        scope.spawn(move || {
            while !done.load(Ordering::Acquire) {
                for &key in stable.iter().step_by(97) {
                    assert_eq!(tree.get(&key).expect("get"), Some(rid(key)));
                }
            }
        });
    });

    assert_matches(&tree, &reference);
}

#[test]
fn test_bounded_scans_during_writes() {
    let (_store, tree) = memory_tree("concurrent_bounded");
    let stable: Vec<i64> = (0..STABLE_KEYS).map(|k| k * 2).collect();
    populate(&tree, stable.iter().copied());
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let tree = &tree;
        let done = &done;

        scope.spawn(move || {
            for key in odd_keys() {
                tree.put(key, rid(key)).expect("put");
            }
            for key in odd_keys() {
                tree.remove(&key).expect("remove");
            }
            done.store(true, Ordering::Release);
        });

        scope.spawn(move || {
            let expected: Vec<crate::storage::btree::RecordId> =
                (500..=1_500).map(|k| rid(k * 2)).collect();
            loop {
                let finished = done.load(Ordering::Acquire);
                let values = tree
                    .values_between(&1_000, true, &3_000, true, usize::MAX)
                    .expect("between");
                let even: Vec<_> = values
                    .into_iter()
                    .filter(|value| value.position % 2 == 0)
                    .collect();
                assert_eq!(even, expected);
                if finished {
                    break;
                }
            }
        });
    });

    assert_eq!(tree.size(), u64::try_from(STABLE_KEYS).expect("count"));
}
