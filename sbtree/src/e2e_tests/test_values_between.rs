//! Test `values_between` against an ordered reference.

use std::collections::BTreeMap;
use std::ops::Bound;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::e2e_tests::helpers::*;
use crate::storage::btree::RecordId;

// BTreeMap::range panics on inverted or empty-exclusive bounds, so the upper
// bound is applied with take_while instead.
fn expected_between(
    reference: &BTreeMap<i64, RecordId>,
    from: i64,
    from_inclusive: bool,
    to: i64,
    to_inclusive: bool,
    max_count: usize,
) -> Vec<RecordId> {
    reference
        .range((bound(from, from_inclusive), Bound::Unbounded))
        .take_while(|(key, _)| if to_inclusive { **key <= to } else { **key < to })
        .take(max_count)
        .map(|(_, value)| *value)
        .collect()
}

fn assert_between_values(
    tree: &MemoryTree,
    reference: &BTreeMap<i64, RecordId>,
    rng: &mut StdRng,
    from_inclusive: bool,
    to_inclusive: bool,
) {
    let last = *reference.keys().next_back().expect("populated");
    for _ in 0..QUERIES {
        let from = rng.random_range(0..last + 5_000);
        let from = snap_to_key(rng, reference, from);

        let to = from.saturating_add(rng.random_range(1..i64::from(i32::MAX)));
        let mut to = snap_to_key(rng, reference, to);
        if from > to {
            to = from;
        }

        let values = tree
            .values_between(&from, from_inclusive, &to, to_inclusive, MAX_FETCH)
            .expect("values_between");
        assert_eq!(
            values,
            expected_between(reference, from, from_inclusive, to, to_inclusive, MAX_FETCH),
            "from {from} ({from_inclusive}) to {to} ({to_inclusive})"
        );
    }
}

#[test]
fn test_values_between_all_bound_combinations() {
    let (tree, reference) = range_tree("between", 31);
    let mut rng = StdRng::seed_from_u64(32);

    for (from_inclusive, to_inclusive) in [(true, true), (true, false), (false, true), (false, false)] {
        assert_between_values(&tree, &reference, &mut rng, from_inclusive, to_inclusive);
    }
}

#[test]
fn test_values_between_narrow_ranges() {
    let (tree, reference) = range_tree("between_narrow", 33);
    let keys: Vec<i64> = reference.keys().copied().collect();
    let (a, b) = (keys[100], keys[101]);

    assert_eq!(tree.values_between(&a, true, &a, true, 10).expect("between"), vec![rid(a)]);
    assert!(tree.values_between(&a, false, &a, true, 10).expect("between").is_empty());
    assert!(tree.values_between(&a, true, &a, false, 10).expect("between").is_empty());
    assert!(tree.values_between(&a, false, &b, false, 10).expect("between").is_empty());
    assert_eq!(
        tree.values_between(&a, true, &b, true, 10).expect("between"),
        vec![rid(a), rid(b)]
    );

    // A gap between two adjacent stored keys holds nothing.
    if b - a > 2 {
        assert!(tree.values_between(&(a + 1), true, &(b - 1), true, 10).expect("between").is_empty());
    }
}

#[test]
fn test_values_between_inverted_range_is_empty() {
    let (tree, reference) = range_tree("between_inverted", 37);
    let keys: Vec<i64> = reference.keys().copied().collect();
    let (low, high) = (keys[10], keys[9_000]);

    for (from_inclusive, to_inclusive) in [(true, true), (true, false), (false, true), (false, false)] {
        assert!(
            tree.values_between(&high, from_inclusive, &low, to_inclusive, MAX_FETCH)
                .expect("between")
                .is_empty()
        );
    }
}

#[test]
fn test_values_between_cap_is_a_prefix() {
    let (tree, reference) = range_tree("between_cap", 39);
    let keys: Vec<i64> = reference.keys().copied().collect();
    let (from, to) = (keys[1_000], keys[8_000]);

    let capped = tree.values_between(&from, true, &to, true, 250).expect("between");
    let expected: Vec<RecordId> = keys[1_000..1_250].iter().map(|key| rid(*key)).collect();
    assert_eq!(capped, expected);

    let whole = tree.values_between(&from, true, &to, true, usize::MAX).expect("between");
    assert_eq!(whole.len(), 7_001);
}
