//! Test `values_major` against an ordered reference.

use std::collections::BTreeMap;
use std::ops::Bound;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::e2e_tests::helpers::*;
use crate::storage::btree::RecordId;

fn expected_major(
    reference: &BTreeMap<i64, RecordId>,
    from: i64,
    inclusive: bool,
    max_count: usize,
) -> Vec<RecordId> {
    reference
        .range((bound(from, inclusive), Bound::Unbounded))
        .take(max_count)
        .map(|(_, value)| *value)
        .collect()
}

fn assert_major_values(tree: &MemoryTree, reference: &BTreeMap<i64, RecordId>, rng: &mut StdRng, inclusive: bool) {
    let last = *reference.keys().next_back().expect("populated");
    for _ in 0..QUERIES {
        let from = rng.random_range(0..last + 5_000);
        let from = snap_to_key(rng, reference, from);
        let values = tree.values_major(&from, inclusive, MAX_FETCH).expect("values_major");
        assert_eq!(
            values,
            expected_major(reference, from, inclusive, MAX_FETCH),
            "from {from} inclusive {inclusive}"
        );
    }
}

#[test]
fn test_values_major_random_bounds() {
    let (tree, reference) = range_tree("major", 11);
    let mut rng = StdRng::seed_from_u64(12);

    assert_major_values(&tree, &reference, &mut rng, true);
    assert_major_values(&tree, &reference, &mut rng, false);
}

#[test]
fn test_values_major_edges() {
    let (tree, reference) = range_tree("major_edges", 13);
    let first = *reference.keys().next().expect("populated");
    let last = *reference.keys().next_back().expect("populated");

    // Inclusivity only matters when the bound is a stored key.
    assert_eq!(tree.values_major(&last, true, 10).expect("major"), vec![rid(last)]);
    assert!(tree.values_major(&last, false, 10).expect("major").is_empty());
    assert!(tree.values_major(&(last + 1), true, 10).expect("major").is_empty());

    let all = tree.values_major(&first, true, usize::MAX).expect("major");
    assert_eq!(all.len(), RANGE_KEYS);
    let below_all = tree.values_major(&i64::MIN, false, usize::MAX).expect("major");
    assert_eq!(below_all, all);

    assert_eq!(
        tree.values_major(&first, false, RANGE_KEYS).expect("major").len(),
        RANGE_KEYS - 1
    );
    assert!(tree.values_major(&first, true, 0).expect("major").is_empty());
}

#[test]
fn test_cursor_major_yields_keys_in_order() {
    let (tree, reference) = range_tree("major_cursor", 17);
    let from = *reference.keys().nth(RANGE_KEYS / 2).expect("middle key");

    let entries: Vec<(i64, RecordId)> = tree
        .cursor_major(from, false)
        .take(50)
        .collect::<Result<_, _>>()
        .expect("cursor");
    let expected: Vec<(i64, RecordId)> = reference
        .range((Bound::Excluded(from), Bound::Unbounded))
        .take(50)
        .map(|(k, v)| (*k, *v))
        .collect();
    assert_eq!(entries, expected);
}
