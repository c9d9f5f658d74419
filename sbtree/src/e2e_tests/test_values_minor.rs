//! Test `values_minor` against an ordered reference.

use std::collections::BTreeMap;
use std::ops::Bound;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::e2e_tests::helpers::*;
use crate::storage::btree::RecordId;

fn expected_minor(
    reference: &BTreeMap<i64, RecordId>,
    to: i64,
    inclusive: bool,
    max_count: usize,
) -> Vec<RecordId> {
    reference
        .range((Bound::Unbounded, bound(to, inclusive)))
        .rev()
        .take(max_count)
        .map(|(_, value)| *value)
        .collect()
}

fn assert_minor_values(tree: &MemoryTree, reference: &BTreeMap<i64, RecordId>, rng: &mut StdRng, inclusive: bool) {
    let last = *reference.keys().next_back().expect("populated");
    for _ in 0..QUERIES {
        let to = rng.random_range(0..last + 5_000) - 5_000;
        let to = snap_to_key(rng, reference, to);
        let values = tree.values_minor(&to, inclusive, MAX_FETCH).expect("values_minor");
        assert_eq!(
            values,
            expected_minor(reference, to, inclusive, MAX_FETCH),
            "to {to} inclusive {inclusive}"
        );
    }
}

#[test]
fn test_values_minor_random_bounds() {
    let (tree, reference) = range_tree("minor", 21);
    let mut rng = StdRng::seed_from_u64(22);

    assert_minor_values(&tree, &reference, &mut rng, true);
    assert_minor_values(&tree, &reference, &mut rng, false);
}

#[test]
fn test_values_minor_edges() {
    let (tree, reference) = range_tree("minor_edges", 23);
    let first = *reference.keys().next().expect("populated");
    let last = *reference.keys().next_back().expect("populated");

    assert_eq!(tree.values_minor(&first, true, 10).expect("minor"), vec![rid(first)]);
    assert!(tree.values_minor(&first, false, 10).expect("minor").is_empty());
    assert!(tree.values_minor(&(first - 1), true, 10).expect("minor").is_empty());

    // Descending order: the largest key comes first.
    let all = tree.values_minor(&last, true, usize::MAX).expect("minor");
    assert_eq!(all.len(), RANGE_KEYS);
    assert_eq!(all.first(), Some(&rid(last)));
    assert_eq!(all.last(), Some(&rid(first)));
    assert_eq!(
        tree.values_minor(&i64::MAX, false, usize::MAX).expect("minor"),
        all
    );

    let capped = tree.values_minor(&last, false, 3).expect("minor");
    let expected: Vec<RecordId> = reference.values().rev().skip(1).take(3).copied().collect();
    assert_eq!(capped, expected);
}

#[test]
fn test_cursor_minor_yields_keys_descending() {
    let (tree, reference) = range_tree("minor_cursor", 27);
    let to = *reference.keys().nth(RANGE_KEYS / 2).expect("middle key");

    let keys: Vec<i64> = tree
        .cursor_minor(to, true)
        .map(|entry| entry.map(|(key, _)| key))
        .collect::<Result<_, _>>()
        .expect("cursor");
    assert_eq!(keys.len(), RANGE_KEYS / 2 + 1);
    assert!(keys.windows(2).all(|pair| pair[0] > pair[1]));
    assert_eq!(keys.first(), Some(&to));
}
