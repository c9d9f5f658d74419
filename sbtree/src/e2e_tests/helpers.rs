//! Common helpers for end-to-end tests.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use crate::config::TreeConfig;
use crate::storage::btree::{Direction, LongCodec, RecordId, SBTree};
use crate::storage::{FileStore, MemoryStore};

pub type MemoryTree = SBTree<LongCodec, MemoryStore>;
pub type FileTree = SBTree<LongCodec, FileStore>;

/// Fan-out for scenario trees. Small enough that a few thousand keys build a
/// tree several levels deep.
pub const FAN_OUT: usize = 16;

/// Keys inserted by the bulk scenarios.
pub const KEY_COUNT: i64 = 10_000;

#[must_use]
pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// Create an empty tree named `name` on a fresh memory store.
#[must_use]
#[allow(clippy::expect_used, clippy::disallowed_methods)]
pub fn memory_tree(name: &str) -> (Arc<MemoryStore>, MemoryTree) {
    let store = memory_store();
    let tree = SBTree::create(
        name,
        LongCodec,
        Arc::clone(&store),
        &TreeConfig::default().with_fan_out(FAN_OUT),
    )
    .expect("Failed to create test tree");
    (store, tree)
}

/// Store file in a temporary directory that is removed on drop.
pub struct StoreFile {
    _dir: TempDir,
    pub path: PathBuf,
}

impl StoreFile {
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("store.sbt");
        Self { _dir: dir, path }
    }

    /// Open the store file, creating it on first use.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn open(&self) -> Arc<FileStore> {
        Arc::new(FileStore::open_or_create(&self.path).expect("Failed to open store file"))
    }
}

/// Value stored for `key` throughout the scenarios.
#[must_use]
#[allow(clippy::expect_used)]
pub fn rid(key: i64) -> RecordId {
    let position = key.unsigned_abs();
    RecordId::new(
        u16::try_from(position % 32_000).expect("cluster id fits"),
        position,
    )
}

/// `count` distinct keys drawn uniformly from `1..max`.
#[must_use]
pub fn uniform_keys(seed: u64, count: usize, max: i64) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = HashSet::with_capacity(count);
    let mut keys = Vec::with_capacity(count);
    while keys.len() < count {
        let key = rng.random_range(1..max);
        if seen.insert(key) {
            keys.push(key);
        }
    }
    keys
}

/// `count` distinct positive keys drawn from a normal distribution, using the
/// Box-Muller transform.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn gaussian_keys(seed: u64, count: usize, mean: f64, std_dev: f64) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = HashSet::with_capacity(count);
    let mut keys = Vec::with_capacity(count);
    while keys.len() < count {
        // 1 - u keeps the logarithm's argument in (0, 1].
        let u1 = 1.0 - rng.random::<f64>();
        let u2 = rng.random::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        let key = (z.mul_add(std_dev, mean)).round() as i64;
        if key > 0 && seen.insert(key) {
            keys.push(key);
        }
    }
    keys
}

/// Keys in the populated trees used by the range scenarios.
pub const RANGE_KEYS: usize = 10_000;

/// Entry cap for range queries. Smaller than `RANGE_KEYS` so that wide
/// queries are truncated.
pub const MAX_FETCH: usize = 2_000;

/// Random queries per bound combination.
pub const QUERIES: usize = 100;

/// Tree filled with `RANGE_KEYS` uniform keys, plus its reference contents.
#[must_use]
pub fn range_tree(name: &str, seed: u64) -> (MemoryTree, BTreeMap<i64, RecordId>) {
    let (_store, tree) = memory_tree(name);
    let keys = uniform_keys(seed, RANGE_KEYS, i64::from(i32::MAX));
    let reference = populate(&tree, keys);
    (tree, reference)
}

/// Half of the time, move `key` onto the nearest stored key at or above it
/// (or below it past the end), so bounds land on stored keys.
pub fn snap_to_key(rng: &mut StdRng, reference: &BTreeMap<i64, RecordId>, key: i64) -> i64 {
    if !rng.random_bool(0.5) {
        return key;
    }
    reference
        .range(key..)
        .next()
        .or_else(|| reference.range(..=key).next_back())
        .map_or(key, |(stored, _)| *stored)
}

#[must_use]
pub const fn bound(key: i64, inclusive: bool) -> Bound<i64> {
    if inclusive {
        Bound::Included(key)
    } else {
        Bound::Excluded(key)
    }
}

/// Put every key with its `rid` value and return the reference contents.
#[allow(clippy::expect_used)]
pub fn populate<S: crate::storage::PageStore>(
    tree: &SBTree<LongCodec, S>,
    keys: impl IntoIterator<Item = i64>,
) -> BTreeMap<i64, RecordId> {
    let mut reference = BTreeMap::new();
    for key in keys {
        tree.put(key, rid(key)).expect("put");
        reference.insert(key, rid(key));
    }
    reference
}

/// Check that the tree holds exactly the reference contents and that its
/// structure is sound.
#[allow(clippy::expect_used)]
pub fn assert_matches<S: crate::storage::PageStore>(
    tree: &SBTree<LongCodec, S>,
    reference: &BTreeMap<i64, RecordId>,
) {
    assert_eq!(tree.size(), reference.len() as u64);
    let counted = tree.check_structure().expect("tree structure");
    assert_eq!(counted, reference.len() as u64);

    for (key, value) in reference {
        assert_eq!(tree.get(key).expect("get"), Some(*value), "key {key}");
    }

    let scanned: Vec<(i64, RecordId)> = tree
        .range(
            Bound::Unbounded,
            Bound::Unbounded,
            Direction::Ascending,
        )
        .collect::<Result<_, _>>()
        .expect("full scan");
    let expected: Vec<(i64, RecordId)> = reference.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(scanned, expected);
}
