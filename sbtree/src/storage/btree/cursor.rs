//! Range cursors over the leaf chain.
//!
//! A cursor copies one leaf at a time under a shared latch, hands out its
//! entries, then follows the leaf's sibling link. No latch is held between
//! calls to `next`, so writers are never blocked by an idle cursor.
//!
//! Following a link is only trusted if the tree's structure version is the
//! same (and even) as when the cursor last descended. Otherwise the cursor
//! descends again to the last key it returned and skips everything up to and
//! including it. Entries are therefore returned in strict key order with no
//! duplicates, and every entry that stays in the tree for the whole scan is
//! returned. Entries inserted or removed during the scan may or may not be seen.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::ops::Bound;

use crate::storage::btree::codec::KeyCodec;
use crate::storage::btree::node::{LeafEntry, LeafNode};
use crate::storage::btree::tree::{SBTree, Seek, TreeError};
use crate::storage::btree::value::{FixedValue, RecordId};
use crate::storage::io::PageStore;
use crate::storage::page::{NO_PAGE, PageId};

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No leaf read yet.
    Unpositioned,
    /// Buffered entries come from a leaf whose sibling in scan direction is
    /// the given page (`NO_PAGE` at the end of the chain).
    Linked(PageId),
    Finished,
}

/// Lazy iterator over the entries of a key range.
pub struct Cursor<'t, C, S, V = RecordId>
where
    C: KeyCodec,
    S: PageStore,
    V: FixedValue,
{
    tree: &'t SBTree<C, S, V>,
    direction: Direction,
    lower: Bound<C::Key>,
    upper: Bound<C::Key>,
    buffered: VecDeque<LeafEntry<C::Key, V>>,
    state: State,
    version: u64,
    last: Option<C::Key>,
}

impl<'t, C, S, V> Cursor<'t, C, S, V>
where
    C: KeyCodec,
    S: PageStore,
    V: FixedValue,
{
    fn new(
        tree: &'t SBTree<C, S, V>,
        lower: Bound<C::Key>,
        upper: Bound<C::Key>,
        direction: Direction,
    ) -> Self {
        let mut cursor = Self {
            tree,
            direction,
            lower,
            upper,
            buffered: VecDeque::new(),
            state: State::Unpositioned,
            version: 0,
            last: None,
        };
        if cursor.range_is_empty() {
            cursor.state = State::Finished;
        }
        cursor
    }

    fn range_is_empty(&self) -> bool {
        let (Bound::Included(lo) | Bound::Excluded(lo), Bound::Included(hi) | Bound::Excluded(hi)) =
            (&self.lower, &self.upper)
        else {
            return false;
        };
        match self.tree.codec.compare(lo, hi) {
            Ordering::Greater => true,
            Ordering::Equal => {
                matches!(self.lower, Bound::Excluded(_)) || matches!(self.upper, Bound::Excluded(_))
            }
            Ordering::Less => false,
        }
    }

    fn above_lower(&self, key: &C::Key) -> bool {
        match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(bound) => self.tree.codec.compare(key, bound) != Ordering::Less,
            Bound::Excluded(bound) => self.tree.codec.compare(key, bound) == Ordering::Greater,
        }
    }

    fn below_upper(&self, key: &C::Key) -> bool {
        match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(bound) => self.tree.codec.compare(key, bound) != Ordering::Greater,
            Bound::Excluded(bound) => self.tree.codec.compare(key, bound) == Ordering::Less,
        }
    }

    /// Whether `key` comes after the last returned key in scan order.
    fn beyond_last(&self, key: &C::Key) -> bool {
        let Some(last) = &self.last else {
            return true;
        };
        let order = self.tree.codec.compare(key, last);
        match self.direction {
            Direction::Ascending => order == Ordering::Greater,
            Direction::Descending => order == Ordering::Less,
        }
    }

    /// Whether `key` has not yet reached the bound the scan starts from.
    fn before_start(&self, key: &C::Key) -> bool {
        match self.direction {
            Direction::Ascending => !self.above_lower(key),
            Direction::Descending => !self.below_upper(key),
        }
    }

    /// Whether `key` is past the bound the scan ends at.
    fn past_end(&self, key: &C::Key) -> bool {
        match self.direction {
            Direction::Ascending => !self.below_upper(key),
            Direction::Descending => !self.above_lower(key),
        }
    }

    /// Buffer the next leaf, following the sibling link when it can be
    /// trusted and descending again otherwise.
    fn load_next(&mut self) -> Result<(), TreeError> {
        if let State::Linked(page_id) = self.state {
            let latch = self.tree.latches.shared(page_id);
            let page = self.tree.store.read_page(page_id)?;
            drop(latch);

            if self.version.is_multiple_of(2) && self.tree.structure_version() == self.version {
                let leaf = self.tree.decode_leaf(page_id, &page)?;
                self.fill(leaf);
                return Ok(());
            }
            tracing::trace!(tree = self.tree.name(), page_id, "leaf chain changed under cursor, seeking again");
        }
        self.seek()
    }

    /// Descend to the leaf holding the resume point.
    fn seek(&mut self) -> Result<(), TreeError> {
        self.version = self.tree.structure_version();
        let target = match (&self.last, self.direction) {
            (Some(last), _) => Seek::Key(last),
            (None, Direction::Ascending) => match &self.lower {
                Bound::Included(key) | Bound::Excluded(key) => Seek::Key(key),
                Bound::Unbounded => Seek::First,
            },
            (None, Direction::Descending) => match &self.upper {
                Bound::Included(key) | Bound::Excluded(key) => Seek::Key(key),
                Bound::Unbounded => Seek::Last,
            },
        };
        let (_, leaf) = self.tree.find_leaf(target)?;
        self.fill(leaf);
        Ok(())
    }

    fn fill(&mut self, leaf: LeafNode<C::Key, V>) {
        let (entries, sibling) = match self.direction {
            Direction::Ascending => (leaf.entries.into_iter().collect(), leaf.next_leaf),
            Direction::Descending => (leaf.entries.into_iter().rev().collect(), leaf.prev_leaf),
        };
        self.buffered = entries;
        self.state = State::Linked(sibling);
    }

    fn finish(&mut self) {
        self.buffered.clear();
        self.state = State::Finished;
    }
}

impl<C, S, V> Iterator for Cursor<'_, C, S, V>
where
    C: KeyCodec,
    S: PageStore,
    V: FixedValue,
{
    type Item = Result<(C::Key, V), TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while let Some(entry) = self.buffered.pop_front() {
                if !self.beyond_last(&entry.key) || self.before_start(&entry.key) {
                    continue;
                }
                if self.past_end(&entry.key) {
                    self.finish();
                    return None;
                }
                self.last = Some(entry.key.clone());
                return Some(Ok((entry.key, entry.value)));
            }

            match self.state {
                State::Finished | State::Linked(NO_PAGE) => {
                    self.finish();
                    return None;
                }
                State::Unpositioned | State::Linked(_) => {}
            }

            if let Err(e) = self.load_next() {
                self.finish();
                return Some(Err(e));
            }
        }
    }
}

impl<C, S, V> SBTree<C, S, V>
where
    C: KeyCodec,
    S: PageStore,
    V: FixedValue,
{
    /// Cursor over the entries between two bounds, in either direction.
    #[must_use]
    pub fn range(
        &self,
        lower: Bound<C::Key>,
        upper: Bound<C::Key>,
        direction: Direction,
    ) -> Cursor<'_, C, S, V> {
        Cursor::new(self, lower, upper, direction)
    }

    /// Ascending cursor over keys greater than (or equal to) `from`.
    #[must_use]
    pub fn cursor_major(&self, from: C::Key, inclusive: bool) -> Cursor<'_, C, S, V> {
        self.range(bound(from, inclusive), Bound::Unbounded, Direction::Ascending)
    }

    /// Descending cursor over keys less than (or equal to) `to`.
    #[must_use]
    pub fn cursor_minor(&self, to: C::Key, inclusive: bool) -> Cursor<'_, C, S, V> {
        self.range(Bound::Unbounded, bound(to, inclusive), Direction::Descending)
    }

    /// Ascending cursor over keys between `from` and `to`.
    #[must_use]
    pub fn cursor_between(
        &self,
        from: C::Key,
        from_inclusive: bool,
        to: C::Key,
        to_inclusive: bool,
    ) -> Cursor<'_, C, S, V> {
        self.range(
            bound(from, from_inclusive),
            bound(to, to_inclusive),
            Direction::Ascending,
        )
    }

    /// Values of up to `max_count` entries with keys above `from`, in
    /// ascending key order.
    pub fn values_major(&self, from: &C::Key, inclusive: bool, max_count: usize) -> Result<Vec<V>, TreeError> {
        collect_values(self.cursor_major(from.clone(), inclusive), max_count)
    }

    /// Values of up to `max_count` entries with keys below `to`, in
    /// descending key order.
    pub fn values_minor(&self, to: &C::Key, inclusive: bool, max_count: usize) -> Result<Vec<V>, TreeError> {
        collect_values(self.cursor_minor(to.clone(), inclusive), max_count)
    }

    /// Values of up to `max_count` entries with keys between `from` and `to`,
    /// in ascending key order. Empty if `from` is above `to`.
    pub fn values_between(
        &self,
        from: &C::Key,
        from_inclusive: bool,
        to: &C::Key,
        to_inclusive: bool,
        max_count: usize,
    ) -> Result<Vec<V>, TreeError> {
        collect_values(
            self.cursor_between(from.clone(), from_inclusive, to.clone(), to_inclusive),
            max_count,
        )
    }
}

fn bound<K>(key: K, inclusive: bool) -> Bound<K> {
    if inclusive {
        Bound::Included(key)
    } else {
        Bound::Excluded(key)
    }
}

fn collect_values<C, S, V>(cursor: Cursor<'_, C, S, V>, max_count: usize) -> Result<Vec<V>, TreeError>
where
    C: KeyCodec,
    S: PageStore,
    V: FixedValue,
{
    cursor
        .take(max_count)
        .map(|entry| entry.map(|(_, value)| value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::storage::btree::codec::{IntegerCodec, StringCodec};
    use crate::storage::memory::MemoryStore;
    use std::sync::Arc;

    type IntTree = SBTree<IntegerCodec, MemoryStore, u64>;

    fn tree_with(keys: impl IntoIterator<Item = i32>) -> IntTree {
        let store = Arc::new(MemoryStore::new());
        let tree: IntTree = SBTree::create(
            "scan",
            IntegerCodec,
            store,
            &TreeConfig::default().with_fan_out(4),
        )
        .expect("create tree");
        for key in keys {
            tree.put(key, u64::from(key.unsigned_abs())).expect("put");
        }
        tree
    }

    fn keys(cursor: Cursor<'_, IntegerCodec, MemoryStore, u64>) -> Vec<i32> {
        cursor
            .map(|entry| entry.expect("entry").0)
            .collect()
    }

    #[test]
    fn test_cursor_major_bounds() {
        let tree = tree_with((0..100).map(|k| k * 2));

        assert_eq!(keys(tree.cursor_major(190, true)), vec![190, 192, 194, 196, 198]);
        assert_eq!(keys(tree.cursor_major(190, false)), vec![192, 194, 196, 198]);
        assert_eq!(keys(tree.cursor_major(191, true)), vec![192, 194, 196, 198]);
        assert_eq!(keys(tree.cursor_major(-50, true)).len(), 100);
        assert!(keys(tree.cursor_major(198, false)).is_empty());
    }

    #[test]
    fn test_cursor_minor_bounds() {
        let tree = tree_with((0..100).map(|k| k * 2));

        assert_eq!(keys(tree.cursor_minor(6, true)), vec![6, 4, 2, 0]);
        assert_eq!(keys(tree.cursor_minor(6, false)), vec![4, 2, 0]);
        assert_eq!(keys(tree.cursor_minor(7, false)), vec![6, 4, 2, 0]);
        assert_eq!(keys(tree.cursor_minor(1000, true)).len(), 100);
        assert!(keys(tree.cursor_minor(0, false)).is_empty());
    }

    #[test]
    fn test_cursor_between_bounds() {
        let tree = tree_with(0..50);

        assert_eq!(keys(tree.cursor_between(10, true, 14, true)), vec![10, 11, 12, 13, 14]);
        assert_eq!(keys(tree.cursor_between(10, false, 14, false)), vec![11, 12, 13]);
        assert_eq!(keys(tree.cursor_between(10, true, 10, true)), vec![10]);
        assert!(keys(tree.cursor_between(10, true, 10, false)).is_empty());
        assert!(keys(tree.cursor_between(20, true, 10, true)).is_empty());
    }

    #[test]
    fn test_values_are_capped() {
        let tree = tree_with(0..300);

        let values = tree.values_major(&100, true, 10).expect("major");
        assert_eq!(values, (100..110).collect::<Vec<u64>>());

        let values = tree.values_minor(&100, false, 3).expect("minor");
        assert_eq!(values, vec![99, 98, 97]);

        let values = tree.values_between(&0, true, &299, true, 1000).expect("between");
        assert_eq!(values.len(), 300);

        assert!(tree.values_major(&0, true, 0).expect("zero cap").is_empty());
    }

    #[test]
    fn test_empty_tree_scans() {
        let tree = tree_with(std::iter::empty());
        assert!(keys(tree.range(Bound::Unbounded, Bound::Unbounded, Direction::Ascending)).is_empty());
        assert!(keys(tree.cursor_minor(5, true)).is_empty());
    }

    #[test]
    fn test_cursor_survives_splits_between_calls() {
        let tree = tree_with((0..200).map(|k| k * 10));
        let mut cursor = tree.cursor_major(0, true);

        let mut seen = Vec::new();
        for _ in 0..25 {
            seen.push(cursor.next().expect("entry").expect("ok").0);
        }

        // Fill the gaps, splitting most leaves behind and ahead of the cursor.
        for key in 0..2000 {
            if key % 10 != 0 {
                tree.put(key, 0).expect("put");
            }
        }

        seen.extend(cursor.map(|entry| entry.expect("entry").0));
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "keys strictly ascending");
        for key in (0..200).map(|k| k * 10) {
            assert!(seen.contains(&key), "original key {key} returned");
        }
    }

    #[test]
    fn test_cursor_survives_merges_between_calls() {
        let tree = tree_with(0..1000);
        let mut cursor = tree.cursor_minor(999, true);

        let mut seen = Vec::new();
        for _ in 0..100 {
            seen.push(cursor.next().expect("entry").expect("ok").0);
        }

        // Remove all odd keys, merging most leaves.
        for key in (1..1000).step_by(2) {
            tree.remove(&key).expect("remove");
        }
        tree.check_structure().expect("structure");

        seen.extend(cursor.map(|entry| entry.expect("entry").0));
        assert!(seen.windows(2).all(|w| w[0] > w[1]), "keys strictly descending");
        for key in (0..1000).step_by(2) {
            assert!(seen.contains(&key), "surviving key {key} returned");
        }
    }

    #[test]
    fn test_cursor_reports_corruption() {
        let store = Arc::new(MemoryStore::new());
        let tree: SBTree<StringCodec, MemoryStore> = SBTree::create(
            "names",
            StringCodec::new(16),
            Arc::clone(&store),
            &TreeConfig::default().with_fan_out(4),
        )
        .expect("create tree");
        for i in 0..40 {
            tree.put(format!("name-{i:03}"), RecordId::new(1, i)).expect("put");
        }

        let (first_leaf, leaf) = tree.find_leaf(Seek::First).expect("first leaf");
        let mut page = store.read_page(leaf.next_leaf).expect("read second leaf");
        page.write_u8(40, page.read_u8(40) ^ 0xFF);
        store.write_page(leaf.next_leaf, &page).expect("write corrupted leaf");

        let mut cursor = tree.range(Bound::Unbounded, Bound::Unbounded, Direction::Ascending);
        let mut results = Vec::new();
        for entry in cursor.by_ref() {
            results.push(entry);
        }

        assert!(first_leaf != leaf.next_leaf);
        let err = results
            .pop()
            .expect("at least one result")
            .expect_err("corrupt second leaf");
        assert!(matches!(err, TreeError::CorruptNode { page_id, .. } if page_id == leaf.next_leaf));
        assert!(results.iter().all(Result::is_ok));
        assert!(cursor.next().is_none());
    }
}
