//! Per-page shared/exclusive latches.
//!
//! Each tree owns a `LatchTable`. Readers take shared latches and the tree's
//! single writer takes exclusive latches on the pages it is about to rewrite.
//! Entries are created on first use and dropped again once no guard or waiter
//! references them, so the table only ever holds the pages currently in use.
//!
//! # Invariants
//!
//! - A page has either one exclusive holder or any number of shared holders
//! - A waiting writer blocks new shared acquisitions (the lock is task-fair)
//! - A table entry exists while at least one guard or waiter references it

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};

use crate::storage::page::PageId;

type PageLatch = Arc<RwLock<()>>;

/// Table of page latches for one tree.
#[derive(Debug, Default)]
pub struct LatchTable {
    latches: Mutex<HashMap<PageId, PageLatch>>,
}

impl LatchTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `page_id` can be latched in shared mode.
    pub fn shared(&self, page_id: PageId) -> SharedLatch<'_> {
        let guard = self.entry(page_id).read_arc();
        SharedLatch {
            table: self,
            page_id,
            _guard: guard,
        }
    }

    /// Block until `page_id` can be latched in exclusive mode.
    pub fn exclusive(&self, page_id: PageId) -> ExclusiveLatch<'_> {
        let guard = self.entry(page_id).write_arc();
        ExclusiveLatch {
            table: self,
            page_id,
            _guard: guard,
        }
    }

    /// Number of pages with a live latch entry.
    #[must_use]
    pub fn active(&self) -> usize {
        self.latches.lock().len()
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    fn entry(&self, page_id: PageId) -> PageLatch {
        Arc::clone(self.latches.lock().entry(page_id).or_default())
    }

    /// Drop the table entry if the releasing guard is its last user.
    fn forget(&self, page_id: PageId) {
        let mut latches = self.latches.lock();
        // One reference in the table, one in the releasing guard.
        if latches
            .get(&page_id)
            .is_some_and(|latch| Arc::strong_count(latch) == 2)
        {
            latches.remove(&page_id);
        }
    }
}

/// A held shared latch. Released on drop.
#[derive(Debug)]
pub struct SharedLatch<'a> {
    table: &'a LatchTable,
    page_id: PageId,
    _guard: ArcRwLockReadGuard<RawRwLock, ()>,
}

impl SharedLatch<'_> {
    #[must_use]
    pub const fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Drop for SharedLatch<'_> {
    fn drop(&mut self) {
        self.table.forget(self.page_id);
    }
}

/// A held exclusive latch. Released on drop.
#[derive(Debug)]
pub struct ExclusiveLatch<'a> {
    table: &'a LatchTable,
    page_id: PageId,
    _guard: ArcRwLockWriteGuard<RawRwLock, ()>,
}

impl ExclusiveLatch<'_> {
    #[must_use]
    pub const fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Drop for ExclusiveLatch<'_> {
    fn drop(&mut self) {
        self.table.forget(self.page_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_shared_latches_coexist() {
        let table = LatchTable::new();
        let a = table.shared(7);
        let b = table.shared(7);
        assert_eq!(a.page_id(), 7);
        assert_eq!(b.page_id(), 7);
        assert_eq!(table.active(), 1);
        drop(a);
        assert_eq!(table.active(), 1);
        drop(b);
        assert_eq!(table.active(), 0);
    }

    #[test]
    fn test_exclusive_blocks_shared() {
        let table = LatchTable::new();
        let reader_done = AtomicBool::new(false);

        thread::scope(|s| {
            let guard = table.exclusive(3);
            s.spawn(|| {
                let _shared = table.shared(3);
                reader_done.store(true, Ordering::SeqCst);
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!reader_done.load(Ordering::SeqCst));
            drop(guard);
        });

        assert!(reader_done.load(Ordering::SeqCst));
        assert_eq!(table.active(), 0);
    }

    #[test]
    fn test_waiting_writer_blocks_new_readers() {
        let table = LatchTable::new();
        let order = Mutex::new(Vec::new());

        thread::scope(|s| {
            let first_reader = table.shared(1);

            s.spawn(|| {
                let _w = table.exclusive(1);
                order.lock().push("writer");
            });
            thread::sleep(Duration::from_millis(50));

            s.spawn(|| {
                let _r = table.shared(1);
                order.lock().push("reader");
            });
            thread::sleep(Duration::from_millis(50));

            drop(first_reader);
        });

        assert_eq!(*order.lock(), vec!["writer", "reader"]);
    }

    #[test]
    fn test_exclusive_is_mutually_exclusive() {
        let table = LatchTable::new();
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let _guard = table.exclusive(9);
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(table.active(), 0);
    }

    #[test]
    fn test_distinct_pages_do_not_contend() {
        let table = LatchTable::new();
        let _a = table.exclusive(1);
        let _b = table.exclusive(2);
        let _c = table.shared(3);
        assert_eq!(table.active(), 3);
    }
}
