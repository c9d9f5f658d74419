//! Test that page store failures surface as errors and leave the tree usable.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::TreeConfig;
use crate::e2e_tests::helpers::*;
use crate::storage::btree::{LongCodec, SBTree, TreeError};
use crate::storage::{FaultConfig, MemoryStore, Page, PageId, PageStore, StorageError};

#[allow(clippy::disallowed_methods)]
fn faulty_tree() -> (Arc<MemoryStore>, MemoryTree) {
    let store = Arc::new(MemoryStore::with_faults(0xFA17, FaultConfig::no_faults()));
    let tree = SBTree::create(
        "faulty",
        LongCodec,
        Arc::clone(&store),
        &TreeConfig::default().with_fan_out(FAN_OUT),
    )
    .expect("create");
    (store, tree)
}

/// Memory store that fails exactly the Nth allocation or write after being
/// armed. Zero disarms a counter.
#[derive(Default)]
struct CountdownStore {
    inner: MemoryStore,
    fail_allocation: AtomicU64,
    fail_write: AtomicU64,
    allocations: AtomicU64,
    writes: AtomicU64,
}

impl CountdownStore {
    fn arm(&self, allocation: u64, write: u64) {
        self.allocations.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        self.fail_allocation.store(allocation, Ordering::SeqCst);
        self.fail_write.store(write, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.arm(0, 0);
    }

    fn in_use(&self) -> u64 {
        self.total_pages() - self.free_pages()
    }
}

fn countdown(counter: &AtomicU64, fail_at: &AtomicU64, what: &str) -> Result<(), StorageError> {
    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
    if n == fail_at.load(Ordering::SeqCst) {
        return Err(StorageError::InjectedFault(format!("{what} #{n}")));
    }
    Ok(())
}

impl PageStore for CountdownStore {
    fn read_page(&self, page_id: PageId) -> Result<Page, StorageError> {
        self.inner.read_page(page_id)
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        countdown(&self.writes, &self.fail_write, "write")?;
        self.inner.write_page(page_id, page)
    }

    fn allocate_page(&self) -> Result<PageId, StorageError> {
        countdown(&self.allocations, &self.fail_allocation, "allocation")?;
        self.inner.allocate_page()
    }

    fn free_page(&self, page_id: PageId) -> Result<(), StorageError> {
        self.inner.free_page(page_id)
    }

    fn sync(&self) -> Result<(), StorageError> {
        self.inner.sync()
    }

    fn total_pages(&self) -> u64 {
        self.inner.total_pages()
    }

    fn free_pages(&self) -> u64 {
        self.inner.free_pages()
    }

    fn catalog_lookup(&self, name: &str) -> Result<Option<PageId>, StorageError> {
        self.inner.catalog_lookup(name)
    }

    fn catalog_insert(&self, name: &str, meta_page: PageId) -> Result<(), StorageError> {
        self.inner.catalog_insert(name, meta_page)
    }

    fn catalog_remove(&self, name: &str) -> Result<Option<PageId>, StorageError> {
        self.inner.catalog_remove(name)
    }
}

/// Fan-out 4 tree filled with `0..40`. Sequential puts leave the rightmost
/// leaf full, so the next larger key splits it.
#[allow(clippy::disallowed_methods)]
fn countdown_tree() -> (Arc<CountdownStore>, SBTree<LongCodec, CountdownStore>) {
    let store = Arc::new(CountdownStore::default());
    let tree = SBTree::create(
        "countdown",
        LongCodec,
        Arc::clone(&store),
        &TreeConfig::default().with_fan_out(4),
    )
    .expect("create");
    populate(&tree, 0..40);
    (store, tree)
}

fn is_injected(err: &TreeError) -> bool {
    matches!(err, TreeError::Storage(StorageError::InjectedFault(_)))
}

#[test]
fn test_read_failures_propagate() {
    let (store, tree) = faulty_tree();
    let reference = populate(&tree, 0..500);

    store.set_fault_config(FaultConfig {
        read_error_rate: 1.0,
        ..FaultConfig::no_faults()
    });
    assert!(is_injected(&tree.get(&10).expect_err("get")));
    assert!(is_injected(&tree.put(10, rid(11)).expect_err("put")));
    assert!(is_injected(&tree.remove(&10).expect_err("remove")));
    assert!(is_injected(&tree.values_major(&0, true, 10).expect_err("major")));

    let mut cursor = tree.cursor_between(100, true, 200, true);
    assert!(is_injected(&cursor.next().expect("item").expect_err("scan")));

    store.set_fault_config(FaultConfig::no_faults());
    assert_matches(&tree, &reference);
}

#[test]
fn test_write_failure_leaves_entry_unchanged() {
    let (store, tree) = faulty_tree();
    let reference = populate(&tree, 0..500);

    store.set_fault_config(FaultConfig {
        write_error_rate: 1.0,
        ..FaultConfig::no_faults()
    });
    assert!(is_injected(&tree.put(42, rid(4_242)).expect_err("overwrite")));

    store.set_fault_config(FaultConfig::no_faults());
    assert_eq!(tree.get(&42).expect("get"), Some(rid(42)));
    assert_matches(&tree, &reference);
}

#[test]
fn test_allocation_failure_during_root_split() {
    let (store, tree) = faulty_tree();
    let fan_out = i64::try_from(FAN_OUT).expect("fan-out");
    let reference = populate(&tree, 0..fan_out);
    assert_eq!(tree.height().expect("height"), 1);

    store.set_fault_config(FaultConfig {
        allocate_error_rate: 1.0,
        ..FaultConfig::no_faults()
    });
    assert!(is_injected(&tree.put(fan_out, rid(fan_out)).expect_err("split")));

    store.set_fault_config(FaultConfig::no_faults());
    assert_eq!(tree.get(&fan_out).expect("get"), None);
    assert_eq!(tree.height().expect("height"), 1);
    assert_matches(&tree, &reference);

    // The same insert succeeds once allocation works again.
    assert_eq!(tree.put(fan_out, rid(fan_out)).expect("put"), None);
    assert_eq!(tree.height().expect("height"), 2);
}

#[test]
fn test_allocation_failure_in_split_cascade_loses_nothing() {
    let (store, tree) = countdown_tree();
    let (clean_store, clean) = countdown_tree();
    let mut reference: BTreeMap<_, _> = (0..40).map(|key| (key, rid(key))).collect();

    // Every split allocates at least one page. Only splits that carry into
    // the parent reach a second allocation.
    let mut failed = 0;
    for key in 40..200 {
        store.arm(2, 0);
        match tree.put(key, rid(key)) {
            Ok(previous) => assert_eq!(previous, None),
            Err(err) => {
                assert!(is_injected(&err), "{err}");
                failed += 1;
                store.disarm();
                assert_matches(&tree, &reference);
                assert_eq!(tree.put(key, rid(key)).expect("retry"), None);
            }
        }
        clean.put(key, rid(key)).expect("clean put");
        reference.insert(key, rid(key));
    }

    store.disarm();
    assert!(failed > 0, "no put needed a second page");
    assert_matches(&tree, &reference);
    assert_eq!(tree.height().expect("height"), clean.height().expect("height"));
    assert_eq!(store.in_use(), clean_store.in_use());
}

#[test]
fn test_write_failure_before_split_lands_changes_nothing() {
    // The first write of a split fills its new leaf. The second either fills
    // another new page or links the new pages in, so a failure there leaves
    // every existing page as it was.
    for fail_at in 1..=2 {
        let (store, tree) = countdown_tree();
        let in_use = store.in_use();
        let height = tree.height().expect("height");

        store.arm(0, fail_at);
        assert!(is_injected(&tree.put(40, rid(40)).expect_err("split")));
        store.disarm();

        assert_eq!(tree.get(&40).expect("get"), None);
        assert_eq!(tree.size(), 40);
        assert_eq!(tree.height().expect("height"), height);
        assert_eq!(store.in_use(), in_use, "write {fail_at}");
        for key in 0..40 {
            assert_eq!(tree.get(&key).expect("get"), Some(rid(key)));
        }

        assert_eq!(tree.put(40, rid(40)).expect("put"), None);
        assert_eq!(tree.check_structure().expect("structure"), 41);
    }
}

#[test]
fn test_corrupted_reads_are_detected() {
    let (store, tree) = faulty_tree();
    populate(&tree, 0..500);

    store.set_fault_config(FaultConfig {
        corruption_rate: 1.0,
        ..FaultConfig::no_faults()
    });
    let err = tree.get(&250).expect_err("corrupt read");
    assert!(matches!(err, TreeError::CorruptNode { .. }), "{err}");
    assert!(store.stats().corrupted_reads > 0);

    store.set_fault_config(FaultConfig::no_faults());
    assert_eq!(tree.get(&250).expect("get"), Some(rid(250)));
}

#[test]
fn test_low_fault_rates_never_lose_acknowledged_writes() {
    let (store, tree) = faulty_tree();
    store.set_fault_config(FaultConfig {
        read_error_rate: 0.01,
        ..FaultConfig::no_faults()
    });

    // Read faults abort an operation before anything is written, so every
    // acknowledged put must be readable afterwards.
    let mut acknowledged = std::collections::BTreeMap::new();
    for key in 0..2_000 {
        if tree.put(key, rid(key)).is_ok() {
            acknowledged.insert(key, rid(key));
        }
    }
    assert!(store.stats().injected_errors > 0);

    store.set_fault_config(FaultConfig::no_faults());
    assert_matches(&tree, &acknowledged);
}
