//! In-memory page store with deterministic fault injection.
//!
//! `MemoryStore` keeps every page in a hash map and supports injecting
//! failures at the storage level:
//! - Page-level read/write errors
//! - Allocation errors
//! - Sync failures
//! - Byte-level corruption (bit flips) on read
//!
//! Faults are drawn from a seeded RNG, so the same seed and the same sequence
//! of calls always produce the same faults.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{PageStore, StorageError};
use crate::storage::page::{PAGE_SIZE, Page, PageId};
use crate::storage::superblock::Superblock;

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of an allocation error (0.0 - 1.0).
    pub allocate_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
    /// Probability of page corruption on read (0.0 - 1.0).
    pub corruption_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }
}

/// Statistics about memory store operations.
#[derive(Debug, Default, Clone)]
pub struct MemoryStoreStats {
    /// Number of page reads.
    pub reads: u64,
    /// Number of page writes.
    pub writes: u64,
    /// Number of page allocations.
    pub allocations: u64,
    /// Number of freed pages.
    pub frees: u64,
    /// Number of syncs.
    pub syncs: u64,
    /// Number of injected errors of any kind.
    pub injected_errors: u64,
    /// Number of corrupted pages returned.
    pub corrupted_reads: u64,
}

/// In-memory `PageStore` implementation.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

struct MemoryInner {
    /// Written pages. Allocated but unwritten pages read as zeroes.
    pages: HashMap<PageId, Page>,
    /// Total number of pages, including page 0.
    total_pages: u64,
    /// Freed pages awaiting reuse (LIFO).
    free_list: Vec<PageId>,
    /// Same pages as `free_list`, for double-free detection.
    free_set: HashSet<PageId>,
    /// Holds the tree catalog; never serialized.
    superblock: Superblock,
    fault_config: FaultConfig,
    rng: StdRng,
    stats: MemoryStoreStats,
}

impl MemoryStore {
    /// Create a fault-free memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_faults(0, FaultConfig::no_faults())
    }

    /// Create a memory store that injects faults drawn from `seed`.
    #[must_use]
    pub fn with_faults(seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                pages: HashMap::new(),
                total_pages: 1, // Page 0 is reserved
                free_list: Vec::new(),
                free_set: HashSet::new(),
                superblock: Superblock::new(),
                fault_config,
                rng: StdRng::seed_from_u64(seed),
                stats: MemoryStoreStats::default(),
            }),
        }
    }

    /// Get a snapshot of the current statistics.
    #[must_use]
    pub fn stats(&self) -> MemoryStoreStats {
        self.lock().stats.clone()
    }

    /// Replace the fault configuration.
    pub fn set_fault_config(&self, config: FaultConfig) {
        self.lock().fault_config = config;
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("lock poisoned")
    }
}

impl MemoryInner {
    /// Check if a fault should be injected based on the given rate.
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        let inject = self.rng.random::<f64>() < rate;
        if inject {
            self.stats.injected_errors += 1;
        }
        inject
    }

    fn check_bounds(&self, page_id: PageId) -> Result<(), StorageError> {
        if page_id == 0 || page_id >= self.total_pages {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.total_pages,
            });
        }
        Ok(())
    }

    /// Corrupt a page by flipping random bits.
    fn corrupt_page(&mut self, page: &mut Page) {
        let num_flips = self.rng.random_range(1..=8);
        for _ in 0..num_flips {
            let byte_offset = self.rng.random_range(0..PAGE_SIZE);
            let bit = self.rng.random_range(0..8u8);
            page.as_bytes_mut()[byte_offset] ^= 1 << bit;
        }
    }
}

impl PageStore for MemoryStore {
    fn read_page(&self, page_id: PageId) -> Result<Page, StorageError> {
        let mut inner = self.lock();
        inner.stats.reads += 1;
        inner.check_bounds(page_id)?;

        let rate = inner.fault_config.read_error_rate;
        if inner.should_inject_fault(rate) {
            return Err(StorageError::InjectedFault(format!(
                "read of page {page_id}"
            )));
        }

        let mut page = inner.pages.get(&page_id).cloned().unwrap_or_default();

        let rate = inner.fault_config.corruption_rate;
        if inner.should_inject_fault(rate) {
            inner.stats.corrupted_reads += 1;
            inner.corrupt_page(&mut page);
        }

        Ok(page)
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.stats.writes += 1;
        inner.check_bounds(page_id)?;

        let rate = inner.fault_config.write_error_rate;
        if inner.should_inject_fault(rate) {
            return Err(StorageError::InjectedFault(format!(
                "write of page {page_id}"
            )));
        }

        inner.pages.insert(page_id, page.clone());
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId, StorageError> {
        let mut inner = self.lock();
        inner.stats.allocations += 1;

        let rate = inner.fault_config.allocate_error_rate;
        if inner.should_inject_fault(rate) {
            return Err(StorageError::InjectedFault("page allocation".to_string()));
        }

        if let Some(page_id) = inner.free_list.pop() {
            inner.free_set.remove(&page_id);
            return Ok(page_id);
        }
        let page_id = inner.total_pages;
        inner.total_pages += 1;
        Ok(page_id)
    }

    fn free_page(&self, page_id: PageId) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.check_bounds(page_id)?;
        if !inner.free_set.insert(page_id) {
            return Err(StorageError::Corruption(format!(
                "page {page_id} freed twice"
            )));
        }
        inner.stats.frees += 1;
        inner.pages.remove(&page_id);
        inner.free_list.push(page_id);
        Ok(())
    }

    fn sync(&self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.stats.syncs += 1;

        let rate = inner.fault_config.sync_error_rate;
        if inner.should_inject_fault(rate) {
            return Err(StorageError::InjectedFault("sync".to_string()));
        }
        Ok(())
    }

    fn total_pages(&self) -> u64 {
        self.lock().total_pages
    }

    fn free_pages(&self) -> u64 {
        self.lock().free_list.len() as u64
    }

    fn catalog_lookup(&self, name: &str) -> Result<Option<PageId>, StorageError> {
        Ok(self.lock().superblock.find_tree(name))
    }

    fn catalog_insert(&self, name: &str, meta_page: PageId) -> Result<(), StorageError> {
        self.lock().superblock.add_tree(name, meta_page)?;
        Ok(())
    }

    fn catalog_remove(&self, name: &str) -> Result<Option<PageId>, StorageError> {
        Ok(self.lock().superblock.remove_tree(name))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryStore")
            .field("total_pages", &inner.total_pages)
            .field("free_pages", &inner.free_list.len())
            .field("stats", &inner.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::superblock::SuperblockError;

    #[test]
    fn test_memory_store_basic() {
        let store = MemoryStore::new();

        // Initially has 1 page (reserved page 0)
        assert_eq!(store.total_pages(), 1);

        let first = store.allocate_page().expect("allocate");
        assert_eq!(first, 1);
        let second = store.allocate_page().expect("allocate");
        assert_eq!(store.total_pages(), 3);

        let mut page = Page::new();
        page.write_bytes(0, b"hello world");
        store.write_page(second, &page).expect("write");

        let read_page = store.read_page(second).expect("read");
        assert_eq!(read_page.read_bytes(0, 11), b"hello world");

        // Unwritten pages read as zeroes
        let blank = store.read_page(first).expect("read");
        assert!(blank.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_free_and_reuse() {
        let store = MemoryStore::new();
        let a = store.allocate_page().expect("allocate");
        let b = store.allocate_page().expect("allocate");

        store.free_page(a).expect("free");
        assert_eq!(store.free_pages(), 1);
        assert!(matches!(
            store.free_page(a),
            Err(StorageError::Corruption(_))
        ));

        assert_eq!(store.allocate_page().expect("reuse"), a);
        assert_eq!(store.allocate_page().expect("grow"), b + 1);
        assert_eq!(store.stats().frees, 1);
    }

    #[test]
    fn test_catalog() {
        let store = MemoryStore::new();
        store.catalog_insert("idx", 4).expect("insert");
        assert_eq!(store.catalog_lookup("idx").expect("lookup"), Some(4));
        assert!(matches!(
            store.catalog_insert("idx", 5),
            Err(StorageError::Superblock(SuperblockError::DuplicateTree(_)))
        ));
        assert_eq!(store.catalog_remove("idx").expect("remove"), Some(4));
        assert_eq!(store.catalog_lookup("idx").expect("lookup"), None);
    }

    #[test]
    fn test_fault_injection() {
        let config = FaultConfig {
            read_error_rate: 1.0, // Always fail
            ..Default::default()
        };
        let store = MemoryStore::with_faults(12345, config);
        let page_id = store.allocate_page().expect("allocate");

        let result = store.read_page(page_id);
        assert!(matches!(result, Err(StorageError::InjectedFault(_))));
        assert_eq!(store.stats().injected_errors, 1);

        store.set_fault_config(FaultConfig::no_faults());
        assert!(store.read_page(page_id).is_ok());
    }

    #[test]
    fn test_fault_injection_deterministic() {
        let config = FaultConfig {
            read_error_rate: 0.5,
            ..Default::default()
        };

        let run = |config: FaultConfig| {
            let store = MemoryStore::with_faults(12345, config);
            let ids: Vec<_> = (0..10)
                .map(|_| store.allocate_page().expect("allocate"))
                .collect();
            ids.iter()
                .map(|&id| store.read_page(id).is_ok())
                .collect::<Vec<_>>()
        };

        assert_eq!(
            run(config.clone()),
            run(config),
            "Same seed should produce same fault pattern"
        );
    }

    #[test]
    fn test_page_out_of_bounds() {
        let store = MemoryStore::new();
        let result = store.read_page(100);
        assert!(matches!(result, Err(StorageError::PageOutOfBounds { .. })));
    }
}
