//! Page store abstraction.
//!
//! Trees never touch files directly. They issue logical page requests
//! (read, write, allocate, free) and catalog lookups against a [`PageStore`],
//! which lets the same engine run over a real file or over the in-memory
//! store used by tests.
//!
//! Every method takes `&self`: stores synchronize internally so that many
//! readers and the single writer of each tree can share one store.

use crate::storage::page::{Page, PageId};
use crate::storage::superblock::SuperblockError;

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// Page out of bounds.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// Superblock could not be read or updated.
    Superblock(SuperblockError),
    /// Injected fault for failure-path testing.
    InjectedFault(String),
    /// Corruption detected.
    Corruption(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => write!(
                f,
                "page {page_id} out of bounds (total pages: {total_pages})"
            ),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Superblock(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SuperblockError> for StorageError {
    fn from(e: SuperblockError) -> Self {
        Self::Superblock(e)
    }
}

/// Abstraction over page-based storage used by trees.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_page` returns the last written content for a page
/// - `allocate_page` never returns page 0 or a page that is currently allocated
/// - `free_page` makes the page available to a later `allocate_page`
/// - catalog changes are visible to every handle sharing the store
/// - `sync` makes all previous writes durable
pub trait PageStore: Send + Sync {
    /// Read a page from storage.
    fn read_page(&self, page_id: PageId) -> Result<Page, StorageError>;

    /// Write a full page to storage.
    fn write_page(&self, page_id: PageId, page: &Page) -> Result<(), StorageError>;

    /// Allocate one page, reusing freed pages before growing the store.
    ///
    /// The contents of the returned page are undefined until written.
    fn allocate_page(&self) -> Result<PageId, StorageError>;

    /// Release a page for reuse.
    fn free_page(&self, page_id: PageId) -> Result<(), StorageError>;

    /// Sync all pending writes to durable storage.
    fn sync(&self) -> Result<(), StorageError>;

    /// Total number of pages in the store, including page 0 and free pages.
    fn total_pages(&self) -> u64;

    /// Number of pages currently waiting for reuse.
    fn free_pages(&self) -> u64;

    /// Find the metadata page registered for a tree name.
    fn catalog_lookup(&self, name: &str) -> Result<Option<PageId>, StorageError>;

    /// Register a tree name.
    ///
    /// Fails with [`SuperblockError::DuplicateTree`] if the name is taken.
    fn catalog_insert(&self, name: &str, meta_page: PageId) -> Result<(), StorageError>;

    /// Unregister a tree name, returning its metadata page if it was present.
    fn catalog_remove(&self, name: &str) -> Result<Option<PageId>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let e = StorageError::PageOutOfBounds {
            page_id: 10,
            total_pages: 5,
        };
        assert!(e.to_string().contains("page 10"));
        assert!(e.to_string().contains("total pages: 5"));

        let e = StorageError::InjectedFault("test fault".to_string());
        assert!(e.to_string().contains("test fault"));
    }

    #[test]
    fn test_storage_error_source_chains_superblock() {
        use std::error::Error;

        let e = StorageError::from(SuperblockError::CatalogFull);
        assert!(e.source().is_some());
        assert!(e.to_string().contains("catalog is full"));
    }
}
