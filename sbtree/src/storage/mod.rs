//! Page-based storage for B+trees.
//!
//! A store is a flat array of 8KB pages:
//!
//! - Page 0: Superblock (format, free list, tree catalog) in a file store
//! - Remaining pages: tree metadata, B+tree nodes and free pages
//!
//! Trees reach pages only through the [`PageStore`] trait, implemented by
//! [`FileStore`] (a single file) and [`MemoryStore`] (tests).
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//!
//! use sbtree::storage::{FileStore, Page, PageStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FileStore::open_or_create(Path::new("trees.db"))?;
//!
//! let page_id = store.allocate_page()?;
//! let mut page = Page::new();
//! page.write_bytes(0, b"hello");
//! store.write_page(page_id, &page)?;
//! store.sync()?;
//! # Ok(())
//! # }
//! ```

pub mod btree;
mod file;
mod io;
mod latch;
mod memory;
mod page;
mod superblock;

pub use file::{FileError, FileStore};
pub use io::{PageStore, StorageError};
pub use latch::{ExclusiveLatch, LatchTable, SharedLatch};
pub use memory::{FaultConfig, MemoryStore, MemoryStoreStats};
pub use page::{HEADER_SIZE, NO_PAGE, PAGE_SIZE, Page, PageError, PageId, PageType};
pub use superblock::{CatalogEntry, MAX_TREE_NAME_LEN, MAX_TREES, Superblock, SuperblockError};
