//! Single-file page store.
//!
//! This module handles reading and writing pages to the store file. Page 0
//! holds the superblock; every other page is either a tree page or a member
//! of the free-page chain rooted at `Superblock::free_list_head`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::storage::io::{PageStore, StorageError};
use crate::storage::page::{HEADER_SIZE, NO_PAGE, PAGE_SIZE_U64, Page, PageId, PageType};
use crate::storage::superblock::{Superblock, SuperblockError};

/// Offset of the next-free pointer inside a free page.
const FREE_NEXT_OFFSET: usize = HEADER_SIZE;

/// A store file handle with low-level page I/O operations.
pub struct FileStore {
    inner: Mutex<FileInner>,
}

struct FileInner {
    file: File,
    superblock: Superblock,
}

impl FileStore {
    /// Create a new store file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path) -> Result<Self, FileError> {
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(FileError::Io)?;

        // Initialize with a fresh superblock
        let superblock = Superblock::new();
        let page = superblock.to_page();

        file.write_all(page.as_bytes()).map_err(FileError::Io)?;
        file.sync_all().map_err(FileError::Io)?;

        tracing::debug!(path = %path.display(), "created store file");

        Ok(Self {
            inner: Mutex::new(FileInner { file, superblock }),
        })
    }

    /// Open an existing store file.
    pub fn open(path: &Path) -> Result<Self, FileError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;

        let mut page = Page::new();
        file.read_exact(page.as_bytes_mut()).map_err(FileError::Io)?;

        let superblock = Superblock::from_page(&page).map_err(FileError::Superblock)?;

        let actual_len = file.metadata().map_err(FileError::Io)?.len();
        if actual_len < superblock.total_page_count * PAGE_SIZE_U64 {
            return Err(FileError::Truncated {
                expected: superblock.total_page_count * PAGE_SIZE_U64,
                actual: actual_len,
            });
        }

        tracing::debug!(
            path = %path.display(),
            pages = superblock.total_page_count,
            trees = superblock.catalog.len(),
            "opened store file"
        );

        Ok(Self {
            inner: Mutex::new(FileInner { file, superblock }),
        })
    }

    /// Open the store at `path`, creating it first if it does not exist.
    pub fn open_or_create(path: &Path) -> Result<Self, FileError> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Get a copy of the current superblock.
    #[must_use]
    pub fn superblock(&self) -> Superblock {
        self.lock().superblock.clone()
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn lock(&self) -> MutexGuard<'_, FileInner> {
        self.inner.lock().expect("lock poisoned")
    }
}

impl FileInner {
    fn check_bounds(&self, page_id: PageId) -> Result<(), FileError> {
        if page_id == 0 || page_id >= self.superblock.total_page_count {
            return Err(FileError::PageOutOfBounds {
                page_id,
                total_pages: self.superblock.total_page_count,
            });
        }
        Ok(())
    }

    fn read_into(&mut self, page_id: PageId, page: &mut Page) -> Result<(), FileError> {
        self.file
            .seek(SeekFrom::Start(page_id * PAGE_SIZE_U64))
            .map_err(FileError::Io)?;
        self.file
            .read_exact(page.as_bytes_mut())
            .map_err(FileError::Io)
    }

    fn write_from(&mut self, page_id: PageId, page: &Page) -> Result<(), FileError> {
        self.file
            .seek(SeekFrom::Start(page_id * PAGE_SIZE_U64))
            .map_err(FileError::Io)?;
        self.file.write_all(page.as_bytes()).map_err(FileError::Io)
    }

    /// Write the superblock to page 0.
    fn write_superblock(&mut self) -> Result<(), FileError> {
        let page = self.superblock.to_page();
        self.write_from(0, &page)
    }

    /// Extend the file by one page.
    fn grow(&mut self) -> Result<PageId, FileError> {
        let page_id = self.superblock.total_page_count;
        let new_total = page_id + 1;
        let new_size = new_total * PAGE_SIZE_U64;

        self.file.set_len(new_size).map_err(FileError::Io)?;

        self.superblock.total_page_count = new_total;
        self.superblock.file_size = new_size;
        Ok(page_id)
    }
}

/// Errors that can occur during file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(std::path::PathBuf),
    /// Superblock error.
    Superblock(SuperblockError),
    /// Page ID out of bounds.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// File is shorter than the superblock claims.
    Truncated { expected: u64, actual: u64 },
    /// A page on the free chain is not a free page.
    CorruptFreeList { page_id: PageId },
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => {
                write!(
                    f,
                    "page {page_id} out of bounds (total pages: {total_pages})"
                )
            }
            Self::Truncated { expected, actual } => {
                write!(f, "file truncated: expected {expected} bytes, found {actual}")
            }
            Self::CorruptFreeList { page_id } => {
                write!(f, "page {page_id} on the free list is not a free page")
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Superblock(e) => Some(e),
            Self::AlreadyExists(_)
            | Self::PageOutOfBounds { .. }
            | Self::Truncated { .. }
            | Self::CorruptFreeList { .. } => None,
        }
    }
}

impl From<FileError> for StorageError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Io(io_err) => Self::Io(io_err),
            FileError::PageOutOfBounds {
                page_id,
                total_pages,
            } => Self::PageOutOfBounds {
                page_id,
                total_pages,
            },
            FileError::AlreadyExists(path) => Self::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("file already exists: {}", path.display()),
            )),
            FileError::Superblock(e) => Self::Superblock(e),
            e @ (FileError::Truncated { .. } | FileError::CorruptFreeList { .. }) => {
                Self::Corruption(e.to_string())
            }
        }
    }
}

impl PageStore for FileStore {
    fn read_page(&self, page_id: PageId) -> Result<Page, StorageError> {
        let mut page = Page::new();
        let mut inner = self.lock();
        inner.check_bounds(page_id)?;
        inner.read_into(page_id, &mut page)?;
        Ok(page)
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.check_bounds(page_id)?;
        inner.write_from(page_id, page)?;
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId, StorageError> {
        let mut page = Page::new();
        let mut inner = self.lock();

        let head = inner.superblock.free_list_head;
        let page_id = if head == NO_PAGE {
            inner.grow()?
        } else {
            inner.check_bounds(head)?;
            inner.read_into(head, &mut page)?;
            if !page.verified_type().is_ok_and(|t| t == PageType::Free) {
                return Err(FileError::CorruptFreeList { page_id: head }.into());
            }
            inner.superblock.free_list_head = page.read_u64(FREE_NEXT_OFFSET);
            inner.superblock.free_page_count = inner.superblock.free_page_count.saturating_sub(1);
            head
        };

        inner.write_superblock()?;
        Ok(page_id)
    }

    fn free_page(&self, page_id: PageId) -> Result<(), StorageError> {
        let mut page = Page::typed(PageType::Free);

        let mut inner = self.lock();
        inner.check_bounds(page_id)?;
        page.write_u64(FREE_NEXT_OFFSET, inner.superblock.free_list_head);
        page.seal();
        inner.write_from(page_id, &page)?;

        inner.superblock.free_list_head = page_id;
        inner.superblock.free_page_count += 1;
        inner.write_superblock()?;
        Ok(())
    }

    fn sync(&self) -> Result<(), StorageError> {
        self.lock().file.sync_all()?;
        Ok(())
    }

    fn total_pages(&self) -> u64 {
        self.lock().superblock.total_page_count
    }

    fn free_pages(&self) -> u64 {
        self.lock().superblock.free_page_count
    }

    fn catalog_lookup(&self, name: &str) -> Result<Option<PageId>, StorageError> {
        Ok(self.lock().superblock.find_tree(name))
    }

    fn catalog_insert(&self, name: &str, meta_page: PageId) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.superblock.add_tree(name, meta_page)?;
        inner.write_superblock()?;
        Ok(())
    }

    fn catalog_remove(&self, name: &str) -> Result<Option<PageId>, StorageError> {
        let mut inner = self.lock();
        let removed = inner.superblock.remove_tree(name);
        if removed.is_some() {
            inner.write_superblock()?;
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("FileStore")
            .field("total_pages", &inner.superblock.total_page_count)
            .field("free_pages", &inner.superblock.free_page_count)
            .field("trees", &inner.superblock.catalog.len())
            .finish_non_exhaustive()
    }
}
