//! Superblock structure and serialization.
//!
//! The superblock occupies page 0 and contains metadata about the store:
//! page accounting, the head of the free-page chain and the tree catalog
//! that maps tree names to their metadata pages.

// PAGE_SIZE is a compile-time constant that fits in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{NO_PAGE, PAGE_SIZE, Page, PageId};

/// Magic number identifying an sbtree store file: "SBTREEDB"
pub const MAGIC: [u8; 8] = *b"SBTREEDB";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Page size as u32 for storage in superblock.
const PAGE_SIZE_U32: u32 = PAGE_SIZE as u32;

/// Maximum length of a tree name in bytes.
pub const MAX_TREE_NAME_LEN: usize = 55;

/// Serialized size of one catalog entry: name length, name, metadata page.
const CATALOG_ENTRY_SIZE: usize = 1 + MAX_TREE_NAME_LEN + 8;

/// Superblock field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const PAGE_SIZE: usize = 12;
    pub const FILE_SIZE: usize = 16;
    pub const TOTAL_PAGE_COUNT: usize = 24;
    pub const FREE_LIST_HEAD: usize = 32;
    pub const FREE_PAGE_COUNT: usize = 40;
    pub const CATALOG_COUNT: usize = 48;
    // 52-63: reserved
    pub const CATALOG: usize = 64;
}

/// Maximum number of trees a single store can catalog.
pub const MAX_TREES: usize = (PAGE_SIZE - offsets::CATALOG) / CATALOG_ENTRY_SIZE;

/// One named tree registered in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub meta_page: PageId,
}

/// The superblock contains all metadata about the store file.
#[derive(Debug, Clone)]
pub struct Superblock {
    /// Format version number.
    pub format_version: u32,
    /// Page size in bytes (should always be `PAGE_SIZE`).
    pub page_size: u32,
    /// Total file size in bytes.
    pub file_size: u64,
    /// Total number of pages in the file.
    pub total_page_count: u64,
    /// Head of the free page chain (`NO_PAGE` when empty).
    pub free_list_head: PageId,
    /// Number of pages on the free chain.
    pub free_page_count: u64,
    /// Registered trees.
    pub catalog: Vec<CatalogEntry>,
}

impl Superblock {
    /// Create a new superblock with default values for a fresh store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size: PAGE_SIZE_U32,
            file_size: PAGE_SIZE as u64, // Initially just the superblock
            total_page_count: 1,
            free_list_head: NO_PAGE,
            free_page_count: 0,
            catalog: Vec::new(),
        }
    }

    /// Look up the metadata page of a tree by name.
    #[must_use]
    pub fn find_tree(&self, name: &str) -> Option<PageId> {
        self.catalog
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.meta_page)
    }

    /// Register a tree name.
    pub fn add_tree(&mut self, name: &str, meta_page: PageId) -> Result<(), SuperblockError> {
        if name.is_empty() || name.len() > MAX_TREE_NAME_LEN {
            return Err(SuperblockError::InvalidTreeName(name.to_string()));
        }
        if self.find_tree(name).is_some() {
            return Err(SuperblockError::DuplicateTree(name.to_string()));
        }
        if self.catalog.len() >= MAX_TREES {
            return Err(SuperblockError::CatalogFull);
        }
        self.catalog.push(CatalogEntry {
            name: name.to_string(),
            meta_page,
        });
        Ok(())
    }

    /// Unregister a tree name, returning its metadata page if it was present.
    pub fn remove_tree(&mut self, name: &str) -> Option<PageId> {
        let index = self.catalog.iter().position(|entry| entry.name == name)?;
        Some(self.catalog.remove(index).meta_page)
    }

    /// Serialize the superblock to a page.
    #[must_use]
    pub fn to_page(&self) -> Page {
        let mut page = Page::new();

        page.write_bytes(offsets::MAGIC, &MAGIC);
        page.write_u32(offsets::FORMAT_VERSION, self.format_version);
        page.write_u32(offsets::PAGE_SIZE, self.page_size);
        page.write_u64(offsets::FILE_SIZE, self.file_size);
        page.write_u64(offsets::TOTAL_PAGE_COUNT, self.total_page_count);
        page.write_u64(offsets::FREE_LIST_HEAD, self.free_list_head);
        page.write_u64(offsets::FREE_PAGE_COUNT, self.free_page_count);
        page.write_u32(offsets::CATALOG_COUNT, self.catalog.len() as u32);

        let mut offset = offsets::CATALOG;
        for entry in &self.catalog {
            page.write_u8(offset, entry.name.len() as u8);
            page.write_bytes(offset + 1, entry.name.as_bytes());
            page.write_u64(offset + 1 + MAX_TREE_NAME_LEN, entry.meta_page);
            offset += CATALOG_ENTRY_SIZE;
        }

        page
    }

    /// Deserialize a superblock from a page.
    pub fn from_page(page: &Page) -> Result<Self, SuperblockError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(page.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        let format_version = page.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let page_size = page.read_u32(offsets::PAGE_SIZE);
        if page_size != PAGE_SIZE_U32 {
            return Err(SuperblockError::InvalidPageSize(page_size));
        }

        let catalog_count = page.read_u32(offsets::CATALOG_COUNT) as usize;
        if catalog_count > MAX_TREES {
            return Err(SuperblockError::CorruptCatalog(format!(
                "{catalog_count} entries exceeds maximum {MAX_TREES}"
            )));
        }

        let mut catalog = Vec::with_capacity(catalog_count);
        let mut offset = offsets::CATALOG;
        for _ in 0..catalog_count {
            let name_len = page.read_u8(offset) as usize;
            if name_len == 0 || name_len > MAX_TREE_NAME_LEN {
                return Err(SuperblockError::CorruptCatalog(format!(
                    "invalid name length {name_len}"
                )));
            }
            let name = std::str::from_utf8(page.read_bytes(offset + 1, name_len))
                .map_err(|e| SuperblockError::CorruptCatalog(e.to_string()))?
                .to_string();
            let meta_page = page.read_u64(offset + 1 + MAX_TREE_NAME_LEN);
            catalog.push(CatalogEntry { name, meta_page });
            offset += CATALOG_ENTRY_SIZE;
        }

        Ok(Self {
            format_version,
            page_size,
            file_size: page.read_u64(offsets::FILE_SIZE),
            total_page_count: page.read_u64(offsets::TOTAL_PAGE_COUNT),
            free_list_head: page.read_u64(offsets::FREE_LIST_HEAD),
            free_page_count: page.read_u64(offsets::FREE_PAGE_COUNT),
            catalog,
        })
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when reading or updating a superblock.
#[derive(Debug)]
pub enum SuperblockError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Invalid page size.
    InvalidPageSize(u32),
    /// Catalog bytes do not decode.
    CorruptCatalog(String),
    /// Tree name is empty or too long.
    InvalidTreeName(String),
    /// A tree with this name is already registered.
    DuplicateTree(String),
    /// No room left in the catalog.
    CatalogFull,
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidPageSize(s) => write!(f, "invalid page size: {s}"),
            Self::CorruptCatalog(reason) => write!(f, "corrupt tree catalog: {reason}"),
            Self::InvalidTreeName(name) => write!(
                f,
                "invalid tree name {name:?} (must be 1-{MAX_TREE_NAME_LEN} bytes)"
            ),
            Self::DuplicateTree(name) => write!(f, "tree {name:?} already exists"),
            Self::CatalogFull => write!(f, "tree catalog is full ({MAX_TREES} trees)"),
        }
    }
}

impl std::error::Error for SuperblockError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superblock_roundtrip() {
        let mut sb = Superblock::new();
        sb.file_size = 1024 * 1024;
        sb.total_page_count = 128;
        sb.free_list_head = 15;
        sb.free_page_count = 3;
        sb.add_tree("users", 7).expect("add users");
        sb.add_tree("orders_by_date", 42).expect("add orders");

        let page = sb.to_page();
        let restored = Superblock::from_page(&page).expect("should parse");

        assert_eq!(restored.format_version, FORMAT_VERSION);
        assert_eq!(restored.page_size, PAGE_SIZE_U32);
        assert_eq!(restored.file_size, 1024 * 1024);
        assert_eq!(restored.total_page_count, 128);
        assert_eq!(restored.free_list_head, 15);
        assert_eq!(restored.free_page_count, 3);
        assert_eq!(restored.catalog, sb.catalog);
        assert_eq!(restored.find_tree("orders_by_date"), Some(42));
    }

    #[test]
    fn test_superblock_invalid_magic() {
        let mut page = Page::new();
        page.write_bytes(0, b"BADMAGIC");

        let result = Superblock::from_page(&page);
        assert!(matches!(result, Err(SuperblockError::InvalidMagic(_))));
    }

    #[test]
    fn test_catalog_rejects_duplicates_and_bad_names() {
        let mut sb = Superblock::new();
        sb.add_tree("index", 3).expect("first add");

        assert!(matches!(
            sb.add_tree("index", 4),
            Err(SuperblockError::DuplicateTree(_))
        ));
        assert!(matches!(
            sb.add_tree("", 5),
            Err(SuperblockError::InvalidTreeName(_))
        ));
        let long_name = "x".repeat(MAX_TREE_NAME_LEN + 1);
        assert!(matches!(
            sb.add_tree(&long_name, 6),
            Err(SuperblockError::InvalidTreeName(_))
        ));

        assert_eq!(sb.remove_tree("index"), Some(3));
        assert_eq!(sb.remove_tree("index"), None);
        sb.add_tree("index", 8).expect("re-add after removal");
    }

    #[test]
    fn test_catalog_full() {
        let mut sb = Superblock::new();
        for i in 0..MAX_TREES {
            sb.add_tree(&format!("tree_{i}"), i as PageId + 1)
                .expect("add within capacity");
        }
        assert!(matches!(
            sb.add_tree("one_too_many", 9999),
            Err(SuperblockError::CatalogFull)
        ));
    }
}
