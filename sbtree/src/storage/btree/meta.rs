//! Tree metadata page.
//!
//! Each tree has one metadata page, registered under the tree's name in the
//! store catalog. Its page id doubles as the tree's identity: every node page
//! records it as its owner.

use crate::storage::page::{Page, PageError, PageId, PageType};
use crate::storage::superblock::MAX_TREE_NAME_LEN;

/// Current metadata layout version.
pub const META_VERSION: u16 = 1;

/// Metadata field offsets (after the page header).
mod offsets {
    pub const VERSION: usize = 8;
    pub const CODEC_ID: usize = 10;
    pub const NAME_LEN: usize = 11;
    pub const VALUE_SIZE: usize = 12;
    pub const MAX_LEAF: usize = 14;
    pub const MAX_INTERNAL: usize = 16;
    // 18-23: reserved
    pub const MAX_KEY_LEN: usize = 24;
    // 28-31: reserved
    pub const ROOT: usize = 32;
    pub const COUNT: usize = 40;
    pub const NAME: usize = 48;
}

/// Persistent description of one tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeMeta {
    pub name: String,
    pub root: PageId,
    pub count: u64,
    pub codec_id: u8,
    pub max_key_len: u32,
    pub value_size: u16,
    pub max_leaf_entries: u16,
    pub max_internal_entries: u16,
}

impl TreeMeta {
    /// Lay the metadata out on a sealed page.
    // Field widths are validated when the tree is created.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn encode(&self) -> Page {
        debug_assert!(self.name.len() <= MAX_TREE_NAME_LEN);
        let mut page = Page::typed(PageType::TreeMeta);
        page.write_u16(offsets::VERSION, META_VERSION);
        page.write_u8(offsets::CODEC_ID, self.codec_id);
        page.write_u8(offsets::NAME_LEN, self.name.len() as u8);
        page.write_u16(offsets::VALUE_SIZE, self.value_size);
        page.write_u16(offsets::MAX_LEAF, self.max_leaf_entries);
        page.write_u16(offsets::MAX_INTERNAL, self.max_internal_entries);
        page.write_u32(offsets::MAX_KEY_LEN, self.max_key_len);
        page.write_u64(offsets::ROOT, self.root);
        page.write_u64(offsets::COUNT, self.count);
        page.write_bytes(offsets::NAME, self.name.as_bytes());
        page.seal();
        page
    }

    /// Read metadata from a page.
    pub fn decode(page: &Page) -> Result<Self, MetaError> {
        let page_type = page.verified_type().map_err(MetaError::Page)?;
        if page_type != PageType::TreeMeta {
            return Err(MetaError::WrongPageType(page_type));
        }

        let version = page.read_u16(offsets::VERSION);
        if version != META_VERSION {
            return Err(MetaError::UnsupportedVersion(version));
        }

        let name_len = usize::from(page.read_u8(offsets::NAME_LEN));
        if name_len == 0 || name_len > MAX_TREE_NAME_LEN {
            return Err(MetaError::InvalidName);
        }
        let name = std::str::from_utf8(page.read_bytes(offsets::NAME, name_len))
            .map_err(|_| MetaError::InvalidName)?
            .to_string();

        Ok(Self {
            name,
            root: page.read_u64(offsets::ROOT),
            count: page.read_u64(offsets::COUNT),
            codec_id: page.read_u8(offsets::CODEC_ID),
            max_key_len: page.read_u32(offsets::MAX_KEY_LEN),
            value_size: page.read_u16(offsets::VALUE_SIZE),
            max_leaf_entries: page.read_u16(offsets::MAX_LEAF),
            max_internal_entries: page.read_u16(offsets::MAX_INTERNAL),
        })
    }
}

/// Errors that can occur when reading a metadata page.
#[derive(Debug)]
pub enum MetaError {
    /// Page header or checksum is invalid.
    Page(PageError),
    /// Page holds something other than tree metadata.
    WrongPageType(PageType),
    /// Unknown layout version.
    UnsupportedVersion(u16),
    /// Stored name is empty, too long or not UTF-8.
    InvalidName,
}

impl std::fmt::Display for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page(e) => write!(f, "{e}"),
            Self::WrongPageType(t) => write!(f, "expected tree metadata, found {t:?} page"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported metadata version: {v}"),
            Self::InvalidName => write!(f, "invalid tree name in metadata"),
        }
    }
}

impl std::error::Error for MetaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TreeMeta {
        TreeMeta {
            name: "users_by_age".to_string(),
            root: 12,
            count: 500_000,
            codec_id: 1,
            max_key_len: 4,
            value_size: 10,
            max_leaf_entries: 583,
            max_internal_entries: 679,
        }
    }

    #[test]
    fn test_meta_roundtrip() {
        let page = sample().encode();
        assert_eq!(TreeMeta::decode(&page).expect("decode"), sample());
    }

    #[test]
    fn test_meta_rejects_other_pages() {
        let mut page = Page::typed(PageType::BTreeLeaf);
        page.seal();
        assert!(matches!(
            TreeMeta::decode(&page),
            Err(MetaError::WrongPageType(PageType::BTreeLeaf))
        ));
    }

    #[test]
    fn test_meta_detects_corruption() {
        let mut page = sample().encode();
        page.write_u64(offsets::COUNT, 1);
        assert!(matches!(TreeMeta::decode(&page), Err(MetaError::Page(_))));
    }
}
