//! Fixed-size pages and their common header.
//!
//! A store is an array of 8KB pages. Page 0 is the superblock, so a page id
//! of 0 doubles as the "no page" marker inside tree nodes.
//!
//! Every page other than the superblock starts with an 8-byte header:
//!
//! | offset | size | field                          |
//! |--------|------|--------------------------------|
//! | 0      | 1    | page type                      |
//! | 1      | 1    | flags (unused, zero)           |
//! | 2      | 4    | CRC32 of the page, field zeroed |
//! | 6      | 2    | reserved                       |
//!
//! Writers stamp the type with [`Page::typed`], fill in the body and call
//! [`Page::seal`]. Readers call [`Page::verified_type`] before trusting any
//! other byte.

/// Page size in bytes (8KB).
pub const PAGE_SIZE: usize = 8192;

/// Page size as u64 for file offsets.
pub const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

/// A page identifier (0-indexed page number).
pub type PageId = u64;

/// Marker for an absent page link. Page 0 is the superblock and never a node.
pub const NO_PAGE: PageId = 0;

/// Bytes taken by the common header. Page bodies start here.
pub const HEADER_SIZE: usize = 8;

const TYPE_OFFSET: usize = 0;
const CHECKSUM_OFFSET: usize = 2;
const CHECKSUM_END: usize = CHECKSUM_OFFSET + 4;

/// What a page holds, as recorded in its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Superblock = 0x01,
    /// Metadata record of one tree.
    TreeMeta = 0x02,
    BTreeInternal = 0x03,
    BTreeLeaf = 0x04,
    /// Member of the free-page chain.
    Free = 0x05,
}

impl TryFrom<u8> for PageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        [
            Self::Superblock,
            Self::TreeMeta,
            Self::BTreeInternal,
            Self::BTreeLeaf,
            Self::Free,
        ]
        .into_iter()
        .find(|page_type| *page_type as u8 == value)
        .ok_or(value)
    }
}

/// One page worth of bytes with little-endian accessors.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    bytes: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// A zeroed page.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// A zeroed page whose header carries `page_type`.
    #[must_use]
    pub fn typed(page_type: PageType) -> Self {
        let mut page = Self::new();
        page.bytes[TYPE_OFFSET] = page_type as u8;
        page
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.bytes
    }

    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.bytes[offset..offset + len]
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(offset, N));
        out
    }

    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.bytes[offset]
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.bytes[offset] = value;
    }

    #[must_use]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes(self.array(offset))
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.array(offset))
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        u64::from_le_bytes(self.array(offset))
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// CRC32 over the whole page with the checksum field read as zero.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.bytes[..CHECKSUM_OFFSET]);
        hasher.update(&[0u8; CHECKSUM_END - CHECKSUM_OFFSET]);
        hasher.update(&self.bytes[CHECKSUM_END..]);
        hasher.finalize()
    }

    /// Record the checksum of the current contents. Call after the last write
    /// to the page.
    pub fn seal(&mut self) {
        let checksum = self.checksum();
        self.write_u32(CHECKSUM_OFFSET, checksum);
    }

    pub fn verify_checksum(&self) -> Result<(), PageError> {
        let stored = self.read_u32(CHECKSUM_OFFSET);
        let computed = self.checksum();
        if stored == computed {
            Ok(())
        } else {
            Err(PageError::ChecksumMismatch { stored, computed })
        }
    }

    /// Check the checksum, then report the page type.
    pub fn verified_type(&self) -> Result<PageType, PageError> {
        self.verify_checksum()?;
        PageType::try_from(self.bytes[TYPE_OFFSET]).map_err(PageError::InvalidPageType)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("type", &self.bytes[TYPE_OFFSET])
            .field("checksum", &self.read_u32(CHECKSUM_OFFSET))
            .finish_non_exhaustive()
    }
}

/// Errors from validating a page header.
#[derive(Debug)]
pub enum PageError {
    /// The type byte names no known page type.
    InvalidPageType(u8),
    /// The stored checksum does not match the contents.
    ChecksumMismatch { stored: u32, computed: u32 },
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageType(v) => write!(f, "invalid page type: 0x{v:02x}"),
            Self::ChecksumMismatch { stored, computed } => {
                write!(f, "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")
            }
        }
    }
}

impl std::error::Error for PageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_page_round_trips_its_type() {
        for page_type in [PageType::TreeMeta, PageType::BTreeLeaf, PageType::Free] {
            let mut page = Page::typed(page_type);
            page.seal();
            assert_eq!(page.verified_type().expect("verified"), page_type);
        }
    }

    #[test]
    fn test_little_endian_fields() {
        let mut page = Page::new();

        page.write_u16(50, 0xBEEF);
        page.write_u32(100, 0x1234_5678);
        page.write_u64(200, 0x0102_0304_0506_0708);
        page.write_bytes(500, b"hello");

        assert_eq!(page.read_bytes(50, 2), &[0xEF, 0xBE]);
        assert_eq!(page.read_u16(50), 0xBEEF);
        assert_eq!(page.read_u32(100), 0x1234_5678);
        assert_eq!(page.read_u8(200), 0x08);
        assert_eq!(page.read_u64(200), 0x0102_0304_0506_0708);
        assert_eq!(page.read_bytes(500, 5), b"hello");
    }

    #[test]
    fn test_page_type_conversion() {
        assert_eq!(PageType::try_from(0x01), Ok(PageType::Superblock));
        assert_eq!(PageType::try_from(0x02), Ok(PageType::TreeMeta));
        assert_eq!(PageType::try_from(0x05), Ok(PageType::Free));
        assert_eq!(PageType::try_from(0x00), Err(0x00));
        assert_eq!(PageType::try_from(0xFF), Err(0xFF));
    }

    #[test]
    fn test_checksum_detects_flipped_byte() {
        let mut page = Page::typed(PageType::BTreeLeaf);
        page.write_bytes(64, b"payload");
        page.seal();
        assert!(page.verify_checksum().is_ok());

        page.write_u8(64, b'P');
        assert!(matches!(
            page.verified_type(),
            Err(PageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_zeroed_page_fails_verification() {
        // An all-zero page has a zero stored checksum but a nonzero CRC.
        let page = Page::new();
        assert!(page.verify_checksum().is_err());
    }

    #[test]
    fn test_unknown_type_byte_is_rejected() {
        let mut page = Page::new();
        page.write_u8(0, 0x7F);
        page.seal();
        assert!(matches!(
            page.verified_type(),
            Err(PageError::InvalidPageType(0x7F))
        ));
    }
}
