//! B+tree node types and serialization.
//!
//! Every node occupies one 8KB page:
//! - Internal nodes: N separator keys and N+1 child page pointers
//! - Leaf nodes: (key, value) entries, doubly-linked for range scans
//!
//! Keys are written with the tree's [`KeyCodec`], back to back, so a page
//! holds as many entries as the codec's maximum key size allows. Values are
//! fixed-width ([`FixedValue`]).

#![allow(clippy::cast_possible_truncation)]

use crate::storage::btree::codec::{CodecError, KeyCodec};
use crate::storage::btree::value::FixedValue;
use crate::storage::page::{HEADER_SIZE, NO_PAGE, PAGE_SIZE, Page, PageError, PageId, PageType};

/// Node header layout (after page header):
/// - `key_count`: 2 bytes
/// - `owner`: 8 bytes (metadata page of the owning tree)
/// - `prev_leaf`: 8 bytes (only for leaf nodes, 0 if none)
/// - `next_leaf`: 8 bytes (only for leaf nodes, 0 if none)
///
/// Total: 26 bytes
const NODE_HEADER_SIZE: usize = 26;

/// Offset where node data starts (after page header + node header).
const DATA_OFFSET: usize = HEADER_SIZE + NODE_HEADER_SIZE;

/// Available space for node data.
pub const DATA_SPACE: usize = PAGE_SIZE - DATA_OFFSET;

/// Size of a child page pointer.
const CHILD_SIZE: usize = 8;

/// Maximum entries a leaf can hold when every key has its maximum size.
#[must_use]
pub const fn leaf_capacity(max_key_len: usize, value_size: usize) -> usize {
    DATA_SPACE / (max_key_len + value_size)
}

/// Maximum separator keys an internal node can hold.
///
/// `DATA_SPACE` = 8 + N * (`max_key_len` + 8)
#[must_use]
pub const fn internal_capacity(max_key_len: usize) -> usize {
    (DATA_SPACE - CHILD_SIZE) / (max_key_len + CHILD_SIZE)
}

/// Node type discriminant, taken from the page type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal,
    Leaf,
}

/// Header information for a B+tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub node_type: NodeType,
    pub key_count: u16,
    pub owner: PageId,
    pub prev_leaf: PageId,
    pub next_leaf: PageId,
}

impl NodeHeader {
    /// Read and checksum-verify a node header.
    pub fn from_page(page: &Page) -> Result<Self, NodeError> {
        let node_type = match page.verified_type().map_err(NodeError::Page)? {
            PageType::BTreeInternal => NodeType::Internal,
            PageType::BTreeLeaf => NodeType::Leaf,
            other => return Err(NodeError::NotANode(other)),
        };

        let offset = HEADER_SIZE;
        Ok(Self {
            node_type,
            key_count: page.read_u16(offset),
            owner: page.read_u64(offset + 2),
            prev_leaf: page.read_u64(offset + 10),
            next_leaf: page.read_u64(offset + 18),
        })
    }

    /// Start a fresh page of the node's type carrying this header.
    fn to_page(self) -> Page {
        let mut page = Page::typed(match self.node_type {
            NodeType::Internal => PageType::BTreeInternal,
            NodeType::Leaf => PageType::BTreeLeaf,
        });
        let offset = HEADER_SIZE;
        page.write_u16(offset, self.key_count);
        page.write_u64(offset + 2, self.owner);
        page.write_u64(offset + 10, self.prev_leaf);
        page.write_u64(offset + 18, self.next_leaf);
        page
    }

    fn check_owner(&self, owner: PageId) -> Result<(), NodeError> {
        if self.owner == owner {
            Ok(())
        } else {
            Err(NodeError::ForeignOwner {
                expected: owner,
                found: self.owner,
            })
        }
    }
}

/// Bounds-checked reader over a node's data area.
struct BodyReader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(page: &'a Page) -> Self {
        Self {
            body: page.read_bytes(DATA_OFFSET, DATA_SPACE),
            pos: 0,
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], NodeError> {
        let bytes = self
            .body
            .get(self.pos..self.pos + len)
            .ok_or(NodeError::Truncated)?;
        self.pos += len;
        Ok(bytes)
    }

    fn child(&mut self) -> Result<PageId, NodeError> {
        let mut buf = [0u8; CHILD_SIZE];
        buf.copy_from_slice(self.take(CHILD_SIZE)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn key<C: KeyCodec>(&mut self, codec: &C) -> Result<C::Key, NodeError> {
        let (key, used) = codec
            .decode(&self.body[self.pos..])
            .map_err(NodeError::Key)?;
        self.pos += used;
        Ok(key)
    }
}

/// Lay a node out on a fresh page and seal it, or fail if the body does not
/// fit.
fn seal_node(header: NodeHeader, body: &[u8]) -> Result<Page, NodeError> {
    if body.len() > DATA_SPACE {
        return Err(NodeError::Overflow {
            size: body.len(),
            space: DATA_SPACE,
        });
    }
    let mut page = header.to_page();
    page.write_bytes(DATA_OFFSET, body);
    page.seal();
    Ok(page)
}

fn check_order<C: KeyCodec>(codec: &C, keys: impl Iterator<Item = C::Key>) -> Result<(), NodeError> {
    let mut prev: Option<C::Key> = None;
    for (index, key) in keys.enumerate() {
        if let Some(prev) = &prev
            && codec.compare(prev, &key) != std::cmp::Ordering::Less
        {
            return Err(NodeError::OutOfOrder { index });
        }
        prev = Some(key);
    }
    Ok(())
}

/// An internal (non-leaf) B+tree node.
///
/// Stores N keys and N+1 child pointers.
/// `Child[i]` contains keys < `Key[i]`
/// `Child[i+1]` contains keys >= `Key[i]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode<K> {
    pub owner: PageId,
    /// Keys in sorted order.
    pub keys: Vec<K>,
    /// Child page pointers. `children.len()` == `keys.len()` + 1
    pub children: Vec<PageId>,
}

impl<K: Clone> InternalNode<K> {
    /// Create an internal node with one separator and two children.
    #[must_use]
    pub fn with_children(owner: PageId, left_child: PageId, key: K, right_child: PageId) -> Self {
        Self {
            owner,
            keys: vec![key],
            children: vec![left_child, right_child],
        }
    }

    /// Read an internal node from a page.
    pub fn decode<C>(page: &Page, page_id: PageId, codec: &C, owner: PageId) -> Result<Self, NodeError>
    where
        C: KeyCodec<Key = K>,
    {
        let header = NodeHeader::from_page(page)?;
        if header.node_type != NodeType::Internal {
            return Err(NodeError::WrongNodeType);
        }
        Self::decode_body(page, page_id, &header, codec, owner)
    }

    fn decode_body<C>(
        page: &Page,
        page_id: PageId,
        header: &NodeHeader,
        codec: &C,
        owner: PageId,
    ) -> Result<Self, NodeError>
    where
        C: KeyCodec<Key = K>,
    {
        header.check_owner(owner)?;
        let key_count = usize::from(header.key_count);
        if key_count == 0 {
            return Err(NodeError::EmptyInternal);
        }

        let mut reader = BodyReader::new(page);
        let mut keys = Vec::with_capacity(key_count);
        let mut children = Vec::with_capacity(key_count + 1);

        children.push(reader.child()?);
        for _ in 0..key_count {
            keys.push(reader.key(codec)?);
            children.push(reader.child()?);
        }

        if let Some(index) = children
            .iter()
            .position(|&child| child == NO_PAGE || child == page_id)
        {
            return Err(NodeError::BadChild {
                index,
                child: children[index],
            });
        }
        check_order(codec, keys.iter().cloned())?;

        Ok(Self {
            owner,
            keys,
            children,
        })
    }

    /// Encode the node onto a sealed page.
    pub fn encode<C>(&self, codec: &C) -> Result<Page, NodeError>
    where
        C: KeyCodec<Key = K>,
    {
        debug_assert_eq!(self.children.len(), self.keys.len() + 1);
        let mut body = Vec::with_capacity(DATA_SPACE);
        body.extend_from_slice(&self.children[0].to_le_bytes());
        for (key, child) in self.keys.iter().zip(&self.children[1..]) {
            codec.encode(key, &mut body);
            body.extend_from_slice(&child.to_le_bytes());
        }

        let header = NodeHeader {
            node_type: NodeType::Internal,
            key_count: self.keys.len() as u16,
            owner: self.owner,
            prev_leaf: NO_PAGE,
            next_leaf: NO_PAGE,
        };
        seal_node(header, &body)
    }

    /// Find the child index for a given key.
    pub fn find_child_index<C>(&self, codec: &C, key: &K) -> usize
    where
        C: KeyCodec<Key = K>,
    {
        match self.keys.binary_search_by(|stored| codec.compare(stored, key)) {
            Ok(i) => i + 1, // Exact match, go right
            Err(i) => i,    // Insert position
        }
    }

    /// Insert a separator and its right child at position `index`.
    pub fn insert_at(&mut self, index: usize, key: K, right_child: PageId) {
        self.keys.insert(index, key);
        self.children.insert(index + 1, right_child);
    }

    /// Split the node, returning the promoted median key and the new right node.
    #[must_use]
    pub fn split(&mut self) -> (K, Self) {
        let mid = self.keys.len() / 2;

        // Right node gets keys and children after median
        let right_keys: Vec<K> = self.keys.drain(mid + 1..).collect();
        let right_children: Vec<PageId> = self.children.drain(mid + 1..).collect();

        // Remove median key from left node
        let median = self.keys.remove(mid);

        let right_node = Self {
            owner: self.owner,
            keys: right_keys,
            children: right_children,
        };

        (median, right_node)
    }
}

/// A key-value entry in a leaf node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry<K, V> {
    pub key: K,
    pub value: V,
}

/// A leaf B+tree node.
///
/// Stores key-value pairs and links to sibling leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode<K, V> {
    pub owner: PageId,
    pub prev_leaf: PageId,
    pub next_leaf: PageId,
    /// Entries in sorted order by key.
    pub entries: Vec<LeafEntry<K, V>>,
}

impl<K: Clone, V: FixedValue> LeafNode<K, V> {
    /// Create a new empty, unlinked leaf.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::new() is not const-stable
    pub fn new(owner: PageId) -> Self {
        Self {
            owner,
            prev_leaf: NO_PAGE,
            next_leaf: NO_PAGE,
            entries: Vec::new(),
        }
    }

    /// Read a leaf node from a page.
    pub fn decode<C>(page: &Page, page_id: PageId, codec: &C, owner: PageId) -> Result<Self, NodeError>
    where
        C: KeyCodec<Key = K>,
    {
        let header = NodeHeader::from_page(page)?;
        if header.node_type != NodeType::Leaf {
            return Err(NodeError::WrongNodeType);
        }
        Self::decode_body(page, page_id, &header, codec, owner)
    }

    fn decode_body<C>(
        page: &Page,
        page_id: PageId,
        header: &NodeHeader,
        codec: &C,
        owner: PageId,
    ) -> Result<Self, NodeError>
    where
        C: KeyCodec<Key = K>,
    {
        header.check_owner(owner)?;
        if header.prev_leaf == page_id || header.next_leaf == page_id {
            return Err(NodeError::SelfLink);
        }

        let entry_count = usize::from(header.key_count);
        let mut reader = BodyReader::new(page);
        let mut entries = Vec::with_capacity(entry_count);

        for _ in 0..entry_count {
            let key = reader.key(codec)?;
            let value = V::read_from(reader.take(V::SIZE)?);
            entries.push(LeafEntry { key, value });
        }
        check_order(codec, entries.iter().map(|e| e.key.clone()))?;

        Ok(Self {
            owner,
            prev_leaf: header.prev_leaf,
            next_leaf: header.next_leaf,
            entries,
        })
    }

    /// Encode the leaf, links included, onto a sealed page.
    pub fn encode<C>(&self, codec: &C) -> Result<Page, NodeError>
    where
        C: KeyCodec<Key = K>,
    {
        let mut body = Vec::with_capacity(DATA_SPACE);
        let mut value_buf = vec![0u8; V::SIZE];
        for entry in &self.entries {
            codec.encode(&entry.key, &mut body);
            entry.value.write_to(&mut value_buf);
            body.extend_from_slice(&value_buf);
        }

        let header = NodeHeader {
            node_type: NodeType::Leaf,
            key_count: self.entries.len() as u16,
            owner: self.owner,
            prev_leaf: self.prev_leaf,
            next_leaf: self.next_leaf,
        };
        seal_node(header, &body)
    }

    /// Find the index where a key should be inserted (or exists).
    pub fn find_index<C>(&self, codec: &C, key: &K) -> Result<usize, usize>
    where
        C: KeyCodec<Key = K>,
    {
        self.entries
            .binary_search_by(|e| codec.compare(&e.key, key))
    }

    /// Get a value by key.
    pub fn get<C>(&self, codec: &C, key: &K) -> Option<V>
    where
        C: KeyCodec<Key = K>,
    {
        self.find_index(codec, key)
            .ok()
            .map(|i| self.entries[i].value)
    }

    /// Insert or update an entry.
    ///
    /// Returns the old value if updating, None if inserting.
    pub fn insert<C>(&mut self, codec: &C, key: K, value: V) -> Option<V>
    where
        C: KeyCodec<Key = K>,
    {
        match self.find_index(codec, &key) {
            Ok(i) => Some(std::mem::replace(&mut self.entries[i].value, value)),
            Err(i) => {
                self.entries.insert(i, LeafEntry { key, value });
                None
            }
        }
    }

    /// Remove an entry by key.
    ///
    /// Returns the removed value if found.
    pub fn remove<C>(&mut self, codec: &C, key: &K) -> Option<V>
    where
        C: KeyCodec<Key = K>,
    {
        self.find_index(codec, key)
            .ok()
            .map(|i| self.entries.remove(i).value)
    }

    /// Split the node, returning the new right node.
    ///
    /// The right half receives the median entry; its first key is the
    /// separator for the parent. Sibling links are left to the caller.
    #[must_use]
    pub fn split(&mut self) -> Self {
        let mid = self.entries.len() / 2;
        Self {
            owner: self.owner,
            prev_leaf: NO_PAGE,
            next_leaf: NO_PAGE,
            entries: self.entries.drain(mid..).collect(),
        }
    }
}

/// A decoded node of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<K, V> {
    Internal(InternalNode<K>),
    Leaf(LeafNode<K, V>),
}

impl<K: Clone, V: FixedValue> Node<K, V> {
    /// Decode whichever node type the page holds.
    pub fn decode<C>(page: &Page, page_id: PageId, codec: &C, owner: PageId) -> Result<Self, NodeError>
    where
        C: KeyCodec<Key = K>,
    {
        let header = NodeHeader::from_page(page)?;
        match header.node_type {
            NodeType::Internal => {
                InternalNode::decode_body(page, page_id, &header, codec, owner).map(Self::Internal)
            }
            NodeType::Leaf => {
                LeafNode::decode_body(page, page_id, &header, codec, owner).map(Self::Leaf)
            }
        }
    }

    pub fn encode<C>(&self, codec: &C) -> Result<Page, NodeError>
    where
        C: KeyCodec<Key = K>,
    {
        match self {
            Self::Internal(node) => node.encode(codec),
            Self::Leaf(node) => node.encode(codec),
        }
    }
}

/// Errors that can occur when decoding or encoding B+tree nodes.
#[derive(Debug)]
pub enum NodeError {
    /// Page header or checksum is invalid.
    Page(PageError),
    /// Page holds something other than a node.
    NotANode(PageType),
    /// Wrong node type for operation.
    WrongNodeType,
    /// Node belongs to a different tree.
    ForeignOwner { expected: PageId, found: PageId },
    /// Entries run past the end of the page.
    Truncated,
    /// A key failed to decode.
    Key(CodecError),
    /// Keys are not strictly increasing.
    OutOfOrder { index: usize },
    /// Internal node without separators.
    EmptyInternal,
    /// Child pointer is null or points at the node itself.
    BadChild { index: usize, child: PageId },
    /// Leaf links to itself.
    SelfLink,
    /// Encoded node does not fit in a page.
    Overflow { size: usize, space: usize },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page(e) => write!(f, "{e}"),
            Self::NotANode(page_type) => write!(f, "page is not a tree node ({page_type:?})"),
            Self::WrongNodeType => write!(f, "wrong node type for operation"),
            Self::ForeignOwner { expected, found } => {
                write!(f, "node owned by tree {found}, expected {expected}")
            }
            Self::Truncated => write!(f, "node data truncated"),
            Self::Key(e) => write!(f, "key decode failed: {e}"),
            Self::OutOfOrder { index } => write!(f, "key {index} out of order"),
            Self::EmptyInternal => write!(f, "internal node has no keys"),
            Self::BadChild { index, child } => write!(f, "invalid child {child} at {index}"),
            Self::SelfLink => write!(f, "leaf links to itself"),
            Self::Overflow { size, space } => {
                write!(f, "node needs {size} bytes but a page holds {space}")
            }
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            Self::Key(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::codec::{IntegerCodec, StringCodec};
    use crate::storage::btree::value::RecordId;

    const OWNER: PageId = 5;

    fn leaf_with(keys: &[i32]) -> LeafNode<i32, RecordId> {
        let mut leaf = LeafNode::new(OWNER);
        for &k in keys {
            leaf.insert(&IntegerCodec, k, RecordId::new(1, u64::from(k.unsigned_abs())));
        }
        leaf
    }

    #[test]
    fn test_capacities() {
        // i32 keys with RecordId values
        assert_eq!(leaf_capacity(4, 10), DATA_SPACE / 14);
        assert_eq!(internal_capacity(4), (DATA_SPACE - 8) / 12);
        assert!(leaf_capacity(2 + 128, 10) >= 4);
    }

    #[test]
    fn test_internal_node_roundtrip() {
        let node = InternalNode {
            owner: OWNER,
            keys: vec![10, 20, 30],
            children: vec![11, 21, 31, 41],
        };

        let page = node.encode(&IntegerCodec).expect("encode");

        let restored = InternalNode::decode(&page, 99, &IntegerCodec, OWNER).expect("should parse");
        assert_eq!(restored, node);
    }

    #[test]
    fn test_leaf_node_roundtrip_with_strings() {
        let codec = StringCodec::new(32);
        let mut leaf: LeafNode<String, RecordId> = LeafNode::new(OWNER);
        leaf.prev_leaf = 7;
        leaf.next_leaf = 9;
        for (i, word) in ["pear", "apple", "fig"].iter().enumerate() {
            leaf.insert(&codec, (*word).to_string(), RecordId::new(2, i as u64));
        }

        let page = leaf.encode(&codec).expect("encode");

        let restored = LeafNode::decode(&page, 8, &codec, OWNER).expect("should parse");
        assert_eq!(restored, leaf);
        let keys: Vec<_> = restored.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["apple", "fig", "pear"]);

        match Node::<String, RecordId>::decode(&page, 8, &codec, OWNER).expect("decode") {
            Node::Leaf(node) => assert_eq!(node.entries.len(), 3),
            Node::Internal(_) => panic!("expected a leaf"),
        }
    }

    #[test]
    fn test_leaf_insert_update_remove() {
        let codec = IntegerCodec;
        let mut leaf = leaf_with(&[3, 1, 2]);
        assert_eq!(leaf.entries.len(), 3);

        let old = leaf.insert(&codec, 2, RecordId::new(9, 9));
        assert_eq!(old, Some(RecordId::new(1, 2)));
        assert_eq!(leaf.get(&codec, &2), Some(RecordId::new(9, 9)));

        assert_eq!(leaf.remove(&codec, &1), Some(RecordId::new(1, 1)));
        assert_eq!(leaf.remove(&codec, &1), None);
        assert_eq!(leaf.find_index(&codec, &1), Err(0));
    }

    #[test]
    fn test_internal_node_find_child() {
        let node = InternalNode {
            owner: OWNER,
            keys: vec![10, 20, 30],
            children: vec![100, 200, 300, 400],
        };

        assert_eq!(node.find_child_index(&IntegerCodec, &5), 0);
        assert_eq!(node.find_child_index(&IntegerCodec, &10), 1);
        assert_eq!(node.find_child_index(&IntegerCodec, &15), 1);
        assert_eq!(node.find_child_index(&IntegerCodec, &35), 3);
    }

    #[test]
    fn test_leaf_split_puts_median_right() {
        let mut even = leaf_with(&[1, 2, 3, 4, 5, 6]);
        let right = even.split();
        assert_eq!(even.entries.len(), 3);
        assert_eq!(right.entries[0].key, 4);

        let mut odd = leaf_with(&[1, 2, 3, 4, 5]);
        let right = odd.split();
        assert_eq!(odd.entries.len(), 2);
        assert_eq!(right.entries.len(), 3);
        assert_eq!(right.entries[0].key, 3);
    }

    #[test]
    fn test_internal_split_promotes_median() {
        let mut node = InternalNode {
            owner: OWNER,
            keys: vec![10, 20, 30, 40, 50],
            children: vec![1, 2, 3, 4, 5, 6],
        };

        let (median, right) = node.split();
        assert_eq!(median, 30);
        assert_eq!(node.keys, vec![10, 20]);
        assert_eq!(node.children, vec![1, 2, 3]);
        assert_eq!(right.keys, vec![40, 50]);
        assert_eq!(right.children, vec![4, 5, 6]);
    }

    #[test]
    fn test_decode_detects_checksum_mismatch() {
        let mut page = leaf_with(&[1, 2, 3]).encode(&IntegerCodec).expect("encode");

        page.write_u8(DATA_OFFSET, page.read_u8(DATA_OFFSET) ^ 0x40);
        let result = LeafNode::<i32, RecordId>::decode(&page, 3, &IntegerCodec, OWNER);
        assert!(matches!(
            result,
            Err(NodeError::Page(PageError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn test_decode_detects_out_of_order_keys() {
        let mut leaf = leaf_with(&[]);
        leaf.entries = vec![
            LeafEntry {
                key: 5,
                value: RecordId::new(0, 5),
            },
            LeafEntry {
                key: 5,
                value: RecordId::new(0, 6),
            },
        ];
        let page = leaf.encode(&IntegerCodec).expect("encode");

        let result = LeafNode::<i32, RecordId>::decode(&page, 3, &IntegerCodec, OWNER);
        assert!(matches!(result, Err(NodeError::OutOfOrder { index: 1 })));
    }

    #[test]
    fn test_decode_detects_foreign_owner_and_wrong_type() {
        let page = leaf_with(&[1]).encode(&IntegerCodec).expect("encode");

        assert!(matches!(
            LeafNode::<i32, RecordId>::decode(&page, 3, &IntegerCodec, OWNER + 1),
            Err(NodeError::ForeignOwner { .. })
        ));
        assert!(matches!(
            InternalNode::<i32>::decode(&page, 3, &IntegerCodec, OWNER),
            Err(NodeError::WrongNodeType)
        ));
    }

    #[test]
    fn test_decode_rejects_bad_internal_nodes() {
        let self_pointing = InternalNode {
            owner: OWNER,
            keys: vec![10],
            children: vec![4, 3],
        };
        let page = self_pointing.encode(&IntegerCodec).expect("encode");
        assert!(matches!(
            InternalNode::<i32>::decode(&page, 3, &IntegerCodec, OWNER),
            Err(NodeError::BadChild { index: 1, child: 3 })
        ));

        let empty = InternalNode::<i32> {
            owner: OWNER,
            keys: vec![],
            children: vec![4],
        };
        let page = empty.encode(&IntegerCodec).expect("encode");
        assert!(matches!(
            InternalNode::<i32>::decode(&page, 3, &IntegerCodec, OWNER),
            Err(NodeError::EmptyInternal)
        ));
    }

    #[test]
    fn test_decode_rejects_free_page() {
        let mut page = Page::typed(PageType::Free);
        page.seal();
        assert!(matches!(
            NodeHeader::from_page(&page),
            Err(NodeError::NotANode(PageType::Free))
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_node() {
        let count = leaf_capacity(4, RecordId::SIZE) + 1;
        let keys: Vec<i32> = (0..i32::try_from(count).expect("fits")).collect();
        let leaf = leaf_with(&keys);
        assert!(matches!(
            leaf.encode(&IntegerCodec),
            Err(NodeError::Overflow { .. })
        ));
    }
}
