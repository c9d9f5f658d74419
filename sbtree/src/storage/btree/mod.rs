//! Disk-resident B+tree.
//!
//! # Structure
//!
//! The tree consists of:
//! - Internal nodes: separator keys and child page pointers
//! - Leaf nodes: key-value entries, doubly-linked for range scans in both
//!   directions
//! - A metadata page holding the name, root, entry count and layout
//!
//! Keys are encoded by a [`KeyCodec`] chosen when the tree is created; values
//! are fixed-width ([`FixedValue`]), by default a [`RecordId`].
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//!
//! use sbtree::config::TreeConfig;
//! use sbtree::storage::btree::{LongCodec, RecordId, SBTree, TreeError};
//! use sbtree::storage::MemoryStore;
//!
//! # fn main() -> Result<(), TreeError> {
//! let store = Arc::new(MemoryStore::new());
//! let tree: SBTree<LongCodec, MemoryStore> =
//!     SBTree::create("people", LongCodec, store, &TreeConfig::default())?;
//!
//! tree.put(42, RecordId::new(3, 7))?;
//! assert_eq!(tree.get(&42)?, Some(RecordId::new(3, 7)));
//! assert_eq!(tree.values_major(&0, true, 10)?, vec![RecordId::new(3, 7)]);
//! # Ok(())
//! # }
//! ```

mod codec;
mod cursor;
mod meta;
mod node;
mod tree;
mod value;

pub use codec::{CodecError, IntegerCodec, KeyCodec, LongCodec, StringCodec};
pub use cursor::{Cursor, Direction};
pub use meta::{MetaError, TreeMeta};
pub use node::{
    InternalNode, LeafEntry, LeafNode, Node, NodeError, NodeHeader, NodeType, internal_capacity,
    leaf_capacity,
};
pub use tree::{SBTree, TreeError};
pub use value::{FixedValue, RecordId};
