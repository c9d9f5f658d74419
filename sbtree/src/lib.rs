// Layers, bottom up:
//  - page: raw 8KB pages, their common header and checksum
//  - io: the PageStore trait, implemented by file and memory stores
//  - latch: per-page shared/exclusive latches
//  - btree: node codec, tree metadata, the B+tree engine and its cursors
//
// Life of a put:
// 1. Take the tree's writer lock
// 2. Descend from the fixed root with exclusive latches, releasing
//    ancestors that cannot split
// 3. Insert into the leaf. A split reserves its pages, writes the new
//    pages, installs them in the highest changed node, then trims the rest
// 4. Rewrite the tree metadata with the new entry count

pub mod config;
pub mod storage;

mod e2e_tests;

pub use config::{ConfigError, TreeConfig};
pub use storage::btree::{
    Cursor, Direction, FixedValue, IntegerCodec, KeyCodec, LongCodec, RecordId, SBTree,
    StringCodec, TreeError,
};
pub use storage::{FileStore, MemoryStore, PageStore, StorageError};
