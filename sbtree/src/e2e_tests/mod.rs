//! End-to-end tests at the tree API level.
//!
//! Each test file covers one scenario against an isolated tree, using seeded
//! key streams and a `BTreeMap` as the reference for what the tree should
//! hold.

#![cfg(test)]

mod helpers;

mod test_clear_delete;
mod test_concurrent_readers;
mod test_key_add_delete;
mod test_key_delete;
mod test_key_put;
mod test_key_put_random;
mod test_persistence;
mod test_storage_faults;
mod test_values_between;
mod test_values_major;
mod test_values_minor;
