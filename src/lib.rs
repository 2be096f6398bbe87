//! An embedded ordered key-value store built on LSM-tree discipline: a
//! pluggable memtable (tree, skip list, or hash map), a layered SSTable
//! store, and two compaction strategies behind one controller.

pub mod bloom;
pub mod compaction;
pub mod config;
pub mod error;
pub mod flush_pool;
pub mod key_dictionary;
pub mod lsm;
pub mod manifest;
pub mod memtable;
pub mod record;
pub mod sstable;
pub mod witness;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use error::{Result, StoreError};
pub use lsm::LsmController;
pub use record::Record;
