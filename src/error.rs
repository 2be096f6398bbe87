//! Error kinds surfaced by the storage engine.

use thiserror::Error;

/// Top-level error type for every public operation on the store.
///
/// Most internal plumbing (SSTable I/O, manifest I/O, compaction) uses
/// `anyhow::Error` and is folded into [`StoreError::Other`] at the
/// boundary the caller actually observes, since only `put`/`delete`/`get`
/// need to distinguish kinds.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A `put`/`delete` was given a null record or an empty key.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A new-key admission was rejected because the memtable is full.
    #[error("capacity exceeded")]
    CapacityExceeded,

    /// An external read/write (SSTable, manifest, block manager) failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk manifest existed but could not be read or parsed.
    #[error("data lost: manifest present but unreadable")]
    DataLost,

    /// A decoder was handed a malformed or short buffer.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// Any other collaborator failure that does not fit a named kind.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
