//! Error types for the index.

use thiserror::Error;

use crate::types::PageId;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors that can occur while operating on the index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O error from the underlying file system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Insert was called without `replace` on a key that already exists.
    #[error("key already exists")]
    KeyExists,

    /// `batch_insert` received keys that were not strictly ascending.
    #[error("keys passed to batch_insert must be strictly ascending: {0}")]
    OrderViolation(String),

    /// A range query had `start >= stop`, or asked for a reversed/stepped slice.
    #[error("invalid slice: {0}")]
    InvalidSlice(String),

    /// A key or value did not fit the tree's configured limits.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The on-disk file or WAL failed a structural check.
    #[error("corrupt file: {0}")]
    CorruptFile(String),

    /// A page number was referenced that does not exist in the file.
    #[error("page {0} not found")]
    PageNotFound(PageId),
}

impl IndexError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptFile(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_slice(msg: impl Into<String>) -> Self {
        Self::InvalidSlice(msg.into())
    }

    pub fn order_violation(msg: impl Into<String>) -> Self {
        Self::OrderViolation(msg.into())
    }
}

/// Internal-only outcome of a key lookup inside a single node.
///
/// Not part of the public error surface: `get`/`contains_key` collapse this
/// into `Option`/`bool`, mirroring the source tree's use of a plain
/// `ValueError` for "not in this node" versus a propagated I/O failure.
#[derive(Error, Debug)]
pub(crate) enum LookupError {
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Index(#[from] IndexError),
}
