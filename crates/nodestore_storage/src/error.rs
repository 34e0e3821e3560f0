//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// A missing record is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored file could not be interpreted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The record id cannot be used as a storage name.
    #[error("invalid record id: {0:?}")]
    InvalidRecordId(String),

    /// Another process holds the store directory.
    #[error("store directory locked by another process: {}", .0.display())]
    Locked(PathBuf),

    /// The transaction does not belong to this store.
    #[error("transaction {0} is unknown to this store")]
    UnknownTransaction(u64),
}
