//! Error types for NodeStore core.

use crate::key::Key;
use crate::sql::SqlError;
use crate::types::TransactorId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in NodeStore core operations.
///
/// A key without a backing object is not an error: fetches return
/// `Ok(None)`. Stale cache entries are reloaded transparently and never
/// surface here.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Backing store error.
    #[error("storage error: {0}")]
    Storage(#[from] nodestore_storage::StorageError),

    /// Relational bridge error.
    #[error("sql error: {0}")]
    Sql(#[from] SqlError),

    /// A record could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The schema descriptor is malformed.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// The node is write-locked by another transactor.
    #[error("node {key} is locked by {owner}")]
    NodeLocked {
        /// The contested node.
        key: Key,
        /// The transactor holding the lock.
        owner: TransactorId,
    },

    /// The transactor was killed; its transaction cannot continue.
    #[error("transaction killed: {name}")]
    TransactionKilled {
        /// Name of the killed transaction.
        name: String,
    },

    /// A single-row lookup returned several rows.
    #[error("more than one row returned for {key}")]
    MultipleRows {
        /// The key that was looked up.
        key: Key,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Root records or the id generator could not be set up.
    #[error("initialization failed: {message}")]
    Initialization {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an initialization error.
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization {
            message: message.into(),
        }
    }

    /// Returns true if this error came from the backing store or a database.
    #[must_use]
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Sql(_) | Self::Codec { .. })
    }
}
