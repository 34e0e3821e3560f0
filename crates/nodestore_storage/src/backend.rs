//! Backing store trait definition.

use crate::error::{StorageError, StorageResult};
use crate::txn::StoreTxn;

/// A record-oriented backing store for embedded nodes.
///
/// Backing stores persist **opaque record payloads** addressed by string ids,
/// plus a single id-generator counter. The core crate owns the record format.
///
/// # Invariants
///
/// - Writes staged through `save_record`/`delete_record` become durable only
///   when `commit` succeeds; `abort` discards them
/// - `get_record` sees the transaction's own staged writes first
/// - A missing record is `Ok(None)`, never an error
/// - Stores must be `Send + Sync`; every transactor shares one store
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - One file per record
pub trait BackingStore: Send + Sync {
    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot start a transaction.
    fn begin(&self) -> StorageResult<StoreTxn>;

    /// Applies every staged write of the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails or the transaction is unknown.
    fn commit(&self, txn: StoreTxn) -> StorageResult<()>;

    /// Discards the transaction and all of its staged writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is unknown.
    fn abort(&self, txn: StoreTxn) -> StorageResult<()>;

    /// Reads a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or an I/O error occurs.
    fn get_record(&self, txn: &StoreTxn, id: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stages a record write.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid.
    fn save_record(&self, txn: &mut StoreTxn, id: &str, data: &[u8]) -> StorageResult<()>;

    /// Stages a record deletion. Deleting a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid.
    fn delete_record(&self, txn: &mut StoreTxn, id: &str) -> StorageResult<()>;

    /// Reads the persisted id generator value, if one was ever saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cannot be read.
    fn get_id_generator(&self, txn: &StoreTxn) -> StorageResult<Option<u64>>;

    /// Stages a new id generator value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be staged.
    fn save_id_generator(&self, txn: &mut StoreTxn, value: u64) -> StorageResult<()>;

    /// Lists the ids of all committed records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn record_ids(&self) -> StorageResult<Vec<String>>;
}

/// Checks that a record id can be used as a storage name.
///
/// Valid ids are non-empty, contain only ASCII letters, digits, `_`, `-`
/// and `.`, and do not start with a dot.
///
/// # Errors
///
/// Returns [`StorageError::InvalidRecordId`] otherwise.
pub fn validate_record_id(id: &str) -> StorageResult<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidRecordId(id.to_string()))
    }
}
