//! In-memory backing store for testing.

use crate::backend::{validate_record_id, BackingStore};
use crate::error::{StorageError, StorageResult};
use crate::txn::{StagedWrite, StoreTxn};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// An in-memory backing store.
///
/// This store keeps all records in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral object graphs that don't need persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use nodestore_storage::{BackingStore, InMemoryStore};
///
/// let store = InMemoryStore::new();
/// let mut txn = store.begin().unwrap();
/// store.save_id_generator(&mut txn, 10).unwrap();
/// store.commit(txn).unwrap();
/// assert_eq!(store.record_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
    id_generator: RwLock<Option<u64>>,
    next_txid: AtomicU64,
    active: RwLock<HashSet<u64>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    /// Returns the number of transactions that are neither committed nor aborted.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    fn finish(&self, txn: &StoreTxn) -> StorageResult<()> {
        if self.active.write().remove(&txn.id()) {
            Ok(())
        } else {
            Err(StorageError::UnknownTransaction(txn.id()))
        }
    }
}

impl BackingStore for InMemoryStore {
    fn begin(&self) -> StorageResult<StoreTxn> {
        let id = self.next_txid.fetch_add(1, Ordering::SeqCst) + 1;
        self.active.write().insert(id);
        Ok(StoreTxn::new(id))
    }

    fn commit(&self, txn: StoreTxn) -> StorageResult<()> {
        self.finish(&txn)?;
        let (writes, idgen) = txn.into_writes();

        let mut records = self.records.write();
        for (id, write) in writes {
            match write {
                StagedWrite::Save(data) => {
                    records.insert(id, data);
                }
                StagedWrite::Delete => {
                    records.remove(&id);
                }
            }
        }
        if let Some(value) = idgen {
            *self.id_generator.write() = Some(value);
        }
        Ok(())
    }

    fn abort(&self, txn: StoreTxn) -> StorageResult<()> {
        self.finish(&txn)
    }

    fn get_record(&self, txn: &StoreTxn, id: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_record_id(id)?;
        match txn.staged(id) {
            Some(StagedWrite::Save(data)) => Ok(Some(data.clone())),
            Some(StagedWrite::Delete) => Ok(None),
            None => Ok(self.records.read().get(id).cloned()),
        }
    }

    fn save_record(&self, txn: &mut StoreTxn, id: &str, data: &[u8]) -> StorageResult<()> {
        validate_record_id(id)?;
        txn.stage_save(id, data);
        Ok(())
    }

    fn delete_record(&self, txn: &mut StoreTxn, id: &str) -> StorageResult<()> {
        validate_record_id(id)?;
        txn.stage_delete(id);
        Ok(())
    }

    fn get_id_generator(&self, txn: &StoreTxn) -> StorageResult<Option<u64>> {
        Ok(txn.staged_id_generator().or(*self.id_generator.read()))
    }

    fn save_id_generator(&self, txn: &mut StoreTxn, value: u64) -> StorageResult<()> {
        txn.stage_id_generator(value);
        Ok(())
    }

    fn record_ids(&self) -> StorageResult<Vec<String>> {
        Ok(self.records.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert_eq!(store.record_count(), 0);
        assert!(store.record_ids().unwrap().is_empty());
    }

    #[test]
    fn memory_commit_applies_writes() {
        let store = InMemoryStore::new();
        let mut txn = store.begin().unwrap();
        store.save_record(&mut txn, "1", b"one").unwrap();
        store.save_record(&mut txn, "2", b"two").unwrap();
        store.commit(txn).unwrap();

        assert_eq!(store.record_ids().unwrap(), vec!["1", "2"]);
        let txn = store.begin().unwrap();
        assert_eq!(store.get_record(&txn, "2").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn memory_abort_discards_writes() {
        let store = InMemoryStore::new();
        let mut txn = store.begin().unwrap();
        store.save_record(&mut txn, "1", b"one").unwrap();
        store.abort(txn).unwrap();

        assert_eq!(store.record_count(), 0);
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn memory_reads_see_own_staged_writes() {
        let store = InMemoryStore::new();
        let mut setup = store.begin().unwrap();
        store.save_record(&mut setup, "1", b"old").unwrap();
        store.commit(setup).unwrap();

        let mut txn = store.begin().unwrap();
        store.delete_record(&mut txn, "1").unwrap();
        assert_eq!(store.get_record(&txn, "1").unwrap(), None);

        let other = store.begin().unwrap();
        assert_eq!(store.get_record(&other, "1").unwrap(), Some(b"old".to_vec()));
    }

    #[test]
    fn memory_missing_record_is_none() {
        let store = InMemoryStore::new();
        let txn = store.begin().unwrap();
        assert!(store.get_record(&txn, "404").unwrap().is_none());
    }

    #[test]
    fn memory_id_generator_roundtrip() {
        let store = InMemoryStore::new();
        let mut txn = store.begin().unwrap();
        assert_eq!(store.get_id_generator(&txn).unwrap(), None);
        store.save_id_generator(&mut txn, 99).unwrap();
        assert_eq!(store.get_id_generator(&txn).unwrap(), Some(99));
        store.commit(txn).unwrap();

        let txn = store.begin().unwrap();
        assert_eq!(store.get_id_generator(&txn).unwrap(), Some(99));
    }

    #[test]
    fn memory_double_commit_is_rejected() {
        let store = InMemoryStore::new();
        let txn = store.begin().unwrap();
        let id = txn.id();
        store.commit(txn).unwrap();

        let result = store.commit(StoreTxn::new(id));
        assert!(matches!(result, Err(StorageError::UnknownTransaction(_))));
    }
}
