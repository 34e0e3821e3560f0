//! Store transaction state.

use std::collections::BTreeMap;

/// A write staged in a store transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedWrite {
    /// Replace the record with this payload.
    Save(Vec<u8>),
    /// Remove the record.
    Delete,
}

/// An open backing-store transaction.
///
/// Writes are buffered here until the owning store commits the transaction.
/// Dropping a transaction without committing discards its writes.
#[derive(Debug)]
pub struct StoreTxn {
    id: u64,
    writes: BTreeMap<String, StagedWrite>,
    id_generator: Option<u64>,
}

impl StoreTxn {
    /// Creates an empty transaction with the given id.
    ///
    /// Stores call this from `begin`; it is public so that wrapping or
    /// third-party stores can build their own transactions.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            writes: BTreeMap::new(),
            id_generator: None,
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stages a record save. A later write to the same id replaces it.
    pub fn stage_save(&mut self, id: &str, data: &[u8]) {
        self.writes
            .insert(id.to_string(), StagedWrite::Save(data.to_vec()));
    }

    /// Stages a record deletion.
    pub fn stage_delete(&mut self, id: &str) {
        self.writes.insert(id.to_string(), StagedWrite::Delete);
    }

    /// Stages a new id generator value.
    pub fn stage_id_generator(&mut self, value: u64) {
        self.id_generator = Some(value);
    }

    /// Returns the staged write for a record, if any.
    #[must_use]
    pub fn staged(&self, id: &str) -> Option<&StagedWrite> {
        self.writes.get(id)
    }

    /// Returns the staged id generator value, if any.
    #[must_use]
    pub fn staged_id_generator(&self) -> Option<u64> {
        self.id_generator
    }

    /// Returns the number of staged record writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Consumes the transaction, returning its staged writes in id order.
    #[must_use]
    pub fn into_writes(self) -> (Vec<(String, StagedWrite)>, Option<u64>) {
        (self.writes.into_iter().collect(), self.id_generator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn later_write_replaces_earlier() {
        let mut txn = StoreTxn::new(1);
        txn.stage_save("a", b"one");
        txn.stage_delete("a");

        assert_eq!(txn.write_count(), 1);
        assert_eq!(txn.staged("a"), Some(&StagedWrite::Delete));
    }

    #[test]
    fn into_writes_is_ordered_by_id() {
        let mut txn = StoreTxn::new(7);
        txn.stage_save("b", b"2");
        txn.stage_save("a", b"1");
        txn.stage_id_generator(12);

        let (writes, idgen) = txn.into_writes();
        let ids: Vec<_> = writes.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(idgen, Some(12));
    }

    proptest! {
        #[test]
        fn last_staged_write_per_id_wins(ops in prop::collection::vec(("[a-c]", any::<bool>()), 0..20)) {
            let mut txn = StoreTxn::new(1);
            let mut expected = BTreeMap::new();
            for (id, save) in &ops {
                if *save {
                    txn.stage_save(id, id.as_bytes());
                    expected.insert(id.clone(), StagedWrite::Save(id.as_bytes().to_vec()));
                } else {
                    txn.stage_delete(id);
                    expected.insert(id.clone(), StagedWrite::Delete);
                }
            }

            prop_assert_eq!(txn.write_count(), expected.len());
            for (id, write) in &expected {
                prop_assert_eq!(txn.staged(id), Some(write));
            }
            let (writes, _) = txn.into_writes();
            prop_assert_eq!(writes, expected.into_iter().collect::<Vec<_>>());
        }
    }
}
