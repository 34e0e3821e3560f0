//! Id generator command implementation.

use super::{open_store, CliError};
use nodestore_storage::BackingStore;
use std::path::Path;
use tracing::info;

/// Returns the stored generator value, replacing it first when `set` is
/// given.
pub fn apply(path: &Path, set: Option<u64>) -> Result<Option<u64>, CliError> {
    let store = open_store(path)?;
    let mut txn = store.begin()?;
    if let Some(value) = set {
        store.save_id_generator(&mut txn, value)?;
        store.commit(txn)?;
        info!(value, "id generator updated");
        return Ok(Some(value));
    }
    let value = store.get_id_generator(&txn)?;
    store.abort(txn)?;
    Ok(value)
}

/// Runs the idgen command.
pub fn run(path: &Path, set: Option<u64>) -> Result<(), CliError> {
    match apply(path, set)? {
        Some(value) => println!("{value}"),
        None => println!("(unset)"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodestore_storage::FileStore;
    use tempfile::tempdir;

    #[test]
    fn set_then_read() {
        let dir = tempdir().unwrap();
        drop(FileStore::open(dir.path()).unwrap());

        assert_eq!(apply(dir.path(), None).unwrap(), None);
        assert_eq!(apply(dir.path(), Some(100)).unwrap(), Some(100));
        assert_eq!(apply(dir.path(), None).unwrap(), Some(100));
    }
}
