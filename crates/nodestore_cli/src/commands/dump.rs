//! Dump command implementation.

use super::{open_store, CliError};
use nodestore_core::NodeRecord;
use nodestore_storage::BackingStore;
use std::path::Path;

/// Reads and decodes one record.
pub fn load(path: &Path, id: &str) -> Result<NodeRecord, CliError> {
    let store = open_store(path)?;
    let txn = store.begin()?;
    let bytes = store.get_record(&txn, id);
    store.abort(txn)?;
    let bytes = bytes?.ok_or_else(|| CliError::UnknownRecord(id.to_string()))?;
    Ok(NodeRecord::decode(&bytes)?)
}

/// Runs the dump command.
pub fn run(path: &Path, id: &str) -> Result<(), CliError> {
    let record = load(path, id)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
