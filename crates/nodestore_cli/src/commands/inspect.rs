//! Inspect command implementation.

use super::{open_store, CliError};
use nodestore_storage::BackingStore;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Number of node records.
    pub record_count: usize,
    /// Stored id generator value.
    pub id_generator: Option<u64>,
    /// Total size of the store files in bytes.
    pub total_size: u64,
    /// Record ids (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<String>>,
}

/// Collects the inspection result for the store at `path`.
pub fn inspect(path: &Path, list_records: bool) -> Result<InspectResult, CliError> {
    let store = open_store(path)?;
    let mut ids = store.record_ids()?;
    ids.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    let txn = store.begin()?;
    let id_generator = store.get_id_generator(&txn)?;
    store.abort(txn)?;

    Ok(InspectResult {
        path: path.display().to_string(),
        record_count: ids.len(),
        id_generator,
        total_size: store.total_size()?,
        records: list_records.then_some(ids),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, list_records: bool, format: &str) -> Result<(), CliError> {
    let result = inspect(path, list_records)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!("Records: {}", result.record_count);
    match result.id_generator {
        Some(value) => println!("Id generator: {value}"),
        None => println!("Id generator: (unset)"),
    }
    println!("Total size: {} bytes", result.total_size);
    if let Some(records) = &result.records {
        println!();
        for id in records {
            println!("  {id}");
        }
    }
}
