//! CLI command implementations.

pub mod dump;
pub mod idgen;
pub mod inspect;

use nodestore_storage::FileStore;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory holds no store.
    #[error("no store found at {0}")]
    NoStore(PathBuf),

    /// The requested record does not exist.
    #[error("no record with id {0}")]
    UnknownRecord(String),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] nodestore_storage::StorageError),

    /// Record decoding failure.
    #[error(transparent)]
    Core(#[from] nodestore_core::CoreError),

    /// JSON output failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Opens an existing store. Commands never create one.
pub fn open_store(path: &Path) -> Result<FileStore, CliError> {
    if !path.join("LOCK").exists() {
        return Err(CliError::NoStore(path.to_path_buf()));
    }
    Ok(FileStore::open(path)?)
}
