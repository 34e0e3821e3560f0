//! # NodeStore Storage
//!
//! Backing store contract and embedded implementations for NodeStore.
//!
//! Backing stores persist **whole records** addressed by a string id. They
//! never interpret the record bytes: the core crate owns the record format
//! (a serialized property tree) and hands the store opaque payloads.
//!
//! ## Design Principles
//!
//! - Writes are staged in a [`StoreTxn`] and applied on `commit`
//! - Reads observe the transaction's own staged writes
//! - "Not found" is `Ok(None)`, distinct from an I/O failure
//! - Stores must be `Send + Sync`; one store is shared by every transactor
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral nodes
//! - [`FileStore`] - One file per record in a locked directory
//!
//! ## Example
//!
//! ```rust
//! use nodestore_storage::{BackingStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! let mut txn = store.begin().unwrap();
//! store.save_record(&mut txn, "42", b"payload").unwrap();
//! store.commit(txn).unwrap();
//!
//! let txn = store.begin().unwrap();
//! assert_eq!(store.get_record(&txn, "42").unwrap(), Some(b"payload".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod txn;

pub use backend::{validate_record_id, BackingStore};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use txn::{StagedWrite, StoreTxn};
