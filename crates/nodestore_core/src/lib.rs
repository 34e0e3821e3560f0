//! # NodeStore Core
//!
//! Object-relational persistence and caching engine.
//!
//! This crate provides:
//! - Keys identifying nodes (primary, synthetic, multi-column)
//! - Nodes with typed properties and a lifecycle state machine
//! - Schema descriptors mapping prototypes onto tables or the embedded store
//! - A shared, bounded node cache
//! - A relational bridge with parameterized statements
//! - The [`NodeManager`] façade and per-thread [`Transactor`] contexts
//! - Cache replication batches
//!
//! ## Example
//!
//! ```rust
//! use nodestore_core::{Config, NodeManager, Schema, Value};
//! use nodestore_storage::InMemoryStore;
//! use std::sync::Arc;
//!
//! let nmgr = NodeManager::new(Config::default(), Arc::new(InMemoryStore::new()), Schema::new()).unwrap();
//! let mut tx = nmgr.transactor();
//! tx.begin("example").unwrap();
//! let node = tx.create("page", Some("home")).unwrap();
//! tx.set(&node, "title", Value::from("Welcome")).unwrap();
//! tx.commit().unwrap();
//!
//! tx.begin("read").unwrap();
//! let loaded = tx.get(&node.key()).unwrap().unwrap();
//! assert_eq!(loaded.get("title"), Some(Value::from("Welcome")));
//! tx.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod error;
pub mod idgen;
pub mod key;
pub mod manager;
pub mod node;
pub mod record;
pub mod replication;
pub mod schema;
pub mod sql;
pub mod stats;
pub mod transactor;
pub mod types;

pub use cache::NodeCache;
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use key::{DbKey, Key, MultiKey, SyntheticKey};
pub use manager::{NodeManager, ROOT_ID, ROOT_PROTOTYPE, USERS_ID, USERS_PROTOTYPE};
pub use node::{BackLinks, Node, NodeRef, NodeState, Property, Value};
pub use record::NodeRecord;
pub use replication::{ChannelReplicator, ReplicatedNode, ReplicationBatch, Replicator};
pub use schema::{Constraint, DbColumn, DbMapping, IdStrategy, MappingConfig, Relation, RelationKind, Schema};
pub use sql::{Connection, DataSource, SqlError, SqlType, SqlValue};
pub use stats::{ManagerStats, StatsSnapshot};
pub use transactor::{KillHandle, Transactor};
pub use types::{Timestamp, TransactorId};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
