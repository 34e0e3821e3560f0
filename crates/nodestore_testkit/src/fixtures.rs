//! Test fixtures and manager helpers.
//!
//! Provides convenience functions for setting up node managers over the
//! in-memory or file store, plus a small relational schema used across
//! the integration tests.

use crate::doubles::CountingStore;
use nodestore_core::{Config, MappingConfig, NodeManager, Relation, Schema, SqlType};
use nodestore_storage::{BackingStore, FileStore, InMemoryStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A node manager with automatic cleanup.
pub struct TestManager {
    /// The manager instance.
    pub nmgr: Arc<NodeManager>,
    /// Read counter around the backing store.
    pub store: Arc<CountingStore>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestManager {
    /// Creates a manager over a fresh in-memory store.
    pub fn memory() -> Self {
        Self::memory_with(Config::default(), Schema::new())
    }

    /// Creates a manager over a fresh in-memory store with the given
    /// configuration and schema.
    pub fn memory_with(config: Config, schema: Schema) -> Self {
        let store = Arc::new(CountingStore::new(Arc::new(InMemoryStore::new())));
        Self {
            nmgr: open(config, store.clone(), schema),
            store,
            _temp_dir: None,
        }
    }

    /// Creates a manager over a file store in a temporary directory.
    pub fn file() -> Self {
        Self::file_in(TempDir::new().expect("Failed to create temp directory"))
    }

    fn file_in(temp_dir: TempDir) -> Self {
        let file_store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
        let store = Arc::new(CountingStore::new(Arc::new(file_store)));
        Self {
            nmgr: open(Config::default(), store.clone(), Schema::new()),
            store,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Drops this manager and opens a new one over the same directory, as
    /// a restarted process would. The directory lock is released first, so
    /// no clone of the old manager may outlive this call.
    ///
    /// # Panics
    ///
    /// Panics on in-memory fixtures.
    pub fn reopen(self) -> Self {
        let Self { nmgr, store, _temp_dir: temp_dir } = self;
        drop(nmgr);
        drop(store);
        Self::file_in(temp_dir.expect("Only file fixtures can be reopened"))
    }
}

impl std::ops::Deref for TestManager {
    type Target = Arc<NodeManager>;

    fn deref(&self) -> &Self::Target {
        &self.nmgr
    }
}

fn open(config: Config, store: Arc<dyn BackingStore>, schema: Schema) -> Arc<NodeManager> {
    NodeManager::new(config, store, schema).expect("Failed to create node manager")
}

/// Runs a test with a manager over a temporary in-memory store.
pub fn with_manager<F, R>(f: F) -> R
where
    F: FnOnce(&Arc<NodeManager>) -> R,
{
    let test = TestManager::memory();
    f(&test.nmgr)
}

/// Runs a test with a manager over a temporary file store.
pub fn with_file_manager<F, R>(f: F) -> R
where
    F: FnOnce(&Arc<NodeManager>, &Path) -> R,
{
    let test = TestManager::file();
    let path = test.path().expect("File manager should have a path");
    f(&test.nmgr, &path)
}

/// Relational fixtures shared by the SQL tests.
pub mod scenarios {
    use super::*;

    /// DDL for the `USERS` and `ORDERS` tables.
    pub const DDL: &str = "\
        CREATE TABLE USERS (ID INTEGER PRIMARY KEY, NAME TEXT, EMAIL TEXT, AGE INTEGER);\n\
        CREATE TABLE ORDERS (ID INTEGER PRIMARY KEY, USER_ID INTEGER, STATUS TEXT, TOTAL REAL);";

    /// Schema mapping `user` onto `USERS` and `order` onto `ORDERS`.
    ///
    /// Users list their orders (addressed by id) under the subnode
    /// relation, and orders reference their user.
    pub fn shop_schema(datasource: &str) -> Schema {
        let schema = Schema::new();
        schema
            .register(
                "user",
                MappingConfig::relational("USERS", datasource)
                    .id_column("ID")
                    .name_column("NAME")
                    .property("name", Relation::primitive("NAME", SqlType::Varchar))
                    .property("email", Relation::primitive("EMAIL", SqlType::Varchar))
                    .property("age", Relation::primitive("AGE", SqlType::Integer))
                    .subnodes(
                        Relation::collection("order")
                            .constraint(nodestore_core::Constraint::columns("ID", "USER_ID"))
                            .order("ID"),
                    ),
            )
            .expect("Failed to register user mapping");
        schema
            .register(
                "order",
                MappingConfig::relational("ORDERS", datasource)
                    .id_column("ID")
                    .property("user", Relation::reference("USER_ID", "user"))
                    .property("status", Relation::primitive("STATUS", SqlType::Varchar))
                    .property("total", Relation::primitive("TOTAL", SqlType::Double)),
            )
            .expect("Failed to register order mapping");
        schema
    }

    /// Schema where users group their orders by `STATUS`.
    pub fn grouped_schema(datasource: &str) -> Schema {
        let schema = shop_schema(datasource);
        schema
            .register(
                "user",
                MappingConfig::relational("USERS", datasource)
                    .id_column("ID")
                    .name_column("NAME")
                    .property("name", Relation::primitive("NAME", SqlType::Varchar))
                    .subnodes(
                        Relation::collection("order")
                            .constraint(nodestore_core::Constraint::columns("ID", "USER_ID"))
                            .group_by("STATUS")
                            .order("ID"),
                    ),
            )
            .expect("Failed to register grouped user mapping");
        schema
    }
}
