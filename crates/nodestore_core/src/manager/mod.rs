//! The NodeManager façade.
//!
//! Coordinates the shared [`NodeCache`], the backing store, the schema and
//! the relational bridge on behalf of [`Transactor`]s:
//!
//! - [`fetch`]: lookups by key and by relation
//! - [`write`]: insert, update, delete and id generation
//! - [`collection`]: child listings, counts and batch prefetch

mod collection;
mod fetch;
mod write;

use crate::cache::NodeCache;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::idgen::IdGenerator;
use crate::key::Key;
use crate::node::{BackLinks, Node, NodeRef, Value};
use crate::record::NodeRecord;
use crate::replication::{ReplicationBatch, Replicator};
use crate::schema::{DbMapping, Relation, RelationKind, Schema};
use crate::sql::{bind_value, read_value, DataSource, Row, SelectBuilder, SqlError, SqlType, SqlValue, Statement};
use crate::stats::ManagerStats;
use crate::transactor::Transactor;
use crate::types::{Timestamp, TransactorId};
use nodestore_storage::BackingStore;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Id of the root node.
pub const ROOT_ID: &str = "0";
/// Prototype of the root node.
pub const ROOT_PROTOTYPE: &str = "root";
/// Id of the user-root node.
pub const USERS_ID: &str = "1";
/// Prototype of the user-root node.
pub const USERS_PROTOTYPE: &str = "__userroot__";

/// Coordinates cache, storage and schema for all transactors.
pub struct NodeManager {
    config: RwLock<Config>,
    log_sql: AtomicBool,
    log_replication: AtomicBool,
    cache: NodeCache,
    store: Arc<dyn BackingStore>,
    schema: Schema,
    datasources: RwLock<HashMap<String, Arc<dyn DataSource>>>,
    idgen: Mutex<IdGenerator>,
    backlinks: BackLinks,
    replicator: RwLock<Option<Arc<dyn Replicator>>>,
    stats: ManagerStats,
    next_transactor: AtomicU64,
}

impl std::fmt::Debug for NodeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeManager")
            .field("config", &*self.config.read())
            .field("cache", &self.cache)
            .field("types", &self.schema.type_names())
            .finish_non_exhaustive()
    }
}

impl NodeManager {
    /// Creates a manager over `store` and initializes the root records and
    /// the id generator.
    ///
    /// # Errors
    ///
    /// Returns `Initialization` if the root nodes or the id generator
    /// cannot be read or written.
    pub fn new(config: Config, store: Arc<dyn BackingStore>, schema: Schema) -> CoreResult<Arc<Self>> {
        let nmgr = Self {
            log_sql: AtomicBool::new(config.log_sql),
            log_replication: AtomicBool::new(config.log_replication),
            cache: NodeCache::new(config.cache_size),
            store,
            schema,
            datasources: RwLock::new(HashMap::new()),
            idgen: Mutex::new(IdGenerator::new(config.id_base_value)),
            backlinks: BackLinks::new(),
            replicator: RwLock::new(None),
            stats: ManagerStats::new(),
            next_transactor: AtomicU64::new(1),
            config: RwLock::new(config),
        };
        nmgr.init_store()
            .map_err(|e| CoreError::initialization(e.to_string()))?;
        Ok(Arc::new(nmgr))
    }

    fn init_store(&self) -> CoreResult<()> {
        let base = self.config.read().id_base_value.max(1);
        let mut txn = self.store.begin()?;
        let stored = self.store.get_id_generator(&txn)?;
        let start = stored.filter(|v| *v >= base).unwrap_or(base);
        {
            let mut idgen = self.idgen.lock();
            *idgen = IdGenerator::new(start);
        }

        for (id, name, prototype) in [
            (ROOT_ID, "root", ROOT_PROTOTYPE),
            (USERS_ID, "users", USERS_PROTOTYPE),
        ] {
            if self.store.get_record(&txn, id)?.is_none() {
                let now = Timestamp::now().0;
                let record = NodeRecord {
                    id: id.to_string(),
                    name: name.to_string(),
                    prototype: prototype.to_string(),
                    created: now,
                    last_modified: now,
                    parent: None,
                    subnodes: Vec::new(),
                    properties: Vec::new(),
                };
                self.store.save_record(&mut txn, id, &record.encode()?)?;
                info!(id, prototype, "created root node");
            }
        }
        if stored != Some(start) {
            self.store.save_id_generator(&mut txn, start)?;
        }
        self.store.commit(txn)?;
        info!(id_generator = start, "node manager initialized");
        Ok(())
    }

    /// Creates a transactor bound to this manager.
    pub fn transactor(self: &Arc<Self>) -> Transactor {
        let id = TransactorId::new(self.next_transactor.fetch_add(1, Ordering::Relaxed));
        Transactor::new(id, Arc::clone(self))
    }

    /// Registers a datasource under its name.
    pub fn register_datasource(&self, datasource: Arc<dyn DataSource>) {
        let name = datasource.name().to_string();
        debug!(datasource = %name, "datasource registered");
        self.datasources.write().insert(name, datasource);
    }

    /// Returns the datasource registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDataSource` if none is registered.
    pub fn datasource(&self, name: &str) -> CoreResult<Arc<dyn DataSource>> {
        self.datasources
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SqlError::UnknownDataSource(name.to_string()).into())
    }

    /// Installs the replicator receiving outbound batches.
    pub fn set_replicator(&self, replicator: Arc<dyn Replicator>) {
        *self.replicator.write() = Some(replicator);
    }

    /// Returns the shared cache.
    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// Returns the activity counters.
    pub fn stats(&self) -> &ManagerStats {
        &self.stats
    }

    /// Returns the back-link index.
    pub fn backlinks(&self) -> &BackLinks {
        &self.backlinks
    }

    /// Returns a copy of the current configuration.
    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    /// Returns the last id issued by the embedded id generator.
    pub fn id_generator_value(&self) -> u64 {
        self.idgen.lock().value()
    }

    /// Applies changed settings: cache capacity and log flags.
    pub fn update_config(&self, config: Config) {
        self.cache.resize(config.cache_size);
        self.log_sql.store(config.log_sql, Ordering::Relaxed);
        self.log_replication.store(config.log_replication, Ordering::Relaxed);
        info!(cache_size = config.cache_size, log_sql = config.log_sql, "configuration updated");
        *self.config.write() = config;
    }

    /// Invalidates a node and drops its primary cache slot.
    pub fn evict_node(&self, node: &NodeRef) {
        self.cache.evict_node(node);
    }

    /// Drops a cache slot and invalidates its occupant.
    pub fn evict_node_by_key(&self, key: &Key) {
        self.cache.evict_by_key(key);
    }

    /// Drops a cache slot only.
    pub fn evict_key(&self, key: &Key) {
        self.cache.evict_key(key);
    }

    /// Applies a batch received from another instance.
    ///
    /// Added nodes replace cache entries; deleted nodes are evicted. The
    /// data watermark of every affected type is bumped.
    pub fn replicate_cache(&self, batch: ReplicationBatch) {
        let (added, deleted) = (batch.added.len(), batch.deleted.len());
        for entry in batch.added {
            let mapping = self.schema.mapping(entry.prototype());
            let node = Node::from_record(entry.record, entry.storage);
            self.cache.put(node.key(), node);
            mapping.notify_data_change();
        }
        for entry in batch.deleted {
            let mapping = self.schema.mapping(entry.prototype());
            self.cache.evict_by_key(&entry.key());
            mapping.notify_data_change();
        }
        self.stats.record_replication();
        if self.log_replication.load(Ordering::Relaxed) {
            info!(added, deleted, "applied replication batch");
        }
    }

    pub(crate) fn replicate(&self, batch: ReplicationBatch) {
        if batch.is_empty() {
            return;
        }
        if let Some(replicator) = self.replicator.read().clone() {
            if self.log_replication.load(Ordering::Relaxed) {
                info!(added = batch.added.len(), deleted = batch.deleted.len(), "sending replication batch");
            }
            replicator.replicate(batch);
        }
    }

    /// Returns the mapping of a relation's other type, warning when the
    /// type is not configured.
    pub(crate) fn other_mapping(&self, rel: &Relation) -> Arc<DbMapping> {
        let name = rel.other_type.as_deref().unwrap_or("hopobject");
        if rel.other_type.is_some() && self.schema.get(name).is_none() {
            warn!(prototype = name, property = %rel.prop_name, "relation to unknown type, using embedded mapping");
        }
        self.schema.mapping(name)
    }

    fn log_statement(&self, stmt: &Statement) {
        if self.log_sql.load(Ordering::Relaxed) {
            debug!(sql = %stmt.render(), "sql");
        }
    }

    fn datasource_of(mapping: &DbMapping) -> CoreResult<&str> {
        mapping.datasource().ok_or_else(|| {
            CoreError::invalid_operation(format!("{} is not relational", mapping.type_name()))
        })
    }

    fn table_of(mapping: &DbMapping) -> CoreResult<&str> {
        mapping.table().ok_or_else(|| {
            CoreError::invalid_operation(format!("{} is not relational", mapping.type_name()))
        })
    }

    pub(crate) fn query(
        &self,
        tx: &mut Transactor,
        mapping: &DbMapping,
        stmt: &Statement,
        max_rows: usize,
    ) -> CoreResult<Vec<Row>> {
        self.log_statement(stmt);
        let conn = tx.connection(Self::datasource_of(mapping)?)?;
        let rows = conn.query(&stmt.sql, &stmt.params, max_rows)?;
        self.stats.record_sql_query();
        Ok(rows)
    }

    pub(crate) fn execute(&self, tx: &mut Transactor, mapping: &DbMapping, stmt: &Statement) -> CoreResult<usize> {
        self.log_statement(stmt);
        let conn = tx.connection(Self::datasource_of(mapping)?)?;
        Ok(conn.execute(&stmt.sql, &stmt.params)?)
    }

    pub(crate) fn max_text_len(&self, tx: &mut Transactor, mapping: &DbMapping) -> CoreResult<usize> {
        let conn = tx.connection(Self::datasource_of(mapping)?)?;
        Ok(conn.max_text_len())
    }

    /// Returns the declared type of a column of `mapping`, text if unknown.
    pub(crate) fn column_type(mapping: &DbMapping, column: &str) -> SqlType {
        mapping
            .columns()
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))
            .map_or(SqlType::Varchar, |c| c.sql_type)
    }

    /// Starts a select of all columns of `mapping` plus outer-joined
    /// references. Returns the builder and the joined mappings in column
    /// order.
    pub(crate) fn select_for(&self, mapping: &DbMapping) -> CoreResult<(SelectBuilder, Vec<Arc<DbMapping>>)> {
        let table = Self::table_of(mapping)?;
        let mut builder =
            SelectBuilder::new(table).columns(table, mapping.columns().iter().map(|c| c.name.as_str()));
        let mut joined = Vec::new();
        for rel in mapping.joined_relations() {
            let other = self.other_mapping(&rel);
            let (Some(other_table), Some(column)) = (other.table(), rel.column.as_deref()) else {
                continue;
            };
            if other.datasource() != mapping.datasource() {
                continue;
            }
            let alias = format!("j{}", joined.len() + 1);
            builder = builder
                .columns(&alias, other.columns().iter().map(|c| c.name.as_str()))
                .left_join(other_table, &alias, column, other.id_column());
            joined.push(other);
        }
        Ok((builder, joined))
    }

    /// Adds the relation's constraints, evaluated against `home`.
    pub(crate) fn constrain(
        mut builder: SelectBuilder,
        rel: &Relation,
        home_mapping: &DbMapping,
        home: &Node,
        other: &DbMapping,
    ) -> SelectBuilder {
        for c in &rel.constraints {
            builder = match c.home_value(home_mapping, home) {
                Some(v) => builder.where_eq(
                    &c.foreign,
                    bind_value(Self::column_type(other, &c.foreign), &Value::String(v), usize::MAX),
                ),
                None => builder.where_null(&c.foreign),
            };
        }
        builder
    }

    /// Builds a node from the columns of `mapping` starting at `offset`.
    ///
    /// Returns `None` when the id column is NULL (an unmatched outer join).
    pub(crate) fn create_node(&self, mapping: &Arc<DbMapping>, row: &[SqlValue], offset: usize) -> Option<NodeRef> {
        let columns = mapping.columns();
        let values = row.get(offset..offset + columns.len())?;
        let id = values.first()?.to_id_string()?;

        let mut prototype = mapping.type_name().to_string();
        let mut name = None;
        for (col, value) in columns.iter().zip(values) {
            if col.is_prototype {
                if let Some(p) = value.to_id_string() {
                    if self.schema.get(&p).is_some() {
                        prototype = p;
                    } else {
                        warn!(prototype = %p, table = ?mapping.table(), "invalid prototype in column, using base mapping");
                    }
                }
            }
            if col.is_name {
                name = value.to_id_string();
            }
        }

        let now = Timestamp::now();
        let node = Node::loaded(id, name, prototype, mapping.storage_name().map(str::to_string), now, now);
        for (col, value) in columns.iter().zip(values) {
            let Some(prop) = &col.property else { continue };
            let Some(rel) = mapping.property_relation(prop) else { continue };
            let value = read_value(col.sql_type, value.clone());
            let value = match (rel.kind, value.as_string()) {
                (RelationKind::Reference, Some(target)) => {
                    let other = self.other_mapping(&rel);
                    Value::Node(Key::db(other.storage_name(), target))
                }
                (RelationKind::Reference, None) => Value::Null,
                _ => value,
            };
            node.load_property(&rel.prop_name, value);
        }
        Some(Arc::new(node))
    }

    /// Caches nodes loaded through outer joins in the same row.
    pub(crate) fn register_joined(&self, mapping: &DbMapping, joined: &[Arc<DbMapping>], row: &[SqlValue]) {
        let mut offset = mapping.columns().len();
        for other in joined {
            if let Some(node) = self.create_node(other, row, offset) {
                self.cache.register_loaded(&node.key(), None, node);
            }
            offset += other.columns().len();
        }
    }
}
