//! Per-prototype storage mappings.

use super::Relation;
use crate::error::{CoreError, CoreResult};
use crate::node::Node;
use crate::sql::{validate_identifier, validate_order, SqlType};
use crate::types::Timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// How new ids are issued for a prototype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// The store-wide counter persisted with the backing store.
    Embedded,
    /// `SELECT MAX(id)` plus one, floored by the last id issued here.
    MaxPlusOne,
    /// A database sequence.
    Sequence(String),
}

/// Declarative mapping description, as loaded from JSON or built in code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Table name; `None` means the embedded store.
    pub table: Option<String>,
    /// Datasource name (required for tables).
    pub datasource: Option<String>,
    /// Storage name used in keys; defaults to the prototype name.
    pub storage: Option<String>,
    /// Primary key column (default `ID`).
    pub id_column: Option<String>,
    /// Declared type of the id column (default integer).
    pub id_type: Option<SqlType>,
    /// Column holding the node name.
    pub name_column: Option<String>,
    /// Column holding the prototype name.
    pub prototype_column: Option<String>,
    /// Id issuing strategy.
    pub id_strategy: Option<IdStrategy>,
    /// Property relations by property name.
    pub properties: BTreeMap<String, Relation>,
    /// Relation describing the node's children.
    pub subnodes: Option<Relation>,
}

impl MappingConfig {
    /// Creates a mapping for the embedded store.
    #[must_use]
    pub fn embedded() -> Self {
        Self::default()
    }

    /// Creates a mapping onto `table` in `datasource`.
    #[must_use]
    pub fn relational(table: &str, datasource: &str) -> Self {
        Self {
            table: Some(table.to_string()),
            datasource: Some(datasource.to_string()),
            ..Self::default()
        }
    }

    /// Sets the id column.
    #[must_use]
    pub fn id_column(mut self, column: &str) -> Self {
        self.id_column = Some(column.to_string());
        self
    }

    /// Sets the id column type.
    #[must_use]
    pub const fn id_type(mut self, sql_type: SqlType) -> Self {
        self.id_type = Some(sql_type);
        self
    }

    /// Sets the name column.
    #[must_use]
    pub fn name_column(mut self, column: &str) -> Self {
        self.name_column = Some(column.to_string());
        self
    }

    /// Sets the prototype column.
    #[must_use]
    pub fn prototype_column(mut self, column: &str) -> Self {
        self.prototype_column = Some(column.to_string());
        self
    }

    /// Sets the storage name.
    #[must_use]
    pub fn storage(mut self, storage: &str) -> Self {
        self.storage = Some(storage.to_string());
        self
    }

    /// Sets the id strategy.
    #[must_use]
    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = Some(strategy);
        self
    }

    /// Adds a property relation.
    #[must_use]
    pub fn property(mut self, name: &str, relation: Relation) -> Self {
        self.properties.insert(name.to_string(), relation);
        self
    }

    /// Sets the subnode relation.
    #[must_use]
    pub fn subnodes(mut self, relation: Relation) -> Self {
        self.subnodes = Some(relation);
        self
    }
}

/// A column of a mapped table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbColumn {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub sql_type: SqlType,
    /// Property stored in this column.
    pub property: Option<String>,
    /// Primary key column.
    pub is_id: bool,
    /// Name column.
    pub is_name: bool,
    /// Prototype column.
    pub is_prototype: bool,
}

/// A resolved, validated mapping for one prototype.
#[derive(Debug)]
pub struct DbMapping {
    type_name: String,
    table: Option<String>,
    datasource: Option<String>,
    storage: Option<String>,
    id_column: String,
    name_column: Option<String>,
    prototype_column: Option<String>,
    id_strategy: IdStrategy,
    properties: BTreeMap<String, Arc<Relation>>,
    subnodes: Option<Arc<Relation>>,
    columns: Vec<DbColumn>,
    last_data_change: AtomicI64,
    last_type_change: AtomicI64,
    last_id: Mutex<u64>,
}

fn check(name: &str, what: &str, type_name: &str) -> CoreResult<()> {
    validate_identifier(name).map_err(|e| CoreError::schema(format!("{type_name}: {what}: {e}")))
}

fn check_relation(rel: &Relation, type_name: &str) -> CoreResult<()> {
    for col in [&rel.column, &rel.accessor, &rel.group_by].into_iter().flatten() {
        check(col, &rel.prop_name, type_name)?;
    }
    if let Some(order) = &rel.order {
        validate_order(order)
            .map_err(|e| CoreError::schema(format!("{type_name}: {}: {e}", rel.prop_name)))?;
    }
    for c in &rel.constraints {
        check(&c.foreign, &rel.prop_name, type_name)?;
        match (&c.local, &c.value) {
            (Some(local), None) => check(local, &rel.prop_name, type_name)?,
            (None, Some(_)) => {}
            _ => {
                return Err(CoreError::schema(format!(
                    "{type_name}: {}: constraint needs exactly one of local or value",
                    rel.prop_name
                )))
            }
        }
    }
    Ok(())
}

impl DbMapping {
    /// Builds a mapping from its configuration.
    ///
    /// # Errors
    ///
    /// Returns a schema error for malformed identifiers or inconsistent
    /// settings.
    pub fn build(type_name: &str, config: MappingConfig) -> CoreResult<Self> {
        let relational = config.table.is_some();
        if let Some(table) = &config.table {
            check(table, "table", type_name)?;
            if config.datasource.is_none() {
                return Err(CoreError::schema(format!("{type_name}: table without datasource")));
            }
        }
        let id_column = config.id_column.unwrap_or_else(|| "ID".to_string());
        check(&id_column, "id column", type_name)?;
        for col in [&config.name_column, &config.prototype_column].into_iter().flatten() {
            check(col, "column", type_name)?;
        }

        let id_strategy = match config.id_strategy {
            Some(IdStrategy::Sequence(seq)) => {
                check(&seq, "sequence", type_name)?;
                IdStrategy::Sequence(seq)
            }
            Some(strategy) => strategy,
            None if relational => IdStrategy::MaxPlusOne,
            None => IdStrategy::Embedded,
        };
        if !relational && id_strategy != IdStrategy::Embedded {
            return Err(CoreError::schema(format!(
                "{type_name}: embedded mapping requires the embedded id strategy"
            )));
        }

        let mut properties = BTreeMap::new();
        for (name, mut rel) in config.properties {
            rel.prop_name.clone_from(&name);
            rel.own_type = type_name.to_string();
            check_relation(&rel, type_name)?;
            properties.insert(name.to_lowercase(), Arc::new(rel));
        }
        let subnodes = match config.subnodes {
            Some(mut rel) => {
                rel.prop_name = "_children".to_string();
                rel.own_type = type_name.to_string();
                check_relation(&rel, type_name)?;
                Some(Arc::new(rel))
            }
            None => None,
        };

        let mut columns = vec![DbColumn {
            name: id_column.clone(),
            sql_type: config.id_type.unwrap_or(SqlType::Integer),
            property: None,
            is_id: true,
            is_name: false,
            is_prototype: false,
        }];
        if relational {
            for rel in properties.values().filter(|r| r.is_column_backed()) {
                if let Some(col) = &rel.column {
                    if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(col)) {
                        columns.push(DbColumn {
                            name: col.clone(),
                            sql_type: rel.sql_type,
                            property: Some(rel.prop_name.clone()),
                            is_id: false,
                            is_name: false,
                            is_prototype: false,
                        });
                    }
                }
            }
            for (col, is_name) in [(&config.name_column, true), (&config.prototype_column, false)] {
                let Some(col) = col else { continue };
                match columns.iter_mut().find(|c| c.name.eq_ignore_ascii_case(col)) {
                    Some(existing) if is_name => existing.is_name = true,
                    Some(existing) => existing.is_prototype = true,
                    None => columns.push(DbColumn {
                        name: col.clone(),
                        sql_type: SqlType::Varchar,
                        property: None,
                        is_id: false,
                        is_name,
                        is_prototype: !is_name,
                    }),
                }
            }
        }

        let storage = if relational {
            Some(config.storage.unwrap_or_else(|| type_name.to_string()))
        } else {
            None
        };
        let now = Timestamp::now().0;
        Ok(Self {
            type_name: type_name.to_string(),
            table: config.table,
            datasource: config.datasource,
            storage,
            id_column,
            name_column: config.name_column,
            prototype_column: config.prototype_column,
            id_strategy,
            properties,
            subnodes,
            columns,
            last_data_change: AtomicI64::new(now),
            last_type_change: AtomicI64::new(now),
            last_id: Mutex::new(0),
        })
    }

    /// Creates the default embedded mapping for an unconfigured prototype.
    #[must_use]
    pub fn default_for(type_name: &str) -> Self {
        let now = Timestamp::now().0;
        Self {
            type_name: type_name.to_string(),
            table: None,
            datasource: None,
            storage: None,
            id_column: "ID".to_string(),
            name_column: None,
            prototype_column: None,
            id_strategy: IdStrategy::Embedded,
            properties: BTreeMap::new(),
            subnodes: None,
            columns: Vec::new(),
            last_data_change: AtomicI64::new(now),
            last_type_change: AtomicI64::new(now),
            last_id: Mutex::new(0),
        }
    }

    /// Returns the prototype name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns true if nodes live in a relational table.
    pub const fn is_relational(&self) -> bool {
        self.table.is_some()
    }

    /// Returns the table name.
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Returns the datasource name.
    pub fn datasource(&self) -> Option<&str> {
        self.datasource.as_deref()
    }

    /// Returns the storage name used in keys (`None` for embedded).
    pub fn storage_name(&self) -> Option<&str> {
        self.storage.as_deref()
    }

    /// Returns the primary key column.
    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Returns the name column.
    pub fn name_column(&self) -> Option<&str> {
        self.name_column.as_deref()
    }

    /// Returns the prototype column.
    pub fn prototype_column(&self) -> Option<&str> {
        self.prototype_column.as_deref()
    }

    /// Returns the id strategy.
    pub const fn id_strategy(&self) -> &IdStrategy {
        &self.id_strategy
    }

    /// Returns the relation for a property (case-insensitive).
    pub fn property_relation(&self, name: &str) -> Option<Arc<Relation>> {
        self.properties.get(&name.to_lowercase()).cloned()
    }

    /// Returns all property relations.
    pub fn relations(&self) -> impl Iterator<Item = &Arc<Relation>> {
        self.properties.values()
    }

    /// Returns the subnode relation.
    pub fn subnode_relation(&self) -> Option<Arc<Relation>> {
        self.subnodes.clone()
    }

    /// Returns the table columns, id column first.
    pub fn columns(&self) -> &[DbColumn] {
        &self.columns
    }

    /// Returns the id column's declared type.
    pub fn id_type(&self) -> SqlType {
        self.columns.first().map_or(SqlType::Integer, |c| c.sql_type)
    }

    /// Returns the relation stored in `column`.
    pub fn relation_for_column(&self, column: &str) -> Option<Arc<Relation>> {
        self.properties
            .values()
            .find(|r| r.column.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(column)))
            .cloned()
    }

    /// Returns reference relations loaded through outer joins.
    pub fn joined_relations(&self) -> Vec<Arc<Relation>> {
        self.properties
            .values()
            .filter(|r| r.join && r.kind == super::RelationKind::Reference && r.column.is_some())
            .cloned()
            .collect()
    }

    /// Returns the string value `node` holds for `column`.
    pub fn column_value(&self, node: &Node, column: &str) -> Option<String> {
        if column.eq_ignore_ascii_case(&self.id_column) {
            return Some(node.id());
        }
        if let Some(rel) = self.relation_for_column(column) {
            return node.get(&rel.prop_name).and_then(|v| v.as_string());
        }
        if self.name_column.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(column)) {
            return Some(node.name());
        }
        if self.prototype_column.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(column)) {
            return Some(node.prototype());
        }
        None
    }

    /// Returns when data of this type last changed.
    pub fn last_data_change(&self) -> Timestamp {
        Timestamp(self.last_data_change.load(Ordering::SeqCst))
    }

    /// Records a data change now.
    pub fn notify_data_change(&self) {
        self.last_data_change.store(Timestamp::now().0, Ordering::SeqCst);
    }

    /// Returns when the mapping itself last changed.
    pub fn last_type_change(&self) -> Timestamp {
        Timestamp(self.last_type_change.load(Ordering::SeqCst))
    }

    /// Records a mapping change now.
    pub fn notify_type_change(&self) {
        self.last_type_change.store(Timestamp::now().0, Ordering::SeqCst);
    }

    /// Issues an id above both `curr_max` and every id issued before.
    pub fn new_id(&self, curr_max: u64) -> u64 {
        let mut last = self.last_id.lock();
        let id = curr_max.max(*last) + 1;
        *last = id;
        id
    }
}
