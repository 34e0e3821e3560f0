//! Schema descriptors: how prototypes map onto storage.
//!
//! A [`Schema`] holds one [`DbMapping`] per prototype. Mappings are either
//! relational (a table in a named datasource) or embedded (whole records
//! in the backing store). Prototypes without a configured mapping get a
//! default embedded one on first use.

mod mapping;
mod relation;

pub use mapping::{DbColumn, DbMapping, IdStrategy, MappingConfig};
pub use relation::{Constraint, Relation, RelationKind};

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// The set of prototype mappings.
#[derive(Debug, Default)]
pub struct Schema {
    mappings: RwLock<HashMap<String, Arc<DbMapping>>>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a schema from JSON: an object of prototype name to
    /// [`MappingConfig`].
    ///
    /// # Errors
    ///
    /// Returns a schema error if the JSON is malformed or any mapping fails
    /// validation.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let configs: BTreeMap<String, MappingConfig> =
            serde_json::from_str(json).map_err(|e| CoreError::schema(e.to_string()))?;
        let schema = Self::new();
        for (name, config) in configs {
            schema.register(&name, config)?;
        }
        Ok(schema)
    }

    /// Registers (or replaces) the mapping for a prototype.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the mapping fails validation.
    pub fn register(&self, type_name: &str, config: MappingConfig) -> CoreResult<Arc<DbMapping>> {
        let mapping = Arc::new(DbMapping::build(type_name, config)?);
        let replaced = self
            .mappings
            .write()
            .insert(type_name.to_lowercase(), Arc::clone(&mapping));
        if replaced.is_some() {
            mapping.notify_type_change();
            debug!(prototype = type_name, "mapping replaced");
        }
        Ok(mapping)
    }

    /// Returns the configured mapping for a prototype.
    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<Arc<DbMapping>> {
        self.mappings.read().get(&type_name.to_lowercase()).cloned()
    }

    /// Returns the mapping for a prototype, creating a default embedded
    /// mapping if none is configured.
    pub fn mapping(&self, type_name: &str) -> Arc<DbMapping> {
        let lower = type_name.to_lowercase();
        if let Some(m) = self.mappings.read().get(&lower) {
            return Arc::clone(m);
        }
        Arc::clone(
            self.mappings
                .write()
                .entry(lower)
                .or_insert_with(|| Arc::new(DbMapping::default_for(type_name))),
        )
    }

    /// Returns the relational mapping whose keys use `storage`.
    ///
    /// When several prototypes share a table, the one named like the
    /// storage wins.
    #[must_use]
    pub fn storage_mapping(&self, storage: &str) -> Option<Arc<DbMapping>> {
        let mappings = self.mappings.read();
        if let Some(m) = mappings.get(&storage.to_lowercase()) {
            if m.storage_name() == Some(storage) {
                return Some(Arc::clone(m));
            }
        }
        let mut matches: Vec<_> = mappings
            .values()
            .filter(|m| m.storage_name() == Some(storage))
            .collect();
        matches.sort_by(|a, b| a.type_name().cmp(b.type_name()));
        matches.first().map(|m| Arc::clone(m))
    }

    /// Returns the names of all configured prototypes.
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .mappings
            .read()
            .values()
            .map(|m| m.type_name().to_string())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "person": {
            "table": "PERSON",
            "datasource": "main",
            "name_column": "NAME",
            "properties": {
                "email": { "column": "EMAIL" },
                "employer": { "kind": "reference", "column": "EMPLOYER_ID", "other_type": "company" }
            }
        },
        "company": {
            "table": "COMPANY",
            "datasource": "main",
            "id_strategy": { "sequence": "COMPANY_SEQ" },
            "subnodes": { "kind": "collection", "other_type": "person",
                          "constraints": [ { "local": "ID", "foreign": "EMPLOYER_ID" } ] }
        }
    }"#;

    #[test]
    fn loads_from_json() {
        let schema = Schema::from_json(JSON).unwrap();
        assert_eq!(schema.type_names(), vec!["company", "person"]);
        let company = schema.get("Company").unwrap();
        assert_eq!(company.id_strategy(), &IdStrategy::Sequence("COMPANY_SEQ".into()));
        let employer = schema.get("person").unwrap().property_relation("EMPLOYER").unwrap();
        assert_eq!(employer.kind, RelationKind::Reference);
        assert_eq!(employer.own_type, "person");
        assert_eq!(employer.prop_name, "employer");
    }

    #[test]
    fn malformed_json_is_schema_error() {
        assert!(matches!(Schema::from_json("{"), Err(CoreError::Schema { .. })));
        let bad = r#"{"x": {"table": "A B", "datasource": "main"}}"#;
        assert!(matches!(Schema::from_json(bad), Err(CoreError::Schema { .. })));
    }

    #[test]
    fn unknown_prototype_gets_embedded_default() {
        let schema = Schema::new();
        let m = schema.mapping("page");
        assert!(!m.is_relational());
        assert!(Arc::ptr_eq(&m, &schema.mapping("PAGE")));
    }

    #[test]
    fn storage_lookup() {
        let schema = Schema::from_json(JSON).unwrap();
        assert_eq!(schema.storage_mapping("person").unwrap().type_name(), "person");
        assert!(schema.storage_mapping("nothing").is_none());
    }

    #[test]
    fn replacing_bumps_type_change() {
        let schema = Schema::new();
        let first = schema.register("page", MappingConfig::embedded()).unwrap();
        let second = schema.register("page", MappingConfig::embedded()).unwrap();
        assert!(second.last_type_change() > first.last_type_change());
    }
}
