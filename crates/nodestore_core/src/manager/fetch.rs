//! Lookups by key and by relation.

use super::NodeManager;
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::node::{Node, NodeRef, Value};
use crate::record::NodeRecord;
use crate::schema::{DbMapping, Relation};
use crate::sql::bind_value;
use crate::transactor::Transactor;
use std::sync::Arc;
use tracing::{debug, warn};

impl NodeManager {
    /// Fetches a node by key.
    ///
    /// Checks the transactor's visited map, then the shared cache, then
    /// storage. A freshly loaded node loses to a valid node already cached
    /// under its primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the transactor is not usable or storage fails.
    pub fn get_node(&self, tx: &mut Transactor, key: &Key) -> CoreResult<Option<NodeRef>> {
        tx.check_alive()?;
        if let Some(node) = tx.visited(key) {
            return Ok(Some(node));
        }

        if let Some(node) = self.cache.get(key) {
            if !node.is_null_sentinel() {
                self.stats.record_cache_hit();
                tx.visit(key.clone(), Arc::clone(&node));
                return Ok(Some(node));
            }
            let fresh = key
                .storage()
                .and_then(|s| self.schema.storage_mapping(s))
                .is_some_and(|m| node.created() >= m.last_data_change());
            if fresh && key.is_primary() {
                self.stats.record_cache_hit();
                return Ok(None);
            }
        }
        self.stats.record_cache_miss();

        let loaded = match key {
            Key::Synthetic(sk) => {
                let Some(parent) = self.get_node(tx, &sk.parent)? else {
                    return Ok(None);
                };
                // relation lookups register and visit on their own
                return self.get_synthetic(tx, &parent, &sk.name);
            }
            Key::Db(dk) => match &dk.storage {
                None => self.load_embedded(tx, &dk.id)?,
                Some(storage) => match self.schema.storage_mapping(storage) {
                    Some(mapping) => self.load_relational(tx, &mapping, key, vec![(
                        mapping.id_column().to_string(),
                        dk.id.clone(),
                    )])?,
                    None => {
                        warn!(storage = %storage, "no mapping for storage");
                        None
                    }
                },
            },
            Key::Multi(mk) => match mk.storage.as_deref().and_then(|s| self.schema.storage_mapping(s)) {
                Some(mapping) => self.load_relational(tx, &mapping, key, mk.parts.clone())?,
                None => {
                    warn!(key = %key, "no mapping for multi key");
                    None
                }
            },
        };

        let Some(node) = loaded else {
            return Ok(None);
        };
        let primary = node.key();
        let secondary = (primary != *key).then_some(key);
        let node = self.cache.register_loaded(&primary, secondary, node);
        tx.visit(key.clone(), Arc::clone(&node));
        Ok(Some(node))
    }

    /// Resolves the named child of `parent` addressed by a synthetic key.
    fn get_synthetic(&self, tx: &mut Transactor, parent: &NodeRef, name: &str) -> CoreResult<Option<NodeRef>> {
        let mapping = self.schema.mapping(&parent.prototype());
        let rel = mapping
            .property_relation(name)
            .or_else(|| mapping.subnode_relation());
        match rel {
            Some(rel) if rel.group_by.is_some() => self.groupby_subnode(tx, parent, name, true),
            Some(rel) => self.get_node_by_relation(tx, parent, name, &rel),
            None => self.child_by_name(tx, parent, name),
        }
    }

    /// Finds an embedded child by name among `home`'s subnodes.
    pub(crate) fn child_by_name(&self, tx: &mut Transactor, home: &NodeRef, name: &str) -> CoreResult<Option<NodeRef>> {
        for key in home.subnodes() {
            if let Some(child) = self.get_node(tx, &key)? {
                if child.name() == name {
                    return Ok(Some(child));
                }
            }
        }
        Ok(None)
    }

    /// Fetches the node reached from `home` through `rel` under `name`.
    ///
    /// `name` is the accessor value, the group name, or the related id,
    /// depending on the relation.
    ///
    /// # Errors
    ///
    /// Returns an error if the transactor is not usable, storage fails, or
    /// a single-row lookup matches several rows.
    pub fn get_node_by_relation(
        &self,
        tx: &mut Transactor,
        home: &NodeRef,
        name: &str,
        rel: &Relation,
    ) -> CoreResult<Option<NodeRef>> {
        tx.check_alive()?;
        let home_mapping = self.schema.mapping(&home.prototype());
        let other = self.other_mapping(rel);
        let key = if rel.is_complex_reference() {
            Key::multi(other.storage_name(), rel.key_parts(&home_mapping, home))
        } else if rel.create_on_demand() {
            Key::synthetic(home.key(), name)
        } else {
            Key::db(other.storage_name(), name)
        };

        if let Some(node) = tx.visited(&key) {
            return Ok(Some(node));
        }

        let cached = self.cache.get(&key).filter(|node| {
            if node.is_null_sentinel() {
                return true;
            }
            if rel.group_by.is_some() && !rel.is_virtual && !home.contains(&node.key()) {
                debug!(key = %key, "cached group node no longer contained, reloading");
                return false;
            }
            if !rel.uses_primary_key() && !rel.check_constraints(&home_mapping, home, &other, node) {
                debug!(key = %key, "cached node fails relation constraints, reloading");
                return false;
            }
            true
        });

        if let Some(node) = cached {
            if node.is_null_sentinel() {
                if node.created() >= other.last_data_change() && node.created() >= home_mapping.last_type_change() {
                    self.stats.record_cache_hit();
                    return Ok(None);
                }
            } else {
                self.stats.record_cache_hit();
                let node = if key.is_primary() || node.is_virtual() {
                    node
                } else {
                    self.cache.register_loaded(&node.key(), Some(&key), node)
                };
                tx.visit(key, Arc::clone(&node));
                return Ok(Some(node));
            }
        }
        self.stats.record_cache_miss();

        let Some(node) = self.load_by_relation(tx, home, &home_mapping, name, rel, &other)? else {
            self.cache.put(key, Node::null_sentinel());
            return Ok(None);
        };
        if node.is_virtual() {
            self.cache.put(key.clone(), Arc::clone(&node));
            tx.visit(key, Arc::clone(&node));
            return Ok(Some(node));
        }

        Ok(Some(self.adopt_reloaded(tx, key, node)))
    }

    /// Registers a node reloaded through a relation under its primary key
    /// and under `lookup`. A valid incumbent wins and has its `created`
    /// stamp moved up to its last modification.
    fn adopt_reloaded(&self, tx: &mut Transactor, lookup: Key, node: NodeRef) -> NodeRef {
        let primary = node.key();
        let secondary = (primary != lookup).then_some(&lookup);
        let winner = self.cache.register_loaded(&primary, secondary, Arc::clone(&node));
        if !Arc::ptr_eq(&winner, &node) {
            winner.set_created(winner.last_modified());
        }
        if primary != lookup {
            tx.visit(primary, Arc::clone(&winner));
        }
        tx.visit(lookup, Arc::clone(&winner));
        winner
    }

    fn load_by_relation(
        &self,
        tx: &mut Transactor,
        home: &NodeRef,
        home_mapping: &DbMapping,
        name: &str,
        rel: &Relation,
        other: &Arc<DbMapping>,
    ) -> CoreResult<Option<NodeRef>> {
        if rel.is_virtual {
            let prototype = rel
                .prototype
                .as_deref()
                .or(rel.other_type.as_deref())
                .unwrap_or("hopobject");
            let key = Key::synthetic(home.key(), name);
            return Ok(Some(Node::virtual_node(key, name, prototype, Some(home.key()))));
        }
        if rel.group_by.is_some() {
            let group = self.groupby_subnode(tx, home, name, false)?;
            if group.is_some() || other.is_relational() {
                return Ok(group);
            }
            return self.load_embedded(tx, name);
        }
        if !other.is_relational() {
            return self.load_embedded(tx, name);
        }

        let (builder, joined) = self.select_for(other)?;
        let mut builder = Self::constrain(builder, rel, home_mapping, home, other);
        if !rel.is_complex_reference() {
            let column = rel.accessor.as_deref().unwrap_or_else(|| other.id_column());
            let value = bind_value(Self::column_type(other, column), &Value::from(name), usize::MAX);
            builder = builder.where_eq(column, value);
        }
        let stmt = builder.build();
        let rows = self.query(tx, other, &stmt, 2)?;
        if rows.len() > 1 {
            return Err(CoreError::MultipleRows {
                key: Key::synthetic(home.key(), name),
            });
        }
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        self.register_joined(other, &joined, row);
        Ok(self.create_node(other, row, 0))
    }

    /// Returns the group node `group` under `home`.
    ///
    /// With `create` the group node is built unconditionally; otherwise only
    /// if `home` lists it or the group has at least one member.
    ///
    /// # Errors
    ///
    /// Returns an error if the membership query fails.
    pub fn groupby_subnode(
        &self,
        tx: &mut Transactor,
        home: &NodeRef,
        group: &str,
        create: bool,
    ) -> CoreResult<Option<NodeRef>> {
        tx.check_alive()?;
        let key = Key::synthetic(home.key(), group);
        if let Some(node) = self.cache.get(&key).filter(|n| !n.is_null_sentinel()) {
            return Ok(Some(node));
        }
        let home_mapping = self.schema.mapping(&home.prototype());
        let Some(rel) = home_mapping.subnode_relation().filter(|r| r.group_by.is_some()) else {
            return Ok(None);
        };

        let exists = create
            || home.contains(&key)
            || {
                let other = self.other_mapping(&rel);
                other.is_relational()
                    && self.count_children(tx, home, &rel.for_group(&home_mapping, home, group))? > 0
            };
        if !exists {
            return Ok(None);
        }

        Ok(Some(self.group_node(home, group, &rel)))
    }

    /// Returns the cached group node `group` under `home`, building it from
    /// `rel` when absent.
    pub(crate) fn group_node(&self, home: &NodeRef, group: &str, rel: &Relation) -> NodeRef {
        let key = Key::synthetic(home.key(), group);
        if let Some(node) = self.cache.get(&key).filter(|n| !n.is_null_sentinel()) {
            return node;
        }
        let prototype = rel.group_prototype.as_deref().unwrap_or("hopobject");
        let node = Node::virtual_node(key.clone(), group, prototype, Some(home.key()));
        self.cache.put(key, Arc::clone(&node));
        node
    }

    /// Returns the relation listing the members of a group node.
    pub(crate) fn group_relation(&self, tx: &mut Transactor, group: &NodeRef) -> CoreResult<Option<Relation>> {
        let Some(parent_key) = group.parent() else {
            return Ok(None);
        };
        let Some(parent) = self.get_node(tx, &parent_key)? else {
            return Ok(None);
        };
        let mapping = self.schema.mapping(&parent.prototype());
        Ok(mapping
            .subnode_relation()
            .filter(|r| r.group_by.is_some())
            .map(|r| r.for_group(&mapping, &parent, &group.name())))
    }

    pub(crate) fn load_embedded(&self, tx: &mut Transactor, id: &str) -> CoreResult<Option<NodeRef>> {
        if nodestore_storage::validate_record_id(id).is_err() {
            return Ok(None);
        }
        let bytes = self.store.get_record(tx.store_txn()?, id)?;
        self.stats.record_store_read();
        match bytes {
            Some(bytes) => Ok(Some(Node::from_record(NodeRecord::decode(&bytes)?, None))),
            None => Ok(None),
        }
    }

    fn load_relational(
        &self,
        tx: &mut Transactor,
        mapping: &Arc<DbMapping>,
        key: &Key,
        parts: Vec<(String, String)>,
    ) -> CoreResult<Option<NodeRef>> {
        let (mut builder, joined) = self.select_for(mapping)?;
        for (column, value) in parts {
            let value = bind_value(Self::column_type(mapping, &column), &Value::String(value), usize::MAX);
            builder = builder.where_eq(&column, value);
        }
        let stmt = builder.build();
        let rows = self.query(tx, mapping, &stmt, 2)?;
        if rows.len() > 1 {
            return Err(CoreError::MultipleRows { key: key.clone() });
        }
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        self.register_joined(mapping, &joined, row);
        Ok(self.create_node(mapping, row, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::Schema;
    use crate::types::Timestamp;
    use nodestore_storage::InMemoryStore;

    fn manager() -> Arc<NodeManager> {
        NodeManager::new(Config::default(), Arc::new(InMemoryStore::new()), Schema::new()).unwrap()
    }

    fn page(id: &str, created: i64, modified: i64) -> NodeRef {
        Arc::new(Node::loaded(
            id.to_string(),
            None,
            "page".into(),
            Some("page".into()),
            Timestamp(created),
            Timestamp(modified),
        ))
    }

    #[test]
    fn incumbent_wins_reload_under_primary_key() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        tx.begin("reload").unwrap();
        let incumbent = page("7", 10, 20);
        nmgr.cache().put(incumbent.key(), Arc::clone(&incumbent));

        let winner = nmgr.adopt_reloaded(&mut tx, incumbent.key(), page("7", 30, 30));
        assert!(Arc::ptr_eq(&winner, &incumbent));
        assert_eq!(incumbent.created(), Timestamp(20));
        assert!(Arc::ptr_eq(&tx.get(&incumbent.key()).unwrap().unwrap(), &incumbent));
        tx.commit().unwrap();
    }

    #[test]
    fn incumbent_wins_reload_under_secondary_key() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        tx.begin("reload").unwrap();
        let incumbent = page("7", 10, 20);
        nmgr.cache().put(incumbent.key(), Arc::clone(&incumbent));

        let lookup = Key::synthetic(Key::embedded("0"), "seven");
        let winner = nmgr.adopt_reloaded(&mut tx, lookup.clone(), page("7", 30, 30));
        assert!(Arc::ptr_eq(&winner, &incumbent));
        assert_eq!(incumbent.created(), Timestamp(20));
        assert!(Arc::ptr_eq(&nmgr.cache().get(&lookup).unwrap(), &incumbent));
        tx.commit().unwrap();
    }

    #[test]
    fn fresh_reload_keeps_its_created_stamp() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        tx.begin("reload").unwrap();
        let loaded = page("8", 10, 20);

        let winner = nmgr.adopt_reloaded(&mut tx, loaded.key(), Arc::clone(&loaded));
        assert!(Arc::ptr_eq(&winner, &loaded));
        assert_eq!(loaded.created(), Timestamp(10));
        tx.commit().unwrap();
    }
}
