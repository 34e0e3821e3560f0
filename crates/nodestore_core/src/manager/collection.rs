//! Child listings, counts and batch prefetch.

use super::NodeManager;
use crate::error::CoreResult;
use crate::key::Key;
use crate::node::{NodeRef, Value};
use crate::schema::Relation;
use crate::sql::{bind_value, SelectBuilder, SqlValue};
use crate::transactor::Transactor;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

impl NodeManager {
    /// Loads every not-yet-cached node among `keys` with one `IN` query.
    ///
    /// Keys are interpreted like the ones returned by
    /// [`get_child_keys`](Self::get_child_keys). For grouped relations the
    /// group nodes are created and their member lists filled in.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn prefetch_nodes(&self, tx: &mut Transactor, home: &NodeRef, rel: &Relation, keys: &[Key]) -> CoreResult<()> {
        tx.check_alive()?;
        let other = self.other_mapping(rel);
        if !other.is_relational() || keys.is_empty() || self.cache.count_missing(keys) == 0 {
            return Ok(());
        }
        let home_mapping = self.schema.mapping(&home.prototype());
        let in_column = rel
            .group_by
            .as_deref()
            .or(rel.accessor.as_deref())
            .unwrap_or_else(|| other.id_column());
        let in_type = Self::column_type(&other, in_column);
        let values: Vec<SqlValue> = keys
            .iter()
            .filter_map(Key::id)
            .map(|id| bind_value(in_type, &Value::from(id), usize::MAX))
            .collect();
        if values.is_empty() {
            return Ok(());
        }

        let (builder, joined) = self.select_for(&other)?;
        let stmt = Self::constrain(builder, rel, &home_mapping, home, &other)
            .where_in(in_column, values)
            .order_by(rel.order.as_deref())
            .build();
        let rows = self.query(tx, &other, &stmt, 0)?;

        let home_key = home.key();
        let mut groups: BTreeMap<String, Vec<Key>> = BTreeMap::new();
        let mut count = 0;
        for row in &rows {
            let Some(node) = self.create_node(&other, row, 0) else { continue };
            let primary = node.key();
            let accessor = rel.accessor.as_deref().and_then(|c| other.column_value(&node, c));
            match rel.group_by.as_deref() {
                Some(group_column) => {
                    let Some(group) = other.column_value(&node, group_column) else { continue };
                    let group_key = Key::synthetic(home_key.clone(), group.clone());
                    let secondary = accessor.map(|a| Key::synthetic(group_key, a));
                    self.cache.register_loaded(&primary, secondary.as_ref(), node);
                    groups
                        .entry(group)
                        .or_default()
                        .push(secondary.unwrap_or(primary));
                }
                None => {
                    let secondary = accessor.map(|a| Key::synthetic(home_key.clone(), a));
                    self.cache.register_loaded(&primary, secondary.as_ref(), node);
                }
            }
            self.register_joined(&other, &joined, row);
            count += 1;
        }
        for (group, members) in groups {
            self.group_node(home, &group, rel).set_subnodes(members);
        }
        debug!(home = %home_key, rows = count, "prefetched nodes");
        Ok(())
    }

    /// Lists the keys of `home`'s children through `rel`.
    ///
    /// Relational children are listed with an id-only query; grouped
    /// relations yield one synthetic key per group. Embedded homes return
    /// their subnode list. The result also becomes `home`'s subnode list.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_child_keys(&self, tx: &mut Transactor, home: &NodeRef, rel: &Relation) -> CoreResult<Vec<Key>> {
        tx.check_alive()?;
        let other = self.other_mapping(rel);
        if !other.is_relational() {
            let mut keys = home.subnodes();
            if rel.max_size > 0 {
                keys.truncate(rel.max_size);
            }
            return Ok(keys);
        }
        let home_mapping = self.schema.mapping(&home.prototype());
        let home_key = home.key();
        let table = Self::table_of(&other)?;

        let keys: Vec<Key> = if let Some(group_column) = rel.group_by.as_deref() {
            let builder = SelectBuilder::new(table).expr(format!("DISTINCT {table}.{group_column}"));
            let stmt = Self::constrain(builder, rel, &home_mapping, home, &other)
                .order_by(Some(group_column))
                .build();
            let rows = self.query(tx, &other, &stmt, rel.max_size)?;
            let keys: Vec<_> = rows
                .iter()
                .filter_map(|row| row.first().and_then(SqlValue::to_id_string))
                .map(|group| Key::synthetic(home_key.clone(), group))
                .collect();
            for key in &keys {
                if self.cache.get(key).is_some_and(|n| n.is_null_sentinel()) {
                    self.cache.evict_key(key);
                }
            }
            keys
        } else {
            let column = rel.accessor.as_deref().unwrap_or_else(|| other.id_column());
            let builder = SelectBuilder::new(table).columns(table, [column]);
            let stmt = Self::constrain(builder, rel, &home_mapping, home, &other)
                .order_by(rel.order.as_deref())
                .build();
            let rows = self.query(tx, &other, &stmt, rel.max_size)?;
            rows.iter()
                .filter_map(|row| row.first().and_then(SqlValue::to_id_string))
                .map(|value| {
                    if rel.accessor.is_some() {
                        Key::synthetic(home_key.clone(), value)
                    } else {
                        Key::db(other.storage_name(), value)
                    }
                })
                .collect()
        };
        home.set_subnodes(keys.clone());
        Ok(keys)
    }

    /// Loads `home`'s children through `rel` with full rows.
    ///
    /// Each loaded node is cached (incumbents win). Grouped relations and
    /// embedded homes resolve their child keys one by one instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_children(&self, tx: &mut Transactor, home: &NodeRef, rel: &Relation) -> CoreResult<Vec<NodeRef>> {
        tx.check_alive()?;
        let other = self.other_mapping(rel);
        if rel.group_by.is_some() || !other.is_relational() {
            let keys = self.get_child_keys(tx, home, rel)?;
            let mut nodes = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(node) = self.get_node(tx, &key)? {
                    nodes.push(node);
                }
            }
            return Ok(nodes);
        }

        let home_mapping = self.schema.mapping(&home.prototype());
        let home_key = home.key();
        let (builder, joined) = self.select_for(&other)?;
        let stmt = Self::constrain(builder, rel, &home_mapping, home, &other)
            .order_by(rel.order.as_deref())
            .build();
        let rows = self.query(tx, &other, &stmt, rel.max_size)?;

        let mut nodes = Vec::with_capacity(rows.len());
        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(node) = self.create_node(&other, row, 0) else { continue };
            let primary = node.key();
            let secondary = rel
                .accessor
                .as_deref()
                .and_then(|c| other.column_value(&node, c))
                .map(|a| Key::synthetic(home_key.clone(), a));
            let node = self.cache.register_loaded(&primary, secondary.as_ref(), node);
            self.register_joined(&other, &joined, row);
            let key = secondary.unwrap_or(primary);
            tx.visit(key.clone(), Arc::clone(&node));
            keys.push(key);
            nodes.push(node);
        }
        home.set_subnodes(keys);
        Ok(nodes)
    }

    /// Counts `home`'s children through `rel`, clamped to the relation's
    /// maximum size.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_children(&self, tx: &mut Transactor, home: &NodeRef, rel: &Relation) -> CoreResult<usize> {
        tx.check_alive()?;
        let other = self.other_mapping(rel);
        let count = if other.is_relational() {
            let home_mapping = self.schema.mapping(&home.prototype());
            let table = Self::table_of(&other)?;
            let expr = match rel.group_by.as_deref() {
                Some(group_column) => format!("COUNT(DISTINCT {table}.{group_column})"),
                None => "COUNT(*)".to_string(),
            };
            let builder = SelectBuilder::new(table).expr(expr);
            let stmt = Self::constrain(builder, rel, &home_mapping, home, &other).build();
            let rows = self.query(tx, &other, &stmt, 1)?;
            rows.first()
                .and_then(|row| row.first())
                .and_then(SqlValue::as_i64)
                .map_or(0, |n| usize::try_from(n).unwrap_or(0))
        } else {
            home.subnodes().len()
        };
        Ok(if rel.max_size > 0 {
            count.min(rel.max_size)
        } else {
            count
        })
    }

    /// Lists the accessor values (names) of `home`'s children.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_child_names(&self, tx: &mut Transactor, home: &NodeRef, rel: &Relation) -> CoreResult<Vec<String>> {
        tx.check_alive()?;
        let other = self.other_mapping(rel);
        if !other.is_relational() {
            let mut names = Vec::new();
            for key in home.subnodes() {
                if let Some(node) = self.get_node(tx, &key)? {
                    names.push(node.name());
                }
            }
            return Ok(names);
        }
        let home_mapping = self.schema.mapping(&home.prototype());
        let table = Self::table_of(&other)?;
        let column = rel
            .group_by
            .as_deref()
            .or(rel.accessor.as_deref())
            .unwrap_or_else(|| other.id_column());
        let builder = if rel.group_by.is_some() {
            SelectBuilder::new(table).expr(format!("DISTINCT {table}.{column}"))
        } else {
            SelectBuilder::new(table).columns(table, [column])
        };
        let order = if rel.group_by.is_some() { Some(column) } else { rel.order.as_deref() };
        let stmt = Self::constrain(builder, rel, &home_mapping, home, &other)
            .order_by(order)
            .build();
        let rows = self.query(tx, &other, &stmt, rel.max_size)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first().and_then(SqlValue::to_id_string))
            .collect())
    }
}
