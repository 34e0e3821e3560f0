//! Insert, update, delete and id generation.

use super::NodeManager;
use crate::error::{CoreError, CoreResult};
use crate::node::{NodeRef, Value};
use crate::schema::{DbMapping, IdStrategy};
use crate::sql::{bind_value, DataSource, SelectBuilder, SqlValue, Statement};
use crate::transactor::Transactor;
use nodestore_storage::StoreTxn;
use std::sync::Arc;
use tracing::debug;

impl NodeManager {
    /// Writes a new node and registers it in the cache.
    ///
    /// Embedded nodes are saved as a whole record; relational nodes get one
    /// `INSERT` over every mapped column.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn insert_node(&self, tx: &mut Transactor, node: &NodeRef) -> CoreResult<()> {
        tx.check_alive()?;
        if node.is_virtual() {
            return Ok(());
        }
        let mapping = self.schema.mapping(&node.prototype());
        self.cache.put(node.key(), Arc::clone(node));

        if mapping.is_relational() {
            let max_text_len = self.max_text_len(tx, &mapping)?;
            let stmt = Self::insert_statement(&mapping, node, max_text_len)?;
            self.execute(tx, &mapping, &stmt)?;
            mapping.notify_data_change();
        } else {
            let bytes = node.to_record().encode()?;
            self.store.save_record(tx.store_txn_mut()?, &node.id(), &bytes)?;
        }
        node.mark_all_clean();
        self.stats.record_insert();
        debug!(key = %node.key(), "inserted");
        Ok(())
    }

    pub(crate) fn insert_statement(mapping: &DbMapping, node: &NodeRef, max_text_len: usize) -> CoreResult<Statement> {
        let table = Self::table_of(mapping)?;
        let columns = mapping
            .columns()
            .iter()
            .map(|col| {
                let value = if col.is_id {
                    Value::String(node.id())
                } else {
                    match col.property.as_deref().and_then(|p| node.get(p)) {
                        Some(v) => v,
                        None if col.is_name => Value::String(node.name()),
                        None if col.is_prototype => Value::String(node.prototype()),
                        None => Value::Null,
                    }
                };
                (col.name.clone(), bind_value(col.sql_type, &value, max_text_len))
            })
            .collect();
        Ok(Statement::insert(table, columns))
    }

    /// Writes the dirty, updatable properties of a modified node.
    ///
    /// Relational nodes get one `UPDATE` over the changed columns, or no
    /// statement at all when none qualifies. Embedded nodes are re-saved
    /// whole.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn update_node(&self, tx: &mut Transactor, node: &NodeRef) -> CoreResult<()> {
        tx.check_alive()?;
        if node.is_virtual() {
            return Ok(());
        }
        let mapping = self.schema.mapping(&node.prototype());

        if !mapping.is_relational() {
            let bytes = node.to_record().encode()?;
            self.store.save_record(tx.store_txn_mut()?, &node.id(), &bytes)?;
            node.mark_all_clean();
            self.stats.record_update();
            return Ok(());
        }

        let max_text_len = self.max_text_len(tx, &mapping)?;
        let mut sets = Vec::new();
        let mut written = Vec::new();
        let mut public_change = false;
        for prop in node.dirty_properties() {
            let Some(rel) = mapping.property_relation(&prop.name) else { continue };
            let Some(column) = rel.column.as_ref().filter(|_| rel.is_updatable()) else {
                continue;
            };
            sets.push((column.clone(), bind_value(rel.sql_type, &prop.value, max_text_len)));
            written.push(prop.name);
            public_change |= !rel.private;
        }
        if sets.is_empty() {
            return Ok(());
        }

        let table = Self::table_of(&mapping)?;
        let id = bind_value(mapping.id_type(), &Value::String(node.id()), max_text_len);
        let stmt = Statement::update(table, sets, mapping.id_column(), id);
        self.execute(tx, &mapping, &stmt)?;
        node.clear_dirty(&written);
        if public_change {
            mapping.notify_data_change();
        }
        self.stats.record_update();
        Ok(())
    }

    /// Deletes a node from storage and invalidates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_node(&self, tx: &mut Transactor, node: &NodeRef) -> CoreResult<()> {
        tx.check_alive()?;
        let mapping = self.schema.mapping(&node.prototype());
        if !node.is_virtual() {
            if mapping.is_relational() {
                let table = Self::table_of(&mapping)?;
                let id = bind_value(mapping.id_type(), &Value::String(node.id()), usize::MAX);
                let stmt = Statement::delete(table, mapping.id_column(), id);
                self.execute(tx, &mapping, &stmt)?;
            } else {
                self.store.delete_record(tx.store_txn_mut()?, &node.id())?;
            }
        }
        let key = node.key();
        self.backlinks.forget_owner(&key);
        self.backlinks.remove_target(&key);
        node.invalidate();
        mapping.notify_data_change();
        self.stats.record_delete();
        Ok(())
    }

    /// Issues a new id for a node of `mapping`.
    ///
    /// # Errors
    ///
    /// Returns an error if the id query fails.
    pub fn generate_id(&self, tx: &mut Transactor, mapping: &DbMapping) -> CoreResult<String> {
        tx.check_alive()?;
        match mapping.id_strategy() {
            IdStrategy::Embedded => Ok(self.idgen.lock().next_id().to_string()),
            IdStrategy::MaxPlusOne => {
                let table = Self::table_of(mapping)?;
                let stmt = SelectBuilder::new(table)
                    .expr(format!("MAX({})", mapping.id_column()))
                    .build();
                let rows = self.query(tx, mapping, &stmt, 1)?;
                let current = rows
                    .first()
                    .and_then(|row| row.first())
                    .and_then(SqlValue::as_i64)
                    .map_or(0, |v| u64::try_from(v).unwrap_or(0));
                Ok(mapping.new_id(current).to_string())
            }
            IdStrategy::Sequence(sequence) => {
                let conn = tx.connection(Self::datasource_of(mapping)?)?;
                Ok(conn.next_sequence_value(sequence)?.to_string())
            }
        }
    }

    /// Inserts a relational node's row into another datasource.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not relational or the insert fails.
    pub fn export_node(&self, node: &NodeRef, target: &dyn DataSource) -> CoreResult<()> {
        let mapping = self.schema.mapping(&node.prototype());
        if !mapping.is_relational() {
            return Err(CoreError::invalid_operation(format!(
                "cannot export embedded node {}",
                node.key()
            )));
        }
        let mut conn = target.connect()?;
        let stmt = Self::insert_statement(&mapping, node, conn.max_text_len())?;
        self.log_statement(&stmt);
        let result = conn.execute(&stmt.sql, &stmt.params);
        conn.close()?;
        result?;
        debug!(key = %node.key(), datasource = target.name(), "exported");
        Ok(())
    }

    /// Commits `txn`, saving the id generator with it if ids were issued.
    ///
    /// The generator lock is held until the store commit returns, so a
    /// concurrent commit can never persist a lower counter after this one.
    pub(crate) fn commit_store(&self, mut txn: StoreTxn) -> CoreResult<()> {
        let mut idgen = self.idgen.lock();
        if !idgen.is_dirty() {
            return self.store.commit(txn).map_err(Into::into);
        }
        let value = idgen.value();
        if let Err(e) = self.store.save_id_generator(&mut txn, value) {
            self.store.abort(txn)?;
            return Err(e.into());
        }
        self.store.commit(txn)?;
        idgen.mark_saved(value);
        Ok(())
    }
}
