//! Per-thread transaction context.
//!
//! A [`Transactor`] belongs to one worker thread. It buffers node changes
//! until [`commit`](Transactor::commit), memoizes every node it reads, owns
//! one lazily opened connection per datasource and the backing store
//! transaction.
//!
//! State machine:
//!
//! ```text
//! idle --begin--> active --commit/abort--> idle
//!                    |
//!                  kill  (next commit aborts; further calls fail)
//! ```

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::manager::NodeManager;
use crate::node::{Node, NodeRef, NodeState, Value};
use crate::replication::{ReplicatedNode, ReplicationBatch};
use crate::schema::{Relation, RelationKind};
use crate::sql::Connection;
use crate::types::TransactorId;
use nodestore_storage::StoreTxn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::Thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// State shared between a transactor and its kill handles.
#[derive(Debug, Default)]
struct Shared {
    name: Mutex<String>,
    active: AtomicBool,
    killed: AtomicBool,
    touched: Mutex<Vec<NodeRef>>,
    thread: Mutex<Option<Thread>>,
}

/// Transaction context of one worker thread.
pub struct Transactor {
    id: TransactorId,
    nmgr: Arc<NodeManager>,
    shared: Arc<Shared>,
    visited: HashMap<Key, NodeRef>,
    store_txn: Option<StoreTxn>,
    connections: HashMap<String, Box<dyn Connection>>,
    started: Option<Instant>,
}

impl std::fmt::Debug for Transactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transactor")
            .field("id", &self.id)
            .field("name", &*self.shared.name.lock())
            .field("active", &self.is_active())
            .field("killed", &self.is_killed())
            .field("touched", &self.shared.touched.lock().len())
            .field("visited", &self.visited.len())
            .finish_non_exhaustive()
    }
}

impl Transactor {
    pub(crate) fn new(id: TransactorId, nmgr: Arc<NodeManager>) -> Self {
        Self {
            id,
            nmgr,
            shared: Arc::new(Shared::default()),
            visited: HashMap::new(),
            store_txn: None,
            connections: HashMap::new(),
            started: None,
        }
    }

    /// Returns this transactor's id.
    pub const fn id(&self) -> TransactorId {
        self.id
    }

    /// Returns the manager this transactor works for.
    pub fn node_manager(&self) -> &Arc<NodeManager> {
        &self.nmgr
    }

    /// Returns the current transaction name.
    pub fn name(&self) -> String {
        self.shared.name.lock().clone()
    }

    /// Returns true while a transaction is open.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Returns true once the transactor has been killed.
    pub fn is_killed(&self) -> bool {
        self.shared.killed.load(Ordering::SeqCst)
    }

    /// Returns a handle that can kill this transactor from another thread.
    pub fn kill_handle(&self) -> KillHandle {
        let config = self.nmgr.config();
        KillHandle {
            id: self.id,
            nmgr: Arc::clone(&self.nmgr),
            shared: Arc::clone(&self.shared),
            grace: config.kill_grace,
            force_wait: config.kill_force_wait,
        }
    }

    /// Opens a transaction. A still-open transaction is aborted first.
    ///
    /// # Errors
    ///
    /// Returns `TransactionKilled` on a killed transactor, or a storage
    /// error if the store transaction cannot begin.
    pub fn begin(&mut self, name: &str) -> CoreResult<()> {
        if self.is_killed() {
            return Err(CoreError::TransactionKilled { name: name.to_string() });
        }
        if self.is_active() {
            warn!(transaction = %self.name(), "aborting open transaction before begin");
            self.abort()?;
        }
        self.store_txn = Some(self.nmgr.store().begin()?);
        *self.shared.name.lock() = name.to_string();
        *self.shared.thread.lock() = Some(std::thread::current());
        self.started = Some(Instant::now());
        self.shared.active.store(true, Ordering::SeqCst);
        debug!(tx = %self.id, transaction = name, "begin");
        Ok(())
    }

    /// Fails unless a transaction is open and the transactor is not killed.
    pub(crate) fn check_alive(&self) -> CoreResult<()> {
        if self.is_killed() {
            return Err(CoreError::TransactionKilled { name: self.name() });
        }
        if !self.is_active() {
            return Err(CoreError::invalid_operation("no active transaction"));
        }
        Ok(())
    }

    /// Writes every touched node and commits.
    ///
    /// On any failure the whole transaction is aborted and the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `TransactionKilled` if the transactor was killed, or the
    /// first storage or database error.
    pub fn commit(&mut self) -> CoreResult<()> {
        if !self.is_active() {
            return Err(CoreError::invalid_operation("no active transaction"));
        }
        if self.is_killed() {
            let name = self.name();
            self.abort()?;
            return Err(CoreError::TransactionKilled { name });
        }
        match self.write_all() {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(transaction = %self.name(), error = %e, "commit failed, aborting");
                if let Err(abort_err) = self.abort() {
                    warn!(error = %abort_err, "abort after failed commit also failed");
                }
                Err(e)
            }
        }
    }

    fn write_all(&mut self) -> CoreResult<()> {
        let nmgr = Arc::clone(&self.nmgr);
        let touched = self.shared.touched.lock().clone();
        let (mut inserted, mut updated, mut deleted) = (0usize, 0usize, 0usize);
        let mut batch = ReplicationBatch::new();

        for node in &touched {
            match node.state() {
                NodeState::New => {
                    nmgr.insert_node(self, node)?;
                    node.set_state(NodeState::Clean);
                    batch.added.push(ReplicatedNode::from_node(node));
                    inserted += 1;
                }
                NodeState::Modified => {
                    nmgr.update_node(self, node)?;
                    node.set_state(NodeState::Clean);
                    batch.added.push(ReplicatedNode::from_node(node));
                    updated += 1;
                }
                NodeState::Deleted => {
                    let entry = ReplicatedNode::from_node(node);
                    nmgr.delete_node(self, node)?;
                    nmgr.evict_node(node);
                    batch.deleted.push(entry);
                    deleted += 1;
                }
                _ => {}
            }
            node.clear_write_lock();
        }

        if let Some(txn) = self.store_txn.take() {
            nmgr.commit_store(txn)?;
        }
        nmgr.replicate(batch);

        let elapsed = self.started.map_or(0, |s| s.elapsed().as_millis());
        info!(
            "{} {} marked, {} inserted, {} updated, {} deleted in {} ms",
            self.name(),
            touched.len(),
            inserted,
            updated,
            deleted,
            elapsed
        );
        nmgr.stats().record_commit();
        self.finish();
        Ok(())
    }

    /// Discards the transaction: every touched node is evicted, write locks
    /// are released, connections closed and the store transaction aborted.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store transaction cannot be aborted.
    /// Local state is cleaned up regardless.
    pub fn abort(&mut self) -> CoreResult<()> {
        let touched: Vec<_> = self.shared.touched.lock().drain(..).collect();
        for node in &touched {
            self.nmgr.evict_node(node);
            node.clear_write_lock();
        }
        let result = match self.store_txn.take() {
            Some(txn) => self.nmgr.store().abort(txn),
            None => Ok(()),
        };
        if self.is_active() {
            info!(transaction = %self.name(), evicted = touched.len(), "aborted");
            self.nmgr.stats().record_abort();
        }
        self.finish();
        result.map_err(Into::into)
    }

    fn finish(&mut self) {
        for (name, mut conn) in self.connections.drain() {
            if let Err(e) = conn.close() {
                warn!(datasource = %name, error = %e, "closing connection failed");
            }
        }
        self.shared.touched.lock().clear();
        self.visited.clear();
        self.started = None;
        *self.shared.thread.lock() = None;
        self.shared.active.store(false, Ordering::SeqCst);
    }

    /// Returns a node memoized in this transaction.
    pub(crate) fn visited(&self, key: &Key) -> Option<NodeRef> {
        self.visited.get(key).filter(|n| n.is_valid()).cloned()
    }

    /// Memoizes a node read in this transaction.
    pub(crate) fn visit(&mut self, key: Key, node: NodeRef) {
        self.visited.insert(key, node);
    }

    /// Records a node to be written at commit.
    fn touch(&self, node: &NodeRef) {
        let mut touched = self.shared.touched.lock();
        if !touched.iter().any(|n| Arc::ptr_eq(n, node)) {
            touched.push(Arc::clone(node));
        }
    }

    /// Returns the number of nodes touched in this transaction.
    pub fn touched_count(&self) -> usize {
        self.shared.touched.lock().len()
    }

    pub(crate) fn store_txn(&self) -> CoreResult<&StoreTxn> {
        self.store_txn
            .as_ref()
            .ok_or_else(|| CoreError::invalid_operation("no active transaction"))
    }

    pub(crate) fn store_txn_mut(&mut self) -> CoreResult<&mut StoreTxn> {
        self.store_txn
            .as_mut()
            .ok_or_else(|| CoreError::invalid_operation("no active transaction"))
    }

    /// Returns this transaction's connection to `datasource`, opening it on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the datasource is unknown or refuses to connect.
    pub fn connection(&mut self, datasource: &str) -> CoreResult<&mut dyn Connection> {
        self.check_alive()?;
        if !self.connections.contains_key(datasource) {
            let conn = self.nmgr.datasource(datasource)?.connect()?;
            debug!(tx = %self.id, datasource, "connection opened");
            self.connections.insert(datasource.to_string(), conn);
        }
        match self.connections.get_mut(datasource) {
            Some(conn) => Ok(conn.as_mut()),
            None => Err(CoreError::invalid_operation("connection vanished")),
        }
    }

    /// Fetches a node by key.
    ///
    /// # Errors
    ///
    /// See [`NodeManager::get_node`].
    pub fn get(&mut self, key: &Key) -> CoreResult<Option<NodeRef>> {
        let nmgr = Arc::clone(&self.nmgr);
        nmgr.get_node(self, key)
    }

    /// Fetches the root node.
    ///
    /// # Errors
    ///
    /// See [`NodeManager::get_node`].
    pub fn root(&mut self) -> CoreResult<Option<NodeRef>> {
        self.get(&Key::embedded(crate::manager::ROOT_ID))
    }

    /// Fetches the user root node.
    ///
    /// # Errors
    ///
    /// See [`NodeManager::get_node`].
    pub fn users(&mut self) -> CoreResult<Option<NodeRef>> {
        self.get(&Key::embedded(crate::manager::USERS_ID))
    }

    /// Fetches the named child of `home`.
    ///
    /// Uses the home's subnode relation when one is mapped, otherwise
    /// searches the embedded subnode list.
    ///
    /// # Errors
    ///
    /// See [`NodeManager::get_node_by_relation`].
    pub fn get_child(&mut self, home: &NodeRef, name: &str) -> CoreResult<Option<NodeRef>> {
        let nmgr = Arc::clone(&self.nmgr);
        let mapping = nmgr.schema().mapping(&home.prototype());
        match mapping.subnode_relation() {
            Some(rel) if rel.group_by.is_some() => nmgr.groupby_subnode(self, home, name, false),
            Some(rel) => nmgr.get_node_by_relation(self, home, name, &rel),
            None => {
                self.check_alive()?;
                nmgr.child_by_name(self, home, name)
            }
        }
    }

    /// Resolves a node-valued property of `home`.
    ///
    /// # Errors
    ///
    /// See [`NodeManager::get_node_by_relation`].
    pub fn get_reference(&mut self, home: &NodeRef, property: &str) -> CoreResult<Option<NodeRef>> {
        let nmgr = Arc::clone(&self.nmgr);
        let mapping = nmgr.schema().mapping(&home.prototype());
        if let Some(rel) = mapping.property_relation(property) {
            if rel.is_complex_reference() || rel.is_virtual {
                return nmgr.get_node_by_relation(self, home, property, &rel);
            }
        }
        match home.get(property) {
            Some(Value::Node(key)) => self.get(&key),
            _ => Ok(None),
        }
    }

    /// Lists the children of `home` (group nodes for grouped relations).
    ///
    /// # Errors
    ///
    /// See [`NodeManager::get_children`].
    pub fn children(&mut self, home: &NodeRef) -> CoreResult<Vec<NodeRef>> {
        let nmgr = Arc::clone(&self.nmgr);
        match self.children_relation(home)? {
            Some(rel) => nmgr.get_children(self, home, &rel),
            None => {
                let mut nodes = Vec::new();
                for key in home.subnodes() {
                    if let Some(node) = nmgr.get_node(self, &key)? {
                        nodes.push(node);
                    }
                }
                Ok(nodes)
            }
        }
    }

    /// Counts the children of `home`.
    ///
    /// # Errors
    ///
    /// See [`NodeManager::count_children`].
    pub fn count_children(&mut self, home: &NodeRef) -> CoreResult<usize> {
        let nmgr = Arc::clone(&self.nmgr);
        match self.children_relation(home)? {
            Some(rel) => nmgr.count_children(self, home, &rel),
            None => Ok(home.subnodes().len()),
        }
    }

    fn children_relation(&mut self, home: &NodeRef) -> CoreResult<Option<Relation>> {
        self.check_alive()?;
        let nmgr = Arc::clone(&self.nmgr);
        if home.is_virtual() {
            if let Some(rel) = nmgr.group_relation(self, home)? {
                return Ok(Some(rel));
            }
        }
        Ok(nmgr
            .schema()
            .mapping(&home.prototype())
            .subnode_relation()
            .map(|r| (*r).clone()))
    }

    /// Creates and persists a new node.
    ///
    /// # Errors
    ///
    /// See [`persist`](Self::persist).
    pub fn create(&mut self, prototype: &str, name: Option<&str>) -> CoreResult<NodeRef> {
        let node = Node::transient(prototype, name);
        self.persist(&node)?;
        Ok(node)
    }

    /// Makes a transient node persistent: it gets an id and is inserted at
    /// commit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for nodes that are not transient, or an
    /// error from id generation.
    pub fn persist(&mut self, node: &NodeRef) -> CoreResult<()> {
        self.check_alive()?;
        if node.state() != NodeState::Transient {
            return Err(CoreError::invalid_operation(format!(
                "node {} is already persistent",
                node.key()
            )));
        }
        let nmgr = Arc::clone(&self.nmgr);
        let mapping = nmgr.schema().mapping(&node.prototype());
        let id = nmgr.generate_id(self, &mapping)?;
        node.assign_id(id, mapping.storage_name().map(str::to_string));
        node.lock_for(self.id)?;
        node.set_state(NodeState::New);
        for prop in node.properties() {
            if let Value::Node(target) = &prop.value {
                nmgr.backlinks().register(target, &node.key(), &prop.name);
            }
        }
        self.touch(node);
        self.visit(node.key(), Arc::clone(node));
        Ok(())
    }

    fn writable(&self, node: &NodeRef) -> CoreResult<bool> {
        self.check_alive()?;
        match node.state() {
            NodeState::Invalid => Err(CoreError::invalid_operation(format!(
                "node {} is invalid and must be refetched",
                node.key()
            ))),
            NodeState::Deleted => Err(CoreError::invalid_operation(format!(
                "node {} is deleted",
                node.key()
            ))),
            NodeState::Transient => Ok(false),
            _ if node.is_null_sentinel() => Err(CoreError::invalid_operation("null node")),
            _ => {
                node.lock_for(self.id)?;
                Ok(true)
            }
        }
    }

    /// Sets a property.
    ///
    /// Takes the node's write lock and keeps the back-link index in step
    /// with node-valued properties.
    ///
    /// # Errors
    ///
    /// Returns `NodeLocked` if another transactor holds the node, or
    /// `InvalidOperation` for invalid or deleted nodes.
    pub fn set(&mut self, node: &NodeRef, name: &str, value: Value) -> CoreResult<()> {
        let persistent = self.writable(node)?;
        let new_target = value.as_node_key().cloned();
        let old = node.set_value(name, value);
        if persistent {
            let owner = node.key();
            if let Some(Value::Node(old_target)) = &old {
                self.nmgr.backlinks().unregister(old_target, &owner, name);
            }
            if let Some(target) = &new_target {
                self.nmgr.backlinks().register(target, &owner, name);
            }
            self.touch(node);
        }
        Ok(())
    }

    /// Clears a property.
    ///
    /// # Errors
    ///
    /// Same as [`set`](Self::set).
    pub fn unset(&mut self, node: &NodeRef, name: &str) -> CoreResult<()> {
        let persistent = self.writable(node)?;
        let old = node.unset(name);
        if persistent {
            if let Some(Value::Node(old_target)) = &old {
                self.nmgr.backlinks().unregister(old_target, &node.key(), name);
            }
            if old.is_some() {
                self.touch(node);
            }
        }
        Ok(())
    }

    /// Marks a node for deletion at commit.
    ///
    /// Every property referencing the node is cleared and the node is
    /// removed from its parent's subnode list.
    ///
    /// # Errors
    ///
    /// Returns `NodeLocked` if the node or a referrer is held by another
    /// transactor.
    pub fn delete(&mut self, node: &NodeRef) -> CoreResult<()> {
        if !self.writable(node)? {
            node.invalidate();
            return Ok(());
        }
        let key = node.key();
        for (owner_key, property) in self.nmgr.backlinks().referrers(&key) {
            let Some(owner) = self.get(&owner_key)? else { continue };
            if owner.get(&property).as_ref().and_then(Value::as_node_key) == Some(&key) {
                self.unset(&owner, &property)?;
            }
        }
        if let Some(parent_key) = node.parent() {
            if let Some(parent) = self.get(&parent_key)? {
                if parent.contains(&key) {
                    self.writable(&parent)?;
                    parent.remove_subnode(&key);
                    parent.mark_modified();
                    self.touch(&parent);
                }
            }
        }
        node.set_state(NodeState::Deleted);
        self.touch(node);
        Ok(())
    }

    /// Attaches `child` under `parent`.
    ///
    /// For embedded parents the child key joins the parent's subnode list.
    /// For mapped subnode relations the child's constraint columns are set
    /// from the parent.
    ///
    /// # Errors
    ///
    /// Same as [`set`](Self::set).
    pub fn add_child(&mut self, parent: &NodeRef, child: &NodeRef) -> CoreResult<()> {
        self.writable(parent)?;
        self.writable(child)?;
        let nmgr = Arc::clone(&self.nmgr);
        let parent_mapping = nmgr.schema().mapping(&parent.prototype());
        let child_mapping = nmgr.schema().mapping(&child.prototype());

        child.set_parent(Some(parent.key()));
        child.mark_modified();
        if let Some(rel) = parent_mapping.subnode_relation() {
            for c in &rel.constraints {
                let Some(value) = c.home_value(&parent_mapping, parent) else { continue };
                let Some(target) = child_mapping.relation_for_column(&c.foreign) else { continue };
                let value = if target.kind == RelationKind::Reference {
                    Value::Node(Key::db(nmgr.other_mapping(&target).storage_name(), value))
                } else {
                    Value::String(value)
                };
                self.set(child, &target.prop_name, value)?;
            }
        }
        if parent.add_subnode(child.key()) {
            parent.mark_modified();
            self.touch(parent);
        }
        self.touch(child);
        Ok(())
    }
}

impl Drop for Transactor {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(e) = self.abort() {
                warn!(error = %e, "abort on drop failed");
            }
        }
    }
}

/// Kills a transactor from another thread.
#[derive(Clone)]
pub struct KillHandle {
    id: TransactorId,
    nmgr: Arc<NodeManager>,
    shared: Arc<Shared>,
    grace: Duration,
    force_wait: Duration,
}

impl std::fmt::Debug for KillHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KillHandle")
            .field("id", &self.id)
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl KillHandle {
    /// Returns the id of the transactor this handle controls.
    pub const fn id(&self) -> TransactorId {
        self.id
    }

    /// Kills the transactor.
    ///
    /// Sets the killed flag and waits for the transactor to go idle. If it
    /// does not within the grace period, every node it touched is evicted
    /// from here, the worker thread is unparked, and the handle waits once
    /// more. Returns true if the transactor ended up idle.
    pub fn kill(&self) -> bool {
        self.shared.killed.store(true, Ordering::SeqCst);
        if self.wait_idle(self.grace) {
            return true;
        }
        let name = self.shared.name.lock().clone();
        warn!(tx = %self.id, transaction = %name, "transactor did not stop, forcing");
        let touched = self.shared.touched.lock().clone();
        for node in &touched {
            self.nmgr.evict_node(node);
            node.clear_write_lock();
        }
        if let Some(thread) = self.shared.thread.lock().as_ref() {
            thread.unpark();
        }
        self.wait_idle(self.force_wait)
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.shared.active.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::Schema;
    use nodestore_storage::InMemoryStore;

    fn manager() -> Arc<NodeManager> {
        let config = Config::default()
            .kill_grace(Duration::from_millis(50))
            .kill_force_wait(Duration::from_millis(50));
        NodeManager::new(config, Arc::new(InMemoryStore::new()), Schema::new()).unwrap()
    }

    #[test]
    fn begin_commit_cycle() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        assert!(!tx.is_active());

        tx.begin("first").unwrap();
        assert!(tx.is_active());
        assert_eq!(tx.name(), "first");
        tx.commit().unwrap();
        assert!(!tx.is_active());
        assert_eq!(nmgr.stats().commits(), 1);
    }

    #[test]
    fn operations_need_an_open_transaction() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        assert!(matches!(tx.commit(), Err(CoreError::InvalidOperation { .. })));
        assert!(matches!(
            tx.get(&Key::embedded("0")),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn root_and_users_exist() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        tx.begin("roots").unwrap();
        let root = tx.root().unwrap().unwrap();
        assert_eq!(root.prototype(), "root");
        let users = tx.users().unwrap().unwrap();
        assert_eq!(users.prototype(), "__userroot__");
        tx.commit().unwrap();
    }

    #[test]
    fn created_node_is_readable_after_commit() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        tx.begin("create").unwrap();
        let node = tx.create("page", Some("home")).unwrap();
        assert_eq!(node.state(), NodeState::New);
        assert_eq!(node.lock_owner(), Some(tx.id()));
        tx.set(&node, "title", Value::from("Hello")).unwrap();
        tx.commit().unwrap();

        assert_eq!(node.state(), NodeState::Clean);
        assert_eq!(node.lock_owner(), None);

        let mut other = nmgr.transactor();
        other.begin("read").unwrap();
        let loaded = other.get(&node.key()).unwrap().unwrap();
        assert_eq!(loaded.get("title"), Some(Value::from("Hello")));
        other.commit().unwrap();
    }

    #[test]
    fn locked_node_rejects_second_writer() {
        let nmgr = manager();
        let mut setup = nmgr.transactor();
        setup.begin("setup").unwrap();
        let node = setup.create("page", None).unwrap();
        setup.commit().unwrap();

        let mut a = nmgr.transactor();
        let mut b = nmgr.transactor();
        a.begin("a").unwrap();
        b.begin("b").unwrap();
        let na = a.get(&node.key()).unwrap().unwrap();
        let nb = b.get(&node.key()).unwrap().unwrap();
        a.set(&na, "x", Value::from(1)).unwrap();
        let err = b.set(&nb, "x", Value::from(2)).unwrap_err();
        assert!(matches!(err, CoreError::NodeLocked { .. }));
        a.commit().unwrap();
        b.abort().unwrap();
    }

    #[test]
    fn abort_evicts_touched_nodes() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        tx.begin("setup").unwrap();
        let node = tx.create("page", None).unwrap();
        tx.commit().unwrap();

        tx.begin("change").unwrap();
        let cached = tx.get(&node.key()).unwrap().unwrap();
        tx.set(&cached, "title", Value::from("draft")).unwrap();
        tx.abort().unwrap();

        assert_eq!(cached.state(), NodeState::Invalid);
        assert!(!nmgr.cache().contains(&node.key()));
        assert_eq!(nmgr.stats().aborts(), 1);

        tx.begin("reload").unwrap();
        let fresh = tx.get(&node.key()).unwrap().unwrap();
        assert_eq!(fresh.get("title"), None);
        tx.commit().unwrap();
    }

    #[test]
    fn writes_to_invalid_node_fail() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        tx.begin("setup").unwrap();
        let node = tx.create("page", None).unwrap();
        tx.commit().unwrap();
        nmgr.evict_node(&node);

        tx.begin("write").unwrap();
        let err = tx.set(&node, "title", Value::from("x")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        tx.abort().unwrap();
    }

    #[test]
    fn delete_clears_references() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        tx.begin("setup").unwrap();
        let target = tx.create("page", None).unwrap();
        let owner = tx.create("page", None).unwrap();
        tx.set(&owner, "link", Value::from(target.key())).unwrap();
        tx.commit().unwrap();

        tx.begin("delete").unwrap();
        let target = tx.get(&target.key()).unwrap().unwrap();
        tx.delete(&target).unwrap();
        tx.commit().unwrap();

        tx.begin("check").unwrap();
        assert!(tx.get(&target.key()).unwrap().is_none());
        let owner = tx.get(&owner.key()).unwrap().unwrap();
        assert_eq!(owner.get("link"), None);
        tx.commit().unwrap();
    }

    #[test]
    fn embedded_children() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        tx.begin("tree").unwrap();
        let root = tx.root().unwrap().unwrap();
        let child = tx.create("page", Some("about")).unwrap();
        tx.add_child(&root, &child).unwrap();
        tx.commit().unwrap();

        tx.begin("read").unwrap();
        let root = tx.root().unwrap().unwrap();
        let found = tx.get_child(&root, "about").unwrap().unwrap();
        assert_eq!(found.key(), child.key());
        assert_eq!(found.parent(), Some(root.key()));
        assert_eq!(tx.count_children(&root).unwrap(), 1);
        assert!(tx.get_child(&root, "missing").unwrap().is_none());
        tx.commit().unwrap();
    }

    #[test]
    fn kill_idle_transactor() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        let handle = tx.kill_handle();
        assert!(handle.kill());
        assert!(tx.is_killed());
        assert!(matches!(tx.begin("late"), Err(CoreError::TransactionKilled { .. })));
    }

    #[test]
    fn killed_transaction_aborts_on_commit() {
        let nmgr = manager();
        let mut tx = nmgr.transactor();
        tx.begin("doomed").unwrap();
        let node = tx.create("page", None).unwrap();
        let handle = tx.kill_handle();

        let killer = std::thread::spawn(move || handle.kill());
        // the handle gives up after its waits; the worker then sees the flag
        let forced = killer.join().unwrap();
        assert!(!forced);
        assert_eq!(node.state(), NodeState::Invalid);

        let err = tx.commit().unwrap_err();
        assert!(matches!(err, CoreError::TransactionKilled { .. }));
        assert!(!tx.is_active());
    }

    #[test]
    fn dropping_active_transactor_aborts() {
        let nmgr = manager();
        let node = {
            let mut tx = nmgr.transactor();
            tx.begin("dropped").unwrap();
            tx.create("page", None).unwrap()
        };
        assert_eq!(node.state(), NodeState::Invalid);
        assert_eq!(nmgr.stats().aborts(), 1);
    }
}
