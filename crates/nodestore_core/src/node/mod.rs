//! Nodes: the cached, persistent objects of the graph.
//!
//! A [`Node`] is shared as [`NodeRef`] between the cache, transactors and
//! application code. Its lifecycle state is atomic so eviction can flip it
//! to [`NodeState::Invalid`] in place while other holders keep the
//! instance; everything else sits behind one `RwLock`.

mod links;
mod property;

pub use links::BackLinks;
pub use property::{Property, Value};

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::record::{NodeRecord, PropertyRecord};
use crate::types::{Timestamp, TransactorId};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

static TRANSIENT_IDS: AtomicU64 = AtomicU64::new(0);

/// Shared handle to a node.
pub type NodeRef = Arc<Node>;

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeState {
    /// Not yet persisted; lives only in application memory.
    Transient = 0,
    /// Persisted in the current transaction, not yet inserted.
    New = 1,
    /// In sync with storage.
    Clean = 2,
    /// Changed since it was loaded.
    Modified = 3,
    /// Deletion requested.
    Deleted = 4,
    /// Evicted or stale; must be refetched.
    Invalid = 5,
}

impl NodeState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Transient,
            1 => Self::New,
            2 => Self::Clean,
            3 => Self::Modified,
            4 => Self::Deleted,
            _ => Self::Invalid,
        }
    }
}

#[derive(Debug)]
struct NodeData {
    id: String,
    name: String,
    prototype: String,
    storage: Option<String>,
    /// Set for virtual and group nodes, which are addressed by a synthetic key.
    key_override: Option<Key>,
    props: BTreeMap<String, Property>,
    parent: Option<Key>,
    subnodes: Vec<Key>,
    last_subnode_fetch: Timestamp,
}

/// A node of the object graph.
#[derive(Debug)]
pub struct Node {
    state: AtomicU8,
    null_sentinel: bool,
    is_virtual: bool,
    created: AtomicI64,
    last_modified: AtomicI64,
    data: RwLock<NodeData>,
    lock_owner: Mutex<Option<TransactorId>>,
}

impl Node {
    fn build(state: NodeState, data: NodeData, created: Timestamp, last_modified: Timestamp) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
            null_sentinel: false,
            is_virtual: false,
            created: AtomicI64::new(created.0),
            last_modified: AtomicI64::new(last_modified.0),
            data: RwLock::new(data),
            lock_owner: Mutex::new(None),
        }
    }

    fn data(id: String, name: String, prototype: String, storage: Option<String>) -> NodeData {
        NodeData {
            id,
            name,
            prototype,
            storage,
            key_override: None,
            props: BTreeMap::new(),
            parent: None,
            subnodes: Vec::new(),
            last_subnode_fetch: Timestamp::ZERO,
        }
    }

    /// Creates a transient node with a temporary id.
    pub fn transient(prototype: &str, name: Option<&str>) -> NodeRef {
        let n = TRANSIENT_IDS.fetch_add(1, Ordering::Relaxed);
        let id = format!("t{n}");
        let name = name.map_or_else(|| id.clone(), str::to_string);
        let now = Timestamp::now();
        Arc::new(Self::build(
            NodeState::Transient,
            Self::data(id, name, prototype.to_string(), None),
            now,
            now,
        ))
    }

    /// Creates a clean node as read from storage.
    pub(crate) fn loaded(
        id: String,
        name: Option<String>,
        prototype: String,
        storage: Option<String>,
        created: Timestamp,
        last_modified: Timestamp,
    ) -> Self {
        let name = name.unwrap_or_else(|| id.clone());
        Self::build(
            NodeState::Clean,
            Self::data(id, name, prototype, storage),
            created,
            last_modified,
        )
    }

    /// Rebuilds a clean node from a decoded record.
    pub(crate) fn from_record(record: NodeRecord, storage: Option<String>) -> NodeRef {
        let node = Self::loaded(
            record.id,
            Some(record.name),
            record.prototype,
            storage,
            Timestamp(record.created),
            Timestamp(record.last_modified),
        );
        {
            let mut data = node.data.write();
            data.parent = record.parent;
            data.subnodes = record.subnodes;
            for prop in record.properties {
                data.props
                    .insert(prop.name.to_lowercase(), Property::loaded(prop.name, prop.value));
            }
        }
        Arc::new(node)
    }

    /// Creates the marker cached for keys known not to exist.
    pub(crate) fn null_sentinel() -> NodeRef {
        let now = Timestamp::now();
        let mut node = Self::build(
            NodeState::Clean,
            Self::data(String::new(), String::new(), String::new(), None),
            now,
            now,
        );
        node.null_sentinel = true;
        Arc::new(node)
    }

    /// Creates a virtual node addressed by `key`. Virtual nodes are never
    /// persisted.
    pub(crate) fn virtual_node(key: Key, name: &str, prototype: &str, parent: Option<Key>) -> NodeRef {
        let now = Timestamp::now();
        let mut data = Self::data(name.to_string(), name.to_string(), prototype.to_string(), None);
        data.key_override = Some(key);
        data.parent = parent;
        let mut node = Self::build(NodeState::Clean, data, now, now);
        node.is_virtual = true;
        Arc::new(node)
    }

    /// Returns the node's id.
    pub fn id(&self) -> String {
        self.data.read().id.clone()
    }

    /// Returns the node's name.
    pub fn name(&self) -> String {
        self.data.read().name.clone()
    }

    /// Returns the prototype (type) name.
    pub fn prototype(&self) -> String {
        self.data.read().prototype.clone()
    }

    /// Returns the storage name, `None` for embedded nodes.
    pub fn storage(&self) -> Option<String> {
        self.data.read().storage.clone()
    }

    /// Returns the node's primary key, or its synthetic key for virtual nodes.
    pub fn key(&self) -> Key {
        let data = self.data.read();
        match &data.key_override {
            Some(key) => key.clone(),
            None => Key::db(data.storage.as_deref(), data.id.clone()),
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: NodeState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Flips the node to `Invalid`.
    pub(crate) fn invalidate(&self) {
        self.set_state(NodeState::Invalid);
    }

    /// Returns false once the node has been invalidated.
    pub fn is_valid(&self) -> bool {
        self.state() != NodeState::Invalid
    }

    /// Returns true for the "does not exist" marker.
    pub const fn is_null_sentinel(&self) -> bool {
        self.null_sentinel
    }

    /// Returns true for virtual (never persisted) nodes.
    pub const fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    /// Returns the creation (or last load) timestamp.
    pub fn created(&self) -> Timestamp {
        Timestamp(self.created.load(Ordering::SeqCst))
    }

    pub(crate) fn set_created(&self, ts: Timestamp) {
        self.created.store(ts.0, Ordering::SeqCst);
    }

    /// Returns the last modification timestamp.
    pub fn last_modified(&self) -> Timestamp {
        Timestamp(self.last_modified.load(Ordering::SeqCst))
    }

    fn touch(&self) {
        self.last_modified.store(Timestamp::now().0, Ordering::SeqCst);
    }

    /// Returns a property value (case-insensitive lookup). Unset
    /// properties read as `None`.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.data
            .read()
            .props
            .get(&name.to_lowercase())
            .filter(|p| !p.value.is_null())
            .map(|p| p.value.clone())
    }

    /// Returns a property with its dirty flag.
    pub fn property(&self, name: &str) -> Option<Property> {
        self.data.read().props.get(&name.to_lowercase()).cloned()
    }

    /// Returns a snapshot of all properties.
    pub fn properties(&self) -> Vec<Property> {
        self.data.read().props.values().cloned().collect()
    }

    /// Returns the names of all properties.
    pub fn property_names(&self) -> Vec<String> {
        self.data.read().props.values().map(|p| p.name.clone()).collect()
    }

    /// Returns the dirty properties.
    pub fn dirty_properties(&self) -> Vec<Property> {
        self.data
            .read()
            .props
            .values()
            .filter(|p| p.dirty)
            .cloned()
            .collect()
    }

    /// Sets a property, marking it dirty and a clean node modified.
    ///
    /// Returns the previous value.
    pub(crate) fn set_value(&self, name: &str, value: Value) -> Option<Value> {
        let old = {
            let mut data = self.data.write();
            let lower = name.to_lowercase();
            match data.props.get_mut(&lower) {
                Some(prop) => {
                    prop.dirty = true;
                    Some(std::mem::replace(&mut prop.value, value))
                }
                None => {
                    data.props.insert(lower, Property::new(name, value));
                    None
                }
            }
        };
        self.mark_modified();
        old
    }

    /// Removes a property, returning its last value.
    pub(crate) fn unset(&self, name: &str) -> Option<Value> {
        let old = {
            let mut data = self.data.write();
            let lower = name.to_lowercase();
            match data.props.get_mut(&lower) {
                Some(prop) if !prop.value.is_null() => {
                    prop.dirty = true;
                    Some(std::mem::replace(&mut prop.value, Value::Null))
                }
                _ => None,
            }
        };
        if old.is_some() {
            self.mark_modified();
        }
        old
    }

    /// Stores a property as read from storage (not dirty).
    pub(crate) fn load_property(&self, name: &str, value: Value) {
        self.data
            .write()
            .props
            .insert(name.to_lowercase(), Property::loaded(name, value));
    }

    /// Moves a clean node to modified and touches its timestamp.
    pub(crate) fn mark_modified(&self) {
        let _ = self.state.compare_exchange(
            NodeState::Clean as u8,
            NodeState::Modified as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.touch();
    }

    /// Clears the dirty flag on the named properties.
    pub(crate) fn clear_dirty(&self, names: &[String]) {
        let mut data = self.data.write();
        for name in names {
            if let Some(prop) = data.props.get_mut(&name.to_lowercase()) {
                prop.dirty = false;
            }
        }
    }

    /// Clears every dirty flag.
    pub(crate) fn mark_all_clean(&self) {
        for prop in self.data.write().props.values_mut() {
            prop.dirty = false;
        }
    }

    /// Replaces a transient id with its persistent one.
    pub(crate) fn assign_id(&self, id: String, storage: Option<String>) {
        let mut data = self.data.write();
        if data.name == data.id {
            data.name.clone_from(&id);
        }
        data.id = id;
        data.storage = storage;
    }

    /// Returns the parent key.
    pub fn parent(&self) -> Option<Key> {
        self.data.read().parent.clone()
    }

    pub(crate) fn set_parent(&self, parent: Option<Key>) {
        self.data.write().parent = parent;
    }

    /// Returns the ordered subnode keys.
    pub fn subnodes(&self) -> Vec<Key> {
        self.data.read().subnodes.clone()
    }

    /// Returns true if `key` is one of this node's subnodes.
    pub fn contains(&self, key: &Key) -> bool {
        self.data.read().subnodes.contains(key)
    }

    /// Replaces the subnode list and stamps the fetch time.
    pub(crate) fn set_subnodes(&self, keys: Vec<Key>) {
        let mut data = self.data.write();
        data.subnodes = keys;
        data.last_subnode_fetch = Timestamp::now();
    }

    /// Appends a subnode key unless already present.
    pub(crate) fn add_subnode(&self, key: Key) -> bool {
        let mut data = self.data.write();
        if data.subnodes.contains(&key) {
            return false;
        }
        data.subnodes.push(key);
        true
    }

    /// Removes a subnode key.
    pub(crate) fn remove_subnode(&self, key: &Key) -> bool {
        let mut data = self.data.write();
        let before = data.subnodes.len();
        data.subnodes.retain(|k| k != key);
        data.subnodes.len() != before
    }

    /// Returns when the subnode list was last loaded.
    pub fn last_subnode_fetch(&self) -> Timestamp {
        self.data.read().last_subnode_fetch
    }

    /// Returns the serializable form of this node.
    pub fn to_record(&self) -> NodeRecord {
        let data = self.data.read();
        NodeRecord {
            id: data.id.clone(),
            name: data.name.clone(),
            prototype: data.prototype.clone(),
            created: self.created().0,
            last_modified: self.last_modified().0,
            parent: data.parent.clone(),
            subnodes: data.subnodes.clone(),
            properties: data
                .props
                .values()
                .map(|p| PropertyRecord {
                    name: p.name.clone(),
                    value: p.value.clone(),
                })
                .collect(),
        }
    }

    /// Takes the write lock for `owner`.
    ///
    /// # Errors
    ///
    /// Returns `NodeLocked` if another transactor holds the lock.
    pub(crate) fn lock_for(&self, owner: TransactorId) -> CoreResult<()> {
        let mut lock = self.lock_owner.lock();
        match *lock {
            Some(current) if current != owner => Err(CoreError::NodeLocked {
                key: self.key(),
                owner: current,
            }),
            _ => {
                *lock = Some(owner);
                Ok(())
            }
        }
    }

    /// Releases the write lock.
    pub(crate) fn clear_write_lock(&self) {
        *self.lock_owner.lock() = None;
    }

    /// Returns the transactor holding the write lock.
    pub fn lock_owner(&self) -> Option<TransactorId> {
        *self.lock_owner.lock()
    }
}
