//! Shared node cache.
//!
//! A bounded LRU map from [`Key`] to [`NodeRef`] behind one mutex. Every
//! operation, including the multi-slot helpers, completes under a single
//! acquisition. Lock order is cache mutex before a node's data lock; node
//! methods never call back into the cache.

use crate::key::Key;
use crate::node::NodeRef;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n.max(1)).unwrap_or(NonZeroUsize::MIN)
}

/// Bounded, thread-safe key to node map.
pub struct NodeCache {
    inner: Mutex<LruCache<Key, NodeRef>>,
}

impl std::fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("NodeCache")
            .field("len", &inner.len())
            .field("capacity", &inner.cap())
            .finish()
    }
}

impl NodeCache {
    /// Creates a cache holding at most `size` entries.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity(size))),
        }
    }

    /// Looks up a node. Invalid occupants are dropped and reported absent.
    pub fn get(&self, key: &Key) -> Option<NodeRef> {
        let mut inner = self.inner.lock();
        match inner.get(key) {
            Some(node) if node.is_valid() => Some(Arc::clone(node)),
            Some(_) => {
                inner.pop(key);
                None
            }
            None => None,
        }
    }

    /// Inserts a node, returning the previous occupant.
    pub fn put(&self, key: Key, node: NodeRef) -> Option<NodeRef> {
        self.inner.lock().put(key, node)
    }

    /// Removes a slot, returning its occupant.
    pub fn remove(&self, key: &Key) -> Option<NodeRef> {
        self.inner.lock().pop(key)
    }

    /// Returns true if a valid node occupies `key`.
    pub fn contains(&self, key: &Key) -> bool {
        self.inner.lock().peek(key).is_some_and(|n| n.is_valid())
    }

    /// Changes the capacity, evicting least recently used entries.
    pub fn resize(&self, size: usize) {
        self.inner.lock().resize(capacity(size));
    }

    /// Returns the capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Returns the number of slots in use.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Counts keys without a valid occupant.
    pub fn count_missing(&self, keys: &[Key]) -> usize {
        let inner = self.inner.lock();
        keys.iter()
            .filter(|k| !inner.peek(*k).is_some_and(|n| n.is_valid()))
            .count()
    }

    /// Returns a snapshot of all keys, most recently used first.
    pub fn keys(&self) -> Vec<Key> {
        self.inner.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Installs a freshly loaded node under its primary key and, if given,
    /// a secondary key.
    ///
    /// If the primary slot already holds a valid node that is not a null
    /// sentinel, that incumbent wins and the loaded node is discarded. The
    /// secondary slot always receives the winner, which is returned.
    pub fn register_loaded(&self, primary: &Key, secondary: Option<&Key>, node: NodeRef) -> NodeRef {
        let mut inner = self.inner.lock();
        let incumbent = inner
            .get(primary)
            .filter(|old| old.is_valid() && !old.is_null_sentinel())
            .cloned();
        let winner = match incumbent {
            Some(old) => {
                if !Arc::ptr_eq(&old, &node) {
                    debug!(key = %primary, "cache incumbent kept over loaded node");
                }
                old
            }
            None => {
                inner.put(primary.clone(), Arc::clone(&node));
                node
            }
        };
        if let Some(secondary) = secondary.filter(|s| *s != primary) {
            inner.put(secondary.clone(), Arc::clone(&winner));
        }
        winner
    }

    /// Invalidates `node` and removes its primary slot.
    pub fn evict_node(&self, node: &NodeRef) {
        node.invalidate();
        let key = node.key();
        self.inner.lock().pop(&key);
    }

    /// Removes a slot and invalidates its occupant. For secondary keys the
    /// occupant's primary slot is removed as well.
    pub fn evict_by_key(&self, key: &Key) -> Option<NodeRef> {
        let mut inner = self.inner.lock();
        let node = inner.pop(key)?;
        node.invalidate();
        if !key.is_primary() && !node.is_null_sentinel() {
            let primary = node.key();
            inner.pop(&primary);
        }
        Some(node)
    }

    /// Drops a slot without touching its occupant.
    pub fn evict_key(&self, key: &Key) -> Option<NodeRef> {
        self.inner.lock().pop(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeState};
    use crate::types::Timestamp;
    use proptest::prelude::*;

    fn node(id: &str) -> NodeRef {
        Arc::new(Node::loaded(
            id.to_string(),
            None,
            "page".into(),
            None,
            Timestamp::now(),
            Timestamp::now(),
        ))
    }

    #[test]
    fn invalid_occupant_reads_as_absent() {
        let cache = NodeCache::new(10);
        let n = node("1");
        cache.put(n.key(), Arc::clone(&n));
        assert!(cache.get(&n.key()).is_some());
        n.invalidate();
        assert!(cache.get(&n.key()).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn put_returns_previous() {
        let cache = NodeCache::new(10);
        let a = node("1");
        let b = node("1");
        assert!(cache.put(a.key(), Arc::clone(&a)).is_none());
        let old = cache.put(b.key(), Arc::clone(&b)).unwrap();
        assert!(Arc::ptr_eq(&old, &a));
    }

    #[test]
    fn lru_eviction_and_resize() {
        let cache = NodeCache::new(2);
        for id in ["1", "2", "3"] {
            let n = node(id);
            cache.put(n.key(), n);
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&Key::embedded("1")));
        cache.resize(1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn register_loaded_prefers_valid_incumbent() {
        let cache = NodeCache::new(10);
        let incumbent = node("5");
        let primary = incumbent.key();
        cache.put(primary.clone(), Arc::clone(&incumbent));

        let secondary = Key::synthetic(Key::embedded("0"), "five");
        let loaded = node("5");
        let winner = cache.register_loaded(&primary, Some(&secondary), loaded);
        assert!(Arc::ptr_eq(&winner, &incumbent));
        assert!(Arc::ptr_eq(&cache.get(&secondary).unwrap(), &incumbent));
    }

    #[test]
    fn register_loaded_replaces_sentinel_and_invalid() {
        let cache = NodeCache::new(10);
        let primary = Key::embedded("5");
        cache.put(primary.clone(), Node::null_sentinel());
        let loaded = node("5");
        let winner = cache.register_loaded(&primary, None, Arc::clone(&loaded));
        assert!(Arc::ptr_eq(&winner, &loaded));

        loaded.invalidate();
        let fresh = node("5");
        let winner = cache.register_loaded(&primary, None, Arc::clone(&fresh));
        assert!(Arc::ptr_eq(&winner, &fresh));
    }

    #[test]
    fn evict_by_secondary_key_drops_primary() {
        let cache = NodeCache::new(10);
        let n = node("9");
        let secondary = Key::synthetic(Key::embedded("0"), "nine");
        cache.register_loaded(&n.key(), Some(&secondary), Arc::clone(&n));
        assert_eq!(cache.len(), 2);

        cache.evict_by_key(&secondary);
        assert_eq!(n.state(), NodeState::Invalid);
        assert!(cache.is_empty());
    }

    #[test]
    fn evict_key_leaves_node_valid() {
        let cache = NodeCache::new(10);
        let n = node("9");
        cache.put(n.key(), Arc::clone(&n));
        cache.evict_key(&n.key());
        assert!(n.is_valid());
        assert!(cache.is_empty());
    }

    #[test]
    fn evict_node_invalidates() {
        let cache = NodeCache::new(10);
        let n = node("9");
        cache.put(n.key(), Arc::clone(&n));
        cache.evict_node(&n);
        assert!(!n.is_valid());
        assert!(cache.get(&n.key()).is_none());
    }

    #[test]
    fn count_missing_ignores_invalid() {
        let cache = NodeCache::new(10);
        let a = node("1");
        let b = node("2");
        cache.put(a.key(), Arc::clone(&a));
        cache.put(b.key(), Arc::clone(&b));
        b.invalidate();
        let keys = [a.key(), b.key(), Key::embedded("3")];
        assert_eq!(cache.count_missing(&keys), 2);
    }

    #[test]
    fn concurrent_registration_converges_on_one_node() {
        let cache = Arc::new(NodeCache::new(100));
        let key = Key::embedded("42");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                std::thread::spawn(move || cache.register_loaded(&key, None, node("42")))
            })
            .collect();
        let winners: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for w in &winners {
            assert!(Arc::ptr_eq(w, &winners[0]));
        }
        assert!(Arc::ptr_eq(&cache.get(&key).unwrap(), &winners[0]));
    }

    proptest! {
        #[test]
        fn never_exceeds_capacity(cap in 1usize..16, ids in proptest::collection::vec(0u32..64, 0..200)) {
            let cache = NodeCache::new(cap);
            for id in ids {
                let n = node(&id.to_string());
                cache.put(n.key(), n);
                prop_assert!(cache.len() <= cap);
            }
        }
    }
}
