//! Back-link index: which nodes reference a given node.

use crate::key::Key;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Side table mapping a referenced key to the `(owner, property)` pairs
/// that point at it.
#[derive(Debug, Default)]
pub struct BackLinks {
    links: Mutex<HashMap<Key, HashSet<(Key, String)>>>,
}

impl BackLinks {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `owner.property` references `target`.
    pub fn register(&self, target: &Key, owner: &Key, property: &str) {
        self.links
            .lock()
            .entry(target.clone())
            .or_default()
            .insert((owner.clone(), property.to_lowercase()));
    }

    /// Removes the `owner.property -> target` link.
    pub fn unregister(&self, target: &Key, owner: &Key, property: &str) {
        let mut links = self.links.lock();
        if let Some(set) = links.get_mut(target) {
            set.remove(&(owner.clone(), property.to_lowercase()));
            if set.is_empty() {
                links.remove(target);
            }
        }
    }

    /// Returns every `(owner, property)` referencing `target`.
    #[must_use]
    pub fn referrers(&self, target: &Key) -> Vec<(Key, String)> {
        let links = self.links.lock();
        let mut out: Vec<_> = links
            .get(target)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Drops and returns all links to `target`.
    pub fn remove_target(&self, target: &Key) -> Vec<(Key, String)> {
        let mut out: Vec<_> = self
            .links
            .lock()
            .remove(target)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Drops every link owned by `owner`.
    pub fn forget_owner(&self, owner: &Key) {
        let mut links = self.links.lock();
        links.retain(|_, set| {
            set.retain(|(o, _)| o != owner);
            !set.is_empty()
        });
    }

    /// Returns the number of referenced targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    /// Returns true if no links are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister() {
        let links = BackLinks::new();
        let target = Key::embedded("5");
        let owner = Key::embedded("6");
        links.register(&target, &owner, "Author");
        assert_eq!(links.referrers(&target), vec![(owner.clone(), "author".to_string())]);

        links.unregister(&target, &owner, "AUTHOR");
        assert!(links.referrers(&target).is_empty());
        assert!(links.is_empty());
    }

    #[test]
    fn forget_owner_clears_all_targets() {
        let links = BackLinks::new();
        let owner = Key::embedded("1");
        links.register(&Key::embedded("2"), &owner, "a");
        links.register(&Key::embedded("3"), &owner, "b");
        links.register(&Key::embedded("3"), &Key::embedded("4"), "c");
        links.forget_owner(&owner);
        assert_eq!(links.len(), 1);
        assert_eq!(links.remove_target(&Key::embedded("3")).len(), 1);
    }
}
