//! Store-wide id counter for the embedded id strategy.

/// The counter handed out by [`NodeManager`](crate::NodeManager) for
/// embedded ids. Guarded by the manager's mutex; saved at commit when dirty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdGenerator {
    value: u64,
    dirty: bool,
}

impl IdGenerator {
    /// Creates a counter whose last issued id is `value`.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            dirty: false,
        }
    }

    /// Advances the counter and returns the new id.
    pub fn next_id(&mut self) -> u64 {
        self.value += 1;
        self.dirty = true;
        self.value
    }

    /// Returns the last issued id.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Returns true if ids were issued since the last save.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the counter as saved if it still holds `saved`.
    pub fn mark_saved(&mut self, saved: u64) {
        if self.value == saved {
            self.dirty = false;
        }
    }

    /// Moves the counter forward to at least `value`.
    pub fn advance_to(&mut self, value: u64) {
        if value > self.value {
            self.value = value;
            self.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_sequential_ids() {
        let mut idgen = IdGenerator::new(1);
        assert!(!idgen.is_dirty());
        assert_eq!(idgen.next_id(), 2);
        assert_eq!(idgen.next_id(), 3);
        assert!(idgen.is_dirty());
        assert_eq!(idgen.value(), 3);
        idgen.mark_saved(3);
        assert!(!idgen.is_dirty());
    }

    #[test]
    fn stale_save_keeps_dirty() {
        let mut idgen = IdGenerator::new(1);
        idgen.next_id();
        let saved = idgen.value();
        idgen.next_id();
        idgen.mark_saved(saved);
        assert!(idgen.is_dirty());
    }

    #[test]
    fn advance_never_moves_back() {
        let mut idgen = IdGenerator::new(10);
        idgen.advance_to(5);
        assert_eq!(idgen.value(), 10);
        assert!(!idgen.is_dirty());
        idgen.advance_to(20);
        assert_eq!(idgen.value(), 20);
    }
}
