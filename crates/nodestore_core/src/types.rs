//! Core type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Milliseconds since the Unix epoch.
///
/// [`Timestamp::now`] is strictly increasing across the whole process, so
/// two events are never stamped with the same value. Watermark comparisons
/// (`created < last_data_change`) rely on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// The zero timestamp, used for "never".
    pub const ZERO: Self = Self(0);

    /// Returns a fresh timestamp, later than every previously issued one.
    #[must_use]
    pub fn now() -> Self {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        let mut prev = LAST_TIMESTAMP.load(Ordering::SeqCst);
        loop {
            let next = wall.max(prev + 1);
            match LAST_TIMESTAMP.compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Self(next),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Returns the raw millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Identifier of a transactor (one per worker thread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactorId(pub u64);

impl TransactorId {
    /// Creates a new transactor ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_strictly_increase() {
        let mut prev = Timestamp::now();
        for _ in 0..1000 {
            let next = Timestamp::now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn timestamps_increase_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..500).map(|_| Timestamp::now()).collect::<Vec<_>>()))
            .collect();
        let mut all: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }

    #[test]
    fn transactor_id_display() {
        assert_eq!(format!("{}", TransactorId::new(7)), "tx:7");
    }
}
