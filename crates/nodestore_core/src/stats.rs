//! NodeManager statistics.
//!
//! Counters are atomic and may be read while transactions are running.
//!
//! ```rust,ignore
//! let stats = nmgr.stats().snapshot();
//! println!("hits {} misses {}", stats.cache_hits, stats.cache_misses);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Activity counters for one [`NodeManager`](crate::NodeManager).
#[derive(Debug, Default)]
pub struct ManagerStats {
    // Fetch counters
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    store_reads: AtomicU64,
    sql_queries: AtomicU64,

    // Write counters
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,

    // Transaction counters
    commits: AtomicU64,
    aborts: AtomicU64,

    /// Replication batches applied from other instances.
    replicated: AtomicU64,
}

impl ManagerStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_read(&self) {
        self.store_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sql_query(&self) {
        self.sql_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replication(&self) {
        self.replicated.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of cache hits.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Returns the number of cache misses.
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Returns the number of backing store record reads.
    pub fn store_reads(&self) -> u64 {
        self.store_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of SQL queries issued.
    pub fn sql_queries(&self) -> u64 {
        self.sql_queries.load(Ordering::Relaxed)
    }

    /// Returns the number of inserted nodes.
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Returns the number of updated nodes.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Returns the number of deleted nodes.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns the number of committed transactions.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the number of aborted transactions.
    pub fn aborts(&self) -> u64 {
        self.aborts.load(Ordering::Relaxed)
    }

    /// Returns the number of replication batches applied.
    pub fn replicated(&self) -> u64 {
        self.replicated.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            store_reads: self.store_reads(),
            sql_queries: self.sql_queries(),
            inserts: self.inserts(),
            updates: self.updates(),
            deletes: self.deletes(),
            commits: self.commits(),
            aborts: self.aborts(),
            replicated: self.replicated(),
        }
    }
}

/// A point-in-time copy of [`ManagerStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Cache hits.
    pub cache_hits: u64,
    /// Cache misses.
    pub cache_misses: u64,
    /// Backing store record reads.
    pub store_reads: u64,
    /// SQL queries issued.
    pub sql_queries: u64,
    /// Inserted nodes.
    pub inserts: u64,
    /// Updated nodes.
    pub updates: u64,
    /// Deleted nodes.
    pub deletes: u64,
    /// Committed transactions.
    pub commits: u64,
    /// Aborted transactions.
    pub aborts: u64,
    /// Replication batches applied.
    pub replicated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = ManagerStats::new();
        stats.record_cache_hit();
        stats.record_cache_hit();
        stats.record_cache_miss();
        stats.record_commit();
        let snap = stats.snapshot();
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.commits, 1);
        assert_eq!(snap.aborts, 0);
    }
}
