//! Concurrent load helpers.
//!
//! Runs many transactors against one manager to exercise cache sharing
//! and write-lock contention.

use nodestore_core::{CoreError, Key, NodeManager, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressResult {
    /// Transactions that committed.
    pub committed: usize,
    /// Transactions that lost a write lock and aborted.
    pub conflicts: usize,
    /// Transactions that failed for any other reason.
    pub failed: usize,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl StressResult {
    /// Total transactions attempted.
    pub const fn total(&self) -> usize {
        self.committed + self.conflicts + self.failed
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Worker threads.
    pub threads: usize,
    /// Transactions per thread.
    pub iterations: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            iterations: 50,
        }
    }
}

/// Has every worker read `key` in its own transactions.
///
/// Returns the number of reads that found the node.
pub fn concurrent_reads(nmgr: &Arc<NodeManager>, key: &Key, config: &StressConfig) -> usize {
    let found = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..config.threads)
        .map(|i| {
            let nmgr = Arc::clone(nmgr);
            let key = key.clone();
            let found = Arc::clone(&found);
            let iterations = config.iterations;
            thread::spawn(move || {
                let mut tx = nmgr.transactor();
                for n in 0..iterations {
                    tx.begin(&format!("reader-{i}-{n}")).expect("begin");
                    if tx.get(&key).expect("get").is_some() {
                        found.fetch_add(1, Ordering::Relaxed);
                    }
                    tx.commit().expect("commit");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("reader thread panicked");
    }
    found.load(Ordering::Relaxed)
}

/// Has every worker increment the integer property `counter` of `key`.
///
/// Lock conflicts abort the transaction and are counted, not retried.
pub fn concurrent_increments(nmgr: &Arc<NodeManager>, key: &Key, config: &StressConfig) -> StressResult {
    let committed = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|i| {
            let nmgr = Arc::clone(nmgr);
            let key = key.clone();
            let (committed, conflicts, failed) =
                (Arc::clone(&committed), Arc::clone(&conflicts), Arc::clone(&failed));
            let iterations = config.iterations;
            thread::spawn(move || {
                let mut tx = nmgr.transactor();
                for n in 0..iterations {
                    let outcome = (|| {
                        tx.begin(&format!("writer-{i}-{n}"))?;
                        let Some(node) = tx.get(&key)? else {
                            return Err(CoreError::invalid_operation("node vanished"));
                        };
                        let current = node.get("counter").and_then(|v| v.as_integer()).unwrap_or(0);
                        tx.set(&node, "counter", Value::Integer(current + 1))?;
                        tx.commit()
                    })();
                    match outcome {
                        Ok(()) => committed.fetch_add(1, Ordering::Relaxed),
                        Err(CoreError::NodeLocked { .. }) => {
                            let _ = tx.abort();
                            conflicts.fetch_add(1, Ordering::Relaxed)
                        }
                        Err(_) => {
                            let _ = tx.abort();
                            failed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer thread panicked");
    }

    StressResult {
        committed: committed.load(Ordering::Relaxed),
        conflicts: conflicts.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
        duration: start.elapsed(),
    }
}
