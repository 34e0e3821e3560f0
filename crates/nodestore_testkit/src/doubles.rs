//! Instrumented stand-ins for stores and datasources.
//!
//! The doubles wrap a real implementation (or a script) and record what
//! the engine asked of it, so tests can assert on store reads and on the
//! exact statements issued.

use nodestore_core::sql::{Row, SqlResult};
use nodestore_core::{Connection, DataSource, SqlError, SqlValue};
use nodestore_storage::{BackingStore, StorageResult, StoreTxn};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A backing store that counts record reads.
pub struct CountingStore {
    inner: Arc<dyn BackingStore>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl CountingStore {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn BackingStore>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of `get_record` calls so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `save_record` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Resets both counters.
    pub fn reset(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }
}

impl BackingStore for CountingStore {
    fn begin(&self) -> StorageResult<StoreTxn> {
        self.inner.begin()
    }

    fn commit(&self, txn: StoreTxn) -> StorageResult<()> {
        self.inner.commit(txn)
    }

    fn abort(&self, txn: StoreTxn) -> StorageResult<()> {
        self.inner.abort(txn)
    }

    fn get_record(&self, txn: &StoreTxn, id: &str) -> StorageResult<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_record(txn, id)
    }

    fn save_record(&self, txn: &mut StoreTxn, id: &str, data: &[u8]) -> StorageResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.save_record(txn, id, data)
    }

    fn delete_record(&self, txn: &mut StoreTxn, id: &str) -> StorageResult<()> {
        self.inner.delete_record(txn, id)
    }

    fn get_id_generator(&self, txn: &StoreTxn) -> StorageResult<Option<u64>> {
        self.inner.get_id_generator(txn)
    }

    fn save_id_generator(&self, txn: &mut StoreTxn, value: u64) -> StorageResult<()> {
        self.inner.save_id_generator(txn, value)
    }

    fn record_ids(&self) -> StorageResult<Vec<String>> {
        self.inner.record_ids()
    }
}

/// A backing store that can hold a commit open until the test lets it go.
///
/// Once armed, the next commit that carries an id generator value blocks
/// inside `commit` until [`release`](Self::release) is called.
pub struct PausingStore {
    inner: Arc<dyn BackingStore>,
    gate: Mutex<Gate>,
    signal: Condvar,
}

#[derive(Default)]
struct Gate {
    armed: bool,
    paused: bool,
    released: bool,
}

impl PausingStore {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn BackingStore>) -> Self {
        Self {
            inner,
            gate: Mutex::new(Gate::default()),
            signal: Condvar::new(),
        }
    }

    /// Pauses the next commit that saves the id generator.
    pub fn arm(&self) {
        *self.gate.lock() = Gate {
            armed: true,
            ..Gate::default()
        };
    }

    /// Blocks until an armed commit has paused.
    pub fn wait_paused(&self) {
        let mut gate = self.gate.lock();
        while !gate.paused {
            self.signal.wait(&mut gate);
        }
    }

    /// Lets a paused commit finish.
    pub fn release(&self) {
        self.gate.lock().released = true;
        self.signal.notify_all();
    }
}

impl BackingStore for PausingStore {
    fn begin(&self) -> StorageResult<StoreTxn> {
        self.inner.begin()
    }

    fn commit(&self, txn: StoreTxn) -> StorageResult<()> {
        if txn.staged_id_generator().is_some() {
            let mut gate = self.gate.lock();
            if gate.armed {
                gate.armed = false;
                gate.paused = true;
                self.signal.notify_all();
                while !gate.released {
                    self.signal.wait(&mut gate);
                }
            }
        }
        self.inner.commit(txn)
    }

    fn abort(&self, txn: StoreTxn) -> StorageResult<()> {
        self.inner.abort(txn)
    }

    fn get_record(&self, txn: &StoreTxn, id: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get_record(txn, id)
    }

    fn save_record(&self, txn: &mut StoreTxn, id: &str, data: &[u8]) -> StorageResult<()> {
        self.inner.save_record(txn, id, data)
    }

    fn delete_record(&self, txn: &mut StoreTxn, id: &str) -> StorageResult<()> {
        self.inner.delete_record(txn, id)
    }

    fn get_id_generator(&self, txn: &StoreTxn) -> StorageResult<Option<u64>> {
        self.inner.get_id_generator(txn)
    }

    fn save_id_generator(&self, txn: &mut StoreTxn, value: u64) -> StorageResult<()> {
        self.inner.save_id_generator(txn, value)
    }

    fn record_ids(&self) -> StorageResult<Vec<String>> {
        self.inner.record_ids()
    }
}

/// A statement seen by a recording or scripted connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Bound parameters in order.
    pub params: Vec<SqlValue>,
}

impl RecordedStatement {
    /// Returns true if the SQL starts with `verb` (case-insensitive).
    pub fn is(&self, verb: &str) -> bool {
        self.sql
            .trim_start()
            .get(..verb.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(verb))
    }
}

type Log = Arc<Mutex<Vec<RecordedStatement>>>;

/// Wraps a datasource and records every statement its connections run.
pub struct RecordingDataSource {
    inner: Arc<dyn DataSource>,
    log: Log,
    connects: AtomicUsize,
}

impl RecordingDataSource {
    /// Wraps `inner`, keeping its name.
    pub fn new(inner: Arc<dyn DataSource>) -> Self {
        Self {
            inner,
            log: Arc::new(Mutex::new(Vec::new())),
            connects: AtomicUsize::new(0),
        }
    }

    /// Returns every statement recorded so far.
    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.log.lock().clone()
    }

    /// Returns recorded statements starting with `verb`.
    pub fn statements_of(&self, verb: &str) -> Vec<RecordedStatement> {
        self.log.lock().iter().filter(|s| s.is(verb)).cloned().collect()
    }

    /// Number of connections opened.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Clears the log.
    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl DataSource for RecordingDataSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn connect(&self) -> SqlResult<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingConnection {
            inner: self.inner.connect()?,
            log: Arc::clone(&self.log),
        }))
    }
}

struct RecordingConnection {
    inner: Box<dyn Connection>,
    log: Log,
}

impl RecordingConnection {
    fn record(&self, sql: &str, params: &[SqlValue]) {
        self.log.lock().push(RecordedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }
}

impl Connection for RecordingConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<usize> {
        self.record(sql, params);
        self.inner.execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue], max_rows: usize) -> SqlResult<Vec<Row>> {
        self.record(sql, params);
        self.inner.query(sql, params, max_rows)
    }

    fn max_text_len(&self) -> usize {
        self.inner.max_text_len()
    }

    fn next_sequence_value(&mut self, sequence: &str) -> SqlResult<i64> {
        self.inner.next_sequence_value(sequence)
    }

    fn close(&mut self) -> SqlResult<()> {
        self.inner.close()
    }
}

#[derive(Default)]
struct Script {
    responses: Vec<(String, Vec<Row>)>,
    failures: Vec<String>,
    log: Vec<RecordedStatement>,
}

impl Script {
    fn check(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<()> {
        self.log.push(RecordedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if self.failures.iter().any(|f| sql.contains(f.as_str())) {
            return Err(SqlError::statement(sql, "scripted failure"));
        }
        Ok(())
    }
}

/// A datasource that answers queries from a script.
///
/// Queries are matched by substring against registered responses; the
/// first match wins and unmatched queries return no rows. Statements
/// containing a registered failure pattern fail.
#[derive(Clone)]
pub struct ScriptedDataSource {
    name: String,
    script: Arc<Mutex<Script>>,
}

impl ScriptedDataSource {
    /// Creates an empty script named `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Answers queries containing `pattern` with `rows`.
    #[must_use]
    pub fn respond(self, pattern: &str, rows: Vec<Row>) -> Self {
        self.script.lock().responses.push((pattern.to_string(), rows));
        self
    }

    /// Fails statements containing `pattern`.
    #[must_use]
    pub fn fail_on(self, pattern: &str) -> Self {
        self.script.lock().failures.push(pattern.to_string());
        self
    }

    /// Returns every statement seen so far.
    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.script.lock().log.clone()
    }

    /// Returns recorded statements starting with `verb`.
    pub fn statements_of(&self, verb: &str) -> Vec<RecordedStatement> {
        self.script.lock().log.iter().filter(|s| s.is(verb)).cloned().collect()
    }
}

impl DataSource for ScriptedDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> SqlResult<Box<dyn Connection>> {
        Ok(Box::new(ScriptedConnection {
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedConnection {
    script: Arc<Mutex<Script>>,
}

impl Connection for ScriptedConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> SqlResult<usize> {
        self.script.lock().check(sql, params)?;
        Ok(1)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue], max_rows: usize) -> SqlResult<Vec<Row>> {
        let mut script = self.script.lock();
        script.check(sql, params)?;
        let mut rows = script
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        if max_rows > 0 {
            rows.truncate(max_rows);
        }
        Ok(rows)
    }
}
