//! File-based backing store: one file per record.
//!
//! Directory layout:
//!
//! ```text
//! <store_dir>/
//! ├─ LOCK          # Advisory lock held while the store is open
//! ├─ idgen         # Next-id counter (decimal text)
//! └─ <id>.node     # One serialized record per node id
//! ```

use crate::backend::{validate_record_id, BackingStore};
use crate::error::{StorageError, StorageResult};
use crate::txn::{StagedWrite, StoreTxn};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// File extension of record files.
pub const RECORD_EXTENSION: &str = "node";
const LOCK_FILE: &str = "LOCK";
const IDGEN_FILE: &str = "idgen";

/// A file-based backing store.
///
/// Each record lives in its own `<id>.node` file. Committed writes go to a
/// temporary file first and are renamed into place, so a reader never sees a
/// half-written record.
///
/// # Thread Safety
///
/// Commits are serialized by an internal lock; reads take no lock.
/// The directory itself is locked with an exclusive advisory lock so only
/// one process can open it.
///
/// # Example
///
/// ```no_run
/// use nodestore_storage::{BackingStore, FileStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("db")).unwrap();
/// let mut txn = store.begin().unwrap();
/// store.save_record(&mut txn, "2", b"record").unwrap();
/// store.commit(txn).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    _lock_file: File,
    commit_lock: Mutex<()>,
    next_txid: AtomicU64,
    active: RwLock<HashSet<u64>>,
}

impl FileStore {
    /// Opens or creates a store in the given directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the
    /// directory, or an I/O error if it cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        if !dir.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a directory: {}", dir.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(dir.to_path_buf()));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock_file: lock_file,
            commit_lock: Mutex::new(()),
            next_txid: AtomicU64::new(0),
            active: RwLock::new(HashSet::new()),
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the file holding a record.
    #[must_use]
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    /// Returns the total size in bytes of all record files.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn total_size(&self) -> StorageResult<u64> {
        let mut total = 0;
        for id in self.record_ids()? {
            total += fs::metadata(self.record_path(&id))?.len();
        }
        Ok(total)
    }

    fn finish(&self, txn: &StoreTxn) -> StorageResult<()> {
        if self.active.write().remove(&txn.id()) {
            Ok(())
        } else {
            Err(StorageError::UnknownTransaction(txn.id()))
        }
    }

    fn write_atomically(&self, target: &Path, data: &[u8]) -> StorageResult<()> {
        let tmp = self.dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let result = (|| {
            let mut file = File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp, target)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.map_err(StorageError::from)
    }

    fn read_committed_idgen(&self) -> StorageResult<Option<u64>> {
        match fs::read_to_string(self.dir.join(IDGEN_FILE)) {
            Ok(text) => text
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|e| StorageError::Corrupted(format!("id generator file: {e}"))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl BackingStore for FileStore {
    fn begin(&self) -> StorageResult<StoreTxn> {
        let id = self.next_txid.fetch_add(1, Ordering::SeqCst) + 1;
        self.active.write().insert(id);
        Ok(StoreTxn::new(id))
    }

    fn commit(&self, txn: StoreTxn) -> StorageResult<()> {
        self.finish(&txn)?;
        let txid = txn.id();
        let (writes, idgen) = txn.into_writes();

        let _guard = self.commit_lock.lock();
        for (id, write) in &writes {
            let path = self.record_path(id);
            match write {
                StagedWrite::Save(data) => self.write_atomically(&path, data)?,
                StagedWrite::Delete => match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
        if let Some(value) = idgen {
            self.write_atomically(&self.dir.join(IDGEN_FILE), value.to_string().as_bytes())?;
        }

        debug!(txid, writes = writes.len(), "file store commit");
        Ok(())
    }

    fn abort(&self, txn: StoreTxn) -> StorageResult<()> {
        self.finish(&txn)
    }

    fn get_record(&self, txn: &StoreTxn, id: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_record_id(id)?;
        match txn.staged(id) {
            Some(StagedWrite::Save(data)) => return Ok(Some(data.clone())),
            Some(StagedWrite::Delete) => return Ok(None),
            None => {}
        }
        match fs::read(self.record_path(id)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_record(&self, txn: &mut StoreTxn, id: &str, data: &[u8]) -> StorageResult<()> {
        validate_record_id(id)?;
        txn.stage_save(id, data);
        Ok(())
    }

    fn delete_record(&self, txn: &mut StoreTxn, id: &str) -> StorageResult<()> {
        validate_record_id(id)?;
        txn.stage_delete(id);
        Ok(())
    }

    fn get_id_generator(&self, txn: &StoreTxn) -> StorageResult<Option<u64>> {
        match txn.staged_id_generator() {
            Some(value) => Ok(Some(value)),
            None => self.read_committed_idgen(),
        }
    }

    fn save_id_generator(&self, txn: &mut StoreTxn, value: u64) -> StorageResult<()> {
        txn.stage_id_generator(value);
        Ok(())
    }

    fn record_ids(&self) -> StorageResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");

        let store = FileStore::open(&path).unwrap();
        assert!(path.join(LOCK_FILE).exists());
        assert!(store.record_ids().unwrap().is_empty());
    }

    #[test]
    fn file_commit_writes_one_file_per_record() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut txn = store.begin().unwrap();
        store.save_record(&mut txn, "0", b"root").unwrap();
        store.save_record(&mut txn, "17", b"child").unwrap();
        assert!(!store.record_path("0").exists());
        store.commit(txn).unwrap();

        assert!(store.record_path("0").exists());
        assert!(store.record_path("17").exists());
        assert_eq!(store.record_ids().unwrap(), vec!["0", "17"]);
        assert_eq!(store.total_size().unwrap(), 9);
    }

    #[test]
    fn file_abort_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut txn = store.begin().unwrap();
        store.save_record(&mut txn, "5", b"data").unwrap();
        store.abort(txn).unwrap();

        assert!(!store.record_path("5").exists());
    }

    #[test]
    fn file_delete_missing_record_is_ok() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut txn = store.begin().unwrap();
        store.delete_record(&mut txn, "nope").unwrap();
        store.commit(txn).unwrap();
    }

    #[test]
    fn file_delete_removes_record() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let mut txn = store.begin().unwrap();
        store.save_record(&mut txn, "3", b"x").unwrap();
        store.commit(txn).unwrap();

        let mut txn = store.begin().unwrap();
        store.delete_record(&mut txn, "3").unwrap();
        store.commit(txn).unwrap();

        let txn = store.begin().unwrap();
        assert_eq!(store.get_record(&txn, "3").unwrap(), None);
    }

    #[test]
    fn file_id_generator_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            let mut txn = store.begin().unwrap();
            store.save_id_generator(&mut txn, 1234).unwrap();
            store.commit(txn).unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        let txn = store.begin().unwrap();
        assert_eq!(store.get_id_generator(&txn).unwrap(), Some(1234));
    }

    #[test]
    fn file_corrupt_id_generator_is_reported() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        fs::write(dir.path().join(IDGEN_FILE), "not a number").unwrap();

        let txn = store.begin().unwrap();
        assert!(matches!(
            store.get_id_generator(&txn),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _store = FileStore::open(dir.path()).unwrap();

        let result = FileStore::open(dir.path());
        assert!(matches!(result, Err(StorageError::Locked(_))));
    }

    #[test]
    fn file_rejects_invalid_ids() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let mut txn = store.begin().unwrap();

        let result = store.save_record(&mut txn, "../escape", b"x");
        assert!(matches!(result, Err(StorageError::InvalidRecordId(_))));
    }
}
