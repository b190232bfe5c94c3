use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;

use super::{MemoryStorage, RecordStorage};
use crate::error::StoreResult;
use crate::record::Record;

/// Record table mirrored to a JSON file.
///
/// Reads are served from memory. Every mutation rewrites the whole file via a
/// uniquely named temporary sibling and an atomic rename, so a crash
/// mid-write leaves either the old or the new table on disk, never a torn
/// one. A mutation whose rewrite fails is undone in memory before the write
/// lock is released, so no other writer can persist it.
///
/// Only one process should open a given file; writers in different processes
/// are not coordinated.
#[derive(Debug)]
pub struct FileStorage {
    table: MemoryStorage,
    path: PathBuf,
    /// Held from the in-memory change until the file matches it
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Opens (or lazily creates) the table stored at `path`.
    ///
    /// Records already expired at `now_millis` are dropped while loading. A
    /// missing file is treated as an empty table.
    pub fn open(path: impl Into<PathBuf>, now_millis: u64) -> StoreResult<Self> {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<Record>>(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let total = records.len();
        let live: Vec<Record> = records
            .into_iter()
            .filter(|record| record.is_live(now_millis))
            .collect();

        tracing::debug!(
            path = %path.display(),
            loaded = live.len(),
            dropped_expired = total - live.len(),
            "opened record file"
        );

        Ok(Self {
            table: MemoryStorage::from_records(live),
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes the current table to disk. Caller holds the write lock.
    fn persist(&self) -> StoreResult<()> {
        let bytes = serde_json::to_vec(&self.table.snapshot())?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn persist_logged(&self, op: &'static str) -> StoreResult<()> {
        self.persist().inspect_err(|err| {
            tracing::warn!(path = %self.path.display(), op, error = %err, "failed to persist records");
        })
    }
}

impl RecordStorage for FileStorage {
    fn insert_if_absent(&self, record: Record, now_millis: u64) -> StoreResult<()> {
        let tenant_id = record.tenant_id().to_string();
        let key = record.key().to_string();

        let _guard = self.lock_writes();
        self.table.insert_if_absent(record, now_millis)?;

        if let Err(err) = self.persist_logged("insert") {
            let _ = self.table.remove(&tenant_id, &key);
            return Err(err);
        }
        Ok(())
    }

    fn fetch(&self, tenant_id: &str, key: &str) -> StoreResult<Option<Record>> {
        self.table.fetch(tenant_id, key)
    }

    fn remove(&self, tenant_id: &str, key: &str) -> StoreResult<Option<Record>> {
        let _guard = self.lock_writes();
        let Some(removed) = self.table.remove(tenant_id, key)? else {
            return Ok(None);
        };

        if let Err(err) = self.persist_logged("remove") {
            self.table.restore(removed);
            return Err(err);
        }
        Ok(Some(removed))
    }

    fn remove_if_expired(&self, tenant_id: &str, key: &str, now_millis: u64) -> StoreResult<bool> {
        let _guard = self.lock_writes();
        let Some(evicted) = self.table.take_if_expired(tenant_id, key, now_millis) else {
            return Ok(false);
        };

        if let Err(err) = self.persist_logged("evict") {
            self.table.restore(evicted);
            return Err(err);
        }
        Ok(true)
    }

    fn count_live(&self, tenant_id: &str, now_millis: u64) -> StoreResult<usize> {
        self.table.count_live(tenant_id, now_millis)
    }

    fn live_keys(&self, tenant_id: &str, now_millis: u64) -> StoreResult<Vec<String>> {
        self.table.live_keys(tenant_id, now_millis)
    }

    fn purge_expired(&self, now_millis: u64, limit: usize) -> StoreResult<usize> {
        let _guard = self.lock_writes();
        let purged = self.table.take_expired(now_millis, limit);
        if purged.is_empty() {
            return Ok(0);
        }

        if let Err(err) = self.persist_logged("purge") {
            for record in purged {
                self.table.restore(record);
            }
            return Err(err);
        }
        Ok(purged.len())
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}
