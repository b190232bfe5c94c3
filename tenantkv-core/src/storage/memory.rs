use dashmap::DashMap;
use std::collections::HashMap;

use super::RecordStorage;
use crate::error::{StoreError, StoreResult};
use crate::record::Record;

/// In-memory record table.
///
/// Records are grouped into one partition per tenant. A partition lives in a
/// `DashMap` shard, so an operation on one tenant only blocks callers that
/// hash to the same shard, and the duplicate check plus insert for a key run
/// under a single shard write lock.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tenants: DashMap<String, HashMap<String, Record>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from already-validated records, e.g. loaded from disk.
    ///
    /// Later records win when two share a (tenant, key).
    pub(crate) fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let storage = Self::new();
        for record in records {
            storage
                .tenants
                .entry(record.tenant_id().to_string())
                .or_default()
                .insert(record.key().to_string(), record);
        }
        storage
    }

    /// Copies every stored record, ordered by tenant then key so the output
    /// is stable across runs.
    pub(crate) fn snapshot(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .tenants
            .iter()
            .flat_map(|partition| partition.value().values().cloned().collect::<Vec<_>>())
            .collect();
        records.sort_by(|a, b| {
            a.tenant_id()
                .cmp(b.tenant_id())
                .then_with(|| a.key().cmp(b.key()))
        });
        records
    }

    /// Puts a record back unconditionally, undoing a removal.
    pub(crate) fn restore(&self, record: Record) {
        self.tenants
            .entry(record.tenant_id().to_string())
            .or_default()
            .insert(record.key().to_string(), record);
    }

    /// Removes and returns the record if it is expired at `now_millis`.
    pub(crate) fn take_if_expired(&self, tenant_id: &str, key: &str, now_millis: u64) -> Option<Record> {
        let taken = {
            let mut partition = self.tenants.get_mut(tenant_id)?;
            // Re-check under the write lock: the record may have been
            // replaced by a fresh write since the caller looked at it.
            let expired = partition
                .get(key)
                .is_some_and(|record| !record.is_live(now_millis));
            if expired {
                partition.remove(key)
            } else {
                None
            }
        };
        if taken.is_some() {
            self.prune_partition(tenant_id);
        }
        taken
    }

    /// Removes and returns up to `limit` records expired at `now_millis`.
    pub(crate) fn take_expired(&self, now_millis: u64, limit: usize) -> Vec<Record> {
        // Snapshot tenant ids first so no shard lock is held across the pass.
        let tenant_ids: Vec<String> = self.tenants.iter().map(|entry| entry.key().clone()).collect();
        let mut taken = Vec::new();

        for tenant_id in tenant_ids {
            if taken.len() >= limit {
                break;
            }

            if let Some(mut partition) = self.tenants.get_mut(&tenant_id) {
                let expired: Vec<String> = partition
                    .iter()
                    .filter(|(_, record)| !record.is_live(now_millis))
                    .map(|(key, _)| key.clone())
                    .take(limit - taken.len())
                    .collect();
                taken.extend(expired.iter().filter_map(|key| partition.remove(key)));
            }

            self.prune_partition(&tenant_id);
        }

        taken
    }

    /// Drops the tenant's partition once it holds no records.
    fn prune_partition(&self, tenant_id: &str) {
        self.tenants.remove_if(tenant_id, |_, partition| partition.is_empty());
    }
}

impl RecordStorage for MemoryStorage {
    fn insert_if_absent(&self, record: Record, now_millis: u64) -> StoreResult<()> {
        let mut partition = self
            .tenants
            .entry(record.tenant_id().to_string())
            .or_default();

        if let Some(existing) = partition.get(record.key()) {
            if existing.is_live(now_millis) {
                return Err(StoreError::duplicate(record.tenant_id(), record.key()));
            }
        }

        partition.insert(record.key().to_string(), record);
        Ok(())
    }

    fn fetch(&self, tenant_id: &str, key: &str) -> StoreResult<Option<Record>> {
        Ok(self
            .tenants
            .get(tenant_id)
            .and_then(|partition| partition.get(key).cloned()))
    }

    fn remove(&self, tenant_id: &str, key: &str) -> StoreResult<Option<Record>> {
        let removed = match self.tenants.get_mut(tenant_id) {
            Some(mut partition) => partition.remove(key),
            None => return Ok(None),
        };
        self.prune_partition(tenant_id);
        Ok(removed)
    }

    fn remove_if_expired(&self, tenant_id: &str, key: &str, now_millis: u64) -> StoreResult<bool> {
        Ok(self.take_if_expired(tenant_id, key, now_millis).is_some())
    }

    fn count_live(&self, tenant_id: &str, now_millis: u64) -> StoreResult<usize> {
        Ok(self
            .tenants
            .get(tenant_id)
            .map(|partition| {
                partition
                    .values()
                    .filter(|record| record.is_live(now_millis))
                    .count()
            })
            .unwrap_or(0))
    }

    fn live_keys(&self, tenant_id: &str, now_millis: u64) -> StoreResult<Vec<String>> {
        Ok(self
            .tenants
            .get(tenant_id)
            .map(|partition| {
                partition
                    .values()
                    .filter(|record| record.is_live(now_millis))
                    .map(|record| record.key().to_string())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn purge_expired(&self, now_millis: u64, limit: usize) -> StoreResult<usize> {
        Ok(self.take_expired(now_millis, limit).len())
    }

    fn len(&self) -> usize {
        self.tenants.iter().map(|partition| partition.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn record(tenant: &str, key: &str, ttl: Option<u64>, now: u64) -> Record {
        Record::new(tenant, key, json!({"k": key}), ttl, now)
    }

    #[test]
    fn test_insert_and_fetch() {
        let storage = MemoryStorage::new();
        storage.insert_if_absent(record("t1", "k1", None, 0), 0).unwrap();

        let fetched = storage.fetch("t1", "k1").unwrap().unwrap();
        assert_eq!(fetched.value(), &json!({"k": "k1"}));
        assert!(storage.fetch("t1", "missing").unwrap().is_none());
        assert!(storage.fetch("t2", "k1").unwrap().is_none());
    }

    #[test]
    fn test_insert_rejects_live_duplicate() {
        let storage = MemoryStorage::new();
        storage.insert_if_absent(record("t1", "k1", None, 0), 0).unwrap();

        let err = storage.insert_if_absent(record("t1", "k1", None, 0), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
    }

    #[test]
    fn test_same_key_in_different_tenants() {
        let storage = MemoryStorage::new();
        storage.insert_if_absent(record("t1", "k1", None, 0), 0).unwrap();
        storage.insert_if_absent(record("t2", "k1", None, 0), 0).unwrap();

        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_insert_replaces_stale_record() {
        let storage = MemoryStorage::new();
        storage.insert_if_absent(record("t1", "k1", Some(1), 0), 0).unwrap();

        // Expired at 1_000 but not yet swept
        storage.insert_if_absent(record("t1", "k1", None, 1_000), 1_000).unwrap();

        let fetched = storage.fetch("t1", "k1").unwrap().unwrap();
        assert_eq!(fetched.expiry_at(), None);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_remove_prunes_empty_partition() {
        let storage = MemoryStorage::new();
        storage.insert_if_absent(record("t1", "k1", None, 0), 0).unwrap();

        assert!(storage.remove("t1", "k1").unwrap().is_some());
        assert!(storage.remove("t1", "k1").unwrap().is_none());
        assert!(storage.tenants.is_empty());
    }

    #[test]
    fn test_remove_if_expired_leaves_live_records() {
        let storage = MemoryStorage::new();
        storage.insert_if_absent(record("t1", "live", Some(60), 0), 0).unwrap();
        storage.insert_if_absent(record("t1", "dead", Some(1), 0), 0).unwrap();

        assert!(!storage.remove_if_expired("t1", "live", 1_000).unwrap());
        assert!(storage.remove_if_expired("t1", "dead", 1_000).unwrap());
        assert!(!storage.remove_if_expired("t1", "dead", 1_000).unwrap());
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_count_and_keys_filter_expired() {
        let storage = MemoryStorage::new();
        storage.insert_if_absent(record("t1", "a", None, 0), 0).unwrap();
        storage.insert_if_absent(record("t1", "b", Some(1), 0), 0).unwrap();
        storage.insert_if_absent(record("t2", "c", None, 0), 0).unwrap();

        assert_eq!(storage.count_live("t1", 500).unwrap(), 2);
        assert_eq!(storage.count_live("t1", 1_000).unwrap(), 1);
        assert_eq!(storage.live_keys("t1", 1_000).unwrap(), vec!["a".to_string()]);
        assert_eq!(storage.count_live("nobody", 0).unwrap(), 0);
        // Stale record is still physically present
        assert_eq!(storage.len(), 3);
    }

    #[test]
    fn test_purge_expired_respects_limit() {
        let storage = MemoryStorage::new();
        for i in 0..5 {
            storage
                .insert_if_absent(record("t1", &format!("k{}", i), Some(1), 0), 0)
                .unwrap();
            storage
                .insert_if_absent(record("t2", &format!("k{}", i), Some(1), 0), 0)
                .unwrap();
        }
        storage.insert_if_absent(record("t1", "keep", None, 0), 0).unwrap();

        assert_eq!(storage.purge_expired(1_000, 3).unwrap(), 3);
        assert_eq!(storage.len(), 8);

        assert_eq!(storage.purge_expired(1_000, 100).unwrap(), 7);
        assert_eq!(storage.len(), 1);
        assert!(storage.fetch("t1", "keep").unwrap().is_some());
        assert_eq!(storage.tenants.len(), 1);
    }

    #[test]
    fn test_restore_undoes_take() {
        let storage = MemoryStorage::new();
        storage.insert_if_absent(record("t1", "k1", Some(1), 0), 0).unwrap();
        storage.insert_if_absent(record("t1", "k2", Some(1), 0), 0).unwrap();

        let taken = storage.take_expired(1_000, 10);
        assert_eq!(taken.len(), 2);
        assert!(storage.is_empty());

        for record in taken {
            storage.restore(record);
        }
        assert_eq!(storage.len(), 2);
        assert!(storage.take_if_expired("t1", "k1", 1_000).is_some());
        assert!(storage.take_if_expired("t1", "k1", 1_000).is_none());
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let storage = MemoryStorage::from_records(vec![
            record("t2", "a", None, 0),
            record("t1", "b", None, 0),
            record("t1", "a", None, 0),
        ]);

        let keys: Vec<(String, String)> = storage
            .snapshot()
            .into_iter()
            .map(|r| (r.tenant_id().to_string(), r.key().to_string()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("t1".to_string(), "a".to_string()),
                ("t1".to_string(), "b".to_string()),
                ("t2".to_string(), "a".to_string()),
            ]
        );
    }

    #[test]
    fn test_concurrent_inserts_same_key_single_winner() {
        let storage = Arc::new(MemoryStorage::new());
        let successes = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..16 {
            let storage = Arc::clone(&storage);
            let successes = Arc::clone(&successes);
            handles.push(thread::spawn(move || {
                if storage.insert_if_absent(record("t1", "contested", None, 0), 0).is_ok() {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(storage.len(), 1);
    }
}
