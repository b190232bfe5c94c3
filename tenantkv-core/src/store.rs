use dashmap::DashMap;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::{ErrorKind, StoreError, StoreResult, ValidationError};
use crate::quota::QuotaEnforcer;
use crate::record::Record;
use crate::storage::{FileStorage, MemoryStorage, RecordStorage};
use crate::sweeper::{SweepReport, Sweeper, SweeperHandle};

/// Truncates a key for safe logging
pub(crate) fn truncate_key_for_log(key: &str) -> String {
    const MAX_LOG_CHARS: usize = 16;
    if key.chars().count() <= MAX_LOG_CHARS {
        key.to_string()
    } else {
        let head: String = key.chars().take(MAX_LOG_CHARS).collect();
        format!("{}...", head)
    }
}

struct StoreInner {
    storage: Arc<dyn RecordStorage>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    quota: QuotaEnforcer,
    /// One writer at a time per tenant, so count-then-insert cannot over-admit.
    /// An entry exists only while some write for that tenant holds it.
    tenant_locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Tenant-isolated key-value store with TTL expiry and per-tenant quotas.
///
/// Keys are unique within a tenant and records are immutable: a write to a
/// key that is still live fails with [`StoreError::DuplicateKey`]. Expired
/// records are invisible to every read path, removed lazily when looked up
/// and in bulk by the [`Sweeper`].
///
/// Writes for the same tenant are serialized, so the live-record count seen
/// after any completed write never exceeds the configured limit. Reads never
/// take the tenant lock.
///
/// Cloning is cheap; clones share the same records.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use tenantkv_core::{ErrorKind, TenantKvStore};
///
/// let store = TenantKvStore::new();
/// store.put("tenant-a", "greeting", json!({"text": "hello"}), Some(60)).unwrap();
///
/// assert_eq!(store.get("tenant-a", "greeting").unwrap(), json!({"text": "hello"}));
/// assert_eq!(store.get("tenant-b", "greeting").unwrap_err().kind(), ErrorKind::NotFound);
/// ```
#[derive(Clone)]
pub struct TenantKvStore {
    inner: Arc<StoreInner>,
}

impl TenantKvStore {
    /// Creates an in-memory store with default limits and the system clock
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates an in-memory store with custom limits
    pub fn with_config(config: StoreConfig) -> Self {
        Self::with_storage(config, Arc::new(MemoryStorage::new()), Arc::new(SystemClock))
    }

    /// Creates a store over any backend and clock.
    ///
    /// Tests pass a [`ManualClock`](crate::ManualClock) here to control expiry.
    pub fn with_storage(
        config: StoreConfig,
        storage: Arc<dyn RecordStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let quota = QuotaEnforcer::new(config.tenant_limit);
        Self {
            inner: Arc::new(StoreInner {
                storage,
                clock,
                config,
                quota,
                tenant_locks: DashMap::new(),
            }),
        }
    }

    /// Opens a store persisted to a JSON file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the file exists but cannot be read or
    /// parsed.
    pub fn open_file(config: StoreConfig, path: impl Into<PathBuf>) -> StoreResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let storage = FileStorage::open(path, clock.now_millis())?;
        Ok(Self::with_storage(config, Arc::new(storage), clock))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Stores a new record.
    ///
    /// `ttl_seconds` of `None` means the record never expires. Checks run in
    /// order: tenant quota, input validation, then the duplicate check, which
    /// is atomic with the insert.
    ///
    /// Key length is counted in Unicode scalar values (`char`s), not bytes or
    /// UTF-16 code units, so a key of 32 emoji fits the default limit of 32.
    ///
    /// # Errors
    ///
    /// - `QuotaExceeded` if the tenant already holds `tenant_limit` live records
    /// - `Validation` for an empty tenant/key, an over-long key, an oversized
    ///   value or a zero TTL
    /// - `DuplicateKey` if a live record already exists for this key
    /// - `StorageUnavailable` if the backend failed
    pub fn put(
        &self,
        tenant_id: &str,
        key: &str,
        value: Value,
        ttl_seconds: Option<u64>,
    ) -> StoreResult<()> {
        validate_tenant(tenant_id)?;

        self.with_tenant_lock(tenant_id, || self.put_locked(tenant_id, key, value, ttl_seconds))
            .inspect_err(|err| log_rejection("PUT", tenant_id, key, err))
    }

    /// Quota, validation and insert for one entry. Caller holds the tenant lock.
    pub(crate) fn put_locked(
        &self,
        tenant_id: &str,
        key: &str,
        value: Value,
        ttl_seconds: Option<u64>,
    ) -> StoreResult<()> {
        let now = self.inner.clock.now_millis();

        let live = self.inner.storage.count_live(tenant_id, now)?;
        if !self.inner.quota.can_admit(tenant_id, live) {
            return Err(StoreError::QuotaExceeded {
                tenant_id: tenant_id.to_string(),
                limit: self.inner.quota.tenant_limit(),
            });
        }

        self.validate_entry(key, &value, ttl_seconds)?;

        let record = Record::new(tenant_id, key, value, ttl_seconds, now);
        self.inner.storage.insert_if_absent(record, now)?;

        tracing::debug!(
            tenant = tenant_id,
            key = %truncate_key_for_log(key),
            ttl_seconds = ?ttl_seconds,
            "PUT"
        );
        Ok(())
    }

    /// Retrieves the value stored under `key`.
    ///
    /// An expired record is removed as part of the lookup.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent or expired.
    pub fn get(&self, tenant_id: &str, key: &str) -> StoreResult<Value> {
        self.get_record(tenant_id, key).map(Record::into_value)
    }

    /// Like [`get`](Self::get), but returns the whole record
    pub fn get_record(&self, tenant_id: &str, key: &str) -> StoreResult<Record> {
        let now = self.inner.clock.now_millis();
        tracing::debug!(tenant = tenant_id, key = %truncate_key_for_log(key), "GET");

        match self.inner.storage.fetch(tenant_id, key)? {
            Some(record) if record.is_live(now) => Ok(record),
            Some(_) => {
                self.evict(tenant_id, key, now);
                Err(StoreError::not_found(tenant_id, key))
            }
            None => Err(StoreError::not_found(tenant_id, key)),
        }
    }

    /// Deletes the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent or already expired. An expired
    /// record is still removed.
    pub fn delete(&self, tenant_id: &str, key: &str) -> StoreResult<()> {
        let now = self.inner.clock.now_millis();
        tracing::debug!(tenant = tenant_id, key = %truncate_key_for_log(key), "DELETE");

        match self.inner.storage.remove(tenant_id, key)? {
            Some(record) if record.is_live(now) => Ok(()),
            Some(_) | None => Err(StoreError::not_found(tenant_id, key)),
        }
    }

    /// Number of live records held by a tenant
    pub fn count(&self, tenant_id: &str) -> StoreResult<usize> {
        self.inner
            .storage
            .count_live(tenant_id, self.inner.clock.now_millis())
    }

    /// Live keys of a tenant, sorted
    pub fn keys(&self, tenant_id: &str) -> StoreResult<Vec<String>> {
        let mut keys = self
            .inner
            .storage
            .live_keys(tenant_id, self.inner.clock.now_millis())?;
        keys.sort();
        Ok(keys)
    }

    /// Total physically stored records across all tenants, including expired
    /// ones not yet swept
    pub fn len(&self) -> usize {
        self.inner.storage.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.storage.is_empty()
    }

    /// A sweeper bound to this store's storage, clock and sweep settings
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            Arc::clone(&self.inner.storage),
            Arc::clone(&self.inner.clock),
            self.inner.config.sweep_interval,
            self.inner.config.sweep_batch_size,
        )
    }

    /// Starts the background sweeper on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    pub fn start_sweeper(&self) -> SweeperHandle {
        self.sweeper().start()
    }

    /// Runs one sweep pass in the foreground
    pub fn sweep(&self) -> StoreResult<SweepReport> {
        self.sweeper().sweep_once()
    }

    /// Runs `f` while holding the tenant's write lock.
    ///
    /// The lock entry is dropped from the map afterwards unless another
    /// writer is waiting on it, so the map only holds tenants with writes in
    /// flight.
    pub(crate) fn with_tenant_lock<T>(&self, tenant_id: &str, f: impl FnOnce() -> T) -> T {
        let result = {
            let lock = self.tenant_lock(tenant_id);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        // Clones are only handed out under the shard lock, so a count of one
        // means nobody else can reach this mutex.
        self.inner
            .tenant_locks
            .remove_if(tenant_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.inner.tenant_locks.get(tenant_id) {
            return Arc::clone(lock.value());
        }
        Arc::clone(
            self.inner
                .tenant_locks
                .entry(tenant_id.to_string())
                .or_default()
                .value(),
        )
    }

    #[cfg(test)]
    pub(crate) fn held_tenant_locks(&self) -> usize {
        self.inner.tenant_locks.len()
    }

    fn evict(&self, tenant_id: &str, key: &str, now: u64) {
        match self.inner.storage.remove_if_expired(tenant_id, key, now) {
            Ok(true) => {
                tracing::debug!(tenant = tenant_id, key = %truncate_key_for_log(key), "evicted expired record");
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(
                    tenant = tenant_id,
                    key = %truncate_key_for_log(key),
                    error = %err,
                    "failed to evict expired record"
                );
            }
        }
    }

    fn validate_entry(
        &self,
        key: &str,
        value: &Value,
        ttl_seconds: Option<u64>,
    ) -> Result<(), ValidationError> {
        let config = &self.inner.config;

        if key.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        let key_len = key.chars().count();
        if key_len > config.max_key_length {
            return Err(ValidationError::KeyTooLong {
                len: key_len,
                max: config.max_key_length,
            });
        }

        if ttl_seconds == Some(0) {
            return Err(ValidationError::InvalidTtl);
        }

        let bytes = serde_json::to_vec(value)
            .map_err(|err| ValidationError::Unserializable(err.to_string()))?
            .len();
        if bytes > config.max_value_bytes {
            return Err(ValidationError::ValueTooLarge {
                bytes,
                max: config.max_value_bytes,
            });
        }

        Ok(())
    }
}

impl Default for TenantKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TenantKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantKvStore")
            .field("config", &self.inner.config)
            .field("clock", &self.inner.clock)
            .field("records", &self.inner.storage.len())
            .finish()
    }
}

pub(crate) fn validate_tenant(tenant_id: &str) -> Result<(), ValidationError> {
    if tenant_id.is_empty() {
        return Err(ValidationError::EmptyTenant);
    }
    Ok(())
}

pub(crate) fn log_rejection(op: &'static str, tenant_id: &str, key: &str, err: &StoreError) {
    let key = truncate_key_for_log(key);
    match err.kind() {
        ErrorKind::QuotaExceeded | ErrorKind::StorageUnavailable => {
            tracing::warn!(op, tenant = tenant_id, key = %key, kind = ?err.kind(), "write rejected");
        }
        _ => {
            tracing::debug!(op, tenant = tenant_id, key = %key, kind = ?err.kind(), "write rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    const T0: u64 = 1_700_000_000_000;

    fn create_test_store() -> (TenantKvStore, Arc<ManualClock>) {
        create_test_store_with_config(StoreConfig::default())
    }

    fn create_test_store_with_config(config: StoreConfig) -> (TenantKvStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let store = TenantKvStore::with_storage(config, Arc::new(MemoryStorage::new()), clock.clone());
        (store, clock)
    }

    #[test]
    fn test_put_and_get() {
        let (store, _) = create_test_store();
        store.put("t1", "k1", json!({"a": 1}), None).unwrap();

        assert_eq!(store.get("t1", "k1").unwrap(), json!({"a": 1}));
        assert_eq!(store.count("t1").unwrap(), 1);
    }

    #[test]
    fn test_get_nonexistent_key() {
        let (store, _) = create_test_store();
        let err = store.get("t1", "nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_tenants_are_isolated() {
        let (store, _) = create_test_store();
        store.put("t1", "shared", json!(1), None).unwrap();
        store.put("t2", "shared", json!(2), None).unwrap();

        assert_eq!(store.get("t1", "shared").unwrap(), json!(1));
        assert_eq!(store.get("t2", "shared").unwrap(), json!(2));

        store.delete("t1", "shared").unwrap();
        assert_eq!(store.get("t2", "shared").unwrap(), json!(2));
    }

    #[test]
    fn test_ttl_expiry_then_not_found() {
        let (store, clock) = create_test_store();
        store.put("t1", "k1", json!({"a": 1}), Some(1)).unwrap();

        assert_eq!(store.get("t1", "k1").unwrap(), json!({"a": 1}));

        clock.advance(Duration::from_millis(1_100));
        assert_eq!(store.get("t1", "k1").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let (store, clock) = create_test_store();
        store.put("t1", "k1", json!(true), Some(5)).unwrap();

        clock.advance(Duration::from_millis(4_999));
        assert!(store.get("t1", "k1").is_ok());

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get("t1", "k1").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_expired_read_evicts_record() {
        let (store, clock) = create_test_store();
        store.put("t1", "k1", json!(1), Some(1)).unwrap();
        clock.advance(Duration::from_secs(2));

        assert_eq!(store.len(), 1);
        assert!(store.get("t1", "k1").is_err());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_get_record_exposes_metadata() {
        let (store, _) = create_test_store();
        store.put("t1", "k1", json!("v"), Some(30)).unwrap();

        let record = store.get_record("t1", "k1").unwrap();
        assert_eq!(record.tenant_id(), "t1");
        assert_eq!(record.ttl_seconds(), Some(30));
        assert_eq!(record.expiry_at(), Some(T0 + 30_000));
        assert_eq!(record.created_at(), T0);
        assert_eq!(record.updated_at(), T0);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let (store, _) = create_test_store();
        store.put("t1", "k1", json!({}), None).unwrap();

        let err = store.put("t1", "k1", json!({"other": true}), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
        // No upsert
        assert_eq!(store.get("t1", "k1").unwrap(), json!({}));
    }

    #[test]
    fn test_put_over_expired_key_succeeds() {
        let (store, clock) = create_test_store();
        store.put("t1", "k1", json!(1), Some(1)).unwrap();
        clock.advance(Duration::from_secs(1));

        store.put("t1", "k1", json!(2), None).unwrap();
        assert_eq!(store.get("t1", "k1").unwrap(), json!(2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_quota_exceeded_then_freed_by_delete() {
        let (store, _) = create_test_store();
        for i in 0..10 {
            store.put("t1", &format!("k{}", i), json!(i), None).unwrap();
        }

        let err = store.put("t1", "k10", json!(10), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert!(matches!(err, StoreError::QuotaExceeded { limit: 10, .. }));

        // Other tenants are unaffected
        store.put("t2", "k10", json!(10), None).unwrap();

        store.delete("t1", "k0").unwrap();
        store.put("t1", "k10", json!(10), None).unwrap();
        assert_eq!(store.count("t1").unwrap(), 10);
    }

    #[test]
    fn test_expired_records_do_not_count_against_quota() {
        let config = StoreConfig::default().with_tenant_limit(2);
        let (store, clock) = create_test_store_with_config(config);
        store.put("t1", "a", json!(1), Some(1)).unwrap();
        store.put("t1", "b", json!(2), Some(1)).unwrap();
        assert_eq!(
            store.put("t1", "c", json!(3), None).unwrap_err().kind(),
            ErrorKind::QuotaExceeded
        );

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.count("t1").unwrap(), 0);
        store.put("t1", "c", json!(3), None).unwrap();
    }

    #[test]
    fn test_quota_checked_before_validation() {
        let config = StoreConfig::default().with_tenant_limit(1);
        let (store, _) = create_test_store_with_config(config);
        store.put("t1", "a", json!(1), None).unwrap();

        let long_key = "x".repeat(40);
        let err = store.put("t1", &long_key, json!(1), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn test_key_length_validation() {
        let (store, _) = create_test_store();

        store.put("t1", &"k".repeat(32), json!(1), None).unwrap();

        let err = store.put("t1", &"k".repeat(33), json!(1), None).unwrap_err();
        assert_eq!(
            err,
            StoreError::Validation(ValidationError::KeyTooLong { len: 33, max: 32 })
        );

        let err = store.put("t1", "", json!(1), None).unwrap_err();
        assert_eq!(err, StoreError::Validation(ValidationError::EmptyKey));
    }

    #[test]
    fn test_key_length_counts_characters() {
        let (store, _) = create_test_store();
        // 32 characters, 64 bytes
        store.put("t1", &"é".repeat(32), json!(1), None).unwrap();
        // Outside the BMP: 32 characters, 64 UTF-16 code units
        store.put("t1", &"😀".repeat(32), json!(1), None).unwrap();

        let err = store.put("t1", &"😀".repeat(33), json!(1), None).unwrap_err();
        assert_eq!(
            err,
            StoreError::Validation(ValidationError::KeyTooLong { len: 33, max: 32 })
        );
    }

    #[test]
    fn test_rejected_writes_leave_no_tenant_locks() {
        let (store, _) = create_test_store();
        let long_key = "k".repeat(40);

        for i in 0..1_000 {
            let err = store.put(&format!("tenant-{}", i), &long_key, json!(1), None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert_eq!(store.held_tenant_locks(), 0);
        assert!(store.is_empty());

        store.put("t1", "k1", json!(1), None).unwrap();
        assert_eq!(store.held_tenant_locks(), 0);
    }

    #[test]
    fn test_value_size_validation() {
        let (store, _) = create_test_store();

        // A JSON string serializes with two quote characters
        let at_limit = Value::String("x".repeat(16_382));
        store.put("t1", "fits", at_limit, None).unwrap();

        let too_big = Value::String("x".repeat(16_383));
        let err = store.put("t1", "big", too_big, None).unwrap_err();
        assert_eq!(
            err,
            StoreError::Validation(ValidationError::ValueTooLarge { bytes: 16_385, max: 16_384 })
        );
    }

    #[test]
    fn test_zero_ttl_and_empty_tenant_rejected() {
        let (store, _) = create_test_store();

        let err = store.put("t1", "k", json!(1), Some(0)).unwrap_err();
        assert_eq!(err, StoreError::Validation(ValidationError::InvalidTtl));

        let err = store.put("", "k", json!(1), None).unwrap_err();
        assert_eq!(err, StoreError::Validation(ValidationError::EmptyTenant));
    }

    #[test]
    fn test_delete() {
        let (store, _) = create_test_store();
        store.put("t1", "k1", json!(1), None).unwrap();

        store.delete("t1", "k1").unwrap();
        assert_eq!(store.get("t1", "k1").unwrap_err().kind(), ErrorKind::NotFound);
        // Already deleted
        assert_eq!(store.delete("t1", "k1").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_expired_is_not_found_but_removes() {
        let (store, clock) = create_test_store();
        store.put("t1", "k1", json!(1), Some(1)).unwrap();
        clock.advance(Duration::from_secs(5));

        assert_eq!(store.delete("t1", "k1").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(store.is_empty());
    }

    #[test]
    fn test_keys_sorted_and_live_only() {
        let (store, clock) = create_test_store();
        store.put("t1", "charlie", json!(1), None).unwrap();
        store.put("t1", "alpha", json!(1), None).unwrap();
        store.put("t1", "bravo", json!(1), Some(1)).unwrap();
        store.put("t2", "delta", json!(1), None).unwrap();

        assert_eq!(store.keys("t1").unwrap(), vec!["alpha", "bravo", "charlie"]);

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.keys("t1").unwrap(), vec!["alpha", "charlie"]);
        assert!(store.keys("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_sweep_removes_unread_expired_records() {
        let (store, clock) = create_test_store();
        store.put("t1", "a", json!(1), Some(1)).unwrap();
        store.put("t2", "b", json!(1), Some(1)).unwrap();
        store.put("t2", "c", json!(1), None).unwrap();

        clock.advance(Duration::from_secs(1));
        let report = store.sweep().unwrap();

        assert_eq!(report.removed, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_clone_shares_data() {
        let (store, _) = create_test_store();
        let clone = store.clone();

        store.put("t1", "k1", json!(1), None).unwrap();
        assert_eq!(clone.get("t1", "k1").unwrap(), json!(1));
    }

    #[test]
    fn test_truncate_key_for_log() {
        assert_eq!(truncate_key_for_log("short"), "short");
        assert_eq!(
            truncate_key_for_log("this_is_a_very_long_key_that_should_be_truncated"),
            "this_is_a_very_l..."
        );
        // Multi-byte characters are not split
        assert_eq!(truncate_key_for_log(&"é".repeat(20)), format!("{}...", "é".repeat(16)));
    }

    #[test]
    fn test_concurrent_puts_same_key_single_winner() {
        let (store, _) = create_test_store();
        let store = Arc::new(store);
        let successes = Arc::new(AtomicUsize::new(0));
        let duplicates = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for i in 0..8 {
            let store = Arc::clone(&store);
            let successes = Arc::clone(&successes);
            let duplicates = Arc::clone(&duplicates);
            handles.push(thread::spawn(move || {
                match store.put("t1", "contested", json!(i), None) {
                    Ok(()) => successes.fetch_add(1, Ordering::SeqCst),
                    Err(err) => {
                        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
                        duplicates.fetch_add(1, Ordering::SeqCst)
                    }
                };
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(duplicates.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_concurrent_puts_never_exceed_quota() {
        let (store, _) = create_test_store();
        let store = Arc::new(store);
        let mut handles = vec![];

        for thread_id in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..10 {
                    let _ = store.put("t1", &format!("k-{}-{}", thread_id, i), json!(i), None);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.count("t1").unwrap(), 10);
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn test_concurrent_reads_while_sweeping() {
        let (store, clock) = create_test_store();
        for tenant in 0..20 {
            for i in 0..5 {
                store
                    .put(&format!("t{}", tenant), &format!("k{}", i), json!(i), Some(1))
                    .unwrap();
            }
        }
        clock.advance(Duration::from_secs(2));

        let store = Arc::new(store);
        let sweeper_store = Arc::clone(&store);
        let sweeper = thread::spawn(move || sweeper_store.sweep().unwrap().removed);

        let reader_store = Arc::clone(&store);
        let reader = thread::spawn(move || {
            for tenant in 0..20 {
                for i in 0..5 {
                    let result = reader_store.get(&format!("t{}", tenant), &format!("k{}", i));
                    assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
                }
            }
        });

        let swept = sweeper.join().unwrap();
        reader.join().unwrap();

        assert!(swept <= 100);
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_backed_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");

        {
            let store = TenantKvStore::open_file(StoreConfig::default(), &path).unwrap();
            store.put("t1", "k1", json!({"nested": [1, 2, 3]}), None).unwrap();
            store.put("t1", "k2", json!("gone"), None).unwrap();
            store.delete("t1", "k2").unwrap();
        }

        let store = TenantKvStore::open_file(StoreConfig::default(), &path).unwrap();
        assert_eq!(store.get("t1", "k1").unwrap(), json!({"nested": [1, 2, 3]}));
        assert_eq!(store.get("t1", "k2").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.count("t1").unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_sweeper_uses_store_settings() {
        let config = StoreConfig::default().with_sweep_interval(Duration::from_secs(5));
        let (store, clock) = create_test_store_with_config(config);
        store.put("t1", "k1", json!(1), Some(1)).unwrap();
        clock.advance(Duration::from_secs(2));

        let handle = store.start_sweeper();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(store.is_empty());
        handle.shutdown().await;
    }
}
