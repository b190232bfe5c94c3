//! Record storage backends.
//!
//! [`TenantKvStore`](crate::TenantKvStore) only needs a handful of primitives
//! from its backing table, the important ones being an atomic conditional
//! insert keyed by (tenant, key) and a paged delete-by-expiry. Anything able
//! to provide those can sit behind the store.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::error::StoreResult;
use crate::record::Record;

/// Backing table for records, partitioned by tenant.
///
/// Implementations must be safe to share between foreground callers and the
/// sweeper. Every method takes `now_millis` from the caller's clock where
/// liveness matters; backends never read the time themselves.
pub trait RecordStorage: Send + Sync {
    /// Inserts `record` unless a live record already holds its (tenant, key).
    ///
    /// The check and the insert are one atomic step. A stale record under the
    /// same key is replaced. Fails with `DuplicateKey` on conflict.
    fn insert_if_absent(&self, record: Record, now_millis: u64) -> StoreResult<()>;

    /// Returns a copy of the stored record, live or stale.
    fn fetch(&self, tenant_id: &str, key: &str) -> StoreResult<Option<Record>>;

    /// Physically removes the record, returning it if it existed.
    fn remove(&self, tenant_id: &str, key: &str) -> StoreResult<Option<Record>>;

    /// Removes the record only if it is expired at `now_millis`.
    ///
    /// Returns whether anything was removed. Losing a race against another
    /// eviction (or the sweeper) is not an error.
    fn remove_if_expired(&self, tenant_id: &str, key: &str, now_millis: u64) -> StoreResult<bool>;

    /// Number of live records for a tenant.
    fn count_live(&self, tenant_id: &str, now_millis: u64) -> StoreResult<usize>;

    /// Live keys for a tenant, in no particular order.
    fn live_keys(&self, tenant_id: &str, now_millis: u64) -> StoreResult<Vec<String>>;

    /// Removes up to `limit` records whose expiry is at or before `now_millis`.
    ///
    /// Returns the number removed; a result below `limit` means no expired
    /// record was left when the pass finished.
    fn purge_expired(&self, now_millis: u64, limit: usize) -> StoreResult<usize>;

    /// Total number of physically stored records, including stale ones.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
