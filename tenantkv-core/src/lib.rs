//! # TenantKV Core
//!
//! A tenant-isolated key-value store with TTL support.
//!
//! ## Features
//!
//! - Keys unique per tenant, records immutable once written (no upsert)
//! - Optional per-record TTL; expired records are invisible on every read
//!   path and evicted lazily when looked up
//! - Per-tenant cap on live records, enforced under a per-tenant write lock
//! - Ordered, best-effort batch writes with per-entry results
//! - Background sweeper with explicit start/stop and an injectable clock
//! - Pluggable storage: in-memory (`DashMap`) or a JSON file
//!
//! ## Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tenantkv_core::{BatchEntry, StoreConfig, TenantKvStore};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tenantkv_core::StoreError> {
//!     let config = StoreConfig::default()
//!         .with_sweep_interval(Duration::from_secs(60));
//!     let store = TenantKvStore::open_file(config, "records.json")?;
//!     let sweeper = store.start_sweeper();
//!
//!     // Store a value with a 60 second TTL
//!     store.put("tenant-a", "session", json!({"user": 42}), Some(60))?;
//!     let value = store.get("tenant-a", "session")?;
//!     println!("session: {}", value);
//!
//!     let outcome = store.batch_write(
//!         "tenant-a",
//!         vec![BatchEntry::new("a", json!(1)), BatchEntry::new("b", json!(2))],
//!     )?;
//!     println!("written: {:?}, failed: {:?}", outcome.succeeded, outcome.failed_keys());
//!
//!     store.delete("tenant-a", "session")?;
//!     sweeper.shutdown().await;
//!     Ok(())
//! }
//! ```

mod batch;
mod clock;
mod config;
mod error;
pub mod expiry;
mod quota;
mod record;
pub mod storage;
mod store;
mod sweeper;

pub use batch::{BatchEntry, BatchOutcome, FailedEntry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    StoreConfig, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_KEY_LENGTH, DEFAULT_MAX_VALUE_BYTES,
    DEFAULT_SWEEP_BATCH_SIZE, DEFAULT_SWEEP_INTERVAL, DEFAULT_TENANT_LIMIT,
};
pub use error::{ErrorKind, StoreError, StoreResult, ValidationError};
pub use quota::QuotaEnforcer;
pub use record::Record;
pub use storage::{FileStorage, MemoryStorage, RecordStorage};
pub use store::TenantKvStore;
pub use sweeper::{SweepReport, Sweeper, SweeperHandle};
