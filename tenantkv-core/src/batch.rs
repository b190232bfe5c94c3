//! Best-effort multi-entry writes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, StoreError, StoreResult};
use crate::store::{log_rejection, validate_tenant, TenantKvStore};

/// One entry of a batch write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub key: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl BatchEntry {
    /// Entry that never expires
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            ttl_seconds: None,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }
}

/// A batch entry that was not written, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub key: String,
    pub kind: ErrorKind,
}

/// Per-key result of a batch write, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedEntry>,
}

impl BatchOutcome {
    /// Keys of the failed entries, without reasons
    pub fn failed_keys(&self) -> Vec<&str> {
        self.failed.iter().map(|entry| entry.key.as_str()).collect()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl TenantKvStore {
    /// Writes several entries for one tenant, in order, best effort.
    ///
    /// Each entry goes through the same checks as [`put`](Self::put); the
    /// quota is re-read before every entry, so a batch may fill the tenant
    /// partway through. A failing entry is reported and the rest are still
    /// attempted. Entries already written stay written.
    ///
    /// # Errors
    ///
    /// - `BatchTooLarge` if `entries` exceeds `max_batch_size`; nothing is written
    /// - `Validation` if `tenant_id` is empty
    pub fn batch_write(&self, tenant_id: &str, entries: Vec<BatchEntry>) -> StoreResult<BatchOutcome> {
        let max = self.config().max_batch_size;
        if entries.len() > max {
            tracing::warn!(tenant = tenant_id, size = entries.len(), max, "batch rejected");
            return Err(StoreError::BatchTooLarge {
                size: entries.len(),
                max,
            });
        }
        validate_tenant(tenant_id)?;

        let mut outcome = BatchOutcome::default();

        for BatchEntry { key, value, ttl_seconds } in entries {
            // Locked per entry so single writes for the tenant can interleave.
            let result = self.with_tenant_lock(tenant_id, || {
                self.put_locked(tenant_id, &key, value, ttl_seconds)
            });

            match result {
                Ok(()) => outcome.succeeded.push(key),
                Err(err) => {
                    log_rejection("BATCH", tenant_id, &key, &err);
                    outcome.failed.push(FailedEntry {
                        key,
                        kind: err.kind(),
                    });
                }
            }
        }

        tracing::debug!(
            tenant = tenant_id,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "BATCH"
        );
        Ok(outcome)
    }
}
