use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::expiry;

/// A stored value together with its tenant, TTL and bookkeeping timestamps.
///
/// Records are immutable once written. Field names serialize in camelCase to
/// match the persisted layout (`tenantId`, `expiryAt`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    tenant_id: String,
    key: String,
    value: Value,
    ttl_seconds: Option<u64>,
    expiry_at: Option<u64>,
    created_at: u64,
    updated_at: u64,
}

impl Record {
    /// Creates a record written at `now_millis`, deriving its expiry from the TTL
    pub fn new(
        tenant_id: impl Into<String>,
        key: impl Into<String>,
        value: Value,
        ttl_seconds: Option<u64>,
        now_millis: u64,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            key: key.into(),
            value,
            ttl_seconds,
            expiry_at: expiry::expiry_at(now_millis, ttl_seconds),
            created_at: now_millis,
            updated_at: now_millis,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the record, returning only its value
    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn ttl_seconds(&self) -> Option<u64> {
        self.ttl_seconds
    }

    /// Absolute expiry in epoch milliseconds, `None` if the record never expires
    pub fn expiry_at(&self) -> Option<u64> {
        self.expiry_at
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    /// Checks if this record is still live at `now_millis`
    pub fn is_live(&self, now_millis: u64) -> bool {
        expiry::is_live(self, now_millis)
    }
}
