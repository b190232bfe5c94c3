//! Expiry policy: absolute expiry from a relative TTL, and liveness.

use crate::record::Record;

/// Absolute expiry (epoch ms) for a record written at `now_millis`.
///
/// `None` TTL means the record never expires.
pub fn expiry_at(now_millis: u64, ttl_seconds: Option<u64>) -> Option<u64> {
    ttl_seconds.map(|ttl| now_millis.saturating_add(ttl.saturating_mul(1000)))
}

/// `true` while `expiry_at` is absent or strictly after `now_millis`.
///
/// A record whose expiry equals the current instant is already expired.
#[inline]
pub fn is_live_at(expiry_at: Option<u64>, now_millis: u64) -> bool {
    match expiry_at {
        None => true,
        Some(at) => at > now_millis,
    }
}

/// Liveness of a stored record at `now_millis`.
#[inline]
pub fn is_live(record: &Record, now_millis: u64) -> bool {
    is_live_at(record.expiry_at(), now_millis)
}
