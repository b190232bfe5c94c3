use std::str::FromStr;
use std::time::Duration;

/// Default maximum number of live records per tenant
pub const DEFAULT_TENANT_LIMIT: usize = 10;

/// Default maximum key length, in characters
pub const DEFAULT_MAX_KEY_LENGTH: usize = 32;

/// Default maximum serialized value size, in bytes (16 KB)
pub const DEFAULT_MAX_VALUE_BYTES: usize = 16 * 1024;

/// Default maximum number of entries in one batch write
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Default interval between background sweeps (30 minutes)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Default number of records a sweep removes per storage call
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 500;

/// Limits and sweep settings for a [`TenantKvStore`](crate::TenantKvStore)
///
/// # Example
///
/// ```rust
/// use tenantkv_core::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::default()
///     .with_tenant_limit(50)
///     .with_sweep_interval(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum live records per tenant (default: 10)
    pub tenant_limit: usize,
    /// Maximum key length in characters (default: 32)
    pub max_key_length: usize,
    /// Maximum value size in bytes, measured as compact JSON (default: 16384)
    pub max_value_bytes: usize,
    /// Maximum entries accepted by one batch write (default: 100)
    pub max_batch_size: usize,
    /// Interval between background sweeps (default: 30 minutes)
    pub sweep_interval: Duration,
    /// Records removed per storage call during a sweep (default: 500)
    pub sweep_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tenant_limit: DEFAULT_TENANT_LIMIT,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from environment variables.
    ///
    /// Reads:
    /// - `TENANTKV_TENANT_LIMIT`
    /// - `TENANTKV_MAX_KEY_LENGTH`
    /// - `TENANTKV_MAX_VALUE_BYTES`
    /// - `TENANTKV_MAX_BATCH_SIZE`
    /// - `TENANTKV_SWEEP_INTERVAL_MS`
    /// - `TENANTKV_SWEEP_BATCH_SIZE`
    ///
    /// Unset variables keep their defaults; unparsable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tenant_limit: env_or("TENANTKV_TENANT_LIMIT", defaults.tenant_limit),
            max_key_length: env_or("TENANTKV_MAX_KEY_LENGTH", defaults.max_key_length),
            max_value_bytes: env_or("TENANTKV_MAX_VALUE_BYTES", defaults.max_value_bytes),
            max_batch_size: env_or("TENANTKV_MAX_BATCH_SIZE", defaults.max_batch_size),
            sweep_interval: Duration::from_millis(env_or(
                "TENANTKV_SWEEP_INTERVAL_MS",
                defaults.sweep_interval.as_millis() as u64,
            )),
            sweep_batch_size: env_or("TENANTKV_SWEEP_BATCH_SIZE", defaults.sweep_batch_size).max(1),
        }
    }

    /// Sets the maximum number of live records per tenant
    pub fn with_tenant_limit(mut self, limit: usize) -> Self {
        self.tenant_limit = limit;
        self
    }

    /// Sets the maximum key length in characters
    pub fn with_max_key_length(mut self, length: usize) -> Self {
        self.max_key_length = length;
        self
    }

    /// Sets the maximum serialized value size in bytes
    pub fn with_max_value_bytes(mut self, bytes: usize) -> Self {
        self.max_value_bytes = bytes;
        self
    }

    /// Sets the maximum number of entries per batch write
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the sweep interval
    ///
    /// This determines how often the background sweeper removes expired
    /// records nobody has read since they expired.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets how many records one sweep page removes.
    ///
    /// Clamped to at least 1.
    pub fn with_sweep_batch_size(mut self, size: usize) -> Self {
        self.sweep_batch_size = size.max(1);
        self
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable configuration value");
            default
        }),
        Err(_) => default,
    }
}
