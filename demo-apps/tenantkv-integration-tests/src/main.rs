use anyhow::{ensure, Result};
use futures::future::join_all;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tenantkv_core::{BatchEntry, ErrorKind, StoreConfig, TenantKvStore};
use tokio::sync::Semaphore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tenantkv_integration_tests=info,tenantkv_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StoreConfig::from_env();
    tracing::info!("🧪 TenantKV Integration Tests");
    tracing::info!("   Tenant limit: {}", config.tenant_limit);
    println!();

    test_basic_operations(&config).await?;
    test_parallel_tenants(&config).await?;
    test_quota_under_contention(&config).await?;
    test_expiration(&config).await?;
    test_background_sweep(&config).await?;
    test_batch_write(&config).await?;
    test_reopen_file(&config).await?;

    println!();
    tracing::info!("✅ All tests passed!");

    Ok(())
}

/// A file path unique to one test run
fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tenantkv-{}-{}.json", name, uuid::Uuid::new_v4()))
}

fn cleanup(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        tracing::warn!("   could not remove {}: {}", path.display(), err);
    }
}

/// Test basic PUT/GET/DELETE operations
async fn test_basic_operations(config: &StoreConfig) -> Result<()> {
    tracing::info!("Test: Basic Operations");

    let path = scratch_path("basic");
    let store = TenantKvStore::open_file(config.clone(), &path)?;
    let tenant = format!("tenant-{}", uuid::Uuid::new_v4());

    store.put(&tenant, "greeting", json!({"text": "hello world"}), Some(60))?;
    ensure!(
        store.get(&tenant, "greeting")? == json!({"text": "hello world"}),
        "Value should match"
    );

    // Immutable: a second write to a live key is rejected
    let err = store
        .put(&tenant, "greeting", json!("overwrite"), None)
        .unwrap_err();
    ensure!(err.kind() == ErrorKind::DuplicateKey, "Expected DuplicateKey, got {:?}", err);

    store.delete(&tenant, "greeting")?;
    let err = store.get(&tenant, "greeting").unwrap_err();
    ensure!(err.kind() == ErrorKind::NotFound, "Key should not be found after delete");

    cleanup(&path);
    tracing::info!("   ✓ Basic operations work correctly");
    Ok(())
}

/// Test many tenants writing the same keys in parallel to one file - verify no data mixing
async fn test_parallel_tenants(config: &StoreConfig) -> Result<()> {
    let num_tenants = 50;
    let keys_per_tenant = config.tenant_limit.min(10);
    tracing::info!(
        "Test: Parallel Tenants ({} tenants x {} keys)",
        num_tenants,
        keys_per_tenant
    );

    let path = scratch_path("parallel");
    let store = TenantKvStore::open_file(config.clone(), &path)?;
    let semaphore = Arc::new(Semaphore::new(16));
    let expected = Arc::new(tokio::sync::Mutex::new(HashMap::new()));
    let start = Instant::now();

    let tenant_futures: Vec<_> = (0..num_tenants)
        .map(|tenant_id| {
            let store = store.clone();
            let semaphore = Arc::clone(&semaphore);
            let expected = Arc::clone(&expected);

            async move {
                let _permit = semaphore.acquire().await?;
                let tenant = format!("tenant-{}", tenant_id);

                for op in 0..keys_per_tenant {
                    let key = format!("key-{}", op);
                    let value = json!(format!("{}-{}-{}", tenant, op, uuid::Uuid::new_v4()));

                    {
                        let mut e = expected.lock().await;
                        e.insert((tenant.clone(), key.clone()), value.clone());
                    }

                    let store = store.clone();
                    let tenant = tenant.clone();
                    tokio::task::spawn_blocking(move || store.put(&tenant, &key, value, Some(300)))
                        .await??;
                }

                Ok::<_, anyhow::Error>(())
            }
        })
        .collect();

    join_all(tenant_futures)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let elapsed = start.elapsed();
    let expected = expected.lock().await;
    let mut errors = 0;

    for ((tenant, key), expected_value) in expected.iter() {
        match store.get(tenant, key) {
            Ok(value) if &value == expected_value => {}
            other => {
                tracing::error!(
                    "Isolation failure: tenant={}, key={}, expected={}, got={:?}",
                    tenant,
                    key,
                    expected_value,
                    other
                );
                errors += 1;
            }
        }
    }

    ensure!(errors == 0, "No isolation failures should occur");
    cleanup(&path);
    tracing::info!(
        "   ✓ {} records verified in {:?}, no cross-contamination",
        expected.len(),
        elapsed
    );
    Ok(())
}

/// Test that concurrent writers never push a tenant past its limit
async fn test_quota_under_contention(config: &StoreConfig) -> Result<()> {
    let attempts = config.tenant_limit * 5;
    tracing::info!("Test: Quota Under Contention ({} concurrent writes)", attempts);

    let store = TenantKvStore::with_config(config.clone());
    let tenant = format!("tenant-{}", uuid::Uuid::new_v4());
    let rejected = Arc::new(AtomicUsize::new(0));

    let write_futures: Vec<_> = (0..attempts)
        .map(|i| {
            let store = store.clone();
            let tenant = tenant.clone();
            let rejected = Arc::clone(&rejected);
            async move {
                let result = tokio::task::spawn_blocking(move || {
                    store.put(&tenant, &format!("key-{}", i), json!(i), None)
                })
                .await?;

                match result {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::QuotaExceeded => {
                        rejected.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => return Err(err.into()),
                }
                Ok::<_, anyhow::Error>(())
            }
        })
        .collect();

    join_all(write_futures)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let live = store.count(&tenant)?;
    ensure!(live == config.tenant_limit, "Expected {} live records, found {}", config.tenant_limit, live);
    ensure!(
        rejected.load(Ordering::SeqCst) == attempts - config.tenant_limit,
        "Every write past the limit should be rejected"
    );

    tracing::info!("   ✓ Limit of {} held under contention", config.tenant_limit);
    Ok(())
}

/// Test TTL expiration
async fn test_expiration(config: &StoreConfig) -> Result<()> {
    tracing::info!("Test: TTL Expiration");

    let store = TenantKvStore::with_config(config.clone());
    let tenant = format!("tenant-{}", uuid::Uuid::new_v4());

    store.put(&tenant, "temporary", json!("soon gone"), Some(1))?;
    ensure!(store.get(&tenant, "temporary").is_ok(), "Key should exist immediately");

    tracing::info!("   Waiting 2 seconds for expiration...");
    tokio::time::sleep(Duration::from_secs(2)).await;

    ensure!(store.count(&tenant)? == 0, "Expired record should not be counted");
    let err = store.get(&tenant, "temporary").unwrap_err();
    ensure!(err.kind() == ErrorKind::NotFound, "Key should be expired after TTL");

    // The key is free again
    store.put(&tenant, "temporary", json!("second life"), None)?;

    tracing::info!("   ✓ TTL expiration works correctly");
    Ok(())
}

/// Test that the background sweeper removes records nobody reads
async fn test_background_sweep(config: &StoreConfig) -> Result<()> {
    tracing::info!("Test: Background Sweep");

    let config = config.clone().with_sweep_interval(Duration::from_millis(200));
    let store = TenantKvStore::with_config(config);
    let tenant = format!("tenant-{}", uuid::Uuid::new_v4());

    store.put(&tenant, "short", json!(1), Some(1))?;
    store.put(&tenant, "forever", json!(2), None)?;

    let sweeper = store.start_sweeper();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    sweeper.shutdown().await;

    ensure!(store.len() == 1, "Sweeper should leave only the live record, found {}", store.len());
    ensure!(store.keys(&tenant)? == vec!["forever".to_string()], "Live key should survive");

    tracing::info!("   ✓ Sweeper removed expired records and stopped cleanly");
    Ok(())
}

/// Test ordered, best-effort batch writes
async fn test_batch_write(config: &StoreConfig) -> Result<()> {
    tracing::info!("Test: Batch Write");

    let store = TenantKvStore::with_config(config.clone());
    let tenant = format!("tenant-{}", uuid::Uuid::new_v4());
    store.put(&tenant, "b", json!("existing"), None)?;

    let outcome = store.batch_write(
        &tenant,
        vec![
            BatchEntry::new("a", json!(1)),
            BatchEntry::new("b", json!(2)),
            BatchEntry::new("c", json!(3)).with_ttl(60),
        ],
    )?;
    ensure!(outcome.succeeded == vec!["a", "c"], "Unexpected successes: {:?}", outcome.succeeded);
    ensure!(outcome.failed_keys() == vec!["b"], "Unexpected failures: {:?}", outcome.failed);

    let oversized: Vec<BatchEntry> = (0..=config.max_batch_size)
        .map(|i| BatchEntry::new(format!("bulk-{}", i), json!(i)))
        .collect();
    let err = store.batch_write(&tenant, oversized).unwrap_err();
    ensure!(err.kind() == ErrorKind::BatchTooLarge, "Expected BatchTooLarge, got {:?}", err);
    ensure!(store.count(&tenant)? == 3, "Rejected batch must write nothing");

    tracing::info!("   ✓ Batch write reports per-entry results");
    Ok(())
}

/// Test that records survive reopening the file store
async fn test_reopen_file(config: &StoreConfig) -> Result<()> {
    tracing::info!("Test: Reopen File Store");

    let path = scratch_path("reopen");
    let tenant = format!("tenant-{}", uuid::Uuid::new_v4());

    {
        let store = TenantKvStore::open_file(config.clone(), &path)?;
        store.put(&tenant, "kept", json!({"n": 1}), None)?;
        store.put(&tenant, "dropped", json!({"n": 2}), None)?;
        store.delete(&tenant, "dropped")?;
    }

    let store = TenantKvStore::open_file(config.clone(), &path)?;
    ensure!(store.get(&tenant, "kept")? == json!({"n": 1}), "Record should survive reopen");
    ensure!(
        store.get(&tenant, "dropped").is_err(),
        "Deleted record should stay deleted"
    );

    cleanup(&path);
    tracing::info!("   ✓ File store persisted {} record(s)", store.len());
    Ok(())
}
