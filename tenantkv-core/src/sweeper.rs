//! Background removal of expired records.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::error::StoreResult;
use crate::storage::RecordStorage;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records removed across all tenants
    pub removed: usize,
    /// Storage calls made; each removes at most one page of records
    pub pages: usize,
}

/// Periodically purges expired records across all tenants.
///
/// Lazy eviction on read only catches keys somebody asks for again. The
/// sweeper handles the rest, one page at a time so foreground writers are
/// never locked out for a whole scan.
#[derive(Clone)]
pub struct Sweeper {
    storage: Arc<dyn RecordStorage>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    page_size: usize,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("clock", &self.clock)
            .field("interval", &self.interval)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl Sweeper {
    /// Creates a sweeper over `storage`.
    ///
    /// `interval` is raised to 1ms and `page_size` to 1 if given as zero.
    pub fn new(
        storage: Arc<dyn RecordStorage>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        page_size: usize,
    ) -> Self {
        Self {
            storage,
            clock,
            interval: interval.max(Duration::from_millis(1)),
            page_size: page_size.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one full pass, removing every record expired at the current time.
    ///
    /// The cut-off is read once at the start, so records expiring while the
    /// pass runs are left for the next one.
    pub fn sweep_once(&self) -> StoreResult<SweepReport> {
        let now = self.clock.now_millis();
        let mut report = SweepReport::default();

        loop {
            let removed = self.storage.purge_expired(now, self.page_size)?;
            report.pages += 1;
            report.removed += removed;
            if removed < self.page_size {
                break;
            }
        }

        Ok(report)
    }

    /// Spawns the periodic sweep on the current Tokio runtime.
    ///
    /// The first pass runs one full interval after start. The task keeps
    /// running until [`SweeperHandle::stop`] is called or the handle is
    /// dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    pub fn start(self) -> SweeperHandle {
        if tokio::runtime::Handle::try_current().is_err() {
            panic!(
                "tenantkv_core::Sweeper::start requires a Tokio runtime. \
                 Call it from within a #[tokio::main] or #[tokio::test] context."
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));

        SweeperHandle {
            shutdown_tx,
            task: Some(task),
        }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval() fires at once; the first pass waits a full period
        ticker.tick().await;

        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_pass().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("sweeper stopped");
    }

    /// One pass on the blocking pool; backends may do file I/O per page.
    async fn run_pass(&self) {
        let sweeper = self.clone();
        let result = match tokio::task::spawn_blocking(move || sweeper.sweep_once()).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, "sweep task did not complete");
                return;
            }
        };

        match result {
            Ok(report) if report.removed > 0 => {
                tracing::info!(removed = report.removed, pages = report.pages, "expired records swept");
            }
            Ok(_) => {
                tracing::debug!("sweep found no expired records");
            }
            Err(err) => {
                // A failed pass is retried on the next tick.
                tracing::warn!(kind = ?err.kind(), error = %err, "sweep failed");
            }
        }
    }
}

/// Handle to a running [`Sweeper`] task.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signals the task to stop after its current pass
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the task and waits for it to exit
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Returns `true` while the background task has not exited
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
