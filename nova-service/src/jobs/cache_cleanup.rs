//! Cache Cleanup Background Task
//!
//! Periodically evicts artifact cache entries older than the retention
//! threshold, purges expired generation claims and drops rate-limit
//! counters whose window has closed. Records go stale when:
//!
//! - Content was regenerated under a new variant and the old one is unused
//! - A user stopped visiting a topic
//! - A claim holder crashed before releasing its marker
//! - A user stopped calling a metered endpoint
//!
//! Deletion is issued in bounded batches and keyed by an age predicate, so
//! overlapping sweeps from several processes are harmless: deleting an
//! already-deleted entry is a no-op. Within one process sweeps never
//! overlap.
//!
//! # Configuration
//!
//! ```rust
//! use nova_service::jobs::CleanupConfig;
//! use std::time::Duration;
//!
//! let config = CleanupConfig {
//!     sweep_interval: Duration::from_secs(86_400), // Once a day
//!     retention: Duration::from_secs(86_400),      // Keep one day
//!     batch_size: 500,                             // Rows per delete
//! };
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use nova_core::{to_offset, ConfigError, Timestamp};
use nova_storage::{ArtifactStore, ClaimStore, CounterStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::require_nonzero;
use crate::constants::{
    DEFAULT_CACHE_RETENTION_SECS, DEFAULT_SWEEP_BATCH_SIZE, DEFAULT_SWEEP_INTERVAL_SECS,
};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the cache cleanup task.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupConfig {
    /// How often to sweep (default: 24 hours)
    pub sweep_interval: Duration,

    /// Entries created longer ago than this are deleted (default: 24 hours)
    pub retention: Duration,

    /// Maximum entries deleted per storage call (default: 500)
    pub batch_size: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            retention: Duration::from_secs(DEFAULT_CACHE_RETENTION_SECS),
            batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }
}

impl CleanupConfig {
    /// Create CleanupConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `NOVA_SWEEP_INTERVAL_SECS`: How often to sweep (default: 86400)
    /// - `NOVA_CACHE_RETENTION_SECS`: Retention threshold (default: 86400)
    /// - `NOVA_SWEEP_BATCH_SIZE`: Max entries per delete (default: 500)
    pub fn from_env() -> Self {
        let sweep_interval = Duration::from_secs(
            std::env::var("NOVA_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        );

        let retention = Duration::from_secs(
            std::env::var("NOVA_CACHE_RETENTION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CACHE_RETENTION_SECS),
        );

        let batch_size = std::env::var("NOVA_SWEEP_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SWEEP_BATCH_SIZE);

        Self {
            sweep_interval,
            retention,
            batch_size,
        }
    }

    /// Short cadence for development and testing.
    pub fn development() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            retention: Duration::from_secs(600),
            batch_size: 50,
        }
    }

    /// Daily sweep of day-old entries.
    pub fn production() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("NOVA_SWEEP_INTERVAL_SECS", self.sweep_interval)?;
        require_nonzero("NOVA_CACHE_RETENTION_SECS", self.retention)?;
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "NOVA_SWEEP_BATCH_SIZE".to_string(),
                value: "0".to_string(),
                reason: "batch size must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for cleanup activity since the scheduler was created.
#[derive(Debug, Default)]
pub struct CleanupMetrics {
    /// Total sweeps completed, failed or not
    pub sweeps: AtomicU64,

    /// Total cache entries deleted
    pub entries_deleted: AtomicU64,

    /// Total expired claims purged
    pub claims_purged: AtomicU64,

    /// Total closed rate-limit windows dropped
    pub counters_purged: AtomicU64,

    /// Total storage errors encountered
    pub sweep_errors: AtomicU64,
}

impl CleanupMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> CleanupSnapshot {
        CleanupSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            entries_deleted: self.entries_deleted.load(Ordering::Relaxed),
            claims_purged: self.claims_purged.load(Ordering::Relaxed),
            counters_purged: self.counters_purged.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cleanup metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSnapshot {
    pub sweeps: u64,
    pub entries_deleted: u64,
    pub claims_purged: u64,
    pub counters_purged: u64,
    pub sweep_errors: u64,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// When the sweep ran.
    pub swept_at: Timestamp,
    /// Entries created before this instant were eligible.
    pub cutoff: Timestamp,
    pub entries_deleted: u64,
    pub claims_purged: u64,
    pub counters_purged: u64,
    /// Delete calls issued.
    pub batches: u32,
    /// A storage call failed; the next sweep retries.
    pub failed: bool,
}

/// What [`CleanupScheduler::status`] reports.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupStatus {
    pub running: bool,
    pub last_sweep_at: Option<Timestamp>,
    pub last_report: Option<SweepReport>,
    pub totals: CleanupSnapshot,
}

// ============================================================================
// SCHEDULER
// ============================================================================

struct Shared<S> {
    store: Arc<S>,
    config: CleanupConfig,
    metrics: CleanupMetrics,
    last_report: Mutex<Option<SweepReport>>,
    sweep_lock: tokio::sync::Mutex<()>,
}

struct RunningSweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owned cleanup resource with a `start`/`stop` lifecycle.
///
/// Each instance has its own timer and state, so several schedulers (for
/// example in tests) never interfere. Dropping a running scheduler aborts
/// its task.
///
/// # Example
///
/// ```ignore
/// let scheduler = CleanupScheduler::new(store, CleanupConfig::from_env());
/// scheduler.start();
/// tokio::signal::ctrl_c().await?;
/// scheduler.stop().await;
/// ```
pub struct CleanupScheduler<S>
where
    S: ArtifactStore + ClaimStore + CounterStore + 'static,
{
    shared: Arc<Shared<S>>,
    task: Mutex<Option<RunningSweeper>>,
}

impl<S> CleanupScheduler<S>
where
    S: ArtifactStore + ClaimStore + CounterStore + 'static,
{
    pub fn new(store: Arc<S>, config: CleanupConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                config,
                metrics: CleanupMetrics::new(),
                last_report: Mutex::new(None),
                sweep_lock: tokio::sync::Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.shared.config
    }

    /// Sweep immediately, then once per `sweep_interval` until stopped.
    ///
    /// Returns `false` if already running. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if task.is_some() {
            tracing::warn!("Cache cleanup already running");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(cleanup_loop(shared, shutdown_rx));
        *task = Some(RunningSweeper {
            shutdown_tx,
            handle,
        });
        true
    }

    /// Signal the task to stop and wait for it to finish. A sweep in
    /// progress completes first; no further sweep is scheduled.
    ///
    /// Returns `false` if the scheduler was not running.
    pub async fn stop(&self) -> bool {
        let running = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(running) = running else {
            return false;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Cache cleanup task ended abnormally");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        match self.task.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Run one sweep now, independent of the timer.
    pub async fn sweep_now(&self) -> SweepReport {
        sweep(&self.shared, Utc::now()).await
    }

    /// Run one sweep as if the current time were `now`.
    pub async fn sweep_at(&self, now: Timestamp) -> SweepReport {
        sweep(&self.shared, now).await
    }

    pub fn metrics(&self) -> CleanupSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn status(&self) -> CleanupStatus {
        let last_report = match self.shared.last_report.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        CleanupStatus {
            running: self.is_running(),
            last_sweep_at: last_report.as_ref().map(|r| r.swept_at),
            last_report,
            totals: self.shared.metrics.snapshot(),
        }
    }
}

impl<S> Drop for CleanupScheduler<S>
where
    S: ArtifactStore + ClaimStore + CounterStore + 'static,
{
    fn drop(&mut self) {
        let running = match self.task.get_mut() {
            Ok(task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(running) = running {
            let _ = running.shutdown_tx.send(true);
            running.handle.abort();
        }
    }
}

async fn cleanup_loop<S>(shared: Arc<Shared<S>>, mut shutdown_rx: watch::Receiver<bool>)
where
    S: ArtifactStore + ClaimStore + CounterStore + 'static,
{
    // The first tick completes immediately, giving the sweep on start.
    let mut sweep_interval = interval(shared.config.sweep_interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_secs = shared.config.sweep_interval.as_secs(),
        retention_secs = shared.config.retention.as_secs(),
        batch_size = shared.config.batch_size,
        "Cache cleanup task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache cleanup task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                sweep(&shared, Utc::now()).await;
            }
        }
    }

    let snapshot = shared.metrics.snapshot();
    tracing::info!(
        sweeps = snapshot.sweeps,
        entries_deleted = snapshot.entries_deleted,
        claims_purged = snapshot.claims_purged,
        counters_purged = snapshot.counters_purged,
        sweep_errors = snapshot.sweep_errors,
        "Cache cleanup task completed"
    );
}

/// Perform one sweep.
async fn sweep<S>(shared: &Shared<S>, now: Timestamp) -> SweepReport
where
    S: ArtifactStore + ClaimStore + CounterStore,
{
    let _guard = shared.sweep_lock.lock().await;
    let cutoff = now - to_offset(shared.config.retention);
    let batch_size = shared.config.batch_size.max(1);

    let mut report = SweepReport {
        swept_at: now,
        cutoff,
        entries_deleted: 0,
        claims_purged: 0,
        counters_purged: 0,
        batches: 0,
        failed: false,
    };

    loop {
        match shared.store.delete_older_than(cutoff, batch_size).await {
            Ok(deleted) => {
                report.batches += 1;
                report.entries_deleted += deleted;
                if (deleted as usize) < batch_size {
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, %cutoff, "Failed to delete expired cache entries");
                shared.metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
                report.failed = true;
                break;
            }
        }
    }

    match shared.store.purge_expired_claims(now).await {
        Ok(purged) => report.claims_purged = purged,
        Err(e) => {
            tracing::error!(error = %e, "Failed to purge expired claims");
            shared.metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            report.failed = true;
        }
    }

    match shared.store.purge_expired_counters(now).await {
        Ok(purged) => report.counters_purged = purged,
        Err(e) => {
            tracing::error!(error = %e, "Failed to purge closed rate-limit windows");
            shared.metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            report.failed = true;
        }
    }

    shared
        .metrics
        .entries_deleted
        .fetch_add(report.entries_deleted, Ordering::Relaxed);
    shared
        .metrics
        .claims_purged
        .fetch_add(report.claims_purged, Ordering::Relaxed);
    shared
        .metrics
        .counters_purged
        .fetch_add(report.counters_purged, Ordering::Relaxed);
    shared.metrics.sweeps.fetch_add(1, Ordering::Relaxed);

    if report.entries_deleted > 0 || report.claims_purged > 0 || report.counters_purged > 0 {
        tracing::info!(
            entries_deleted = report.entries_deleted,
            claims_purged = report.claims_purged,
            counters_purged = report.counters_purged,
            batches = report.batches,
            %cutoff,
            "Cache cleanup sweep completed"
        );
    } else {
        tracing::trace!("Cache cleanup sweep completed with nothing to delete");
    }

    match shared.last_report.lock() {
        Ok(mut guard) => *guard = Some(report.clone()),
        Err(poisoned) => *poisoned.into_inner() = Some(report.clone()),
    }

    report
}

// ============================================================================
// TESTS
// ============================================================================
