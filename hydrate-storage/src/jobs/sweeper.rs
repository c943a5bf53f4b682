//! Expiry Sweeper Background Task
//!
//! Reads slide each record's TTL, and an expired entry is dropped lazily the
//! next time it is looked up. Entries nobody asks for again would otherwise
//! stay resident, so this task sweeps every table store on a fixed interval
//! (`CacheConfig::cleanup_interval`). Each table's store is locked shard by
//! shard, so a sweep never blocks lookups on other tables.
//!
//! When `CacheConfig::pending_max_age` is set the same pass also evicts
//! pending ids that were discovered long ago and never drained.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::cache::{HydrationCache, SweepReport};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for sweeper activity since startup.
#[derive(Debug, Default)]
pub struct SweeperMetrics {
    /// Sweep passes completed
    pub sweep_cycles: AtomicU64,

    /// Whole records removed because their TTL lapsed
    pub entries_removed: AtomicU64,

    /// Individual fields removed from records that are still live
    pub fields_removed: AtomicU64,

    /// Pending ids evicted for exceeding the maximum age
    pub pending_evicted: AtomicU64,
}

impl SweeperMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> SweeperSnapshot {
        SweeperSnapshot {
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
            fields_removed: self.fields_removed.load(Ordering::Relaxed),
            pending_evicted: self.pending_evicted.load(Ordering::Relaxed),
        }
    }

    fn record(&self, report: &SweepReport) {
        self.sweep_cycles.fetch_add(1, Ordering::Relaxed);
        self.entries_removed
            .fetch_add(report.entries_removed() as u64, Ordering::Relaxed);
        self.fields_removed
            .fetch_add(report.fields_removed() as u64, Ordering::Relaxed);
        self.pending_evicted
            .fetch_add(report.pending_evicted() as u64, Ordering::Relaxed);
    }
}

/// Snapshot of sweeper metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperSnapshot {
    pub sweep_cycles: u64,
    pub entries_removed: u64,
    pub fields_removed: u64,
    pub pending_evicted: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Sweep expired records from every table until shutdown is signalled.
///
/// The first pass runs immediately. The task also stops if every sender of
/// `shutdown_rx` is dropped.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(sweeper_task(cache.clone(), shutdown_rx));
///
/// // On shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn sweeper_task(
    cache: HydrationCache,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweeperMetrics> {
    let metrics = Arc::new(SweeperMetrics::new());
    let period = cache.config().cleanup_interval;

    let mut sweep_interval = interval(period);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        cleanup_interval_secs = period.as_secs(),
        pending_max_age_secs = cache.config().pending_max_age.map(|age| age.as_secs()),
        tables = cache.registry().len(),
        "Cache sweeper started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache sweeper shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                sweep_once(&cache, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweep_cycles = snapshot.sweep_cycles,
        entries_removed = snapshot.entries_removed,
        fields_removed = snapshot.fields_removed,
        pending_evicted = snapshot.pending_evicted,
        "Cache sweeper completed"
    );

    metrics
}

fn sweep_once(cache: &HydrationCache, metrics: &SweeperMetrics) {
    let report = cache.sweep_now();
    metrics.record(&report);

    for table in report.tables.iter().filter(|t| {
        t.entries_removed > 0 || t.fields_removed > 0 || t.pending_evicted > 0
    }) {
        tracing::debug!(
            table = %table.table,
            entries_removed = table.entries_removed,
            fields_removed = table.fields_removed,
            pending_evicted = table.pending_evicted,
            "Table swept"
        );
    }

    if report.entries_removed() > 0 || report.pending_evicted() > 0 {
        tracing::info!(
            entries_removed = report.entries_removed(),
            fields_removed = report.fields_removed(),
            pending_evicted = report.pending_evicted(),
            "Sweep cycle completed"
        );
    } else {
        tracing::trace!("Sweep cycle completed with nothing expired");
    }
}
