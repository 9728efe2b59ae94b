//! Coalescing write cache for quota usage.
//!
//! Producers call [`QuotaDataCache::record`] on the hot path. Events that share
//! a (user, username, model, hour) key are folded into a single pending delta,
//! so a burst of N requests becomes one database write per key per flush.
//!
//! ## Flushing
//! - [`QuotaDataCache::flush`] swaps the pending map for an empty one and
//!   applies each delta outside the map lock.
//! - Flushes are serialised by a separate async lock; overlapping callers wait.
//! - A failed delta is logged and dropped. It is not retried.
//! - [`QuotaDataCache::start_worker`] flushes on a fixed interval and once more
//!   on shutdown.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{ApplyOutcome, QuotaDataRepo},
    models::{PendingDelta, QuotaDataKey},
    observability::metrics,
};

/// Shortest period the flush worker will tick at.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome counts of a single flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Deltas added to an existing row.
    pub updated: usize,
    /// Deltas that created a new row.
    pub inserted: usize,
    /// Deltas dropped after a storage error.
    pub failed: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.updated + self.inserted + self.failed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// In-memory accumulator of usage deltas awaiting persistence.
#[derive(Default)]
pub struct QuotaDataCache {
    pending: Mutex<HashMap<QuotaDataKey, PendingDelta>>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl QuotaDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one usage event into the pending delta for its hour bucket.
    ///
    /// Never blocks on I/O and never fails.
    pub fn record(
        &self,
        user_id: i64,
        username: &str,
        model_name: &str,
        quota: i64,
        occurred_at: i64,
        token_used: i64,
    ) {
        let key = QuotaDataKey::new(user_id, username, model_name, occurred_at);
        let mut pending = self.pending.lock();
        match pending.get_mut(&key) {
            Some(delta) => delta.accumulate(quota, token_used),
            None => {
                pending.insert(key.clone(), PendingDelta::first(key, quota, token_used));
            }
        }
    }

    /// Detach every pending delta, leaving the cache empty.
    fn take_snapshot(&self) -> Vec<PendingDelta> {
        let drained = std::mem::take(&mut *self.pending.lock());
        drained.into_values().collect()
    }

    /// Persist and clear all pending deltas.
    ///
    /// Events recorded while a flush is in progress land in the fresh map and
    /// are picked up by the next flush.
    pub async fn flush(&self, repo: &dyn QuotaDataRepo) -> FlushReport {
        let _guard = self.flush_lock.lock().await;

        let snapshot = self.take_snapshot();
        let mut report = FlushReport::default();
        if snapshot.is_empty() {
            return report;
        }

        let started = Instant::now();
        tracing::debug!(count = snapshot.len(), "Flushing quota data cache");

        for delta in &snapshot {
            match repo.apply_delta(delta).await {
                Ok(ApplyOutcome::Updated) => report.updated += 1,
                Ok(ApplyOutcome::Inserted) => report.inserted += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        error = %e,
                        user_id = delta.key.user_id,
                        model = %delta.key.model_name,
                        bucket = delta.key.created_at,
                        count = delta.count,
                        quota = delta.quota,
                        "Dropping quota data delta after write failure"
                    );
                }
            }
        }

        let elapsed = started.elapsed();
        metrics::record_quota_flush(&report, elapsed.as_secs_f64());
        tracing::info!(
            updated = report.updated,
            inserted = report.inserted,
            failed = report.failed,
            duration_ms = elapsed.as_millis() as u64,
            "Quota data cache flushed"
        );

        report
    }

    /// Start the background flush worker.
    ///
    /// The worker flushes every `interval` until `shutdown` is cancelled, then
    /// runs one final flush before exiting. Intervals shorter than
    /// [`MIN_FLUSH_INTERVAL`] are raised to it.
    pub fn start_worker(
        self: &Arc<Self>,
        repo: Arc<dyn QuotaDataRepo>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = interval.max(MIN_FLUSH_INTERVAL);

        tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                "Starting quota data flush worker"
            );

            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        let report = cache.flush(repo.as_ref()).await;
                        tracing::info!(
                            flushed = report.total(),
                            "Quota data flush worker shutting down"
                        );
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.flush(repo.as_ref()).await;
                    }
                }
            }
        })
    }

    /// Number of distinct keys awaiting flush.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
