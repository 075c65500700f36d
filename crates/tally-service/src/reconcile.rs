//! Scheduled reconciliation jobs.
//!
//! Two low-frequency jobs keep local state and the external provider in
//! agreement:
//!
//! - **Usage sync** re-submits each active account's cumulative usage for
//!   the current cycle. The provider's meters aggregate last-value-wins, so
//!   repeated syncs converge on the final cumulative value instead of
//!   summing deliveries. Each (account, resource, cycle) occupies one job
//!   row that re-arms with the newest value, keeping the queue bounded.
//! - **Auto-top-up scan** tops up accounts whose balance fell below their
//!   configured threshold, bounded per month by the account's cap.
//!
//! Each job type is single-flight: an overlapping run is a logged no-op.
//! Every schedule tick also prunes delivered jobs older than the retention
//! window so the job column family does not grow without bound.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tally_core::{period_bounds, ResourceKind, Result};
use tally_meter::{MeterEvent, MeterQueue};
use tally_store::Store;

use crate::ledger::Ledger;
use crate::pipeline::resource_value;

/// How long delivered jobs are kept before pruning.
const DELIVERED_JOB_RETENTION_DAYS: i64 = 7;

/// The reconciliation jobs.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    queue: MeterQueue,
    ledger: Ledger,
    sync_running: Arc<AtomicBool>,
    top_up_running: Arc<AtomicBool>,
}

impl Reconciler {
    /// Create a reconciler over the given store, queue, and ledger.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, queue: MeterQueue, ledger: Ledger) -> Self {
        Self {
            store,
            queue,
            ledger,
            sync_running: Arc::new(AtomicBool::new(false)),
            top_up_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Re-submit cumulative current-cycle usage for every account.
    ///
    /// Each run submits the latest cumulative values under a per
    /// (account, resource, cycle) key: a job from an earlier run is
    /// re-armed with the newer value rather than duplicated, matching the
    /// provider's last-value-wins aggregation. Returns the number of
    /// accounts synced; an overlapping run syncs nothing.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the account scan or enqueue fails.
    pub fn sync_usage(&self) -> Result<u64> {
        if self
            .sync_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Usage sync already running, skipping");
            return Ok(0);
        }

        let result = self.sync_usage_inner();
        self.sync_running.store(false, Ordering::SeqCst);
        result
    }

    fn sync_usage_inner(&self) -> Result<u64> {
        let now = Utc::now();
        let (period_start, _) = period_bounds(now);
        let mut synced = 0;

        for account in self.store.list_accounts()? {
            let Some(period) = self.store.get_period(&account.id, period_start)? else {
                continue;
            };
            if period.usage.is_empty() {
                continue;
            }

            let customer_id = account
                .external_customer_id
                .clone()
                .unwrap_or_else(|| account.id.to_string());

            let mut queued = false;
            for kind in ResourceKind::ALL {
                let value = resource_value(&period.usage, kind);
                if value <= Decimal::ZERO {
                    continue;
                }
                let queued_id = self.queue.enqueue_latest(MeterEvent {
                    event_name: kind.event_name().to_string(),
                    external_customer_id: customer_id.clone(),
                    value,
                    timestamp: None,
                    idempotency_key: Some(format!(
                        "sync:{}:{}",
                        period.key(),
                        kind.event_name()
                    )),
                })?;
                queued = queued || queued_id.is_some();
            }

            if queued {
                synced += 1;
            }
        }

        tracing::info!(accounts = synced, "Usage sync complete");
        Ok(synced)
    }

    /// Top up every account whose balance is below its configured
    /// threshold. Returns the number of accounts topped up; an overlapping
    /// run tops up nothing.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the account scan fails, or a ledger error
    /// from an individual top-up.
    pub async fn run_auto_top_ups(&self) -> Result<u64> {
        if self
            .top_up_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Auto-top-up scan already running, skipping");
            return Ok(0);
        }

        let result = self.run_auto_top_ups_inner().await;
        self.top_up_running.store(false, Ordering::SeqCst);
        result
    }

    /// Drop delivered jobs past the retention window. Returns the number
    /// pruned.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the prune scan fails.
    pub fn prune_delivered_jobs(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(DELIVERED_JOB_RETENTION_DAYS);
        let pruned = self.store.prune_delivered_jobs(cutoff)?;
        if pruned > 0 {
            tracing::info!(pruned, "Pruned delivered meter jobs");
        }
        Ok(pruned)
    }

    async fn run_auto_top_ups_inner(&self) -> Result<u64> {
        let mut topped_up = 0;

        for account in self.store.list_accounts()? {
            if !account.auto_top_up.as_ref().is_some_and(|c| c.enabled) {
                continue;
            }
            if self.ledger.apply_auto_top_up(account.id).await? {
                topped_up += 1;
            }
        }

        tracing::info!(accounts = topped_up, "Auto-top-up scan complete");
        Ok(topped_up)
    }
}

/// Handle to the background reconciliation schedule.
pub struct ReconcileScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReconcileScheduler {
    /// Run both reconciliation jobs every `interval` until shut down.
    #[must_use]
    pub fn spawn(reconciler: Reconciler, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would sync on boot; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }

                if let Err(e) = reconciler.sync_usage() {
                    tracing::error!(error = %e, "Usage sync failed");
                }
                if let Err(e) = reconciler.run_auto_top_ups().await {
                    tracing::error!(error = %e, "Auto-top-up scan failed");
                }
                if let Err(e) = reconciler.prune_delivered_jobs() {
                    tracing::error!(error = %e, "Meter job pruning failed");
                }
            }
        });

        Self { shutdown, handle }
    }

    /// Stop the schedule.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Reconcile scheduler task panicked");
        }
    }
}
