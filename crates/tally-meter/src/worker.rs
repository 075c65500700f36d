//! The rate-limited meter-event delivery worker.
//!
//! The worker drains due jobs from the store and delivers them through a
//! [`MeterProvider`], pacing submissions to stay under the provider's
//! request-rate ceiling and bounding in-flight deliveries with a
//! semaphore. Failed deliveries are retried with exponential backoff up
//! to a retry budget; exhausted or permanently rejected jobs are parked
//! as `failed` for operator visibility.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use tally_core::{JobStatus, MeterEventJob};
use tally_store::Store;

use crate::backoff::ExponentialBackoff;
use crate::provider::{MeterProvider, ProviderError};

/// Delivery pacing mode, matching the provider environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// Production provider: 100 events per second.
    Live,
    /// Sandbox provider: 10 events per second.
    Test,
}

impl ProviderMode {
    /// The provider's request-rate ceiling in events per second.
    #[must_use]
    pub const fn events_per_second(self) -> u32 {
        match self {
            Self::Live => 100,
            Self::Test => 10,
        }
    }
}

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pacing mode (provider environment).
    pub mode: ProviderMode,

    /// Delivery attempts before a job is parked as failed.
    pub max_attempts: u32,

    /// Backoff schedule between failed attempts.
    pub backoff: ExponentialBackoff,

    /// How long to sleep when no jobs are due.
    pub poll_interval: Duration,

    /// Hard ceiling on concurrent in-flight deliveries.
    pub concurrency_cap: usize,

    /// Maximum jobs fetched from the store per drain pass.
    pub fetch_batch: usize,
}

impl WorkerConfig {
    /// Config for the given pacing mode with default tuning.
    #[must_use]
    pub fn for_mode(mode: ProviderMode) -> Self {
        Self {
            mode,
            max_attempts: 5,
            backoff: ExponentialBackoff::default(),
            poll_interval: Duration::from_millis(100),
            concurrency_cap: 25,
            fetch_batch: 100,
        }
    }

    /// In-flight delivery bound: the per-second rate, capped.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        (self.mode.events_per_second() as usize).min(self.concurrency_cap)
    }
}

/// Handle to the running delivery worker.
///
/// Dropping the handle does not stop the worker; call
/// [`MeterWorker::shutdown`] to stop it and drain in-flight deliveries.
pub struct MeterWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MeterWorker {
    /// Start the worker over the given store and provider.
    ///
    /// Jobs left `active` by a previous process are requeued first, so a
    /// crash mid-delivery only delays the event rather than losing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the crash-recovery requeue fails.
    pub fn spawn(
        store: Arc<dyn Store>,
        provider: Arc<dyn MeterProvider>,
        config: WorkerConfig,
    ) -> tally_store::Result<Self> {
        let requeued = store.requeue_active_jobs(Utc::now())?;
        if requeued > 0 {
            tracing::warn!(requeued, "Requeued jobs left active by a previous run");
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(store, provider, config, shutdown_rx));

        Ok(Self { shutdown, handle })
    }

    /// Whether the worker task is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// A handle the health surface can poll for task liveness without
    /// owning the worker.
    #[must_use]
    pub fn liveness_handle(&self) -> tokio::task::AbortHandle {
        self.handle.abort_handle()
    }

    /// Stop the worker and wait for in-flight deliveries to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Meter worker task panicked");
        }
    }
}

/// The delivery loop.
async fn run(
    store: Arc<dyn Store>,
    provider: Arc<dyn MeterProvider>,
    config: WorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let concurrency = config.concurrency();
    let semaphore = Arc::new(Semaphore::new(concurrency));

    // One tick per allowed submission keeps us under the provider's
    // request-rate ceiling even when many jobs are due at once.
    let pace = Duration::from_secs_f64(1.0 / f64::from(config.mode.events_per_second()));
    let mut ticker = tokio::time::interval(pace);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        events_per_second = config.mode.events_per_second(),
        concurrency,
        "Meter worker started"
    );

    'outer: loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let due = match store.fetch_due_jobs(Utc::now(), config.fetch_batch) {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch due jobs");
                tokio::time::sleep(config.poll_interval).await;
                continue;
            }
        };

        if due.is_empty() {
            tokio::select! {
                () = tokio::time::sleep(config.poll_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
            continue;
        }

        for mut job in due {
            if *shutdown_rx.borrow() {
                break 'outer;
            }

            ticker.tick().await;

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break 'outer;
            };

            job.status = JobStatus::Active;
            job.updated_at = Utc::now();
            if let Err(e) = store.put_job(&job) {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job active");
                continue;
            }

            let store = Arc::clone(&store);
            let provider = Arc::clone(&provider);
            let max_attempts = config.max_attempts;
            let backoff = config.backoff.clone();
            tokio::spawn(async move {
                deliver_job(&store, provider.as_ref(), job, max_attempts, &backoff).await;
                drop(permit);
            });
        }
    }

    // Drain: wait for every in-flight delivery before returning.
    #[allow(clippy::cast_possible_truncation)]
    let _drained = semaphore.acquire_many(concurrency as u32).await;
    tracing::info!("Meter worker stopped");
}

/// Run one delivery attempt and persist the outcome.
async fn deliver_job(
    store: &Arc<dyn Store>,
    provider: &dyn MeterProvider,
    mut job: MeterEventJob,
    max_attempts: u32,
    backoff: &ExponentialBackoff,
) {
    // Fractional credit remainders are kept in the ledger, not billed.
    let value = job.value.floor().to_u64().unwrap_or(0);

    job.attempt += 1;
    let result = provider
        .submit_event(
            &job.event_name,
            &job.external_customer_id,
            value,
            job.timestamp,
            job.idempotency_key.as_deref(),
        )
        .await;

    let now = Utc::now();
    job.updated_at = now;

    match result {
        Ok(()) => {
            job.status = JobStatus::Completed;
            job.last_error = None;
            tracing::debug!(job_id = %job.id, event_name = %job.event_name, "Meter event delivered");
        }
        Err(ProviderError::IdempotencyConflict) => {
            // Already billed under this key, which is what delivery means.
            job.status = JobStatus::Completed;
            job.last_error = None;
            tracing::debug!(job_id = %job.id, "Meter event already delivered at provider");
        }
        Err(e) if e.is_retryable() && job.attempt < max_attempts => {
            let delay = backoff.delay_for(job.attempt);
            job.status = JobStatus::Waiting;
            job.next_attempt_at = now
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
            job.last_error = Some(e.to_string());
            tracing::debug!(
                job_id = %job.id,
                attempt = job.attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %e,
                "Meter event delivery failed, will retry"
            );
        }
        Err(e) => {
            job.status = JobStatus::Failed;
            job.last_error = Some(e.to_string());
            tracing::warn!(
                job_id = %job.id,
                event_name = %job.event_name,
                attempt = job.attempt,
                error = %e,
                "Meter event delivery failed permanently"
            );
        }
    }

    if let Err(e) = store.put_job(&job) {
        tracing::error!(job_id = %job.id, error = %e, "Failed to persist delivery outcome");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_mode_rates() {
        assert_eq!(ProviderMode::Live.events_per_second(), 100);
        assert_eq!(ProviderMode::Test.events_per_second(), 10);
    }

    #[test]
    fn concurrency_is_rate_capped() {
        let live = WorkerConfig::for_mode(ProviderMode::Live);
        assert_eq!(live.concurrency(), 25);

        let test = WorkerConfig::for_mode(ProviderMode::Test);
        assert_eq!(test.concurrency(), 10);
    }
}
