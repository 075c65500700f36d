//! Durable meter-event queue.
//!
//! Enqueued events are persisted before the call returns, so a crash
//! between enqueue and delivery loses nothing. Events carrying an
//! idempotency key are stored under that key: re-enqueuing the same key
//! updates the pending job instead of creating a second one, and a key
//! whose job already completed is left alone.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use tally_core::{JobId, JobStatus, MeterEventJob, QueueDepths};
use tally_store::{Result, Store};

/// One meter event submitted for delivery.
#[derive(Debug, Clone)]
pub struct MeterEvent {
    /// Meter event name at the provider.
    pub event_name: String,

    /// Customer id at the provider.
    pub external_customer_id: String,

    /// Measured value; floored to integer units at delivery.
    pub value: Decimal,

    /// Measurement timestamp, if the caller pins one.
    pub timestamp: Option<DateTime<Utc>>,

    /// Caller-supplied idempotency key.
    pub idempotency_key: Option<String>,
}

/// The durable meter-event queue.
///
/// Multi-producer by construction: any number of request handlers may hold
/// a clone and enqueue concurrently; the worker drains.
#[derive(Clone)]
pub struct MeterQueue {
    store: Arc<dyn Store>,
}

impl MeterQueue {
    /// Create a queue over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The backing store (shared with the worker).
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Enqueue one meter event.
    ///
    /// Returns the job id, or `None` for a non-positive value (logged
    /// no-op). With an idempotency key, a repeat enqueue updates the
    /// existing job's value rather than duplicating it; a key whose job
    /// already completed keeps its terminal state so the event is billed
    /// at most once.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be persisted.
    pub fn enqueue(&self, event: MeterEvent) -> Result<Option<JobId>> {
        if event.value <= Decimal::ZERO {
            tracing::debug!(
                event_name = %event.event_name,
                value = %event.value,
                "Skipping non-positive meter event"
            );
            return Ok(None);
        }

        if let Some(key) = &event.idempotency_key {
            if let Some(mut existing) = self.store.get_job(key)? {
                match existing.status {
                    JobStatus::Completed => {
                        tracing::debug!(
                            idempotency_key = %key,
                            "Meter event already delivered, dropping re-enqueue"
                        );
                        return Ok(Some(existing.id));
                    }
                    JobStatus::Failed => {
                        // A re-enqueue of an exhausted job is a fresh
                        // submission: reset the retry budget.
                        existing.attempt = 0;
                        existing.status = JobStatus::Waiting;
                        existing.next_attempt_at = Utc::now();
                        existing.last_error = None;
                    }
                    JobStatus::Waiting | JobStatus::Active => {}
                }
                existing.value = event.value;
                existing.timestamp = event.timestamp;
                existing.updated_at = Utc::now();
                self.store.put_job(&existing)?;
                return Ok(Some(existing.id));
            }
        }

        let job = MeterEventJob::new(
            event.event_name,
            event.external_customer_id,
            event.value,
            event.timestamp,
            event.idempotency_key,
        );
        self.store.put_job(&job)?;

        tracing::debug!(
            job_id = %job.id,
            event_name = %job.event_name,
            value = %job.value,
            "Meter event enqueued"
        );

        Ok(Some(job.id))
    }

    /// Enqueue one meter event under last-value-wins semantics.
    ///
    /// Like [`enqueue`](Self::enqueue), but a keyed job that already
    /// delivered is re-armed with the new value instead of being dropped:
    /// the caller is re-submitting a cumulative measurement, and the
    /// provider keeps only the latest one. Each (key) therefore occupies
    /// exactly one job row no matter how many times it is re-submitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be persisted.
    pub fn enqueue_latest(&self, event: MeterEvent) -> Result<Option<JobId>> {
        if event.value <= Decimal::ZERO {
            tracing::debug!(
                event_name = %event.event_name,
                value = %event.value,
                "Skipping non-positive meter event"
            );
            return Ok(None);
        }

        if let Some(key) = &event.idempotency_key {
            if let Some(mut existing) = self.store.get_job(key)? {
                if existing.status != JobStatus::Active {
                    existing.attempt = 0;
                    existing.status = JobStatus::Waiting;
                    existing.next_attempt_at = Utc::now();
                    existing.last_error = None;
                }
                existing.value = event.value;
                existing.timestamp = event.timestamp;
                existing.updated_at = Utc::now();
                self.store.put_job(&existing)?;
                return Ok(Some(existing.id));
            }
        }

        self.enqueue(event)
    }

    /// Enqueue a batch of meter events with the same per-event semantics.
    ///
    /// Returns the job ids of the events actually enqueued (non-positive
    /// values are skipped).
    ///
    /// # Errors
    ///
    /// Returns the first persistence error; earlier events in the batch
    /// remain enqueued.
    pub fn enqueue_batch(&self, events: Vec<MeterEvent>) -> Result<Vec<JobId>> {
        let mut job_ids = Vec::with_capacity(events.len());
        for event in events {
            if let Some(id) = self.enqueue(event)? {
                job_ids.push(id);
            }
        }
        Ok(job_ids)
    }

    /// Queue depth counts for the health surface.
    ///
    /// # Errors
    ///
    /// Returns an error if the store scan fails.
    pub fn depths(&self) -> Result<QueueDepths> {
        self.store.queue_depths(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tally_store::RocksStore;
    use tempfile::TempDir;

    fn create_queue() -> (MeterQueue, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        (MeterQueue::new(store), dir)
    }

    fn event(value: Decimal, key: Option<&str>) -> MeterEvent {
        MeterEvent {
            event_name: "compute_credits".into(),
            external_customer_id: "cus_1".into(),
            value,
            timestamp: None,
            idempotency_key: key.map(String::from),
        }
    }

    #[test]
    fn non_positive_value_is_a_no_op() {
        let (queue, _dir) = create_queue();
        assert!(queue.enqueue(event(dec!(0), None)).unwrap().is_none());
        assert!(queue.enqueue(event(dec!(-3), None)).unwrap().is_none());
        assert_eq!(queue.depths().unwrap(), QueueDepths::default());
    }

    #[test]
    fn idempotency_key_dedupes() {
        let (queue, _dir) = create_queue();

        let first = queue
            .enqueue(event(dec!(5), Some("p1:compute")))
            .unwrap()
            .unwrap();
        let second = queue
            .enqueue(event(dec!(9), Some("p1:compute")))
            .unwrap()
            .unwrap();

        assert_eq!(first, second);

        let job = queue.store().get_job("p1:compute").unwrap().unwrap();
        assert_eq!(job.value, dec!(9));

        let depths = queue.depths().unwrap();
        assert_eq!(depths.waiting, 1);
    }

    #[test]
    fn completed_job_not_resurrected_by_re_enqueue() {
        let (queue, _dir) = create_queue();
        queue.enqueue(event(dec!(5), Some("p1:egress"))).unwrap();

        let mut job = queue.store().get_job("p1:egress").unwrap().unwrap();
        job.status = JobStatus::Completed;
        queue.store().put_job(&job).unwrap();

        queue.enqueue(event(dec!(7), Some("p1:egress"))).unwrap();

        let job = queue.store().get_job("p1:egress").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.value, dec!(5));
    }

    #[test]
    fn latest_value_enqueue_re_arms_delivered_job() {
        let (queue, _dir) = create_queue();
        queue
            .enqueue_latest(event(dec!(40), Some("sync:a:202408:compute")))
            .unwrap();

        let mut job = queue
            .store()
            .get_job("sync:a:202408:compute")
            .unwrap()
            .unwrap();
        job.status = JobStatus::Completed;
        queue.store().put_job(&job).unwrap();

        // The next cumulative submission re-arms the same row.
        queue
            .enqueue_latest(event(dec!(55), Some("sync:a:202408:compute")))
            .unwrap();

        let job = queue
            .store()
            .get_job("sync:a:202408:compute")
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.value, dec!(55));
        assert_eq!(job.attempt, 0);

        let depths = queue.depths().unwrap();
        assert_eq!(depths.waiting, 1);
        assert_eq!(depths.completed, 0);
    }

    #[test]
    fn failed_job_re_enqueue_resets_retry_budget() {
        let (queue, _dir) = create_queue();
        queue.enqueue(event(dec!(5), Some("p1:storage"))).unwrap();

        let mut job = queue.store().get_job("p1:storage").unwrap().unwrap();
        job.status = JobStatus::Failed;
        job.attempt = 5;
        job.last_error = Some("rate limited".into());
        queue.store().put_job(&job).unwrap();

        queue.enqueue(event(dec!(6), Some("p1:storage"))).unwrap();

        let job = queue.store().get_job("p1:storage").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempt, 0);
        assert!(job.last_error.is_none());
        assert_eq!(job.value, dec!(6));
    }

    #[test]
    fn batch_skips_non_positive_and_keeps_rest() {
        let (queue, _dir) = create_queue();
        let ids = queue
            .enqueue_batch(vec![
                event(dec!(1), Some("a")),
                event(dec!(0), Some("b")),
                event(dec!(2), Some("c")),
            ])
            .unwrap();

        assert_eq!(ids.len(), 2);
        let depths = queue.depths().unwrap();
        assert_eq!(depths.waiting, 2);
    }
}
