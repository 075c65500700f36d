//! Durable meter-event job types.
//!
//! A [`MeterEventJob`] is one usage measurement owed to the external
//! metering provider. Jobs are created by the queue, delivered by the
//! worker, and terminal on success or exhausted retries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::JobId;

/// A durable meter-event delivery job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterEventJob {
    /// Unique job ID (ULID for time-ordering).
    pub id: JobId,

    /// Meter event name at the provider.
    pub event_name: String,

    /// Customer id at the provider.
    pub external_customer_id: String,

    /// Measured value. Stored unrounded; floored to integer units at
    /// delivery.
    pub value: Decimal,

    /// Measurement timestamp forwarded to the provider, if any.
    pub timestamp: Option<DateTime<Utc>>,

    /// Caller-supplied idempotency key. When present it is also the
    /// storage key, so re-enqueues update rather than duplicate.
    pub idempotency_key: Option<String>,

    /// Delivery attempts made so far.
    pub attempt: u32,

    /// Current lifecycle status.
    pub status: JobStatus,

    /// Earliest time the next delivery attempt may run.
    pub next_attempt_at: DateTime<Utc>,

    /// Message from the most recent failed attempt, if any.
    pub last_error: Option<String>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl MeterEventJob {
    /// Create a new waiting job, eligible to run immediately.
    #[must_use]
    pub fn new(
        event_name: String,
        external_customer_id: String,
        value: Decimal,
        timestamp: Option<DateTime<Utc>>,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            event_name,
            external_customer_id,
            value,
            timestamp,
            idempotency_key,
            attempt: 0,
            status: JobStatus::Waiting,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The storage key for this job: the idempotency key when supplied,
    /// otherwise the job id.
    #[must_use]
    pub fn storage_key(&self) -> String {
        self.idempotency_key
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Check whether the job is due for delivery at `now`.
    #[must_use]
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Waiting && self.next_attempt_at <= now
    }
}

/// Lifecycle status of a meter-event job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, awaiting delivery (possibly delayed by backoff).
    Waiting,
    /// A delivery attempt is in flight.
    Active,
    /// Delivered (or confirmed already delivered by the provider).
    Completed,
    /// Retries exhausted; surfaced for operator visibility.
    Failed,
}

/// Queue depth counts, exposed on the health surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    /// Jobs eligible to run now.
    pub waiting: u64,
    /// Jobs with an in-flight delivery attempt.
    pub active: u64,
    /// Waiting jobs held back by backoff.
    pub delayed: u64,
    /// Jobs delivered successfully.
    pub completed: u64,
    /// Jobs that exhausted their retries.
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn storage_key_prefers_idempotency_key() {
        let keyed = MeterEventJob::new(
            "compute_credits".into(),
            "cus_1".into(),
            dec!(7),
            None,
            Some("202407:compute_credits".into()),
        );
        assert_eq!(keyed.storage_key(), "202407:compute_credits");

        let unkeyed =
            MeterEventJob::new("compute_credits".into(), "cus_1".into(), dec!(7), None, None);
        assert_eq!(unkeyed.storage_key(), unkeyed.id.to_string());
    }

    #[test]
    fn due_respects_backoff_delay() {
        let mut job =
            MeterEventJob::new("egress_credits".into(), "cus_2".into(), dec!(3), None, None);
        let now = Utc::now();
        assert!(job.due(now));

        job.next_attempt_at = now + chrono::Duration::seconds(30);
        assert!(!job.due(now));

        job.next_attempt_at = now;
        job.status = JobStatus::Completed;
        assert!(!job.due(now));
    }
}
