//! The usage reporting pipeline.
//!
//! Raw resource counters accumulate into the open [`UsagePeriod`] as work
//! happens; at reporting time the period is priced and one meter event per
//! resource type is enqueued for delivery. Reporting is idempotent at two
//! levels: an already-reported period is skipped outright, and each event
//! carries a deterministic `(period, event)` idempotency key so even a
//! partially-reported period never double-bills.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;

use tally_core::{
    billable_credits, breakdown, AccountId, LedgerError, PeriodStatus, ResourceKind,
    ResourceUsage, Result, UsagePeriod,
};
use tally_meter::{MeterEvent, MeterQueue};
use tally_store::Store;

/// Outcome of a [`UsagePipeline::report_usage`] call.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReportOutcome {
    /// Meter events enqueued by this call.
    pub queued: usize,

    /// True when the period was already reported and nothing was enqueued.
    pub skipped: bool,
}

/// The usage reporting pipeline.
///
/// Period mutations for one account are serialized through a per-account
/// lock, so concurrent samples accumulate instead of overwriting each
/// other's read-modify-write.
#[derive(Clone)]
pub struct UsagePipeline {
    store: Arc<dyn Store>,
    queue: MeterQueue,
    locks: Arc<Mutex<HashMap<AccountId, Arc<Mutex<()>>>>>,
}

impl UsagePipeline {
    /// Create a pipeline over the given store and queue.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, queue: MeterQueue) -> Self {
        Self {
            store,
            queue,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The lock serializing period mutations for one account.
    fn period_lock(&self, account_id: AccountId) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(account_id).or_default())
    }

    /// Accumulate a usage sample into the account's open billing period,
    /// creating the period row on first touch of the cycle.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AccountNotFound`] for an unknown account, or
    /// a storage error.
    pub fn record_usage(
        &self,
        account_id: AccountId,
        sample: &ResourceUsage,
    ) -> Result<UsagePeriod> {
        if self.store.get_account(&account_id)?.is_none() {
            return Err(LedgerError::AccountNotFound {
                account_id: account_id.to_string(),
            });
        }

        let lock = self.period_lock(account_id);
        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Utc::now();
        let (period_start, _) = tally_core::period_bounds(now);
        let mut period = self
            .store
            .get_period(&account_id, period_start)?
            .unwrap_or_else(|| UsagePeriod::open(account_id, now));

        period.usage.accumulate(sample);
        period.updated_at = now;
        self.store.put_period(&period)?;

        tracing::debug!(
            account_id = %account_id,
            period = %period.key(),
            invocations = period.usage.invocations,
            compute_ms = period.usage.compute_ms,
            "Usage recorded"
        );

        Ok(period)
    }

    /// Price the account's current period and enqueue its meter events.
    ///
    /// A period that is already reported (or further along) is skipped and
    /// nothing is enqueued; repeated calls for the same period queue events
    /// exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AccountNotFound`] for an unknown account, or
    /// a storage error.
    pub fn report_usage(&self, account_id: AccountId) -> Result<ReportOutcome> {
        let account = self
            .store
            .get_account(&account_id)?
            .ok_or_else(|| LedgerError::AccountNotFound {
                account_id: account_id.to_string(),
            })?;

        let lock = self.period_lock(account_id);
        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Utc::now();
        let (period_start, _) = tally_core::period_bounds(now);
        let Some(mut period) = self.store.get_period(&account_id, period_start)? else {
            return Ok(ReportOutcome {
                queued: 0,
                skipped: true,
            });
        };

        if period.status.reported() {
            tracing::debug!(
                account_id = %account_id,
                period = %period.key(),
                status = ?period.status,
                "Period already reported, skipping"
            );
            return Ok(ReportOutcome {
                queued: 0,
                skipped: true,
            });
        }

        // Price the period.
        let parts = breakdown(&period.usage);
        period.invocation_cost = parts.invocations;
        period.compute_cost = parts.compute;
        period.egress_cost = parts.egress;
        period.storage_cost = parts.storage;
        period.total_cost = parts.total();
        period.status = PeriodStatus::Calculated;
        period.updated_at = now;
        self.store.put_period(&period)?;

        let customer_id = account
            .external_customer_id
            .clone()
            .unwrap_or_else(|| account_id.to_string());

        let events = period_events(&period, &customer_id);
        let queued = self.queue.enqueue_batch(events)?.len();

        period.status = PeriodStatus::Reported;
        period.updated_at = Utc::now();
        self.store.put_period(&period)?;

        tracing::info!(
            account_id = %account_id,
            period = %period.key(),
            queued,
            total_cost = %period.total_cost,
            "Usage reported"
        );

        Ok(ReportOutcome {
            queued,
            skipped: false,
        })
    }
}

/// Build the per-resource meter events for a period.
///
/// Invocations are metered as a raw count; the other resources are metered
/// in whole billable credits. Each event's idempotency key is derived from
/// the period key and event name, so re-enqueues dedupe.
pub(crate) fn period_events(period: &UsagePeriod, customer_id: &str) -> Vec<MeterEvent> {
    ResourceKind::ALL
        .iter()
        .filter_map(|kind| {
            let value = resource_value(&period.usage, *kind);
            if value <= Decimal::ZERO {
                return None;
            }
            Some(MeterEvent {
                event_name: kind.event_name().to_string(),
                external_customer_id: customer_id.to_string(),
                value,
                timestamp: None,
                idempotency_key: Some(format!("{}:{}", period.key(), kind.event_name())),
            })
        })
        .collect()
}

/// The meter value for one resource of a usage set.
pub(crate) fn resource_value(usage: &ResourceUsage, kind: ResourceKind) -> Decimal {
    match kind {
        ResourceKind::Invocations => Decimal::from(usage.invocations),
        ResourceKind::Compute => billable_credits(&ResourceUsage {
            compute_ms: usage.compute_ms,
            ..ResourceUsage::default()
        }),
        ResourceKind::Egress => billable_credits(&ResourceUsage {
            egress_bytes: usage.egress_bytes,
            ..ResourceUsage::default()
        }),
        ResourceKind::Storage => billable_credits(&ResourceUsage {
            storage_byte_hours: usage.storage_byte_hours,
            ..ResourceUsage::default()
        }),
    }
}
