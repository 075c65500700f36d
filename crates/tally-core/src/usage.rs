//! Usage period types for tally.
//!
//! A [`UsagePeriod`] holds the raw per-resource counters for one account
//! and one billing cycle, plus the computed credit costs and the reporting
//! state machine.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Raw per-resource usage counters.
///
/// Counters accumulate continuously; conversion to credits happens in
/// [`crate::rates`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Number of app invocations (requests served).
    pub invocations: u64,

    /// Compute time consumed, in milliseconds.
    pub compute_ms: u64,

    /// Network egress, in bytes.
    pub egress_bytes: u64,

    /// Storage held, in byte-hours.
    pub storage_byte_hours: u64,
}

impl ResourceUsage {
    /// Check whether all counters are zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.invocations == 0
            && self.compute_ms == 0
            && self.egress_bytes == 0
            && self.storage_byte_hours == 0
    }

    /// Accumulate another sample into this one (saturating).
    pub fn accumulate(&mut self, other: &Self) {
        self.invocations = self.invocations.saturating_add(other.invocations);
        self.compute_ms = self.compute_ms.saturating_add(other.compute_ms);
        self.egress_bytes = self.egress_bytes.saturating_add(other.egress_bytes);
        self.storage_byte_hours = self
            .storage_byte_hours
            .saturating_add(other.storage_byte_hours);
    }
}

/// The resource types priced by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// App invocations.
    Invocations,
    /// Compute time (normalized to GB-hours).
    Compute,
    /// Network egress.
    Egress,
    /// Storage.
    Storage,
}

impl ResourceKind {
    /// All resource kinds, in reporting order.
    pub const ALL: [Self; 4] = [Self::Invocations, Self::Compute, Self::Egress, Self::Storage];

    /// The meter event name used when reporting this resource.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Invocations => "app_invocations",
            Self::Compute => "compute_credits",
            Self::Egress => "egress_credits",
            Self::Storage => "storage_credits",
        }
    }
}

/// Reporting state of a usage period.
///
/// `Billed` and `Paid` are driven by the external provider's invoicing
/// lifecycle, not by this pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    /// Raw counters accumulating; costs not yet computed.
    Pending,
    /// Per-resource costs computed for the period.
    Calculated,
    /// Meter events enqueued to the external provider.
    Reported,
    /// Invoiced by the provider.
    Billed,
    /// Invoice settled.
    Paid,
}

impl PeriodStatus {
    /// Check whether usage for this period has already been reported.
    #[must_use]
    pub fn reported(&self) -> bool {
        *self >= Self::Reported
    }
}

/// Usage for one account and one billing cycle.
///
/// Created on first touch of the cycle; mutated by accumulation and
/// reporting; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsagePeriod {
    /// The account the period belongs to.
    pub account_id: AccountId,

    /// Inclusive start of the cycle.
    pub period_start: DateTime<Utc>,

    /// Exclusive end of the cycle.
    pub period_end: DateTime<Utc>,

    /// Raw resource counters.
    pub usage: ResourceUsage,

    /// Per-resource credit costs, set when the period is calculated.
    pub invocation_cost: Decimal,
    /// Compute credit cost.
    pub compute_cost: Decimal,
    /// Egress credit cost.
    pub egress_cost: Decimal,
    /// Storage credit cost.
    pub storage_cost: Decimal,

    /// Total credit cost for the period.
    pub total_cost: Decimal,

    /// Reporting state.
    pub status: PeriodStatus,

    /// When the period row was created.
    pub created_at: DateTime<Utc>,

    /// When the period row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl UsagePeriod {
    /// Create an empty pending period covering the cycle containing `now`.
    #[must_use]
    pub fn open(account_id: AccountId, now: DateTime<Utc>) -> Self {
        let (period_start, period_end) = period_bounds(now);
        Self {
            account_id,
            period_start,
            period_end,
            usage: ResourceUsage::default(),
            invocation_cost: Decimal::ZERO,
            compute_cost: Decimal::ZERO,
            egress_cost: Decimal::ZERO,
            storage_cost: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            status: PeriodStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// The stable key of this period, shared with idempotency keys.
    #[must_use]
    pub fn key(&self) -> String {
        period_key(&self.account_id, self.period_start)
    }
}

/// The calendar-month bounds of the billing cycle containing `at`.
///
/// # Panics
///
/// Never panics for valid `DateTime<Utc>` inputs; month arithmetic stays
/// within chrono's representable range.
#[must_use]
pub fn period_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc
        .with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
        .unwrap();
    let (end_year, end_month) = if at.month() == 12 {
        (at.year() + 1, 1)
    } else {
        (at.year(), at.month() + 1)
    };
    let end = Utc.with_ymd_and_hms(end_year, end_month, 1, 0, 0, 0).unwrap();
    (start, end)
}

/// Deterministic key for the period of `account_id` starting at `period_start`.
#[must_use]
pub fn period_key(account_id: &AccountId, period_start: DateTime<Utc>) -> String {
    format!(
        "{account_id}:{:04}{:02}",
        period_start.year(),
        period_start.month()
    )
}
