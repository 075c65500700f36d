//! Usage-to-credit conversion.
//!
//! A fixed rate table prices each resource type. Compute time is first
//! normalized to GB-hours using an assumed per-instance memory size, then
//! priced per GB-hour.
//!
//! Two views of the same metrics exist on purpose: [`raw_credits`] is the
//! unrounded sum used for continuous internal accumulation, while
//! [`billable_credits`] rounds up at the moment of external reporting so
//! fractional usage is never under-billed.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::usage::ResourceUsage;

/// Memory assumed per compute instance when normalizing compute-ms to
/// GB-hours.
pub const ASSUMED_MEMORY_GB: Decimal = dec!(0.5);

/// Credits per one million invocations.
pub const INVOCATION_CREDITS_PER_MILLION: Decimal = dec!(20);

/// Credits per compute GB-hour.
pub const COMPUTE_CREDITS_PER_GB_HOUR: Decimal = dec!(8);

/// Credits per GB of egress.
pub const EGRESS_CREDITS_PER_GB: Decimal = dec!(12);

/// Credits per GB-hour of storage.
pub const STORAGE_CREDITS_PER_GB_HOUR: Decimal = dec!(0.5);

const MILLION: Decimal = dec!(1000000);
const MS_PER_HOUR: Decimal = dec!(3600000);
const BYTES_PER_GB: Decimal = dec!(1073741824);

/// Per-resource credit contributions for a set of metrics.
///
/// Contributions are unrounded; their sum equals [`raw_credits`], so the
/// rounded-up sum equals [`billable_credits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostBreakdown {
    /// Credits for invocations.
    pub invocations: Decimal,
    /// Credits for compute GB-hours.
    pub compute: Decimal,
    /// Credits for egress.
    pub egress: Decimal,
    /// Credits for storage.
    pub storage: Decimal,
}

impl CostBreakdown {
    /// Sum of the per-resource contributions.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.invocations + self.compute + self.egress + self.storage
    }
}

/// Per-resource credit contributions for `usage`.
#[must_use]
pub fn breakdown(usage: &ResourceUsage) -> CostBreakdown {
    let compute_gb_hours =
        Decimal::from(usage.compute_ms) / MS_PER_HOUR * ASSUMED_MEMORY_GB;

    CostBreakdown {
        invocations: Decimal::from(usage.invocations) / MILLION * INVOCATION_CREDITS_PER_MILLION,
        compute: compute_gb_hours * COMPUTE_CREDITS_PER_GB_HOUR,
        egress: Decimal::from(usage.egress_bytes) / BYTES_PER_GB * EGRESS_CREDITS_PER_GB,
        storage: Decimal::from(usage.storage_byte_hours) / BYTES_PER_GB
            * STORAGE_CREDITS_PER_GB_HOUR,
    }
}

/// Unrounded credit cost of `usage`, for continuous internal accumulation.
#[must_use]
pub fn raw_credits(usage: &ResourceUsage) -> Decimal {
    breakdown(usage).total()
}

/// Credit cost of `usage` as billed externally.
///
/// Rounds up to a whole credit; any nonzero usage below one credit bills as
/// exactly one credit.
#[must_use]
pub fn billable_credits(usage: &ResourceUsage) -> Decimal {
    let raw = raw_credits(usage);
    if raw > Decimal::ZERO && raw < Decimal::ONE {
        Decimal::ONE
    } else {
        raw.ceil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_usage_costs_nothing() {
        let usage = ResourceUsage::default();
        assert_eq!(raw_credits(&usage), Decimal::ZERO);
        assert_eq!(billable_credits(&usage), Decimal::ZERO);
    }

    #[test]
    fn compute_normalizes_to_gb_hours() {
        // One full hour of compute at the assumed 0.5 GB = 0.5 GB-hours
        // = 4 credits at 8 credits/GB-hour.
        let usage = ResourceUsage {
            compute_ms: 3_600_000,
            ..ResourceUsage::default()
        };
        assert_eq!(raw_credits(&usage), dec!(4));
        assert_eq!(billable_credits(&usage), dec!(4));
    }

    #[test]
    fn invocations_price_per_million() {
        let usage = ResourceUsage {
            invocations: 2_000_000,
            ..ResourceUsage::default()
        };
        assert_eq!(raw_credits(&usage), dec!(40));
    }

    #[test]
    fn fractional_usage_bills_one_credit() {
        // 10k invocations = 0.2 raw credits; billed as exactly 1.
        let usage = ResourceUsage {
            invocations: 10_000,
            ..ResourceUsage::default()
        };
        assert_eq!(raw_credits(&usage), dec!(0.2));
        assert_eq!(billable_credits(&usage), Decimal::ONE);
    }

    #[test]
    fn billable_rounds_up() {
        // 1 GB egress + 10k invocations = 12.2 raw credits -> 13 billed.
        let usage = ResourceUsage {
            invocations: 10_000,
            egress_bytes: 1_073_741_824,
            ..ResourceUsage::default()
        };
        assert_eq!(raw_credits(&usage), dec!(12.2));
        assert_eq!(billable_credits(&usage), dec!(13));
    }

    #[test]
    fn breakdown_sum_matches_billable_after_rounding() {
        let usage = ResourceUsage {
            invocations: 123_456,
            compute_ms: 7_654_321,
            egress_bytes: 2_147_483_648,
            storage_byte_hours: 5_368_709_120,
        };
        let parts = breakdown(&usage);
        assert_eq!(parts.total(), raw_credits(&usage));

        let rounded_sum = parts.total().ceil();
        assert_eq!(rounded_sum, billable_credits(&usage));
    }

    #[test]
    fn whole_credit_usage_not_inflated() {
        // Exactly 1 GB egress = exactly 12 credits; no extra rounding.
        let usage = ResourceUsage {
            egress_bytes: 1_073_741_824,
            ..ResourceUsage::default()
        };
        assert_eq!(billable_credits(&usage), dec!(12));
    }
}
