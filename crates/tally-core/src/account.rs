//! Account types for tally.
//!
//! This module defines the account structure including memberships,
//! the base-plan/carry-over credit decomposition, and auto-top-up settings.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::AccountId;

// ============================================================================
// Constants
// ============================================================================

/// Protected floor a balance may never be deducted below.
pub const MINIMUM_BALANCE: Decimal = dec!(0.5);

/// Standard plan monthly credit allowance.
pub const STANDARD_PLAN_MONTHLY_CREDITS: Decimal = dec!(2500);

/// Pro plan monthly credit allowance.
pub const PRO_PLAN_MONTHLY_CREDITS: Decimal = dec!(6000);

/// Default auto-top-up trigger threshold.
pub const DEFAULT_TOP_UP_THRESHOLD: Decimal = dec!(50);

/// Default auto-top-up amount.
pub const DEFAULT_TOP_UP_CREDITS: Decimal = dec!(250);

/// Default cap on auto-top-ups per calendar month.
pub const DEFAULT_MAX_MONTHLY_TOP_UPS: u32 = 5;

/// A credit account.
///
/// `balance` is the authoritative spendable amount. The base-plan and
/// carry-over fields decompose it purely to decide deduction order; every
/// mutation modeled by the ledger keeps `balance == base_plan_credits +
/// carry_over_credits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// The account ID.
    pub id: AccountId,

    /// Current spendable credit balance.
    pub balance: Decimal,

    /// Credits granted by the active plan for the current cycle.
    pub base_plan_credits: Decimal,

    /// Unused credits carried over from a prior cycle.
    pub carry_over_credits: Decimal,

    /// When the carry-over credits expire, if any are held.
    pub carry_over_expires_at: Option<DateTime<Utc>>,

    /// Current membership, if any.
    pub membership: Option<Membership>,

    /// When the monthly plan credits were last allocated.
    pub last_credit_reset: DateTime<Utc>,

    /// Credits consumed in the current calendar month.
    pub monthly_credits_used: Decimal,

    /// Credits consumed over the lifetime of the account.
    pub lifetime_credits_used: Decimal,

    /// Auto-top-up configuration, if set.
    pub auto_top_up: Option<AutoTopUpConfig>,

    /// Auto-top-ups performed in the current calendar month.
    pub top_ups_this_month: u32,

    /// Customer id at the external metering provider.
    pub external_customer_id: Option<String>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance.
    #[must_use]
    pub fn new(id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: Decimal::ZERO,
            base_plan_credits: Decimal::ZERO,
            carry_over_credits: Decimal::ZERO,
            carry_over_expires_at: None,
            membership: None,
            last_credit_reset: now,
            monthly_credits_used: Decimal::ZERO,
            lifetime_credits_used: Decimal::ZERO,
            auto_top_up: None,
            top_ups_this_month: 0,
            external_customer_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Get the current tier (Free if no membership).
    #[must_use]
    pub fn current_tier(&self) -> MembershipTier {
        self.membership
            .as_ref()
            .map_or(MembershipTier::Free, |m| m.tier)
    }

    /// Check whether the account has an active membership.
    #[must_use]
    pub fn has_active_membership(&self) -> bool {
        self.membership
            .as_ref()
            .is_some_and(|m| m.status == MembershipStatus::Active)
    }

    /// Check whether held carry-over credits are past their expiry at `now`.
    #[must_use]
    pub fn carry_over_expired(&self, now: DateTime<Utc>) -> bool {
        self.carry_over_credits > Decimal::ZERO
            && self
                .carry_over_expires_at
                .is_some_and(|expires| expires < now)
    }

    /// Check whether the monthly allocation is due at `now`.
    ///
    /// True when `now` falls in a different (year, month) than the last
    /// reset and the membership is currently active.
    #[must_use]
    pub fn monthly_allocation_due(&self, now: DateTime<Utc>) -> bool {
        self.has_active_membership()
            && (now.year(), now.month())
                != (self.last_credit_reset.year(), self.last_credit_reset.month())
    }
}

/// A membership on a billing plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    /// The membership tier.
    pub tier: MembershipTier,

    /// Current status of the membership.
    pub status: MembershipStatus,

    /// End of the current billing period.
    pub current_period_end: DateTime<Utc>,

    /// When the membership was created.
    pub created_at: DateTime<Utc>,
}

/// Available membership tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipTier {
    /// Free tier: no monthly credits, pay-as-you-go only.
    Free,

    /// Standard tier.
    Standard,

    /// Pro tier.
    Pro,
}

impl MembershipTier {
    /// Get the monthly credit allowance for this tier.
    #[must_use]
    pub const fn monthly_credits(&self) -> Decimal {
        match self {
            Self::Free => Decimal::ZERO,
            Self::Standard => STANDARD_PLAN_MONTHLY_CREDITS,
            Self::Pro => PRO_PLAN_MONTHLY_CREDITS,
        }
    }

    /// Get the tier name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Standard => "standard",
            Self::Pro => "pro",
        }
    }
}

/// Status of a membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    /// Membership is active.
    Active,

    /// Membership was cancelled (still active until period end).
    Cancelled,

    /// Payment failed, membership is past due.
    PastDue,
}

/// Auto-top-up configuration.
///
/// When enabled, the scheduled reconciliation job purchases `top_up_credits`
/// whenever the balance drops below `threshold_credits`, at most
/// `max_monthly_top_ups` times per calendar month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTopUpConfig {
    /// Whether auto-top-up is enabled.
    pub enabled: bool,

    /// Trigger a top-up when the balance drops below this amount.
    pub threshold_credits: Decimal,

    /// Amount of credits to add per top-up.
    pub top_up_credits: Decimal,

    /// Payment method to charge.
    pub payment_method_id: String,

    /// Cap on top-ups per calendar month, guarding against a balance
    /// oscillating around the threshold.
    pub max_monthly_top_ups: u32,
}

impl AutoTopUpConfig {
    /// Create a config with default threshold, amount, and monthly cap.
    #[must_use]
    pub fn new(payment_method_id: String) -> Self {
        Self {
            enabled: true,
            threshold_credits: DEFAULT_TOP_UP_THRESHOLD,
            top_up_credits: DEFAULT_TOP_UP_CREDITS,
            payment_method_id,
            max_monthly_top_ups: DEFAULT_MAX_MONTHLY_TOP_UPS,
        }
    }
}
