//! Credit transaction and grant types for tally.
//!
//! Every change to an account's balance appends exactly one
//! [`CreditTransaction`]. The transaction payload is a tagged union with one
//! concrete shape per transaction kind, so the carry-over/base-plan split a
//! deduction consumed is recorded in a typed field rather than a loose JSON
//! bag.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, GrantId, TransactionId};

/// A credit transaction representing a balance change.
///
/// Transactions are immutable and append-only; ULID ids keep them
/// time-ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The account whose balance was affected.
    pub account_id: AccountId,

    /// Signed amount. Positive = credit, negative = debit.
    pub amount: Decimal,

    /// Balance after this transaction.
    pub balance_after: Decimal,

    /// Human-readable description.
    pub description: String,

    /// Typed per-kind payload.
    pub detail: TransactionDetail,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Create a usage deduction transaction.
    ///
    /// `amount` is the positive deducted quantity; the stored amount is
    /// always negative. The carry-over/base-plan split consumed is recorded
    /// in the detail, along with the caller-supplied deduction source.
    #[must_use]
    pub fn usage(
        account_id: AccountId,
        amount: Decimal,
        balance_after: Decimal,
        description: String,
        carry_over_spent: Decimal,
        base_plan_spent: Decimal,
        source: Option<String>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            amount: -amount.abs(),
            balance_after,
            description,
            detail: TransactionDetail::Usage {
                carry_over_spent,
                base_plan_spent,
                source,
            },
            created_at: Utc::now(),
        }
    }

    /// Create a monthly plan allocation transaction.
    #[must_use]
    pub fn monthly_allocation(
        account_id: AccountId,
        amount: Decimal,
        balance_after: Decimal,
        tier: &str,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            amount,
            balance_after,
            description: format!("Monthly {tier} plan credit allocation"),
            detail: TransactionDetail::MonthlyAllocation {
                tier: tier.to_string(),
            },
            created_at: Utc::now(),
        }
    }

    /// Create a carry-over expiry transaction (debit of the forfeited amount).
    #[must_use]
    pub fn carry_over_expiry(
        account_id: AccountId,
        expired: Decimal,
        balance_after: Decimal,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            amount: -expired.abs(),
            balance_after,
            description: format!("Expired {expired} carry-over credits"),
            detail: TransactionDetail::CarryOverExpiry { expired },
            created_at: Utc::now(),
        }
    }

    /// Create a grant application transaction.
    #[must_use]
    pub fn grant(
        account_id: AccountId,
        amount: Decimal,
        balance_after: Decimal,
        grant_id: GrantId,
        category: GrantCategory,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            amount,
            balance_after,
            description: format!("Applied {category} credit grant"),
            detail: TransactionDetail::Grant { grant_id, category },
            created_at: Utc::now(),
        }
    }

    /// Create an auto-top-up transaction.
    #[must_use]
    pub fn auto_top_up(
        account_id: AccountId,
        amount: Decimal,
        balance_after: Decimal,
        payment_method_id: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            amount,
            balance_after,
            description: format!("Auto-top-up of {amount} credits"),
            detail: TransactionDetail::AutoTopUp { payment_method_id },
            created_at: Utc::now(),
        }
    }

    /// Create a manual adjustment transaction (operator credit).
    #[must_use]
    pub fn adjustment(
        account_id: AccountId,
        amount: Decimal,
        balance_after: Decimal,
        note: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            amount,
            balance_after,
            description: note.clone(),
            detail: TransactionDetail::Adjustment { note },
            created_at: Utc::now(),
        }
    }

    /// The kind of this transaction, derived from its detail payload.
    #[must_use]
    pub fn kind(&self) -> TransactionType {
        match &self.detail {
            TransactionDetail::Usage { .. } => TransactionType::Usage,
            TransactionDetail::MonthlyAllocation { .. } => TransactionType::MonthlyAllocation,
            TransactionDetail::CarryOverExpiry { .. } => TransactionType::CarryOverExpiry,
            TransactionDetail::Grant { .. } => TransactionType::Grant,
            TransactionDetail::AutoTopUp { .. } => TransactionType::AutoTopUp,
            TransactionDetail::Adjustment { .. } => TransactionType::Adjustment,
        }
    }
}

/// Typed payload for each transaction kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TransactionDetail {
    /// Credits deducted for usage, with the bucket split consumed.
    Usage {
        /// Portion taken from carry-over credits.
        carry_over_spent: Decimal,
        /// Portion taken from base-plan credits.
        base_plan_spent: Decimal,
        /// What kind of work was charged (e.g. "app_request", "compute").
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },

    /// Monthly plan credit allocation.
    MonthlyAllocation {
        /// Tier name the allocation came from.
        tier: String,
    },

    /// Stale carry-over credits forfeited at expiry.
    CarryOverExpiry {
        /// Amount forfeited.
        expired: Decimal,
    },

    /// A one-off credit grant applied.
    Grant {
        /// The grant that was applied.
        grant_id: GrantId,
        /// Paid or promotional.
        category: GrantCategory,
    },

    /// Automatic top-up triggered by the reconciliation job.
    AutoTopUp {
        /// Payment method charged for the top-up.
        payment_method_id: String,
    },

    /// Manual operator adjustment.
    Adjustment {
        /// Reason for the adjustment.
        note: String,
    },
}

/// Kind of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Credits deducted for usage.
    Usage,
    /// Monthly plan credit allocation.
    MonthlyAllocation,
    /// Carry-over credits forfeited at expiry.
    CarryOverExpiry,
    /// One-off grant applied.
    Grant,
    /// Automatic top-up.
    AutoTopUp,
    /// Manual adjustment.
    Adjustment,
}

impl TransactionType {
    /// Check if this kind adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::MonthlyAllocation | Self::Grant | Self::AutoTopUp | Self::Adjustment
        )
    }

    /// Check if this kind removes credits.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Usage | Self::CarryOverExpiry)
    }
}

/// A one-off credit grant (purchase or promotion).
///
/// Grants are created pending, applied to the balance exactly once, and may
/// be voided before application. `expires_at` bounds application: an
/// unapplied grant past its expiry is voided instead of applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditGrant {
    /// The grant ID.
    pub id: GrantId,

    /// The account the grant belongs to.
    pub account_id: AccountId,

    /// Credits granted.
    pub credits: Decimal,

    /// Paid or promotional.
    pub category: GrantCategory,

    /// Deadline for applying the grant, if any.
    pub expires_at: Option<DateTime<Utc>>,

    /// Lifecycle status.
    pub status: GrantStatus,

    /// When the grant was created.
    pub created_at: DateTime<Utc>,

    /// When the grant was applied, if it has been.
    pub applied_at: Option<DateTime<Utc>>,
}

impl CreditGrant {
    /// Create a new pending grant.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        credits: Decimal,
        category: GrantCategory,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: GrantId::generate(),
            account_id,
            credits,
            category,
            expires_at,
            status: GrantStatus::Pending,
            created_at: Utc::now(),
            applied_at: None,
        }
    }

    /// Check whether the grant can still be applied at `now`.
    #[must_use]
    pub fn applicable(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Pending
            && !self.expires_at.is_some_and(|expires| expires < now)
    }
}

/// Category of a credit grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantCategory {
    /// Credits paid for by the account holder.
    Paid,
    /// Promotional/bonus credits.
    Promotional,
}

impl std::fmt::Display for GrantCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paid => write!(f, "paid"),
            Self::Promotional => write!(f, "promotional"),
        }
    }
}

/// Lifecycle status of a credit grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// Created but not yet applied.
    Pending,
    /// Applied to the balance.
    Applied,
    /// Voided before application.
    Voided,
}
