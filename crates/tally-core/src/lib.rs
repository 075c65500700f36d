//! Core types and utilities for the tally credit ledger.
//!
//! This crate provides the foundational types used throughout tally:
//!
//! - **Identifiers**: `AccountId`, `TransactionId`, `GrantId`, `JobId`
//! - **Accounts**: `Account`, `Membership`, `AutoTopUpConfig`
//! - **Credits**: `CreditTransaction`, `TransactionDetail`, `CreditGrant`
//! - **Usage**: `ResourceUsage`, `UsagePeriod`, `PeriodStatus`
//! - **Rates**: the fixed usage-to-credit conversion table
//!
//! # Credit unit
//!
//! Credits are fractional and stored as `rust_decimal::Decimal` — never
//! binary floating point. The spendable authority is always
//! `Account::balance`; the base-plan/carry-over pair is a deduction-order
//! decomposition kept in lockstep with it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod credits;
pub mod error;
pub mod ids;
pub mod job;
pub mod rates;
pub mod usage;

pub use account::{
    Account, AutoTopUpConfig, Membership, MembershipStatus, MembershipTier, MINIMUM_BALANCE,
    PRO_PLAN_MONTHLY_CREDITS, STANDARD_PLAN_MONTHLY_CREDITS,
};
pub use credits::{CreditGrant, CreditTransaction, GrantCategory, GrantStatus, TransactionDetail, TransactionType};
pub use error::{LedgerError, Result};
pub use ids::{AccountId, GrantId, IdError, JobId, TransactionId};
pub use job::{JobStatus, MeterEventJob, QueueDepths};
pub use rates::{billable_credits, breakdown, raw_credits, CostBreakdown, ASSUMED_MEMORY_GB};
pub use usage::{period_bounds, period_key, PeriodStatus, ResourceKind, ResourceUsage, UsagePeriod};
