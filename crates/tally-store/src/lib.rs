//! `RocksDB` storage layer for the tally credit ledger.
//!
//! This crate provides persistent storage for accounts, the append-only
//! transaction log, usage periods, credit grants, and durable meter-event
//! jobs, using `RocksDB` with column families for efficient indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `accounts`: Primary account records, keyed by `account_id`
//! - `transactions`: Credit transactions, keyed by `transaction_id` (ULID)
//! - `transactions_by_account`: Index for listing transactions by account
//! - `usage_periods`: One row per (account, billing month)
//! - `grants`: One-off credit grants, keyed by `grant_id`
//! - `meter_jobs`: Durable meter-event jobs, keyed by idempotency key or
//!   job id
//!
//! Balance mutations go through [`Store::commit_account_mutation`], which
//! writes the account row and its transaction rows in a single
//! `WriteBatch` — no intermediate state is ever persisted.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};

use tally_core::{
    Account, AccountId, CreditGrant, CreditTransaction, GrantId, MeterEventJob, QueueDepths,
    TransactionId, UsagePeriod,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing different
/// implementations (`RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert or update an account record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_account(&self, account: &Account) -> Result<()>;

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// List all accounts (reconciliation scan).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Atomically write an account together with the transactions that
    /// explain its balance change.
    ///
    /// This is the only write path for balance mutations: the account row,
    /// the transaction rows, and the by-account index entries land in one
    /// `WriteBatch`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn commit_account_mutation(
        &self,
        account: &Account,
        transactions: &[CreditTransaction],
    ) -> Result<()>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Get a transaction by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<CreditTransaction>>;

    /// List transactions for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Usage Period Operations
    // =========================================================================

    /// Insert or update a usage period row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_period(&self, period: &UsagePeriod) -> Result<()>;

    /// Get the usage period for an account and cycle start.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_period(
        &self,
        account_id: &AccountId,
        period_start: DateTime<Utc>,
    ) -> Result<Option<UsagePeriod>>;

    // =========================================================================
    // Grant Operations
    // =========================================================================

    /// Insert or update a credit grant.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_grant(&self, grant: &CreditGrant) -> Result<()>;

    /// Get a grant by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_grant(&self, grant_id: &GrantId) -> Result<Option<CreditGrant>>;

    /// Atomically write an account, its transactions, and the grant whose
    /// application produced them.
    ///
    /// The grant row lands in the same `WriteBatch` as the balance change,
    /// so a crash can never leave a credited balance next to a grant still
    /// marked pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn commit_grant_application(
        &self,
        account: &Account,
        transactions: &[CreditTransaction],
        grant: &CreditGrant,
    ) -> Result<()>;

    // =========================================================================
    // Meter Job Operations
    // =========================================================================

    /// Insert or update a meter-event job under its storage key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_job(&self, job: &MeterEventJob) -> Result<()>;

    /// Get a job by storage key (idempotency key or job id).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_job(&self, storage_key: &str) -> Result<Option<MeterEventJob>>;

    /// Fetch up to `limit` waiting jobs whose next attempt is due at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn fetch_due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<MeterEventJob>>;

    /// Count jobs by status for the health surface.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn queue_depths(&self, now: DateTime<Utc>) -> Result<QueueDepths>;

    /// Requeue jobs left `active` by a crashed worker.
    ///
    /// Returns the number of jobs reset to `waiting`. Safe to call on
    /// every worker start: delivery is idempotent, so re-running a job
    /// that was mid-flight at crash time cannot double-bill.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn requeue_active_jobs(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Delete delivered jobs last touched before `before`.
    ///
    /// Returns the number of jobs removed. Only `completed` jobs are
    /// pruned; failed jobs stay visible in the queue depths until they are
    /// re-enqueued or handled by an operator.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn prune_delivered_jobs(&self, before: DateTime<Utc>) -> Result<u64>;
}
