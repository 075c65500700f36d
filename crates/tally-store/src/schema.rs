//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary account records, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Credit transactions, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: transactions by account, keyed by `account_id || transaction_id`.
    /// Value is empty (index only).
    pub const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";

    /// Usage periods, keyed by `account_id || yyyymm`.
    pub const USAGE_PERIODS: &str = "usage_periods";

    /// Credit grants, keyed by `grant_id`.
    pub const GRANTS: &str = "grants";

    /// Meter-event jobs, keyed by idempotency key or job id.
    pub const METER_JOBS: &str = "meter_jobs";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_ACCOUNT,
        cf::USAGE_PERIODS,
        cf::GRANTS,
        cf::METER_JOBS,
    ]
}
