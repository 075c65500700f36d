//! Error types for ledger operations.

use rust_decimal::Decimal;

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
///
/// Insufficiency and the minimum-balance floor are distinct variants so
/// callers can offer a reduced charge instead of hard-failing.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The requested amount is malformed (e.g. negative deduction).
    #[error("invalid amount: {0}")]
    Validation(String),

    /// Balance is lower than the requested deduction.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: Decimal,
        /// Required amount.
        required: Decimal,
    },

    /// The deduction would push the balance below the protected floor.
    #[error(
        "minimum balance violation: balance={balance}, required={required}, minimum={minimum}"
    )]
    MinimumBalanceViolation {
        /// Current balance.
        balance: Decimal,
        /// Required amount.
        required: Decimal,
        /// The protected floor.
        minimum: Decimal,
    },

    /// Account not found.
    #[error("account not found: {account_id}")]
    AccountNotFound {
        /// The account ID that was not found.
        account_id: String,
    },

    /// Grant not found.
    #[error("grant not found: {grant_id}")]
    GrantNotFound {
        /// The grant ID that was not found.
        grant_id: String,
    },

    /// Grant is not in a state that allows the operation.
    #[error("grant {grant_id} is {status}, expected pending")]
    GrantNotPending {
        /// The grant ID.
        grant_id: String,
        /// Its current status.
        status: String,
    },

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}
