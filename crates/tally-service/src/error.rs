//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;

use tally_core::LedgerError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient credits.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: Decimal,
        /// Required amount.
        required: Decimal,
    },

    /// Deduction would land below the protected floor.
    #[error("minimum balance violation: balance={balance}, required={required}")]
    MinimumBalanceViolation {
        /// Current balance.
        balance: Decimal,
        /// Required amount.
        required: Decimal,
        /// The protected floor.
        minimum: Decimal,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientCredits { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required,
                })),
            ),
            Self::MinimumBalanceViolation {
                balance,
                required,
                minimum,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "minimum_balance_violation",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required,
                    "minimum": minimum,
                    "max_affordable": (*balance - *minimum).max(Decimal::ZERO),
                })),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(msg) => Self::BadRequest(msg),
            LedgerError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            LedgerError::MinimumBalanceViolation {
                balance,
                required,
                minimum,
            } => Self::MinimumBalanceViolation {
                balance,
                required,
                minimum,
            },
            LedgerError::AccountNotFound { account_id } => {
                Self::NotFound(format!("account not found: {account_id}"))
            }
            LedgerError::GrantNotFound { grant_id } => {
                Self::NotFound(format!("grant not found: {grant_id}"))
            }
            LedgerError::GrantNotPending { grant_id, status } => {
                Self::Conflict(format!("grant {grant_id} is {status}, expected pending"))
            }
            LedgerError::InvalidId(e) => Self::BadRequest(e.to_string()),
            LedgerError::Storage(msg) => Self::Internal(msg),
        }
    }
}

impl From<tally_store::StoreError> for ApiError {
    fn from(err: tally_store::StoreError) -> Self {
        match err {
            tally_store::StoreError::NotFound { entity, id } => {
                Self::NotFound(format!("{entity} not found: {id}"))
            }
            tally_store::StoreError::Database(msg)
            | tally_store::StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}
