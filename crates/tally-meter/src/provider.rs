//! The abstract metering-provider interface.
//!
//! The worker delivers through this trait rather than a concrete client,
//! so tests can substitute a scripted provider and the HTTP implementation
//! stays swappable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Error taxonomy for provider calls.
///
/// The worker keys its retry decisions off these variants: rate limits and
/// transient failures are retried with backoff, an idempotency conflict is
/// success, anything permanent is terminal.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider rejected the request due to its rate ceiling.
    #[error("provider rate limited")]
    RateLimited,

    /// A transient failure (5xx, connection error) worth retrying.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// The provider reports this event was already delivered.
    #[error("idempotency conflict: event already delivered")]
    IdempotencyConflict,

    /// A permanent rejection; retrying cannot succeed.
    #[error("permanent provider error: status={status}, {message}")]
    Permanent {
        /// HTTP status code.
        status: u16,
        /// Error message from the provider.
        message: String,
    },
}

impl ProviderError {
    /// Check whether the worker should retry after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient(_))
    }
}

/// An aggregated event summary returned by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct EventSummary {
    /// The meter the summary belongs to.
    pub meter_id: String,

    /// Customer the usage was attributed to.
    pub external_customer_id: String,

    /// Aggregated value over the window.
    pub aggregated_value: f64,

    /// Inclusive window start.
    pub start_time: DateTime<Utc>,

    /// Exclusive window end.
    pub end_time: DateTime<Utc>,
}

/// The external metering/billing provider.
///
/// The provider is the system of record for invoicing; it enforces its own
/// request-rate ceiling, which the worker stays under.
#[async_trait]
pub trait MeterProvider: Send + Sync {
    /// Submit one usage measurement.
    ///
    /// `value` is already floored to integer units. When `idempotency_key`
    /// is supplied the provider deduplicates on it.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] classified for the worker's retry
    /// policy.
    async fn submit_event(
        &self,
        event_name: &str,
        external_customer_id: &str,
        value: u64,
        timestamp: Option<DateTime<Utc>>,
        idempotency_key: Option<&str>,
    ) -> Result<(), ProviderError>;

    /// List aggregated event summaries for a meter and customer.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the provider call fails.
    async fn list_event_summaries(
        &self,
        meter_id: &str,
        external_customer_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Vec<EventSummary>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_classification() {
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(ProviderError::Transient("gateway".into()).is_retryable());
        assert!(!ProviderError::IdempotencyConflict.is_retryable());
        assert!(!ProviderError::Permanent {
            status: 400,
            message: "bad event".into()
        }
        .is_retryable());
    }
}
