//! HTTP implementation of the metering provider.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::provider::{EventSummary, MeterProvider, ProviderError};

/// Request body for event submission.
#[derive(Debug, Serialize)]
struct SubmitEventRequest<'a> {
    event_name: &'a str,
    external_customer_id: &'a str,
    value: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<&'a str>,
}

/// Error body the provider returns on rejection.
#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: Option<String>,
}

/// Response wrapper for event summaries.
#[derive(Debug, Deserialize)]
struct EventSummariesResponse {
    data: Vec<EventSummary>,
}

/// HTTP metering-provider client.
#[derive(Debug, Clone)]
pub struct HttpMeterClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpMeterClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Provider API URL (e.g. `"https://billing.example.com"`)
    /// * `api_key` - Provider API key
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Classify a non-success response into the provider error taxonomy.
    async fn classify_error(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let body: Option<ProviderErrorResponse> = response.json().await.ok();
        let message = body
            .as_ref()
            .map_or_else(|| format!("HTTP {status}"), |b| b.error.clone());

        match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
            StatusCode::CONFLICT => ProviderError::IdempotencyConflict,
            s if s.is_server_error() => ProviderError::Transient(message),
            s => {
                // Some providers signal idempotent replays with a 400 and a
                // dedicated code rather than a 409.
                if body.is_some_and(|b| {
                    b.code.as_deref() == Some("event_already_exists")
                }) {
                    ProviderError::IdempotencyConflict
                } else {
                    ProviderError::Permanent {
                        status: s.as_u16(),
                        message,
                    }
                }
            }
        }
    }

    fn map_request_error(err: reqwest::Error) -> ProviderError {
        // Connection-level failures are worth retrying.
        ProviderError::Transient(err.to_string())
    }
}

#[async_trait]
impl MeterProvider for HttpMeterClient {
    async fn submit_event(
        &self,
        event_name: &str,
        external_customer_id: &str,
        value: u64,
        timestamp: Option<DateTime<Utc>>,
        idempotency_key: Option<&str>,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/v1/meter_events", self.base_url);
        let request = SubmitEventRequest {
            event_name,
            external_customer_id,
            value,
            timestamp: timestamp.map(|t| t.timestamp()),
            idempotency_key,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        if response.status().is_success() {
            return Ok(());
        }

        Err(Self::classify_error(response).await)
    }

    async fn list_event_summaries(
        &self,
        meter_id: &str,
        external_customer_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Vec<EventSummary>, ProviderError> {
        let url = format!("{}/v1/meters/{meter_id}/event_summaries", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[
                ("external_customer_id", external_customer_id),
                ("start_time", &start_time.timestamp().to_string()),
                ("end_time", &end_time.timestamp().to_string()),
            ])
            .send()
            .await
            .map_err(Self::map_request_error)?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }

        let summaries: EventSummariesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        Ok(summaries.data)
    }
}
