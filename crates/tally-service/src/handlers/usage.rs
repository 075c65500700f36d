//! Usage recording and reporting handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{raw_credits, AccountId, PeriodStatus, ResourceUsage, UsagePeriod};

use crate::error::ApiError;
use crate::pipeline::ReportOutcome;
use crate::state::AppState;

/// Usage sample to record.
#[derive(Debug, Deserialize)]
pub struct RecordUsageRequest {
    /// The account the usage belongs to.
    pub account_id: AccountId,
    /// App invocations.
    #[serde(default)]
    pub invocations: u64,
    /// Compute time in milliseconds.
    #[serde(default)]
    pub compute_ms: u64,
    /// Network egress in bytes.
    #[serde(default)]
    pub egress_bytes: u64,
    /// Storage held, in byte-hours.
    #[serde(default)]
    pub storage_byte_hours: u64,
}

/// Summary of a usage period.
#[derive(Debug, Serialize)]
pub struct PeriodResponse {
    /// Inclusive cycle start.
    pub period_start: DateTime<Utc>,
    /// Exclusive cycle end.
    pub period_end: DateTime<Utc>,
    /// Accumulated raw counters.
    pub usage: ResourceUsage,
    /// Unrounded credit cost of the accumulated usage.
    pub raw_credits: Decimal,
    /// Reporting state.
    pub status: PeriodStatus,
}

impl From<&UsagePeriod> for PeriodResponse {
    fn from(period: &UsagePeriod) -> Self {
        Self {
            period_start: period.period_start,
            period_end: period.period_end,
            usage: period.usage,
            raw_credits: raw_credits(&period.usage),
            status: period.status,
        }
    }
}

/// Record a usage sample against the account's open period.
pub async fn record_usage(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RecordUsageRequest>,
) -> Result<Json<PeriodResponse>, ApiError> {
    let sample = ResourceUsage {
        invocations: body.invocations,
        compute_ms: body.compute_ms,
        egress_bytes: body.egress_bytes,
        storage_byte_hours: body.storage_byte_hours,
    };

    let period = state.pipeline.record_usage(body.account_id, &sample)?;
    Ok(Json(PeriodResponse::from(&period)))
}

/// Report request.
#[derive(Debug, Deserialize)]
pub struct ReportUsageRequest {
    /// The account whose current period to report.
    pub account_id: AccountId,
}

/// Price the account's current period and enqueue its meter events.
pub async fn report_usage(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReportUsageRequest>,
) -> Result<Json<ReportOutcome>, ApiError> {
    let outcome = state.pipeline.report_usage(body.account_id)?;
    Ok(Json(outcome))
}
