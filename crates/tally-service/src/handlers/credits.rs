//! Credit balance, transaction, and affordability handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{Account, AccountId, AutoTopUpConfig, CreditTransaction, TransactionDetail};

use crate::error::ApiError;
use crate::ledger::Affordability;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// The account.
    pub account_id: AccountId,
    /// Current spendable balance.
    pub balance: Decimal,
    /// Base-plan portion of the balance.
    pub base_plan_credits: Decimal,
    /// Carry-over portion of the balance.
    pub carry_over_credits: Decimal,
    /// When held carry-over credits expire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carry_over_expires_at: Option<DateTime<Utc>>,
    /// Current plan tier.
    pub tier: String,
    /// Credits consumed this calendar month.
    pub monthly_credits_used: Decimal,
    /// Credits consumed over the account's lifetime.
    pub lifetime_credits_used: Decimal,
}

impl From<&Account> for BalanceResponse {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id,
            balance: account.balance,
            base_plan_credits: account.base_plan_credits,
            carry_over_credits: account.carry_over_credits,
            carry_over_expires_at: account.carry_over_expires_at,
            tier: account.current_tier().as_str().to_string(),
            monthly_credits_used: account.monthly_credits_used,
            lifetime_credits_used: account.lifetime_credits_used,
        }
    }
}

/// Account selector for balance reads.
#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    /// The account to read.
    pub account_id: AccountId,
}

/// Get current credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state.ledger.balance(query.account_id).await?;
    Ok(Json(BalanceResponse::from(&account)))
}

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// The account whose history to list.
    pub account_id: AccountId,
    /// Maximum number of transactions to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Signed amount (positive = credit, negative = debit).
    pub amount: Decimal,
    /// Balance after this transaction.
    pub balance_after: Decimal,
    /// Description.
    pub description: String,
    /// Typed per-kind payload.
    pub detail: TransactionDetail,
    /// Timestamp.
    pub created_at: String,
}

impl From<&CreditTransaction> for TransactionResponse {
    fn from(tx: &CreditTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            amount: tx.amount,
            balance_after: tx.balance_after,
            description: tx.description.clone(),
            detail: tx.detail.clone(),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<TransactionResponse>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List transaction history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(100);
    let transactions = state
        .ledger
        .list_transactions(query.account_id, limit + 1, query.offset)
        .await?;

    let has_more = transactions.len() > limit;
    let transactions: Vec<_> = transactions
        .iter()
        .take(limit)
        .map(TransactionResponse::from)
        .collect();

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}

/// Deduct request.
#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    /// The account to charge.
    pub account_id: AccountId,
    /// Amount of credits to deduct.
    pub amount: Decimal,
    /// What the charge was for.
    pub description: String,
    /// Kind of work charged (e.g. "app_request", "compute").
    #[serde(default)]
    pub source: Option<String>,
}

/// Deduct response.
#[derive(Debug, Serialize)]
pub struct DeductResponse {
    /// The transaction, absent for a zero-amount no-op.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionResponse>,
    /// Balance after the deduction.
    pub balance: Decimal,
}

/// Deduct credits from an account.
pub async fn deduct(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeductRequest>,
) -> Result<Json<DeductResponse>, ApiError> {
    let transaction = state
        .ledger
        .deduct(
            body.account_id,
            body.amount,
            &body.description,
            body.source.as_deref(),
        )
        .await?;

    let balance = match &transaction {
        Some(tx) => tx.balance_after,
        None => state.ledger.balance(body.account_id).await?.balance,
    };

    Ok(Json(DeductResponse {
        transaction: transaction.as_ref().map(TransactionResponse::from),
        balance,
    }))
}

/// Add request.
#[derive(Debug, Deserialize)]
pub struct AddRequest {
    /// The account to credit.
    pub account_id: AccountId,
    /// Amount of credits to add.
    pub amount: Decimal,
    /// Reason for the adjustment.
    pub note: String,
}

/// Add credits to an account (operator adjustment).
pub async fn add(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddRequest>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let transaction = state
        .ledger
        .add(body.account_id, body.amount, &body.note)
        .await?;
    Ok(Json(TransactionResponse::from(&transaction)))
}

/// Affordability check request.
#[derive(Debug, Deserialize)]
pub struct CanAffordRequest {
    /// The account to check.
    pub account_id: AccountId,
    /// Amount of credits the caller wants to charge.
    pub amount: Decimal,
}

/// Check whether a charge would succeed, without performing it.
pub async fn can_afford(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CanAffordRequest>,
) -> Result<Json<Affordability>, ApiError> {
    let affordability = state.ledger.can_afford(body.account_id, body.amount).await?;
    Ok(Json(affordability))
}

/// Auto-top-up configuration request. A `null` config disables auto-top-up.
#[derive(Debug, Deserialize)]
pub struct ConfigureAutoTopUpRequest {
    /// The account to configure.
    pub account_id: AccountId,
    /// The new configuration, or `null` to remove it.
    pub config: Option<AutoTopUpConfig>,
}

/// Configure auto-top-up for an account.
pub async fn configure_auto_top_up(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConfigureAutoTopUpRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state
        .ledger
        .configure_auto_top_up(body.account_id, body.config)
        .await?;
    Ok(Json(BalanceResponse::from(&account)))
}
