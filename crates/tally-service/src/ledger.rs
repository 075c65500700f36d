//! The credit ledger: the single authority for balance mutations.
//!
//! Every mutation for a given account runs under that account's lock, so
//! two concurrent deductions can never both pass the affordability check
//! against a balance neither has committed. Each mutation lands atomically
//! in the store together with the transaction rows that explain it.
//!
//! Carry-over expiry and the monthly plan allocation are applied lazily:
//! the first locked operation that touches an account after the expiry
//! instant (or in a new calendar month) folds them into its own commit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;

use tally_core::{
    Account, AccountId, AutoTopUpConfig, CreditTransaction, GrantId, GrantStatus, LedgerError,
    Result, MINIMUM_BALANCE,
};
use tally_store::Store;

/// Result of an affordability pre-check.
///
/// When a charge is blocked only by the minimum-balance floor,
/// `max_affordable` tells the caller the largest charge that would
/// succeed, so product surfaces can offer a reduced-cost operation
/// instead of hard-failing.
#[derive(Debug, Clone, Serialize)]
pub struct Affordability {
    /// Whether the full amount can be deducted right now.
    pub can_afford: bool,

    /// Why not, when it cannot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// The balance the check ran against.
    pub current_balance: Decimal,

    /// Largest deductible amount, when blocked by the minimum-balance rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_affordable: Option<Decimal>,
}

/// Pending account changes produced by a lazy refresh.
struct Refresh {
    transactions: Vec<CreditTransaction>,
    changed: bool,
}

/// Lock-map size above which idle per-account locks are swept.
const LOCK_SWEEP_THRESHOLD: usize = 1024;

/// The credit ledger.
///
/// Cheap to clone; clones share the same store and per-account locks.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
    locks: Arc<Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Ledger {
    /// Create a ledger over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The lock serializing mutations for one account.
    fn account_lock(&self, account_id: AccountId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if locks.len() > LOCK_SWEEP_THRESHOLD {
            // A lock in use by an in-flight operation has clones outside
            // the map; everything else belongs to idle accounts.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(locks.entry(account_id).or_default())
    }

    fn load(&self, account_id: AccountId) -> Result<Account> {
        self.store
            .get_account(&account_id)?
            .ok_or_else(|| LedgerError::AccountNotFound {
                account_id: account_id.to_string(),
            })
    }

    /// Fold carry-over expiry and the monthly allocation into `account`.
    ///
    /// Stale carry-over is forfeited before anything else looks at the
    /// balance; the monthly allocation is granted at most once per
    /// calendar month, and resets the monthly usage and top-up counters.
    fn refresh(account: &mut Account) -> Refresh {
        let now = Utc::now();
        let mut transactions = Vec::new();
        let mut changed = false;

        if account.carry_over_expired(now) {
            let expired = account.carry_over_credits;
            account.balance -= expired;
            account.carry_over_credits = Decimal::ZERO;
            account.carry_over_expires_at = None;
            transactions.push(CreditTransaction::carry_over_expiry(
                account.id,
                expired,
                account.balance,
            ));
            changed = true;
            tracing::info!(
                account_id = %account.id,
                expired = %expired,
                "Forfeited expired carry-over credits"
            );
        }

        if account.monthly_allocation_due(now) {
            let tier = account.current_tier();
            let credits = tier.monthly_credits();
            account.monthly_credits_used = Decimal::ZERO;
            account.top_ups_this_month = 0;
            account.last_credit_reset = now;
            changed = true;

            if credits > Decimal::ZERO {
                account.balance += credits;
                account.base_plan_credits += credits;
                transactions.push(CreditTransaction::monthly_allocation(
                    account.id,
                    credits,
                    account.balance,
                    tier.as_str(),
                ));
                tracing::info!(
                    account_id = %account.id,
                    tier = tier.as_str(),
                    credits = %credits,
                    "Granted monthly plan allocation"
                );
            }
        }

        if changed {
            account.updated_at = now;
        }

        Refresh {
            transactions,
            changed,
        }
    }

    fn commit_refresh(&self, account: &Account, refresh: &Refresh) -> Result<()> {
        if refresh.changed {
            self.store
                .commit_account_mutation(account, &refresh.transactions)?;
        }
        Ok(())
    }

    /// Read the account balance, applying any due carry-over expiry and
    /// monthly allocation first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AccountNotFound`] for an unknown account, or
    /// a storage error.
    pub async fn balance(&self, account_id: AccountId) -> Result<Account> {
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let mut account = self.load(account_id)?;
        let refresh = Self::refresh(&mut account);
        self.commit_refresh(&account, &refresh)?;
        Ok(account)
    }

    /// Deduct `amount` credits, spending carry-over before base-plan.
    ///
    /// A zero amount is a logged no-op producing no transaction row; a
    /// negative amount is a validation error distinct from insufficiency.
    /// The balance decrement, bucket split, usage counters, and the
    /// transaction row commit as one unit. `source` tags the transaction
    /// detail with the kind of work charged.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientCredits`] when the balance is
    /// below `amount`, and [`LedgerError::MinimumBalanceViolation`] when
    /// the deduction would land below the protected floor.
    pub async fn deduct(
        &self,
        account_id: AccountId,
        amount: Decimal,
        description: &str,
        source: Option<&str>,
    ) -> Result<Option<CreditTransaction>> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "deduction amount must be non-negative, got {amount}"
            )));
        }

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let mut account = self.load(account_id)?;
        let mut refresh = Self::refresh(&mut account);

        if amount == Decimal::ZERO {
            tracing::debug!(account_id = %account_id, "Zero deduction, skipping");
            self.commit_refresh(&account, &refresh)?;
            return Ok(None);
        }

        if account.balance < amount {
            self.commit_refresh(&account, &refresh)?;
            return Err(LedgerError::InsufficientCredits {
                balance: account.balance,
                required: amount,
            });
        }
        if account.balance - amount < MINIMUM_BALANCE {
            self.commit_refresh(&account, &refresh)?;
            return Err(LedgerError::MinimumBalanceViolation {
                balance: account.balance,
                required: amount,
                minimum: MINIMUM_BALANCE,
            });
        }

        // Carry-over expires, base-plan does not: spend carry-over first so
        // value is not forfeited at the cycle boundary.
        let carry_over_spent = amount.min(account.carry_over_credits);
        let base_plan_spent = amount - carry_over_spent;

        account.balance -= amount;
        account.carry_over_credits -= carry_over_spent;
        account.base_plan_credits -= base_plan_spent;
        account.monthly_credits_used += amount;
        account.lifetime_credits_used += amount;
        account.updated_at = Utc::now();

        let transaction = CreditTransaction::usage(
            account_id,
            amount,
            account.balance,
            description.to_string(),
            carry_over_spent,
            base_plan_spent,
            source.map(String::from),
        );
        refresh.transactions.push(transaction.clone());
        self.store
            .commit_account_mutation(&account, &refresh.transactions)?;

        tracing::debug!(
            account_id = %account_id,
            amount = %amount,
            balance = %account.balance,
            carry_over_spent = %carry_over_spent,
            "Credits deducted"
        );

        Ok(Some(transaction))
    }

    /// Add `amount` credits as an operator adjustment.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for a negative amount.
    pub async fn add(
        &self,
        account_id: AccountId,
        amount: Decimal,
        note: &str,
    ) -> Result<CreditTransaction> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "credit amount must be non-negative, got {amount}"
            )));
        }

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let mut account = self.load(account_id)?;
        let mut refresh = Self::refresh(&mut account);

        account.balance += amount;
        account.base_plan_credits += amount;
        account.updated_at = Utc::now();

        let transaction =
            CreditTransaction::adjustment(account_id, amount, account.balance, note.to_string());
        refresh.transactions.push(transaction.clone());
        self.store
            .commit_account_mutation(&account, &refresh.transactions)?;

        tracing::info!(
            account_id = %account_id,
            amount = %amount,
            balance = %account.balance,
            "Credits added"
        );

        Ok(transaction)
    }

    /// Check whether `amount` could be deducted right now.
    ///
    /// Applies the same lazy refresh as a balance read, so the answer is
    /// against the up-to-date balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for a negative amount or
    /// [`LedgerError::AccountNotFound`] for an unknown account.
    pub async fn can_afford(&self, account_id: AccountId, amount: Decimal) -> Result<Affordability> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "amount must be non-negative, got {amount}"
            )));
        }

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let mut account = self.load(account_id)?;
        let refresh = Self::refresh(&mut account);
        self.commit_refresh(&account, &refresh)?;

        let balance = account.balance;
        if balance < amount {
            return Ok(Affordability {
                can_afford: false,
                reason: Some("insufficient_credits".into()),
                current_balance: balance,
                max_affordable: None,
            });
        }
        if balance - amount < MINIMUM_BALANCE {
            return Ok(Affordability {
                can_afford: false,
                reason: Some("minimum_balance".into()),
                current_balance: balance,
                max_affordable: Some((balance - MINIMUM_BALANCE).max(Decimal::ZERO)),
            });
        }

        Ok(Affordability {
            can_afford: true,
            reason: None,
            current_balance: balance,
            max_affordable: None,
        })
    }

    /// Apply a pending grant to its account's balance, exactly once.
    ///
    /// A pending grant past its application deadline is voided instead.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::GrantNotFound`] for an unknown grant and
    /// [`LedgerError::GrantNotPending`] when the grant was already applied,
    /// voided, or expired.
    pub async fn apply_grant(&self, grant_id: GrantId) -> Result<CreditTransaction> {
        let account_id = self
            .store
            .get_grant(&grant_id)?
            .ok_or_else(|| LedgerError::GrantNotFound {
                grant_id: grant_id.to_string(),
            })?
            .account_id;

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent call may have settled this
        // grant while we waited.
        let mut grant = self
            .store
            .get_grant(&grant_id)?
            .ok_or_else(|| LedgerError::GrantNotFound {
                grant_id: grant_id.to_string(),
            })?;

        if grant.status != GrantStatus::Pending {
            return Err(LedgerError::GrantNotPending {
                grant_id: grant.id.to_string(),
                status: grant_status_str(grant.status).into(),
            });
        }

        let now = Utc::now();
        if !grant.applicable(now) {
            grant.status = GrantStatus::Voided;
            self.store.put_grant(&grant)?;
            tracing::warn!(grant_id = %grant.id, "Voided grant past its application deadline");
            return Err(LedgerError::GrantNotPending {
                grant_id: grant.id.to_string(),
                status: grant_status_str(GrantStatus::Voided).into(),
            });
        }

        let mut account = self.load(grant.account_id)?;
        let mut refresh = Self::refresh(&mut account);

        account.balance += grant.credits;
        account.base_plan_credits += grant.credits;
        account.updated_at = now;

        let transaction = CreditTransaction::grant(
            account.id,
            grant.credits,
            account.balance,
            grant.id,
            grant.category,
        );
        refresh.transactions.push(transaction.clone());

        // The grant row lands in the same batch as the balance change, so
        // a crash cannot leave the credit applied with the grant pending.
        grant.status = GrantStatus::Applied;
        grant.applied_at = Some(now);
        self.store
            .commit_grant_application(&account, &refresh.transactions, &grant)?;

        tracing::info!(
            grant_id = %grant.id,
            account_id = %account.id,
            credits = %grant.credits,
            "Credit grant applied"
        );

        Ok(transaction)
    }

    /// Void a pending grant before application.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::GrantNotPending`] unless the grant is pending.
    pub async fn void_grant(&self, grant_id: GrantId) -> Result<()> {
        let account_id = self
            .store
            .get_grant(&grant_id)?
            .ok_or_else(|| LedgerError::GrantNotFound {
                grant_id: grant_id.to_string(),
            })?
            .account_id;

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let mut grant = self
            .store
            .get_grant(&grant_id)?
            .ok_or_else(|| LedgerError::GrantNotFound {
                grant_id: grant_id.to_string(),
            })?;

        if grant.status != GrantStatus::Pending {
            return Err(LedgerError::GrantNotPending {
                grant_id: grant.id.to_string(),
                status: grant_status_str(grant.status).into(),
            });
        }

        grant.status = GrantStatus::Voided;
        self.store.put_grant(&grant)?;
        tracing::info!(grant_id = %grant.id, "Credit grant voided");
        Ok(())
    }

    /// Replace the account's auto-top-up configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AccountNotFound`] for an unknown account.
    pub async fn configure_auto_top_up(
        &self,
        account_id: AccountId,
        config: Option<AutoTopUpConfig>,
    ) -> Result<Account> {
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let mut account = self.load(account_id)?;
        account.auto_top_up = config;
        account.updated_at = Utc::now();
        self.store.put_account(&account)?;
        Ok(account)
    }

    /// Run one auto-top-up for the account if its config calls for one.
    ///
    /// Returns `true` when a top-up was charged. A balance at or above the
    /// threshold, a disabled config, or an exhausted monthly cap are quiet
    /// no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AccountNotFound`] for an unknown account, or
    /// a storage error.
    pub async fn apply_auto_top_up(&self, account_id: AccountId) -> Result<bool> {
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let mut account = self.load(account_id)?;
        let mut refresh = Self::refresh(&mut account);

        let Some(config) = account.auto_top_up.clone() else {
            self.commit_refresh(&account, &refresh)?;
            return Ok(false);
        };

        if !config.enabled
            || account.balance >= config.threshold_credits
            || account.top_ups_this_month >= config.max_monthly_top_ups
        {
            self.commit_refresh(&account, &refresh)?;
            return Ok(false);
        }

        account.balance += config.top_up_credits;
        account.base_plan_credits += config.top_up_credits;
        account.top_ups_this_month += 1;
        account.updated_at = Utc::now();

        let transaction = CreditTransaction::auto_top_up(
            account_id,
            config.top_up_credits,
            account.balance,
            config.payment_method_id,
        );
        refresh.transactions.push(transaction);
        self.store
            .commit_account_mutation(&account, &refresh.transactions)?;

        tracing::info!(
            account_id = %account_id,
            credits = %config.top_up_credits,
            top_ups_this_month = account.top_ups_this_month,
            "Auto-top-up applied"
        );

        Ok(true)
    }

    /// List transactions for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AccountNotFound`] for an unknown account.
    pub async fn list_transactions(
        &self,
        account_id: AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        self.load(account_id)?;
        Ok(self
            .store
            .list_transactions_by_account(&account_id, limit, offset)?)
    }
}

const fn grant_status_str(status: GrantStatus) -> &'static str {
    match status {
        GrantStatus::Pending => "pending",
        GrantStatus::Applied => "applied",
        GrantStatus::Voided => "voided",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_store::RocksStore;
    use tempfile::TempDir;

    #[test]
    fn idle_account_locks_are_swept() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(RocksStore::open(dir.path()).unwrap());
        let ledger = Ledger::new(store);

        let busy_id = AccountId::generate();
        let held = ledger.account_lock(busy_id);

        for _ in 0..LOCK_SWEEP_THRESHOLD * 2 {
            drop(ledger.account_lock(AccountId::generate()));
        }

        let locks = ledger.locks.lock().unwrap();
        assert!(locks.len() <= LOCK_SWEEP_THRESHOLD + 1);
        // A lock still held by an in-flight operation survives the sweep.
        assert!(locks.contains_key(&busy_id));
        drop(locks);
        drop(held);
    }
}
