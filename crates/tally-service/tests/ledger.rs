//! Ledger behavior tests against a real RocksDB store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use tally_core::{
    Account, AccountId, AutoTopUpConfig, CreditGrant, GrantCategory, GrantStatus, LedgerError,
    Membership, MembershipStatus, MembershipTier, TransactionDetail, TransactionType,
};
use tally_service::Ledger;
use tally_store::{RocksStore, Store};

fn setup() -> (Ledger, Arc<dyn Store>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn Store> = Arc::new(RocksStore::open(dir.path()).unwrap());
    (Ledger::new(Arc::clone(&store)), store, dir)
}

fn account_with(balance: Decimal, base: Decimal, carry: Decimal) -> Account {
    let mut account = Account::new(AccountId::generate());
    account.balance = balance;
    account.base_plan_credits = base;
    account.carry_over_credits = carry;
    account
}

fn assert_decomposition(account: &Account) {
    assert_eq!(
        account.balance,
        account.base_plan_credits + account.carry_over_credits
    );
}

#[tokio::test]
async fn deduct_spends_carry_over_first() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(450), dec!(400), dec!(50));
    store.put_account(&account).unwrap();

    let tx = ledger
        .deduct(account.id, dec!(60), "chat turn", None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(tx.amount, dec!(-60));
    assert_eq!(tx.balance_after, dec!(390));

    let account = store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(account.carry_over_credits, Decimal::ZERO);
    assert_eq!(account.base_plan_credits, dec!(390));
    assert_eq!(account.monthly_credits_used, dec!(60));
    assert_eq!(account.lifetime_credits_used, dec!(60));
    assert_decomposition(&account);
}

#[tokio::test]
async fn deduct_writes_exactly_one_transaction() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(100), dec!(100), Decimal::ZERO);
    store.put_account(&account).unwrap();

    ledger
        .deduct(account.id, dec!(30), "work", None)
        .await
        .unwrap();

    let transactions = store
        .list_transactions_by_account(&account.id, 10, 0)
        .unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].amount, dec!(-30));
    assert_eq!(transactions[0].balance_after, dec!(70));
    assert_eq!(transactions[0].kind(), TransactionType::Usage);
}

#[tokio::test]
async fn zero_deduction_is_a_no_op() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(100), dec!(100), Decimal::ZERO);
    store.put_account(&account).unwrap();

    let tx = ledger
        .deduct(account.id, dec!(0), "noop", None)
        .await
        .unwrap();
    assert!(tx.is_none());
    assert!(store
        .list_transactions_by_account(&account.id, 10, 0)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn negative_deduction_is_a_validation_error() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(100), dec!(100), Decimal::ZERO);
    store.put_account(&account).unwrap();

    let err = ledger
        .deduct(account.id, dec!(-5), "bad", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[tokio::test]
async fn deduct_rejects_insufficient_balance() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(10), dec!(10), Decimal::ZERO);
    store.put_account(&account).unwrap();

    let err = ledger
        .deduct(account.id, dec!(25), "big", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientCredits { balance, required }
            if balance == dec!(10) && required == dec!(25)
    ));

    // Balance untouched by the failed deduction.
    let account = store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(account.balance, dec!(10));
}

#[tokio::test]
async fn minimum_balance_boundary() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(10), dec!(10), Decimal::ZERO);
    store.put_account(&account).unwrap();

    // 10 - 9.6 = 0.4 < 0.5: blocked by the floor, not by insufficiency.
    let err = ledger
        .deduct(account.id, dec!(9.6), "over", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::MinimumBalanceViolation { .. }));

    let check = ledger.can_afford(account.id, dec!(9.6)).await.unwrap();
    assert!(!check.can_afford);
    assert_eq!(check.reason.as_deref(), Some("minimum_balance"));
    assert_eq!(check.current_balance, dec!(10));
    assert_eq!(check.max_affordable, Some(dec!(9.5)));

    // 10 - 9.4 = 0.6 >= 0.5: allowed.
    let tx = ledger
        .deduct(account.id, dec!(9.4), "ok", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.balance_after, dec!(0.6));
}

#[tokio::test]
async fn can_afford_reports_insufficiency() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(3), dec!(3), Decimal::ZERO);
    store.put_account(&account).unwrap();

    let check = ledger.can_afford(account.id, dec!(5)).await.unwrap();
    assert!(!check.can_afford);
    assert_eq!(check.reason.as_deref(), Some("insufficient_credits"));

    let check = ledger.can_afford(account.id, dec!(1)).await.unwrap();
    assert!(check.can_afford);
    assert!(check.reason.is_none());
}

#[tokio::test]
async fn carry_over_expires_exactly_once() {
    let (ledger, store, _dir) = setup();
    let mut account = account_with(dec!(450), dec!(400), dec!(50));
    account.carry_over_expires_at = Some(Utc::now() - Duration::hours(1));
    store.put_account(&account).unwrap();

    let refreshed = ledger.balance(account.id).await.unwrap();
    assert_eq!(refreshed.balance, dec!(400));
    assert_eq!(refreshed.carry_over_credits, Decimal::ZERO);
    assert!(refreshed.carry_over_expires_at.is_none());
    assert_decomposition(&refreshed);

    // A second read must not expire anything further.
    let again = ledger.balance(account.id).await.unwrap();
    assert_eq!(again.balance, dec!(400));

    let transactions = store
        .list_transactions_by_account(&account.id, 10, 0)
        .unwrap();
    let expiries: Vec<_> = transactions
        .iter()
        .filter(|t| t.kind() == TransactionType::CarryOverExpiry)
        .collect();
    assert_eq!(expiries.len(), 1);
    assert_eq!(expiries[0].amount, dec!(-50));
}

#[tokio::test]
async fn expired_carry_over_not_spendable_by_deduct() {
    let (ledger, store, _dir) = setup();
    let mut account = account_with(dec!(60), dec!(10), dec!(50));
    account.carry_over_expires_at = Some(Utc::now() - Duration::hours(1));
    store.put_account(&account).unwrap();

    // Only the 10 base-plan credits remain spendable after expiry.
    let err = ledger
        .deduct(account.id, dec!(30), "late", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientCredits { balance, .. } if balance == dec!(10)
    ));
}

#[tokio::test]
async fn monthly_allocation_granted_exactly_once() {
    let (ledger, store, _dir) = setup();
    let mut account = account_with(dec!(100), dec!(100), Decimal::ZERO);
    account.last_credit_reset = Utc::now() - Duration::days(40);
    account.monthly_credits_used = dec!(900);
    account.membership = Some(Membership {
        tier: MembershipTier::Pro,
        status: MembershipStatus::Active,
        current_period_end: Utc::now() + Duration::days(10),
        created_at: Utc::now(),
    });
    store.put_account(&account).unwrap();

    let refreshed = ledger.balance(account.id).await.unwrap();
    assert_eq!(refreshed.balance, dec!(6100));
    assert_eq!(refreshed.monthly_credits_used, Decimal::ZERO);
    assert_decomposition(&refreshed);

    let again = ledger.balance(account.id).await.unwrap();
    assert_eq!(again.balance, dec!(6100));

    let allocations: Vec<_> = store
        .list_transactions_by_account(&account.id, 10, 0)
        .unwrap()
        .into_iter()
        .filter(|t| t.kind() == TransactionType::MonthlyAllocation)
        .collect();
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].amount, dec!(6000));
}

#[tokio::test]
async fn no_allocation_without_active_membership() {
    let (ledger, store, _dir) = setup();
    let mut account = account_with(dec!(100), dec!(100), Decimal::ZERO);
    account.last_credit_reset = Utc::now() - Duration::days(40);
    account.membership = Some(Membership {
        tier: MembershipTier::Pro,
        status: MembershipStatus::PastDue,
        current_period_end: Utc::now(),
        created_at: Utc::now(),
    });
    store.put_account(&account).unwrap();

    let refreshed = ledger.balance(account.id).await.unwrap();
    assert_eq!(refreshed.balance, dec!(100));
}

#[tokio::test]
async fn concurrent_deductions_serialize() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(100), dec!(100), Decimal::ZERO);
    store.put_account(&account).unwrap();

    // Only one of two 60-credit deductions can fit in a 100-credit balance.
    let (a, b) = tokio::join!(
        ledger.deduct(account.id, dec!(60), "first", None),
        ledger.deduct(account.id, dec!(60), "second", None),
    );
    assert!(a.is_ok() ^ b.is_ok());

    let account = store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(account.balance, dec!(40));
    assert_decomposition(&account);
}

#[tokio::test]
async fn add_credits_base_plan_bucket() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(10), dec!(10), Decimal::ZERO);
    store.put_account(&account).unwrap();

    let tx = ledger.add(account.id, dec!(25), "goodwill").await.unwrap();
    assert_eq!(tx.amount, dec!(25));
    assert_eq!(tx.balance_after, dec!(35));

    let account = store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(account.base_plan_credits, dec!(35));
    assert_decomposition(&account);
}

#[tokio::test]
async fn grant_applies_exactly_once() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(10), dec!(10), Decimal::ZERO);
    store.put_account(&account).unwrap();

    let grant = CreditGrant::new(account.id, dec!(100), GrantCategory::Paid, None);
    store.put_grant(&grant).unwrap();

    let tx = ledger.apply_grant(grant.id).await.unwrap();
    assert_eq!(tx.amount, dec!(100));
    assert_eq!(tx.balance_after, dec!(110));

    let stored = store.get_grant(&grant.id).unwrap().unwrap();
    assert_eq!(stored.status, GrantStatus::Applied);
    assert!(stored.applied_at.is_some());

    // Second application is rejected.
    let err = ledger.apply_grant(grant.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::GrantNotPending { .. }));

    let account = store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(account.balance, dec!(110));
}

#[tokio::test]
async fn concurrent_grant_applications_credit_once() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(10), dec!(10), Decimal::ZERO);
    store.put_account(&account).unwrap();

    let grant = CreditGrant::new(account.id, dec!(100), GrantCategory::Paid, None);
    store.put_grant(&grant).unwrap();

    // The loser of the race must see the settled grant, not its pre-lock
    // pending snapshot.
    let (a, b) = tokio::join!(ledger.apply_grant(grant.id), ledger.apply_grant(grant.id));
    assert!(a.is_ok() ^ b.is_ok());

    let account = store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(account.balance, dec!(110));
    assert_decomposition(&account);

    let grants: Vec<_> = store
        .list_transactions_by_account(&account.id, 10, 0)
        .unwrap()
        .into_iter()
        .filter(|t| t.kind() == TransactionType::Grant)
        .collect();
    assert_eq!(grants.len(), 1);
}

#[tokio::test]
async fn expired_grant_is_voided_not_applied() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(10), dec!(10), Decimal::ZERO);
    store.put_account(&account).unwrap();

    let grant = CreditGrant::new(
        account.id,
        dec!(100),
        GrantCategory::Promotional,
        Some(Utc::now() - Duration::days(1)),
    );
    store.put_grant(&grant).unwrap();

    let err = ledger.apply_grant(grant.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::GrantNotPending { .. }));

    let stored = store.get_grant(&grant.id).unwrap().unwrap();
    assert_eq!(stored.status, GrantStatus::Voided);

    let account = store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(account.balance, dec!(10));
}

#[tokio::test]
async fn auto_top_up_respects_threshold_and_monthly_cap() {
    let (ledger, store, _dir) = setup();
    let mut account = account_with(dec!(30), dec!(30), Decimal::ZERO);
    account.auto_top_up = Some(AutoTopUpConfig {
        enabled: true,
        threshold_credits: dec!(50),
        top_up_credits: dec!(100),
        payment_method_id: "pm_1".into(),
        max_monthly_top_ups: 1,
    });
    store.put_account(&account).unwrap();

    assert!(ledger.apply_auto_top_up(account.id).await.unwrap());
    let refreshed = store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(refreshed.balance, dec!(130));
    assert_eq!(refreshed.top_ups_this_month, 1);

    // Above threshold now; and the monthly cap is exhausted anyway.
    assert!(!ledger.apply_auto_top_up(account.id).await.unwrap());
}

#[tokio::test]
async fn deduction_source_lands_in_transaction_detail() {
    let (ledger, store, _dir) = setup();
    let account = account_with(dec!(100), dec!(100), Decimal::ZERO);
    store.put_account(&account).unwrap();

    let tx = ledger
        .deduct(account.id, dec!(5), "request served", Some("app_request"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        tx.detail,
        TransactionDetail::Usage {
            carry_over_spent: Decimal::ZERO,
            base_plan_spent: dec!(5),
            source: Some("app_request".into()),
        }
    );

    let stored = store.get_transaction(&tx.id).unwrap().unwrap();
    assert_eq!(stored.detail, tx.detail);
}

#[tokio::test]
async fn unknown_account_is_not_found() {
    let (ledger, _store, _dir) = setup();
    let err = ledger.balance(AccountId::generate()).await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound { .. }));
}
