//! Usage pipeline and reconciliation tests against a real RocksDB store.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use tally_core::{Account, AccountId, AutoTopUpConfig, JobStatus, PeriodStatus, ResourceUsage};
use tally_meter::MeterQueue;
use tally_service::{Ledger, Reconciler, UsagePipeline};
use tally_store::{RocksStore, Store};

fn setup() -> (UsagePipeline, MeterQueue, Arc<dyn Store>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn Store> = Arc::new(RocksStore::open(dir.path()).unwrap());
    let queue = MeterQueue::new(Arc::clone(&store));
    let pipeline = UsagePipeline::new(Arc::clone(&store), queue.clone());
    (pipeline, queue, store, dir)
}

fn seeded_account(store: &Arc<dyn Store>, balance: Decimal) -> Account {
    let mut account = Account::new(AccountId::generate());
    account.balance = balance;
    account.base_plan_credits = balance;
    account.external_customer_id = Some(format!("cus_{}", account.id));
    store.put_account(&account).unwrap();
    account
}

#[test]
fn record_usage_creates_period_on_first_touch() {
    let (pipeline, _queue, store, _dir) = setup();
    let account = seeded_account(&store, dec!(100));

    let sample = ResourceUsage {
        invocations: 500,
        compute_ms: 60_000,
        ..ResourceUsage::default()
    };
    let period = pipeline.record_usage(account.id, &sample).unwrap();

    assert_eq!(period.status, PeriodStatus::Pending);
    assert_eq!(period.usage.invocations, 500);

    // A second sample accumulates into the same row.
    let period = pipeline.record_usage(account.id, &sample).unwrap();
    assert_eq!(period.usage.invocations, 1000);
    assert_eq!(period.usage.compute_ms, 120_000);

    let (period_start, _) = tally_core::period_bounds(Utc::now());
    let stored = store.get_period(&account.id, period_start).unwrap().unwrap();
    assert_eq!(stored.usage.invocations, 1000);
}

#[test]
fn report_usage_enqueues_once_per_period() {
    let (pipeline, queue, store, _dir) = setup();
    let account = seeded_account(&store, dec!(100));

    pipeline
        .record_usage(
            account.id,
            &ResourceUsage {
                invocations: 10_000,
                compute_ms: 3_600_000,
                ..ResourceUsage::default()
            },
        )
        .unwrap();

    let first = pipeline.report_usage(account.id).unwrap();
    assert!(!first.skipped);
    assert_eq!(first.queued, 2); // invocations + compute

    // Period-level idempotency: the second call enqueues nothing.
    let second = pipeline.report_usage(account.id).unwrap();
    assert!(second.skipped);
    assert_eq!(second.queued, 0);

    let depths = queue.depths().unwrap();
    assert_eq!(depths.waiting, 2);

    let (period_start, _) = tally_core::period_bounds(Utc::now());
    let period = store.get_period(&account.id, period_start).unwrap().unwrap();
    assert_eq!(period.status, PeriodStatus::Reported);
}

#[test]
fn report_usage_event_values_and_keys() {
    let (pipeline, _queue, store, _dir) = setup();
    let account = seeded_account(&store, dec!(100));

    pipeline
        .record_usage(
            account.id,
            &ResourceUsage {
                invocations: 10_000,
                compute_ms: 3_600_000, // one hour at 0.5 GB = 4 credits
                ..ResourceUsage::default()
            },
        )
        .unwrap();
    pipeline.report_usage(account.id).unwrap();

    let (period_start, _) = tally_core::period_bounds(Utc::now());
    let period = store.get_period(&account.id, period_start).unwrap().unwrap();

    // Invocations are metered as a raw count under a deterministic key.
    let key = format!("{}:app_invocations", period.key());
    let job = store.get_job(&key).unwrap().unwrap();
    assert_eq!(job.value, dec!(10000));
    assert_eq!(
        job.external_customer_id,
        account.external_customer_id.unwrap()
    );

    // Compute is metered in whole billable credits.
    let key = format!("{}:compute_credits", period.key());
    let job = store.get_job(&key).unwrap().unwrap();
    assert_eq!(job.value, dec!(4));
}

#[test]
fn report_usage_with_no_period_is_skipped() {
    let (pipeline, _queue, store, _dir) = setup();
    let account = seeded_account(&store, dec!(100));

    let outcome = pipeline.report_usage(account.id).unwrap();
    assert!(outcome.skipped);
    assert_eq!(outcome.queued, 0);
}

#[test]
fn sync_usage_resubmits_cumulative_values() {
    let (pipeline, queue, store, _dir) = setup();
    let ledger = Ledger::new(Arc::clone(&store));
    let reconciler = Reconciler::new(Arc::clone(&store), queue.clone(), ledger);

    let active = seeded_account(&store, dec!(100));
    let idle = seeded_account(&store, dec!(100));

    pipeline
        .record_usage(
            active.id,
            &ResourceUsage {
                invocations: 42,
                ..ResourceUsage::default()
            },
        )
        .unwrap();

    let synced = reconciler.sync_usage().unwrap();
    assert_eq!(synced, 1);

    // Idle account has no period row and is skipped.
    let (period_start, _) = tally_core::period_bounds(Utc::now());
    assert!(store.get_period(&idle.id, period_start).unwrap().is_none());

    // One job row per (account, resource, cycle).
    let period = store.get_period(&active.id, period_start).unwrap().unwrap();
    let key = format!("sync:{}:app_invocations", period.key());
    let mut job = store.get_job(&key).unwrap().unwrap();
    assert_eq!(job.value, dec!(42));

    // Even a delivered sync job re-arms with the newer cumulative value
    // instead of appending a second row.
    job.status = JobStatus::Completed;
    store.put_job(&job).unwrap();

    pipeline
        .record_usage(
            active.id,
            &ResourceUsage {
                invocations: 8,
                ..ResourceUsage::default()
            },
        )
        .unwrap();
    let synced = reconciler.sync_usage().unwrap();
    assert_eq!(synced, 1);

    let job = store.get_job(&key).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.value, dec!(50));

    let depths = queue.depths().unwrap();
    assert_eq!(depths.waiting, 1);
}

#[test]
fn concurrent_recording_accumulates_every_sample() {
    let (pipeline, _queue, store, _dir) = setup();
    let account = seeded_account(&store, dec!(100));

    let barrier = Arc::new(std::sync::Barrier::new(8));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = pipeline.clone();
        let barrier = Arc::clone(&barrier);
        let account_id = account.id;
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            for _ in 0..25 {
                pipeline
                    .record_usage(
                        account_id,
                        &ResourceUsage {
                            invocations: 1,
                            ..ResourceUsage::default()
                        },
                    )
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // No sample may be lost to an interleaved read-modify-write.
    let (period_start, _) = tally_core::period_bounds(Utc::now());
    let period = store.get_period(&account.id, period_start).unwrap().unwrap();
    assert_eq!(period.usage.invocations, 200);
}

#[tokio::test]
async fn auto_top_up_scan_is_bounded() {
    let (_pipeline, queue, store, _dir) = setup();
    let ledger = Ledger::new(Arc::clone(&store));
    let reconciler = Reconciler::new(Arc::clone(&store), queue, ledger);

    let mut low = seeded_account(&store, dec!(10));
    low.auto_top_up = Some(AutoTopUpConfig {
        enabled: true,
        threshold_credits: dec!(50),
        top_up_credits: dec!(100),
        payment_method_id: "pm_low".into(),
        max_monthly_top_ups: 5,
    });
    store.put_account(&low).unwrap();

    let mut rich = seeded_account(&store, dec!(500));
    rich.auto_top_up = Some(AutoTopUpConfig {
        enabled: true,
        threshold_credits: dec!(50),
        top_up_credits: dec!(100),
        payment_method_id: "pm_rich".into(),
        max_monthly_top_ups: 5,
    });
    store.put_account(&rich).unwrap();

    let mut disabled = seeded_account(&store, dec!(10));
    disabled.auto_top_up = Some(AutoTopUpConfig {
        enabled: false,
        threshold_credits: dec!(50),
        top_up_credits: dec!(100),
        payment_method_id: "pm_off".into(),
        max_monthly_top_ups: 5,
    });
    store.put_account(&disabled).unwrap();

    let topped_up = reconciler.run_auto_top_ups().await.unwrap();
    assert_eq!(topped_up, 1);

    assert_eq!(
        store.get_account(&low.id).unwrap().unwrap().balance,
        dec!(110)
    );
    assert_eq!(
        store.get_account(&rich.id).unwrap().unwrap().balance,
        dec!(500)
    );
    assert_eq!(
        store.get_account(&disabled.id).unwrap().unwrap().balance,
        dec!(10)
    );
}
