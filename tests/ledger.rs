mod common;

use brewpass::config::LedgerConfig;
use brewpass::model::{ConsumptionStatus, FulfillmentMode};
use brewpass::repository::stmt;
use brewpass::{
    CatalogRepository, MemoryExecutor, QueryExecutor, Redemption, Row, ShopError, Statement,
    StoreError, SubscriptionLedger, TransactionalExecutor,
};
use chrono::{NaiveDate, NaiveTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SUBSCRIPTION: i64 = 1;

fn fast_retries() -> LedgerConfig {
    LedgerConfig {
        max_attempts: 3,
        retry_backoff_ms: 1,
        timeout_ms: 5_000,
    }
}

fn latte(quantity: i32) -> Redemption {
    Redemption::new(SUBSCRIPTION, common::MEMBER, "LATTE", quantity)
}

fn usage(executor: &MemoryExecutor) -> i32 {
    executor
        .rows("subscriptions")
        .into_iter()
        .find(|row| row.get::<i64>("subscription_id").unwrap() == SUBSCRIPTION)
        .unwrap()
        .get("usage")
        .unwrap()
}

#[test]
fn test_sequential_redemptions_until_insufficient() {
    let executor = common::catalog();
    common::with_subscriptions(&executor, 10);
    let ledger = SubscriptionLedger::new(&executor, fast_retries());

    ledger.consume(&latte(4)).unwrap();
    ledger.consume(&latte(4)).unwrap();
    assert_eq!(usage(&executor), 2);

    match ledger.consume(&latte(4)) {
        Err(ShopError::InsufficientUsage {
            requested,
            remaining,
            ..
        }) => {
            assert_eq!(requested, 4);
            assert_eq!(remaining, 2);
        }
        other => panic!("expected InsufficientUsage, got {other:?}"),
    }
    assert_eq!(usage(&executor), 2);
    assert_eq!(ledger.history(SUBSCRIPTION).unwrap().len(), 2);
}

#[test]
fn test_redemption_records_request_details() {
    let executor = common::catalog();
    common::with_subscriptions(&executor, 10);
    let ledger = SubscriptionLedger::new(&executor, fast_retries());

    let pickup_date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let pickup_time = NaiveTime::from_hms_opt(9, 15, 0).unwrap();
    let order = ledger
        .consume(
            &latte(1)
                .with_mode(FulfillmentMode::DineIn)
                .with_comment("oat milk")
                .with_pickup(pickup_date, pickup_time),
        )
        .unwrap();

    let stored = ledger.history(SUBSCRIPTION).unwrap();
    assert_eq!(stored, vec![order.clone()]);
    assert_eq!(order.status, ConsumptionStatus::Pending);
    assert_eq!(order.mode, FulfillmentMode::DineIn);
    assert_eq!(order.comment.as_deref(), Some("oat milk"));
    assert_eq!(order.pickup_date, Some(pickup_date));
    assert_eq!(order.pickup_time, Some(pickup_time));
}

/// Lets another writer take `taken` units right after the first row lock,
/// as a session would if the lock did not hold. `MemoryExecutor` runs
/// transactions one at a time, so the concurrent tests below cannot tell
/// whether the ledger's own guard works; this wrapper can.
struct RivalAfterLock<'a> {
    inner: &'a MemoryExecutor,
    taken: i32,
    fired: AtomicBool,
}

impl QueryExecutor for RivalAfterLock<'_> {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        self.inner.query(statement)
    }

    fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        self.inner.execute(statement)
    }
}

impl TransactionalExecutor for RivalAfterLock<'_> {
    fn with_transaction<T, X, F>(&self, timeout: Option<Duration>, work: F) -> Result<T, X>
    where
        F: FnOnce(&dyn QueryExecutor) -> Result<T, X>,
        X: From<StoreError>,
    {
        self.inner
            .with_transaction(timeout, |tx| work(&Interleaved { tx, rival: self }))
    }
}

struct Interleaved<'t> {
    tx: &'t dyn QueryExecutor,
    rival: &'t RivalAfterLock<'t>,
}

impl QueryExecutor for Interleaved<'_> {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        let rows = self.tx.query(statement)?;
        let first_lock = statement.name() == stmt::SUBSCRIPTION_LOCK
            && !self.rival.fired.swap(true, Ordering::SeqCst);
        if first_lock {
            CatalogRepository::new(self.tx)
                .decrement_usage(SUBSCRIPTION, self.rival.taken)
                .map_err(|e| StoreError::Other(e.to_string()))?;
        }
        Ok(rows)
    }

    fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        self.tx.execute(statement)
    }
}

#[test]
fn test_guarded_decrement_catches_a_change_after_the_read() {
    let executor = common::catalog();
    common::with_subscriptions(&executor, 10);
    let rival = RivalAfterLock {
        inner: &executor,
        taken: 8,
        fired: AtomicBool::new(false),
    };
    let ledger = SubscriptionLedger::new(&rival, fast_retries());

    // first attempt read usage 10, but only 2 remain at the decrement
    ledger.consume(&latte(3)).unwrap();

    assert_eq!(executor.executed(stmt::SUBSCRIPTION_LOCK), 2);
    assert_eq!(executor.rows("consumption_orders").len(), 1);
    // the rolled-back attempt took the rival's write with it
    assert_eq!(usage(&executor), 7);
}

#[test]
fn test_concurrent_redemptions_never_overdraw() {
    let executor = Arc::new(common::catalog());
    common::with_subscriptions(&executor, 6);
    let ledger = Arc::new(SubscriptionLedger::new(executor.clone(), fast_retries()));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ledger = ledger.clone();
            may::go!(move || ledger.consume(&latte(4)))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.error_code() == "INSUFFICIENT_USAGE"));
    assert_eq!(usage(&executor), 2);
    assert_eq!(executor.rows("consumption_orders").len(), 1);
}

#[test]
fn test_many_concurrent_single_unit_redemptions() {
    let executor = Arc::new(common::catalog());
    common::with_subscriptions(&executor, 10);
    let ledger = Arc::new(SubscriptionLedger::new(executor.clone(), fast_retries()));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ledger = ledger.clone();
            may::go!(move || ledger.consume(&latte(1)))
        })
        .collect();
    let succeeded = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();

    assert_eq!(succeeded, 10);
    assert_eq!(usage(&executor), 0);
    assert_eq!(executor.rows("consumption_orders").len(), 10);
}

#[test]
fn test_zero_quantity_is_invalid() {
    let executor = common::catalog();
    common::with_subscriptions(&executor, 10);
    let ledger = SubscriptionLedger::new(&executor, fast_retries());

    let err = ledger.consume(&latte(0)).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    assert_eq!(usage(&executor), 10);
}

#[test]
fn test_ownership_activity_and_item_checks() {
    let executor = common::catalog();
    common::with_subscriptions(&executor, 10);
    let ledger = SubscriptionLedger::new(&executor, fast_retries());

    // subscription 2 belongs to the other member
    let err = ledger
        .consume(&Redemption::new(2, common::MEMBER, "LATTE", 1))
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");

    let err = ledger
        .consume(&Redemption::new(404, common::MEMBER, "LATTE", 1))
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");

    let err = ledger
        .consume(&Redemption::new(SUBSCRIPTION, common::MEMBER, "CROISSANT", 1))
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_ARGUMENT");

    let mut inactive = brewpass::fixtures::subscription(9, common::MEMBER, "P-C001-1", "LATTE", 5);
    inactive.active = false;
    executor.insert("subscriptions", inactive);
    let err = ledger
        .consume(&Redemption::new(9, common::MEMBER, "LATTE", 1))
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_ARGUMENT");

    assert!(executor.rows("consumption_orders").is_empty());
}

#[test]
fn test_failed_decrement_rolls_back_order() {
    let executor = common::catalog();
    common::with_subscriptions(&executor, 10);
    let ledger = SubscriptionLedger::new(&executor, fast_retries());

    executor.fail_on(stmt::SUBSCRIPTION_DECREMENT);
    let err = ledger.consume(&latte(3)).unwrap_err();
    assert_eq!(err.error_code(), "STORAGE_ERROR");
    assert!(executor.rows("consumption_orders").is_empty());
    assert_eq!(usage(&executor), 10);
}

#[test]
fn test_conflicts_are_retried() {
    let executor = common::catalog();
    common::with_subscriptions(&executor, 10);
    let ledger = SubscriptionLedger::new(&executor, fast_retries());

    executor.conflict_on(stmt::SUBSCRIPTION_DECREMENT, 2);
    ledger.consume(&latte(3)).unwrap();

    assert_eq!(executor.executed(stmt::SUBSCRIPTION_LOCK), 3);
    assert_eq!(executor.rows("consumption_orders").len(), 1);
    assert_eq!(usage(&executor), 7);
}

#[test]
fn test_exhausted_retries_report_conflict() {
    let executor = common::catalog();
    common::with_subscriptions(&executor, 10);
    let ledger = SubscriptionLedger::new(&executor, fast_retries());

    executor.conflict_on(stmt::SUBSCRIPTION_LOCK, 10);
    let err = ledger.consume(&latte(3)).unwrap_err();
    assert_eq!(err.error_code(), "CONFLICT");
    assert!(err.is_retryable());
    assert_eq!(executor.executed(stmt::SUBSCRIPTION_LOCK), 3);
    assert_eq!(usage(&executor), 10);
}

#[test]
fn test_deadline_rolls_back_everything() {
    let executor = common::catalog();
    common::with_subscriptions(&executor, 10);
    let ledger = SubscriptionLedger::new(
        &executor,
        LedgerConfig {
            timeout_ms: 30,
            ..fast_retries()
        },
    );

    executor.set_latency(Some(Duration::from_millis(20)));
    let err = ledger.consume(&latte(3)).unwrap_err();
    executor.set_latency(None);

    assert_eq!(err.error_code(), "TIMEOUT");
    assert!(executor.rows("consumption_orders").is_empty());
    assert_eq!(usage(&executor), 10);
}

#[test]
fn test_statement_timeout_never_outlasts_the_deadline() {
    let executor = common::catalog();
    common::with_subscriptions(&executor, 10);
    let ledger = SubscriptionLedger::new(
        &executor,
        LedgerConfig {
            timeout_ms: 30,
            ..fast_retries()
        },
    )
    .with_statement_timeout(Some(Duration::from_secs(5)));

    // the row lock alone takes longer than the whole deadline
    executor.set_latency(Some(Duration::from_millis(60)));
    let err = ledger.consume(&latte(3)).unwrap_err();
    executor.set_latency(None);

    assert_eq!(err.error_code(), "TIMEOUT");
    assert_eq!(executor.executed(stmt::SUBSCRIPTION_LOCK), 1);
    assert_eq!(executor.executed(stmt::CONSUMPTION_INSERT), 0);
    assert_eq!(usage(&executor), 10);
}

#[test]
fn test_history_keeps_statuses_set_by_fulfillment() {
    let executor = common::catalog();
    common::with_subscriptions(&executor, 10);
    let ledger = SubscriptionLedger::new(&executor, fast_retries());
    ledger.consume(&latte(1)).unwrap();

    let order_date = NaiveDate::from_ymd_opt(2024, 6, 2)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    executor.seed(
        "consumption_orders",
        Row::new()
            .with("subscription_id", SUBSCRIPTION)
            .with("member_id", common::MEMBER)
            .with("item_code", "LATTE")
            .with("mode", "TAKEAWAY")
            .with("order_date", order_date)
            .with("status", "ON_HOLD")
            .with("quantity", 1i32)
            .with("comment", Option::<String>::None)
            .with("pickup_time", Option::<NaiveTime>::None)
            .with("pickup_date", Option::<NaiveDate>::None),
    );

    let history = ledger.history(SUBSCRIPTION).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, ConsumptionStatus::Pending);
    assert_eq!(
        history[1].status,
        ConsumptionStatus::Other("ON_HOLD".to_string())
    );
    let json = serde_json::to_value(&history[1]).unwrap();
    assert_eq!(json["status"], "ON_HOLD");
}
