//! Prepaid subscription ledger.
//!
//! [`SubscriptionLedger::consume`] is the only path that mutates
//! `subscriptions.usage`. Each redemption runs in one transaction: the
//! subscription row is locked, checked, a `PENDING` consumption order is
//! written and usage is decremented with a guarded update. Either all of it
//! commits or none of it does.
//!
//! Conflicts (guard misses, serialization failures, deadlocks) are retried
//! with jittered backoff up to the configured attempt count. The configured
//! deadline covers every attempt; running past it rolls back and reports
//! `Timeout`.

use crate::config::LedgerConfig;
use crate::error::ShopError;
use crate::executor::{QueryExecutor, TransactionalExecutor};
use crate::model::{ConsumptionOrder, FulfillmentMode, NewConsumptionOrder, SubscriptionRow};
use crate::repository::CatalogRepository;
use chrono::{NaiveDate, NaiveTime, Utc};
use rand::Rng;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// A member's request to redeem prepaid quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct Redemption {
    pub subscription_id: i64,
    pub member_id: i64,
    pub item_code: String,
    pub quantity: i32,
    pub mode: FulfillmentMode,
    pub comment: Option<String>,
    pub pickup_time: Option<NaiveTime>,
    pub pickup_date: Option<NaiveDate>,
}

impl Redemption {
    /// A takeaway redemption with no comment or pickup slot.
    pub fn new(
        subscription_id: i64,
        member_id: i64,
        item_code: impl Into<String>,
        quantity: i32,
    ) -> Self {
        Self {
            subscription_id,
            member_id,
            item_code: item_code.into(),
            quantity,
            mode: FulfillmentMode::Takeaway,
            comment: None,
            pickup_time: None,
            pickup_date: None,
        }
    }

    pub fn with_mode(mut self, mode: FulfillmentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_pickup(mut self, date: NaiveDate, time: NaiveTime) -> Self {
        self.pickup_date = Some(date);
        self.pickup_time = Some(time);
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline(Option<Instant>);

impl Deadline {
    fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| Instant::now() + t))
    }

    /// Time left, or `Timeout` once the deadline has passed.
    fn remaining(&self) -> Result<Option<Duration>, ShopError> {
        match self.0 {
            None => Ok(None),
            Some(at) => {
                let now = Instant::now();
                if now >= at {
                    Err(ShopError::Timeout {
                        operation: "consume",
                    })
                } else {
                    Ok(Some(at - now))
                }
            }
        }
    }

    /// The tighter of `statement_timeout` and the time left.
    fn bound(&self, statement_timeout: Option<Duration>) -> Result<Option<Duration>, ShopError> {
        Ok(match (self.remaining()?, statement_timeout) {
            (Some(left), Some(limit)) => Some(left.min(limit)),
            (left, limit) => left.or(limit),
        })
    }
}

pub struct SubscriptionLedger<E> {
    executor: E,
    config: LedgerConfig,
    statement_timeout: Option<Duration>,
}

impl<E: TransactionalExecutor> SubscriptionLedger<E> {
    pub fn new(executor: E, config: LedgerConfig) -> Self {
        Self {
            executor,
            config,
            statement_timeout: None,
        }
    }

    /// Bound each statement individually, on top of the overall deadline.
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Redeem `quantity` units of a subscription.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a non-positive quantity, an inactive
    ///   subscription or an item the subscription does not cover
    /// - `NotFound` when the subscription does not exist or belongs to
    ///   another member
    /// - `InsufficientUsage` when `quantity` exceeds the remaining usage
    /// - `Conflict` when every attempt hit a concurrent modification
    /// - `Timeout` when the deadline passed; nothing is committed
    pub fn consume(&self, redemption: &Redemption) -> Result<ConsumptionOrder, ShopError> {
        #[cfg(feature = "tracing")]
        let _span =
            tracing_helpers::redemption_span(redemption.subscription_id, redemption.quantity)
                .entered();

        let result = self.consume_with_retry(redemption);

        #[cfg(feature = "metrics")]
        METRICS.record_redemption(match &result {
            Ok(_) => "ok",
            Err(e) => e.error_code(),
        });
        match &result {
            Ok(order) => log::info!(
                "Redeemed {} x {} on subscription {} (order {})",
                order.quantity,
                order.item_code,
                order.subscription_id,
                order.id
            ),
            Err(e) => log::debug!(
                "Redemption on subscription {} rejected: {e}",
                redemption.subscription_id
            ),
        }
        result
    }

    fn consume_with_retry(&self, redemption: &Redemption) -> Result<ConsumptionOrder, ShopError> {
        if redemption.quantity <= 0 {
            return Err(ShopError::InvalidArgument(format!(
                "quantity must be positive, got {}",
                redemption.quantity
            )));
        }

        let deadline = Deadline::after(self.config.timeout());
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let remaining = deadline.remaining()?;
            match self.attempt(redemption, remaining, deadline) {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    #[cfg(feature = "metrics")]
                    METRICS.record_redemption_conflict();
                    log::debug!(
                        "Redemption on subscription {} conflicted (attempt {attempt}/{max_attempts}): {e}",
                        redemption.subscription_id
                    );
                    let mut pause = self.backoff(attempt);
                    if let Some(left) = deadline.remaining()? {
                        pause = pause.min(left);
                    }
                    may::coroutine::sleep(pause);
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    log::warn!(
                        "Redemption on subscription {} gave up after {max_attempts} attempts: {e}",
                        redemption.subscription_id
                    );
                    return Err(ShopError::Conflict(format!(
                        "subscription {} still contended after {max_attempts} attempts",
                        redemption.subscription_id
                    )));
                }
                other => return other,
            }
        }
    }

    fn attempt(
        &self,
        redemption: &Redemption,
        timeout: Option<Duration>,
        deadline: Deadline,
    ) -> Result<ConsumptionOrder, ShopError> {
        self.executor.with_transaction(timeout, |tx| {
            let subscription = self
                .bounded(tx, &deadline)?
                .lock_subscription(redemption.subscription_id)?
                .filter(|s| s.member_id == redemption.member_id)
                .ok_or_else(|| {
                    ShopError::NotFound(format!("subscription {}", redemption.subscription_id))
                })?;
            if !subscription.active {
                return Err(ShopError::InvalidArgument(format!(
                    "subscription {} is not active",
                    subscription.subscription_id
                )));
            }
            if subscription.item_code != redemption.item_code {
                return Err(ShopError::InvalidArgument(format!(
                    "subscription {} does not cover item {}",
                    subscription.subscription_id, redemption.item_code
                )));
            }
            if redemption.quantity > subscription.usage {
                return Err(ShopError::InsufficientUsage {
                    subscription_id: subscription.subscription_id,
                    requested: redemption.quantity,
                    remaining: subscription.usage,
                });
            }

            let order = self.bounded(tx, &deadline)?.insert_consumption_order(NewConsumptionOrder {
                subscription_id: redemption.subscription_id,
                member_id: redemption.member_id,
                item_code: redemption.item_code.clone(),
                mode: redemption.mode,
                order_date: Utc::now().naive_utc(),
                quantity: redemption.quantity,
                comment: redemption.comment.clone(),
                pickup_time: redemption.pickup_time,
                pickup_date: redemption.pickup_date,
            })?;

            let decremented = self
                .bounded(tx, &deadline)?
                .decrement_usage(redemption.subscription_id, redemption.quantity)?;
            if decremented == 0 {
                return Err(ShopError::Conflict(format!(
                    "usage of subscription {} changed during redemption",
                    redemption.subscription_id
                )));
            }

            deadline.remaining()?;
            Ok(order)
        })
    }

    /// Repository whose statements cannot outlive the deadline. Each
    /// statement's `SET LOCAL statement_timeout` replaces the transaction's,
    /// so every one carries the time left.
    fn bounded<'t>(
        &self,
        tx: &'t dyn QueryExecutor,
        deadline: &Deadline,
    ) -> Result<CatalogRepository<'t>, ShopError> {
        Ok(CatalogRepository::new(tx).with_timeout(deadline.bound(self.statement_timeout)?))
    }

    /// Base backoff doubled per attempt, plus up to 100% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff() * 2u32.saturating_pow(attempt - 1);
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let jitter = rand::thread_rng().gen_range(0..=base_ms);
        base + Duration::from_millis(jitter)
    }

    pub fn subscription(&self, subscription_id: i64) -> Result<Option<SubscriptionRow>, ShopError> {
        self.repository().find_subscription(subscription_id)
    }

    /// Every subscription of the member, active or not.
    pub fn member_subscriptions(&self, member_id: i64) -> Result<Vec<SubscriptionRow>, ShopError> {
        self.repository().find_member_subscriptions(member_id)
    }

    /// Consumption orders written against a subscription, oldest first.
    pub fn history(&self, subscription_id: i64) -> Result<Vec<ConsumptionOrder>, ShopError> {
        self.repository().find_consumption_orders(subscription_id)
    }

    fn repository(&self) -> CatalogRepository<'_> {
        CatalogRepository::new(&self.executor).with_timeout(self.statement_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Row;
    use crate::memory::MemoryExecutor;
    use crate::model::ConsumptionStatus;

    fn seeded(usage: i32) -> (MemoryExecutor, i64) {
        let executor = MemoryExecutor::new();
        let id = executor
            .seed(
                "subscriptions",
                Row::new()
                    .with("member_id", 7i64)
                    .with("plan_id", "P1")
                    .with("item_code", "LATTE")
                    .with("name", "Latte x10")
                    .with("usage", usage)
                    .with("active", true)
                    .with(
                        "subscribed_date",
                        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                    ),
            )
            .unwrap();
        (executor, id)
    }

    #[test]
    fn test_consume_writes_pending_order_and_decrements() {
        let (executor, id) = seeded(10);
        let ledger = SubscriptionLedger::new(&executor, LedgerConfig::default());

        let order = ledger.consume(&Redemption::new(id, 7, "LATTE", 3)).unwrap();
        assert_eq!(order.status, ConsumptionStatus::Pending);
        assert_eq!(order.quantity, 3);
        assert_eq!(ledger.subscription(id).unwrap().unwrap().usage, 7);
        assert_eq!(ledger.history(id).unwrap(), vec![order]);
    }

    #[test]
    fn test_non_positive_quantity_is_rejected_before_storage() {
        let (executor, id) = seeded(10);
        let ledger = SubscriptionLedger::new(&executor, LedgerConfig::default());

        for quantity in [0, -1] {
            let err = ledger
                .consume(&Redemption::new(id, 7, "LATTE", quantity))
                .unwrap_err();
            assert_eq!(err.error_code(), "INVALID_ARGUMENT");
        }
        assert_eq!(executor.executed(crate::repository::stmt::SUBSCRIPTION_LOCK), 0);
    }

    #[test]
    fn test_other_members_subscription_is_not_found() {
        let (executor, id) = seeded(10);
        let ledger = SubscriptionLedger::new(&executor, LedgerConfig::default());
        let err = ledger.consume(&Redemption::new(id, 8, "LATTE", 1)).unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_deadline_bound_takes_the_tighter_limit() {
        let open = Deadline::after(None);
        assert_eq!(open.bound(None).unwrap(), None);
        assert_eq!(
            open.bound(Some(Duration::from_secs(5))).unwrap(),
            Some(Duration::from_secs(5))
        );

        let soon = Deadline::after(Some(Duration::from_secs(1)));
        let bound = soon.bound(Some(Duration::from_secs(5))).unwrap().unwrap();
        assert!(bound <= Duration::from_secs(1));
        assert!(soon.bound(None).unwrap().unwrap() <= Duration::from_secs(1));

        let passed = Deadline::after(Some(Duration::ZERO));
        assert_eq!(
            passed.bound(Some(Duration::from_secs(5))).unwrap_err().error_code(),
            "TIMEOUT"
        );
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let (executor, _) = seeded(1);
        let ledger = SubscriptionLedger::new(&executor, LedgerConfig::default());
        let base = ledger.config().retry_backoff();
        for attempt in 1..=3 {
            let pause = ledger.backoff(attempt);
            let floor = base * 2u32.pow(attempt - 1);
            assert!(pause >= floor && pause <= floor * 2, "{pause:?}");
        }
    }
}
