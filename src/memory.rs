//! In-process executor.
//!
//! [`MemoryExecutor`] keeps every table as a list of [`Row`]s and answers the
//! repository's named statements with the same semantics the SQL has: the
//! same filters, orderings, guarded decrement and constraint checks. It backs
//! the test suite and local demos.
//!
//! Transactions are serialized by a coroutine-aware lock and run against a
//! snapshot that is restored on rollback. Faults and latency can be injected
//! per statement name.

use crate::executor::{QueryExecutor, Row, Statement, StoreError, TransactionalExecutor};
use crate::model::IntoRow;
use crate::repository::stmt;
use rust_decimal::Decimal;
use sea_query::{Value, ValueType};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
    next_id: HashMap<String, i64>,
}

#[derive(Debug, Clone)]
enum Fault {
    /// Fail every execution
    Always,
    /// Report a serialization conflict for the next `n` executions
    Conflict(usize),
}

/// Tables with a generated key, and the key column.
fn serial_column(table: &str) -> Option<&'static str> {
    match table {
        "subscriptions" => Some("subscription_id"),
        "locations" | "plans" | "orders" => None,
        _ => Some("id"),
    }
}

/// An executor holding all data in memory.
pub struct MemoryExecutor {
    tables: Mutex<Tables>,
    tx_lock: may::sync::Mutex<()>,
    faults: Mutex<HashMap<&'static str, Fault>>,
    latency: Mutex<Option<Duration>>,
    executed: Mutex<HashMap<&'static str, usize>>,
}

impl Default for MemoryExecutor {
    fn default() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            tx_lock: may::sync::Mutex::new(()),
            faults: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            executed: Mutex::new(HashMap::new()),
        }
    }
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row directly, bypassing statements. A generated key is
    /// assigned when the table has one and the row does not carry it.
    ///
    /// Returns the row's generated key, if the table has one.
    pub fn seed(&self, table: &str, mut row: Row) -> Option<i64> {
        let mut tables = lock(&self.tables);
        let id = serial_column(table).map(|column| match row.get::<i64>(column) {
            Ok(id) => {
                let next = tables.next_id.entry(table.to_string()).or_insert(1);
                *next = (*next).max(id + 1);
                id
            }
            Err(_) => {
                let id = allocate_id(&mut tables, table);
                row.set(column, id);
                id
            }
        });
        tables.rows.entry(table.to_string()).or_default().push(row);
        id
    }

    /// Seed a typed row.
    pub fn insert<T: IntoRow>(&self, table: &str, value: T) -> Option<i64> {
        self.seed(table, value.into_row())
    }

    /// Snapshot of a table's rows, in storage order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.tables)
            .rows
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every execution of the named statement fail.
    pub fn fail_on(&self, statement: &'static str) {
        lock(&self.faults).insert(statement, Fault::Always);
    }

    /// Make the next `times` executions of the named statement report a
    /// serialization conflict.
    pub fn conflict_on(&self, statement: &'static str, times: usize) {
        lock(&self.faults).insert(statement, Fault::Conflict(times));
    }

    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    /// Delay every statement by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    /// How many times the named statement reached the backend.
    pub fn executed(&self, statement: &str) -> usize {
        lock(&self.executed).get(statement).copied().unwrap_or(0)
    }

    fn run(&self, statement: &Statement, timeout: Option<Duration>) -> Result<Outcome, StoreError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_statement_span(statement.name()).entered();

        let start = Instant::now();
        *lock(&self.executed).entry(statement.name()).or_insert(0) += 1;

        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            may::coroutine::sleep(latency);
        }
        let result = self.check_fault(statement).and_then(|()| {
            let timeout = statement.timeout().or(timeout);
            if timeout.is_some_and(|limit| start.elapsed() > limit) {
                return Err(StoreError::Timeout(format!(
                    "{} exceeded {}ms",
                    statement.name(),
                    timeout.map_or(0, |t| t.as_millis())
                )));
            }
            apply(&mut lock(&self.tables), statement)
        });

        #[cfg(feature = "metrics")]
        {
            METRICS.record_statement(statement.name(), start.elapsed());
            if result.is_err() {
                METRICS.record_statement_error(statement.name());
            }
        }

        result
    }

    fn check_fault(&self, statement: &Statement) -> Result<(), StoreError> {
        let mut faults = lock(&self.faults);
        match faults.get_mut(statement.name()) {
            Some(Fault::Always) => Err(StoreError::Other(format!(
                "injected failure in {}",
                statement.name()
            ))),
            Some(Fault::Conflict(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Conflict(format!(
                    "could not serialize access in {}",
                    statement.name()
                )))
            }
            _ => Ok(()),
        }
    }

    fn serialized<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.tx_lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}

impl QueryExecutor for MemoryExecutor {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        self.serialized(|| self.run(statement, None).map(|outcome| outcome.rows))
    }

    fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        self.serialized(|| self.run(statement, None).map(|outcome| outcome.affected))
    }
}

impl TransactionalExecutor for MemoryExecutor {
    fn with_transaction<T, X, F>(&self, timeout: Option<Duration>, work: F) -> Result<T, X>
    where
        F: FnOnce(&dyn QueryExecutor) -> Result<T, X>,
        X: From<StoreError>,
    {
        let _guard = self.tx_lock.lock().unwrap_or_else(PoisonError::into_inner);

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();

        let snapshot = lock(&self.tables).clone();
        let transaction = MemoryTransaction {
            executor: self,
            timeout,
        };
        let result = work(&transaction);
        if result.is_err() {
            #[cfg(feature = "tracing")]
            let _span = tracing_helpers::rollback_transaction_span().entered();
            #[cfg(feature = "metrics")]
            METRICS.record_rollback();

            *lock(&self.tables) = snapshot;
            log::debug!("Rolled back in-memory transaction");
        } else {
            #[cfg(feature = "tracing")]
            let _span = tracing_helpers::commit_transaction_span().entered();
        }
        result
    }
}

/// Statement handle passed to transaction closures.
struct MemoryTransaction<'a> {
    executor: &'a MemoryExecutor,
    timeout: Option<Duration>,
}

impl QueryExecutor for MemoryTransaction<'_> {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        self.executor
            .run(statement, self.timeout)
            .map(|outcome| outcome.rows)
    }

    fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        self.executor
            .run(statement, self.timeout)
            .map(|outcome| outcome.affected)
    }
}

struct Outcome {
    rows: Vec<Row>,
    affected: u64,
}

impl Outcome {
    fn rows(rows: Vec<Row>) -> Self {
        let affected = rows.len() as u64;
        Self { rows, affected }
    }

    fn affected(affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            affected,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn allocate_id(tables: &mut Tables, table: &str) -> i64 {
    let next = tables.next_id.entry(table.to_string()).or_insert(1);
    let id = *next;
    *next += 1;
    id
}

fn arg<T: ValueType>(statement: &Statement, index: usize) -> Result<T, StoreError> {
    let value = statement.values().get(index).ok_or_else(|| {
        StoreError::QueryError(format!(
            "{} expects a parameter at position {}",
            statement.name(),
            index + 1
        ))
    })?;
    <T as ValueType>::try_from(value.clone()).map_err(|_| {
        StoreError::QueryError(format!(
            "{} parameter {} has unexpected type: {value:?}",
            statement.name(),
            index + 1
        ))
    })
}

/// Inclusive latitude range and one or two longitude ranges, as bound by the
/// box statements starting at `offset`.
struct BoxFilter {
    lat: (Decimal, Decimal),
    lon: Vec<(Decimal, Decimal)>,
}

impl BoxFilter {
    fn from_values(statement: &Statement, offset: usize) -> Result<Self, StoreError> {
        let lat = (arg(statement, offset)?, arg(statement, offset + 1)?);
        let mut lon = Vec::new();
        let mut index = offset + 2;
        while index + 1 < statement.values().len() {
            lon.push((arg(statement, index)?, arg(statement, index + 1)?));
            index += 2;
        }
        Ok(Self { lat, lon })
    }

    fn matches(&self, row: &Row) -> bool {
        let (Ok(lat), Ok(lon)) = (row.get::<Decimal>("latitude"), row.get::<Decimal>("longitude"))
        else {
            return false;
        };
        lat >= self.lat.0
            && lat <= self.lat.1
            && self.lon.iter().any(|(min, max)| lon >= *min && lon <= *max)
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::BigInt(a), Value::BigInt(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => {
            match (
                <Decimal as ValueType>::try_from(a.clone()),
                <Decimal as ValueType>::try_from(b.clone()),
            ) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => Ordering::Equal,
            }
        }
    }
}

fn column_eq<T: ValueType + PartialEq>(row: &Row, column: &str, expected: &T) -> bool {
    row.get::<T>(column).is_ok_and(|value| value == *expected)
}

fn select(
    tables: &Tables,
    table: &str,
    predicate: impl Fn(&Row) -> bool,
    order_by: &[&str],
) -> Vec<Row> {
    let mut rows: Vec<Row> = tables
        .rows
        .get(table)
        .map(|rows| rows.iter().filter(|row| predicate(row)).cloned().collect())
        .unwrap_or_default();
    rows.sort_by(|a, b| {
        order_by
            .iter()
            .map(|column| match (a.value(column), b.value(column)) {
                (Some(a), Some(b)) => compare(a, b),
                _ => Ordering::Equal,
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    rows
}

/// Build a row from an insert's column list and its bound values.
fn row_from_insert(statement: &Statement, columns: &[&str]) -> Result<Row, StoreError> {
    if statement.values().len() != columns.len() {
        return Err(StoreError::QueryError(format!(
            "{} binds {} values for {} columns",
            statement.name(),
            statement.values().len(),
            columns.len()
        )));
    }
    let mut row = Row::new();
    for (column, value) in columns.iter().zip(statement.values()) {
        row.push(*column, value.clone());
    }
    Ok(row)
}

fn insert_returning_id(
    tables: &mut Tables,
    table: &str,
    mut row: Row,
) -> Result<Outcome, StoreError> {
    let id = allocate_id(tables, table);
    row.set("id", id);
    tables.rows.entry(table.to_string()).or_default().push(row);
    Ok(Outcome::rows(vec![Row::new().with("id", id)]))
}

fn exists(tables: &Tables, table: &str, column: &str, value: &str) -> bool {
    tables
        .rows
        .get(table)
        .is_some_and(|rows| rows.iter().any(|row| column_eq(row, column, &value.to_string())))
}

fn apply(tables: &mut Tables, statement: &Statement) -> Result<Outcome, StoreError> {
    let outcome = match statement.name() {
        "schema.install" => Outcome::affected(0),

        stmt::LOCATIONS_IN_BOX => {
            let filter = BoxFilter::from_values(statement, 0)?;
            Outcome::rows(select(tables, "locations", |r| filter.matches(r), &["shop_code"]))
        }
        stmt::LOCATION_BY_CODE => {
            let code: String = arg(statement, 0)?;
            Outcome::rows(select(tables, "locations", |r| column_eq(r, "shop_code", &code), &[]))
        }
        stmt::LOCATION_CODE_IN_BOX => {
            let code: String = arg(statement, 0)?;
            let filter = BoxFilter::from_values(statement, 1)?;
            Outcome::rows(select(
                tables,
                "locations",
                |r| column_eq(r, "shop_code", &code) && filter.matches(r),
                &[],
            ))
        }

        stmt::CATEGORY_LINKS => {
            let location: String = arg(statement, 0)?;
            let category_type: String = arg(statement, 1)?;
            Outcome::rows(select(
                tables,
                "location_categories",
                |r| column_eq(r, "location", &location) && column_eq(r, "category_type", &category_type),
                &["id"],
            ))
        }
        stmt::CATEGORY_LOCATIONS => {
            let category: i64 = arg(statement, 0)?;
            let category_type: String = arg(statement, 1)?;
            Outcome::rows(select(
                tables,
                "location_categories",
                |r| column_eq(r, "category", &category) && column_eq(r, "category_type", &category_type),
                &["id"],
            ))
        }
        stmt::CATEGORY_BY_ID => {
            let id: i64 = arg(statement, 0)?;
            Outcome::rows(select(tables, "categories", |r| column_eq(r, "id", &id), &[]))
        }
        stmt::CHILD_CATEGORIES => {
            let parent: i64 = arg(statement, 0)?;
            let category_type: String = arg(statement, 1)?;
            Outcome::rows(select(
                tables,
                "categories",
                |r| column_eq(r, "parent_category", &parent) && column_eq(r, "category_type", &category_type),
                &["display_order", "id"],
            ))
        }

        stmt::ITEMS_FOR_LOCATION | stmt::PLANS_FOR_LOCATION => {
            let (table, order) = if statement.name() == stmt::ITEMS_FOR_LOCATION {
                ("items", "id")
            } else {
                ("plans", "plan_id")
            };
            let location: String = arg(statement, 0)?;
            let category: Option<i64> = if statement.values().len() > 1 {
                Some(arg(statement, 1)?)
            } else {
                None
            };
            Outcome::rows(select(
                tables,
                table,
                |r| {
                    column_eq(r, "location", &location)
                        && category.map_or(true, |c| column_eq(r, "category", &c))
                },
                &[order],
            ))
        }
        stmt::ITEM_BY_CODE => {
            let location: String = arg(statement, 0)?;
            let item_code: String = arg(statement, 1)?;
            Outcome::rows(select(
                tables,
                "items",
                |r| column_eq(r, "location", &location) && column_eq(r, "item_code", &item_code),
                &[],
            ))
        }
        stmt::PLAN_BY_ID => {
            let plan_id: String = arg(statement, 0)?;
            Outcome::rows(select(tables, "plans", |r| column_eq(r, "plan_id", &plan_id), &[]))
        }
        stmt::PLAN_ITEMS => {
            let plan_id: String = arg(statement, 0)?;
            Outcome::rows(select(tables, "plan_items", |r| column_eq(r, "plan_id", &plan_id), &["id"]))
        }
        stmt::IMAGES => {
            let record_id: String = arg(statement, 0)?;
            let table_name: String = arg(statement, 1)?;
            Outcome::rows(select(
                tables,
                "images",
                |r| column_eq(r, "record_id", &record_id) && column_eq(r, "table_name", &table_name),
                &["display_order", "id"],
            ))
        }

        stmt::SUBSCRIPTION_BY_ID | stmt::SUBSCRIPTION_LOCK => {
            let id: i64 = arg(statement, 0)?;
            Outcome::rows(select(tables, "subscriptions", |r| column_eq(r, "subscription_id", &id), &[]))
        }
        stmt::MEMBER_SUBSCRIPTIONS => {
            let member: i64 = arg(statement, 0)?;
            Outcome::rows(select(
                tables,
                "subscriptions",
                |r| column_eq(r, "member_id", &member),
                &["subscription_id"],
            ))
        }
        stmt::SUBSCRIPTION_DECREMENT => {
            let quantity: i32 = arg(statement, 0)?;
            let id: i64 = arg(statement, 1)?;
            let guard: i32 = arg(statement, 2)?;
            let mut affected = 0;
            for row in tables.rows.entry("subscriptions".to_string()).or_default() {
                if !column_eq(row, "subscription_id", &id) {
                    continue;
                }
                let usage: i32 = row.get("usage")?;
                if usage >= guard {
                    row.set("usage", usage - quantity);
                    affected += 1;
                }
            }
            Outcome::affected(affected)
        }
        stmt::CONSUMPTION_INSERT => {
            let row = row_from_insert(statement, crate::repository::CONSUMPTION_INSERT_COLUMNS)?;
            let subscription: i64 = row.get("subscription_id")?;
            if select(tables, "subscriptions", |r| column_eq(r, "subscription_id", &subscription), &[])
                .is_empty()
            {
                return Err(StoreError::Constraint(format!(
                    "consumption_orders.subscription_id {subscription} has no subscription"
                )));
            }
            insert_returning_id(tables, "consumption_orders", row)?
        }
        stmt::CONSUMPTIONS_FOR_SUBSCRIPTION => {
            let subscription: i64 = arg(statement, 0)?;
            Outcome::rows(select(
                tables,
                "consumption_orders",
                |r| column_eq(r, "subscription_id", &subscription),
                &["id"],
            ))
        }

        stmt::ORDER_INSERT => {
            let row = row_from_insert(statement, crate::repository::ORDER_COLUMNS)?;
            let order_id: String = row.get("order_id")?;
            // ON CONFLICT (order_id) DO NOTHING
            if exists(tables, "orders", "order_id", &order_id) {
                return Ok(Outcome::affected(0));
            }
            tables.rows.entry("orders".to_string()).or_default().push(row);
            Outcome::affected(1)
        }
        stmt::ORDER_BY_ID => {
            let order_id: String = arg(statement, 0)?;
            Outcome::rows(select(tables, "orders", |r| column_eq(r, "order_id", &order_id), &[]))
        }
        stmt::ORDER_ITEM_INSERT => {
            let row = row_from_insert(statement, crate::repository::ORDER_ITEM_INSERT_COLUMNS)?;
            let order_id: String = row.get("order_id")?;
            if !exists(tables, "orders", "order_id", &order_id) {
                return Err(StoreError::Constraint(format!(
                    "order_items.order_id {order_id} has no order"
                )));
            }
            insert_returning_id(tables, "order_items", row)?
        }
        stmt::ORDER_ITEMS => {
            let order_id: String = arg(statement, 0)?;
            Outcome::rows(select(tables, "order_items", |r| column_eq(r, "order_id", &order_id), &["id"]))
        }

        stmt::REVIEW_INSERT => {
            let row = row_from_insert(statement, crate::repository::REVIEW_INSERT_COLUMNS)?;
            let location: String = row.get("location")?;
            if !exists(tables, "locations", "shop_code", &location) {
                return Err(StoreError::Constraint(format!(
                    "reviews.location {location} has no location"
                )));
            }
            insert_returning_id(tables, "reviews", row)?
        }
        stmt::REVIEWS_FOR_LOCATION => {
            let location: String = arg(statement, 0)?;
            Outcome::rows(select(tables, "reviews", |r| column_eq(r, "location", &location), &["id"]))
        }
        stmt::MEMBER_BY_API_KEY => {
            let api_key: String = arg(statement, 0)?;
            Outcome::rows(select(tables, "members", |r| column_eq(r, "api_key", &api_key), &[]))
        }

        other => {
            return Err(StoreError::QueryError(format!(
                "statement '{other}' is not supported by the in-memory backend"
            )))
        }
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShopError;

    fn subscription(usage: i32) -> Row {
        Row::new()
            .with("member_id", 1i64)
            .with("plan_id", "P1")
            .with("item_code", "LATTE")
            .with("name", "Lattes")
            .with("usage", usage)
            .with("active", true)
            .with(
                "subscribed_date",
                chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            )
    }

    #[test]
    fn test_seed_assigns_sequential_keys() {
        let executor = MemoryExecutor::new();
        assert_eq!(executor.seed("subscriptions", subscription(5)), Some(1));
        assert_eq!(executor.seed("subscriptions", subscription(5)), Some(2));
        assert_eq!(
            executor.seed("locations", Row::new().with("shop_code", "C001")),
            None
        );
        let rows = executor.rows("subscriptions");
        assert_eq!(rows[1].get::<i64>("subscription_id").unwrap(), 2);
    }

    #[test]
    fn test_rollback_restores_snapshot() {
        let executor = MemoryExecutor::new();
        let id = executor.seed("subscriptions", subscription(10)).unwrap();

        let result: Result<(), ShopError> = executor.with_transaction(None, |tx| {
            let repo = crate::repository::CatalogRepository::new(tx);
            assert_eq!(repo.decrement_usage(id, 4)?, 1);
            Err(ShopError::Conflict("abort".into()))
        });
        assert!(result.is_err());
        let usage: i32 = executor.rows("subscriptions")[0].get("usage").unwrap();
        assert_eq!(usage, 10);
    }

    #[test]
    fn test_guarded_decrement_refuses_to_go_negative() {
        let executor = MemoryExecutor::new();
        let id = executor.seed("subscriptions", subscription(3)).unwrap();
        let repo = crate::repository::CatalogRepository::new(&executor);
        assert_eq!(repo.decrement_usage(id, 4).unwrap(), 0);
        assert_eq!(repo.decrement_usage(id, 3).unwrap(), 1);
        assert_eq!(repo.decrement_usage(id, 1).unwrap(), 0);
    }

    #[test]
    fn test_injected_faults() {
        let executor = MemoryExecutor::new();
        let repo = crate::repository::CatalogRepository::new(&executor);

        executor.conflict_on(stmt::PLAN_BY_ID, 1);
        assert!(matches!(repo.find_plan("P1"), Err(ShopError::Conflict(_))));
        assert!(repo.find_plan("P1").unwrap().is_none());

        executor.fail_on(stmt::PLAN_BY_ID);
        assert!(matches!(
            repo.find_plan("P1"),
            Err(ShopError::Storage { operation, .. }) if operation == stmt::PLAN_BY_ID
        ));
        executor.clear_faults();
        assert!(repo.find_plan("P1").is_ok());
        assert_eq!(executor.executed(stmt::PLAN_BY_ID), 4);
    }

    #[test]
    fn test_statement_timeout() {
        let executor = MemoryExecutor::new();
        executor.set_latency(Some(Duration::from_millis(20)));
        let repo = crate::repository::CatalogRepository::new(&executor)
            .with_timeout(Some(Duration::from_millis(1)));
        assert!(matches!(
            repo.find_plan("P1"),
            Err(ShopError::Timeout { .. })
        ));
    }
}
