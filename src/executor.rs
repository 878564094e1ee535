//! Statement execution seam.
//!
//! [`QueryExecutor`] abstracts statement execution so the repository can run
//! against PostgreSQL ([`crate::postgres::PgExecutor`]), the in-process
//! backend ([`crate::memory::MemoryExecutor`]) or an open transaction
//! interchangeably. [`TransactionalExecutor`] adds a scoped unit of work that
//! commits when the closure returns `Ok` and rolls back otherwise.
//!
//! Statements are always built with sea-query and carry their bound values
//! separately from the SQL text; rows come back as ordered field maps of
//! `sea_query::Value`.

use may_postgres::Error as PostgresError;
use sea_query::{
    InsertStatement, PostgresQueryBuilder, SelectStatement, UpdateStatement, Value, ValueType,
};
use std::fmt;
use std::time::Duration;

/// Executor error type
#[derive(Debug)]
pub enum StoreError {
    /// `PostgreSQL` error from `may_postgres`
    PostgresError(PostgresError),
    /// Query building or execution error
    QueryError(String),
    /// Row parsing/conversion error
    ParseError(String),
    /// Statement cancelled by a timeout
    Timeout(String),
    /// Serialization failure or deadlock; the unit of work may be retried
    Conflict(String),
    /// Unique, foreign key or check constraint violation
    Constraint(String),
    /// No pooled connection became available in time
    PoolExhausted(Duration),
    /// Other execution errors
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::PostgresError(e) => write!(f, "PostgreSQL error: {e}"),
            StoreError::QueryError(s) => write!(f, "Query error: {s}"),
            StoreError::ParseError(s) => write!(f, "Parse error: {s}"),
            StoreError::Timeout(s) => write!(f, "Statement timeout: {s}"),
            StoreError::Conflict(s) => write!(f, "Concurrent modification: {s}"),
            StoreError::Constraint(s) => write!(f, "Constraint violation: {s}"),
            StoreError::PoolExhausted(waited) => {
                write!(f, "No connection available after {}ms", waited.as_millis())
            }
            StoreError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<PostgresError> for StoreError {
    fn from(err: PostgresError) -> Self {
        let state = err.code().map(|state| state.code().to_string());
        match state.as_deref() {
            // query_canceled (statement_timeout) and lock_not_available
            Some("57014") | Some("55P03") => StoreError::Timeout(err.to_string()),
            // serialization_failure, deadlock_detected
            Some("40001") | Some("40P01") => StoreError::Conflict(err.to_string()),
            Some(code) if code.starts_with("23") => StoreError::Constraint(err.to_string()),
            _ => StoreError::PostgresError(err),
        }
    }
}

/// A parameterized statement ready for execution.
///
/// `name` identifies the statement in logs, spans, metrics and error
/// messages (`"subscriptions.lock"`), and is what the in-process backend
/// dispatches on.
#[derive(Debug, Clone)]
pub struct Statement {
    name: &'static str,
    sql: String,
    values: Vec<Value>,
    timeout: Option<Duration>,
}

impl Statement {
    pub fn select(name: &'static str, query: &SelectStatement) -> Self {
        let (sql, values) = query.build(PostgresQueryBuilder);
        Self::from_parts(name, sql, values.iter().cloned().collect())
    }

    pub fn insert(name: &'static str, query: &InsertStatement) -> Self {
        let (sql, values) = query.build(PostgresQueryBuilder);
        Self::from_parts(name, sql, values.iter().cloned().collect())
    }

    pub fn update(name: &'static str, query: &UpdateStatement) -> Self {
        let (sql, values) = query.build(PostgresQueryBuilder);
        Self::from_parts(name, sql, values.iter().cloned().collect())
    }

    /// Statement without bound values (DDL, session settings).
    pub fn raw(name: &'static str, sql: impl Into<String>) -> Self {
        Self::from_parts(name, sql.into(), Vec::new())
    }

    fn from_parts(name: &'static str, sql: String, values: Vec<Value>) -> Self {
        Self {
            name,
            sql,
            values,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// One result row: column names in select order, each with its value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append, used when seeding rows by hand.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.columns.push((name.into(), value.into()));
    }

    /// Replace a column value in place, appending it when absent.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.columns.iter_mut().find(|(column, _)| column == name) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((name.to_string(), value)),
        }
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Extract a typed value. Nullable columns are read as `Option<T>`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ParseError` when the column is missing or its
    /// value does not convert to `T`.
    pub fn get<T: ValueType>(&self, name: &str) -> Result<T, StoreError> {
        let value = self
            .value(name)
            .ok_or_else(|| StoreError::ParseError(format!("column '{name}' not in row")))?;
        <T as ValueType>::try_from(value.clone()).map_err(|_| {
            StoreError::ParseError(format!(
                "column '{name}' holds {value:?}, expected {}",
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Trait for executing statements
///
/// Implemented by pooled executors, open transactions and the in-process
/// backend, so repository code never knows which one it talks to.
pub trait QueryExecutor {
    /// Execute a statement and return all rows it produced.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if execution fails or the statement timed out.
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError>;

    /// Execute a statement and return the number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if execution fails or the statement timed out.
    fn execute(&self, statement: &Statement) -> Result<u64, StoreError>;

    /// Execute a statement and return its first row, if any.
    fn query_opt(&self, statement: &Statement) -> Result<Option<Row>, StoreError> {
        Ok(self.query(statement)?.into_iter().next())
    }
}

/// Executors that can open a unit of work.
pub trait TransactionalExecutor: QueryExecutor {
    /// Run `work` inside a transaction.
    ///
    /// The transaction commits when `work` returns `Ok` and rolls back when it
    /// returns `Err`. `timeout` bounds every statement issued inside it.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or a `StoreError` converted into `X` when
    /// begin/commit/rollback itself fails.
    fn with_transaction<T, X, F>(&self, timeout: Option<Duration>, work: F) -> Result<T, X>
    where
        F: FnOnce(&dyn QueryExecutor) -> Result<T, X>,
        X: From<StoreError>;
}

impl<E: QueryExecutor + ?Sized> QueryExecutor for &E {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        (**self).query(statement)
    }

    fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        (**self).execute(statement)
    }
}

impl<E: QueryExecutor + ?Sized> QueryExecutor for std::sync::Arc<E> {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        (**self).query(statement)
    }

    fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        (**self).execute(statement)
    }
}

impl<E: TransactionalExecutor + ?Sized> TransactionalExecutor for &E {
    fn with_transaction<T, X, F>(&self, timeout: Option<Duration>, work: F) -> Result<T, X>
    where
        F: FnOnce(&dyn QueryExecutor) -> Result<T, X>,
        X: From<StoreError>,
    {
        (**self).with_transaction(timeout, work)
    }
}

impl<E: TransactionalExecutor + ?Sized> TransactionalExecutor for std::sync::Arc<E> {
    fn with_transaction<T, X, F>(&self, timeout: Option<Duration>, work: F) -> Result<T, X>
    where
        F: FnOnce(&dyn QueryExecutor) -> Result<T, X>,
        X: From<StoreError>,
    {
        (**self).with_transaction(timeout, work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use sea_query::{Expr, ExprTrait, Query};

    #[test]
    fn test_store_error_display() {
        let err = StoreError::QueryError("test error".to_string());
        assert!(err.to_string().contains("Query error"));

        let err = StoreError::PoolExhausted(Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_statement_binds_values_instead_of_inlining() {
        let mut query = Query::select();
        query
            .column("shop_code")
            .from("locations")
            .and_where(Expr::col("shop_code").eq("C001' OR '1'='1"));
        let stmt = Statement::select("locations.by_code", &query);

        assert!(stmt.sql().contains("$1"));
        assert!(!stmt.sql().contains("OR '1'='1"));
        assert_eq!(stmt.values().len(), 1);
        assert_eq!(stmt.name(), "locations.by_code");
        assert!(stmt.timeout().is_none());
    }

    #[test]
    fn test_row_get_typed_values() {
        let row = Row::new()
            .with("shop_code", "C001")
            .with("usage", 10i32)
            .with("price", Decimal::new(450, 2))
            .with("description", Option::<String>::None);

        assert_eq!(row.get::<String>("shop_code").unwrap(), "C001");
        assert_eq!(row.get::<i32>("usage").unwrap(), 10);
        assert_eq!(row.get::<Decimal>("price").unwrap(), Decimal::new(450, 2));
        assert_eq!(row.get::<Option<String>>("description").unwrap(), None);
    }

    #[test]
    fn test_row_get_reports_missing_and_mismatched_columns() {
        let row = Row::new().with("usage", 10i32);
        assert!(matches!(row.get::<i32>("nope"), Err(StoreError::ParseError(_))));
        assert!(matches!(row.get::<String>("usage"), Err(StoreError::ParseError(_))));
    }

    #[test]
    fn test_row_set_replaces_in_place() {
        let mut row = Row::new().with("usage", 10i32).with("active", true);
        row.set("usage", 6i32);
        assert_eq!(row.get::<i32>("usage").unwrap(), 6);
        assert_eq!(row.len(), 2);
        assert_eq!(row.columns().next().map(|(name, _)| name), Some("usage"));
    }
}
