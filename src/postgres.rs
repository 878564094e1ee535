//! PostgreSQL executor.
//!
//! [`PgExecutor`] runs statements on pooled `may_postgres` clients. Bound
//! `sea_query::Value`s are converted to `ToSql` parameters, and result columns
//! are converted back into `Value`s by their Postgres type.
//!
//! A statement with a timeout runs inside its own short transaction so the
//! timeout can be applied with `SET LOCAL statement_timeout`; inside
//! [`TransactionalExecutor::with_transaction`] the setting is scoped to the
//! enclosing transaction.

use crate::config::DatabaseConfig;
use crate::connection::ConnectionError;
use crate::executor::{QueryExecutor, Row, Statement, StoreError, TransactionalExecutor};
use crate::pool::ConnectionPool;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use may_postgres::types::{ToSql, Type};
use may_postgres::Client;
use rust_decimal::Decimal;
use sea_query::{Value, ValueType};
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Executor over a [`ConnectionPool`].
pub struct PgExecutor {
    pool: ConnectionPool,
}

impl PgExecutor {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration.
    pub fn connect(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        Ok(Self::new(ConnectionPool::connect(config)?))
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

impl QueryExecutor for PgExecutor {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        let client = self.pool.get()?;
        match statement.timeout() {
            Some(timeout) => in_transaction(&client, Some(timeout), |client| {
                run_query(client, statement)
            }),
            None => run_query(&client, statement),
        }
    }

    fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        let client = self.pool.get()?;
        match statement.timeout() {
            Some(timeout) => in_transaction(&client, Some(timeout), |client| {
                run_execute(client, statement)
            }),
            None => run_execute(&client, statement),
        }
    }
}

impl TransactionalExecutor for PgExecutor {
    fn with_transaction<T, X, F>(&self, timeout: Option<Duration>, work: F) -> Result<T, X>
    where
        F: FnOnce(&dyn QueryExecutor) -> Result<T, X>,
        X: From<StoreError>,
    {
        let client = self.pool.get()?;
        in_transaction(&client, timeout, |client| {
            let transaction = PgTransaction { client };
            work(&transaction)
        })
    }
}

/// Statement handle passed to transaction closures; runs on the client that
/// holds the open transaction.
struct PgTransaction<'c> {
    client: &'c Client,
}

impl QueryExecutor for PgTransaction<'_> {
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
        if let Some(timeout) = statement.timeout() {
            set_local_timeout(self.client, timeout)?;
        }
        run_query(self.client, statement)
    }

    fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        if let Some(timeout) = statement.timeout() {
            set_local_timeout(self.client, timeout)?;
        }
        run_execute(self.client, statement)
    }
}

/// Rolls back on drop unless the transaction was finished, so a panic in the
/// unit of work never returns a client with an open transaction to the pool.
struct TransactionScope<'c> {
    client: &'c Client,
    finished: bool,
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.client.execute("ROLLBACK", &[]) {
                log::warn!("Rollback of abandoned transaction failed: {e}");
            }
        }
    }
}

fn in_transaction<T, X, F>(client: &Client, timeout: Option<Duration>, work: F) -> Result<T, X>
where
    F: FnOnce(&Client) -> Result<T, X>,
    X: From<StoreError>,
{
    {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span().entered();
        client.execute("BEGIN", &[]).map_err(StoreError::from)?;
    }
    let mut scope = TransactionScope {
        client,
        finished: false,
    };
    if let Some(timeout) = timeout {
        set_local_timeout(client, timeout)?;
    }

    match work(client) {
        Ok(value) => {
            #[cfg(feature = "tracing")]
            let _span = tracing_helpers::commit_transaction_span().entered();
            scope.finished = true;
            client.execute("COMMIT", &[]).map_err(StoreError::from)?;
            Ok(value)
        }
        Err(err) => {
            #[cfg(feature = "tracing")]
            let _span = tracing_helpers::rollback_transaction_span().entered();
            #[cfg(feature = "metrics")]
            METRICS.record_rollback();

            scope.finished = true;
            if let Err(e) = client.execute("ROLLBACK", &[]) {
                log::warn!("Rollback failed: {e}");
            }
            Err(err)
        }
    }
}

fn set_local_timeout(client: &Client, timeout: Duration) -> Result<(), StoreError> {
    // SET does not accept bind parameters; the value is an integer we format.
    let sql = format!("SET LOCAL statement_timeout = {}", timeout.as_millis().max(1));
    client.execute(sql.as_str(), &[])?;
    Ok(())
}

fn run_query(client: &Client, statement: &Statement) -> Result<Vec<Row>, StoreError> {
    instrumented(statement, || {
        let params = to_params(statement.values())?;
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = client.query(statement.sql(), &refs)?;
        rows.iter().map(from_pg_row).collect()
    })
}

fn run_execute(client: &Client, statement: &Statement) -> Result<u64, StoreError> {
    instrumented(statement, || {
        let params = to_params(statement.values())?;
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        Ok(client.execute(statement.sql(), &refs)?)
    })
}

fn instrumented<T>(
    statement: &Statement,
    run: impl FnOnce() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::execute_statement_span(statement.name()).entered();

    let start = Instant::now();
    let result = run();
    let elapsed = start.elapsed();

    #[cfg(feature = "metrics")]
    {
        METRICS.record_statement(statement.name(), elapsed);
        if result.is_err() {
            METRICS.record_statement_error(statement.name());
        }
    }
    if let Err(e) = &result {
        log::debug!(
            "{} failed after {}ms: {e}",
            statement.name(),
            elapsed.as_millis()
        );
    }
    result
}

fn typed<T: ValueType>(value: &Value) -> Result<T, StoreError> {
    <T as ValueType>::try_from(value.clone())
        .map_err(|_| StoreError::QueryError(format!("cannot bind {value:?}")))
}

/// Convert bound values into owned `ToSql` parameters. NULLs keep their type
/// so Postgres can check them against the column.
pub(crate) fn to_params(values: &[Value]) -> Result<Vec<Box<dyn ToSql>>, StoreError> {
    values
        .iter()
        .map(|value| -> Result<Box<dyn ToSql>, StoreError> {
            Ok(match value {
                Value::Bool(_) => Box::new(typed::<Option<bool>>(value)?),
                Value::SmallInt(_) => Box::new(typed::<Option<i16>>(value)?),
                Value::Int(_) => Box::new(typed::<Option<i32>>(value)?),
                Value::BigInt(_) => Box::new(typed::<Option<i64>>(value)?),
                Value::Double(_) => Box::new(typed::<Option<f64>>(value)?),
                Value::String(_) => Box::new(typed::<Option<String>>(value)?),
                Value::Decimal(_) => Box::new(typed::<Option<Decimal>>(value)?),
                Value::ChronoDate(_) => Box::new(typed::<Option<NaiveDate>>(value)?),
                Value::ChronoTime(_) => Box::new(typed::<Option<NaiveTime>>(value)?),
                Value::ChronoDateTime(_) => Box::new(typed::<Option<NaiveDateTime>>(value)?),
                other => {
                    return Err(StoreError::QueryError(format!(
                        "Unsupported value type in statement: {other:?}"
                    )))
                }
            })
        })
        .collect()
}

fn column<T>(row: &may_postgres::Row, index: usize) -> Result<Option<T>, StoreError>
where
    for<'a> T: may_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(index)
        .map_err(|e| StoreError::ParseError(format!("column {index}: {e}")))
}

/// Convert a driver row into a [`Row`], keyed by column name.
fn from_pg_row(row: &may_postgres::Row) -> Result<Row, StoreError> {
    let mut converted = Row::new();
    for (index, col) in row.columns().iter().enumerate() {
        let ty = col.type_();
        let value: Value = if *ty == Type::BOOL {
            column::<bool>(row, index)?.into()
        } else if *ty == Type::INT2 {
            column::<i16>(row, index)?.into()
        } else if *ty == Type::INT4 {
            column::<i32>(row, index)?.into()
        } else if *ty == Type::INT8 {
            column::<i64>(row, index)?.into()
        } else if *ty == Type::FLOAT8 {
            column::<f64>(row, index)?.into()
        } else if *ty == Type::NUMERIC {
            column::<Decimal>(row, index)?.into()
        } else if *ty == Type::DATE {
            column::<NaiveDate>(row, index)?.into()
        } else if *ty == Type::TIME {
            column::<NaiveTime>(row, index)?.into()
        } else if *ty == Type::TIMESTAMP {
            column::<NaiveDateTime>(row, index)?.into()
        } else if *ty == Type::TIMESTAMPTZ {
            column::<DateTime<Utc>>(row, index)?
                .map(|ts| ts.naive_utc())
                .into()
        } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR {
            column::<String>(row, index)?.into()
        } else {
            return Err(StoreError::ParseError(format!(
                "column '{}' has unsupported type {ty}",
                col.name()
            )));
        };
        converted.push(col.name(), value);
    }
    Ok(converted)
}
