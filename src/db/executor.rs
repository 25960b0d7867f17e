//! Query execution engine.
//!
//! This module runs raw SQL on a session's `DbConnection` with support for:
//! - Row limits (enforced via streaming - only fetches needed rows)
//! - Query timeouts
//! - Row-returning detection from what the backend actually sends back
//!
//! Each database gets its own submodule generated by `backend_ops!`; the code
//! is identical apart from connection and result types.

use crate::db::pool::DbConnection;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{ResultCursor, Row};
use futures_util::StreamExt;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Result of a non-row-returning execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOutcome {
    pub rows_affected: u64,
    /// Last auto-increment value, where the backend reports one.
    pub last_insert_id: Option<i64>,
}

/// Everything one SQL text produced on the backend.
#[derive(Debug, Clone)]
pub struct Execution {
    /// Rows of a row-returning statement. None when the backend described no
    /// result columns and sent no rows.
    pub result_set: Option<ResultCursor>,
    pub outcome: WriteOutcome,
}

/// Executes SQL for one data source.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    data_source: String,
    query_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(data_source: impl Into<String>, query_timeout: Duration) -> Self {
        Self {
            data_source: data_source.into(),
            query_timeout,
        }
    }

    /// Execute any statement, keeping both its rows and its update counts.
    pub async fn run(
        &self,
        conn: &mut DbConnection,
        sql: &str,
        max_rows: Option<u32>,
    ) -> DbResult<Execution> {
        let start = Instant::now();
        // One extra row tells us whether the result was truncated
        let fetch_limit = max_rows.map(|l| l.max(1) as usize + 1);

        debug!(
            data_source = %self.data_source,
            sql = %sql,
            limit = ?max_rows,
            timeout_secs = self.query_timeout.as_secs(),
            "Executing statement"
        );

        let fetched = match conn {
            DbConnection::MySql(c) => mysql::run(c, sql, fetch_limit, self.query_timeout).await,
            DbConnection::Postgres(c) => {
                postgres::run(c, sql, fetch_limit, self.query_timeout).await
            }
            DbConnection::SQLite(c) => sqlite::run(c, sql, fetch_limit, self.query_timeout).await,
        };

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(FetchError::Sqlx(e)) => return Err(DbError::from_sqlx(&self.data_source, e)),
            Err(FetchError::TimedOut) => {
                return Err(timeout_error("statement execution", self.query_timeout));
            }
        };

        let outcome = WriteOutcome {
            rows_affected: fetched.rows_affected,
            last_insert_id: fetched.last_insert_id,
        };
        let returns_rows = !fetched.columns.is_empty() || !fetched.rows.is_empty();
        let result_set =
            returns_rows.then(|| self.limit_cursor(fetched.columns, fetched.rows, max_rows));

        debug!(
            data_source = %self.data_source,
            returns_rows,
            rows = result_set.as_ref().map(|c| c.remaining()).unwrap_or(0),
            rows_affected = outcome.rows_affected,
            execution_time_ms = start.elapsed().as_millis() as u64,
            "Statement finished"
        );
        Ok(Execution {
            result_set,
            outcome,
        })
    }

    /// Execute a row-returning statement and collect its rows into a cursor.
    ///
    /// Statements without a result yield an empty cursor.
    pub async fn fetch(
        &self,
        conn: &mut DbConnection,
        sql: &str,
        max_rows: Option<u32>,
    ) -> DbResult<ResultCursor> {
        let execution = self.run(conn, sql, max_rows).await?;
        Ok(execution
            .result_set
            .unwrap_or_else(|| ResultCursor::empty(self.data_source.clone())))
    }

    /// Execute a write operation (INSERT, UPDATE, DELETE, DDL) and return affected rows.
    pub async fn execute_write(&self, conn: &mut DbConnection, sql: &str) -> DbResult<WriteOutcome> {
        let start = Instant::now();

        debug!(
            data_source = %self.data_source,
            sql = %sql,
            timeout_secs = self.query_timeout.as_secs(),
            "Executing write operation"
        );

        let result = match conn {
            DbConnection::MySql(c) => mysql::execute_write(c, sql, self.query_timeout).await,
            DbConnection::Postgres(c) => postgres::execute_write(c, sql, self.query_timeout).await,
            DbConnection::SQLite(c) => sqlite::execute_write(c, sql, self.query_timeout).await,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(FetchError::Sqlx(e)) => return Err(DbError::from_sqlx(&self.data_source, e)),
            Err(FetchError::TimedOut) => {
                return Err(timeout_error("write operation", self.query_timeout));
            }
        };

        debug!(
            data_source = %self.data_source,
            rows_affected = outcome.rows_affected,
            execution_time_ms = start.elapsed().as_millis() as u64,
            "Write finished"
        );
        Ok(outcome)
    }

    fn limit_cursor(&self, columns: Vec<String>, mut rows: Vec<Row>, max_rows: Option<u32>) -> ResultCursor {
        let truncated = match max_rows {
            Some(limit) if rows.len() > limit.max(1) as usize => {
                rows.truncate(limit.max(1) as usize);
                true
            }
            _ => false,
        };

        if truncated {
            warn!(
                data_source = %self.data_source,
                limit = ?max_rows,
                "Query result truncated"
            );
        }

        ResultCursor::new(self.data_source.clone(), columns, rows).with_truncated(truncated)
    }
}

#[derive(Default)]
struct Fetched {
    columns: Vec<String>,
    rows: Vec<Row>,
    rows_affected: u64,
    last_insert_id: Option<i64>,
    /// Completed statements; more than one means multi-statement text.
    statements: usize,
}

enum FetchError {
    Sqlx(sqlx::Error),
    TimedOut,
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout.as_secs() as u32)
}

macro_rules! backend_ops {
    ($module:ident, $conn:ty, $last_insert_id:expr) => {
        mod $module {
            use super::*;
            use sqlx::{Column, Either, Executor};

            pub async fn run(
                conn: &mut $conn,
                sql: &str,
                fetch_limit: Option<usize>,
                query_timeout: Duration,
            ) -> Result<Fetched, FetchError> {
                let execution = async {
                    let mut fetched = Fetched::default();
                    {
                        let mut stream = (&mut *conn).fetch_many(sql);
                        while let Some(item) = stream.next().await {
                            match item? {
                                Either::Left(result) => {
                                    fetched.statements += 1;
                                    fetched.rows_affected += result.rows_affected();
                                    fetched.last_insert_id = $last_insert_id(&result);
                                }
                                Either::Right(row) => {
                                    if fetched.columns.is_empty() {
                                        fetched.columns = row.column_names();
                                    }
                                    fetched.rows.push(row.to_row());
                                    if fetch_limit.is_some_and(|limit| fetched.rows.len() >= limit) {
                                        break;
                                    }
                                }
                            }
                        }
                    }

                    // An empty result carries no row metadata. Multi-statement
                    // text cannot be prepared as one statement.
                    if fetched.rows.is_empty() && fetched.statements <= 1 {
                        fetched.columns = match (&mut *conn).describe(sql).await {
                            Ok(described) => described
                                .columns()
                                .iter()
                                .map(|col| col.name().to_string())
                                .collect(),
                            Err(e) => {
                                debug!(error = %e, "Statement has no describable result columns");
                                Vec::new()
                            }
                        };
                    }
                    Ok::<_, sqlx::Error>(fetched)
                };

                match timeout(query_timeout, execution).await {
                    Ok(result) => result.map_err(FetchError::Sqlx),
                    Err(_) => Err(FetchError::TimedOut),
                }
            }

            pub async fn execute_write(
                conn: &mut $conn,
                sql: &str,
                query_timeout: Duration,
            ) -> Result<WriteOutcome, FetchError> {
                match timeout(query_timeout, conn.execute(sql)).await {
                    Ok(Ok(r)) => Ok(WriteOutcome {
                        rows_affected: r.rows_affected(),
                        last_insert_id: $last_insert_id(&r),
                    }),
                    Ok(Err(e)) => Err(FetchError::Sqlx(e)),
                    Err(_) => Err(FetchError::TimedOut),
                }
            }
        }
    };
}

backend_ops!(mysql, sqlx::MySqlConnection, |r: &sqlx::mysql::MySqlQueryResult| {
    Some(r.last_insert_id() as i64)
});
backend_ops!(postgres, sqlx::PgConnection, |_: &sqlx::postgres::PgQueryResult| {
    None::<i64>
});
backend_ops!(sqlite, sqlx::SqliteConnection, |r: &sqlx::sqlite::SqliteQueryResult| {
    Some(r.last_insert_rowid())
});
