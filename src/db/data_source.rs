//! sqlx-backed data sources, their sessions and physical statements.
//!
//! A [`DataSource`] owns a pool. Each logical connection opens its own
//! [`SessionConnection`], which checks one pooled connection out on first use
//! and keeps it until released. Every statement of the session runs on that
//! connection, so `BEGIN`, the statements after it and `COMMIT` share a
//! backend session.

use crate::db::backend::{BackendConnection, BackendDataSource, PhysicalStatement};
use crate::db::executor::{Execution, QueryExecutor, WriteOutcome};
use crate::db::pool::{DbConnection, DbPool, create_pool};
use crate::error::{DbError, DbResult};
use crate::models::{
    ConnectionConfig, DataSourceRole, DatabaseType, ExecuteOptions, ResultCursor, Row,
    StatementConfig,
};
use crate::routing::sql_judge::{self, TransactionBoundary};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// A named connection pool acting as one backend of a master/slave group.
#[derive(Debug)]
pub struct DataSource {
    name: String,
    role: DataSourceRole,
    pool: DbPool,
    executor: QueryExecutor,
}

impl DataSource {
    /// Connect a pool for the given configuration.
    pub async fn connect(config: &ConnectionConfig, query_timeout: Duration) -> DbResult<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::from_pool(
            config.name.clone(),
            config.role,
            pool,
            query_timeout,
        ))
    }

    /// Wrap an existing pool.
    pub fn from_pool(
        name: impl Into<String>,
        role: DataSourceRole,
        pool: DbPool,
        query_timeout: Duration,
    ) -> Self {
        let name = name.into();
        Self {
            executor: QueryExecutor::new(name.clone(), query_timeout),
            name,
            role,
            pool,
        }
    }

    pub fn role(&self) -> DataSourceRole {
        self.role
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Open a session on this data source.
    pub fn session(&self) -> DbResult<SessionConnection> {
        if self.pool.is_closed() {
            return Err(DbError::connection(
                format!("Data source '{}' is closed", self.name),
                "Reconnect the data source before opening sessions",
            ));
        }
        Ok(SessionConnection {
            session: Arc::new(Session {
                data_source: self.name.clone(),
                pool: self.pool.clone(),
                executor: self.executor.clone(),
                slot: Mutex::new(SessionSlot::Vacant),
                in_transaction: AtomicBool::new(false),
            }),
        })
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        info!(data_source = %self.name, role = %self.role, "Closing data source");
        self.pool.close().await;
    }
}

impl BackendDataSource for DataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_session(&self) -> DbResult<Arc<dyn BackendConnection>> {
        Ok(Arc::new(self.session()?))
    }
}

#[derive(Debug)]
enum SessionSlot {
    /// No connection checked out yet.
    Vacant,
    Held(DbConnection),
    Released,
}

/// Backend session shared by a `SessionConnection` and its statements.
#[derive(Debug)]
struct Session {
    data_source: String,
    pool: DbPool,
    executor: QueryExecutor,
    slot: Mutex<SessionSlot>,
    in_transaction: AtomicBool,
}

impl Session {
    /// Lock the session, checking a connection out of the pool on first use.
    async fn checkout(&self, operation: &str) -> DbResult<MutexGuard<'_, SessionSlot>> {
        let mut slot = self.slot.lock().await;
        match &*slot {
            SessionSlot::Held(_) => {}
            SessionSlot::Vacant => {
                let conn = self
                    .pool
                    .acquire()
                    .await
                    .map_err(|e| DbError::from_sqlx(&self.data_source, e))?;
                debug!(data_source = %self.data_source, "Session connection checked out");
                *slot = SessionSlot::Held(conn);
            }
            SessionSlot::Released => {
                return Err(DbError::illegal_state(
                    operation,
                    format!("session on '{}' is released", self.data_source),
                ));
            }
        }
        Ok(slot)
    }

    async fn run(&self, sql: &str, max_rows: Option<u32>) -> DbResult<Execution> {
        let mut slot = self.checkout("execute").await?;
        let SessionSlot::Held(conn) = &mut *slot else {
            return Err(DbError::internal("session slot lost its connection"));
        };
        let execution = self.executor.run(conn, sql, max_rows).await?;
        self.track_transaction(sql);
        Ok(execution)
    }

    async fn fetch(&self, sql: &str, max_rows: Option<u32>) -> DbResult<ResultCursor> {
        let mut slot = self.checkout("execute_query").await?;
        let SessionSlot::Held(conn) = &mut *slot else {
            return Err(DbError::internal("session slot lost its connection"));
        };
        let cursor = self.executor.fetch(conn, sql, max_rows).await?;
        self.track_transaction(sql);
        Ok(cursor)
    }

    async fn execute_write(&self, sql: &str) -> DbResult<WriteOutcome> {
        let mut slot = self.checkout("execute_update").await?;
        let SessionSlot::Held(conn) = &mut *slot else {
            return Err(DbError::internal("session slot lost its connection"));
        };
        let outcome = self.executor.execute_write(conn, sql).await?;
        self.track_transaction(sql);
        Ok(outcome)
    }

    fn track_transaction(&self, sql: &str) {
        match sql_judge::transaction_boundary(sql, Some(self.pool.db_type())) {
            Some(TransactionBoundary::Begin) => self.in_transaction.store(true, Ordering::Release),
            Some(TransactionBoundary::End) => self.in_transaction.store(false, Ordering::Release),
            None => {}
        }
    }

    /// Roll back a transaction left open and return the connection to the pool.
    async fn release(&self) -> DbResult<()> {
        let previous = std::mem::replace(&mut *self.slot.lock().await, SessionSlot::Released);
        let SessionSlot::Held(mut conn) = previous else {
            return Ok(());
        };

        let mut result = Ok(());
        if self.in_transaction.swap(false, Ordering::AcqRel) {
            warn!(data_source = %self.data_source, "Rolling back transaction left open on session");
            if let Err(e) = self.executor.execute_write(&mut conn, "ROLLBACK").await {
                // Never hand a connection in an unknown transaction state back to the pool
                conn.close_on_drop();
                result = Err(e);
            }
        }
        debug!(data_source = %self.data_source, "Session connection released");
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let SessionSlot::Held(conn) = self.slot.get_mut() {
            if *self.in_transaction.get_mut() {
                warn!(
                    data_source = %self.data_source,
                    "Session dropped with an open transaction; closing its connection"
                );
                conn.close_on_drop();
            }
        }
    }
}

/// A session on one [`DataSource`], usable as a routing target.
#[derive(Debug)]
pub struct SessionConnection {
    session: Arc<Session>,
}

impl SessionConnection {
    /// Check if a `BEGIN` ran on this session without a matching end.
    pub fn in_transaction(&self) -> bool {
        self.session.in_transaction.load(Ordering::Acquire)
    }
}

#[async_trait]
impl BackendConnection for SessionConnection {
    fn name(&self) -> &str {
        &self.session.data_source
    }

    fn create_statement(&self, config: &StatementConfig) -> DbResult<Box<dyn PhysicalStatement>> {
        if self.session.pool.is_closed() {
            return Err(DbError::connection(
                format!("Data source '{}' is closed", self.session.data_source),
                "Reconnect the data source before creating statements",
            ));
        }
        Ok(Box::new(SqlxStatement {
            session: Arc::clone(&self.session),
            config: *config,
            result_set: None,
            update_count: None,
            generated_keys: None,
            closed: false,
        }))
    }

    async fn release(&self) -> DbResult<()> {
        self.session.release().await
    }
}

/// A statement executing on one backend session.
#[derive(Debug)]
pub struct SqlxStatement {
    session: Arc<Session>,
    config: StatementConfig,
    result_set: Option<ResultCursor>,
    update_count: Option<u64>,
    generated_keys: Option<ResultCursor>,
    closed: bool,
}

impl SqlxStatement {
    fn ensure_open(&self, operation: &str) -> DbResult<()> {
        if self.closed {
            return Err(DbError::illegal_state(
                operation,
                format!("statement on '{}' is closed", self.session.data_source),
            ));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.result_set = None;
        self.update_count = None;
        self.generated_keys = None;
    }

    fn record_update(&mut self, outcome: WriteOutcome, options: &ExecuteOptions) {
        self.update_count = Some(outcome.rows_affected);
        if options.wants_generated_keys() {
            self.generated_keys = Some(self.keys_cursor(outcome, options));
        }
    }

    fn keys_cursor(&self, outcome: WriteOutcome, options: &ExecuteOptions) -> ResultCursor {
        let column = options.key_column_name().to_string();
        let rows = match outcome.last_insert_id {
            Some(id) if outcome.rows_affected > 0 => {
                let mut row = Row::new();
                row.insert(column.clone(), JsonValue::from(id));
                vec![row]
            }
            _ => Vec::new(),
        };
        ResultCursor::new(self.session.data_source.clone(), vec![column], rows)
    }
}

#[async_trait]
impl PhysicalStatement for SqlxStatement {
    fn data_source(&self) -> &str {
        &self.session.data_source
    }

    fn config(&self) -> &StatementConfig {
        &self.config
    }

    async fn execute(&mut self, sql: &str, options: &ExecuteOptions) -> DbResult<bool> {
        self.ensure_open("execute")?;
        self.reset();

        let Execution {
            result_set,
            outcome,
        } = self.session.run(sql, self.config.max_rows).await?;
        match result_set {
            Some(cursor) => {
                self.result_set = Some(cursor);
                Ok(true)
            }
            None => {
                self.record_update(outcome, options);
                Ok(false)
            }
        }
    }

    async fn execute_query(&mut self, sql: &str) -> DbResult<ResultCursor> {
        self.ensure_open("execute_query")?;
        self.reset();
        let cursor = self.session.fetch(sql, self.config.max_rows).await?;
        self.result_set = Some(cursor.clone());
        Ok(cursor)
    }

    async fn execute_update(&mut self, sql: &str, options: &ExecuteOptions) -> DbResult<u64> {
        self.ensure_open("execute_update")?;
        self.reset();
        let outcome = self.session.execute_write(sql).await?;
        self.record_update(outcome, options);
        Ok(outcome.rows_affected)
    }

    fn generated_keys(&self) -> DbResult<ResultCursor> {
        self.ensure_open("generated_keys")?;
        Ok(self
            .generated_keys
            .clone()
            .unwrap_or_else(|| ResultCursor::empty(self.session.data_source.clone())))
    }

    fn result_set(&self) -> DbResult<Option<ResultCursor>> {
        self.ensure_open("result_set")?;
        Ok(self.result_set.clone())
    }

    fn update_count(&self) -> Option<u64> {
        self.update_count
    }

    async fn close(&mut self) -> DbResult<()> {
        if !self.closed {
            debug!(data_source = %self.session.data_source, "Closing physical statement");
            self.closed = true;
            self.reset();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
