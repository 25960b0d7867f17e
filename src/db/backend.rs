//! Backend data source, connection and physical statement contracts.
//!
//! The dispatcher only ever talks to backends through these traits, so any
//! driver (or a test double) can sit behind a routing decision.

use crate::error::DbResult;
use crate::models::{ExecuteOptions, ResultCursor, StatementConfig};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A physical database that hands out one session per logical connection.
pub trait BackendDataSource: Send + Sync + fmt::Debug {
    /// Data source name, unique within a master/slave group.
    fn name(&self) -> &str;

    /// Open a session. Every statement created from it shares one backend
    /// connection, so session state (transactions, variables) carries over.
    fn open_session(&self) -> DbResult<Arc<dyn BackendConnection>>;
}

/// A session on one physical backend database.
#[async_trait]
pub trait BackendConnection: Send + Sync + fmt::Debug {
    /// Data source name, unique within a master/slave group.
    fn name(&self) -> &str;

    /// Create a statement bound to this backend.
    ///
    /// The configuration is passed through unchanged.
    fn create_statement(&self, config: &StatementConfig) -> DbResult<Box<dyn PhysicalStatement>>;

    /// Give the session's backend connection back. Calling it again has no effect.
    async fn release(&self) -> DbResult<()> {
        Ok(())
    }
}

/// A statement handle bound to exactly one backend connection.
#[async_trait]
pub trait PhysicalStatement: Send + Sync + fmt::Debug {
    /// Name of the data source this statement runs on.
    fn data_source(&self) -> &str;

    fn config(&self) -> &StatementConfig;

    /// Execute any statement. Returns true when the backend produced a result set.
    async fn execute(&mut self, sql: &str, options: &ExecuteOptions) -> DbResult<bool>;

    /// Execute a row-returning statement.
    async fn execute_query(&mut self, sql: &str) -> DbResult<ResultCursor>;

    /// Execute a non-row-returning statement and return the affected row count.
    async fn execute_update(&mut self, sql: &str, options: &ExecuteOptions) -> DbResult<u64>;

    /// Keys generated by the last update, empty when none were captured.
    fn generated_keys(&self) -> DbResult<ResultCursor>;

    /// Result set of the last execution, if it produced one.
    fn result_set(&self) -> DbResult<Option<ResultCursor>>;

    /// Affected row count of the last execution, if it was an update.
    fn update_count(&self) -> Option<u64>;

    /// Release the statement. Calling it again has no effect.
    async fn close(&mut self) -> DbResult<()>;

    fn is_closed(&self) -> bool;
}
