//! Data models for statement routing.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod cursor;
pub mod statement;

// Re-export commonly used types
pub use connection::{ConnectionConfig, ConnectionConfigError, DataSourceRole, DatabaseType};
pub use cursor::{ResultCursor, Row};
pub use statement::{
    ExecuteOptions, ExecutionOutcome, GeneratedKeysMode, ResultSetConcurrency,
    ResultSetHoldability, ResultSetType, StatementConfig,
};
