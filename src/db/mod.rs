//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Backend data source, session and statement contracts
//! - Connection pool management and per-session connections
//! - Query execution
//! - Type mappings
//! - Database dispatch macros for reducing code duplication

pub mod backend;
pub mod data_source;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod pool;
pub mod types;

pub use backend::{BackendConnection, BackendDataSource, PhysicalStatement};
pub use data_source::{DataSource, SessionConnection, SqlxStatement};
pub use executor::{Execution, QueryExecutor, WriteOutcome};
pub use pool::{DbConnection, DbPool, create_pool};
