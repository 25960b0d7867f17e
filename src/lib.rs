//! Master/slave statement routing library.
//!
//! This library dispatches SQL statements to the backend connections chosen by
//! a routing resolver (SQLite, PostgreSQL, MySQL) and presents the result as a
//! single statement handle.

pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod models;
pub mod routing;
pub mod statement;

pub use config::Config;
pub use connection::MasterSlaveConnection;
pub use error::{DbError, DbResult};
pub use routing::{MasterSlaveDataSource, RouteDecision, RoutingResolver};
pub use statement::{AggregationPolicy, MasterSlaveStatement};
