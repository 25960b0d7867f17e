//! Statement routing.
//!
//! A [`RoutingResolver`] maps one logical SQL statement to the ordered set of
//! backend connections that must execute it. [`MasterSlaveRouter`] is the
//! read/write split shipped with the crate.

pub mod balance;
pub mod master_slave;
pub mod sql_judge;

pub use balance::LoadBalanceStrategy;
pub use master_slave::{MasterSlaveDataSource, MasterSlaveRouter};
pub use sql_judge::{SqlType, TransactionBoundary, judge};

use crate::db::BackendConnection;
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves the backend connections for a statement.
#[async_trait]
pub trait RoutingResolver: Send + Sync {
    /// Resolve the connection set for `sql`.
    async fn resolve(&self, sql: &str) -> DbResult<RouteDecision>;

    /// Release the backend sessions this resolver routes to.
    async fn release(&self) -> DbResult<()> {
        Ok(())
    }
}

/// Non-empty ordered set of backend connections chosen for one statement.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    connections: Vec<Arc<dyn BackendConnection>>,
}

impl RouteDecision {
    /// Build a decision, rejecting an empty connection set.
    pub fn new(connections: Vec<Arc<dyn BackendConnection>>) -> DbResult<Self> {
        if connections.is_empty() {
            return Err(DbError::routing("Resolver produced no target connection"));
        }
        Ok(Self { connections })
    }

    /// Decision targeting a single connection.
    pub fn single(connection: Arc<dyn BackendConnection>) -> Self {
        Self {
            connections: vec![connection],
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn connections(&self) -> &[Arc<dyn BackendConnection>] {
        &self.connections
    }

    /// Data source names in routing order.
    pub fn names(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.name()).collect()
    }
}

impl IntoIterator for RouteDecision {
    type Item = Arc<dyn BackendConnection>;
    type IntoIter = std::vec::IntoIter<Arc<dyn BackendConnection>>;

    fn into_iter(self) -> Self::IntoIter {
        self.connections.into_iter()
    }
}
