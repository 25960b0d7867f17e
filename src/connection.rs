//! Logical connection over a routing resolver.

use crate::error::DbResult;
use crate::models::StatementConfig;
use crate::routing::{RouteDecision, RoutingResolver};
use crate::statement::{AggregationPolicy, MasterSlaveStatement};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A logical connection that hands out routed statements.
///
/// Owns the resolver binding; statements borrow the connection, so they
/// cannot outlive it. Call [`close`](Self::close) when done so backend
/// sessions go back to their pools in a clean state.
pub struct MasterSlaveConnection {
    resolver: Arc<dyn RoutingResolver>,
    policy: AggregationPolicy,
}

impl MasterSlaveConnection {
    pub fn new(resolver: Arc<dyn RoutingResolver>) -> Self {
        Self {
            resolver,
            policy: AggregationPolicy::default(),
        }
    }

    /// Set the aggregation policy for statements created from now on.
    pub fn with_policy(mut self, policy: AggregationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    /// Create a statement with default result set options.
    pub fn create_statement(&self) -> MasterSlaveStatement<'_> {
        self.create_statement_with(StatementConfig::default())
    }

    /// Create a statement with explicit result set options.
    pub fn create_statement_with(&self, config: StatementConfig) -> MasterSlaveStatement<'_> {
        MasterSlaveStatement::new(self, config, self.policy)
    }

    /// Ask the resolver for the connection set of `sql`.
    pub async fn route(&self, sql: &str) -> DbResult<RouteDecision> {
        self.resolver.resolve(sql).await
    }

    pub fn resolver(&self) -> &Arc<dyn RoutingResolver> {
        &self.resolver
    }

    /// Release the backend sessions behind this connection.
    ///
    /// Transactions still open on a session are rolled back. Statements
    /// executed afterwards fail with an illegal state error.
    pub async fn close(&self) -> DbResult<()> {
        debug!(policy = ?self.policy, "Closing logical connection");
        self.resolver.release().await
    }
}

impl fmt::Debug for MasterSlaveConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSlaveConnection")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
