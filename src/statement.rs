//! Routed statement handle.
//!
//! A [`MasterSlaveStatement`] presents one statement to the caller while the
//! resolver decides, per call, which backend connections actually run the SQL.
//!
//! Routing rules enforced here:
//! - `execute_query` and `execute_update*` need exactly one connection. Any
//!   other count is an invariant violation and nothing runs.
//! - `execute*` runs on every resolved connection in order. The last one
//!   executed becomes the current statement and supplies the return value.
//!
//! Each call starts a new execution cycle; the physical statements of the
//! previous cycle are closed first.

use crate::connection::MasterSlaveConnection;
use crate::db::PhysicalStatement;
use crate::error::{DbError, DbResult};
use crate::models::{ExecuteOptions, ExecutionOutcome, ResultCursor, StatementConfig};
use crate::routing::RouteDecision;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Which fan-out statements stay tracked after a generic execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationPolicy {
    /// Keep only the last executed statement; earlier ones are closed as soon
    /// as the next one has run.
    #[default]
    LastOnly,
    /// Keep every fan-out statement in resolver order.
    AllResults,
}

/// Physical statements of one execution cycle. The last one is current.
#[derive(Debug, Default)]
struct RoutedStatements {
    statements: Vec<Box<dyn PhysicalStatement>>,
    outcomes: Vec<ExecutionOutcome>,
}

impl RoutedStatements {
    fn single(statement: Box<dyn PhysicalStatement>, outcome: ExecutionOutcome) -> Self {
        Self {
            statements: vec![statement],
            outcomes: vec![outcome],
        }
    }

    async fn push(
        &mut self,
        statement: Box<dyn PhysicalStatement>,
        outcome: ExecutionOutcome,
        policy: AggregationPolicy,
        statement_id: Uuid,
    ) {
        if policy == AggregationPolicy::LastOnly {
            for mut earlier in self.statements.drain(..) {
                if let Err(e) = earlier.close().await {
                    warn!(
                        statement_id = %statement_id,
                        data_source = %earlier.data_source(),
                        error = %e,
                        "Failed to close superseded statement"
                    );
                }
            }
            self.outcomes.clear();
        }
        self.statements.push(statement);
        self.outcomes.push(outcome);
    }

    fn current(&self) -> Option<&dyn PhysicalStatement> {
        self.statements.last().map(|s| &**s)
    }

    /// Close every statement, returning the first failure.
    async fn close_all(self) -> DbResult<()> {
        let mut first_error = None;
        for mut statement in self.statements {
            if let Err(e) = statement.close().await {
                warn!(data_source = %statement.data_source(), error = %e, "Failed to close statement");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[derive(Debug)]
enum StatementState {
    Idle,
    Bound(RoutedStatements),
    Closed,
}

/// A logical statement whose SQL is dispatched to routed backends.
pub struct MasterSlaveStatement<'c> {
    id: Uuid,
    connection: &'c MasterSlaveConnection,
    config: StatementConfig,
    policy: AggregationPolicy,
    state: StatementState,
}

impl<'c> MasterSlaveStatement<'c> {
    pub(crate) fn new(
        connection: &'c MasterSlaveConnection,
        config: StatementConfig,
        policy: AggregationPolicy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection,
            config,
            policy,
            state: StatementState::Idle,
        }
    }

    /// Override the aggregation policy inherited from the connection.
    pub fn with_policy(mut self, policy: AggregationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Execute a row-returning statement on exactly one routed connection.
    pub async fn execute_query(&mut self, sql: &str) -> DbResult<ResultCursor> {
        let mut statement = self.route_single("execute_query", sql).await?;
        let result = statement.execute_query(sql).await;
        let outcome = ExecutionOutcome {
            data_source: statement.data_source().to_string(),
            has_result_set: result.is_ok(),
        };
        self.bind(RoutedStatements::single(statement, outcome));
        self.log_failure("execute_query", &result);
        result
    }

    /// Execute a non-row-returning statement on exactly one routed connection.
    pub async fn execute_update(&mut self, sql: &str) -> DbResult<u64> {
        self.execute_update_with(sql, ExecuteOptions::Plain).await
    }

    /// Like [`execute_update`](Self::execute_update), with generated-key options.
    pub async fn execute_update_with(
        &mut self,
        sql: &str,
        options: ExecuteOptions,
    ) -> DbResult<u64> {
        let mut statement = self.route_single("execute_update", sql).await?;
        let result = statement.execute_update(sql, &options).await;
        let outcome = ExecutionOutcome {
            data_source: statement.data_source().to_string(),
            has_result_set: false,
        };
        self.bind(RoutedStatements::single(statement, outcome));
        self.log_failure("execute_update", &result);
        result
    }

    /// Execute a statement on every routed connection.
    ///
    /// Returns whether the last connection's execution produced a result set.
    /// Stops at the first failure; the failing statement becomes current.
    pub async fn execute(&mut self, sql: &str) -> DbResult<bool> {
        self.execute_with(sql, ExecuteOptions::Plain).await
    }

    /// Like [`execute`](Self::execute), with generated-key options.
    pub async fn execute_with(&mut self, sql: &str, options: ExecuteOptions) -> DbResult<bool> {
        let decision = self.resolve("execute", sql).await?;
        self.release_previous().await;

        let mut routed = RoutedStatements::default();
        let mut has_result_set = false;
        for connection in decision {
            let mut statement = match connection.create_statement(&self.config) {
                Ok(statement) => statement,
                Err(e) => {
                    warn!(
                        statement_id = %self.id,
                        data_source = %connection.name(),
                        error = %e,
                        "Failed to create physical statement"
                    );
                    self.bind(routed);
                    return Err(e);
                }
            };

            let result = statement.execute(sql, &options).await;
            let outcome = ExecutionOutcome {
                data_source: statement.data_source().to_string(),
                has_result_set: matches!(result, Ok(true)),
            };
            routed.push(statement, outcome, self.policy, self.id).await;

            match result {
                Ok(flag) => has_result_set = flag,
                Err(e) => {
                    self.bind(routed);
                    let result = Err(e);
                    self.log_failure("execute", &result);
                    return result;
                }
            }
        }

        self.bind(routed);
        Ok(has_result_set)
    }

    /// Keys generated by the current statement's last update.
    pub fn generated_keys(&self) -> DbResult<ResultCursor> {
        self.current("generated_keys")?.generated_keys()
    }

    /// Result set of the current statement, if it produced one.
    pub fn result_set(&self) -> DbResult<Option<ResultCursor>> {
        self.current("result_set")?.result_set()
    }

    /// Affected rows reported by the current statement.
    pub fn update_count(&self) -> DbResult<Option<u64>> {
        Ok(self.current("update_count")?.update_count())
    }

    /// Physical statements of the most recent call still held for cleanup.
    pub fn routed_statements(&self) -> &[Box<dyn PhysicalStatement>] {
        match &self.state {
            StatementState::Bound(routed) => &routed.statements,
            StatementState::Idle | StatementState::Closed => &[],
        }
    }

    /// Per-connection outcomes of the most recent call.
    pub fn execution_outcomes(&self) -> &[ExecutionOutcome] {
        match &self.state {
            StatementState::Bound(routed) => &routed.outcomes,
            StatementState::Idle | StatementState::Closed => &[],
        }
    }

    /// Close all tracked physical statements.
    ///
    /// Every statement is attempted even if an earlier one fails; the first
    /// failure is returned. Closing twice is a no-op.
    pub async fn close(&mut self) -> DbResult<()> {
        match std::mem::replace(&mut self.state, StatementState::Closed) {
            StatementState::Bound(routed) => {
                debug!(statement_id = %self.id, count = routed.statements.len(), "Closing statement");
                routed.close_all().await
            }
            StatementState::Idle | StatementState::Closed => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, StatementState::Closed)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &StatementConfig {
        &self.config
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    pub fn connection(&self) -> &'c MasterSlaveConnection {
        self.connection
    }

    fn ensure_open(&self, operation: &str) -> DbResult<()> {
        if self.is_closed() {
            return Err(DbError::illegal_state(operation, "statement is closed"));
        }
        Ok(())
    }

    async fn resolve(&self, operation: &str, sql: &str) -> DbResult<RouteDecision> {
        self.ensure_open(operation)?;
        let decision = self.connection.route(sql).await.inspect_err(|e| {
            warn!(statement_id = %self.id, operation, sql = %sql, error = %e, "Routing failed");
        })?;
        debug!(
            statement_id = %self.id,
            operation,
            sql = %sql,
            targets = ?decision.names(),
            "Routed statement"
        );
        Ok(decision)
    }

    /// Resolve and create the single physical statement for a query or update.
    async fn route_single(
        &mut self,
        operation: &str,
        sql: &str,
    ) -> DbResult<Box<dyn PhysicalStatement>> {
        let decision = self.resolve(operation, sql).await?;
        if decision.len() != 1 {
            warn!(
                statement_id = %self.id,
                operation,
                targets = ?decision.names(),
                "Resolver returned more than one connection"
            );
            return Err(DbError::invariant_violation(operation, "exactly 1", decision.len()));
        }

        self.release_previous().await;
        let connection = decision
            .into_iter()
            .next()
            .ok_or_else(|| DbError::internal("route decision lost its connection"))?;
        connection.create_statement(&self.config)
    }

    /// Close the previous cycle's statements and return to `Idle`.
    async fn release_previous(&mut self) {
        if let StatementState::Bound(routed) =
            std::mem::replace(&mut self.state, StatementState::Idle)
        {
            if let Err(e) = routed.close_all().await {
                warn!(statement_id = %self.id, error = %e, "Failed to release previous statements");
            }
        }
    }

    fn bind(&mut self, routed: RoutedStatements) {
        self.state = if routed.statements.is_empty() {
            StatementState::Idle
        } else {
            StatementState::Bound(routed)
        };
    }

    fn current(&self, operation: &str) -> DbResult<&dyn PhysicalStatement> {
        match &self.state {
            StatementState::Bound(routed) => routed
                .current()
                .ok_or_else(|| DbError::internal("bound statement set is empty")),
            StatementState::Idle => Err(DbError::illegal_state(
                operation,
                "no statement has been executed",
            )),
            StatementState::Closed => Err(DbError::illegal_state(operation, "statement is closed")),
        }
    }

    fn log_failure<T>(&self, operation: &str, result: &DbResult<T>) {
        if let Err(e) = result {
            warn!(
                statement_id = %self.id,
                operation,
                data_source = self.current(operation).map(|s| s.data_source()).unwrap_or("-"),
                error = %e,
                "Statement execution failed"
            );
        }
    }
}

impl fmt::Debug for MasterSlaveStatement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSlaveStatement")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for MasterSlaveStatement<'_> {
    fn drop(&mut self) {
        if let StatementState::Bound(routed) = &self.state {
            warn!(
                statement_id = %self.id,
                open_statements = routed.statements.len(),
                "Statement dropped without close"
            );
        }
    }
}
