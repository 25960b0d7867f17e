//! Read/write split routing over one master and its slaves.
//!
//! Routing rules:
//! - DDL runs on every data source, master first.
//! - DML runs on the master and pins later reads of the same logical
//!   connection to the master.
//! - Queries go to a load-balanced slave unless the connection is pinned,
//!   master-only routing is on, or there are no slaves.
//! - Everything else runs on the master.
//!
//! Each logical connection routes over its own backend sessions, opened from
//! the group's data sources when the connection is created.

use super::balance::LoadBalanceStrategy;
use super::sql_judge::{self, SqlType};
use super::{RouteDecision, RoutingResolver};
use crate::config::LoadBalanceMode;
use crate::connection::MasterSlaveConnection;
use crate::db::{BackendConnection, BackendDataSource};
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// A named master plus ordered slaves.
#[derive(Debug, Clone)]
pub struct MasterSlaveDataSource {
    name: String,
    master: Arc<dyn BackendDataSource>,
    slaves: Vec<Arc<dyn BackendDataSource>>,
    strategy: Arc<LoadBalanceStrategy>,
    db_type: Option<DatabaseType>,
    master_only: bool,
}

impl MasterSlaveDataSource {
    /// Create a data source. Data source names must be unique across the group.
    pub fn new(
        name: impl Into<String>,
        master: Arc<dyn BackendDataSource>,
        slaves: Vec<Arc<dyn BackendDataSource>>,
    ) -> DbResult<Self> {
        let name = name.into();
        let mut seen = HashSet::new();
        for backend in std::iter::once(&master).chain(slaves.iter()) {
            if !seen.insert(backend.name().to_string()) {
                return Err(DbError::invalid_input(format!(
                    "Duplicate data source name '{}' in '{}'",
                    backend.name(),
                    name
                )));
            }
        }

        info!(
            name = %name,
            master = %master.name(),
            slaves = slaves.len(),
            "Master/slave data source ready"
        );

        Ok(Self {
            name,
            master,
            slaves,
            strategy: Arc::new(LoadBalanceStrategy::default()),
            db_type: None,
            master_only: false,
        })
    }

    pub fn with_load_balance(mut self, mode: LoadBalanceMode) -> Self {
        self.strategy = Arc::new(LoadBalanceStrategy::new(mode));
        self
    }

    /// SQL dialect used to classify statements. None parses generically.
    pub fn with_db_type(mut self, db_type: Option<DatabaseType>) -> Self {
        self.db_type = db_type;
        self
    }

    /// Route every statement to the master.
    pub fn with_master_only(mut self, master_only: bool) -> Self {
        self.master_only = master_only;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn master(&self) -> &Arc<dyn BackendDataSource> {
        &self.master
    }

    pub fn slaves(&self) -> &[Arc<dyn BackendDataSource>] {
        &self.slaves
    }

    pub fn load_balance(&self) -> LoadBalanceMode {
        self.strategy.mode()
    }

    /// Create a router over fresh sessions, with its own master-visited flag.
    pub fn router(&self) -> DbResult<MasterSlaveRouter> {
        let master = self.master.open_session()?;
        let slaves = self
            .slaves
            .iter()
            .map(|slave| slave.open_session())
            .collect::<DbResult<Vec<_>>>()?;
        debug!(name = %self.name, sessions = slaves.len() + 1, "Opened backend sessions");

        Ok(MasterSlaveRouter {
            master,
            slaves,
            strategy: Arc::clone(&self.strategy),
            db_type: self.db_type,
            master_only: self.master_only,
            master_visited: AtomicBool::new(false),
        })
    }

    /// Open a logical connection backed by a fresh router.
    pub fn connect(&self) -> DbResult<MasterSlaveConnection> {
        Ok(MasterSlaveConnection::new(Arc::new(self.router()?)))
    }
}

/// Routes statements of one logical connection over its backend sessions.
#[derive(Debug)]
pub struct MasterSlaveRouter {
    master: Arc<dyn BackendConnection>,
    slaves: Vec<Arc<dyn BackendConnection>>,
    strategy: Arc<LoadBalanceStrategy>,
    db_type: Option<DatabaseType>,
    master_only: bool,
    master_visited: AtomicBool,
}

impl MasterSlaveRouter {
    /// Check if a write has pinned this connection's reads to the master.
    pub fn is_master_visited(&self) -> bool {
        self.master_visited.load(Ordering::Acquire)
    }

    /// Pick the targets for an already classified statement.
    pub fn route(&self, sql_type: SqlType) -> DbResult<RouteDecision> {
        match sql_type {
            SqlType::Ddl => {
                let mut all = Vec::with_capacity(self.slaves.len() + 1);
                all.push(Arc::clone(&self.master));
                all.extend(self.slaves.iter().cloned());
                RouteDecision::new(all)
            }
            SqlType::Dml => {
                self.master_visited.store(true, Ordering::Release);
                Ok(self.to_master())
            }
            SqlType::Dql => {
                if self.master_only || self.is_master_visited() {
                    return Ok(self.to_master());
                }
                match self.strategy.pick(&self.slaves) {
                    Some(slave) => Ok(RouteDecision::single(Arc::clone(slave))),
                    None => Ok(self.to_master()),
                }
            }
            SqlType::Tcl | SqlType::Dal | SqlType::Unknown => Ok(self.to_master()),
        }
    }

    fn to_master(&self) -> RouteDecision {
        RouteDecision::single(Arc::clone(&self.master))
    }
}

#[async_trait]
impl RoutingResolver for MasterSlaveRouter {
    async fn resolve(&self, sql: &str) -> DbResult<RouteDecision> {
        let sql_type = sql_judge::judge(sql, self.db_type)?;
        let decision = self.route(sql_type)?;
        debug!(
            sql_type = %sql_type,
            targets = ?decision.names(),
            master_visited = self.is_master_visited(),
            "Resolved route"
        );
        Ok(decision)
    }

    /// Release every session, master first. The first failure is returned.
    async fn release(&self) -> DbResult<()> {
        let mut first_error = None;
        for session in std::iter::once(&self.master).chain(self.slaves.iter()) {
            if let Err(e) = session.release().await {
                warn!(data_source = %session.name(), error = %e, "Failed to release session");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
