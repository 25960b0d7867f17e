//! db-rw-router - Main entry point.
//!
//! Runs SQL statements through a master/slave router and prints each result
//! as a JSON line.

use clap::Parser;
use db_rw_router::config::Config;
use db_rw_router::db::{BackendDataSource, DataSource};
use db_rw_router::models::{DatabaseType, ResultCursor};
use db_rw_router::{DbError, DbResult, MasterSlaveDataSource, MasterSlaveStatement};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only results
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Dialect shared by all backends, if they agree.
fn common_db_type(sources: &[Arc<DataSource>]) -> Option<DatabaseType> {
    let first = sources.first()?.db_type();
    sources
        .iter()
        .all(|s| s.db_type() == first)
        .then_some(first)
}

/// Log an error together with its suggestion, when it has one.
fn report(context: &str, e: &DbError) {
    match e.suggestion() {
        Some(suggestion) => error!(error = %e, suggestion = %suggestion, "{}", context),
        None => error!(error = %e, "{}", context),
    }
}

/// Execute one statement and print its result.
async fn run_statement(statement: &mut MasterSlaveStatement<'_>, sql: &str) -> DbResult<()> {
    let has_result_set = statement.execute(sql).await?;
    let targets: Vec<&str> = statement
        .execution_outcomes()
        .iter()
        .map(|o| o.data_source.as_str())
        .collect();

    let output = if has_result_set {
        let cursor = statement.result_set()?.unwrap_or_else(|| {
            ResultCursor::empty(targets.last().copied().unwrap_or_default())
        });
        json!({
            "data_source": cursor.data_source(),
            "columns": cursor.columns(),
            "truncated": cursor.is_truncated(),
            "rows": cursor.into_rows(),
        })
    } else {
        json!({
            "data_sources": targets,
            "rows_affected": statement.update_count()?,
        })
    };
    let line = serde_json::to_string(&output)
        .map_err(|e| DbError::internal(format!("Failed to serialize result: {}", e)))?;
    println!("{}", line);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(
        name = %config.name,
        load_balance = %config.load_balance,
        master_only = config.master_only,
        "Starting db-rw-router v{}",
        env!("CARGO_PKG_VERSION")
    );

    let master_config = config.parse_master()?;
    let slave_configs = config.parse_slaves()?;
    let timeout = config.query_timeout_duration();

    let master = Arc::new(
        DataSource::connect(&master_config, timeout)
            .await
            .inspect_err(|e| report("Failed to connect master", e))?,
    );
    let mut slaves = Vec::with_capacity(slave_configs.len());
    for slave_config in &slave_configs {
        let slave = DataSource::connect(slave_config, timeout)
            .await
            .inspect_err(|e| report("Failed to connect slave", e))?;
        slaves.push(Arc::new(slave));
    }

    let mut all_sources = vec![Arc::clone(&master)];
    all_sources.extend(slaves.iter().cloned());

    let data_source = MasterSlaveDataSource::new(
        config.name.clone(),
        Arc::clone(&master) as Arc<dyn BackendDataSource>,
        slaves
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn BackendDataSource>)
            .collect(),
    )?
    .with_load_balance(config.load_balance)
    .with_db_type(common_db_type(&all_sources))
    .with_master_only(config.master_only);

    let connection = data_source.connect()?;
    let mut statement = connection.create_statement();

    let mut result = Ok(());
    for sql in &config.statements {
        if let Err(e) = run_statement(&mut statement, sql).await {
            report(&format!("Statement failed: {}", sql), &e);
            println!("{}", e.to_json());
            result = Err(e);
            break;
        }
    }

    if let Err(e) = statement.close().await {
        report("Failed to close statement", &e);
    }
    if let Err(e) = connection.close().await {
        report("Failed to close connection", &e);
    }
    for source in &all_sources {
        source.close().await;
    }

    info!("Shutdown complete");
    result.map_err(Into::into)
}
