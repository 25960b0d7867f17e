use db_rw_router::config::{LoadBalanceMode, parse_data_source};
use db_rw_router::db::{BackendConnection, BackendDataSource, DataSource};
use db_rw_router::models::{DataSourceRole, DatabaseType, ExecuteOptions, GeneratedKeysMode};
use db_rw_router::{DbError, MasterSlaveDataSource};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Cluster {
    _dir: TempDir,
    master: Arc<DataSource>,
    slaves: Vec<Arc<DataSource>>,
}

impl Cluster {
    async fn new(slave_count: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        // Every logical connection holds its own session, so pools need room
        let url = |file: &str| {
            format!(
                "sqlite:{}?max_connections=4",
                dir.path().join(file).display()
            )
        };

        let master_config =
            parse_data_source(&url("master.db"), DataSourceRole::Master, "master").unwrap();
        let master = DataSource::connect(&master_config, Duration::from_secs(5))
            .await
            .unwrap();

        let mut slaves = Vec::new();
        for idx in 0..slave_count {
            let config = parse_data_source(
                &format!("slave_{idx}={}", url(&format!("replica{idx}.db"))),
                DataSourceRole::Slave,
                "unused",
            )
            .unwrap();
            slaves.push(Arc::new(
                DataSource::connect(&config, Duration::from_secs(5))
                    .await
                    .unwrap(),
            ));
        }

        Self {
            _dir: dir,
            master: Arc::new(master),
            slaves,
        }
    }

    fn data_source(&self) -> MasterSlaveDataSource {
        MasterSlaveDataSource::new(
            "ms_ds",
            Arc::clone(&self.master) as Arc<dyn BackendDataSource>,
            self.slaves
                .iter()
                .map(|s| Arc::clone(s) as Arc<dyn BackendDataSource>)
                .collect(),
        )
        .unwrap()
        .with_db_type(Some(DatabaseType::SQLite))
    }

    async fn count_rows(source: &DataSource, table: &str) -> i64 {
        let session = source.session().unwrap();
        let mut stmt = session.create_statement(&Default::default()).unwrap();
        let cursor = stmt
            .execute_query(&format!("SELECT COUNT(*) AS n FROM {table}"))
            .await
            .unwrap();
        session.release().await.unwrap();
        cursor.into_rows().remove(0)["n"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn test_read_write_split_end_to_end() {
    let cluster = Cluster::new(1).await;
    let ds = cluster.data_source();
    assert_eq!(cluster.master.name(), "master");
    assert_eq!(cluster.slaves[0].name(), "slave_0");

    let writer = ds.connect().unwrap();
    let mut statement = writer.create_statement();

    // DDL lands on every data source
    let has_rows = statement
        .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .await
        .unwrap();
    assert!(!has_rows);
    assert_eq!(statement.execution_outcomes().len(), 1);
    assert_eq!(statement.execution_outcomes()[0].data_source, "slave_0");

    // Writes go to the master only
    let rows = statement
        .execute_update_with(
            "INSERT INTO users (name) VALUES ('alice')",
            ExecuteOptions::GeneratedKeys(GeneratedKeysMode::Return),
        )
        .await
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(statement.routed_statements()[0].data_source(), "master");
    let key = statement.generated_keys().unwrap().into_rows().remove(0);
    assert_eq!(key["GENERATED_KEY"], json!(1));

    assert_eq!(Cluster::count_rows(&cluster.master, "users").await, 1);
    assert_eq!(Cluster::count_rows(&cluster.slaves[0], "users").await, 0);

    // Same connection reads its own write from the master
    let cursor = statement.execute_query("SELECT name FROM users").await.unwrap();
    assert_eq!(cursor.data_source(), "master");
    assert_eq!(cursor.into_rows().remove(0)["name"], json!("alice"));
    statement.close().await.unwrap();
    writer.close().await.unwrap();

    // A fresh connection reads from the slave
    let reader = ds.connect().unwrap();
    let mut statement = reader.create_statement();
    let cursor = statement.execute_query("SELECT name FROM users").await.unwrap();
    assert_eq!(cursor.data_source(), "slave_0");
    assert_eq!(cursor.remaining(), 0);

    assert!(statement.execute("SELECT * FROM users").await.unwrap());
    assert_eq!(
        statement.result_set().unwrap().unwrap().data_source(),
        "slave_0"
    );
    statement.close().await.unwrap();
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_round_robin_over_sqlite_slaves() {
    let cluster = Cluster::new(2).await;
    let ds = cluster
        .data_source()
        .with_load_balance(LoadBalanceMode::RoundRobin);

    let mut seen = Vec::new();
    for _ in 0..4 {
        let connection = ds.connect().unwrap();
        let mut statement = connection.create_statement();
        let cursor = statement.execute_query("SELECT 1 AS one").await.unwrap();
        seen.push(cursor.data_source().to_string());
        statement.close().await.unwrap();
        connection.close().await.unwrap();
    }
    assert_eq!(seen, ["slave_0", "slave_1", "slave_0", "slave_1"]);
}

#[tokio::test]
async fn test_master_only_routing() {
    let cluster = Cluster::new(1).await;
    let ds = cluster.data_source().with_master_only(true);

    let connection = ds.connect().unwrap();
    let mut statement = connection.create_statement();
    let cursor = statement.execute_query("SELECT 1 AS one").await.unwrap();
    assert_eq!(cursor.data_source(), "master");
    statement.close().await.unwrap();
}

#[tokio::test]
async fn test_ddl_fan_out_cannot_use_execute_update() {
    let cluster = Cluster::new(1).await;
    let ds = cluster.data_source();

    let connection = ds.connect().unwrap();
    let mut statement = connection.create_statement();
    let err = statement
        .execute_update("CREATE TABLE t (id INTEGER)")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvariantViolation { actual: 2, .. }));
    statement.close().await.unwrap();
}

#[tokio::test]
async fn test_backend_error_names_failing_data_source() {
    let cluster = Cluster::new(1).await;
    let ds = cluster.data_source();

    let connection = ds.connect().unwrap();
    let mut statement = connection.create_statement();
    let err = statement
        .execute_query("SELECT * FROM missing_table")
        .await
        .unwrap_err();
    match err {
        DbError::Execution { data_source, .. } => assert_eq!(data_source, "slave_0"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(statement.routed_statements()[0].data_source(), "slave_0");
    statement.close().await.unwrap();
}

#[tokio::test]
async fn test_rollback_spans_statements_of_one_connection() {
    let cluster = Cluster::new(1).await;
    let ds = cluster.data_source();

    let setup = ds.connect().unwrap();
    let mut statement = setup.create_statement();
    statement
        .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .await
        .unwrap();
    statement.close().await.unwrap();
    setup.close().await.unwrap();

    // Park two idle connections in the master pool so a call could land on either
    let sessions = [
        cluster.master.session().unwrap(),
        cluster.master.session().unwrap(),
    ];
    for session in &sessions {
        let mut stmt = session.create_statement(&Default::default()).unwrap();
        stmt.execute_query("SELECT 1 AS one").await.unwrap();
    }
    for session in &sessions {
        session.release().await.unwrap();
    }

    let connection = ds.connect().unwrap();
    let mut statement = connection.create_statement();
    assert!(!statement.execute("BEGIN").await.unwrap());
    assert_eq!(statement.execution_outcomes()[0].data_source, "master");
    statement
        .execute_update("INSERT INTO users (name) VALUES ('carol')")
        .await
        .unwrap();
    let cursor = statement
        .execute_query("SELECT COUNT(*) AS n FROM users")
        .await
        .unwrap();
    assert_eq!(cursor.data_source(), "master");
    assert_eq!(cursor.into_rows()[0]["n"], json!(1));

    statement.execute("ROLLBACK").await.unwrap();
    statement.close().await.unwrap();
    connection.close().await.unwrap();

    assert_eq!(Cluster::count_rows(&cluster.master, "users").await, 0);
}

#[tokio::test]
async fn test_close_rolls_back_open_transaction() {
    let cluster = Cluster::new(1).await;
    let ds = cluster.data_source();

    let connection = ds.connect().unwrap();
    let mut statement = connection.create_statement();
    statement
        .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .await
        .unwrap();
    statement.execute("BEGIN").await.unwrap();
    statement
        .execute_update("INSERT INTO users (name) VALUES ('dave')")
        .await
        .unwrap();
    statement.close().await.unwrap();
    connection.close().await.unwrap();

    assert_eq!(Cluster::count_rows(&cluster.master, "users").await, 0);

    // Released sessions refuse further work
    let mut statement = connection.create_statement();
    let err = statement.execute_query("SELECT 1 AS one").await.unwrap_err();
    assert!(matches!(err, DbError::IllegalState { .. }));
    statement.close().await.unwrap();
}

#[tokio::test]
async fn test_execute_reports_rows_from_returning_insert() {
    let cluster = Cluster::new(1).await;
    let ds = cluster.data_source();

    let connection = ds.connect().unwrap();
    let mut statement = connection.create_statement();
    statement
        .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .await
        .unwrap();

    let has_rows = statement
        .execute("INSERT INTO users (name) VALUES ('erin') RETURNING id")
        .await
        .unwrap();
    assert!(has_rows);
    let cursor = statement.result_set().unwrap().unwrap();
    assert_eq!(cursor.data_source(), "master");
    assert_eq!(cursor.into_rows()[0]["id"], json!(1));
    assert_eq!(statement.update_count().unwrap(), None);

    statement.close().await.unwrap();
    connection.close().await.unwrap();
}
