//! SQL statement classification for read/write routing.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) to classify statements. Text the
//! parser rejects (vendor extensions, partial dialect support) falls back to its
//! first keyword, so routing never depends on full grammar coverage.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use std::fmt;
use tracing::debug;

/// Routing category of a SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// Queries: SELECT, SHOW, DESCRIBE, EXPLAIN of a query
    Dql,
    /// Data changes: INSERT, UPDATE, DELETE, MERGE, COPY
    Dml,
    /// Schema changes: CREATE, ALTER, DROP, TRUNCATE
    Ddl,
    /// Transaction control: BEGIN, COMMIT, ROLLBACK, SAVEPOINT
    Tcl,
    /// Administrative: SET, USE, GRANT, LOCK, VACUUM
    Dal,
    /// Parsed but not in any category above (CALL, PREPARE, ...)
    Unknown,
}

impl SqlType {
    /// Rank used to pick the governing type of multi-statement text.
    fn write_rank(self) -> u8 {
        match self {
            SqlType::Dql => 0,
            SqlType::Tcl | SqlType::Dal | SqlType::Unknown => 1,
            SqlType::Dml => 2,
            SqlType::Ddl => 3,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Dql => "DQL",
            SqlType::Dml => "DML",
            SqlType::Ddl => "DDL",
            SqlType::Tcl => "TCL",
            SqlType::Dal => "DAL",
            SqlType::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Transaction boundary crossed by SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionBoundary {
    Begin,
    /// COMMIT, or ROLLBACK of the whole transaction
    End,
}

/// Get the SQL dialect for the given database type.
///
/// Mixed or unspecified backends use the generic dialect.
fn get_dialect(db_type: Option<DatabaseType>) -> Box<dyn Dialect> {
    match db_type {
        Some(DatabaseType::PostgreSQL) => Box::new(PostgreSqlDialect {}),
        Some(DatabaseType::MySQL) => Box::new(MySqlDialect {}),
        Some(DatabaseType::SQLite) => Box::new(SQLiteDialect {}),
        None => Box::new(GenericDialect {}),
    }
}

/// Classify SQL text for routing.
///
/// # Examples
///
/// ```
/// use db_rw_router::routing::sql_judge::{judge, SqlType};
///
/// assert_eq!(judge("SELECT * FROM users", None).unwrap(), SqlType::Dql);
/// assert_eq!(judge("DELETE FROM users", None).unwrap(), SqlType::Dml);
/// assert!(judge("   ", None).is_err());
/// ```
pub fn judge(sql: &str, db_type: Option<DatabaseType>) -> DbResult<SqlType> {
    if sql.trim().trim_matches(';').trim().is_empty() {
        return Err(DbError::routing("Empty SQL statement"));
    }

    let dialect = get_dialect(db_type);
    match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) if !statements.is_empty() => Ok(statements
            .iter()
            .map(classify_statement)
            .max_by_key(|t| t.write_rank())
            .unwrap_or(SqlType::Unknown)),
        Ok(_) => Err(DbError::routing("Empty SQL statement")),
        Err(e) => {
            debug!(error = %e, "SQL did not parse, classifying by first keyword");
            judge_by_keyword(sql).ok_or_else(|| {
                DbError::routing(format!("Cannot determine statement type: {}", e))
            })
        }
    }
}

/// Classify a parsed statement.
fn classify_statement(stmt: &Statement) -> SqlType {
    match stmt {
        Statement::Query(_) => SqlType::Dql,
        Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCollation { .. }
        | Statement::ExplainTable { .. } => SqlType::Dql,

        // EXPLAIN ANALYZE runs the inner statement, so it routes like it
        Statement::Explain { statement, .. } => classify_statement(statement),

        Statement::Insert(_)
        | Statement::Update { .. }
        | Statement::Delete(_)
        | Statement::Merge { .. }
        | Statement::Copy { .. } => SqlType::Dml,

        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex(_)
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateSequence { .. }
        | Statement::CreateType { .. }
        | Statement::CreateFunction { .. }
        | Statement::CreateProcedure { .. }
        | Statement::CreateTrigger { .. }
        | Statement::CreateRole { .. }
        | Statement::CreateVirtualTable { .. }
        | Statement::CreateExtension { .. }
        | Statement::CreatePolicy { .. }
        | Statement::AlterTable { .. }
        | Statement::AlterView { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterSchema { .. }
        | Statement::AlterRole { .. }
        | Statement::AlterPolicy { .. }
        | Statement::AlterType { .. }
        | Statement::Drop { .. }
        | Statement::DropFunction { .. }
        | Statement::DropProcedure { .. }
        | Statement::DropTrigger { .. }
        | Statement::DropPolicy { .. }
        | Statement::Truncate { .. }
        | Statement::Comment { .. } => SqlType::Ddl,

        Statement::StartTransaction { .. }
        | Statement::Commit { .. }
        | Statement::Rollback { .. }
        | Statement::Savepoint { .. }
        | Statement::ReleaseSavepoint { .. } => SqlType::Tcl,

        Statement::Grant { .. }
        | Statement::Revoke { .. }
        | Statement::Set(_)
        | Statement::Use(_)
        | Statement::Kill { .. }
        | Statement::Vacuum { .. }
        | Statement::Analyze { .. }
        | Statement::Discard { .. }
        | Statement::LockTables { .. }
        | Statement::UnlockTables
        | Statement::Flush { .. }
        | Statement::Pragma { .. }
        | Statement::OptimizeTable { .. } => SqlType::Dal,

        _ => SqlType::Unknown,
    }
}

/// Find the transaction boundary the SQL text leaves a session at, if any.
///
/// With several statements the last boundary wins. `ROLLBACK TO SAVEPOINT`
/// stays inside the transaction.
pub fn transaction_boundary(
    sql: &str,
    db_type: Option<DatabaseType>,
) -> Option<TransactionBoundary> {
    let dialect = get_dialect(db_type);
    match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) => statements.iter().filter_map(statement_boundary).last(),
        Err(_) => boundary_by_keyword(sql),
    }
}

fn statement_boundary(stmt: &Statement) -> Option<TransactionBoundary> {
    match stmt {
        Statement::StartTransaction { .. } => Some(TransactionBoundary::Begin),
        Statement::Commit { .. } | Statement::Rollback { savepoint: None, .. } => {
            Some(TransactionBoundary::End)
        }
        _ => None,
    }
}

fn boundary_by_keyword(sql: &str) -> Option<TransactionBoundary> {
    let upper = sql.trim_start().to_ascii_uppercase();
    let keyword = upper.split_whitespace().next()?.trim_end_matches(';');
    match keyword {
        "BEGIN" | "START" => Some(TransactionBoundary::Begin),
        "COMMIT" | "END" => Some(TransactionBoundary::End),
        "ROLLBACK" if !upper.contains(" TO ") => Some(TransactionBoundary::End),
        _ => None,
    }
}

/// Classify by the leading keyword of the first statement.
fn judge_by_keyword(sql: &str) -> Option<SqlType> {
    let keyword: String = sql
        .trim_start()
        .trim_start_matches('(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    let sql_type = match keyword.as_str() {
        "SELECT" | "WITH" | "SHOW" | "DESC" | "DESCRIBE" | "EXPLAIN" | "VALUES" | "TABLE" => {
            SqlType::Dql
        }
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" | "MERGE" | "UPSERT" | "COPY" | "LOAD" => {
            SqlType::Dml
        }
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" | "COMMENT" => SqlType::Ddl,
        "BEGIN" | "START" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" | "END" => {
            SqlType::Tcl
        }
        "SET" | "USE" | "GRANT" | "REVOKE" | "LOCK" | "UNLOCK" | "VACUUM" | "ANALYZE"
        | "PRAGMA" | "KILL" | "FLUSH" | "OPTIMIZE" | "RESET" => SqlType::Dal,
        "CALL" | "EXEC" | "EXECUTE" | "PREPARE" | "DEALLOCATE" | "DO" => SqlType::Unknown,
        _ => return None,
    };
    Some(sql_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PG: Option<DatabaseType> = Some(DatabaseType::PostgreSQL);

    #[test]
    fn test_select_is_dql() {
        assert_eq!(judge("SELECT * FROM users", PG).unwrap(), SqlType::Dql);
        assert_eq!(
            judge("SELECT a FROM t1 UNION ALL SELECT b FROM t2", PG).unwrap(),
            SqlType::Dql
        );
        assert_eq!(
            judge("WITH x AS (SELECT 1) SELECT * FROM x", None).unwrap(),
            SqlType::Dql
        );
    }

    #[test]
    fn test_writes_are_dml() {
        assert_eq!(judge("INSERT INTO users VALUES (1)", PG).unwrap(), SqlType::Dml);
        assert_eq!(judge("UPDATE users SET name = 'x'", PG).unwrap(), SqlType::Dml);
        assert_eq!(judge("DELETE FROM users WHERE id = 1", PG).unwrap(), SqlType::Dml);
        assert_eq!(
            judge("INSERT INTO archive SELECT * FROM users", PG).unwrap(),
            SqlType::Dml
        );
    }

    #[test]
    fn test_schema_changes_are_ddl() {
        assert_eq!(judge("CREATE TABLE t (id INT)", PG).unwrap(), SqlType::Ddl);
        assert_eq!(judge("ALTER TABLE t ADD COLUMN c INT", PG).unwrap(), SqlType::Ddl);
        assert_eq!(judge("DROP TABLE t", PG).unwrap(), SqlType::Ddl);
        assert_eq!(judge("TRUNCATE TABLE t", PG).unwrap(), SqlType::Ddl);
    }

    #[test]
    fn test_transaction_and_admin() {
        assert_eq!(judge("BEGIN", PG).unwrap(), SqlType::Tcl);
        assert_eq!(judge("COMMIT", PG).unwrap(), SqlType::Tcl);
        assert_eq!(judge("SET search_path TO public", PG).unwrap(), SqlType::Dal);
    }

    #[test]
    fn test_explain_follows_inner_statement() {
        assert_eq!(judge("EXPLAIN SELECT * FROM t", PG).unwrap(), SqlType::Dql);
        assert_eq!(
            judge("EXPLAIN ANALYZE DELETE FROM t", PG).unwrap(),
            SqlType::Dml
        );
    }

    #[test]
    fn test_multi_statement_most_write_like_wins() {
        assert_eq!(
            judge("SELECT 1; INSERT INTO t VALUES (1)", PG).unwrap(),
            SqlType::Dml
        );
        assert_eq!(
            judge("INSERT INTO t VALUES (1); DROP TABLE t", PG).unwrap(),
            SqlType::Ddl
        );
    }

    #[test]
    fn test_unparseable_falls_back_to_keyword() {
        assert_eq!(
            judge("select * from t where (((", PG).unwrap(),
            SqlType::Dql
        );
        assert_eq!(judge("UPDATE ((( broken", PG).unwrap(), SqlType::Dml);
    }

    #[test]
    fn test_empty_and_unknown_are_routing_errors() {
        assert!(matches!(judge("", PG), Err(DbError::Routing { .. })));
        assert!(matches!(judge("  ; ", PG), Err(DbError::Routing { .. })));
        assert!(matches!(
            judge("FROBNICATE everything", PG),
            Err(DbError::Routing { .. })
        ));
    }

    #[test]
    fn test_transaction_boundaries() {
        let sqlite = Some(DatabaseType::SQLite);
        assert_eq!(
            transaction_boundary("BEGIN", sqlite),
            Some(TransactionBoundary::Begin)
        );
        assert_eq!(
            transaction_boundary("START TRANSACTION", Some(DatabaseType::MySQL)),
            Some(TransactionBoundary::Begin)
        );
        assert_eq!(
            transaction_boundary("COMMIT", sqlite),
            Some(TransactionBoundary::End)
        );
        assert_eq!(
            transaction_boundary("ROLLBACK", PG),
            Some(TransactionBoundary::End)
        );
        assert_eq!(transaction_boundary("ROLLBACK TO SAVEPOINT s1", PG), None);
        assert_eq!(transaction_boundary("INSERT INTO t VALUES (1)", PG), None);
        assert_eq!(
            transaction_boundary("BEGIN; INSERT INTO t VALUES (1); COMMIT", PG),
            Some(TransactionBoundary::End)
        );
    }
}
