//! Error types for statement routing and dispatch.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! The variants follow the four failure classes of the dispatcher: routing failures,
//! resolver contract breaches, backend execution failures and illegal state.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// The resolver could not determine a target for the statement.
    #[error("Routing failed: {message}")]
    Routing { message: String },

    /// The resolver returned a connection set the operation cannot accept.
    #[error(
        "Routing invariant violated for {operation}: expected {expected} connection(s), resolver returned {actual}"
    )]
    InvariantViolation {
        operation: String,
        expected: String,
        actual: usize,
    },

    #[error("Execution failed on '{data_source}': {message}")]
    Execution {
        data_source: String,
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Illegal state for {operation}: {reason}")]
    IllegalState { operation: String, reason: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a routing error.
    pub fn routing(message: impl Into<String>) -> Self {
        Self::Routing {
            message: message.into(),
        }
    }

    /// Create an invariant violation for a connection-set cardinality mismatch.
    pub fn invariant_violation(
        operation: impl Into<String>,
        expected: impl Into<String>,
        actual: usize,
    ) -> Self {
        Self::InvariantViolation {
            operation: operation.into(),
            expected: expected.into(),
            actual,
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(
        data_source: impl Into<String>,
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Execution {
            data_source: data_source.into(),
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an illegal state error.
    pub fn illegal_state(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IllegalState {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Execution { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// JSON form of the error, with the suggestion when one is available.
    pub fn to_json(&self) -> serde_json::Value {
        match self.suggestion() {
            Some(suggestion) => serde_json::json!({
                "error": self.to_string(),
                "suggestion": suggestion,
            }),
            None => serde_json::json!({ "error": self.to_string() }),
        }
    }

    /// Check if this error was raised by a backend while executing.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::Execution { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// Convert a sqlx error raised by the named data source.
    pub fn from_sqlx(data_source: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(
                    data_source,
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::execution(
                data_source,
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::execution(
                data_source,
                format!("Column not found: {}", col),
                None,
                "Check the selected column names",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for routing and dispatch operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_invariant_violation_display() {
        let err = DbError::invariant_violation("execute_query", "exactly 1", 2);
        let msg = err.to_string();
        assert!(msg.contains("execute_query"));
        assert!(msg.contains("exactly 1"));
        assert!(msg.contains("returned 2"));
    }

    #[test]
    fn test_execution_error_names_data_source() {
        let err = DbError::execution("slave_0", "no such table: t", None, "Check SQL");
        assert!(err.to_string().contains("'slave_0'"));
        assert_eq!(err.suggestion(), Some("Check SQL"));
    }

    #[test]
    fn test_json_carries_suggestion() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        let value = err.to_json();
        assert_eq!(value["suggestion"], "Check credentials");
        assert!(value["error"].as_str().unwrap().contains("Failed to connect"));

        let value = DbError::routing("no target").to_json();
        assert!(value.get("suggestion").is_none());
    }

    #[test]
    fn test_backend_failure_classification() {
        assert!(DbError::timeout("query", 30).is_backend_failure());
        assert!(DbError::connection("err", "sugg").is_backend_failure());
        assert!(DbError::execution("m", "boom", None, "").is_backend_failure());
        assert!(!DbError::routing("no target").is_backend_failure());
        assert!(!DbError::illegal_state("result_set", "closed").is_backend_failure());
        assert!(!DbError::invariant_violation("execute_update", "exactly 1", 3).is_backend_failure());
    }

    #[test]
    fn test_from_sqlx_row_not_found_keeps_data_source() {
        let err = DbError::from_sqlx("master", sqlx::Error::RowNotFound);
        match err {
            DbError::Execution { data_source, .. } => assert_eq!(data_source, "master"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_sqlx_pool_closed_is_connection_error() {
        let err = DbError::from_sqlx("master", sqlx::Error::PoolClosed);
        assert!(matches!(err, DbError::Connection { .. }));
    }
}
