//! Statement-related data models.
//!
//! Result-set shaping options are opaque to the dispatcher: they are handed to
//! the backend unchanged when a physical statement is created.

use serde::{Deserialize, Serialize};

/// Cursor scrolling behavior requested for result sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSetType {
    #[default]
    ForwardOnly,
    ScrollInsensitive,
    ScrollSensitive,
}

/// Whether result sets may be updated through the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSetConcurrency {
    #[default]
    ReadOnly,
    Updatable,
}

/// Whether cursors survive a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSetHoldability {
    #[default]
    HoldCursorsOverCommit,
    CloseCursorsAtCommit,
}

/// Options used when creating a physical statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatementConfig {
    pub result_set_type: ResultSetType,
    pub concurrency: ResultSetConcurrency,
    pub holdability: ResultSetHoldability,
    /// Upper bound on rows fetched per result set. None means unlimited.
    #[serde(default)]
    pub max_rows: Option<u32>,
}

impl StatementConfig {
    /// Create a configuration with explicit cursor type and concurrency.
    pub fn new(result_set_type: ResultSetType, concurrency: ResultSetConcurrency) -> Self {
        Self {
            result_set_type,
            concurrency,
            ..Self::default()
        }
    }

    /// Set the holdability.
    pub fn with_holdability(mut self, holdability: ResultSetHoldability) -> Self {
        self.holdability = holdability;
        self
    }

    /// Set the row limit.
    pub fn with_max_rows(mut self, max_rows: u32) -> Self {
        self.max_rows = Some(max_rows);
        self
    }
}

/// Whether auto-generated keys should be made available after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedKeysMode {
    Return,
    NoReturn,
}

/// Post-processing hints for an execute or update call.
///
/// All variants route identically; they only tell the physical statement
/// which generated keys to capture.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteOptions {
    #[default]
    Plain,
    GeneratedKeys(GeneratedKeysMode),
    ColumnIndexes(Vec<usize>),
    ColumnNames(Vec<String>),
}

impl ExecuteOptions {
    /// Check if these options ask for generated keys.
    pub fn wants_generated_keys(&self) -> bool {
        match self {
            Self::Plain => false,
            Self::GeneratedKeys(mode) => *mode == GeneratedKeysMode::Return,
            Self::ColumnIndexes(indexes) => !indexes.is_empty(),
            Self::ColumnNames(names) => !names.is_empty(),
        }
    }

    /// Label for the generated key column.
    pub fn key_column_name(&self) -> &str {
        match self {
            Self::ColumnNames(names) if !names.is_empty() => &names[0],
            _ => "GENERATED_KEY",
        }
    }
}

/// Outcome of one physical execution inside a dispatcher call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub data_source: String,
    /// True when the execution produced a row-returning result.
    pub has_result_set: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_config_defaults() {
        let config = StatementConfig::default();
        assert_eq!(config.result_set_type, ResultSetType::ForwardOnly);
        assert_eq!(config.concurrency, ResultSetConcurrency::ReadOnly);
        assert_eq!(
            config.holdability,
            ResultSetHoldability::HoldCursorsOverCommit
        );
        assert_eq!(config.max_rows, None);
    }

    #[test]
    fn test_statement_config_builders() {
        let config = StatementConfig::new(
            ResultSetType::ScrollInsensitive,
            ResultSetConcurrency::Updatable,
        )
        .with_holdability(ResultSetHoldability::CloseCursorsAtCommit)
        .with_max_rows(10);

        assert_eq!(config.result_set_type, ResultSetType::ScrollInsensitive);
        assert_eq!(config.concurrency, ResultSetConcurrency::Updatable);
        assert_eq!(config.holdability, ResultSetHoldability::CloseCursorsAtCommit);
        assert_eq!(config.max_rows, Some(10));
    }

    #[test]
    fn test_wants_generated_keys() {
        assert!(!ExecuteOptions::Plain.wants_generated_keys());
        assert!(ExecuteOptions::GeneratedKeys(GeneratedKeysMode::Return).wants_generated_keys());
        assert!(!ExecuteOptions::GeneratedKeys(GeneratedKeysMode::NoReturn).wants_generated_keys());
        assert!(ExecuteOptions::ColumnIndexes(vec![1]).wants_generated_keys());
        assert!(!ExecuteOptions::ColumnNames(vec![]).wants_generated_keys());
    }

    #[test]
    fn test_key_column_name() {
        assert_eq!(ExecuteOptions::Plain.key_column_name(), "GENERATED_KEY");
        assert_eq!(
            ExecuteOptions::ColumnNames(vec!["id".to_string(), "uuid".to_string()])
                .key_column_name(),
            "id"
        );
    }
}
