//! Forward-only result cursor.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;

pub type Row = serde_json::Map<String, JsonValue>;

/// Rows produced by one physical execution, consumed front to back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultCursor {
    data_source: String,
    columns: Vec<String>,
    rows: VecDeque<Row>,
    truncated: bool,
}

impl ResultCursor {
    /// Create a cursor over fetched rows.
    pub fn new(data_source: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            data_source: data_source.into(),
            columns,
            rows: rows.into(),
            truncated: false,
        }
    }

    /// Create a cursor without rows.
    pub fn empty(data_source: impl Into<String>) -> Self {
        Self::new(data_source, Vec::new(), Vec::new())
    }

    /// Mark that the backend had more rows than were fetched.
    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    /// Name of the data source that produced these rows.
    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows not yet consumed.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Drain the remaining rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows.into()
    }
}

impl Iterator for ResultCursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.rows.len(), Some(self.rows.len()))
    }
}

impl ExactSizeIterator for ResultCursor {}
