//! Backend session abstraction
//!
//! The storage adapters only need three things from a column-family driver:
//! execute a statement with positional values, iterate the rows of a query,
//! and recover the literal statement text for logs and errors. Drivers plug
//! in by implementing [`Session`].

use async_trait::async_trait;
use std::fmt;

/// A bound positional value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Text(String),
    BigInt(i64),
    Int(i32),
    Blob(Vec<u8>),
    Null,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

/// Statement text plus its bound values.
///
/// `Display` renders the statement text only, which is what ends up in logs
/// and in [`tracevault_common::Error::Exec`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    statement: String,
    values: Vec<Value>,
}

impl Query {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            values: Vec::new(),
        }
    }

    /// Append a positional value
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    #[must_use]
    pub fn statement(&self) -> &str {
        &self.statement
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.statement)
    }
}

/// Failure reported by the driver
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One result row, columns in select order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<Value>,
}

impl Row {
    #[must_use]
    pub const fn new(columns: Vec<Value>) -> Self {
        Self { columns }
    }

    /// Text column at `idx`; `None` when missing or not text
    #[must_use]
    pub fn text(&self, idx: usize) -> Option<&str> {
        match self.columns.get(idx) {
            Some(Value::Text(s)) => Some(s),
            _ => None,
        }
    }
}

/// Cursor over query results.
///
/// `scan` returns `None` when rows are exhausted or the driver failed; the
/// failure, if any, is reported by `close`.
#[async_trait]
pub trait RowIter: Send {
    async fn scan(&mut self) -> Option<Row>;

    async fn close(self: Box<Self>) -> Result<(), BackendError>;
}

/// Column-family driver session
#[async_trait]
pub trait Session: Send + Sync {
    /// Execute a statement that returns no rows
    async fn execute(&self, query: &Query) -> Result<(), BackendError>;

    /// Run a query and return a cursor over its rows
    async fn iter(&self, query: &Query) -> Box<dyn RowIter>;
}
