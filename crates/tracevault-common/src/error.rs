//! Error types for TraceVault
//!
//! This module defines the common error types shared by the storage
//! backends. Backend-specific failures (embedded engine, driver) are wrapped
//! by each backend crate.

use crate::types::TraceId;
use thiserror::Error;

/// Common result type for TraceVault operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for TraceVault
#[derive(Debug, Error)]
pub enum Error {
    // Backend write/read errors
    #[error("failed to Exec query '{query}': {cause}")]
    Exec { query: String, cause: String },

    #[error("error reading {table} from storage: {cause}")]
    Read { table: String, cause: String },

    #[error("trace not found: {0}")]
    TraceNotFound(TraceId),

    // Local errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create an exec error carrying the literal query text
    pub fn exec(query: impl Into<String>, cause: impl ToString) -> Self {
        Self::Exec {
            query: query.into(),
            cause: cause.to_string(),
        }
    }

    /// Create a read error for the given table
    pub fn read(table: impl Into<String>, cause: impl ToString) -> Self {
        Self::Read {
            table: table.into(),
            cause: cause.to_string(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::TraceNotFound(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_message() {
        let err = Error::exec("select from operation_names", "exec error");
        assert_eq!(
            err.to_string(),
            "failed to Exec query 'select from operation_names': exec error"
        );
    }

    #[test]
    fn test_read_error_message() {
        let err = Error::read("operation_names_v2", "scan error");
        assert_eq!(
            err.to_string(),
            "error reading operation_names_v2 from storage: scan error"
        );
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::TraceNotFound(TraceId::new(7)).is_not_found());
        assert!(!Error::configuration("bad").is_not_found());
    }
}
