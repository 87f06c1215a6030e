//! Error types for the embedded engine backend

use thiserror::Error;

/// Error type for embedded store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("redb compaction error: {0}")]
    Compaction(#[from] redb::CompactionError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store is closed")]
    Closed,
    #[error("store is opened read-only")]
    ReadOnly,
    #[error("storage factory is not initialized")]
    NotInitialized,
    #[error("no tokio runtime available to run background tasks")]
    NoRuntime,
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Common(#[from] tracevault_common::Error),
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl StoreError {
    /// True when the lookup failed because the trace has no live spans
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Common(e) if e.is_not_found())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of one reclamation pass that did no work
#[derive(Debug, Error)]
pub enum ReclaimError {
    /// Nothing expired and the value file is below the rewrite threshold
    #[error("nothing to reclaim")]
    NothingToReclaim,
    #[error(transparent)]
    Store(#[from] StoreError),
}
