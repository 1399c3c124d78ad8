//! Storage layer error types.
//!
//! All errors that can occur against the commit graph and root values are
//! defined here. We use `thiserror` for ergonomic error definition.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::{InvalidNameError, RowKey, TableName};

/// The main error type for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// the specified branch/tag/ref was not found; recoverable for callers
    /// that can treat an unresolved revision as "no data"
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// a hash prefix matched more than one commit
    #[error("ambiguous commit hash: {0}")]
    AmbiguousHash(String),

    /// the commit was not found
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// the requested table was not found
    #[error("table not found: {0}")]
    TableNotFound(TableName),

    /// the table already exists
    #[error("table already exists: {0}")]
    TableAlreadyExists(TableName),

    /// the requested row was not found
    #[error("row not found: table={table}, key={key}")]
    RowNotFound { table: TableName, key: RowKey },

    /// the row already exists (duplicate primary key)
    #[error("row already exists: table={table}, key={key}")]
    RowAlreadyExists { table: TableName, key: RowKey },

    /// a proposed schema reuses column tags owned by another table
    #[error("cannot create table {table}: tags {tags:?} are already in use")]
    TagsInUse { table: TableName, tags: Vec<u64> },

    /// a table being dropped is referenced by another table's foreign key
    #[error("unable to remove {table}: referenced by foreign key {fk}")]
    ForeignKeyReferenced { table: TableName, fk: String },

    /// a table being dropped still carries merge conflict artifacts
    #[error("unable to remove {0}: table has merge conflicts")]
    TableHasConflicts(TableName),

    /// invalid table name
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// a branch already exists
    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// a tag already exists
    #[error("tag already exists: {0}")]
    TagAlreadyExists(String),

    /// ref update failed because another writer moved it first; retryable
    #[error("concurrent modification: {target} was updated by another session")]
    ConcurrentModification { target: String },

    /// the commit graph is structurally broken; fatal, propagate as-is
    #[error("corrupt commit graph: {0}")]
    CorruptGraph(String),

    /// data integrity check failed
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// the tree entry has an unexpected type
    #[error("unexpected entry type at {path}: expected {expected}, found {found}")]
    UnexpectedEntryType {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// repo is not initialized
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    /// repo is empty (no commits)
    #[error("repository is empty: no commits found")]
    EmptyRepository,

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Check if this error indicates the resource doesn't exist. Reflective
    /// table resolution treats these as "no partitions" instead of failing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::RefNotFound(_)
                | StorageError::CommitNotFound(_)
                | StorageError::TableNotFound(_)
                | StorageError::RowNotFound { .. }
        )
    }

    /// Check if this error is a conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::RowAlreadyExists { .. }
                | StorageError::TableAlreadyExists(_)
                | StorageError::BranchAlreadyExists(_)
                | StorageError::TagAlreadyExists(_)
                | StorageError::ConcurrentModification { .. }
        )
    }

    /// Check if this error is recoverable by retry.
    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::ConcurrentModification { .. })
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
