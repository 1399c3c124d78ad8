//! Facade-level error taxonomy.
//!
//! Validation and policy violations surface unwrapped; storage errors are
//! annotated with the table being queried where that context exists.

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for database facade operations.
pub type DbResult<T> = Result<T, DatabaseError>;

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    // ---- DDL policy ----
    #[error("Invalid table name {0}.")]
    InvalidTableName(String),

    #[error("Invalid table name {0}. Table names beginning with `dolt_` are reserved for internal use")]
    ReservedTableName(String),

    #[error("Cannot alter table {0}: system tables cannot be dropped or altered")]
    SystemTableAlter(String),

    // ---- existence ----
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("view already exists: {0}")]
    ViewExists(String),

    #[error("view not found: {0}")]
    ViewNotFound(String),

    #[error("trigger already exists: {0}")]
    TriggerExists(String),

    #[error("trigger not found: {0}")]
    TriggerNotFound(String),

    #[error("event already exists: {0}")]
    EventExists(String),

    #[error("event not found: {0}")]
    EventNotFound(String),

    #[error("procedure already exists: {0}")]
    ProcedureExists(String),

    #[error("procedure not found: {0}")]
    ProcedureNotFound(String),

    // ---- reflective-table preconditions ----
    #[error("dolt_commit_diff_* tables must be filtered to a single 'to_commit'")]
    ExactlyOneToCommit,

    #[error("dolt_commit_diff_* tables must be filtered to a single 'from_commit'")]
    ExactlyOneFromCommit,

    #[error("commit_diff_<table> requires one 'to_commit' and one 'from_commit'")]
    InvalidCommitDiffArgs,

    // ---- DDL shape ----
    #[error("unsupported AS OF value: {0}")]
    UnsupportedAsOfType(String),

    #[error("indexes on full text columns with prefix lengths are not supported in primary keys: {0}")]
    UnsupportedIndexPrefix(String),

    #[error("spatial types may not be used in primary keys")]
    SpatialKey,

    #[error("cannot create table {table}: column tags already in use: {tags:?}")]
    TagAlreadyUsed { table: String, tags: Vec<u64> },

    // ---- session / auth ----
    #[error("this operation is not supported while the head is detached")]
    DetachedHead,

    #[error("no session state for database {0}")]
    NoSessionState(String),

    #[error("user {user} does not have write permission on branch {branch}")]
    AuthorizationDenied { user: String, branch: String },

    #[error("operation cancelled")]
    Cancelled,

    // ---- upstream ----
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Storage failure annotated with the table being served.
    #[error("error querying table {table}: {source}")]
    TableQuery {
        table: String,
        #[source]
        source: StorageError,
    },
}

impl DatabaseError {
    /// Wrap a storage error with the table it was raised for, mapping the
    /// policy-shaped variants onto the facade taxonomy first.
    pub fn from_storage(table: &str, err: StorageError) -> Self {
        match err {
            StorageError::TableNotFound(name) => DatabaseError::TableNotFound(name.into_string()),
            StorageError::TableAlreadyExists(name) => {
                DatabaseError::TableAlreadyExists(name.into_string())
            }
            StorageError::TagsInUse { table, tags } => DatabaseError::TagAlreadyUsed {
                table: table.into_string(),
                tags,
            },
            other => DatabaseError::TableQuery {
                table: table.to_string(),
                source: other,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TableName;

    #[test]
    fn test_from_storage_maps_policy_variants() {
        let err = DatabaseError::from_storage(
            "t",
            StorageError::TableNotFound(TableName::new("t").unwrap()),
        );
        assert!(matches!(err, DatabaseError::TableNotFound(_)));

        let err = DatabaseError::from_storage(
            "t",
            StorageError::TagsInUse {
                table: TableName::new("t").unwrap(),
                tags: vec![3, 4],
            },
        );
        match err {
            DatabaseError::TagAlreadyUsed { tags, .. } => assert_eq!(tags, vec![3, 4]),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_table_query_context() {
        let err = DatabaseError::from_storage("vals", StorageError::EmptyRepository);
        assert!(err.to_string().starts_with("error querying table vals:"));
    }
}
