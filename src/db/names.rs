//! Reserved-name policy, the system table catalog, and full-text auxiliary
//! name generation.

use crate::db::error::{DatabaseError, DbResult};
use crate::schema::{Column, Schema, SqlType};
use crate::storage::{RootValue, TableName};

/// Prefix reserved for internal tables.
pub const RESERVED_PREFIX: &str = "dolt_";

/// Reflective tables selected by prefix match.
pub const DIFF_TABLE_PREFIX: &str = "dolt_diff_";
pub const COMMIT_DIFF_TABLE_PREFIX: &str = "dolt_commit_diff_";
pub const HISTORY_TABLE_PREFIX: &str = "dolt_history_";
pub const CONFLICTS_TABLE_PREFIX: &str = "dolt_conflicts_";
pub const VIOLATIONS_TABLE_PREFIX: &str = "dolt_constraint_violations_";

/// Reflective tables selected by exact name.
pub const LOG_TABLE: &str = "dolt_log";
pub const DIFF_TABLE: &str = "dolt_diff";
pub const COLUMN_DIFF_TABLE: &str = "dolt_column_diff";
pub const CONFLICTS_TABLE: &str = "dolt_conflicts";
pub const VIOLATIONS_TABLE: &str = "dolt_constraint_violations";
pub const SCHEMA_CONFLICTS_TABLE: &str = "dolt_schema_conflicts";
pub const BRANCHES_TABLE: &str = "dolt_branches";
pub const REMOTE_BRANCHES_TABLE: &str = "dolt_remote_branches";
pub const REMOTES_TABLE: &str = "dolt_remotes";
pub const COMMITS_TABLE: &str = "dolt_commits";
pub const COMMIT_ANCESTORS_TABLE: &str = "dolt_commit_ancestors";
pub const STATUS_TABLE: &str = "dolt_status";
pub const MERGE_STATUS_TABLE: &str = "dolt_merge_status";
pub const TAGS_TABLE: &str = "dolt_tags";
pub const IGNORE_TABLE: &str = "dolt_ignore";
pub const BRANCH_CONTROL_TABLE: &str = "dolt_branch_control";
pub const BRANCH_NAMESPACE_CONTROL_TABLE: &str = "dolt_branch_namespace_control";

/// The documentation table; creatable only with a canonical schema.
pub const DOCS_TABLE: &str = "dolt_docs";

const DOCS_FIRST_TAG: u64 = 9200;
const IGNORE_FIRST_TAG: u64 = 9300;

/// Exact-name reflective tables. These are synthesized, never stored, and
/// reject DROP/RENAME/ALTER.
pub const NON_ALTERABLE_SYSTEM_TABLES: &[&str] = &[
    LOG_TABLE,
    DIFF_TABLE,
    COLUMN_DIFF_TABLE,
    CONFLICTS_TABLE,
    VIOLATIONS_TABLE,
    SCHEMA_CONFLICTS_TABLE,
    BRANCHES_TABLE,
    REMOTE_BRANCHES_TABLE,
    REMOTES_TABLE,
    COMMITS_TABLE,
    COMMIT_ANCESTORS_TABLE,
    STATUS_TABLE,
    MERGE_STATUS_TABLE,
    TAGS_TABLE,
    BRANCH_CONTROL_TABLE,
    BRANCH_NAMESPACE_CONTROL_TABLE,
];

const FULLTEXT_SUFFIXES: &[&str] = &[
    "_fts_config",
    "_fts_position",
    "_fts_doc_count",
    "_fts_global_count",
    "_fts_row_count",
];

/// Names of the five auxiliary tables backing one full-text index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulltextNames {
    pub config: String,
    pub position: String,
    pub doc_count: String,
    pub global_count: String,
    pub row_count: String,
}

pub fn has_reserved_prefix(name: &str) -> bool {
    name.to_lowercase().starts_with(RESERVED_PREFIX)
}

/// Reflective tables that reject DROP/RENAME/ALTER: the exact-name catalog
/// plus every prefix-dispatched synthetic.
pub fn is_non_alterable_system_table(name: &str) -> bool {
    let lower = name.to_lowercase();
    NON_ALTERABLE_SYSTEM_TABLES.contains(&lower.as_str())
        || lower.starts_with(DIFF_TABLE_PREFIX)
        || lower.starts_with(COMMIT_DIFF_TABLE_PREFIX)
        || lower.starts_with(HISTORY_TABLE_PREFIX)
        || lower.starts_with(CONFLICTS_TABLE_PREFIX)
        || lower.starts_with(VIOLATIONS_TABLE_PREFIX)
}

/// Full-text auxiliary names are the documented exception to the reserved
/// prefix.
pub fn is_fulltext_auxiliary(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with(RESERVED_PREFIX) && FULLTEXT_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// The two canonical schemas accepted for `dolt_docs`.
pub fn docs_schemas() -> [Schema; 2] {
    [
        Schema::new(vec![
            Column::new(DOCS_FIRST_TAG, "doc_name", SqlType::VarChar(16383)).primary_key(),
            Column::new(DOCS_FIRST_TAG + 1, "doc_text", SqlType::LongText),
        ]),
        Schema::new(vec![
            Column::new(DOCS_FIRST_TAG, "doc_name", SqlType::Text).primary_key(),
            Column::new(DOCS_FIRST_TAG + 1, "doc_text", SqlType::Text),
        ]),
    ]
}

/// Schema of the persisted `dolt_ignore` table.
pub fn ignore_table_schema() -> Schema {
    Schema::new(vec![
        Column::new(IGNORE_FIRST_TAG, "pattern", SqlType::Text).primary_key(),
        Column::new(IGNORE_FIRST_TAG + 1, "ignored", SqlType::Boolean).not_null(),
    ])
}

/// Validate a user-facing name for CREATE TABLE. The reserved prefix is
/// forbidden except for full-text auxiliary tables and `dolt_docs` (whose
/// schema the caller checks separately).
pub fn validate_create_name(name: &str) -> DbResult<()> {
    if TableName::new(name).is_err() {
        return Err(DatabaseError::InvalidTableName(name.to_string()));
    }
    if has_reserved_prefix(name)
        && !is_fulltext_auxiliary(name)
        && !name.eq_ignore_ascii_case(DOCS_TABLE)
    {
        return Err(DatabaseError::ReservedTableName(name.to_string()));
    }
    Ok(())
}

/// Generate the five full-text auxiliary names for a parent table and
/// index. The shared prefix `dolt_<table>_<index>_<n>` picks the smallest
/// `n` such that no existing table starts with it; the config table is
/// shared per parent table and carries no index or counter.
pub fn create_fulltext_names(
    root: &RootValue,
    parent_table: &str,
    parent_index: &str,
) -> DbResult<FulltextNames> {
    let existing = root.table_names().map_err(DatabaseError::Storage)?;

    let mut n: u64 = 0;
    let prefix = loop {
        let candidate = format!("dolt_{}_{}_{}", parent_table, parent_index, n);
        let collision = existing
            .iter()
            .any(|t| t.to_lowercase().starts_with(&candidate.to_lowercase()));
        if !collision {
            break candidate;
        }
        n += 1;
    };

    Ok(FulltextNames {
        config: format!("dolt_{}_fts_config", parent_table),
        position: format!("{}_fts_position", prefix),
        doc_count: format!("{}_fts_doc_count", prefix),
        global_count: format!("{}_fts_global_count", prefix),
        row_count: format!("{}_fts_row_count", prefix),
    })
}
