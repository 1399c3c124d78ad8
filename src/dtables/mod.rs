//! The reflective table family: synthesized `dolt_*` tables materializing
//! commit, diff, status and control data from the graph.
//!
//! The catalog is closed. Resolution is driven by two dispatch tables --
//! prefix match and exact match, both case-insensitive -- encoded as data so
//! the set stays auditable. Constructors receive a [`ResolveCtx`] carrying
//! just the pieces they need; none of them sees the database facade.

mod commit_diff;
mod conflicts;
mod control;
mod diff;
mod history;
mod log;
mod refs_tables;
mod status;
mod table_diff;

pub use commit_diff::{CommitDiffTable, CommitRange, RangeCut};
pub use conflicts::{
    ConflictsForTable, ConflictsTable, SchemaConflictsTable, ViolationsForTable, ViolationsTable,
};
pub use control::{BranchControlTable, BranchNamespaceControlTable};
pub use diff::{ColumnDiffTable, DiffTable};
pub use history::HistoryTable;
pub use log::{CommitAncestorsTable, CommitsTable, LogTable};
pub use refs_tables::{BranchesTable, RemoteBranchesTable, RemotesTable, TagsTable};
pub use status::{IgnoreTable, MergeStatusTable, StatusTable};
pub use table_diff::TableDiffTable;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::db::branch_control::BranchControlStore;
use crate::db::error::{DatabaseError, DbResult};
use crate::db::names;
use crate::schema::Schema;
use crate::session::Session;
use crate::storage::{BranchName, CommitGraph, CommitInfo, RootValue};

/// A materialized system-table row: column name -> value.
pub type SysRow = BTreeMap<String, Value>;

/// Everything a reflective-table constructor may need.
pub struct ResolveCtx<'a> {
    pub graph: &'a CommitGraph,
    pub session: &'a Session,
    /// The session's current working root.
    pub root: &'a RootValue,
    /// Revision-qualified database name (the session state key).
    pub db_key: &'a str,
    /// Branch the working set tracks; `None` when detached.
    pub branch: Option<&'a BranchName>,
    pub controls: &'a BranchControlStore,
    /// Pinned head for `AS OF` resolution; overrides the session cache.
    pub head: Option<&'a CommitInfo>,
}

impl ResolveCtx<'_> {
    /// The session's head commit, fetched lazily from the graph and cached
    /// on first use. An `AS OF` resolution pins the head instead.
    pub fn head_commit(&self) -> DbResult<CommitInfo> {
        if let Some(head) = self.head {
            return Ok(head.clone());
        }
        if let Some(head) = self.session.head_commit(self.db_key) {
            return Ok(head);
        }
        let branch = self
            .branch
            .ok_or_else(|| DatabaseError::NoSessionState(self.db_key.to_string()))?;
        let head = self.graph.branch_head(branch)?;
        self.session.set_head_commit(self.db_key, head.clone());
        Ok(head)
    }
}

/// One reflective table. A closed tagged union: adding a member means
/// touching this enum and the dispatch tables below, nothing else.
pub enum SystemTable {
    Log(LogTable),
    Commits(CommitsTable),
    CommitAncestors(CommitAncestorsTable),
    Diff(DiffTable),
    ColumnDiff(ColumnDiffTable),
    TableDiff(TableDiffTable),
    CommitDiff(CommitDiffTable),
    History(HistoryTable),
    Conflicts(ConflictsTable),
    ConflictsFor(ConflictsForTable),
    SchemaConflicts(SchemaConflictsTable),
    Violations(ViolationsTable),
    ViolationsFor(ViolationsForTable),
    Branches(BranchesTable),
    RemoteBranches(RemoteBranchesTable),
    Remotes(RemotesTable),
    Tags(TagsTable),
    Status(StatusTable),
    MergeStatus(MergeStatusTable),
    Ignore(IgnoreTable),
    BranchControl(BranchControlTable),
    BranchNamespaceControl(BranchNamespaceControlTable),
}

impl SystemTable {
    pub fn name(&self) -> String {
        match self {
            SystemTable::Log(t) => t.name(),
            SystemTable::Commits(t) => t.name(),
            SystemTable::CommitAncestors(t) => t.name(),
            SystemTable::Diff(t) => t.name(),
            SystemTable::ColumnDiff(t) => t.name(),
            SystemTable::TableDiff(t) => t.name(),
            SystemTable::CommitDiff(t) => t.name(),
            SystemTable::History(t) => t.name(),
            SystemTable::Conflicts(t) => t.name(),
            SystemTable::ConflictsFor(t) => t.name(),
            SystemTable::SchemaConflicts(t) => t.name(),
            SystemTable::Violations(t) => t.name(),
            SystemTable::ViolationsFor(t) => t.name(),
            SystemTable::Branches(t) => t.name(),
            SystemTable::RemoteBranches(t) => t.name(),
            SystemTable::Remotes(t) => t.name(),
            SystemTable::Tags(t) => t.name(),
            SystemTable::Status(t) => t.name(),
            SystemTable::MergeStatus(t) => t.name(),
            SystemTable::Ignore(t) => t.name(),
            SystemTable::BranchControl(t) => t.name(),
            SystemTable::BranchNamespaceControl(t) => t.name(),
        }
    }

    pub fn schema(&self) -> Schema {
        match self {
            SystemTable::Log(t) => t.schema(),
            SystemTable::Commits(t) => t.schema(),
            SystemTable::CommitAncestors(t) => t.schema(),
            SystemTable::Diff(t) => t.schema(),
            SystemTable::ColumnDiff(t) => t.schema(),
            SystemTable::TableDiff(t) => t.schema(),
            SystemTable::CommitDiff(t) => t.schema(),
            SystemTable::History(t) => t.schema(),
            SystemTable::Conflicts(t) => t.schema(),
            SystemTable::ConflictsFor(t) => t.schema(),
            SystemTable::SchemaConflicts(t) => t.schema(),
            SystemTable::Violations(t) => t.schema(),
            SystemTable::ViolationsFor(t) => t.schema(),
            SystemTable::Branches(t) => t.schema(),
            SystemTable::RemoteBranches(t) => t.schema(),
            SystemTable::Remotes(t) => t.schema(),
            SystemTable::Tags(t) => t.schema(),
            SystemTable::Status(t) => t.schema(),
            SystemTable::MergeStatus(t) => t.schema(),
            SystemTable::Ignore(t) => t.schema(),
            SystemTable::BranchControl(t) => t.schema(),
            SystemTable::BranchNamespaceControl(t) => t.schema(),
        }
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        match self {
            SystemTable::Log(t) => t.rows(),
            SystemTable::Commits(t) => t.rows(),
            SystemTable::CommitAncestors(t) => t.rows(),
            SystemTable::Diff(t) => t.rows(),
            SystemTable::ColumnDiff(t) => t.rows(),
            SystemTable::TableDiff(t) => t.rows(),
            SystemTable::CommitDiff(t) => t.rows(),
            SystemTable::History(t) => t.rows(),
            SystemTable::Conflicts(t) => t.rows(),
            SystemTable::ConflictsFor(t) => t.rows(),
            SystemTable::SchemaConflicts(t) => t.rows(),
            SystemTable::Violations(t) => t.rows(),
            SystemTable::ViolationsFor(t) => t.rows(),
            SystemTable::Branches(t) => t.rows(),
            SystemTable::RemoteBranches(t) => t.rows(),
            SystemTable::Remotes(t) => t.rows(),
            SystemTable::Tags(t) => t.rows(),
            SystemTable::Status(t) => t.rows(),
            SystemTable::MergeStatus(t) => t.rows(),
            SystemTable::Ignore(t) => t.rows(),
            SystemTable::BranchControl(t) => t.rows(),
            SystemTable::BranchNamespaceControl(t) => t.rows(),
        }
    }
}

impl std::fmt::Debug for SystemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemTable").field("name", &self.name()).finish()
    }
}

type PrefixCtor = fn(&ResolveCtx<'_>, &str) -> DbResult<Option<SystemTable>>;
type ExactCtor = fn(&ResolveCtx<'_>) -> DbResult<Option<SystemTable>>;

/// Prefix-dispatched synthetics: requested name starts with the prefix,
/// the remainder names the underlying table.
pub const PREFIX_DISPATCH: &[(&str, PrefixCtor)] = &[
    (names::COMMIT_DIFF_TABLE_PREFIX, commit_diff::construct),
    (names::DIFF_TABLE_PREFIX, table_diff::construct),
    (names::HISTORY_TABLE_PREFIX, history::construct),
    (names::CONFLICTS_TABLE_PREFIX, conflicts::construct_for_table),
    (
        names::VIOLATIONS_TABLE_PREFIX,
        conflicts::construct_violations_for_table,
    ),
];

/// Exact-name synthetics.
pub const EXACT_DISPATCH: &[(&str, ExactCtor)] = &[
    (names::LOG_TABLE, log::construct_log),
    (names::COMMITS_TABLE, log::construct_commits),
    (names::COMMIT_ANCESTORS_TABLE, log::construct_ancestors),
    (names::DIFF_TABLE, diff::construct_diff),
    (names::COLUMN_DIFF_TABLE, diff::construct_column_diff),
    (names::CONFLICTS_TABLE, conflicts::construct_conflicts),
    (names::VIOLATIONS_TABLE, conflicts::construct_violations),
    (names::SCHEMA_CONFLICTS_TABLE, conflicts::construct_schema_conflicts),
    (names::BRANCHES_TABLE, refs_tables::construct_branches),
    (names::REMOTE_BRANCHES_TABLE, refs_tables::construct_remote_branches),
    (names::REMOTES_TABLE, refs_tables::construct_remotes),
    (names::TAGS_TABLE, refs_tables::construct_tags),
    (names::STATUS_TABLE, status::construct_status),
    (names::MERGE_STATUS_TABLE, status::construct_merge_status),
    (names::IGNORE_TABLE, status::construct_ignore),
    (names::BRANCH_CONTROL_TABLE, control::construct_branch_control),
    (
        names::BRANCH_NAMESPACE_CONTROL_TABLE,
        control::construct_namespace_control,
    ),
];

/// Resolve a requested name against the reflective catalog. Prefix entries
/// are consulted before exact names; both match case-insensitively.
pub fn resolve_system_table(ctx: &ResolveCtx<'_>, name: &str) -> DbResult<Option<SystemTable>> {
    let lower = name.to_lowercase();

    for (prefix, ctor) in PREFIX_DISPATCH {
        if let Some(suffix) = lower.strip_prefix(prefix) {
            if !suffix.is_empty() {
                return ctor(ctx, &name[prefix.len()..]);
            }
        }
    }

    for (exact, ctor) in EXACT_DISPATCH {
        if lower == *exact {
            return ctor(ctx);
        }
    }

    Ok(None)
}

// ==================== Shared diff machinery ====================

/// A row-level difference between two roots.
pub(crate) struct RowDiff {
    pub key: String,
    pub from: Option<crate::storage::Row>,
    pub to: Option<crate::storage::Row>,
}

impl RowDiff {
    pub fn diff_type(&self) -> &'static str {
        match (&self.from, &self.to) {
            (None, Some(_)) => "added",
            (Some(_), None) => "removed",
            _ => "modified",
        }
    }
}

/// Row diffs for one table between two roots, ordered by key. A root where
/// the table is absent contributes no rows.
pub(crate) fn diff_table_rows(
    from_root: Option<&RootValue>,
    to_root: Option<&RootValue>,
    table: &str,
) -> DbResult<Vec<RowDiff>> {
    let mut from_rows: BTreeMap<String, crate::storage::Row> = BTreeMap::new();
    if let Some(root) = from_root {
        if let Some(snapshot) = root.get_table(table)? {
            for row in snapshot.rows()? {
                from_rows.insert(row.key.as_str().to_string(), row);
            }
        }
    }

    let mut to_rows: BTreeMap<String, crate::storage::Row> = BTreeMap::new();
    if let Some(root) = to_root {
        if let Some(snapshot) = root.get_table(table)? {
            for row in snapshot.rows()? {
                to_rows.insert(row.key.as_str().to_string(), row);
            }
        }
    }

    let mut keys: Vec<String> = from_rows.keys().chain(to_rows.keys()).cloned().collect();
    keys.sort();
    keys.dedup();

    let mut diffs = Vec::new();
    for key in keys {
        let from = from_rows.remove(&key);
        let to = to_rows.remove(&key);
        if from == to {
            continue;
        }
        diffs.push(RowDiff { key, from, to });
    }
    Ok(diffs)
}

/// Per-table change summary between two roots.
pub(crate) struct TableChange {
    pub table: String,
    pub data_change: bool,
    pub schema_change: bool,
}

/// Tables differing between two roots, with data/schema change flags.
pub(crate) fn changed_tables(from: &RootValue, to: &RootValue) -> DbResult<Vec<TableChange>> {
    let mut names: Vec<String> = from.table_names()?;
    names.extend(to.table_names()?);
    names.sort();
    names.dedup();

    let mut changes = Vec::new();
    for name in names {
        let from_snapshot = from.get_table(&name)?;
        let to_snapshot = to.get_table(&name)?;

        let (data_change, schema_change) = match (&from_snapshot, &to_snapshot) {
            (Some(f), Some(t)) => {
                if f.tree_hash() == t.tree_hash() {
                    continue;
                }
                let schema_change = f.schema != t.schema;
                let data_change = !diff_table_rows(Some(from), Some(to), &name)?.is_empty();
                if !schema_change && !data_change {
                    continue;
                }
                (data_change, schema_change)
            }
            (None, Some(t)) => (t.row_count > 0, true),
            (Some(f), None) => (f.row_count > 0, true),
            (None, None) => continue,
        };

        changes.push(TableChange {
            table: name,
            data_change,
            schema_change,
        });
    }
    Ok(changes)
}

/// Flatten a JSON object's fields into a sys-row under a column prefix.
pub(crate) fn flatten_into(prefix: &str, value: &Value, row: &mut SysRow) {
    if let Value::Object(map) = value {
        for (k, v) in map {
            row.insert(format!("{}{}", prefix, k), v.clone());
        }
    }
}
