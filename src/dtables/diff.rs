//! Unscoped change logs: `dolt_diff` and `dolt_column_diff`.
//!
//! One row per (commit, changed table) -- or per (commit, table, column)
//! for the column variant -- walking from the session head, plus rows for
//! uncommitted working-set changes under the pseudo-hash `WORKING`.

use serde_json::{json, Value};

use crate::db::error::DbResult;
use crate::db::names;
use crate::dtables::{changed_tables, diff_table_rows, ResolveCtx, SysRow, SystemTable};
use crate::schema::{Schema, SchemaBuilder, SqlType};
use crate::storage::{CommitGraph, CommitInfo, RootValue};

/// Pseudo commit hash for uncommitted changes.
const WORKING_HASH: &str = "WORKING";

/// `dolt_diff`: which tables changed in which commit.
pub struct DiffTable {
    graph: CommitGraph,
    head: CommitInfo,
    working: RootValue,
}

pub(crate) fn construct_diff(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::Diff(DiffTable {
        graph: ctx.graph.clone(),
        head: ctx.head_commit()?,
        working: ctx.root.clone(),
    })))
}

impl DiffTable {
    pub fn name(&self) -> String {
        names::DIFF_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("commit_hash", SqlType::Text)
            .add_pk_column("table_name", SqlType::Text)
            .add_column("committer", SqlType::Text)
            .add_column("email", SqlType::Text)
            .add_column("date", SqlType::Timestamp)
            .add_column("message", SqlType::Text)
            .add_column("data_change", SqlType::Boolean)
            .add_column("schema_change", SqlType::Boolean)
            .build()
            .expect("diff schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let mut rows = Vec::new();

        // uncommitted changes first, newest to oldest like the walk below
        let head_root = self.graph.root_at(self.head.id)?;
        for change in changed_tables(&head_root, &self.working)? {
            let mut row = SysRow::new();
            row.insert("commit_hash".to_string(), json!(WORKING_HASH));
            row.insert("table_name".to_string(), json!(change.table));
            row.insert("committer".to_string(), Value::Null);
            row.insert("email".to_string(), Value::Null);
            row.insert("date".to_string(), Value::Null);
            row.insert("message".to_string(), Value::Null);
            row.insert("data_change".to_string(), json!(change.data_change));
            row.insert("schema_change".to_string(), json!(change.schema_change));
            rows.push(row);
        }

        for pair in commit_pairs(&self.graph, &self.head)? {
            let (commit, from_root, to_root) = pair;
            for change in changed_tables(&from_root, &to_root)? {
                let mut row = SysRow::new();
                row.insert("commit_hash".to_string(), json!(commit.id.to_string()));
                row.insert("table_name".to_string(), json!(change.table));
                row.insert("committer".to_string(), json!(commit.author_name));
                row.insert("email".to_string(), json!(commit.author_email));
                row.insert("date".to_string(), json!(commit.timestamp.timestamp()));
                row.insert("message".to_string(), json!(commit.message));
                row.insert("data_change".to_string(), json!(change.data_change));
                row.insert("schema_change".to_string(), json!(change.schema_change));
                rows.push(row);
            }
        }

        Ok(rows)
    }
}

/// `dolt_column_diff`: which columns changed in which commit.
pub struct ColumnDiffTable {
    graph: CommitGraph,
    head: CommitInfo,
    working: RootValue,
}

pub(crate) fn construct_column_diff(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::ColumnDiff(ColumnDiffTable {
        graph: ctx.graph.clone(),
        head: ctx.head_commit()?,
        working: ctx.root.clone(),
    })))
}

impl ColumnDiffTable {
    pub fn name(&self) -> String {
        names::COLUMN_DIFF_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("commit_hash", SqlType::Text)
            .add_pk_column("table_name", SqlType::Text)
            .add_pk_column("column_name", SqlType::Text)
            .add_column("committer", SqlType::Text)
            .add_column("email", SqlType::Text)
            .add_column("date", SqlType::Timestamp)
            .add_column("message", SqlType::Text)
            .add_column("diff_type", SqlType::Text)
            .build()
            .expect("column diff schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let mut rows = Vec::new();

        let head_root = self.graph.root_at(self.head.id)?;
        append_column_rows(&mut rows, &head_root, &self.working, None)?;

        for (commit, from_root, to_root) in commit_pairs(&self.graph, &self.head)? {
            append_column_rows(&mut rows, &from_root, &to_root, Some(&commit))?;
        }

        Ok(rows)
    }
}

/// Adjacent (first-parent, commit) root pairs along the walk from `head`.
/// Parentless commits diff against an empty root.
fn commit_pairs(
    graph: &CommitGraph,
    head: &CommitInfo,
) -> DbResult<Vec<(CommitInfo, RootValue, RootValue)>> {
    let mut pairs = Vec::new();
    for info in graph.topological_iter(vec![head.id], vec![])? {
        let info = info?;
        let to_root = graph.root_at(info.id)?;
        let from_root = match info.first_parent() {
            Some(parent) => graph.root_at(parent)?,
            None => RootValue::empty_like(&to_root)?,
        };
        pairs.push((info, from_root, to_root));
    }
    Ok(pairs)
}

fn append_column_rows(
    rows: &mut Vec<SysRow>,
    from_root: &RootValue,
    to_root: &RootValue,
    commit: Option<&CommitInfo>,
) -> DbResult<()> {
    for change in changed_tables(from_root, to_root)? {
        for (column, diff_type) in changed_columns(from_root, to_root, &change.table)? {
            let mut row = SysRow::new();
            match commit {
                Some(c) => {
                    row.insert("commit_hash".to_string(), json!(c.id.to_string()));
                    row.insert("committer".to_string(), json!(c.author_name));
                    row.insert("email".to_string(), json!(c.author_email));
                    row.insert("date".to_string(), json!(c.timestamp.timestamp()));
                    row.insert("message".to_string(), json!(c.message));
                }
                None => {
                    row.insert("commit_hash".to_string(), json!(WORKING_HASH));
                    row.insert("committer".to_string(), Value::Null);
                    row.insert("email".to_string(), Value::Null);
                    row.insert("date".to_string(), Value::Null);
                    row.insert("message".to_string(), Value::Null);
                }
            }
            row.insert("table_name".to_string(), json!(change.table));
            row.insert("column_name".to_string(), json!(column));
            row.insert("diff_type".to_string(), json!(diff_type));
            rows.push(row);
        }
    }
    Ok(())
}

/// Columns of a table that changed between two roots: schema-level adds and
/// drops, plus any column whose value differs in at least one changed row.
fn changed_columns(
    from_root: &RootValue,
    to_root: &RootValue,
    table: &str,
) -> DbResult<Vec<(String, &'static str)>> {
    let from_schema = from_root.get_table(table)?.map(|s| s.schema);
    let to_schema = to_root.get_table(table)?.map(|s| s.schema);

    let mut result: Vec<(String, &'static str)> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    if let Some(to) = &to_schema {
        for col in &to.columns {
            let existed = from_schema
                .as_ref()
                .map(|f| f.columns.iter().any(|c| c.tag == col.tag))
                .unwrap_or(false);
            if !existed && seen.insert(col.name.to_lowercase()) {
                result.push((col.name.clone(), "added"));
            }
        }
    }
    if let Some(from) = &from_schema {
        for col in &from.columns {
            let survives = to_schema
                .as_ref()
                .map(|t| t.columns.iter().any(|c| c.tag == col.tag))
                .unwrap_or(false);
            if !survives && seen.insert(col.name.to_lowercase()) {
                result.push((col.name.clone(), "removed"));
            }
        }
    }

    for diff in diff_table_rows(Some(from_root), Some(to_root), table)? {
        let from_data = diff.from.as_ref().map(|r| &r.data);
        let to_data = diff.to.as_ref().map(|r| &r.data);
        let columns: Vec<String> = to_data
            .into_iter()
            .flat_map(|d| d.keys())
            .chain(from_data.into_iter().flat_map(|d| d.keys()))
            .cloned()
            .collect();

        for column in columns {
            let from_value = diff.from.as_ref().and_then(|r| r.get(&column));
            let to_value = diff.to.as_ref().and_then(|r| r.get(&column));
            if from_value != to_value && seen.insert(column.to_lowercase()) {
                result.push((column.clone(), "modified"));
            }
        }
    }

    result.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(result)
}
