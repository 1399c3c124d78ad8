//! Working-set state tables: `dolt_status`, `dolt_merge_status`,
//! `dolt_ignore`.

use serde_json::{json, Value};

use crate::db::error::{DatabaseError, DbResult};
use crate::db::names;
use crate::dtables::{changed_tables, ResolveCtx, SysRow, SystemTable};
use crate::schema::{Schema, SchemaBuilder, SqlType};
use crate::storage::{BranchName, CommitGraph, RootValue};

/// `dolt_status`: table-level differences between working, staged and head.
pub struct StatusTable {
    graph: CommitGraph,
    branch: BranchName,
    working: RootValue,
}

pub(crate) fn construct_status(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    let branch = match ctx.branch {
        Some(b) => b.clone(),
        None => return Err(DatabaseError::NoSessionState(ctx.db_key.to_string())),
    };
    Ok(Some(SystemTable::Status(StatusTable {
        graph: ctx.graph.clone(),
        branch,
        working: ctx.root.clone(),
    })))
}

impl StatusTable {
    pub fn name(&self) -> String {
        names::STATUS_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("table_name", SqlType::Text)
            .add_pk_column("staged", SqlType::Boolean)
            .add_column("status", SqlType::Text)
            .build()
            .expect("status schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let head = self.graph.branch_head(&self.branch)?;
        let head_root = self.graph.root_at(head.id)?;
        let staged = self
            .graph
            .working_set(&self.branch)
            .map(|ws| ws.staged)
            .unwrap_or_else(|| head_root.clone());

        let mut rows = Vec::new();

        // staged vs head
        for change in changed_tables(&head_root, &staged)? {
            rows.push(status_row(&staged, &head_root, &change.table, true)?);
        }

        // working vs staged
        for change in changed_tables(&staged, &self.working)? {
            rows.push(status_row(&self.working, &staged, &change.table, false)?);
        }

        Ok(rows)
    }
}

fn status_row(newer: &RootValue, older: &RootValue, table: &str, staged: bool) -> DbResult<SysRow> {
    let status = match (older.get_table(table)?, newer.get_table(table)?) {
        (None, Some(_)) => "new table",
        (Some(_), None) => "deleted",
        _ => "modified",
    };

    let mut row = SysRow::new();
    row.insert("table_name".to_string(), json!(table));
    row.insert("staged".to_string(), json!(staged));
    row.insert("status".to_string(), json!(status));
    Ok(row)
}

/// `dolt_merge_status`: one row describing any merge in progress.
pub struct MergeStatusTable {
    graph: CommitGraph,
    branch: Option<BranchName>,
}

pub(crate) fn construct_merge_status(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::MergeStatus(MergeStatusTable {
        graph: ctx.graph.clone(),
        branch: ctx.branch.cloned(),
    })))
}

impl MergeStatusTable {
    pub fn name(&self) -> String {
        names::MERGE_STATUS_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("is_merging", SqlType::Boolean)
            .add_column("source", SqlType::Text)
            .add_column("source_commit", SqlType::Text)
            .add_column("target", SqlType::Text)
            .add_column("unmerged_tables", SqlType::Text)
            .build()
            .expect("merge status schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let merge_state = self
            .branch
            .as_ref()
            .and_then(|b| self.graph.working_set(b))
            .and_then(|ws| ws.merge_state);

        let mut row = SysRow::new();
        match merge_state {
            Some(state) => {
                row.insert("is_merging".to_string(), json!(true));
                row.insert(
                    "source_commit".to_string(),
                    json!(state.source_commit.to_string()),
                );
                row.insert("source".to_string(), json!(state.source_commit.to_string()));
                row.insert(
                    "target".to_string(),
                    self.branch
                        .as_ref()
                        .map_or(Value::Null, |b| json!(b.as_str())),
                );
                row.insert(
                    "unmerged_tables".to_string(),
                    json!(state.unmerged_tables.join(", ")),
                );
            }
            None => {
                row.insert("is_merging".to_string(), json!(false));
                row.insert("source".to_string(), Value::Null);
                row.insert("source_commit".to_string(), Value::Null);
                row.insert("target".to_string(), Value::Null);
                row.insert("unmerged_tables".to_string(), Value::Null);
            }
        }
        Ok(vec![row])
    }
}

/// `dolt_ignore`: patterns from the persisted `dolt_ignore` table; empty
/// when the table does not exist.
pub struct IgnoreTable {
    root: RootValue,
}

pub(crate) fn construct_ignore(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::Ignore(IgnoreTable {
        root: ctx.root.clone(),
    })))
}

impl IgnoreTable {
    pub fn name(&self) -> String {
        names::IGNORE_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        names::ignore_table_schema()
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let snapshot = match self.root.get_table(names::IGNORE_TABLE)? {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };

        let mut rows = Vec::new();
        for stored in snapshot.rows()? {
            let mut row = SysRow::new();
            row.insert(
                "pattern".to_string(),
                stored.get("pattern").cloned().unwrap_or(Value::Null),
            );
            row.insert(
                "ignored".to_string(),
                stored.get("ignored").cloned().unwrap_or(Value::Null),
            );
            rows.push(row);
        }
        Ok(rows)
    }
}
