//! Commit metadata tables: `dolt_log`, `dolt_commits`, `dolt_commit_ancestors`.

use serde_json::json;

use crate::db::error::DbResult;
use crate::db::names;
use crate::dtables::{ResolveCtx, SysRow, SystemTable};
use crate::schema::{Schema, SchemaBuilder, SqlType};
use crate::storage::{CommitGraph, CommitId, CommitInfo};

fn commit_row(info: &CommitInfo) -> SysRow {
    let mut row = SysRow::new();
    row.insert("commit_hash".to_string(), json!(info.id.to_string()));
    row.insert("committer".to_string(), json!(info.author_name));
    row.insert("email".to_string(), json!(info.author_email));
    row.insert("date".to_string(), json!(info.timestamp.timestamp()));
    row.insert("message".to_string(), json!(info.message));
    row
}

fn commit_schema() -> Schema {
    SchemaBuilder::new(0)
        .add_pk_column("commit_hash", SqlType::Text)
        .add_column("committer", SqlType::Text)
        .add_column("email", SqlType::Text)
        .add_column("date", SqlType::Timestamp)
        .add_column("message", SqlType::Text)
        .build()
        .expect("commit table schema")
}

/// `dolt_log`: commits reachable from the session head, newest first.
pub struct LogTable {
    graph: CommitGraph,
    head: CommitInfo,
}

pub(crate) fn construct_log(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::Log(LogTable {
        graph: ctx.graph.clone(),
        head: ctx.head_commit()?,
    })))
}

impl LogTable {
    pub fn name(&self) -> String {
        names::LOG_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        commit_schema()
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let mut rows = Vec::new();
        for info in self.graph.topological_iter(vec![self.head.id], vec![])? {
            rows.push(commit_row(&info?));
        }
        Ok(rows)
    }
}

/// `dolt_commits`: commits reachable from any branch head.
pub struct CommitsTable {
    graph: CommitGraph,
}

pub(crate) fn construct_commits(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::Commits(CommitsTable {
        graph: ctx.graph.clone(),
    })))
}

impl CommitsTable {
    pub fn name(&self) -> String {
        names::COMMITS_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        commit_schema()
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let heads = all_branch_heads(&self.graph)?;
        let mut rows = Vec::new();
        for info in self.graph.topological_iter(heads, vec![])? {
            rows.push(commit_row(&info?));
        }
        Ok(rows)
    }
}

/// `dolt_commit_ancestors`: one row per (commit, parent) edge reachable
/// from any branch head.
pub struct CommitAncestorsTable {
    graph: CommitGraph,
}

pub(crate) fn construct_ancestors(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::CommitAncestors(CommitAncestorsTable {
        graph: ctx.graph.clone(),
    })))
}

impl CommitAncestorsTable {
    pub fn name(&self) -> String {
        names::COMMIT_ANCESTORS_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("commit_hash", SqlType::Text)
            .add_pk_column("parent_hash", SqlType::Text)
            .add_pk_column("parent_index", SqlType::Int)
            .build()
            .expect("ancestors schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let heads = all_branch_heads(&self.graph)?;
        let mut rows = Vec::new();
        for info in self.graph.topological_iter(heads, vec![])? {
            let info = info?;
            if info.parent_ids.is_empty() {
                let mut row = SysRow::new();
                row.insert("commit_hash".to_string(), json!(info.id.to_string()));
                row.insert("parent_hash".to_string(), serde_json::Value::Null);
                row.insert("parent_index".to_string(), json!(0));
                rows.push(row);
                continue;
            }
            for (index, parent) in info.parent_ids.iter().enumerate() {
                let mut row = SysRow::new();
                row.insert("commit_hash".to_string(), json!(info.id.to_string()));
                row.insert("parent_hash".to_string(), json!(parent.to_string()));
                row.insert("parent_index".to_string(), json!(index));
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

fn all_branch_heads(graph: &CommitGraph) -> DbResult<Vec<CommitId>> {
    let mut heads = Vec::new();
    for branch in graph.branches()? {
        heads.push(graph.branch_head(&branch)?.id);
    }
    Ok(heads)
}
