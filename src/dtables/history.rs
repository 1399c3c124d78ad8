//! `dolt_history_<table>`: every row of a table at every commit reachable
//! from the session head, annotated with commit metadata.

use serde_json::{json, Value};

use crate::db::error::DbResult;
use crate::db::names;
use crate::dtables::{ResolveCtx, SysRow, SystemTable};
use crate::schema::{Column, Schema, SqlType};
use crate::storage::{CommitGraph, CommitInfo};

pub struct HistoryTable {
    table: String,
    graph: CommitGraph,
    head: CommitInfo,
    schema: Schema,
}

pub(crate) fn construct(ctx: &ResolveCtx<'_>, suffix: &str) -> DbResult<Option<SystemTable>> {
    let snapshot = match ctx.root.get_table(suffix)? {
        Some(s) => s,
        None => return Ok(None),
    };

    // the head commit may be cached on the session; fetched lazily if not
    Ok(Some(SystemTable::History(HistoryTable {
        table: snapshot.name.as_str().to_string(),
        graph: ctx.graph.clone(),
        head: ctx.head_commit()?,
        schema: snapshot.schema,
    })))
}

impl HistoryTable {
    pub fn name(&self) -> String {
        format!("{}{}", names::HISTORY_TABLE_PREFIX, self.table)
    }

    pub fn schema(&self) -> Schema {
        let mut columns: Vec<Column> = Vec::with_capacity(self.schema.columns.len() + 3);
        let mut tag = 0u64;
        for col in &self.schema.columns {
            let mut c = Column::new(tag, col.name.clone(), col.ty.clone());
            c.nullable = true;
            columns.push(c);
            tag += 1;
        }
        columns.push(Column::new(tag, "commit_hash", SqlType::Text));
        columns.push(Column::new(tag + 1, "committer", SqlType::Text));
        columns.push(Column::new(tag + 2, "commit_date", SqlType::Timestamp));
        Schema::new(columns)
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let mut rows = Vec::new();

        for info in self.graph.topological_iter(vec![self.head.id], vec![])? {
            let info = info?;
            let root = self.graph.root_at(info.id)?;
            let snapshot = match root.get_table(&self.table)? {
                Some(s) => s,
                None => continue,
            };

            for stored in snapshot.rows()? {
                let mut row = SysRow::new();
                for col in &self.schema.columns {
                    row.insert(
                        col.name.clone(),
                        stored.get(&col.name).cloned().unwrap_or(Value::Null),
                    );
                }
                row.insert("commit_hash".to_string(), json!(info.id.to_string()));
                row.insert("committer".to_string(), json!(info.author_name));
                row.insert("commit_date".to_string(), json!(info.timestamp.timestamp()));
                rows.push(row);
            }
        }

        Ok(rows)
    }
}
