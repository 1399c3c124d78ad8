//! `dolt_diff_<table>`: row-level diffs of one table across history.
//!
//! One partition per adjacent (first-parent, commit) pair on the walk from
//! the session head, plus a working-vs-head partition. Pairs whose primary
//! key sets are incompatible are skipped.

use serde_json::{json, Value};

use crate::db::error::{DatabaseError, DbResult};
use crate::db::names;
use crate::dtables::{diff_table_rows, ResolveCtx, RowDiff, SysRow, SystemTable};
use crate::schema::{Column, Schema, SqlType};
use crate::storage::{CommitGraph, CommitInfo, RootValue};

/// Row-diff table over one user table's history.
pub struct TableDiffTable {
    table: String,
    graph: CommitGraph,
    head: CommitInfo,
    working: RootValue,
    schema: Schema,
}

pub(crate) fn construct(ctx: &ResolveCtx<'_>, suffix: &str) -> DbResult<Option<SystemTable>> {
    let snapshot = match ctx.root.get_table(suffix)? {
        Some(s) => s,
        None => return Ok(None),
    };

    Ok(Some(SystemTable::TableDiff(TableDiffTable {
        table: snapshot.name.as_str().to_string(),
        graph: ctx.graph.clone(),
        head: ctx.head_commit()?,
        working: ctx.root.clone(),
        schema: snapshot.schema,
    })))
}

/// Build the to_*/from_* diff schema for a target table schema.
pub(crate) fn diff_schema(target: &Schema) -> Schema {
    let mut columns = Vec::new();
    let mut tag = 0u64;
    let mut push = |columns: &mut Vec<Column>, name: String, ty: SqlType| {
        let mut col = Column::new(tag, name, ty);
        col.nullable = true;
        tag += 1;
        columns.push(col);
    };

    for col in &target.columns {
        push(&mut columns, format!("to_{}", col.name), col.ty.clone());
    }
    push(&mut columns, "to_commit".to_string(), SqlType::Text);
    push(&mut columns, "to_commit_date".to_string(), SqlType::Timestamp);
    for col in &target.columns {
        push(&mut columns, format!("from_{}", col.name), col.ty.clone());
    }
    push(&mut columns, "from_commit".to_string(), SqlType::Text);
    push(&mut columns, "from_commit_date".to_string(), SqlType::Timestamp);
    push(&mut columns, "diff_type".to_string(), SqlType::Text);

    Schema::new(columns)
}

/// Render one row diff into the to_*/from_* column families.
pub(crate) fn diff_row(
    target: &Schema,
    diff: &RowDiff,
    to_commit: &str,
    to_date: Option<i64>,
    from_commit: &str,
    from_date: Option<i64>,
) -> SysRow {
    let mut row = SysRow::new();

    for col in &target.columns {
        let to_value = diff
            .to
            .as_ref()
            .and_then(|r| r.get(&col.name).cloned())
            .unwrap_or(Value::Null);
        row.insert(format!("to_{}", col.name), to_value);

        let from_value = diff
            .from
            .as_ref()
            .and_then(|r| r.get(&col.name).cloned())
            .unwrap_or(Value::Null);
        row.insert(format!("from_{}", col.name), from_value);
    }

    row.insert("to_commit".to_string(), json!(to_commit));
    row.insert(
        "to_commit_date".to_string(),
        to_date.map_or(Value::Null, |t| json!(t)),
    );
    row.insert("from_commit".to_string(), json!(from_commit));
    row.insert(
        "from_commit_date".to_string(),
        from_date.map_or(Value::Null, |t| json!(t)),
    );
    row.insert("diff_type".to_string(), json!(diff.diff_type()));
    row
}

/// Primary key compatibility: same tags in the same order.
pub(crate) fn pk_sets_match(a: &Schema, b: &Schema) -> bool {
    let a_tags: Vec<u64> = a.pk_columns().iter().map(|c| c.tag).collect();
    let b_tags: Vec<u64> = b.pk_columns().iter().map(|c| c.tag).collect();
    a_tags == b_tags
}

impl TableDiffTable {
    pub fn name(&self) -> String {
        format!("{}{}", names::DIFF_TABLE_PREFIX, self.table)
    }

    pub fn schema(&self) -> Schema {
        diff_schema(&self.schema)
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let mut rows = Vec::new();

        // working vs head
        let head_root = self.graph.root_at(self.head.id)?;
        self.append_pair_rows(
            &mut rows,
            &head_root,
            &self.working,
            "WORKING",
            None,
            &self.head.id.to_string(),
            Some(self.head.timestamp.timestamp()),
        )?;

        // history, each commit against its first parent
        for info in self.graph.topological_iter(vec![self.head.id], vec![])? {
            let info = info?;
            let to_root = self.graph.root_at(info.id)?;
            let (from_root, from_commit, from_date) = match info.first_parent() {
                Some(parent) => {
                    let parent_info = self.graph.commit(parent)?;
                    (
                        self.graph.root_at(parent)?,
                        parent.to_string(),
                        Some(parent_info.timestamp.timestamp()),
                    )
                }
                None => (RootValue::empty_like(&to_root)?, "EMPTY".to_string(), None),
            };

            self.append_pair_rows(
                &mut rows,
                &from_root,
                &to_root,
                &info.id.to_string(),
                Some(info.timestamp.timestamp()),
                &from_commit,
                from_date,
            )?;
        }

        Ok(rows)
    }

    #[allow(clippy::too_many_arguments)]
    fn append_pair_rows(
        &self,
        rows: &mut Vec<SysRow>,
        from_root: &RootValue,
        to_root: &RootValue,
        to_commit: &str,
        to_date: Option<i64>,
        from_commit: &str,
        from_date: Option<i64>,
    ) -> DbResult<()> {
        // skip pairs whose key sets are incompatible with the target schema
        for root in [from_root, to_root] {
            if let Some(snapshot) = root.get_table(&self.table)? {
                if !pk_sets_match(&snapshot.schema, &self.schema) {
                    return Ok(());
                }
            }
        }

        let diffs = diff_table_rows(Some(from_root), Some(to_root), &self.table)
            .map_err(|e| annotate(&self.name(), e))?;
        for diff in diffs {
            rows.push(diff_row(
                &self.schema,
                &diff,
                to_commit,
                to_date,
                from_commit,
                from_date,
            ));
        }
        Ok(())
    }
}

fn annotate(table: &str, err: DatabaseError) -> DatabaseError {
    match err {
        DatabaseError::Storage(e) => DatabaseError::from_storage(table, e),
        other => other,
    }
}
