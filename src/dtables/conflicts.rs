//! Merge artifact tables: `dolt_conflicts`, `dolt_conflicts_<t>`,
//! `dolt_schema_conflicts`, `dolt_constraint_violations`,
//! `dolt_constraint_violations_<t>`.
//!
//! Artifacts are written by the merge path and stored on the working root;
//! these tables only read them back.

use serde_json::{json, Value};

use crate::db::error::DbResult;
use crate::db::names;
use crate::dtables::{flatten_into, ResolveCtx, SysRow, SystemTable};
use crate::schema::{Column, Schema, SchemaBuilder, SqlType};
use crate::storage::{CommitGraph, BranchName, RootValue};

/// `dolt_conflicts`: per-table conflict counts on the working root.
pub struct ConflictsTable {
    root: RootValue,
}

pub(crate) fn construct_conflicts(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::Conflicts(ConflictsTable {
        root: ctx.root.clone(),
    })))
}

impl ConflictsTable {
    pub fn name(&self) -> String {
        names::CONFLICTS_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("table", SqlType::Text)
            .add_column("num_conflicts", SqlType::UInt)
            .build()
            .expect("conflicts schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let mut rows = Vec::new();
        for name in self.root.table_names()? {
            let snapshot = match self.root.get_table(&name)? {
                Some(s) => s,
                None => continue,
            };
            let artifacts = snapshot.conflict_artifacts()?;
            if artifacts.is_empty() {
                continue;
            }
            let mut row = SysRow::new();
            row.insert("table".to_string(), json!(name));
            row.insert("num_conflicts".to_string(), json!(artifacts.len()));
            rows.push(row);
        }
        Ok(rows)
    }
}

/// `dolt_conflicts_<t>`: base/our/their column families per conflicted row.
pub struct ConflictsForTable {
    table: String,
    root: RootValue,
    schema: Schema,
}

pub(crate) fn construct_for_table(
    ctx: &ResolveCtx<'_>,
    suffix: &str,
) -> DbResult<Option<SystemTable>> {
    let snapshot = match ctx.root.get_table(suffix)? {
        Some(s) => s,
        None => return Ok(None),
    };

    Ok(Some(SystemTable::ConflictsFor(ConflictsForTable {
        table: snapshot.name.as_str().to_string(),
        root: ctx.root.clone(),
        schema: snapshot.schema,
    })))
}

impl ConflictsForTable {
    pub fn name(&self) -> String {
        format!("{}{}", names::CONFLICTS_TABLE_PREFIX, self.table)
    }

    pub fn schema(&self) -> Schema {
        let mut columns = Vec::new();
        let mut tag = 0u64;
        for family in ["base_", "our_", "their_"] {
            for col in &self.schema.columns {
                let mut c = Column::new(tag, format!("{}{}", family, col.name), col.ty.clone());
                c.nullable = true;
                columns.push(c);
                tag += 1;
            }
        }
        columns.push(Column::new(tag, "our_diff_type", SqlType::Text));
        columns.push(Column::new(tag + 1, "their_diff_type", SqlType::Text));
        Schema::new(columns)
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let snapshot = match self.root.get_table(&self.table)? {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };

        let mut rows = Vec::new();
        for (_key, artifact) in snapshot.conflict_artifacts()? {
            let mut row = SysRow::new();
            flatten_into("base_", artifact.get("base").unwrap_or(&Value::Null), &mut row);
            flatten_into("our_", artifact.get("ours").unwrap_or(&Value::Null), &mut row);
            flatten_into(
                "their_",
                artifact.get("theirs").unwrap_or(&Value::Null),
                &mut row,
            );
            row.insert(
                "our_diff_type".to_string(),
                artifact.get("our_diff_type").cloned().unwrap_or(Value::Null),
            );
            row.insert(
                "their_diff_type".to_string(),
                artifact
                    .get("their_diff_type")
                    .cloned()
                    .unwrap_or(Value::Null),
            );
            rows.push(row);
        }
        Ok(rows)
    }
}

/// `dolt_schema_conflicts`: schema-level merge conflicts from merge state.
pub struct SchemaConflictsTable {
    graph: CommitGraph,
    branch: Option<BranchName>,
}

pub(crate) fn construct_schema_conflicts(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::SchemaConflicts(SchemaConflictsTable {
        graph: ctx.graph.clone(),
        branch: ctx.branch.cloned(),
    })))
}

impl SchemaConflictsTable {
    pub fn name(&self) -> String {
        names::SCHEMA_CONFLICTS_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("table_name", SqlType::Text)
            .add_column("base_schema", SqlType::Json)
            .add_column("our_schema", SqlType::Json)
            .add_column("their_schema", SqlType::Json)
            .add_column("description", SqlType::Text)
            .build()
            .expect("schema conflicts schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let merge_state = self
            .branch
            .as_ref()
            .and_then(|b| self.graph.working_set(b))
            .and_then(|ws| ws.merge_state);

        let mut rows = Vec::new();
        if let Some(state) = merge_state {
            for conflict in state.schema_conflicts {
                let mut row = SysRow::new();
                row.insert("table_name".to_string(), json!(conflict.table_name));
                row.insert("base_schema".to_string(), conflict.base_schema);
                row.insert("our_schema".to_string(), conflict.our_schema);
                row.insert("their_schema".to_string(), conflict.their_schema);
                row.insert("description".to_string(), json!(conflict.description));
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

/// `dolt_constraint_violations`: per-table violation counts.
pub struct ViolationsTable {
    root: RootValue,
}

pub(crate) fn construct_violations(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::Violations(ViolationsTable {
        root: ctx.root.clone(),
    })))
}

impl ViolationsTable {
    pub fn name(&self) -> String {
        names::VIOLATIONS_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("table", SqlType::Text)
            .add_column("num_violations", SqlType::UInt)
            .build()
            .expect("violations schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let mut rows = Vec::new();
        for name in self.root.table_names()? {
            let snapshot = match self.root.get_table(&name)? {
                Some(s) => s,
                None => continue,
            };
            let artifacts = snapshot.violation_artifacts()?;
            if artifacts.is_empty() {
                continue;
            }
            let mut row = SysRow::new();
            row.insert("table".to_string(), json!(name));
            row.insert("num_violations".to_string(), json!(artifacts.len()));
            rows.push(row);
        }
        Ok(rows)
    }
}

/// `dolt_constraint_violations_<t>`: violation artifacts for one table.
pub struct ViolationsForTable {
    table: String,
    root: RootValue,
}

pub(crate) fn construct_violations_for_table(
    ctx: &ResolveCtx<'_>,
    suffix: &str,
) -> DbResult<Option<SystemTable>> {
    let snapshot = match ctx.root.get_table(suffix)? {
        Some(s) => s,
        None => return Ok(None),
    };

    Ok(Some(SystemTable::ViolationsFor(ViolationsForTable {
        table: snapshot.name.as_str().to_string(),
        root: ctx.root.clone(),
    })))
}

impl ViolationsForTable {
    pub fn name(&self) -> String {
        format!("{}{}", names::VIOLATIONS_TABLE_PREFIX, self.table)
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("violation_type", SqlType::Text)
            .add_column("row", SqlType::Json)
            .add_column("violation_info", SqlType::Json)
            .build()
            .expect("violations-for schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let snapshot = match self.root.get_table(&self.table)? {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };

        let mut rows = Vec::new();
        for (_key, artifact) in snapshot.violation_artifacts()? {
            let mut row = SysRow::new();
            row.insert(
                "violation_type".to_string(),
                artifact.get("violation_type").cloned().unwrap_or(Value::Null),
            );
            row.insert(
                "row".to_string(),
                artifact.get("row").cloned().unwrap_or(Value::Null),
            );
            row.insert(
                "violation_info".to_string(),
                artifact
                    .get("violation_info")
                    .cloned()
                    .unwrap_or(Value::Null),
            );
            rows.push(row);
        }
        Ok(rows)
    }
}
