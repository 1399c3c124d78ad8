//! Branch control tables: `dolt_branch_control` and
//! `dolt_branch_namespace_control`.
//!
//! Backed by the process-wide rule stores. Reads are open; the facade
//! restricts writes to the controlling principal.

use serde_json::json;

use crate::db::branch_control::BranchControlStore;
use crate::db::error::DbResult;
use crate::db::names;
use crate::dtables::{ResolveCtx, SysRow, SystemTable};
use crate::schema::{Schema, SchemaBuilder, SqlType};

pub struct BranchControlTable {
    controls: BranchControlStore,
}

pub(crate) fn construct_branch_control(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::BranchControl(BranchControlTable {
        controls: ctx.controls.clone(),
    })))
}

impl BranchControlTable {
    pub fn name(&self) -> String {
        names::BRANCH_CONTROL_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("database", SqlType::Text)
            .add_pk_column("branch", SqlType::Text)
            .add_pk_column("user", SqlType::Text)
            .add_pk_column("host", SqlType::Text)
            .add_column("permissions", SqlType::Text)
            .build()
            .expect("branch control schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        Ok(self
            .controls
            .rules()
            .into_iter()
            .map(|rule| {
                let mut row = SysRow::new();
                row.insert("database".to_string(), json!(rule.database));
                row.insert("branch".to_string(), json!(rule.branch));
                row.insert("user".to_string(), json!(rule.user));
                row.insert("host".to_string(), json!(rule.host));
                row.insert("permissions".to_string(), json!(rule.permissions));
                row
            })
            .collect())
    }
}

pub struct BranchNamespaceControlTable {
    controls: BranchControlStore,
}

pub(crate) fn construct_namespace_control(ctx: &ResolveCtx<'_>) -> DbResult<Option<SystemTable>> {
    Ok(Some(SystemTable::BranchNamespaceControl(
        BranchNamespaceControlTable {
            controls: ctx.controls.clone(),
        },
    )))
}

impl BranchNamespaceControlTable {
    pub fn name(&self) -> String {
        names::BRANCH_NAMESPACE_CONTROL_TABLE.to_string()
    }

    pub fn schema(&self) -> Schema {
        SchemaBuilder::new(0)
            .add_pk_column("database", SqlType::Text)
            .add_pk_column("branch", SqlType::Text)
            .add_pk_column("user", SqlType::Text)
            .add_pk_column("host", SqlType::Text)
            .build()
            .expect("namespace control schema")
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        Ok(self
            .controls
            .namespace_rules()
            .into_iter()
            .map(|rule| {
                let mut row = SysRow::new();
                row.insert("database".to_string(), json!(rule.database));
                row.insert("branch".to_string(), json!(rule.branch));
                row.insert("user".to_string(), json!(rule.user));
                row.insert("host".to_string(), json!(rule.host));
                row
            })
            .collect())
    }
}
