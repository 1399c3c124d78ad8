//! Schema fragments: views, triggers and events persisted in `dolt_schemas`,
//! and stored procedures persisted in `dolt_procedures`.
//!
//! Both tables are created lazily on first write and dropped again when the
//! last entry goes, so creating and immediately dropping the first fragment
//! leaves the database schema byte-identical.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use crate::schema::{Column, Schema, SqlType};
use crate::storage::{Row, RowKey, RootValue, StorageError, StorageResult};

/// Name of the persisted fragments table.
pub const SCHEMAS_TABLE: &str = "dolt_schemas";
/// Name of the persisted procedures table.
pub const PROCEDURES_TABLE: &str = "dolt_procedures";

// Internal tables use reserved tag ranges so they never collide with user
// tables, whose tags the facade allocates from zero upward.
const SCHEMAS_FIRST_TAG: u64 = 9000;
const PROCEDURES_FIRST_TAG: u64 = 9100;

/// The kind of a schema fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentType {
    View,
    Trigger,
    Event,
}

impl FragmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentType::View => "view",
            FragmentType::Trigger => "trigger",
            FragmentType::Event => "event",
        }
    }
}

/// A persisted fragment row.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaFragment {
    pub fragment_type: FragmentType,
    pub name: String,
    pub fragment: String,
    /// Seconds since epoch UTC.
    pub created_at: i64,
    pub sql_mode: Option<String>,
}

/// A materialized view definition derived from a `view` fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDefinition {
    pub name: String,
    /// The SELECT body.
    pub text_definition: String,
    /// The full CREATE VIEW statement.
    pub create_view_statement: String,
    pub sql_mode: Option<String>,
}

/// A stored procedure row.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureDefinition {
    pub name: String,
    pub create_statement: String,
    pub created_at: i64,
    pub modified_at: i64,
    pub sql_mode: Option<String>,
}

/// Outcomes specific to the fragment store; callers map these onto their
/// own already-exists / does-not-exist errors.
#[derive(Debug)]
pub enum FragmentError {
    Exists,
    Missing,
    Storage(StorageError),
}

impl From<StorageError> for FragmentError {
    fn from(e: StorageError) -> Self {
        FragmentError::Storage(e)
    }
}

pub fn schemas_table_schema() -> Schema {
    Schema::new(vec![
        Column::new(SCHEMAS_FIRST_TAG, "type", SqlType::VarChar(64)).primary_key(),
        Column::new(SCHEMAS_FIRST_TAG + 1, "name", SqlType::VarChar(64)).primary_key(),
        Column::new(SCHEMAS_FIRST_TAG + 2, "fragment", SqlType::LongText),
        Column::new(SCHEMAS_FIRST_TAG + 3, "extra", SqlType::Json),
        Column::new(SCHEMAS_FIRST_TAG + 4, "sql_mode", SqlType::VarChar(256)),
    ])
}

pub fn procedures_table_schema() -> Schema {
    Schema::new(vec![
        Column::new(PROCEDURES_FIRST_TAG, "name", SqlType::VarChar(64)).primary_key(),
        Column::new(PROCEDURES_FIRST_TAG + 1, "create_stmt", SqlType::LongText),
        Column::new(PROCEDURES_FIRST_TAG + 2, "created_at", SqlType::Timestamp),
        Column::new(PROCEDURES_FIRST_TAG + 3, "modified_at", SqlType::Timestamp),
        Column::new(PROCEDURES_FIRST_TAG + 4, "sql_mode", SqlType::VarChar(256)),
    ])
}

fn fragment_row_key(fragment_type: FragmentType, name: &str) -> StorageResult<RowKey> {
    RowKey::new(format!("{}:{}", fragment_type.as_str(), name.to_lowercase()))
        .map_err(StorageError::from)
}

fn fragment_from_row(row: &Row) -> Option<SchemaFragment> {
    let type_str = row.get("type")?.as_str()?;
    let fragment_type = match type_str {
        "view" => FragmentType::View,
        "trigger" => FragmentType::Trigger,
        "event" => FragmentType::Event,
        _ => return None,
    };

    let created_at = row
        .get("extra")
        .and_then(|e| e.get("CreatedAt"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    Some(SchemaFragment {
        fragment_type,
        name: row.get("name")?.as_str()?.to_string(),
        fragment: row.get("fragment")?.as_str()?.to_string(),
        created_at,
        sql_mode: row.get("sql_mode").and_then(Value::as_str).map(String::from),
    })
}

/// Add a fragment. Fails with `Exists` when `(type, name)` is already
/// present (case-insensitive on name).
pub fn add_fragment(root: &RootValue, frag: &SchemaFragment) -> Result<RootValue, FragmentError> {
    let root = match root.get_table(SCHEMAS_TABLE)? {
        Some(_) => root.clone(),
        None => root.create_empty_table(SCHEMAS_TABLE, schemas_table_schema())?,
    };

    if get_fragment(&root, frag.fragment_type, &frag.name)?.is_some() {
        return Err(FragmentError::Exists);
    }

    let key = fragment_row_key(frag.fragment_type, &frag.name)?;
    let mut data = BTreeMap::new();
    data.insert("type".to_string(), json!(frag.fragment_type.as_str()));
    data.insert("name".to_string(), json!(frag.name));
    data.insert("fragment".to_string(), json!(frag.fragment));
    data.insert("extra".to_string(), json!({ "CreatedAt": frag.created_at }));
    data.insert("sql_mode".to_string(), frag.sql_mode.as_deref().map_or(Value::Null, Value::from));

    debug!(kind = frag.fragment_type.as_str(), name = %frag.name, "storing schema fragment");
    Ok(root.put_row(SCHEMAS_TABLE, Row::new(key, data))?)
}

/// Drop a fragment. Fails with `Missing` when absent. When the last
/// fragment goes, the table itself is dropped.
pub fn drop_fragment(
    root: &RootValue,
    fragment_type: FragmentType,
    name: &str,
) -> Result<RootValue, FragmentError> {
    let snapshot = match root.get_table(SCHEMAS_TABLE)? {
        Some(s) => s,
        None => return Err(FragmentError::Missing),
    };

    let existing = get_fragment(root, fragment_type, name)?.ok_or(FragmentError::Missing)?;
    let key = fragment_row_key(fragment_type, &existing.name)?;
    let new_root = root.delete_row(SCHEMAS_TABLE, &key)?;

    if snapshot.row_count == 1 {
        // that was the last fragment
        debug!("dropping empty {}", SCHEMAS_TABLE);
        return Ok(new_root.remove_tables(&[SCHEMAS_TABLE], Default::default())?);
    }
    Ok(new_root)
}

pub fn get_fragment(
    root: &RootValue,
    fragment_type: FragmentType,
    name: &str,
) -> StorageResult<Option<SchemaFragment>> {
    let snapshot = match root.get_table(SCHEMAS_TABLE)? {
        Some(s) => s,
        None => return Ok(None),
    };

    for row in snapshot.rows()? {
        if let Some(frag) = fragment_from_row(&row) {
            if frag.fragment_type == fragment_type && frag.name.eq_ignore_ascii_case(name) {
                return Ok(Some(frag));
            }
        }
    }
    Ok(None)
}

/// All fragments of a type, ordered by name.
pub fn fragments_of_type(
    root: &RootValue,
    fragment_type: FragmentType,
) -> StorageResult<Vec<SchemaFragment>> {
    let snapshot = match root.get_table(SCHEMAS_TABLE)? {
        Some(s) => s,
        None => return Ok(Vec::new()),
    };

    let mut result: Vec<SchemaFragment> = snapshot
        .rows()?
        .iter()
        .filter_map(fragment_from_row)
        .filter(|f| f.fragment_type == fragment_type)
        .collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(result)
}

/// Materialize view definitions from the stored fragments.
///
/// A fragment that parses as CREATE VIEW contributes the parsed query as
/// its SELECT body; anything else is treated as a bare SELECT and wrapped
/// in a synthesized CREATE VIEW statement.
pub fn views(root: &RootValue) -> StorageResult<Vec<ViewDefinition>> {
    let fragments = fragments_of_type(root, FragmentType::View)?;
    Ok(fragments.into_iter().map(view_from_fragment).collect())
}

fn view_from_fragment(frag: SchemaFragment) -> ViewDefinition {
    let dialect = GenericDialect {};
    if let Ok(statements) = Parser::parse_sql(&dialect, &frag.fragment) {
        if let Some(Statement::CreateView { query, .. }) = statements.into_iter().next() {
            return ViewDefinition {
                name: frag.name,
                text_definition: query.to_string(),
                create_view_statement: frag.fragment,
                sql_mode: frag.sql_mode,
            };
        }
    }

    // fall back to the whole fragment as the SELECT body
    let create = format!("CREATE VIEW `{}` AS {}", frag.name, frag.fragment);
    ViewDefinition {
        name: frag.name,
        text_definition: frag.fragment,
        create_view_statement: create,
        sql_mode: frag.sql_mode,
    }
}

// ==================== Procedures ====================

fn procedure_from_row(row: &Row) -> Option<ProcedureDefinition> {
    Some(ProcedureDefinition {
        name: row.get("name")?.as_str()?.to_string(),
        create_statement: row.get("create_stmt")?.as_str()?.to_string(),
        created_at: row.get("created_at").and_then(Value::as_i64).unwrap_or(0),
        modified_at: row.get("modified_at").and_then(Value::as_i64).unwrap_or(0),
        sql_mode: row.get("sql_mode").and_then(Value::as_str).map(String::from),
    })
}

pub fn get_procedure(
    root: &RootValue,
    name: &str,
) -> StorageResult<Option<ProcedureDefinition>> {
    let snapshot = match root.get_table(PROCEDURES_TABLE)? {
        Some(s) => s,
        None => return Ok(None),
    };
    for row in snapshot.rows()? {
        if let Some(proc) = procedure_from_row(&row) {
            if proc.name.eq_ignore_ascii_case(name) {
                return Ok(Some(proc));
            }
        }
    }
    Ok(None)
}

pub fn procedures(root: &RootValue) -> StorageResult<Vec<ProcedureDefinition>> {
    let snapshot = match root.get_table(PROCEDURES_TABLE)? {
        Some(s) => s,
        None => return Ok(Vec::new()),
    };
    let mut result: Vec<ProcedureDefinition> = snapshot
        .rows()?
        .iter()
        .filter_map(procedure_from_row)
        .collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(result)
}

pub fn add_procedure(
    root: &RootValue,
    proc: &ProcedureDefinition,
) -> Result<RootValue, FragmentError> {
    let root = match root.get_table(PROCEDURES_TABLE)? {
        Some(_) => root.clone(),
        None => root.create_empty_table(PROCEDURES_TABLE, procedures_table_schema())?,
    };

    if get_procedure(&root, &proc.name)?.is_some() {
        return Err(FragmentError::Exists);
    }

    let key = RowKey::new(proc.name.to_lowercase()).map_err(StorageError::from)?;
    let mut data = BTreeMap::new();
    data.insert("name".to_string(), json!(proc.name));
    data.insert("create_stmt".to_string(), json!(proc.create_statement));
    data.insert("created_at".to_string(), json!(proc.created_at));
    data.insert("modified_at".to_string(), json!(proc.modified_at));
    data.insert("sql_mode".to_string(), proc.sql_mode.as_deref().map_or(Value::Null, Value::from));

    Ok(root.put_row(PROCEDURES_TABLE, Row::new(key, data))?)
}

pub fn drop_procedure(root: &RootValue, name: &str) -> Result<RootValue, FragmentError> {
    let snapshot = match root.get_table(PROCEDURES_TABLE)? {
        Some(s) => s,
        None => return Err(FragmentError::Missing),
    };

    let existing = get_procedure(root, name)?.ok_or(FragmentError::Missing)?;
    let key = RowKey::new(existing.name.to_lowercase()).map_err(StorageError::from)?;
    let new_root = root.delete_row(PROCEDURES_TABLE, &key)?;

    if snapshot.row_count == 1 {
        return Ok(new_root.remove_tables(&[PROCEDURES_TABLE], Default::default())?);
    }
    Ok(new_root)
}
