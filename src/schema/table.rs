//! Ordered column sets, index definitions and foreign keys.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::column::{Column, ColumnTag, SqlType};

/// An ordered set of columns plus secondary index and foreign key
/// definitions. Immutable in spirit: schema changes build a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKey>,
    /// Table-level collation; `None` inherits the database collation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<super::Collation>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            collation: None,
        }
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn pk_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    pub fn tags(&self) -> Vec<ColumnTag> {
        self.columns.iter().map(|c| c.tag).collect()
    }

    pub fn has_auto_increment(&self) -> bool {
        self.columns.iter().any(|c| c.auto_increment)
    }

    pub fn auto_increment_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.auto_increment)
    }

    pub fn is_using_spatial_pk(&self) -> bool {
        self.columns.iter().any(|c| c.primary_key && c.ty.is_spatial())
    }

    /// Structural equality ignoring tags; used to compare a user-supplied
    /// schema against a canonical one (the documentation table check).
    pub fn equal_ignoring_tags(&self, other: &Schema) -> bool {
        self.columns.len() == other.columns.len()
            && self.columns.iter().zip(other.columns.iter()).all(|(a, b)| {
                a.name.eq_ignore_ascii_case(&b.name)
                    && a.ty == b.ty
                    && a.nullable == b.nullable
                    && a.primary_key == b.primary_key
            })
    }

    /// Validate internal consistency: no duplicate names or tags, primary
    /// key columns not nullable.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut names = std::collections::HashSet::new();
        let mut tags = std::collections::HashSet::new();
        for col in &self.columns {
            if !names.insert(col.name.to_lowercase()) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
            if !tags.insert(col.tag) {
                return Err(SchemaError::DuplicateTag(col.tag));
            }
            if col.primary_key && col.nullable {
                return Err(SchemaError::NullablePrimaryKey(col.name.clone()));
            }
        }
        if self.columns.is_empty() {
            return Err(SchemaError::NoColumns);
        }
        Ok(())
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }
}

/// Secondary index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<IndexColumn>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub fulltext: bool,
}

/// A column participating in an index, optionally with a text prefix length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_length: Option<u16>,
}

impl IndexColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix_length: None,
        }
    }

    pub fn with_prefix(name: impl Into<String>, length: u16) -> Self {
        Self {
            name: name.into(),
            prefix_length: Some(length),
        }
    }
}

/// Foreign key definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub parent_table: String,
    pub parent_columns: Vec<String>,
}

/// Schema-level errors.
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("duplicate column tag: {0}")]
    DuplicateTag(ColumnTag),

    #[error("primary key column cannot be nullable: {0}")]
    NullablePrimaryKey(String),

    #[error("schema must have at least one column")]
    NoColumns,

    #[error("column not found: {0}")]
    ColumnNotFound(String),
}

/// Builder for schemas; tags are assigned sequentially from a caller-chosen
/// base so tests and internal tables get stable tags.
pub struct SchemaBuilder {
    next_tag: ColumnTag,
    columns: Vec<Column>,
    indexes: Vec<IndexDef>,
}

impl SchemaBuilder {
    pub fn new(first_tag: ColumnTag) -> Self {
        Self {
            next_tag: first_tag,
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.next_tag = self.next_tag.max(column.tag + 1);
        self.columns.push(column);
        self
    }

    pub fn add_column(mut self, name: impl Into<String>, ty: SqlType) -> Self {
        let tag = self.next_tag;
        self.next_tag += 1;
        self.columns.push(Column::new(tag, name, ty));
        self
    }

    pub fn add_pk_column(mut self, name: impl Into<String>, ty: SqlType) -> Self {
        let tag = self.next_tag;
        self.next_tag += 1;
        self.columns.push(Column::new(tag, name, ty).primary_key());
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut schema = Schema::new(self.columns);
        schema.indexes = self.indexes;
        schema.validate()?;
        Ok(schema)
    }
}
