//! Column definitions and SQL data types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable column identifier, unique across every table in a database and
/// preserved across renames.
pub type ColumnTag = u64;

/// SQL data types understood by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Int,
    UInt,
    Float,
    Boolean,
    Text,
    /// VARCHAR with a maximum character length.
    VarChar(u32),
    LongText,
    Json,
    Timestamp,
    /// Spatial types. Not permitted in primary keys.
    Geometry,
    Point,
    LineString,
    Polygon,
}

impl SqlType {
    pub fn is_spatial(&self) -> bool {
        matches!(
            self,
            SqlType::Geometry | SqlType::Point | SqlType::LineString | SqlType::Polygon
        )
    }

    /// Text types are the only ones that accept index prefix lengths.
    pub fn is_text(&self) -> bool {
        matches!(self, SqlType::Text | SqlType::VarChar(_) | SqlType::LongText)
    }

    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Int => "BIGINT".to_string(),
            SqlType::UInt => "BIGINT UNSIGNED".to_string(),
            SqlType::Float => "DOUBLE".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Text => "TEXT".to_string(),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::LongText => "LONGTEXT".to_string(),
            SqlType::Json => "JSON".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Geometry => "GEOMETRY".to_string(),
            SqlType::Point => "POINT".to_string(),
            SqlType::LineString => "LINESTRING".to_string(),
            SqlType::Polygon => "POLYGON".to_string(),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}

/// Full column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Stable identifier, unique across the whole database.
    pub tag: ColumnTag,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SqlType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub primary_key: bool,
    #[serde(default)]
    pub auto_increment: bool,
}

impl Column {
    pub fn new(tag: ColumnTag, name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            tag,
            name: name.into(),
            ty,
            nullable: true,
            default: None,
            primary_key: false,
            auto_increment: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.ty)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        if self.primary_key {
            write!(f, " PRIMARY KEY")?;
        }
        if self.auto_increment {
            write!(f, " AUTO_INCREMENT")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spatial_types() {
        assert!(SqlType::Geometry.is_spatial());
        assert!(SqlType::Point.is_spatial());
        assert!(!SqlType::Int.is_spatial());
        assert!(!SqlType::Text.is_spatial());
    }

    #[test]
    fn test_text_types() {
        assert!(SqlType::Text.is_text());
        assert!(SqlType::VarChar(255).is_text());
        assert!(SqlType::LongText.is_text());
        assert!(!SqlType::Json.is_text());
    }

    #[test]
    fn test_column_builder() {
        let col = Column::new(1, "id", SqlType::Int).primary_key().auto_increment();
        assert!(col.primary_key);
        assert!(!col.nullable);
        assert!(col.auto_increment);
        assert_eq!(col.to_string(), "id BIGINT NOT NULL PRIMARY KEY AUTO_INCREMENT");
    }
}
