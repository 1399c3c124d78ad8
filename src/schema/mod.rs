//! Schema model: tagged columns, SQL types, ordered column sets, index and
//! foreign key definitions.
//!
//! Every column carries a `tag`, a stable u64 identifier that survives
//! renames and is unique across all tables of a database. Root values
//! enforce the uniqueness invariant at create time.

mod column;
mod table;

pub use column::{Column, ColumnTag, SqlType};
pub use table::{ForeignKey, IndexColumn, IndexDef, Schema, SchemaBuilder, SchemaError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Database-wide collation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collation(String);

impl Collation {
    pub const DEFAULT: &'static str = "utf8mb4_0900_ai_ci";

    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            return Self::default();
        }
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Collation {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl fmt::Display for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
