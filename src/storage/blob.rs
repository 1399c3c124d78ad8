//! Blob operations for row storage.
//!
//! Each row is stored as a separate JSON blob keyed by its serialized
//! primary key. The format carries the key redundantly under `_pk` so a
//! mismatched filename is detected as corruption.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, RowKey};

/// A table row: a serialized primary key plus column values by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: RowKey,
    /// column values (BTreeMap for stable ordering, which keeps blob bytes
    /// deterministic and lets git deduplicate)
    pub data: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(key: RowKey, data: BTreeMap<String, Value>) -> Self {
        Self { key, data }
    }

    /// Create a row from a JSON object (typically from an inserter).
    pub fn from_value(key: RowKey, value: Value) -> StorageResult<Self> {
        let data = match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => {
                return Err(StorageError::Internal(
                    "row data must be a JSON object".to_string(),
                ))
            }
        };
        Ok(Self::new(key, data))
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.data.insert(column.into(), value);
    }
}

/// Internal format for JSON serialization; `_pk` avoids clashing with user
/// columns.
#[derive(Serialize, Deserialize)]
struct RowJson {
    #[serde(rename = "_pk")]
    pk: String,
    #[serde(flatten)]
    data: BTreeMap<String, Value>,
}

/// Serialize a row to JSON bytes.
pub fn serialize_row(row: &Row) -> StorageResult<Vec<u8>> {
    let json = RowJson {
        pk: row.key.as_str().to_string(),
        data: row.data.clone(),
    };

    let bytes = serde_json::to_vec_pretty(&json)?;
    Ok(bytes)
}

/// Deserialize a row from JSON bytes, validating the embedded key.
pub fn deserialize_row(bytes: &[u8], expected_key: &RowKey) -> StorageResult<Row> {
    let json: RowJson = serde_json::from_slice(bytes)?;

    if json.pk != expected_key.as_str() {
        return Err(StorageError::CorruptedData {
            path: format!("{}.json", expected_key).into(),
            reason: format!(
                "primary key mismatch: file name suggests '{}' but content has '{}'",
                expected_key, json.pk
            ),
        });
    }

    Ok(Row {
        key: expected_key.clone(),
        data: json.data,
    })
}

/// Write a row as a blob to the repository, returning its content hash.
pub fn write_row_blob(repo: &git2::Repository, row: &Row) -> StorageResult<BlobId> {
    let bytes = serialize_row(row)?;
    let oid = repo.blob(&bytes)?;
    Ok(BlobId::new(oid))
}

/// Write arbitrary JSON as a blob (table metadata, collation).
pub fn write_json_blob<T: Serialize>(repo: &git2::Repository, value: &T) -> StorageResult<BlobId> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let oid = repo.blob(&bytes)?;
    Ok(BlobId::new(oid))
}

/// Read a blob's content from the repository.
pub fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}
