//! Table adapters over root-value snapshots.
//!
//! Three flavors share one read surface and escalate the write surface:
//! read-only (system and historical views), writable (DML), and alterable
//! (DDL on top of DML). `lock_to_root` rebinds an adapter to a specific
//! root, which is how `AS OF` reads work.
//!
//! Adapters never see the database facade. They receive a `RootHandle`, a
//! capability exposing only the session's get-root/set-root pair, which
//! breaks the adapter -> database -> session cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::globalstate::AutoIncrementTracker;
use crate::schema::{ForeignKey, IndexDef, Schema};
use crate::session::Session;
use crate::storage::{
    Row, RowKey, RootValue, StorageError, StorageResult, TableName, TableSnapshot,
};

/// Capability handing a table adapter access to the session's working root
/// for one database, and nothing else.
#[derive(Clone)]
pub struct RootHandle {
    session: Session,
    db_key: String,
}

impl RootHandle {
    pub fn new(session: Session, db_key: impl Into<String>) -> Self {
        Self {
            session,
            db_key: db_key.into(),
        }
    }

    pub fn get_root(&self) -> Option<RootValue> {
        self.session.working_root(&self.db_key)
    }

    pub fn set_root(&self, root: RootValue) {
        self.session.set_working_root(&self.db_key, root);
    }
}

/// Shared state of all adapter variants.
#[derive(Clone)]
pub struct TableCore {
    snapshot: TableSnapshot,
    root: RootValue,
    handle: Option<RootHandle>,
    tracker: Option<Arc<AutoIncrementTracker>>,
}

/// A table adapter: one underlying table snapshot behind one of three
/// capability levels.
#[derive(Clone)]
pub enum TableAdapter {
    ReadOnly(TableCore),
    Writable(TableCore),
    Alterable(TableCore),
}

impl TableAdapter {
    pub fn read_only(snapshot: TableSnapshot, root: RootValue) -> Self {
        TableAdapter::ReadOnly(TableCore {
            snapshot,
            root,
            handle: None,
            tracker: None,
        })
    }

    pub fn writable(
        snapshot: TableSnapshot,
        root: RootValue,
        handle: RootHandle,
        tracker: Arc<AutoIncrementTracker>,
    ) -> Self {
        TableAdapter::Writable(TableCore {
            snapshot,
            root,
            handle: Some(handle),
            tracker: Some(tracker),
        })
    }

    pub fn alterable(
        snapshot: TableSnapshot,
        root: RootValue,
        handle: RootHandle,
        tracker: Arc<AutoIncrementTracker>,
    ) -> Self {
        TableAdapter::Alterable(TableCore {
            snapshot,
            root,
            handle: Some(handle),
            tracker: Some(tracker),
        })
    }

    fn core(&self) -> &TableCore {
        match self {
            TableAdapter::ReadOnly(c) | TableAdapter::Writable(c) | TableAdapter::Alterable(c) => c,
        }
    }

    // ==================== Read surface ====================

    pub fn name(&self) -> &TableName {
        &self.core().snapshot.name
    }

    pub fn schema(&self) -> &Schema {
        &self.core().snapshot.schema
    }

    pub fn row_count(&self) -> usize {
        self.core().snapshot.row_count
    }

    pub fn rows(&self) -> StorageResult<Vec<Row>> {
        self.core().snapshot.rows()
    }

    pub fn get_row(&self, key: &RowKey) -> StorageResult<Option<Row>> {
        self.core().snapshot.get_row(key)
    }

    /// The root this adapter reads from.
    pub fn root(&self) -> &RootValue {
        &self.core().root
    }

    pub fn can_write(&self) -> bool {
        matches!(self, TableAdapter::Writable(_) | TableAdapter::Alterable(_))
    }

    pub fn can_alter(&self) -> bool {
        matches!(self, TableAdapter::Alterable(_))
    }

    /// Rebind this adapter to a specific root, keeping the variant. The
    /// mechanism behind `AS OF`: the returned adapter reads the table as it
    /// was in `root`.
    pub fn lock_to_root(&self, root: RootValue) -> StorageResult<TableAdapter> {
        let name = self.name().as_str();
        let snapshot = root
            .get_table(name)?
            .ok_or_else(|| StorageError::TableNotFound(self.name().clone()))?;

        let core = TableCore {
            snapshot,
            root,
            handle: self.core().handle.clone(),
            tracker: self.core().tracker.clone(),
        };

        Ok(match self {
            TableAdapter::ReadOnly(_) => TableAdapter::ReadOnly(core),
            TableAdapter::Writable(_) => TableAdapter::Writable(core),
            TableAdapter::Alterable(_) => TableAdapter::Alterable(core),
        })
    }

    // ==================== Write surface ====================

    fn writable_core(&self) -> StorageResult<&TableCore> {
        match self {
            TableAdapter::Writable(c) | TableAdapter::Alterable(c) => Ok(c),
            TableAdapter::ReadOnly(_) => Err(StorageError::Internal(format!(
                "table {} is read-only",
                self.name()
            ))),
        }
    }

    fn publish(&self, core: &TableCore, new_root: RootValue) -> StorageResult<()> {
        let handle = core.handle.as_ref().ok_or_else(|| {
            StorageError::Internal("writable adapter without a root handle".to_string())
        })?;
        handle.set_root(new_root);
        Ok(())
    }

    /// Insert a row built from column values. Fills the auto-increment
    /// column from the tracker when absent, records explicit values with
    /// `observe`, and derives the row key from the primary key columns.
    pub fn insert(&self, mut data: BTreeMap<String, Value>) -> StorageResult<Row> {
        let core = self.writable_core()?;
        let schema = &core.snapshot.schema;
        let name = core.snapshot.name.as_str();

        if let Some(col) = schema.auto_increment_column() {
            let tracker = core.tracker.as_ref().ok_or_else(|| {
                StorageError::Internal("auto-increment table without a tracker".to_string())
            })?;
            match data.get(&col.name).and_then(Value::as_u64) {
                Some(explicit) => tracker.observe(name, explicit),
                None => {
                    let next = tracker.next(name);
                    data.insert(col.name.clone(), Value::from(next));
                }
            }
        }

        let key = row_key_from_pk(schema, &data)?;
        let row = Row::new(key, data);

        if core.snapshot.get_row(&row.key)?.is_some() {
            return Err(StorageError::RowAlreadyExists {
                table: core.snapshot.name.clone(),
                key: row.key,
            });
        }

        let mut new_root = core.root.put_row(name, row.clone())?;

        // persist the auto-increment hint so other branches can reconcile
        if let Some(tracker) = core.tracker.as_ref() {
            if schema.has_auto_increment() {
                new_root =
                    new_root.set_table_meta(name, schema.clone(), Some(tracker.peek(name)))?;
            }
        }

        self.publish(core, new_root)?;
        Ok(row)
    }

    /// Replace an existing row; fails if it does not exist.
    pub fn update(&self, row: Row) -> StorageResult<()> {
        let core = self.writable_core()?;
        if core.snapshot.get_row(&row.key)?.is_none() {
            return Err(StorageError::RowNotFound {
                table: core.snapshot.name.clone(),
                key: row.key,
            });
        }
        let new_root = core.root.put_row(core.snapshot.name.as_str(), row)?;
        self.publish(core, new_root)
    }

    /// Delete a row; fails if it does not exist.
    pub fn delete(&self, key: &RowKey) -> StorageResult<()> {
        let core = self.writable_core()?;
        let new_root = core.root.delete_row(core.snapshot.name.as_str(), key)?;
        self.publish(core, new_root)
    }

    // ==================== Alter surface ====================

    fn alterable_core(&self) -> StorageResult<&TableCore> {
        match self {
            TableAdapter::Alterable(c) => Ok(c),
            _ => Err(StorageError::Internal(format!(
                "table {} does not support schema changes",
                self.name()
            ))),
        }
    }

    fn publish_schema(&self, core: &TableCore, schema: Schema) -> StorageResult<()> {
        schema.validate().map_err(|e| StorageError::Internal(e.to_string()))?;
        let new_root = core.root.set_table_meta(
            core.snapshot.name.as_str(),
            schema,
            core.snapshot.auto_increment,
        )?;
        self.publish(core, new_root)
    }

    /// Replace the whole schema (column add/drop/modify).
    pub fn set_schema(&self, schema: Schema) -> StorageResult<()> {
        let core = self.alterable_core()?;
        self.publish_schema(core, schema)
    }

    /// Rename a column in place, preserving its tag.
    pub fn rename_column(&self, old: &str, new: &str) -> StorageResult<()> {
        let core = self.alterable_core()?;
        let mut schema = core.snapshot.schema.clone();

        let column = schema
            .columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(old))
            .ok_or_else(|| StorageError::Internal(format!("column not found: {}", old)))?;
        column.name = new.to_string();

        self.publish_schema(core, schema)
    }

    pub fn add_index(&self, index: IndexDef) -> StorageResult<()> {
        let core = self.alterable_core()?;
        let mut schema = core.snapshot.schema.clone();
        if schema.indexes.iter().any(|i| i.name.eq_ignore_ascii_case(&index.name)) {
            return Err(StorageError::Internal(format!(
                "index already exists: {}",
                index.name
            )));
        }
        schema.indexes.push(index);
        self.publish_schema(core, schema)
    }

    pub fn drop_index(&self, name: &str) -> StorageResult<()> {
        let core = self.alterable_core()?;
        let mut schema = core.snapshot.schema.clone();
        let before = schema.indexes.len();
        schema.indexes.retain(|i| !i.name.eq_ignore_ascii_case(name));
        if schema.indexes.len() == before {
            return Err(StorageError::Internal(format!("index not found: {}", name)));
        }
        self.publish_schema(core, schema)
    }

    pub fn add_foreign_key(&self, fk: ForeignKey) -> StorageResult<()> {
        let core = self.alterable_core()?;
        let mut schema = core.snapshot.schema.clone();
        if schema.foreign_keys.iter().any(|f| f.name.eq_ignore_ascii_case(&fk.name)) {
            return Err(StorageError::Internal(format!(
                "foreign key already exists: {}",
                fk.name
            )));
        }
        schema.foreign_keys.push(fk);
        self.publish_schema(core, schema)
    }

    pub fn drop_foreign_key(&self, name: &str) -> StorageResult<()> {
        let core = self.alterable_core()?;
        let mut schema = core.snapshot.schema.clone();
        let before = schema.foreign_keys.len();
        schema.foreign_keys.retain(|f| !f.name.eq_ignore_ascii_case(name));
        if schema.foreign_keys.len() == before {
            return Err(StorageError::Internal(format!(
                "foreign key not found: {}",
                name
            )));
        }
        self.publish_schema(core, schema)
    }
}

/// Derive a row key from the primary key column values, joined with `_` for
/// composite keys. Each part is escaped so the separator cannot occur
/// inside it: distinct PK tuples always derive distinct keys.
fn row_key_from_pk(schema: &Schema, data: &BTreeMap<String, Value>) -> StorageResult<RowKey> {
    let pk_columns = schema.pk_columns();
    if pk_columns.is_empty() {
        return Err(StorageError::Internal(
            "cannot derive a row key without primary key columns".to_string(),
        ));
    }

    let mut parts = Vec::with_capacity(pk_columns.len());
    for col in pk_columns {
        let value = data.get(&col.name).ok_or_else(|| {
            StorageError::Internal(format!("missing primary key value for {}", col.name))
        })?;
        let part = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        parts.push(escape_key_part(&part));
    }

    Ok(RowKey::new(parts.join("_"))?)
}

/// Escape the key separator (and the escape character itself) inside one
/// primary key part.
fn escape_key_part(part: &str) -> String {
    part.replace('%', "%25").replace('_', "%5f")
}

impl std::fmt::Debug for TableAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            TableAdapter::ReadOnly(_) => "ReadOnly",
            TableAdapter::Writable(_) => "Writable",
            TableAdapter::Alterable(_) => "Alterable",
        };
        f.debug_struct("TableAdapter")
            .field("variant", &variant)
            .field("table", &self.name().as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, SchemaBuilder, SqlType};
    use crate::storage::ObjectStore;
    use tempfile::TempDir;

    fn setup_with_table(schema: Schema) -> (TempDir, Session, RootValue) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::init(dir.path()).unwrap();
        let root = RootValue::empty(&store)
            .unwrap()
            .create_empty_table("t", schema)
            .unwrap();
        let session = Session::new("alice");
        session.set_working_root("db", root.clone());
        (dir, session, root)
    }

    fn plain_schema() -> Schema {
        SchemaBuilder::new(1)
            .add_pk_column("id", SqlType::Int)
            .add_column("name", SqlType::Text)
            .build()
            .unwrap()
    }

    fn autoinc_schema() -> Schema {
        SchemaBuilder::new(1)
            .column(Column::new(1, "id", SqlType::UInt).primary_key().auto_increment())
            .add_column("v", SqlType::Text)
            .build()
            .unwrap()
    }

    fn alterable(session: &Session, root: &RootValue) -> TableAdapter {
        let snapshot = root.get_table("t").unwrap().unwrap();
        TableAdapter::alterable(
            snapshot,
            root.clone(),
            RootHandle::new(session.clone(), "db"),
            Arc::new(AutoIncrementTracker::new()),
        )
    }

    #[test]
    fn test_read_surface() {
        let (_dir, session, root) = setup_with_table(plain_schema());
        let adapter = alterable(&session, &root);

        assert_eq!(adapter.name().as_str(), "t");
        assert_eq!(adapter.row_count(), 0);
        assert!(adapter.can_write());
        assert!(adapter.can_alter());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let (_dir, _session, root) = setup_with_table(plain_schema());
        let snapshot = root.get_table("t").unwrap().unwrap();
        let adapter = TableAdapter::read_only(snapshot, root);

        assert!(!adapter.can_write());
        let result = adapter.insert(BTreeMap::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_insert_publishes_new_root() {
        let (_dir, session, root) = setup_with_table(plain_schema());
        let adapter = alterable(&session, &root);

        let mut data = BTreeMap::new();
        data.insert("id".to_string(), serde_json::json!(1));
        data.insert("name".to_string(), serde_json::json!("Alice"));
        let row = adapter.insert(data).unwrap();
        assert_eq!(row.key.as_str(), "1");

        // the session observed the new root
        let new_root = session.working_root("db").unwrap();
        assert_ne!(new_root.hash(), root.hash());
        assert_eq!(new_root.get_table("t").unwrap().unwrap().row_count, 1);
    }

    #[test]
    fn test_insert_assigns_auto_increment() {
        let (_dir, session, root) = setup_with_table(autoinc_schema());
        let tracker = Arc::new(AutoIncrementTracker::new());
        tracker.add_new_table("t");
        let snapshot = root.get_table("t").unwrap().unwrap();
        let adapter = TableAdapter::writable(
            snapshot,
            root.clone(),
            RootHandle::new(session.clone(), "db"),
            tracker.clone(),
        );

        let row = adapter.insert(BTreeMap::new()).unwrap();
        assert_eq!(row.get("id"), Some(&serde_json::json!(1)));

        // an explicit value bumps the counter past it
        let root2 = session.working_root("db").unwrap();
        let snapshot2 = root2.get_table("t").unwrap().unwrap();
        let adapter2 = TableAdapter::writable(
            snapshot2,
            root2,
            RootHandle::new(session.clone(), "db"),
            tracker.clone(),
        );
        let mut data = BTreeMap::new();
        data.insert("id".to_string(), serde_json::json!(10));
        adapter2.insert(data).unwrap();
        assert_eq!(tracker.peek("t"), 11);

        // the hint is persisted in the table snapshot
        let root3 = session.working_root("db").unwrap();
        let hint = root3.get_table("t").unwrap().unwrap().auto_increment;
        assert_eq!(hint, Some(11));
    }

    #[test]
    fn test_composite_pk_keys_never_collide() {
        let schema = SchemaBuilder::new(1)
            .add_pk_column("a", SqlType::Text)
            .add_pk_column("b", SqlType::Text)
            .build()
            .unwrap();
        let (_dir, session, root) = setup_with_table(schema);
        let adapter = alterable(&session, &root);

        let mut data = BTreeMap::new();
        data.insert("a".to_string(), serde_json::json!("1"));
        data.insert("b".to_string(), serde_json::json!("2_3"));
        let first = adapter.insert(data).unwrap();

        // joins to the same raw text as the first tuple, but must derive a
        // distinct key
        let root = session.working_root("db").unwrap();
        let adapter = alterable(&session, &root);
        let mut data = BTreeMap::new();
        data.insert("a".to_string(), serde_json::json!("1_2"));
        data.insert("b".to_string(), serde_json::json!("3"));
        let second = adapter.insert(data).unwrap();

        assert_ne!(first.key, second.key);

        let root = session.working_root("db").unwrap();
        let snapshot = root.get_table("t").unwrap().unwrap();
        assert_eq!(snapshot.row_count, 2);
        assert!(snapshot.get_row(&first.key).unwrap().is_some());
        assert!(snapshot.get_row(&second.key).unwrap().is_some());
    }

    #[test]
    fn test_update_and_delete() {
        let (_dir, session, root) = setup_with_table(plain_schema());
        let adapter = alterable(&session, &root);

        let mut data = BTreeMap::new();
        data.insert("id".to_string(), serde_json::json!(1));
        data.insert("name".to_string(), serde_json::json!("Alice"));
        let mut row = adapter.insert(data).unwrap();

        // re-resolve against the published root
        let root = session.working_root("db").unwrap();
        let adapter = alterable(&session, &root);
        row.set("name", serde_json::json!("Bob"));
        adapter.update(row.clone()).unwrap();

        let root = session.working_root("db").unwrap();
        let fetched = root
            .get_table("t")
            .unwrap()
            .unwrap()
            .get_row(&row.key)
            .unwrap()
            .unwrap();
        assert_eq!(fetched.get("name"), Some(&serde_json::json!("Bob")));

        let adapter = alterable(&session, &root);
        adapter.delete(&row.key).unwrap();
        let root = session.working_root("db").unwrap();
        assert_eq!(root.get_table("t").unwrap().unwrap().row_count, 0);

        let adapter = alterable(&session, &root);
        let missing = adapter.delete(&row.key);
        assert!(matches!(missing, Err(StorageError::RowNotFound { .. })));
    }

    #[test]
    fn test_lock_to_root_pins_history() {
        let (_dir, session, root) = setup_with_table(plain_schema());
        let adapter = alterable(&session, &root);

        let mut data = BTreeMap::new();
        data.insert("id".to_string(), serde_json::json!(1));
        data.insert("name".to_string(), serde_json::json!("Alice"));
        adapter.insert(data).unwrap();

        let new_root = session.working_root("db").unwrap();
        let fresh = alterable(&session, &new_root);
        assert_eq!(fresh.row_count(), 1);

        // locked back to the original root, the table is empty again
        let locked = fresh.lock_to_root(root).unwrap();
        assert_eq!(locked.row_count(), 0);
        assert!(locked.can_alter()); // variant is preserved
    }

    #[test]
    fn test_rename_column_preserves_tag() {
        let (_dir, session, root) = setup_with_table(plain_schema());
        let adapter = alterable(&session, &root);

        let tag_before = adapter.schema().get_column("name").unwrap().tag;
        adapter.rename_column("name", "full_name").unwrap();

        let root = session.working_root("db").unwrap();
        let schema = root.get_table("t").unwrap().unwrap().schema;
        assert!(schema.get_column("name").is_none());
        assert_eq!(schema.get_column("full_name").unwrap().tag, tag_before);
    }

    #[test]
    fn test_index_lifecycle() {
        let (_dir, session, root) = setup_with_table(plain_schema());
        let adapter = alterable(&session, &root);

        let index = IndexDef {
            name: "idx_name".to_string(),
            columns: vec![crate::schema::IndexColumn::new("name")],
            unique: false,
            fulltext: false,
        };
        adapter.add_index(index).unwrap();

        let root = session.working_root("db").unwrap();
        let adapter = alterable(&session, &root);
        assert_eq!(adapter.schema().indexes.len(), 1);

        adapter.drop_index("IDX_NAME").unwrap();
        let root = session.working_root("db").unwrap();
        assert!(root.get_table("t").unwrap().unwrap().schema.indexes.is_empty());
    }

    #[test]
    fn test_foreign_key_lifecycle() {
        let (_dir, session, root) = setup_with_table(plain_schema());
        let adapter = alterable(&session, &root);

        let fk = ForeignKey {
            name: "fk_other".to_string(),
            columns: vec!["id".to_string()],
            parent_table: "other".to_string(),
            parent_columns: vec!["id".to_string()],
        };
        adapter.add_foreign_key(fk.clone()).unwrap();

        let root = session.working_root("db").unwrap();
        let adapter = alterable(&session, &root);
        assert_eq!(adapter.schema().foreign_keys, vec![fk]);
        assert!(adapter.add_foreign_key(adapter.schema().foreign_keys[0].clone()).is_err());

        adapter.drop_foreign_key("FK_OTHER").unwrap();
        let root = session.working_root("db").unwrap();
        assert!(root.get_table("t").unwrap().unwrap().schema.foreign_keys.is_empty());
        let adapter = alterable(&session, &root);
        assert!(adapter.drop_foreign_key("fk_other").is_err());
    }

    #[test]
    fn test_writable_rejects_alter() {
        let (_dir, session, root) = setup_with_table(plain_schema());
        let snapshot = root.get_table("t").unwrap().unwrap();
        let adapter = TableAdapter::writable(
            snapshot,
            root,
            RootHandle::new(session, "db"),
            Arc::new(AutoIncrementTracker::new()),
        );

        assert!(adapter.can_write());
        assert!(!adapter.can_alter());
        assert!(adapter.rename_column("name", "x").is_err());
    }
}
