//! Root values: immutable snapshots of a whole database.
//!
//! A root value maps canonical table names to table snapshots and carries
//! the database-wide collation. Every mutator returns a new root; unchanged
//! table subtrees are shared between old and new roots by the object store.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::schema::{Collation, ColumnTag, Schema};
use crate::storage::blob::{self, Row};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::store::ObjectStore;
use crate::storage::tree::{
    create_empty_root, TableMeta, TreeHandle, TreeMutator, CONFLICTS_ENTRY, VIOLATIONS_ENTRY,
};
use crate::storage::types::{RowKey, TableName, TreeId};

/// Flags accepted by [`RootValue::remove_tables`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOpts {
    /// Permit dropping a table that other tables reference by foreign key.
    pub allow_fk_referenced: bool,
    /// Skip the merge-conflict artifact check.
    pub skip_conflict_check: bool,
    /// Also drop conflict artifacts instead of carrying them.
    pub drop_conflicts: bool,
    /// Also drop constraint violation artifacts.
    pub drop_violations: bool,
}

/// An immutable snapshot of a database: table name -> table snapshot plus
/// collation. Cheap to clone; identity is the underlying tree hash.
#[derive(Clone)]
pub struct RootValue {
    store: ObjectStore,
    tree: TreeId,
}

impl RootValue {
    pub(crate) fn new(store: ObjectStore, tree: TreeId) -> Self {
        Self { store, tree }
    }

    /// Create a fresh, empty root value in the store.
    pub fn empty(store: &ObjectStore) -> StorageResult<Self> {
        let tree = store.with_repo_mut(create_empty_root)?;
        Ok(Self::new(store.clone(), tree))
    }

    /// Materialize the root value of a tree that already exists.
    pub fn at(store: &ObjectStore, tree: TreeId) -> Self {
        Self::new(store.clone(), tree)
    }

    /// An empty root in the same store as `other`.
    pub fn empty_like(other: &RootValue) -> StorageResult<Self> {
        Self::empty(&other.store)
    }

    /// The identity hash. Two roots with equal hashes are the same value.
    pub fn hash(&self) -> TreeId {
        self.tree
    }

    pub(crate) fn store(&self) -> &ObjectStore {
        &self.store
    }

    fn with_handle<T>(
        &self,
        f: impl FnOnce(&git2::Repository, &TreeHandle<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        self.store.with_repo(|repo| {
            let tree = repo.find_tree(self.tree.raw())?;
            let handle = TreeHandle::new(tree);
            f(repo, &handle)
        })
    }

    fn mutate(
        &self,
        f: impl FnOnce(&git2::Repository, &mut TreeMutator<'_>) -> StorageResult<()>,
    ) -> StorageResult<Self> {
        let new_tree = self.store.with_repo_mut(|repo| {
            let tree = repo.find_tree(self.tree.raw())?;
            let handle = TreeHandle::new(tree);
            let mut mutator = TreeMutator::from_tree(repo, &handle)?;
            f(repo, &mut mutator)?;
            mutator.write()
        })?;
        Ok(Self::new(self.store.clone(), new_tree))
    }

    /// Case-sensitive existence check against canonical names.
    pub fn has_table(&self, name: &str) -> StorageResult<bool> {
        let table = match TableName::new(name) {
            Ok(t) => t,
            Err(_) => return Ok(false),
        };
        self.with_handle(|_, handle| Ok(handle.table_exists(&table)))
    }

    /// Canonical table names, in stable (byte-sorted) order.
    pub fn table_names(&self) -> StorageResult<Vec<String>> {
        self.with_handle(|_, handle| {
            Ok(handle
                .list_tables()
                .into_iter()
                .map(TableName::into_string)
                .collect())
        })
    }

    /// Case-insensitive lookup. Returns the snapshot under its canonical
    /// name, or `None` when no table matches.
    pub fn get_table(&self, name: &str) -> StorageResult<Option<TableSnapshot>> {
        self.with_handle(|repo, handle| {
            let canonical = match handle.find_table_insensitive(name) {
                Some(t) => t,
                None => return Ok(None),
            };
            let meta = handle.table_meta(repo, &canonical)?;
            let row_count = handle.list_rows(repo, &canonical)?.len();
            let tree_id = handle.table_tree_id(&canonical).ok_or_else(|| {
                StorageError::TableNotFound(canonical.clone())
            })?;
            Ok(Some(TableSnapshot {
                root: self.clone(),
                name: canonical,
                schema: meta.schema,
                auto_increment: meta.auto_increment,
                row_count,
                tree_id,
            }))
        })
    }

    /// Find which table, if any, owns a column tag. Supports the invariant
    /// that tags are unique across the whole database.
    pub fn get_table_by_col_tag(&self, tag: ColumnTag) -> StorageResult<Option<String>> {
        self.with_handle(|repo, handle| {
            for table in handle.list_tables() {
                let meta = handle.table_meta(repo, &table)?;
                if meta.schema.tags().contains(&tag) {
                    return Ok(Some(table.into_string()));
                }
            }
            Ok(None)
        })
    }

    /// Create an empty table. Rejects duplicate names and any schema tag
    /// already owned by a *different* table, listing every conflict.
    pub fn create_empty_table(&self, name: &str, schema: Schema) -> StorageResult<Self> {
        let table = TableName::new(name)?;

        let conflicting = self.with_handle(|repo, handle| {
            if handle.find_table_insensitive(name).is_some() {
                return Err(StorageError::TableAlreadyExists(table.clone()));
            }
            let mut conflicting = Vec::new();
            for existing in handle.list_tables() {
                let meta = handle.table_meta(repo, &existing)?;
                for tag in meta.schema.tags() {
                    if schema.tags().contains(&tag) {
                        conflicting.push(tag);
                    }
                }
            }
            conflicting.sort_unstable();
            Ok(conflicting)
        })?;

        if !conflicting.is_empty() {
            return Err(StorageError::TagsInUse {
                table,
                tags: conflicting,
            });
        }

        let meta = TableMeta {
            schema,
            auto_increment: None,
        };
        self.mutate(|_, mutator| mutator.create_table(&table, &meta))
    }

    /// Remove tables. Honors the fk-reference and conflict-check flags.
    pub fn remove_tables(&self, names: &[&str], opts: RemoveOpts) -> StorageResult<Self> {
        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let snapshot = match self.get_table(name)? {
                Some(snapshot) => snapshot,
                None => return Err(StorageError::TableNotFound(TableName::new(*name)?)),
            };
            tables.push(snapshot);
        }

        let dropped: Vec<String> = tables.iter().map(|t| t.name.as_str().to_string()).collect();

        if !opts.allow_fk_referenced {
            // scan remaining tables for foreign keys referencing a dropped one
            self.with_handle(|repo, handle| {
                for other in handle.list_tables() {
                    if dropped.iter().any(|d| other.matches_insensitive(d)) {
                        continue;
                    }
                    let meta = handle.table_meta(repo, &other)?;
                    for fk in &meta.schema.foreign_keys {
                        if dropped
                            .iter()
                            .any(|d| d.eq_ignore_ascii_case(&fk.parent_table))
                        {
                            return Err(StorageError::ForeignKeyReferenced {
                                table: TableName::new(fk.parent_table.clone())?,
                                fk: fk.name.clone(),
                            });
                        }
                    }
                }
                Ok(())
            })?;
        }

        if !opts.skip_conflict_check {
            for snapshot in &tables {
                if snapshot.has_conflicts()? {
                    return Err(StorageError::TableHasConflicts(snapshot.name.clone()));
                }
            }
        }

        self.mutate(|_, mutator| {
            for snapshot in &tables {
                if opts.drop_conflicts {
                    mutator.clear_section(&snapshot.name, CONFLICTS_ENTRY)?;
                }
                if opts.drop_violations {
                    mutator.clear_section(&snapshot.name, VIOLATIONS_ENTRY)?;
                }
                mutator.drop_table(&snapshot.name)?;
            }
            Ok(())
        })
    }

    /// Rename a table, preserving its rows, metadata and artifacts.
    pub fn rename_table(&self, old: &str, new: &str) -> StorageResult<Self> {
        let old_canonical = match self.get_table(old)? {
            Some(snapshot) => snapshot.name,
            None => return Err(StorageError::TableNotFound(TableName::new(old)?)),
        };
        let new_name = TableName::new(new)?;
        self.mutate(|_, mutator| mutator.rename_table(&old_canonical, &new_name))
    }

    /// Replace a table's schema and auto-increment hint.
    pub fn set_table_meta(
        &self,
        name: &str,
        schema: Schema,
        auto_increment: Option<u64>,
    ) -> StorageResult<Self> {
        let canonical = match self.get_table(name)? {
            Some(snapshot) => snapshot.name,
            None => return Err(StorageError::TableNotFound(TableName::new(name)?)),
        };
        let meta = TableMeta {
            schema,
            auto_increment,
        };
        self.mutate(|_, mutator| mutator.set_table_meta(&canonical, &meta))
    }

    /// Write (insert or replace) a row.
    pub fn put_row(&self, name: &str, row: Row) -> StorageResult<Self> {
        let canonical = match self.get_table(name)? {
            Some(snapshot) => snapshot.name,
            None => return Err(StorageError::TableNotFound(TableName::new(name)?)),
        };
        self.mutate(|repo, mutator| {
            let blob_id = blob::write_row_blob(repo, &row)?;
            mutator.upsert_row(&canonical, &row.key, blob_id)
        })
    }

    /// Delete a row; fails if it does not exist.
    pub fn delete_row(&self, name: &str, key: &RowKey) -> StorageResult<Self> {
        let canonical = match self.get_table(name)? {
            Some(snapshot) => snapshot.name,
            None => return Err(StorageError::TableNotFound(TableName::new(name)?)),
        };
        self.mutate(|_, mutator| mutator.delete_row(&canonical, key))
    }

    /// Attach a merge conflict artifact to a table (written by the merge
    /// path; read back by the conflicts tables).
    pub fn put_conflict_artifact(
        &self,
        name: &str,
        key: &RowKey,
        artifact: &Value,
    ) -> StorageResult<Self> {
        let canonical = match self.get_table(name)? {
            Some(snapshot) => snapshot.name,
            None => return Err(StorageError::TableNotFound(TableName::new(name)?)),
        };
        self.mutate(|repo, mutator| {
            let blob_id = blob::write_json_blob(repo, artifact)?;
            mutator.upsert_conflict(&canonical, key, blob_id)
        })
    }

    /// Attach a constraint violation artifact to a table.
    pub fn put_violation_artifact(
        &self,
        name: &str,
        key: &RowKey,
        artifact: &Value,
    ) -> StorageResult<Self> {
        let canonical = match self.get_table(name)? {
            Some(snapshot) => snapshot.name,
            None => return Err(StorageError::TableNotFound(TableName::new(name)?)),
        };
        self.mutate(|repo, mutator| {
            let blob_id = blob::write_json_blob(repo, artifact)?;
            mutator.upsert_violation(&canonical, key, blob_id)
        })
    }

    pub fn collation(&self) -> StorageResult<Collation> {
        self.with_handle(|repo, handle| match handle.collation_json(repo)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Collation::default()),
        })
    }

    pub fn set_collation(&self, collation: &Collation) -> StorageResult<Self> {
        let bytes = serde_json::to_vec(collation)?;
        self.mutate(|_, mutator| mutator.set_collation_blob(&bytes))
    }
}

impl std::fmt::Debug for RootValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootValue").field("tree", &self.tree).finish()
    }
}

impl PartialEq for RootValue {
    fn eq(&self, other: &Self) -> bool {
        self.tree == other.tree
    }
}

impl Eq for RootValue {}

/// A table at a point in history: name, schema, row data, and the
/// auto-increment hint recorded at the last write.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    root: RootValue,
    pub name: TableName,
    pub schema: Schema,
    pub auto_increment: Option<u64>,
    pub row_count: usize,
    tree_id: TreeId,
}

impl TableSnapshot {
    /// Identity of the table's subtree; differs whenever schema, rows or
    /// artifacts changed.
    pub fn tree_hash(&self) -> TreeId {
        self.tree_id
    }

    pub fn row_keys(&self) -> StorageResult<Vec<RowKey>> {
        self.root
            .with_handle(|repo, handle| handle.list_rows(repo, &self.name))
    }

    pub fn get_row(&self, key: &RowKey) -> StorageResult<Option<Row>> {
        self.root.with_handle(|repo, handle| {
            let blob_id = match handle.row_blob_id(repo, &self.name, key)? {
                Some(id) => id,
                None => return Ok(None),
            };
            let bytes = blob::read_blob(repo, blob_id)?;
            Ok(Some(blob::deserialize_row(&bytes, key)?))
        })
    }

    /// All rows, ordered by key. Reads everything into memory.
    pub fn rows(&self) -> StorageResult<Vec<Row>> {
        self.root.with_handle(|repo, handle| {
            let keys = handle.list_rows(repo, &self.name)?;
            let mut rows = Vec::with_capacity(keys.len());
            for key in keys {
                let blob_id = handle.row_blob_id(repo, &self.name, &key)?.ok_or_else(|| {
                    StorageError::RowNotFound {
                        table: self.name.clone(),
                        key: key.clone(),
                    }
                })?;
                let bytes = blob::read_blob(repo, blob_id)?;
                rows.push(blob::deserialize_row(&bytes, &key)?);
            }
            Ok(rows)
        })
    }

    pub fn has_conflicts(&self) -> StorageResult<bool> {
        self.root
            .with_handle(|repo, handle| Ok(!handle.list_conflicts(repo, &self.name)?.is_empty()))
    }

    /// Merge conflict artifacts as raw JSON, keyed by row key.
    pub fn conflict_artifacts(&self) -> StorageResult<BTreeMap<RowKey, Value>> {
        self.artifacts(CONFLICTS_ENTRY)
    }

    /// Constraint violation artifacts as raw JSON, keyed by row key.
    pub fn violation_artifacts(&self) -> StorageResult<BTreeMap<RowKey, Value>> {
        self.artifacts(VIOLATIONS_ENTRY)
    }

    fn artifacts(&self, section: &str) -> StorageResult<BTreeMap<RowKey, Value>> {
        self.root.with_handle(|repo, handle| {
            let keys = match section {
                CONFLICTS_ENTRY => handle.list_conflicts(repo, &self.name)?,
                _ => handle.list_violations(repo, &self.name)?,
            };
            let mut result = BTreeMap::new();
            for key in keys {
                let blob_id = match section {
                    CONFLICTS_ENTRY => handle.conflict_blob_id(repo, &self.name, &key)?,
                    _ => handle.violation_blob_id(repo, &self.name, &key)?,
                };
                if let Some(id) = blob_id {
                    let bytes = blob::read_blob(repo, id)?;
                    result.insert(key, serde_json::from_slice(&bytes)?);
                }
            }
            Ok(result)
        })
    }

    /// Upper bound for the auto-increment counter implied by this snapshot:
    /// the stored hint or, failing that, one past the largest value present
    /// in the auto-increment column.
    pub fn auto_increment_ceiling(&self) -> StorageResult<Option<u64>> {
        let column = match self.schema.auto_increment_column() {
            Some(c) => c.name.clone(),
            None => return Ok(None),
        };

        if let Some(hint) = self.auto_increment {
            return Ok(Some(hint));
        }

        let mut max_seen: Option<u64> = None;
        for row in self.rows()? {
            if let Some(v) = row.get(&column).and_then(Value::as_u64) {
                max_seen = Some(max_seen.map_or(v, |m| m.max(v)));
            }
        }
        Ok(max_seen.map(|m| m + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, SchemaBuilder, SqlType};
    use tempfile::TempDir;

    fn setup() -> (TempDir, ObjectStore, RootValue) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::init(dir.path()).unwrap();
        let root = RootValue::empty(&store).unwrap();
        (dir, store, root)
    }

    fn users_schema() -> Schema {
        SchemaBuilder::new(1)
            .add_pk_column("id", SqlType::Int)
            .add_column("name", SqlType::Text)
            .build()
            .unwrap()
    }

    fn row(id: i64, name: &str) -> Row {
        let key = RowKey::new(id.to_string()).unwrap();
        let mut data = BTreeMap::new();
        data.insert("id".to_string(), serde_json::json!(id));
        data.insert("name".to_string(), serde_json::json!(name));
        Row::new(key, data)
    }

    #[test]
    fn test_create_and_lookup() {
        let (_dir, _store, root) = setup();

        let root = root.create_empty_table("Users", users_schema()).unwrap();
        assert!(root.has_table("Users").unwrap());
        assert!(!root.has_table("users").unwrap()); // has() is case-sensitive
        assert_eq!(root.table_names().unwrap(), vec!["Users"]);

        // get() is case-insensitive and reports the canonical name
        let snapshot = root.get_table("USERS").unwrap().unwrap();
        assert_eq!(snapshot.name.as_str(), "Users");
        assert_eq!(snapshot.row_count, 0);
    }

    #[test]
    fn test_mutators_return_new_roots() {
        let (_dir, _store, root) = setup();
        let root1 = root.create_empty_table("t", users_schema()).unwrap();
        assert_ne!(root.hash(), root1.hash());

        let root2 = root1.put_row("t", row(1, "Alice")).unwrap();
        assert_ne!(root1.hash(), root2.hash());

        // the original is untouched
        assert_eq!(root1.get_table("t").unwrap().unwrap().row_count, 0);
        assert_eq!(root2.get_table("t").unwrap().unwrap().row_count, 1);
    }

    #[test]
    fn test_tag_uniqueness_enforced() {
        let (_dir, _store, root) = setup();
        let root = root.create_empty_table("a", users_schema()).unwrap();

        // same tags, different table name
        let result = root.create_empty_table("b", users_schema());
        match result {
            Err(StorageError::TagsInUse { tags, .. }) => {
                assert_eq!(tags, vec![1, 2]); // every conflicting tag listed
            }
            other => panic!("expected TagsInUse, got {:?}", other.map(|r| r.hash())),
        }

        assert_eq!(root.get_table_by_col_tag(1).unwrap().as_deref(), Some("a"));
        assert_eq!(root.get_table_by_col_tag(99).unwrap(), None);
    }

    #[test]
    fn test_remove_tables() {
        let (_dir, _store, root) = setup();
        let root = root.create_empty_table("a", users_schema()).unwrap();
        let other = SchemaBuilder::new(10)
            .add_pk_column("id", SqlType::Int)
            .build()
            .unwrap();
        let root = root.create_empty_table("b", other).unwrap();

        let root = root.remove_tables(&["a"], RemoveOpts::default()).unwrap();
        assert_eq!(root.table_names().unwrap(), vec!["b"]);

        let missing = root.remove_tables(&["a"], RemoveOpts::default());
        assert!(matches!(missing, Err(StorageError::TableNotFound(_))));
    }

    #[test]
    fn test_remove_respects_foreign_keys() {
        let (_dir, _store, root) = setup();
        let root = root.create_empty_table("parent", users_schema()).unwrap();

        let child_schema = SchemaBuilder::new(10)
            .add_pk_column("id", SqlType::Int)
            .add_column("parent_id", SqlType::Int)
            .build()
            .unwrap()
            .with_foreign_key(crate::schema::ForeignKey {
                name: "fk_parent".to_string(),
                columns: vec!["parent_id".to_string()],
                parent_table: "parent".to_string(),
                parent_columns: vec!["id".to_string()],
            });
        let root = root.create_empty_table("child", child_schema).unwrap();

        let blocked = root.remove_tables(&["parent"], RemoveOpts::default());
        assert!(matches!(
            blocked,
            Err(StorageError::ForeignKeyReferenced { .. })
        ));

        let opts = RemoveOpts {
            allow_fk_referenced: true,
            ..Default::default()
        };
        let root = root.remove_tables(&["parent"], opts).unwrap();
        assert_eq!(root.table_names().unwrap(), vec!["child"]);
    }

    #[test]
    fn test_remove_respects_conflicts() {
        let (_dir, _store, root) = setup();
        let root = root.create_empty_table("t", users_schema()).unwrap();
        let key = RowKey::new("1").unwrap();
        let root = root
            .put_conflict_artifact("t", &key, &serde_json::json!({"ours": 1, "theirs": 2}))
            .unwrap();

        let blocked = root.remove_tables(&["t"], RemoveOpts::default());
        assert!(matches!(blocked, Err(StorageError::TableHasConflicts(_))));

        let opts = RemoveOpts {
            skip_conflict_check: true,
            drop_conflicts: true,
            ..Default::default()
        };
        let root = root.remove_tables(&["t"], opts).unwrap();
        assert!(root.table_names().unwrap().is_empty());
    }

    #[test]
    fn test_row_roundtrip_and_delete() {
        let (_dir, _store, root) = setup();
        let root = root.create_empty_table("t", users_schema()).unwrap();
        let root = root.put_row("t", row(1, "Alice")).unwrap();
        let root = root.put_row("t", row(2, "Bob")).unwrap();

        let snapshot = root.get_table("t").unwrap().unwrap();
        let rows = snapshot.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some(&serde_json::json!("Alice")));

        let key = RowKey::new("1").unwrap();
        let fetched = snapshot.get_row(&key).unwrap().unwrap();
        assert_eq!(fetched.get("id"), Some(&serde_json::json!(1)));

        let root = root.delete_row("t", &key).unwrap();
        let snapshot = root.get_table("t").unwrap().unwrap();
        assert_eq!(snapshot.row_count, 1);
        assert!(snapshot.get_row(&key).unwrap().is_none());

        let missing = root.delete_row("t", &key);
        assert!(matches!(missing, Err(StorageError::RowNotFound { .. })));
    }

    #[test]
    fn test_collation() {
        let (_dir, _store, root) = setup();
        assert_eq!(root.collation().unwrap(), Collation::default());

        let custom = Collation::new("utf8mb4_general_ci");
        let root2 = root.set_collation(&custom).unwrap();
        assert_eq!(root2.collation().unwrap(), custom);
        assert_ne!(root.hash(), root2.hash());
    }

    #[test]
    fn test_auto_increment_ceiling() {
        let (_dir, _store, root) = setup();
        let schema = SchemaBuilder::new(1)
            .column(Column::new(1, "id", SqlType::UInt).primary_key().auto_increment())
            .add_column("v", SqlType::Text)
            .build()
            .unwrap();
        let root = root.create_empty_table("t", schema.clone()).unwrap();

        // no rows, no hint
        let snapshot = root.get_table("t").unwrap().unwrap();
        assert_eq!(snapshot.auto_increment_ceiling().unwrap(), None);

        // rows imply max+1
        let mut data = BTreeMap::new();
        data.insert("id".to_string(), serde_json::json!(7));
        let root2 = root
            .put_row("t", Row::new(RowKey::new("7").unwrap(), data))
            .unwrap();
        let snapshot = root2.get_table("t").unwrap().unwrap();
        assert_eq!(snapshot.auto_increment_ceiling().unwrap(), Some(8));

        // an explicit hint wins
        let root3 = root2.set_table_meta("t", schema, Some(50)).unwrap();
        let snapshot = root3.get_table("t").unwrap().unwrap();
        assert_eq!(snapshot.auto_increment_ceiling().unwrap(), Some(50));
    }
}
