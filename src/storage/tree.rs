//! Tree operations over the root value layout.
//!
//! A root value is a git tree. Layout:
//!
//! ```text
//! .collation              blob, JSON collation identifier
//! <table>/
//!   schema.json           blob, TableMeta (schema + auto-increment hint)
//!   rows/<key>.json       row blobs
//!   conflicts/<key>.json  merge conflict artifacts (usually absent)
//!   violations/<key>.json constraint violation artifacts (usually absent)
//! ```
//!
//! `TreeHandle` is a read-only snapshot; `TreeMutator` accumulates changes
//! and produces a new tree, leaving the original untouched.

use git2::{FileMode, ObjectType, Repository, Tree, TreeBuilder as Git2TreeBuilder};
use serde::{Deserialize, Serialize};

use crate::schema::Schema;
use crate::storage::blob;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, RowKey, TableName, TreeId};

/// Blob holding the database-wide collation at the tree root.
pub const COLLATION_ENTRY: &str = ".collation";
/// Blob holding a table's schema and auto-increment hint.
pub const SCHEMA_ENTRY: &str = "schema.json";
/// Subtree holding a table's rows.
pub const ROWS_ENTRY: &str = "rows";
/// Subtree holding merge conflict artifacts.
pub const CONFLICTS_ENTRY: &str = "conflicts";
/// Subtree holding constraint violation artifacts.
pub const VIOLATIONS_ENTRY: &str = "violations";

/// Serialized form of a table's non-row state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub schema: Schema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_increment: Option<u64>,
}

/// A read-only handle to a git tree. Think of it as a snapshot - it won't
/// change even if new commits are made.
#[derive(Debug)]
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    pub fn id(&self) -> TreeId {
        TreeId::new(self.tree.id())
    }

    pub(crate) fn inner(&self) -> &Tree<'repo> {
        &self.tree
    }

    /// List all tables, in entry order (git sorts entries by name).
    pub fn list_tables(&self) -> Vec<TableName> {
        self.tree
            .iter()
            .filter_map(|entry| {
                if entry.kind() != Some(ObjectType::Tree) {
                    return None;
                }
                let name = entry.name()?;
                if name.starts_with('.') {
                    return None;
                }
                TableName::new(name).ok()
            })
            .collect()
    }

    pub fn table_exists(&self, table: &TableName) -> bool {
        self.tree
            .get_name(table.as_str())
            .map(|entry| entry.kind() == Some(ObjectType::Tree))
            .unwrap_or(false)
    }

    /// Case-insensitive table lookup, returning the canonical name.
    pub fn find_table_insensitive(&self, name: &str) -> Option<TableName> {
        self.list_tables()
            .into_iter()
            .find(|t| t.matches_insensitive(name))
    }

    fn table_tree(
        &self,
        repo: &'repo Repository,
        table: &TableName,
    ) -> StorageResult<Option<Tree<'repo>>> {
        match self.tree.get_name(table.as_str()) {
            Some(entry) => {
                if entry.kind() != Some(ObjectType::Tree) {
                    return Err(StorageError::UnexpectedEntryType {
                        path: table.as_str().into(),
                        expected: "tree (directory)".to_string(),
                        found: format!("{:?}", entry.kind()),
                    });
                }
                Ok(Some(repo.find_tree(entry.id())?))
            }
            None => Ok(None),
        }
    }

    /// Identity hash of a table's subtree, used to detect per-table changes
    /// between roots without comparing rows.
    pub fn table_tree_id(&self, table: &TableName) -> Option<TreeId> {
        self.tree
            .get_name(table.as_str())
            .filter(|e| e.kind() == Some(ObjectType::Tree))
            .map(|e| TreeId::new(e.id()))
    }

    /// Read a table's metadata blob.
    pub fn table_meta(&self, repo: &Repository, table: &TableName) -> StorageResult<TableMeta> {
        let table_tree = self
            .table_tree(repo, table)?
            .ok_or_else(|| StorageError::TableNotFound(table.clone()))?;

        let entry = table_tree.get_name(SCHEMA_ENTRY).ok_or_else(|| {
            StorageError::CorruptedData {
                path: format!("{}/{}", table, SCHEMA_ENTRY).into(),
                reason: "missing table metadata".to_string(),
            }
        })?;

        let bytes = blob::read_blob(repo, BlobId::new(entry.id()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn section_tree(
        &self,
        repo: &'repo Repository,
        table: &TableName,
        section: &str,
    ) -> StorageResult<Option<Tree<'repo>>> {
        let table_tree = match self.table_tree(repo, table)? {
            Some(t) => t,
            None => return Err(StorageError::TableNotFound(table.clone())),
        };
        let result = match table_tree.get_name(section) {
            Some(entry) if entry.kind() == Some(ObjectType::Tree) => {
                Ok(Some(repo.find_tree(entry.id())?))
            }
            _ => Ok(None),
        };
        result
    }

    fn list_section_keys(
        &self,
        repo: &Repository,
        table: &TableName,
        section: &str,
    ) -> StorageResult<Vec<RowKey>> {
        let tree = match self.section_tree(repo, table, section)? {
            Some(t) => t,
            None => return Ok(Vec::new()),
        };

        Ok(tree
            .iter()
            .filter_map(|entry| {
                if entry.kind() != Some(ObjectType::Blob) {
                    return None;
                }
                let key_str = entry.name()?.strip_suffix(".json")?;
                RowKey::new(key_str).ok()
            })
            .collect())
    }

    pub fn list_rows(&self, repo: &Repository, table: &TableName) -> StorageResult<Vec<RowKey>> {
        self.list_section_keys(repo, table, ROWS_ENTRY)
    }

    pub fn list_conflicts(
        &self,
        repo: &Repository,
        table: &TableName,
    ) -> StorageResult<Vec<RowKey>> {
        self.list_section_keys(repo, table, CONFLICTS_ENTRY)
    }

    pub fn list_violations(
        &self,
        repo: &Repository,
        table: &TableName,
    ) -> StorageResult<Vec<RowKey>> {
        self.list_section_keys(repo, table, VIOLATIONS_ENTRY)
    }

    fn section_blob_id(
        &self,
        repo: &Repository,
        table: &TableName,
        section: &str,
        key: &RowKey,
    ) -> StorageResult<Option<BlobId>> {
        let tree = match self.section_tree(repo, table, section)? {
            Some(t) => t,
            None => return Ok(None),
        };
        let filename = format!("{}.json", key);
        let result = match tree.get_name(&filename) {
            Some(entry) if entry.kind() == Some(ObjectType::Blob) => {
                Ok(Some(BlobId::new(entry.id())))
            }
            Some(entry) => Err(StorageError::UnexpectedEntryType {
                path: format!("{}/{}/{}", table, section, filename).into(),
                expected: "blob (file)".to_string(),
                found: format!("{:?}", entry.kind()),
            }),
            None => Ok(None),
        };
        result
    }

    pub fn row_blob_id(
        &self,
        repo: &Repository,
        table: &TableName,
        key: &RowKey,
    ) -> StorageResult<Option<BlobId>> {
        self.section_blob_id(repo, table, ROWS_ENTRY, key)
    }

    pub fn conflict_blob_id(
        &self,
        repo: &Repository,
        table: &TableName,
        key: &RowKey,
    ) -> StorageResult<Option<BlobId>> {
        self.section_blob_id(repo, table, CONFLICTS_ENTRY, key)
    }

    pub fn violation_blob_id(
        &self,
        repo: &Repository,
        table: &TableName,
        key: &RowKey,
    ) -> StorageResult<Option<BlobId>> {
        self.section_blob_id(repo, table, VIOLATIONS_ENTRY, key)
    }

    pub fn row_exists(
        &self,
        repo: &Repository,
        table: &TableName,
        key: &RowKey,
    ) -> StorageResult<bool> {
        Ok(self.row_blob_id(repo, table, key)?.is_some())
    }

    /// Read the collation blob; missing means default.
    pub fn collation_json(&self, repo: &Repository) -> StorageResult<Option<Vec<u8>>> {
        match self.tree.get_name(COLLATION_ENTRY) {
            Some(entry) if entry.kind() == Some(ObjectType::Blob) => {
                Ok(Some(blob::read_blob(repo, BlobId::new(entry.id()))?))
            }
            _ => Ok(None),
        }
    }
}

/// A mutable tree builder for making changes. Accumulates mutations against
/// a base tree and produces a new tree on `write()`; the base is never
/// modified, so unchanged subtrees are shared between old and new roots.
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    root_builder: Git2TreeBuilder<'repo>,
}

impl<'repo> TreeMutator<'repo> {
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'_>) -> StorageResult<Self> {
        let root_builder = repo.treebuilder(Some(tree.inner()))?;
        Ok(Self { repo, root_builder })
    }

    pub fn empty(repo: &'repo Repository) -> StorageResult<Self> {
        let root_builder = repo.treebuilder(None)?;
        Ok(Self { repo, root_builder })
    }

    fn current_table_tree(&self, table: &TableName) -> StorageResult<Option<Tree<'repo>>> {
        match self.root_builder.get(table.as_str())? {
            Some(entry) if entry.kind() == Some(ObjectType::Tree) => {
                Ok(Some(self.repo.find_tree(entry.id())?))
            }
            _ => Ok(None),
        }
    }

    fn table_builder(&self, table: &TableName) -> StorageResult<Git2TreeBuilder<'repo>> {
        match self.current_table_tree(table)? {
            Some(tree) => Ok(self.repo.treebuilder(Some(&tree))?),
            None => Ok(self.repo.treebuilder(None)?),
        }
    }

    fn require_table(&self, table: &TableName) -> StorageResult<()> {
        if self.current_table_tree(table)?.is_none() {
            return Err(StorageError::TableNotFound(table.clone()));
        }
        Ok(())
    }

    /// Create a table with the given metadata and an empty rows subtree.
    pub fn create_table(&mut self, table: &TableName, meta: &TableMeta) -> StorageResult<()> {
        if self.current_table_tree(table)?.is_some() {
            return Err(StorageError::TableAlreadyExists(table.clone()));
        }

        let meta_blob = blob::write_json_blob(self.repo, meta)?;
        let empty_rows = self.repo.treebuilder(None)?.write()?;

        let mut table_builder = self.repo.treebuilder(None)?;
        table_builder.insert(SCHEMA_ENTRY, meta_blob.raw(), FileMode::Blob.into())?;
        table_builder.insert(ROWS_ENTRY, empty_rows, FileMode::Tree.into())?;
        let table_tree_id = table_builder.write()?;

        self.root_builder
            .insert(table.as_str(), table_tree_id, FileMode::Tree.into())?;
        Ok(())
    }

    pub fn drop_table(&mut self, table: &TableName) -> StorageResult<()> {
        self.require_table(table)?;
        self.root_builder.remove(table.as_str())?;
        Ok(())
    }

    /// Move a table's subtree to a new name, preserving rows and metadata.
    pub fn rename_table(&mut self, old: &TableName, new: &TableName) -> StorageResult<()> {
        let tree = self
            .current_table_tree(old)?
            .ok_or_else(|| StorageError::TableNotFound(old.clone()))?;
        if self.current_table_tree(new)?.is_some() {
            return Err(StorageError::TableAlreadyExists(new.clone()));
        }

        self.root_builder
            .insert(new.as_str(), tree.id(), FileMode::Tree.into())?;
        self.root_builder.remove(old.as_str())?;
        Ok(())
    }

    /// Replace a table's metadata blob.
    pub fn set_table_meta(&mut self, table: &TableName, meta: &TableMeta) -> StorageResult<()> {
        self.require_table(table)?;
        let meta_blob = blob::write_json_blob(self.repo, meta)?;

        let mut table_builder = self.table_builder(table)?;
        table_builder.insert(SCHEMA_ENTRY, meta_blob.raw(), FileMode::Blob.into())?;
        let table_tree_id = table_builder.write()?;
        self.root_builder
            .insert(table.as_str(), table_tree_id, FileMode::Tree.into())?;
        Ok(())
    }

    fn section_builder(
        &self,
        table_tree: Option<&Tree<'repo>>,
        section: &str,
    ) -> StorageResult<Git2TreeBuilder<'repo>> {
        let base = match table_tree {
            Some(t) => match t.get_name(section) {
                Some(entry) if entry.kind() == Some(ObjectType::Tree) => {
                    Some(self.repo.find_tree(entry.id())?)
                }
                _ => None,
            },
            None => None,
        };
        match base {
            Some(tree) => Ok(self.repo.treebuilder(Some(&tree))?),
            None => Ok(self.repo.treebuilder(None)?),
        }
    }

    fn write_section_entry(
        &mut self,
        table: &TableName,
        section: &str,
        key: &RowKey,
        blob_id: Option<BlobId>,
    ) -> StorageResult<()> {
        let table_tree = self
            .current_table_tree(table)?
            .ok_or_else(|| StorageError::TableNotFound(table.clone()))?;

        let mut section_builder = self.section_builder(Some(&table_tree), section)?;
        let filename = format!("{}.json", key);
        match blob_id {
            Some(id) => {
                section_builder.insert(&filename, id.raw(), FileMode::Blob.into())?;
            }
            None => {
                section_builder
                    .remove(&filename)
                    .map_err(|_| StorageError::RowNotFound {
                        table: table.clone(),
                        key: key.clone(),
                    })?;
            }
        }
        let section_tree_id = section_builder.write()?;

        let mut table_builder = self.repo.treebuilder(Some(&table_tree))?;
        table_builder.insert(section, section_tree_id, FileMode::Tree.into())?;
        let table_tree_id = table_builder.write()?;
        self.root_builder
            .insert(table.as_str(), table_tree_id, FileMode::Tree.into())?;
        Ok(())
    }

    pub fn upsert_row(
        &mut self,
        table: &TableName,
        key: &RowKey,
        blob_id: BlobId,
    ) -> StorageResult<()> {
        self.write_section_entry(table, ROWS_ENTRY, key, Some(blob_id))
    }

    pub fn delete_row(&mut self, table: &TableName, key: &RowKey) -> StorageResult<()> {
        self.write_section_entry(table, ROWS_ENTRY, key, None)
    }

    pub fn upsert_conflict(
        &mut self,
        table: &TableName,
        key: &RowKey,
        blob_id: BlobId,
    ) -> StorageResult<()> {
        self.write_section_entry(table, CONFLICTS_ENTRY, key, Some(blob_id))
    }

    pub fn upsert_violation(
        &mut self,
        table: &TableName,
        key: &RowKey,
        blob_id: BlobId,
    ) -> StorageResult<()> {
        self.write_section_entry(table, VIOLATIONS_ENTRY, key, Some(blob_id))
    }

    /// Drop every artifact of a section for a table (used by the remove
    /// flags that clear conflicts or violations).
    pub fn clear_section(&mut self, table: &TableName, section: &str) -> StorageResult<()> {
        let table_tree = self
            .current_table_tree(table)?
            .ok_or_else(|| StorageError::TableNotFound(table.clone()))?;

        if table_tree.get_name(section).is_none() {
            return Ok(());
        }

        let mut table_builder = self.repo.treebuilder(Some(&table_tree))?;
        table_builder.remove(section)?;
        let table_tree_id = table_builder.write()?;
        self.root_builder
            .insert(table.as_str(), table_tree_id, FileMode::Tree.into())?;
        Ok(())
    }

    pub fn set_collation_blob(&mut self, bytes: &[u8]) -> StorageResult<()> {
        let oid = self.repo.blob(bytes)?;
        self.root_builder
            .insert(COLLATION_ENTRY, oid, FileMode::Blob.into())?;
        Ok(())
    }

    /// Write all changes and return the new root tree ID.
    pub fn write(self) -> StorageResult<TreeId> {
        let root_id = self.root_builder.write()?;
        Ok(TreeId::new(root_id))
    }
}

/// Create an empty root tree (the tree of a fresh database's first commit).
pub fn create_empty_root(repo: &Repository) -> StorageResult<TreeId> {
    let builder = TreeMutator::empty(repo)?;
    builder.write()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaBuilder, SqlType};
    use crate::storage::blob::{write_row_blob, Row};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn sample_meta() -> TableMeta {
        TableMeta {
            schema: SchemaBuilder::new(1)
                .add_pk_column("id", SqlType::Int)
                .add_column("name", SqlType::Text)
                .build()
                .unwrap(),
            auto_increment: None,
        }
    }

    fn handle_at<'r>(repo: &'r Repository, id: TreeId) -> TreeHandle<'r> {
        TreeHandle::new(repo.find_tree(id.raw()).unwrap())
    }

    #[test]
    fn test_create_and_list_tables() {
        let (_dir, repo) = setup_repo();
        let root = create_empty_root(&repo).unwrap();
        let handle = handle_at(&repo, root);
        assert!(handle.list_tables().is_empty());

        let mut mutator = TreeMutator::from_tree(&repo, &handle).unwrap();
        let table = TableName::new("users").unwrap();
        mutator.create_table(&table, &sample_meta()).unwrap();
        let new_root = mutator.write().unwrap();

        let handle = handle_at(&repo, new_root);
        let tables = handle.list_tables();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].as_str(), "users");
        assert!(handle.table_exists(&table));

        let meta = handle.table_meta(&repo, &table).unwrap();
        assert_eq!(meta.schema.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let (_dir, repo) = setup_repo();
        let root = create_empty_root(&repo).unwrap();
        let handle = handle_at(&repo, root);

        let mut mutator = TreeMutator::from_tree(&repo, &handle).unwrap();
        let table = TableName::new("users").unwrap();
        mutator.create_table(&table, &sample_meta()).unwrap();
        let result = mutator.create_table(&table, &sample_meta());
        assert!(matches!(result, Err(StorageError::TableAlreadyExists(_))));
    }

    #[test]
    fn test_row_roundtrip() {
        let (_dir, repo) = setup_repo();
        let root = create_empty_root(&repo).unwrap();
        let handle = handle_at(&repo, root);

        let table = TableName::new("users").unwrap();
        let mut mutator = TreeMutator::from_tree(&repo, &handle).unwrap();
        mutator.create_table(&table, &sample_meta()).unwrap();

        let key = RowKey::new("1").unwrap();
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), serde_json::json!("Alice"));
        let row = Row::new(key.clone(), data);
        let blob_id = write_row_blob(&repo, &row).unwrap();
        mutator.upsert_row(&table, &key, blob_id).unwrap();
        let root = mutator.write().unwrap();

        let handle = handle_at(&repo, root);
        let keys = handle.list_rows(&repo, &table).unwrap();
        assert_eq!(keys, vec![key.clone()]);
        assert!(handle.row_exists(&repo, &table, &key).unwrap());

        // delete
        let mut mutator = TreeMutator::from_tree(&repo, &handle).unwrap();
        mutator.delete_row(&table, &key).unwrap();
        let root = mutator.write().unwrap();
        let handle = handle_at(&repo, root);
        assert!(handle.list_rows(&repo, &table).unwrap().is_empty());
    }

    #[test]
    fn test_rename_preserves_rows() {
        let (_dir, repo) = setup_repo();
        let root = create_empty_root(&repo).unwrap();
        let handle = handle_at(&repo, root);

        let old = TableName::new("users").unwrap();
        let new = TableName::new("people").unwrap();
        let key = RowKey::new("1").unwrap();

        let mut mutator = TreeMutator::from_tree(&repo, &handle).unwrap();
        mutator.create_table(&old, &sample_meta()).unwrap();
        let blob_id = write_row_blob(&repo, &Row::new(key.clone(), BTreeMap::new())).unwrap();
        mutator.upsert_row(&old, &key, blob_id).unwrap();
        mutator.rename_table(&old, &new).unwrap();
        let root = mutator.write().unwrap();

        let handle = handle_at(&repo, root);
        assert!(!handle.table_exists(&old));
        assert!(handle.table_exists(&new));
        assert_eq!(handle.list_rows(&repo, &new).unwrap(), vec![key]);
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let (_dir, repo) = setup_repo();
        let root = create_empty_root(&repo).unwrap();
        let handle = handle_at(&repo, root);

        let mut mutator = TreeMutator::from_tree(&repo, &handle).unwrap();
        let table = TableName::new("Users").unwrap();
        mutator.create_table(&table, &sample_meta()).unwrap();
        let root = mutator.write().unwrap();

        let handle = handle_at(&repo, root);
        let found = handle.find_table_insensitive("USERS").unwrap();
        assert_eq!(found.as_str(), "Users");
        assert!(handle.find_table_insensitive("nothere").is_none());
    }

    #[test]
    fn test_collation_blob() {
        let (_dir, repo) = setup_repo();
        let root = create_empty_root(&repo).unwrap();
        let handle = handle_at(&repo, root);
        assert!(handle.collation_json(&repo).unwrap().is_none());

        let mut mutator = TreeMutator::from_tree(&repo, &handle).unwrap();
        mutator.set_collation_blob(b"\"utf8mb4_general_ci\"").unwrap();
        let root = mutator.write().unwrap();

        let handle = handle_at(&repo, root);
        let bytes = handle.collation_json(&repo).unwrap().unwrap();
        assert_eq!(bytes, b"\"utf8mb4_general_ci\"");
        // the collation blob is not a table
        assert!(handle.list_tables().is_empty());
    }

    #[test]
    fn test_structural_sharing() {
        let (_dir, repo) = setup_repo();
        let root = create_empty_root(&repo).unwrap();
        let handle = handle_at(&repo, root);

        let a = TableName::new("a").unwrap();
        let b = TableName::new("b").unwrap();
        let mut mutator = TreeMutator::from_tree(&repo, &handle).unwrap();
        mutator.create_table(&a, &sample_meta()).unwrap();
        mutator.create_table(&b, &sample_meta()).unwrap();
        let root1 = mutator.write().unwrap();

        // mutate only b; a's subtree id must be unchanged
        let handle1 = handle_at(&repo, root1);
        let a_tree_before = handle1.table_tree_id(&a).unwrap();
        let key = RowKey::new("1").unwrap();
        let blob_id = write_row_blob(&repo, &Row::new(key.clone(), BTreeMap::new())).unwrap();
        let mut mutator = TreeMutator::from_tree(&repo, &handle1).unwrap();
        mutator.upsert_row(&b, &key, blob_id).unwrap();
        let root2 = mutator.write().unwrap();

        let handle2 = handle_at(&repo, root2);
        assert_ne!(root1, root2);
        assert_eq!(handle2.table_tree_id(&a).unwrap(), a_tree_before);
        assert_ne!(
            handle2.table_tree_id(&b).unwrap(),
            handle1.table_tree_id(&b).unwrap()
        );
    }
}
