//! Working sets: the mutable edge of a branch.
//!
//! A working set ties a branch to two root values: `working` (dirty) and
//! `staged` (contents of the next commit), plus optional merge state. The
//! store keeps one entry per branch and guards updates with compare-and-swap
//! so concurrent sessions sharing a branch observe a retryable conflict
//! instead of lost updates.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::root::RootValue;
use crate::storage::store::ObjectStore;
use crate::storage::types::{BranchName, CommitId, TreeId};

/// Merge bookkeeping attached to a working set while a merge is underway.
#[derive(Debug, Clone)]
pub struct MergeState {
    pub source_commit: CommitId,
    /// Root value of the working set before the merge started.
    pub pre_merge_working: TreeId,
    pub unmerged_tables: Vec<String>,
    pub schema_conflicts: Vec<SchemaConflict>,
}

/// A table whose schema could not be merged automatically.
#[derive(Debug, Clone)]
pub struct SchemaConflict {
    pub table_name: String,
    pub base_schema: Value,
    pub our_schema: Value,
    pub their_schema: Value,
    pub description: String,
}

/// The working and staged roots of one branch.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    pub branch: BranchName,
    pub working: RootValue,
    pub staged: RootValue,
    pub merge_state: Option<MergeState>,
}

impl WorkingSet {
    /// A fresh working set where both roots equal the branch head's root.
    pub fn at_root(branch: BranchName, root: RootValue) -> Self {
        Self {
            branch,
            working: root.clone(),
            staged: root,
            merge_state: None,
        }
    }

    pub fn with_working(mut self, working: RootValue) -> Self {
        self.working = working;
        self
    }

    pub fn with_staged(mut self, staged: RootValue) -> Self {
        self.staged = staged;
        self
    }

    pub fn with_merge_state(mut self, merge_state: Option<MergeState>) -> Self {
        self.merge_state = merge_state;
        self
    }

    pub fn is_merge_active(&self) -> bool {
        self.merge_state.is_some()
    }
}

#[derive(Clone)]
struct StoredWorkingSet {
    working: TreeId,
    staged: TreeId,
    merge_state: Option<MergeState>,
}

/// In-process store of working sets, one per branch. Compare-and-swap
/// semantics on update: callers pass the working-root hash they read, and
/// lose with a retryable conflict if another session advanced it.
#[derive(Clone)]
pub struct WorkingSetStore {
    inner: Arc<RwLock<HashMap<String, StoredWorkingSet>>>,
}

impl WorkingSetStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn get(&self, store: &ObjectStore, branch: &BranchName) -> Option<WorkingSet> {
        let map = self.inner.read();
        let stored = map.get(branch.as_str())?;
        Some(WorkingSet {
            branch: branch.clone(),
            working: RootValue::at(store, stored.working),
            staged: RootValue::at(store, stored.staged),
            merge_state: stored.merge_state.clone(),
        })
    }

    pub fn contains(&self, branch: &BranchName) -> bool {
        self.inner.read().contains_key(branch.as_str())
    }

    /// Install a working set unconditionally (branch creation / checkout).
    pub fn install(&self, ws: &WorkingSet) {
        let mut map = self.inner.write();
        map.insert(
            ws.branch.as_str().to_string(),
            StoredWorkingSet {
                working: ws.working.hash(),
                staged: ws.staged.hash(),
                merge_state: ws.merge_state.clone(),
            },
        );
    }

    /// CAS update: succeeds only if the stored working-root hash still
    /// equals `expected_working`.
    pub fn update(&self, ws: &WorkingSet, expected_working: TreeId) -> StorageResult<()> {
        let mut map = self.inner.write();
        let entry = map.get_mut(ws.branch.as_str()).ok_or_else(|| {
            StorageError::RefNotFound(format!("working set for {}", ws.branch))
        })?;

        if entry.working != expected_working {
            return Err(StorageError::ConcurrentModification {
                target: format!("working set for {}", ws.branch),
            });
        }

        entry.working = ws.working.hash();
        entry.staged = ws.staged.hash();
        entry.merge_state = ws.merge_state.clone();
        Ok(())
    }

    /// Drop a branch's working set (branch deletion, detached transitions).
    pub fn remove(&self, branch: &BranchName) {
        self.inner.write().remove(branch.as_str());
    }

    /// Branch names with a live working set.
    pub fn branches(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for WorkingSetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ObjectStore, RootValue) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::init(dir.path()).unwrap();
        let root = RootValue::empty(&store).unwrap();
        (dir, store, root)
    }

    #[test]
    fn test_install_and_get() {
        let (_dir, store, root) = setup();
        let ws_store = WorkingSetStore::new();
        let branch = BranchName::main();

        assert!(ws_store.get(&store, &branch).is_none());

        let ws = WorkingSet::at_root(branch.clone(), root.clone());
        ws_store.install(&ws);

        let fetched = ws_store.get(&store, &branch).unwrap();
        assert_eq!(fetched.working.hash(), root.hash());
        assert_eq!(fetched.staged.hash(), root.hash());
        assert!(!fetched.is_merge_active());
    }

    #[test]
    fn test_cas_update() {
        let (_dir, store, root) = setup();
        let ws_store = WorkingSetStore::new();
        let branch = BranchName::main();

        let ws = WorkingSet::at_root(branch.clone(), root.clone());
        ws_store.install(&ws);

        let schema = crate::schema::SchemaBuilder::new(1)
            .add_pk_column("id", crate::schema::SqlType::Int)
            .build()
            .unwrap();
        let new_root = root.create_empty_table("t", schema).unwrap();

        let updated = ws.clone().with_working(new_root.clone());
        ws_store.update(&updated, root.hash()).unwrap();

        // a second update with the stale expected hash conflicts
        let stale = ws.with_working(new_root);
        let result = ws_store.update(&stale, root.hash());
        assert!(matches!(
            result,
            Err(StorageError::ConcurrentModification { .. })
        ));

        let fetched = ws_store.get(&store, &branch).unwrap();
        assert_ne!(fetched.working.hash(), root.hash());
    }

    #[test]
    fn test_remove_and_branches() {
        let (_dir, _store, root) = setup();
        let ws_store = WorkingSetStore::new();

        for name in ["b", "a"] {
            let branch = BranchName::new(name).unwrap();
            ws_store.install(&WorkingSet::at_root(branch, root.clone()));
        }
        assert_eq!(ws_store.branches(), vec!["a", "b"]);

        ws_store.remove(&BranchName::new("a").unwrap());
        assert_eq!(ws_store.branches(), vec!["b"]);
    }
}
