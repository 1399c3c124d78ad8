//! The commit graph accessor.
//!
//! Resolves refs (branch/tag/remote/hash/timestamp) to commits, yields root
//! values, walks history, and owns the working-set store. The SQL facade
//! talks to the graph; it never touches git objects directly.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::storage::commit::{
    self, as_of_time, CommitBuilder, CommitInfo, CommitMessage, TopologicalIter,
};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::{RefManager, RemoteInfo, TagInfo};
use crate::storage::root::RootValue;
use crate::storage::store::ObjectStore;
use crate::storage::types::{BranchName, CommitId, RefSpec, Signature, TagName, TreeId};
use crate::storage::working_set::{WorkingSet, WorkingSetStore};

/// Accessor over one database's commit graph.
#[derive(Clone)]
pub struct CommitGraph {
    store: ObjectStore,
    working_sets: WorkingSetStore,
}

impl CommitGraph {
    /// Initialize a new graph: empty root, initial commit, default branch
    /// with a fresh working set.
    pub fn init(path: impl AsRef<std::path::Path>, at: DateTime<Utc>) -> StorageResult<Self> {
        let store = ObjectStore::init(path)?;

        let initial = store.with_repo_mut(|repo| {
            let tree = crate::storage::tree::create_empty_root(repo)?;
            let commit = CommitBuilder::new(repo)
                .tree(tree)
                .message(CommitMessage::init())
                .timestamp(at)
                .commit()?;
            RefManager::init_default_branch(repo, commit)?;
            Ok(commit)
        })?;

        let graph = Self {
            store,
            working_sets: WorkingSetStore::new(),
        };

        let root = graph.root_at(initial)?;
        graph
            .working_sets
            .install(&WorkingSet::at_root(BranchName::main(), root));

        debug!(commit = %initial, "initialized commit graph");
        Ok(graph)
    }

    /// Open an existing graph and rebuild working sets at each branch head.
    pub fn open(path: impl AsRef<std::path::Path>) -> StorageResult<Self> {
        let store = ObjectStore::open(path)?;
        let graph = Self {
            store,
            working_sets: WorkingSetStore::new(),
        };

        for branch in graph.branches()? {
            let head = graph.branch_head(&branch)?;
            let root = graph.root_at(head.id)?;
            graph
                .working_sets
                .install(&WorkingSet::at_root(branch, root));
        }

        Ok(graph)
    }

    pub(crate) fn store(&self) -> &ObjectStore {
        &self.store
    }

    // ==================== Ref resolution ====================

    /// Resolve a ref to its commit. `Working`/`Staged` are session
    /// pseudo-refs and must be resolved by the caller against session state;
    /// asking the graph for them is a programming error surfaced as such.
    pub fn resolve(&self, spec: &RefSpec, head_hint: Option<&BranchName>) -> StorageResult<CommitInfo> {
        match spec {
            RefSpec::Branch(branch) => self.branch_head(branch),
            RefSpec::Tag(tag) => {
                let id = self
                    .store
                    .with_repo(|repo| RefManager::resolve_tag(repo, tag))?;
                self.commit(id)
            }
            RefSpec::Remote(name) => {
                let id = self
                    .store
                    .with_repo(|repo| RefManager::resolve_remote_branch(repo, name))?;
                self.commit(id)
            }
            RefSpec::Head => {
                let branch = head_hint
                    .cloned()
                    .ok_or_else(|| StorageError::RefNotFound("HEAD".to_string()))?;
                self.branch_head(&branch)
            }
            RefSpec::Hash(prefix) => self.resolve_hash(prefix),
            RefSpec::Working | RefSpec::Staged => Err(StorageError::Internal(
                "working/staged pseudo-refs resolve against session state".to_string(),
            )),
        }
    }

    /// Resolve a possibly-abbreviated hash. Ambiguous prefixes fail.
    fn resolve_hash(&self, prefix: &str) -> StorageResult<CommitInfo> {
        self.store.with_repo(|repo| {
            let object = repo
                .revparse_single(prefix)
                .map_err(|e| match e.code() {
                    git2::ErrorCode::Ambiguous => StorageError::AmbiguousHash(prefix.to_string()),
                    _ => StorageError::RefNotFound(prefix.to_string()),
                })?;
            let git_commit = object
                .peel_to_commit()
                .map_err(|_| StorageError::RefNotFound(prefix.to_string()))?;
            Ok(CommitInfo::from_git2(&git_commit))
        })
    }

    pub fn branch_head(&self, branch: &BranchName) -> StorageResult<CommitInfo> {
        let id = self
            .store
            .with_repo(|repo| RefManager::resolve_branch(repo, branch))?;
        self.commit(id)
    }

    pub fn commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        self.store.with_repo(|repo| commit::get_commit(repo, id))
    }

    /// The root value recorded by a commit.
    pub fn root_at(&self, id: CommitId) -> StorageResult<RootValue> {
        let tree = self.store.with_repo(|repo| {
            let handle = commit::get_tree_at_commit(repo, id)?;
            Ok(handle.id())
        })?;
        Ok(RootValue::at(&self.store, tree))
    }

    pub fn root_of_tree(&self, tree: TreeId) -> RootValue {
        RootValue::at(&self.store, tree)
    }

    // ==================== History ====================

    /// Deterministic lazy topological walk: newest-first, ties broken by
    /// commit hash ascending.
    pub fn topological_iter(
        &self,
        from: Vec<CommitId>,
        exclude: Vec<CommitId>,
    ) -> StorageResult<TopologicalIter> {
        TopologicalIter::new(self.store.clone(), from, exclude)
    }

    /// First commit at or before `at` walking from `head`; `None` if every
    /// reachable commit is newer.
    pub fn as_of_time(&self, head: CommitId, at: DateTime<Utc>) -> StorageResult<Option<CommitInfo>> {
        as_of_time(&self.store, head, at)
    }

    // ==================== Branches / tags / remotes ====================

    pub fn branches(&self) -> StorageResult<Vec<BranchName>> {
        self.store.with_repo(RefManager::list_branches)
    }

    pub fn remote_branches(&self) -> StorageResult<Vec<(String, CommitId)>> {
        self.store.with_repo(RefManager::list_remote_branches)
    }

    pub fn remotes(&self) -> StorageResult<Vec<RemoteInfo>> {
        self.store.with_repo(RefManager::list_remotes)
    }

    pub fn tags(&self) -> StorageResult<Vec<TagInfo>> {
        self.store.with_repo(RefManager::list_tags)
    }

    /// Create a branch at a commit and give it a fresh working set.
    pub fn create_branch(&self, branch: &BranchName, at: CommitId) -> StorageResult<()> {
        self.store
            .with_repo_mut(|repo| RefManager::create_branch(repo, branch, at))?;
        let root = self.root_at(at)?;
        self.working_sets
            .install(&WorkingSet::at_root(branch.clone(), root));
        debug!(branch = %branch, commit = %at, "created branch");
        Ok(())
    }

    pub fn delete_branch(&self, branch: &BranchName) -> StorageResult<()> {
        self.store
            .with_repo_mut(|repo| RefManager::delete_branch(repo, branch))?;
        self.working_sets.remove(branch);
        Ok(())
    }

    pub fn create_tag(
        &self,
        tag: &TagName,
        at: CommitId,
        tagger: &Signature,
        message: &str,
        time: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.store
            .with_repo_mut(|repo| RefManager::create_tag(repo, tag, at, tagger, message, time))
    }

    // ==================== Working sets ====================

    /// The branch's working set, or `None` for branches without one
    /// (detached heads never have working sets).
    pub fn working_set(&self, branch: &BranchName) -> Option<WorkingSet> {
        self.working_sets.get(&self.store, branch)
    }

    /// CAS-guarded working set update.
    pub fn update_working_set(
        &self,
        ws: &WorkingSet,
        expected_working: TreeId,
    ) -> StorageResult<()> {
        self.working_sets.update(ws, expected_working)
    }

    /// Working roots of every branch except `skip`, for auto-increment
    /// reconciliation. Expensive; callers keep it off the hot path.
    pub fn other_working_roots(&self, skip: &BranchName) -> StorageResult<Vec<RootValue>> {
        let mut roots = Vec::new();
        for name in self.working_sets.branches() {
            if name == skip.as_str() {
                continue;
            }
            let branch = BranchName::new(name)?;
            if let Some(ws) = self.working_sets.get(&self.store, &branch) {
                roots.push(ws.working);
            }
        }
        Ok(roots)
    }

    // ==================== Commits ====================

    /// Commit the staged root of a branch: creates the commit, advances the
    /// branch ref with CAS, and resets the working set to the new head.
    pub fn commit_staged(
        &self,
        branch: &BranchName,
        message: &str,
        author: &Signature,
        at: DateTime<Utc>,
    ) -> StorageResult<CommitInfo> {
        let head = self.branch_head(branch)?;
        let ws = self
            .working_set(branch)
            .ok_or_else(|| StorageError::RefNotFound(format!("working set for {}", branch)))?;

        let commit_id = self.store.with_repo_mut(|repo| {
            let id = CommitBuilder::new(repo)
                .tree(ws.staged.hash())
                .parent(head.id)
                .message(message)
                .signature(author.clone())
                .timestamp(at)
                .commit()?;
            RefManager::update_branch_if_unchanged(repo, branch, head.id, id)?;
            Ok(id)
        })?;

        let new_root = self.root_at(commit_id)?;
        let expected = ws.working.hash();
        self.working_sets
            .update(&WorkingSet::at_root(branch.clone(), new_root), expected)?;

        debug!(branch = %branch, commit = %commit_id, "committed staged root");
        self.commit(commit_id)
    }

    /// Stage the current working root and commit it in one step.
    pub fn commit_working(
        &self,
        branch: &BranchName,
        message: &str,
        author: &Signature,
        at: DateTime<Utc>,
    ) -> StorageResult<CommitInfo> {
        let ws = self
            .working_set(branch)
            .ok_or_else(|| StorageError::RefNotFound(format!("working set for {}", branch)))?;
        let expected = ws.working.hash();
        let staged = ws.working.clone();
        self.working_sets
            .update(&ws.clone().with_staged(staged), expected)?;
        self.commit_staged(branch, message, author, at)
    }
}

impl std::fmt::Debug for CommitGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitGraph")
            .field("path", &self.store.path())
            .finish()
    }
}
