//! Commit metadata, commit creation and history traversal.
//!
//! History walks are modeled as restartable lazy sequences over commit
//! metadata. The topological order is deterministic: commits are yielded
//! newest-first by timestamp, ties broken by commit hash ascending.

use std::collections::{BinaryHeap, HashSet};

use chrono::{DateTime, TimeZone, Utc};
use git2::Repository;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::store::ObjectStore;
use crate::storage::tree::TreeHandle;
use crate::storage::types::{CommitId, Signature, TreeId};

/// Immutable metadata of one commit in the graph.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    pub(crate) fn from_git2(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        let time = commit.time();
        let timestamp = Utc
            .timestamp_opt(time.seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id: CommitId::new(commit.id()),
            tree_id: TreeId::new(commit.tree_id()),
            parent_ids: commit.parent_ids().map(CommitId::new).collect(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("Unknown").to_string(),
            author_email: author.email().unwrap_or("unknown@unknown").to_string(),
            timestamp,
        }
    }

    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() > 1
    }

    pub fn first_parent(&self) -> Option<CommitId> {
        self.parent_ids.first().copied()
    }

    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }
}

/// Builder for creating commits. Timestamps are explicit so history is
/// reproducible in tests and `AS OF` resolution is exact.
pub struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree_id: Option<TreeId>,
    parents: Vec<CommitId>,
    message: String,
    signature: Signature,
    timestamp: Option<DateTime<Utc>>,
    update_ref: Option<String>,
}

impl<'a> CommitBuilder<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            tree_id: None,
            parents: Vec::new(),
            message: String::new(),
            signature: Signature::system(),
            timestamp: None,
            update_ref: None,
        }
    }

    pub fn tree(mut self, tree_id: TreeId) -> Self {
        self.tree_id = Some(tree_id);
        self
    }

    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn parents(mut self, parents: Vec<CommitId>) -> Self {
        self.parents = parents;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }

    pub fn update_ref(mut self, refname: impl Into<String>) -> Self {
        self.update_ref = Some(refname.into());
        self
    }

    pub fn commit(self) -> StorageResult<CommitId> {
        let tree_id = self
            .tree_id
            .ok_or_else(|| StorageError::Internal("commit requires a tree".to_string()))?;

        let tree = self.repo.find_tree(tree_id.raw())?;
        let at = self.timestamp.unwrap_or_else(Utc::now);
        let sig = self.signature.to_git2_at(at)?;

        let parent_commits: Vec<git2::Commit<'_>> = self
            .parents
            .iter()
            .map(|id| self.repo.find_commit(id.raw()))
            .collect::<Result<_, _>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();

        let oid = self.repo.commit(
            self.update_ref.as_deref(),
            &sig,
            &sig,
            &self.message,
            &tree,
            &parent_refs,
        )?;

        Ok(CommitId::new(oid))
    }
}

pub fn get_commit(repo: &Repository, id: CommitId) -> StorageResult<CommitInfo> {
    let commit = repo
        .find_commit(id.raw())
        .map_err(|_| StorageError::CommitNotFound(id.to_string()))?;

    Ok(CommitInfo::from_git2(&commit))
}

pub fn get_tree_at_commit(repo: &Repository, commit_id: CommitId) -> StorageResult<TreeHandle<'_>> {
    let commit = repo
        .find_commit(commit_id.raw())
        .map_err(|_| StorageError::CommitNotFound(commit_id.to_string()))?;

    let tree = commit.tree()?;
    Ok(TreeHandle::new(tree))
}

/// Frontier entry ordered newest-first by timestamp, ties broken by hash
/// ascending. BinaryHeap is a max-heap, so the hash comparison is reversed.
#[derive(PartialEq, Eq)]
struct FrontierEntry {
    seconds: i64,
    id: CommitId,
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.seconds
            .cmp(&other.seconds)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Lazy, restartable topological walk over the commit graph.
///
/// Yields commits reachable from `from` and not reachable from `exclude`,
/// newest-first, deterministic across runs. Each `next()` briefly takes the
/// store's read lock; the iterator holds no repository borrow.
pub struct TopologicalIter {
    store: ObjectStore,
    frontier: BinaryHeap<FrontierEntry>,
    queued: HashSet<CommitId>,
    excluded: HashSet<CommitId>,
}

impl TopologicalIter {
    pub fn new(
        store: ObjectStore,
        from: Vec<CommitId>,
        exclude: Vec<CommitId>,
    ) -> StorageResult<Self> {
        // Pre-compute the full exclusion closure; excluded subgraphs are
        // expected to be small relative to the walk itself.
        let excluded = store.with_repo(|repo| {
            let mut set = HashSet::new();
            let mut stack = exclude;
            while let Some(id) = stack.pop() {
                if !set.insert(id) {
                    continue;
                }
                let commit = repo
                    .find_commit(id.raw())
                    .map_err(|_| StorageError::CommitNotFound(id.to_string()))?;
                stack.extend(commit.parent_ids().map(CommitId::new));
            }
            Ok(set)
        })?;

        let mut iter = Self {
            store: store.clone(),
            frontier: BinaryHeap::new(),
            queued: HashSet::new(),
            excluded,
        };

        store.with_repo(|repo| {
            for id in from {
                iter.push(repo, id)?;
            }
            Ok(())
        })?;

        Ok(iter)
    }

    fn push(&mut self, repo: &Repository, id: CommitId) -> StorageResult<()> {
        if self.excluded.contains(&id) || !self.queued.insert(id) {
            return Ok(());
        }
        let commit = repo
            .find_commit(id.raw())
            .map_err(|_| StorageError::CommitNotFound(id.to_string()))?;
        self.frontier.push(FrontierEntry {
            seconds: commit.time().seconds(),
            id,
        });
        Ok(())
    }
}

impl Iterator for TopologicalIter {
    type Item = StorageResult<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.frontier.pop()?;
        let store = self.store.clone();
        let result = store.with_repo(|repo| {
            let info = get_commit(repo, entry.id)?;
            for parent in &info.parent_ids {
                self.push(repo, *parent)?;
            }
            Ok(info)
        });
        Some(result)
    }
}

/// Resolve an `AS OF <timestamp>` query: the first commit on the walk from
/// `head` whose commit time is at or before `at`. `None` when every commit
/// is newer.
pub fn as_of_time(
    store: &ObjectStore,
    head: CommitId,
    at: DateTime<Utc>,
) -> StorageResult<Option<CommitInfo>> {
    let iter = TopologicalIter::new(store.clone(), vec![head], Vec::new())?;
    for info in iter {
        let info = info?;
        if info.timestamp <= at {
            return Ok(Some(info));
        }
    }
    Ok(None)
}

/// Commit message formatting for database operations.
pub struct CommitMessage;

impl CommitMessage {
    pub fn init() -> String {
        "Initialize data repository".to_string()
    }

    pub fn create_table(table: &str) -> String {
        format!("CREATE TABLE {}", table)
    }

    pub fn drop_table(tables: &[String]) -> String {
        format!("DROP TABLE {}", tables.join(", "))
    }

    pub fn rename_table(old: &str, new: &str) -> String {
        format!("RENAME TABLE {} TO {}", old, new)
    }
}
