//! Branch, tag and remote reference management.
//!
//! Refs are pointers into the commit graph. Branch updates go through a
//! compare-and-swap so concurrent sessions sharing a branch fail with a
//! retryable conflict instead of silently clobbering each other.

use chrono::{DateTime, TimeZone, Utc};
use git2::{BranchType, Repository};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, CommitId, Signature, TagName};

/// Manages git references.
pub struct RefManager;

/// A tag paired with its metadata. Lightweight tags have no tagger.
#[derive(Debug, Clone)]
pub struct TagInfo {
    pub name: TagName,
    pub target: CommitId,
    pub tagger_name: Option<String>,
    pub tagger_email: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// A remote and its fetch URL.
#[derive(Debug, Clone)]
pub struct RemoteInfo {
    pub name: String,
    pub url: String,
}

impl RefManager {
    /// Resolve a branch name to its current commit ID.
    pub fn resolve_branch(repo: &Repository, branch: &BranchName) -> StorageResult<CommitId> {
        let reference = repo
            .find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        let commit = reference
            .peel_to_commit()
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        Ok(CommitId::new(commit.id()))
    }

    /// Resolve a remote-tracking branch like "origin/main".
    pub fn resolve_remote_branch(repo: &Repository, name: &str) -> StorageResult<CommitId> {
        let reference = repo
            .find_reference(&format!("refs/remotes/{}", name))
            .map_err(|_| StorageError::RefNotFound(name.to_string()))?;

        let commit = reference
            .peel_to_commit()
            .map_err(|_| StorageError::RefNotFound(name.to_string()))?;

        Ok(CommitId::new(commit.id()))
    }

    /// Resolve a tag to the commit it points at.
    pub fn resolve_tag(repo: &Repository, tag: &TagName) -> StorageResult<CommitId> {
        let reference = repo
            .find_reference(&tag.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(tag.to_string()))?;

        let commit = reference
            .peel_to_commit()
            .map_err(|_| StorageError::RefNotFound(tag.to_string()))?;

        Ok(CommitId::new(commit.id()))
    }

    pub fn branch_exists(repo: &Repository, branch: &BranchName) -> bool {
        repo.find_reference(&branch.as_ref_path()).is_ok()
    }

    pub fn create_branch(
        repo: &Repository,
        branch: &BranchName,
        target: CommitId,
    ) -> StorageResult<()> {
        if Self::branch_exists(repo, branch) {
            return Err(StorageError::BranchAlreadyExists(branch.to_string()));
        }

        let commit = repo.find_commit(target.raw())?;
        repo.branch(branch.as_str(), &commit, false)?;
        Ok(())
    }

    /// Force-update a branch. Use `update_branch_if_unchanged` for CAS.
    pub fn update_branch(
        repo: &Repository,
        branch: &BranchName,
        target: CommitId,
    ) -> StorageResult<()> {
        let mut reference = repo
            .find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        reference.set_target(target.raw(), &format!("update branch to {}", target.short()))?;
        Ok(())
    }

    /// Update a branch only if it still points at the expected commit.
    pub fn update_branch_if_unchanged(
        repo: &Repository,
        branch: &BranchName,
        expected: CommitId,
        new_target: CommitId,
    ) -> StorageResult<()> {
        let current = Self::resolve_branch(repo, branch)?;

        if current != expected {
            return Err(StorageError::ConcurrentModification {
                target: branch.to_string(),
            });
        }

        Self::update_branch(repo, branch, new_target)
    }

    pub fn delete_branch(repo: &Repository, branch: &BranchName) -> StorageResult<()> {
        let mut git_branch = repo
            .find_branch(branch.as_str(), BranchType::Local)
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        git_branch.delete()?;
        Ok(())
    }

    pub fn list_branches(repo: &Repository) -> StorageResult<Vec<BranchName>> {
        let branches = repo.branches(Some(BranchType::Local))?;

        let mut result = Vec::new();
        for branch_result in branches {
            let (branch, _) = branch_result?;
            if let Some(name) = branch.name()? {
                if let Ok(branch_name) = BranchName::new(name) {
                    result.push(branch_name);
                }
            }
        }

        result.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(result)
    }

    /// Remote-tracking branch names ("origin/main" style), sorted.
    pub fn list_remote_branches(repo: &Repository) -> StorageResult<Vec<(String, CommitId)>> {
        let branches = repo.branches(Some(BranchType::Remote))?;

        let mut result = Vec::new();
        for branch_result in branches {
            let (branch, _) = branch_result?;
            let target = branch.get().peel_to_commit().ok().map(|c| c.id());
            if let (Some(name), Some(oid)) = (branch.name()?, target) {
                result.push((name.to_string(), CommitId::new(oid)));
            }
        }

        result.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(result)
    }

    pub fn list_remotes(repo: &Repository) -> StorageResult<Vec<RemoteInfo>> {
        let names = repo.remotes()?;
        let mut result = Vec::new();
        for name in names.iter().flatten() {
            let remote = repo.find_remote(name)?;
            result.push(RemoteInfo {
                name: name.to_string(),
                url: remote.url().unwrap_or("").to_string(),
            });
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    /// Create an annotated tag at the given commit.
    pub fn create_tag(
        repo: &Repository,
        tag: &TagName,
        target: CommitId,
        tagger: &Signature,
        message: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        if repo.find_reference(&tag.as_ref_path()).is_ok() {
            return Err(StorageError::TagAlreadyExists(tag.to_string()));
        }

        let object = repo.find_object(target.raw(), None)?;
        let sig = tagger.to_git2_at(at)?;
        repo.tag(tag.as_str(), &object, &sig, message, false)?;
        Ok(())
    }

    pub fn delete_tag(repo: &Repository, tag: &TagName) -> StorageResult<()> {
        repo.tag_delete(tag.as_str())
            .map_err(|_| StorageError::RefNotFound(tag.to_string()))
    }

    /// All tags with metadata, sorted by name.
    pub fn list_tags(repo: &Repository) -> StorageResult<Vec<TagInfo>> {
        let names = repo.tag_names(None)?;
        let mut result = Vec::new();

        for name in names.iter().flatten() {
            let tag_name = match TagName::new(name) {
                Ok(t) => t,
                Err(_) => continue,
            };

            let reference = repo.find_reference(&tag_name.as_ref_path())?;
            let target = reference
                .peel_to_commit()
                .map_err(|_| StorageError::RefNotFound(tag_name.to_string()))?;

            // annotated tags carry their own metadata
            let info = match reference.peel_to_tag() {
                Ok(tag_obj) => {
                    let tagger = tag_obj.tagger();
                    TagInfo {
                        name: tag_name,
                        target: CommitId::new(target.id()),
                        tagger_name: tagger.as_ref().and_then(|t| t.name().map(String::from)),
                        tagger_email: tagger.as_ref().and_then(|t| t.email().map(String::from)),
                        timestamp: tagger.as_ref().and_then(|t| {
                            chrono::Utc.timestamp_opt(t.when().seconds(), 0).single()
                        }),
                        message: tag_obj.message().map(String::from),
                    }
                }
                Err(_) => TagInfo {
                    name: tag_name,
                    target: CommitId::new(target.id()),
                    tagger_name: None,
                    tagger_email: None,
                    timestamp: None,
                    message: None,
                },
            };
            result.push(info);
        }

        result.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(result)
    }

    /// Initialize the default branch at the given commit and point HEAD at it.
    pub fn init_default_branch(repo: &Repository, initial_commit: CommitId) -> StorageResult<()> {
        let main = BranchName::main();

        if !Self::branch_exists(repo, &main) {
            Self::create_branch(repo, &main, initial_commit)?;
        }

        repo.set_head(&main.as_ref_path())?;
        Ok(())
    }
}
