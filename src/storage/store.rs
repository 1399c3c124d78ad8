//! Thread-safe handle to the underlying git object store.
//!
//! Everything above this module (root values, the commit graph, reflective
//! tables) reaches git through `ObjectStore` closures and never holds a
//! `git2::Repository` directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::RwLock;

use crate::storage::error::{StorageError, StorageResult};

/// Shared handle to a git repository. Clone to share across threads - it
/// uses Arc internally.
#[derive(Clone)]
pub struct ObjectStore {
    inner: Arc<ObjectStoreInner>,
}

struct ObjectStoreInner {
    repo: RwLock<Repository>,
    path: PathBuf,
}

impl ObjectStore {
    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path)
            .map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;

        Ok(Self {
            inner: Arc::new(ObjectStoreInner {
                repo: RwLock::new(repo),
                path: path.to_path_buf(),
            }),
        })
    }

    /// Initialize a new bare-ish repository (we never use a worktree).
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init(path)?;

        Ok(Self {
            inner: Arc::new(ObjectStoreInner {
                repo: RwLock::new(repo),
                path: path.to_path_buf(),
            }),
        })
    }

    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Execute a function with read access to the repository.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.read();
        f(&repo)
    }

    /// Execute a function with write access to the repository.
    pub fn with_repo_mut<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.write();
        f(&repo)
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("path", &self.inner.path)
            .finish()
    }
}
