//! Storage layer: the commit graph and root values over a git object store.
//!
//! This module provides the version-control substrate the SQL facade builds
//! on. Upper layers (session state, table adapters, reflective tables) use
//! this API and never touch git2 directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       CommitGraph                           │
//! │   (refs, history walks, root values, working sets)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │  RootValue  │       │    refs     │       │ working_set │
//!  │  (tables)   │       │ (branches)  │       │   (CAS)     │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┼─────────────────────┘
//!                               │
//!                               ▼
//!                        ┌─────────────┐
//!                        │ ObjectStore │
//!                        │   (git2)    │
//!                        └─────────────┘
//! ```
//!
//! Root values are immutable: every mutator returns a new root and the old
//! one stays valid, with unchanged subtrees shared between the two.

mod blob;
mod commit;
mod error;
mod graph;
mod refs;
mod root;
mod store;
mod tree;
mod types;
mod working_set;

pub use blob::Row;
pub use commit::{CommitBuilder, CommitInfo, CommitMessage, TopologicalIter};
pub use error::{StorageError, StorageResult};
pub use graph::CommitGraph;
pub use refs::{RefManager, RemoteInfo, TagInfo};
pub use root::{RemoveOpts, RootValue, TableSnapshot};
pub use store::ObjectStore;
pub use tree::TableMeta;
pub use types::{
    BlobId, BranchName, CommitId, InvalidNameError, RefSpec, RowKey, Signature, TableName,
    TagName, TreeId,
};
pub use working_set::{MergeState, SchemaConflict, WorkingSet, WorkingSetStore};
