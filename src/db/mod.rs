//! The database facade and its supporting policy modules.

pub mod branch_control;
pub mod error;
pub mod names;

mod database;

pub use branch_control::{BranchControlRule, BranchControlStore, BranchNamespaceRule};
pub use database::{
    AsOf, Database, ReadOnlyDatabase, ResolvedTable, RevisionType, REVISION_DELIMITER,
};
pub use error::{DatabaseError, DbResult};
