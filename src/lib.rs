//! BranchDB - a SQL-facing, branchable, version-controlled database layer.
//!
//! The crate bridges a SQL engine to a content-addressed commit graph:
//! persistent tables, reflective `dolt_*` tables, views, triggers, events
//! and procedures are all exposed from an underlying commit graph, and
//! every data-definition or data-manipulation request becomes a mutation of
//! an immutable *working root value* that is later committable.
//!
//! # Example
//!
//! ```no_run
//! use branchdb::db::Database;
//! use branchdb::schema::{SchemaBuilder, SqlType};
//! use branchdb::session::Session;
//! use branchdb::storage::CommitGraph;
//! use chrono::Utc;
//!
//! let graph = CommitGraph::init("./my_database", Utc::now()).unwrap();
//! let db = Database::new("mydb", graph).unwrap();
//! let session = Session::new("alice");
//!
//! let schema = SchemaBuilder::new(1)
//!     .add_pk_column("id", SqlType::Int)
//!     .add_column("name", SqlType::Text)
//!     .build()
//!     .unwrap();
//! db.create_table(&session, "users", schema, None).unwrap();
//! ```

pub mod db;
pub mod dtables;
pub mod fragments;
pub mod globalstate;
pub mod schema;
pub mod session;
pub mod storage;
pub mod table;
