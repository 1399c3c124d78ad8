//! End-to-end tests over the database facade: reserved names, fragment
//! round-trips, AS OF resolution, commit-diff preconditions, auto-increment
//! reconciliation across branches, and temporary-table shadowing.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use branchdb::db::{AsOf, Database, DatabaseError, ReadOnlyDatabase, ResolvedTable};
use branchdb::dtables::{CommitRange, SystemTable};
use branchdb::schema::{Collation, Column, Schema, SchemaBuilder, SqlType};
use branchdb::session::{Session, PRIMARY_KEY_CHANGE_WARNING};
use branchdb::storage::{BranchName, CommitGraph, Signature, StorageError};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn setup() -> (TempDir, Database, Session) {
    let dir = TempDir::new().unwrap();
    let graph = CommitGraph::init(dir.path(), ts(100)).unwrap();
    let db = Database::new("mydb", graph).unwrap();
    let session = Session::new("alice");
    (dir, db, session)
}

fn vals_schema() -> Schema {
    SchemaBuilder::new(1)
        .add_pk_column("i", SqlType::Int)
        .build()
        .unwrap()
}

fn autoinc_schema() -> Schema {
    SchemaBuilder::new(1)
        .column(Column::new(1, "id", SqlType::UInt).primary_key().auto_increment())
        .add_column("v", SqlType::Text)
        .build()
        .unwrap()
}

fn insert_val(db: &Database, session: &Session, table: &str, i: i64) {
    let resolved = db.get_table_insensitive(session, table).unwrap().unwrap();
    let adapter = match resolved {
        ResolvedTable::User(a) => a,
        other => panic!("expected user table, got {:?}", other.name()),
    };
    let mut data = BTreeMap::new();
    data.insert("i".to_string(), serde_json::json!(i));
    adapter.insert(data).unwrap();
}

// ==================== Scenario 1: reserved names ====================

#[test]
fn reserved_name_rejected_and_plain_name_accepted() {
    let (_dir, db, session) = setup();

    let err = db
        .create_table(&session, "dolt_foo", vals_schema(), None)
        .unwrap_err();
    match err {
        DatabaseError::ReservedTableName(name) => assert_eq!(name, "dolt_foo"),
        other => panic!("expected ReservedTableName, got {other}"),
    }

    db.create_table(&session, "vals", vals_schema(), None).unwrap();
    assert_eq!(db.get_table_names(&session).unwrap(), vec!["vals"]);
}

#[test]
fn fulltext_auxiliary_names_bypass_reservation() {
    let (_dir, db, session) = setup();

    let names = db
        .create_fulltext_table_names(&session, "t", "idx")
        .unwrap();
    assert_eq!(names.config, "dolt_t_fts_config");
    db.create_table(&session, &names.config, vals_schema(), None)
        .unwrap();
}

#[test]
fn system_tables_reject_drop_and_rename() {
    let (_dir, db, session) = setup();

    let err = db.drop_table(&session, "dolt_log").unwrap_err();
    assert!(matches!(err, DatabaseError::SystemTableAlter(_)));

    let err = db.rename_table(&session, "dolt_branches", "b").unwrap_err();
    assert!(matches!(err, DatabaseError::SystemTableAlter(_)));

    db.create_table(&session, "t", vals_schema(), None).unwrap();
    let err = db.rename_table(&session, "t", "dolt_t").unwrap_err();
    assert!(matches!(err, DatabaseError::ReservedTableName(_)));
}

// ==================== Scenario 2: view round-trip ====================

#[test]
fn view_round_trip_leaves_no_schemas_table() {
    let (_dir, db, session) = setup();

    db.create_view(&session, "v", "CREATE VIEW v AS SELECT 1", ts(150))
        .unwrap();
    assert!(db
        .get_all_table_names(&session)
        .unwrap()
        .contains(&"dolt_schemas".to_string()));
    let view = db.get_view_definition(&session, "v").unwrap().unwrap();
    assert_eq!(view.text_definition, "SELECT 1");

    db.drop_view(&session, "v").unwrap();
    assert!(!db
        .get_all_table_names(&session)
        .unwrap()
        .contains(&"dolt_schemas".to_string()));
}

#[test]
fn view_errors() {
    let (_dir, db, session) = setup();

    let err = db.drop_view(&session, "v").unwrap_err();
    assert!(matches!(err, DatabaseError::ViewNotFound(_)));

    db.create_view(&session, "v", "CREATE VIEW v AS SELECT 1", ts(150))
        .unwrap();
    let err = db
        .create_view(&session, "V", "CREATE VIEW V AS SELECT 2", ts(151))
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ViewExists(_)));
}

#[test]
fn trigger_and_event_round_trip() {
    let (_dir, db, session) = setup();
    let before = db.get_all_table_names(&session).unwrap();

    db.create_trigger(&session, "trg", "CREATE TRIGGER trg ...", ts(150))
        .unwrap();
    db.create_event(&session, "ev", "CREATE EVENT ev ...", ts(151))
        .unwrap();

    assert_eq!(db.get_triggers(&session).unwrap().len(), 1);
    assert_eq!(db.get_events(&session).unwrap().len(), 1);
    assert!(db.get_event(&session, "EV").unwrap().is_some());

    let err = db
        .create_trigger(&session, "trg", "CREATE TRIGGER trg ...", ts(152))
        .unwrap_err();
    assert!(matches!(err, DatabaseError::TriggerExists(_)));

    db.drop_trigger(&session, "trg").unwrap();
    db.drop_event(&session, "ev").unwrap();
    assert_eq!(db.get_all_table_names(&session).unwrap(), before);

    let err = db.drop_event(&session, "ev").unwrap_err();
    assert!(matches!(err, DatabaseError::EventNotFound(_)));
}

#[test]
fn procedure_round_trip() {
    let (_dir, db, session) = setup();
    let before = db.get_all_table_names(&session).unwrap();

    db.create_stored_procedure(&session, "p", "CREATE PROCEDURE p() SELECT 1", ts(150))
        .unwrap();
    assert_eq!(db.get_stored_procedures(&session).unwrap().len(), 1);

    let err = db
        .create_stored_procedure(&session, "P", "CREATE PROCEDURE P() SELECT 2", ts(151))
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ProcedureExists(_)));

    db.drop_stored_procedure(&session, "p").unwrap();
    assert_eq!(db.get_all_table_names(&session).unwrap(), before);
}

// ==================== Scenario 3: AS OF ====================

#[test]
fn as_of_timestamp_resolves_first_commit_at_or_before() {
    let (_dir, db, session) = setup();

    db.create_table(&session, "vals", vals_schema(), None).unwrap();
    db.commit(&session, "create vals", &Signature::system(), ts(100))
        .unwrap();

    insert_val(&db, &session, "vals", 1);
    db.commit(&session, "insert 1", &Signature::system(), ts(200))
        .unwrap();

    insert_val(&db, &session, "vals", 2);
    db.commit(&session, "insert 2", &Signature::system(), ts(300))
        .unwrap();

    // t=250 resolves to the state at t=200
    let resolved = db
        .get_table_as_of(&session, "vals", &AsOf::Time(ts(250)))
        .unwrap()
        .unwrap();
    let adapter = match resolved {
        ResolvedTable::User(a) => a,
        other => panic!("expected user table, got {:?}", other.name()),
    };
    assert_eq!(adapter.row_count(), 1);
    assert_eq!(
        adapter.rows().unwrap()[0].get("i"),
        Some(&serde_json::json!(1))
    );

    // a timestamp before every commit resolves to nothing, not an error
    let none = db
        .get_table_as_of(&session, "vals", &AsOf::Time(ts(50)))
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn as_of_working_and_head_refs() {
    let (_dir, db, session) = setup();

    db.create_table(&session, "vals", vals_schema(), None).unwrap();
    db.commit(&session, "create vals", &Signature::system(), ts(200))
        .unwrap();

    // uncommitted insert is visible through AS OF "working" but not HEAD
    insert_val(&db, &session, "vals", 1);

    let working = db
        .get_table_as_of(&session, "vals", &AsOf::Ref("working".to_string()))
        .unwrap()
        .unwrap();
    let head = db
        .get_table_as_of(&session, "vals", &AsOf::Ref("HEAD".to_string()))
        .unwrap()
        .unwrap();

    match (working, head) {
        (ResolvedTable::User(w), ResolvedTable::User(h)) => {
            assert_eq!(w.row_count(), 1);
            assert_eq!(h.row_count(), 0);
        }
        _ => panic!("expected user tables"),
    }
}

#[test]
fn as_of_unknown_ref_is_an_error() {
    let (_dir, db, session) = setup();
    db.create_table(&session, "vals", vals_schema(), None).unwrap();

    let err = db
        .get_table_as_of(&session, "vals", &AsOf::Ref("nosuchbranch".to_string()))
        .unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::Storage(StorageError::RefNotFound(_))
    ));
}

// ==================== Scenario 4: commit-diff preconditions ====================

fn commit_diff_table(db: &Database, session: &Session, name: &str) -> branchdb::dtables::CommitDiffTable {
    let resolved = db.get_table_insensitive(session, name).unwrap().unwrap();
    let system = match resolved {
        ResolvedTable::System(s) => s,
        other => panic!("expected system table, got {:?}", other.name()),
    };
    match Arc::try_unwrap(system).expect("unshared system table") {
        SystemTable::CommitDiff(t) => t,
        other => panic!("expected commit diff table, got {:?}", other.name()),
    }
}

#[test]
fn commit_diff_requires_exactly_one_commit_per_side() {
    let (_dir, db, session) = setup();
    db.create_table(&session, "vals", vals_schema(), None).unwrap();
    db.commit(&session, "create vals", &Signature::system(), ts(200))
        .unwrap();

    // to_commit present, from_commit missing
    let table = commit_diff_table(&db, &session, "dolt_commit_diff_vals")
        .with_commit_ranges(vec![CommitRange::point("HEAD")], vec![]);
    let err = table.rows().unwrap_err();
    assert!(matches!(err, DatabaseError::ExactlyOneFromCommit));

    // no to_commit at all
    let table = commit_diff_table(&db, &session, "dolt_commit_diff_vals");
    let err = table.rows().unwrap_err();
    assert!(matches!(err, DatabaseError::ExactlyOneToCommit));

    // two distinct to_commit values
    let table = commit_diff_table(&db, &session, "dolt_commit_diff_vals").with_commit_ranges(
        vec![CommitRange::point("HEAD"), CommitRange::point("working")],
        vec![CommitRange::point("HEAD")],
    );
    let err = table.rows().unwrap_err();
    assert!(matches!(err, DatabaseError::ExactlyOneToCommit));
}

#[test]
fn commit_diff_open_range_is_invalid() {
    use branchdb::dtables::RangeCut;

    let (_dir, db, session) = setup();
    db.create_table(&session, "vals", vals_schema(), None).unwrap();
    db.commit(&session, "create vals", &Signature::system(), ts(200))
        .unwrap();

    let open = CommitRange {
        lower: RangeCut::Open("HEAD".to_string()),
        upper: RangeCut::Unbounded,
    };
    let table = commit_diff_table(&db, &session, "dolt_commit_diff_vals")
        .with_commit_ranges(vec![open], vec![CommitRange::point("HEAD")]);
    let err = table.rows().unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidCommitDiffArgs));
}

#[test]
fn commit_diff_between_head_and_working() {
    let (_dir, db, session) = setup();
    db.create_table(&session, "vals", vals_schema(), None).unwrap();
    db.commit(&session, "create vals", &Signature::system(), ts(200))
        .unwrap();

    insert_val(&db, &session, "vals", 7);

    let table = commit_diff_table(&db, &session, "dolt_commit_diff_vals").with_commit_ranges(
        vec![CommitRange::point("working")],
        vec![CommitRange::point("HEAD")],
    );
    let rows = table.rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("to_i"), Some(&serde_json::json!(7)));
    assert_eq!(rows[0].get("diff_type"), Some(&serde_json::json!("added")));
    assert_eq!(rows[0].get("to_commit"), Some(&serde_json::json!("WORKING")));
}

#[test]
fn commit_diff_pk_change_warns_and_yields_nothing() {
    let (_dir, db, session) = setup();
    db.create_table(&session, "vals", vals_schema(), None).unwrap();
    db.commit(&session, "create vals", &Signature::system(), ts(200))
        .unwrap();

    // recreate with a different primary key between from and to
    db.drop_table(&session, "vals").unwrap();
    let other_pk = SchemaBuilder::new(10)
        .add_pk_column("j", SqlType::Int)
        .build()
        .unwrap();
    db.create_table(&session, "vals", other_pk, None).unwrap();

    let table = commit_diff_table(&db, &session, "dolt_commit_diff_vals").with_commit_ranges(
        vec![CommitRange::point("working")],
        vec![CommitRange::point("HEAD")],
    );
    let rows = table.rows().unwrap();
    assert!(rows.is_empty());

    let warnings = session.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, PRIMARY_KEY_CHANGE_WARNING);
}

// ==================== Scenario 5: auto-increment reconciliation ====================

#[test]
fn auto_increment_reconciles_across_branch_drops() {
    let (_dir, db, session) = setup();
    let head = db
        .commit_graph()
        .branch_head(&BranchName::main())
        .unwrap();

    db.create_branch(&session, "a", &head.id.to_string()).unwrap();
    db.create_branch(&session, "b", &head.id.to_string()).unwrap();

    let db_a = db.with_branch_revision("mydb/a", BranchName::new("a").unwrap());
    let db_b = db.with_branch_revision("mydb/b", BranchName::new("b").unwrap());
    let session_a = Session::new("alice");
    let session_b = Session::new("bob");

    // branch a reaches next-id 50, branch b reaches next-id 80
    db_a.create_table(&session_a, "t", autoinc_schema(), None)
        .unwrap();
    let root_a = db_a.get_root(&session_a).unwrap();
    let root_a = root_a
        .set_table_meta("t", autoinc_schema(), Some(50))
        .unwrap();
    db_a.set_root(&session_a, root_a).unwrap();
    db_a.commit(&session_a, "t at 50", &Signature::system(), ts(200))
        .unwrap();

    db_b.create_table(&session_b, "t", autoinc_schema(), None)
        .unwrap();
    let root_b = db_b.get_root(&session_b).unwrap();
    let root_b = root_b
        .set_table_meta("t", autoinc_schema(), Some(80))
        .unwrap();
    db_b.set_root(&session_b, root_b).unwrap();
    db_b.commit(&session_b, "t at 80", &Signature::system(), ts(201))
        .unwrap();

    let tracker = db.auto_increment_tracker();
    tracker.bump_to("t", 50);

    // dropping t on a leaves the counter governed by b
    db_a.drop_table(&session_a, "t").unwrap();
    db_a.commit(&session_a, "drop t", &Signature::system(), ts(202))
        .unwrap();
    assert_eq!(tracker.peek("t"), 80);

    // dropping t on b as well resets the counter
    db_b.drop_table(&session_b, "t").unwrap();
    db_b.commit(&session_b, "drop t", &Signature::system(), ts(203))
        .unwrap();
    assert_eq!(tracker.peek("t"), 1);
}

// ==================== Scenario 6: temporary shadowing ====================

#[test]
fn temporary_tables_shadow_per_session() {
    let (_dir, db, session1) = setup();
    let session2 = Session::new("bob");

    db.create_table(&session1, "x", vals_schema(), None).unwrap();
    db.commit(&session1, "create x", &Signature::system(), ts(200))
        .unwrap();

    let temp_schema = SchemaBuilder::new(100)
        .add_pk_column("k", SqlType::Text)
        .build()
        .unwrap();
    db.create_temporary_table(&session1, "x", temp_schema).unwrap();

    // session 1 sees the temporary, session 2 the persisted table
    let t1 = db.get_table_insensitive(&session1, "x").unwrap().unwrap();
    assert!(matches!(t1, ResolvedTable::Temporary(_)));

    let t2 = db.get_table_insensitive(&session2, "x").unwrap().unwrap();
    assert!(matches!(t2, ResolvedTable::User(_)));

    // dropping resolves temporary-first
    db.drop_table(&session1, "x").unwrap();
    let t1 = db.get_table_insensitive(&session1, "x").unwrap().unwrap();
    assert!(matches!(t1, ResolvedTable::User(_)));
}

// ==================== Invariants ====================

#[test]
fn tag_reuse_rejected_with_offending_tags() {
    let (_dir, db, session) = setup();
    db.create_table(&session, "a", vals_schema(), None).unwrap();

    let err = db
        .create_table(&session, "b", vals_schema(), None)
        .unwrap_err();
    match err {
        DatabaseError::TagAlreadyUsed { tags, .. } => assert_eq!(tags, vec![1]),
        other => panic!("expected TagAlreadyUsed, got {other}"),
    }
}

#[test]
fn derived_table_cache_returns_same_adapter_until_root_changes() {
    let (_dir, db, session) = setup();
    db.create_table(&session, "t", vals_schema(), None).unwrap();

    let first = db.get_table_insensitive(&session, "t").unwrap().unwrap();
    let second = db.get_table_insensitive(&session, "t").unwrap().unwrap();
    match (&first, &second) {
        (ResolvedTable::User(a), ResolvedTable::User(b)) => {
            assert!(Arc::ptr_eq(a, b));
        }
        _ => panic!("expected user tables"),
    }

    // a mutation installs a new root and invalidates the cache
    insert_val(&db, &session, "t", 1);
    let third = db.get_table_insensitive(&session, "t").unwrap().unwrap();
    match (&first, &third) {
        (ResolvedTable::User(a), ResolvedTable::User(c)) => {
            assert!(!Arc::ptr_eq(a, c));
            assert_eq!(c.row_count(), 1);
        }
        _ => panic!("expected user tables"),
    }
}

#[test]
fn detached_head_rejects_mutations() {
    let (_dir, db, session) = setup();
    db.create_table(&session, "t", vals_schema(), None).unwrap();
    let info = db
        .commit(&session, "create t", &Signature::system(), ts(200))
        .unwrap();

    let detached = db
        .with_revision("mydb/xyz", &info.id.to_string())
        .unwrap();
    let detached_session = Session::new("alice");

    // reads work
    let resolved = detached
        .get_table_insensitive(&detached_session, "t")
        .unwrap();
    assert!(resolved.is_some());

    // mutations are rejected with the dedicated error
    let err = detached.drop_table(&detached_session, "t").unwrap_err();
    assert!(matches!(err, DatabaseError::DetachedHead));

    let err = detached.get_working_set(&detached_session).unwrap_err();
    assert!(matches!(err, DatabaseError::DetachedHead));
}

#[test]
fn spatial_primary_key_rejected() {
    let (_dir, db, session) = setup();
    let schema = Schema::new(vec![Column::new(1, "loc", SqlType::Point).primary_key()]);
    let err = db.create_table(&session, "t", schema, None).unwrap_err();
    assert!(matches!(err, DatabaseError::SpatialKey));
}

#[test]
fn text_prefix_in_primary_key_rejected() {
    use branchdb::schema::{IndexColumn, IndexDef};

    let (_dir, db, session) = setup();
    let schema = SchemaBuilder::new(1)
        .add_pk_column("name", SqlType::VarChar(255))
        .add_column("v", SqlType::Int)
        .build()
        .unwrap();

    let index = IndexDef {
        name: "idx".to_string(),
        columns: vec![IndexColumn::with_prefix("name", 10)],
        unique: false,
        fulltext: false,
    };
    let err = db
        .create_indexed_table(&session, "t", schema.clone(), index, None)
        .unwrap_err();
    assert!(matches!(err, DatabaseError::UnsupportedIndexPrefix(_)));

    // a prefix on a non-primary-key text column is accepted
    let index = IndexDef {
        name: "idx".to_string(),
        columns: vec![IndexColumn::with_prefix("v", 10)],
        unique: false,
        fulltext: false,
    };
    db.create_indexed_table(&session, "t", schema, index, None)
        .unwrap();
}

#[test]
fn docs_table_requires_canonical_schema() {
    let (_dir, db, session) = setup();

    let err = db
        .create_table(&session, "dolt_docs", vals_schema(), None)
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ReservedTableName(_)));

    let canonical = Schema::new(vec![
        Column::new(1, "doc_name", SqlType::Text).primary_key(),
        Column::new(2, "doc_text", SqlType::Text),
    ]);
    db.create_table(&session, "dolt_docs", canonical, None).unwrap();
}

#[test]
fn collation_round_trip() {
    let (_dir, db, session) = setup();
    assert_eq!(db.get_collation(&session).unwrap(), Collation::default());

    db.set_collation(&session, Collation::new("utf8mb4_general_ci"))
        .unwrap();
    assert_eq!(
        db.get_collation(&session).unwrap(),
        Collation::new("utf8mb4_general_ci")
    );
}

#[test]
fn read_only_database_rejects_writes() {
    let (_dir, db, session) = setup();
    let ro = ReadOnlyDatabase::new(db);
    assert!(ro.is_read_only());

    let err = ro
        .create_table(&session, "t", vals_schema(), None)
        .unwrap_err();
    assert!(matches!(err, DatabaseError::AuthorizationDenied { .. }));

    // reads still work
    assert!(ro.get_table_names(&session).unwrap().is_empty());

    // re-qualifying keeps the wrapper read-only
    let ro2 = ro.with_branch_revision("mydb/main", BranchName::main());
    assert!(ro2.is_read_only());
}

#[test]
fn revision_qualified_names() {
    let (_dir, db, _session) = setup();
    assert_eq!(db.revision_qualified_name(), "mydb");
    assert_eq!(db.aliased_name(), "mydb");

    let qualified = db.with_branch_revision("mydb/main", BranchName::main());
    assert_eq!(qualified.name(), "mydb/main");
    assert_eq!(qualified.aliased_name(), "mydb");
    assert_eq!(qualified.revision_qualified_name(), "mydb/main");
}

#[test]
fn cancelled_session_rejects_operations() {
    let (_dir, db, session) = setup();
    session.cancel();
    let err = db
        .create_table(&session, "t", vals_schema(), None)
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Cancelled));
}

// ==================== Reflective tables ====================

#[test]
fn dolt_log_walks_session_head() {
    let (_dir, db, session) = setup();
    db.create_table(&session, "t", vals_schema(), None).unwrap();
    db.commit(&session, "add t", &Signature::system(), ts(200))
        .unwrap();

    let resolved = db
        .get_table_insensitive(&session, "DOLT_LOG")
        .unwrap()
        .unwrap();
    let system = match resolved {
        ResolvedTable::System(s) => s,
        other => panic!("expected system table, got {:?}", other.name()),
    };
    let rows = system.rows().unwrap();
    assert_eq!(rows.len(), 2); // init + add t
    assert_eq!(
        rows[0].get("message"),
        Some(&serde_json::json!("add t"))
    );
}

#[test]
fn dolt_branches_and_status() {
    let (_dir, db, session) = setup();
    let head = db
        .commit_graph()
        .branch_head(&BranchName::main())
        .unwrap();
    db.create_branch(&session, "feature", &head.id.to_string())
        .unwrap();

    let branches = db
        .get_table_insensitive(&session, "dolt_branches")
        .unwrap()
        .unwrap();
    let rows = match branches {
        ResolvedTable::System(s) => s.rows().unwrap(),
        _ => panic!("expected system table"),
    };
    let names: Vec<&str> = rows
        .iter()
        .filter_map(|r| r.get("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(names, vec!["feature", "main"]);

    // an uncommitted create shows up as a working-set status row
    db.create_table(&session, "t", vals_schema(), None).unwrap();
    let status = db
        .get_table_insensitive(&session, "dolt_status")
        .unwrap()
        .unwrap();
    let rows = match status {
        ResolvedTable::System(s) => s.rows().unwrap(),
        _ => panic!("expected system table"),
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("table_name"), Some(&serde_json::json!("t")));
    assert_eq!(rows[0].get("staged"), Some(&serde_json::json!(false)));
    assert_eq!(rows[0].get("status"), Some(&serde_json::json!("new table")));
}

#[test]
fn dolt_diff_table_tracks_history() {
    let (_dir, db, session) = setup();
    db.create_table(&session, "t", vals_schema(), None).unwrap();
    db.commit(&session, "create t", &Signature::system(), ts(200))
        .unwrap();
    insert_val(&db, &session, "t", 1);
    db.commit(&session, "insert", &Signature::system(), ts(300))
        .unwrap();

    let resolved = db
        .get_table_insensitive(&session, "dolt_diff_t")
        .unwrap()
        .unwrap();
    let rows = match resolved {
        ResolvedTable::System(s) => s.rows().unwrap(),
        _ => panic!("expected system table"),
    };
    // one row: the insert at t=300; the create introduced no rows
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("to_i"), Some(&serde_json::json!(1)));
    assert_eq!(rows[0].get("diff_type"), Some(&serde_json::json!("added")));
}

#[test]
fn dolt_history_table_annotates_rows_per_commit() {
    let (_dir, db, session) = setup();
    db.create_table(&session, "t", vals_schema(), None).unwrap();
    insert_val(&db, &session, "t", 1);
    db.commit(&session, "one row", &Signature::system(), ts(200))
        .unwrap();
    insert_val(&db, &session, "t", 2);
    db.commit(&session, "two rows", &Signature::system(), ts(300))
        .unwrap();

    let resolved = db
        .get_table_insensitive(&session, "dolt_history_t")
        .unwrap()
        .unwrap();
    let rows = match resolved {
        ResolvedTable::System(s) => s.rows().unwrap(),
        _ => panic!("expected system table"),
    };
    // newest commit first: 2 rows at HEAD, 1 at the previous commit
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.get("commit_hash").is_some()));
}

#[test]
fn conflict_and_violation_tables_read_artifacts() {
    use branchdb::storage::RowKey;

    let (_dir, db, session) = setup();
    db.create_table(&session, "t", vals_schema(), None).unwrap();
    db.commit(&session, "create t", &Signature::system(), ts(200))
        .unwrap();

    let key = RowKey::new("1").unwrap();
    let root = db.get_root(&session).unwrap();
    let root = root
        .put_conflict_artifact(
            "t",
            &key,
            &serde_json::json!({"base": {"i": 1}, "ours": {"i": 2}, "theirs": {"i": 3}}),
        )
        .unwrap();
    let root = root
        .put_violation_artifact(
            "t",
            &key,
            &serde_json::json!({
                "violation_type": "foreign key",
                "row": {"i": 1},
                "violation_info": {"fk": "fk_parent"}
            }),
        )
        .unwrap();
    db.set_root(&session, root).unwrap();

    let rows = |name: &str| {
        let resolved = db.get_table_insensitive(&session, name).unwrap().unwrap();
        match resolved {
            ResolvedTable::System(s) => s.rows().unwrap(),
            _ => panic!("expected system table for {name}"),
        }
    };

    let conflicts = rows("dolt_conflicts");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].get("table"), Some(&serde_json::json!("t")));
    assert_eq!(conflicts[0].get("num_conflicts"), Some(&serde_json::json!(1)));

    let per_table = rows("dolt_conflicts_t");
    assert_eq!(per_table.len(), 1);
    assert_eq!(per_table[0].get("base_i"), Some(&serde_json::json!(1)));
    assert_eq!(per_table[0].get("our_i"), Some(&serde_json::json!(2)));
    assert_eq!(per_table[0].get("their_i"), Some(&serde_json::json!(3)));

    let violations = rows("dolt_constraint_violations");
    assert_eq!(violations.len(), 1);
    assert_eq!(
        violations[0].get("num_violations"),
        Some(&serde_json::json!(1))
    );

    let per_table = rows("dolt_constraint_violations_t");
    assert_eq!(
        per_table[0].get("violation_type"),
        Some(&serde_json::json!("foreign key"))
    );
}

#[test]
fn merge_status_reflects_merge_state() {
    use branchdb::storage::{MergeState, SchemaConflict};

    let (_dir, db, session) = setup();
    db.create_table(&session, "t", vals_schema(), None).unwrap();
    db.commit(&session, "create t", &Signature::system(), ts(200))
        .unwrap();

    let rows = |name: &str| {
        let resolved = db.get_table_insensitive(&session, name).unwrap().unwrap();
        match resolved {
            ResolvedTable::System(s) => s.rows().unwrap(),
            _ => panic!("expected system table for {name}"),
        }
    };

    // no merge underway
    let status = rows("dolt_merge_status");
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].get("is_merging"), Some(&serde_json::json!(false)));
    assert!(rows("dolt_schema_conflicts").is_empty());

    // install merge state on the branch working set
    let ws = db.get_working_set(&session).unwrap();
    let expected = ws.working.hash();
    let head = db
        .commit_graph()
        .branch_head(&BranchName::main())
        .unwrap();
    let state = MergeState {
        source_commit: head.id,
        pre_merge_working: ws.working.hash(),
        unmerged_tables: vec!["t".to_string()],
        schema_conflicts: vec![SchemaConflict {
            table_name: "t".to_string(),
            base_schema: serde_json::json!({}),
            our_schema: serde_json::json!({}),
            their_schema: serde_json::json!({}),
            description: "incompatible column types".to_string(),
        }],
    };
    db.commit_graph()
        .update_working_set(&ws.with_merge_state(Some(state)), expected)
        .unwrap();

    let status = rows("dolt_merge_status");
    assert_eq!(status[0].get("is_merging"), Some(&serde_json::json!(true)));
    assert_eq!(
        status[0].get("unmerged_tables"),
        Some(&serde_json::json!("t"))
    );

    let conflicts = rows("dolt_schema_conflicts");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(
        conflicts[0].get("description"),
        Some(&serde_json::json!("incompatible column types"))
    );
}

#[test]
fn table_names_as_of_filters_internal_tables() {
    let (_dir, db, session) = setup();
    db.create_table(&session, "vals", vals_schema(), None).unwrap();
    db.create_view(&session, "v", "CREATE VIEW v AS SELECT 1", ts(150))
        .unwrap();
    db.commit(&session, "create vals and v", &Signature::system(), ts(200))
        .unwrap();

    let names = db
        .get_table_names_as_of(&session, &AsOf::Time(ts(250)))
        .unwrap();
    assert_eq!(names, vec!["vals"]); // dolt_schemas is filtered

    let names = db
        .get_table_names_as_of(&session, &AsOf::Time(ts(50)))
        .unwrap();
    assert!(names.is_empty());
}

#[test]
fn unknown_dolt_prefixed_suffix_for_missing_table_resolves_to_nothing() {
    let (_dir, db, session) = setup();
    let resolved = db
        .get_table_insensitive(&session, "dolt_diff_nosuch")
        .unwrap();
    assert!(resolved.is_none());
}
