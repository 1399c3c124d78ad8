//! The database facade: the SQL engine's view of one version-controlled
//! database, scoped to a session.
//!
//! Operations consult session state for working roots and caches, resolve
//! names through the commit graph, splice in reflective tables for
//! `dolt_*` names, delegate user-table CRUD to table adapters, and persist
//! view/trigger/event/procedure definitions in the fragment stores.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::db::branch_control::{BranchControlRule, BranchControlStore, BranchNamespaceRule};
use crate::db::error::{DatabaseError, DbResult};
use crate::db::names::{self, FulltextNames};
use crate::dtables::{self, ResolveCtx, SystemTable};
use crate::fragments::{
    self, FragmentError, FragmentType, ProcedureDefinition, SchemaFragment, ViewDefinition,
};
use crate::globalstate::AutoIncrementTracker;
use crate::schema::{Collation, IndexDef, Schema};
use crate::session::{Session, TempTable};
use crate::storage::{
    BranchName, CommitGraph, CommitInfo, RefSpec, RemoveOpts, RootValue, Signature, StorageError,
    WorkingSet,
};
use crate::table::{RootHandle, TableAdapter};

/// Separator between a base database name and its revision qualifier.
pub const REVISION_DELIMITER: &str = "/";

/// How a database identity is pinned to history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionType {
    None,
    Branch,
    Tag,
    Commit,
}

/// The result of table resolution: a user table adapter, a synthesized
/// reflective table, or a session-local temporary table.
#[derive(Debug, Clone)]
pub enum ResolvedTable {
    User(Arc<TableAdapter>),
    System(Arc<SystemTable>),
    Temporary(Arc<TempTable>),
}

impl ResolvedTable {
    pub fn name(&self) -> String {
        match self {
            ResolvedTable::User(t) => t.name().as_str().to_string(),
            ResolvedTable::System(t) => t.name(),
            ResolvedTable::Temporary(t) => t.name().to_string(),
        }
    }
}

/// An `AS OF` axis value: an instant or a revision string.
#[derive(Debug, Clone)]
pub enum AsOf {
    Time(DateTime<Utc>),
    Ref(String),
}

impl AsOf {
    /// Interpret a raw value the engine extracted from the query. Strings
    /// and integer epoch-seconds are accepted; anything else is rejected.
    pub fn from_value(value: &serde_json::Value) -> DbResult<Self> {
        match value {
            serde_json::Value::String(s) => Ok(AsOf::Ref(s.clone())),
            serde_json::Value::Number(n) => {
                let secs = n
                    .as_i64()
                    .ok_or_else(|| DatabaseError::UnsupportedAsOfType(value.to_string()))?;
                let at = Utc
                    .timestamp_opt(secs, 0)
                    .single()
                    .ok_or_else(|| DatabaseError::UnsupportedAsOfType(value.to_string()))?;
                Ok(AsOf::Time(at))
            }
            other => Err(DatabaseError::UnsupportedAsOfType(other.to_string())),
        }
    }
}

/// One version-controlled database exposed to the SQL engine.
#[derive(Clone)]
pub struct Database {
    base_name: String,
    requested_name: String,
    revision: String,
    revision_type: RevisionType,
    ddb: CommitGraph,
    global: Arc<AutoIncrementTracker>,
    controls: BranchControlStore,
    default_branch: BranchName,
    read_only: bool,
}

impl Database {
    /// Wrap a commit graph as a database. Seeds the auto-increment tracker
    /// from every live working set so counters survive process restarts.
    pub fn new(name: impl Into<String>, ddb: CommitGraph) -> DbResult<Self> {
        let name = name.into();
        let db = Self {
            base_name: name.clone(),
            requested_name: name,
            revision: String::new(),
            revision_type: RevisionType::None,
            ddb,
            global: Arc::new(AutoIncrementTracker::new()),
            controls: BranchControlStore::new(),
            default_branch: BranchName::main(),
            read_only: false,
        };
        db.seed_auto_increment()?;
        Ok(db)
    }

    fn seed_auto_increment(&self) -> DbResult<()> {
        for branch in self.ddb.branches()? {
            let root = match self.ddb.working_set(&branch) {
                Some(ws) => ws.working,
                None => continue,
            };
            for table in root.table_names()? {
                let snapshot = match root.get_table(&table)? {
                    Some(s) => s,
                    None => continue,
                };
                if snapshot.schema.has_auto_increment() {
                    self.global.add_new_table(&table);
                    if let Some(next) = snapshot.auto_increment_ceiling()? {
                        self.global.bump_to(&table, next);
                    }
                }
            }
        }
        Ok(())
    }

    // ==================== Identity ====================

    /// The name users typed, revision qualifier included.
    pub fn name(&self) -> &str {
        &self.requested_name
    }

    /// Base name without a revision qualifier; grant lookups key on this.
    pub fn aliased_name(&self) -> &str {
        &self.base_name
    }

    /// Internal cache key: `base/revision`, or just `base` when unqualified.
    pub fn revision_qualified_name(&self) -> String {
        if self.revision.is_empty() {
            self.base_name.clone()
        } else {
            format!("{}{}{}", self.base_name, REVISION_DELIMITER, self.revision)
        }
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn revision_type(&self) -> RevisionType {
        self.revision_type
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn commit_graph(&self) -> &CommitGraph {
        &self.ddb
    }

    pub fn auto_increment_tracker(&self) -> &Arc<AutoIncrementTracker> {
        &self.global
    }

    pub fn branch_controls(&self) -> &BranchControlStore {
        &self.controls
    }

    // ==================== Revision qualification ====================

    /// A copy of this database pinned to a branch, under a new requested
    /// name. The tracker and control stores are shared, not copied.
    pub fn with_branch_revision(
        &self,
        requested_name: impl Into<String>,
        branch: BranchName,
    ) -> Database {
        let mut db = self.clone();
        db.requested_name = requested_name.into();
        db.revision = branch.as_str().to_string();
        db.revision_type = RevisionType::Branch;
        db
    }

    /// Pin to an arbitrary revision string: branch, tag, or commit hash.
    pub fn with_revision(&self, requested_name: impl Into<String>, revision: &str) -> DbResult<Database> {
        let mut db = self.clone();
        db.requested_name = requested_name.into();
        db.revision = revision.to_string();

        if let Ok(branch) = BranchName::new(revision) {
            if self.ddb.branches()?.contains(&branch) {
                db.revision_type = RevisionType::Branch;
                return Ok(db);
            }
        }
        if let Ok(tag) = crate::storage::TagName::new(revision) {
            if self.ddb.resolve(&RefSpec::Tag(tag), None).is_ok() {
                db.revision_type = RevisionType::Tag;
                return Ok(db);
            }
        }
        if self.ddb.resolve(&RefSpec::Hash(revision.to_string()), None).is_ok() {
            db.revision_type = RevisionType::Commit;
            return Ok(db);
        }

        Err(DatabaseError::Storage(StorageError::RefNotFound(
            revision.to_string(),
        )))
    }

    // ==================== Session state ====================

    /// Branch the current revision tracks; `None` for detached identities.
    fn current_branch(&self) -> Option<BranchName> {
        match self.revision_type {
            RevisionType::None => Some(self.default_branch.clone()),
            RevisionType::Branch => BranchName::new(&self.revision).ok(),
            RevisionType::Tag | RevisionType::Commit => None,
        }
    }

    fn check_cancelled(&self, session: &Session) -> DbResult<()> {
        if session.is_cancelled() {
            return Err(DatabaseError::Cancelled);
        }
        Ok(())
    }

    /// Make sure the session has state for this database, installing the
    /// initial working root on first touch.
    fn ensure_state(&self, session: &Session) -> DbResult<RootValue> {
        let key = self.revision_qualified_name();
        if let Some(root) = session.working_root(&key) {
            return Ok(root);
        }

        match self.current_branch() {
            Some(branch) => {
                let head = self.ddb.branch_head(&branch)?;
                let root = match self.ddb.working_set(&branch) {
                    Some(ws) => ws.working,
                    None => self.ddb.root_at(head.id)?,
                };
                session.set_working_root(&key, root.clone());
                session.set_branch(&key, Some(branch));
                session.set_head_commit(&key, head);
                Ok(root)
            }
            None => {
                // tag or commit revision: detached head, reads only
                let spec = match self.revision_type {
                    RevisionType::Tag => RefSpec::Tag(
                        crate::storage::TagName::new(&self.revision)
                            .map_err(StorageError::from)?,
                    ),
                    _ => RefSpec::Hash(self.revision.clone()),
                };
                let head = self.ddb.resolve(&spec, None)?;
                let root = self.ddb.root_at(head.id)?;
                session.set_working_root(&key, root.clone());
                session.set_branch(&key, None);
                session.set_head_commit(&key, head);
                Ok(root)
            }
        }
    }

    /// The session's current working root for this database.
    pub fn get_root(&self, session: &Session) -> DbResult<RootValue> {
        self.ensure_state(session)
    }

    /// Promote a new working root in the session. Isolation is per session:
    /// other sessions on the same branch do not observe it until commit.
    pub fn set_root(&self, session: &Session, root: RootValue) -> DbResult<()> {
        self.ensure_state(session)?;
        session.set_working_root(&self.revision_qualified_name(), root);
        Ok(())
    }

    /// The root of the branch head commit.
    pub fn get_head_root(&self, session: &Session) -> DbResult<RootValue> {
        self.ensure_state(session)?;
        let key = self.revision_qualified_name();
        let head = match session.head_commit(&key) {
            Some(h) => h,
            None => {
                let branch = self
                    .current_branch()
                    .ok_or(DatabaseError::DetachedHead)?;
                self.ddb.branch_head(&branch)?
            }
        };
        Ok(self.ddb.root_at(head.id)?)
    }

    /// The branch working set. Detached-head sessions have none and are
    /// rejected with a dedicated error.
    pub fn get_working_set(&self, session: &Session) -> DbResult<WorkingSet> {
        self.ensure_state(session)?;
        let branch = self.current_branch().ok_or(DatabaseError::DetachedHead)?;
        self.ddb
            .working_set(&branch)
            .ok_or_else(|| DatabaseError::NoSessionState(self.revision_qualified_name()))
    }

    fn root_handle(&self, session: &Session) -> RootHandle {
        RootHandle::new(session.clone(), self.revision_qualified_name())
    }

    fn check_write_auth(&self, session: &Session) -> DbResult<BranchName> {
        let branch = self.current_branch().ok_or(DatabaseError::DetachedHead)?;
        if self.read_only
            || !self
                .controls
                .may_write(&self.base_name, branch.as_str(), session.user())
        {
            return Err(DatabaseError::AuthorizationDenied {
                user: session.user().to_string(),
                branch: branch.as_str().to_string(),
            });
        }
        Ok(branch)
    }

    // ==================== Table resolution ====================

    fn resolve_ctx<'a>(
        &'a self,
        session: &'a Session,
        root: &'a RootValue,
        db_key: &'a str,
        branch: Option<&'a BranchName>,
        head: Option<&'a CommitInfo>,
    ) -> ResolveCtx<'a> {
        ResolveCtx {
            graph: &self.ddb,
            session,
            root,
            db_key,
            branch,
            controls: &self.controls,
            head,
        }
    }

    /// Case-insensitive table resolution: temporary registry first, then
    /// the reflective catalog, then user tables through the derived-table
    /// cache.
    pub fn get_table_insensitive(
        &self,
        session: &Session,
        table_name: &str,
    ) -> DbResult<Option<ResolvedTable>> {
        self.check_cancelled(session)?;

        if let Some(temp) = session.temp_table(&self.base_name, table_name) {
            return Ok(Some(ResolvedTable::Temporary(temp)));
        }

        let root = self.ensure_state(session)?;
        self.resolve_in_root(session, &root, table_name, None, true)
    }

    fn resolve_in_root(
        &self,
        session: &Session,
        root: &RootValue,
        table_name: &str,
        head: Option<&CommitInfo>,
        use_cache: bool,
    ) -> DbResult<Option<ResolvedTable>> {
        let key = self.revision_qualified_name();
        let branch = session.branch(&key);

        let ctx = self.resolve_ctx(session, root, &key, branch.as_ref(), head);
        if let Some(system) = dtables::resolve_system_table(&ctx, table_name)? {
            return Ok(Some(ResolvedTable::System(Arc::new(system))));
        }

        let lower = table_name.to_lowercase();
        if use_cache {
            if let Some(adapter) = session.cached_table(&key, root.hash(), &lower) {
                return Ok(Some(ResolvedTable::User(adapter)));
            }
        }

        let snapshot = match root
            .get_table(table_name)
            .map_err(|e| DatabaseError::from_storage(table_name, e))?
        {
            Some(s) => s,
            None => return Ok(None),
        };

        let handle = self.root_handle(session);
        let canonical = snapshot.name.as_str().to_string();
        let adapter = if names::has_reserved_prefix(&canonical) {
            // persisted internal tables take DML but not DDL
            TableAdapter::writable(snapshot, root.clone(), handle, self.global.clone())
        } else {
            TableAdapter::alterable(snapshot, root.clone(), handle, self.global.clone())
        };

        let adapter = Arc::new(adapter);
        if use_cache {
            session.cache_table(&key, root.hash(), &lower, adapter.clone());
        }
        Ok(Some(ResolvedTable::User(adapter)))
    }

    /// Resolve a table at an `AS OF` point. User tables come back locked to
    /// the resolved root; reflective tables already encode their own root
    /// selection and are returned unwrapped.
    pub fn get_table_as_of(
        &self,
        session: &Session,
        table_name: &str,
        as_of: &AsOf,
    ) -> DbResult<Option<ResolvedTable>> {
        self.check_cancelled(session)?;

        let (head, root) = match self.resolve_as_of(session, as_of)? {
            Some(pair) => pair,
            None => return Ok(None),
        };

        let resolved = self.resolve_in_root(session, &root, table_name, head.as_ref(), false)?;
        match resolved {
            Some(ResolvedTable::User(adapter)) => {
                let locked = adapter
                    .lock_to_root(root)
                    .map_err(|e| DatabaseError::from_storage(table_name, e))?;
                Ok(Some(ResolvedTable::User(Arc::new(locked))))
            }
            other => Ok(other),
        }
    }

    /// Resolve an `AS OF` value to `(head commit, root)`. A timestamp with
    /// no commit at or before it resolves to nothing rather than an error.
    fn resolve_as_of(
        &self,
        session: &Session,
        as_of: &AsOf,
    ) -> DbResult<Option<(Option<CommitInfo>, RootValue)>> {
        self.ensure_state(session)?;
        let key = self.revision_qualified_name();
        let branch = self.current_branch();

        match as_of {
            AsOf::Time(at) => {
                let branch = branch.ok_or(DatabaseError::DetachedHead)?;
                let head = self.ddb.branch_head(&branch)?;
                match self.ddb.as_of_time(head.id, *at)? {
                    Some(commit) => {
                        let root = self.ddb.root_at(commit.id)?;
                        Ok(Some((Some(commit), root)))
                    }
                    None => Ok(None),
                }
            }
            AsOf::Ref(s) => {
                let spec = RefSpec::parse(s).map_err(StorageError::from)?;
                match spec {
                    RefSpec::Working => {
                        // resolves against the current database's session
                        // state, paired with the branch head commit
                        let root = session
                            .working_root(&key)
                            .ok_or_else(|| DatabaseError::NoSessionState(key.clone()))?;
                        let head = session.head_commit(&key);
                        Ok(Some((head, root)))
                    }
                    RefSpec::Staged => {
                        let ws = self.get_working_set(session)?;
                        let head = session.head_commit(&key);
                        Ok(Some((head, ws.staged)))
                    }
                    other => {
                        let commit = self.ddb.resolve(&other, branch.as_ref())?;
                        let root = self.ddb.root_at(commit.id)?;
                        Ok(Some((Some(commit), root)))
                    }
                }
            }
        }
    }

    // ==================== Table enumeration ====================

    /// User-visible table names: `dolt_`-prefixed names are filtered out.
    pub fn get_table_names(&self, session: &Session) -> DbResult<Vec<String>> {
        Ok(self
            .get_all_table_names(session)?
            .into_iter()
            .filter(|n| !names::has_reserved_prefix(n))
            .collect())
    }

    /// Every persisted table name, internal ones included.
    pub fn get_all_table_names(&self, session: &Session) -> DbResult<Vec<String>> {
        self.check_cancelled(session)?;
        let root = self.ensure_state(session)?;
        Ok(root.table_names()?)
    }

    /// Table names at an `AS OF` point, filtered like `get_table_names`.
    pub fn get_table_names_as_of(&self, session: &Session, as_of: &AsOf) -> DbResult<Vec<String>> {
        self.check_cancelled(session)?;
        let root = match self.resolve_as_of(session, as_of)? {
            Some((_, root)) => root,
            None => return Ok(Vec::new()),
        };
        Ok(root
            .table_names()?
            .into_iter()
            .filter(|n| !names::has_reserved_prefix(n))
            .collect())
    }

    // ==================== DDL ====================

    /// Create a table in the working root.
    pub fn create_table(
        &self,
        session: &Session,
        table_name: &str,
        schema: Schema,
        collation: Option<Collation>,
    ) -> DbResult<()> {
        self.check_cancelled(session)?;
        self.check_write_auth(session)?;
        names::validate_create_name(table_name)?;

        if table_name.eq_ignore_ascii_case(names::DOCS_TABLE)
            && !names::docs_schemas().iter().any(|c| schema.equal_ignoring_tags(c))
        {
            return Err(DatabaseError::ReservedTableName(table_name.to_string()));
        }

        if schema.is_using_spatial_pk() {
            return Err(DatabaseError::SpatialKey);
        }

        let mut schema = schema;
        schema.collation = collation;

        let root = self.ensure_state(session)?;
        let new_root = root
            .create_empty_table(table_name, schema.clone())
            .map_err(|e| DatabaseError::from_storage(table_name, e))?;

        if schema.has_auto_increment() {
            self.global.add_new_table(table_name);
        }

        debug!(table = table_name, "created table");
        self.set_root(session, new_root)
    }

    /// Create a table with a secondary index. Text columns in the primary
    /// key may not carry prefix lengths.
    pub fn create_indexed_table(
        &self,
        session: &Session,
        table_name: &str,
        schema: Schema,
        index: IndexDef,
        collation: Option<Collation>,
    ) -> DbResult<()> {
        for index_col in &index.columns {
            if index_col.prefix_length.is_some() {
                if let Some(col) = schema.get_column(&index_col.name) {
                    if col.primary_key && col.ty.is_text() {
                        return Err(DatabaseError::UnsupportedIndexPrefix(index_col.name.clone()));
                    }
                }
            }
        }

        let schema = schema.with_index(index);
        self.create_table(session, table_name, schema, collation)
    }

    /// Create a session-local temporary table. Shadows any persisted table
    /// of the same name for this session; scoped to the base database name.
    pub fn create_temporary_table(
        &self,
        session: &Session,
        table_name: &str,
        schema: Schema,
    ) -> DbResult<()> {
        self.check_cancelled(session)?;
        names::validate_create_name(table_name)?;

        if session.temp_table(&self.base_name, table_name).is_some() {
            return Err(DatabaseError::TableAlreadyExists(table_name.to_string()));
        }

        session.add_temp_table(&self.base_name, TempTable::new(table_name, schema));
        Ok(())
    }

    /// Drop a table: temporary first, then persisted. Auto-increment
    /// counters are reconciled against every other branch's working set.
    pub fn drop_table(&self, session: &Session, table_name: &str) -> DbResult<()> {
        self.check_cancelled(session)?;

        if session.drop_temp_table(&self.base_name, table_name) {
            return Ok(());
        }

        let branch = self.check_write_auth(session)?;

        if names::is_non_alterable_system_table(table_name) {
            return Err(DatabaseError::SystemTableAlter(table_name.to_string()));
        }

        let root = self.ensure_state(session)?;
        let snapshot = root
            .get_table(table_name)?
            .ok_or_else(|| DatabaseError::TableNotFound(table_name.to_string()))?;

        let new_root = root
            .remove_tables(&[table_name], RemoveOpts::default())
            .map_err(|e| DatabaseError::from_storage(table_name, e))?;
        self.set_root(session, new_root)?;

        if snapshot.schema.has_auto_increment() {
            let others = self.ddb.other_working_roots(&branch)?;
            self.global.drop_table(table_name, &others)?;
        }

        debug!(table = table_name, "dropped table");
        Ok(())
    }

    /// Rename a table. The old name must not be a system table; the new
    /// name must be valid, unreserved and unused.
    pub fn rename_table(&self, session: &Session, old_name: &str, new_name: &str) -> DbResult<()> {
        self.check_cancelled(session)?;
        self.check_write_auth(session)?;

        if names::is_non_alterable_system_table(old_name) {
            return Err(DatabaseError::SystemTableAlter(old_name.to_string()));
        }
        names::validate_create_name(new_name)?;

        let root = self.ensure_state(session)?;
        let snapshot = root
            .get_table(old_name)?
            .ok_or_else(|| DatabaseError::TableNotFound(old_name.to_string()))?;
        if root.get_table(new_name)?.is_some() {
            return Err(DatabaseError::TableAlreadyExists(new_name.to_string()));
        }

        let new_root = root
            .rename_table(old_name, new_name)
            .map_err(|e| DatabaseError::from_storage(old_name, e))?;
        self.set_root(session, new_root)?;

        if snapshot.schema.has_auto_increment() {
            self.global.rename_table(old_name, new_name);
        }

        debug!(old = old_name, new = new_name, "renamed table");
        Ok(())
    }

    // ==================== Views ====================

    /// Materialized view definitions, cached per working-root hash.
    pub fn all_views(&self, session: &Session) -> DbResult<Vec<ViewDefinition>> {
        let root = self.ensure_state(session)?;
        let key = self.revision_qualified_name();

        if let Some(views) = session.cached_views(&key, root.hash()) {
            return Ok(views);
        }

        let views = fragments::views(&root)?;
        session.cache_views(&key, root.hash(), views.clone());
        Ok(views)
    }

    pub fn get_view_definition(
        &self,
        session: &Session,
        view_name: &str,
    ) -> DbResult<Option<ViewDefinition>> {
        Ok(self
            .all_views(session)?
            .into_iter()
            .find(|v| v.name.eq_ignore_ascii_case(view_name)))
    }

    pub fn create_view(
        &self,
        session: &Session,
        name: &str,
        create_view_statement: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        self.check_cancelled(session)?;
        self.check_write_auth(session)?;
        let root = self.ensure_state(session)?;

        let frag = SchemaFragment {
            fragment_type: FragmentType::View,
            name: name.to_string(),
            fragment: create_view_statement.to_string(),
            created_at: at.timestamp(),
            sql_mode: None,
        };
        let new_root = fragments::add_fragment(&root, &frag).map_err(|e| match e {
            FragmentError::Exists => DatabaseError::ViewExists(name.to_string()),
            FragmentError::Missing => DatabaseError::ViewNotFound(name.to_string()),
            FragmentError::Storage(s) => DatabaseError::from_storage(fragments::SCHEMAS_TABLE, s),
        })?;
        self.set_root(session, new_root)
    }

    pub fn drop_view(&self, session: &Session, name: &str) -> DbResult<()> {
        self.drop_fragment(session, FragmentType::View, name)
    }

    // ==================== Triggers ====================

    pub fn get_triggers(&self, session: &Session) -> DbResult<Vec<SchemaFragment>> {
        let root = self.ensure_state(session)?;
        Ok(fragments::fragments_of_type(&root, FragmentType::Trigger)?)
    }

    pub fn create_trigger(
        &self,
        session: &Session,
        name: &str,
        create_statement: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        self.add_fragment(session, FragmentType::Trigger, name, create_statement, at)
    }

    pub fn drop_trigger(&self, session: &Session, name: &str) -> DbResult<()> {
        self.drop_fragment(session, FragmentType::Trigger, name)
    }

    // ==================== Events ====================

    pub fn get_events(&self, session: &Session) -> DbResult<Vec<SchemaFragment>> {
        let root = self.ensure_state(session)?;
        Ok(fragments::fragments_of_type(&root, FragmentType::Event)?)
    }

    pub fn get_event(&self, session: &Session, name: &str) -> DbResult<Option<SchemaFragment>> {
        let root = self.ensure_state(session)?;
        Ok(fragments::get_fragment(&root, FragmentType::Event, name)?)
    }

    pub fn create_event(
        &self,
        session: &Session,
        name: &str,
        create_statement: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        self.add_fragment(session, FragmentType::Event, name, create_statement, at)
    }

    pub fn drop_event(&self, session: &Session, name: &str) -> DbResult<()> {
        self.drop_fragment(session, FragmentType::Event, name)
    }

    fn add_fragment(
        &self,
        session: &Session,
        fragment_type: FragmentType,
        name: &str,
        statement: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        self.check_cancelled(session)?;
        self.check_write_auth(session)?;
        let root = self.ensure_state(session)?;

        let frag = SchemaFragment {
            fragment_type,
            name: name.to_string(),
            fragment: statement.to_string(),
            created_at: at.timestamp(),
            sql_mode: None,
        };
        let new_root = fragments::add_fragment(&root, &frag)
            .map_err(|e| Self::fragment_error(fragment_type, name, e))?;
        self.set_root(session, new_root)
    }

    fn drop_fragment(
        &self,
        session: &Session,
        fragment_type: FragmentType,
        name: &str,
    ) -> DbResult<()> {
        self.check_cancelled(session)?;
        self.check_write_auth(session)?;
        let root = self.ensure_state(session)?;

        let new_root = fragments::drop_fragment(&root, fragment_type, name)
            .map_err(|e| Self::fragment_error(fragment_type, name, e))?;
        self.set_root(session, new_root)
    }

    fn fragment_error(fragment_type: FragmentType, name: &str, err: FragmentError) -> DatabaseError {
        let name = name.to_string();
        match (fragment_type, err) {
            (FragmentType::View, FragmentError::Exists) => DatabaseError::ViewExists(name),
            (FragmentType::View, FragmentError::Missing) => DatabaseError::ViewNotFound(name),
            (FragmentType::Trigger, FragmentError::Exists) => DatabaseError::TriggerExists(name),
            (FragmentType::Trigger, FragmentError::Missing) => DatabaseError::TriggerNotFound(name),
            (FragmentType::Event, FragmentError::Exists) => DatabaseError::EventExists(name),
            (FragmentType::Event, FragmentError::Missing) => DatabaseError::EventNotFound(name),
            (_, FragmentError::Storage(s)) => {
                DatabaseError::from_storage(fragments::SCHEMAS_TABLE, s)
            }
        }
    }

    // ==================== Procedures ====================

    pub fn get_stored_procedures(&self, session: &Session) -> DbResult<Vec<ProcedureDefinition>> {
        let root = self.ensure_state(session)?;
        Ok(fragments::procedures(&root)?)
    }

    pub fn create_stored_procedure(
        &self,
        session: &Session,
        name: &str,
        create_statement: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        self.check_cancelled(session)?;
        self.check_write_auth(session)?;
        let root = self.ensure_state(session)?;

        let proc = ProcedureDefinition {
            name: name.to_string(),
            create_statement: create_statement.to_string(),
            created_at: at.timestamp(),
            modified_at: at.timestamp(),
            sql_mode: None,
        };
        let new_root = fragments::add_procedure(&root, &proc).map_err(|e| match e {
            FragmentError::Exists => DatabaseError::ProcedureExists(name.to_string()),
            FragmentError::Missing => DatabaseError::ProcedureNotFound(name.to_string()),
            FragmentError::Storage(s) => {
                DatabaseError::from_storage(fragments::PROCEDURES_TABLE, s)
            }
        })?;
        self.set_root(session, new_root)
    }

    pub fn drop_stored_procedure(&self, session: &Session, name: &str) -> DbResult<()> {
        self.check_cancelled(session)?;
        self.check_write_auth(session)?;
        let root = self.ensure_state(session)?;

        let new_root = fragments::drop_procedure(&root, name).map_err(|e| match e {
            FragmentError::Exists => DatabaseError::ProcedureExists(name.to_string()),
            FragmentError::Missing => DatabaseError::ProcedureNotFound(name.to_string()),
            FragmentError::Storage(s) => {
                DatabaseError::from_storage(fragments::PROCEDURES_TABLE, s)
            }
        })?;
        self.set_root(session, new_root)
    }

    // ==================== Collation ====================

    pub fn get_collation(&self, session: &Session) -> DbResult<Collation> {
        let root = self.ensure_state(session)?;
        Ok(root.collation()?)
    }

    pub fn set_collation(&self, session: &Session, collation: Collation) -> DbResult<()> {
        self.check_cancelled(session)?;
        self.check_write_auth(session)?;
        let root = self.ensure_state(session)?;
        let new_root = root.set_collation(&collation)?;
        self.set_root(session, new_root)
    }

    // ==================== Full-text ====================

    /// Generate the five auxiliary table names backing a full-text index.
    pub fn create_fulltext_table_names(
        &self,
        session: &Session,
        parent_table: &str,
        parent_index: &str,
    ) -> DbResult<FulltextNames> {
        let root = self.ensure_state(session)?;
        names::create_fulltext_names(&root, parent_table, parent_index)
    }

    // ==================== Branch control ====================

    /// Add a write-permission rule. Restricted to the controlling principal.
    pub fn add_branch_control_rule(
        &self,
        session: &Session,
        rule: BranchControlRule,
    ) -> DbResult<()> {
        self.require_superuser(session)?;
        self.controls.add_rule(rule);
        Ok(())
    }

    pub fn add_branch_namespace_rule(
        &self,
        session: &Session,
        rule: BranchNamespaceRule,
    ) -> DbResult<()> {
        self.require_superuser(session)?;
        self.controls.add_namespace_rule(rule);
        Ok(())
    }

    fn require_superuser(&self, session: &Session) -> DbResult<()> {
        if !session.is_superuser() {
            return Err(DatabaseError::AuthorizationDenied {
                user: session.user().to_string(),
                branch: "branch control".to_string(),
            });
        }
        Ok(())
    }

    // ==================== Branches & commits ====================

    /// Create a branch at a revision. Namespace rules gate creation.
    pub fn create_branch(
        &self,
        session: &Session,
        branch_name: &str,
        at_revision: &str,
    ) -> DbResult<()> {
        self.check_cancelled(session)?;
        let branch = BranchName::new(branch_name).map_err(StorageError::from)?;

        if !self
            .controls
            .may_create_branch(&self.base_name, branch_name, session.user())
        {
            return Err(DatabaseError::AuthorizationDenied {
                user: session.user().to_string(),
                branch: branch_name.to_string(),
            });
        }

        let spec = RefSpec::parse(at_revision).map_err(StorageError::from)?;
        let at = self.ddb.resolve(&spec, self.current_branch().as_ref())?;
        self.ddb.create_branch(&branch, at.id)?;
        Ok(())
    }

    /// Commit the session's working root to the current branch. Publishes
    /// the session root into the shared working set (CAS), creates the
    /// commit, and re-syncs the session to the new head.
    pub fn commit(
        &self,
        session: &Session,
        message: &str,
        author: &Signature,
        at: DateTime<Utc>,
    ) -> DbResult<CommitInfo> {
        self.check_cancelled(session)?;
        let branch = self.check_write_auth(session)?;
        let root = self.ensure_state(session)?;

        let ws = self
            .ddb
            .working_set(&branch)
            .ok_or(DatabaseError::DetachedHead)?;
        let expected = ws.working.hash();
        let staged = ws.with_working(root.clone()).with_staged(root);
        self.ddb.update_working_set(&staged, expected)?;

        let info = self.ddb.commit_staged(&branch, message, author, at)?;

        let key = self.revision_qualified_name();
        session.set_head_commit(&key, info.clone());
        session.set_working_root(&key, self.ddb.root_at(info.id)?);
        Ok(info)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.requested_name)
            .field("revision", &self.revision)
            .finish()
    }
}

/// A thin wrapper forcing a database read-only; revision qualification
/// re-wraps.
#[derive(Clone, Debug)]
pub struct ReadOnlyDatabase {
    inner: Database,
}

impl ReadOnlyDatabase {
    pub fn new(mut db: Database) -> Self {
        db.read_only = true;
        Self { inner: db }
    }

    pub fn is_read_only(&self) -> bool {
        true
    }

    pub fn with_branch_revision(
        &self,
        requested_name: impl Into<String>,
        branch: BranchName,
    ) -> ReadOnlyDatabase {
        ReadOnlyDatabase::new(self.inner.with_branch_revision(requested_name, branch))
    }
}

impl std::ops::Deref for ReadOnlyDatabase {
    type Target = Database;

    fn deref(&self) -> &Database {
        &self.inner
    }
}
