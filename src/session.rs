//! Per-connection session state.
//!
//! A session owns, per `database@revision`: the working root it has
//! installed, the branch its working set tracks, a cached head commit, the
//! derived-table cache keyed by the working root's identity hash, and a view
//! definition cache. Temporary tables are registered per base database name
//! and shadow persisted tables of the same name.
//!
//! The derived-table cache is an optimization, not a source of truth:
//! entries may be evicted at any time, and `set_working_root` drops every
//! entry keyed by a different root hash so re-reads after a mutation always
//! observe the new root.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::fragments::ViewDefinition;
use crate::schema::Schema;
use crate::storage::{BranchName, CommitInfo, Row, RowKey, RootValue, TreeId};
use crate::table::TableAdapter;

/// Warning code emitted when a commit-diff table detects a primary key
/// change between the two commits.
pub const PRIMARY_KEY_CHANGE_WARNING: u16 = 1235;

/// A non-fatal warning attached to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionWarning {
    pub code: u16,
    pub message: String,
}

/// A session-local temporary table. Never persisted; discarded on session
/// close or explicit drop.
#[derive(Debug)]
pub struct TempTable {
    name: String,
    schema: Schema,
    rows: Mutex<BTreeMap<RowKey, Row>>,
}

impl TempTable {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().values().cloned().collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn put_row(&self, row: Row) {
        self.rows.lock().insert(row.key.clone(), row);
    }

    pub fn delete_row(&self, key: &RowKey) -> bool {
        self.rows.lock().remove(key).is_some()
    }
}

/// State for one `database@revision` within a session.
#[derive(Default)]
struct DbState {
    working_root: Option<RootValue>,
    /// Branch the working set tracks; `None` means detached head.
    branch: Option<BranchName>,
    head: Option<CommitInfo>,
    /// Derived-table cache: valid only for the recorded root hash.
    table_cache: Option<(TreeId, HashMap<String, Arc<TableAdapter>>)>,
    views_cache: Option<(TreeId, Vec<ViewDefinition>)>,
}

struct SessionInner {
    id: String,
    user: String,
    superuser: bool,
    cancelled: AtomicBool,
    /// Keyed by revision-qualified database name.
    dbs: RwLock<HashMap<String, DbState>>,
    /// Temporary tables, keyed by base database name then lowercased table
    /// name. The base-name scope means `db` and `db/branch` share one
    /// namespace.
    temp_tables: RwLock<HashMap<String, HashMap<String, Arc<TempTable>>>>,
    warnings: Mutex<Vec<SessionWarning>>,
}

/// A connection's session. Clone to share across components - it uses Arc
/// internally.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(user: impl Into<String>) -> Self {
        Self::build(user, false)
    }

    /// A session for the controlling principal: may edit the branch control
    /// tables.
    pub fn superuser(user: impl Into<String>) -> Self {
        Self::build(user, true)
    }

    fn build(user: impl Into<String>, superuser: bool) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: ulid::Ulid::new().to_string().to_lowercase(),
                user: user.into(),
                superuser,
                cancelled: AtomicBool::new(false),
                dbs: RwLock::new(HashMap::new()),
                temp_tables: RwLock::new(HashMap::new()),
                warnings: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn user(&self) -> &str {
        &self.inner.user
    }

    pub fn is_superuser(&self) -> bool {
        self.inner.superuser
    }

    // ==================== Cancellation ====================

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    // ==================== Working roots ====================

    pub fn working_root(&self, db_key: &str) -> Option<RootValue> {
        self.inner
            .dbs
            .read()
            .get(db_key)
            .and_then(|s| s.working_root.clone())
    }

    /// Install a new working root, invalidating caches keyed by any other
    /// root hash.
    pub fn set_working_root(&self, db_key: &str, root: RootValue) {
        let mut dbs = self.inner.dbs.write();
        let state = dbs.entry(db_key.to_string()).or_default();

        let new_hash = root.hash();
        if let Some((hash, _)) = &state.table_cache {
            if *hash != new_hash {
                debug!(db = db_key, "invalidating derived-table cache");
                state.table_cache = None;
            }
        }
        if let Some((hash, _)) = &state.views_cache {
            if *hash != new_hash {
                state.views_cache = None;
            }
        }

        state.working_root = Some(root);
    }

    pub fn branch(&self, db_key: &str) -> Option<BranchName> {
        self.inner.dbs.read().get(db_key).and_then(|s| s.branch.clone())
    }

    /// Record which branch the working set tracks; `None` marks the session
    /// detached for this database.
    pub fn set_branch(&self, db_key: &str, branch: Option<BranchName>) {
        let mut dbs = self.inner.dbs.write();
        dbs.entry(db_key.to_string()).or_default().branch = branch;
    }

    /// True once any state exists for this database.
    pub fn has_db_state(&self, db_key: &str) -> bool {
        self.inner.dbs.read().contains_key(db_key)
    }

    // ==================== Head commit cache ====================

    pub fn head_commit(&self, db_key: &str) -> Option<CommitInfo> {
        self.inner.dbs.read().get(db_key).and_then(|s| s.head.clone())
    }

    pub fn set_head_commit(&self, db_key: &str, head: CommitInfo) {
        let mut dbs = self.inner.dbs.write();
        dbs.entry(db_key.to_string()).or_default().head = Some(head);
    }

    // ==================== Derived-table cache ====================

    /// A cached adapter for `(root hash, table name)`, if present. Names are
    /// cached lowercased because resolution is case-insensitive.
    pub fn cached_table(
        &self,
        db_key: &str,
        root_hash: TreeId,
        lower_name: &str,
    ) -> Option<Arc<TableAdapter>> {
        let dbs = self.inner.dbs.read();
        let (hash, map) = dbs.get(db_key)?.table_cache.as_ref()?;
        if *hash != root_hash {
            return None;
        }
        map.get(lower_name).cloned()
    }

    pub fn cache_table(
        &self,
        db_key: &str,
        root_hash: TreeId,
        lower_name: &str,
        adapter: Arc<TableAdapter>,
    ) {
        let mut dbs = self.inner.dbs.write();
        let state = dbs.entry(db_key.to_string()).or_default();
        match &mut state.table_cache {
            Some((hash, map)) if *hash == root_hash => {
                map.insert(lower_name.to_string(), adapter);
            }
            _ => {
                let mut map = HashMap::new();
                map.insert(lower_name.to_string(), adapter);
                state.table_cache = Some((root_hash, map));
            }
        }
    }

    // ==================== View cache ====================

    pub fn cached_views(&self, db_key: &str, root_hash: TreeId) -> Option<Vec<ViewDefinition>> {
        let dbs = self.inner.dbs.read();
        let (hash, views) = dbs.get(db_key)?.views_cache.as_ref()?;
        if *hash != root_hash {
            return None;
        }
        Some(views.clone())
    }

    pub fn cache_views(&self, db_key: &str, root_hash: TreeId, views: Vec<ViewDefinition>) {
        let mut dbs = self.inner.dbs.write();
        let state = dbs.entry(db_key.to_string()).or_default();
        state.views_cache = Some((root_hash, views));
    }

    // ==================== Temporary tables ====================

    pub fn add_temp_table(&self, base_db: &str, table: TempTable) -> Arc<TempTable> {
        let arc = Arc::new(table);
        let mut map = self.inner.temp_tables.write();
        map.entry(base_db.to_string())
            .or_default()
            .insert(arc.name().to_lowercase(), arc.clone());
        arc
    }

    pub fn temp_table(&self, base_db: &str, name: &str) -> Option<Arc<TempTable>> {
        self.inner
            .temp_tables
            .read()
            .get(base_db)?
            .get(&name.to_lowercase())
            .cloned()
    }

    pub fn drop_temp_table(&self, base_db: &str, name: &str) -> bool {
        let mut map = self.inner.temp_tables.write();
        map.get_mut(base_db)
            .map(|tables| tables.remove(&name.to_lowercase()).is_some())
            .unwrap_or(false)
    }

    pub fn temp_table_names(&self, base_db: &str) -> Vec<String> {
        let map = self.inner.temp_tables.read();
        let mut names: Vec<String> = map
            .get(base_db)
            .map(|tables| tables.values().map(|t| t.name().to_string()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    // ==================== Warnings ====================

    pub fn push_warning(&self, code: u16, message: impl Into<String>) {
        self.inner.warnings.lock().push(SessionWarning {
            code,
            message: message.into(),
        });
    }

    pub fn warnings(&self) -> Vec<SessionWarning> {
        self.inner.warnings.lock().clone()
    }

    pub fn clear_warnings(&self) {
        self.inner.warnings.lock().clear();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("user", &self.inner.user)
            .finish()
    }
}
