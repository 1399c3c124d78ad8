//! `dolt_commit_diff_<table>`: row diffs between exactly two commits.
//!
//! The engine supplies `to_commit` and `from_commit` through index-range
//! predicates. Resolution demands exactly one closed value on each side;
//! anything else fails before any partition is produced. The pseudo-commit
//! `"working"` resolves to the session's working root with no commit time.

use tracing::warn;

use crate::db::error::{DatabaseError, DbResult};
use crate::db::names;
use crate::dtables::table_diff::{diff_row, diff_schema, pk_sets_match};
use crate::dtables::{diff_table_rows, ResolveCtx, SysRow, SystemTable};
use crate::schema::Schema;
use crate::session::{Session, PRIMARY_KEY_CHANGE_WARNING};
use crate::storage::{BranchName, CommitGraph, RefSpec, RootValue, StorageError};

/// One endpoint of an index-range predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeCut {
    Closed(String),
    Open(String),
    Unbounded,
}

/// An index range over a commit column. A usable range is closed to the
/// same value on both sides (a point lookup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRange {
    pub lower: RangeCut,
    pub upper: RangeCut,
}

impl CommitRange {
    pub fn point(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            lower: RangeCut::Closed(value.clone()),
            upper: RangeCut::Closed(value),
        }
    }

    fn point_value(&self) -> Option<&str> {
        match (&self.lower, &self.upper) {
            (RangeCut::Closed(a), RangeCut::Closed(b)) if a == b => Some(a),
            _ => None,
        }
    }
}

/// Row-diff table between two explicitly selected commits.
pub struct CommitDiffTable {
    table: String,
    graph: CommitGraph,
    session: Session,
    working: RootValue,
    branch: Option<BranchName>,
    schema: Schema,
    to_ranges: Vec<CommitRange>,
    from_ranges: Vec<CommitRange>,
}

pub(crate) fn construct(ctx: &ResolveCtx<'_>, suffix: &str) -> DbResult<Option<SystemTable>> {
    let snapshot = match ctx.root.get_table(suffix)? {
        Some(s) => s,
        None => return Ok(None),
    };

    Ok(Some(SystemTable::CommitDiff(CommitDiffTable {
        table: snapshot.name.as_str().to_string(),
        graph: ctx.graph.clone(),
        session: ctx.session.clone(),
        working: ctx.root.clone(),
        branch: ctx.branch.cloned(),
        schema: snapshot.schema,
        to_ranges: Vec::new(),
        from_ranges: Vec::new(),
    })))
}

/// A diff endpoint: a root plus optional commit identity and time.
struct DiffAnchor {
    root: RootValue,
    commit: String,
    date: Option<i64>,
}

impl CommitDiffTable {
    pub fn name(&self) -> String {
        format!("{}{}", names::COMMIT_DIFF_TABLE_PREFIX, self.table)
    }

    pub fn schema(&self) -> Schema {
        diff_schema(&self.schema)
    }

    /// Install the index-range predicates gathered by the engine.
    pub fn with_commit_ranges(
        mut self,
        to_ranges: Vec<CommitRange>,
        from_ranges: Vec<CommitRange>,
    ) -> Self {
        self.to_ranges = to_ranges;
        self.from_ranges = from_ranges;
        self
    }

    /// Validate one side's ranges down to its single commit string.
    fn required_commit(
        ranges: &[CommitRange],
        missing: DatabaseError,
    ) -> DbResult<String> {
        if ranges.is_empty() {
            return Err(missing);
        }

        let mut values: Vec<&str> = Vec::new();
        for range in ranges {
            match range.point_value() {
                Some(v) => {
                    if !values.contains(&v) {
                        values.push(v);
                    }
                }
                // a bound other than closed-above/closed-below
                None => return Err(DatabaseError::InvalidCommitDiffArgs),
            }
        }

        if values.len() != 1 {
            return Err(missing);
        }
        Ok(values[0].to_string())
    }

    /// Resolve a commit string to a diff anchor. `"working"` maps to the
    /// session's working root with no commit time attached.
    fn resolve_anchor(&self, commit_str: &str) -> DbResult<DiffAnchor> {
        if commit_str.eq_ignore_ascii_case("working") {
            return Ok(DiffAnchor {
                root: self.working.clone(),
                commit: "WORKING".to_string(),
                date: None,
            });
        }

        let spec = RefSpec::parse(commit_str)
            .map_err(|_| DatabaseError::Storage(StorageError::RefNotFound(commit_str.into())))?;
        let info = self.graph.resolve(&spec, self.branch.as_ref())?;
        Ok(DiffAnchor {
            root: self.graph.root_at(info.id)?,
            commit: info.id.to_string(),
            date: Some(info.timestamp.timestamp()),
        })
    }

    pub fn rows(&self) -> DbResult<Vec<SysRow>> {
        let to_commit =
            Self::required_commit(&self.to_ranges, DatabaseError::ExactlyOneToCommit)?;
        let from_commit =
            Self::required_commit(&self.from_ranges, DatabaseError::ExactlyOneFromCommit)?;

        let to = self.resolve_anchor(&to_commit)?;
        let from = self.resolve_anchor(&from_commit)?;

        // a primary key change makes the diff unrepresentable: warn on the
        // session and yield no partitions
        let to_schema = to.root.get_table(&self.table)?.map(|s| s.schema);
        let from_schema = from.root.get_table(&self.table)?.map(|s| s.schema);
        if let (Some(to_schema), Some(from_schema)) = (&to_schema, &from_schema) {
            if !pk_sets_match(to_schema, from_schema) {
                let message = format!(
                    "cannot render full diff between commits {} and {} of table {}: primary key set changed",
                    from.commit, to.commit, self.table
                );
                warn!("{}", message);
                self.session
                    .push_warning(PRIMARY_KEY_CHANGE_WARNING, message);
                return Ok(Vec::new());
            }
        }

        let diffs = diff_table_rows(Some(&from.root), Some(&to.root), &self.table)
            .map_err(|e| match e {
                DatabaseError::Storage(inner) => DatabaseError::from_storage(&self.name(), inner),
                other => other,
            })?;

        Ok(diffs
            .iter()
            .map(|diff| {
                diff_row(
                    &self.schema,
                    diff,
                    &to.commit,
                    to.date,
                    &from.commit,
                    from.date,
                )
            })
            .collect())
    }
}
