//! Branch-scoped write permissions.
//!
//! A process-wide rule store backs the `dolt_branch_control` and
//! `dolt_branch_namespace_control` tables. With no rules present every user
//! may write everywhere; once rules exist, a write requires a matching rule.
//! Editing the rule stores is restricted to superuser sessions by the
//! facade.

use std::sync::Arc;

use parking_lot::RwLock;

/// `%` matches any run of characters, like the SQL LIKE wildcard.
fn pattern_matches(pattern: &str, value: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let value = value.to_lowercase();

    // split on '%' and greedily match the literal segments in order
    let segments: Vec<&str> = pattern.split('%').collect();
    if segments.len() == 1 {
        return pattern == value;
    }

    let mut rest = value.as_str();
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(pos) => {
                // the first segment must anchor at the start
                if i == 0 && pos != 0 {
                    return false;
                }
                rest = &rest[pos + segment.len()..];
            }
            None => return false,
        }
    }

    // the last segment must anchor at the end unless the pattern ends in %
    if let Some(last) = segments.last() {
        if !last.is_empty() && !pattern.ends_with('%') && !value.ends_with(&last.to_lowercase()) {
            return false;
        }
    }
    true
}

/// One row of `dolt_branch_control`: who may write which branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchControlRule {
    pub database: String,
    pub branch: String,
    pub user: String,
    pub host: String,
    pub permissions: String,
}

/// One row of `dolt_branch_namespace_control`: who may create branches
/// matching a namespace pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNamespaceRule {
    pub database: String,
    pub branch: String,
    pub user: String,
    pub host: String,
}

struct BranchControlInner {
    rules: RwLock<Vec<BranchControlRule>>,
    namespace_rules: RwLock<Vec<BranchNamespaceRule>>,
}

/// Process-wide branch control state, shared by every database handle.
#[derive(Clone)]
pub struct BranchControlStore {
    inner: Arc<BranchControlInner>,
}

impl BranchControlStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BranchControlInner {
                rules: RwLock::new(Vec::new()),
                namespace_rules: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Branch-scoped write authorization. Open when no rules exist.
    pub fn may_write(&self, database: &str, branch: &str, user: &str) -> bool {
        let rules = self.inner.rules.read();
        if rules.is_empty() {
            return true;
        }
        rules.iter().any(|r| {
            pattern_matches(&r.database, database)
                && pattern_matches(&r.branch, branch)
                && pattern_matches(&r.user, user)
                && r.permissions.contains("write")
        })
    }

    /// Whether a user may create a branch with this name. Open when no
    /// namespace rules exist.
    pub fn may_create_branch(&self, database: &str, branch: &str, user: &str) -> bool {
        let rules = self.inner.namespace_rules.read();
        if rules.is_empty() {
            return true;
        }
        rules.iter().any(|r| {
            pattern_matches(&r.database, database)
                && pattern_matches(&r.branch, branch)
                && pattern_matches(&r.user, user)
        })
    }

    pub fn rules(&self) -> Vec<BranchControlRule> {
        self.inner.rules.read().clone()
    }

    pub fn namespace_rules(&self) -> Vec<BranchNamespaceRule> {
        self.inner.namespace_rules.read().clone()
    }

    pub fn add_rule(&self, rule: BranchControlRule) {
        self.inner.rules.write().push(rule);
    }

    pub fn add_namespace_rule(&self, rule: BranchNamespaceRule) {
        self.inner.namespace_rules.write().push(rule);
    }

    pub fn remove_rule(&self, database: &str, branch: &str, user: &str) -> bool {
        let mut rules = self.inner.rules.write();
        let before = rules.len();
        rules.retain(|r| !(r.database == database && r.branch == branch && r.user == user));
        rules.len() != before
    }
}

impl Default for BranchControlStore {
    fn default() -> Self {
        Self::new()
    }
}
