//! Process-global state shared by every session of a database.
//!
//! The auto-increment tracker is the only process-wide mutable state in the
//! bridge. It is a dedicated service held by each database handle, not an
//! ambient singleton; all operations are atomic per table name.

use dashmap::DashMap;
use tracing::debug;

use crate::storage::{RootValue, StorageResult};

/// Per-table monotone counters, reconciled across branches.
///
/// Keys are lowercased table names: counters survive the case-insensitive
/// resolution the SQL surface uses. Entry-level locking in the underlying
/// map serializes concurrent callers per name; readers during a drop
/// reconciliation observe either the pre- or post-drop value, never a
/// partial update, because the recompute happens before the single insert.
pub struct AutoIncrementTracker {
    counters: DashMap<String, u64>,
}

impl AutoIncrementTracker {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    fn key(name: &str) -> String {
        name.to_lowercase()
    }

    /// Register a table; idempotent, initializes the counter to 1.
    pub fn add_new_table(&self, name: &str) {
        self.counters.entry(Self::key(name)).or_insert(1);
    }

    /// Reserve and return the next value for a table. Monotonic per name;
    /// concurrent callers are serialized on the entry.
    pub fn next(&self, name: &str) -> u64 {
        let mut entry = self.counters.entry(Self::key(name)).or_insert(1);
        let value = *entry;
        *entry = value + 1;
        value
    }

    /// Bump the counter to at least `value + 1`, e.g. after an insert with
    /// an explicit value.
    pub fn observe(&self, name: &str, value: u64) {
        let mut entry = self.counters.entry(Self::key(name)).or_insert(1);
        if value + 1 > *entry {
            *entry = value + 1;
        }
    }

    /// Current value without reserving it.
    pub fn peek(&self, name: &str) -> u64 {
        self.counters.get(&Self::key(name)).map(|v| *v).unwrap_or(1)
    }

    /// Raise the counter to at least `next` (the next value to hand out).
    pub fn bump_to(&self, name: &str, next: u64) {
        let mut entry = self.counters.entry(Self::key(name)).or_insert(1);
        if next > *entry {
            *entry = next;
        }
    }

    /// Reconcile the counter after a table is dropped on one branch.
    ///
    /// If no other working set retains the table, the counter resets to 1.
    /// Otherwise it becomes the maximum ceiling across the remaining
    /// working sets' snapshots of the table. This is O(branches × row scan)
    /// and belongs off the hot path.
    pub fn drop_table(&self, name: &str, other_working_sets: &[RootValue]) -> StorageResult<()> {
        let mut ceiling: Option<u64> = None;

        for root in other_working_sets {
            if let Some(snapshot) = root.get_table(name)? {
                if let Some(c) = snapshot.auto_increment_ceiling()? {
                    ceiling = Some(ceiling.map_or(c, |m| m.max(c)));
                } else {
                    // the table survives elsewhere with no values yet
                    ceiling = Some(ceiling.unwrap_or(1));
                }
            }
        }

        let new_value = ceiling.unwrap_or(1);
        self.counters.insert(Self::key(name), new_value);
        debug!(table = name, value = new_value, "reconciled auto-increment counter");
        Ok(())
    }

    /// Carry a counter across a rename.
    pub fn rename_table(&self, old: &str, new: &str) {
        let current = self.peek(old);
        self.counters.remove(&Self::key(old));
        let mut entry = self.counters.entry(Self::key(new)).or_insert(1);
        if current > *entry {
            *entry = current;
        }
    }
}

impl Default for AutoIncrementTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AutoIncrementTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoIncrementTracker")
            .field("tables", &self.counters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, SchemaBuilder, SqlType};
    use crate::storage::ObjectStore;
    use tempfile::TempDir;

    #[test]
    fn test_next_is_monotonic() {
        let tracker = AutoIncrementTracker::new();
        tracker.add_new_table("t");

        assert_eq!(tracker.next("t"), 1);
        assert_eq!(tracker.next("t"), 2);
        assert_eq!(tracker.next("T"), 3); // case-insensitive key
    }

    #[test]
    fn test_add_is_idempotent() {
        let tracker = AutoIncrementTracker::new();
        tracker.add_new_table("t");
        tracker.next("t");
        tracker.add_new_table("t");
        assert_eq!(tracker.peek("t"), 2);
    }

    #[test]
    fn test_observe_bumps_to_max() {
        let tracker = AutoIncrementTracker::new();
        tracker.add_new_table("t");

        tracker.observe("t", 10);
        assert_eq!(tracker.next("t"), 11);

        // observing a smaller value never regresses
        tracker.observe("t", 3);
        assert_eq!(tracker.next("t"), 12);
    }

    #[test]
    fn test_drop_with_no_other_working_sets_resets() {
        let tracker = AutoIncrementTracker::new();
        tracker.add_new_table("t");
        tracker.observe("t", 49);

        tracker.drop_table("t", &[]).unwrap();
        assert_eq!(tracker.next("t"), 1);
    }

    #[test]
    fn test_drop_recomputes_from_remaining_branches() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::init(dir.path()).unwrap();

        let schema = SchemaBuilder::new(1)
            .column(Column::new(1, "id", SqlType::UInt).primary_key().auto_increment())
            .build()
            .unwrap();

        // branch b retains the table with next-id 80
        let other = RootValue::empty(&store)
            .unwrap()
            .create_empty_table("t", schema.clone())
            .unwrap()
            .set_table_meta("t", schema, Some(80))
            .unwrap();

        let tracker = AutoIncrementTracker::new();
        tracker.add_new_table("t");
        tracker.observe("t", 49); // this branch was at 50

        tracker.drop_table("t", &[other]).unwrap();
        assert_eq!(tracker.next("t"), 80);
    }

    #[test]
    fn test_rename_carries_counter() {
        let tracker = AutoIncrementTracker::new();
        tracker.add_new_table("old");
        tracker.observe("old", 41);

        tracker.rename_table("old", "new");
        assert_eq!(tracker.next("new"), 42);
        assert_eq!(tracker.peek("old"), 1);
    }
}
