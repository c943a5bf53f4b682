//! Per-table backlog of ids known to exist but not yet fetched.
//!
//! Ids land here when a foreign key referencing the table is observed in
//! another table's record. A drain works from a point-in-time
//! [`BacklogSnapshot`], so ids discovered while it runs wait for the next one.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use hydrate_core::Timestamp;

/// One pending id and when it was last discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingId {
    pub id: String,
    pub discovered_at: Timestamp,
}

#[derive(Debug, Clone, Copy)]
struct PendingEntry {
    discovered_at: Timestamp,
    /// Discovery order; rewritten on rediscovery.
    seq: u64,
}

#[derive(Debug, Default)]
struct BacklogInner {
    entries: HashMap<String, PendingEntry>,
    next_seq: u64,
}

/// Concurrency-safe set of pending ids with last-seen timestamps.
#[derive(Debug, Default)]
pub struct PendingIdBacklog {
    inner: Mutex<BacklogInner>,
}

impl PendingIdBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    // The map is never left half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, BacklogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `id` as pending, overwriting any earlier discovery time.
    pub fn add(&self, id: &str) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            id.to_string(),
            PendingEntry {
                discovered_at: Utc::now(),
                seq,
            },
        );
    }

    /// Forget `id`. Returns whether it was pending.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().entries.remove(id).is_some()
    }

    /// When `id` was last discovered, if it is pending.
    pub fn contains(&self, id: &str) -> Option<Timestamp> {
        self.lock().entries.get(id).map(|e| e.discovered_at)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Copy the current contents, ordered by most recent discovery.
    ///
    /// The copy is taken under the lock and detached from the backlog:
    /// later `add`/`remove` calls never show up in it.
    pub fn snapshot(&self) -> BacklogSnapshot {
        let (mut ordered, taken_at) = {
            let inner = self.lock();
            let ordered: Vec<(u64, PendingId)> = inner
                .entries
                .iter()
                .map(|(id, e)| {
                    (
                        e.seq,
                        PendingId {
                            id: id.clone(),
                            discovered_at: e.discovered_at,
                        },
                    )
                })
                .collect();
            (ordered, Utc::now())
        };
        ordered.sort_unstable_by_key(|(seq, _)| *seq);

        BacklogSnapshot {
            entries: ordered.into_iter().map(|(_, p)| p).collect(),
            taken_at,
        }
    }

    /// Drop ids whose last discovery is at least `max_age` old.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return 0;
        };

        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.discovered_at > cutoff);
        before - inner.entries.len()
    }
}

/// Point-in-time copy of a backlog.
#[derive(Debug, Clone)]
pub struct BacklogSnapshot {
    entries: Vec<PendingId>,
    taken_at: Timestamp,
}

impl BacklogSnapshot {
    /// When the snapshot was taken.
    pub fn taken_at(&self) -> Timestamp {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|p| p.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PendingId> {
        self.entries.iter()
    }

    /// Keep only the entries matching `f`.
    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&PendingId) -> bool,
    {
        self.entries.retain(f);
    }

    /// Partition into consecutive batches of at most `size` ids, preserving order.
    ///
    /// A `size` of zero is treated as one.
    pub fn batches(&self, size: usize) -> impl Iterator<Item = Vec<String>> + '_ {
        self.entries
            .chunks(size.max(1))
            .map(|chunk| chunk.iter().map(|p| p.id.clone()).collect())
    }
}

impl IntoIterator for BacklogSnapshot {
    type Item = PendingId;
    type IntoIter = std::vec::IntoIter<PendingId>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a BacklogSnapshot {
    type Item = &'a PendingId;
    type IntoIter = std::slice::Iter<'a, PendingId>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(snapshot: &BacklogSnapshot) -> Vec<&str> {
        snapshot.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_add_is_idempotent() {
        let backlog = PendingIdBacklog::new();
        backlog.add("a1");
        let first = backlog.contains("a1").unwrap();
        backlog.add("a1");
        let second = backlog.contains("a1").unwrap();

        assert_eq!(backlog.len(), 1);
        assert!(second >= first);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let backlog = PendingIdBacklog::new();
        backlog.add("a1");
        assert!(backlog.remove("a1"));
        assert!(!backlog.remove("a1"));
        assert!(backlog.is_empty());
        assert!(backlog.contains("a1").is_none());
    }

    #[test]
    fn test_snapshot_preserves_discovery_order() {
        let backlog = PendingIdBacklog::new();
        backlog.add("a1");
        backlog.add("a2");
        backlog.add("a3");
        // Rediscovery moves a1 to the back (last-seen semantics).
        backlog.add("a1");

        let snapshot = backlog.snapshot();
        assert_eq!(ids(&snapshot), vec!["a2", "a3", "a1"]);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_mutations() {
        let backlog = PendingIdBacklog::new();
        backlog.add("a1");
        backlog.add("a2");

        let snapshot = backlog.snapshot();
        backlog.add("a3");
        backlog.remove("a1");

        assert_eq!(ids(&snapshot), vec!["a1", "a2"]);
        assert!(!snapshot.contains("a3"));
        assert_eq!(backlog.len(), 2);
    }

    #[test]
    fn test_batches() {
        let backlog = PendingIdBacklog::new();
        for id in ["a1", "a2", "a3", "a4", "a5"] {
            backlog.add(id);
        }

        let batches: Vec<Vec<String>> = backlog.snapshot().batches(2).collect();
        assert_eq!(
            batches,
            vec![
                vec!["a1".to_string(), "a2".to_string()],
                vec!["a3".to_string(), "a4".to_string()],
                vec!["a5".to_string()],
            ]
        );
    }

    #[test]
    fn test_retain_filters_snapshot_only() {
        let backlog = PendingIdBacklog::new();
        backlog.add("a1");
        backlog.add("a2");

        let mut snapshot = backlog.snapshot();
        snapshot.retain(|p| p.id != "a1");

        assert_eq!(ids(&snapshot), vec!["a2"]);
        assert_eq!(backlog.len(), 2);
    }

    #[test]
    fn test_evict_older_than() {
        let backlog = PendingIdBacklog::new();
        backlog.add("a1");
        backlog.add("a2");

        assert_eq!(backlog.evict_older_than(Duration::from_secs(3600)), 0);
        assert_eq!(backlog.len(), 2);

        assert_eq!(backlog.evict_older_than(Duration::ZERO), 2);
        assert!(backlog.is_empty());
    }

    #[test]
    fn test_evict_with_huge_age_is_noop() {
        let backlog = PendingIdBacklog::new();
        backlog.add("a1");
        assert_eq!(backlog.evict_older_than(Duration::MAX), 0);
        assert_eq!(backlog.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_batches_cover_snapshot(
            ids in proptest::collection::vec("[a-z0-9]{1,6}", 0..200),
            size in 1usize..64,
        ) {
            let backlog = PendingIdBacklog::new();
            for id in &ids {
                backlog.add(id);
            }
            let snapshot = backlog.snapshot();
            let batches: Vec<Vec<String>> = snapshot.batches(size).collect();

            prop_assert_eq!(batches.len(), snapshot.len().div_ceil(size));
            prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));

            let flattened: Vec<String> = batches.into_iter().flatten().collect();
            let expected: Vec<String> = snapshot.into_iter().map(|p| p.id).collect();
            prop_assert_eq!(flattened, expected);
        }
    }
}
