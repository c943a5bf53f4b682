//! Per-table expiring record store.
//!
//! Each entry carries a sliding whole-record TTL, and each field inside it
//! carries its own last-touched instant so a record fetched with a narrow
//! projection can later be topped up with more columns without evicting
//! what is already known.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use hydrate_core::{FieldValue, Record, Timestamp};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CachedField {
    value: FieldValue,
    touched_at: Instant,
}

/// A cached record with per-field freshness.
#[derive(Debug, Clone)]
struct CachedRecord {
    fields: HashMap<String, CachedField>,
    /// Last read or write of the entry as a whole.
    touched_at: Instant,
    /// Last time field values were written.
    written_at: Timestamp,
}

impl CachedRecord {
    fn new(now: Instant) -> Self {
        Self {
            fields: HashMap::new(),
            touched_at: now,
            written_at: Utc::now(),
        }
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.touched_at) >= ttl
    }

    fn merge(&mut self, record: Record, now: Instant) {
        for (name, value) in record {
            self.fields.insert(
                name,
                CachedField {
                    value,
                    touched_at: now,
                },
            );
        }
        self.touched_at = now;
        self.written_at = Utc::now();
    }

    fn fresh_fields(&self, now: Instant, ttl: Duration) -> Record {
        self.fields
            .iter()
            .filter(|(_, f)| now.saturating_duration_since(f.touched_at) < ttl)
            .map(|(name, f)| (name.clone(), f.value.clone()))
            .collect()
    }

    /// Slide the entry TTL, then the TTL of every requested field that is
    /// still fresh (all fresh fields when `fields` is `None`).
    ///
    /// Returns whether every requested field was present and fresh.
    fn refresh(&mut self, now: Instant, ttl: Duration, fields: Option<&[String]>) -> bool {
        self.touched_at = now;
        match fields {
            None => {
                let mut any_fresh = false;
                for field in self.fields.values_mut() {
                    if now.saturating_duration_since(field.touched_at) < ttl {
                        field.touched_at = now;
                        any_fresh = true;
                    }
                }
                any_fresh
            }
            Some(requested) => {
                let mut complete = true;
                for name in requested {
                    match self.fields.get_mut(name) {
                        Some(field) if now.saturating_duration_since(field.touched_at) < ttl => {
                            field.touched_at = now;
                        }
                        _ => complete = false,
                    }
                }
                complete
            }
        }
    }
}

/// Result of a projected lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Every requested field is cached and fresh.
    Complete { record: Record, written_at: Timestamp },
    /// The entry exists but some requested fields are missing or expired.
    Partial { record: Record, written_at: Timestamp },
    /// No live entry.
    Missing,
}

impl Projection {
    /// Returns true for `Complete`.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    /// The complete record, if any.
    pub fn into_complete(self) -> Option<(Record, Timestamp)> {
        match self {
            Self::Complete { record, written_at } => Some((record, written_at)),
            _ => None,
        }
    }
}

/// What one sweep pass reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub entries_removed: usize,
    pub fields_removed: usize,
}

/// Concurrency-safe expiring store for one table's records.
#[derive(Debug)]
pub struct RecordStore {
    entries: DashMap<String, CachedRecord>,
    ttl: Duration,
}

impl RecordStore {
    /// Create an empty store whose entries slide by `ttl` on every access.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// The configured sliding TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a record, sliding its expiration on a hit.
    pub fn get(&self, id: &str) -> Option<Record> {
        self.get_projection(id, None)
            .into_complete()
            .map(|(record, _)| record)
    }

    /// Look up a record and check that `fields` are all present and fresh.
    ///
    /// The entry TTL always slides on a hit; field TTLs slide only for the
    /// requested fields that were still fresh. With `fields = None` every
    /// fresh field is refreshed and the lookup is complete if any remain.
    pub fn get_projection(&self, id: &str, fields: Option<&[String]>) -> Projection {
        let now = Instant::now();
        let Some(mut entry) = self.entries.get_mut(id) else {
            return Projection::Missing;
        };

        if entry.is_expired(now, self.ttl) {
            drop(entry);
            self.entries
                .remove_if(id, |_, e| e.is_expired(now, self.ttl));
            return Projection::Missing;
        }

        let record = entry.fresh_fields(now, self.ttl);
        let complete = entry.refresh(now, self.ttl, fields);
        let written_at = entry.written_at;

        if complete {
            Projection::Complete { record, written_at }
        } else if record.is_empty() {
            Projection::Missing
        } else {
            Projection::Partial { record, written_at }
        }
    }

    /// Refresh a live entry and report whether it already satisfies `fields`,
    /// without cloning its contents.
    pub fn refresh_if_complete(&self, id: &str, fields: Option<&[String]>) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(id) {
            Some(mut entry) if !entry.is_expired(now, self.ttl) => {
                entry.refresh(now, self.ttl, fields)
            }
            _ => false,
        }
    }

    /// Insert or merge fields for `id`. New values overwrite old ones and
    /// every touched field, plus the entry itself, gets a fresh TTL.
    pub fn put(&self, id: &str, fields: Record) {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(id.to_string())
            .or_insert_with(|| CachedRecord::new(now));
        if entry.is_expired(now, self.ttl) {
            *entry = CachedRecord::new(now);
        }
        entry.merge(fields, now);
    }

    /// Drop an entry.
    pub fn remove(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries, including any expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries, and expired fields inside live entries.
    pub fn sweep(&self) -> SweepOutcome {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut outcome = SweepOutcome::default();

        self.entries.retain(|_, entry| {
            if entry.is_expired(now, ttl) {
                outcome.entries_removed += 1;
                return false;
            }
            let before = entry.fields.len();
            entry
                .fields
                .retain(|_, f| now.saturating_duration_since(f.touched_at) < ttl);
            outcome.fields_removed += before - entry.fields.len();
            if entry.fields.is_empty() {
                outcome.entries_removed += 1;
                return false;
            }
            true
        });

        outcome
    }
}
