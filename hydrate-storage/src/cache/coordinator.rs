//! Get-or-build coordination.
//!
//! [`HydrationCache`] owns one record store, one pending-id backlog and one
//! drain gate per table. List-side callers feed it through [`HydrationCache::ingest`]
//! and [`HydrationCache::propagate_foreign_keys`]; point lookups go through
//! [`HydrationCache::get_or_build`], which drains the table's backlog in
//! bounded batches on a miss instead of issuing one round trip per id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, StreamExt};
use hydrate_core::{string_field, CacheConfig, HydrateResult, Record, SchemaError, Timestamp};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::backlog::{BacklogSnapshot, PendingIdBacklog};
use super::read::CacheRead;
use super::record_store::{RecordStore, SweepOutcome};
use super::schema::{SchemaRegistry, TableSchema};
use super::traits::{CacheStats, FetchContext};
use crate::jobs::sweeper::{sweeper_task, SweeperMetrics};

/// A single get-or-build request.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Logical table name.
    pub table: String,
    /// Primary key value of the wanted record.
    pub id: String,
    /// Fields the caller needs; `None` accepts whatever is cached.
    pub fields: Option<Vec<String>>,
    /// Flips to `true` when the caller no longer wants the answer.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl BuildRequest {
    pub fn new(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
            fields: None,
            cancel: None,
        }
    }

    /// Require these fields to be present and fresh for a cache hit.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Abandon remaining batches once `cancel` reads `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Per-table sweep result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSweep {
    pub table: String,
    pub entries_removed: usize,
    pub fields_removed: usize,
    pub pending_evicted: usize,
}

/// Result of sweeping every table once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tables: Vec<TableSweep>,
}

impl SweepReport {
    pub fn entries_removed(&self) -> usize {
        self.tables.iter().map(|t| t.entries_removed).sum()
    }

    pub fn fields_removed(&self) -> usize {
        self.tables.iter().map(|t| t.fields_removed).sum()
    }

    pub fn pending_evicted(&self) -> usize {
        self.tables.iter().map(|t| t.pending_evicted).sum()
    }
}

#[derive(Debug, Default)]
struct TableMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    built: AtomicU64,
    not_found: AtomicU64,
    bulk_fetches: AtomicU64,
    failed_fetches: AtomicU64,
    records_ingested: AtomicU64,
    malformed_records: AtomicU64,
    sweeps: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct TableState {
    schema: TableSchema,
    store: RecordStore,
    backlog: PendingIdBacklog,
    /// Serialises drains when single-flight is enabled.
    drain_gate: Mutex<()>,
    metrics: TableMetrics,
}

struct Inner {
    registry: SchemaRegistry,
    tables: HashMap<String, TableState>,
    config: CacheConfig,
}

/// Demand-driven hydration cache over every registered table.
///
/// Cloning is cheap; all clones share the same stores and backlogs. Build one
/// at startup and hand clones to whatever serves list and get requests.
///
/// # Example
///
/// ```ignore
/// let cache = HydrationCache::new(registry, CacheConfig::from_env())?;
///
/// // List side: every streamed Opportunity queues its Account for later.
/// for record in page {
///     cache.propagate_foreign_keys("Opportunity", &record)?;
/// }
///
/// // Get side: one miss pulls the whole Account backlog in batches.
/// match cache.get_or_build("Account", "001xx").await? {
///     Some(read) => serve(read.into_value()),
///     None => point_fetch_from_source("001xx").await?,
/// }
/// ```
#[derive(Clone)]
pub struct HydrationCache {
    inner: Arc<Inner>,
}

impl HydrationCache {
    /// Create stores and backlogs for every table in `registry`.
    pub fn new(registry: SchemaRegistry, config: CacheConfig) -> HydrateResult<Self> {
        config.validate()?;

        let tables = registry
            .table_names()
            .filter_map(|name| registry.get(name))
            .map(|schema| {
                (
                    schema.name().to_string(),
                    TableState {
                        schema: schema.clone(),
                        store: RecordStore::new(config.record_ttl),
                        backlog: PendingIdBacklog::new(),
                        drain_gate: Mutex::new(()),
                        metrics: TableMetrics::default(),
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        tracing::debug!(
            tables = tables.len(),
            batch_size = config.effective_batch_size(),
            max_concurrent_batches = config.max_concurrent_batches,
            record_ttl_secs = config.record_ttl.as_secs(),
            single_flight = config.single_flight,
            "Hydration cache initialised"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                tables,
                config,
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    fn table(&self, table: &str) -> Result<&TableState, SchemaError> {
        self.inner
            .tables
            .get(table)
            .ok_or_else(|| SchemaError::UnknownTable {
                table: table.to_string(),
            })
    }

    // ========================================================================
    // LIST SIDE
    // ========================================================================

    /// Seed `record` into its table's store and queue every id it references.
    ///
    /// Nothing is removed from any backlog. A record without a usable
    /// primary key is not stored, but its foreign keys are still queued.
    pub fn ingest(&self, table: &str, record: Record) -> HydrateResult<()> {
        let state = self.table(table)?;
        self.store_record(state, record);
        Ok(())
    }

    /// `ingest` every record of a streamed page. Returns how many were stored.
    pub fn ingest_batch<I>(&self, table: &str, records: I) -> HydrateResult<usize>
    where
        I: IntoIterator<Item = Record>,
    {
        let state = self.table(table)?;
        Ok(records
            .into_iter()
            .filter_map(|record| self.store_record(state, record))
            .count())
    }

    /// Queue every id `record` references without storing the record itself.
    ///
    /// Returns the number of foreign-key values queued. Absent, null and
    /// non-string values are skipped.
    pub fn propagate_foreign_keys(&self, table: &str, record: &Record) -> HydrateResult<usize> {
        let state = self.table(table)?;
        Ok(self.propagate(state, record))
    }

    /// Queue `id` as pending for `table`.
    pub fn enqueue(&self, table: &str, id: &str) -> HydrateResult<()> {
        self.table(table)?.backlog.add(id);
        Ok(())
    }

    fn foreign_refs<'a>(
        &'a self,
        schema: &'a TableSchema,
        record: &Record,
    ) -> Vec<(&'a TableState, String)> {
        schema
            .foreign_keys()
            .iter()
            .filter_map(|fk| {
                let id = string_field(record, &fk.field)?;
                let Some(target) = self.inner.tables.get(&fk.target_table) else {
                    tracing::debug!(
                        table = %schema.name(),
                        field = %fk.field,
                        target = %fk.target_table,
                        "Foreign key target has no backlog"
                    );
                    return None;
                };
                Some((target, id.to_string()))
            })
            .collect()
    }

    fn propagate(&self, state: &TableState, record: &Record) -> usize {
        let refs = self.foreign_refs(&state.schema, record);
        let count = refs.len();
        for (target, id) in refs {
            target.backlog.add(&id);
        }
        count
    }

    /// Store one record and queue its references. Returns the stored id.
    fn store_record(&self, state: &TableState, record: Record) -> Option<String> {
        let refs = self.foreign_refs(&state.schema, &record);

        let id = string_field(&record, state.schema.primary_key()).map(str::to_string);
        match &id {
            Some(id) => {
                state.store.put(id, record);
                bump(&state.metrics.records_ingested);
            }
            None => {
                bump(&state.metrics.malformed_records);
                tracing::debug!(
                    table = %state.schema.name(),
                    primary_key = %state.schema.primary_key(),
                    "Record has no usable primary key, not cached"
                );
            }
        }

        for (target, fk_id) in refs {
            target.backlog.add(&fk_id);
        }
        id
    }

    // ========================================================================
    // GET SIDE
    // ========================================================================

    /// Serve `id` from cache, draining `table`'s backlog on a miss.
    pub async fn get_or_build(
        &self,
        table: &str,
        id: &str,
    ) -> HydrateResult<Option<CacheRead<Record>>> {
        self.get_or_build_with(BuildRequest::new(table, id)).await
    }

    /// Serve a request from cache, draining the table's backlog on a miss.
    ///
    /// `Ok(None)` means the record is still not cached after the drain and the
    /// caller should fall back to a direct point fetch. Failed batches and
    /// cancellation are logged, never returned.
    pub async fn get_or_build_with(
        &self,
        request: BuildRequest,
    ) -> HydrateResult<Option<CacheRead<Record>>> {
        let state = self.table(&request.table)?;
        let fields = request.fields.as_deref();

        if let Some((record, written_at)) = self.lookup(state, &request.id, fields) {
            bump(&state.metrics.hits);
            tracing::trace!(table = %request.table, id = %request.id, "Cache hit");
            return Ok(Some(CacheRead::from_cache(record, written_at)));
        }

        bump(&state.metrics.misses);
        tracing::debug!(
            table = %request.table,
            id = %request.id,
            "Id not present in cache, draining backlog"
        );

        let _gate = if self.inner.config.single_flight {
            let mut cancel = request.cancel.clone();
            let guard = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => None,
                guard = state.drain_gate.lock() => Some(guard),
            };
            match guard {
                Some(guard) => {
                    // The drain we queued behind may already have fetched it.
                    if let Some((record, written_at)) = self.lookup(state, &request.id, fields) {
                        bump(&state.metrics.built);
                        return Ok(Some(CacheRead::built(record, written_at)));
                    }
                    Some(guard)
                }
                None => {
                    tracing::warn!(
                        table = %request.table,
                        id = %request.id,
                        "Cancelled while waiting for an in-flight drain"
                    );
                    return Ok(self.recheck(state, &request));
                }
            }
        } else {
            None
        };

        self.drain(state, &request).await;
        Ok(self.recheck(state, &request))
    }

    /// Read without draining. Slides the entry's TTL on a hit.
    pub fn peek(&self, table: &str, id: &str) -> HydrateResult<Option<Record>> {
        Ok(self.table(table)?.store.get(id))
    }

    /// Point-in-time copy of `table`'s pending ids.
    pub fn pending_ids(&self, table: &str) -> HydrateResult<BacklogSnapshot> {
        Ok(self.table(table)?.backlog.snapshot())
    }

    /// Current statistics for `table`.
    pub fn stats(&self, table: &str) -> HydrateResult<CacheStats> {
        let state = self.table(table)?;
        let m = &state.metrics;
        Ok(CacheStats {
            hits: m.hits.load(Ordering::Relaxed),
            misses: m.misses.load(Ordering::Relaxed),
            built: m.built.load(Ordering::Relaxed),
            not_found: m.not_found.load(Ordering::Relaxed),
            bulk_fetches: m.bulk_fetches.load(Ordering::Relaxed),
            failed_fetches: m.failed_fetches.load(Ordering::Relaxed),
            records_ingested: m.records_ingested.load(Ordering::Relaxed),
            malformed_records: m.malformed_records.load(Ordering::Relaxed),
            entry_count: state.store.len() as u64,
            pending_count: state.backlog.len() as u64,
            sweeps: m.sweeps.load(Ordering::Relaxed),
        })
    }

    fn lookup(
        &self,
        state: &TableState,
        id: &str,
        fields: Option<&[String]>,
    ) -> Option<(Record, Timestamp)> {
        state.store.get_projection(id, fields).into_complete()
    }

    fn recheck(&self, state: &TableState, request: &BuildRequest) -> Option<CacheRead<Record>> {
        match self.lookup(state, &request.id, request.fields.as_deref()) {
            Some((record, written_at)) => {
                bump(&state.metrics.built);
                Some(CacheRead::built(record, written_at))
            }
            None => {
                bump(&state.metrics.not_found);
                tracing::debug!(
                    table = %request.table,
                    id = %request.id,
                    "Id not present in cache after drain"
                );
                None
            }
        }
    }

    /// Work out which ids to fetch, in order, batched.
    fn plan_batches(&self, state: &TableState, request: &BuildRequest) -> Vec<Vec<String>> {
        let fields = request.fields.as_deref();
        let mut snapshot = state.backlog.snapshot();

        // Pending ids that are already cached with the wanted fields are
        // confirmed; refresh them and stop tracking them.
        snapshot.retain(|pending| {
            if state.store.refresh_if_complete(&pending.id, fields) {
                state.backlog.remove(&pending.id);
                false
            } else {
                true
            }
        });

        let mut batches: Vec<Vec<String>> = snapshot
            .batches(self.inner.config.effective_batch_size())
            .collect();

        if !snapshot.contains(&request.id)
            && !state.store.refresh_if_complete(&request.id, fields)
        {
            batches.push(vec![request.id.clone()]);
        }

        batches
    }

    async fn drain(&self, state: &TableState, request: &BuildRequest) {
        let started = Instant::now();
        let batches = self.plan_batches(state, request);
        let batch_count = batches.len();
        let schema = &state.schema;
        let ctx = FetchContext::new(schema.name(), request.fields.clone());
        let formatter = &self.inner.config.id_formatter;
        let fetcher = schema.fetcher();
        let metrics = &state.metrics;

        let mut fetches = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| {
                let ctx = &ctx;
                async move {
                    let ids: Vec<String> = batch.iter().map(|id| formatter.format(id)).collect();
                    bump(&metrics.bulk_fetches);
                    let result = fetcher.fetch(ctx, &ids).await;
                    (index, batch, result)
                }
            })
            .buffer_unordered(self.inner.config.max_concurrent_batches);

        let mut cancel = request.cancel.clone();
        let mut completed = 0usize;
        let mut ingested = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    tracing::warn!(
                        table = %schema.name(),
                        id = %request.id,
                        completed,
                        remaining = batch_count - completed,
                        "Drain cancelled, abandoning remaining batches"
                    );
                    break;
                }
                next = fetches.next() => next,
            };

            let Some((index, batch, result)) = next else {
                break;
            };
            completed += 1;

            match result {
                Ok(records) => {
                    ingested += self.ingest_fetched(state, records);
                    // Ids the source did not return no longer exist upstream.
                    for id in &batch {
                        state.backlog.remove(id);
                    }
                }
                Err(error) => {
                    bump(&metrics.failed_fetches);
                    tracing::warn!(
                        table = %schema.name(),
                        batch_index = index,
                        batch_len = batch.len(),
                        error = %error,
                        "Bulk fetch failed, batch stays pending"
                    );
                }
            }
        }

        tracing::debug!(
            table = %schema.name(),
            batches = batch_count,
            completed,
            ingested,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backlog drain finished"
        );
    }

    /// Store fetched records, queue their references and clear them from the
    /// backlog. Returns how many were stored.
    fn ingest_fetched(&self, state: &TableState, records: Vec<Record>) -> usize {
        let mut stored = 0;
        for record in records {
            if let Some(id) = self.store_record(state, record) {
                state.backlog.remove(&id);
                stored += 1;
            }
        }
        stored
    }

    // ========================================================================
    // EXPIRY
    // ========================================================================

    /// Sweep every table once: expired records and fields, and pending ids
    /// older than `pending_max_age` when one is configured.
    pub fn sweep_now(&self) -> SweepReport {
        let tables = self
            .inner
            .registry
            .table_names()
            .filter_map(|name| self.inner.tables.get(name))
            .map(|state| self.sweep_table(state))
            .collect();
        SweepReport { tables }
    }

    fn sweep_table(&self, state: &TableState) -> TableSweep {
        let SweepOutcome {
            entries_removed,
            fields_removed,
        } = state.store.sweep();
        let pending_evicted = self
            .inner
            .config
            .pending_max_age
            .map(|max_age| state.backlog.evict_older_than(max_age))
            .unwrap_or(0);
        bump(&state.metrics.sweeps);

        TableSweep {
            table: state.schema.name().to_string(),
            entries_removed,
            fields_removed,
            pending_evicted,
        }
    }

    /// Run the expiry sweeper in the background until `shutdown_rx` reads `true`.
    pub fn spawn_sweeper(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<Arc<SweeperMetrics>> {
        tokio::spawn(sweeper_task(self.clone(), shutdown_rx))
    }
}

/// Resolves once `cancel` reads `true`; never resolves without a signal or
/// after its sender is gone.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        if rx.wait_for(|flag| *flag).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::traits::{fetcher_fn, BulkFetcher};
    use hydrate_core::{record_from_pairs, FetchError, HydrateError};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    type Calls = Arc<StdMutex<Vec<Vec<String>>>>;

    /// Serves Account records from a fixed set, recording every batch.
    fn account_fetcher(existing: &[&str], calls: Calls) -> Arc<dyn BulkFetcher> {
        let existing: Vec<String> = existing.iter().map(|s| s.to_string()).collect();
        fetcher_fn(move |_ctx: FetchContext, ids: Vec<String>| {
            let existing = existing.clone();
            let calls = Arc::clone(&calls);
            async move {
                calls.lock().unwrap().push(ids.clone());
                Ok::<Vec<Record>, FetchError>(
                    ids.into_iter()
                        .filter(|id| existing.contains(id))
                        .map(|id| {
                            let name = format!("Name of {}", id);
                            record_from_pairs([("Id", id), ("Name", name)])
                        })
                        .collect(),
                )
            }
        })
    }

    fn cache_with(existing: &[&str], config: CacheConfig) -> (HydrationCache, Calls) {
        let calls: Calls = Arc::new(StdMutex::new(Vec::new()));
        let registry = SchemaRegistry::new(vec![
            TableSchema::new("Account", "Id", account_fetcher(existing, Arc::clone(&calls))),
            TableSchema::new("Opportunity", "Id", account_fetcher(&[], Calls::default()))
                .with_foreign_key("AccountId", "Account")
                .with_foreign_key("OwnerId", "User"),
            TableSchema::new("User", "Id", account_fetcher(&[], Calls::default())),
        ])
        .unwrap();
        (HydrationCache::new(registry, config).unwrap(), calls)
    }

    fn pending(cache: &HydrationCache, table: &str) -> Vec<String> {
        cache
            .pending_ids(table)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect()
    }

    #[tokio::test]
    async fn test_hit_does_not_fetch() {
        let (cache, calls) = cache_with(&[], CacheConfig::default());
        cache
            .ingest("Account", record_from_pairs([("Id", "a1"), ("Name", "Acme")]))
            .unwrap();

        let read = cache.get_or_build("Account", "a1").await.unwrap().unwrap();
        assert!(read.was_cache_hit());
        assert_eq!(read.value()["Name"], json!("Acme"));
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(cache.stats("Account").unwrap().hits, 1);
    }

    #[tokio::test]
    async fn test_miss_drains_backlog_in_batches() {
        let (cache, calls) = cache_with(&["a1", "a3"], CacheConfig::new().with_batch_size(2));
        for id in ["a1", "a2", "a3"] {
            cache.enqueue("Account", id).unwrap();
        }

        let read = cache.get_or_build("Account", "a1").await.unwrap().unwrap();
        assert!(read.was_built());
        assert_eq!(read.value()["Id"], json!("a1"));

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                vec!["a1".to_string(), "a2".to_string()],
                vec!["a3".to_string()],
            ]
        );
        assert!(cache.peek("Account", "a3").unwrap().is_some());
        assert!(pending(&cache, "Account").is_empty());
        assert!(cache.get_or_build("Account", "a2").await.unwrap().is_none());

        let stats = cache.stats("Account").unwrap();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.built, 1);
        assert_eq!(stats.not_found, 1);
        assert_eq!(stats.bulk_fetches, 3);
        assert_eq!(stats.records_ingested, 2);
    }

    #[tokio::test]
    async fn test_isolated_get_falls_back_to_single_id_batch() {
        let (cache, calls) = cache_with(&["a7"], CacheConfig::default());

        let read = cache.get_or_build("Account", "a7").await.unwrap();
        assert!(read.is_some());
        assert_eq!(*calls.lock().unwrap(), vec![vec!["a7".to_string()]]);
    }

    #[tokio::test]
    async fn test_missing_upstream_is_not_an_error() {
        let (cache, _calls) = cache_with(&[], CacheConfig::default());

        let read = cache.get_or_build("Account", "gone").await.unwrap();
        assert!(read.is_none());
        assert_eq!(cache.stats("Account").unwrap().not_found, 1);
    }

    #[tokio::test]
    async fn test_unknown_table_is_an_error() {
        let (cache, _calls) = cache_with(&[], CacheConfig::default());

        let err = cache.get_or_build("Lead", "l1").await.unwrap_err();
        assert!(matches!(
            err,
            HydrateError::Schema(SchemaError::UnknownTable { ref table }) if table == "Lead"
        ));
        assert!(cache
            .ingest("Lead", record_from_pairs([("Id", "l1")]))
            .is_err());
    }

    #[tokio::test]
    async fn test_propagation_queues_references_only() {
        let (cache, _calls) = cache_with(&[], CacheConfig::default());
        let record = record_from_pairs([
            ("Id", json!("o1")),
            ("AccountId", json!("a9")),
            ("OwnerId", json!(null)),
        ]);

        let queued = cache.propagate_foreign_keys("Opportunity", &record).unwrap();
        assert_eq!(queued, 1);
        assert_eq!(pending(&cache, "Account"), vec!["a9".to_string()]);
        assert!(pending(&cache, "User").is_empty());
        assert!(cache.peek("Account", "a9").unwrap().is_none());
        assert!(cache.peek("Opportunity", "o1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ingest_seeds_store_and_propagates() {
        let (cache, _calls) = cache_with(&[], CacheConfig::default());
        let record = record_from_pairs([("Id", "o1"), ("AccountId", "a9"), ("OwnerId", "u1")]);

        cache.ingest("Opportunity", record.clone()).unwrap();
        cache.ingest("Opportunity", record).unwrap();

        assert!(cache.peek("Opportunity", "o1").unwrap().is_some());
        assert_eq!(pending(&cache, "Account"), vec!["a9".to_string()]);
        assert_eq!(pending(&cache, "User"), vec!["u1".to_string()]);
        assert!(cache.peek("Account", "a9").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ingest_without_primary_key_still_propagates() {
        let (cache, _calls) = cache_with(&[], CacheConfig::default());
        let stored = cache
            .ingest_batch(
                "Opportunity",
                vec![
                    record_from_pairs([("AccountId", "a1")]),
                    record_from_pairs([("Id", "o2"), ("AccountId", "a2")]),
                ],
            )
            .unwrap();

        assert_eq!(stored, 1);
        assert_eq!(cache.stats("Opportunity").unwrap().malformed_records, 1);
        assert_eq!(pending(&cache, "Account").len(), 2);
    }

    #[tokio::test]
    async fn test_cached_backlog_ids_are_skipped() {
        let (cache, calls) = cache_with(&["a2"], CacheConfig::default());
        cache
            .ingest("Account", record_from_pairs([("Id", "a1"), ("Name", "Acme")]))
            .unwrap();
        cache.enqueue("Account", "a1").unwrap();
        cache.enqueue("Account", "a2").unwrap();

        cache.get_or_build("Account", "a2").await.unwrap().unwrap();

        assert_eq!(*calls.lock().unwrap(), vec![vec!["a2".to_string()]]);
        assert!(pending(&cache, "Account").is_empty());
    }

    #[tokio::test]
    async fn test_field_projection_forces_top_up() {
        let (cache, calls) = cache_with(&["a1"], CacheConfig::default());
        cache
            .ingest("Account", record_from_pairs([("Id", "a1")]))
            .unwrap();

        let read = cache
            .get_or_build_with(BuildRequest::new("Account", "a1").with_fields(["Id", "Name"]))
            .await
            .unwrap()
            .unwrap();

        assert!(read.was_built());
        assert_eq!(read.value()["Name"], json!("Name of a1"));
        assert_eq!(calls.lock().unwrap().len(), 1);

        let read = cache
            .get_or_build_with(BuildRequest::new("Account", "a1").with_fields(["Name"]))
            .await
            .unwrap()
            .unwrap();
        assert!(read.was_cache_hit());
    }

    #[tokio::test]
    async fn test_id_formatter_applies_to_fetch_ids() {
        let config = CacheConfig::new().with_id_formatter(hydrate_core::IdFormatter::single_quoted());
        let (cache, calls) = cache_with(&[], config);
        cache.enqueue("Account", "a1").unwrap();

        cache.get_or_build("Account", "a1").await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![vec!["'a1'".to_string()]]);
    }

    #[tokio::test]
    async fn test_cancelled_request_skips_fetches() {
        let (cache, calls) = cache_with(&["a1"], CacheConfig::default());
        cache.enqueue("Account", "a1").unwrap();
        let (tx, rx) = watch::channel(true);

        let read = cache
            .get_or_build_with(BuildRequest::new("Account", "a1").with_cancel(rx))
            .await
            .unwrap();

        assert!(read.is_none());
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(pending(&cache, "Account"), vec!["a1".to_string()]);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_now_reclaims_expired_records() {
        let config = CacheConfig::new()
            .with_ttl(std::time::Duration::from_secs(30))
            .with_pending_max_age(std::time::Duration::ZERO);
        let (cache, _calls) = cache_with(&[], config);
        cache
            .ingest("Account", record_from_pairs([("Id", "a1")]))
            .unwrap();
        cache.enqueue("User", "u1").unwrap();

        tokio::time::advance(std::time::Duration::from_secs(31)).await;
        let report = cache.sweep_now();

        assert_eq!(report.entries_removed(), 1);
        assert_eq!(report.pending_evicted(), 1);
        assert_eq!(report.tables.len(), 3);
        assert_eq!(cache.stats("Account").unwrap().sweeps, 1);
        assert_eq!(cache.stats("Account").unwrap().entry_count, 0);
    }
}
