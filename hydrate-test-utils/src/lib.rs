//! Hydrate Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - A scriptable in-memory bulk fetcher
//! - Record fixtures and a ready-made CRM-style schema
//! - Proptest generators
//! - Assertions for cache-specific outcomes

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

// Re-export core types for convenience
pub use hydrate_core::{
    record_from_pairs, CacheConfig, FetchError, HydrateError, HydrateResult, IdFormatter, Record,
    SchemaError,
};
pub use hydrate_storage::{
    BuildRequest, BulkFetcher, FetchContext, HydrationCache, SchemaRegistry, TableSchema,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK FETCHER
// ============================================================================

/// One recorded call to [`MockBulkFetcher::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub table: String,
    pub fields: Option<Vec<String>>,
    /// Ids exactly as the cache passed them, formatter applied.
    pub ids: Vec<String>,
}

/// In-memory bulk fetcher backed by a map of records.
///
/// Ids arriving wrapped in single quotes are unquoted before lookup, so the
/// same mock works with the identity and the single-quoted formatter.
#[derive(Debug)]
pub struct MockBulkFetcher {
    primary_key: String,
    source: Mutex<HashMap<String, Record>>,
    calls: Mutex<Vec<FetchCall>>,
    failing_calls: Mutex<HashSet<usize>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockBulkFetcher {
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            source: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failing_calls: Mutex::new(HashSet::new()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Seed the source. Records without a string primary key are ignored.
    pub fn with_records<I>(self, records: I) -> Self
    where
        I: IntoIterator<Item = Record>,
    {
        for record in records {
            self.insert(record);
        }
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the `index`th call (0-based) with an upstream error.
    pub fn with_failing_call(self, index: usize) -> Self {
        lock(&self.failing_calls).insert(index);
        self
    }

    pub fn insert(&self, record: Record) {
        if let Some(id) = hydrate_core::string_field(&record, &self.primary_key) {
            let id = id.to_string();
            lock(&self.source).insert(id, record);
        }
    }

    /// Delete a record from the source, as if it vanished upstream.
    pub fn remove(&self, id: &str) {
        lock(&self.source).remove(id);
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Every id requested so far, in call order.
    pub fn requested_ids(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .flat_map(|c| c.ids.iter().cloned())
            .collect()
    }

    /// Highest number of calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn project(&self, record: &Record, fields: Option<&[String]>) -> Record {
        match fields {
            None => record.clone(),
            Some(fields) => record
                .iter()
                .filter(|(name, _)| *name == &self.primary_key || fields.contains(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl BulkFetcher for MockBulkFetcher {
    async fn fetch(&self, ctx: &FetchContext, ids: &[String]) -> Result<Vec<Record>, FetchError> {
        let index = {
            let mut calls = lock(&self.calls);
            calls.push(FetchCall {
                table: ctx.table.clone(),
                fields: ctx.fields.clone(),
                ids: ids.to_vec(),
            });
            calls.len() - 1
        };

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if lock(&self.failing_calls).contains(&index) {
            return Err(FetchError::upstream(&ctx.table, "injected failure"));
        }

        let source = lock(&self.source);
        Ok(ids
            .iter()
            .map(|id| id.trim_matches('\''))
            .filter_map(|id| source.get(id))
            .map(|record| self.project(record, ctx.fields.as_deref()))
            .collect())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Records and schemas shaped like a CRM: Accounts referenced by
    //! Opportunities, Cases and Orders through `AccountId`.

    use super::*;

    pub fn account(id: &str, name: &str) -> Record {
        record_from_pairs([("Id", id), ("Name", name)])
    }

    pub fn opportunity(id: &str, account_id: &str) -> Record {
        record_from_pairs([("Id", id), ("AccountId", account_id), ("StageName", "Prospecting")])
    }

    pub fn case(id: &str, account_id: &str) -> Record {
        record_from_pairs([("Id", id), ("AccountId", account_id), ("Status", "New")])
    }

    pub fn order(id: &str, account_id: &str) -> Record {
        record_from_pairs([("Id", id), ("AccountId", account_id), ("Status", "Draft")])
    }

    /// A registry over four tables. Only the Account fetcher is exposed; the
    /// child tables are populated through ingestion and never fetched.
    pub struct CrmFixture {
        pub registry: SchemaRegistry,
        pub accounts: Arc<MockBulkFetcher>,
    }

    impl CrmFixture {
        /// Build the fixture with `accounts` available upstream.
        pub fn new<I>(accounts: I) -> Self
        where
            I: IntoIterator<Item = Record>,
        {
            Self::from_fetcher(MockBulkFetcher::new("Id").with_records(accounts))
        }

        /// Build the fixture with nothing available upstream.
        pub fn empty() -> Self {
            Self::from_fetcher(MockBulkFetcher::new("Id"))
        }

        /// Build the fixture around a preconfigured Account fetcher.
        pub fn from_fetcher(accounts: MockBulkFetcher) -> Self {
            let accounts = Arc::new(accounts);
            let child = || Arc::new(MockBulkFetcher::new("Id")) as Arc<dyn BulkFetcher>;

            let registry = SchemaRegistry::new(vec![
                TableSchema::new("Account", "Id", Arc::clone(&accounts) as Arc<dyn BulkFetcher>),
                TableSchema::new("Opportunity", "Id", child())
                    .with_foreign_key("AccountId", "Account"),
                TableSchema::new("Case", "Id", child()).with_foreign_key("AccountId", "Account"),
                TableSchema::new("Order", "Id", child()).with_foreign_key("AccountId", "Account"),
            ])
            .unwrap_or_else(|e| panic!("fixture registry is valid: {}", e));

            Self { registry, accounts }
        }

        /// Create a cache over the fixture's registry.
        pub fn cache(&self, config: CacheConfig) -> HydrationCache {
            HydrationCache::new(self.registry.clone(), config)
                .unwrap_or_else(|e| panic!("fixture config is valid: {}", e))
        }
    }

    /// Accounts `prefix0 .. prefix{n-1}`.
    pub fn accounts(prefix: &str, n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| account(&format!("{}{}", prefix, i), &format!("Account {}", i)))
            .collect()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use proptest::prelude::*;

    /// Record ids shaped like 18-character CRM keys, shortened.
    pub fn arb_id() -> impl Strategy<Value = String> {
        "[0-9A-Za-z]{3,10}"
    }

    /// Distinct ids, in generation order.
    pub fn arb_unique_ids(max: usize) -> impl Strategy<Value = Vec<String>> {
        proptest::collection::hash_set(arb_id(), 0..max).prop_map(|set| set.into_iter().collect())
    }

    /// Batch sizes, including the non-positive values that mean "default".
    pub fn arb_batch_size() -> impl Strategy<Value = i64> {
        prop_oneof![
            4 => 1i64..=20,
            1 => -5i64..=0,
        ]
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert that a result is an unknown-table error naming `table`.
    #[track_caller]
    pub fn assert_unknown_table<T: std::fmt::Debug>(result: &HydrateResult<T>, table: &str) {
        match result {
            Err(HydrateError::Schema(SchemaError::UnknownTable { table: t })) => {
                assert_eq!(t, table, "Wrong table in UnknownTable error");
            }
            other => panic!("Expected UnknownTable({}), got: {:?}", table, other),
        }
    }

    /// Assert the pending ids of `table`, in drain order.
    #[track_caller]
    pub fn assert_pending(cache: &HydrationCache, table: &str, expected: &[&str]) {
        let pending: Vec<String> = cache
            .pending_ids(table)
            .unwrap_or_else(|e| panic!("pending_ids({}) failed: {}", table, e))
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(pending, expected, "Unexpected pending ids for {}", table);
    }

    /// Assert that `id` is cached in `table`.
    #[track_caller]
    pub fn assert_cached(cache: &HydrationCache, table: &str, id: &str) {
        match cache.peek(table, id) {
            Ok(Some(_)) => {}
            other => panic!("Expected {}/{} to be cached, got: {:?}", table, id, other),
        }
    }

    /// Assert that `id` is not cached in `table`.
    #[track_caller]
    pub fn assert_not_cached(cache: &HydrationCache, table: &str, id: &str) {
        match cache.peek(table, id) {
            Ok(None) => {}
            other => panic!("Expected {}/{} to be absent, got: {:?}", table, id, other),
        }
    }
}
