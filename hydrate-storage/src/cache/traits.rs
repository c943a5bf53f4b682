//! Bulk-fetch seam and cache statistics.
//!
//! The cache never talks to the remote source directly. Each table supplies
//! a [`BulkFetcher`] that turns a batch of ids into full records with one
//! round trip.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use hydrate_core::{FetchError, Record};
use serde::Serialize;

/// What a bulk fetch is being asked for, besides the ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchContext {
    /// Logical table name.
    pub table: String,
    /// Fields the caller needs. `None` means the collaborator's default projection.
    pub fields: Option<Vec<String>>,
}

impl FetchContext {
    pub fn new(table: impl Into<String>, fields: Option<Vec<String>>) -> Self {
        Self {
            table: table.into(),
            fields,
        }
    }
}

/// Retrieves full records for a batch of ids in one round trip.
///
/// # Contract
///
/// - `ids` have already been passed through the configured `IdFormatter`
/// - Only records whose primary key matches a requested id are returned
/// - Ids that no longer exist upstream are simply absent from the result
/// - An `Err` means the whole batch failed; its ids stay pending
#[async_trait]
pub trait BulkFetcher: Send + Sync {
    async fn fetch(&self, ctx: &FetchContext, ids: &[String]) -> Result<Vec<Record>, FetchError>;
}

/// Adapts an async closure into a [`BulkFetcher`].
pub struct FnFetcher<F> {
    f: F,
}

impl<F> FnFetcher<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> BulkFetcher for FnFetcher<F>
where
    F: Fn(FetchContext, Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Record>, FetchError>> + Send,
{
    async fn fetch(&self, ctx: &FetchContext, ids: &[String]) -> Result<Vec<Record>, FetchError> {
        (self.f)(ctx.clone(), ids.to_vec()).await
    }
}

/// Wrap an async closure as a shareable fetcher.
pub fn fetcher_fn<F, Fut>(f: F) -> Arc<dyn BulkFetcher>
where
    F: Fn(FetchContext, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Record>, FetchError>> + Send + 'static,
{
    Arc::new(FnFetcher::new(f))
}

/// Statistics about one table's cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from the store without a drain.
    pub hits: u64,
    /// Lookups that had to drain the backlog.
    pub misses: u64,
    /// Misses satisfied by the drain.
    pub built: u64,
    /// Misses still absent after the drain.
    pub not_found: u64,
    /// Bulk-fetch calls issued.
    pub bulk_fetches: u64,
    /// Bulk-fetch calls that returned an error.
    pub failed_fetches: u64,
    /// Records written into the store.
    pub records_ingested: u64,
    /// Records skipped for a missing or non-string primary key.
    pub malformed_records: u64,
    /// Entries currently in the store (including unswept expired ones).
    pub entry_count: u64,
    /// Ids currently pending.
    pub pending_count: u64,
    /// Sweep passes run against this table.
    pub sweeps: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
