//! Drive the hydration cache against an in-memory source.
//!
//! Streams an Opportunity list through the cache, then looks up every
//! referenced Account and prints per-table statistics as JSON.
//!
//! ```text
//! HYDRATE_BATCH_SIZE=3 RUST_LOG=hydrate_storage=debug cargo run --bin hydrate-sim
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use hydrate_core::record_from_pairs;
use hydrate_storage::{
    fetcher_fn, init_tracing, BulkFetcher, CacheConfig, FetchContext, FetchError, HydrateResult,
    HydrationCache, IdFormatter, Record, SchemaRegistry, TableSchema, TelemetryConfig,
};

const ACCOUNTS: usize = 12;
const OPPORTUNITIES: usize = 40;

/// Serve records from `source`, unquoting ids the way a query layer would.
fn source_fetcher(source: Arc<HashMap<String, Record>>) -> Arc<dyn BulkFetcher> {
    fetcher_fn(move |ctx: FetchContext, ids: Vec<String>| {
        let source = Arc::clone(&source);
        async move {
            let records = ids
                .iter()
                .map(|id| id.trim_matches('\''))
                .filter_map(|id| source.get(id).cloned())
                .map(|record| match &ctx.fields {
                    Some(fields) => record
                        .into_iter()
                        .filter(|(name, _)| fields.contains(name))
                        .collect(),
                    None => record,
                })
                .collect();
            Ok::<Vec<Record>, FetchError>(records)
        }
    })
}

fn seed() -> (HashMap<String, Record>, HashMap<String, Record>) {
    let accounts = (0..ACCOUNTS)
        .map(|i| {
            let id = format!("001{:04}", i);
            let record = record_from_pairs([
                ("Id", id.clone()),
                ("Name", format!("Account {}", i)),
                ("Industry", if i % 2 == 0 { "Retail" } else { "Energy" }.to_string()),
            ]);
            (id, record)
        })
        .collect();

    let opportunities = (0..OPPORTUNITIES)
        .map(|i| {
            let id = format!("006{:04}", i);
            let record = record_from_pairs([
                ("Id", id.clone()),
                ("Name", format!("Deal {}", i)),
                ("AccountId", format!("001{:04}", i % ACCOUNTS)),
            ]);
            (id, record)
        })
        .collect();

    (accounts, opportunities)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> HydrateResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let (accounts, opportunities) = seed();
    let opportunities = Arc::new(opportunities);

    let registry = SchemaRegistry::new(vec![
        TableSchema::new("Account", "Id", source_fetcher(Arc::new(accounts))),
        TableSchema::new("Opportunity", "Id", source_fetcher(Arc::clone(&opportunities)))
            .with_foreign_key("AccountId", "Account"),
    ])?;
    let config = CacheConfig::from_env().with_id_formatter(IdFormatter::single_quoted());
    let cache = HydrationCache::new(registry, config)?;

    let stored = cache.ingest_batch("Opportunity", opportunities.values().cloned())?;
    tracing::info!(
        stored,
        pending_accounts = cache.pending_ids("Account")?.len(),
        "Opportunity list streamed"
    );

    let mut built = 0;
    let mut hits = 0;
    for i in 0..ACCOUNTS {
        let id = format!("001{:04}", i);
        match cache.get_or_build("Account", &id).await? {
            Some(read) if read.was_cache_hit() => hits += 1,
            Some(_) => built += 1,
            None => tracing::warn!(id = %id, "Account missing from source"),
        }
    }
    let missing = cache.get_or_build("Account", "001missing").await?;
    tracing::info!(built, hits, missing = missing.is_none(), "Account lookups finished");

    let report = cache.sweep_now();
    tracing::info!(entries_removed = report.entries_removed(), "Manual sweep finished");

    let mut stats = serde_json::Map::new();
    for table in cache.registry().table_names() {
        let table_stats = serde_json::to_value(cache.stats(table)?).unwrap_or_default();
        stats.insert(table.to_string(), table_stats);
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).unwrap_or_default()
    );

    Ok(())
}
