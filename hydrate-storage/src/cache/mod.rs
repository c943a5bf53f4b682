//! Hydration cache
//!
//! Per-table record stores and pending-id backlogs, the schema registry that
//! links tables through foreign keys, and the coordinator that turns a miss
//! into a batched backfill of everything already known to be pending.
//!
//! # Flow
//!
//! 1. A list request streams records; each one is passed to
//!    [`HydrationCache::ingest`] or [`HydrationCache::propagate_foreign_keys`].
//! 2. Every non-empty string foreign key lands in the referenced table's backlog.
//! 3. A later [`HydrationCache::get_or_build`] miss drains that backlog in
//!    batches through the table's [`BulkFetcher`], then re-checks the store.

pub mod backlog;
pub mod coordinator;
pub mod read;
pub mod record_store;
pub mod schema;
pub mod traits;

pub use backlog::{BacklogSnapshot, PendingId, PendingIdBacklog};
pub use coordinator::{BuildRequest, HydrationCache, SweepReport, TableSweep};
pub use read::CacheRead;
pub use record_store::{Projection, RecordStore, SweepOutcome};
pub use schema::{ForeignKey, SchemaRegistry, TableSchema};
pub use traits::{fetcher_fn, BulkFetcher, CacheStats, FetchContext, FnFetcher};
