//! Hydrate Storage - Demand-Driven Hydration Cache
//!
//! An in-memory cache for records of a remote relational source that is
//! expensive to query one row at a time. Records seen while serving list
//! requests seed the cache; the foreign keys they carry queue the referenced
//! ids so a later single-record miss can pull every known-pending id for that
//! table in a few batched round trips.
//!
//! - [`cache`]: record stores, backlogs, schema registry and the coordinator
//! - [`jobs`]: the background expiry sweeper
//! - [`telemetry`]: tracing subscriber setup for binaries

pub mod cache;
pub mod jobs;
pub mod telemetry;

pub use cache::{
    fetcher_fn, BacklogSnapshot, BuildRequest, BulkFetcher, CacheRead, CacheStats, FetchContext,
    ForeignKey, HydrationCache, PendingId, PendingIdBacklog, Projection, RecordStore,
    SchemaRegistry, SweepReport, TableSchema, TableSweep,
};
pub use jobs::{sweeper_task, SweeperMetrics, SweeperSnapshot};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};

pub use hydrate_core::{
    CacheConfig, FetchError, HydrateError, HydrateResult, IdFormatter, Record, SchemaError,
};
