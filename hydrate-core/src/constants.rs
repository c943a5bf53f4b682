//! Default values for the hydrate cache.
//!
//! Centralizing defaults keeps `CacheConfig::default()` and
//! `CacheConfig::from_env()` in agreement.

// ============================================================================
// EXPIRATION
// ============================================================================

/// Default sliding TTL for cached records in seconds (10 minutes)
pub const DEFAULT_RECORD_TTL_SECS: u64 = 600;

/// Default interval between expiry sweeps in seconds (10 minutes)
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 600;

// ============================================================================
// BATCHING
// ============================================================================

/// Batch size used when none is configured or the configured value is not positive
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default number of bulk fetches allowed in flight per drain (sequential)
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 1;

// ============================================================================
// ENVIRONMENT
// ============================================================================

pub const ENV_RECORD_TTL_SECS: &str = "HYDRATE_RECORD_TTL_SECS";
pub const ENV_CLEANUP_INTERVAL_SECS: &str = "HYDRATE_CLEANUP_INTERVAL_SECS";
pub const ENV_BATCH_SIZE: &str = "HYDRATE_BATCH_SIZE";
pub const ENV_MAX_CONCURRENT_BATCHES: &str = "HYDRATE_MAX_CONCURRENT_BATCHES";
pub const ENV_SINGLE_FLIGHT: &str = "HYDRATE_SINGLE_FLIGHT";
pub const ENV_PENDING_MAX_AGE_SECS: &str = "HYDRATE_PENDING_MAX_AGE_SECS";
