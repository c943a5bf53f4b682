//! Cache configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;

/// Maps a raw record id to the form it takes inside a bulk-fetch predicate.
///
/// Cheap to clone; the closure is shared.
#[derive(Clone)]
pub struct IdFormatter(Arc<dyn Fn(&str) -> String + Send + Sync>);

impl IdFormatter {
    /// Wrap an arbitrary formatting function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Leave ids untouched.
    pub fn identity() -> Self {
        Self::new(|id| id.to_string())
    }

    /// Wrap ids in single quotes, escaping embedded quotes, for `IN ('a', 'b')` style predicates.
    pub fn single_quoted() -> Self {
        Self::new(|id| format!("'{}'", id.replace('\'', "\\'")))
    }

    /// Apply the formatter.
    pub fn format(&self, id: &str) -> String {
        (self.0)(id)
    }
}

impl Default for IdFormatter {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for IdFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdFormatter(..)")
    }
}

/// Configuration for the hydration cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Sliding TTL for records and their fields.
    pub record_ttl: Duration,
    /// How often the background sweeper removes expired entries.
    pub cleanup_interval: Duration,
    /// Requested ids per bulk fetch. Zero or negative means "use the default".
    pub batch_size: i64,
    /// Maximum bulk fetches in flight within one drain (1 = sequential).
    pub max_concurrent_batches: usize,
    /// Whether concurrent misses on one table share a single drain.
    pub single_flight: bool,
    /// Evict pending ids never drained within this age. `None` keeps them indefinitely.
    pub pending_max_age: Option<Duration>,
    /// Formatter applied to every id handed to a bulk fetch.
    pub id_formatter: IdFormatter,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            record_ttl: Duration::from_secs(DEFAULT_RECORD_TTL_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            batch_size: DEFAULT_BATCH_SIZE as i64,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
            single_flight: true,
            pending_max_age: None,
            id_formatter: IdFormatter::identity(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `HYDRATE_RECORD_TTL_SECS`: Sliding record TTL (default: 600)
    /// - `HYDRATE_CLEANUP_INTERVAL_SECS`: Sweep interval (default: 600)
    /// - `HYDRATE_BATCH_SIZE`: Ids per bulk fetch (default: 50)
    /// - `HYDRATE_MAX_CONCURRENT_BATCHES`: Parallel bulk fetches per drain (default: 1)
    /// - `HYDRATE_SINGLE_FLIGHT`: Coalesce concurrent drains per table (default: true)
    /// - `HYDRATE_PENDING_MAX_AGE_SECS`: Evict undrained pending ids after this age (default: unset)
    ///
    /// The id formatter cannot come from the environment and stays the identity.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, falling back to defaults
    /// for absent or unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |key: &str, default: u64| {
            Duration::from_secs(
                lookup(key)
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(default),
            )
        };

        let record_ttl = secs(ENV_RECORD_TTL_SECS, DEFAULT_RECORD_TTL_SECS);
        let cleanup_interval = secs(ENV_CLEANUP_INTERVAL_SECS, DEFAULT_CLEANUP_INTERVAL_SECS);

        let batch_size = lookup(ENV_BATCH_SIZE)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_BATCH_SIZE as i64);

        let max_concurrent_batches = lookup(ENV_MAX_CONCURRENT_BATCHES)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_MAX_CONCURRENT_BATCHES);

        let single_flight = lookup(ENV_SINGLE_FLIGHT)
            .map(|s| s.trim().to_lowercase() != "false" && s.trim() != "0")
            .unwrap_or(true);

        let pending_max_age = lookup(ENV_PENDING_MAX_AGE_SECS)
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_secs);

        Self {
            record_ttl,
            cleanup_interval,
            batch_size,
            max_concurrent_batches,
            single_flight,
            pending_max_age,
            id_formatter: IdFormatter::identity(),
        }
    }

    /// Set the sliding record TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    /// Set the sweep interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the batch size. Non-positive values fall back to the default.
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Allow up to `n` bulk fetches in flight per drain.
    pub fn with_max_concurrent_batches(mut self, n: usize) -> Self {
        self.max_concurrent_batches = n;
        self
    }

    /// Enable or disable per-table drain coalescing.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    /// Evict pending ids that were never drained after `max_age`.
    pub fn with_pending_max_age(mut self, max_age: Duration) -> Self {
        self.pending_max_age = Some(max_age);
        self
    }

    /// Set the id formatter used for bulk-fetch predicates.
    pub fn with_id_formatter(mut self, formatter: IdFormatter) -> Self {
        self.id_formatter = formatter;
        self
    }

    /// The batch size actually used for draining.
    pub fn effective_batch_size(&self) -> usize {
        if self.batch_size <= 0 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size as usize
        }
    }

    /// Reject settings that would make the cache unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.record_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "record_ttl".to_string(),
                value: format!("{:?}", self.record_ttl),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "cleanup_interval".to_string(),
                value: format!("{:?}", self.cleanup_interval),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_concurrent_batches == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_batches".to_string(),
                value: "0".to_string(),
                reason: "at least one bulk fetch must be allowed".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.record_ttl, Duration::from_secs(600));
        assert_eq!(config.cleanup_interval, Duration::from_secs(600));
        assert_eq!(config.effective_batch_size(), 50);
        assert_eq!(config.max_concurrent_batches, 1);
        assert!(config.single_flight);
        assert!(config.pending_max_age.is_none());
        assert_eq!(config.id_formatter.format("001xx"), "001xx");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new()
            .with_ttl(Duration::from_secs(30))
            .with_cleanup_interval(Duration::from_secs(5))
            .with_batch_size(500)
            .with_max_concurrent_batches(4)
            .with_single_flight(false)
            .with_pending_max_age(Duration::from_secs(3600))
            .with_id_formatter(IdFormatter::single_quoted());

        assert_eq!(config.record_ttl, Duration::from_secs(30));
        assert_eq!(config.cleanup_interval, Duration::from_secs(5));
        assert_eq!(config.effective_batch_size(), 500);
        assert_eq!(config.max_concurrent_batches, 4);
        assert!(!config.single_flight);
        assert_eq!(config.pending_max_age, Some(Duration::from_secs(3600)));
        assert_eq!(config.id_formatter.format("a1"), "'a1'");
    }

    #[test]
    fn test_single_quoted_escapes_quotes() {
        assert_eq!(IdFormatter::single_quoted().format("o'neil"), "'o\\'neil'");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            (ENV_RECORD_TTL_SECS, "120"),
            (ENV_CLEANUP_INTERVAL_SECS, "15"),
            (ENV_BATCH_SIZE, "200"),
            (ENV_MAX_CONCURRENT_BATCHES, "3"),
            (ENV_SINGLE_FLIGHT, "false"),
            (ENV_PENDING_MAX_AGE_SECS, "900"),
        ]));

        assert_eq!(config.record_ttl, Duration::from_secs(120));
        assert_eq!(config.cleanup_interval, Duration::from_secs(15));
        assert_eq!(config.effective_batch_size(), 200);
        assert_eq!(config.max_concurrent_batches, 3);
        assert!(!config.single_flight);
        assert_eq!(config.pending_max_age, Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_from_lookup_falls_back_on_garbage() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            (ENV_RECORD_TTL_SECS, "ten minutes"),
            (ENV_BATCH_SIZE, "-7"),
        ]));

        assert_eq!(config.record_ttl, Duration::from_secs(DEFAULT_RECORD_TTL_SECS));
        assert_eq!(config.batch_size, -7);
        assert_eq!(config.effective_batch_size(), DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let err = CacheConfig::new()
            .with_ttl(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "record_ttl"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let err = CacheConfig::new()
            .with_max_concurrent_batches(0)
            .validate()
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "max_concurrent_batches")
        );
    }

    proptest! {
        #[test]
        fn prop_effective_batch_size_is_positive(batch_size in any::<i64>()) {
            let config = CacheConfig::new().with_batch_size(batch_size);
            let effective = config.effective_batch_size();
            prop_assert!(effective > 0);
            if batch_size > 0 {
                prop_assert_eq!(effective as i64, batch_size);
            } else {
                prop_assert_eq!(effective, DEFAULT_BATCH_SIZE);
            }
        }
    }
}
