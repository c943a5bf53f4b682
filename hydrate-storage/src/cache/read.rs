//! Read results carrying cache provenance.

use chrono::Utc;
use hydrate_core::Timestamp;
use std::time::Duration;

/// Result of a get-or-build, carrying where the value came from.
///
/// The wrapper keeps callers aware of the age of the data they are working
/// with; records may be stale within the configured TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    /// The cached value.
    value: T,
    /// When the value's fields were last written into the cache.
    cached_at: Timestamp,
    /// Whether the value was served without a backlog drain.
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// A value served straight from the store.
    pub fn from_cache(value: T, cached_at: Timestamp) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: true,
        }
    }

    /// A value that only became available after draining the backlog.
    pub fn built(value: T, cached_at: Timestamp) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: false,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// When the value was last written into the cache.
    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    /// Time since the value was last written into the cache.
    pub fn staleness(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Check if this was a cache hit.
    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// Check if the value was built by a drain.
    pub fn was_built(&self) -> bool {
        !self.was_cache_hit
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_read_from_cache() {
        let cached_at = Utc::now();
        let read = CacheRead::from_cache("acme".to_string(), cached_at);

        assert!(read.was_cache_hit());
        assert!(!read.was_built());
        assert_eq!(read.value(), "acme");
        assert_eq!(read.cached_at(), cached_at);
    }

    #[test]
    fn test_cache_read_built() {
        let read = CacheRead::built(42i32, Utc::now());
        assert!(read.was_built());
        assert_eq!(read.into_value(), 42);
    }

    #[test]
    fn test_cache_read_staleness() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        let read = CacheRead::from_cache("test", past);

        let staleness = read.staleness();
        assert!(staleness >= Duration::from_secs(4));
        assert!(staleness <= Duration::from_secs(10));
    }

    #[test]
    fn test_future_timestamp_is_not_stale() {
        let future = Utc::now() + chrono::Duration::seconds(30);
        assert_eq!(CacheRead::from_cache((), future).staleness(), Duration::ZERO);
    }

    #[test]
    fn test_cache_read_map() {
        let read = CacheRead::built(42i32, Utc::now());
        let mapped = read.map(|v| v.to_string());

        assert!(mapped.was_built());
        assert_eq!(mapped.into_value(), "42");
    }
}
