//! Hydrate Core - Record Types, Errors and Configuration
//!
//! Pure data structures shared by the cache engine and its collaborators.
//! This crate contains no locking and no async code.

use chrono::{DateTime, Utc};

pub mod config;
pub mod constants;
pub mod error;

pub use config::{CacheConfig, IdFormatter};
pub use error::{ConfigError, FetchError, HydrateError, HydrateResult, SchemaError};

// ============================================================================
// RECORD TYPES
// ============================================================================

/// A single decoded column value.
pub type FieldValue = serde_json::Value;

/// A decoded record: field name to value.
pub type Record = serde_json::Map<String, FieldValue>;

/// Wall-clock timestamp in UTC.
pub type Timestamp = DateTime<Utc>;

/// Read a field as a non-empty string id.
///
/// Absent fields, nulls, empty strings and non-string values all yield `None`;
/// callers treat those as "no reference" rather than an error.
pub fn string_field<'a>(record: &'a Record, field: &str) -> Option<&'a str> {
    record
        .get(field)
        .and_then(FieldValue::as_str)
        .filter(|s| !s.is_empty())
}

/// Build a record from `(field, value)` pairs.
pub fn record_from_pairs<I, K, V>(pairs: I) -> Record
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<FieldValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
