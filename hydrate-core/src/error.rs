//! Error types for hydrate operations

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Tracing subscriber already initialised: {reason}")]
    TracingInit { reason: String },
}

/// Table schema registry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("No schema registered for table {table}")]
    UnknownTable { table: String },

    #[error("Table {table} registered more than once")]
    DuplicateTable { table: String },

    #[error("Foreign key {table}.{field} references unregistered table {target}")]
    UnknownForeignTable {
        table: String,
        field: String,
        target: String,
    },

    #[error("Table {table} has an empty primary key field name")]
    EmptyPrimaryKey { table: String },
}

/// Errors returned by a bulk-fetch collaborator.
///
/// A fetch error always covers the whole batch: every id in it stays pending.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Bulk fetch for {table} failed upstream: {reason}")]
    Upstream { table: String, reason: String },

    #[error("Bulk fetch for {table} returned an undecodable response: {reason}")]
    Decode { table: String, reason: String },

    #[error("Bulk fetch for {table} is not connected")]
    NotConnected { table: String },
}

impl FetchError {
    /// Shorthand for an upstream failure.
    pub fn upstream(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Upstream {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// The table whose batch failed.
    pub fn table(&self) -> &str {
        match self {
            Self::Upstream { table, .. }
            | Self::Decode { table, .. }
            | Self::NotConnected { table } => table,
        }
    }
}

/// Master error type for all hydrate errors.
#[derive(Debug, Clone, Error)]
pub enum HydrateError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),
}

/// Result type alias for hydrate operations.
pub type HydrateResult<T> = Result<T, HydrateError>;

// =============================================================================
// TESTS
// =============================================================================
