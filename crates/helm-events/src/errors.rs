//! Event log error types.

use thiserror::Error;

/// Result alias for event log operations.
pub type Result<T> = std::result::Result<T, EventLogError>;

/// Errors raised by the event log, snapshot store, and schema registry.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// Underlying `SQLite` error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool exhausted or broken.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Row (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Envelope or payload rejected by the schema registry.
    #[error("schema violation for {schema} v{version}: {message}")]
    SchemaViolation {
        /// Schema name that rejected the payload.
        schema: String,
        /// Schema version asserted against.
        version: u32,
        /// Human-readable rejection reason.
        message: String,
    },

    /// No schema registered for the given name/version.
    #[error("unknown schema {schema} v{version}")]
    UnknownSchema {
        /// Requested schema name.
        schema: String,
        /// Requested schema version.
        version: u32,
    },

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EventLogError {
    /// Stable machine-readable code for branching without message sniffing.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite_error",
            Self::Pool(_) => "pool_error",
            Self::Serde(_) => "serde_error",
            Self::SchemaViolation { .. } => "schema_invalid",
            Self::UnknownSchema { .. } => "unknown_schema",
            Self::Internal(_) => "internal_error",
        }
    }
}
