//! Error types for the database topology manager.

use std::time::Duration;

use thiserror::Error;

/// Result alias for data layer operations.
pub type DataResult<T> = std::result::Result<T, DataError>;

/// Errors raised by the data access layer.
#[derive(Debug, Error)]
pub enum DataError {
    /// The configured driver name is not supported.
    #[error("unsupported database driver")]
    UnsupportedDriver {
        /// Driver name as configured.
        driver: String,
    },
    /// Opening a pool did not complete within the connect timeout.
    #[error("database connection timed out")]
    ConnectTimeout {
        /// Pool role being opened (`master`, `replica`, `search_replica`).
        role: &'static str,
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// Opening a pool failed.
    #[error("failed to open database pool")]
    Connect {
        /// Pool role being opened.
        role: &'static str,
        /// Underlying SQL error.
        #[source]
        source: sqlx::Error,
    },
    /// Migration execution failed.
    #[error("migration failed")]
    MigrationFailed {
        /// Underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },
    /// A database operation failed.
    #[error("database operation failed")]
    QueryFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        #[source]
        source: sqlx::Error,
    },
    /// A database operation exceeded the query timeout.
    #[error("database operation timed out")]
    QueryTimeout {
        /// Operation identifier.
        operation: &'static str,
    },
}

pub(crate) fn map_query_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> DataError {
    move |source| DataError::QueryFailed { operation, source }
}
