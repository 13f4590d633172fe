//! # Design
//!
//! - Construction failures are fatal and returned synchronously.
//! - Operational failures keep constant messages and carry the failing
//!   operation plus the source error.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result alias for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors raised by the platform service and its controllers.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Shutdown has begun; the request was rejected.
    #[error("platform service is shutting down")]
    ShuttingDown {
        /// Operation that was rejected.
        operation: &'static str,
    },
    /// Background work was launched outside a Tokio runtime.
    #[error("no async runtime available")]
    NoRuntime {
        /// Underlying runtime lookup error.
        source: tokio::runtime::TryCurrentError,
    },
    /// Configuration store operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: bedrock_config::ConfigError,
    },
    /// Database topology operations failed.
    #[error("database operation failed")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source data error.
        source: bedrock_data::DataError,
    },
    /// File backend construction or use failed.
    #[error("file storage operation failed")]
    FileStore {
        /// Operation identifier.
        operation: &'static str,
        /// Source storage error.
        source: bedrock_filestore::FileStoreError,
    },
    /// Telemetry collectors could not be built or registered.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: bedrock_telemetry::TelemetryError,
    },
    /// The installed metrics implementation rejected registration.
    #[error("advanced metrics registration failed")]
    MetricsRegister {
        /// Source Prometheus error.
        source: prometheus::Error,
    },
    /// The metrics listener could not bind.
    #[error("metrics listener bind failed")]
    MetricsBind {
        /// Address the listener tried to bind.
        address: SocketAddr,
        /// Source IO error.
        source: io::Error,
    },
    /// The metrics controller reached its terminal state.
    #[error("metrics controller terminated")]
    MetricsTerminated,
}

impl PlatformError {
    pub(crate) const fn config(
        operation: &'static str,
        source: bedrock_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn data(operation: &'static str, source: bedrock_data::DataError) -> Self {
        Self::Data { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: bedrock_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn messages_are_constant_and_sources_preserved() {
        let rejected = PlatformError::ShuttingDown { operation: "launch" };
        assert_eq!(rejected.to_string(), "platform service is shutting down");
        assert!(rejected.source().is_none());

        let bind = PlatformError::MetricsBind {
            address: SocketAddr::from(([127, 0, 0, 1], 8067)),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(bind.to_string(), "metrics listener bind failed");
        assert!(bind.source().is_some());
    }
}
