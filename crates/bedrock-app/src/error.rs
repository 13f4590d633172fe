//! # Design
//!
//! - Centralize application-level errors for bootstrap and shutdown.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: bedrock_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: bedrock_telemetry::TelemetryError,
    },
    /// Platform service operations failed.
    #[error("platform operation failed")]
    Platform {
        /// Operation identifier.
        operation: &'static str,
        /// Source platform error.
        source: bedrock_platform::PlatformError,
    },
    /// Persisting or loading system values failed.
    #[error("system value operation failed")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source data error.
        source: bedrock_data::DataError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: bedrock_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: bedrock_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn platform(
        operation: &'static str,
        source: bedrock_platform::PlatformError,
    ) -> Self {
        Self::Platform { operation, source }
    }

    pub(crate) const fn data(operation: &'static str, source: bedrock_data::DataError) -> Self {
        Self::Data { operation, source }
    }

    pub(crate) const fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "config.env",
            bedrock_config::ConfigError::InvalidEnvOverride {
                name: "BEDROCK_SQLSETTINGS_MAXOPENCONNS",
                value: "many".to_string(),
                reason: "not_a_number",
            },
        );
        assert!(matches!(config, AppError::Config { .. }));
        assert_eq!(config.to_string(), "configuration operation failed");
        assert!(config.source().is_some());

        let platform = AppError::platform(
            "platform_service.new",
            bedrock_platform::PlatformError::MetricsTerminated,
        );
        assert!(matches!(platform, AppError::Platform { .. }));

        let data = AppError::data(
            "system_value",
            bedrock_data::DataError::UnsupportedDriver {
                driver: "oracle".to_string(),
            },
        );
        assert!(matches!(data, AppError::Data { .. }));

        let io = AppError::io("signal.terminate", io::Error::other("signal"));
        assert!(matches!(io, AppError::Io { .. }));
    }
}
