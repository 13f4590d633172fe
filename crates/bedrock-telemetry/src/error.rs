//! Telemetry failures.
//!
//! # Design
//! - Collector failures carry the metric name and the stage that failed, so
//!   one variant covers both construction and registration.
//! - Rendering writes straight into a `String`; only the encoder can fail.

use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Point in a collector's life at which Prometheus rejected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorStage {
    /// Validating names, help text, and labels.
    Build,
    /// Attaching the collector to a registry.
    Register,
}

/// Errors raised by telemetry helpers.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global tracing subscriber was already installed.
    #[error("tracing subscriber already installed")]
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        source: tracing_subscriber::util::TryInitError,
    },
    /// Prometheus rejected a collector.
    #[error("metrics collector rejected")]
    Collector {
        /// Metric name.
        name: &'static str,
        /// Stage that failed.
        stage: CollectorStage,
        /// Underlying Prometheus error.
        source: prometheus::Error,
    },
    /// The text exposition encoder failed.
    #[error("metrics rendering failed")]
    Render {
        /// Metric families gathered before encoding.
        families: usize,
        /// Underlying Prometheus error.
        source: prometheus::Error,
    },
}

impl TelemetryError {
    pub(crate) const fn build(name: &'static str, source: prometheus::Error) -> Self {
        Self::Collector {
            name,
            stage: CollectorStage::Build,
            source,
        }
    }

    pub(crate) const fn register(name: &'static str, source: prometheus::Error) -> Self {
        Self::Collector {
            name,
            stage: CollectorStage::Register,
            source,
        }
    }

    /// Metric name for collector failures.
    #[must_use]
    pub const fn metric_name(&self) -> Option<&'static str> {
        match self {
            Self::Collector { name, .. } => Some(*name),
            Self::SubscriberInstall { .. } | Self::Render { .. } => None,
        }
    }
}
