//! Prometheus collectors for the platform runtime.
//!
//! # Design
//! - Collectors live independently of any registry so a fresh registry can be
//!   rebuilt on every metrics reset while counters keep their values.
//! - Exposes a minimal set of counters/gauges relevant to the platform core.

use std::sync::Arc;

use prometheus::{
    IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
    core::Collector,
};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus collectors shared across platform components.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    tasks_launched_total: IntCounter,
    tasks_outstanding: IntGauge,
    task_panics_total: IntCounter,
    task_rejections_total: IntCounter,
    config_saves_total: IntCounter,
    metrics_resets_total: IntCounter,
    db_pool_connections: IntGaugeVec,
    metrics_scrapes_total: IntCounterVec,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Background tasks launched since start.
    pub tasks_launched_total: u64,
    /// Background tasks currently running.
    pub tasks_outstanding: i64,
    /// Background tasks that panicked.
    pub task_panics_total: u64,
    /// Launch attempts rejected during shutdown.
    pub task_rejections_total: u64,
    /// Successful configuration saves.
    pub config_saves_total: u64,
    /// Metrics controller resets.
    pub metrics_resets_total: u64,
}

impl Metrics {
    /// Construct the platform collectors.
    ///
    /// # Errors
    ///
    /// Returns an error if any Prometheus collector cannot be built.
    pub fn new() -> Result<Self> {
        let tasks_launched_total = counter(
            "platform_tasks_launched_total",
            "Background tasks launched through the tracker",
        )?;
        let tasks_outstanding = IntGauge::with_opts(Opts::new(
            "platform_tasks_outstanding",
            "Background tasks currently running",
        ))
        .map_err(|source| TelemetryError::build("platform_tasks_outstanding", source))?;
        let task_panics_total = counter(
            "platform_task_panics_total",
            "Background tasks that terminated by panicking",
        )?;
        let task_rejections_total = counter(
            "platform_task_rejections_total",
            "Background task launches rejected during shutdown",
        )?;
        let config_saves_total =
            counter("platform_config_saves_total", "Configuration snapshots saved")?;
        let metrics_resets_total = counter(
            "platform_metrics_resets_total",
            "Metrics endpoint resets performed",
        )?;
        let db_pool_connections = IntGaugeVec::new(
            Opts::new(
                "platform_db_pool_connections",
                "Open database connections by pool role",
            ),
            &["role"],
        )
        .map_err(|source| TelemetryError::build("platform_db_pool_connections", source))?;
        let metrics_scrapes_total = IntCounterVec::new(
            Opts::new("platform_metrics_scrapes_total", "Metrics endpoint scrapes"),
            &["code"],
        )
        .map_err(|source| TelemetryError::build("platform_metrics_scrapes_total", source))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                tasks_launched_total,
                tasks_outstanding,
                task_panics_total,
                task_rejections_total,
                config_saves_total,
                metrics_resets_total,
                db_pool_connections,
                metrics_scrapes_total,
            }),
        })
    }

    /// Register every platform collector into `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector with the same name already exists in
    /// `registry`.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        let inner = &self.inner;
        register(registry, "platform_tasks_launched_total", &inner.tasks_launched_total)?;
        register(registry, "platform_tasks_outstanding", &inner.tasks_outstanding)?;
        register(registry, "platform_task_panics_total", &inner.task_panics_total)?;
        register(
            registry,
            "platform_task_rejections_total",
            &inner.task_rejections_total,
        )?;
        register(registry, "platform_config_saves_total", &inner.config_saves_total)?;
        register(
            registry,
            "platform_metrics_resets_total",
            &inner.metrics_resets_total,
        )?;
        register(
            registry,
            "platform_db_pool_connections",
            &inner.db_pool_connections,
        )?;
        register(
            registry,
            "platform_metrics_scrapes_total",
            &inner.metrics_scrapes_total,
        )
    }

    /// Record a background task launch.
    pub fn task_launched(&self) {
        self.inner.tasks_launched_total.inc();
        self.inner.tasks_outstanding.inc();
    }

    /// Record a background task completion.
    pub fn task_finished(&self) {
        self.inner.tasks_outstanding.dec();
    }

    /// Record a background task panic.
    pub fn inc_task_panic(&self) {
        self.inner.task_panics_total.inc();
    }

    /// Record a launch rejected because shutdown has begun.
    pub fn inc_task_rejection(&self) {
        self.inner.task_rejections_total.inc();
    }

    /// Record a successful configuration save.
    pub fn inc_config_save(&self) {
        self.inner.config_saves_total.inc();
    }

    /// Record a metrics endpoint reset.
    pub fn inc_metrics_reset(&self) {
        self.inner.metrics_resets_total.inc();
    }

    /// Set the open connection gauge for a pool role (`master`, `replica`, `search`).
    pub fn set_db_pool_connections(&self, role: &str, count: i64) {
        self.inner
            .db_pool_connections
            .with_label_values(&[role])
            .set(count);
    }

    /// Count a scrape of the metrics endpoint by status code.
    pub fn inc_metrics_scrape(&self, status: u16) {
        self.inner
            .metrics_scrapes_total
            .with_label_values(&[&status.to_string()])
            .inc();
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_launched_total: self.inner.tasks_launched_total.get(),
            tasks_outstanding: self.inner.tasks_outstanding.get(),
            task_panics_total: self.inner.task_panics_total.get(),
            task_rejections_total: self.inner.task_rejections_total.get(),
            config_saves_total: self.inner.config_saves_total.get(),
            metrics_resets_total: self.inner.metrics_resets_total.get(),
        }
    }
}

/// Render `registry` using the Prometheus text exposition format.
///
/// # Errors
///
/// Returns an error if the encoder rejects a gathered metric family.
pub fn render_registry(registry: &Registry) -> Result<String> {
    let metric_families = registry.gather();
    let mut rendered = String::new();
    TextEncoder::new()
        .encode_utf8(&metric_families, &mut rendered)
        .map_err(|source| TelemetryError::Render {
            families: metric_families.len(),
            source,
        })?;
    Ok(rendered)
}

fn counter(name: &'static str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::build(name, source))
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::register(name, source))
}
