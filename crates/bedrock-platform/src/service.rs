//! The platform service: owns the topology, storage backend, metrics
//! controller, and background task tracker for one process lifetime.
//!
//! # Design
//! - Every resource is a field of one instance; independent services can
//!   coexist in a single process.
//! - Options run against a builder before any resource is opened, so hooks can
//!   force a license or swap the metrics implementation.
//! - Topology is derived once, from the license held at construction.
//! - A metrics toggle is applied before `save_config` returns.
//! - `shutdown` drains tasks first, then releases the listener and pools.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use bedrock_config::{Config, ConfigStore, MemoryStore};
use bedrock_data::{ConnectOptions, SqlStore, StoreObserver};
use bedrock_filestore::{FileBackend, FileBackendSettings, new_file_backend};
use bedrock_telemetry::{Metrics, build_sha};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{PlatformError, PlatformResult};
use crate::license::{License, LicenseGate};
use crate::metrics::{MetricsController, MetricsInterface, MetricsState};
use crate::tasks::BackgroundTasks;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Base service options.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Upper bound on opening each database pool.
    pub connect_timeout: Duration,
    /// Accept invalid TLS certificates from the object store.
    pub skip_tls_verify: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            skip_tls_verify: false,
        }
    }
}

/// A construction option applied to the builder in order.
pub type PlatformOption =
    Box<dyn FnOnce(&mut PlatformServiceBuilder) -> PlatformResult<()> + Send>;

/// Use `store` as the configuration source.
#[must_use]
pub fn config_store(store: Arc<dyn ConfigStore>) -> PlatformOption {
    hook(move |builder| {
        builder.set_config_store(store);
        Ok(())
    })
}

/// Create the metrics controller.
#[must_use]
pub fn start_metrics() -> PlatformOption {
    hook(|builder| {
        builder.enable_metrics();
        Ok(())
    })
}

/// Store `license` before the topology is derived.
#[must_use]
pub fn with_license(license: License) -> PlatformOption {
    hook(move |builder| {
        builder.license_gate().store(license);
        Ok(())
    })
}

/// Install an advanced metrics implementation.
#[must_use]
pub fn with_metrics_interface(implementation: Arc<dyn MetricsInterface>) -> PlatformOption {
    hook(move |builder| {
        builder.set_metrics_interface(implementation);
        Ok(())
    })
}

/// Wrap an arbitrary post-construction hook.
#[must_use]
pub fn hook<F>(hook: F) -> PlatformOption
where
    F: FnOnce(&mut PlatformServiceBuilder) -> PlatformResult<()> + Send + 'static,
{
    Box::new(hook)
}

/// Mutable construction state handed to each option.
#[derive(Default)]
pub struct PlatformServiceBuilder {
    config_store: Option<Arc<dyn ConfigStore>>,
    start_metrics: bool,
    license: Arc<LicenseGate>,
    metrics_interface: Option<Arc<dyn MetricsInterface>>,
}

impl PlatformServiceBuilder {
    /// Replace the configuration store.
    pub fn set_config_store(&mut self, store: Arc<dyn ConfigStore>) {
        self.config_store = Some(store);
    }

    /// Request the metrics controller.
    pub const fn enable_metrics(&mut self) {
        self.start_metrics = true;
    }

    /// The license cell the service will own.
    #[must_use]
    pub fn license_gate(&self) -> &LicenseGate {
        &self.license
    }

    /// Replace the advanced metrics implementation.
    pub fn set_metrics_interface(&mut self, implementation: Arc<dyn MetricsInterface>) {
        self.metrics_interface = Some(implementation);
    }
}

/// Runtime substrate shared by higher-level features.
pub struct PlatformService {
    config_store: Arc<dyn ConfigStore>,
    license: Arc<LicenseGate>,
    sql_store: Arc<SqlStore>,
    file_backend: Arc<dyn FileBackend>,
    tasks: BackgroundTasks,
    metrics: Option<MetricsController>,
    telemetry: Metrics,
    telemetry_id: ArcSwap<String>,
    client_config: ArcSwap<BTreeMap<String, String>>,
    save_lock: Mutex<()>,
    shutting_down: AtomicBool,
}

impl PlatformService {
    /// Build the service from the current configuration and license.
    ///
    /// # Errors
    ///
    /// Returns an error if an option fails, the storage driver is invalid,
    /// any configured and entitled pool cannot be opened, or the metrics
    /// endpoint cannot start. No partially built service is returned.
    pub async fn new<I>(service_config: ServiceConfig, options: I) -> PlatformResult<Self>
    where
        I: IntoIterator<Item = PlatformOption>,
    {
        let mut builder = PlatformServiceBuilder::default();
        for option in options {
            option(&mut builder)?;
        }
        let PlatformServiceBuilder {
            config_store,
            start_metrics,
            license,
            metrics_interface,
        } = builder;

        let config_store =
            config_store.unwrap_or_else(|| Arc::new(MemoryStore::with_defaults()));
        let config = config_store.get();
        let features = license.features();

        let telemetry =
            Metrics::new().map_err(|source| PlatformError::telemetry("metrics.new", source))?;
        let tasks = BackgroundTasks::new(telemetry.clone())?;

        let file_settings = FileBackendSettings::from_config(
            &config.file_settings,
            features.compliance,
            service_config.skip_tls_verify,
        );
        let file_backend =
            new_file_backend(file_settings).map_err(|source| PlatformError::FileStore {
                operation: "file_backend.new",
                source,
            })?;

        let observer = metrics_interface
            .clone()
            .map(|implementation| implementation as Arc<dyn StoreObserver>);
        let connect = ConnectOptions::new(service_config.connect_timeout)
            .with_entitlements(features.replica_entitlements())
            .with_observer(observer);
        let sql_store = SqlStore::connect(&config.sql_settings, connect)
            .await
            .map_err(|source| PlatformError::data("sql_store.connect", source))?;

        let metrics =
            start_metrics.then(|| MetricsController::new(telemetry.clone(), metrics_interface));

        let service = Self {
            config_store,
            license,
            sql_store: Arc::new(sql_store),
            file_backend,
            tasks,
            metrics,
            telemetry,
            telemetry_id: ArcSwap::from_pointee(String::new()),
            client_config: ArcSwap::from_pointee(BTreeMap::new()),
            save_lock: Mutex::new(()),
            shutting_down: AtomicBool::new(false),
        };
        service.regenerate_client_config();

        if let Err(err) = service.reset_metrics().await {
            service.sql_store.close().await;
            return Err(err);
        }

        info!(
            licensed = service.license.is_licensed(),
            replicas = service.sql_store.replica_count(),
            search_replicas = service.sql_store.search_replica_count(),
            file_driver = service.file_backend.driver_name(),
            metrics = service.metrics.is_some(),
            "platform service ready"
        );
        Ok(service)
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        self.config_store.get()
    }

    /// Underlying configuration store.
    #[must_use]
    pub fn config_store(&self) -> Arc<dyn ConfigStore> {
        Arc::clone(&self.config_store)
    }

    /// Commit `config`, applying any metrics toggle before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is shutting down, validation rejects
    /// the snapshot, or the metrics endpoint cannot be restarted. In the last
    /// case the snapshot is committed and the endpoint is left stopped.
    pub async fn save_config(&self, config: Config) -> PlatformResult<(Arc<Config>, Arc<Config>)> {
        self.ensure_running("save_config")?;
        let _serialized = self.save_lock.lock().await;

        let (old, new) = self
            .config_store
            .set(config)
            .map_err(|source| PlatformError::config("config_store.set", source))?;
        self.telemetry.inc_config_save();
        self.regenerate_client_config();

        if let Some(metrics) = &self.metrics
            && (old.metrics_settings != new.metrics_settings
                || !metrics.serves(&new.metrics_settings).await)
        {
            self.reset_metrics().await?;
        }
        debug!("configuration saved");
        Ok((old, new))
    }

    /// Apply `change` to a copy of the current snapshot and save it.
    ///
    /// # Errors
    ///
    /// See [`Self::save_config`].
    pub async fn update_config<F>(&self, change: F) -> PlatformResult<(Arc<Config>, Arc<Config>)>
    where
        F: FnOnce(&mut Config),
    {
        let mut next = (*self.config()).clone();
        change(&mut next);
        self.save_config(next).await
    }

    /// Stop, rebuild, and restart the metrics endpoint from the current
    /// configuration. A no-op when metrics were not enabled at construction.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be rebuilt or the listener
    /// cannot bind.
    pub async fn reset_metrics(&self) -> PlatformResult<()> {
        let Some(metrics) = &self.metrics else {
            return Ok(());
        };
        self.record_pool_gauges();
        metrics.reset(&self.config().metrics_settings).await
    }

    /// Metrics controller state.
    pub async fn metrics_state(&self) -> MetricsState {
        match &self.metrics {
            Some(metrics) => metrics.state().await,
            None => MetricsState::NotStarted,
        }
    }

    /// Bound metrics address while listening.
    pub async fn metrics_address(&self) -> Option<SocketAddr> {
        match &self.metrics {
            Some(metrics) => metrics.local_addr().await,
            None => None,
        }
    }

    /// Platform collectors.
    #[must_use]
    pub const fn telemetry(&self) -> &Metrics {
        &self.telemetry
    }

    /// Database topology.
    #[must_use]
    pub const fn sql_store(&self) -> &Arc<SqlStore> {
        &self.sql_store
    }

    /// The storage backend chosen at construction.
    #[must_use]
    pub fn file_backend(&self) -> Arc<dyn FileBackend> {
        Arc::clone(&self.file_backend)
    }

    /// Current license, if any.
    #[must_use]
    pub fn license(&self) -> Option<Arc<License>> {
        self.license.load()
    }

    /// Replace the license. The database topology is not re-derived.
    pub fn set_license(&self, license: License) {
        self.license.store(license);
        self.regenerate_client_config();
        info!("license updated; database topology unchanged until restart");
    }

    /// Remove the license.
    pub fn remove_license(&self) {
        self.license.clear();
        self.regenerate_client_config();
    }

    /// Driver name and applied schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version query fails; pool state is unaffected.
    pub async fn database_type_and_schema_version(&self) -> PlatformResult<(String, i64)> {
        self.sql_store
            .database_type_and_schema_version()
            .await
            .map_err(|source| PlatformError::data("database_type_and_schema_version", source))
    }

    /// Set the diagnostic identifier and regenerate the client configuration.
    pub fn set_telemetry_id(&self, id: impl Into<String>) {
        self.telemetry_id.store(Arc::new(id.into()));
        self.regenerate_client_config();
    }

    /// Diagnostic identifier; empty until set.
    #[must_use]
    pub fn telemetry_id(&self) -> String {
        self.telemetry_id.load().as_ref().clone()
    }

    /// Client-visible subset of the configuration.
    #[must_use]
    pub fn limited_client_config(&self) -> BTreeMap<String, String> {
        self.client_config.load().as_ref().clone()
    }

    /// Run `work` as a tracked background task.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::ShuttingDown`] once shutdown has begun.
    pub fn launch<F>(&self, work: F) -> PlatformResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.launch(work)
    }

    /// Run fallible `work` as a tracked background task, logging its error.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::ShuttingDown`] once shutdown has begun.
    pub fn launch_fallible<F, E>(&self, name: &'static str, work: F) -> PlatformResult<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        self.tasks.launch_fallible(name, work)
    }

    /// Background tasks still running.
    #[must_use]
    pub fn outstanding_tasks(&self) -> usize {
        self.tasks.outstanding()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Drain background tasks, then release the metrics listener and pools.
    ///
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            debug!("shutdown already requested");
            return;
        }
        info!(
            outstanding = self.tasks.outstanding(),
            "platform service shutting down"
        );
        self.tasks.drain().await;
        if let Some(metrics) = &self.metrics {
            metrics.terminate().await;
        }
        self.sql_store.close().await;
        info!("platform service stopped");
    }

    fn ensure_running(&self, operation: &'static str) -> PlatformResult<()> {
        if self.is_shutting_down() {
            warn!(operation, "rejected after shutdown");
            return Err(PlatformError::ShuttingDown { operation });
        }
        Ok(())
    }

    fn record_pool_gauges(&self) {
        let store = &self.sql_store;
        self.telemetry
            .set_db_pool_connections("master", i64::from(store.total_master_connections()));
        self.telemetry
            .set_db_pool_connections("replica", i64::from(store.total_read_connections()));
        self.telemetry
            .set_db_pool_connections("search", i64::from(store.total_search_connections()));
    }

    fn regenerate_client_config(&self) {
        let generated = limited_client_config(
            &self.config(),
            &self.telemetry_id.load(),
            self.license.is_licensed(),
        );
        self.client_config.store(Arc::new(generated));
    }
}

/// Build the client-visible configuration map.
#[must_use]
pub fn limited_client_config(
    config: &Config,
    diagnostic_id: &str,
    licensed: bool,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("DiagnosticId".to_string(), diagnostic_id.to_string()),
        (
            "SiteURL".to_string(),
            config.service_settings.site_url.clone(),
        ),
        ("Version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
        ("BuildHash".to_string(), build_sha().to_string()),
        (
            "EnableDeveloper".to_string(),
            config.service_settings.enable_developer.to_string(),
        ),
        (
            "MetricsEnabled".to_string(),
            config.metrics_settings.enable.to_string(),
        ),
        (
            "FileDriver".to_string(),
            config.file_settings.driver_name.clone(),
        ),
        ("IsLicensed".to_string(), licensed.to_string()),
    ])
}
