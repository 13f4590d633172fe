//! Process bootstrap for the platform service.
//!
//! # Design
//! - Configuration comes from defaults layered with `BEDROCK_*` environment
//!   overrides and is validated before anything is opened.
//! - The service runs with metrics enabled; the endpoint itself still follows
//!   `MetricsSettings.Enable`.
//! - The diagnostic id is persisted in the `systems` table so restarts keep it.

use std::future::Future;
use std::sync::Arc;

use bedrock_config::{Config, ConfigStore, MemoryStore};
use bedrock_platform::{PlatformService, ServiceConfig, config_store, start_metrics};
use bedrock_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, init_logging};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Environment variable selecting `json` or `pretty` log output.
pub const LOG_FORMAT_ENV: &str = "BEDROCK_LOG_FORMAT";
/// Environment variable that disables object store certificate checks.
pub const SKIP_TLS_VERIFY_ENV: &str = "BEDROCK_SKIP_TLS_VERIFY";

const DIAGNOSTIC_ID_KEY: &str = "DiagnosticId";

/// Dependencies required to bootstrap the platform.
pub(crate) struct BootstrapDependencies {
    logging: LoggingConfig<'static>,
    config: Config,
    service_config: ServiceConfig,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the process environment.
    pub(crate) fn from_env() -> AppResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Construct dependencies from variables resolved through `lookup`.
    pub(crate) fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let logging = LoggingConfig {
            format: LogFormat::from_override(lookup(LOG_FORMAT_ENV).as_deref()),
            ..LoggingConfig::default()
        };

        let mut config = Config::default();
        config
            .apply_env_overrides(&lookup)
            .map_err(|err| AppError::config("config.env", err))?;
        config
            .validate()
            .map_err(|err| AppError::config("config.validate", err))?;

        let service_config = ServiceConfig {
            skip_tls_verify: lookup(SKIP_TLS_VERIFY_ENV)
                .is_some_and(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "True")),
            ..ServiceConfig::default()
        };

        Ok(Self {
            logging,
            config,
            service_config,
        })
    }
}

/// Entry point for the Bedrock boot sequence.
///
/// # Errors
///
/// Returns an error if configuration is invalid, logging cannot be installed,
/// the platform service fails to start, or signal handlers cannot be
/// registered.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    init_logging(&dependencies.logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let context = GlobalContextGuard::new("bootstrap");

    info!("Bedrock platform bootstrap starting");
    Box::pin(run_until(dependencies, Some(&context), wait_for_shutdown())).await
}

/// Start the service, block on `shutdown_signal`, then drain and stop.
///
/// The service is always shut down, even when the signal future fails.
pub(crate) async fn run_until<S>(
    dependencies: BootstrapDependencies,
    context: Option<&GlobalContextGuard>,
    shutdown_signal: S,
) -> AppResult<()>
where
    S: Future<Output = AppResult<()>>,
{
    let BootstrapDependencies {
        logging: _,
        config,
        service_config,
    } = dependencies;

    let store: Arc<dyn ConfigStore> = Arc::new(MemoryStore::new(config));
    let service = PlatformService::new(service_config, [config_store(store), start_metrics()])
        .await
        .map_err(|err| AppError::platform("platform_service.new", err))?;

    let outcome = match ensure_diagnostic_id(&service).await {
        Ok(id) => {
            if let Some(context) = context {
                context.record_diagnostic_id(&id);
            }
            let metrics = service.metrics_state().await;
            info!(
                driver = %service.config().sql_settings.driver_name,
                ?metrics,
                "Bedrock platform ready"
            );
            shutdown_signal.await
        }
        Err(err) => Err(err),
    };

    service.shutdown().await;
    info!("Bedrock platform stopped");
    outcome
}

/// Load the persisted diagnostic id, generating and storing one on first run.
async fn ensure_diagnostic_id(service: &PlatformService) -> AppResult<String> {
    let store = service.sql_store();
    let id = match store
        .system_value(DIAGNOSTIC_ID_KEY)
        .await
        .map_err(|err| AppError::data("system_value.get", err))?
    {
        Some(id) if !id.is_empty() => id,
        _ => {
            let id = Uuid::new_v4().simple().to_string();
            store
                .save_system_value(DIAGNOSTIC_ID_KEY, &id)
                .await
                .map_err(|err| AppError::data("system_value.save", err))?;
            id
        }
    };
    service.set_telemetry_id(id.clone());
    Ok(id)
}

/// Wait for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() -> AppResult<()> {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .map_err(|err| AppError::io("signal.ctrl_c", err))
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .map_err(|err| AppError::io("signal.terminate", err))?;
        signal.recv().await;
        Ok::<(), AppError>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<AppResult<()>>();

    let result = tokio::select! {
        result = ctrl_c => result.inspect(|_| info!("received Ctrl+C")),
        result = terminate => result.inspect(|_| info!("received SIGTERM")),
    };
    if let Err(err) = &result {
        error!(error = %err, "failed to wait for shutdown signal");
    }
    result
}
