//! Hot-reloadable metrics endpoint.
//!
//! # Design
//! - A controller exists only when the service was built with metrics
//!   enabled; otherwise the endpoint is never bound.
//! - `reset` stops any running listener, rebuilds the registry from the base
//!   collectors plus the installed advanced implementation, then binds again
//!   when the configuration enables it.
//! - Stopping waits for the server task, so the port is closed by the time
//!   `reset` returns.
//! - A failed bind leaves the controller stopped.
//! - [`MetricsController::serves`] compares settings with the live listener,
//!   not with the previously saved settings.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bedrock_config::{MetricsSettings, parse_listen_address};
use bedrock_data::StoreObserver;
use bedrock_telemetry::{Metrics, render_registry};
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::error::{PlatformError, PlatformResult};

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Pluggable advanced metrics implementation.
///
/// Besides attaching its own collectors it receives the store hooks, which
/// are skipped entirely when no implementation is installed.
pub trait MetricsInterface: StoreObserver {
    /// Attach collectors to a freshly built registry. Called on every reset.
    ///
    /// # Errors
    ///
    /// Returns the Prometheus error when a collector cannot be registered.
    fn register(&self, registry: &Registry) -> prometheus::Result<()>;
}

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsState {
    /// Metrics were not enabled at construction.
    NotStarted,
    /// Controller exists but no listener is bound.
    Stopped,
    /// Listener bound and serving.
    Listening,
    /// Shut down; no further transitions.
    Terminated,
}

/// Owner of the metrics listener and collector registry.
pub struct MetricsController {
    base: Metrics,
    advanced: Option<Arc<dyn MetricsInterface>>,
    inner: Mutex<ControllerInner>,
}

struct ControllerInner {
    terminated: bool,
    registry: Arc<Registry>,
    server: Option<RunningServer>,
}

struct RunningServer {
    requested: SocketAddr,
    address: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

#[derive(Clone)]
struct ScrapeState {
    registry: Arc<Registry>,
    metrics: Metrics,
}

impl MetricsController {
    /// A stopped controller.
    #[must_use]
    pub fn new(base: Metrics, advanced: Option<Arc<dyn MetricsInterface>>) -> Self {
        Self {
            base,
            advanced,
            inner: Mutex::new(ControllerInner {
                terminated: false,
                registry: Arc::new(Registry::new()),
                server: None,
            }),
        }
    }

    /// Stop if listening, rebuild the registry, and listen again if enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller was terminated, the registry cannot
    /// be rebuilt, the address is invalid, or the listener cannot bind.
    pub async fn reset(&self, settings: &MetricsSettings) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.terminated {
            return Err(PlatformError::MetricsTerminated);
        }
        if let Some(server) = inner.server.take() {
            server.stop().await;
        }
        self.base.inc_metrics_reset();

        let registry = Arc::new(self.build_registry()?);
        inner.registry = Arc::clone(&registry);

        if !settings.enable {
            debug!("metrics endpoint disabled");
            return Ok(());
        }

        let address = parse_listen_address(&settings.listen_address)
            .map_err(|source| PlatformError::config("metrics.listen_address", source))?;
        let server = RunningServer::start(address, registry, self.base.clone()).await?;
        info!(address = %server.address, "metrics endpoint listening");
        inner.server = Some(server);
        Ok(())
    }

    /// Whether the live endpoint already reflects `settings`.
    ///
    /// False after a failed bind, a dead server task, or termination, so a
    /// later save with unchanged settings still retries the listener.
    pub async fn serves(&self, settings: &MetricsSettings) -> bool {
        let inner = self.inner.lock().await;
        if inner.terminated {
            return false;
        }
        match (&inner.server, settings.enable) {
            (None, enabled) => !enabled,
            (Some(_), false) => false,
            (Some(server), true) => parse_listen_address(&settings.listen_address)
                .is_ok_and(|address| {
                    server.requested == address && !server.handle.is_finished()
                }),
        }
    }

    /// Stop the listener and refuse further resets.
    pub async fn terminate(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(server) = inner.server.take() {
            server.stop().await;
        }
        inner.terminated = true;
        debug!("metrics controller terminated");
    }

    /// Current state.
    pub async fn state(&self) -> MetricsState {
        let inner = self.inner.lock().await;
        if inner.terminated {
            MetricsState::Terminated
        } else if inner.server.is_some() {
            MetricsState::Listening
        } else {
            MetricsState::Stopped
        }
    }

    /// Bound address while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .lock()
            .await
            .server
            .as_ref()
            .map(|server| server.address)
    }

    /// Render the current registry.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub async fn render(&self) -> PlatformResult<String> {
        let registry = Arc::clone(&self.inner.lock().await.registry);
        render_registry(&registry).map_err(|source| PlatformError::telemetry("metrics.render", source))
    }

    /// The installed advanced implementation as a store observer.
    #[must_use]
    pub fn store_observer(&self) -> Option<Arc<dyn StoreObserver>> {
        self.advanced
            .clone()
            .map(|advanced| advanced as Arc<dyn StoreObserver>)
    }

    fn build_registry(&self) -> PlatformResult<Registry> {
        let registry = Registry::new();
        self.base
            .register(&registry)
            .map_err(|source| PlatformError::telemetry("metrics.register", source))?;
        if let Some(advanced) = &self.advanced {
            advanced
                .register(&registry)
                .map_err(|source| PlatformError::MetricsRegister { source })?;
        }
        Ok(registry)
    }
}

impl RunningServer {
    async fn start(
        address: SocketAddr,
        registry: Arc<Registry>,
        metrics: Metrics,
    ) -> PlatformResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| PlatformError::MetricsBind { address, source })?;
        let bound = listener
            .local_addr()
            .map_err(|source| PlatformError::MetricsBind { address, source })?;

        let router = Router::new()
            .route("/", get(scrape))
            .route("/metrics", get(scrape))
            .with_state(ScrapeState { registry, metrics })
            .layer(TraceLayer::new_for_http());

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
        });

        Ok(Self {
            requested: address,
            address: bound,
            shutdown,
            handle,
        })
    }

    async fn stop(self) {
        let Self {
            address,
            shutdown,
            mut handle,
            requested: _,
        } = self;
        shutdown.cancel();
        match tokio::time::timeout(STOP_GRACE, &mut handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => warn!(%address, error = %err, "metrics server exited with error"),
            Ok(Err(err)) => warn!(%address, error = %err, "metrics server task failed"),
            Err(_) => {
                warn!(%address, "metrics server did not stop in time; aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
        info!(%address, "metrics endpoint stopped");
    }
}

async fn scrape(State(state): State<ScrapeState>) -> Response {
    match render_registry(&state.registry) {
        Ok(body) => {
            state.metrics.inc_metrics_scrape(StatusCode::OK.as_u16());
            ([(CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], body).into_response()
        }
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            state
                .metrics
                .inc_metrics_scrape(StatusCode::INTERNAL_SERVER_ERROR.as_u16());
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
