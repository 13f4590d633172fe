mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use bedrock_data::{AnyPool, StoreObserver};
use bedrock_platform::{
    MetricsInterface, MetricsState, PlatformError, hook, start_metrics, with_metrics_interface,
};
use prometheus::Registry;

use common::{scrape_status, setup, setup_with, sqlite_config, unused_loopback_address};

#[derive(Default)]
struct RecordingMetrics {
    registrations: AtomicUsize,
    db_collectors: Mutex<Vec<String>>,
    observed_methods: Mutex<Vec<(String, bool)>>,
}

impl RecordingMetrics {
    fn db_collectors(&self) -> Vec<String> {
        self.db_collectors
            .lock()
            .map(|names| names.clone())
            .unwrap_or_default()
    }

    fn observed_methods(&self) -> Vec<(String, bool)> {
        self.observed_methods
            .lock()
            .map(|methods| methods.clone())
            .unwrap_or_default()
    }
}

impl StoreObserver for RecordingMetrics {
    fn register_db_collector(&self, _pool: &AnyPool, name: &str) {
        if let Ok(mut names) = self.db_collectors.lock() {
            names.push(name.to_string());
        }
    }

    fn observe_store_method_duration(&self, method: &str, success: bool, _elapsed: f64) {
        if let Ok(mut methods) = self.observed_methods.lock() {
            methods.push((method.to_string(), success));
        }
    }
}

impl MetricsInterface for RecordingMetrics {
    fn register(&self, _registry: &Registry) -> prometheus::Result<()> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn endpoint_is_never_started_without_the_option() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let address = unused_loopback_address()?;
    let mut config = sqlite_config(&dir);
    config.metrics_settings.listen_address = address.to_string();
    let harness = setup_with(dir, config, Vec::new()).await?;
    let service = &harness.service;

    assert_eq!(service.metrics_state().await, MetricsState::NotStarted);
    service
        .update_config(|config| config.metrics_settings.enable = true)
        .await?;
    assert_eq!(service.metrics_state().await, MetricsState::NotStarted);
    assert!(service.metrics_address().await.is_none());
    assert_eq!(scrape_status(address).await, None);

    service.shutdown().await;
    assert_eq!(service.metrics_state().await, MetricsState::NotStarted);
    Ok(())
}

#[tokio::test]
async fn enable_toggle_binds_and_unbinds_synchronously() -> Result<()> {
    let harness = setup(vec![start_metrics()]).await?;
    let service = &harness.service;
    assert_eq!(service.metrics_state().await, MetricsState::Stopped);

    service
        .update_config(|config| config.metrics_settings.enable = true)
        .await?;
    assert_eq!(service.metrics_state().await, MetricsState::Listening);
    let address = service
        .metrics_address()
        .await
        .context("listening controller has an address")?;
    assert_eq!(scrape_status(address).await, Some(200));

    let body = reqwest::Client::builder()
        .no_proxy()
        .build()?
        .get(format!("http://{address}/metrics"))
        .send()
        .await?
        .text()
        .await?;
    assert!(body.contains("platform_tasks_outstanding"));
    assert!(body.contains("platform_db_pool_connections"));

    service
        .update_config(|config| config.metrics_settings.enable = false)
        .await?;
    assert_eq!(service.metrics_state().await, MetricsState::Stopped);
    assert_eq!(scrape_status(address).await, None);

    service.shutdown().await;
    assert_eq!(service.metrics_state().await, MetricsState::Terminated);
    Ok(())
}

#[tokio::test]
async fn bind_failure_is_reported_to_the_saver() -> Result<()> {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let taken = occupied.local_addr()?;
    let harness = setup(vec![start_metrics()]).await?;
    let service = &harness.service;

    let result = service
        .update_config(|config| {
            config.metrics_settings.enable = true;
            config.metrics_settings.listen_address = taken.to_string();
        })
        .await;
    assert!(matches!(result, Err(PlatformError::MetricsBind { .. })));
    assert_eq!(service.metrics_state().await, MetricsState::Stopped);
    assert!(service.config().metrics_settings.enable);
    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unchanged_save_retries_after_bind_failure() -> Result<()> {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let taken = occupied.local_addr()?;
    let harness = setup(vec![start_metrics()]).await?;
    let service = &harness.service;

    let result = service
        .update_config(|config| {
            config.metrics_settings.enable = true;
            config.metrics_settings.listen_address = taken.to_string();
        })
        .await;
    assert!(matches!(result, Err(PlatformError::MetricsBind { .. })));
    drop(occupied);

    let (old, new) = service.update_config(|_| {}).await?;
    assert_eq!(old.metrics_settings, new.metrics_settings);
    assert_eq!(service.metrics_state().await, MetricsState::Listening);
    assert_eq!(service.metrics_address().await, Some(taken));
    assert_eq!(scrape_status(taken).await, Some(200));

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn save_reconciles_settings_written_behind_the_service() -> Result<()> {
    let harness = setup(vec![start_metrics()]).await?;
    let service = &harness.service;

    let mut enabled = (*service.config()).clone();
    enabled.metrics_settings.enable = true;
    service.config_store().set(enabled)?;
    assert_eq!(service.metrics_state().await, MetricsState::Stopped);

    service.save_config((*service.config()).clone()).await?;
    assert_eq!(service.metrics_state().await, MetricsState::Listening);
    let address = service
        .metrics_address()
        .await
        .context("listening controller has an address")?;
    assert_eq!(scrape_status(address).await, Some(200));

    // A second identical save keeps the same listener.
    service.save_config((*service.config()).clone()).await?;
    assert_eq!(service.metrics_address().await, Some(address));

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn advanced_implementation_is_registered_on_reset() -> Result<()> {
    let recording = Arc::new(RecordingMetrics::default());
    let installed: Arc<dyn MetricsInterface> = recording.clone();
    let harness = setup(vec![
        start_metrics(),
        hook(move |builder| {
            builder.set_metrics_interface(installed);
            Ok(())
        }),
    ])
    .await?;

    let after_construction = recording.registrations.load(Ordering::SeqCst);
    assert!(after_construction >= 1);
    harness.service.reset_metrics().await?;
    assert_eq!(
        recording.registrations.load(Ordering::SeqCst),
        after_construction + 1
    );
    harness.service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn advanced_implementation_sees_database_hooks() -> Result<()> {
    let recording = Arc::new(RecordingMetrics::default());
    let installed: Arc<dyn MetricsInterface> = recording.clone();
    let harness = setup(vec![start_metrics(), with_metrics_interface(installed)]).await?;

    assert_eq!(recording.db_collectors(), vec!["master".to_string()]);
    harness.service.database_type_and_schema_version().await?;
    assert!(
        recording
            .observed_methods()
            .iter()
            .any(|(_, success)| *success)
    );
    harness.service.shutdown().await;
    Ok(())
}
