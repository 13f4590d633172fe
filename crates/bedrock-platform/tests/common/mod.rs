#![allow(dead_code, unreachable_pub)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bedrock_config::{Config, ConfigStore, DATABASE_DRIVER_SQLITE, MemoryStore};
use bedrock_platform::{PlatformOption, PlatformService, ServiceConfig, config_store};
use bedrock_test_support::sqlite_data_source;
use tempfile::TempDir;

/// A service backed by a scratch directory that lives as long as the harness.
pub struct Harness {
    pub dir: TempDir,
    pub service: PlatformService,
}

/// Configuration pointing every resource into `dir`.
pub fn sqlite_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.sql_settings.driver_name = DATABASE_DRIVER_SQLITE.into();
    config.sql_settings.data_source = sqlite_data_source(dir.path(), "bedrock");
    config.sql_settings.max_open_conns = 4;
    config.sql_settings.max_idle_conns = 1;
    config.file_settings.directory = dir.path().join("files").display().to_string();
    config.metrics_settings.listen_address = "127.0.0.1:0".into();
    config
}

pub fn service_config() -> ServiceConfig {
    ServiceConfig {
        connect_timeout: Duration::from_secs(5),
        ..ServiceConfig::default()
    }
}

/// Build a service over `config` plus `extra` options.
pub async fn setup_with(
    dir: TempDir,
    config: Config,
    extra: Vec<PlatformOption>,
) -> Result<Harness> {
    let store: Arc<dyn ConfigStore> = Arc::new(MemoryStore::new(config));
    let mut options = vec![config_store(store)];
    options.extend(extra);
    let service = PlatformService::new(service_config(), options).await?;
    Ok(Harness { dir, service })
}

/// Build a service over the default scratch configuration.
pub async fn setup(extra: Vec<PlatformOption>) -> Result<Harness> {
    let dir = tempfile::tempdir()?;
    let config = sqlite_config(&dir);
    setup_with(dir, config, extra).await
}

/// Status of a fresh GET against the metrics endpoint, or `None` when the
/// connection fails.
pub async fn scrape_status(address: SocketAddr) -> Option<u16> {
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(2))
        .build()
        .ok()?;
    client
        .get(format!("http://{address}/metrics"))
        .send()
        .await
        .ok()
        .map(|response| response.status().as_u16())
}

/// Reserve and release a loopback port nothing is listening on.
pub fn unused_loopback_address() -> Result<SocketAddr> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?)
}
