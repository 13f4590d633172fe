use std::time::Duration;

use anyhow::{Context, Result};
use bedrock_config::SqlSettings;
use bedrock_data::{ConnectOptions, SqlStore};
use bedrock_test_support::ExternalDatabase;

async fn assert_schema_diagnostics(driver: &str) -> Result<()> {
    let Some(database) = ExternalDatabase::provision(driver).await? else {
        eprintln!("skipping {driver} diagnostics: no external database or docker available");
        return Ok(());
    };

    let settings = SqlSettings {
        driver_name: driver.into(),
        data_source: database.url().to_string(),
        max_open_conns: 4,
        max_idle_conns: 1,
        ..SqlSettings::default()
    };

    let store = {
        let mut attempts = 0;
        loop {
            let options = ConnectOptions::new(Duration::from_secs(10));
            match SqlStore::connect(&settings, options).await {
                Ok(store) => break store,
                Err(err) => {
                    attempts += 1;
                    if attempts >= 10 {
                        return Err(err).context("failed to connect to test database");
                    }
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    };

    let (reported, version) = store.database_type_and_schema_version().await?;
    assert_eq!(reported, driver);
    assert!(version >= 1);
    assert!(!store.database_version().await?.is_empty());

    store.save_system_value("DiagnosticId", "abc").await?;
    assert_eq!(
        store.system_value("DiagnosticId").await?.as_deref(),
        Some("abc")
    );
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn postgres_reports_driver_and_schema_version() -> Result<()> {
    assert_schema_diagnostics("postgres").await
}

#[tokio::test]
async fn mysql_reports_driver_and_schema_version() -> Result<()> {
    assert_schema_diagnostics("mysql").await
}
