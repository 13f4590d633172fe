mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use bedrock_config::{Config, DATABASE_DRIVER_SQLITE, FILE_DRIVER_S3};
use bedrock_platform::{License, PlatformError, hook, with_license};
use bedrock_test_support::ExternalDatabase;
use rand::Rng;

use common::{Harness, setup, setup_with, sqlite_config};

async fn with_replicas(licensed: bool) -> Result<Harness> {
    let dir = tempfile::tempdir()?;
    let mut config = sqlite_config(&dir);
    config.sql_settings.data_source_replicas = vec![config.sql_settings.data_source.clone()];
    config.sql_settings.data_source_search_replicas =
        vec![config.sql_settings.data_source.clone()];
    let options = if licensed {
        vec![hook(|builder| {
            builder.license_gate().store(License::for_testing());
            Ok(())
        })]
    } else {
        Vec::new()
    };
    setup_with(dir, config, options).await
}

#[tokio::test]
async fn replicas_alias_master_when_none_configured() -> Result<()> {
    for options in [Vec::new(), vec![with_license(License::for_testing())]] {
        let harness = setup(options).await?;
        let store = harness.service.sql_store();
        assert!(Arc::ptr_eq(&store.master(), &store.replica()));
        assert!(Arc::ptr_eq(&store.master(), &store.search_replica()));
        harness.service.shutdown().await;
    }
    Ok(())
}

#[tokio::test]
async fn replicas_without_license_alias_master() -> Result<()> {
    let harness = with_replicas(false).await?;
    let service = &harness.service;
    let store = service.sql_store();

    assert!(Arc::ptr_eq(&store.master(), &store.replica()));
    assert!(Arc::ptr_eq(&store.master(), &store.search_replica()));
    assert_eq!(service.config().sql_settings.data_source_replicas.len(), 1);
    assert_eq!(
        service.config().sql_settings.data_source_search_replicas.len(),
        1
    );
    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn licensed_replicas_get_distinct_pools() -> Result<()> {
    let harness = with_replicas(true).await?;
    let service = &harness.service;
    let store = service.sql_store();

    assert!(!Arc::ptr_eq(&store.master(), &store.replica()));
    assert!(!Arc::ptr_eq(&store.master(), &store.search_replica()));
    assert_eq!(service.config().sql_settings.data_source_replicas.len(), 1);
    assert_eq!(
        service.config().sql_settings.data_source_search_replicas.len(),
        1
    );
    assert!(service.license().is_some());
    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn license_change_after_startup_keeps_topology() -> Result<()> {
    let harness = with_replicas(false).await?;
    let service = &harness.service;
    service.set_license(License::for_testing());

    let store = service.sql_store();
    assert!(Arc::ptr_eq(&store.master(), &store.replica()));
    assert_eq!(
        service
            .limited_client_config()
            .get("IsLicensed")
            .map(String::as_str),
        Some("true")
    );
    service.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_waits_for_every_task() -> Result<()> {
    let harness = setup(Vec::new()).await?;
    let service = &harness.service;
    let finished = Arc::new(AtomicUsize::new(0));

    for _ in 0..1000 {
        let delay = rand::rng().random_range(0..20_u64);
        let finished = Arc::clone(&finished);
        service.launch(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            finished.fetch_add(1, Ordering::SeqCst);
        })?;
    }

    service.shutdown().await;
    assert_eq!(service.outstanding_tasks(), 0);
    assert_eq!(finished.load(Ordering::SeqCst), 1000);
    assert_eq!(service.telemetry().snapshot().tasks_launched_total, 1000);
    Ok(())
}

#[tokio::test]
async fn shutdown_without_tasks_returns_immediately() -> Result<()> {
    let harness = setup(Vec::new()).await?;
    tokio::time::timeout(Duration::from_secs(1), harness.service.shutdown()).await?;
    assert_eq!(harness.service.outstanding_tasks(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failures_inside_tasks_are_contained() -> Result<()> {
    let harness = setup(Vec::new()).await?;
    let service = &harness.service;

    service.launch(async {
        panic!("background failure");
    })?;
    service.launch_fallible("export", async { Err::<(), _>("bucket unavailable") })?;

    service.shutdown().await;
    assert_eq!(service.outstanding_tasks(), 0);
    assert_eq!(service.telemetry().snapshot().task_panics_total, 1);
    Ok(())
}

#[tokio::test]
async fn work_after_shutdown_is_rejected() -> Result<()> {
    let harness = setup(Vec::new()).await?;
    let service = &harness.service;
    service.shutdown().await;
    assert!(service.is_shutting_down());

    assert!(matches!(
        service.launch(async {}),
        Err(PlatformError::ShuttingDown { .. })
    ));
    let config = (*service.config()).clone();
    assert!(matches!(
        service.save_config(config).await,
        Err(PlatformError::ShuttingDown { .. })
    ));
    tokio::time::timeout(Duration::from_millis(100), service.shutdown()).await?;
    Ok(())
}

#[tokio::test]
async fn telemetry_id_regenerates_client_config() -> Result<()> {
    let harness = setup(Vec::new()).await?;
    let service = &harness.service;

    let client = service.limited_client_config();
    assert_eq!(client.get("DiagnosticId").map(String::as_str), Some(""));

    let id = uuid_like();
    service.set_telemetry_id(id.clone());
    let client = service.limited_client_config();
    assert_eq!(client.get("DiagnosticId"), Some(&id));
    assert_eq!(service.telemetry_id(), id);

    service
        .update_config(|config| {
            config.service_settings.site_url = "https://chat.example.com".into();
        })
        .await?;
    let client = service.limited_client_config();
    assert_eq!(
        client.get("SiteURL").map(String::as_str),
        Some("https://chat.example.com")
    );
    assert_eq!(client.get("DiagnosticId"), Some(&id));
    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn rejected_save_keeps_previous_snapshot() -> Result<()> {
    let harness = setup(Vec::new()).await?;
    let service = &harness.service;
    let before = service.config();

    let result = service
        .update_config(|config| config.sql_settings.driver_name = "oracle".into())
        .await;
    assert!(matches!(result, Err(PlatformError::Config { .. })));
    assert!(Arc::ptr_eq(&before, &service.config()));
    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn storage_backend_follows_configuration() -> Result<()> {
    let harness = setup(Vec::new()).await?;
    let backend = harness.service.file_backend();
    assert_eq!(backend.driver_name(), "local");

    let mut body: &[u8] = b"support packet";
    backend.write_file(&mut body, "packets/one.zip").await?;
    assert!(harness.dir.path().join("files/packets/one.zip").is_file());
    harness.service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn invalid_storage_settings_abort_construction() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = sqlite_config(&dir);
    config.file_settings.driver_name = FILE_DRIVER_S3.into();
    config.file_settings.amazon_s3_bucket = String::new();
    let missing_bucket = setup_with(dir, config, Vec::new()).await;
    assert!(matches!(
        missing_bucket.err().and_then(|err| err.downcast::<PlatformError>().ok()),
        Some(PlatformError::FileStore { .. })
    ));

    let dir = tempfile::tempdir()?;
    let mut config = sqlite_config(&dir);
    config.file_settings.driver_name = "tape".into();
    assert!(setup_with(dir, config, Vec::new()).await.is_err());
    Ok(())
}

#[tokio::test]
async fn unreachable_licensed_replica_aborts_construction() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = sqlite_config(&dir);
    let missing = dir.path().join("missing").join("replica.db");
    config.sql_settings.data_source_replicas =
        vec![format!("sqlite://{}?mode=ro", missing.display())];

    let result = setup_with(dir, config, vec![with_license(License::for_testing())]).await;
    assert!(matches!(
        result.err().and_then(|err| err.downcast::<PlatformError>().ok()),
        Some(PlatformError::Data { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn schema_version_reports_configured_driver() -> Result<()> {
    let harness = setup(Vec::new()).await?;
    let (driver, version) = harness.service.database_type_and_schema_version().await?;
    assert_eq!(driver, DATABASE_DRIVER_SQLITE);
    assert!(version >= 1);
    harness.service.shutdown().await;

    for driver in ["postgres", "mysql"] {
        let Some(database) = ExternalDatabase::provision(driver).await? else {
            eprintln!("skipping {driver} schema check: no database available");
            continue;
        };
        let dir = tempfile::tempdir()?;
        let mut config = sqlite_config(&dir);
        config.sql_settings.driver_name = driver.into();
        config.sql_settings.data_source = database.url().to_string();

        let harness = connect_with_retry(config).await?;
        let (reported, version) = harness.service.database_type_and_schema_version().await?;
        assert_eq!(reported, driver);
        assert!(version >= 1);
        harness.service.shutdown().await;
    }
    Ok(())
}

async fn connect_with_retry(config: Config) -> Result<Harness> {
    let mut last_error = None;
    for _ in 0..30 {
        match setup_with(tempfile::tempdir()?, config.clone(), Vec::new()).await {
            Ok(harness) => return Ok(harness),
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("database never became ready")))
}

fn uuid_like() -> String {
    let mut rng = rand::rng();
    (0..26)
        .map(|_| char::from(b'a' + rng.random_range(0..26_u8)))
        .collect()
}
