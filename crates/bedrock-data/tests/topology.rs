use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use bedrock_config::SqlSettings;
use bedrock_data::{
    AnyPool, ConnectOptions, DataError, ReplicaEntitlements, SqlStore, StoreObserver,
};
use bedrock_test_support::sqlite_data_source;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn sqlite_settings(dir: &Path) -> SqlSettings {
    SqlSettings {
        driver_name: "sqlite".into(),
        data_source: sqlite_data_source(dir, "master"),
        max_open_conns: 4,
        max_idle_conns: 1,
        ..SqlSettings::default()
    }
}

async fn connect(settings: &SqlSettings, entitlements: ReplicaEntitlements) -> Result<SqlStore> {
    let options = ConnectOptions::new(CONNECT_TIMEOUT).with_entitlements(entitlements);
    Ok(SqlStore::connect(settings, options).await?)
}

#[tokio::test]
async fn replicas_alias_master_when_none_configured() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let settings = sqlite_settings(dir.path());

    for entitlements in [ReplicaEntitlements::none(), ReplicaEntitlements::all()] {
        let store = connect(&settings, entitlements).await?;
        assert!(Arc::ptr_eq(&store.master(), &store.replica()));
        assert!(Arc::ptr_eq(&store.master(), &store.search_replica()));
        assert_eq!(store.total_read_connections(), 0);
        store.close().await;
    }
    Ok(())
}

#[tokio::test]
async fn licensed_replica_gets_its_own_pool() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut settings = sqlite_settings(dir.path());
    settings.data_source_replicas = vec![sqlite_data_source(dir.path(), "replica")];

    let store = connect(&settings, ReplicaEntitlements::all()).await?;
    assert!(!Arc::ptr_eq(&store.master(), &store.replica()));
    assert!(Arc::ptr_eq(&store.master(), &store.search_replica()));
    assert_eq!(store.replica_count(), 1);
    assert_eq!(settings.data_source_replicas.len(), 1);
    assert!(store.total_read_connections() >= 1);
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn unlicensed_replica_is_never_opened() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut settings = sqlite_settings(dir.path());
    settings.data_source_replicas = vec![sqlite_data_source(dir.path(), "replica")];
    settings.data_source_search_replicas = vec![sqlite_data_source(dir.path(), "search")];

    let store = connect(&settings, ReplicaEntitlements::none()).await?;
    assert!(Arc::ptr_eq(&store.master(), &store.replica()));
    assert!(Arc::ptr_eq(&store.master(), &store.search_replica()));
    assert_eq!(settings.data_source_replicas.len(), 1);
    assert!(!dir.path().join("replica.db").exists());
    assert!(!dir.path().join("search.db").exists());
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn search_replica_is_gated_independently() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut settings = sqlite_settings(dir.path());
    settings.data_source_replicas = vec![sqlite_data_source(dir.path(), "replica")];
    settings.data_source_search_replicas = vec![sqlite_data_source(dir.path(), "search")];

    let entitlements = ReplicaEntitlements {
        read_replicas: false,
        search_replicas: true,
    };
    let store = connect(&settings, entitlements).await?;
    assert!(Arc::ptr_eq(&store.master(), &store.replica()));
    assert!(!Arc::ptr_eq(&store.master(), &store.search_replica()));
    assert_eq!(store.search_replica_count(), 1);
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn reads_rotate_across_replicas() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut settings = sqlite_settings(dir.path());
    settings.data_source_replicas = vec![
        sqlite_data_source(dir.path(), "replica-a"),
        sqlite_data_source(dir.path(), "replica-b"),
    ];

    let store = connect(&settings, ReplicaEntitlements::all()).await?;
    let first = store.replica();
    let second = store.replica();
    let third = store.replica();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &third));
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_replica_fails_construction() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut settings = sqlite_settings(dir.path());
    settings.data_source_replicas =
        vec!["sqlite:///definitely/missing/dir/replica.db?mode=ro".into()];

    let result = connect(&settings, ReplicaEntitlements::all()).await;
    let err = result.err().and_then(|err| err.downcast::<DataError>().ok());
    assert!(matches!(
        err,
        Some(DataError::Connect {
            role: "replica",
            ..
        })
    ));
    Ok(())
}

#[tokio::test]
async fn unsupported_driver_is_rejected_before_connecting() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut settings = sqlite_settings(dir.path());
    settings.driver_name = "oracle".into();

    let result = SqlStore::connect(&settings, ConnectOptions::new(CONNECT_TIMEOUT)).await;
    assert!(matches!(result, Err(DataError::UnsupportedDriver { .. })));
    assert!(!dir.path().join("master.db").exists());
    Ok(())
}

#[tokio::test]
async fn diagnostics_report_driver_and_schema_version() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = connect(&sqlite_settings(dir.path()), ReplicaEntitlements::none()).await?;

    let (driver, version) = store.database_type_and_schema_version().await?;
    assert_eq!(driver, "sqlite");
    assert!(version >= 1);
    assert!(!store.database_version().await?.is_empty());
    assert!(store.total_master_connections() >= 1);
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn system_values_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = connect(&sqlite_settings(dir.path()), ReplicaEntitlements::none()).await?;

    assert_eq!(
        store.system_value("SchemaOrigin").await?.as_deref(),
        Some("bedrock")
    );
    assert!(store.system_value("DiagnosticId").await?.is_none());
    store.save_system_value("DiagnosticId", "first").await?;
    store.save_system_value("DiagnosticId", "second").await?;
    assert_eq!(
        store.system_value("DiagnosticId").await?.as_deref(),
        Some("second")
    );
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn close_shuts_every_pool() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut settings = sqlite_settings(dir.path());
    settings.data_source_replicas = vec![sqlite_data_source(dir.path(), "replica")];

    let store = connect(&settings, ReplicaEntitlements::all()).await?;
    store.close().await;
    assert!(store.master().is_closed());
    assert!(store.replica().is_closed());
    Ok(())
}

#[derive(Default)]
struct RecordingObserver {
    collectors: Mutex<Vec<String>>,
    methods: Mutex<Vec<(String, bool)>>,
}

impl StoreObserver for RecordingObserver {
    fn register_db_collector(&self, _pool: &AnyPool, name: &str) {
        if let Ok(mut collectors) = self.collectors.lock() {
            collectors.push(name.to_string());
        }
    }

    fn observe_store_method_duration(&self, method: &str, success: bool, _elapsed: f64) {
        if let Ok(mut methods) = self.methods.lock() {
            methods.push((method.to_string(), success));
        }
    }
}

#[tokio::test]
async fn observer_sees_pools_and_method_timings() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut settings = sqlite_settings(dir.path());
    settings.data_source_replicas = vec![sqlite_data_source(dir.path(), "replica")];

    let observer = Arc::new(RecordingObserver::default());
    let installed: Arc<dyn StoreObserver> = observer.clone();
    let options = ConnectOptions::new(CONNECT_TIMEOUT)
        .with_entitlements(ReplicaEntitlements::all())
        .with_observer(Some(installed));
    let store = SqlStore::connect(&settings, options).await?;
    store.database_type_and_schema_version().await?;

    let collectors = observer
        .collectors
        .lock()
        .map_err(|_| anyhow::anyhow!("collector lock poisoned"))?
        .clone();
    assert_eq!(collectors, vec!["master".to_string(), "replica-0".to_string()]);

    let methods = observer
        .methods
        .lock()
        .map_err(|_| anyhow::anyhow!("method lock poisoned"))?
        .clone();
    assert_eq!(
        methods,
        vec![("SqlStore.DatabaseTypeAndSchemaVersion".to_string(), true)]
    );
    store.close().await;
    Ok(())
}
