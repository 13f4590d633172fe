//! Connection topology: one master pool plus license-gated read and search replicas.
//!
//! # Design
//! - Replica lists are honoured only when the matching entitlement is granted;
//!   otherwise no pool is opened for them and reads route to master.
//! - Every pool is opened with a bounded connectivity check; a failure aborts
//!   construction.
//! - Topology is fixed at construction; later license changes do not re-derive it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bedrock_config::{
    DATABASE_DRIVER_MYSQL, DATABASE_DRIVER_POSTGRES, DATABASE_DRIVER_SQLITE, SqlSettings,
};
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tracing::{debug, info, warn};

use crate::error::{DataError, DataResult};
use crate::observer::StoreObserver;

/// SQL dialect of the configured driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `PostgreSQL`.
    Postgres,
    /// `MySQL`.
    MySql,
    /// `SQLite`.
    Sqlite,
}

impl Dialect {
    /// Resolve the dialect for a configured driver name.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::UnsupportedDriver`] for unknown names.
    pub fn from_driver(driver: &str) -> DataResult<Self> {
        match driver {
            DATABASE_DRIVER_POSTGRES => Ok(Self::Postgres),
            DATABASE_DRIVER_MYSQL => Ok(Self::MySql),
            DATABASE_DRIVER_SQLITE => Ok(Self::Sqlite),
            other => Err(DataError::UnsupportedDriver {
                driver: other.to_string(),
            }),
        }
    }
}

/// Replica entitlements derived from the current license.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaEntitlements {
    /// Read replica DSNs may be opened.
    pub read_replicas: bool,
    /// Search replica DSNs may be opened.
    pub search_replicas: bool,
}

impl ReplicaEntitlements {
    /// No replica routing; every read goes to master.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            read_replicas: false,
            search_replicas: false,
        }
    }

    /// Both replica kinds enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            read_replicas: true,
            search_replicas: true,
        }
    }
}

/// Construction parameters supplied by the caller.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Which replica lists may be honoured.
    pub entitlements: ReplicaEntitlements,
    /// Upper bound on opening each pool.
    pub connect_timeout: Duration,
    /// Installed metrics implementation, if any.
    pub observer: Option<Arc<dyn StoreObserver>>,
}

impl ConnectOptions {
    /// Options with no entitlements and no observer.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            entitlements: ReplicaEntitlements::none(),
            connect_timeout,
            observer: None,
        }
    }

    /// Replace the entitlements.
    #[must_use]
    pub const fn with_entitlements(mut self, entitlements: ReplicaEntitlements) -> Self {
        self.entitlements = entitlements;
        self
    }

    /// Install an observer for pool registration and method timings.
    #[must_use]
    pub fn with_observer(mut self, observer: Option<Arc<dyn StoreObserver>>) -> Self {
        self.observer = observer;
        self
    }
}

/// Shared database handles for the platform.
pub struct SqlStore {
    pub(crate) driver_name: String,
    pub(crate) dialect: Dialect,
    pub(crate) query_timeout: Duration,
    pub(crate) master: Arc<AnyPool>,
    pub(crate) replicas: Vec<Arc<AnyPool>>,
    pub(crate) search_replicas: Vec<Arc<AnyPool>>,
    replica_cursor: AtomicUsize,
    search_cursor: AtomicUsize,
    pub(crate) observer: Option<Arc<dyn StoreObserver>>,
}

impl SqlStore {
    /// Open the master pool, apply migrations, then open entitled replica pools.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver is unsupported, any pool cannot be
    /// opened within the connect timeout, or migrations fail.
    pub async fn connect(settings: &SqlSettings, options: ConnectOptions) -> DataResult<Self> {
        let dialect = Dialect::from_driver(&settings.driver_name)?;
        sqlx::any::install_default_drivers();

        let timeout = options.connect_timeout;
        let master = Arc::new(open_pool(settings, &settings.data_source, "master", timeout).await?);
        run_migrations(&master).await?;

        let replicas = open_gated(
            settings,
            &settings.data_source_replicas,
            options.entitlements.read_replicas,
            "replica",
            timeout,
        )
        .await?;
        let search_replicas = open_gated(
            settings,
            &settings.data_source_search_replicas,
            options.entitlements.search_replicas,
            "search_replica",
            timeout,
        )
        .await?;

        if let Some(observer) = &options.observer {
            observer.register_db_collector(&master, "master");
            for (index, pool) in replicas.iter().enumerate() {
                observer.register_db_collector(pool, &format!("replica-{index}"));
            }
            for (index, pool) in search_replicas.iter().enumerate() {
                observer.register_db_collector(pool, &format!("searchreplica-{index}"));
            }
        }

        info!(
            driver = %settings.driver_name,
            replicas = replicas.len(),
            search_replicas = search_replicas.len(),
            "database topology initialised"
        );

        Ok(Self {
            driver_name: settings.driver_name.clone(),
            dialect,
            query_timeout: Duration::from_secs(settings.query_timeout),
            master,
            replicas,
            search_replicas,
            replica_cursor: AtomicUsize::new(0),
            search_cursor: AtomicUsize::new(0),
            observer: options.observer,
        })
    }

    /// Read-write pool.
    #[must_use]
    pub fn master(&self) -> Arc<AnyPool> {
        Arc::clone(&self.master)
    }

    /// Read pool; the master pool when no read replica is opened.
    #[must_use]
    pub fn replica(&self) -> Arc<AnyPool> {
        pick(&self.replicas, &self.replica_cursor, &self.master)
    }

    /// Search pool; the master pool when no search replica is opened.
    #[must_use]
    pub fn search_replica(&self) -> Arc<AnyPool> {
        pick(&self.search_replicas, &self.search_cursor, &self.master)
    }

    /// Number of opened read replica pools.
    #[must_use]
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Number of opened search replica pools.
    #[must_use]
    pub fn search_replica_count(&self) -> usize {
        self.search_replicas.len()
    }

    /// Configured driver name.
    #[must_use]
    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// Dialect of the configured driver.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Close every opened pool once.
    pub async fn close(&self) {
        self.master.close().await;
        for pool in self.replicas.iter().chain(self.search_replicas.iter()) {
            pool.close().await;
        }
        debug!("database pools closed");
    }
}

fn pick(pools: &[Arc<AnyPool>], cursor: &AtomicUsize, master: &Arc<AnyPool>) -> Arc<AnyPool> {
    if pools.is_empty() {
        return Arc::clone(master);
    }
    let index = cursor.fetch_add(1, Ordering::Relaxed) % pools.len();
    Arc::clone(&pools[index])
}

async fn open_gated(
    settings: &SqlSettings,
    dsns: &[String],
    entitled: bool,
    role: &'static str,
    timeout: Duration,
) -> DataResult<Vec<Arc<AnyPool>>> {
    if dsns.is_empty() {
        return Ok(Vec::new());
    }
    if !entitled {
        warn!(
            role,
            configured = dsns.len(),
            "replica data sources configured without entitlement; routing to master"
        );
        return Ok(Vec::new());
    }
    let mut pools = Vec::with_capacity(dsns.len());
    for dsn in dsns {
        pools.push(Arc::new(open_pool(settings, dsn, role, timeout).await?));
    }
    Ok(pools)
}

async fn open_pool(
    settings: &SqlSettings,
    dsn: &str,
    role: &'static str,
    timeout: Duration,
) -> DataResult<AnyPool> {
    let options = AnyPoolOptions::new()
        .max_connections(settings.max_open_conns)
        .max_lifetime(millis(settings.conn_max_lifetime_milliseconds))
        .idle_timeout(millis(settings.conn_max_idle_time_milliseconds))
        .acquire_timeout(timeout);

    match tokio::time::timeout(timeout, options.connect(dsn)).await {
        Ok(Ok(pool)) => {
            debug!(role, "database pool opened");
            Ok(pool)
        }
        Ok(Err(source)) => Err(DataError::Connect { role, source }),
        Err(_) => Err(DataError::ConnectTimeout { role, timeout }),
    }
}

async fn run_migrations(pool: &AnyPool) -> DataResult<()> {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
        .run(pool)
        .await
        .map_err(|source| DataError::MigrationFailed { source })
}

fn millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}
