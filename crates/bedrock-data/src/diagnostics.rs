//! Diagnostic queries and the `systems` key/value table.
//!
//! Failures here are operational: they are returned to the caller and never
//! alter pool state.

use std::future::Future;
use std::time::Instant;

use sqlx::AnyPool;

use crate::error::{DataError, DataResult, map_query_err};
use crate::store::{Dialect, SqlStore};

const SCHEMA_VERSION_QUERY: &str = "SELECT COALESCE(MAX(version), 0) FROM _sqlx_migrations";

impl Dialect {
    const fn server_version_query(self) -> &'static str {
        match self {
            Self::Postgres => "SELECT current_setting('server_version')",
            Self::MySql => "SELECT version()",
            Self::Sqlite => "SELECT sqlite_version()",
        }
    }

    const fn select_system_query(self) -> &'static str {
        match self {
            Self::Postgres => "SELECT value FROM systems WHERE name = $1",
            Self::MySql | Self::Sqlite => "SELECT value FROM systems WHERE name = ?",
        }
    }

    const fn delete_system_query(self) -> &'static str {
        match self {
            Self::Postgres => "DELETE FROM systems WHERE name = $1",
            Self::MySql | Self::Sqlite => "DELETE FROM systems WHERE name = ?",
        }
    }

    const fn insert_system_query(self) -> &'static str {
        match self {
            Self::Postgres => "INSERT INTO systems (name, value) VALUES ($1, $2)",
            Self::MySql | Self::Sqlite => "INSERT INTO systems (name, value) VALUES (?, ?)",
        }
    }
}

impl SqlStore {
    /// Configured driver name and the applied schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the migrations table cannot be read.
    pub async fn database_type_and_schema_version(&self) -> DataResult<(String, i64)> {
        let version = self
            .instrumented("SqlStore.DatabaseTypeAndSchemaVersion", async {
                sqlx::query_scalar::<_, i64>(SCHEMA_VERSION_QUERY)
                    .fetch_one(&*self.master)
                    .await
                    .map_err(map_query_err("schema_version"))
            })
            .await?;
        Ok((self.driver_name.clone(), version))
    }

    /// Version string reported by the database server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be queried.
    pub async fn database_version(&self) -> DataResult<String> {
        self.instrumented("SqlStore.DatabaseVersion", async {
            sqlx::query_scalar::<_, String>(self.dialect.server_version_query())
                .fetch_one(&*self.master)
                .await
                .map_err(map_query_err("server_version"))
        })
        .await
    }

    /// Connections currently held by the master pool.
    #[must_use]
    pub fn total_master_connections(&self) -> u32 {
        self.master.size()
    }

    /// Connections held across read replica pools; zero when reads route to master.
    #[must_use]
    pub fn total_read_connections(&self) -> u32 {
        total_size(&self.replicas)
    }

    /// Connections held across search replica pools; zero when searches route to master.
    #[must_use]
    pub fn total_search_connections(&self) -> u32 {
        total_size(&self.search_replicas)
    }

    /// Fetch a value from the `systems` table.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn system_value(&self, name: &str) -> DataResult<Option<String>> {
        self.instrumented("SqlStore.SystemGet", async {
            sqlx::query_scalar::<_, String>(self.dialect.select_system_query())
                .bind(name)
                .fetch_optional(&*self.master)
                .await
                .map_err(map_query_err("system_get"))
        })
        .await
    }

    /// Insert or replace a value in the `systems` table.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn save_system_value(&self, name: &str, value: &str) -> DataResult<()> {
        self.instrumented("SqlStore.SystemSave", async {
            let mut tx = self
                .master
                .begin()
                .await
                .map_err(map_query_err("system_save_begin"))?;
            sqlx::query(self.dialect.delete_system_query())
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(map_query_err("system_save_delete"))?;
            sqlx::query(self.dialect.insert_system_query())
                .bind(name)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(map_query_err("system_save_insert"))?;
            tx.commit()
                .await
                .map_err(map_query_err("system_save_commit"))
        })
        .await
    }

    async fn instrumented<T, F>(&self, method: &'static str, work: F) -> DataResult<T>
    where
        F: Future<Output = DataResult<T>>,
    {
        let started = Instant::now();
        let result = tokio::time::timeout(self.query_timeout, work)
            .await
            .unwrap_or(Err(DataError::QueryTimeout { operation: method }));
        if let Some(observer) = &self.observer {
            observer.observe_store_method_duration(
                method,
                result.is_ok(),
                started.elapsed().as_secs_f64(),
            );
        }
        result
    }
}

fn total_size(pools: &[std::sync::Arc<AnyPool>]) -> u32 {
    pools.iter().map(|pool| pool.size()).sum()
}
