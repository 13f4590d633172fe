//! Validation helpers applied before a snapshot is committed.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    Config, DATABASE_DRIVER_MYSQL, DATABASE_DRIVER_POSTGRES, DATABASE_DRIVER_SQLITE,
    FILE_DRIVER_LOCAL, FILE_DRIVER_S3,
};

const SUPPORTED_SQL_DRIVERS: &[&str] = &[
    DATABASE_DRIVER_POSTGRES,
    DATABASE_DRIVER_MYSQL,
    DATABASE_DRIVER_SQLITE,
];
const SUPPORTED_FILE_DRIVERS: &[&str] = &[FILE_DRIVER_LOCAL, FILE_DRIVER_S3];

impl Config {
    /// Check driver names and numeric bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        let sql = &self.sql_settings;
        if !SUPPORTED_SQL_DRIVERS.contains(&sql.driver_name.as_str()) {
            return Err(ConfigError::invalid(
                "SqlSettings",
                "DriverName",
                Some(sql.driver_name.clone()),
                "unsupported_driver",
            ));
        }
        if sql.data_source.trim().is_empty() {
            return Err(ConfigError::invalid(
                "SqlSettings",
                "DataSource",
                None,
                "empty",
            ));
        }
        if sql.max_open_conns == 0 {
            return Err(ConfigError::invalid(
                "SqlSettings",
                "MaxOpenConns",
                Some(sql.max_open_conns.to_string()),
                "zero",
            ));
        }
        if sql.max_idle_conns > sql.max_open_conns {
            return Err(ConfigError::invalid(
                "SqlSettings",
                "MaxIdleConns",
                Some(sql.max_idle_conns.to_string()),
                "exceeds_max_open_conns",
            ));
        }
        if sql.query_timeout == 0 {
            return Err(ConfigError::invalid(
                "SqlSettings",
                "QueryTimeout",
                Some(sql.query_timeout.to_string()),
                "zero",
            ));
        }

        parse_listen_address(&self.metrics_settings.listen_address)?;

        let files = &self.file_settings;
        if !SUPPORTED_FILE_DRIVERS.contains(&files.driver_name.as_str()) {
            return Err(ConfigError::invalid(
                "FileSettings",
                "DriverName",
                Some(files.driver_name.clone()),
                "unsupported_driver",
            ));
        }
        if files.amazon_s3_request_timeout_milliseconds == 0 {
            return Err(ConfigError::invalid(
                "FileSettings",
                "AmazonS3RequestTimeoutMilliseconds",
                Some(files.amazon_s3_request_timeout_milliseconds.to_string()),
                "zero",
            ));
        }
        Ok(())
    }
}

/// Parse a metrics listen address. A bare `:port` binds every interface.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] if the value is neither `host:port`
/// nor `:port`.
pub fn parse_listen_address(value: &str) -> ConfigResult<SocketAddr> {
    let invalid = || {
        ConfigError::invalid(
            "MetricsSettings",
            "ListenAddress",
            Some(value.to_string()),
            "invalid_address",
        )
    };

    let trimmed = value.trim();
    if let Some(port) = trimmed.strip_prefix(':') {
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if let Some(port) = trimmed.strip_prefix("localhost:") {
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));
    }
    trimmed.parse::<SocketAddr>().map_err(|_| invalid())
}
