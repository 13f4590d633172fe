//! Environment overrides layered on top of a snapshot.
//!
//! Variables follow `BEDROCK_<SECTION>_<FIELD>` in upper case. List values are
//! whitespace separated.

use crate::error::{ConfigError, ConfigResult};
use crate::model::Config;

/// Prefix shared by every recognised override.
pub const ENV_PREFIX: &str = "BEDROCK_";

impl Config {
    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognised variable holds an unparsable value.
    pub fn apply_process_env(&mut self) -> ConfigResult<()> {
        self.apply_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides resolved through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a recognised variable holds an unparsable value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sql = &mut self.sql_settings;
        set_string(&lookup, "BEDROCK_SQLSETTINGS_DRIVERNAME", &mut sql.driver_name);
        set_string(&lookup, "BEDROCK_SQLSETTINGS_DATASOURCE", &mut sql.data_source);
        set_list(
            &lookup,
            "BEDROCK_SQLSETTINGS_DATASOURCEREPLICAS",
            &mut sql.data_source_replicas,
        );
        set_list(
            &lookup,
            "BEDROCK_SQLSETTINGS_DATASOURCESEARCHREPLICAS",
            &mut sql.data_source_search_replicas,
        );
        set_parsed(&lookup, "BEDROCK_SQLSETTINGS_MAXOPENCONNS", &mut sql.max_open_conns)?;
        set_parsed(&lookup, "BEDROCK_SQLSETTINGS_MAXIDLECONNS", &mut sql.max_idle_conns)?;
        set_parsed(&lookup, "BEDROCK_SQLSETTINGS_QUERYTIMEOUT", &mut sql.query_timeout)?;

        let metrics = &mut self.metrics_settings;
        set_bool(&lookup, "BEDROCK_METRICSSETTINGS_ENABLE", &mut metrics.enable)?;
        set_string(
            &lookup,
            "BEDROCK_METRICSSETTINGS_LISTENADDRESS",
            &mut metrics.listen_address,
        );

        let files = &mut self.file_settings;
        set_string(&lookup, "BEDROCK_FILESETTINGS_DRIVERNAME", &mut files.driver_name);
        set_string(&lookup, "BEDROCK_FILESETTINGS_DIRECTORY", &mut files.directory);
        set_string(
            &lookup,
            "BEDROCK_FILESETTINGS_AMAZONS3ACCESSKEYID",
            &mut files.amazon_s3_access_key_id,
        );
        set_string(
            &lookup,
            "BEDROCK_FILESETTINGS_AMAZONS3SECRETACCESSKEY",
            &mut files.amazon_s3_secret_access_key,
        );
        set_string(&lookup, "BEDROCK_FILESETTINGS_AMAZONS3BUCKET", &mut files.amazon_s3_bucket);
        set_string(
            &lookup,
            "BEDROCK_FILESETTINGS_AMAZONS3PATHPREFIX",
            &mut files.amazon_s3_path_prefix,
        );
        set_string(&lookup, "BEDROCK_FILESETTINGS_AMAZONS3REGION", &mut files.amazon_s3_region);
        set_string(
            &lookup,
            "BEDROCK_FILESETTINGS_AMAZONS3ENDPOINT",
            &mut files.amazon_s3_endpoint,
        );
        set_bool(&lookup, "BEDROCK_FILESETTINGS_AMAZONS3SSL", &mut files.amazon_s3_ssl)?;
        set_bool(&lookup, "BEDROCK_FILESETTINGS_AMAZONS3SIGNV2", &mut files.amazon_s3_sign_v2)?;
        set_bool(&lookup, "BEDROCK_FILESETTINGS_AMAZONS3SSE", &mut files.amazon_s3_sse)?;
        set_bool(&lookup, "BEDROCK_FILESETTINGS_AMAZONS3TRACE", &mut files.amazon_s3_trace)?;
        set_parsed(
            &lookup,
            "BEDROCK_FILESETTINGS_AMAZONS3REQUESTTIMEOUTMILLISECONDS",
            &mut files.amazon_s3_request_timeout_milliseconds,
        )?;

        let service = &mut self.service_settings;
        set_string(&lookup, "BEDROCK_SERVICESETTINGS_SITEURL", &mut service.site_url);
        set_bool(
            &lookup,
            "BEDROCK_SERVICESETTINGS_ENABLEDEVELOPER",
            &mut service.enable_developer,
        )?;
        Ok(())
    }
}

fn set_string<F>(lookup: &F, name: &'static str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(name) {
        *target = value;
    }
}

fn set_list<F>(lookup: &F, name: &'static str, target: &mut Vec<String>)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(name) {
        *target = value.split_whitespace().map(str::to_string).collect();
    }
}

fn set_bool<F>(lookup: &F, name: &'static str, target: &mut bool) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(name) {
        *target = match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(ConfigError::InvalidEnvOverride {
                    name,
                    value,
                    reason: "not_a_bool",
                });
            }
        };
    }
    Ok(())
}

fn set_parsed<F, T>(lookup: &F, name: &'static str, target: &mut T) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(value) = lookup(name) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnvOverride {
                name,
                value: value.clone(),
                reason: "not_a_number",
            })?;
    }
    Ok(())
}
