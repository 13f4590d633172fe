//! Backend settings derived from the configuration snapshot.

use std::time::Duration;

use bedrock_config::{FILE_DRIVER_LOCAL, FileSettings};

use crate::error::{FileStoreError, FileStoreResult};

/// Endpoint used when none is configured.
pub const DEFAULT_S3_ENDPOINT: &str = "s3.amazonaws.com";

/// Flattened settings consumed by [`crate::new_file_backend`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileBackendSettings {
    /// Driver name (`local` or `amazons3`).
    pub driver_name: String,
    /// Root directory for the local driver.
    pub directory: String,
    /// Object store access key.
    pub amazon_s3_access_key_id: String,
    /// Object store secret key.
    pub amazon_s3_secret_access_key: String,
    /// Bucket name.
    pub amazon_s3_bucket: String,
    /// Key prefix applied to every object.
    pub amazon_s3_path_prefix: String,
    /// Bucket region.
    pub amazon_s3_region: String,
    /// Endpoint host.
    pub amazon_s3_endpoint: String,
    /// Use TLS.
    pub amazon_s3_ssl: bool,
    /// Legacy request signing requested.
    pub amazon_s3_sign_v2: bool,
    /// Server-side encryption (only when the compliance feature is licensed).
    pub amazon_s3_sse: bool,
    /// Log every object store call.
    pub amazon_s3_trace: bool,
    /// Accept invalid TLS certificates.
    pub skip_verify: bool,
    /// Per-request timeout.
    pub amazon_s3_request_timeout_milliseconds: u64,
}

impl FileBackendSettings {
    /// Convert the configuration section into backend settings.
    ///
    /// Local settings carry only the directory. Server-side encryption is kept
    /// only when `enable_compliance` is set.
    #[must_use]
    pub fn from_config(settings: &FileSettings, enable_compliance: bool, skip_verify: bool) -> Self {
        if settings.driver_name == FILE_DRIVER_LOCAL {
            return Self {
                driver_name: settings.driver_name.clone(),
                directory: settings.directory.clone(),
                ..Self::default()
            };
        }
        Self {
            driver_name: settings.driver_name.clone(),
            directory: String::new(),
            amazon_s3_access_key_id: settings.amazon_s3_access_key_id.clone(),
            amazon_s3_secret_access_key: settings.amazon_s3_secret_access_key.clone(),
            amazon_s3_bucket: settings.amazon_s3_bucket.clone(),
            amazon_s3_path_prefix: settings.amazon_s3_path_prefix.clone(),
            amazon_s3_region: settings.amazon_s3_region.clone(),
            amazon_s3_endpoint: settings.amazon_s3_endpoint.clone(),
            amazon_s3_ssl: settings.amazon_s3_ssl,
            amazon_s3_sign_v2: settings.amazon_s3_sign_v2,
            amazon_s3_sse: settings.amazon_s3_sse && enable_compliance,
            amazon_s3_trace: settings.amazon_s3_trace,
            skip_verify,
            amazon_s3_request_timeout_milliseconds: settings
                .amazon_s3_request_timeout_milliseconds,
        }
    }

    /// Enforce object-store preconditions before any network call.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError::MissingSetting`] when the bucket is empty.
    pub fn check_mandatory_s3_fields(&mut self) -> FileStoreResult<()> {
        if self.amazon_s3_bucket.is_empty() {
            return Err(FileStoreError::MissingSetting {
                field: "AmazonS3Bucket",
            });
        }
        if self.amazon_s3_endpoint.is_empty() {
            self.amazon_s3_endpoint = DEFAULT_S3_ENDPOINT.to_string();
        }
        Ok(())
    }

    /// Per-request timeout; `None` when disabled.
    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        if self.amazon_s3_request_timeout_milliseconds == 0 {
            None
        } else {
            Some(Duration::from_millis(
                self.amazon_s3_request_timeout_milliseconds,
            ))
        }
    }
}
