//! S3-compatible object store driver.
//!
//! # Design
//! - Ordinary calls are bounded by the configured request timeout.
//! - The cancellable write replaces that timeout with the caller's token and
//!   deadline; an interrupted upload is aborted so no partial object remains.
//! - Keys are `<prefix>/<path>`; both halves pass the same path hardening as
//!   the local driver.

use std::future::Future;
use std::io::{self, Cursor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bedrock_config::FILE_DRIVER_S3;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::buffered::BufWriter;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore, PutPayload};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::backend::{CancellableWrite, FileBackend, ReadSeek, WriteContext};
use crate::error::{FileStoreError, FileStoreResult, object_error};
use crate::paths::sanitize_relative;
use crate::settings::{DEFAULT_S3_ENDPOINT, FileBackendSettings};

const DEFAULT_REGION: &str = "us-east-1";
const SSE_CONFIG_KEY: &str = "aws_server_side_encryption";
const SSE_ALGORITHM: &str = "AES256";

/// Backend storing files as objects in a single bucket.
pub struct S3FileBackend {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: Vec<String>,
    timeout: Option<Duration>,
    trace: bool,
}

enum WriteOutcome {
    Finished(io::Result<u64>),
    Interrupted(&'static str),
}

impl S3FileBackend {
    /// Configure a client for the bucket described by `settings`.
    ///
    /// No request is sent; credentials are resolved lazily.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is invalid or the client cannot be built.
    pub fn new(settings: &FileBackendSettings) -> FileStoreResult<Self> {
        let store = build_store(settings)?;
        Self::with_store(Arc::new(store), settings)
    }

    /// Use an already-configured object store (for example an in-memory one).
    ///
    /// # Errors
    ///
    /// Returns an error if the configured path prefix is invalid.
    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        settings: &FileBackendSettings,
    ) -> FileStoreResult<Self> {
        let prefix = sanitize_relative(settings.amazon_s3_path_prefix.trim_matches('/'))?;
        Ok(Self {
            store,
            bucket: settings.amazon_s3_bucket.clone(),
            prefix,
            timeout: settings.request_timeout(),
            trace: settings.amazon_s3_trace,
        })
    }

    fn location(&self, path: &str) -> FileStoreResult<ObjectPath> {
        let segments = sanitize_relative(path)?;
        Ok(self.prefix.iter().cloned().chain(segments).collect())
    }

    fn list_prefix(&self, path: &str) -> FileStoreResult<Option<ObjectPath>> {
        let location = self.location(path)?;
        Ok((location.parts().count() > 0).then_some(location))
    }

    fn strip_prefix(&self, location: &ObjectPath) -> Option<String> {
        let parts: Vec<String> = location
            .parts()
            .skip(self.prefix.len())
            .map(|part| part.as_ref().to_string())
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    fn trace_call(&self, operation: &'static str, path: &str) {
        if self.trace {
            debug!(bucket = %self.bucket, operation, path, "object store call");
        }
    }

    async fn timed<T, F>(&self, operation: &'static str, path: &str, work: F) -> FileStoreResult<T>
    where
        F: Future<Output = FileStoreResult<T>>,
    {
        self.trace_call(operation, path);
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, work).await.unwrap_or_else(|_| {
                Err(FileStoreError::Timeout {
                    operation,
                    path: path.to_string(),
                })
            }),
            None => work.await,
        }
    }

    async fn fetch(&self, operation: &'static str, path: &str) -> FileStoreResult<Bytes> {
        let location = self.location(path)?;
        self.timed(operation, path, async {
            self.store
                .get(&location)
                .await
                .map_err(|source| object_error(operation, path, source))?
                .bytes()
                .await
                .map_err(|source| object_error(operation, path, source))
        })
        .await
    }

    async fn head(&self, operation: &'static str, path: &str) -> FileStoreResult<object_store::ObjectMeta> {
        let location = self.location(path)?;
        self.timed(operation, path, async {
            self.store
                .head(&location)
                .await
                .map_err(|source| object_error(operation, path, source))
        })
        .await
    }
}

#[async_trait]
impl FileBackend for S3FileBackend {
    fn driver_name(&self) -> &'static str {
        FILE_DRIVER_S3
    }

    async fn test_connection(&self) -> FileStoreResult<()> {
        let prefix = self.list_prefix("")?;
        self.timed("test_connection", "", async {
            self.store
                .list_with_delimiter(prefix.as_ref())
                .await
                .map_err(|source| object_error("test_connection", "", source))
        })
        .await?;
        debug!(bucket = %self.bucket, "object store reachable");
        Ok(())
    }

    async fn reader(&self, path: &str) -> FileStoreResult<Box<dyn ReadSeek>> {
        let bytes = self.fetch("reader", path).await?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    async fn read_file(&self, path: &str) -> FileStoreResult<Vec<u8>> {
        Ok(self.fetch("read_file", path).await?.to_vec())
    }

    async fn file_exists(&self, path: &str) -> FileStoreResult<bool> {
        match self.head("file_exists", path).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn file_size(&self, path: &str) -> FileStoreResult<u64> {
        let meta = self.head("file_size", path).await?;
        Ok(u64::try_from(meta.size).unwrap_or(u64::MAX))
    }

    async fn file_mod_time(&self, path: &str) -> FileStoreResult<DateTime<Utc>> {
        Ok(self.head("file_mod_time", path).await?.last_modified)
    }

    async fn copy_file(&self, old_path: &str, new_path: &str) -> FileStoreResult<()> {
        let from = self.location(old_path)?;
        let to = self.location(new_path)?;
        self.timed("copy_file", old_path, async {
            self.store
                .copy(&from, &to)
                .await
                .map_err(|source| object_error("copy_file", old_path, source))
        })
        .await
    }

    async fn move_file(&self, old_path: &str, new_path: &str) -> FileStoreResult<()> {
        let from = self.location(old_path)?;
        let to = self.location(new_path)?;
        self.timed("move_file", old_path, async {
            self.store
                .rename(&from, &to)
                .await
                .map_err(|source| object_error("move_file", old_path, source))
        })
        .await
    }

    async fn write_file(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> FileStoreResult<u64> {
        let location = self.location(path)?;
        self.trace_call("write_file", path);
        let mut writer = BufWriter::new(Arc::clone(&self.store), location);

        let finished = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, upload(reader, &mut writer))
                .await
                .ok(),
            None => Some(upload(reader, &mut writer).await),
        };
        match finished {
            Some(Ok(written)) => Ok(written),
            Some(Err(source)) => {
                abort_upload(&mut writer, path).await;
                Err(upload_error("write_file", path, source))
            }
            None => {
                abort_upload(&mut writer, path).await;
                Err(FileStoreError::Timeout {
                    operation: "write_file",
                    path: path.to_string(),
                })
            }
        }
    }

    async fn append_file(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> FileStoreResult<u64> {
        let existing = self.fetch("append_file", path).await?;
        let mut appended = Vec::new();
        reader
            .read_to_end(&mut appended)
            .await
            .map_err(|source| upload_error("append_file", path, source))?;
        let added = appended.len() as u64;

        let mut combined = Vec::with_capacity(existing.len() + appended.len());
        combined.extend_from_slice(&existing);
        combined.extend_from_slice(&appended);

        let location = self.location(path)?;
        self.timed("append_file", path, async {
            self.store
                .put(&location, PutPayload::from(combined))
                .await
                .map_err(|source| object_error("append_file", path, source))
        })
        .await?;
        Ok(added)
    }

    async fn remove_file(&self, path: &str) -> FileStoreResult<()> {
        let location = self.location(path)?;
        self.timed("remove_file", path, async {
            self.store
                .delete(&location)
                .await
                .map_err(|source| object_error("remove_file", path, source))
        })
        .await
    }

    async fn list_directory(&self, path: &str) -> FileStoreResult<Vec<String>> {
        let prefix = self.list_prefix(path)?;
        let listing = self
            .timed("list_directory", path, async {
                self.store
                    .list_with_delimiter(prefix.as_ref())
                    .await
                    .map_err(|source| object_error("list_directory", path, source))
            })
            .await?;

        let mut listed: Vec<String> = listing
            .common_prefixes
            .iter()
            .chain(listing.objects.iter().map(|meta| &meta.location))
            .filter_map(|location| self.strip_prefix(location))
            .collect();
        listed.sort();
        Ok(listed)
    }

    async fn list_directory_recursively(&self, path: &str) -> FileStoreResult<Vec<String>> {
        let prefix = self.list_prefix(path)?;
        let objects: Vec<object_store::ObjectMeta> = self
            .timed("list_directory_recursively", path, async {
                self.store
                    .list(prefix.as_ref())
                    .try_collect()
                    .await
                    .map_err(|source| object_error("list_directory_recursively", path, source))
            })
            .await?;

        let mut listed: Vec<String> = objects
            .iter()
            .filter_map(|meta| self.strip_prefix(&meta.location))
            .collect();
        listed.sort();
        Ok(listed)
    }

    async fn remove_directory(&self, path: &str) -> FileStoreResult<()> {
        if sanitize_relative(path)?.is_empty() {
            return Err(FileStoreError::InvalidPath {
                path: path.to_string(),
                reason: "root_directory",
            });
        }
        let prefix = self.location(path)?;
        self.timed("remove_directory", path, async {
            let objects: Vec<object_store::ObjectMeta> = self
                .store
                .list(Some(&prefix))
                .try_collect()
                .await
                .map_err(|source| object_error("remove_directory", path, source))?;
            for meta in objects {
                self.store
                    .delete(&meta.location)
                    .await
                    .map_err(|source| object_error("remove_directory", path, source))?;
            }
            Ok(())
        })
        .await
    }

    fn as_cancellable(&self) -> Option<&dyn CancellableWrite> {
        Some(self)
    }
}

#[async_trait]
impl CancellableWrite for S3FileBackend {
    async fn write_file_with_context(
        &self,
        context: &WriteContext,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> FileStoreResult<u64> {
        let location = self.location(path)?;
        self.trace_call("write_file_with_context", path);
        let mut writer = BufWriter::new(Arc::clone(&self.store), location);

        let outcome = {
            let work = upload(reader, &mut writer);
            tokio::pin!(work);
            tokio::select! {
                biased;
                () = context.token().cancelled() => WriteOutcome::Interrupted("cancelled"),
                () = context.deadline_elapsed() => WriteOutcome::Interrupted("deadline_exceeded"),
                result = &mut work => WriteOutcome::Finished(result),
            }
        };

        match outcome {
            WriteOutcome::Finished(Ok(written)) => Ok(written),
            WriteOutcome::Finished(Err(source)) => {
                abort_upload(&mut writer, path).await;
                Err(upload_error("write_file_with_context", path, source))
            }
            WriteOutcome::Interrupted(reason) => {
                abort_upload(&mut writer, path).await;
                Err(FileStoreError::Cancelled {
                    path: path.to_string(),
                    reason,
                })
            }
        }
    }
}

async fn upload(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    writer: &mut BufWriter,
) -> io::Result<u64> {
    let written = tokio::io::copy(reader, writer).await?;
    writer.shutdown().await?;
    Ok(written)
}

/// Discard a partially written upload, including any started multipart parts.
async fn abort_upload(writer: &mut BufWriter, path: &str) {
    if let Err(err) = writer.abort().await {
        warn!(path, error = %err, "failed to abort interrupted upload");
    }
}

fn upload_error(operation: &'static str, path: &str, source: io::Error) -> FileStoreError {
    FileStoreError::Io {
        operation,
        path: PathBuf::from(path),
        source,
    }
}

fn build_store(settings: &FileBackendSettings) -> FileStoreResult<object_store::aws::AmazonS3> {
    if settings.amazon_s3_sign_v2 {
        warn!("legacy V2 request signing is not supported; requests are signed with V4");
    }

    let region = if settings.amazon_s3_region.is_empty() {
        DEFAULT_REGION
    } else {
        settings.amazon_s3_region.as_str()
    };
    let client_options =
        ClientOptions::new().with_allow_invalid_certificates(settings.skip_verify);

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(&settings.amazon_s3_bucket)
        .with_region(region)
        .with_client_options(client_options);

    if !settings.amazon_s3_access_key_id.is_empty() {
        builder = builder
            .with_access_key_id(&settings.amazon_s3_access_key_id)
            .with_secret_access_key(&settings.amazon_s3_secret_access_key);
    }

    let endpoint = settings.amazon_s3_endpoint.as_str();
    if !endpoint.is_empty() && endpoint != DEFAULT_S3_ENDPOINT {
        let url = if endpoint.contains("://") {
            endpoint.to_string()
        } else if settings.amazon_s3_ssl {
            format!("https://{endpoint}")
        } else {
            format!("http://{endpoint}")
        };
        builder = builder
            .with_endpoint(url)
            .with_allow_http(!settings.amazon_s3_ssl);
    }

    if settings.amazon_s3_sse {
        let key: AmazonS3ConfigKey = SSE_CONFIG_KEY
            .parse()
            .map_err(|source| FileStoreError::Configure { source })?;
        builder = builder.with_config(key, SSE_ALGORITHM);
    }

    builder
        .build()
        .map_err(|source| FileStoreError::Configure { source })
}
