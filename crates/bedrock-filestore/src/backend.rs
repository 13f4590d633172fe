//! The storage contract shared by every driver.
//!
//! # Design
//! - One backend instance services every storage call for the service lifetime.
//! - Cancellable writes are an optional capability discovered through
//!   [`FileBackend::as_cancellable`]; callers go through
//!   [`try_write_file_context`], which falls back to the plain write.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bedrock_config::{FILE_DRIVER_LOCAL, FILE_DRIVER_S3};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncSeek};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{FileStoreError, FileStoreResult};
use crate::local::LocalFileBackend;
use crate::s3::S3FileBackend;
use crate::settings::FileBackendSettings;

/// Streaming reader with seek support returned by [`FileBackend::reader`].
pub trait ReadSeek: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T> ReadSeek for T where T: AsyncRead + AsyncSeek + Send + Unpin {}

/// Uniform durable-storage interface.
///
/// Paths are relative to the backend root; absolute paths and `..` segments
/// are rejected.
#[async_trait]
pub trait FileBackend: Send + Sync {
    /// Driver name this backend was built for.
    fn driver_name(&self) -> &'static str;

    /// Verify that the backend is reachable and writable.
    async fn test_connection(&self) -> FileStoreResult<()>;

    /// Open a seekable reader.
    async fn reader(&self, path: &str) -> FileStoreResult<Box<dyn ReadSeek>>;

    /// Read a whole file.
    async fn read_file(&self, path: &str) -> FileStoreResult<Vec<u8>>;

    /// Whether `path` exists.
    async fn file_exists(&self, path: &str) -> FileStoreResult<bool>;

    /// Size of `path` in bytes.
    async fn file_size(&self, path: &str) -> FileStoreResult<u64>;

    /// Last modification time of `path`.
    async fn file_mod_time(&self, path: &str) -> FileStoreResult<DateTime<Utc>>;

    /// Copy `old_path` to `new_path`, replacing any existing target.
    async fn copy_file(&self, old_path: &str, new_path: &str) -> FileStoreResult<()>;

    /// Move `old_path` to `new_path`, replacing any existing target.
    async fn move_file(&self, old_path: &str, new_path: &str) -> FileStoreResult<()>;

    /// Write (replace) `path` with the contents of `reader`, returning bytes written.
    async fn write_file(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> FileStoreResult<u64>;

    /// Append the contents of `reader` to an existing `path`, returning bytes appended.
    async fn append_file(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> FileStoreResult<u64>;

    /// Delete `path`.
    async fn remove_file(&self, path: &str) -> FileStoreResult<()>;

    /// Immediate children of `path`, relative to the backend root.
    async fn list_directory(&self, path: &str) -> FileStoreResult<Vec<String>>;

    /// Every file beneath `path`, relative to the backend root.
    async fn list_directory_recursively(&self, path: &str) -> FileStoreResult<Vec<String>>;

    /// Delete `path` and everything beneath it.
    async fn remove_directory(&self, path: &str) -> FileStoreResult<()>;

    /// The cancellable write capability, when supported.
    fn as_cancellable(&self) -> Option<&dyn CancellableWrite> {
        None
    }

    /// Capability flag for the cancellable write path.
    fn supports_cancellable_write(&self) -> bool {
        self.as_cancellable().is_some()
    }
}

/// Optional write path honouring caller cancellation and deadlines instead of
/// the backend's request timeout.
#[async_trait]
pub trait CancellableWrite: Send + Sync {
    /// Write `path` until completion, cancellation, or the context deadline.
    async fn write_file_with_context(
        &self,
        context: &WriteContext,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> FileStoreResult<u64>;
}

/// Cancellation token plus optional deadline for a cancellable write.
#[derive(Debug, Clone, Default)]
pub struct WriteContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl WriteContext {
    /// Context cancelled through `token`, with no deadline.
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Add an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Add a deadline relative to now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Token observed by the write.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves when the deadline passes; never resolves without one.
    pub(crate) async fn deadline_elapsed(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}

/// Write through the cancellable path when the backend supports it, otherwise
/// fall back to [`FileBackend::write_file`].
///
/// The fallback is best-effort: cancellation has no effect until the plain
/// write returns.
///
/// # Errors
///
/// Propagates the backend's write error.
pub async fn try_write_file_context(
    backend: &dyn FileBackend,
    context: &WriteContext,
    reader: &mut (dyn AsyncRead + Send + Unpin),
    path: &str,
) -> FileStoreResult<u64> {
    if let Some(writer) = backend.as_cancellable() {
        return writer.write_file_with_context(context, reader, path).await;
    }
    debug!(
        driver = backend.driver_name(),
        path, "cancellable write unsupported; using plain write"
    );
    backend.write_file(reader, path).await
}

/// Build the backend selected by `settings.driver_name`.
///
/// No network call is made; object-store preconditions are checked first.
///
/// # Errors
///
/// Returns [`FileStoreError::UnknownDriver`] for unrecognised drivers and
/// propagates object-store configuration failures.
pub fn new_file_backend(mut settings: FileBackendSettings) -> FileStoreResult<Arc<dyn FileBackend>> {
    let driver = settings.driver_name.clone();
    let backend: Arc<dyn FileBackend> = match driver.as_str() {
        FILE_DRIVER_S3 => {
            settings.check_mandatory_s3_fields()?;
            Arc::new(S3FileBackend::new(&settings)?)
        }
        FILE_DRIVER_LOCAL => Arc::new(LocalFileBackend::new(&settings.directory)),
        other => {
            return Err(FileStoreError::UnknownDriver {
                driver: other.to_string(),
            });
        }
    };
    info!(
        driver = backend.driver_name(),
        cancellable_write = backend.supports_cancellable_write(),
        "file backend constructed"
    );
    Ok(backend)
}
