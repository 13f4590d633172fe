//! # Design
//!
//! - Structured, constant-message errors for storage operations.
//! - Each failure carries the operation and the caller-supplied path.
//! - Source errors are preserved without interpolating context into messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for storage operations.
pub type FileStoreResult<T> = Result<T, FileStoreError>;

/// Errors produced by file backends.
#[derive(Debug, Error)]
pub enum FileStoreError {
    /// The configured driver name matches no backend.
    #[error("no valid file storage driver found")]
    UnknownDriver {
        /// Driver name as configured.
        driver: String,
    },
    /// A mandatory object-store setting is missing.
    #[error("missing object store setting")]
    MissingSetting {
        /// Setting that was empty.
        field: &'static str,
    },
    /// The object store client could not be configured.
    #[error("object store configuration failed")]
    Configure {
        /// Underlying object store error.
        source: object_store::Error,
    },
    /// A path was rejected before touching storage.
    #[error("invalid storage path")]
    InvalidPath {
        /// Offending path.
        path: String,
        /// Static reason for the rejection.
        reason: &'static str,
    },
    /// The target does not exist.
    #[error("file not found")]
    NotFound {
        /// Operation that observed the missing file.
        operation: &'static str,
        /// Missing path.
        path: String,
    },
    /// IO failures while interacting with the local filesystem.
    #[error("file storage io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Directory traversal failures.
    #[error("file storage walk failure")]
    Walkdir {
        /// Operation that triggered the traversal failure.
        operation: &'static str,
        /// Path involved in the traversal failure.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// Object store request failures.
    #[error("object store request failed")]
    ObjectStore {
        /// Operation that triggered the request.
        operation: &'static str,
        /// Object key involved.
        path: String,
        /// Underlying object store error.
        source: object_store::Error,
    },
    /// The request exceeded the configured timeout.
    #[error("file storage operation timed out")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Path involved.
        path: String,
    },
    /// The caller cancelled the write or its deadline passed.
    #[error("file storage write cancelled")]
    Cancelled {
        /// Path being written.
        path: String,
        /// Static reason (`cancelled` or `deadline_exceeded`).
        reason: &'static str,
    },
    /// A background blocking task failed to complete.
    #[error("file storage worker failed")]
    Join {
        /// Operation that spawned the worker.
        operation: &'static str,
        /// Underlying join error.
        source: tokio::task::JoinError,
    },
}

impl FileStoreError {
    /// Returns `true` when the error means the target does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub(crate) fn io_error(operation: &'static str, path: PathBuf, source: io::Error) -> FileStoreError {
    if source.kind() == io::ErrorKind::NotFound {
        FileStoreError::NotFound {
            operation,
            path: path.display().to_string(),
        }
    } else {
        FileStoreError::Io {
            operation,
            path,
            source,
        }
    }
}

pub(crate) fn object_error(
    operation: &'static str,
    path: &str,
    source: object_store::Error,
) -> FileStoreError {
    match source {
        object_store::Error::NotFound { .. } => FileStoreError::NotFound {
            operation,
            path: path.to_string(),
        },
        source => FileStoreError::ObjectStore {
            operation,
            path: path.to_string(),
            source,
        },
    }
}
