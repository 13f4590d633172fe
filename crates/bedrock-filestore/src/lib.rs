#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Durable storage abstraction with interchangeable drivers.
//!
//! Layout: `backend.rs` (the [`FileBackend`] contract, cancellable writes,
//! driver selection), `settings.rs` (settings conversion and validation),
//! `paths.rs` (relative path hardening), `local.rs` and `s3.rs` (drivers).

pub mod backend;
pub mod error;
pub mod local;
pub mod paths;
pub mod s3;
pub mod settings;

pub use backend::{
    CancellableWrite, FileBackend, ReadSeek, WriteContext, new_file_backend,
    try_write_file_context,
};
pub use error::{FileStoreError, FileStoreResult};
pub use local::LocalFileBackend;
pub use s3::S3FileBackend;
pub use settings::FileBackendSettings;
