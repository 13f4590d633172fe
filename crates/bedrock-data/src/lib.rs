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

//! Database topology manager for Bedrock: master, read replica and search
//! replica pools over `postgres`, `mysql` or `sqlite`, plus schema diagnostics.

pub mod diagnostics;
pub mod error;
pub mod observer;
pub mod store;

pub use error::{DataError, DataResult};
pub use observer::StoreObserver;
pub use sqlx::AnyPool;
pub use store::{ConnectOptions, Dialect, ReplicaEntitlements, SqlStore};
