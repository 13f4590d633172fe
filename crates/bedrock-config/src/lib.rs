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

//! Configuration snapshots consumed by the Bedrock platform runtime.
//!
//! Layout: `model.rs` (typed settings sections and defaults), `validate.rs`
//! (pre-commit validation and listen address parsing), `env.rs` (environment
//! overrides), `store.rs` (`ConfigStore` + in-memory implementation).

pub mod env;
pub mod error;
pub mod model;
pub mod store;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use model::{
    Config, DATABASE_DRIVER_MYSQL, DATABASE_DRIVER_POSTGRES, DATABASE_DRIVER_SQLITE,
    FAKE_SETTING, FILE_DRIVER_LOCAL, FILE_DRIVER_S3, FileSettings, MetricsSettings,
    ServiceSettings, SqlSettings,
};
pub use store::{ConfigStore, MemoryStore};
pub use validate::parse_listen_address;
