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

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (env/helpers, scratch data sources), containers.rs (docker-backed databases).

pub mod containers;
pub mod fixtures;

pub use containers::ExternalDatabase;
pub use fixtures::{docker_available, external_data_source, sqlite_data_source};
