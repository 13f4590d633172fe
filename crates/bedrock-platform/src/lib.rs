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

//! Platform runtime substrate for Bedrock.
//!
//! Layout: `license.rs` (license model and gate), `tasks.rs` (tracked
//! background work), `metrics.rs` (hot-reloadable metrics endpoint),
//! `service.rs` (orchestration and lifecycle), `error.rs`.

pub mod error;
pub mod license;
pub mod metrics;
pub mod service;
pub mod tasks;

pub use error::{PlatformError, PlatformResult};
pub use license::{License, LicenseFeatures, LicenseGate};
pub use metrics::{MetricsController, MetricsInterface, MetricsState};
pub use service::{
    PlatformOption, PlatformService, PlatformServiceBuilder, ServiceConfig, config_store, hook,
    limited_client_config, start_metrics, with_license, with_metrics_interface,
};
pub use tasks::BackgroundTasks;
