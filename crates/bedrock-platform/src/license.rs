//! License model and the single-writer license cell.
//!
//! # Design
//! - The gate never polls or notifies; consumers load at their decision point.
//! - Absence of a license is the default state, not an error.
//! - An expired or not-yet-started license grants nothing.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bedrock_data::ReplicaEntitlements;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Licensed capability flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct LicenseFeatures {
    /// Read traffic may be routed to replica pools.
    pub read_replicas: bool,
    /// Search traffic may be routed to search replica pools.
    pub search_replicas: bool,
    /// Compliance features, including object store server-side encryption.
    pub compliance: bool,
    /// Advanced metrics collectors.
    pub advanced_metrics: bool,
    /// Licensed seat count.
    pub users: u32,
}

impl LicenseFeatures {
    /// Every feature enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            read_replicas: true,
            search_replicas: true,
            compliance: true,
            advanced_metrics: true,
            users: 10_000,
        }
    }

    /// Replica pools the topology may open.
    #[must_use]
    pub const fn replica_entitlements(&self) -> ReplicaEntitlements {
        ReplicaEntitlements {
            read_replicas: self.read_replicas,
            search_replicas: self.search_replicas,
        }
    }
}

/// An immutable license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    /// Unique license identifier.
    pub id: String,
    /// When the license was issued.
    pub issued_at: DateTime<Utc>,
    /// Start of the validity window.
    pub starts_at: DateTime<Utc>,
    /// End of the validity window (exclusive).
    pub expires_at: DateTime<Utc>,
    /// Licensee.
    pub customer: String,
    /// Granted features.
    pub features: LicenseFeatures,
}

impl License {
    /// A license valid for a year that grants every feature.
    #[must_use]
    pub fn for_testing() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            issued_at: now,
            starts_at: now - Duration::hours(1),
            expires_at: now + Duration::days(365),
            customer: "test".to_string(),
            features: LicenseFeatures::all(),
        }
    }

    /// Whether the validity window has ended at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the license grants anything at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && !self.is_expired(now)
    }
}

/// Holder of the current license.
///
/// Loads are lock-free and may run concurrently with a store.
#[derive(Debug, Default)]
pub struct LicenseGate {
    current: ArcSwapOption<License>,
}

impl LicenseGate {
    /// An empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current license.
    pub fn store(&self, license: License) {
        self.current.store(Some(Arc::new(license)));
    }

    /// Current license, if any.
    #[must_use]
    pub fn load(&self) -> Option<Arc<License>> {
        self.current.load_full()
    }

    /// Remove the current license.
    pub fn clear(&self) {
        self.current.store(None);
    }

    /// Whether a license is held, active or not.
    #[must_use]
    pub fn is_licensed(&self) -> bool {
        self.current.load().is_some()
    }

    /// Features granted at `now`; defaults when no active license is held.
    #[must_use]
    pub fn features_at(&self, now: DateTime<Utc>) -> LicenseFeatures {
        self.current
            .load()
            .as_deref()
            .filter(|license| license.is_active(now))
            .map(|license| license.features)
            .unwrap_or_default()
    }

    /// Features granted now.
    #[must_use]
    pub fn features(&self) -> LicenseFeatures {
        self.features_at(Utc::now())
    }
}
