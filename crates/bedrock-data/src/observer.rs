//! Hooks through which an installed metrics implementation watches the store.

use sqlx::AnyPool;

/// Receives pool registrations and per-method timings from [`crate::SqlStore`].
///
/// Implementations must be cheap; calls happen inline on the store's hot path.
pub trait StoreObserver: Send + Sync {
    /// Called once per opened pool with its role label (`master`, `replica-0`, ...).
    fn register_db_collector(&self, pool: &AnyPool, name: &str);

    /// Called after each instrumented store method with its outcome and
    /// elapsed wall time in seconds.
    fn observe_store_method_duration(&self, method: &str, success: bool, elapsed: f64);
}
