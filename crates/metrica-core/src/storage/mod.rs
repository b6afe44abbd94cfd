//! Metric storage.
//!
//! [`Repository`] is the single contract the ingestion service talks to.
//! Backends:
//! - [`MemoryRepository`]: two maps behind locks; volatile, snapshot-capable
//! - [`PostgresRepository`]: `gauge_metrics` / `counter_metrics` tables
//!
//! Snapshotting is a separate capability ([`SupportsSnapshot`]) exposed only
//! by backends that need it. [`FileSnapshotStore`] persists snapshots as JSON.

mod memory;
mod postgres;
mod snapshot_file;

use async_trait::async_trait;

use crate::error::MetricsError;
use crate::model::StoreSnapshot;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;
pub use snapshot_file::FileSnapshotStore;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Current gauge value, or `NotFound`.
    async fn gauge(&self, name: &str) -> Result<f64, MetricsError>;

    /// Current counter total, or `NotFound`.
    async fn counter(&self, name: &str) -> Result<i64, MetricsError>;

    /// Replaces the gauge value and returns it.
    async fn set_gauge(&self, name: &str, value: f64) -> Result<f64, MetricsError>;

    /// Adds `delta` to the counter (starting from zero) and returns the new total.
    async fn add_counter(&self, name: &str, delta: i64) -> Result<i64, MetricsError>;

    async fn gauges(&self) -> Result<Vec<(String, f64)>, MetricsError>;

    async fn counters(&self) -> Result<Vec<(String, i64)>, MetricsError>;

    /// Health check of the backend.
    async fn ping(&self) -> Result<(), MetricsError>;

    /// Backend name for logs and errors.
    fn backend(&self) -> &'static str;

    /// Snapshot capability, for backends that have one.
    fn snapshots(&self) -> Option<&dyn SupportsSnapshot> {
        None
    }
}

/// Whole-store copy and replacement.
pub trait SupportsSnapshot: Send + Sync {
    /// Pure read of every stored metric.
    fn snapshot(&self) -> StoreSnapshot;

    /// Replaces the store contents with `snapshot`.
    fn restore(&self, snapshot: StoreSnapshot);
}
