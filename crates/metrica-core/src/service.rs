//! Ingestion service: validation and retry policy on top of a [`Repository`].
//!
//! Every repository call goes through the retry combinator with one
//! schedule built at construction. Not-found and validation errors are not
//! retryable, so a read of a never-written name fails fast.
//!
//! `set_batch` validates every record before writing any, then applies them
//! in order. It is not atomic against backend failures: records applied
//! before a failing one stay applied.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::MetricsError;
use crate::model::{Metric, MetricKind, MetricValue, StoreSnapshot};
use crate::retry::{RetrySchedule, retry};
use crate::storage::{FileSnapshotStore, Repository, SupportsSnapshot};

pub struct MetricsService {
    repo: Arc<dyn Repository>,
    schedule: RetrySchedule,
    cancel: CancellationToken,
    snapshot_file: Option<FileSnapshotStore>,
    save_on_write: bool,
}

impl MetricsService {
    pub fn new(
        repo: Arc<dyn Repository>,
        schedule: RetrySchedule,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            repo,
            schedule,
            cancel,
            snapshot_file: None,
            save_on_write: false,
        }
    }

    /// Enables `save`/`restore` against `file`. With `save_on_write`, every
    /// successful write is followed by a synchronous save.
    pub fn with_snapshot_file(mut self, file: FileSnapshotStore, save_on_write: bool) -> Self {
        self.snapshot_file = Some(file);
        self.save_on_write = save_on_write;
        self
    }

    pub fn backend(&self) -> &'static str {
        self.repo.backend()
    }

    async fn guarded<T, F, Fut>(&self, op: F) -> Result<T, MetricsError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MetricsError>>,
    {
        retry(&self.schedule, &self.cancel, op)
            .await
            .map_err(MetricsError::from)
    }

    /// Current value of `name`; `kind` is the raw kind string from the caller.
    pub async fn get_value(&self, name: &str, kind: &str) -> Result<MetricValue, MetricsError> {
        self.get(name, kind.parse()?).await
    }

    pub async fn get(&self, name: &str, kind: MetricKind) -> Result<MetricValue, MetricsError> {
        match kind {
            MetricKind::Gauge => self
                .guarded(|| self.repo.gauge(name))
                .await
                .map(MetricValue::Gauge),
            MetricKind::Counter => self
                .guarded(|| self.repo.counter(name))
                .await
                .map(MetricValue::Counter),
        }
    }

    /// Parses and applies one value. Returns the value now stored (the
    /// running total for counters).
    pub async fn set_value(
        &self,
        name: &str,
        kind: &str,
        raw: &str,
    ) -> Result<MetricValue, MetricsError> {
        let kind: MetricKind = kind.parse()?;
        if name.is_empty() {
            return Err(MetricsError::MissingField("metric name is empty".into()));
        }
        let value = MetricValue::parse(kind, raw)?;
        let stored = self.apply(name, value).await?;
        self.after_write().await;
        Ok(stored)
    }

    /// Applies one JSON record and returns it with the stored value.
    pub async fn update(&self, metric: &Metric) -> Result<Metric, MetricsError> {
        let value = metric.validate()?;
        let stored = self.apply(&metric.id, value).await?;
        self.after_write().await;
        Ok(Metric::from_value(metric.id.clone(), stored))
    }

    /// Validates the whole batch, then applies it record by record.
    pub async fn set_batch(&self, metrics: &[Metric]) -> Result<(), MetricsError> {
        let values = metrics
            .iter()
            .map(|m| m.validate().map(|v| (m.id.as_str(), v)))
            .collect::<Result<Vec<_>, _>>()?;

        for (name, value) in values {
            self.apply(name, value).await?;
        }
        debug!(records = metrics.len(), "batch applied");
        self.after_write().await;
        Ok(())
    }

    async fn apply(&self, name: &str, value: MetricValue) -> Result<MetricValue, MetricsError> {
        match value {
            MetricValue::Gauge(v) => self
                .guarded(|| self.repo.set_gauge(name, v))
                .await
                .map(MetricValue::Gauge),
            MetricValue::Counter(d) => self
                .guarded(|| self.repo.add_counter(name, d))
                .await
                .map(MetricValue::Counter),
        }
    }

    async fn after_write(&self) {
        if !self.save_on_write {
            return;
        }
        if let Err(e) = self.save().await {
            error!(error = %e, "synchronous snapshot save failed");
        }
    }

    /// Every stored metric. Reads that still fail after retrying are logged
    /// and leave their half of the snapshot empty.
    pub async fn list_all(&self) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::default();
        match self.guarded(|| self.repo.gauges()).await {
            Ok(gauges) => snapshot.gauges.extend(gauges),
            Err(e) => warn!(error = %e, "listing gauges failed"),
        }
        match self.guarded(|| self.repo.counters()).await {
            Ok(counters) => snapshot.counters.extend(counters),
            Err(e) => warn!(error = %e, "listing counters failed"),
        }
        snapshot
    }

    pub async fn ping(&self) -> Result<(), MetricsError> {
        self.repo.ping().await
    }

    fn snapshot_target(
        &self,
        operation: &'static str,
    ) -> Result<(&dyn SupportsSnapshot, &FileSnapshotStore), MetricsError> {
        let snapshots = self
            .repo
            .snapshots()
            .ok_or_else(|| MetricsError::NotSupported {
                operation,
                backend: self.repo.backend(),
            })?;
        let file = self
            .snapshot_file
            .as_ref()
            .ok_or(MetricsError::PersistenceDisabled)?;
        Ok((snapshots, file))
    }

    /// Writes the current store contents to the snapshot file.
    pub async fn save(&self) -> Result<(), MetricsError> {
        let (snapshots, file) = self.snapshot_target("save")?;
        file.save_with(|| snapshots.snapshot()).await
    }

    /// Replaces the store contents with the snapshot file. Returns the
    /// number of metrics loaded.
    pub async fn restore(&self) -> Result<usize, MetricsError> {
        let (snapshots, file) = self.snapshot_target("restore")?;
        let snapshot = file.load().await?;
        let count = snapshot.len();
        snapshots.restore(snapshot);
        info!(metrics = count, path = %file.path().display(), "store restored");
        Ok(count)
    }
}
