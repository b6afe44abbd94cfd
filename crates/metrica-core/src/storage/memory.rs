use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{Repository, SupportsSnapshot};
use crate::error::MetricsError;
use crate::model::{MetricKind, StoreSnapshot};

/// Volatile store: one map per kind, both under a single lock so a name can
/// be checked against the other kind atomically with the write.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: RwLock<Maps>,
}

#[derive(Debug, Default)]
struct Maps {
    gauges: BTreeMap<String, f64>,
    counters: BTreeMap<String, i64>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let repo = Self::new();
        repo.restore(snapshot);
        repo
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Maps> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Maps> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn gauge(&self, name: &str) -> Result<f64, MetricsError> {
        self.read()
            .gauges
            .get(name)
            .copied()
            .ok_or_else(|| MetricsError::NotFound {
                kind: MetricKind::Gauge,
                name: name.to_string(),
            })
    }

    async fn counter(&self, name: &str) -> Result<i64, MetricsError> {
        self.read()
            .counters
            .get(name)
            .copied()
            .ok_or_else(|| MetricsError::NotFound {
                kind: MetricKind::Counter,
                name: name.to_string(),
            })
    }

    async fn set_gauge(&self, name: &str, value: f64) -> Result<f64, MetricsError> {
        let mut maps = self.write();
        if maps.counters.contains_key(name) {
            return Err(MetricsError::KindMismatch {
                name: name.to_string(),
                existing: MetricKind::Counter,
            });
        }
        maps.gauges.insert(name.to_string(), value);
        Ok(value)
    }

    async fn add_counter(&self, name: &str, delta: i64) -> Result<i64, MetricsError> {
        let mut maps = self.write();
        if maps.gauges.contains_key(name) {
            return Err(MetricsError::KindMismatch {
                name: name.to_string(),
                existing: MetricKind::Gauge,
            });
        }
        let total = maps.counters.entry(name.to_string()).or_insert(0);
        *total = total.saturating_add(delta);
        Ok(*total)
    }

    async fn gauges(&self) -> Result<Vec<(String, f64)>, MetricsError> {
        Ok(self
            .read()
            .gauges
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }

    async fn counters(&self) -> Result<Vec<(String, i64)>, MetricsError> {
        Ok(self
            .read()
            .counters
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }

    async fn ping(&self) -> Result<(), MetricsError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    fn snapshots(&self) -> Option<&dyn SupportsSnapshot> {
        Some(self)
    }
}

impl SupportsSnapshot for MemoryRepository {
    fn snapshot(&self) -> StoreSnapshot {
        let maps = self.read();
        StoreSnapshot {
            gauges: maps.gauges.clone(),
            counters: maps.counters.clone(),
        }
    }

    fn restore(&self, snapshot: StoreSnapshot) {
        let mut maps = self.write();
        maps.gauges = snapshot.gauges;
        maps.counters = snapshot.counters;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_counter_accumulates() {
        let repo = MemoryRepository::new();
        assert_eq!(repo.add_counter("x", 10).await.unwrap(), 10);
        assert_eq!(repo.add_counter("x", 15).await.unwrap(), 25);
        assert_eq!(repo.counter("x").await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_counter_saturates() {
        let repo = MemoryRepository::new();
        repo.add_counter("x", i64::MAX - 1).await.unwrap();
        assert_eq!(repo.add_counter("x", 5).await.unwrap(), i64::MAX);
    }

    #[tokio::test]
    async fn test_gauge_overwrites() {
        let repo = MemoryRepository::new();
        repo.set_gauge("g", 1.5).await.unwrap();
        repo.set_gauge("g", -3.2).await.unwrap();
        assert_eq!(repo.gauge("g").await.unwrap(), -3.2);
    }

    #[tokio::test]
    async fn test_not_found_is_distinct() {
        let repo = MemoryRepository::new();
        let err = repo.gauge("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert!(repo.counter("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_name_keeps_its_kind() {
        let repo = MemoryRepository::new();
        repo.set_gauge("m", 1.0).await.unwrap();
        let err = repo.add_counter("m", 1).await.unwrap_err();
        assert!(matches!(
            err,
            MetricsError::KindMismatch {
                existing: MetricKind::Gauge,
                ..
            }
        ));
        assert!(repo.counter("m").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_snapshot_restore_round_trip() {
        let repo = MemoryRepository::new();
        repo.set_gauge("Load1", 0.25).await.unwrap();
        repo.add_counter("PollCount", 7).await.unwrap();
        let snap = repo.snapshot();

        let other = MemoryRepository::from_snapshot(snap.clone());
        assert_eq!(other.snapshot(), snap);
        assert_eq!(other.counter("PollCount").await.unwrap(), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_counter_writes() {
        let repo = Arc::new(MemoryRepository::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    repo.add_counter("hits", 1).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(repo.counter("hits").await.unwrap(), 800);
    }
}
