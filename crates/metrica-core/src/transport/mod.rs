//! Delivery of metric batches to the server.
//!
//! Two interchangeable senders implement [`Transport`]: [`HttpTransport`]
//! (gzip JSON to `POST /updates/`) and [`GrpcTransport`] (`UpdateMetrics`
//! RPC). [`RetryingTransport`] wraps either one with a retry schedule.

mod grpc;
mod http;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::MetricsError;
use crate::model::MetricBatch;
use crate::retry::{RetrySchedule, retry};

pub use grpc::GrpcTransport;
pub use http::HttpTransport;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers one batch. A single attempt; retrying is the caller's business.
    async fn send(&self, batch: &MetricBatch) -> Result<(), MetricsError>;

    /// Short protocol name for logs.
    fn protocol(&self) -> &'static str;
}

/// Prefixes `http://` when the configured address has no scheme.
pub(crate) fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

/// Runs every send through [`retry`] with a fixed schedule.
pub struct RetryingTransport<T> {
    inner: T,
    schedule: RetrySchedule,
    cancel: CancellationToken,
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(inner: T, schedule: RetrySchedule, cancel: CancellationToken) -> Self {
        Self {
            inner,
            schedule,
            cancel,
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryingTransport<T> {
    async fn send(&self, batch: &MetricBatch) -> Result<(), MetricsError> {
        retry(&self.schedule, &self.cancel, || self.inner.send(batch))
            .await
            .map_err(MetricsError::from)
    }

    fn protocol(&self) -> &'static str {
        self.inner.protocol()
    }
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&self, batch: &MetricBatch) -> Result<(), MetricsError> {
        (**self).send(batch).await
    }

    fn protocol(&self) -> &'static str {
        (**self).protocol()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metric;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails with the scripted errors in order, then succeeds.
    struct Scripted {
        failures: Mutex<Vec<MetricsError>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(failures: Vec<MetricsError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl<'a> Transport for &'a Scripted {
        async fn send(&self, _batch: &MetricBatch) -> Result<(), MetricsError> {
            *self.calls.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                Ok(())
            } else {
                Err(failures.remove(0))
            }
        }

        fn protocol(&self) -> &'static str {
            "scripted"
        }
    }

    fn batch() -> MetricBatch {
        vec![Metric::counter("PollCount", 1)].into()
    }

    fn schedule(n: usize) -> RetrySchedule {
        RetrySchedule::new(vec![Duration::from_secs(1); n])
    }

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("localhost:8080"), "http://localhost:8080");
        assert_eq!(base_url("https://example.com/"), "https://example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_schedule() {
        let inner = Scripted::new(
            (0..5)
                .map(|_| MetricsError::Delivery("connection refused".into()))
                .collect(),
        );
        let transport = RetryingTransport::new(&inner, schedule(3), CancellationToken::new());

        let err = transport.send(&batch()).await.unwrap_err();
        assert!(matches!(err, MetricsError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let inner = Scripted::new(vec![MetricsError::Rejected {
            status: 503,
            body: String::new(),
        }]);
        let transport = RetryingTransport::new(&inner, schedule(3), CancellationToken::new());

        transport.send(&batch()).await.unwrap();
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_transport_does_not_send() {
        let inner = Scripted::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let transport = RetryingTransport::new(&inner, schedule(3), cancel);

        assert!(matches!(
            transport.send(&batch()).await.unwrap_err(),
            MetricsError::Cancelled
        ));
        assert_eq!(inner.calls(), 0);
    }
}
