//! Error taxonomy shared by the agent and the server.
//!
//! Errors fall into four groups: validation (never retried), transient
//! backend/delivery failures (retried per schedule), not-found, and
//! not-supported operations.

use thiserror::Error;

use crate::envelope::EnvelopeError;
use crate::model::MetricKind;
use crate::retry::RetryError;

#[derive(Debug, Error)]
pub enum MetricsError {
    /// Metric kind is neither `gauge` nor `counter`.
    #[error("unknown metric kind: {0:?}")]
    UnknownKind(String),

    /// Value could not be parsed for the declared kind.
    #[error("invalid {kind} value {raw:?}: {reason}")]
    ParseFailure {
        kind: MetricKind,
        raw: String,
        reason: String,
    },

    /// Record is missing its name or the value required by its kind.
    #[error("invalid record: {0}")]
    MissingField(String),

    /// Name is already stored under the other kind.
    #[error("metric {name:?} is already a {existing}")]
    KindMismatch { name: String, existing: MetricKind },

    #[error("{kind} {name:?} not found")]
    NotFound { kind: MetricKind, name: String },

    /// Transient storage failure (connection loss, I/O hiccup).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Storage failure that retrying cannot fix (constraint, bad data).
    #[error("storage backend rejected the operation: {0}")]
    BackendPermanent(String),

    /// Transport-level failure while delivering a batch.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Server answered with something other than success.
    #[error("server rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("{operation} is not supported by the {backend} backend")]
    NotSupported {
        operation: &'static str,
        backend: &'static str,
    },

    /// Snapshot operations requested but no snapshot file is configured.
    #[error("snapshot persistence is not configured")]
    PersistenceDisabled,

    /// Retry schedule ran out; wraps the last underlying failure.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: Box<MetricsError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("snapshot file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MetricsError {
    /// Returns true if the failure is transient and the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MetricsError::Backend(_)
                | MetricsError::Delivery(_)
                | MetricsError::Rejected { .. }
                | MetricsError::Io(_)
        )
    }

    /// Returns true for caller mistakes (4xx / InvalidArgument).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MetricsError::UnknownKind(_)
                | MetricsError::ParseFailure { .. }
                | MetricsError::MissingField(_)
                | MetricsError::KindMismatch { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MetricsError::NotFound { .. })
    }
}

impl From<RetryError<MetricsError>> for MetricsError {
    fn from(err: RetryError<MetricsError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => MetricsError::RetriesExhausted {
                attempts,
                last: Box::new(last),
            },
            RetryError::Permanent(e) => e,
            RetryError::Cancelled => MetricsError::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(MetricsError::Backend("conn reset".into()).is_retryable());
        assert!(!MetricsError::UnknownKind("bogus".into()).is_retryable());
        assert!(MetricsError::UnknownKind("bogus".into()).is_validation());
        let nf = MetricsError::NotFound {
            kind: MetricKind::Gauge,
            name: "x".into(),
        };
        assert!(nf.is_not_found());
        assert!(!nf.is_retryable());
    }

    #[test]
    fn test_exhausted_wraps_last_cause() {
        let err: MetricsError = RetryError::Exhausted {
            attempts: 3,
            last: MetricsError::Backend("timeout".into()),
        }
        .into();
        assert!(matches!(err, MetricsError::RetriesExhausted { attempts: 3, .. }));
        assert!(err.to_string().contains("timeout"));
    }
}
