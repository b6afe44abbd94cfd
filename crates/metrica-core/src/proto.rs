//! Generated gRPC types for `proto/metrics.proto` and their mapping to the model.

#![allow(clippy::derive_partial_eq_without_eq)]

use crate::error::MetricsError;
use crate::model;

tonic::include_proto!("metrica");

/// Metadata key carrying the hex HMAC of the encoded request message.
pub const SIGNATURE_METADATA: &str = "hashsha256";

/// Metadata key carrying the agent's address hint.
pub const REAL_IP_METADATA: &str = "x-real-ip";

impl From<model::MetricKind> for MetricKind {
    fn from(kind: model::MetricKind) -> Self {
        match kind {
            model::MetricKind::Gauge => MetricKind::Gauge,
            model::MetricKind::Counter => MetricKind::Counter,
        }
    }
}

impl From<&model::Metric> for Metric {
    fn from(m: &model::Metric) -> Self {
        Metric {
            id: m.id.clone(),
            kind: MetricKind::from(m.kind) as i32,
            delta: m.delta,
            value: m.value,
        }
    }
}

impl TryFrom<Metric> for model::Metric {
    type Error = MetricsError;

    fn try_from(m: Metric) -> Result<Self, Self::Error> {
        let kind = match MetricKind::try_from(m.kind) {
            Ok(MetricKind::Gauge) => model::MetricKind::Gauge,
            Ok(MetricKind::Counter) => model::MetricKind::Counter,
            Ok(MetricKind::Unspecified) | Err(_) => {
                return Err(MetricsError::UnknownKind(m.kind.to_string()));
            }
        };
        Ok(model::Metric {
            id: m.id,
            kind,
            delta: m.delta,
            value: m.value,
        })
    }
}
