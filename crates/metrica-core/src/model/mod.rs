//! Metric records, batches and store snapshots.
//!
//! `Metric` is the JSON wire record (`{id, type, delta?, value?}`) used by the
//! HTTP surface and the agent. `StoreSnapshot` is both the persisted file
//! format and the result of the "list all" query.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MetricsError;

/// Metric kind. Fixed per name for the lifetime of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub enum MetricKind {
    /// Last write wins.
    Gauge,
    /// Deltas accumulate.
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(MetricsError::UnknownKind(other.to_string())),
        }
    }
}

/// A stored or submitted value, tagged by kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    /// Parses a raw textual value for the given kind.
    ///
    /// Gauges must be finite floats; counters must be non-negative integers.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, MetricsError> {
        let fail = |reason: String| MetricsError::ParseFailure {
            kind,
            raw: raw.to_string(),
            reason,
        };
        match kind {
            MetricKind::Gauge => {
                let v: f64 = raw.trim().parse().map_err(|e| fail(format!("{e}")))?;
                if !v.is_finite() {
                    return Err(fail("value is not finite".into()));
                }
                Ok(MetricValue::Gauge(v))
            }
            MetricKind::Counter => {
                let d: i64 = raw.trim().parse().map_err(|e| fail(format!("{e}")))?;
                if d < 0 {
                    return Err(fail("counter delta is negative".into()));
                }
                Ok(MetricValue::Counter(d))
            }
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

/// JSON wire record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct Metric {
    /// Metric name.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Counter delta (counters only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    /// Gauge value (gauges only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    pub fn from_value(id: impl Into<String>, value: MetricValue) -> Self {
        match value {
            MetricValue::Gauge(v) => Self::gauge(id, v),
            MetricValue::Counter(d) => Self::counter(id, d),
        }
    }

    /// Checks that the record has a name and the value its kind requires.
    pub fn validate(&self) -> Result<MetricValue, MetricsError> {
        if self.id.is_empty() {
            return Err(MetricsError::MissingField("metric id is empty".into()));
        }
        match self.kind {
            MetricKind::Gauge => match self.value {
                Some(v) if v.is_finite() => Ok(MetricValue::Gauge(v)),
                Some(v) => Err(MetricsError::ParseFailure {
                    kind: MetricKind::Gauge,
                    raw: v.to_string(),
                    reason: "value is not finite".into(),
                }),
                None => Err(MetricsError::MissingField(format!(
                    "gauge {:?} has no value",
                    self.id
                ))),
            },
            MetricKind::Counter => match self.delta {
                Some(d) if d >= 0 => Ok(MetricValue::Counter(d)),
                Some(d) => Err(MetricsError::ParseFailure {
                    kind: MetricKind::Counter,
                    raw: d.to_string(),
                    reason: "counter delta is negative".into(),
                }),
                None => Err(MetricsError::MissingField(format!(
                    "counter {:?} has no delta",
                    self.id
                ))),
            },
        }
    }
}

/// Records produced by one sampling tick; the unit of one delivery attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricBatch {
    metrics: Vec<Metric>,
}

impl MetricBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Folds a later batch into this one: gauges take the later value,
    /// counters add up. Record order follows first appearance.
    pub fn coalesce(&mut self, later: MetricBatch) {
        for metric in later.metrics {
            match self
                .metrics
                .iter_mut()
                .find(|m| m.id == metric.id && m.kind == metric.kind)
            {
                Some(existing) => match metric.kind {
                    MetricKind::Gauge => existing.value = metric.value,
                    MetricKind::Counter => {
                        let sum = existing
                            .delta
                            .unwrap_or(0)
                            .saturating_add(metric.delta.unwrap_or(0));
                        existing.delta = Some(sum);
                    }
                },
                None => self.metrics.push(metric),
            }
        }
    }
}

impl From<Vec<Metric>> for MetricBatch {
    fn from(metrics: Vec<Metric>) -> Self {
        Self { metrics }
    }
}

/// Point-in-time copy of every gauge and counter in a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct StoreSnapshot {
    #[serde(default)]
    pub gauges: BTreeMap<String, f64>,
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
}

impl StoreSnapshot {
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    /// Flattens the snapshot into wire records, gauges first.
    pub fn to_metrics(&self) -> Vec<Metric> {
        self.gauges
            .iter()
            .map(|(name, v)| Metric::gauge(name.clone(), *v))
            .chain(
                self.counters
                    .iter()
                    .map(|(name, d)| Metric::counter(name.clone(), *d)),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_record_json_shape() {
        let json = serde_json::to_string(&Metric::counter("PollCount", 5)).unwrap();
        assert_eq!(json, r#"{"id":"PollCount","type":"counter","delta":5}"#);

        let m: Metric = serde_json::from_str(r#"{"id":"Alloc","type":"gauge","value":1.5}"#).unwrap();
        assert_eq!(m, Metric::gauge("Alloc", 1.5));
    }

    #[test]
    fn test_unknown_kind_in_json_is_rejected() {
        let res: Result<Metric, _> = serde_json::from_str(r#"{"id":"x","type":"bogus","value":1}"#);
        assert!(res.is_err());
        assert!(matches!(
            "bogus".parse::<MetricKind>(),
            Err(MetricsError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(
            MetricValue::parse(MetricKind::Gauge, "-3.2").unwrap(),
            MetricValue::Gauge(-3.2)
        );
        assert_eq!(
            MetricValue::parse(MetricKind::Counter, "15").unwrap(),
            MetricValue::Counter(15)
        );
        assert!(MetricValue::parse(MetricKind::Counter, "1.5").is_err());
        assert!(MetricValue::parse(MetricKind::Counter, "-1").is_err());
        assert!(MetricValue::parse(MetricKind::Gauge, "abc").is_err());
        assert!(MetricValue::parse(MetricKind::Gauge, "NaN").is_err());
    }

    #[test]
    fn test_validate_requires_value_for_kind() {
        let mut m = Metric::gauge("g", 1.0);
        m.value = None;
        m.delta = Some(3);
        assert!(matches!(m.validate(), Err(MetricsError::MissingField(_))));

        let mut c = Metric::counter("", 1);
        assert!(c.validate().is_err());
        c.id = "c".into();
        assert_eq!(c.validate().unwrap(), MetricValue::Counter(1));
    }

    #[test]
    fn test_coalesce() {
        let mut first = MetricBatch::from(vec![Metric::gauge("g", 1.0), Metric::counter("c", 2)]);
        let later = MetricBatch::from(vec![
            Metric::gauge("g", 4.0),
            Metric::counter("c", 3),
            Metric::gauge("h", 0.5),
        ]);
        first.coalesce(later);
        assert_eq!(
            first.metrics(),
            &[
                Metric::gauge("g", 4.0),
                Metric::counter("c", 5),
                Metric::gauge("h", 0.5)
            ]
        );
    }

    #[test]
    fn test_snapshot_format() {
        let mut snap = StoreSnapshot::default();
        snap.gauges.insert("g".into(), 1.25);
        snap.counters.insert("c".into(), 7);
        let json = serde_json::to_string(&snap).unwrap();
        assert_eq!(json, r#"{"gauges":{"g":1.25},"counters":{"c":7}}"#);
        let back: StoreSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
        assert_eq!(snap.to_metrics().len(), 2);
    }
}
