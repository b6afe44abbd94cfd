//! Conversion of a [`RuntimeSample`] into a [`MetricBatch`].
//!
//! The field list is declared once, statically. The metric kind comes from
//! the accessor's return type: `f64` fields become gauges, `i64` fields
//! become counters.

use super::sampler::RuntimeSample;
use crate::model::{Metric, MetricBatch};

#[derive(Clone, Copy)]
pub enum Accessor {
    Float(fn(&RuntimeSample) -> f64),
    Integer(fn(&RuntimeSample) -> i64),
}

impl Accessor {
    fn metric(&self, name: &str, sample: &RuntimeSample) -> Metric {
        match self {
            Accessor::Float(get) => Metric::gauge(name, get(sample)),
            Accessor::Integer(get) => Metric::counter(name, get(sample)),
        }
    }
}

/// Scalar fields of a sample and their metric names.
pub const FIELDS: &[(&str, Accessor)] = &[
    ("Allocated", Accessor::Float(|s: &RuntimeSample| s.allocated)),
    ("Active", Accessor::Float(|s: &RuntimeSample| s.active)),
    ("Resident", Accessor::Float(|s: &RuntimeSample| s.resident)),
    ("Mapped", Accessor::Float(|s: &RuntimeSample| s.mapped)),
    ("Metadata", Accessor::Float(|s: &RuntimeSample| s.metadata)),
    ("Retained", Accessor::Float(|s: &RuntimeSample| s.retained)),
    ("TotalMemory", Accessor::Float(|s: &RuntimeSample| s.total_memory)),
    ("FreeMemory", Accessor::Float(|s: &RuntimeSample| s.free_memory)),
    ("Load1", Accessor::Float(|s: &RuntimeSample| s.load1)),
    ("Load5", Accessor::Float(|s: &RuntimeSample| s.load5)),
    ("Load15", Accessor::Float(|s: &RuntimeSample| s.load15)),
    ("ContextSwitches", Accessor::Integer(|s: &RuntimeSample| s.context_switches)),
    ("Forks", Accessor::Integer(|s: &RuntimeSample| s.forks)),
    ("RandomValue", Accessor::Float(|s: &RuntimeSample| s.random_value)),
    ("PollCount", Accessor::Integer(|s: &RuntimeSample| s.poll_count)),
];

/// Prefix of the per-core utilisation gauges (`CPUutilization1`, ...).
pub const CPU_UTILIZATION_PREFIX: &str = "CPUutilization";

/// Builds the batch for one sample. Field order is stable across calls.
pub fn build_batch(sample: &RuntimeSample) -> MetricBatch {
    let mut batch = MetricBatch::new();
    for (name, accessor) in FIELDS {
        batch.push(accessor.metric(name, sample));
    }
    for (i, util) in sample.cpu_utilization.iter().enumerate() {
        batch.push(Metric::gauge(
            format!("{}{}", CPU_UTILIZATION_PREFIX, i + 1),
            *util,
        ));
    }
    batch
}
