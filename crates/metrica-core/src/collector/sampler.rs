//! Periodic runtime sampler.
//!
//! Each call to [`Sampler::sample`] reads the system-wide `/proc` files and
//! the allocator probe and returns an immutable [`RuntimeSample`]. CPU
//! utilisation and the `ctxt`/`processes` counters are deltas against the
//! previous successful tick.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use super::allocator::{AllocatorProbe, AllocatorStats};
use super::procfs::parser::{parse_global_stat, parse_loadavg, parse_meminfo};
use super::procfs::{CpuStat, GlobalStat, ParseError};
use super::traits::FileSystem;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("allocator stats unavailable: {0}")]
    Allocator(String),
}

/// One tick worth of readings.
///
/// Field types are significant: floating point fields are reported as
/// gauges, integer fields as counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeSample {
    pub allocated: f64,
    pub active: f64,
    pub resident: f64,
    pub mapped: f64,
    pub metadata: f64,
    pub retained: f64,

    /// Bytes.
    pub total_memory: f64,
    /// Bytes.
    pub free_memory: f64,
    /// Busy percentage per core, indexed by core id order in `/proc/stat`.
    pub cpu_utilization: Vec<f64>,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,

    /// Context switches since the previous tick.
    pub context_switches: i64,
    /// Processes created since the previous tick.
    pub forks: i64,

    pub random_value: f64,
    /// Always 1: one tick happened.
    pub poll_count: i64,
}

pub struct Sampler<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    probe: Box<dyn AllocatorProbe>,
    prev_stat: Option<GlobalStat>,
    ticks: Arc<AtomicU64>,
}

impl<F: FileSystem> Sampler<F> {
    pub fn new(fs: F, proc_path: impl Into<PathBuf>, probe: Box<dyn AllocatorProbe>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            probe,
            prev_stat: None,
            ticks: Arc::default(),
        }
    }

    /// Number of ticks attempted so far, including skipped ones.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Shared handle to the tick total, readable after the sampler moves
    /// into its loop.
    pub fn tick_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.ticks)
    }

    /// Takes one sample.
    ///
    /// On error nothing is recorded for this tick and the CPU baseline is
    /// kept, so the next successful tick reports the delta over both.
    pub fn sample(&mut self) -> Result<RuntimeSample, SampleError> {
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let meminfo = parse_meminfo(&self.read("meminfo")?)
            .map_err(|e| self.parse_error("meminfo", e))?;
        let stat = parse_global_stat(&self.read("stat")?)
            .map_err(|e| self.parse_error("stat", e))?;
        let loadavg = parse_loadavg(&self.read("loadavg")?)
            .map_err(|e| self.parse_error("loadavg", e))?;
        let alloc: AllocatorStats = self.probe.read()?;

        let baseline = CpuStat::default();
        let cpu_utilization = stat
            .cores()
            .map(|core| {
                let prev = self
                    .prev_stat
                    .as_ref()
                    .and_then(|p| p.cores().find(|c| c.cpu_id == core.cpu_id))
                    .unwrap_or(&baseline);
                core.utilization_since(prev)
            })
            .collect();

        let (context_switches, forks) = match &self.prev_stat {
            Some(prev) => (
                delta(stat.ctxt, prev.ctxt),
                delta(stat.processes, prev.processes),
            ),
            None => (0, 0),
        };

        let sample = RuntimeSample {
            allocated: alloc.allocated as f64,
            active: alloc.active as f64,
            resident: alloc.resident as f64,
            mapped: alloc.mapped as f64,
            metadata: alloc.metadata as f64,
            retained: alloc.retained as f64,
            total_memory: (meminfo.mem_total * 1024) as f64,
            free_memory: (meminfo.mem_free * 1024) as f64,
            cpu_utilization,
            load1: loadavg.load1,
            load5: loadavg.load5,
            load15: loadavg.load15,
            context_switches,
            forks,
            random_value: rand::random::<f64>(),
            poll_count: 1,
        };

        self.prev_stat = Some(stat);
        Ok(sample)
    }

    fn path(&self, file: &str) -> PathBuf {
        self.proc_path.join(file)
    }

    fn read(&self, file: &str) -> Result<String, SampleError> {
        let path = self.path(file);
        self.fs
            .read_to_string(Path::new(&path))
            .map_err(|source| SampleError::Io { path, source })
    }

    fn parse_error(&self, file: &str, source: ParseError) -> SampleError {
        SampleError::Parse {
            path: self.path(file),
            source,
        }
    }
}

fn delta(current: u64, previous: u64) -> i64 {
    i64::try_from(current.saturating_sub(previous)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::allocator::StaticProbe;
    use crate::collector::mock::MockFs;

    fn sampler(fs: MockFs) -> Sampler<MockFs> {
        let probe = StaticProbe(AllocatorStats {
            allocated: 4096,
            resident: 8192,
            ..Default::default()
        });
        Sampler::new(fs, "/proc", Box::new(probe))
    }

    #[test]
    fn test_first_sample() {
        let mut sampler = sampler(MockFs::typical_system());
        let sample = sampler.sample().unwrap();

        assert_eq!(sample.total_memory, 16384000.0 * 1024.0);
        assert_eq!(sample.free_memory, 8192000.0 * 1024.0);
        assert_eq!(sample.allocated, 4096.0);
        assert_eq!(sample.resident, 8192.0);
        assert_eq!(sample.load1, 0.15);
        assert_eq!(sample.cpu_utilization.len(), 4);
        assert_eq!(sample.context_switches, 0);
        assert_eq!(sample.forks, 0);
        assert_eq!(sample.poll_count, 1);
        assert!((0.0..1.0).contains(&sample.random_value));
        assert_eq!(sampler.ticks(), 1);
    }

    #[test]
    fn test_deltas_between_ticks() {
        let fs = MockFs::typical_system();
        let mut sampler = sampler(fs.clone());
        sampler.sample().unwrap();

        fs.make_busy();
        let sample = sampler.sample().unwrap();
        assert_eq!(sample.cpu_utilization, vec![100.0, 50.0, 0.0, 0.0]);
        assert_eq!(sample.context_switches, 700);
        assert_eq!(sample.forks, 12);
        assert_eq!(sampler.ticks(), 2);
    }

    #[test]
    fn test_read_failure_skips_tick() {
        let fs = MockFs::typical_system();
        let mut sampler = sampler(fs.clone());
        sampler.sample().unwrap();

        fs.remove_file("/proc/meminfo");
        let err = sampler.sample().unwrap_err();
        assert!(matches!(err, SampleError::Io { .. }));
        assert_eq!(sampler.ticks(), 2);

        // Baseline survives the failed tick.
        fs.add_file("/proc/meminfo", "MemTotal: 1 kB\nMemFree: 1 kB\n");
        fs.make_busy();
        let sample = sampler.sample().unwrap();
        assert_eq!(sample.context_switches, 700);
        assert_eq!(sampler.ticks(), 3);
    }

    #[test]
    fn test_parse_failure() {
        let fs = MockFs::typical_system();
        fs.add_file("/proc/loadavg", "bogus");
        let mut sampler = sampler(fs);
        assert!(matches!(
            sampler.sample().unwrap_err(),
            SampleError::Parse { .. }
        ));
    }
}
