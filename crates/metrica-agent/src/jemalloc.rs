//! Allocator readings from the process-wide jemalloc instance.

use metrica_core::collector::{AllocatorProbe, AllocatorStats, SampleError};
use tikv_jemalloc_ctl::{epoch, stats};

/// Reads jemalloc's `stats.*` counters.
///
/// Only meaningful when jemalloc is the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct JemallocProbe;

fn unavailable(e: tikv_jemalloc_ctl::Error) -> SampleError {
    SampleError::Allocator(e.to_string())
}

impl AllocatorProbe for JemallocProbe {
    fn read(&self) -> Result<AllocatorStats, SampleError> {
        // Stats are cached until the epoch advances.
        epoch::advance().map_err(unavailable)?;

        Ok(AllocatorStats {
            allocated: stats::allocated::read().map_err(unavailable)? as u64,
            active: stats::active::read().map_err(unavailable)? as u64,
            resident: stats::resident::read().map_err(unavailable)? as u64,
            mapped: stats::mapped::read().map_err(unavailable)? as u64,
            metadata: stats::metadata::read().map_err(unavailable)? as u64,
            retained: stats::retained::read().map_err(unavailable)? as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_live_stats() {
        let _keep: Vec<u8> = vec![0; 1 << 20];
        let stats = JemallocProbe.read().unwrap();
        assert!(stats.allocated >= 1 << 20);
        assert!(stats.active >= stats.allocated);
        assert!(stats.resident > 0);
    }
}
