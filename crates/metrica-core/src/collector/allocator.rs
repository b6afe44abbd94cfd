//! Heap allocator statistics.
//!
//! The agent binary owns the global allocator, so the library only sees it
//! through [`AllocatorProbe`].

use super::sampler::SampleError;

/// Byte counters reported by the allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AllocatorStats {
    pub allocated: u64,
    pub active: u64,
    pub resident: u64,
    pub mapped: u64,
    pub metadata: u64,
    pub retained: u64,
}

pub trait AllocatorProbe: Send + Sync {
    /// Reads a fresh set of allocator statistics.
    fn read(&self) -> Result<AllocatorStats, SampleError>;
}

/// Probe returning the same statistics on every read.
///
/// Used when the process runs on the system allocator (all zeros) and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticProbe(pub AllocatorStats);

impl AllocatorProbe for StaticProbe {
    fn read(&self) -> Result<AllocatorStats, SampleError> {
        Ok(self.0)
    }
}
