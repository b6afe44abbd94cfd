//! Runtime sampling for the agent.
//!
//! ```text
//!  ┌──────────────┐   ┌───────────────┐
//!  │  FileSystem  │   │ AllocatorProbe│
//!  │ /proc/meminfo│   │  (jemalloc in │
//!  │ /proc/stat   │   │   the agent)  │
//!  │ /proc/loadavg│   └───────┬───────┘
//!  └──────┬───────┘           │
//!         └─────────┬─────────┘
//!            ┌──────▼──────┐  RuntimeSample  ┌─────────────┐
//!            │   Sampler   ├────────────────►│ build_batch │──► MetricBatch
//!            └─────────────┘                 └─────────────┘
//! ```
//!
//! ## Testing (with MockFs)
//!
//! ```
//! use metrica_core::collector::{build_batch, MockFs, Sampler, StaticProbe};
//!
//! let fs = MockFs::typical_system();
//! let mut sampler = Sampler::new(fs, "/proc", Box::new(StaticProbe::default()));
//! let sample = sampler.sample().unwrap();
//! assert!(!build_batch(&sample).is_empty());
//! ```

pub mod allocator;
pub mod batcher;
pub mod mock;
pub mod procfs;
pub mod sampler;
pub mod traits;

pub use allocator::{AllocatorProbe, AllocatorStats, StaticProbe};
pub use batcher::build_batch;
pub use mock::MockFs;
pub use sampler::{RuntimeSample, SampleError, Sampler};
pub use traits::{FileSystem, RealFs};
