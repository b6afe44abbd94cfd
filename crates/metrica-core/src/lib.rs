//! metrica-core: shared library for the metrica agent and server.
//!
//! Provides:
//! - `model`: metric records, batches and store snapshots
//! - `error`: error taxonomy shared by every layer
//! - `retry`: retry schedules and the generic retry combinator
//! - `envelope`: gzip compression, HMAC signing and RSA encryption of payloads
//! - `collector`: `/proc` and allocator sampling, batch construction
//! - `transport`: HTTP and gRPC delivery of batches
//! - `storage`: repository contract with in-memory and PostgreSQL backends
//! - `service`: ingestion service on top of a repository
//! - `persistence`: periodic snapshotting of the store to disk
//! - `pipeline`: agent sampling and reporting loops
//! - `net`: client address helpers (trusted subnets, outbound address)
//!
//! With `api` feature:
//! - OpenAPI schema derives for the wire record

pub mod collector;
pub mod envelope;
pub mod error;
pub mod model;
pub mod net;
pub mod persistence;
pub mod pipeline;
pub mod proto;
pub mod retry;
pub mod service;
pub mod storage;
pub mod transport;

pub use error::MetricsError;
pub use model::{Metric, MetricBatch, MetricKind, MetricValue, StoreSnapshot};

/// Crate version with the git revision it was built from.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_SHA"), ")");

/// Header carrying the hex HMAC-SHA256 of the wire body.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// Header carrying the agent's address hint.
pub const REAL_IP_HEADER: &str = "X-Real-IP";
