//! In-memory `/proc` fixtures.

mod filesystem;
mod scenarios;

pub use filesystem::MockFs;
pub use scenarios::{BUSY_STAT, IDLE_STAT};
