//! Parsers for the system-wide files of the Linux `/proc` filesystem.

pub mod parser;

pub use parser::{CpuStat, GlobalStat, LoadAvg, MemInfo, ParseError};
