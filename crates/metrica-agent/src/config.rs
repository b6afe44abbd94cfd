//! Agent configuration.
//!
//! Every knob can come from a flag, an environment variable or the JSON
//! config file, in that order of precedence, before falling back to the
//! built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde::Deserialize;

const DEFAULT_ADDRESS: &str = "localhost:8080";
const DEFAULT_GRPC_ADDRESS: &str = "localhost:3200";
const DEFAULT_REPORT_INTERVAL: u64 = 10;
const DEFAULT_POLL_INTERVAL: u64 = 2;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_FACTOR: u64 = 2;
const DEFAULT_PROC_PATH: &str = "/proc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Grpc,
}

/// metrica-agent - samples host and allocator metrics and ships them to
/// the metrica server.
#[derive(Parser, Debug, Default)]
#[command(name = "metrica-agent", version = metrica_core::VERSION, about, long_about = None)]
pub struct Args {
    /// HTTP server address (host:port).
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// gRPC server address (host:port), used with `--transport grpc`.
    #[arg(long, env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Delivery protocol.
    #[arg(long, env = "TRANSPORT", value_enum)]
    pub transport: Option<TransportKind>,

    /// Seconds between deliveries.
    #[arg(short = 'r', long, env = "REPORT_INTERVAL")]
    pub report_interval: Option<u64>,

    /// Seconds between samples.
    #[arg(short = 'p', long, env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Pre-shared key for the HashSHA256 signature.
    #[arg(short = 'k', long, env = "KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// PEM file with the server's RSA public key.
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Delivery attempts per report.
    #[arg(long, env = "RETRIES")]
    pub retries: Option<u32>,

    /// Multiplier of the linear backoff between attempts.
    #[arg(long, env = "BACKOFF_FACTOR")]
    pub backoff_factor: Option<u64>,

    /// Root of the proc filesystem.
    #[arg(long, env = "PROC_PATH")]
    pub proc_path: Option<PathBuf>,

    /// Address reported in X-Real-IP (detected when unset).
    #[arg(long, env = "REAL_IP")]
    pub real_ip: Option<String>,

    /// JSON config file.
    #[arg(short = 'c', long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// Config file contents. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    address: Option<String>,
    grpc_address: Option<String>,
    transport: Option<TransportKind>,
    report_interval: Option<u64>,
    poll_interval: Option<u64>,
    key: Option<String>,
    crypto_key: Option<PathBuf>,
    retries: Option<u32>,
    backoff_factor: Option<u64>,
    proc_path: Option<PathBuf>,
    real_ip: Option<String>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}

/// Fully resolved agent settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub address: String,
    pub grpc_address: String,
    pub transport: TransportKind,
    pub report_interval: Duration,
    pub poll_interval: Duration,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub retries: u32,
    pub backoff_factor: u64,
    pub proc_path: PathBuf,
    pub real_ip: Option<String>,
}

impl AgentConfig {
    pub fn resolve(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let report = args
            .report_interval
            .or(file.report_interval)
            .unwrap_or(DEFAULT_REPORT_INTERVAL);
        let poll = args
            .poll_interval
            .or(file.poll_interval)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        if report == 0 || poll == 0 {
            bail!("report and poll intervals must be at least one second");
        }

        Ok(Self {
            address: args
                .address
                .or(file.address)
                .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            grpc_address: args
                .grpc_address
                .or(file.grpc_address)
                .unwrap_or_else(|| DEFAULT_GRPC_ADDRESS.to_string()),
            transport: args
                .transport
                .or(file.transport)
                .unwrap_or(TransportKind::Http),
            report_interval: Duration::from_secs(report),
            poll_interval: Duration::from_secs(poll),
            key: args.key.or(file.key).filter(|k| !k.is_empty()),
            crypto_key: args.crypto_key.or(file.crypto_key),
            retries: args.retries.or(file.retries).unwrap_or(DEFAULT_RETRIES),
            backoff_factor: args
                .backoff_factor
                .or(file.backoff_factor)
                .unwrap_or(DEFAULT_BACKOFF_FACTOR),
            proc_path: args
                .proc_path
                .or(file.proc_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROC_PATH)),
            real_ip: args.real_ip.or(file.real_ip),
        })
    }

    /// Address of the server for the selected transport.
    pub fn server_address(&self) -> &str {
        match self.transport {
            TransportKind::Http => &self.address,
            TransportKind::Grpc => &self.grpc_address,
        }
    }
}
