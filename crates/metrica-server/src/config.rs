//! Server configuration: flags, environment, JSON config file, defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use metrica_core::net::TrustedSubnet;

const DEFAULT_ADDRESS: &str = "localhost:8080";
const DEFAULT_STORE_INTERVAL: u64 = 300;
const DEFAULT_FILE_STORAGE_PATH: &str = "metrics-db.json";
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_FACTOR: u64 = 2;
const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 10;

#[derive(Parser, Debug, Default)]
#[command(name = "metrica-server", about = "metrica ingestion server", version = metrica_core::VERSION)]
pub(crate) struct Args {
    /// HTTP listen address.
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub(crate) address: Option<String>,

    /// gRPC listen address. gRPC is disabled when unset.
    #[arg(long, env = "GRPC_ADDRESS")]
    pub(crate) grpc_address: Option<String>,

    /// Seconds between snapshot saves (0 saves after every write).
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    pub(crate) store_interval: Option<u64>,

    /// Snapshot file of the in-memory store.
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    pub(crate) file_storage_path: Option<PathBuf>,

    /// Load the snapshot file at startup.
    #[arg(short = 'r', long, env = "RESTORE", action = clap::ArgAction::Set)]
    pub(crate) restore: Option<bool>,

    /// PostgreSQL connection string. Selects the database backend.
    #[arg(short = 'd', long, env = "DATABASE_DSN", hide_env_values = true)]
    pub(crate) database_dsn: Option<String>,

    /// Pre-shared key for HashSHA256 signatures.
    #[arg(short = 'k', long, env = "KEY", hide_env_values = true)]
    pub(crate) key: Option<String>,

    /// PEM file with the RSA private key for encrypted bodies.
    #[arg(long, env = "CRYPTO_KEY")]
    pub(crate) crypto_key: Option<PathBuf>,

    /// Only accept agents whose X-Real-IP is inside this CIDR.
    #[arg(short = 't', long, env = "TRUSTED_SUBNET")]
    pub(crate) trusted_subnet: Option<String>,

    /// Attempts per storage call.
    #[arg(long, env = "RETRIES")]
    pub(crate) retries: Option<u32>,

    /// Multiplier of the linear backoff between attempts.
    #[arg(long, env = "BACKOFF_FACTOR")]
    pub(crate) backoff_factor: Option<u64>,

    /// Seconds to wait for in-flight requests on shutdown.
    #[arg(long, env = "SHUTDOWN_TIMEOUT")]
    pub(crate) shutdown_timeout: Option<u64>,

    /// JSON config file.
    #[arg(short = 'c', long, env = "CONFIG")]
    pub(crate) config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    pub(crate) quiet: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    address: Option<String>,
    grpc_address: Option<String>,
    store_interval: Option<u64>,
    file_storage_path: Option<PathBuf>,
    restore: Option<bool>,
    database_dsn: Option<String>,
    key: Option<String>,
    crypto_key: Option<PathBuf>,
    trusted_subnet: Option<String>,
    retries: Option<u32>,
    backoff_factor: Option<u64>,
    shutdown_timeout: Option<u64>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerConfig {
    pub(crate) address: String,
    pub(crate) grpc_address: Option<String>,
    /// Zero means save after every write.
    pub(crate) store_interval: Duration,
    pub(crate) file_storage_path: PathBuf,
    pub(crate) restore: bool,
    pub(crate) database_dsn: Option<String>,
    pub(crate) key: Option<String>,
    pub(crate) crypto_key: Option<PathBuf>,
    pub(crate) trusted_subnet: Option<TrustedSubnet>,
    pub(crate) retries: u32,
    pub(crate) backoff_factor: u64,
    pub(crate) shutdown_timeout: Duration,
}

impl ServerConfig {
    pub(crate) fn resolve(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let trusted_subnet = args
            .trusted_subnet
            .or(file.trusted_subnet)
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<TrustedSubnet>())
            .transpose()?;

        Ok(Self {
            address: args
                .address
                .or(file.address)
                .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            grpc_address: args
                .grpc_address
                .or(file.grpc_address)
                .filter(|a| !a.is_empty()),
            store_interval: Duration::from_secs(
                args.store_interval
                    .or(file.store_interval)
                    .unwrap_or(DEFAULT_STORE_INTERVAL),
            ),
            file_storage_path: args
                .file_storage_path
                .or(file.file_storage_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FILE_STORAGE_PATH)),
            restore: args.restore.or(file.restore).unwrap_or(true),
            database_dsn: args
                .database_dsn
                .or(file.database_dsn)
                .filter(|d| !d.is_empty()),
            key: args.key.or(file.key).filter(|k| !k.is_empty()),
            crypto_key: args.crypto_key.or(file.crypto_key),
            trusted_subnet,
            retries: args.retries.or(file.retries).unwrap_or(DEFAULT_RETRIES),
            backoff_factor: args
                .backoff_factor
                .or(file.backoff_factor)
                .unwrap_or(DEFAULT_BACKOFF_FACTOR),
            shutdown_timeout: Duration::from_secs(
                args.shutdown_timeout
                    .or(file.shutdown_timeout)
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::resolve(Args::default()).unwrap();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.grpc_address, None);
        assert_eq!(config.store_interval, Duration::from_secs(300));
        assert_eq!(config.file_storage_path, PathBuf::from("metrics-db.json"));
        assert!(config.restore);
        assert_eq!(config.database_dsn, None);
        assert_eq!(config.trusted_subnet, None);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_precedence() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"store_interval": 0, "restore": false, "address": "file:1",
                 "trusted_subnet": "10.0.0.0/8", "whatever": [1, 2]}}"#
        )
        .unwrap();

        let args = Args::try_parse_from([
            "metrica-server",
            "-a",
            "0.0.0.0:9090",
            "-c",
            file.path().to_str().unwrap(),
        ])
        .unwrap();
        let config = ServerConfig::resolve(args).unwrap();

        assert_eq!(config.address, "0.0.0.0:9090");
        assert_eq!(config.store_interval, Duration::ZERO);
        assert!(!config.restore);
        assert_eq!(
            config.trusted_subnet,
            Some("10.0.0.0/8".parse().unwrap())
        );
    }

    #[test]
    fn test_restore_flag_takes_value() {
        let args = Args::try_parse_from(["metrica-server", "-r", "false"]).unwrap();
        assert_eq!(args.restore, Some(false));
    }

    #[test]
    fn test_invalid_subnet() {
        let args = Args {
            trusted_subnet: Some("10.0.0.0/40".into()),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(args).is_err());
    }
}
