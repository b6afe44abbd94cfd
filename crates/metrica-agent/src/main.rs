//! metrica-agent - host metrics agent.
//!
//! Samples `/proc` and jemalloc statistics on a poll interval and delivers
//! the coalesced batches to the metrica server over HTTP or gRPC on a
//! report interval.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod config;
mod jemalloc;

use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(target_os = "linux")]
use metrica_core::collector::RealFs;
#[cfg(not(target_os = "linux"))]
use metrica_core::collector::mock::MockFs;
use metrica_core::collector::Sampler;
use metrica_core::envelope::{Encryptor, Sealer, Signer};
use metrica_core::net::outbound_ip;
use metrica_core::pipeline::{channel_capacity, run_reporter, run_sampler};
use metrica_core::retry::RetrySchedule;
use metrica_core::transport::{GrpcTransport, HttpTransport, RetryingTransport, Transport};

use config::{AgentConfig, Args, TransportKind};
use jemalloc::JemallocProbe;

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = match AgentConfig::resolve(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %format!("{e:#}"), "invalid configuration");
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(async_main(config)) {
        error!(error = %format!("{e:#}"), "agent failed");
        process::exit(1);
    }
}

/// Initializes the tracing subscriber. Default level is INFO, `-q` leaves
/// errors only. `RUST_LOG` is still honoured for other targets.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["metrica_agent", "metrica_core"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn async_main(config: AgentConfig) -> Result<()> {
    info!(
        version = metrica_core::VERSION,
        server = config.server_address(),
        transport = ?config.transport,
        poll_secs = config.poll_interval.as_secs(),
        report_secs = config.report_interval.as_secs(),
        "starting metrica-agent"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let transport = RetryingTransport::new(
        build_transport(&config)?,
        RetrySchedule::linear(config.retries, config.backoff_factor),
        cancel.clone(),
    );

    #[cfg(target_os = "linux")]
    let fs = RealFs::new();
    #[cfg(not(target_os = "linux"))]
    let fs = {
        warn!("not running on linux, sampling a mock /proc");
        MockFs::typical_system()
    };
    let sampler = Sampler::new(fs, &config.proc_path, Box::new(JemallocProbe));
    let ticks = sampler.tick_counter();

    let (tx, rx) = mpsc::channel(channel_capacity(
        config.poll_interval,
        config.report_interval,
    ));
    let sampling = tokio::spawn(run_sampler(
        sampler,
        config.poll_interval,
        tx,
        cancel.clone(),
    ));
    let reporting = tokio::spawn(run_reporter(
        transport,
        config.report_interval,
        rx,
        cancel.clone(),
    ));

    let (sampled, reported) = tokio::join!(sampling, reporting);
    sampled.context("sampler task failed")?;
    reported.context("reporter task failed")?;

    info!(
        ticks = ticks.load(std::sync::atomic::Ordering::Relaxed),
        "metrica-agent stopped"
    );
    Ok(())
}

fn build_transport(config: &AgentConfig) -> Result<Box<dyn Transport>> {
    let signer = config.key.as_deref().map(|k| Signer::new(k.as_bytes()));

    let real_ip = config.real_ip.clone().or_else(|| {
        let ip = outbound_ip(config.server_address()).map(|ip| ip.to_string());
        if ip.is_none() {
            warn!(server = config.server_address(), "could not detect outbound address");
        }
        ip
    });

    let transport: Box<dyn Transport> = match config.transport {
        TransportKind::Http => {
            let mut sealer = Sealer::new();
            if let Some(signer) = signer {
                sealer = sealer.with_signer(signer);
            }
            if let Some(path) = &config.crypto_key {
                let pem = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read public key {}", path.display()))?;
                let encryptor = Encryptor::from_pem(&pem)
                    .with_context(|| format!("invalid public key {}", path.display()))?;
                sealer = sealer.with_encryptor(encryptor);
            }
            Box::new(HttpTransport::new(&config.address, sealer, real_ip)?)
        }
        TransportKind::Grpc => {
            if config.crypto_key.is_some() {
                warn!("payload encryption applies to HTTP only, ignoring crypto key");
            }
            Box::new(GrpcTransport::connect_lazy(
                &config.grpc_address,
                signer,
                real_ip,
            )?)
        }
    };
    Ok(transport)
}

/// Cancels `cancel` on SIGINT or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                info!("received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received SIGINT");
    }

    cancel.cancel();
}
