mod config;
mod grpc;
mod handlers;
mod middleware;
mod openapi;
mod state;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use metrica_core::envelope::{Decryptor, Opener, Signer};
use metrica_core::persistence::PersistenceScheduler;
use metrica_core::retry::RetrySchedule;
use metrica_core::service::MetricsService;
use metrica_core::storage::{FileSnapshotStore, MemoryRepository, PostgresRepository, Repository};

use config::{Args, ServerConfig};
use grpc::MetricsGrpc;
use state::AppState;

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = match ServerConfig::resolve(args) {
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
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(async_main(config)) {
        error!(error = %format!("{e:#}"), "server failed");
        process::exit(1);
    }
}

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
    for target in ["metrica_server", "metrica_core"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn async_main(config: ServerConfig) -> Result<()> {
    info!(
        version = metrica_core::VERSION,
        address = %config.address,
        grpc_address = config.grpc_address.as_deref().unwrap_or("-"),
        "starting metrica-server"
    );

    // `shutdown` stops accepting traffic; `abort` additionally cancels
    // in-flight storage retries once the drain timeout runs out.
    let shutdown = CancellationToken::new();
    let abort = CancellationToken::new();
    let schedule = RetrySchedule::linear(config.retries, config.backoff_factor);

    let repo: Arc<dyn Repository> = match &config.database_dsn {
        Some(dsn) => Arc::new(
            PostgresRepository::connect(dsn.clone(), &schedule, &abort)
                .await
                .context("failed to initialise postgres storage")?,
        ),
        None => Arc::new(MemoryRepository::new()),
    };
    let snapshots_supported = repo.snapshots().is_some();

    let mut service = MetricsService::new(repo, schedule, abort.clone());
    if snapshots_supported {
        let file = FileSnapshotStore::new(&config.file_storage_path);
        service = service.with_snapshot_file(file, config.store_interval.is_zero());
    }
    let service = Arc::new(service);
    info!(backend = service.backend(), "storage ready");

    if snapshots_supported && config.restore {
        if let Err(e) = service.restore().await {
            warn!(error = %e, path = %config.file_storage_path.display(), "restore failed, starting empty");
        }
    }

    let persistence: Option<JoinHandle<()>> =
        (snapshots_supported && !config.store_interval.is_zero()).then(|| {
            let scheduler = PersistenceScheduler::new(service.clone(), config.store_interval);
            tokio::spawn(scheduler.run(shutdown.clone()))
        });

    let opener = build_opener(&config)?;
    let signer = opener.signer().cloned();
    let state = AppState::new(service.clone(), opener, config.trusted_subnet);

    let app = handlers::router(state).into_make_service_with_connect_info::<SocketAddr>();
    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;
    info!(addr = %listener.local_addr()?, "HTTP listening");

    let http = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        })
    };

    let grpc = match &config.grpc_address {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind gRPC {addr}"))?;
            info!(addr = %listener.local_addr()?, "gRPC listening");
            let service = MetricsGrpc::new(service.clone(), signer, config.trusted_subnet);
            Some(tokio::spawn(grpc::serve(listener, service, shutdown.clone())))
        }
        None => None,
    };

    wait_for_shutdown_signal().await;

    // Phase one: stop accepting, wait for in-flight requests.
    shutdown.cancel();
    let drain = async {
        if let Err(e) = http.await.context("HTTP server task failed")? {
            error!(error = %e, "HTTP server error");
        }
        if let Some(grpc) = grpc {
            if let Err(e) = grpc.await.context("gRPC server task failed")? {
                error!(error = %e, "gRPC server error");
            }
        }
        anyhow::Ok(())
    };
    match tokio::time::timeout(config.shutdown_timeout, drain).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(
                timeout_secs = config.shutdown_timeout.as_secs(),
                "in-flight requests did not finish in time"
            );
            abort.cancel();
        }
    }

    // Phase two: final snapshot.
    if let Some(persistence) = persistence {
        persistence.await.context("persistence task failed")?;
    }
    if snapshots_supported {
        match service.save().await {
            Ok(()) => info!(path = %config.file_storage_path.display(), "final snapshot saved"),
            Err(e) => error!(error = %e, "final snapshot save failed"),
        }
    }

    info!("metrica-server stopped");
    Ok(())
}

fn build_opener(config: &ServerConfig) -> Result<Opener> {
    let mut opener = Opener::new();
    if let Some(key) = &config.key {
        opener = opener.with_signer(Signer::new(key.as_bytes()));
    }
    if let Some(path) = &config.crypto_key {
        let pem = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read private key {}", path.display()))?;
        let decryptor = Decryptor::from_pem(&pem)
            .with_context(|| format!("invalid private key {}", path.display()))?;
        opener = opener.with_decryptor(decryptor);
    }
    Ok(opener)
}

/// Waits for SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() {
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
}
