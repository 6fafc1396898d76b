//! `runbox` application entry point.
//!
//! This binary serves the sandboxed snippet-execution HTTP API. It uses
//! `eyre` for opaque error handling at the application boundary, converting
//! domain-specific errors into human-readable reports.
//!
//! Configuration is loaded with layered precedence via `OrthoConfig`:
//! 1. Application defaults
//! 2. Configuration file (`~/.config/runbox/config.toml` or path from `RUNBOX_CONFIG_PATH`)
//! 3. Environment variables (`RUNBOX_*`)
//! 4. Command-line arguments

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use eyre::{Report, Result as EyreResult, WrapErr};
use mockable::DefaultEnv;
use tracing_subscriber::EnvFilter;

use runbox::broker::Broker;
use runbox::config::{AppConfig, Cli, Commands, ServeArgs, load_config};
use runbox::engine::{EngineConnector, SocketResolver};
use runbox::server::{self, AppState};
use runbox::service::RunService;
use runbox::snippets::SnippetStore;
use runbox::uidpool::UidPool;

/// Application entry point.
///
/// Loads configuration with layered precedence via `OrthoConfig`, then
/// dispatches to the appropriate subcommand handler.
///
/// Uses `eyre::Result` as the return type to provide human-readable error
/// reports with backtraces when available.
#[tokio::main]
async fn main() -> EyreResult<()> {
    init_tracing();

    // Parse CLI first (for subcommand dispatch and global options).
    let cli = Cli::parse();

    // Load configuration with layered precedence: defaults < file < env < CLI.
    let config = load_config(&cli).map_err(Report::from)?;

    match &cli.command {
        Commands::Serve(args) => serve_api(&config, args).await,
        Commands::Check => check_engine(&config).await,
    }
}

/// Install the global tracing subscriber.
///
/// Honours `RUST_LOG` when set; defaults to info-level service logs.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("runbox=info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolve the engine socket from configuration and environment.
fn resolve_socket(config: &AppConfig) -> String {
    let env = DefaultEnv::new();
    let resolver = SocketResolver::new(&env);
    EngineConnector::resolve_socket(config.engine_socket.as_deref(), &resolver)
}

/// Serve the snippet-execution HTTP API.
async fn serve_api(config: &AppConfig, args: &ServeArgs) -> EyreResult<()> {
    let socket = resolve_socket(config);
    let docker = EngineConnector::connect_and_verify(&socket)
        .await
        .wrap_err_with(|| format!("engine is not reachable at {socket}"))?;
    tracing::info!(socket, "connected to container engine");

    let uid_pool = Arc::new(UidPool::new(config.uids.lower, config.uids.upper));
    tracing::info!(
        lower = config.uids.lower,
        upper = config.uids.upper,
        isolation = config.uids.isolation,
        "uid pool ready"
    );

    let service = RunService::new(
        Arc::new(docker),
        uid_pool,
        Arc::new(Broker::new()),
        config.sandbox_limits(),
        config.uids.isolation,
    );
    let state = Arc::new(AppState {
        service,
        snippets: SnippetStore::new(),
        run_timeout: config.run_timeout(),
    });

    let addr_value = args.listen.clone().unwrap_or_else(|| config.listen.addr.clone());
    let addr: SocketAddr = addr_value
        .parse()
        .wrap_err_with(|| format!("invalid listen address '{addr_value}'"))?;

    server::serve(state, addr, shutdown_signal())
        .await
        .wrap_err("HTTP server failed")
}

/// Verify the container engine is reachable and responsive.
async fn check_engine(config: &AppConfig) -> EyreResult<()> {
    let socket = resolve_socket(config);
    EngineConnector::connect_and_verify(&socket)
        .await
        .wrap_err_with(|| format!("engine is not reachable at {socket}"))?;
    tracing::info!(socket, "container engine is healthy");
    Ok(())
}

/// Resolve when the process receives ctrl-c.
async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to install ctrl-c handler");
    }
}
