//! pyexpl-daemon - Serves bounded sandboxed executions over a Unix socket
//!
//! Every request runs one jailed subprocess supervised on its own blocking
//! thread; the runner registry and sandbox policy are shared read-only.

use anyhow::Result;
use clap::Parser;
use pyexpl_core::Executor;
use std::path::PathBuf;
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

mod config;
mod server;
mod stats;

use config::DaemonConfig;

#[derive(Parser)]
#[command(name = "pyexpl-daemon")]
#[command(author, version, about = "Bounded sandboxed execution daemon")]
struct Args {
    /// Configuration file (defaults to PYEXPL_CONFIG, then built-in defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket path, overrides the configuration file
    #[arg(short, long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pyexpl=info".parse()?))
        .init();

    tracing::info!("pyexpl-daemon starting");

    let args = Args::parse();
    let mut config = DaemonConfig::load(args.config.as_deref())?;
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }

    // Duplicate runner ids abort startup here.
    let executor = Executor::from_settings(config.settings.clone())?;
    tracing::info!(
        runners = executor.registry().len(),
        launcher = %config.settings.sandbox.launcher.display(),
        ceiling = config.settings.limits.max_output_bytes,
        socket = ?config.socket_path,
        "configuration loaded"
    );

    // Create socket directory if needed
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Remove existing socket
    let _ = std::fs::remove_file(&config.socket_path);

    let listener = UnixListener::bind(&config.socket_path)?;
    tracing::info!(socket = ?config.socket_path, "listening");

    let mut terminate = signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    };

    server::run(listener, server::State::new(executor), shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let _ = std::fs::remove_file(&config.socket_path);
    tracing::info!("pyexpl-daemon stopped");
    Ok(())
}
