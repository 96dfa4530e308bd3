//! swift-agentd - Main entry point.
//!
//! Binds the agent socket, loads the configuration and serves requests until
//! interrupted. The socket is removed on the way out.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::signal::unix::{signal, SignalKind};

use swift_agentd::{
    default_socket_path, Daemon, FileConfigLoader, ManualSocketProvider, SessionManager,
};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Credential caching agent for Swift object storage.
#[derive(Parser)]
#[command(name = "swift-agentd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file [default: layered search, see swift-agent docs]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Path to Unix socket [default: $XDG_RUNTIME_DIR/swift-agent/socket]
    #[arg(short, long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Increase log verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only show errors
    #[arg(short, long)]
    quiet: bool,
}

fn setup_logging(level: &str) {
    // RUST_LOG wins over the CLI flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // JOURNAL_STREAM is set when stderr goes to the journal
    if std::env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(journald_layer)
                .with(filter)
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    setup_logging(log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting swift-agentd");

    if let Some(path) = &cli.config {
        info!(path = %path.display(), "Loading configuration from specified path");
    }
    let session = SessionManager::new(Box::new(FileConfigLoader::new(cli.config.clone())))
        .context("Failed to load configuration")?;
    let settings = session.settings().await;

    let socket_path = cli.socket.unwrap_or_else(default_socket_path);
    let provider = ManualSocketProvider::new(&socket_path).with_backlog(settings.backlog);
    let daemon = Daemon::new(provider, session);

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    let result = tokio::select! {
        result = daemon.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
            Ok(())
        }
        _ = terminate.recv() => {
            info!("Received SIGTERM, shutting down");
            Ok(())
        }
    };

    if let Err(e) = std::fs::remove_file(&socket_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %socket_path.display(), error = %e, "Failed to remove socket");
        }
    }

    if let Err(e) = &result {
        error!(error = %e, "Daemon error");
    }
    result
}
