use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relayd::config::Config;
use relayd::session::SessionRegistry;
use relayd::store::file::{FileAuthStore, FileHistoryStore};
use relayd::transport::SubprocessTransportFactory;

// ============================================================================
// CLI Types
// ============================================================================

/// relayd - keeps messaging transport sessions connected
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "relayd.yaml")]
    config: PathBuf,

    /// Session to initialize at startup (repeatable; overrides config file)
    #[arg(short, long = "session", value_name = "SESSION_ID")]
    sessions: Vec<String>,
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let registry = build_registry(&config, &cli.config);

    let bootstrap = if cli.sessions.is_empty() {
        config.sessions.bootstrap.clone()
    } else {
        cli.sessions
    };
    bootstrap_sessions(&registry, &bootstrap).await;

    shutdown_signal().await;
    registry.shutdown().await;
    Ok(())
}

fn build_registry(config: &Config, config_path: &Path) -> SessionRegistry {
    let auth_dir = config.auth_dir(config_path);
    let history_path = config.history_path(config_path);
    info!(
        auth_dir = %auth_dir.display(),
        history = %history_path.display(),
        bridge = %config.transport.command,
        "Starting relayd"
    );

    let auth = Arc::new(FileAuthStore::new(auth_dir, config.reset_policy()));
    let history = Arc::new(FileHistoryStore::new(history_path));
    let factory = Arc::new(SubprocessTransportFactory::new(
        config.bridge_config(config_path),
    ));

    SessionRegistry::new(factory, auth, config.session_settings()).with_history(history)
}

/// Initialize every startup session concurrently. Failures are logged; the
/// reconnect scheduler keeps retrying sessions that did start an attempt.
async fn bootstrap_sessions(registry: &SessionRegistry, ids: &[String]) {
    let results = join_all(ids.iter().map(|id| async move {
        (id, registry.initialize(id).await)
    }))
    .await;

    for (id, result) in results {
        match result {
            Ok(outcome) => info!(session_id = %id, outcome = ?outcome, "Bootstrapped session"),
            Err(e) => warn!(session_id = %id, error = %e, "Failed to bootstrap session"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
