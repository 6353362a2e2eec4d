//! vigild — the Vigil daemon.
//!
//! Health-checks the services configured in vigil.toml, accepts live
//! registrations from short-lived services on a local TCP socket, and
//! reports up/down status to the configured reporter backend.
//!
//! # Usage
//!
//! ```text
//! vigild run --config /etc/vigil.toml
//! vigild run --config vigil.toml --status-file /run/vigil/status.json
//! vigild check-config --config vigil.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use vigil_agent::{Coordinator, RegistrationServer};
use vigil_core::Config;
use vigil_reporter::{FileReporter, LogReporter, Reporter};

#[derive(Parser)]
#[command(name = "vigild", about = "Vigil service registration daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Run {
        /// Path to the configuration file.
        #[arg(long, default_value = "vigil.toml")]
        config: PathBuf,

        /// Maintain a JSON status table at this path instead of
        /// logging status transitions.
        #[arg(long)]
        status_file: Option<PathBuf>,
    },
    /// Validate a configuration file and exit.
    CheckConfig {
        /// Path to the configuration file.
        #[arg(long, default_value = "vigil.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vigild=debug,vigil=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            status_file,
        } => run(config, status_file).await,
        Command::CheckConfig { config } => check_config(config),
    }
}

async fn run(config_path: PathBuf, status_file: Option<PathBuf>) -> anyhow::Result<()> {
    // A bad configuration aborts right here, before anything starts.
    let config = Config::from_file(&config_path)?;
    info!(
        instance_id = %config.instance_id,
        services = config.services.len(),
        "vigil starting up"
    );

    let reporter: Arc<dyn Reporter> = match status_file {
        Some(path) => {
            info!(path = ?path, "reporting status to file");
            Arc::new(FileReporter::new(path))
        }
        None => Arc::new(LogReporter::new()),
    };

    let coordinator = Arc::new(Coordinator::new(&config, reporter)?);
    let server = RegistrationServer::bind(coordinator.clone(), config.listen_port).await?;

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("termination signal received");
        let _ = signal_tx.send(true);
    });

    // ── Run ────────────────────────────────────────────────────
    let server_handle = tokio::spawn(server.run(shutdown_rx.clone()));

    let result = coordinator.run(shutdown_rx).await;

    // Whatever ended the tick loop, take the listener down too.
    let _ = shutdown_tx.send(true);
    let _ = server_handle.await;

    info!("vigil exiting");
    result
}

fn check_config(config_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::from_file(&config_path)?;
    println!(
        "{}: ok ({} static services, listen port {}, ephemeral expiry {}s)",
        config_path.display(),
        config.services.len(),
        config.listen_port,
        config.ephemeral_service_expiry
    );
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
