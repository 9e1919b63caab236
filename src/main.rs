use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roomgate::config::RoomgateConfig;
use roomgate::server::RoomServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Lobby server with per-player message rate limiting.
#[derive(Debug, Parser)]
#[command(name = "roomgate", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to accept players on, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log filter directive, e.g. `debug` or `roomgate=trace`
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref(), args.log_format);

    info!("Starting Roomgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = RoomgateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        message_rules = config.messages.len(),
        "Configuration loaded"
    );

    RoomServer::from_config(&config)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Roomgate stopped");
    Ok(())
}

/// `--log-level` wins over `RUST_LOG`; `info` when neither is set.
fn init_tracing(log_level: Option<&str>, format: LogFormat) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, disconnecting players");
        }
        _ = terminate => {
            info!("Received SIGTERM, disconnecting players");
        }
    }
}
