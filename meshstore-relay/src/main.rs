//! Relay service for meshstore peers that cannot reach each other directly

use anyhow::{Context, Result};
use clap::Parser;
use meshstore_core::core_sync::RelayServer;
use meshstore_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use std::net::SocketAddr;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "meshstore-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to accept peer links on
    #[arg(short, long, default_value = "0.0.0.0:7700", env = "MESHSTORE_RELAY_BIND")]
    bind: SocketAddr,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.parse::<LogLevel>().unwrap_or_else(|e| {
        eprintln!("{}, using 'info'", e);
        LogLevel::Info
    });
    init_logging_with_config(LogConfig::new(log_level).json_format(args.json_logs))?;

    let server = RelayServer::bind(args.bind)
        .await
        .with_context(|| format!("binding relay to {}", args.bind))?;
    info!(addr = %server.local_addr()?, "meshstore relay started");

    tokio::select! {
        result = server.run() => result.context("relay accept loop failed")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
