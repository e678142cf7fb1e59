//! Spinneret daemon: brings up the circuit pool, reports stats, shuts down
//! cleanly on ctrl-c.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use spinneret::config::AppConfig;
use spinneret::pool::CircuitPool;

/// Arachne Spinneret - Circuit Pool Engine
#[derive(Parser, Debug)]
#[command(name = "spinneret")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/spinneret.toml")]
    config: String,

    /// SOCKS port (overrides config)
    #[arg(long, env = "TOR_SOCKS_PORT")]
    socks_port: Option<u16>,

    /// Control port (overrides config)
    #[arg(long, env = "TOR_CONTROL_PORT")]
    control_port: Option<u16>,

    /// Control-port password (overrides config)
    #[arg(long, env = "TOR_CONTROL_CREDENTIAL")]
    control_credential: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("🕸️  Starting Spinneret v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration, CLI/env overrides last
    let mut config = AppConfig::load(&args.config)?;
    if let Some(socks_port) = args.socks_port {
        config.tor.socks_port = socks_port;
    }
    if let Some(control_port) = args.control_port {
        config.tor.control_port = control_port;
    }
    if let Some(credential) = args.control_credential {
        config.tor.control_credential = Some(credential);
    }
    info!("📋 Configuration loaded from {}", args.config);

    // Bring up the circuit pool
    let pool = Arc::new(CircuitPool::new(config.tor.clone(), config.user_agent_pool()));
    pool.start().await?;
    info!(
        socks_port = config.tor.socks_port,
        max_circuits = config.tor.max_circuits,
        "✅ Circuit pool ready"
    );

    // Report stats until shutdown
    let mut ticker = tokio::time::interval(Duration::from_secs(config.stats_interval_secs));
    ticker.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = pool.stats().await;
                info!(
                    total = stats.total_circuits,
                    active = stats.active_circuits,
                    healthy = stats.healthy_circuits,
                    sessions = stats.sessions_cached,
                    "Pool stats"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown signal received");
                break;
            }
        }
    }

    pool.stop().await;
    info!("👋 Spinneret shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
