//! SOCKS5 proxy server binary

use anyhow::{Context, Result};
use clap::Parser;
use socks_proxy::{ProxyConfig, ProxyServer};
use std::path::PathBuf;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "socks-proxy",
    about = "Minimal SOCKS5 proxy server",
    version = env!("CARGO_PKG_VERSION"),
    long_about = "SOCKS5 proxy supporting the CONNECT command with IPv4 and domain-name \
                  destinations and no authentication."
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SOCKS_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:1080 (overrides the config file)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// Listen port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ProxyConfig::load_from_file(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind.clone() {
        config.bind = Some(bind);
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    setup_logging(&cli, &config.log_level)?;

    let server = ProxyServer::bind(config)
        .await
        .context("Failed to start SOCKS5 listener")?;

    let metrics = server.metrics().clone();
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let result = server.serve_with_shutdown(shutdown).await;

    match metrics.export() {
        Ok(text) => debug!("Final metrics:\n{}", text),
        Err(e) => error!("Failed to export metrics: {}", e),
    }

    if let Err(e) = &result {
        error!("Listener failed, exiting: {}", e);
    }
    result.context("SOCKS5 listener failed")
}

/// `RUST_LOG` wins, then the command-line flags, then the config file
fn setup_logging(cli: &Cli, config_level: &str) -> Result<()> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        config_level
    };

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level: {}", level))?,
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
