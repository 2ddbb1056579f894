//! acquisition-node: HTTP service for the land-acquisition case ledger
//!
//! Records stage transitions of land-acquisition cases into per-case
//! hash-chained ledgers and serves case status, verification and project
//! views over HTTP/JSON.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use acquisition_node::api::create_router;
use acquisition_node::build_state;
use acquisition_node::config::Config;

#[derive(Parser)]
#[command(name = "acquisition-node")]
#[command(about = "HTTP service for the land-acquisition case ledger")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "acquisition-node.toml", env = "ACQ_CONFIG")]
    config: String,

    /// Listen address (overrides config file)
    #[arg(long, env = "ACQ_BIND_ADDR")]
    bind_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("acquisition_node=info".parse()?)
                .add_directive("acquisition_workflow=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting acquisition-node");
    info!("Config file: {}", cli.config);

    // Load or create default config
    let mut config = if std::path::Path::new(&cli.config).exists() {
        let content = std::fs::read_to_string(&cli.config)?;
        Config::from_toml(&content)?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    // Apply CLI overrides
    if let Some(bind_addr) = cli.bind_addr {
        config.server.bind_addr = bind_addr;
    }

    info!(
        store_timeout_ms = config.engine.store_timeout_ms,
        verify_before_write = config.engine.verify_before_write,
        notifications = config.notifications.enabled,
        "Engine configured"
    );

    let state = Arc::new(build_state(&config));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!("API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
