//! Velora Validator API
//!
//! Serves subnet metric queries over HTTP. Every request selects the
//! most trusted miners, queries them concurrently and returns one answer.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use velora_validator_api::api::{self, Metrics};
use velora_validator_api::{
    FanoutDispatcher, GatewayConfig, PeerIdentity, QueryEngine, SnapshotChain, TcpTransport,
};

/// Velora validator query gateway
#[derive(Parser, Debug)]
#[command(name = "velora-validator-api")]
#[command(author = "Velora Contributors")]
#[command(version)]
#[command(about = "Validator-side query gateway for the Velora subnet", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// HTTP API port
    #[arg(long)]
    api_port: Option<u16>,

    /// Number of miners queried per request
    #[arg(long)]
    top_k: Option<usize>,

    /// Per-miner call timeout in seconds
    #[arg(long)]
    call_timeout: Option<u64>,

    /// Subnet snapshot file
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Validator key (SS58)
    #[arg(long)]
    validator_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into())
        )
        .init();

    info!("🌐 Velora Validator API v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if args.config.exists() {
        GatewayConfig::load(&args.config)?
    } else {
        warn!("Config file {:?} not found, using defaults", args.config);
        GatewayConfig::default()
    };

    // Override config with CLI args
    let config = config
        .with_api_port(args.api_port)
        .with_top_k(args.top_k)
        .with_call_timeout(args.call_timeout)
        .with_chain_snapshot(args.snapshot)
        .with_validator_key(args.validator_key);

    config.validate()?;

    info!("⚙️  Configuration:");
    info!("   Subnet: {}", config.netuid);
    info!("   Top-K miners: {}", config.top_k);
    info!("   Call timeout: {}s", config.call_timeout_secs);
    info!("   Max concurrent calls: {}", config.max_concurrent_calls);
    info!("   Selection policy: {:?}", config.selection_policy);

    let own_identity = PeerIdentity::new(config.validator_key.clone());

    let chain =
        SnapshotChain::load(&config.chain_snapshot, config.netuid, own_identity.clone())?;

    let transport =
        TcpTransport::new(own_identity).with_max_message_size(config.max_response_bytes);
    let dispatcher = FanoutDispatcher::new(Arc::new(transport), config.max_concurrent_calls);

    let engine = Arc::new(QueryEngine::new(
        Arc::new(chain),
        dispatcher,
        config.selection_policy.build(),
        config.top_k,
        config.call_timeout(),
    ));

    let metrics = Arc::new(Metrics::new());
    let shared_config = Arc::new(config);

    let api_handle = tokio::spawn(api::run_api_server(shared_config, engine, metrics));

    info!("✅ Gateway started");
    info!("   Press Ctrl+C to shutdown gracefully");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => warn!("HTTP API exited"),
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(e.into()),
            }
        }
    }

    info!("👋 Velora Validator API shutting down");
    Ok(())
}
