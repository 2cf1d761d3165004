//! Teleporter Operator Service
//!
//! Long-running operator process that follows the validator manager and the
//! token remote contracts and keeps local validator and bridge state in sync
//! with the chain.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: This service holds the operator key that owns the validator
//! manager. Ensure proper key management and access controls for production use.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use teleporter_client::config::Config;
use teleporter_client::crypto::CryptoService;
use teleporter_client::evm_client::{ChainClient, EvmClient};
use teleporter_client::{
    EventMonitor, EventWatcher, SignatureAggregator, TokenBridgeClient, ValidatorLifecycle,
};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file
/// 3. Builds the chain client, aggregator, lifecycle and bridge clients
/// 4. Runs the event monitor until shutdown
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Teleporter Operator Service");

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("Teleporter Operator Service");
        println!();
        println!("Usage: teleporter-operator [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>      Use custom config file path");
        println!("  --from-block <n>     First block to follow (default: current head)");
        println!("  --help, -h           Show this help message");
        println!();
        println!("Environment variables:");
        println!("  TELEPORTER_CLIENT_CONFIG_PATH    Path to config file (overrides --config)");
        return Ok(());
    }

    let mut config_path = None;
    let mut from_block = None;

    let mut i = 1; // Skip program name
    while i < args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            i += 1;
        } else if args[i] == "--from-block" && i + 1 < args.len() {
            from_block = Some(args[i + 1].parse::<u64>()?);
            i += 1;
        }
        i += 1;
    }

    if let Some(path) = config_path {
        if std::env::var("TELEPORTER_CLIENT_CONFIG_PATH").is_err() {
            std::env::set_var("TELEPORTER_CLIENT_CONFIG_PATH", &path);
        }
        info!("Using custom config: {}", path);
    }

    let config = Config::load()?;
    info!("Configuration loaded for chain {}", config.chain.name);

    let crypto_service = CryptoService::new(&config.operator)?;
    let client: Arc<dyn ChainClient> = Arc::new(EvmClient::new(
        &config.chain.rpc_url,
        config.chain.evm_chain_id,
        crypto_service,
    )?);
    let watcher = EventWatcher::new(
        client.clone(),
        config.wait.clone(),
        config.operator.log_block_range,
    );

    let aggregator = Arc::new(SignatureAggregator::from_config(&config.aggregator)?);
    let lifecycle = Arc::new(ValidatorLifecycle::from_config(
        watcher.clone(),
        aggregator,
        &config,
    )?);
    let bridge = TokenBridgeClient::from_config(watcher.clone(), &config)?.map(Arc::new);

    if let Some(bridge) = &bridge {
        let collateralized = bridge.refresh_collateral().await?;
        info!(
            "Token remote {:?} loaded (collateralized: {})",
            bridge.address(),
            collateralized
        );
    }

    let start = match from_block {
        Some(block) => block,
        None => client.get_block_number().await?,
    };
    info!("Following contract events from block {}", start);

    let monitor = EventMonitor::new(watcher, lifecycle, bridge, &config.operator, start);
    monitor.run().await
}
