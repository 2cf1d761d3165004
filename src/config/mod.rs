//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the Teleporter
//! operator client. Configuration includes the chain endpoint, deployed contract
//! addresses, validator manager settings, token remote settings, the validator
//! set used for signature aggregation, and polling/timeout parameters.
//!
//! Contract addresses are injected here rather than compiled in, so one binary
//! can target any deployment.

use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::evm_client::WaitConfig;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chain the contracts are deployed on
    pub chain: ChainConfig,
    /// Deployed contract addresses
    pub contracts: ContractsConfig,
    /// Validator manager settings (mirrors the on-chain initialization settings)
    pub validator_manager: ValidatorManagerConfig,
    /// Token remote settings (optional, only needed for bridging)
    #[serde(default)]
    pub token_remote: Option<TokenRemoteConfig>,
    /// Operator key and loop settings
    pub operator: OperatorConfig,
    /// Signature aggregation settings and validator sets
    pub aggregator: AggregatorConfig,
    /// Polling intervals and timeouts for transaction waits
    #[serde(default)]
    pub wait: WaitConfig,
}

/// Configuration for the EVM chain connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// EVM chain ID (EIP-155)
    pub evm_chain_id: u64,
    /// 32-byte blockchain ID used in warp messages
    pub blockchain_id: H256,
    /// Network ID used in warp message envelopes
    pub network_id: u32,
}

/// Deployed contract addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// ValidatorManager contract
    pub validator_manager: Address,
    /// TokenRemote contract (optional)
    #[serde(default)]
    pub token_remote: Option<Address>,
}

/// Validator manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorManagerConfig {
    /// Blockchain ID of the P-chain (source of registration acknowledgments)
    pub p_chain_blockchain_id: H256,
    /// Subnet managed by this validator manager
    pub subnet_id: H256,
    /// Maximum percentage of total weight that may churn per hour (1..=100)
    pub maximum_hourly_churn: u8,
    /// Subnet whose validators sign acknowledgments (primary network by default)
    #[serde(default)]
    pub signing_subnet_id: H256,
}

/// Kind of asset a token remote represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Native gas token of the remote chain (NativeTokenRemote)
    Native,
    /// ERC20 token (ERC20TokenRemote)
    Erc20,
}

/// Token remote settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRemoteConfig {
    pub token_kind: TokenKind,
    pub teleporter_registry_address: Address,
    pub teleporter_manager: Address,
    pub min_teleporter_version: u64,
    pub token_home_blockchain_id: H256,
    pub token_home_address: Address,
    pub token_home_decimals: u8,
    /// Decimals of the remote token (18 for native remotes)
    #[serde(default = "default_remote_decimals")]
    pub token_remote_decimals: u8,
    /// Unbacked supply minted at genesis for native remotes
    #[serde(default)]
    pub initial_reserve_imbalance: U256,
}

fn default_remote_decimals() -> u8 {
    18
}

/// Operator configuration.
///
/// The private key is loaded from an environment variable at runtime.
/// The config file contains the environment variable name, not the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Environment variable name containing the secp256k1 private key (hex)
    /// Default: "TELEPORTER_OPERATOR_PRIVATE_KEY"
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    /// Polling interval for the event monitor in milliseconds
    pub polling_interval_ms: u64,
    /// Number of monitor polls between full re-syncs of validation records
    #[serde(default = "default_resync_interval_polls")]
    pub resync_interval_polls: u64,
    /// Maximum block range per eth_getLogs query
    #[serde(default = "default_log_block_range")]
    pub log_block_range: u64,
}

fn default_private_key_env() -> String {
    "TELEPORTER_OPERATOR_PRIVATE_KEY".to_string()
}

fn default_resync_interval_polls() -> u64 {
    30
}

fn default_log_block_range() -> u64 {
    10
}

impl OperatorConfig {
    /// Loads the private key from the environment variable.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The private key (hex encoded)
    /// * `Err(anyhow::Error)` - Failed to load from environment
    pub fn get_private_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.private_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable '{}' not set. Please set it with your secp256k1 private key (hex encoded).",
                self.private_key_env
            )
        })
    }
}

/// Signature aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Percentage of total stake weight required for a valid aggregate (1..=100)
    #[serde(default = "default_quorum_percentage")]
    pub quorum_percentage: u8,
    /// Timeout for a single validator signature request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Timeout for a whole aggregation round in milliseconds
    #[serde(default = "default_aggregation_timeout_ms")]
    pub aggregation_timeout_ms: u64,
    /// Known validator sets, one per subnet
    #[serde(default)]
    pub validator_sets: Vec<ValidatorSetConfig>,
}

fn default_quorum_percentage() -> u8 {
    67
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_aggregation_timeout_ms() -> u64 {
    20_000
}

/// Validators of one subnet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSetConfig {
    pub subnet_id: H256,
    pub validators: Vec<ValidatorEndpointConfig>,
}

/// A validator that can be asked for warp signature shares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorEndpointConfig {
    pub node_id: H256,
    /// Compressed BLS public key (48 bytes, hex encoded)
    pub bls_public_key: String,
    pub weight: u64,
    /// JSON-RPC endpoint serving warp_getMessageSignature
    pub endpoint: String,
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates value ranges and URLs.
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - First invalid setting found
    pub fn validate(&self) -> anyhow::Result<()> {
        Url::parse(&self.chain.rpc_url).map_err(|e| {
            anyhow::anyhow!("Configuration error: invalid rpc_url '{}': {}", self.chain.rpc_url, e)
        })?;

        let churn = self.validator_manager.maximum_hourly_churn;
        if churn == 0 || churn > 100 {
            return Err(anyhow::anyhow!(
                "Configuration error: maximum_hourly_churn must be between 1 and 100, got {}",
                churn
            ));
        }

        let quorum = self.aggregator.quorum_percentage;
        if quorum == 0 || quorum > 100 {
            return Err(anyhow::anyhow!(
                "Configuration error: quorum_percentage must be between 1 and 100, got {}",
                quorum
            ));
        }

        if let Some(ref token) = self.token_remote {
            if token.token_home_decimals > 18 || token.token_remote_decimals > 18 {
                return Err(anyhow::anyhow!(
                    "Configuration error: token decimals must be at most 18 (home {}, remote {})",
                    token.token_home_decimals,
                    token.token_remote_decimals
                ));
            }
            if token.token_kind == TokenKind::Native && token.token_remote_decimals != 18 {
                return Err(anyhow::anyhow!(
                    "Configuration error: native token remotes always have 18 decimals"
                ));
            }
        }

        for set in &self.aggregator.validator_sets {
            if set.validators.is_empty() {
                return Err(anyhow::anyhow!(
                    "Configuration error: validator set for subnet {:?} is empty",
                    set.subnet_id
                ));
            }
            for validator in &set.validators {
                if validator.weight == 0 {
                    return Err(anyhow::anyhow!(
                        "Configuration error: validator {:?} has zero weight",
                        validator.node_id
                    ));
                }
                Url::parse(&validator.endpoint).map_err(|e| {
                    anyhow::anyhow!(
                        "Configuration error: invalid endpoint '{}' for validator {:?}: {}",
                        validator.endpoint,
                        validator.node_id,
                        e
                    )
                })?;
                let key = hex::decode(
                    validator
                        .bls_public_key
                        .strip_prefix("0x")
                        .unwrap_or(&validator.bls_public_key),
                )?;
                if key.len() != crate::aggregator::BLS_PUBLIC_KEY_LEN {
                    return Err(anyhow::anyhow!(
                        "Configuration error: BLS public key for validator {:?} must be {} bytes, got {}",
                        validator.node_id,
                        crate::aggregator::BLS_PUBLIC_KEY_LEN,
                        key.len()
                    ));
                }
            }
        }

        Ok(())
    }

    /// Loads configuration from the TOML file.
    ///
    /// This function:
    /// 1. Checks if config/teleporter-client.toml exists
    /// 2. If it exists, loads and parses the configuration
    /// 3. Validates the configuration
    /// 4. If it doesn't exist, returns an error asking user to copy template
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - Failed to load configuration, file doesn't exist, or validation failed
    pub fn load() -> anyhow::Result<Self> {
        // Check for custom config path via environment variable (for tests)
        let config_path = std::env::var("TELEPORTER_CLIENT_CONFIG_PATH")
            .unwrap_or_else(|_| "config/teleporter-client.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config = Self::from_toml(&content)?;
            Ok(config)
        } else {
            // Configuration file doesn't exist - user needs to copy template
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/teleporter-client.template.toml config/teleporter-client.toml\n\
                Then edit config/teleporter-client.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}
