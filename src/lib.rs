//! Teleporter Client Library
//!
//! Operator-side client for Teleporter/ICM contracts: validator lifecycle on a
//! PoA validator manager, the Warp message codec and BLS signature
//! aggregation it depends on, and the token remote bridge client.

pub mod abi;
pub mod aggregator;
pub mod churn;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod evm_client;
pub mod lifecycle;
pub mod monitor;
pub mod reward;
pub mod teleporter;
pub mod token_bridge;
pub mod transaction;
pub mod warp;

// Re-export commonly used types
pub use aggregator::{SignatureAggregator, SignatureSource, Validator, ValidatorSet};
pub use config::Config;
pub use crypto::CryptoService;
pub use error::{ClientError, Result};
pub use events::{ContractEvent, EventWatcher, LogCursor};
pub use evm_client::{ChainClient, EvmClient, WaitConfig};
pub use lifecycle::{ValidationRecord, ValidationStatus, ValidatorLifecycle};
pub use monitor::EventMonitor;
pub use token_bridge::TokenBridgeClient;
pub use warp::{SignedMessage, UnsignedMessage};
