//! Shared test helpers for unit tests
//!
//! This module provides helper functions used by unit tests.
//!
//! The module is organized into several categories:
//! - **Constants**: Dummy addresses, IDs, and other test values
//! - **Configuration Builders**: Functions to create test configurations
//! - **BLS Validators**: Real BLS keys and an in-process signature source
//! - **Log Builders**: Encoded contract event logs
//! - **Fake Chain**: In-memory `ChainClient` simulating the deployed contracts
//! - **Harnesses**: Lifecycle and bridge clients wired to the fake chain

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blst::min_pk::SecretKey;
use ethereum_types::{Address, H256, U256};
use rand::RngCore;
use serde_json::json;

use teleporter_client::abi::{encode, keccak256, selector, Decoder, Token};
use teleporter_client::aggregator::{
    SignatureAggregator, SignatureSource, Validator, ValidatorSet, BLS_DST,
};
use teleporter_client::codec::{
    decode_packed, registration_message, SetValidatorWeightMessage, WarpPayload,
};
use teleporter_client::config::{
    AggregatorConfig, ChainConfig, Config, ContractsConfig, OperatorConfig, TokenKind,
    TokenRemoteConfig, ValidatorEndpointConfig, ValidatorManagerConfig, ValidatorSetConfig,
};
use teleporter_client::error::{ClientError, Result};
use teleporter_client::events::{topic, EventWatcher};
use teleporter_client::evm_client::{
    ChainClient, EvmLog, LogFilter, TransactionReceipt, TransactionRequest, WaitConfig,
};
use teleporter_client::lifecycle::{Clock, ValidatorLifecycle, ValidatorManagerSettings};
use teleporter_client::token_bridge::{
    SendAndCallInput, SendTokensInput, TokenBridgeClient, TokenRemoteSettings,
};
use teleporter_client::transaction::WARP_PRECOMPILE_ADDRESS;
use teleporter_client::warp::{SignedMessage, UnsignedMessage};

// ============================================================================
// CONSTANTS
// ============================================================================

// -------------------------------- CHAIN ---------------------------------

/// Dummy network ID used in warp envelopes
pub const DUMMY_NETWORK_ID: u32 = 1337;

/// Dummy EVM chain ID
pub const DUMMY_EVM_CHAIN_ID: u64 = 43112;

/// Dummy "current time" for lifecycle clocks (unix seconds)
pub const DUMMY_NOW: u64 = 1_700_000_000;

/// Registration expiry one day after DUMMY_NOW
pub const DUMMY_EXPIRY: u64 = DUMMY_NOW + 86_400;

/// Dummy operator private key (hex, 32 bytes)
pub const DUMMY_PRIVATE_KEY: &str =
    "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

/// Dummy JSON-RPC endpoint
pub const DUMMY_RPC_URL: &str = "http://127.0.0.1:9650/ext/bc/C/rpc";

// ------------------------------ CONTRACTS -------------------------------

pub fn dummy_validator_manager() -> Address {
    Address::from_low_u64_be(0x10)
}

pub fn dummy_token_remote() -> Address {
    Address::from_low_u64_be(0x11)
}

pub fn dummy_teleporter_messenger() -> Address {
    Address::from_low_u64_be(0x12)
}

pub fn dummy_token_home() -> Address {
    Address::from_low_u64_be(0x13)
}

pub fn dummy_teleporter_registry() -> Address {
    Address::from_low_u64_be(0x14)
}

pub fn dummy_operator() -> Address {
    Address::from_low_u64_be(0x15)
}

// -------------------------------- USERS ---------------------------------

pub fn dummy_recipient() -> Address {
    Address::from_low_u64_be(0x20)
}

pub fn dummy_recipient_contract() -> Address {
    Address::from_low_u64_be(0x21)
}

pub fn dummy_fallback_recipient() -> Address {
    Address::from_low_u64_be(0x22)
}

pub fn dummy_fee_token() -> Address {
    Address::from_low_u64_be(0x23)
}

// --------------------------------- IDs ----------------------------------

pub fn dummy_p_chain_id() -> H256 {
    H256::zero()
}

pub fn dummy_local_blockchain_id() -> H256 {
    H256::from_low_u64_be(0x31)
}

pub fn dummy_home_blockchain_id() -> H256 {
    H256::from_low_u64_be(0x32)
}

pub fn dummy_other_blockchain_id() -> H256 {
    H256::from_low_u64_be(0x33)
}

pub fn dummy_subnet_id() -> H256 {
    H256::from_low_u64_be(0x34)
}

pub fn dummy_signing_subnet_id() -> H256 {
    H256::from_low_u64_be(0x35)
}

pub fn dummy_node_id(n: u64) -> H256 {
    H256::from_low_u64_be(0x1000 + n)
}

/// A syntactically valid 48-byte BLS key (not a curve point; the contract
/// does not check it)
pub fn dummy_bls_key(n: u8) -> Vec<u8> {
    let mut key = vec![0u8; 48];
    key[0] = 0xa0;
    key[47] = n;
    key
}

// ============================================================================
// CONFIGURATION BUILDERS
// ============================================================================

/// Wait settings short enough for tests.
pub fn fast_wait_config() -> WaitConfig {
    WaitConfig {
        receipt_poll_interval_ms: 5,
        block_poll_interval_ms: 5,
        transaction_timeout_ms: 300,
        mined_timeout_ms: 300,
    }
}

/// Build a valid in-memory configuration with one validator set.
pub fn build_test_config() -> Config {
    Config {
        chain: ChainConfig {
            name: "Test L1".to_string(),
            rpc_url: DUMMY_RPC_URL.to_string(),
            evm_chain_id: DUMMY_EVM_CHAIN_ID,
            blockchain_id: dummy_local_blockchain_id(),
            network_id: DUMMY_NETWORK_ID,
        },
        contracts: ContractsConfig {
            validator_manager: dummy_validator_manager(),
            token_remote: None,
        },
        validator_manager: ValidatorManagerConfig {
            p_chain_blockchain_id: dummy_p_chain_id(),
            subnet_id: dummy_subnet_id(),
            maximum_hourly_churn: 20,
            signing_subnet_id: dummy_signing_subnet_id(),
        },
        token_remote: None,
        operator: OperatorConfig {
            private_key_env: "TELEPORTER_TEST_PRIVATE_KEY".to_string(),
            polling_interval_ms: 10,
            resync_interval_polls: 2,
            log_block_range: 10,
        },
        aggregator: AggregatorConfig {
            quorum_percentage: 67,
            request_timeout_ms: 200,
            aggregation_timeout_ms: 1_000,
            validator_sets: vec![ValidatorSetConfig {
                subnet_id: dummy_signing_subnet_id(),
                validators: vec![ValidatorEndpointConfig {
                    node_id: dummy_node_id(1),
                    bls_public_key: format!("0x{}", hex::encode(dummy_bls_key(1))),
                    weight: 100,
                    endpoint: "http://127.0.0.1:9651".to_string(),
                }],
            }],
        },
        wait: fast_wait_config(),
    }
}

/// Build a test configuration with an ERC20 token remote.
pub fn build_test_config_with_token_remote() -> Config {
    let mut config = build_test_config();
    config.contracts.token_remote = Some(dummy_token_remote());
    config.token_remote = Some(TokenRemoteConfig {
        token_kind: TokenKind::Erc20,
        teleporter_registry_address: dummy_teleporter_registry(),
        teleporter_manager: dummy_operator(),
        min_teleporter_version: 1,
        token_home_blockchain_id: dummy_home_blockchain_id(),
        token_home_address: dummy_token_home(),
        token_home_decimals: 6,
        token_remote_decimals: 18,
        initial_reserve_imbalance: U256::zero(),
    });
    config
}

// ============================================================================
// BLS VALIDATORS
// ============================================================================

/// A validator together with its BLS secret key.
#[derive(Clone)]
pub struct TestValidator {
    pub secret_key: SecretKey,
    pub validator: Validator,
}

/// Generate validators with fresh random BLS keys and the given weights.
pub fn generate_validators(weights: &[u64]) -> Vec<TestValidator> {
    let mut rng = rand::thread_rng();
    weights
        .iter()
        .enumerate()
        .map(|(i, &weight)| {
            let mut ikm = [0u8; 32];
            rng.fill_bytes(&mut ikm);
            let secret_key = SecretKey::key_gen(&ikm, &[]).expect("BLS key generation failed");
            let bls_public_key = secret_key.sk_to_pk().compress();
            TestValidator {
                secret_key,
                validator: Validator {
                    node_id: dummy_node_id(100 + i as u64),
                    bls_public_key,
                    weight,
                    endpoint: format!("http://127.0.0.1:{}", 9700 + i),
                },
            }
        })
        .collect()
}

/// Sign a message the way a validator's warp backend does.
pub fn sign_share(secret_key: &SecretKey, message: &UnsignedMessage) -> Vec<u8> {
    secret_key
        .sign(&message.to_bytes(), BLS_DST, &[])
        .compress()
        .to_vec()
}

/// Signature source backed by local secret keys.
///
/// Individual validators can be made unreachable, slow, or to return
/// signatures over the wrong message.
pub struct LocalSignatureSource {
    keys: HashMap<[u8; 48], SecretKey>,
    offline: Mutex<HashSet<H256>>,
    corrupt: Mutex<HashSet<H256>>,
    delays: Mutex<HashMap<H256, Duration>>,
    requests: AtomicUsize,
}

impl LocalSignatureSource {
    pub fn new(validators: &[TestValidator]) -> Self {
        Self {
            keys: validators
                .iter()
                .map(|v| (v.validator.bls_public_key, v.secret_key.clone()))
                .collect(),
            offline: Mutex::new(HashSet::new()),
            corrupt: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn set_offline(&self, node_id: H256) {
        self.offline.lock().unwrap().insert(node_id);
    }

    pub fn set_corrupt(&self, node_id: H256) {
        self.corrupt.lock().unwrap().insert(node_id);
    }

    pub fn set_delay(&self, node_id: H256, delay: Duration) {
        self.delays.lock().unwrap().insert(node_id, delay);
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignatureSource for LocalSignatureSource {
    async fn request_signature(
        &self,
        validator: &Validator,
        message: &UnsignedMessage,
    ) -> Result<Vec<u8>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(&validator.node_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.lock().unwrap().contains(&validator.node_id) {
            return Err(ClientError::Network("connection refused".to_string()));
        }
        let secret_key = self
            .keys
            .get(&validator.bls_public_key)
            .ok_or_else(|| ClientError::Network("unknown validator".to_string()))?;
        if self.corrupt.lock().unwrap().contains(&validator.node_id) {
            let other = UnsignedMessage::new(message.network_id, message.source_chain_id, vec![0xde, 0xad]);
            return Ok(sign_share(secret_key, &other));
        }
        Ok(sign_share(secret_key, message))
    }
}

/// Aggregator over one validator set registered for `subnet_id`.
pub fn build_aggregator(
    validators: &[TestValidator],
    source: Arc<LocalSignatureSource>,
    subnet_id: H256,
    quorum_percentage: u8,
) -> SignatureAggregator {
    let set = ValidatorSet::new(validators.iter().map(|v| v.validator.clone()).collect())
        .expect("valid validator set");
    let mut sets = HashMap::new();
    sets.insert(subnet_id, set);
    SignatureAggregator::new(
        sets,
        source,
        quorum_percentage,
        Duration::from_millis(200),
        Duration::from_millis(1_000),
    )
}

// ============================================================================
// LOG BUILDERS
// ============================================================================

/// An event log before it is placed in a block.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

impl RawLog {
    pub fn into_log(self, block_number: u64, log_index: u64, tx_hash: Option<H256>) -> EvmLog {
        EvmLog {
            address: self.address,
            topics: self.topics,
            data: self.data,
            block_number,
            log_index,
            transaction_hash: tx_hash,
        }
    }
}

fn event_topic_of(name: &str) -> H256 {
    topic(name).expect("known event")
}

pub fn address_topic(address: Address) -> H256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    H256(word)
}

pub fn validation_period_created_log(
    manager: Address,
    validation_id: H256,
    node_id: H256,
    message_id: H256,
    weight: u64,
    expiry: u64,
) -> RawLog {
    RawLog {
        address: manager,
        topics: vec![
            event_topic_of("ValidationPeriodCreated"),
            validation_id,
            node_id,
            message_id,
        ],
        data: encode(&[Token::uint(weight), Token::uint(expiry)]),
    }
}

pub fn validation_period_registered_log(
    manager: Address,
    validation_id: H256,
    weight: u64,
    timestamp: u64,
) -> RawLog {
    RawLog {
        address: manager,
        topics: vec![event_topic_of("ValidationPeriodRegistered"), validation_id],
        data: encode(&[Token::uint(weight), Token::uint(timestamp)]),
    }
}

pub fn validator_removal_initialized_log(
    manager: Address,
    validation_id: H256,
    set_weight_message_id: H256,
    weight: u64,
    end_time: u64,
) -> RawLog {
    RawLog {
        address: manager,
        topics: vec![
            event_topic_of("ValidatorRemovalInitialized"),
            validation_id,
            set_weight_message_id,
        ],
        data: encode(&[Token::uint(weight), Token::uint(end_time)]),
    }
}

pub fn validation_period_ended_log(manager: Address, validation_id: H256, status: u8) -> RawLog {
    RawLog {
        address: manager,
        topics: vec![
            event_topic_of("ValidationPeriodEnded"),
            validation_id,
            H256::from_low_u64_be(status as u64),
        ],
        data: Vec::new(),
    }
}

pub fn send_warp_message_log(source: Address, message_id: H256, message: Vec<u8>) -> RawLog {
    RawLog {
        address: WARP_PRECOMPILE_ADDRESS,
        topics: vec![
            event_topic_of("SendWarpMessage"),
            address_topic(source),
            message_id,
        ],
        data: encode(&[Token::Bytes(message)]),
    }
}

pub fn tokens_sent_log(
    remote: Address,
    message_id: H256,
    sender: Address,
    input: &SendTokensInput,
    amount: U256,
) -> RawLog {
    RawLog {
        address: remote,
        topics: vec![event_topic_of("TokensSent"), message_id, address_topic(sender)],
        data: encode(&[input.to_token(), Token::Uint(amount)]),
    }
}

pub fn tokens_and_call_sent_log(
    remote: Address,
    message_id: H256,
    sender: Address,
    input: &SendAndCallInput,
    amount: U256,
) -> RawLog {
    RawLog {
        address: remote,
        topics: vec![
            event_topic_of("TokensAndCallSent"),
            message_id,
            address_topic(sender),
        ],
        data: encode(&[input.to_token(), Token::Uint(amount)]),
    }
}

pub fn call_succeeded_log(remote: Address, recipient_contract: Address, amount: U256) -> RawLog {
    RawLog {
        address: remote,
        topics: vec![event_topic_of("CallSucceeded"), address_topic(recipient_contract)],
        data: encode(&[Token::Uint(amount)]),
    }
}

pub fn call_failed_log(remote: Address, recipient_contract: Address, amount: U256) -> RawLog {
    RawLog {
        address: remote,
        topics: vec![event_topic_of("CallFailed"), address_topic(recipient_contract)],
        data: encode(&[Token::Uint(amount)]),
    }
}

pub fn tokens_withdrawn_log(remote: Address, recipient: Address, amount: U256) -> RawLog {
    RawLog {
        address: remote,
        topics: vec![event_topic_of("TokensWithdrawn"), address_topic(recipient)],
        data: encode(&[Token::Uint(amount)]),
    }
}

pub fn report_burned_tx_fees_log(remote: Address, message_id: H256, fees_burned: U256) -> RawLog {
    RawLog {
        address: remote,
        topics: vec![event_topic_of("ReportBurnedTxFees"), message_id],
        data: encode(&[Token::Uint(fees_burned)]),
    }
}

pub fn teleporter_address_paused_log(app: Address, teleporter_address: Address) -> RawLog {
    RawLog {
        address: app,
        topics: vec![
            event_topic_of("TeleporterAddressPaused"),
            address_topic(teleporter_address),
        ],
        data: Vec::new(),
    }
}

pub fn teleporter_address_unpaused_log(app: Address, teleporter_address: Address) -> RawLog {
    RawLog {
        address: app,
        topics: vec![
            event_topic_of("TeleporterAddressUnpaused"),
            address_topic(teleporter_address),
        ],
        data: Vec::new(),
    }
}

pub fn min_teleporter_version_updated_log(app: Address, old_version: u64, new_version: u64) -> RawLog {
    RawLog {
        address: app,
        topics: vec![
            event_topic_of("MinTeleporterVersionUpdated"),
            H256::from_low_u64_be(old_version),
            H256::from_low_u64_be(new_version),
        ],
        data: Vec::new(),
    }
}

// ============================================================================
// FAKE CHAIN
// ============================================================================

const SEND_NATIVE: &str = "send((bytes32,address,address,address,uint256,uint256,uint256,address))";
const SEND_ERC20: &str =
    "send((bytes32,address,address,address,uint256,uint256,uint256,address),uint256)";
const SEND_AND_CALL_NATIVE: &str =
    "sendAndCall((bytes32,address,address,bytes,uint256,uint256,address,address,address,uint256,uint256))";
const SEND_AND_CALL_ERC20: &str =
    "sendAndCall((bytes32,address,address,bytes,uint256,uint256,address,address,address,uint256,uint256),uint256)";

/// Validation period as stored by the fake validator manager.
#[derive(Debug, Clone)]
pub struct FakeValidation {
    pub node_id: H256,
    pub weight: u64,
    /// Contract status enum value
    pub status: u8,
    pub message_id: H256,
    pub set_weight_message_id: Option<H256>,
}

/// Mutable state of the fake chain. Tests may poke at it directly.
#[derive(Debug, Default)]
pub struct FakeState {
    pub block_number: u64,
    pub timestamp: u64,
    pub tx_count: u64,
    pub receipts: HashMap<H256, TransactionReceipt>,
    pub traces: HashMap<H256, String>,
    pub logs: Vec<EvmLog>,
    pub sent: Vec<TransactionRequest>,
    // Validator manager
    pub validations: HashMap<H256, FakeValidation>,
    pub active_nodes: HashMap<H256, H256>,
    // Token remote
    pub registered_with_home: bool,
    pub paused: HashSet<Address>,
    pub min_teleporter_version: u64,
    pub collateralized: bool,
    pub total_supply: U256,
    pub total_minted: U256,
    pub native_asset_supply: U256,
    pub initial_reserve_imbalance: U256,
    /// Burned fees not yet reported to the home
    pub unreported_burned_fees: U256,
    pub message_nonce: u64,
    // Fault injection
    pub get_logs_failures: usize,
    pub get_logs_calls: usize,
    pub drop_events: bool,
    pub hide_receipts: bool,
}

/// In-memory chain that executes validator manager and token remote calls.
pub struct FakeChain {
    pub sender: Address,
    pub validator_manager: Address,
    pub token_remote: Address,
    pub teleporter_messenger: Address,
    pub state: Mutex<FakeState>,
}

type TxOutcome = std::result::Result<Vec<RawLog>, String>;

fn split_call(data: &[u8]) -> Option<([u8; 4], &[u8])> {
    if data.len() < 4 {
        return None;
    }
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&data[..4]);
    Some((sel, &data[4..]))
}

fn abi_err(e: ClientError) -> String {
    e.to_string()
}

fn signed_payload(request: &TransactionRequest) -> std::result::Result<WarpPayload, String> {
    let bytes = request
        .warp_message
        .as_ref()
        .ok_or_else(|| "WarpMessenger: missing predicate".to_string())?;
    let signed = SignedMessage::from_bytes(bytes).map_err(abi_err)?;
    decode_packed(&signed.unsigned.payload).map_err(abi_err)
}

impl FakeChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sender: dummy_operator(),
            validator_manager: dummy_validator_manager(),
            token_remote: dummy_token_remote(),
            teleporter_messenger: dummy_teleporter_messenger(),
            state: Mutex::new(FakeState {
                block_number: 1,
                timestamp: DUMMY_NOW,
                min_teleporter_version: 1,
                collateralized: true,
                ..Default::default()
            }),
        })
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn block_number(&self) -> u64 {
        self.state.lock().unwrap().block_number
    }

    /// Mine a block holding `logs` outside of any transaction.
    pub fn emit(&self, logs: Vec<RawLog>) -> u64 {
        let mut state = self.state.lock().unwrap();
        Self::mine(&mut state, None, true, logs);
        state.block_number
    }

    /// Mine `count` empty blocks.
    pub fn advance_blocks(&self, count: u64) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..count {
            Self::mine(&mut state, None, true, Vec::new());
        }
    }

    /// Mark a validation as ended without a transaction from this client.
    pub fn end_validation_externally(&self, validation_id: H256, status: u8) {
        let mut state = self.state.lock().unwrap();
        if let Some(validation) = state.validations.get_mut(&validation_id) {
            validation.status = status;
            let node_id = validation.node_id;
            state.active_nodes.remove(&node_id);
        }
    }

    /// Insert a validator that is already active.
    pub fn seed_active_validator(&self, validation_id: H256, node_id: H256, weight: u64) {
        let mut state = self.state.lock().unwrap();
        state.validations.insert(
            validation_id,
            FakeValidation {
                node_id,
                weight,
                status: 2,
                message_id: H256::zero(),
                set_weight_message_id: None,
            },
        );
        state.active_nodes.insert(node_id, validation_id);
    }

    fn mine(state: &mut FakeState, tx_hash: Option<H256>, success: bool, emitted: Vec<RawLog>) {
        state.block_number += 1;
        state.timestamp += 2;
        let block = state.block_number;
        let logs: Vec<EvmLog> = emitted
            .into_iter()
            .enumerate()
            .map(|(i, raw)| raw.into_log(block, i as u64, tx_hash))
            .collect();
        state.logs.extend(logs.iter().cloned());
        if let Some(tx_hash) = tx_hash {
            state.receipts.insert(
                tx_hash,
                TransactionReceipt {
                    transaction_hash: tx_hash,
                    block_number: block,
                    success,
                    logs,
                },
            );
        }
    }

    fn validator_manager_tx(&self, state: &mut FakeState, request: &TransactionRequest) -> TxOutcome {
        let (sel, args) = split_call(&request.data).ok_or("missing selector")?;
        let d = Decoder::new(args);
        let manager = self.validator_manager;

        if sel == selector("initializeValidatorRegistration(uint64,bytes32,uint64,bytes)") {
            let weight = d.u64(0).map_err(abi_err)?;
            let node_id = d.bytes32(1).map_err(abi_err)?;
            let expiry = d.u64(2).map_err(abi_err)?;
            let key = d.bytes(3).map_err(abi_err)?;
            if state.active_nodes.contains_key(&node_id) {
                return Err("ValidatorManager: node ID already active".to_string());
            }
            if expiry <= state.timestamp {
                return Err("ValidatorManager: invalid registration expiry".to_string());
            }
            let message = registration_message(weight, node_id, expiry, &key).map_err(abi_err)?;
            let validation_id = message.validation_id();
            let unsigned =
                UnsignedMessage::new(DUMMY_NETWORK_ID, dummy_local_blockchain_id(), message.encode());
            let message_id = unsigned.id();
            state.validations.insert(
                validation_id,
                FakeValidation {
                    node_id,
                    weight,
                    status: 1,
                    message_id,
                    set_weight_message_id: None,
                },
            );
            state.active_nodes.insert(node_id, validation_id);
            return Ok(vec![
                send_warp_message_log(manager, message_id, unsigned.to_bytes()),
                validation_period_created_log(manager, validation_id, node_id, message_id, weight, expiry),
            ]);
        }

        if sel == selector("completeValidatorRegistration(uint32)") {
            let ack = match signed_payload(request)? {
                WarpPayload::ValidatorRegistration(ack) if ack.registered => ack,
                _ => return Err("ValidatorManager: invalid warp message".to_string()),
            };
            let timestamp = state.timestamp;
            let validation = state
                .validations
                .get_mut(&ack.validation_id)
                .ok_or("ValidatorManager: unknown validation ID")?;
            if validation.status != 1 {
                return Err("ValidatorManager: invalid validator status".to_string());
            }
            validation.status = 2;
            return Ok(vec![validation_period_registered_log(
                manager,
                ack.validation_id,
                validation.weight,
                timestamp,
            )]);
        }

        if sel == selector("resendRegisterValidatorMessage(bytes32)") {
            let validation_id = d.bytes32(0).map_err(abi_err)?;
            let validation = state
                .validations
                .get(&validation_id)
                .ok_or("ValidatorManager: unknown validation ID")?;
            if validation.status != 1 {
                return Err("ValidatorManager: invalid validator status".to_string());
            }
            return Ok(vec![send_warp_message_log(manager, validation.message_id, Vec::new())]);
        }

        if sel == selector("initializeEndValidation(bytes32)") {
            let validation_id = d.bytes32(0).map_err(abi_err)?;
            let timestamp = state.timestamp;
            let validation = state
                .validations
                .get_mut(&validation_id)
                .ok_or("ValidatorManager: unknown validation ID")?;
            if validation.status != 2 {
                return Err("ValidatorManager: validator not active".to_string());
            }
            validation.status = 3;
            let unsigned = UnsignedMessage::new(
                DUMMY_NETWORK_ID,
                dummy_local_blockchain_id(),
                SetValidatorWeightMessage {
                    validation_id,
                    nonce: 1,
                    weight: 0,
                }
                .encode(),
            );
            let set_weight_message_id = unsigned.id();
            validation.set_weight_message_id = Some(set_weight_message_id);
            return Ok(vec![
                send_warp_message_log(manager, set_weight_message_id, unsigned.to_bytes()),
                validator_removal_initialized_log(
                    manager,
                    validation_id,
                    set_weight_message_id,
                    validation.weight,
                    timestamp,
                ),
            ]);
        }

        if sel == selector("resendEndValidatorMessage(bytes32)") {
            let validation_id = d.bytes32(0).map_err(abi_err)?;
            let validation = state
                .validations
                .get(&validation_id)
                .ok_or("ValidatorManager: unknown validation ID")?;
            let message_id = match (validation.status, validation.set_weight_message_id) {
                (3, Some(id)) => id,
                _ => return Err("ValidatorManager: invalid validator status".to_string()),
            };
            return Ok(vec![send_warp_message_log(manager, message_id, Vec::new())]);
        }

        if sel == selector("completeEndValidation(uint32)") {
            let ack = match signed_payload(request)? {
                WarpPayload::ValidatorRegistration(ack) if !ack.registered => ack,
                _ => return Err("ValidatorManager: invalid warp message".to_string()),
            };
            let validation = state
                .validations
                .get_mut(&ack.validation_id)
                .ok_or("ValidatorManager: unknown validation ID")?;
            if validation.status != 3 {
                return Err("ValidatorManager: invalid validator status".to_string());
            }
            validation.status = 4;
            let node_id = validation.node_id;
            state.active_nodes.remove(&node_id);
            return Ok(vec![validation_period_ended_log(manager, ack.validation_id, 4)]);
        }

        Err("function selector not recognized".to_string())
    }

    fn token_remote_tx(&self, state: &mut FakeState, request: &TransactionRequest) -> TxOutcome {
        let (sel, args) = split_call(&request.data).ok_or("missing selector")?;
        let d = Decoder::new(args);
        let remote = self.token_remote;

        if sel == selector("registerWithHome((address,uint256))") {
            if state.registered_with_home {
                return Err("TokenRemote: already registered".to_string());
            }
            state.registered_with_home = true;
            return Ok(Vec::new());
        }

        if sel == selector("reportBurnedTxFees(uint256)") {
            if d.uint(0).map_err(abi_err)?.is_zero() {
                return Err("NativeTokenRemote: zero required gas limit".to_string());
            }
            if state.paused.contains(&self.teleporter_messenger) {
                return Err("TeleporterRegistryApp: Teleporter address paused".to_string());
            }
            let fees_burned = std::mem::take(&mut state.unreported_burned_fees);
            if fees_burned.is_zero() {
                return Err("NativeTokenRemote: burn address balance not greater than last report"
                    .to_string());
            }
            state.message_nonce += 1;
            let message_id = H256(keccak256(&state.message_nonce.to_be_bytes()));
            return Ok(vec![report_burned_tx_fees_log(remote, message_id, fees_burned)]);
        }

        let is_send = sel == selector(SEND_NATIVE) || sel == selector(SEND_ERC20);
        let is_send_and_call =
            sel == selector(SEND_AND_CALL_NATIVE) || sel == selector(SEND_AND_CALL_ERC20);
        if is_send || is_send_and_call {
            if state.paused.contains(&self.teleporter_messenger) {
                return Err("TeleporterRegistryApp: Teleporter address paused".to_string());
            }
            state.message_nonce += 1;
            let message_id = H256(keccak256(&state.message_nonce.to_be_bytes()));
            if is_send {
                let input = SendTokensInput::decode(&d.inline(0).map_err(abi_err)?).map_err(abi_err)?;
                let amount = if sel == selector(SEND_NATIVE) {
                    request.value
                } else {
                    d.uint(SendTokensInput::WORDS).map_err(abi_err)?
                };
                return Ok(vec![tokens_sent_log(remote, message_id, self.sender, &input, amount)]);
            }
            let input = SendAndCallInput::decode(&d.tuple(0).map_err(abi_err)?).map_err(abi_err)?;
            let amount = if sel == selector(SEND_AND_CALL_NATIVE) {
                request.value
            } else {
                d.uint(1).map_err(abi_err)?
            };
            return Ok(vec![tokens_and_call_sent_log(
                remote, message_id, self.sender, &input, amount,
            )]);
        }

        if sel == selector("pauseTeleporterAddress(address)") {
            let address = d.address(0).map_err(abi_err)?;
            if !state.paused.insert(address) {
                return Err("TeleporterRegistryApp: address already paused".to_string());
            }
            return Ok(vec![teleporter_address_paused_log(remote, address)]);
        }

        if sel == selector("unpauseTeleporterAddress(address)") {
            let address = d.address(0).map_err(abi_err)?;
            if !state.paused.remove(&address) {
                return Err("TeleporterRegistryApp: address not paused".to_string());
            }
            return Ok(vec![teleporter_address_unpaused_log(remote, address)]);
        }

        if sel == selector("updateMinTeleporterVersion(uint256)") {
            let version = d.u64(0).map_err(abi_err)?;
            let old_version = state.min_teleporter_version;
            if version <= old_version {
                return Err("TeleporterRegistryApp: invalid TeleporterMessenger version".to_string());
            }
            state.min_teleporter_version = version;
            return Ok(vec![min_teleporter_version_updated_log(remote, old_version, version)]);
        }

        Err("function selector not recognized".to_string())
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn send_transaction(&self, request: TransactionRequest) -> Result<H256> {
        let mut state = self.state.lock().unwrap();
        state.tx_count += 1;
        let tx_hash = H256(keccak256(&state.tx_count.to_be_bytes()));
        state.sent.push(request.clone());

        let outcome = if request.to == self.validator_manager {
            self.validator_manager_tx(&mut state, &request)
        } else if request.to == self.token_remote {
            self.token_remote_tx(&mut state, &request)
        } else {
            Ok(Vec::new())
        };

        match outcome {
            Ok(mut logs) => {
                if state.drop_events {
                    logs.clear();
                }
                Self::mine(&mut state, Some(tx_hash), true, logs);
            }
            Err(reason) => {
                state.traces.insert(
                    tx_hash,
                    json!({
                        "type": "CALL",
                        "error": "execution reverted",
                        "revertReason": reason,
                    })
                    .to_string(),
                );
                Self::mine(&mut state, Some(tx_hash), false, Vec::new());
            }
        }
        Ok(tx_hash)
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        let state = self.state.lock().unwrap();
        if state.hide_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn get_block_number(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().block_number)
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let not_recognized = || ClientError::Reverted {
            tx_hash: None,
            reason: format!("function selector not recognized on {:?}", to),
            trace: None,
        };
        let (sel, args) = split_call(&data).ok_or_else(not_recognized)?;
        let d = Decoder::new(args);

        let token = if sel == selector("activeValidators(bytes32)") {
            let node_id = d.bytes32(0)?;
            Token::FixedBytes32(state.active_nodes.get(&node_id).copied().unwrap_or_default())
        } else if sel == selector("getWeight(bytes32)") {
            let validation_id = d.bytes32(0)?;
            Token::uint(state.validations.get(&validation_id).map(|v| v.weight).unwrap_or(0))
        } else if sel == selector("isTeleporterAddressPaused(address)") {
            Token::Bool(state.paused.contains(&d.address(0)?))
        } else if sel == selector("getMinTeleporterVersion()") {
            Token::uint(state.min_teleporter_version)
        } else if sel == selector("getIsCollateralized()") {
            Token::Bool(state.collateralized)
        } else if sel == selector("totalSupply()") {
            Token::Uint(state.total_supply)
        } else if sel == selector("totalNativeAssetSupply()") {
            Token::Uint(state.native_asset_supply)
        } else if sel == selector("getInitialReserveImbalance()") {
            Token::Uint(state.initial_reserve_imbalance)
        } else if sel == selector("getTotalMinted()") {
            Token::Uint(state.total_minted)
        } else if sel == selector("calculateNumWords(uint256)") {
            Token::uint(d.u64(0)?.div_ceil(32))
        } else {
            return Err(not_recognized());
        };
        Ok(encode(&[token]))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<EvmLog>> {
        let mut state = self.state.lock().unwrap();
        state.get_logs_calls += 1;
        if state.get_logs_failures > 0 {
            state.get_logs_failures -= 1;
            return Err(ClientError::Network("connection reset by peer".to_string()));
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }

    async fn trace_transaction(&self, tx_hash: H256) -> Result<String> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .traces
            .get(&tx_hash)
            .cloned()
            .unwrap_or_else(|| json!({ "type": "CALL" }).to_string()))
    }
}

// ============================================================================
// HARNESSES
// ============================================================================

pub fn build_watcher(chain: &Arc<FakeChain>) -> EventWatcher {
    let client: Arc<dyn ChainClient> = chain.clone();
    EventWatcher::new(client, fast_wait_config(), 10)
}

/// Clock reading a shared, test-controlled timestamp.
pub fn shared_clock(now: Arc<AtomicU64>) -> Clock {
    Arc::new(move || now.load(Ordering::SeqCst))
}

pub struct LifecycleHarness {
    pub chain: Arc<FakeChain>,
    pub validators: Vec<TestValidator>,
    pub source: Arc<LocalSignatureSource>,
    pub now: Arc<AtomicU64>,
    pub lifecycle: Arc<ValidatorLifecycle>,
}

pub fn manager_settings(maximum_hourly_churn: u8) -> ValidatorManagerSettings {
    ValidatorManagerSettings {
        p_chain_blockchain_id: dummy_p_chain_id(),
        subnet_id: dummy_subnet_id(),
        maximum_hourly_churn,
        signing_subnet_id: dummy_signing_subnet_id(),
    }
}

/// Lifecycle on `chain` with a four-validator signing set of equal weight.
pub fn build_lifecycle_on(chain: Arc<FakeChain>, maximum_hourly_churn: u8) -> LifecycleHarness {
    let validators = generate_validators(&[100, 100, 100, 100]);
    let source = Arc::new(LocalSignatureSource::new(&validators));
    let aggregator = Arc::new(build_aggregator(
        &validators,
        source.clone(),
        dummy_signing_subnet_id(),
        67,
    ));
    let now = Arc::new(AtomicU64::new(DUMMY_NOW));
    let lifecycle = ValidatorLifecycle::new(
        build_watcher(&chain),
        aggregator,
        chain.validator_manager,
        manager_settings(maximum_hourly_churn),
        DUMMY_NETWORK_ID,
    )
    .expect("valid lifecycle settings")
    .with_clock(shared_clock(now.clone()));

    LifecycleHarness {
        chain,
        validators,
        source,
        now,
        lifecycle: Arc::new(lifecycle),
    }
}

pub fn build_lifecycle(maximum_hourly_churn: u8) -> LifecycleHarness {
    build_lifecycle_on(FakeChain::new(), maximum_hourly_churn)
}

pub fn erc20_remote_settings() -> TokenRemoteSettings {
    TokenRemoteSettings {
        teleporter_registry_address: dummy_teleporter_registry(),
        teleporter_manager: dummy_operator(),
        min_teleporter_version: 1,
        token_home_blockchain_id: dummy_home_blockchain_id(),
        token_home_address: dummy_token_home(),
        token_home_decimals: 18,
        token_remote_decimals: 18,
        token_kind: TokenKind::Erc20,
    }
}

pub fn build_bridge(chain: &Arc<FakeChain>, settings: TokenRemoteSettings, imbalance: U256) -> TokenBridgeClient {
    TokenBridgeClient::new(
        build_watcher(chain),
        chain.token_remote,
        dummy_local_blockchain_id(),
        settings,
        imbalance,
    )
    .expect("valid bridge settings")
}

/// Single-hop send to the home chain.
pub fn single_hop_input() -> SendTokensInput {
    SendTokensInput {
        destination_blockchain_id: dummy_home_blockchain_id(),
        destination_token_transferrer_address: dummy_token_home(),
        recipient: dummy_recipient(),
        primary_fee_token_address: dummy_fee_token(),
        primary_fee: U256::from(10),
        secondary_fee: U256::zero(),
        required_gas_limit: U256::from(250_000),
        multi_hop_fallback: Address::zero(),
    }
}

/// Multi-hop send to another remote through the home chain.
pub fn multi_hop_input() -> SendTokensInput {
    SendTokensInput {
        destination_blockchain_id: dummy_other_blockchain_id(),
        destination_token_transferrer_address: Address::from_low_u64_be(0x40),
        recipient: dummy_recipient(),
        primary_fee_token_address: dummy_fee_token(),
        primary_fee: U256::from(10),
        secondary_fee: U256::from(5),
        required_gas_limit: U256::from(250_000),
        multi_hop_fallback: dummy_fallback_recipient(),
    }
}

pub fn send_and_call_input() -> SendAndCallInput {
    SendAndCallInput {
        destination_blockchain_id: dummy_home_blockchain_id(),
        destination_token_transferrer_address: dummy_token_home(),
        recipient_contract: dummy_recipient_contract(),
        recipient_payload: vec![0xca, 0xfe, 0xba, 0xbe],
        required_gas_limit: U256::from(300_000),
        recipient_gas_limit: U256::from(200_000),
        multi_hop_fallback: Address::zero(),
        fallback_recipient: dummy_fallback_recipient(),
        primary_fee_token_address: dummy_fee_token(),
        primary_fee: U256::from(10),
        secondary_fee: U256::zero(),
    }
}
