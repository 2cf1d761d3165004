//! Token bridge client for a TokenRemote
//!
//! Builds and submits `registerWithHome`, `send` and `sendAndCall` calls,
//! validating inputs locally before any transaction is sent, and keeps
//! client-side projections of the remote's registration flag,
//! collateralization and pending `sendAndCall` outcomes.

use std::collections::HashMap;
use std::sync::Arc;

use ethereum_types::{Address, H256, U256};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::abi::{encode_call, Decoder, Token};
use crate::config::{Config, TokenKind, TokenRemoteConfig};
use crate::error::{ClientError, Result};
use crate::events::{get_event_from_logs, parser, ContractEvent, EventWatcher};
use crate::evm_client::{wait_for_transaction_success, ChainClient, EvmLog, TransactionRequest};
use crate::teleporter::TeleporterApp;

pub const MAX_TOKEN_DECIMALS: u8 = 18;

/// Gas for the home chain to route a multi-hop `send`.
pub const MULTI_HOP_SEND_REQUIRED_GAS: u64 = 340_000;
/// Base gas for the home chain to route a multi-hop `sendAndCall`.
pub const MULTI_HOP_CALL_REQUIRED_GAS: u64 = 350_000;
/// Additional multi-hop `sendAndCall` gas per 32-byte word of payload.
pub const MULTI_HOP_CALL_GAS_PER_WORD: u64 = 85;
/// Gas for the home chain to process a remote registration.
pub const REGISTER_REMOTE_REQUIRED_GAS: u64 = 130_000;

const SEND_NATIVE_SIGNATURE: &str =
    "send((bytes32,address,address,address,uint256,uint256,uint256,address))";
const SEND_ERC20_SIGNATURE: &str =
    "send((bytes32,address,address,address,uint256,uint256,uint256,address),uint256)";
const SEND_AND_CALL_NATIVE_SIGNATURE: &str =
    "sendAndCall((bytes32,address,address,bytes,uint256,uint256,address,address,address,uint256,uint256))";
const SEND_AND_CALL_ERC20_SIGNATURE: &str =
    "sendAndCall((bytes32,address,address,bytes,uint256,uint256,address,address,address,uint256,uint256),uint256)";

// ============================================================================
// INPUT TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTokensInput {
    pub destination_blockchain_id: H256,
    pub destination_token_transferrer_address: Address,
    pub recipient: Address,
    pub primary_fee_token_address: Address,
    pub primary_fee: U256,
    /// Fee for the second hop, in the transferred token
    pub secondary_fee: U256,
    pub required_gas_limit: U256,
    pub multi_hop_fallback: Address,
}

impl SendTokensInput {
    /// Encoded size in words (all members are static).
    pub const WORDS: usize = 8;

    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::FixedBytes32(self.destination_blockchain_id),
            Token::Address(self.destination_token_transferrer_address),
            Token::Address(self.recipient),
            Token::Address(self.primary_fee_token_address),
            Token::Uint(self.primary_fee),
            Token::Uint(self.secondary_fee),
            Token::Uint(self.required_gas_limit),
            Token::Address(self.multi_hop_fallback),
        ])
    }

    pub fn decode(d: &Decoder) -> Result<Self> {
        Ok(Self {
            destination_blockchain_id: d.bytes32(0)?,
            destination_token_transferrer_address: d.address(1)?,
            recipient: d.address(2)?,
            primary_fee_token_address: d.address(3)?,
            primary_fee: d.uint(4)?,
            secondary_fee: d.uint(5)?,
            required_gas_limit: d.uint(6)?,
            multi_hop_fallback: d.address(7)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAndCallInput {
    pub destination_blockchain_id: H256,
    pub destination_token_transferrer_address: Address,
    pub recipient_contract: Address,
    pub recipient_payload: Vec<u8>,
    pub required_gas_limit: U256,
    pub recipient_gas_limit: U256,
    pub multi_hop_fallback: Address,
    /// Receives the funds if the recipient call fails
    pub fallback_recipient: Address,
    pub primary_fee_token_address: Address,
    pub primary_fee: U256,
    pub secondary_fee: U256,
}

impl SendAndCallInput {
    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::FixedBytes32(self.destination_blockchain_id),
            Token::Address(self.destination_token_transferrer_address),
            Token::Address(self.recipient_contract),
            Token::Bytes(self.recipient_payload.clone()),
            Token::Uint(self.required_gas_limit),
            Token::Uint(self.recipient_gas_limit),
            Token::Address(self.multi_hop_fallback),
            Token::Address(self.fallback_recipient),
            Token::Address(self.primary_fee_token_address),
            Token::Uint(self.primary_fee),
            Token::Uint(self.secondary_fee),
        ])
    }

    pub fn decode(d: &Decoder) -> Result<Self> {
        Ok(Self {
            destination_blockchain_id: d.bytes32(0)?,
            destination_token_transferrer_address: d.address(1)?,
            recipient_contract: d.address(2)?,
            recipient_payload: d.bytes(3)?,
            required_gas_limit: d.uint(4)?,
            recipient_gas_limit: d.uint(5)?,
            multi_hop_fallback: d.address(6)?,
            fallback_recipient: d.address(7)?,
            primary_fee_token_address: d.address(8)?,
            primary_fee: d.uint(9)?,
            secondary_fee: d.uint(10)?,
        })
    }
}

/// Teleporter fee: `amount == 0` means no fee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeleporterFeeInfo {
    pub fee_token_address: Address,
    pub amount: U256,
}

impl TeleporterFeeInfo {
    pub fn validate(&self) -> Result<()> {
        validate_fee(self.fee_token_address, self.amount, "fee")
    }

    fn to_token(self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.fee_token_address),
            Token::Uint(self.amount),
        ])
    }
}

fn validate_fee(token: Address, amount: U256, what: &str) -> Result<()> {
    if !amount.is_zero() && token.is_zero() {
        return Err(ClientError::InvalidInput(format!(
            "non-zero {} amount with zero fee token address",
            what
        )));
    }
    Ok(())
}

fn require_non_zero_address(address: Address, what: &str) -> Result<()> {
    if address.is_zero() {
        return Err(ClientError::InvalidInput(format!("zero {}", what)));
    }
    Ok(())
}

// ============================================================================
// SETTINGS / SCALING / COLLATERAL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRemoteSettings {
    pub teleporter_registry_address: Address,
    pub teleporter_manager: Address,
    pub min_teleporter_version: u64,
    pub token_home_blockchain_id: H256,
    pub token_home_address: Address,
    pub token_home_decimals: u8,
    pub token_remote_decimals: u8,
    pub token_kind: TokenKind,
}

impl From<&TokenRemoteConfig> for TokenRemoteSettings {
    fn from(config: &TokenRemoteConfig) -> Self {
        Self {
            teleporter_registry_address: config.teleporter_registry_address,
            teleporter_manager: config.teleporter_manager,
            min_teleporter_version: config.min_teleporter_version,
            token_home_blockchain_id: config.token_home_blockchain_id,
            token_home_address: config.token_home_address,
            token_home_decimals: config.token_home_decimals,
            token_remote_decimals: config.token_remote_decimals,
            token_kind: config.token_kind,
        }
    }
}

/// Fixed decimal conversion between home and remote amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenScaling {
    pub token_multiplier: U256,
    pub multiply_on_remote: bool,
}

impl TokenScaling {
    pub fn new(home_decimals: u8, remote_decimals: u8) -> Result<Self> {
        if home_decimals > MAX_TOKEN_DECIMALS || remote_decimals > MAX_TOKEN_DECIMALS {
            return Err(ClientError::InvalidInput(format!(
                "token decimals must be at most {} (home {}, remote {})",
                MAX_TOKEN_DECIMALS, home_decimals, remote_decimals
            )));
        }
        let diff = home_decimals.abs_diff(remote_decimals);
        Ok(Self {
            token_multiplier: U256::exp10(diff as usize),
            multiply_on_remote: remote_decimals > home_decimals,
        })
    }

    pub fn scale_home_to_remote(&self, amount: U256) -> Result<U256> {
        if self.multiply_on_remote {
            amount
                .checked_mul(self.token_multiplier)
                .ok_or_else(|| ClientError::InvalidInput("scaled amount overflows".to_string()))
        } else {
            Ok(amount / self.token_multiplier)
        }
    }

    pub fn scale_remote_to_home(&self, amount: U256) -> Result<U256> {
        if self.multiply_on_remote {
            Ok(amount / self.token_multiplier)
        } else {
            amount
                .checked_mul(self.token_multiplier)
                .ok_or_else(|| ClientError::InvalidInput("scaled amount overflows".to_string()))
        }
    }
}

/// Number of 32-byte words needed for `payload_size` bytes.
pub fn calculate_num_words(payload_size: usize) -> u64 {
    payload_size.div_ceil(32) as u64
}

/// Gas the home chain needs to route a multi-hop `sendAndCall` with this payload.
pub fn multi_hop_call_required_gas(payload_size: usize) -> u64 {
    MULTI_HOP_CALL_REQUIRED_GAS + calculate_num_words(payload_size) * MULTI_HOP_CALL_GAS_PER_WORD
}

/// Client-side view of a remote's reserve imbalance.
///
/// Incoming transfers repay the outstanding imbalance before anything is
/// minted. Once the imbalance reaches zero the remote is collateralized for
/// good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralProjection {
    initial_reserve_imbalance: U256,
    outstanding_imbalance: U256,
    collateralized: bool,
}

impl CollateralProjection {
    pub fn new(initial_reserve_imbalance: U256) -> Self {
        Self {
            initial_reserve_imbalance,
            outstanding_imbalance: initial_reserve_imbalance,
            collateralized: initial_reserve_imbalance.is_zero(),
        }
    }

    /// Apply an incoming transfer and return the amount actually minted.
    pub fn record_incoming(&mut self, amount: U256) -> U256 {
        if self.collateralized {
            return amount;
        }
        let repaid = amount.min(self.outstanding_imbalance);
        self.outstanding_imbalance -= repaid;
        if self.outstanding_imbalance.is_zero() {
            self.collateralized = true;
        }
        amount - repaid
    }

    /// Adopt the chain's flag; a collateralized projection never regresses.
    pub fn observe(&mut self, chain_collateralized: bool) {
        if chain_collateralized {
            self.collateralized = true;
            self.outstanding_imbalance = U256::zero();
        }
    }

    pub fn is_collateralized(&self) -> bool {
        self.collateralized
    }

    pub fn initial_reserve_imbalance(&self) -> U256 {
        self.initial_reserve_imbalance
    }

    pub fn outstanding_imbalance(&self) -> U256 {
        self.outstanding_imbalance
    }

    /// Portion of `total_supply` backed by tokens locked on the home chain.
    pub fn backed_supply(&self, total_supply: U256) -> U256 {
        total_supply.saturating_sub(self.outstanding_imbalance)
    }
}

// ============================================================================
// CALL OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    pub recipient_contract: Address,
    pub fallback_recipient: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Succeeded { amount: U256 },
    /// Funds went to the fallback recipient
    Failed {
        fallback_recipient: Address,
        amount: U256,
    },
}

// ============================================================================
// CLIENT
// ============================================================================

/// Fields of either input kind that decide where a transfer may go.
struct Route {
    destination_blockchain_id: H256,
    destination_token_transferrer_address: Address,
    secondary_fee: U256,
    multi_hop_fallback: Address,
    required_gas_limit: U256,
    primary_fee_token_address: Address,
    primary_fee: U256,
}

#[derive(Debug, Default)]
struct BridgeState {
    /// Transaction hash of the successful registration
    registration: Option<H256>,
    registration_in_flight: bool,
    pending_calls: HashMap<H256, PendingCall>,
}

pub struct TokenBridgeClient {
    watcher: EventWatcher,
    address: Address,
    blockchain_id: H256,
    settings: TokenRemoteSettings,
    scaling: TokenScaling,
    app: TeleporterApp,
    state: Mutex<BridgeState>,
    collateral: Mutex<CollateralProjection>,
}

impl TokenBridgeClient {
    pub fn new(
        watcher: EventWatcher,
        address: Address,
        blockchain_id: H256,
        settings: TokenRemoteSettings,
        initial_reserve_imbalance: U256,
    ) -> Result<Self> {
        let scaling = TokenScaling::new(settings.token_home_decimals, settings.token_remote_decimals)?;
        Ok(Self {
            app: TeleporterApp::new(watcher.clone(), address),
            watcher,
            address,
            blockchain_id,
            settings,
            scaling,
            state: Mutex::new(BridgeState::default()),
            collateral: Mutex::new(CollateralProjection::new(initial_reserve_imbalance)),
        })
    }

    /// Build from configuration; `None` when no token remote is configured.
    pub fn from_config(watcher: EventWatcher, config: &Config) -> Result<Option<Self>> {
        let (Some(token), Some(address)) = (&config.token_remote, config.contracts.token_remote)
        else {
            return Ok(None);
        };
        Self::new(
            watcher,
            address,
            config.chain.blockchain_id,
            TokenRemoteSettings::from(token),
            token.initial_reserve_imbalance,
        )
        .map(Some)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn settings(&self) -> &TokenRemoteSettings {
        &self.settings
    }

    pub fn scaling(&self) -> TokenScaling {
        self.scaling
    }

    /// Pause/version operations of the underlying registry app.
    pub fn app(&self) -> &TeleporterApp {
        &self.app
    }

    fn client(&self) -> &Arc<dyn ChainClient> {
        self.watcher.client()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub async fn is_registered(&self) -> bool {
        self.state.lock().await.registration.is_some()
    }

    /// One-time registration with the home transferrer.
    ///
    /// The flag is cached only after the transaction succeeds; a second call
    /// fails locally with `AlreadyRegistered`.
    pub async fn register_with_home(&self, fee_info: TeleporterFeeInfo) -> Result<H256> {
        {
            let mut state = self.state.lock().await;
            if let Some(tx_hash) = state.registration {
                return Err(ClientError::AlreadyRegistered {
                    tx_hash: Some(tx_hash),
                });
            }
            if state.registration_in_flight {
                return Err(ClientError::AlreadyRegistered { tx_hash: None });
            }
            fee_info.validate()?;
            state.registration_in_flight = true;
        }

        let result = self.submit_registration(fee_info).await;

        let mut state = self.state.lock().await;
        state.registration_in_flight = false;
        if let Ok(tx_hash) = result {
            state.registration = Some(tx_hash);
            info!("Token remote {:?} registered with home (tx {:?})", self.address, tx_hash);
        }
        result
    }

    async fn submit_registration(&self, fee_info: TeleporterFeeInfo) -> Result<H256> {
        let data = encode_call("registerWithHome((address,uint256))", &[fee_info.to_token()]);
        let tx_hash = self
            .client()
            .send_transaction(TransactionRequest::call(self.address, data))
            .await?;
        wait_for_transaction_success(self.client().as_ref(), tx_hash, self.watcher.wait_config())
            .await?;
        Ok(tx_hash)
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Destination rules shared by `send` and `sendAndCall`.
    fn validate_route(&self, route: Route) -> Result<()> {
        if route.destination_blockchain_id.is_zero() {
            return Err(ClientError::InvalidInput("zero destination blockchain ID".to_string()));
        }
        require_non_zero_address(
            route.destination_token_transferrer_address,
            "destination token transferrer address",
        )?;
        if route.required_gas_limit.is_zero() {
            return Err(ClientError::InvalidInput("zero required gas limit".to_string()));
        }
        validate_fee(route.primary_fee_token_address, route.primary_fee, "primary fee")?;

        if route.destination_blockchain_id == self.settings.token_home_blockchain_id {
            if route.destination_token_transferrer_address != self.settings.token_home_address {
                return Err(ClientError::InvalidInput(
                    "invalid destination token transferrer address".to_string(),
                ));
            }
            if !route.secondary_fee.is_zero() {
                return Err(ClientError::InvalidInput(
                    "non-zero secondary fee for single-hop send".to_string(),
                ));
            }
            if !route.multi_hop_fallback.is_zero() {
                return Err(ClientError::InvalidInput(
                    "non-zero multi-hop fallback for single-hop send".to_string(),
                ));
            }
        } else {
            if route.destination_blockchain_id == self.blockchain_id {
                return Err(ClientError::InvalidInput(
                    "cannot send to the local chain".to_string(),
                ));
            }
            require_non_zero_address(route.multi_hop_fallback, "multi-hop fallback")?;
        }
        Ok(())
    }

    pub fn validate_send(&self, input: &SendTokensInput, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Err(ClientError::InvalidInput("zero send amount".to_string()));
        }
        self.validate_route(Route {
            destination_blockchain_id: input.destination_blockchain_id,
            destination_token_transferrer_address: input.destination_token_transferrer_address,
            secondary_fee: input.secondary_fee,
            multi_hop_fallback: input.multi_hop_fallback,
            required_gas_limit: input.required_gas_limit,
            primary_fee_token_address: input.primary_fee_token_address,
            primary_fee: input.primary_fee,
        })?;
        require_non_zero_address(input.recipient, "recipient")
    }

    pub fn validate_send_and_call(&self, input: &SendAndCallInput, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Err(ClientError::InvalidInput("zero send amount".to_string()));
        }
        self.validate_route(Route {
            destination_blockchain_id: input.destination_blockchain_id,
            destination_token_transferrer_address: input.destination_token_transferrer_address,
            secondary_fee: input.secondary_fee,
            multi_hop_fallback: input.multi_hop_fallback,
            required_gas_limit: input.required_gas_limit,
            primary_fee_token_address: input.primary_fee_token_address,
            primary_fee: input.primary_fee,
        })?;
        require_non_zero_address(input.recipient_contract, "recipient contract")?;
        require_non_zero_address(input.fallback_recipient, "fallback recipient")?;
        if input.recipient_gas_limit.is_zero() {
            return Err(ClientError::InvalidInput("zero recipient gas limit".to_string()));
        }
        if input.recipient_gas_limit >= input.required_gas_limit {
            return Err(ClientError::InvalidInput(format!(
                "recipient gas limit {} must be below required gas limit {}",
                input.recipient_gas_limit, input.required_gas_limit
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sends
    // ------------------------------------------------------------------

    fn transfer_request(
        &self,
        native_signature: &str,
        erc20_signature: &str,
        input: Token,
        amount: U256,
    ) -> TransactionRequest {
        match self.settings.token_kind {
            TokenKind::Native => {
                TransactionRequest::call(self.address, encode_call(native_signature, &[input]))
                    .with_value(amount)
            }
            TokenKind::Erc20 => TransactionRequest::call(
                self.address,
                encode_call(erc20_signature, &[input, Token::Uint(amount)]),
            ),
        }
    }

    /// Send tokens; returns the Teleporter message ID from `TokensSent`.
    pub async fn send(&self, input: &SendTokensInput, amount: U256) -> Result<H256> {
        self.validate_send(input, amount)?;

        let request = self.transfer_request(
            SEND_NATIVE_SIGNATURE,
            SEND_ERC20_SIGNATURE,
            input.to_token(),
            amount,
        );
        let tx_hash = self.client().send_transaction(request).await?;
        let message_id = self
            .watcher
            .wait_for(
                tx_hash,
                "TokensSent",
                parser(|event| match event {
                    ContractEvent::TokensSent {
                        teleporter_message_id,
                        ..
                    } => Some(teleporter_message_id),
                    _ => None,
                }),
            )
            .await?;

        info!(
            "Sent {} to {:?} on {:?} (message {:?}, tx {:?})",
            amount, input.recipient, input.destination_blockchain_id, message_id, tx_hash
        );
        Ok(message_id)
    }

    /// Send tokens to a contract call; the outcome is tracked by message ID.
    pub async fn send_and_call(&self, input: &SendAndCallInput, amount: U256) -> Result<H256> {
        self.validate_send_and_call(input, amount)?;

        let request = self.transfer_request(
            SEND_AND_CALL_NATIVE_SIGNATURE,
            SEND_AND_CALL_ERC20_SIGNATURE,
            input.to_token(),
            amount,
        );
        let tx_hash = self.client().send_transaction(request).await?;
        let message_id = self
            .watcher
            .wait_for(
                tx_hash,
                "TokensAndCallSent",
                parser(|event| match event {
                    ContractEvent::TokensAndCallSent {
                        teleporter_message_id,
                        ..
                    } => Some(teleporter_message_id),
                    _ => None,
                }),
            )
            .await?;

        self.state.lock().await.pending_calls.insert(
            message_id,
            PendingCall {
                recipient_contract: input.recipient_contract,
                fallback_recipient: input.fallback_recipient,
                amount,
            },
        );
        info!(
            "Sent {} to contract {:?} on {:?} (message {:?}, tx {:?})",
            amount, input.recipient_contract, input.destination_blockchain_id, message_id, tx_hash
        );
        Ok(message_id)
    }

    pub async fn pending_call(&self, message_id: &H256) -> Option<PendingCall> {
        self.state.lock().await.pending_calls.get(message_id).cloned()
    }

    /// Decide a pending call's outcome from the delivery receipt's logs.
    ///
    /// Returns `Ok(None)` when neither `CallSucceeded` nor `CallFailed` for
    /// the pending call's recipient is present.
    pub async fn resolve_call_outcome(
        &self,
        message_id: H256,
        logs: &[EvmLog],
    ) -> Result<Option<CallOutcome>> {
        let mut state = self.state.lock().await;
        let pending = state.pending_calls.get(&message_id).cloned().ok_or_else(|| {
            ClientError::InvalidInput(format!("no pending call for message {:?}", message_id))
        })?;

        let outcome = get_event_from_logs(
            logs,
            parser(|event| match event {
                ContractEvent::CallSucceeded {
                    recipient_contract,
                    amount,
                } if recipient_contract == pending.recipient_contract => {
                    Some(CallOutcome::Succeeded { amount })
                }
                ContractEvent::CallFailed {
                    recipient_contract,
                    amount,
                } if recipient_contract == pending.recipient_contract => {
                    Some(CallOutcome::Failed {
                        fallback_recipient: pending.fallback_recipient,
                        amount,
                    })
                }
                _ => None,
            }),
        );

        if let Some(ref outcome) = outcome {
            state.pending_calls.remove(&message_id);
            match outcome {
                CallOutcome::Succeeded { amount } => {
                    info!("Call for message {:?} succeeded ({})", message_id, amount)
                }
                CallOutcome::Failed {
                    fallback_recipient,
                    amount,
                } => warn!(
                    "Call for message {:?} failed; {} credited to fallback {:?}",
                    message_id, amount, fallback_recipient
                ),
            }
        }
        Ok(outcome)
    }

    /// Wait for the delivery transaction on the destination chain, then
    /// resolve the outcome from its logs.
    pub async fn await_call_outcome(
        &self,
        destination: &dyn ChainClient,
        message_id: H256,
        delivery_tx_hash: H256,
    ) -> Result<CallOutcome> {
        let receipt =
            wait_for_transaction_success(destination, delivery_tx_hash, self.watcher.wait_config())
                .await?;
        self.resolve_call_outcome(message_id, &receipt.logs)
            .await?
            .ok_or_else(|| ClientError::EventNotFound {
                tx_hash: delivery_tx_hash,
                event: "CallSucceeded/CallFailed".to_string(),
                trace: None,
            })
    }

    // ------------------------------------------------------------------
    // Collateral
    // ------------------------------------------------------------------

    pub async fn is_collateralized(&self) -> bool {
        self.collateral.lock().await.is_collateralized()
    }

    pub async fn collateral(&self) -> CollateralProjection {
        self.collateral.lock().await.clone()
    }

    /// Apply an observed incoming transfer; returns the amount minted.
    pub async fn record_incoming(&self, amount: U256) -> U256 {
        self.collateral.lock().await.record_incoming(amount)
    }

    /// Read `getIsCollateralized()` and fold it into the projection.
    pub async fn refresh_collateral(&self) -> Result<bool> {
        let result = self
            .client()
            .call(self.address, encode_call("getIsCollateralized()", &[]))
            .await?;
        let chain_collateralized = Decoder::new(&result).bool(0)?;

        let mut collateral = self.collateral.lock().await;
        if collateral.is_collateralized() && !chain_collateralized {
            warn!(
                "Token remote {:?} reports not collateralized after it was; keeping local flag",
                self.address
            );
        }
        collateral.observe(chain_collateralized);
        Ok(collateral.is_collateralized())
    }

    fn require_native(&self, operation: &str) -> Result<()> {
        match self.settings.token_kind {
            TokenKind::Native => Ok(()),
            TokenKind::Erc20 => Err(ClientError::InvalidInput(format!(
                "{} is only available on native token remotes",
                operation
            ))),
        }
    }

    async fn read_uint(&self, signature: &str) -> Result<U256> {
        let result = self
            .client()
            .call(self.address, encode_call(signature, &[]))
            .await?;
        Decoder::new(&result).uint(0)
    }

    /// Supply on this chain: `totalNativeAssetSupply()` for native remotes,
    /// which counts the initial reserve imbalance and excludes burned fees,
    /// and ERC20 `totalSupply()` otherwise.
    pub async fn total_supply(&self) -> Result<U256> {
        match self.settings.token_kind {
            TokenKind::Native => self.read_uint("totalNativeAssetSupply()").await,
            TokenKind::Erc20 => self.read_uint("totalSupply()").await,
        }
    }

    pub async fn get_initial_reserve_imbalance(&self) -> Result<U256> {
        self.require_native("getInitialReserveImbalance")?;
        self.read_uint("getInitialReserveImbalance()").await
    }

    /// Send the fees burned on this chain back to the home contract.
    ///
    /// Returns the Teleporter message ID and the amount reported.
    pub async fn report_burned_tx_fees(&self, required_gas_limit: U256) -> Result<(H256, U256)> {
        self.require_native("reportBurnedTxFees")?;
        if required_gas_limit.is_zero() {
            return Err(ClientError::InvalidInput(
                "required gas limit must be positive".to_string(),
            ));
        }

        let data = encode_call(
            "reportBurnedTxFees(uint256)",
            &[Token::Uint(required_gas_limit)],
        );
        let tx_hash = self
            .client()
            .send_transaction(TransactionRequest::call(self.address, data))
            .await?;
        let (message_id, fees_burned) = self
            .watcher
            .wait_for(
                tx_hash,
                "ReportBurnedTxFees",
                parser(|event| match event {
                    ContractEvent::ReportBurnedTxFees {
                        teleporter_message_id,
                        fees_burned,
                    } => Some((teleporter_message_id, fees_burned)),
                    _ => None,
                }),
            )
            .await?;

        info!(
            "Reported {} burned fees to home (message {:?}, tx {:?})",
            fees_burned, message_id, tx_hash
        );
        Ok((message_id, fees_burned))
    }

    /// Total supply minus the outstanding reserve imbalance.
    pub async fn backed_supply(&self) -> Result<U256> {
        let total_supply = self.total_supply().await?;
        Ok(self.collateral.lock().await.backed_supply(total_supply))
    }

    pub async fn get_total_minted(&self) -> Result<U256> {
        self.read_uint("getTotalMinted()").await
    }

    /// `calculateNumWords(uint256)` as computed by the contract.
    pub async fn calculate_num_words_on_chain(&self, payload_size: u64) -> Result<u64> {
        let result = self
            .client()
            .call(
                self.address,
                encode_call("calculateNumWords(uint256)", &[Token::uint(payload_size)]),
            )
            .await?;
        Decoder::new(&result).u64(0)
    }
}
