//! Validator lifecycle
//!
//! Drives a validator through `PendingAdded -> Active -> PendingRemoved ->
//! Completed` on the validator manager contract and keeps a local record per
//! validation ID. Records only ever move forward; resends never change state.
//!
//! The contract is authoritative. Local records are refreshed from observed
//! events (`apply_event`) and from periodic reads (`resync`), and either path
//! may only advance a record.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ethereum_types::{Address, H256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::abi::{encode_call, Decoder, Token};
use crate::aggregator::SignatureAggregator;
use crate::churn::ChurnTracker;
use crate::codec::{
    registration_message, RegisterValidatorMessage, ValidatorRegistrationMessage,
    BLS_PUBLIC_KEY_LEN,
};
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::events::{get_event_from_logs, parser, ContractEvent, EventWatcher};
use crate::evm_client::{wait_for_transaction_success, TransactionRequest};
use crate::warp::{SignedMessage, UnsignedMessage};

/// Unix-seconds time source.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp().max(0) as u64)
}

// ============================================================================
// TYPES
// ============================================================================

/// On-chain validator status, in contract enum order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValidationStatus {
    Unknown = 0,
    PendingAdded = 1,
    Active = 2,
    PendingRemoved = 3,
    Completed = 4,
    /// Ended without ever becoming active
    Invalidated = 5,
}

impl ValidationStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ValidationStatus::PendingAdded,
            2 => ValidationStatus::Active,
            3 => ValidationStatus::PendingRemoved,
            4 => ValidationStatus::Completed,
            5 => ValidationStatus::Invalidated,
            _ => ValidationStatus::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ValidationStatus::Completed | ValidationStatus::Invalidated
        )
    }

    /// Weight counted toward the manager's total.
    fn counts_toward_total(&self) -> bool {
        matches!(
            self,
            ValidationStatus::PendingAdded | ValidationStatus::Active
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRecord {
    pub validation_id: H256,
    pub node_id: H256,
    pub weight: u64,
    pub status: ValidationStatus,
    pub registration_expiry: u64,
    pub bls_public_key: [u8; BLS_PUBLIC_KEY_LEN],
    /// Register warp message ID
    pub message_id: H256,
    /// Removal warp message ID, once removal was initialized
    pub set_weight_message_id: Option<H256>,
    pub register_tx_hash: Option<H256>,
    pub end_tx_hash: Option<H256>,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    /// Aggregated P-chain acknowledgment, reused on retries
    pub registration_ack: Option<SignedMessage>,
}

impl ValidationRecord {
    /// Move to `status` if it is further along. Returns whether it moved.
    fn advance(&mut self, status: ValidationStatus) -> bool {
        if status > self.status {
            debug!(
                "Validation {:?}: {:?} -> {:?}",
                self.validation_id, self.status, status
            );
            self.status = status;
            true
        } else {
            false
        }
    }
}

/// Settings the validator manager was initialized with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorManagerSettings {
    pub p_chain_blockchain_id: H256,
    pub subnet_id: H256,
    pub maximum_hourly_churn: u8,
    /// Subnet whose validators sign P-chain acknowledgments
    pub signing_subnet_id: H256,
}

#[derive(Debug)]
struct LifecycleState {
    records: HashMap<H256, ValidationRecord>,
    /// node ID -> validation ID of its non-terminal record
    node_index: HashMap<H256, H256>,
    /// Node IDs with a registration in flight
    reserved_nodes: HashSet<H256>,
    /// Validation IDs with a removal in flight
    in_flight: HashSet<H256>,
    churn: ChurnTracker,
}

impl LifecycleState {
    fn total_weight(&self) -> u64 {
        self.records
            .values()
            .filter(|r| r.status.counts_toward_total())
            .map(|r| r.weight)
            .sum()
    }

    fn get(&self, validation_id: &H256) -> Result<&ValidationRecord> {
        self.records
            .get(validation_id)
            .ok_or(ClientError::UnknownValidation(*validation_id))
    }

    fn require(&self, validation_id: &H256, expected: ValidationStatus) -> Result<&ValidationRecord> {
        let record = self.get(validation_id)?;
        if record.status != expected {
            return Err(ClientError::InvalidStatus {
                validation_id: *validation_id,
                expected,
                actual: record.status,
            });
        }
        Ok(record)
    }

    fn free_node(&mut self, node_id: &H256, validation_id: &H256) {
        if self.node_index.get(node_id) == Some(validation_id) {
            self.node_index.remove(node_id);
        }
    }
}

// ============================================================================
// LIFECYCLE
// ============================================================================

pub struct ValidatorLifecycle {
    watcher: EventWatcher,
    aggregator: Arc<SignatureAggregator>,
    manager_address: Address,
    settings: ValidatorManagerSettings,
    network_id: u32,
    clock: Clock,
    state: Mutex<LifecycleState>,
}

impl ValidatorLifecycle {
    pub fn new(
        watcher: EventWatcher,
        aggregator: Arc<SignatureAggregator>,
        manager_address: Address,
        settings: ValidatorManagerSettings,
        network_id: u32,
    ) -> Result<Self> {
        let churn = ChurnTracker::new(settings.maximum_hourly_churn)?;
        Ok(Self {
            watcher,
            aggregator,
            manager_address,
            settings,
            network_id,
            clock: system_clock(),
            state: Mutex::new(LifecycleState {
                records: HashMap::new(),
                node_index: HashMap::new(),
                reserved_nodes: HashSet::new(),
                in_flight: HashSet::new(),
                churn,
            }),
        })
    }

    pub fn from_config(
        watcher: EventWatcher,
        aggregator: Arc<SignatureAggregator>,
        config: &Config,
    ) -> Result<Self> {
        let vm = &config.validator_manager;
        Self::new(
            watcher,
            aggregator,
            config.contracts.validator_manager,
            ValidatorManagerSettings {
                p_chain_blockchain_id: vm.p_chain_blockchain_id,
                subnet_id: vm.subnet_id,
                maximum_hourly_churn: vm.maximum_hourly_churn,
                signing_subnet_id: vm.signing_subnet_id,
            },
            config.chain.network_id,
        )
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn manager_address(&self) -> Address {
        self.manager_address
    }

    pub fn settings(&self) -> &ValidatorManagerSettings {
        &self.settings
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn record(&self, validation_id: &H256) -> Option<ValidationRecord> {
        self.state.lock().await.records.get(validation_id).cloned()
    }

    pub async fn records(&self) -> Vec<ValidationRecord> {
        self.state.lock().await.records.values().cloned().collect()
    }

    /// Weight of pending-added and active validators.
    pub async fn total_active_weight(&self) -> u64 {
        self.state.lock().await.total_weight()
    }

    /// Weight churned in the current hour.
    pub async fn churn_used(&self) -> u64 {
        let now = self.now();
        self.state.lock().await.churn.used(now)
    }

    /// Seed a validator that is already active on chain (e.g. the initial set).
    pub async fn track_active_validator(
        &self,
        validation_id: H256,
        node_id: H256,
        weight: u64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.node_index.get(&node_id) {
            if *existing != validation_id {
                return Err(ClientError::DuplicateNodeId {
                    node_id,
                    tx_hash: None,
                });
            }
        }
        state.node_index.insert(node_id, validation_id);
        state
            .records
            .entry(validation_id)
            .or_insert_with(|| ValidationRecord {
                validation_id,
                node_id,
                weight,
                status: ValidationStatus::Active,
                registration_expiry: 0,
                bls_public_key: [0u8; BLS_PUBLIC_KEY_LEN],
                message_id: H256::zero(),
                set_weight_message_id: None,
                register_tx_hash: None,
                end_tx_hash: None,
                start_time: None,
                end_time: None,
                registration_ack: None,
            });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Start a registration and record it as `PendingAdded`.
    ///
    /// The node ID and churn allowance are reserved before submission and
    /// released if anything fails.
    pub async fn initialize_registration(
        &self,
        weight: u64,
        node_id: H256,
        registration_expiry: u64,
        bls_public_key: &[u8],
    ) -> Result<H256> {
        let message = registration_message(weight, node_id, registration_expiry, bls_public_key)?;
        if weight == 0 {
            return Err(ClientError::InvalidInput("zero validator weight".to_string()));
        }
        let now = self.now();
        if registration_expiry <= now {
            return Err(ClientError::RegistrationExpired {
                validation_id: None,
                expiry: registration_expiry,
                now,
            });
        }

        let reservation = {
            let mut state = self.state.lock().await;
            if let Some(existing) = state.node_index.get(&node_id) {
                let tx_hash = state.records.get(existing).and_then(|r| r.register_tx_hash);
                return Err(ClientError::DuplicateNodeId { node_id, tx_hash });
            }
            if state.reserved_nodes.contains(&node_id) {
                return Err(ClientError::DuplicateNodeId {
                    node_id,
                    tx_hash: None,
                });
            }
            let total = state.total_weight();
            let reservation = state.churn.reserve(weight, total, now)?;
            state.reserved_nodes.insert(node_id);
            reservation
        };

        let result = self.submit_registration(&message).await;

        let mut state = self.state.lock().await;
        state.reserved_nodes.remove(&node_id);
        match result {
            Ok(record) => {
                let validation_id = record.validation_id;
                info!(
                    "Validation {:?} for node {:?} pending (weight {}, tx {:?})",
                    validation_id, node_id, weight, record.register_tx_hash
                );
                state.node_index.insert(node_id, validation_id);
                state.records.insert(validation_id, record);
                Ok(validation_id)
            }
            Err(e) => {
                state.churn.release(reservation);
                Err(e)
            }
        }
    }

    async fn submit_registration(&self, message: &RegisterValidatorMessage) -> Result<ValidationRecord> {
        let data = encode_call(
            "initializeValidatorRegistration(uint64,bytes32,uint64,bytes)",
            &[
                Token::uint(message.weight),
                Token::FixedBytes32(message.node_id),
                Token::uint(message.registration_expiry),
                Token::Bytes(message.bls_public_key.to_vec()),
            ],
        );
        let node_id = message.node_id;
        let created = async {
            let tx_hash = self
                .watcher
                .client()
                .send_transaction(TransactionRequest::call(self.manager_address, data))
                .await?;
            let event = self
                .watcher
                .wait_for(
                    tx_hash,
                    "ValidationPeriodCreated",
                    parser(|event| match event {
                        ContractEvent::ValidationPeriodCreated {
                            validation_id,
                            node_id: created_node,
                            register_validation_message_id,
                            ..
                        } if created_node == node_id => {
                            Some((validation_id, register_validation_message_id))
                        }
                        _ => None,
                    }),
                )
                .await?;
            Ok::<_, ClientError>((tx_hash, event))
        }
        .await;

        let (tx_hash, (validation_id, message_id)) =
            created.map_err(|e| duplicate_node_from_revert(e, node_id))?;

        let local_id = message.validation_id();
        if local_id != validation_id {
            warn!(
                "Contract validation ID {:?} differs from locally derived {:?}",
                validation_id, local_id
            );
        }

        Ok(ValidationRecord {
            validation_id,
            node_id,
            weight: message.weight,
            status: ValidationStatus::PendingAdded,
            registration_expiry: message.registration_expiry,
            bls_public_key: message.bls_public_key,
            message_id,
            set_weight_message_id: None,
            register_tx_hash: Some(tx_hash),
            end_tx_hash: None,
            start_time: None,
            end_time: None,
            registration_ack: None,
        })
    }

    /// P-chain acknowledgment for a validation ID.
    pub fn acknowledgment(&self, validation_id: H256, registered: bool) -> UnsignedMessage {
        UnsignedMessage::new(
            self.network_id,
            self.settings.p_chain_blockchain_id,
            ValidatorRegistrationMessage {
                validation_id,
                registered,
            }
            .encode(),
        )
    }

    /// Deliver the signed registration acknowledgment and mark `Active`.
    pub async fn complete_registration(&self, validation_id: H256, message_index: u32) -> Result<()> {
        let now = self.now();
        let cached_ack = {
            let mut state = self.state.lock().await;
            let record = state.get(&validation_id)?;
            if record.status != ValidationStatus::PendingAdded {
                return Err(ClientError::NotPendingAdded {
                    validation_id,
                    status: record.status,
                });
            }
            if now > record.registration_expiry {
                return Err(ClientError::RegistrationExpired {
                    validation_id: Some(validation_id),
                    expiry: record.registration_expiry,
                    now,
                });
            }
            let cached_ack = record.registration_ack.clone();
            if !state.in_flight.insert(validation_id) {
                return Err(ClientError::InvalidInput(format!(
                    "completion of {:?} already in progress",
                    validation_id
                )));
            }
            cached_ack
        };

        let result = self
            .submit_registration_completion(validation_id, message_index, cached_ack)
            .await;
        self.state.lock().await.in_flight.remove(&validation_id);
        result
    }

    async fn submit_registration_completion(
        &self,
        validation_id: H256,
        message_index: u32,
        cached_ack: Option<SignedMessage>,
    ) -> Result<()> {
        let signed = match cached_ack {
            Some(signed) => signed,
            None => {
                let signed = self
                    .aggregator
                    .aggregate(
                        &self.acknowledgment(validation_id, true),
                        self.settings.signing_subnet_id,
                    )
                    .await?;
                if let Some(record) = self.state.lock().await.records.get_mut(&validation_id) {
                    record.registration_ack = Some(signed.clone());
                }
                signed
            }
        };

        let data = encode_call(
            "completeValidatorRegistration(uint32)",
            &[Token::uint(message_index)],
        );
        let tx_hash = self
            .watcher
            .client()
            .send_transaction(
                TransactionRequest::call(self.manager_address, data)
                    .with_warp_message(signed.to_bytes()),
            )
            .await?;
        let timestamp = self
            .watcher
            .wait_for(
                tx_hash,
                "ValidationPeriodRegistered",
                parser(|event| match event {
                    ContractEvent::ValidationPeriodRegistered {
                        validation_id: id,
                        timestamp,
                        ..
                    } if id == validation_id => Some(timestamp),
                    _ => None,
                }),
            )
            .await?;

        let mut state = self.state.lock().await;
        if let Some(record) = state.records.get_mut(&validation_id) {
            record.advance(ValidationStatus::Active);
            record.start_time = Some(timestamp.low_u64());
        }
        info!("Validation {:?} active (tx {:?})", validation_id, tx_hash);
        Ok(())
    }

    /// Re-emit the registration warp message. Never changes state.
    pub async fn resend_registration(&self, validation_id: H256) -> Result<H256> {
        let message_id = {
            let state = self.state.lock().await;
            state
                .require(&validation_id, ValidationStatus::PendingAdded)?
                .message_id
        };
        self.resend(
            "resendRegisterValidatorMessage(bytes32)",
            validation_id,
            message_id,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Start removing an active validator; returns the set-weight message ID.
    pub async fn initialize_end_validation(&self, validation_id: H256) -> Result<H256> {
        let now = self.now();
        let reservation = {
            let mut state = self.state.lock().await;
            let weight = state.require(&validation_id, ValidationStatus::Active)?.weight;
            if state.in_flight.contains(&validation_id) {
                return Err(ClientError::InvalidInput(format!(
                    "removal of {:?} already in progress",
                    validation_id
                )));
            }
            let total = state.total_weight();
            let reservation = state.churn.reserve(weight, total, now)?;
            state.in_flight.insert(validation_id);
            reservation
        };

        let result = self.submit_end_validation(validation_id).await;

        let mut state = self.state.lock().await;
        state.in_flight.remove(&validation_id);
        match result {
            Ok((tx_hash, set_weight_message_id, end_time)) => {
                if let Some(record) = state.records.get_mut(&validation_id) {
                    record.advance(ValidationStatus::PendingRemoved);
                    record.set_weight_message_id = Some(set_weight_message_id);
                    record.end_tx_hash = Some(tx_hash);
                    record.end_time = Some(end_time);
                }
                info!(
                    "Removal of {:?} initialized (message {:?}, tx {:?})",
                    validation_id, set_weight_message_id, tx_hash
                );
                Ok(set_weight_message_id)
            }
            Err(e) => {
                state.churn.release(reservation);
                Err(e)
            }
        }
    }

    async fn submit_end_validation(&self, validation_id: H256) -> Result<(H256, H256, u64)> {
        let data = encode_call(
            "initializeEndValidation(bytes32)",
            &[Token::FixedBytes32(validation_id)],
        );
        let tx_hash = self
            .watcher
            .client()
            .send_transaction(TransactionRequest::call(self.manager_address, data))
            .await?;
        let (set_weight_message_id, end_time) = self
            .watcher
            .wait_for(
                tx_hash,
                "ValidatorRemovalInitialized",
                parser(|event| match event {
                    ContractEvent::ValidatorRemovalInitialized {
                        validation_id: id,
                        set_weight_message_id,
                        end_time,
                        ..
                    } if id == validation_id => Some((set_weight_message_id, end_time)),
                    _ => None,
                }),
            )
            .await?;
        Ok((tx_hash, set_weight_message_id, end_time.low_u64()))
    }

    /// Re-emit the removal warp message. Never changes state.
    pub async fn resend_end_validation(&self, validation_id: H256) -> Result<H256> {
        let message_id = {
            let state = self.state.lock().await;
            let record = state.require(&validation_id, ValidationStatus::PendingRemoved)?;
            record
                .set_weight_message_id
                .ok_or(ClientError::InvalidStatus {
                    validation_id,
                    expected: ValidationStatus::PendingRemoved,
                    actual: record.status,
                })?
        };
        self.resend(
            "resendEndValidatorMessage(bytes32)",
            validation_id,
            message_id,
        )
        .await
    }

    /// Deliver the signed removal acknowledgment and mark `Completed`.
    pub async fn complete_end_validation(&self, validation_id: H256, message_index: u32) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.require(&validation_id, ValidationStatus::PendingRemoved)?;
            if !state.in_flight.insert(validation_id) {
                return Err(ClientError::InvalidInput(format!(
                    "completion of {:?} already in progress",
                    validation_id
                )));
            }
        }

        let result = self
            .submit_end_completion(validation_id, message_index)
            .await;
        self.state.lock().await.in_flight.remove(&validation_id);
        result
    }

    async fn submit_end_completion(&self, validation_id: H256, message_index: u32) -> Result<()> {
        let signed = self
            .aggregator
            .aggregate(
                &self.acknowledgment(validation_id, false),
                self.settings.signing_subnet_id,
            )
            .await?;

        let data = encode_call("completeEndValidation(uint32)", &[Token::uint(message_index)]);
        let tx_hash = self
            .watcher
            .client()
            .send_transaction(
                TransactionRequest::call(self.manager_address, data)
                    .with_warp_message(signed.to_bytes()),
            )
            .await?;
        let status = self
            .watcher
            .wait_for(
                tx_hash,
                "ValidationPeriodEnded",
                parser(|event| match event {
                    ContractEvent::ValidationPeriodEnded {
                        validation_id: id,
                        status,
                    } if id == validation_id => Some(status),
                    _ => None,
                }),
            )
            .await?;

        let mut state = self.state.lock().await;
        let mut freed = None;
        if let Some(record) = state.records.get_mut(&validation_id) {
            let final_status = match ValidationStatus::from_u8(status) {
                s if s.is_terminal() => s,
                _ => ValidationStatus::Completed,
            };
            record.advance(final_status);
            freed = Some(record.node_id);
        }
        if let Some(node_id) = freed {
            state.free_node(&node_id, &validation_id);
        }
        info!("Validation {:?} completed (tx {:?})", validation_id, tx_hash);
        Ok(())
    }

    /// Submit a resend call and cross-check the emitted warp message ID.
    async fn resend(&self, signature: &str, validation_id: H256, message_id: H256) -> Result<H256> {
        let data = encode_call(signature, &[Token::FixedBytes32(validation_id)]);
        let tx_hash = self
            .watcher
            .client()
            .send_transaction(TransactionRequest::call(self.manager_address, data))
            .await?;
        let receipt = wait_for_transaction_success(
            self.watcher.client().as_ref(),
            tx_hash,
            self.watcher.wait_config(),
        )
        .await?;

        let emitted = get_event_from_logs(
            &receipt.logs,
            parser(|event| match event {
                ContractEvent::SendWarpMessage {
                    unsigned_message_id,
                    ..
                } => Some(unsigned_message_id),
                _ => None,
            }),
        );
        if let Some(emitted) = emitted {
            if emitted != message_id {
                warn!(
                    "Resend for {:?} emitted message {:?}, expected {:?}",
                    validation_id, emitted, message_id
                );
            }
        }
        debug!("Resent message {:?} for {:?} (tx {:?})", message_id, validation_id, tx_hash);
        Ok(message_id)
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Fold an observed contract event into the records. Returns whether
    /// anything changed.
    pub async fn apply_event(&self, event: &ContractEvent) -> bool {
        let mut state = self.state.lock().await;
        match event {
            ContractEvent::ValidationPeriodCreated {
                validation_id,
                node_id,
                register_validation_message_id,
                weight,
                registration_expiry,
            } => {
                if state.records.contains_key(validation_id) {
                    return false;
                }
                if state.node_index.contains_key(node_id) {
                    warn!(
                        "Observed registration {:?} for node {:?} which already has a record",
                        validation_id, node_id
                    );
                    return false;
                }
                state.node_index.insert(*node_id, *validation_id);
                state.records.insert(
                    *validation_id,
                    ValidationRecord {
                        validation_id: *validation_id,
                        node_id: *node_id,
                        weight: weight.low_u64(),
                        status: ValidationStatus::PendingAdded,
                        registration_expiry: *registration_expiry,
                        bls_public_key: [0u8; BLS_PUBLIC_KEY_LEN],
                        message_id: *register_validation_message_id,
                        set_weight_message_id: None,
                        register_tx_hash: None,
                        end_tx_hash: None,
                        start_time: None,
                        end_time: None,
                        registration_ack: None,
                    },
                );
                true
            }
            ContractEvent::ValidationPeriodRegistered {
                validation_id,
                timestamp,
                ..
            } => match state.records.get_mut(validation_id) {
                Some(record) => {
                    let moved = record.advance(ValidationStatus::Active);
                    if moved {
                        record.start_time = Some(timestamp.low_u64());
                    }
                    moved
                }
                None => false,
            },
            ContractEvent::ValidatorRemovalInitialized {
                validation_id,
                set_weight_message_id,
                end_time,
                ..
            } => match state.records.get_mut(validation_id) {
                Some(record) => {
                    let moved = record.advance(ValidationStatus::PendingRemoved);
                    if moved {
                        record.set_weight_message_id = Some(*set_weight_message_id);
                        record.end_time = Some(end_time.low_u64());
                    }
                    moved
                }
                None => false,
            },
            ContractEvent::ValidationPeriodEnded {
                validation_id,
                status,
            } => {
                let final_status = match ValidationStatus::from_u8(*status) {
                    s if s.is_terminal() => s,
                    _ => ValidationStatus::Completed,
                };
                let Some(record) = state.records.get_mut(validation_id) else {
                    return false;
                };
                let moved = record.advance(final_status);
                let node_id = record.node_id;
                if moved {
                    state.free_node(&node_id, validation_id);
                }
                moved
            }
            _ => false,
        }
    }

    /// Re-read non-terminal records from the contract and advance any the
    /// chain shows as ended. Returns how many records changed.
    pub async fn resync(&self) -> Result<usize> {
        let pending: Vec<(H256, H256, u64, ValidationStatus)> = {
            let state = self.state.lock().await;
            state
                .records
                .values()
                .filter(|r| !r.status.is_terminal())
                .map(|r| (r.validation_id, r.node_id, r.weight, r.status))
                .collect()
        };

        let mut changed = 0;
        for (validation_id, node_id, weight, status) in pending {
            let active_id = self.active_validator(node_id).await?;
            let chain_weight = self.get_weight(validation_id).await?;

            let mut state = self.state.lock().await;
            let Some(record) = state.records.get_mut(&validation_id) else {
                continue;
            };
            let mut moved = false;

            if active_id != validation_id {
                // The node no longer maps to this validation: it has ended
                let final_status = if status == ValidationStatus::PendingAdded {
                    ValidationStatus::Invalidated
                } else {
                    ValidationStatus::Completed
                };
                moved = record.advance(final_status);
                if moved {
                    state.free_node(&node_id, &validation_id);
                }
            } else if chain_weight != weight && chain_weight != 0 {
                warn!(
                    "Validation {:?} weight {} locally, {} on chain; adopting chain value",
                    validation_id, weight, chain_weight
                );
                record.weight = chain_weight;
                moved = true;
            }

            if moved {
                changed += 1;
            }
        }

        if changed > 0 {
            info!("Resync advanced {} validation records", changed);
        }
        Ok(changed)
    }

    /// `activeValidators(bytes32)`: validation ID currently held by a node.
    pub async fn active_validator(&self, node_id: H256) -> Result<H256> {
        let result = self
            .watcher
            .client()
            .call(
                self.manager_address,
                encode_call("activeValidators(bytes32)", &[Token::FixedBytes32(node_id)]),
            )
            .await?;
        Decoder::new(&result).bytes32(0)
    }

    /// `getWeight(bytes32)`
    pub async fn get_weight(&self, validation_id: H256) -> Result<u64> {
        let result = self
            .watcher
            .client()
            .call(
                self.manager_address,
                encode_call("getWeight(bytes32)", &[Token::FixedBytes32(validation_id)]),
            )
            .await?;
        Decoder::new(&result).u64(0)
    }
}

/// An on-chain "already active" revert is the node-ID conflict.
fn duplicate_node_from_revert(error: ClientError, node_id: H256) -> ClientError {
    if let ClientError::Reverted { tx_hash, reason, .. } = &error {
        if reason.to_lowercase().contains("already active") {
            return ClientError::DuplicateNodeId {
                node_id,
                tx_hash: *tx_hash,
            };
        }
    }
    error
}
