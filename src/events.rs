//! Contract event watching
//!
//! One schema table maps event names to canonical signatures and topics, and
//! one generic decoder turns logs into typed [`ContractEvent`]s. On top of
//! that sit `wait_for` (scan a transaction's receipt for an event) and
//! `subscribe` (pull-based cursor over `eth_getLogs`).

use std::collections::VecDeque;
use std::sync::Arc;

use ethereum_types::{Address, H256, U256};
use tracing::{debug, warn};

use crate::abi::{event_topic, Decoder};
use crate::error::{ClientError, Result};
use crate::evm_client::{wait_for_transaction_success, ChainClient, EvmLog, LogFilter, WaitConfig};
use crate::token_bridge::{SendAndCallInput, SendTokensInput};

// ============================================================================
// SCHEMA TABLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSchema {
    pub name: &'static str,
    pub signature: &'static str,
}

impl EventSchema {
    pub fn topic(&self) -> H256 {
        event_topic(self.signature)
    }
}

pub const EVENT_SCHEMAS: &[EventSchema] = &[
    // ValidatorManager
    EventSchema {
        name: "ValidationPeriodCreated",
        signature: "ValidationPeriodCreated(bytes32,bytes32,bytes32,uint256,uint64)",
    },
    EventSchema {
        name: "ValidationPeriodRegistered",
        signature: "ValidationPeriodRegistered(bytes32,uint256,uint256)",
    },
    EventSchema {
        name: "ValidatorRemovalInitialized",
        signature: "ValidatorRemovalInitialized(bytes32,bytes32,uint256,uint256)",
    },
    EventSchema {
        name: "ValidationPeriodEnded",
        signature: "ValidationPeriodEnded(bytes32,uint8)",
    },
    // TokenRemote
    EventSchema {
        name: "TokensSent",
        signature: "TokensSent(bytes32,address,(bytes32,address,address,address,uint256,uint256,uint256,address),uint256)",
    },
    EventSchema {
        name: "TokensAndCallSent",
        signature: "TokensAndCallSent(bytes32,address,(bytes32,address,address,bytes,uint256,uint256,address,address,address,uint256,uint256),uint256)",
    },
    EventSchema {
        name: "TokensWithdrawn",
        signature: "TokensWithdrawn(address,uint256)",
    },
    EventSchema {
        name: "CallSucceeded",
        signature: "CallSucceeded(address,uint256)",
    },
    EventSchema {
        name: "CallFailed",
        signature: "CallFailed(address,uint256)",
    },
    EventSchema {
        name: "ReportBurnedTxFees",
        signature: "ReportBurnedTxFees(bytes32,uint256)",
    },
    // TeleporterRegistryApp
    EventSchema {
        name: "TeleporterAddressPaused",
        signature: "TeleporterAddressPaused(address)",
    },
    EventSchema {
        name: "TeleporterAddressUnpaused",
        signature: "TeleporterAddressUnpaused(address)",
    },
    EventSchema {
        name: "MinTeleporterVersionUpdated",
        signature: "MinTeleporterVersionUpdated(uint256,uint256)",
    },
    // Warp precompile
    EventSchema {
        name: "SendWarpMessage",
        signature: "SendWarpMessage(address,bytes32,bytes)",
    },
];

pub fn schema(name: &str) -> Option<&'static EventSchema> {
    EVENT_SCHEMAS.iter().find(|s| s.name == name)
}

/// Topic of a known event name.
pub fn topic(name: &str) -> Result<H256> {
    schema(name)
        .map(EventSchema::topic)
        .ok_or_else(|| ClientError::InvalidInput(format!("unknown event '{}'", name)))
}

fn schema_for_topic(topic: &H256) -> Option<&'static EventSchema> {
    EVENT_SCHEMAS.iter().find(|s| s.topic() == *topic)
}

// ============================================================================
// TYPED EVENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractEvent {
    ValidationPeriodCreated {
        validation_id: H256,
        node_id: H256,
        register_validation_message_id: H256,
        weight: U256,
        registration_expiry: u64,
    },
    ValidationPeriodRegistered {
        validation_id: H256,
        weight: U256,
        timestamp: U256,
    },
    ValidatorRemovalInitialized {
        validation_id: H256,
        set_weight_message_id: H256,
        weight: U256,
        end_time: U256,
    },
    ValidationPeriodEnded {
        validation_id: H256,
        status: u8,
    },
    TokensSent {
        teleporter_message_id: H256,
        sender: Address,
        input: SendTokensInput,
        amount: U256,
    },
    TokensAndCallSent {
        teleporter_message_id: H256,
        sender: Address,
        input: SendAndCallInput,
        amount: U256,
    },
    TokensWithdrawn {
        recipient: Address,
        amount: U256,
    },
    CallSucceeded {
        recipient_contract: Address,
        amount: U256,
    },
    CallFailed {
        recipient_contract: Address,
        amount: U256,
    },
    ReportBurnedTxFees {
        teleporter_message_id: H256,
        fees_burned: U256,
    },
    TeleporterAddressPaused {
        teleporter_address: Address,
    },
    TeleporterAddressUnpaused {
        teleporter_address: Address,
    },
    MinTeleporterVersionUpdated {
        old_version: U256,
        new_version: U256,
    },
    SendWarpMessage {
        source_address: Address,
        unsigned_message_id: H256,
        message: Vec<u8>,
    },
}

impl ContractEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ContractEvent::ValidationPeriodCreated { .. } => "ValidationPeriodCreated",
            ContractEvent::ValidationPeriodRegistered { .. } => "ValidationPeriodRegistered",
            ContractEvent::ValidatorRemovalInitialized { .. } => "ValidatorRemovalInitialized",
            ContractEvent::ValidationPeriodEnded { .. } => "ValidationPeriodEnded",
            ContractEvent::TokensSent { .. } => "TokensSent",
            ContractEvent::TokensAndCallSent { .. } => "TokensAndCallSent",
            ContractEvent::TokensWithdrawn { .. } => "TokensWithdrawn",
            ContractEvent::CallSucceeded { .. } => "CallSucceeded",
            ContractEvent::CallFailed { .. } => "CallFailed",
            ContractEvent::ReportBurnedTxFees { .. } => "ReportBurnedTxFees",
            ContractEvent::TeleporterAddressPaused { .. } => "TeleporterAddressPaused",
            ContractEvent::TeleporterAddressUnpaused { .. } => "TeleporterAddressUnpaused",
            ContractEvent::MinTeleporterVersionUpdated { .. } => "MinTeleporterVersionUpdated",
            ContractEvent::SendWarpMessage { .. } => "SendWarpMessage",
        }
    }
}

fn indexed(log: &EvmLog, index: usize, event: &'static str) -> Result<H256> {
    log.topics
        .get(index)
        .copied()
        .ok_or_else(|| ClientError::MalformedPayload {
            message_type: event,
            reason: format!("missing indexed topic {}", index),
        })
}

fn indexed_address(log: &EvmLog, index: usize, event: &'static str) -> Result<Address> {
    Ok(Address::from_slice(&indexed(log, index, event)?.as_bytes()[12..]))
}

fn indexed_uint(log: &EvmLog, index: usize, event: &'static str) -> Result<U256> {
    Ok(U256::from_big_endian(indexed(log, index, event)?.as_bytes()))
}

/// Decode a log with a known signature topic.
///
/// Returns `Ok(None)` for logs whose topic is not in the schema table.
pub fn decode_log(log: &EvmLog) -> Result<Option<ContractEvent>> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };
    let Some(schema) = schema_for_topic(topic0) else {
        return Ok(None);
    };
    let name = schema.name;
    let data = Decoder::new(&log.data);

    let event = match name {
        "ValidationPeriodCreated" => ContractEvent::ValidationPeriodCreated {
            validation_id: indexed(log, 1, name)?,
            node_id: indexed(log, 2, name)?,
            register_validation_message_id: indexed(log, 3, name)?,
            weight: data.uint(0)?,
            registration_expiry: data.u64(1)?,
        },
        "ValidationPeriodRegistered" => ContractEvent::ValidationPeriodRegistered {
            validation_id: indexed(log, 1, name)?,
            weight: data.uint(0)?,
            timestamp: data.uint(1)?,
        },
        "ValidatorRemovalInitialized" => ContractEvent::ValidatorRemovalInitialized {
            validation_id: indexed(log, 1, name)?,
            set_weight_message_id: indexed(log, 2, name)?,
            weight: data.uint(0)?,
            end_time: data.uint(1)?,
        },
        "ValidationPeriodEnded" => ContractEvent::ValidationPeriodEnded {
            validation_id: indexed(log, 1, name)?,
            status: indexed_uint(log, 2, name)?.low_u32() as u8,
        },
        "TokensSent" => ContractEvent::TokensSent {
            teleporter_message_id: indexed(log, 1, name)?,
            sender: indexed_address(log, 2, name)?,
            input: SendTokensInput::decode(&data.inline(0)?)?,
            amount: data.uint(SendTokensInput::WORDS)?,
        },
        "TokensAndCallSent" => ContractEvent::TokensAndCallSent {
            teleporter_message_id: indexed(log, 1, name)?,
            sender: indexed_address(log, 2, name)?,
            input: SendAndCallInput::decode(&data.tuple(0)?)?,
            amount: data.uint(1)?,
        },
        "TokensWithdrawn" => ContractEvent::TokensWithdrawn {
            recipient: indexed_address(log, 1, name)?,
            amount: data.uint(0)?,
        },
        "CallSucceeded" => ContractEvent::CallSucceeded {
            recipient_contract: indexed_address(log, 1, name)?,
            amount: data.uint(0)?,
        },
        "CallFailed" => ContractEvent::CallFailed {
            recipient_contract: indexed_address(log, 1, name)?,
            amount: data.uint(0)?,
        },
        "ReportBurnedTxFees" => ContractEvent::ReportBurnedTxFees {
            teleporter_message_id: indexed(log, 1, name)?,
            fees_burned: data.uint(0)?,
        },
        "TeleporterAddressPaused" => ContractEvent::TeleporterAddressPaused {
            teleporter_address: indexed_address(log, 1, name)?,
        },
        "TeleporterAddressUnpaused" => ContractEvent::TeleporterAddressUnpaused {
            teleporter_address: indexed_address(log, 1, name)?,
        },
        "MinTeleporterVersionUpdated" => ContractEvent::MinTeleporterVersionUpdated {
            old_version: indexed_uint(log, 1, name)?,
            new_version: indexed_uint(log, 2, name)?,
        },
        "SendWarpMessage" => ContractEvent::SendWarpMessage {
            source_address: indexed_address(log, 1, name)?,
            unsigned_message_id: indexed(log, 2, name)?,
            message: data.bytes(0)?,
        },
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Parser accepting logs that decode to the event produced by `extract`.
pub fn parser<T>(
    extract: impl Fn(ContractEvent) -> Option<T>,
) -> impl Fn(&EvmLog) -> Option<T> {
    move |log| match decode_log(log) {
        Ok(Some(event)) => extract(event),
        Ok(None) => None,
        Err(e) => {
            debug!("Skipping undecodable log from {:?}: {}", log.address, e);
            None
        }
    }
}

/// First log (in emission order) the parser accepts.
pub fn get_event_from_logs<T>(logs: &[EvmLog], parser: impl Fn(&EvmLog) -> Option<T>) -> Option<T> {
    logs.iter().find_map(parser)
}

// ============================================================================
// EVENT WATCHER
// ============================================================================

#[derive(Clone)]
pub struct EventWatcher {
    client: Arc<dyn ChainClient>,
    wait: WaitConfig,
    log_block_range: u64,
}

impl EventWatcher {
    pub fn new(client: Arc<dyn ChainClient>, wait: WaitConfig, log_block_range: u64) -> Self {
        Self {
            client,
            wait,
            log_block_range: log_block_range.max(1),
        }
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    pub fn wait_config(&self) -> &WaitConfig {
        &self.wait
    }

    /// Wait for a successful receipt and return the first matching event.
    ///
    /// On no match, fails with `EventNotFound` carrying a best-effort trace.
    pub async fn wait_for<T>(
        &self,
        tx_hash: H256,
        event: &str,
        parser: impl Fn(&EvmLog) -> Option<T>,
    ) -> Result<T> {
        let receipt = wait_for_transaction_success(self.client.as_ref(), tx_hash, &self.wait).await?;
        if let Some(found) = get_event_from_logs(&receipt.logs, parser) {
            return Ok(found);
        }

        let trace = match self.client.trace_transaction(tx_hash).await {
            Ok(trace) => Some(trace),
            Err(e) => {
                warn!("Failed to trace transaction {:?}: {}", tx_hash, e);
                None
            }
        };
        Err(ClientError::EventNotFound {
            tx_hash,
            event: event.to_string(),
            trace,
        })
    }

    /// Cursor over `event_name` logs of `address` from `from_block` on.
    ///
    /// `indexed_args` filter the indexed topics after the signature topic.
    pub fn subscribe(
        &self,
        address: Address,
        event_name: &str,
        indexed_args: Vec<Option<H256>>,
        from_block: u64,
    ) -> Result<LogCursor> {
        let mut topics = vec![Some(topic(event_name)?)];
        topics.extend(indexed_args);
        Ok(LogCursor::new(
            self.client.clone(),
            address,
            topics,
            from_block,
            self.log_block_range,
        ))
    }

    /// Cursor over every log of `address`.
    pub fn subscribe_all(&self, address: Address, from_block: u64) -> LogCursor {
        LogCursor::new(
            self.client.clone(),
            address,
            Vec::new(),
            from_block,
            self.log_block_range,
        )
    }
}

/// Pull-based log cursor.
///
/// `next` yields logs in (block, index) order, `Ok(None)` once it has caught
/// up with the chain head (more may arrive later), and after the first error
/// keeps returning that error.
pub struct LogCursor {
    client: Arc<dyn ChainClient>,
    address: Address,
    topics: Vec<Option<H256>>,
    next_block: u64,
    block_range: u64,
    buffer: VecDeque<EvmLog>,
    failed: Option<ClientError>,
}

impl LogCursor {
    fn new(
        client: Arc<dyn ChainClient>,
        address: Address,
        topics: Vec<Option<H256>>,
        from_block: u64,
        block_range: u64,
    ) -> Self {
        Self {
            client,
            address,
            topics,
            next_block: from_block,
            block_range,
            buffer: VecDeque::new(),
            failed: None,
        }
    }

    /// First block not yet queried.
    pub fn position(&self) -> u64 {
        self.next_block
    }

    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    pub async fn next(&mut self) -> Result<Option<EvmLog>> {
        loop {
            if let Some(log) = self.buffer.pop_front() {
                return Ok(Some(log));
            }
            if let Some(ref e) = self.failed {
                return Err(e.clone());
            }

            let head = match self.client.get_block_number().await {
                Ok(head) => head,
                Err(e) => return Err(self.fail(e)),
            };
            if self.next_block > head {
                return Ok(None);
            }

            let to_block = head.min(self.next_block + self.block_range - 1);
            let filter = LogFilter {
                address: self.address,
                topics: self.topics.clone(),
                from_block: self.next_block,
                to_block,
            };
            let mut logs = match self.client.get_logs(&filter).await {
                Ok(logs) => logs,
                Err(e) => return Err(self.fail(e)),
            };
            logs.sort_by_key(|log| (log.block_number, log.log_index));
            debug!(
                "Fetched {} logs from {:?} in blocks {}..={}",
                logs.len(),
                self.address,
                filter.from_block,
                to_block
            );
            self.next_block = to_block + 1;
            self.buffer.extend(logs);
        }
    }

    /// Next log that decodes to a known event; unknown logs are skipped.
    pub async fn next_event(&mut self) -> Result<Option<ContractEvent>> {
        while let Some(log) = self.next().await? {
            if let Some(event) = decode_log(&log)? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn fail(&mut self, e: ClientError) -> ClientError {
        warn!("Log cursor for {:?} failed: {}", self.address, e);
        self.failed = Some(e.clone());
        e
    }
}
