//! Error definitions for the Teleporter protocol client.
//!
//! Errors fall into four groups that callers treat differently:
//! local validation failures (never retried), transient transport failures
//! (retry with backoff), on-chain reverts (authoritative, never resubmitted
//! with the same arguments) and protocol/idempotency violations detected
//! from cached state.

use ethereum_types::H256;
use thiserror::Error;

use crate::lifecycle::ValidationStatus;

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    // ------------------------------------------------------------------
    // Local validation
    // ------------------------------------------------------------------
    #[error("Invalid length for {field}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("Malformed payload for {message_type}: {reason}")]
    MalformedPayload {
        message_type: &'static str,
        reason: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Churn limit exceeded: requested {requested}, already used {used} of {limit} this hour")]
    ChurnLimitExceeded { requested: u64, used: u64, limit: u64 },

    #[error("Registration for {validation_id:?} expired at {expiry} (now {now})")]
    RegistrationExpired {
        validation_id: Option<H256>,
        expiry: u64,
        now: u64,
    },

    // ------------------------------------------------------------------
    // Protocol / idempotency
    // ------------------------------------------------------------------
    #[error("Node ID {node_id:?} already has an active validation (tx: {tx_hash:?})")]
    DuplicateNodeId {
        node_id: H256,
        tx_hash: Option<H256>,
    },

    #[error("Validation {validation_id:?} is not pending added (status: {status:?})")]
    NotPendingAdded {
        validation_id: H256,
        status: ValidationStatus,
    },

    #[error("Validation {validation_id:?} has status {actual:?}, expected {expected:?}")]
    InvalidStatus {
        validation_id: H256,
        expected: ValidationStatus,
        actual: ValidationStatus,
    },

    #[error("Unknown validation ID {0:?}")]
    UnknownValidation(H256),

    #[error("Token remote already registered with home (tx: {tx_hash:?})")]
    AlreadyRegistered { tx_hash: Option<H256> },

    // ------------------------------------------------------------------
    // Transient
    // ------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("JSON-RPC error from {method}: {message} (code: {code})")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Timed out waiting for {operation} (tx: {tx_hash:?})")]
    Timeout {
        operation: String,
        tx_hash: Option<H256>,
    },

    // ------------------------------------------------------------------
    // On-chain
    // ------------------------------------------------------------------
    #[error("Transaction {tx_hash:?} reverted: {reason}")]
    Reverted {
        tx_hash: Option<H256>,
        reason: String,
        trace: Option<String>,
    },

    // ------------------------------------------------------------------
    // Signatures
    // ------------------------------------------------------------------
    #[error("Insufficient signatures: collected weight {collected} of required {required}")]
    InsufficientSignatures { collected: u64, required: u64 },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("No validator set configured for subnet {0:?}")]
    UnknownSubnet(H256),

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------
    #[error("Failed to find {event} event in logs of transaction {tx_hash:?}")]
    EventNotFound {
        tx_hash: H256,
        event: String,
        trace: Option<String>,
    },
}

impl ClientError {
    /// Whether the caller may retry the same operation after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Network(_) | ClientError::Rpc { .. } | ClientError::Timeout { .. }
        )
    }

    /// Transaction hash of the triggering transaction, if one was submitted.
    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            ClientError::DuplicateNodeId { tx_hash, .. }
            | ClientError::AlreadyRegistered { tx_hash }
            | ClientError::Timeout { tx_hash, .. }
            | ClientError::Reverted { tx_hash, .. } => *tx_hash,
            ClientError::EventNotFound { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
