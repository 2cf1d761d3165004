//! Packed warp payload codec
//!
//! Wire format: `[1-byte type][fixed-size big-endian fields]`.
//!
//! | type | message               | body                                              |
//! |------|-----------------------|---------------------------------------------------|
//! | 0x01 | RegisterValidator     | weight u64, node_id [32], expiry u64, bls_pk [48] |
//! | 0x02 | ValidatorRegistration | validation_id [32], registered u8                 |
//! | 0x03 | SetValidatorWeight    | validation_id [32], nonce u64, weight u64         |

use ethereum_types::H256;
use sha2::{Digest, Sha256};

use crate::error::{ClientError, Result};

pub const BLS_PUBLIC_KEY_LEN: usize = 48;

pub const REGISTER_VALIDATOR_TYPE: u8 = 0x01;
pub const VALIDATOR_REGISTRATION_TYPE: u8 = 0x02;
pub const SET_VALIDATOR_WEIGHT_TYPE: u8 = 0x03;

const REGISTER_VALIDATOR_BODY_LEN: usize = 8 + 32 + 8 + BLS_PUBLIC_KEY_LEN;
const VALIDATOR_REGISTRATION_BODY_LEN: usize = 32 + 1;
const SET_VALIDATOR_WEIGHT_BODY_LEN: usize = 32 + 8 + 8;

// ============================================================================
// MESSAGE TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterValidatorMessage {
    pub weight: u64,
    pub node_id: H256,
    pub registration_expiry: u64,
    pub bls_public_key: [u8; BLS_PUBLIC_KEY_LEN],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorRegistrationMessage {
    pub validation_id: H256,
    pub registered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetValidatorWeightMessage {
    /// Opaque passthrough
    pub validation_id: H256,
    pub nonce: u64,
    pub weight: u64,
}

/// Decoded warp payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarpPayload {
    RegisterValidator(RegisterValidatorMessage),
    ValidatorRegistration(ValidatorRegistrationMessage),
    SetValidatorWeight(SetValidatorWeightMessage),
}

impl WarpPayload {
    pub fn message_type(&self) -> u8 {
        match self {
            WarpPayload::RegisterValidator(_) => REGISTER_VALIDATOR_TYPE,
            WarpPayload::ValidatorRegistration(_) => VALIDATOR_REGISTRATION_TYPE,
            WarpPayload::SetValidatorWeight(_) => SET_VALIDATOR_WEIGHT_TYPE,
        }
    }

    /// Packed bytes including the leading type tag.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            WarpPayload::RegisterValidator(msg) => msg.encode(),
            WarpPayload::ValidatorRegistration(msg) => msg.encode(),
            WarpPayload::SetValidatorWeight(msg) => msg.encode(),
        }
    }
}

impl RegisterValidatorMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + REGISTER_VALIDATOR_BODY_LEN);
        out.push(REGISTER_VALIDATOR_TYPE);
        out.extend_from_slice(&self.weight.to_be_bytes());
        out.extend_from_slice(self.node_id.as_bytes());
        out.extend_from_slice(&self.registration_expiry.to_be_bytes());
        out.extend_from_slice(&self.bls_public_key);
        out
    }

    /// sha256 of the packed message.
    pub fn validation_id(&self) -> H256 {
        validation_id(&self.encode())
    }
}

impl ValidatorRegistrationMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + VALIDATOR_REGISTRATION_BODY_LEN);
        out.push(VALIDATOR_REGISTRATION_TYPE);
        out.extend_from_slice(self.validation_id.as_bytes());
        out.push(self.registered as u8);
        out
    }
}

impl SetValidatorWeightMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + SET_VALIDATOR_WEIGHT_BODY_LEN);
        out.push(SET_VALIDATOR_WEIGHT_TYPE);
        out.extend_from_slice(self.validation_id.as_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.weight.to_be_bytes());
        out
    }
}

// ============================================================================
// ENCODE / DECODE
// ============================================================================

/// Build the packed registration message.
///
/// Fails with `InvalidLength` when the BLS key is not 48 bytes.
pub fn encode_registration(
    weight: u64,
    node_id: H256,
    registration_expiry: u64,
    bls_public_key: &[u8],
) -> Result<Vec<u8>> {
    Ok(registration_message(weight, node_id, registration_expiry, bls_public_key)?.encode())
}

pub fn registration_message(
    weight: u64,
    node_id: H256,
    registration_expiry: u64,
    bls_public_key: &[u8],
) -> Result<RegisterValidatorMessage> {
    let bls_public_key: [u8; BLS_PUBLIC_KEY_LEN] =
        bls_public_key
            .try_into()
            .map_err(|_| ClientError::InvalidLength {
                field: "bls_public_key",
                expected: BLS_PUBLIC_KEY_LEN,
                actual: bls_public_key.len(),
            })?;
    Ok(RegisterValidatorMessage {
        weight,
        node_id,
        registration_expiry,
        bls_public_key,
    })
}

/// Content-derived validation ID of a packed registration message.
pub fn validation_id(registration_bytes: &[u8]) -> H256 {
    H256::from_slice(&Sha256::digest(registration_bytes))
}

fn read_u64(body: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&body[offset..offset + 8]);
    u64::from_be_bytes(buf)
}

fn check_len(message_type: &'static str, body: &[u8], expected: usize) -> Result<()> {
    if body.len() != expected {
        return Err(ClientError::MalformedPayload {
            message_type,
            reason: format!("expected {} body bytes, got {}", expected, body.len()),
        });
    }
    Ok(())
}

/// Decode a message body (without the type tag) of the given type.
pub fn decode(message_type: u8, body: &[u8]) -> Result<WarpPayload> {
    match message_type {
        REGISTER_VALIDATOR_TYPE => {
            check_len("RegisterValidator", body, REGISTER_VALIDATOR_BODY_LEN)?;
            let mut bls_public_key = [0u8; BLS_PUBLIC_KEY_LEN];
            bls_public_key.copy_from_slice(&body[48..]);
            Ok(WarpPayload::RegisterValidator(RegisterValidatorMessage {
                weight: read_u64(body, 0),
                node_id: H256::from_slice(&body[8..40]),
                registration_expiry: read_u64(body, 40),
                bls_public_key,
            }))
        }
        VALIDATOR_REGISTRATION_TYPE => {
            check_len("ValidatorRegistration", body, VALIDATOR_REGISTRATION_BODY_LEN)?;
            let registered = match body[32] {
                0 => false,
                1 => true,
                other => {
                    return Err(ClientError::MalformedPayload {
                        message_type: "ValidatorRegistration",
                        reason: format!("registered flag must be 0 or 1, got {}", other),
                    })
                }
            };
            Ok(WarpPayload::ValidatorRegistration(ValidatorRegistrationMessage {
                validation_id: H256::from_slice(&body[..32]),
                registered,
            }))
        }
        SET_VALIDATOR_WEIGHT_TYPE => {
            check_len("SetValidatorWeight", body, SET_VALIDATOR_WEIGHT_BODY_LEN)?;
            Ok(WarpPayload::SetValidatorWeight(SetValidatorWeightMessage {
                validation_id: H256::from_slice(&body[..32]),
                nonce: read_u64(body, 32),
                weight: read_u64(body, 40),
            }))
        }
        other => Err(ClientError::UnknownMessageType(other)),
    }
}

/// Decode packed bytes whose first byte is the type tag.
pub fn decode_packed(bytes: &[u8]) -> Result<WarpPayload> {
    let (message_type, body) = bytes.split_first().ok_or(ClientError::MalformedPayload {
        message_type: "warp payload",
        reason: "empty message".to_string(),
    })?;
    decode(*message_type, body)
}
