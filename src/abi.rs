//! Solidity ABI helpers
//!
//! Hand-rolled encoding of the small subset of the contract ABI the client
//! needs: function selectors, event topics, head/tail encoding of static and
//! dynamic arguments (including tuples), word-level decoding of return data
//! and log data, and decoding of revert payloads.

use ethereum_types::{Address, H256, U256};
use sha3::{Digest, Keccak256};

use crate::error::{ClientError, Result};

const WORD: usize = 32;

/// `Error(string)`
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// `Panic(uint256)`
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Custom errors declared by the validator manager and token remote contracts.
const KNOWN_CUSTOM_ERRORS: &[&str] = &[
    "IncorrectInputLength(uint256,uint256)",
    "InvalidInitialization()",
    "NotInitializing()",
    "OwnableInvalidOwner(address)",
    "OwnableUnauthorizedAccount(address)",
    "ReentrancyGuardReentrantCall()",
    "AddressEmptyCode(address)",
    "AddressInsufficientBalance(address)",
    "ERC20InsufficientAllowance(address,uint256,uint256)",
    "ERC20InsufficientBalance(address,uint256,uint256)",
    "ERC20InvalidApprover(address)",
    "ERC20InvalidReceiver(address)",
    "ERC20InvalidSender(address)",
    "ERC20InvalidSpender(address)",
    "FailedInnerCall()",
    "SafeERC20FailedOperation(address)",
];

// ============================================================================
// HASHING
// ============================================================================

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Function selector: keccak256(signature)[0..4]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Event topic: keccak256 of the canonical event signature.
pub fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

// ============================================================================
// ENCODING
// ============================================================================

/// A single ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
    FixedBytes32(H256),
    Bool(bool),
    Bytes(Vec<u8>),
    String(String),
    Tuple(Vec<Token>),
}

impl Token {
    pub fn uint<T: Into<U256>>(value: T) -> Self {
        Token::Uint(value.into())
    }

    fn is_dynamic(&self) -> bool {
        match self {
            Token::Bytes(_) | Token::String(_) => true,
            Token::Tuple(tokens) => tokens.iter().any(Token::is_dynamic),
            _ => false,
        }
    }

    /// Size of the token inside the head section.
    fn head_size(&self) -> usize {
        match self {
            _ if self.is_dynamic() => WORD,
            Token::Tuple(tokens) => tokens.iter().map(Token::head_size).sum(),
            _ => WORD,
        }
    }
}

fn uint_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

fn encode_dynamic_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(WORD + bytes.len() + WORD);
    out.extend_from_slice(&uint_word(U256::from(bytes.len())));
    out.extend_from_slice(bytes);
    let padding = (WORD - (bytes.len() % WORD)) % WORD;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

fn encode_token(token: &Token) -> Vec<u8> {
    match token {
        Token::Address(address) => address_word(address).to_vec(),
        Token::Uint(value) => uint_word(*value).to_vec(),
        Token::FixedBytes32(value) => value.as_bytes().to_vec(),
        Token::Bool(value) => uint_word(U256::from(*value as u8)).to_vec(),
        Token::Bytes(bytes) => encode_dynamic_bytes(bytes),
        Token::String(s) => encode_dynamic_bytes(s.as_bytes()),
        Token::Tuple(tokens) => encode(tokens),
    }
}

/// Head/tail encode a sequence of tokens (function arguments or tuple members).
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len: usize = tokens.iter().map(Token::head_size).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word(U256::from(head_len + tail.len())));
            tail.extend(encode_token(token));
        } else {
            head.extend(encode_token(token));
        }
    }

    head.extend(tail);
    head
}

/// Selector followed by the encoded arguments.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend(encode(tokens));
    data
}

// ============================================================================
// DECODING
// ============================================================================

/// Word-level reader over ABI-encoded data.
///
/// Offsets of dynamic members are relative to the start of the enclosing
/// tuple, which is the start of the slice the decoder was built from.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn word(&self, index: usize) -> Result<[u8; 32]> {
        let slice = index
            .checked_mul(WORD)
            .and_then(|start| self.data.get(start..)?.get(..WORD))
            .ok_or_else(|| ClientError::MalformedPayload {
                message_type: "abi",
                reason: format!(
                    "word {} out of range (data is {} bytes)",
                    index,
                    self.data.len()
                ),
            })?;
        let mut word = [0u8; 32];
        word.copy_from_slice(slice);
        Ok(word)
    }

    pub fn uint(&self, index: usize) -> Result<U256> {
        Ok(U256::from_big_endian(&self.word(index)?))
    }

    pub fn u64(&self, index: usize) -> Result<u64> {
        let value = self.uint(index)?;
        if value > U256::from(u64::MAX) {
            return Err(ClientError::MalformedPayload {
                message_type: "abi",
                reason: format!("word {} does not fit in uint64", index),
            });
        }
        Ok(value.low_u64())
    }

    pub fn u8(&self, index: usize) -> Result<u8> {
        let value = self.u64(index)?;
        u8::try_from(value).map_err(|_| ClientError::MalformedPayload {
            message_type: "abi",
            reason: format!("word {} does not fit in uint8", index),
        })
    }

    pub fn bool(&self, index: usize) -> Result<bool> {
        match self.u64(index)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ClientError::MalformedPayload {
                message_type: "abi",
                reason: format!("word {} is not a bool: {}", index, other),
            }),
        }
    }

    pub fn address(&self, index: usize) -> Result<Address> {
        Ok(Address::from_slice(&self.word(index)?[12..]))
    }

    pub fn bytes32(&self, index: usize) -> Result<H256> {
        Ok(H256::from(self.word(index)?))
    }

    fn offset(&self, index: usize) -> Result<usize> {
        let offset = self.u64(index)? as usize;
        if offset > self.data.len() {
            return Err(ClientError::MalformedPayload {
                message_type: "abi",
                reason: format!("offset {} beyond data length {}", offset, self.data.len()),
            });
        }
        Ok(offset)
    }

    /// Dynamic `bytes` whose offset is stored at word `index`.
    pub fn bytes(&self, index: usize) -> Result<Vec<u8>> {
        let offset = self.offset(index)?;
        let inner = Decoder::new(&self.data[offset..]);
        let len = inner.u64(0)?;
        usize::try_from(len)
            .ok()
            .and_then(|len| inner.data.get(WORD..)?.get(..len))
            .map(|b| b.to_vec())
            .ok_or_else(|| ClientError::MalformedPayload {
                message_type: "abi",
                reason: format!("bytes of length {} truncated", len),
            })
    }

    pub fn string(&self, index: usize) -> Result<String> {
        let bytes = self.bytes(index)?;
        String::from_utf8(bytes).map_err(|e| ClientError::MalformedPayload {
            message_type: "abi",
            reason: format!("invalid utf-8 string: {}", e),
        })
    }

    /// Dynamic tuple whose offset is stored at word `index`.
    pub fn tuple(&self, index: usize) -> Result<Decoder<'a>> {
        let offset = self.offset(index)?;
        Ok(Decoder::new(&self.data[offset..]))
    }

    /// Static tuple laid out inline starting at word `index`.
    pub fn inline(&self, index: usize) -> Result<Decoder<'a>> {
        index
            .checked_mul(WORD)
            .and_then(|start| self.data.get(start..))
            .map(Decoder::new)
            .ok_or_else(|| ClientError::MalformedPayload {
                message_type: "abi",
                reason: format!("inline tuple at word {} out of range", index),
            })
    }
}

/// Decode revert data into a human-readable reason.
///
/// Handles `Error(string)`, `Panic(uint256)` and the custom errors declared
/// by the contracts this client talks to. Anything else is returned as hex.
pub fn decode_revert(data: &[u8]) -> String {
    if data.len() < 4 {
        return if data.is_empty() {
            "execution reverted".to_string()
        } else {
            format!("0x{}", hex::encode(data))
        };
    }

    let (sel, args) = data.split_at(4);
    let decoder = Decoder::new(args);

    if sel == ERROR_STRING_SELECTOR {
        if let Ok(reason) = decoder.string(0) {
            return reason;
        }
    } else if sel == PANIC_SELECTOR {
        if let Ok(code) = decoder.uint(0) {
            return format!("Panic(0x{:x})", code);
        }
    } else if let Some(signature) = KNOWN_CUSTOM_ERRORS
        .iter()
        .find(|signature| selector(signature) == sel)
    {
        let arg_count = signature
            .trim_end_matches(')')
            .split_once('(')
            .map(|(_, args)| args.split(',').filter(|a| !a.is_empty()).count())
            .unwrap_or(0);
        let args: Vec<String> = (0..arg_count)
            .filter_map(|i| decoder.uint(i).ok())
            .map(|w| format!("0x{:x}", w))
            .collect();
        let name = signature.split('(').next().unwrap_or(signature);
        return format!("{}({})", name, args.join(", "));
    }

    format!("0x{}", hex::encode(data))
}

// ============================================================================
// HEX HELPERS
// ============================================================================

/// Hex-encode with a 0x prefix.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode a hex string with or without 0x prefix.
pub fn from_hex(value: &str) -> Result<Vec<u8>> {
    let clean = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(clean).map_err(|e| ClientError::InvalidInput(format!("invalid hex '{}': {}", value, e)))
}

/// Parse a 0x-prefixed hex quantity (as returned by JSON-RPC) into u64.
pub fn parse_quantity(value: &str) -> Result<u64> {
    let clean = value.strip_prefix("0x").unwrap_or(value);
    if clean.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(clean, 16)
        .map_err(|e| ClientError::InvalidInput(format!("invalid quantity '{}': {}", value, e)))
}
