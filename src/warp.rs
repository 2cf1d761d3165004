//! Warp message envelope
//!
//! Unsigned message: `codec_version u16 | network_id u32 | source_chain_id [32]
//! | payload_len u32 | payload`. The message ID is the sha256 of those bytes.
//!
//! Signed message: the unsigned bytes followed by `signature_type u32` (0 for
//! a bit-set signature), the signer bitset as `u32 length | big-endian bytes`
//! and the 96-byte aggregate BLS signature.

use ethereum_types::H256;
use sha2::{Digest, Sha256};

use crate::error::{ClientError, Result};

pub const CODEC_VERSION: u16 = 0;
pub const BIT_SET_SIGNATURE_TYPE: u32 = 0;
pub const BLS_SIGNATURE_LEN: usize = 96;

const UNSIGNED_HEADER_LEN: usize = 2 + 4 + 32 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedMessage {
    pub network_id: u32,
    pub source_chain_id: H256,
    pub payload: Vec<u8>,
}

impl UnsignedMessage {
    pub fn new(network_id: u32, source_chain_id: H256, payload: Vec<u8>) -> Self {
        Self {
            network_id,
            source_chain_id,
            payload,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(UNSIGNED_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&CODEC_VERSION.to_be_bytes());
        out.extend_from_slice(&self.network_id.to_be_bytes());
        out.extend_from_slice(self.source_chain_id.as_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Content-derived message ID.
    pub fn id(&self) -> H256 {
        H256::from_slice(&Sha256::digest(self.to_bytes()))
    }

    /// Parse an unsigned message from the front of `bytes`, returning the rest.
    pub fn parse(bytes: &[u8]) -> Result<(Self, &[u8])> {
        let mut reader = Reader::new(bytes, "UnsignedMessage");
        let version = u16::from_be_bytes(reader.take_array()?);
        if version != CODEC_VERSION {
            return Err(malformed(
                "UnsignedMessage",
                format!("unsupported codec version {}", version),
            ));
        }
        let network_id = u32::from_be_bytes(reader.take_array()?);
        let source_chain_id = H256::from(reader.take_array::<32>()?);
        let payload_len = u32::from_be_bytes(reader.take_array()?) as usize;
        let payload = reader.take(payload_len)?.to_vec();
        Ok((
            Self {
                network_id,
                source_chain_id,
                payload,
            },
            reader.rest(),
        ))
    }
}

/// Signer bitset: bit `i` set means validator index `i` signed.
///
/// Stored as minimal big-endian bytes (no leading zero bytes).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignerBitset {
    bytes: Vec<u8>,
}

impl SignerBitset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_indices<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        let mut bitset = Self::new();
        for index in indices {
            bitset.add(index);
        }
        bitset
    }

    /// Parse minimal big-endian bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.first() == Some(&0) {
            return Err(malformed(
                "SignerBitset",
                "bitset has a leading zero byte".to_string(),
            ));
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    pub fn add(&mut self, index: usize) {
        let byte_index = index / 8;
        if byte_index >= self.bytes.len() {
            let grow = byte_index + 1 - self.bytes.len();
            let mut grown = vec![0u8; grow];
            grown.extend_from_slice(&self.bytes);
            self.bytes = grown;
        }
        let pos = self.bytes.len() - 1 - byte_index;
        self.bytes[pos] |= 1 << (index % 8);
    }

    pub fn contains(&self, index: usize) -> bool {
        let byte_index = index / 8;
        if byte_index >= self.bytes.len() {
            return false;
        }
        self.bytes[self.bytes.len() - 1 - byte_index] & (1 << (index % 8)) != 0
    }

    /// Set indices in ascending order.
    pub fn indices(&self) -> Vec<usize> {
        (0..self.bytes.len() * 8)
            .filter(|&i| self.contains(i))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Unsigned message plus aggregate signature and signer bitset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub unsigned: UnsignedMessage,
    pub signers: SignerBitset,
    pub signature: [u8; BLS_SIGNATURE_LEN],
}

impl SignedMessage {
    pub fn id(&self) -> H256 {
        self.unsigned.id()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.unsigned.to_bytes();
        out.extend_from_slice(&BIT_SET_SIGNATURE_TYPE.to_be_bytes());
        out.extend_from_slice(&(self.signers.as_bytes().len() as u32).to_be_bytes());
        out.extend_from_slice(self.signers.as_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (unsigned, rest) = UnsignedMessage::parse(bytes)?;
        let mut reader = Reader::new(rest, "SignedMessage");
        let signature_type = u32::from_be_bytes(reader.take_array()?);
        if signature_type != BIT_SET_SIGNATURE_TYPE {
            return Err(malformed(
                "SignedMessage",
                format!("unsupported signature type {}", signature_type),
            ));
        }
        let bitset_len = u32::from_be_bytes(reader.take_array()?) as usize;
        let signers = SignerBitset::from_bytes(reader.take(bitset_len)?)?;
        let signature = reader.take_array::<BLS_SIGNATURE_LEN>()?;
        if !reader.rest().is_empty() {
            return Err(malformed(
                "SignedMessage",
                format!("{} trailing bytes", reader.rest().len()),
            ));
        }
        Ok(Self {
            unsigned,
            signers,
            signature,
        })
    }
}

fn malformed(message_type: &'static str, reason: String) -> ClientError {
    ClientError::MalformedPayload {
        message_type,
        reason,
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    message_type: &'static str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], message_type: &'static str) -> Self {
        Self {
            data,
            pos: 0,
            message_type,
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        let slice = self.data.get(self.pos..end).ok_or_else(|| {
            malformed(
                self.message_type,
                format!("truncated at byte {} (need {} more)", self.pos, len),
            )
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}
