//! EIP-1559 transaction building
//!
//! RLP encoding, signing hashes and raw encoding of type-2 transactions, plus
//! the access-list predicate used to attach signed warp messages to a
//! transaction for the warp precompile.

use ethereum_types::{Address, H256, U256};
use serde::Serialize;

use crate::abi::keccak256;

/// Warp messenger precompile (0x0200000000000000000000000000000000000005).
pub const WARP_PRECOMPILE_ADDRESS: Address = ethereum_types::H160([
    0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x05,
]);

/// EIP-2718 type byte for dynamic-fee transactions.
const EIP1559_TX_TYPE: u8 = 0x02;

/// Delimiter appended to predicate bytes before padding.
const PREDICATE_END_BYTE: u8 = 0xff;

// ============================================================================
// RLP ENCODING HELPERS
// ============================================================================

/// An RLP item: a byte string or a (possibly nested) list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpItem {
    Bytes(Vec<u8>),
    List(Vec<RlpItem>),
}

impl RlpItem {
    pub fn u64(value: u64) -> Self {
        RlpItem::Bytes(rlp_encode_u64(value))
    }

    pub fn u256(value: U256) -> Self {
        let mut word = [0u8; 32];
        value.to_big_endian(&mut word);
        RlpItem::Bytes(strip_leading_zeros(&word))
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            RlpItem::Bytes(data) => rlp_encode_item(data),
            RlpItem::List(items) => {
                let payload: Vec<u8> = items.iter().flat_map(RlpItem::encode).collect();
                rlp_encode_list_payload(payload)
            }
        }
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

/// Encode a u64 as big-endian bytes with no leading zeros (RLP integer format).
pub fn rlp_encode_u64(val: u64) -> Vec<u8> {
    strip_leading_zeros(&val.to_be_bytes())
}

/// RLP-encode a single byte-string item.
pub fn rlp_encode_item(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        // Single byte below 0x80: encoded as itself
        vec![data[0]]
    } else if data.len() <= 55 {
        let mut out = vec![0x80 + data.len() as u8];
        out.extend_from_slice(data);
        out
    } else {
        let len_bytes = rlp_encode_u64(data.len() as u64);
        let mut out = vec![0xb7 + len_bytes.len() as u8];
        out.extend_from_slice(&len_bytes);
        out.extend_from_slice(data);
        out
    }
}

fn rlp_encode_list_payload(payload: Vec<u8>) -> Vec<u8> {
    if payload.len() <= 55 {
        let mut out = vec![0xc0 + payload.len() as u8];
        out.extend(payload);
        out
    } else {
        let len_bytes = rlp_encode_u64(payload.len() as u64);
        let mut out = vec![0xf7 + len_bytes.len() as u8];
        out.extend_from_slice(&len_bytes);
        out.extend(payload);
        out
    }
}

// ============================================================================
// ACCESS LIST / WARP PREDICATE
// ============================================================================

/// One access-list entry, serialized the way JSON-RPC expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<H256>,
}

impl AccessListItem {
    fn to_rlp(&self) -> RlpItem {
        RlpItem::List(vec![
            RlpItem::Bytes(self.address.as_bytes().to_vec()),
            RlpItem::List(
                self.storage_keys
                    .iter()
                    .map(|key| RlpItem::Bytes(key.as_bytes().to_vec()))
                    .collect(),
            ),
        ])
    }
}

/// Pack predicate bytes into 32-byte storage keys: bytes, 0xff, zero padding.
pub fn pack_predicate(predicate: &[u8]) -> Vec<H256> {
    let mut packed = predicate.to_vec();
    packed.push(PREDICATE_END_BYTE);
    let padding = (32 - packed.len() % 32) % 32;
    packed.extend(std::iter::repeat(0u8).take(padding));
    packed.chunks(32).map(H256::from_slice).collect()
}

/// Inverse of [`pack_predicate`]. Returns `None` when the delimiter is missing.
pub fn unpack_predicate(keys: &[H256]) -> Option<Vec<u8>> {
    let mut bytes: Vec<u8> = keys.iter().flat_map(|k| k.as_bytes().to_vec()).collect();
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    match bytes.pop() {
        Some(PREDICATE_END_BYTE) => Some(bytes),
        _ => None,
    }
}

/// Access-list entry carrying a signed warp message for the precompile.
pub fn warp_access_list(signed_message: &[u8]) -> AccessListItem {
    AccessListItem {
        address: WARP_PRECOMPILE_ADDRESS,
        storage_keys: pack_predicate(signed_message),
    }
}

// ============================================================================
// EIP-1559 TRANSACTION
// ============================================================================

/// Unsigned type-2 transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
    pub access_list: Vec<AccessListItem>,
}

impl Eip1559Transaction {
    fn fields(&self) -> Vec<RlpItem> {
        vec![
            RlpItem::u64(self.chain_id),
            RlpItem::u64(self.nonce),
            RlpItem::u256(self.max_priority_fee_per_gas),
            RlpItem::u256(self.max_fee_per_gas),
            RlpItem::u64(self.gas_limit),
            RlpItem::Bytes(self.to.as_bytes().to_vec()),
            RlpItem::u256(self.value),
            RlpItem::Bytes(self.data.clone()),
            RlpItem::List(self.access_list.iter().map(AccessListItem::to_rlp).collect()),
        ]
    }

    /// keccak256(0x02 || rlp(unsigned fields))
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut payload = vec![EIP1559_TX_TYPE];
        payload.extend(RlpItem::List(self.fields()).encode());
        keccak256(&payload)
    }

    /// 0x02 || rlp(fields ++ [y_parity, r, s])
    pub fn encode_signed(&self, r: &[u8; 32], s: &[u8; 32], y_parity: u8) -> Vec<u8> {
        let mut fields = self.fields();
        fields.push(RlpItem::u64(y_parity as u64));
        fields.push(RlpItem::Bytes(strip_leading_zeros(r)));
        fields.push(RlpItem::Bytes(strip_leading_zeros(s)));

        let mut raw = vec![EIP1559_TX_TYPE];
        raw.extend(RlpItem::List(fields).encode());
        raw
    }
}

/// Hash of a raw signed transaction as reported by the node.
pub fn transaction_hash(raw: &[u8]) -> H256 {
    H256::from(keccak256(raw))
}
