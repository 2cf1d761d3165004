//! Cryptographic Operations Module
//!
//! Operator key management for the Teleporter client: loading the secp256k1
//! key from the environment, signing EIP-1559 transaction hashes and deriving
//! the operator's Ethereum address.
//!
//! Private keys must never be exposed or logged.

use anyhow::Result;
use ethereum_types::Address;
use k256::ecdsa::SigningKey as EcdsaSigningKey;
use sha3::{Digest, Keccak256};
use tracing::info;

use crate::config::OperatorConfig;
use crate::error::ClientError;

// ============================================================================
// CRYPTOGRAPHIC SERVICE IMPLEMENTATION
// ============================================================================

/// Cryptographic service holding the operator's ECDSA key.
///
/// Used by `EvmClient` to sign every transaction it submits.
pub struct CryptoService {
    /// ECDSA signing key for EVM operations (secp256k1)
    ecdsa_signing_key: EcdsaSigningKey,
}

impl CryptoService {
    /// Creates a new cryptographic service from the operator configuration.
    ///
    /// Loads the hex-encoded private key from the environment variable named
    /// in `operator.private_key_env`.
    pub fn new(config: &OperatorConfig) -> Result<Self> {
        let private_key_hex = config.get_private_key()?;
        let service = Self::from_hex_key(&private_key_hex)?;
        info!(
            "Crypto service initialized for operator {:?}",
            service.get_ethereum_address()
        );
        Ok(service)
    }

    /// Builds the service from a hex-encoded 32-byte secret (0x prefix optional).
    pub fn from_hex_key(private_key_hex: &str) -> Result<Self> {
        let clean = private_key_hex.trim().trim_start_matches("0x");
        let private_key_bytes = hex::decode(clean)
            .map_err(|e| anyhow::anyhow!("Invalid private key hex: {}", e))?;

        if private_key_bytes.len() != 32 {
            return Err(anyhow::anyhow!(
                "Invalid private key length: expected 32 bytes, got {}",
                private_key_bytes.len()
            ));
        }

        let ecdsa_signing_key = EcdsaSigningKey::from_slice(&private_key_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to create ECDSA signing key: {}", e))?;

        Ok(Self { ecdsa_signing_key })
    }

    /// Signs a raw EVM transaction hash with the ECDSA key.
    ///
    /// This does NOT apply the Ethereum signed message prefix. The caller is
    /// expected to pass a keccak256 hash of an RLP-encoded transaction.
    ///
    /// # Returns
    ///
    /// * `Ok((r, s, recovery_id))` - r and s are 32-byte big-endian, recovery_id is 0 or 1
    pub fn sign_evm_transaction_hash(
        &self,
        tx_hash: &[u8; 32],
    ) -> std::result::Result<([u8; 32], [u8; 32], u8), ClientError> {
        let (signature, recovery_id) = self
            .ecdsa_signing_key
            .sign_prehash_recoverable(tx_hash)
            .map_err(|e| {
                ClientError::InvalidSignature(format!("Failed to sign transaction hash: {}", e))
            })?;

        let sig_bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig_bytes[..32]);
        s.copy_from_slice(&sig_bytes[32..64]);

        Ok((r, s, recovery_id.to_byte()))
    }

    /// Derives the Ethereum address from the ECDSA public key.
    ///
    /// keccak256(uncompressed_public_key[1..])[12..32]
    pub fn get_ethereum_address(&self) -> Address {
        let verifying_key = self.ecdsa_signing_key.verifying_key();
        let public_key_point = verifying_key.to_encoded_point(false);
        let public_key_bytes = public_key_point.as_bytes();

        // Skip the 0x04 uncompressed point tag
        let mut hasher = Keccak256::new();
        hasher.update(&public_key_bytes[1..]);
        let hash = hasher.finalize();

        Address::from_slice(&hash[12..32])
    }
}
