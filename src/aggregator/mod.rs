//! Warp Signature Aggregation Module
//!
//! Collects BLS signature shares for an unsigned warp message from the
//! validators of a subnet, in parallel, and combines them into an aggregate
//! signature once the accumulated stake weight reaches the quorum.
//!
//! Validators are ordered canonically by public key bytes; a validator's
//! index in that order is its bit in the signer bitset.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blst::min_pk::{AggregatePublicKey, AggregateSignature, PublicKey, Signature};
use blst::BLST_ERROR;
use ethereum_types::H256;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::abi::from_hex;
use crate::config::AggregatorConfig;
use crate::error::{ClientError, Result};
use crate::warp::{SignedMessage, SignerBitset, UnsignedMessage, BLS_SIGNATURE_LEN};

pub use crate::codec::BLS_PUBLIC_KEY_LEN;

/// Proof-of-possession ciphersuite used for warp signatures.
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

// ============================================================================
// VALIDATOR SET
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    pub node_id: H256,
    pub bls_public_key: [u8; BLS_PUBLIC_KEY_LEN],
    pub weight: u64,
    pub endpoint: String,
}

impl Validator {
    fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_bytes(&self.bls_public_key).map_err(|e| {
            ClientError::InvalidSignature(format!(
                "invalid BLS public key for {:?}: {:?}",
                self.node_id, e
            ))
        })
    }
}

/// Validators of one subnet in canonical order.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    total_weight: u64,
}

impl ValidatorSet {
    pub fn new(mut validators: Vec<Validator>) -> Result<Self> {
        validators.sort_by(|a, b| a.bls_public_key.cmp(&b.bls_public_key));
        for pair in validators.windows(2) {
            if pair[0].bls_public_key == pair[1].bls_public_key {
                return Err(ClientError::InvalidInput(format!(
                    "duplicate BLS public key for {:?} and {:?}",
                    pair[0].node_id, pair[1].node_id
                )));
            }
        }
        let total_weight = validators
            .iter()
            .try_fold(0u64, |acc, v| acc.checked_add(v.weight))
            .ok_or_else(|| ClientError::InvalidInput("validator weights overflow".to_string()))?;
        if total_weight == 0 {
            return Err(ClientError::InvalidInput(
                "validator set has no weight".to_string(),
            ));
        }
        Ok(Self {
            validators,
            total_weight,
        })
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }
}

/// Smallest weight `w` with `w * 100 >= total * quorum_percentage`.
pub fn required_weight(total_weight: u64, quorum_percentage: u8) -> u64 {
    let product = total_weight as u128 * quorum_percentage as u128;
    product.div_ceil(100) as u64
}

// ============================================================================
// QUORUM ACCUMULATOR
// ============================================================================

/// Running sum of signer weight keyed by signer bitset.
#[derive(Debug, Clone)]
pub struct QuorumAccumulator {
    signers: SignerBitset,
    shares: Vec<[u8; BLS_SIGNATURE_LEN]>,
    weight: u64,
    required: u64,
}

impl QuorumAccumulator {
    pub fn new(total_weight: u64, quorum_percentage: u8) -> Self {
        Self {
            signers: SignerBitset::new(),
            shares: Vec::new(),
            weight: 0,
            required: required_weight(total_weight, quorum_percentage),
        }
    }

    /// Add a verified share. Repeated indices are ignored.
    pub fn add(&mut self, index: usize, weight: u64, share: [u8; BLS_SIGNATURE_LEN]) -> bool {
        if !self.signers.contains(index) {
            self.signers.add(index);
            self.shares.push(share);
            self.weight = self.weight.saturating_add(weight);
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.weight >= self.required
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn required(&self) -> u64 {
        self.required
    }

    pub fn signers(&self) -> &SignerBitset {
        &self.signers
    }

    fn aggregate(&self) -> Result<[u8; BLS_SIGNATURE_LEN]> {
        let signatures = self
            .shares
            .iter()
            .map(|bytes| parse_signature(bytes))
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<&Signature> = signatures.iter().collect();
        let aggregate = AggregateSignature::aggregate(&refs, false).map_err(|e| {
            ClientError::InvalidSignature(format!("failed to aggregate signatures: {:?}", e))
        })?;
        Ok(aggregate.to_signature().compress())
    }
}

fn parse_signature(bytes: &[u8]) -> Result<Signature> {
    Signature::from_bytes(bytes)
        .map_err(|e| ClientError::InvalidSignature(format!("malformed BLS signature: {:?}", e)))
}

// ============================================================================
// SIGNATURE SOURCES
// ============================================================================

/// Where signature shares come from.
#[async_trait]
pub trait SignatureSource: Send + Sync {
    /// Ask one validator for its signature over the unsigned message.
    async fn request_signature(
        &self,
        validator: &Validator,
        message: &UnsignedMessage,
    ) -> Result<Vec<u8>>;
}

/// Queries each validator's `warp_getMessageSignature` JSON-RPC endpoint.
pub struct HttpSignatureSource {
    http_client: reqwest::Client,
}

impl HttpSignatureSource {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl SignatureSource for HttpSignatureSource {
    async fn request_signature(
        &self,
        validator: &Validator,
        message: &UnsignedMessage,
    ) -> Result<Vec<u8>> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": "warp_getMessageSignature",
            "params": [message.id()],
            "id": 1,
        });
        let response: serde_json::Value = self
            .http_client
            .post(&validator.endpoint)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(ClientError::Rpc {
                method: "warp_getMessageSignature".to_string(),
                code: error.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        let signature = response
            .get("result")
            .and_then(|r| r.as_str())
            .ok_or_else(|| ClientError::Rpc {
                method: "warp_getMessageSignature".to_string(),
                code: 0,
                message: "missing signature in response".to_string(),
            })?;
        from_hex(signature)
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct SignatureAggregator {
    validator_sets: HashMap<H256, ValidatorSet>,
    source: Arc<dyn SignatureSource>,
    quorum_percentage: u8,
    request_timeout: Duration,
    aggregation_timeout: Duration,
}

impl SignatureAggregator {
    pub fn new(
        validator_sets: HashMap<H256, ValidatorSet>,
        source: Arc<dyn SignatureSource>,
        quorum_percentage: u8,
        request_timeout: Duration,
        aggregation_timeout: Duration,
    ) -> Self {
        Self {
            validator_sets,
            source,
            quorum_percentage,
            request_timeout,
            aggregation_timeout,
        }
    }

    /// Build an aggregator that queries validators over HTTP.
    pub fn from_config(config: &AggregatorConfig) -> Result<Self> {
        let mut validator_sets = HashMap::new();
        for set in &config.validator_sets {
            let validators = set
                .validators
                .iter()
                .map(|v| {
                    let key = from_hex(&v.bls_public_key)?;
                    let bls_public_key: [u8; BLS_PUBLIC_KEY_LEN] =
                        key.as_slice().try_into().map_err(|_| ClientError::InvalidLength {
                            field: "bls_public_key",
                            expected: BLS_PUBLIC_KEY_LEN,
                            actual: key.len(),
                        })?;
                    Ok(Validator {
                        node_id: v.node_id,
                        bls_public_key,
                        weight: v.weight,
                        endpoint: v.endpoint.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            validator_sets.insert(set.subnet_id, ValidatorSet::new(validators)?);
        }

        let request_timeout = Duration::from_millis(config.request_timeout_ms);
        let source = Arc::new(HttpSignatureSource::new(request_timeout)?);
        Ok(Self::new(
            validator_sets,
            source,
            config.quorum_percentage,
            request_timeout,
            Duration::from_millis(config.aggregation_timeout_ms),
        ))
    }

    pub fn validator_set(&self, subnet_id: &H256) -> Result<&ValidatorSet> {
        self.validator_sets
            .get(subnet_id)
            .ok_or(ClientError::UnknownSubnet(*subnet_id))
    }

    /// Collect shares until quorum and return the signed message.
    ///
    /// Outstanding requests are dropped as soon as quorum is reached.
    pub async fn aggregate(
        &self,
        unsigned: &UnsignedMessage,
        subnet_id: H256,
    ) -> Result<SignedMessage> {
        let set = self.validator_set(&subnet_id)?;
        self.required_weight_for(set, subnet_id)?;
        let message_bytes = unsigned.to_bytes();
        let message_id = unsigned.id();

        let mut pending: FuturesUnordered<_> = set
            .validators()
            .iter()
            .enumerate()
            .map(|(index, validator)| {
                let source = self.source.clone();
                let request_timeout = self.request_timeout;
                async move {
                    let result = tokio::time::timeout(
                        request_timeout,
                        source.request_signature(validator, unsigned),
                    )
                    .await;
                    (index, validator, result)
                }
            })
            .collect();

        let mut accumulator = QuorumAccumulator::new(set.total_weight(), self.quorum_percentage);
        let mut transport_failures = 0usize;

        let deadline = tokio::time::sleep(self.aggregation_timeout);
        tokio::pin!(deadline);

        while !accumulator.is_complete() {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        "Aggregation for message {:?} timed out with weight {} of {}",
                        message_id, accumulator.weight(), accumulator.required()
                    );
                    break;
                }
                next = pending.next() => {
                    let Some((index, validator, result)) = next else { break };
                    match result {
                        Ok(Ok(share)) => match verify_share(validator, &message_bytes, &share) {
                            Ok(share) => {
                                debug!("Valid share from {:?} (index {})", validator.node_id, index);
                                accumulator.add(index, validator.weight, share);
                            }
                            Err(e) => warn!("Discarding share from {:?}: {}", validator.node_id, e),
                        },
                        Ok(Err(e)) => {
                            warn!("Signature request to {:?} failed: {}", validator.node_id, e);
                            if e.is_transient() {
                                transport_failures += 1;
                            }
                        }
                        Err(_) => {
                            warn!("Signature request to {:?} timed out", validator.node_id);
                            transport_failures += 1;
                        }
                    }
                }
            }
        }

        if !accumulator.is_complete() {
            if transport_failures == set.validators().len() {
                return Err(ClientError::Network(format!(
                    "all {} signature requests for message {:?} failed",
                    transport_failures, message_id
                )));
            }
            return Err(ClientError::InsufficientSignatures {
                collected: accumulator.weight(),
                required: accumulator.required(),
            });
        }

        let signature = accumulator.aggregate()?;
        info!(
            "Aggregated {} signatures for message {:?} (weight {} of required {})",
            accumulator.signers().len(),
            message_id,
            accumulator.weight(),
            accumulator.required()
        );

        Ok(SignedMessage {
            unsigned: unsigned.clone(),
            signers: accumulator.signers().clone(),
            signature,
        })
    }

    /// Required signer weight for `set`. A zero quorum would accept an empty
    /// signer set, so it is rejected.
    fn required_weight_for(&self, set: &ValidatorSet, subnet_id: H256) -> Result<u64> {
        match required_weight(set.total_weight(), self.quorum_percentage) {
            0 => Err(ClientError::InvalidInput(format!(
                "quorum of {}% over weight {} for subnet {:?} requires no signers",
                self.quorum_percentage,
                set.total_weight(),
                subnet_id
            ))),
            required => Ok(required),
        }
    }

    /// Check a signed message against the subnet's validator set and quorum.
    pub fn verify(&self, signed: &SignedMessage, subnet_id: H256) -> Result<()> {
        let set = self.validator_set(&subnet_id)?;
        let indices = signed.signers.indices();

        let mut weight = 0u64;
        let mut keys = Vec::with_capacity(indices.len());
        for index in indices {
            let validator = set.validators().get(index).ok_or_else(|| {
                ClientError::InvalidSignature(format!("signer index {} out of range", index))
            })?;
            weight = weight.saturating_add(validator.weight);
            keys.push(validator.public_key()?);
        }

        let required = self.required_weight_for(set, subnet_id)?;
        if weight < required {
            return Err(ClientError::InsufficientSignatures {
                collected: weight,
                required,
            });
        }

        let key_refs: Vec<&PublicKey> = keys.iter().collect();
        let aggregate_key = AggregatePublicKey::aggregate(&key_refs, false)
            .map_err(|e| ClientError::InvalidSignature(format!("{:?}", e)))?
            .to_public_key();
        let signature = parse_signature(&signed.signature)?;
        let result = signature.verify(
            true,
            &signed.unsigned.to_bytes(),
            BLS_DST,
            &[],
            &aggregate_key,
            true,
        );
        if result != BLST_ERROR::BLST_SUCCESS {
            return Err(ClientError::InvalidSignature(format!(
                "aggregate signature does not verify: {:?}",
                result
            )));
        }
        Ok(())
    }
}

/// Verify one share against the validator's key.
fn verify_share(
    validator: &Validator,
    message: &[u8],
    share: &[u8],
) -> Result<[u8; BLS_SIGNATURE_LEN]> {
    let bytes: [u8; BLS_SIGNATURE_LEN] =
        share.try_into().map_err(|_| ClientError::InvalidLength {
            field: "bls_signature",
            expected: BLS_SIGNATURE_LEN,
            actual: share.len(),
        })?;
    let signature = parse_signature(&bytes)?;
    let public_key = validator.public_key()?;
    let result = signature.verify(true, message, BLS_DST, &[], &public_key, true);
    if result != BLST_ERROR::BLST_SUCCESS {
        return Err(ClientError::InvalidSignature(format!(
            "share does not verify: {:?}",
            result
        )));
    }
    Ok(bytes)
}
