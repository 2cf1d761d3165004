//! EVM chain client
//!
//! The `ChainClient` trait is the seam every protocol component talks to.
//! `EvmClient` implements it over JSON-RPC, signing EIP-1559 transactions
//! locally with the operator key. The free functions at the bottom implement
//! the polling waits (receipt, mined, block height, success) on top of any
//! `ChainClient`.

use std::time::Duration;

use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::abi::{decode_revert, from_hex, parse_quantity, to_hex};
use crate::crypto::CryptoService;
use crate::error::{ClientError, Result};
use crate::transaction::{transaction_hash, warp_access_list, AccessListItem, Eip1559Transaction};

/// 2.5 gwei
pub const MAX_PRIORITY_FEE_PER_GAS: u64 = 2_500_000_000;

/// Timeout for a single JSON-RPC round trip.
const RPC_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Polling intervals and bounds for transaction waits (milliseconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_block_poll_interval_ms")]
    pub block_poll_interval_ms: u64,
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
    #[serde(default = "default_mined_timeout_ms")]
    pub mined_timeout_ms: u64,
}

fn default_receipt_poll_interval_ms() -> u64 {
    200
}

fn default_block_poll_interval_ms() -> u64 {
    2_000
}

fn default_transaction_timeout_ms() -> u64 {
    10_000
}

fn default_mined_timeout_ms() -> u64 {
    20_000
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            block_poll_interval_ms: default_block_poll_interval_ms(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
            mined_timeout_ms: default_mined_timeout_ms(),
        }
    }
}

/// EVM log entry from a receipt or eth_getLogs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmLog {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(deserialize_with = "deserialize_hex_bytes")]
    pub data: Vec<u8>,
    #[serde(default, deserialize_with = "deserialize_quantity")]
    pub block_number: u64,
    #[serde(default, deserialize_with = "deserialize_quantity")]
    pub log_index: u64,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
}

/// The parts of a transaction receipt the client uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: H256,
    #[serde(deserialize_with = "deserialize_quantity")]
    pub block_number: u64,
    #[serde(rename = "status", deserialize_with = "deserialize_status")]
    pub success: bool,
    #[serde(default)]
    pub logs: Vec<EvmLog>,
}

/// Contract call to submit as a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub to: Address,
    pub data: Vec<u8>,
    pub value: U256,
    /// Signed warp message attached as an access-list predicate
    pub warp_message: Option<Vec<u8>>,
}

impl TransactionRequest {
    pub fn call(to: Address, data: Vec<u8>) -> Self {
        Self {
            to,
            data,
            value: U256::zero(),
            warp_message: None,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_warp_message(mut self, signed_message: Vec<u8>) -> Self {
        self.warp_message = Some(signed_message);
        self
    }
}

/// eth_getLogs filter. `None` topics match anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topics: Vec<Option<H256>>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    pub fn matches(&self, log: &EvmLog) -> bool {
        log.address == self.address
            && log.block_number >= self.from_block
            && log.block_number <= self.to_block
            && self
                .topics
                .iter()
                .enumerate()
                .all(|(i, topic)| match topic {
                    Some(expected) => log.topics.get(i) == Some(expected),
                    None => true,
                })
    }

    fn to_json(&self) -> serde_json::Value {
        let topics: Vec<serde_json::Value> = self
            .topics
            .iter()
            .map(|t| match t {
                Some(topic) => json!(topic),
                None => serde_json::Value::Null,
            })
            .collect();
        json!({
            "address": self.address,
            "topics": topics,
            "fromBlock": format!("0x{:x}", self.from_block),
            "toBlock": format!("0x{:x}", self.to_block),
        })
    }
}

fn deserialize_hex_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    let value = String::deserialize(deserializer)?;
    from_hex(&value).map_err(serde::de::Error::custom)
}

fn deserialize_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    let value: Option<String> = Option::deserialize(deserializer)?;
    match value {
        Some(v) => parse_quantity(&v).map_err(serde::de::Error::custom),
        None => Ok(0),
    }
}

fn deserialize_status<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.as_deref() == Some("0x1"))
}

// ============================================================================
// CHAIN CLIENT TRAIT
// ============================================================================

/// Chain access used by the lifecycle, bridge and event components.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address transactions are sent from.
    fn sender(&self) -> Address;

    /// Sign and broadcast a transaction, returning its hash.
    async fn send_transaction(&self, request: TransactionRequest) -> Result<H256>;

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>>;

    async fn get_block_number(&self) -> Result<u64>;

    /// eth_call against the latest block.
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>>;

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<EvmLog>>;

    /// debug_traceTransaction with the call tracer, as raw JSON text.
    async fn trace_transaction(&self, tx_hash: H256) -> Result<String>;
}

// ============================================================================
// JSON-RPC IMPLEMENTATION
// ============================================================================

/// JSON-RPC client that signs transactions with the operator key.
pub struct EvmClient {
    http_client: reqwest::Client,
    rpc_url: String,
    chain_id: u64,
    crypto_service: CryptoService,
    from: Address,
    /// Serializes nonce allocation across concurrent senders
    send_lock: Mutex<()>,
}

impl EvmClient {
    pub fn new(rpc_url: &str, chain_id: u64, crypto_service: CryptoService) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(RPC_TIMEOUT).build()?;
        let from = crypto_service.get_ethereum_address();
        Ok(Self {
            http_client,
            rpc_url: rpc_url.to_string(),
            chain_id,
            crypto_service,
            from,
            send_lock: Mutex::new(()),
        })
    }

    /// Generic EVM JSON-RPC call helper.
    async fn json_rpc<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let rpc_future = async {
            let resp = self
                .http_client
                .post(&self.rpc_url)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    ClientError::Network(format!(
                        "Failed to send {} request to {}: {}",
                        method, self.rpc_url, e
                    ))
                })?;
            resp.json::<serde_json::Value>().await.map_err(|e| {
                ClientError::Network(format!(
                    "Failed to parse {} response from {}: {}",
                    method, self.rpc_url, e
                ))
            })
        };

        let response = tokio::time::timeout(RPC_TIMEOUT, rpc_future)
            .await
            .map_err(|_| ClientError::Timeout {
                operation: format!("{} from {}", method, self.rpc_url),
                tx_hash: None,
            })??;

        if let Some(error) = response.get("error") {
            return Err(rpc_error(method, error));
        }

        let result = response.get("result").cloned().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result).map_err(|e| ClientError::Rpc {
            method: method.to_string(),
            code: 0,
            message: format!("unexpected result shape: {}", e),
        })
    }

    async fn quantity(&self, method: &str, params: Vec<serde_json::Value>) -> Result<u64> {
        let value: String = self.json_rpc(method, params).await?;
        parse_quantity(&value)
    }

    async fn base_fee(&self) -> Result<U256> {
        let block: serde_json::Value = self
            .json_rpc("eth_getBlockByNumber", vec![json!("latest"), json!(false)])
            .await?;
        let base_fee = block
            .get("baseFeePerGas")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ClientError::Rpc {
                method: "eth_getBlockByNumber".to_string(),
                code: 0,
                message: "latest block has no baseFeePerGas".to_string(),
            })?;
        U256::from_str_radix(base_fee.trim_start_matches("0x"), 16).map_err(|e| ClientError::Rpc {
            method: "eth_getBlockByNumber".to_string(),
            code: 0,
            message: format!("invalid baseFeePerGas '{}': {:?}", base_fee, e),
        })
    }

    async fn estimate_gas(
        &self,
        request: &TransactionRequest,
        access_list: &[AccessListItem],
    ) -> Result<u64> {
        let mut call = json!({
            "from": self.from,
            "to": request.to,
            "data": to_hex(&request.data),
            "value": format!("0x{:x}", request.value),
        });
        if !access_list.is_empty() {
            call["accessList"] = json!(access_list);
        }
        let estimate = self.quantity("eth_estimateGas", vec![call]).await?;
        // 20% headroom over the estimate
        Ok(estimate.saturating_mul(6) / 5)
    }
}

/// Map a JSON-RPC error object to a client error, decoding revert data.
fn rpc_error(method: &str, error: &serde_json::Value) -> ClientError {
    let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown error")
        .to_string();

    let revert_data = error
        .get("data")
        .and_then(|d| d.as_str())
        .and_then(|d| from_hex(d).ok());

    if let Some(data) = revert_data {
        return ClientError::Reverted {
            tx_hash: None,
            reason: decode_revert(&data),
            trace: None,
        };
    }
    if message.contains("execution reverted") {
        let reason = message
            .strip_prefix("execution reverted: ")
            .unwrap_or(&message)
            .to_string();
        return ClientError::Reverted {
            tx_hash: None,
            reason,
            trace: None,
        };
    }

    ClientError::Rpc {
        method: method.to_string(),
        code,
        message,
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    fn sender(&self) -> Address {
        self.from
    }

    async fn send_transaction(&self, request: TransactionRequest) -> Result<H256> {
        let access_list: Vec<AccessListItem> = request
            .warp_message
            .as_deref()
            .map(|msg| vec![warp_access_list(msg)])
            .unwrap_or_default();

        // Nonce fetch through broadcast must not interleave with another sender
        let _guard = self.send_lock.lock().await;

        let nonce = self
            .quantity("eth_getTransactionCount", vec![json!(self.from), json!("pending")])
            .await?;
        let base_fee = self.base_fee().await?;
        let tip = U256::from(MAX_PRIORITY_FEE_PER_GAS);
        let max_fee = base_fee * U256::from(2) + tip;
        let gas_limit = self.estimate_gas(&request, &access_list).await?;

        let tx = Eip1559Transaction {
            chain_id: self.chain_id,
            nonce,
            max_priority_fee_per_gas: tip,
            max_fee_per_gas: max_fee,
            gas_limit,
            to: request.to,
            value: request.value,
            data: request.data,
            access_list,
        };

        let (r, s, y_parity) = self
            .crypto_service
            .sign_evm_transaction_hash(&tx.signing_hash())?;
        let raw = tx.encode_signed(&r, &s, y_parity);
        let local_hash = transaction_hash(&raw);

        debug!(
            "EVM raw tx: nonce={}, max_fee={}, gas_limit={}, chain_id={}, from={:?}",
            nonce, max_fee, gas_limit, self.chain_id, self.from
        );

        let tx_hash: H256 = self
            .json_rpc("eth_sendRawTransaction", vec![json!(to_hex(&raw))])
            .await?;
        if tx_hash != local_hash {
            warn!(
                "Node reported tx hash {:?}, locally computed {:?}",
                tx_hash, local_hash
            );
        }

        info!("Submitted transaction {:?} to {:?}", tx_hash, tx.to);
        Ok(tx_hash)
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        self.json_rpc("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await
    }

    async fn get_block_number(&self) -> Result<u64> {
        self.quantity("eth_blockNumber", vec![]).await
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>> {
        let result: String = self
            .json_rpc(
                "eth_call",
                vec![json!({ "to": to, "data": to_hex(&data) }), json!("latest")],
            )
            .await?;
        from_hex(&result)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<EvmLog>> {
        self.json_rpc("eth_getLogs", vec![filter.to_json()]).await
    }

    async fn trace_transaction(&self, tx_hash: H256) -> Result<String> {
        let trace: serde_json::Value = self
            .json_rpc(
                "debug_traceTransaction",
                vec![json!(tx_hash), json!({ "tracer": "callTracer" })],
            )
            .await?;
        Ok(trace.to_string())
    }
}

// ============================================================================
// WAIT HELPERS
// ============================================================================

/// Extract a revert reason from a callTracer trace.
pub fn revert_reason_from_trace(trace: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(trace).ok()?;
    if let Some(reason) = value.get("revertReason").and_then(|r| r.as_str()) {
        return Some(reason.to_string());
    }
    let output = value.get("output").and_then(|o| o.as_str())?;
    let data = from_hex(output).ok()?;
    Some(decode_revert(&data))
}

/// Poll for a receipt until one exists or the transaction timeout elapses.
pub async fn wait_for_receipt(
    client: &dyn ChainClient,
    tx_hash: H256,
    wait: &WaitConfig,
) -> Result<TransactionReceipt> {
    poll_receipt(
        client,
        tx_hash,
        wait,
        Duration::from_millis(wait.transaction_timeout_ms),
    )
    .await
}

async fn poll_receipt(
    client: &dyn ChainClient,
    tx_hash: H256,
    wait: &WaitConfig,
    bound: Duration,
) -> Result<TransactionReceipt> {
    let poll = async {
        loop {
            if let Some(receipt) = client.get_receipt(tx_hash).await? {
                return Ok::<TransactionReceipt, ClientError>(receipt);
            }
            debug!("Receipt for {:?} not available yet", tx_hash);
            tokio::time::sleep(Duration::from_millis(wait.receipt_poll_interval_ms)).await;
        }
    };
    tokio::time::timeout(bound, poll)
        .await
        .map_err(|_| ClientError::Timeout {
            operation: "transaction receipt".to_string(),
            tx_hash: Some(tx_hash),
        })?
}

/// Wait until the chain reaches `height`.
pub async fn wait_for_block_height(
    client: &dyn ChainClient,
    height: u64,
    wait: &WaitConfig,
) -> Result<()> {
    let poll = async {
        loop {
            let current = client.get_block_number().await?;
            if current >= height {
                return Ok::<(), ClientError>(());
            }
            debug!("Block height {} below {}", current, height);
            tokio::time::sleep(Duration::from_millis(wait.block_poll_interval_ms)).await;
        }
    };
    tokio::time::timeout(Duration::from_millis(wait.mined_timeout_ms), poll)
        .await
        .map_err(|_| ClientError::Timeout {
            operation: format!("block height {}", height),
            tx_hash: None,
        })?
}

/// Wait until the transaction is mined and its block is visible.
pub async fn wait_mined(
    client: &dyn ChainClient,
    tx_hash: H256,
    wait: &WaitConfig,
) -> Result<TransactionReceipt> {
    let receipt = poll_receipt(
        client,
        tx_hash,
        wait,
        Duration::from_millis(wait.mined_timeout_ms),
    )
    .await?;
    wait_for_block_height(client, receipt.block_number, wait).await?;
    Ok(receipt)
}

/// Wait for the receipt and fail with the decoded revert reason if it failed.
pub async fn wait_for_transaction_success(
    client: &dyn ChainClient,
    tx_hash: H256,
    wait: &WaitConfig,
) -> Result<TransactionReceipt> {
    let receipt = wait_for_receipt(client, tx_hash, wait).await?;
    if receipt.success {
        return Ok(receipt);
    }

    let trace = match client.trace_transaction(tx_hash).await {
        Ok(trace) => Some(trace),
        Err(e) => {
            warn!("Failed to trace reverted transaction {:?}: {}", tx_hash, e);
            None
        }
    };
    let reason = trace
        .as_deref()
        .and_then(revert_reason_from_trace)
        .unwrap_or_else(|| "execution reverted".to_string());

    Err(ClientError::Reverted {
        tx_hash: Some(tx_hash),
        reason,
        trace,
    })
}
