//! Chain log source for contenthash events.

pub mod contenthash;

use alloy_primitives::keccak256;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Solidity signature of the event the scanner indexes.
const CONTENTHASH_CHANGED_SIG: &str = "ContenthashChanged(bytes32,bytes)";

/// Errors from the chain log source. All of these are transient from the
/// scanner's point of view: the owning loop backs off and retries the same
/// range. Only constructor/config failures are fatal.
#[derive(Debug, Error)]
pub enum ChainRpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type ChainResult<T> = std::result::Result<T, ChainRpcError>;

/// A decoded contenthash-changed log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingEvent {
    pub block_number: u64,
    /// The naming key (ENS node hash), 0x-prefixed hex.
    pub key: String,
    /// Raw contenthash payload bytes, still undecoded.
    pub payload: Vec<u8>,
}

/// Source of head and ranged contenthash logs.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Latest chain head block number.
    async fn head(&self) -> ChainResult<u64>;

    /// Contenthash events in `[from_block, to_block]`, in chain order.
    async fn query_logs(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<NamingEvent>>;
}

/// JSON-RPC (`eth_getLogs`) backed log source.
#[derive(Debug, Clone)]
pub struct RpcLogSource {
    http: reqwest::Client,
    url: String,
    topic0: String,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawLog {
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
}

impl RpcLogSource {
    pub fn new(http: reqwest::Client, url: String, address: Option<String>) -> Self {
        let topic0 = format!(
            "0x{}",
            hex::encode(keccak256(CONTENTHASH_CHANGED_SIG.as_bytes()))
        );
        Self {
            http,
            url,
            topic0,
            address,
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> ChainResult<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: RpcResponse<T> = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(error) = response.error {
            return Err(ChainRpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| ChainRpcError::InvalidResponse(format!("{method}: empty result")))
    }
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn head(&self) -> ChainResult<u64> {
        let head: String = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&head)
            .ok_or_else(|| ChainRpcError::InvalidResponse(format!("bad block number: {head}")))
    }

    async fn query_logs(&self, from_block: u64, to_block: u64) -> ChainResult<Vec<NamingEvent>> {
        let mut filter = json!({
            "fromBlock": format!("0x{from_block:x}"),
            "toBlock": format!("0x{to_block:x}"),
            "topics": [self.topic0],
        });
        if let Some(address) = &self.address {
            filter["address"] = json!(address);
        }
        let raw_logs: Vec<RawLog> = self.call("eth_getLogs", json!([filter])).await?;

        let mut events = Vec::with_capacity(raw_logs.len());
        for raw in raw_logs {
            match decode_raw_log(&raw) {
                Some(event) => events.push(event),
                None => {
                    tracing::debug!(data = %raw.data, "skipping malformed contenthash log");
                }
            }
        }
        Ok(events)
    }
}

fn decode_raw_log(raw: &RawLog) -> Option<NamingEvent> {
    let block_number = parse_hex_u64(&raw.block_number)?;
    let key = raw.topics.get(1)?.to_lowercase();
    let data = hex::decode(raw.data.strip_prefix("0x").unwrap_or(&raw.data)).ok()?;
    let payload = decode_abi_bytes(&data)?;
    Some(NamingEvent {
        block_number,
        key,
        payload,
    })
}

/// Decode a single ABI-encoded dynamic `bytes` argument.
fn decode_abi_bytes(data: &[u8]) -> Option<Vec<u8>> {
    let offset = read_abi_usize(data.get(..32)?)?;
    let length_word = data.get(offset..offset.checked_add(32)?)?;
    let length = read_abi_usize(length_word)?;
    let start = offset.checked_add(32)?;
    data.get(start..start.checked_add(length)?).map(<[u8]>::to_vec)
}

fn read_abi_usize(word: &[u8]) -> Option<usize> {
    if word.len() != 32 || word[..24].iter().any(|byte| *byte != 0) {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(bytes)).ok()
}

fn parse_hex_u64(value: &str) -> Option<u64> {
    u64::from_str_radix(value.strip_prefix("0x")?, 16).ok()
}
