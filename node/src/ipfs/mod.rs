//! Content-store client over the Kubo HTTP RPC.

use async_trait::async_trait;
use cid::Cid;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors from the content store. Everything here is transient from the
/// reconciliation engine's point of view; a hash that cannot be a valid
/// content id never reaches the wire (see [`ContentStore::validate_wrapper`]).
#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store RPC error: {0}")]
    Rpc(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type StoreResult<T> = std::result::Result<T, ContentStoreError>;

/// Outcome of the wrapper-directory validity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperCheck {
    /// The hash resolves to a wrapper directory and may be pinned.
    Wrapper,
    /// The hash resolves to something else. Terminal for tracking.
    NotWrapper,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStat {
    pub key: String,
    pub size: u64,
}

/// The store operations reconciliation drives. Every call takes a timeout;
/// a timed-out call is a transient failure, never fatal.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn pin(&self, hash: &str, timeout: Duration) -> StoreResult<()>;

    async fn unpin(&self, hash: &str, timeout: Duration) -> StoreResult<()>;

    /// Check that `hash` resolves to a well-formed wrapper directory.
    async fn validate_wrapper(&self, hash: &str, timeout: Duration) -> StoreResult<WrapperCheck>;

    async fn stat(&self, hash: &str, timeout: Duration) -> StoreResult<BlockStat>;
}

/// Kubo HTTP RPC client.
#[derive(Debug, Clone)]
pub struct KuboClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct LsResponse {
    #[serde(rename = "Objects", default)]
    objects: Vec<LsObject>,
}

#[derive(Debug, Deserialize)]
struct LsObject {
    #[serde(rename = "Links", default)]
    links: Vec<LsLink>,
}

#[derive(Debug, Deserialize)]
struct LsLink {
    #[serde(rename = "Name", default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct StatResponse {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Size")]
    size: u64,
}

impl KuboClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    /// POST a Kubo RPC endpoint, mapping elapsed timeouts and non-200 bodies.
    async fn rpc(&self, endpoint: &str, arg: &str, timeout: Duration) -> StoreResult<Vec<u8>> {
        let url = format!("{}/api/v0/{endpoint}", self.base_url);
        let request = self.http.post(&url).query(&[("arg", arg)]).send();
        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| ContentStoreError::Timeout(timeout))??;

        let status = response.status();
        let body = tokio::time::timeout(timeout, response.bytes())
            .await
            .map_err(|_| ContentStoreError::Timeout(timeout))??;
        if !status.is_success() {
            let message = serde_json::from_slice::<RpcErrorBody>(&body)
                .map(|err| err.message)
                .unwrap_or_else(|_| format!("status {status}"));
            return Err(ContentStoreError::Rpc(message));
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ContentStore for KuboClient {
    async fn pin(&self, hash: &str, timeout: Duration) -> StoreResult<()> {
        self.rpc("pin/add", hash, timeout).await.map(|_| ())
    }

    async fn unpin(&self, hash: &str, timeout: Duration) -> StoreResult<()> {
        match self.rpc("pin/rm", hash, timeout).await {
            Ok(_) => Ok(()),
            // Unpinning something the store no longer holds is the goal state.
            Err(ContentStoreError::Rpc(message)) if message.contains("not pinned") => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn validate_wrapper(&self, hash: &str, timeout: Duration) -> StoreResult<WrapperCheck> {
        if Cid::try_from(hash).is_err() {
            return Ok(WrapperCheck::NotWrapper);
        }
        let body = self.rpc("ls", hash, timeout).await?;
        let listing: LsResponse = serde_json::from_slice(&body)
            .map_err(|err| ContentStoreError::Rpc(format!("bad ls response: {err}")))?;
        let is_wrapper = listing
            .objects
            .iter()
            .flat_map(|object| &object.links)
            .any(|link| !link.name.is_empty());
        Ok(if is_wrapper {
            WrapperCheck::Wrapper
        } else {
            WrapperCheck::NotWrapper
        })
    }

    async fn stat(&self, hash: &str, timeout: Duration) -> StoreResult<BlockStat> {
        let body = self.rpc("block/stat", hash, timeout).await?;
        let stat: StatResponse = serde_json::from_slice(&body)
            .map_err(|err| ContentStoreError::Rpc(format!("bad stat response: {err}")))?;
        Ok(BlockStat {
            key: stat.key,
            size: stat.size,
        })
    }
}
