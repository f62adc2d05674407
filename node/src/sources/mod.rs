//! Index sources: remote pinning peers and the node's own reverse index.
//!
//! Every source answers the same question: which content hashes are
//! currently referenced, and by which naming keys. A source that cannot be
//! reached this cycle is reported as failed, never skipped silently, so the
//! reconciliation engine can shield its prior contributions.

use crate::registry::unix_now;
use crate::storage::Storage;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("state error: {0}")]
    State(String),
}

/// One content hash and the naming keys referencing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub content_hash: String,
    pub referencing_keys: Vec<String>,
}

/// One source's view for one cycle. `failed` means the source could not be
/// reached, which is distinct from "source reports zero hashes".
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub source_name: String,
    pub entries: Vec<IndexEntry>,
    pub failed: bool,
}

/// A queryable "content hash × referencing keys" view.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<IndexEntry>, SourceError>;
}

/// Remote pinning peer exposing the list-with-ens-nodes contract.
pub struct RemoteIndexSource {
    name: String,
    endpoint: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    cid: String,
    #[serde(rename = "ensNodes")]
    ens_nodes: Vec<String>,
}

impl RemoteIndexSource {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            name: base.to_string(),
            endpoint: format!("{base}/api/ipfs/list-with-ens-nodes"),
            http,
        }
    }
}

#[async_trait]
impl SnapshotSource for RemoteIndexSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<IndexEntry>, SourceError> {
        let entries: Vec<ListEntry> = self
            .http
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(entries
            .into_iter()
            .map(|entry| IndexEntry {
                content_hash: entry.cid,
                referencing_keys: entry.ens_nodes,
            })
            .collect())
    }
}

/// The node's own reverse index, read from its persisted snapshot.
///
/// Reads the durable file rather than sharing the scan loop's in-memory
/// state: the snapshot is eventually consistent and the scan loop stays the
/// sole writer.
pub struct LocalIndexSource {
    storage: Arc<Storage>,
    start_block: u64,
}

impl LocalIndexSource {
    pub fn new(storage: Arc<Storage>, start_block: u64) -> Self {
        Self {
            storage,
            start_block,
        }
    }
}

#[async_trait]
impl SnapshotSource for LocalIndexSource {
    fn name(&self) -> &str {
        "local"
    }

    async fn fetch(&self) -> Result<Vec<IndexEntry>, SourceError> {
        let index = self
            .storage
            .load_reverse_index(self.start_block)
            .map_err(|err| SourceError::State(format!("{err:#}")))?;
        Ok(index
            .entries()
            .map(|(hash, keys)| IndexEntry {
                content_hash: hash.clone(),
                referencing_keys: keys.iter().cloned().collect(),
            })
            .collect())
    }
}

/// Per-source liveness, kept for cycle summaries and state dumps.
#[derive(Debug, Clone, Default)]
pub struct SourceHealth {
    pub last_success: Option<u64>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

/// Fans one fetch out to every configured source per cycle.
pub struct IndexAggregator {
    sources: Vec<Box<dyn SnapshotSource>>,
    health: Mutex<BTreeMap<String, SourceHealth>>,
}

impl IndexAggregator {
    pub fn new(sources: Vec<Box<dyn SnapshotSource>>) -> Self {
        Self {
            sources,
            health: Mutex::new(BTreeMap::new()),
        }
    }

    /// Fetch every source concurrently. A failing source yields a failed
    /// snapshot; it never aborts the cycle for sources that succeeded.
    pub async fn fetch_all(&self) -> Vec<IndexSnapshot> {
        let fetches = self.sources.iter().map(|source| async move {
            let result = source.fetch().await;
            (source.name().to_string(), result)
        });
        let results = futures::future::join_all(fetches).await;

        let now = unix_now();
        let mut health = self.health.lock();
        results
            .into_iter()
            .map(|(source_name, result)| match result {
                Ok(entries) => {
                    let entry = health.entry(source_name.clone()).or_default();
                    entry.last_success = Some(now);
                    entry.consecutive_failures = 0;
                    debug!(source = %source_name, hashes = entries.len(), "source snapshot fetched");
                    IndexSnapshot {
                        source_name,
                        entries,
                        failed: false,
                    }
                }
                Err(err) => {
                    let entry = health.entry(source_name.clone()).or_default();
                    entry.last_error = Some(err.to_string());
                    entry.consecutive_failures += 1;
                    warn!(source = %source_name, error = %err, "source snapshot fetch failed");
                    IndexSnapshot {
                        source_name,
                        entries: Vec::new(),
                        failed: true,
                    }
                }
            })
            .collect()
    }

    /// Current per-source health, for the SIGUSR1 dump.
    pub fn health_snapshot(&self) -> BTreeMap<String, SourceHealth> {
        self.health.lock().clone()
    }
}
