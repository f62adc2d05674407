//! CLI and config handling.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// ENS pinning node configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "ens-pinning-node", about = "Pins IPFS content referenced by ENS records")]
pub struct NodeConfig {
    /// Base data directory for persisted state.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,
    /// Ethereum JSON-RPC endpoint for log queries.
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    pub eth_rpc_url: String,
    /// Resolver contract to filter contenthash events on (all addresses if unset).
    #[arg(long)]
    pub resolver_address: Option<String>,
    /// First block to scan for contenthash events.
    #[arg(long, default_value_t = 0)]
    pub start_block: u64,
    /// Maximum block span per log query.
    #[arg(long, default_value_t = 2_000)]
    pub max_block_span: u64,
    /// Seconds between head polls of the scan loop.
    #[arg(long, default_value_t = 60)]
    pub poll_interval_secs: u64,
    /// Seconds to back off before retrying a failed log query.
    #[arg(long, default_value_t = 5)]
    pub query_retry_secs: u64,
    /// IPFS (Kubo) HTTP RPC endpoint.
    #[arg(long, default_value = "http://127.0.0.1:5001")]
    pub ipfs_api_url: String,
    /// Remote index source base URL. Repeatable.
    #[arg(long = "index-source")]
    pub index_sources: Vec<String>,
    /// Seconds per reconciliation cycle (also the cycle's time budget).
    #[arg(long, default_value_t = 300)]
    pub cycle_interval_secs: u64,
    /// Maximum concurrent pin/unpin/validate calls per cycle.
    #[arg(long, default_value_t = 10)]
    pub max_parallel: usize,
    /// Base delay for exponential retry backoff, in seconds.
    #[arg(long, default_value_t = 300)]
    pub base_retry_delay_secs: u64,
    /// Failed attempts beyond which a hash is recorded as lost.
    #[arg(long, default_value_t = 6)]
    pub max_retry_attempts: u32,
    /// Timeout for individual content-store calls, in seconds.
    #[arg(long, default_value_t = 30)]
    pub store_timeout_secs: u64,
    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    #[serde(default)]
    pub verbosity: u8,
}

impl NodeConfig {
    /// Parse configuration from CLI args.
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn query_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.query_retry_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}
