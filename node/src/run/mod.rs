//! Run orchestration: startup wiring and the two long-lived loops.
//!
//! Startup errors (unreachable config, corrupt state files) are fatal here;
//! once the loops are spawned, nothing they encounter terminates the
//! process. The loops share no in-process state, only the durable files.

use crate::chain::RpcLogSource;
use crate::cli::NodeConfig;
use crate::ipfs::KuboClient;
use crate::reconcile::{run_reconcile_loop, ReconcileConfig};
use crate::sources::{
    IndexAggregator, LocalIndexSource, RemoteIndexSource, SnapshotSource,
};
use crate::storage::Storage;
use crate::sync::{run_scan_loop, ScanConfig};
use eyre::{eyre, Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dump observable state on SIGUSR1: registry status counts, the scan
/// cursor, and per-source health. Reads the persisted snapshots, never the
/// loops' own state.
#[cfg(unix)]
fn spawn_usr1_state_dump(
    storage: Arc<Storage>,
    aggregator: Arc<IndexAggregator>,
    start_block: u64,
) {
    tokio::spawn(async move {
        let mut sigusr1 = match signal(SignalKind::user_defined1()) {
            Ok(sig) => sig,
            Err(err) => {
                tracing::debug!(error = %err, "failed to install SIGUSR1 handler");
                return;
            }
        };
        while sigusr1.recv().await.is_some() {
            let cursor = storage
                .load_reverse_index(start_block)
                .map(|index| index.last_processed_block)
                .ok();
            let counts = storage
                .load_registry()
                .map(|registry| registry.status_counts())
                .unwrap_or_default();
            info!(cursor = ?cursor, status_counts = ?counts, "state dump (SIGUSR1)");
            for (source, health) in aggregator.health_snapshot() {
                info!(
                    source = %source,
                    last_success = ?health.last_success,
                    consecutive_failures = health.consecutive_failures,
                    last_error = ?health.last_error,
                    "source health"
                );
            }
        }
    });
}

/// Wire the node together and run until a shutdown signal.
pub async fn run_node(config: NodeConfig) -> Result<()> {
    info!(
        data_dir = %config.data_dir.display(),
        eth_rpc = %config.eth_rpc_url,
        ipfs_api = %config.ipfs_api_url,
        remote_sources = config.index_sources.len(),
        "starting ens pinning node"
    );

    let storage = Arc::new(Storage::open(&config)?);
    let index = storage.load_reverse_index(config.start_block)?;
    let registry = storage.load_registry()?;
    info!(
        cursor = index.last_processed_block,
        indexed_keys = index.key_count(),
        tracked = registry.len(),
        "persisted state loaded"
    );

    let http = reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .build()
        .wrap_err("failed to build HTTP client")?;

    let log_source = RpcLogSource::new(
        http.clone(),
        config.eth_rpc_url.clone(),
        config.resolver_address.clone(),
    );
    let store = KuboClient::new(http.clone(), &config.ipfs_api_url);

    let mut sources: Vec<Box<dyn SnapshotSource>> = vec![Box::new(LocalIndexSource::new(
        Arc::clone(&storage),
        config.start_block,
    ))];
    for base_url in &config.index_sources {
        sources.push(Box::new(RemoteIndexSource::new(http.clone(), base_url)));
    }
    let aggregator = Arc::new(IndexAggregator::new(sources));

    #[cfg(unix)]
    spawn_usr1_state_dump(
        Arc::clone(&storage),
        Arc::clone(&aggregator),
        config.start_block,
    );

    let scan_handle = tokio::spawn(run_scan_loop(
        Arc::clone(&storage),
        log_source,
        index,
        ScanConfig::from(&config),
    ));
    let reconcile_handle = tokio::spawn(run_reconcile_loop(
        Arc::clone(&storage),
        aggregator,
        store,
        registry,
        ReconcileConfig::from(&config),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received");
            Ok(())
        }
        outcome = scan_handle => {
            Err(eyre!("scan loop terminated unexpectedly: {outcome:?}"))
        }
        outcome = reconcile_handle => {
            Err(eyre!("reconcile loop terminated unexpectedly: {outcome:?}"))
        }
    }
}
