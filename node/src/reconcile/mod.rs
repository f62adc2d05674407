//! Reconciliation: diff desired-pinned against the registry and drive it.
//!
//! Each cycle rebuilds the desired set from whatever sources answered,
//! computes track/untrack work against the registry, and executes it under
//! the cycle's time budget. The registry is mutated only here, sequentially,
//! after the parallel store calls come back.

mod batch;

pub use batch::BatchRunner;

use crate::cli::NodeConfig;
use crate::ipfs::{ContentStore, WrapperCheck};
use crate::registry::{
    unix_now, RetryPolicy, SourceRef, TrackedHashRegistry, TrackedStatus,
};
use crate::sources::{IndexAggregator, IndexSnapshot};
use crate::storage::Storage;
use eyre::Result;
use futures::future::{BoxFuture, FutureExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Reconcile-loop tuning, lifted from the node config.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub cycle_interval: Duration,
    pub max_parallel: usize,
    pub retry_policy: RetryPolicy,
    pub store_timeout: Duration,
}

impl From<&NodeConfig> for ReconcileConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            cycle_interval: config.cycle_interval(),
            max_parallel: config.max_parallel.max(1),
            retry_policy: RetryPolicy {
                base_delay_secs: config.base_retry_delay_secs,
                max_attempts: config.max_retry_attempts,
            },
            store_timeout: config.store_timeout(),
        }
    }
}

/// Desired pin set: content hash → contributing sources.
pub type DesiredMap = BTreeMap<String, Vec<SourceRef>>;

/// Union the non-failed snapshots into the desired map, and collect the
/// names of sources that failed this cycle.
pub fn build_desired(snapshots: &[IndexSnapshot]) -> (DesiredMap, BTreeSet<String>) {
    let mut desired = DesiredMap::new();
    let mut failed_sources = BTreeSet::new();
    for snapshot in snapshots {
        if snapshot.failed {
            failed_sources.insert(snapshot.source_name.clone());
            continue;
        }
        for entry in &snapshot.entries {
            desired
                .entry(entry.content_hash.clone())
                .or_default()
                .push(SourceRef {
                    source_name: snapshot.source_name.clone(),
                    referencing_keys: entry.referencing_keys.clone(),
                });
        }
    }
    (desired, failed_sources)
}

/// Work planned for one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Hashes to validate/pin: new sightings plus due track-side retries.
    pub to_track: Vec<String>,
    /// Pinned or unpinning hashes to evict from the store.
    pub to_untrack: Vec<String>,
    /// Terminal entries no source references anymore; dropped without I/O.
    pub to_forget: Vec<String>,
}

/// Compute the cycle's work from the desired map and the registry.
///
/// Presence in any non-failed source keeps a hash tracked (union semantics).
/// A hash whose contributing source is currently failed is shielded from
/// eviction: a source outage must never cause a false eviction.
pub fn compute_plan(
    desired: &DesiredMap,
    registry: &TrackedHashRegistry,
    failed_sources: &BTreeSet<String>,
    now: u64,
) -> ReconcilePlan {
    let mut to_track = BTreeSet::new();
    for hash in desired.keys() {
        if !registry.contains(hash) {
            to_track.insert(hash.clone());
        }
    }

    let mut to_untrack = Vec::new();
    let mut to_forget = Vec::new();
    for (hash, info) in registry.iter() {
        match info.status {
            TrackedStatus::PendingValidation | TrackedStatus::Pinning => {
                if info.retry_due(now) {
                    to_track.insert(hash.clone());
                }
            }
            TrackedStatus::Pinned | TrackedStatus::Unpinning => {
                if desired.contains_key(hash) || is_shielded(info.contributing_sources.as_slice(), failed_sources) {
                    continue;
                }
                if info.retry_due(now) {
                    to_untrack.push(hash.clone());
                }
            }
            TrackedStatus::NotAWrapper | TrackedStatus::Lost => {
                if !desired.contains_key(hash)
                    && !is_shielded(info.contributing_sources.as_slice(), failed_sources)
                {
                    to_forget.push(hash.clone());
                }
            }
        }
    }

    ReconcilePlan {
        to_track: to_track.into_iter().collect(),
        to_untrack,
        to_forget,
    }
}

fn is_shielded(sources: &[SourceRef], failed_sources: &BTreeSet<String>) -> bool {
    sources
        .iter()
        .any(|source| failed_sources.contains(&source.source_name))
}

/// Per-cycle counters for the summary log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub desired: usize,
    pub sources_failed: usize,
    pub tracked_new: usize,
    pub pinned: usize,
    pub rejected: usize,
    pub retried: usize,
    pub lost: usize,
    pub untracked: usize,
    pub forgotten: usize,
    pub deferred: usize,
}

enum WorkOutcome {
    PinConfirmed,
    WrapperRejected,
    ValidateTransient,
    PinTransient,
    UnpinConfirmed,
    UnpinTransient,
}

struct WorkResult {
    hash: String,
    outcome: WorkOutcome,
}

async fn track_action<C: ContentStore>(
    store: &C,
    hash: String,
    status: TrackedStatus,
    timeout: Duration,
) -> WorkResult {
    // Validation is not repeated once a hash has reached `Pinning`.
    if status == TrackedStatus::PendingValidation {
        match store.validate_wrapper(&hash, timeout).await {
            Ok(WrapperCheck::Wrapper) => {}
            Ok(WrapperCheck::NotWrapper) => {
                return WorkResult {
                    hash,
                    outcome: WorkOutcome::WrapperRejected,
                }
            }
            Err(err) => {
                debug!(hash = %hash, error = %err, "wrapper validation failed");
                return WorkResult {
                    hash,
                    outcome: WorkOutcome::ValidateTransient,
                };
            }
        }
    }
    match store.pin(&hash, timeout).await {
        Ok(()) => WorkResult {
            hash,
            outcome: WorkOutcome::PinConfirmed,
        },
        Err(err) => {
            debug!(hash = %hash, error = %err, "pin attempt failed");
            WorkResult {
                hash,
                outcome: WorkOutcome::PinTransient,
            }
        }
    }
}

async fn untrack_action<C: ContentStore>(
    store: &C,
    hash: String,
    timeout: Duration,
) -> WorkResult {
    match store.unpin(&hash, timeout).await {
        Ok(()) => WorkResult {
            hash,
            outcome: WorkOutcome::UnpinConfirmed,
        },
        Err(err) => {
            debug!(hash = %hash, error = %err, "unpin attempt failed");
            WorkResult {
                hash,
                outcome: WorkOutcome::UnpinTransient,
            }
        }
    }
}

/// Run one reconciliation pass over the given snapshots.
///
/// Mutates the registry in place; the caller persists it once afterwards.
pub async fn run_cycle<C: ContentStore>(
    registry: &mut TrackedHashRegistry,
    snapshots: &[IndexSnapshot],
    store: &C,
    config: &ReconcileConfig,
    deadline: Instant,
    now: u64,
) -> CycleStats {
    let mut stats = CycleStats::default();
    let (desired, failed_sources) = build_desired(snapshots);
    stats.desired = desired.len();
    stats.sources_failed = failed_sources.len();

    // Refresh provenance for everything still referenced.
    for (hash, sources) in &desired {
        if registry.contains(hash) {
            registry.update_sources(hash, sources.clone());
        }
    }

    let plan = compute_plan(&desired, registry, &failed_sources, now);

    for hash in &plan.to_forget {
        registry.remove(hash);
        stats.forgotten += 1;
    }

    for hash in &plan.to_track {
        if !registry.contains(hash) {
            let sources = desired.get(hash).cloned().unwrap_or_default();
            registry.track(hash, sources);
            stats.tracked_new += 1;
        }
    }

    let mut actions: Vec<BoxFuture<'_, WorkResult>> = Vec::new();
    for hash in &plan.to_track {
        if let Some(info) = registry.get(hash) {
            actions.push(track_action(store, hash.clone(), info.status, config.store_timeout).boxed());
        }
    }
    for hash in &plan.to_untrack {
        actions.push(untrack_action(store, hash.clone(), config.store_timeout).boxed());
    }

    let runner = BatchRunner::new(config.max_parallel);
    let (outcomes, deferred) = runner.run(actions, deadline).await;
    stats.deferred = deferred;

    for result in outcomes {
        match result.outcome {
            WorkOutcome::PinConfirmed => {
                registry.mark_pinned(&result.hash);
                stats.pinned += 1;
            }
            WorkOutcome::WrapperRejected => {
                registry.mark_not_wrapper(&result.hash);
                stats.rejected += 1;
            }
            WorkOutcome::ValidateTransient => {
                record_failure(registry, &result.hash, config, now, &mut stats);
            }
            WorkOutcome::PinTransient => {
                // A transient pin failure implies validation succeeded.
                if registry.get(&result.hash).map(|info| info.status)
                    == Some(TrackedStatus::PendingValidation)
                {
                    registry.set_status(&result.hash, TrackedStatus::Pinning);
                }
                record_failure(registry, &result.hash, config, now, &mut stats);
            }
            WorkOutcome::UnpinConfirmed => {
                registry.remove(&result.hash);
                stats.untracked += 1;
            }
            WorkOutcome::UnpinTransient => {
                if registry.get(&result.hash).map(|info| info.status)
                    == Some(TrackedStatus::Pinned)
                {
                    registry.set_status(&result.hash, TrackedStatus::Unpinning);
                }
                record_failure(registry, &result.hash, config, now, &mut stats);
            }
        }
    }

    stats
}

fn record_failure(
    registry: &mut TrackedHashRegistry,
    hash: &str,
    config: &ReconcileConfig,
    now: u64,
    stats: &mut CycleStats,
) {
    match registry.record_failure(hash, &config.retry_policy, now) {
        Some(TrackedStatus::Lost) => {
            warn!(hash = %hash, "retries exhausted; content recorded as lost");
            stats.lost += 1;
        }
        Some(_) => stats.retried += 1,
        None => {}
    }
}

/// Reconcile forever at a stable cadence.
///
/// Work exceeding the cycle budget is deferred and recomputed fresh next
/// cycle; partial source failures never abort sibling work.
pub async fn run_reconcile_loop<C: ContentStore>(
    storage: Arc<Storage>,
    aggregator: Arc<IndexAggregator>,
    store: C,
    mut registry: TrackedHashRegistry,
    config: ReconcileConfig,
) -> Result<()> {
    loop {
        let cycle_start = Instant::now();
        let deadline = cycle_start + config.cycle_interval;

        let snapshots = aggregator.fetch_all().await;
        let stats = run_cycle(
            &mut registry,
            &snapshots,
            &store,
            &config,
            deadline,
            unix_now(),
        )
        .await;

        if let Err(err) = storage.save_registry(&registry) {
            error!(error = %err, "failed to persist registry");
        }
        info!(
            tracked = registry.len(),
            desired = stats.desired,
            sources_failed = stats.sources_failed,
            new = stats.tracked_new,
            pinned = stats.pinned,
            rejected = stats.rejected,
            retried = stats.retried,
            lost = stats.lost,
            untracked = stats.untracked,
            forgotten = stats.forgotten,
            deferred = stats.deferred,
            "reconcile cycle complete"
        );

        let elapsed = cycle_start.elapsed();
        if elapsed < config.cycle_interval {
            sleep(config.cycle_interval - elapsed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipfs::{BlockStat, ContentStoreError, StoreResult};
    use crate::sources::IndexEntry;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const FAR: Duration = Duration::from_secs(60);

    fn test_config(max_attempts: u32) -> ReconcileConfig {
        ReconcileConfig {
            cycle_interval: Duration::from_secs(300),
            max_parallel: 10,
            retry_policy: RetryPolicy {
                base_delay_secs: 300,
                max_attempts,
            },
            store_timeout: Duration::from_secs(5),
        }
    }

    fn snapshot(name: &str, hashes: &[(&str, &[&str])]) -> IndexSnapshot {
        IndexSnapshot {
            source_name: name.to_string(),
            entries: hashes
                .iter()
                .map(|(hash, keys)| IndexEntry {
                    content_hash: hash.to_string(),
                    referencing_keys: keys.iter().map(|key| key.to_string()).collect(),
                })
                .collect(),
            failed: false,
        }
    }

    fn failed_snapshot(name: &str) -> IndexSnapshot {
        IndexSnapshot {
            source_name: name.to_string(),
            entries: Vec::new(),
            failed: true,
        }
    }

    #[derive(Default)]
    struct FakeStore {
        rejects: Vec<String>,
        validate_failures: Mutex<u32>,
        pin_failures: Mutex<u32>,
        unpin_failures: Mutex<u32>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeStore {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn take_failure(counter: &Mutex<u32>) -> bool {
            let mut remaining = counter.lock();
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                false
            }
        }
    }

    #[async_trait]
    impl ContentStore for FakeStore {
        async fn pin(&self, hash: &str, _timeout: Duration) -> StoreResult<()> {
            self.calls.lock().push(format!("pin:{hash}"));
            if Self::take_failure(&self.pin_failures) {
                return Err(ContentStoreError::Rpc("pin failed".to_string()));
            }
            Ok(())
        }

        async fn unpin(&self, hash: &str, _timeout: Duration) -> StoreResult<()> {
            self.calls.lock().push(format!("unpin:{hash}"));
            if Self::take_failure(&self.unpin_failures) {
                return Err(ContentStoreError::Rpc("unpin failed".to_string()));
            }
            Ok(())
        }

        async fn validate_wrapper(
            &self,
            hash: &str,
            _timeout: Duration,
        ) -> StoreResult<WrapperCheck> {
            self.calls.lock().push(format!("validate:{hash}"));
            if Self::take_failure(&self.validate_failures) {
                return Err(ContentStoreError::Timeout(Duration::from_secs(5)));
            }
            if self.rejects.iter().any(|rejected| rejected == hash) {
                return Ok(WrapperCheck::NotWrapper);
            }
            Ok(WrapperCheck::Wrapper)
        }

        async fn stat(&self, hash: &str, _timeout: Duration) -> StoreResult<BlockStat> {
            Ok(BlockStat {
                key: hash.to_string(),
                size: 0,
            })
        }
    }

    async fn cycle(
        registry: &mut TrackedHashRegistry,
        snapshots: &[IndexSnapshot],
        store: &FakeStore,
        config: &ReconcileConfig,
        now: u64,
    ) -> CycleStats {
        run_cycle(registry, snapshots, store, config, Instant::now() + FAR, now).await
    }

    #[tokio::test]
    async fn new_hash_is_validated_then_pinned() {
        let mut registry = TrackedHashRegistry::default();
        let store = FakeStore::default();
        let snapshots = [snapshot("s1", &[("QmA", &["0x11"])])];

        let stats = cycle(&mut registry, &snapshots, &store, &test_config(3), 1_000).await;
        assert_eq!(stats.tracked_new, 1);
        assert_eq!(stats.pinned, 1);
        assert_eq!(store.calls(), vec!["validate:QmA", "pin:QmA"]);

        let info = registry.get("QmA").unwrap();
        assert_eq!(info.status, TrackedStatus::Pinned);
        assert_eq!(info.contributing_sources[0].source_name, "s1");
    }

    #[tokio::test]
    async fn pinned_hash_still_referenced_is_left_alone() {
        let mut registry = TrackedHashRegistry::default();
        let store = FakeStore::default();
        let snapshots = [snapshot("s1", &[("QmA", &["0x11"])])];
        cycle(&mut registry, &snapshots, &store, &test_config(3), 1_000).await;

        let stats = cycle(&mut registry, &snapshots, &store, &test_config(3), 2_000).await;
        assert_eq!(stats.pinned, 0);
        assert_eq!(store.calls().len(), 2, "no further store calls");
    }

    #[tokio::test]
    async fn non_wrapper_is_terminal_and_absorbing() {
        let mut registry = TrackedHashRegistry::default();
        let store = FakeStore {
            rejects: vec!["QmBad".to_string()],
            ..FakeStore::default()
        };
        let snapshots = [snapshot("s1", &[("QmBad", &["0x11"])])];

        let stats = cycle(&mut registry, &snapshots, &store, &test_config(3), 1_000).await;
        assert_eq!(stats.rejected, 1);
        assert_eq!(
            registry.get("QmBad").unwrap().status,
            TrackedStatus::NotAWrapper
        );

        // Still referenced: never re-validated, never pinned.
        cycle(&mut registry, &snapshots, &store, &test_config(3), 100_000).await;
        assert_eq!(store.calls(), vec!["validate:QmBad"]);
    }

    #[tokio::test]
    async fn transient_validation_schedules_backoff_retry() {
        let mut registry = TrackedHashRegistry::default();
        let store = FakeStore {
            validate_failures: Mutex::new(1),
            ..FakeStore::default()
        };
        let snapshots = [snapshot("s1", &[("QmA", &["0x11"])])];

        let stats = cycle(&mut registry, &snapshots, &store, &test_config(3), 1_000).await;
        assert_eq!(stats.retried, 1);
        let info = registry.get("QmA").unwrap();
        assert_eq!(info.status, TrackedStatus::PendingValidation);
        let retry = info.retry.unwrap();
        assert_eq!(retry.attempt, 0);
        assert_eq!(retry.next_attempt_at, 1_300);

        // Not due yet: no store traffic.
        cycle(&mut registry, &snapshots, &store, &test_config(3), 1_100).await;
        assert_eq!(store.calls().len(), 1);

        // Due: validation retried, then pinned.
        let stats = cycle(&mut registry, &snapshots, &store, &test_config(3), 1_300).await;
        assert_eq!(stats.pinned, 1);
        assert_eq!(registry.get("QmA").unwrap().status, TrackedStatus::Pinned);
        assert_eq!(
            store.calls(),
            vec!["validate:QmA", "validate:QmA", "pin:QmA"]
        );
    }

    #[tokio::test]
    async fn pin_failures_escalate_to_lost() {
        let mut registry = TrackedHashRegistry::default();
        let store = FakeStore {
            pin_failures: Mutex::new(10),
            ..FakeStore::default()
        };
        let snapshots = [snapshot("s1", &[("QmA", &["0x11"])])];
        let config = test_config(1);

        // Attempt 0 fails at validation→pin; subsequent due retries skip
        // validation and fail the pin until the cap is exceeded.
        let mut now = 1_000;
        cycle(&mut registry, &snapshots, &store, &config, now).await;
        assert_eq!(registry.get("QmA").unwrap().status, TrackedStatus::Pinning);

        for _ in 0..2 {
            now = registry.get("QmA").unwrap().retry.unwrap().next_attempt_at;
            cycle(&mut registry, &snapshots, &store, &config, now).await;
        }

        let info = registry.get("QmA").unwrap();
        assert_eq!(info.status, TrackedStatus::Lost);
        assert_eq!(info.previous_status, Some(TrackedStatus::Pinning));

        // Absorbing while still referenced.
        let calls_before = store.calls().len();
        cycle(&mut registry, &snapshots, &store, &config, now + 100_000).await;
        assert_eq!(store.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn failed_source_shields_its_prior_contribution() {
        let mut registry = TrackedHashRegistry::default();
        let store = FakeStore::default();
        cycle(
            &mut registry,
            &[snapshot("s1", &[("QmA", &["0x11"])]), snapshot("s2", &[])],
            &store,
            &test_config(3),
            1_000,
        )
        .await;
        assert_eq!(registry.get("QmA").unwrap().status, TrackedStatus::Pinned);

        // s1 is down and nobody else references QmA: it must stay tracked.
        let stats = cycle(
            &mut registry,
            &[failed_snapshot("s1"), snapshot("s2", &[])],
            &store,
            &test_config(3),
            2_000,
        )
        .await;
        assert_eq!(stats.untracked, 0);
        assert_eq!(registry.get("QmA").unwrap().status, TrackedStatus::Pinned);

        // s1 recovers and no longer references it: now it is evicted.
        let stats = cycle(
            &mut registry,
            &[snapshot("s1", &[]), snapshot("s2", &[])],
            &store,
            &test_config(3),
            3_000,
        )
        .await;
        assert_eq!(stats.untracked, 1);
        assert!(!registry.contains("QmA"));
    }

    #[tokio::test]
    async fn unpin_failure_parks_at_unpinning_with_retry() {
        let mut registry = TrackedHashRegistry::default();
        let store = FakeStore {
            unpin_failures: Mutex::new(1),
            ..FakeStore::default()
        };
        let referenced = [snapshot("s1", &[("QmA", &["0x11"])])];
        let empty = [snapshot("s1", &[])];
        cycle(&mut registry, &referenced, &store, &test_config(3), 1_000).await;

        let stats = cycle(&mut registry, &empty, &store, &test_config(3), 2_000).await;
        assert_eq!(stats.retried, 1);
        let info = registry.get("QmA").unwrap();
        assert_eq!(info.status, TrackedStatus::Unpinning);
        let retry = info.retry.unwrap();
        assert_eq!(retry.next_attempt_at, 2_300);

        // Not due yet.
        cycle(&mut registry, &empty, &store, &test_config(3), 2_100).await;
        assert_eq!(registry.get("QmA").unwrap().status, TrackedStatus::Unpinning);

        // Due: unpin succeeds and the entry is gone.
        let stats = cycle(&mut registry, &empty, &store, &test_config(3), 2_300).await;
        assert_eq!(stats.untracked, 1);
        assert!(!registry.contains("QmA"));
    }

    #[tokio::test]
    async fn dereferenced_terminal_entries_are_forgotten() {
        let mut registry = TrackedHashRegistry::default();
        let store = FakeStore {
            rejects: vec!["QmBad".to_string()],
            ..FakeStore::default()
        };
        cycle(
            &mut registry,
            &[snapshot("s1", &[("QmBad", &["0x11"])])],
            &store,
            &test_config(3),
            1_000,
        )
        .await;
        assert!(registry.contains("QmBad"));

        let stats = cycle(
            &mut registry,
            &[snapshot("s1", &[])],
            &store,
            &test_config(3),
            2_000,
        )
        .await;
        assert_eq!(stats.forgotten, 1);
        assert!(!registry.contains("QmBad"));
        // Forgetting is bookkeeping only; no unpin was issued.
        assert_eq!(store.calls(), vec!["validate:QmBad"]);
    }

    #[tokio::test]
    async fn budget_overrun_defers_and_recomputes_next_cycle() {
        let mut registry = TrackedHashRegistry::default();
        let store = FakeStore::default();
        let hashes: Vec<String> = (0..5).map(|index| format!("Qm{index}")).collect();
        let snapshots = [IndexSnapshot {
            source_name: "s1".to_string(),
            entries: hashes
                .iter()
                .map(|hash| IndexEntry {
                    content_hash: hash.clone(),
                    referencing_keys: Vec::new(),
                })
                .collect(),
            failed: false,
        }];
        let config = ReconcileConfig {
            max_parallel: 2,
            ..test_config(3)
        };

        // Deadline already passed: exactly one batch runs.
        let stats = run_cycle(
            &mut registry,
            &snapshots,
            &store,
            &config,
            Instant::now(),
            1_000,
        )
        .await;
        assert_eq!(stats.tracked_new, 5);
        assert_eq!(stats.pinned, 2);
        assert_eq!(stats.deferred, 3);

        // Next cycle recomputes and finishes the remainder.
        let stats = cycle(&mut registry, &snapshots, &store, &config, 1_001).await;
        assert_eq!(stats.tracked_new, 0);
        assert_eq!(stats.pinned, 3);
        assert_eq!(stats.deferred, 0);
        for hash in &hashes {
            assert_eq!(registry.get(hash).unwrap().status, TrackedStatus::Pinned);
        }
    }

    #[tokio::test]
    async fn provenance_refreshes_in_place() {
        let mut registry = TrackedHashRegistry::default();
        let store = FakeStore::default();
        cycle(
            &mut registry,
            &[snapshot("s1", &[("QmA", &["0x11"])])],
            &store,
            &test_config(3),
            1_000,
        )
        .await;

        cycle(
            &mut registry,
            &[
                snapshot("s1", &[("QmA", &["0x11"])]),
                snapshot("s2", &[("QmA", &["0x22"])]),
            ],
            &store,
            &test_config(3),
            2_000,
        )
        .await;

        let info = registry.get("QmA").unwrap();
        let names: Vec<_> = info
            .contributing_sources
            .iter()
            .map(|source| source.source_name.as_str())
            .collect();
        assert_eq!(names, vec!["s1", "s2"]);
    }

    #[test]
    fn plan_union_keeps_hash_from_any_source() {
        let (desired, failed) = build_desired(&[
            snapshot("s1", &[("QmA", &["0x11"])]),
            snapshot("s2", &[]),
        ]);
        let registry = TrackedHashRegistry::default();
        let plan = compute_plan(&desired, &registry, &failed, 1_000);
        assert_eq!(plan.to_track, vec!["QmA".to_string()]);
        assert!(plan.to_untrack.is_empty());
    }
}
