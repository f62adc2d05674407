//! Chain scanning: chunked log queries feeding the reverse index.

use crate::chain::{contenthash::decode_content_ref_bytes, LogSource};
use crate::cli::NodeConfig;
use crate::index::ReverseIndex;
use crate::storage::Storage;
use eyre::Result;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Scan-loop tuning, lifted from the node config.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub max_block_span: u64,
    pub query_retry_backoff: Duration,
    pub poll_interval: Duration,
}

impl From<&NodeConfig> for ScanConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            max_block_span: config.max_block_span.max(1),
            query_retry_backoff: config.query_retry_backoff(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Plans contiguous sub-ranges of at most `max_span` blocks.
#[derive(Debug, Clone)]
struct RangePlanner {
    next: u64,
    to: u64,
    max_span: u64,
}

impl RangePlanner {
    fn new(from: u64, to: u64, max_span: u64) -> Self {
        Self {
            next: from,
            to,
            max_span: max_span.max(1),
        }
    }

    /// Returns the next inclusive sub-range, or `None` when complete.
    fn next_range(&mut self) -> Option<RangeInclusive<u64>> {
        if self.next > self.to {
            return None;
        }
        let end = self
            .next
            .saturating_add(self.max_span - 1)
            .min(self.to);
        let range = self.next..=end;
        self.next = end.saturating_add(1);
        Some(range)
    }
}

/// Scan `[from, to]` and fold the result into the reverse index.
///
/// Log queries run in `max_block_span` chunks; a failed query backs off and
/// retries the same chunk without advancing. Updates are coalesced per key
/// across the whole window (last writer wins), applied to the index exactly
/// once per key, and the cursor advances to `to + 1`. The caller persists.
pub async fn scan_window<S: LogSource>(
    source: &S,
    index: &mut ReverseIndex,
    from: u64,
    to: u64,
    config: &ScanConfig,
) -> usize {
    let mut window: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut planner = RangePlanner::new(from, to, config.max_block_span);

    let mut current = planner.next_range();
    while let Some(range) = current.clone() {
        match source.query_logs(*range.start(), *range.end()).await {
            Ok(events) => {
                for event in events {
                    let content = decode_content_ref_bytes(&event.payload);
                    window.insert(event.key, content);
                }
                current = planner.next_range();
            }
            Err(err) => {
                warn!(
                    range_start = *range.start(),
                    range_end = *range.end(),
                    error = %err,
                    "log query failed; retrying same range"
                );
                sleep(config.query_retry_backoff).await;
            }
        }
    }

    let mut updates = 0;
    for (key, content) in &window {
        if index.apply_update(key, content.as_deref()) {
            updates += 1;
        }
    }
    index.last_processed_block = to.saturating_add(1);
    updates
}

/// Advance the cursor to the chain head forever.
///
/// Transient failures never terminate the loop; only startup/config errors
/// (handled by the host before this is spawned) are fatal.
pub async fn run_scan_loop<S: LogSource>(
    storage: Arc<Storage>,
    source: S,
    mut index: ReverseIndex,
    config: ScanConfig,
) -> Result<()> {
    loop {
        let head = match source.head().await {
            Ok(head) => head,
            Err(err) => {
                warn!(error = %err, "head query failed");
                sleep(config.query_retry_backoff).await;
                continue;
            }
        };

        let cursor = index.last_processed_block;
        if head < cursor {
            debug!(head, cursor, "head behind cursor; waiting");
            sleep(config.poll_interval).await;
            continue;
        }

        let updates = scan_window(&source, &mut index, cursor, head, &config).await;
        if let Err(err) = storage.save_reverse_index(&index) {
            // Retried implicitly: the next window persists the same state again.
            error!(error = %err, "failed to persist reverse index");
        }
        info!(
            range_start = cursor,
            range_end = head,
            updates,
            keys = index.key_count(),
            hashes = index.hash_count(),
            "scan window applied"
        );
        sleep(config.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainResult, ChainRpcError, NamingEvent};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn test_config(max_span: u64) -> ScanConfig {
        ScanConfig {
            max_block_span: max_span,
            query_retry_backoff: Duration::ZERO,
            poll_interval: Duration::ZERO,
        }
    }

    fn payload_for(digest_byte: u8) -> Vec<u8> {
        vec![0xe3, 0x01, 0x01, 0x70, 0x01, digest_byte]
    }

    struct VecLogSource {
        head: u64,
        events: Vec<NamingEvent>,
        queried: Mutex<Vec<(u64, u64)>>,
        failures_remaining: Mutex<u32>,
    }

    impl VecLogSource {
        fn new(head: u64, events: Vec<NamingEvent>) -> Self {
            Self {
                head,
                events,
                queried: Mutex::new(Vec::new()),
                failures_remaining: Mutex::new(0),
            }
        }

        fn fail_next(self, count: u32) -> Self {
            *self.failures_remaining.lock() = count;
            self
        }
    }

    #[async_trait]
    impl LogSource for VecLogSource {
        async fn head(&self) -> ChainResult<u64> {
            Ok(self.head)
        }

        async fn query_logs(&self, from: u64, to: u64) -> ChainResult<Vec<NamingEvent>> {
            self.queried.lock().push((from, to));
            let mut failures = self.failures_remaining.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ChainRpcError::InvalidResponse("boom".to_string()));
            }
            Ok(self
                .events
                .iter()
                .filter(|event| event.block_number >= from && event.block_number <= to)
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn window_coalesces_to_last_writer() {
        let hash1 = payload_for(0xaa);
        let hash2 = payload_for(0xbb);
        let source = VecLogSource::new(
            10,
            vec![
                NamingEvent {
                    block_number: 1,
                    key: "node-a".to_string(),
                    payload: hash1.clone(),
                },
                NamingEvent {
                    block_number: 5,
                    key: "node-a".to_string(),
                    payload: hash2.clone(),
                },
            ],
        );
        let mut index = ReverseIndex::new(0);

        let updates = scan_window(&source, &mut index, 0, 10, &test_config(100)).await;
        assert_eq!(updates, 1);

        let expected = decode_content_ref_bytes(&hash2).unwrap();
        let stale = decode_content_ref_bytes(&hash1).unwrap();
        assert_eq!(index.hash_for_key("node-a"), Some(expected.as_str()));
        assert!(index.keys_for_hash(&stale).is_none());
        assert_eq!(index.last_processed_block, 11);
    }

    #[tokio::test]
    async fn rescan_of_processed_range_is_idempotent() {
        let source = VecLogSource::new(
            10,
            vec![NamingEvent {
                block_number: 3,
                key: "node-a".to_string(),
                payload: payload_for(0xaa),
            }],
        );
        let mut index = ReverseIndex::new(0);

        let first = scan_window(&source, &mut index, 0, 10, &test_config(100)).await;
        assert_eq!(first, 1);
        let before = index.clone();

        let second = scan_window(&source, &mut index, 0, 10, &test_config(100)).await;
        assert_eq!(second, 0);
        assert_eq!(index, before);
    }

    #[tokio::test]
    async fn queries_are_chunked_to_max_span() {
        let source = VecLogSource::new(11, Vec::new());
        let mut index = ReverseIndex::new(0);

        scan_window(&source, &mut index, 0, 11, &test_config(5)).await;
        let queried = source.queried.lock().clone();
        assert_eq!(queried, vec![(0, 4), (5, 9), (10, 11)]);
    }

    #[tokio::test]
    async fn failed_query_retries_same_range() {
        let source = VecLogSource::new(9, Vec::new()).fail_next(2);
        let mut index = ReverseIndex::new(0);

        scan_window(&source, &mut index, 0, 9, &test_config(5)).await;
        let queried = source.queried.lock().clone();
        assert_eq!(queried, vec![(0, 4), (0, 4), (0, 4), (5, 9)]);
        assert_eq!(index.last_processed_block, 10);
    }

    #[tokio::test]
    async fn unrecognized_payload_clears_the_key() {
        let source = VecLogSource::new(
            20,
            vec![NamingEvent {
                block_number: 12,
                key: "node-a".to_string(),
                payload: vec![0xde, 0xad],
            }],
        );
        let mut index = ReverseIndex::new(0);
        index.apply_update("node-a", Some("hash-1"));

        let updates = scan_window(&source, &mut index, 0, 20, &test_config(100)).await;
        assert_eq!(updates, 1);
        assert_eq!(index.hash_for_key("node-a"), None);
        assert!(index.keys_for_hash("hash-1").is_none());
        assert_eq!(index.key_count(), 0);
    }
}
