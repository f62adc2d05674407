//! Tracked-hash registry and its retry state machine.
//!
//! The registry is the system of record for reconciliation: one entry per
//! content hash the node has decided to keep pinned, carrying the pin
//! lifecycle status, the retry/backoff state, and the sources that claim the
//! hash is still referenced. All backoff math lives here so no call site
//! grows its own retry counters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock as unix seconds, the registry's timestamp domain.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Pin lifecycle status of a tracked hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackedStatus {
    /// Sighted but not yet confirmed to be a pinnable wrapper.
    PendingValidation,
    /// Validated; pin attempt outstanding or retrying.
    Pinning,
    /// Pinned and left alone until untracked.
    Pinned,
    /// Eviction decided; unpin attempt outstanding or retrying.
    Unpinning,
    /// The hash does not resolve to a wrapper directory. Terminal.
    NotAWrapper,
    /// Retries exhausted; content presumed unreachable. Terminal.
    Lost,
}

impl TrackedStatus {
    /// Terminal statuses are never re-queued by the track path.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Pinned | Self::NotAWrapper | Self::Lost)
    }
}

/// Scheduled-retry state for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    /// Completed failed attempts so far.
    pub attempt: u32,
    /// Unix seconds after which the next attempt is due.
    pub next_attempt_at: u64,
}

/// One source's claim on a tracked hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub source_name: String,
    pub referencing_keys: Vec<String>,
}

/// Registry entry for a single content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedHashInfo {
    pub status: TrackedStatus,
    /// Status that was being attempted when the hash went `Lost`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<TrackedStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryState>,
    pub contributing_sources: Vec<SourceRef>,
}

impl TrackedHashInfo {
    /// Whether a scheduled retry has elapsed. Entries without retry state are
    /// always due.
    pub fn retry_due(&self, now: u64) -> bool {
        match &self.retry {
            Some(retry) => retry.next_attempt_at <= now,
            None => true,
        }
    }
}

/// Backoff configuration for the registry state machine.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay_secs: u64,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Exponential backoff: `now + base × 2^attempt`, saturating.
    pub fn next_attempt_at(&self, now: u64, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        now.saturating_add(self.base_delay_secs.saturating_mul(factor))
    }
}

/// Durable map of content hash → tracked state.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedHashRegistry {
    tracked_hashes: BTreeMap<String, TrackedHashInfo>,
}

impl TrackedHashRegistry {
    pub fn get(&self, hash: &str) -> Option<&TrackedHashInfo> {
        self.tracked_hashes.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.tracked_hashes.contains_key(hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TrackedHashInfo)> {
        self.tracked_hashes.iter()
    }

    pub fn len(&self) -> usize {
        self.tracked_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked_hashes.is_empty()
    }

    /// Start tracking a newly sighted hash.
    pub fn track(&mut self, hash: &str, sources: Vec<SourceRef>) {
        self.tracked_hashes.insert(
            hash.to_string(),
            TrackedHashInfo {
                status: TrackedStatus::PendingValidation,
                previous_status: None,
                retry: None,
                contributing_sources: sources,
            },
        );
    }

    /// Refresh the contributing sources of an existing entry in place.
    pub fn update_sources(&mut self, hash: &str, sources: Vec<SourceRef>) {
        if let Some(info) = self.tracked_hashes.get_mut(hash) {
            info.contributing_sources = sources;
        }
    }

    /// Move an entry to a new in-flight status, clearing any pending retry.
    pub fn set_status(&mut self, hash: &str, status: TrackedStatus) {
        if let Some(info) = self.tracked_hashes.get_mut(hash) {
            if info.status != status {
                info.previous_status = Some(info.status);
            }
            info.status = status;
            info.retry = None;
        }
    }

    /// Pin confirmed; the entry rests at `Pinned` with no retry state.
    pub fn mark_pinned(&mut self, hash: &str) {
        self.set_status(hash, TrackedStatus::Pinned);
    }

    /// Validation said the hash is not a wrapper directory. Terminal.
    pub fn mark_not_wrapper(&mut self, hash: &str) {
        self.set_status(hash, TrackedStatus::NotAWrapper);
    }

    /// Record a failed attempt at the entry's current status.
    ///
    /// Schedules the next attempt with exponential backoff, or transitions to
    /// terminal `Lost` once the attempt count exceeds the policy's maximum.
    /// Returns the status the entry ended up in.
    pub fn record_failure(
        &mut self,
        hash: &str,
        policy: &RetryPolicy,
        now: u64,
    ) -> Option<TrackedStatus> {
        let info = self.tracked_hashes.get_mut(hash)?;
        let attempt = info.retry.map(|retry| retry.attempt + 1).unwrap_or(0);
        if attempt > policy.max_attempts {
            info.previous_status = Some(info.status);
            info.status = TrackedStatus::Lost;
            info.retry = None;
        } else {
            info.retry = Some(RetryState {
                attempt,
                next_attempt_at: policy.next_attempt_at(now, attempt),
            });
        }
        Some(info.status)
    }

    /// Unpin confirmed; the hash leaves the registry entirely.
    pub fn remove(&mut self, hash: &str) -> Option<TrackedHashInfo> {
        self.tracked_hashes.remove(hash)
    }

    /// Status counts for cycle summaries and state dumps.
    pub fn status_counts(&self) -> BTreeMap<TrackedStatus, usize> {
        let mut counts = BTreeMap::new();
        for info in self.tracked_hashes.values() {
            *counts.entry(info.status).or_insert(0) += 1;
        }
        counts
    }
}
