//! Bidirectional naming-key ↔ content-hash index.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Reverse index between naming keys and content hashes, plus the scan cursor.
///
/// Invariant: `key_to_hash` and `hash_to_keys` mirror each other exactly, and
/// `hash_to_keys` never holds an empty key set. Mutated only by the scan loop;
/// the persisted snapshot is the read surface for everything else.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseIndex {
    /// Next block the scanner will process.
    pub last_processed_block: u64,
    key_to_hash: BTreeMap<String, String>,
    hash_to_keys: BTreeMap<String, BTreeSet<String>>,
}

impl ReverseIndex {
    pub fn new(start_block: u64) -> Self {
        Self {
            last_processed_block: start_block,
            ..Self::default()
        }
    }

    /// Point `key` at `content_hash`, or clear it with `None`.
    ///
    /// Returns `true` if the index changed. Clearing a key also prunes the
    /// reverse entry when the key was the last one referencing its hash.
    pub fn apply_update(&mut self, key: &str, content_hash: Option<&str>) -> bool {
        let current = self.key_to_hash.get(key).cloned();
        if current.as_deref() == content_hash {
            return false;
        }

        if let Some(previous) = current {
            self.remove_reverse(&previous, key);
        }

        match content_hash {
            Some(hash) => {
                self.key_to_hash.insert(key.to_string(), hash.to_string());
                self.hash_to_keys
                    .entry(hash.to_string())
                    .or_default()
                    .insert(key.to_string());
            }
            None => {
                self.key_to_hash.remove(key);
            }
        }
        true
    }

    pub fn hash_for_key(&self, key: &str) -> Option<&str> {
        self.key_to_hash.get(key).map(String::as_str)
    }

    pub fn keys_for_hash(&self, hash: &str) -> Option<&BTreeSet<String>> {
        self.hash_to_keys.get(hash)
    }

    /// Iterate `(content_hash, referencing_keys)` pairs, e.g. to serve the
    /// local snapshot source.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.hash_to_keys.iter()
    }

    pub fn key_count(&self) -> usize {
        self.key_to_hash.len()
    }

    pub fn hash_count(&self) -> usize {
        self.hash_to_keys.len()
    }

    fn remove_reverse(&mut self, hash: &str, key: &str) {
        if let Some(keys) = self.hash_to_keys.get_mut(hash) {
            keys.remove(key);
            if keys.is_empty() {
                self.hash_to_keys.remove(hash);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_mirrored(index: &ReverseIndex) {
        for (key, hash) in &index.key_to_hash {
            let keys = index.keys_for_hash(hash).expect("reverse entry exists");
            assert!(keys.contains(key), "{key} missing from reverse entry");
        }
        for (hash, keys) in index.entries() {
            assert!(!keys.is_empty(), "empty reverse entry for {hash}");
            for key in keys {
                assert_eq!(index.hash_for_key(key), Some(hash.as_str()));
            }
        }
    }

    #[test]
    fn update_points_both_directions() {
        let mut index = ReverseIndex::new(0);
        assert!(index.apply_update("node-a", Some("hash-1")));
        assert!(index.apply_update("node-b", Some("hash-1")));

        assert_eq!(index.hash_for_key("node-a"), Some("hash-1"));
        assert_eq!(index.keys_for_hash("hash-1").unwrap().len(), 2);
        assert_mirrored(&index);
    }

    #[test]
    fn repointing_key_moves_reverse_entry() {
        let mut index = ReverseIndex::new(0);
        index.apply_update("node-a", Some("hash-1"));
        index.apply_update("node-a", Some("hash-2"));

        assert_eq!(index.hash_for_key("node-a"), Some("hash-2"));
        assert!(index.keys_for_hash("hash-1").is_none());
        assert_mirrored(&index);
    }

    #[test]
    fn clearing_last_key_prunes_hash() {
        let mut index = ReverseIndex::new(0);
        index.apply_update("node-a", Some("hash-1"));
        index.apply_update("node-b", Some("hash-1"));

        assert!(index.apply_update("node-a", None));
        assert_eq!(index.keys_for_hash("hash-1").unwrap().len(), 1);

        assert!(index.apply_update("node-b", None));
        assert!(index.keys_for_hash("hash-1").is_none());
        assert_eq!(index.key_count(), 0);
        assert_eq!(index.hash_count(), 0);
    }

    #[test]
    fn redundant_update_reports_unchanged() {
        let mut index = ReverseIndex::new(0);
        index.apply_update("node-a", Some("hash-1"));
        assert!(!index.apply_update("node-a", Some("hash-1")));
        assert!(!index.apply_update("node-missing", None));
        assert_mirrored(&index);
    }

    #[test]
    fn state_survives_json_roundtrip() {
        let mut index = ReverseIndex::new(7);
        index.apply_update("node-a", Some("hash-1"));
        index.apply_update("node-b", Some("hash-2"));
        index.last_processed_block = 42;

        let json = serde_json::to_string(&index).expect("serialize");
        assert!(json.contains("\"lastProcessedBlock\":42"));
        assert!(json.contains("\"keyToHash\""));
        assert!(json.contains("\"hashToKeys\""));
        let restored: ReverseIndex = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, index);
    }
}
