//! Durable state files and startup bootstrap.
//!
//! Both state files are plain JSON and fully rewritten on each save so they
//! stay human-diffable. Writes go through a temp file plus rename; a corrupt
//! or mismatched state directory is a fatal startup error, never something
//! the loops try to repair at runtime.

use crate::cli::NodeConfig;
use crate::index::ReverseIndex;
use crate::registry::TrackedHashRegistry;
use eyre::{eyre, Result, WrapErr};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const SCHEMA_VERSION: u64 = 1;
const META_FILE: &str = "meta.json";
const REVERSE_INDEX_FILE: &str = "reverse_index.json";
const REGISTRY_FILE: &str = "registry.json";

/// Config fields that pin the identity of a data directory. Changing these
/// invalidates the scan cursor, so a mismatch refuses to start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct StoredConfig {
    start_block: u64,
    resolver_address: Option<String>,
}

impl From<&NodeConfig> for StoredConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            start_block: config.start_block,
            resolver_address: config.resolver_address.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    schema_version: u64,
    config: StoredConfig,
}

#[derive(Debug)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    /// Open the data directory and bootstrap metadata if needed.
    pub fn open(config: &NodeConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).wrap_err_with(|| {
            format!("failed to create data dir {}", config.data_dir.display())
        })?;
        let storage = Self {
            data_dir: config.data_dir.clone(),
        };
        storage.bootstrap(config)?;
        Ok(storage)
    }

    fn bootstrap(&self, config: &NodeConfig) -> Result<()> {
        let meta_path = self.path(META_FILE);
        if !meta_path.exists() {
            let meta = Meta {
                schema_version: SCHEMA_VERSION,
                config: StoredConfig::from(config),
            };
            write_json_atomic(&meta_path, &meta)?;
            info!(data_dir = %self.data_dir.display(), "initialized storage metadata");
            return Ok(());
        }

        let meta: Meta = read_json(&meta_path)?;
        if meta.schema_version != SCHEMA_VERSION {
            return Err(eyre!(
                "unsupported schema version {} (expected {SCHEMA_VERSION})",
                meta.schema_version
            ));
        }
        let expected = StoredConfig::from(config);
        if meta.config != expected {
            return Err(eyre!(
                "config mismatch: stored={:?} config={expected:?}",
                meta.config
            ));
        }
        Ok(())
    }

    /// Load the reverse index, or a fresh one cursored at `start_block`.
    pub fn load_reverse_index(&self, start_block: u64) -> Result<ReverseIndex> {
        let path = self.path(REVERSE_INDEX_FILE);
        if !path.exists() {
            return Ok(ReverseIndex::new(start_block));
        }
        read_json(&path)
    }

    pub fn save_reverse_index(&self, index: &ReverseIndex) -> Result<()> {
        write_json_atomic(&self.path(REVERSE_INDEX_FILE), index)
    }

    /// Load the tracked-hash registry, empty if never persisted.
    pub fn load_registry(&self) -> Result<TrackedHashRegistry> {
        let path = self.path(REGISTRY_FILE);
        if !path.exists() {
            return Ok(TrackedHashRegistry::default());
        }
        read_json(&path)
    }

    pub fn save_registry(&self, registry: &TrackedHashRegistry) -> Result<()> {
        write_json_atomic(&self.path(REGISTRY_FILE), registry)
    }

    fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)
        .wrap_err_with(|| format!("failed to read state file {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .wrap_err_with(|| format!("corrupt state file {}", path.display()))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).wrap_err("failed to serialize state")?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json)
        .wrap_err_with(|| format!("failed to write state file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .wrap_err_with(|| format!("failed to replace state file {}", path.display()))?;
    Ok(())
}
