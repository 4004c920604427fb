use crate::parser::parse_timestamp;
use crate::types::{ChangeStamp, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Durable map from identity key (`"<workspace>/<note>"` or bare note id) to the last
/// accepted change stamp. Changes stay in memory until `flush`, which rewrites the whole file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    entries: HashMap<String, ChangeStamp>,
    dirty: bool,
}

impl StateStore {
    /// Empty store backed by `path`, without touching the file.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: HashMap::new(),
            dirty: false,
        }
    }

    /// Reads the state file. A missing file is a normal first start; an unreadable or
    /// corrupt one is logged and treated as empty, accepting that known notes re-emit.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let mut store = Self::empty(path);

        let raw = match tokio::fs::read(&store.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {}, starting fresh", store.path.display());
                return store;
            }
            Err(e) => {
                warn!("Failed to read state file {}: {}", store.path.display(), e);
                return store;
            }
        };

        let parsed: HashMap<String, Value> = match serde_json::from_slice(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("State file {} is not a JSON object, ignoring it: {}", store.path.display(), e);
                return store;
            }
        };

        for (key, value) in parsed {
            match parse_timestamp(&value) {
                Some(stamp) => {
                    store.entries.insert(key, stamp);
                }
                None if value == Value::from(0) => {
                    store.entries.insert(key, ChangeStamp::EPOCH);
                }
                None => warn!("Dropping state entry {} with unreadable timestamp {}", key, value),
            }
        }

        info!("Loaded {} state entries from {}", store.entries.len(), store.path.display());
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<ChangeStamp> {
        self.entries.get(key).copied()
    }

    /// Records `stamp` for `key` if it is strictly newer than what is stored.
    /// Returns whether the entry moved.
    pub fn set(&mut self, key: &str, stamp: ChangeStamp) -> bool {
        match self.entries.get(key) {
            Some(current) if *current >= stamp => false,
            _ => {
                self.entries.insert(key.to_string(), stamp);
                self.dirty = true;
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether there are accepted changes not yet on disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn snapshot(&self) -> BTreeMap<String, ChangeStamp> {
        self.entries.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Writes the full map to a sibling temp file and renames it over the state file.
    /// On failure the in-memory map is kept and stays dirty for the next batch.
    pub async fn flush(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(&self.snapshot())?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        self.dirty = false;
        debug!("Flushed {} state entries to {}", self.entries.len(), self.path.display());
        Ok(())
    }
}
