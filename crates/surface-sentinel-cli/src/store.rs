//! JSON-file key/value store backing emergency saves and reports.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use surface_sentinel::{KeyValueStore, SentinelError, SentinelResult};

/// Whole-file JSON store. Every `put` rewrites the file.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, loading existing entries. A missing file is empty.
    pub fn open(path: &Path) -> SentinelResult<Self> {
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };
        tracing::debug!("Opened store {} ({} entries)", path.display(), entries.len());
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> SentinelResult<MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|e| SentinelError::Store(format!("store lock poisoned: {e}")))
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> SentinelResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(entries)?;
        let mut file = std::fs::File::create(&self.path)?;
        file.write_all(&payload)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn put(&self, key: &str, value: &str) -> SentinelResult<()> {
        let mut entries = self.entries()?;
        let mut staged = entries.clone();
        staged.insert(key.to_string(), value.to_string());
        // memory only changes once the file has the entry
        self.flush(&staged)?;
        *entries = staged;
        Ok(())
    }

    fn get(&self, key: &str) -> SentinelResult<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn keys_with_prefix(&self, prefix: &str) -> SentinelResult<Vec<String>> {
        Ok(self
            .entries()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
