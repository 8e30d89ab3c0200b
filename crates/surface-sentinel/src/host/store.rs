//! Key/value persistence used by the emergency-save path.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::types::{SentinelError, SentinelResult};

/// Host-provided key/value store (browser local storage, a JSON file, ...).
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &str, value: &str) -> SentinelResult<()>;
    fn get(&self, key: &str) -> SentinelResult<Option<String>>;
    /// Keys starting with `prefix`, in sorted order.
    fn keys_with_prefix(&self, prefix: &str) -> SentinelResult<Vec<String>>;
}

/// In-memory store. Lost on process exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&self, key: &str, value: &str) -> SentinelResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| SentinelError::Store(format!("store lock poisoned: {e}")))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> SentinelResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| SentinelError::Store(format!("store lock poisoned: {e}")))?;
        Ok(entries.get(key).cloned())
    }

    fn keys_with_prefix(&self, prefix: &str) -> SentinelResult<Vec<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| SentinelError::Store(format!("store lock poisoned: {e}")))?;
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
