//! Small persistent key/value memory store.
//!
//! Long-lived facts an assistant wants the engine to keep across restarts
//! ("the dog is allowed on the couch", delivery schedules, camera nicknames).
//! Bounded; flushed to YAML on mutation and at shutdown.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::warn;

/// Maximum retained keys; inserts beyond this are rejected.
pub const MEMORY_CAP: usize = 500;

pub struct MemoryStore {
    path: PathBuf,
    inner: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Load the store, starting empty when the file does not exist yet.
    pub fn open(path: PathBuf) -> Self {
        let inner = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_yaml::from_str(&text) {
                Ok(map) => map,
                Err(e) => {
                    warn!("memory store at {} is unreadable ({e}); starting empty", path.display());
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            inner: Mutex::new(inner),
        }
    }

    pub fn remember(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let mut inner = self.inner.lock();
        if inner.len() >= MEMORY_CAP && !inner.contains_key(&key) {
            warn!("memory store full ({MEMORY_CAP} keys); refusing '{key}'");
            return false;
        }
        inner.insert(key, value.into());
        self.flush_locked(&inner);
        true
    }

    pub fn recall(&self, key: &str) -> Option<String> {
        self.inner.lock().get(key).cloned()
    }

    pub fn forget(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.remove(key).is_some();
        if removed {
            self.flush_locked(&inner);
        }
        removed
    }

    pub fn all(&self) -> BTreeMap<String, String> {
        self.inner.lock().clone()
    }

    /// Write through; also called during shutdown.
    pub fn flush(&self) {
        let inner = self.inner.lock();
        self.flush_locked(&inner);
    }

    fn flush_locked(&self, map: &BTreeMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_yaml::to_string(map) {
            Ok(text) => {
                if let Err(e) = std::fs::write(&self.path, text) {
                    warn!("failed writing memory store {}: {e}", self.path.display());
                }
            }
            Err(e) => warn!("failed serializing memory store: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_recall_forget_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.yaml");

        let store = MemoryStore::open(path.clone());
        assert!(store.remember("dog", "allowed on couch"));
        assert_eq!(store.recall("dog").as_deref(), Some("allowed on couch"));

        // A fresh open sees persisted state.
        let store2 = MemoryStore::open(path.clone());
        assert_eq!(store2.recall("dog").as_deref(), Some("allowed on couch"));

        assert!(store2.forget("dog"));
        assert!(!store2.forget("dog"));
        let store3 = MemoryStore::open(path);
        assert!(store3.recall("dog").is_none());
    }

    #[test]
    fn cap_rejects_new_keys_but_allows_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(dir.path().join("m.yaml"));
        for i in 0..MEMORY_CAP {
            assert!(store.remember(format!("k{i}"), "v"));
        }
        assert!(!store.remember("overflow", "v"));
        assert!(store.remember("k0", "updated"));
        assert_eq!(store.recall("k0").as_deref(), Some("updated"));
    }
}
