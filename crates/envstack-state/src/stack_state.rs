//! Persisted record of what has been applied for an environment.
//!
//! The reconciler diffs a new descriptor set against the last saved
//! [`StackState`] to decide what is created, updated, replaced or pruned, and
//! which prior resources are protected.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StateError;
use crate::provider_traits::{ResourceHandle, ResourceKey, ResourceKind};

/// Result type for state persistence
pub type StateResult<T> = std::result::Result<T, StateError>;

/// One applied resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub key: ResourceKey,
    pub kind: ResourceKind,
    /// Provider-side identity; a change means the resource must be replaced
    pub identity: String,
    /// SHA-256 hex of the declared spec (secret payloads hashed, never stored)
    pub fingerprint: String,
    pub protect: bool,
    pub depends_on: Vec<ResourceKey>,
    pub handle: ResourceHandle,
}

/// All resources applied for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackState {
    pub environment: String,
    pub resources: BTreeMap<ResourceKey, ResourceRecord>,
    pub updated_at: DateTime<Utc>,
}

impl StackState {
    pub fn new(environment: impl Into<String>) -> Self {
        StackState {
            environment: environment.into(),
            resources: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceRecord> {
        self.resources.get(key)
    }

    pub fn upsert(&mut self, record: ResourceRecord) {
        self.resources.insert(record.key.clone(), record);
        self.updated_at = Utc::now();
    }

    pub fn remove(&mut self, key: &ResourceKey) -> Option<ResourceRecord> {
        let removed = self.resources.remove(key);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Keys of protected resources, in key order.
    pub fn protected_keys(&self) -> Vec<ResourceKey> {
        self.resources
            .values()
            .filter(|r| r.protect)
            .map(|r| r.key.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Stack state persistence.
///
/// Guarantees:
/// - `load` after `save` returns the saved state.
/// - `load` of an unknown environment returns `None`, never an error.
/// - `remove` is a no-op for unknown environments.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, environment: &str) -> StateResult<Option<StackState>>;

    async fn save(&self, state: &StackState) -> StateResult<()>;

    async fn remove(&self, environment: &str) -> StateResult<()>;
}

/// Filesystem-backed state store: one pretty JSON file per environment.
///
/// Layout: `<root>/<environment>.json`
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StateResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| StateError::Io {
            environment: String::new(),
            source,
        })?;
        Ok(Self { root })
    }

    fn state_path(&self, environment: &str) -> StateResult<PathBuf> {
        if environment.is_empty()
            || environment.contains(['/', '\\'])
            || environment.starts_with('.')
        {
            return Err(StateError::InvalidEnvironment(environment.to_string()));
        }
        Ok(self.root.join(format!("{}.json", environment)))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, environment: &str) -> StateResult<Option<StackState>> {
        let path = self.state_path(environment)?;
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Io {
                    environment: environment.to_string(),
                    source,
                })
            }
        };
        let state = serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
            environment: environment.to_string(),
            source,
        })?;
        Ok(Some(state))
    }

    async fn save(&self, state: &StackState) -> StateResult<()> {
        let path = self.state_path(&state.environment)?;
        let io_err = |source: std::io::Error| StateError::Io {
            environment: state.environment.clone(),
            source,
        };
        let content = serde_json::to_vec_pretty(state).map_err(|source| StateError::Corrupt {
            environment: state.environment.clone(),
            source,
        })?;

        // Atomic write: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(io_err)?;
        tmp.write_all(&content).map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        debug!(environment = %state.environment, resources = state.resources.len(), "state saved");
        Ok(())
    }

    async fn remove(&self, environment: &str) -> StateResult<()> {
        let path = self.state_path(environment)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Io {
                environment: environment.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider_traits::NamespaceHandle;

    fn record(key: &str, protect: bool) -> ResourceRecord {
        ResourceRecord {
            key: ResourceKey::new(key),
            kind: ResourceKind::Namespace,
            identity: "hello-world-dev".to_string(),
            fingerprint: "abc".to_string(),
            protect,
            depends_on: Vec::new(),
            handle: ResourceHandle::Namespace(NamespaceHandle {
                name: "hello-world-dev".to_string(),
            }),
        }
    }

    fn make_store() -> (tempfile::TempDir, FileStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let (_dir, store) = make_store();
        let mut state = StackState::new("dev");
        state.upsert(record("ns-dev", false));
        store.save(&state).await.unwrap();

        let loaded = store.load("dev").await.unwrap().expect("state present");
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_load_unknown_environment_is_none() {
        let (_dir, store) = make_store();
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (_dir, store) = make_store();
        let state = StackState::new("dev");
        store.save(&state).await.unwrap();
        store.remove("dev").await.unwrap();
        store.remove("dev").await.unwrap();
        assert!(store.load("dev").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, store) = make_store();
        let err = store.load("../etc").await.unwrap_err();
        assert!(matches!(err, StateError::InvalidEnvironment(_)));
    }

    #[tokio::test]
    async fn test_corrupt_file_reported() {
        let (dir, store) = make_store();
        std::fs::write(dir.path().join("dev.json"), b"{not json").unwrap();
        let err = store.load("dev").await.unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn test_protected_keys() {
        let mut state = StackState::new("production");
        state.upsert(record("a", true));
        state.upsert(record("b", false));
        assert_eq!(state.protected_keys(), vec![ResourceKey::new("a")]);
    }
}
