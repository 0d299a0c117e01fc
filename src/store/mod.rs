mod persister;

pub use persister::{Persister, SnapshotThrottle};

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::AppError;

/// Async string key-value store. Whole records only: no queries, no partial
/// updates.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
}

/// A set of serialized records to write together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    records: BTreeMap<&'static str, String>,
}

impl Snapshot {
    pub fn insert(&mut self, key: &'static str, value: String) {
        self.records.insert(key, value);
    }

    /// Fold `newer` in; its records win.
    pub fn merge(&mut self, newer: Snapshot) {
        self.records.extend(newer.records);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.records.keys().copied()
    }

    pub async fn write_to(&self, store: &dyn KeyValueStore) -> Result<(), AppError> {
        for (key, value) in &self.records {
            store.set(key, value).await?;
        }
        Ok(())
    }
}

/// In-process store. Counts writes so tests can observe coalescing.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    write_counter: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` calls so far.
    pub fn write_count(&self) -> usize {
        self.write_counter.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        self.write_counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// One JSON file per key under a base directory.
///
/// Writes go through temp+rename so a crash mid-write never leaves a
/// truncated record behind; a write lock keeps concurrent sets of the same
/// key from interleaving.
pub struct FileStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AppError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AppError::Store(format!("invalid key: {key:?}")));
        }
        Ok(self.base_dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Store(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        let _lock = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| AppError::Store(format!("failed to create store directory: {e}")))?;
        atomic_write(&path, value)
            .await
            .map_err(|e| AppError::Store(format!("failed to write {}: {e}", path.display())))
    }
}

/// Atomic write: temp file + rename.
async fn atomic_write(path: &Path, content: &str) -> Result<(), std::io::Error> {
    let tmp_path = path.with_extension(format!("tmp.{}", std::process::id()));
    tokio::fs::write(&tmp_path, content.as_bytes()).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));

        assert_eq!(store.get("projects").await.unwrap(), None);
        store.set("projects", "[1,2]").await.unwrap();
        store.set("projects", "[3]").await.unwrap();
        assert_eq!(store.get("projects").await.unwrap().as_deref(), Some("[3]"));
        assert!(dir.path().join("nested/projects.json").exists());
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        for key in ["../escape", "a/b", "", "dot.json"] {
            assert!(
                matches!(store.set(key, "x").await, Err(AppError::Store(_))),
                "key {key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn snapshot_merge_prefers_newer() {
        let mut older = Snapshot::default();
        older.insert("projects", "old".into());
        older.insert("selection", "sel".into());
        let mut newer = Snapshot::default();
        newer.insert("projects", "new".into());
        older.merge(newer);

        let store = MemoryStore::new();
        older.write_to(&store).await.unwrap();
        assert_eq!(store.get("projects").await.unwrap().as_deref(), Some("new"));
        assert_eq!(store.get("selection").await.unwrap().as_deref(), Some("sel"));
        assert_eq!(store.write_count(), 2);
    }
}
