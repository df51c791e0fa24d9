//! Atomic JSON persistence for the agent's stateful stores
//!
//! Every persistent store in the agent goes through [`AtomicStore`]: writes
//! go to a temp file in the same directory and are renamed over the target,
//! so an external reader never observes a partially-written file. Loads that
//! fail to parse fall back to the default image with a warning; they never
//! crash the process.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::sync::{OnceCell, RwLock, RwLockReadGuard};
use tracing::{debug, warn};
use uuid::Uuid;

/// Atomic-write, schema-validated JSON persistence for one store file
pub struct AtomicStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AtomicStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store from disk. Missing or invalid files yield the default
    /// image; invalid files additionally log a warning.
    pub async fn load(&self) -> T {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        "Invalid store file {}, resetting to empty state: {}",
                        self.path.display(),
                        e
                    );
                    T::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Store file {} does not exist yet", self.path.display());
                T::default()
            }
            Err(e) => {
                warn!(
                    "Failed to read store file {}: {}; using empty state",
                    self.path.display(),
                    e
                );
                T::default()
            }
        }
    }

    /// Persist the value atomically: write a temp file, then rename it over
    /// the target.
    pub async fn save(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Store(format!("Failed to create store directory: {}", e)))?;
        }

        let serialized = serde_json::to_string_pretty(value)
            .map_err(|e| Error::Store(format!("Failed to serialize store: {}", e)))?;

        let tmp_path = self
            .path
            .with_extension(format!("tmp.{}", Uuid::new_v4().simple()));

        tokio::fs::write(&tmp_path, serialized.as_bytes())
            .await
            .map_err(|e| Error::Store(format!("Failed to write {}: {}", tmp_path.display(), e)))?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            // Leave no temp files behind on failure
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Error::Store(format!(
                "Failed to commit {}: {}",
                self.path.display(),
                e
            )));
        }

        Ok(())
    }
}

/// A lazily-loaded in-memory image over an [`AtomicStore`].
///
/// The first load is single-flight: concurrent callers share one in-flight
/// read instead of each hitting the disk. Reads return guards over the
/// image; mutations are serialized and write through atomically before the
/// lock is released.
pub struct LazyStore<T> {
    store: AtomicStore<T>,
    image: OnceCell<RwLock<T>>,
}

impl<T> LazyStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: AtomicStore::new(path),
            image: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    async fn image(&self) -> &RwLock<T> {
        self.image
            .get_or_init(|| async { RwLock::new(self.store.load().await) })
            .await
    }

    /// Snapshot-style read access to the in-memory image
    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.image().await.read().await
    }

    /// Apply a mutation under the write lock and persist the result before
    /// releasing it. The closure's return value is handed back to the
    /// caller.
    pub async fn mutate<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let image = self.image().await;
        let mut guard = image.write().await;
        let result = f(&mut guard);
        self.store.save(&guard).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        items: Vec<String>,
        counter: u32,
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store: AtomicStore<Sample> = AtomicStore::new(dir.path().join("sample.json"));

        let value = Sample {
            items: vec!["a".into(), "b".into()],
            counter: 7,
        };
        store.save(&value).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded, value);
    }

    #[tokio::test]
    async fn test_invalid_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store: AtomicStore<Sample> = AtomicStore::new(&path);
        let loaded = store.load().await;
        assert_eq!(loaded, Sample::default());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store: AtomicStore<Sample> = AtomicStore::new(dir.path().join("sample.json"));
        store.save(&Sample::default()).await.unwrap();
        store
            .save(&Sample {
                items: vec!["x".into()],
                counter: 1,
            })
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["sample.json".to_string()]);
    }

    #[tokio::test]
    async fn test_lazy_store_mutate_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lazy.json");

        {
            let lazy: LazyStore<Sample> = LazyStore::new(&path);
            lazy.mutate(|s| {
                s.counter = 42;
                s.items.push("persisted".into());
            })
            .await
            .unwrap();
        }

        // A fresh store observes the committed state
        let lazy: LazyStore<Sample> = LazyStore::new(&path);
        let image = lazy.read().await;
        assert_eq!(image.counter, 42);
        assert_eq!(image.items, vec!["persisted".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_first_load_single_flight() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.json");
        let store: AtomicStore<Sample> = AtomicStore::new(&path);
        store
            .save(&Sample {
                items: vec![],
                counter: 5,
            })
            .await
            .unwrap();

        let lazy: std::sync::Arc<LazyStore<Sample>> = std::sync::Arc::new(LazyStore::new(&path));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lazy = lazy.clone();
            handles.push(tokio::spawn(async move { lazy.read().await.counter }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 5);
        }
    }
}
