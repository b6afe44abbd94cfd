//! JSON snapshot file.
//!
//! Format: `{"gauges": {name: f64}, "counters": {name: i64}}`. Writes go to
//! `<path>.tmp` first and are renamed over `<path>`, so a crash mid-write
//! leaves the previous snapshot intact. Saves through clones of one store
//! are serialized on a shared lock.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::MetricsError;
use crate::model::StoreSnapshot;

#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileSnapshotStore {
    /// Opens the store, removing a temporary file left by an interrupted save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let store = Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        };
        let tmp = store.tmp_path();
        match std::fs::remove_file(&tmp) {
            Ok(()) => warn!(path = %tmp.display(), "removed stale snapshot temp file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %tmp.display(), error = %e, "failed to remove stale temp file"),
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Atomically replaces the file with `snapshot`.
    pub async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), MetricsError> {
        self.save_with(|| snapshot.clone()).await
    }

    /// Like [`save`](Self::save), but takes the snapshot only once the write
    /// lock is held, so the last save to finish carries the newest state.
    pub async fn save_with<F>(&self, take: F) -> Result<(), MetricsError>
    where
        F: FnOnce() -> StoreSnapshot,
    {
        let _guard = self.write_lock.lock().await;
        let snapshot = take();
        let data = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = self.tmp_path();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), metrics = snapshot.len(), "snapshot saved");
        Ok(())
    }

    /// Reads the last snapshot. A missing file yields an empty snapshot.
    pub async fn load(&self) -> Result<StoreSnapshot, MetricsError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot file, starting empty");
                Ok(StoreSnapshot::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot() -> StoreSnapshot {
        let mut snap = StoreSnapshot::default();
        snap.gauges.insert("Load1".into(), 0.75);
        snap.counters.insert("PollCount".into(), 42);
        snap
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("metrics-db.json"));

        store.save(&snapshot()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), snapshot());
        assert!(!store.tmp_path().exists());
    }

    #[tokio::test]
    async fn test_file_format() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("db.json"));
        store.save(&snapshot()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["gauges"]["Load1"], 0.75);
        assert_eq!(raw["counters"]["PollCount"], 42);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = FileSnapshotStore::new(&path);
        assert!(matches!(
            store.load().await.unwrap_err(),
            MetricsError::Serialization(_)
        ));
    }

    #[test]
    fn test_stale_tmp_removed_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        let tmp = dir.path().join("db.json.tmp");
        std::fs::write(&tmp, b"partial").unwrap();

        let _store = FileSnapshotStore::new(&path);
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn test_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("nested/dir/db.json"));
        store.save(&snapshot()).await.unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_saves_all_succeed() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("db.json"));
        let mut big = StoreSnapshot::default();
        for i in 0..2000 {
            big.gauges.insert(format!("g{i}"), i as f64);
        }

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..32 {
            let store = store.clone();
            let mut snap = big.clone();
            snap.counters.insert("writer".into(), i);
            tasks.spawn(async move { store.save(&snap).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.gauges.len(), 2000);
        assert!(loaded.counters.contains_key("writer"));
        assert!(!store.tmp_path().exists());
    }
}
