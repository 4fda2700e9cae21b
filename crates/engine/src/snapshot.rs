//! Snapshot store: the JSON file recording every badge already notified.
//!
//! # File Format
//!
//! `{ "<universe id>": { "data": [ <badge>, ... ] }, ... }`, pretty-printed.
//!
//! # Merge on Save
//!
//! Saving never blindly overwrites: the current file is read back and the
//! in-memory snapshot is folded into it as a union, so badges written by
//! another writer since this process loaded the file survive.
//!
//! # Atomic Writes
//!
//! 1. Write to `<path>.tmp`
//! 2. fsync the file
//! 3. Rename to `<path>`
//!
//! Readers see either the old or the new file, never a partial write. A file
//! that fails to parse is renamed aside before being replaced.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use badgewatch_common::types::Snapshot;

/// Errors that can occur while saving a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What is currently on disk.
enum OnDisk {
    Missing,
    Valid(Snapshot),
    Corrupt(String),
}

/// Loads and merge-saves the snapshot file.
pub struct SnapshotStore {
    path: PathBuf,
    /// Serialises read-merge-write cycles within this process.
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. A missing, unreadable or malformed file yields an
    /// empty snapshot; this is never fatal.
    pub async fn load(&self) -> Snapshot {
        match self.read_on_disk().await {
            OnDisk::Valid(snapshot) => {
                tracing::info!(
                    path = %self.path.display(),
                    universes = snapshot.universe_count(),
                    badges = snapshot.badge_count(),
                    "Snapshot loaded"
                );
                snapshot
            }
            OnDisk::Missing => {
                tracing::info!(path = %self.path.display(), "No snapshot yet, starting empty");
                Snapshot::new()
            }
            OnDisk::Corrupt(reason) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %reason,
                    "Snapshot unreadable, starting empty"
                );
                Snapshot::new()
            }
        }
    }

    /// Merge `snapshot` into the file on disk and write the union back.
    /// Returns what was written.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<Snapshot, SnapshotError> {
        let _guard = self.write_lock.lock().await;

        let merged = match self.read_on_disk().await {
            OnDisk::Valid(mut on_disk) => {
                on_disk.merge(snapshot);
                on_disk
            }
            OnDisk::Missing => snapshot.clone(),
            OnDisk::Corrupt(reason) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %reason,
                    "Snapshot on disk unreadable, replacing it with the in-memory snapshot"
                );
                self.quarantine().await;
                snapshot.clone()
            }
        };

        self.write_atomic(&merged).await?;
        tracing::info!(
            path = %self.path.display(),
            universes = merged.universe_count(),
            badges = merged.badge_count(),
            "Snapshot saved"
        );
        Ok(merged)
    }

    async fn read_on_disk(&self) -> OnDisk {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return OnDisk::Missing,
            Err(e) => return OnDisk::Corrupt(e.to_string()),
        };
        if raw.trim().is_empty() {
            return OnDisk::Missing;
        }
        match serde_json::from_str(&raw) {
            Ok(snapshot) => OnDisk::Valid(snapshot),
            Err(e) => OnDisk::Corrupt(e.to_string()),
        }
    }

    /// Move an unparsable snapshot aside so it can be inspected later.
    async fn quarantine(&self) {
        let target = self.sibling(&format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S")));
        match tokio::fs::rename(&self.path, &target).await {
            Ok(()) => tracing::warn!(moved_to = %target.display(), "Corrupt snapshot moved aside"),
            Err(e) => tracing::warn!(error = %e, "Could not move corrupt snapshot aside"),
        }
    }

    async fn write_atomic(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }

        let body = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.sibling(".tmp");

        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err(&tmp))?;
        file.write_all(&body).await.map_err(io_err(&tmp))?;
        file.sync_all().await.map_err(io_err(&tmp))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(io_err(&self.path))?;
        Ok(())
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> SnapshotError + use<> {
    let path = path.to_path_buf();
    move |source| SnapshotError::Io { path, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use badgewatch_common::types::{Badge, UniverseRecord};
    use tempfile::tempdir;

    fn snapshot_with(universe: &str, ids: &[u64]) -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.universes.insert(
            universe.to_string(),
            UniverseRecord {
                data: ids.iter().map(|id| Badge::new(*id, format!("b{id}"))).collect(),
            },
        );
        snapshot
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("badges.json"));
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("badges.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = SnapshotStore::new(&path);
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("badges.json"));
        store.save(&snapshot_with("111", &[1, 2])).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.get("111").unwrap().data.len(), 2);
        assert!(!dir.path().join("badges.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state").join("badges.json"));
        store.save(&snapshot_with("1", &[1])).await.unwrap();
        assert!(dir.path().join("state").join("badges.json").exists());
    }

    #[tokio::test]
    async fn test_disjoint_writers_union() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("badges.json");
        store_base(&path).await;

        // Two writers loaded the same base and discovered different badges.
        let writer_a = SnapshotStore::new(&path);
        let writer_b = SnapshotStore::new(&path);
        writer_a.save(&snapshot_with("111", &[1, 2])).await.unwrap();
        writer_b.save(&snapshot_with("111", &[1, 3])).await.unwrap();

        let loaded = SnapshotStore::new(&path).load().await;
        let mut ids: Vec<_> = loaded
            .get("111")
            .unwrap()
            .data
            .iter()
            .map(|b| b.id.to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    async fn store_base(path: &Path) {
        SnapshotStore::new(path)
            .save(&snapshot_with("111", &[1]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_save_keeps_universes_only_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("badges.json");
        SnapshotStore::new(&path)
            .save(&snapshot_with("other", &[9]))
            .await
            .unwrap();

        let merged = SnapshotStore::new(&path)
            .save(&snapshot_with("111", &[1]))
            .await
            .unwrap();
        assert!(merged.contains("other"));
        assert!(merged.contains("111"));
    }

    #[tokio::test]
    async fn test_save_over_corrupt_file_quarantines_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("badges.json");
        std::fs::write(&path, "garbage").unwrap();

        let store = SnapshotStore::new(&path);
        store.save(&snapshot_with("1", &[1])).await.unwrap();

        assert_eq!(store.load().await.badge_count(), 1);
        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(quarantined);
    }
}
