/*
    snapshot.rs - Record set snapshots for fast recovery

    Periodically writes every record (tombstones included) to disk so that
    open does not have to replay the whole commit log.

    Features:
    - Atomic snapshot creation (write to temp, then rename)
    - Versioned snapshots with metadata; versions continue across restarts
    - Automatic cleanup of old snapshots
*/

use crate::core_store::model::{now_millis, Record};
use crate::core_store::store::errors::StoreResult;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const SNAPSHOT_EXT: &str = "json";

/// Snapshot metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Snapshot version
    pub version: u64,

    /// Timestamp when created
    pub timestamp: u64,

    /// Number of records, tombstones included
    pub records_count: usize,
}

/// Snapshot data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,

    /// Records in store order
    pub records: Vec<Record>,
}

/// Manages snapshots
pub struct SnapshotManager {
    snapshots_dir: PathBuf,
    current_version: AtomicU64,
}

impl SnapshotManager {
    pub fn new(snapshots_dir: PathBuf) -> StoreResult<Self> {
        create_dir_all(&snapshots_dir)?;

        let latest = Self::snapshot_files(&snapshots_dir)?
            .last()
            .and_then(|path| Self::version_of(path))
            .unwrap_or(0);

        Ok(SnapshotManager { snapshots_dir, current_version: AtomicU64::new(latest) })
    }

    /// Create a new snapshot, returning its version
    pub fn create_snapshot(&self, records: Vec<Record>) -> StoreResult<u64> {
        let version = self.current_version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Snapshot {
            metadata: SnapshotMetadata {
                version,
                timestamp: now_millis(),
                records_count: records.len(),
            },
            records,
        };

        let data = serde_json::to_vec(&snapshot)?;

        // Write to temporary file first
        let temp_path = self.snapshots_dir.join(format!("snapshot_{:020}.tmp", version));
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        // Atomically rename to final name
        std::fs::rename(temp_path, self.snapshot_path(version))?;

        Ok(version)
    }

    /// Load the latest snapshot, if any
    pub fn load_latest(&self) -> StoreResult<Option<Snapshot>> {
        let snapshots = Self::snapshot_files(&self.snapshots_dir)?;
        let Some(latest) = snapshots.last() else {
            return Ok(None);
        };

        let data = std::fs::read(latest)?;
        let snapshot: Snapshot = serde_json::from_slice(&data)?;
        Ok(Some(snapshot))
    }

    /// Clean up old snapshots, keeping only the N most recent
    pub fn cleanup_old_snapshots(&self, keep_count: usize) -> StoreResult<()> {
        let snapshots = Self::snapshot_files(&self.snapshots_dir)?;
        if snapshots.len() <= keep_count {
            return Ok(());
        }

        // Remove oldest snapshots
        for path in snapshots.iter().take(snapshots.len() - keep_count) {
            std::fs::remove_file(path)?;
        }

        Ok(())
    }

    pub fn current_version(&self) -> u64 {
        self.current_version.load(Ordering::SeqCst)
    }

    fn snapshot_path(&self, version: u64) -> PathBuf {
        self.snapshots_dir.join(format!("snapshot_{:020}.{}", version, SNAPSHOT_EXT))
    }

    /// Snapshot files sorted oldest first (names are zero-padded)
    fn snapshot_files(dir: &Path) -> StoreResult<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().and_then(|ext| ext.to_str()).map(|ext| ext == SNAPSHOT_EXT).unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn version_of(path: &Path) -> Option<u64> {
        path.file_stem()?.to_str()?.strip_prefix("snapshot_")?.parse().ok()
    }
}
