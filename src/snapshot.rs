/*!
 * Crash-recovery snapshots
 *
 * A snapshot captures positions, account balance, open orders, model state
 * and a copy of the configuration. Each snapshot is written once, as its own
 * JSON file named `snapshot_<YYYYMMDD_HHMMSS>.json` (UTC). Files are never
 * rewritten; a second snapshot within the same second gets a `_<n>` suffix.
 *
 * Snapshots are best-effort advisory state for restarting, not a source of
 * truth for settlement: a failing source is logged and contributes an empty
 * value instead of aborting the snapshot.
 */

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use rampart_core_resilience::{ResilienceError, StatePersistence};

use crate::error::{RampartError, Result};

const FILE_PREFIX: &str = "snapshot_";
const FILE_EXTENSION: &str = ".json";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const STAMP_LEN: usize = 15;

/// Order status filter used when reading open orders
pub const ACTIVE_ORDER_STATUS: &str = "open";

/// An open position as reported by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub qty: f64,
    pub side: String,
    pub market_value: f64,
    pub cost_basis: f64,
    pub unrealized_pl: f64,
    pub unrealized_plpc: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
}

/// An order record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub symbol: String,
    pub side: String,
    pub qty: f64,
    pub order_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Point-in-time capture of the trading process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Utc>,
    pub positions: BTreeMap<String, Position>,
    pub account_balance: f64,
    pub active_orders: Vec<OrderRecord>,
    pub model_state: BTreeMap<String, Value>,
    pub configuration: BTreeMap<String, Value>,
}

/// Read-only accessors supplied by the trading process
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn positions(&self) -> anyhow::Result<BTreeMap<String, Position>>;

    async fn account_balance(&self) -> anyhow::Result<f64>;

    async fn active_orders(&self, status: &str) -> anyhow::Result<Vec<OrderRecord>>;

    /// Opaque model metadata (trained flag, last-trained time, accuracy)
    async fn model_state(&self) -> anyhow::Result<BTreeMap<String, Value>>;
}

/// A snapshot file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub stamp: NaiveDateTime,
    pub seq: u32,
}

impl SnapshotFile {
    /// Parse `snapshot_<stamp>.json` or `snapshot_<stamp>_<n>.json`
    fn parse(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let body = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_EXTENSION)?;
        let stamp_text = body.get(..STAMP_LEN)?;
        let stamp = NaiveDateTime::parse_from_str(stamp_text, STAMP_FORMAT).ok()?;
        let seq = match &body[STAMP_LEN..] {
            "" => 0,
            rest => rest.strip_prefix('_')?.parse().ok()?,
        };
        Some(Self { path, stamp, seq })
    }

    fn file_name(timestamp: &DateTime<Utc>, seq: u32) -> String {
        let stamp = timestamp.format(STAMP_FORMAT);
        if seq == 0 {
            format!("{FILE_PREFIX}{stamp}{FILE_EXTENSION}")
        } else {
            format!("{FILE_PREFIX}{stamp}_{seq}{FILE_EXTENSION}")
        }
    }
}

/// Append-only snapshot directory plus the in-memory latest snapshot
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    latest: Mutex<Option<SystemSnapshot>>,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            latest: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The most recently created snapshot in this process
    pub fn latest(&self) -> Option<SystemSnapshot> {
        self.lock_latest().clone()
    }

    /// Read every source, persist the snapshot and record it as the latest.
    ///
    /// The snapshot is recorded even if the write fails, so a later
    /// emergency persist can retry it.
    pub async fn create_snapshot(
        &self,
        source: &dyn SnapshotSource,
        configuration: BTreeMap<String, Value>,
    ) -> Result<SystemSnapshot> {
        let snapshot = SystemSnapshot {
            timestamp: Utc::now(),
            positions: best_effort("positions", source.positions().await),
            account_balance: best_effort("account balance", source.account_balance().await),
            active_orders: best_effort(
                "active orders",
                source.active_orders(ACTIVE_ORDER_STATUS).await,
            ),
            model_state: best_effort("model state", source.model_state().await),
            configuration,
        };

        *self.lock_latest() = Some(snapshot.clone());
        self.persist(&snapshot).await?;
        Ok(snapshot)
    }

    /// Write a snapshot to a new file. Existing files are never overwritten.
    pub async fn persist(&self, snapshot: &SystemSnapshot) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(snapshot)?;

        let mut seq = 0;
        loop {
            let path = self.dir.join(SnapshotFile::file_name(&snapshot.timestamp, seq));
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&body).await?;
                    file.sync_all().await?;
                    info!("System snapshot persisted to {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("{} exists, trying next suffix", path.display());
                    seq += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Snapshot files in the directory, oldest first
    pub async fn list(&self) -> Result<Vec<SnapshotFile>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(file) = SnapshotFile::parse(entry.path()) {
                files.push(file);
            }
        }
        files.sort_by(|a, b| (a.stamp, a.seq).cmp(&(b.stamp, b.seq)));
        Ok(files)
    }

    /// Load the newest readable snapshot; `None` when there is none.
    ///
    /// An unreadable newest file is skipped with a warning in favor of the
    /// next older one.
    pub async fn load_latest(&self) -> Result<Option<SystemSnapshot>> {
        let files = self.list().await?;
        for file in files.iter().rev() {
            match Self::read(&file.path).await {
                Ok(snapshot) => {
                    info!("Loaded snapshot from {}", file.path.display());
                    return Ok(Some(snapshot));
                }
                Err(e) => warn!("Skipping unreadable snapshot: {}", e),
            }
        }
        Ok(None)
    }

    /// Parse a single snapshot file
    pub async fn read(path: &Path) -> Result<SystemSnapshot> {
        let contents = tokio::fs::read(path).await?;
        serde_json::from_slice(&contents).map_err(|e| RampartError::CorruptSnapshot {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn lock_latest(&self) -> MutexGuard<'_, Option<SystemSnapshot>> {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StatePersistence for SnapshotStore {
    async fn persist_latest(&self) -> std::result::Result<Option<DateTime<Utc>>, ResilienceError> {
        let Some(snapshot) = self.latest() else {
            return Ok(None);
        };
        self.persist(&snapshot).await?;
        Ok(Some(snapshot.timestamp))
    }
}

fn best_effort<T: Default>(what: &str, result: anyhow::Result<T>) -> T {
    result.unwrap_or_else(|e| {
        warn!("Snapshot source failed to provide {}: {:#}", what, e);
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn snapshot_at(timestamp: DateTime<Utc>) -> SystemSnapshot {
        SystemSnapshot {
            timestamp,
            positions: BTreeMap::new(),
            account_balance: 1_000.0,
            active_orders: Vec::new(),
            model_state: BTreeMap::new(),
            configuration: BTreeMap::new(),
        }
    }

    #[test]
    fn test_file_name_parsing() {
        let file = SnapshotFile::parse(PathBuf::from("snapshot_20240102_030405.json")).unwrap();
        assert_eq!(file.seq, 0);
        assert_eq!(file.stamp.to_string(), "2024-01-02 03:04:05");

        let file = SnapshotFile::parse(PathBuf::from("snapshot_20240102_030405_3.json")).unwrap();
        assert_eq!(file.seq, 3);

        assert!(SnapshotFile::parse(PathBuf::from("snapshot_latest.json")).is_none());
        assert!(SnapshotFile::parse(PathBuf::from("snapshot_20240102_030405_x.json")).is_none());
        assert!(SnapshotFile::parse(PathBuf::from("notes.txt")).is_none());
    }

    #[tokio::test]
    async fn test_same_second_snapshots_get_suffix() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 14, 30, 0).unwrap();

        let first = store.persist(&snapshot_at(ts)).await.unwrap();
        let second = store.persist(&snapshot_at(ts)).await.unwrap();

        assert!(first.ends_with("snapshot_20240501_143000.json"));
        assert!(second.ends_with("snapshot_20240501_143000_1.json"));
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_load_latest_skips_corrupt_newest() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 14, 30, 0).unwrap();
        store.persist(&snapshot_at(ts)).await.unwrap();

        std::fs::write(dir.path().join("snapshot_20240501_150000.json"), b"{ truncated").unwrap();

        let loaded = store.load_latest().await.unwrap().unwrap();
        assert_eq!(loaded.timestamp, ts);
    }

    #[tokio::test]
    async fn test_persist_latest_without_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert_eq!(store.persist_latest().await.unwrap(), None);
    }
}
