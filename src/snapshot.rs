//! Instant snapshot cache: the most recent clean first page per viewer.
//!
//! Reads are local lookups only and never touch the network. A write is
//! skipped while the stored snapshot is younger than the freshness window,
//! and snapshots older than `max_age` are treated as absent.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::SnapshotConfig;
use crate::cursor::Cursors;
use crate::error::FeedError;
use crate::listing::Listing;

const ANONYMOUS_KEY: &str = "feed_snapshot:anonymous";

/// Key-value persistence capability.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Process-local store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// One file per key under `dir`, written via temp file + rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating snapshot dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(key.as_bytes());
        let mut name = String::with_capacity(24);
        for b in digest.iter().take(10) {
            use std::fmt::Write as _;
            let _ = write!(&mut name, "{:02x}", b);
        }
        self.dir.join(format!("{name}.json"))
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(value)?;
        f.sync_all()?;
        fs::rename(&tmp, &path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }
}

/// Whose snapshot this is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ViewerKey {
    #[default]
    Anonymous,
    User(String),
}

impl ViewerKey {
    pub fn user(id: impl Into<String>) -> Self {
        ViewerKey::User(id.into())
    }

    pub fn storage_key(&self) -> String {
        match self {
            ViewerKey::Anonymous => ANONYMOUS_KEY.to_string(),
            ViewerKey::User(id) => format!("feed_snapshot:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub listings: Vec<Listing>,
    pub cursors: Cursors,
    pub captured_at: DateTime<Utc>,
}

/// What a write attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotWrite {
    Written,
    /// An existing snapshot is younger than the freshness window.
    SkippedFresh,
    /// Nothing to store.
    SkippedEmpty,
    /// Logged; never surfaced to the feed.
    Failed(FeedError),
}

pub struct SnapshotCache {
    store: Arc<dyn KvStore>,
    freshness: Duration,
    max_age: Duration,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn KvStore>, config: &SnapshotConfig) -> Self {
        Self {
            store,
            freshness: Duration::from_secs(config.freshness_secs),
            max_age: Duration::from_secs(config.max_age_secs),
        }
    }

    /// In-memory cache with default windows.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), &SnapshotConfig::default())
    }

    pub fn read(&self, viewer: &ViewerKey) -> Option<Snapshot> {
        self.read_at(viewer, Utc::now())
    }

    /// Any storage or decode failure is a miss.
    pub fn read_at(&self, viewer: &ViewerKey, now: DateTime<Utc>) -> Option<Snapshot> {
        let snap = self.load(viewer, now)?;
        counter!("feed_snapshot_hits_total").increment(1);
        Some(snap)
    }

    fn load(&self, viewer: &ViewerKey, now: DateTime<Utc>) -> Option<Snapshot> {
        let key = viewer.storage_key();
        let bytes = match self.store.get(&key) {
            Ok(Some(b)) => b,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(target: "feed", %key, "snapshot read failed: {e:#}");
                return None;
            }
        };
        let snap: Snapshot = match serde_json::from_slice(&bytes) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(target: "feed", %key, "snapshot decode failed: {e}");
                return None;
            }
        };
        if age(snap.captured_at, now) > self.max_age {
            tracing::debug!(target: "feed", %key, "snapshot too old, ignoring");
            return None;
        }
        Some(snap)
    }

    pub fn write(&self, viewer: &ViewerKey, listings: &[Listing], cursors: &Cursors) -> SnapshotWrite {
        self.write_at(viewer, listings, cursors, Utc::now())
    }

    pub fn write_at(
        &self,
        viewer: &ViewerKey,
        listings: &[Listing],
        cursors: &Cursors,
        now: DateTime<Utc>,
    ) -> SnapshotWrite {
        if listings.is_empty() {
            return SnapshotWrite::SkippedEmpty;
        }
        if let Some(existing) = self.load(viewer, now) {
            if age(existing.captured_at, now) < self.freshness {
                counter!("feed_snapshot_skipped_total").increment(1);
                return SnapshotWrite::SkippedFresh;
            }
        }

        let snap = Snapshot {
            listings: listings.to_vec(),
            cursors: cursors.clone(),
            captured_at: now,
        };
        let key = viewer.storage_key();
        let res = serde_json::to_vec(&snap)
            .context("encoding snapshot")
            .and_then(|bytes| self.store.set(&key, &bytes));
        match res {
            Ok(()) => {
                counter!("feed_snapshot_writes_total").increment(1);
                tracing::debug!(target: "feed", %key, count = listings.len(), "snapshot written");
                SnapshotWrite::Written
            }
            Err(e) => {
                let err = FeedError::Store(format!("{e:#}"));
                tracing::warn!(target: "feed", %key, "{err}");
                SnapshotWrite::Failed(err)
            }
        }
    }
}

/// Age of a capture; clock skew into the future counts as zero.
fn age(captured_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - captured_at).to_std().unwrap_or(Duration::ZERO)
}
