//! Roster retention.
//!
//! Holds the parsed rosters in memory, optionally mirrored to disk as
//! one JSON file per upload so a restart does not lose the current
//! schedule. Rosters are immutable once stored; a new upload for the
//! same id replaces the old roster outright, never merges with it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::Roster;

// ═══════════════════════════════════════════════════════════
// RosterStore
// ═══════════════════════════════════════════════════════════

struct StoreInner {
    rosters: HashMap<Uuid, Arc<Roster>>,
    /// Id of the most recently stored roster. Recomputed from parse
    /// timestamps after eviction.
    latest: Option<Uuid>,
}

/// Shared roster cache with a time-to-live policy.
///
/// Readers get an `Arc` snapshot, so a `get` racing a `put` observes
/// either the old or the new roster, never a partial one. Disk writes
/// are best-effort: a failed write keeps the roster in memory and logs.
pub struct RosterStore {
    inner: RwLock<StoreInner>,
    data_dir: Option<PathBuf>,
    ttl: Duration,
}

impl RosterStore {
    /// Memory-only store. Rosters vanish on restart.
    pub fn new_in_memory(ttl_days: i64) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                rosters: HashMap::new(),
                latest: None,
            }),
            data_dir: None,
            ttl: Duration::days(ttl_days),
        }
    }

    /// Store mirrored to `dir`, loading whatever valid rosters are
    /// already there. Unreadable files are skipped with a warning so
    /// one corrupt file cannot block startup.
    pub fn with_persistence(dir: impl Into<PathBuf>, ttl_days: i64) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut rosters: HashMap<Uuid, Arc<Roster>> = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable roster file");
                    continue;
                }
            };
            match serde_json::from_slice::<Roster>(&bytes) {
                Ok(roster) => {
                    debug!(path = %path.display(), records = roster.records.len(), "Loaded roster");
                    rosters.insert(roster.source_id, Arc::new(roster));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping corrupt roster file");
                }
            }
        }

        let latest = rosters
            .values()
            .max_by_key(|r| (r.parsed_at, r.source_id))
            .map(|r| r.source_id);

        Ok(Self {
            inner: RwLock::new(StoreInner { rosters, latest }),
            data_dir: Some(dir),
            ttl: Duration::days(ttl_days),
        })
    }

    // ── Contract operations ──

    /// Store a roster under its upload id, superseding any previous
    /// roster with the same id, and mark it as the latest.
    pub fn put(&self, roster: Roster) -> Result<(), StoreError> {
        if let Some(dir) = &self.data_dir {
            let path = dir.join(format!("{}.json", roster.source_id));
            match serde_json::to_vec_pretty(&roster) {
                Ok(bytes) => {
                    if let Err(e) = std::fs::write(&path, bytes) {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to persist roster, keeping it in memory only"
                        );
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize roster for persistence"),
            }
        }

        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let id = roster.source_id;
        inner.rosters.insert(id, Arc::new(roster));
        inner.latest = Some(id);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Arc<Roster>>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.rosters.get(&id).cloned())
    }

    /// The most recently stored roster, if any survives.
    pub fn latest(&self) -> Result<Option<Arc<Roster>>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .latest
            .and_then(|id| inner.rosters.get(&id))
            .cloned())
    }

    /// Drop every roster older than the TTL at instant `now`, returning
    /// how many were evicted. A roster parsed exactly TTL ago survives;
    /// one instant older does not.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let expired: Vec<Uuid> = {
            let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
            let expired: Vec<Uuid> = inner
                .rosters
                .values()
                .filter(|r| now.signed_duration_since(r.parsed_at) > self.ttl)
                .map(|r| r.source_id)
                .collect();
            for id in &expired {
                inner.rosters.remove(id);
            }
            let latest = inner
                .rosters
                .values()
                .max_by_key(|r| (r.parsed_at, r.source_id))
                .map(|r| r.source_id);
            inner.latest = latest;
            expired
        };

        if let Some(dir) = &self.data_dir {
            for id in &expired {
                let path = dir.join(format!("{id}.json"));
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "Failed to delete expired roster file");
                    }
                }
            }
        }

        if !expired.is_empty() {
            debug!(evicted = expired.len(), "Expired rosters dropped");
        }
        Ok(expired.len())
    }
}

// ═══════════════════════════════════════════════════════════
// Error type
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Roster store lock poisoned")]
    LockPoisoned,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
