//! Snapshot Store: key-value persistence for normalized service snapshots.
//!
//! Keys follow the scheme `prefix:service:date` (date = YYYY-MM-DD of the
//! collection). Two backings share one interface: an in-process map and Redis.
//! The store is explicitly two-state: it starts Connected (Redis) or Memory,
//! and any Redis connectivity failure flips it to Degraded (in-memory) for the
//! rest of the process lifetime. The transition is logged once and is never
//! reversed; there is no automatic reconnect.
//!
//! Failure semantics on the read path are deliberately soft: a corrupt or
//! unreadable entry is skipped with a warning, and `get_latest_entries` always
//! returns whatever subset of the five services resolved.

mod memory;
mod redis_backend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::warn;

use crate::config::StoreConf;
use crate::models::{LatestEntry, ServiceKind, Snapshot};
use memory::MemoryBackend;
use redis_backend::RedisBackend;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Timeouts and connection resets; safe to retry.
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Matches `*` against exactly one colon-separated key segment.
/// `snapshot:directory:*` matches `snapshot:directory:2024-01-01` but not
/// `snapshot:directory:2024-01-01:extra`.
pub fn key_matches(pattern: &str, key: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split(':').collect();
    let key_segments: Vec<&str> = key.split(':').collect();
    if pattern_segments.len() != key_segments.len() {
        return false;
    }
    pattern_segments
        .iter()
        .zip(&key_segments)
        .all(|(p, k)| *p == "*" || p == k)
}

/// Key-value snapshot store with an irreversible Redis -> memory fallback.
///
/// Constructed explicitly via [`SnapshotStore::connect`] and injected wherever
/// it is needed; there is no global instance.
pub struct SnapshotStore {
    prefix: String,
    default_ttl: Duration,
    memory: MemoryBackend,
    redis: Option<RedisBackend>,
    degraded: AtomicBool,
}

impl SnapshotStore {
    /// Initializes the store. With `backend = "redis"` an unreachable server
    /// does not fail the boot: the store starts degraded instead.
    pub async fn connect(cfg: &StoreConf) -> Self {
        let default_ttl = Duration::from_secs(cfg.ttl_days * 24 * 60 * 60);
        let (redis, degraded) = if cfg.backend == "redis" {
            match RedisBackend::connect(&cfg.redis_url).await {
                Ok(backend) => (Some(backend), false),
                Err(e) => {
                    warn!(target: "store", "redis unreachable, starting degraded: {e}");
                    (None, true)
                }
            }
        } else {
            (None, false)
        };
        Self {
            prefix: cfg.key_prefix.clone(),
            default_ttl,
            memory: MemoryBackend::new(),
            redis,
            degraded: AtomicBool::new(degraded),
        }
    }

    /// In-memory store for tests and the degraded path.
    pub fn in_memory() -> Self {
        Self {
            prefix: "snapshot".into(),
            default_ttl: Duration::from_secs(45 * 24 * 60 * 60),
            memory: MemoryBackend::new(),
            redis: None,
            degraded: AtomicBool::new(false),
        }
    }

    pub async fn shutdown(&self) {
        // Memory needs nothing; the Redis connection drops with the store.
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn mode(&self) -> &'static str {
        if self.is_degraded() {
            "degraded"
        } else if self.redis.is_some() {
            "redis"
        } else {
            "memory"
        }
    }

    pub fn snapshot_key(&self, service: ServiceKind, date: time::Date) -> String {
        format!(
            "{}:{}:{:04}-{:02}-{:02}",
            self.prefix,
            service.as_str(),
            date.year(),
            u8::from(date.month()),
            date.day()
        )
    }

    fn service_pattern(&self, service: ServiceKind) -> String {
        format!("{}:{}:*", self.prefix, service.as_str())
    }

    fn redis_active(&self) -> Option<&RedisBackend> {
        if self.is_degraded() {
            None
        } else {
            self.redis.as_ref()
        }
    }

    /// Flips to the in-memory backing, permanently for this process.
    fn degrade(&self, reason: &str) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(target: "store", "redis failure, degrading to in-memory store for process lifetime: {reason}");
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Snapshot>, StoreError> {
        let raw = if let Some(redis) = self.redis_active() {
            match redis.get_raw(key).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.degrade(&e.to_string());
                    self.memory.get_raw(key)
                }
            }
        } else {
            self.memory.get_raw(key)
        };
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.set_with_ttl(key, snapshot, self.default_ttl).await
    }

    pub async fn set_with_ttl(
        &self,
        key: &str,
        snapshot: &Snapshot,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(snapshot)?;
        if let Some(redis) = self.redis_active() {
            match redis.set_raw(key, &payload, ttl).await {
                Ok(()) => return Ok(()),
                Err(e) => self.degrade(&e.to_string()),
            }
        }
        self.memory.set_raw(key, payload, ttl);
        Ok(())
    }

    /// All parseable snapshots whose key matches the pattern. Corrupt entries
    /// are skipped with a warning rather than failing the whole scan.
    pub async fn get_multiple(&self, pattern: &str) -> Result<Vec<Snapshot>, StoreError> {
        let entries = if let Some(redis) = self.redis_active() {
            match redis.scan_raw(pattern).await {
                Ok(entries) => entries,
                Err(e) => {
                    self.degrade(&e.to_string());
                    self.memory.scan_raw(pattern)
                }
            }
        } else {
            self.memory.scan_raw(pattern)
        };

        let mut snapshots = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            if !key_matches(pattern, &key) {
                continue;
            }
            match serde_json::from_str::<Snapshot>(&raw) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!(target: "store", %key, "skipping corrupt snapshot entry: {e}");
                }
            }
        }
        Ok(snapshots)
    }

    /// Latest snapshot for one service: scans the service's keys and picks the
    /// max `collected_at` among whatever deserialized.
    pub async fn get_latest_by_service(
        &self,
        service: ServiceKind,
    ) -> Result<Option<Snapshot>, StoreError> {
        let pattern = self.service_pattern(service);
        let snapshots = self.get_multiple(&pattern).await?;
        Ok(snapshots
            .into_iter()
            .filter(|s| s.service == service)
            .max_by_key(|s| s.collected_at))
    }

    /// Best-effort latest snapshot per service. Services without data (or whose
    /// read failed) are simply absent; this never returns an error.
    pub async fn get_latest_entries(&self) -> Vec<LatestEntry> {
        let mut entries = Vec::new();
        for service in ServiceKind::ALL {
            match self.get_latest_by_service(service).await {
                Ok(Some(snapshot)) => entries.push(LatestEntry {
                    service,
                    data: snapshot,
                }),
                Ok(None) => {}
                Err(e) => {
                    warn!(target: "store", %service, "latest-entry read failed, treating as absent: {e}");
                }
            }
        }
        entries
    }
}
