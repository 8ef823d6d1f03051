//! In-process map backing for the snapshot store. Serves as the primary
//! backing in `memory` mode and as the degraded fallback once Redis fails.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::key_matches;

struct Entry {
    payload: String,
    expires_at: Instant,
}

/// Read-mostly map with lazy TTL eviction. Safe for concurrent readers.
pub(super) struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryBackend {
    pub(super) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(super) fn get_raw(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.payload.clone()),
            _ => None,
        }
    }

    pub(super) fn set_raw(&self, key: impl Into<String>, payload: String, ttl: Duration) {
        let entry = Entry {
            payload,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.into(), entry);
    }

    pub(super) fn scan_raw(&self, pattern: &str) -> Vec<(String, String)> {
        let now = Instant::now();
        // Expired entries are dropped on scan rather than by a sweeper task;
        // data changes at most daily, so scans are rare and cheap.
        self.entries.write().retain(|_, e| now < e.expires_at);
        self.entries
            .read()
            .iter()
            .filter(|(key, _)| key_matches(pattern, key))
            .map(|(key, entry)| (key.clone(), entry.payload.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_expiry() {
        let backend = MemoryBackend::new();
        backend.set_raw("k", "v".into(), Duration::ZERO);
        assert!(backend.get_raw("k").is_none());
        backend.set_raw("k", "v".into(), Duration::from_secs(60));
        assert_eq!(backend.get_raw("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_scan_filters_by_pattern() {
        let backend = MemoryBackend::new();
        backend.set_raw("snapshot:directory:2024-01-01", "a".into(), Duration::from_secs(60));
        backend.set_raw("snapshot:assessment:2024-01-01", "b".into(), Duration::from_secs(60));
        let hits = backend.scan_raw("snapshot:directory:*");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, "a");
    }
}
