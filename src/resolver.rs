//! Latest-entry resolution: the read-path contract shared by the chart engine
//! and report aggregation. All five services, best effort, partial results
//! allowed; a service without data is simply not present.

use std::collections::HashMap;

use crate::models::{LatestEntry, ServiceKind, Snapshot};
use crate::store::SnapshotStore;

/// The latest snapshot per service for whichever services resolved.
#[derive(Debug, Default)]
pub struct LatestSnapshots {
    entries: HashMap<ServiceKind, Snapshot>,
}

impl LatestSnapshots {
    pub fn from_entries(entries: Vec<LatestEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.service, e.data)).collect(),
        }
    }

    pub fn get(&self, service: ServiceKind) -> Option<&Snapshot> {
        self.entries.get(&service)
    }

    pub fn services(&self) -> Vec<ServiceKind> {
        // Stable order regardless of map iteration.
        ServiceKind::ALL
            .into_iter()
            .filter(|s| self.entries.contains_key(s))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ServiceKind, &Snapshot)> {
        self.services()
            .into_iter()
            .map(|s| (s, &self.entries[&s]))
    }

}

pub async fn resolve_latest(store: &SnapshotStore) -> LatestSnapshots {
    LatestSnapshots::from_entries(store.get_latest_entries().await)
}
