//! Domain registry.
//!
//! Maps a host name to the backends seen for it. `active_backend` is last
//! writer wins; `known_backends` is only ever replaced as a whole.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::observability::metrics;
use crate::types::BackendId;

#[derive(Debug, Clone, Default)]
struct DomainRecord {
    known_backends: BTreeSet<BackendId>,
    active_backend: Option<BackendId>,
    probe_epoch: u64,
}

/// Point-in-time view of a domain, as sent to UI observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSnapshot {
    pub domain: String,
    /// Sorted lexicographically.
    pub known_backends: Vec<BackendId>,
    pub active_backend: Option<BackendId>,
}

/// Thread-safe map of domain name to backend state.
#[derive(Debug, Clone, Default)]
pub struct DomainRegistry {
    inner: Arc<DashMap<String, DomainRecord>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the record if missing and return its current state.
    pub fn get_or_create(&self, domain: &str) -> DomainSnapshot {
        let record = self.inner.entry(domain.to_string()).or_default();
        snapshot_of(domain, &record)
    }

    /// Snapshot without creating a record.
    pub fn snapshot(&self, domain: &str) -> Option<DomainSnapshot> {
        self.inner.get(domain).map(|r| snapshot_of(domain, &r))
    }

    pub fn active_backend(&self, domain: &str) -> Option<BackendId> {
        self.inner.get(domain).and_then(|r| r.active_backend.clone())
    }

    /// Overwrite the active backend. `None` records a detection miss.
    pub fn record_active_backend(&self, domain: &str, backend: Option<BackendId>) {
        let mut record = self.inner.entry(domain.to_string()).or_default();
        if record.active_backend != backend {
            tracing::debug!(
                domain = %domain,
                previous = ?record.active_backend,
                current = ?backend,
                "Active backend changed"
            );
        }
        record.active_backend = backend;
    }

    /// Start a probe round: clears the known set and returns the new epoch.
    pub fn begin_probe(&self, domain: &str) -> u64 {
        let mut record = self.inner.entry(domain.to_string()).or_default();
        record.known_backends.clear();
        record.probe_epoch += 1;
        record.probe_epoch
    }

    /// Replace the known set with a probe result.
    ///
    /// Returns false, leaving the record untouched, when a newer round has
    /// started since `epoch` was issued.
    pub fn replace_known_backends(
        &self,
        domain: &str,
        epoch: u64,
        backends: impl IntoIterator<Item = BackendId>,
    ) -> bool {
        let mut record = self.inner.entry(domain.to_string()).or_default();
        if record.probe_epoch != epoch {
            tracing::debug!(
                domain = %domain,
                epoch,
                current = record.probe_epoch,
                "Discarding stale probe result"
            );
            return false;
        }
        record.known_backends = backends.into_iter().collect();
        metrics::record_known_backends(domain, record.known_backends.len());
        true
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

fn snapshot_of(domain: &str, record: &DomainRecord) -> DomainSnapshot {
    DomainSnapshot {
        domain: domain.to_string(),
        known_backends: record.known_backends.iter().cloned().collect(),
        active_backend: record.active_backend.clone(),
    }
}
