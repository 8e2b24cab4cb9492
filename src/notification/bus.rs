//! Broadcast bus for switcher events.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::registry::DomainSnapshot;
use crate::types::{BackendId, TabId};

const BUS_CAPACITY: usize = 64;

/// State changes observers may care about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SwitcherEvent {
    /// Current view of a domain (toolbar refresh).
    Status(DomainSnapshot),
    /// A switch loop reached its target.
    Switched {
        tab: TabId,
        domain: String,
        backend: BackendId,
        retries: u32,
    },
    /// A switch loop used up its retry budget without reaching the target.
    Exhausted {
        tab: TabId,
        domain: String,
        target: BackendId,
        retries: u32,
    },
    /// A switch loop stopped because of an error.
    Aborted {
        tab: TabId,
        target: Option<BackendId>,
        reason: String,
    },
}

/// Fan-out of [`SwitcherEvent`]s.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<SwitcherEvent>,
}

impl NotificationBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwitcherEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: SwitcherEvent) {
        let _ = self.tx.send(event);
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
