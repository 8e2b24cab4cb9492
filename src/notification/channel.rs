//! Page badge channel.
//!
//! The page side owns a [`BadgeChannel`]; the switcher keeps a
//! [`BadgeHandle`] that stops working as soon as the channel is dropped.

use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use crate::types::BackendId;

/// Owning end of a badge connection.
#[derive(Debug)]
pub struct BadgeChannel {
    tx: Arc<mpsc::UnboundedSender<Option<BackendId>>>,
}

impl BadgeChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Option<BackendId>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn handle(&self) -> BadgeHandle {
        BadgeHandle {
            tx: Arc::downgrade(&self.tx),
        }
    }
}

/// Weak end held by a tab session.
#[derive(Debug, Clone)]
pub struct BadgeHandle {
    tx: Weak<mpsc::UnboundedSender<Option<BackendId>>>,
}

impl BadgeHandle {
    /// Push the active backend to the page. No-op once disconnected.
    pub fn push(&self, backend: Option<BackendId>) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(backend);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.tx.upgrade().map(|tx| !tx.is_closed()).unwrap_or(false)
    }
}
