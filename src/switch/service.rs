//! Event loop feeding the [`Switcher`].

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::SwitcherConfig;
use crate::observability::logging::error_chain;
use crate::switch::driver::Switcher;
use crate::switch::events::{ActionReply, InboundEvent, NavigationOutcome, UserRequest};

/// Producer side of the switcher's event queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<InboundEvent>,
}

impl EventSender {
    /// Queue an event. Returns false once the service has stopped.
    pub fn send(&self, event: InboundEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Queue a user action and wait for its reply.
    ///
    /// `None` if the service stopped or the action failed.
    pub async fn request(&self, request: UserRequest) -> Option<ActionReply> {
        let (reply, rx) = oneshot::channel();
        if !self.send(InboundEvent::Action {
            request,
            reply: Some(reply),
        }) {
            return None;
        }
        rx.await.ok()
    }
}

/// Create the event queue shared by browsers and the service.
pub fn event_channel() -> (EventSender, mpsc::UnboundedReceiver<InboundEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

/// Single consumer of [`InboundEvent`]s.
pub struct SwitcherService {
    switcher: Switcher,
    events: mpsc::UnboundedReceiver<InboundEvent>,
}

impl SwitcherService {
    pub fn new(switcher: Switcher, events: mpsc::UnboundedReceiver<InboundEvent>) -> Self {
        Self { switcher, events }
    }

    /// Handle events until shutdown fires or every sender is gone.
    pub async fn run(
        self,
        mut shutdown: broadcast::Receiver<()>,
        config_updates: Option<mpsc::UnboundedReceiver<SwitcherConfig>>,
    ) {
        let Self { switcher, mut events } = self;
        let mut watching = config_updates.is_some();
        let mut config_updates = config_updates;

        tracing::info!("Switcher service starting");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => dispatch(&switcher, event).await,
                    None => {
                        tracing::info!("Event queue closed, stopping switcher service");
                        break;
                    }
                },
                update = next_config(&mut config_updates), if watching => match update {
                    Some(config) => {
                        switcher.apply_config(config);
                    }
                    None => {
                        tracing::debug!("Config watcher gone");
                        watching = false;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Switcher service received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

async fn next_config(updates: &mut Option<mpsc::UnboundedReceiver<SwitcherConfig>>) -> Option<SwitcherConfig> {
    match updates {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

async fn dispatch(switcher: &Switcher, event: InboundEvent) {
    match event {
        InboundEvent::HeadersReceived { response, reply } => {
            let tab = response.tab;
            // The browser already dropped the navigation that sent these.
            if reply.as_ref().is_some_and(|r| r.is_closed()) {
                tracing::debug!(tab = %tab, navigation = %response.navigation, "Skipping headers of abandoned navigation");
                return;
            }
            let outcome = match switcher.on_headers_received(response).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(tab = %tab, error = %error_chain(&e), "Switch attempt failed");
                    NavigationOutcome::Aborted
                }
            };
            if let Some(reply) = reply {
                let _ = reply.send(outcome);
            }
        }
        InboundEvent::Committed(nav) => {
            switcher.on_navigation_committed(&nav);
        }
        InboundEvent::Completed(nav) => switcher.on_navigation_completed(&nav).await,
        InboundEvent::Failed(failure) => {
            switcher.on_navigation_error(&failure);
        }
        InboundEvent::Action { request, reply } => {
            let tab = request.tab;
            match switcher.on_action(request).await {
                Ok(result) => {
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                Err(e) => tracing::warn!(tab = %tab, error = %error_chain(&e), "User action failed"),
            }
        }
        InboundEvent::BadgeConnected { tab, url, badge } => switcher.connect_badge(tab, &url, badge),
        InboundEvent::BadgeDisconnected(tab) => switcher.disconnect_badge(tab),
        InboundEvent::TabClosed(tab) => switcher.on_tab_closed(tab),
        InboundEvent::ConfigChanged(config) => {
            switcher.apply_config(*config);
        }
    }
}
