//! Inbound events and handler outcomes.

use serde::Serialize;
use tokio::sync::oneshot;
use url::Url;

use crate::config::SwitcherConfig;
use crate::detection::{ResourceType, ResponseHeader};
use crate::notification::BadgeHandle;
use crate::registry::DomainSnapshot;
use crate::types::{BackendId, FrameId, NavigationId, TabId};

/// Response headers received for a navigation.
#[derive(Debug, Clone)]
pub struct NavigationResponse {
    pub tab: TabId,
    /// Navigation the response belongs to.
    pub navigation: NavigationId,
    pub url: Url,
    pub frame: FrameId,
    pub resource: ResourceType,
    pub headers: Vec<ResponseHeader>,
}

/// Navigation committed or completed.
#[derive(Debug, Clone)]
pub struct NavigationInfo {
    pub tab: TabId,
    pub url: Url,
    pub frame: FrameId,
}

/// Navigation aborted with an error code.
#[derive(Debug, Clone)]
pub struct NavigationFailure {
    pub tab: TabId,
    pub url: Url,
    pub frame: FrameId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    /// Query the domain snapshot.
    Status,
    /// Force the tab onto the given backend.
    SwitchHost(BackendId),
    /// Re-probe the domain.
    Refresh,
}

/// A user action scoped to a tab and its current URL.
#[derive(Debug, Clone)]
pub struct UserRequest {
    pub tab: TabId,
    pub url: Url,
    pub action: UserAction,
}

/// What a header inspection decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NavigationOutcome {
    /// Sub-frame, non-HTTP or host-less navigation.
    Ignored,
    /// No loop running; the backend (if any) was recorded.
    Observed { backend: Option<BackendId> },
    /// The loop reached its target.
    Switched { backend: BackendId, retries: u32 },
    /// Miss; navigation cancelled and another attempt started.
    Retrying { attempt: u32 },
    /// Miss with no budget left; the loop gave up.
    Exhausted { target: BackendId, retries: u32 },
    /// The attempt failed and the loop was reset.
    Aborted,
    /// The response belongs to a superseded loop or to a navigation the
    /// running loop did not issue.
    Stale,
}

impl NavigationOutcome {
    /// Whether the browser should drop this navigation.
    pub fn cancels_navigation(&self) -> bool {
        matches!(self, Self::Retrying { .. })
    }
}

/// Result of a switch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SwitchOutcome {
    /// The domain is already served by the target; nothing reloaded.
    AlreadyActive { backend: BackendId },
    /// Cookies cleared and the first reload issued.
    Started { generation: u64 },
    /// A newer request took over before the reload was issued.
    Superseded,
}

/// Reply to a [`UserRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ActionReply {
    Snapshot(DomainSnapshot),
    /// A probe round is running; a `Status` event follows on the bus.
    Probing,
    Switch(SwitchOutcome),
}

/// Everything the service loop consumes.
#[derive(Debug)]
pub enum InboundEvent {
    HeadersReceived {
        response: NavigationResponse,
        reply: Option<oneshot::Sender<NavigationOutcome>>,
    },
    Committed(NavigationInfo),
    Completed(NavigationInfo),
    Failed(NavigationFailure),
    Action {
        request: UserRequest,
        reply: Option<oneshot::Sender<ActionReply>>,
    },
    BadgeConnected {
        tab: TabId,
        url: Url,
        badge: BadgeHandle,
    },
    BadgeDisconnected(TabId),
    TabClosed(TabId),
    ConfigChanged(Box<SwitcherConfig>),
}
