//! Tab session registry.
//!
//! A session is "looping" iff `requested_backend` is set. Every switch
//! request bumps the session generation; work started for an older
//! generation must check `is_current` before touching the session again.
//! A looping session also remembers the navigation its last reload started;
//! responses from any other navigation are not verified against the loop.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::AbortHandle;
use url::Url;

use crate::notification::BadgeHandle;
use crate::switch::SwitchState;
use crate::types::{domain_of, BackendId, NavigationId, TabId};

#[derive(Debug, Default)]
struct TabSession {
    requested_backend: Option<BackendId>,
    loop_url: Option<Url>,
    state: SwitchState,
    retry_count: u32,
    generation: u64,
    navigation: Option<NavigationId>,
    badge: Option<BadgeHandle>,
    probe_task: Option<AbortHandle>,
}

impl TabSession {
    fn end_loop(&mut self, state: SwitchState) {
        self.requested_backend = None;
        self.loop_url = None;
        self.retry_count = 0;
        self.navigation = None;
        self.state = state;
    }

    fn is_current(&self, generation: u64) -> bool {
        self.requested_backend.is_some() && self.generation == generation
    }
}

/// Read-only copy of a session's loop fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoopView {
    pub requested_backend: Option<BackendId>,
    /// URL the running loop was started for.
    pub loop_url: Option<Url>,
    pub state: SwitchState,
    pub retry_count: u32,
    pub generation: u64,
    /// Navigation started by the loop's latest reload.
    pub navigation: Option<NavigationId>,
}

impl LoopView {
    pub fn is_active(&self) -> bool {
        self.requested_backend.is_some()
    }

    pub fn loop_domain(&self) -> Option<String> {
        self.loop_url.as_ref().and_then(domain_of)
    }

    /// Whether `navigation` is the one the running loop is waiting for.
    pub fn awaits(&self, navigation: NavigationId) -> bool {
        self.is_active() && self.navigation == Some(navigation)
    }
}

/// Result of starting a switch loop.
#[derive(Debug)]
pub struct StartedLoop {
    pub generation: u64,
    /// Whether a previous loop was still running and got superseded.
    pub superseded: bool,
}

/// Outcome of a failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Budget left; `attempt` is the new retry count.
    Retry { attempt: u32 },
    /// Budget consumed; the loop has been reset.
    Exhausted { attempts: u32 },
}

/// Thread-safe map of tab id to session state.
#[derive(Debug, Clone, Default)]
pub struct TabRegistry {
    inner: Arc<DashMap<TabId, TabSession>>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, tab: TabId) -> LoopView {
        let session = self.inner.entry(tab).or_default();
        view_of(&session)
    }

    pub fn view(&self, tab: TabId) -> Option<LoopView> {
        self.inner.get(&tab).map(|s| view_of(&s))
    }

    pub fn contains(&self, tab: TabId) -> bool {
        self.inner.contains_key(&tab)
    }

    /// Begin a new loop towards `target`, superseding any running loop.
    ///
    /// A probe started from this tab is aborted so its completion cannot
    /// land after the loop has moved on.
    pub fn start_loop(&self, tab: TabId, url: &Url, target: BackendId) -> StartedLoop {
        let mut session = self.inner.entry(tab).or_default();
        let superseded = session.requested_backend.is_some();
        if let Some(probe) = session.probe_task.take() {
            probe.abort();
        }
        session.generation += 1;
        session.requested_backend = Some(target);
        session.loop_url = Some(url.clone());
        session.retry_count = 0;
        session.navigation = None;
        session.state = SwitchState::AwaitingCookieClear;
        StartedLoop {
            generation: session.generation,
            superseded,
        }
    }

    /// True while the loop started with `generation` is still running.
    pub fn is_current(&self, tab: TabId, generation: u64) -> bool {
        self.inner
            .get(&tab)
            .map(|s| s.is_current(generation))
            .unwrap_or(false)
    }

    /// Move the loop for `generation` to `state`.
    ///
    /// Returns false if that loop is no longer running or the transition is
    /// not part of the state machine.
    pub fn advance(&self, tab: TabId, generation: u64, state: SwitchState) -> bool {
        match self.inner.get_mut(&tab) {
            Some(mut session) if session.is_current(generation) => {
                if !session.state.can_transition(state) {
                    tracing::debug!(tab = %tab, from = ?session.state, to = ?state, "Rejected switch state transition");
                    return false;
                }
                session.state = state;
                true
            }
            _ => false,
        }
    }

    /// Remember the navigation the loop for `generation` just started.
    ///
    /// Returns false if that loop is no longer running.
    pub fn record_navigation(&self, tab: TabId, generation: u64, navigation: NavigationId) -> bool {
        match self.inner.get_mut(&tab) {
            Some(mut session) if session.is_current(generation) => {
                session.navigation = Some(navigation);
                true
            }
            _ => false,
        }
    }

    /// Count a failed verification against the budget.
    ///
    /// Returns `None` if the loop for `generation` is no longer running.
    pub fn register_retry(&self, tab: TabId, generation: u64, max_reloads: u32) -> Option<RetryDecision> {
        let mut session = self.inner.get_mut(&tab)?;
        if !session.is_current(generation) {
            return None;
        }
        if session.retry_count < max_reloads {
            session.retry_count += 1;
            session.navigation = None;
            session.state = SwitchState::AwaitingCookieClear;
            Some(RetryDecision::Retry {
                attempt: session.retry_count,
            })
        } else {
            let attempts = session.retry_count;
            session.end_loop(SwitchState::Exhausted);
            Some(RetryDecision::Exhausted { attempts })
        }
    }

    /// End the loop for `generation` successfully, returning the retries used.
    pub fn finish_loop(&self, tab: TabId, generation: u64) -> Option<u32> {
        let mut session = self.inner.get_mut(&tab)?;
        if !session.is_current(generation) {
            return None;
        }
        let retries = session.retry_count;
        session.end_loop(SwitchState::Succeeded);
        Some(retries)
    }

    /// Abandon whatever loop is running; returns the abandoned target.
    pub fn reset_loop(&self, tab: TabId) -> Option<BackendId> {
        let mut session = self.inner.get_mut(&tab)?;
        let target = session.requested_backend.take();
        if target.is_some() {
            session.end_loop(SwitchState::Idle);
        }
        target
    }

    /// Abandon the loop only if it is still the one for `generation`.
    pub fn reset_loop_if_current(&self, tab: TabId, generation: u64) -> bool {
        match self.inner.get_mut(&tab) {
            Some(mut session) if session.is_current(generation) => {
                session.end_loop(SwitchState::Idle);
                true
            }
            _ => false,
        }
    }

    pub fn set_badge(&self, tab: TabId, badge: BadgeHandle) {
        self.inner.entry(tab).or_default().badge = Some(badge);
    }

    pub fn clear_badge(&self, tab: TabId) {
        if let Some(mut session) = self.inner.get_mut(&tab) {
            session.badge = None;
        }
    }

    pub fn badge(&self, tab: TabId) -> Option<BadgeHandle> {
        self.inner.get(&tab).and_then(|s| s.badge.clone())
    }

    /// Track a probe task started for this tab, aborting any previous one.
    pub fn set_probe_task(&self, tab: TabId, task: AbortHandle) {
        let mut session = self.inner.entry(tab).or_default();
        if let Some(previous) = session.probe_task.replace(task) {
            previous.abort();
        }
    }

    /// Drop the session when its tab closes.
    pub fn remove(&self, tab: TabId) -> bool {
        match self.inner.remove(&tab) {
            Some((_, session)) => {
                if let Some(probe) = session.probe_task {
                    probe.abort();
                }
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

fn view_of(session: &TabSession) -> LoopView {
    LoopView {
        requested_backend: session.requested_backend.clone(),
        loop_url: session.loop_url.clone(),
        state: session.state,
        retry_count: session.retry_count,
        generation: session.generation,
        navigation: session.navigation,
    }
}
