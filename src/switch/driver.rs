//! Switch loop driver.
//!
//! # Responsibilities
//! - Record the backend serving every top-level navigation
//! - Run the clear-cookies → reload → verify loop towards a requested backend
//! - Start probe rounds and publish their results
//! - Keep page indicators and badges in step with the active backend
//!
//! # Design Decisions
//! - Every await is followed by a generation check; work belonging to a
//!   superseded loop is dropped without touching the session
//! - While a loop runs, only the navigation started by its latest reload is
//!   verified; headers from any other navigation are answered `Stale`
//! - Cookie or reload failures end the loop instead of reloading against
//!   cookies that may still pin the old backend
//! - Giving up is reported (outcome, bus event, log) even though nothing
//!   in the page changes

use arc_swap::ArcSwap;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::browser::{Browser, BrowserError};
use crate::config::validation::validate_config;
use crate::config::SwitcherConfig;
use crate::detection::{extract_backend, is_inspectable, HeaderNames};
use crate::notification::{BadgeHandle, NotificationBus, SwitcherEvent};
use crate::observability::logging::error_chain;
use crate::observability::metrics;
use crate::probe::{HostProber, ProbeError};
use crate::registry::{DomainRegistry, DomainSnapshot, RetryDecision, TabRegistry};
use crate::switch::events::{
    ActionReply, NavigationFailure, NavigationInfo, NavigationOutcome, NavigationResponse, SwitchOutcome,
    UserAction, UserRequest,
};
use crate::switch::state::SwitchState;
use crate::types::{domain_of, is_http, BackendId, TabId};

/// Error code a browser reports for navigations the switcher cancelled.
pub const OWN_CANCELLATION: &str = "NS_BINDING_CANCELLED_OLD_LOAD";

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("cookie operation failed")]
    Cookies(#[source] BrowserError),

    #[error("reload failed")]
    Reload(#[source] BrowserError),

    #[error("not an http(s) URL with a host: {0}")]
    InvalidUrl(Url),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Configuration plus everything derived from it.
struct ActiveConfig {
    config: SwitcherConfig,
    header_names: HeaderNames,
    prober: HostProber,
}

impl ActiveConfig {
    fn build(config: SwitcherConfig) -> Result<Self, ProbeError> {
        let header_names = HeaderNames::parse(&config.header_names);
        let prober = HostProber::new(&config.probe, header_names.clone())?;
        Ok(Self {
            config,
            header_names,
            prober,
        })
    }
}

/// Coordinates registries, prober, browser and bus.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Switcher {
    active: Arc<ArcSwap<ActiveConfig>>,
    domains: DomainRegistry,
    tabs: TabRegistry,
    browser: Arc<dyn Browser>,
    bus: NotificationBus,
}

impl Switcher {
    pub fn new(config: SwitcherConfig, browser: Arc<dyn Browser>) -> Result<Self, SwitchError> {
        let active = ActiveConfig::build(config)?;
        Ok(Self {
            active: Arc::new(ArcSwap::from_pointee(active)),
            domains: DomainRegistry::new(),
            tabs: TabRegistry::new(),
            browser,
            bus: NotificationBus::new(),
        })
    }

    pub fn domains(&self) -> &DomainRegistry {
        &self.domains
    }

    pub fn tabs(&self) -> &TabRegistry {
        &self.tabs
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SwitcherEvent> {
        self.bus.subscribe()
    }

    pub fn config(&self) -> SwitcherConfig {
        self.active.load().config.clone()
    }

    /// Swap in a new configuration. Running loops pick it up on their next
    /// step. An invalid config, or one whose probe client cannot be built,
    /// leaves the current one in place and returns false.
    pub fn apply_config(&self, config: SwitcherConfig) -> bool {
        if let Err(errors) = validate_config(&config) {
            for error in &errors {
                tracing::error!(error = %error, "Invalid configuration");
            }
            tracing::error!(count = errors.len(), "Rejected configuration, keeping current one");
            return false;
        }
        match ActiveConfig::build(config) {
            Ok(active) => {
                tracing::info!(
                    header_names = %active.config.header_names,
                    seek_requests = active.config.seek_requests,
                    max_reloads = active.config.max_reloads,
                    "Configuration applied"
                );
                self.active.store(Arc::new(active));
                true
            }
            Err(e) => {
                tracing::error!(error = %error_chain(&e), "Rejected configuration, keeping current one");
                false
            }
        }
    }

    fn current(&self) -> Arc<ActiveConfig> {
        self.active.load_full()
    }

    /// Inspect a navigation response and advance the tab's loop.
    pub async fn on_headers_received(&self, response: NavigationResponse) -> Result<NavigationOutcome, SwitchError> {
        let NavigationResponse {
            tab,
            navigation,
            url,
            frame,
            resource,
            headers,
        } = response;

        if !is_inspectable(resource, frame, &url) {
            return Ok(NavigationOutcome::Ignored);
        }
        let Some(domain) = domain_of(&url) else {
            return Ok(NavigationOutcome::Ignored);
        };

        let view = self.tabs.get_or_create(tab);
        if view.is_active() && !view.awaits(navigation) {
            tracing::debug!(
                tab = %tab,
                navigation = %navigation,
                expected = ?view.navigation,
                "Dropping response of a navigation the loop did not start"
            );
            return Ok(NavigationOutcome::Stale);
        }

        let active = self.current();
        let backend = extract_backend(&headers, &active.header_names);
        metrics::record_navigation(backend.is_some());
        self.domains.record_active_backend(&domain, backend.clone());

        let Some(requested) = view.requested_backend.clone() else {
            tracing::trace!(tab = %tab, domain = %domain, backend = ?backend, "Observed backend");
            return Ok(NavigationOutcome::Observed { backend });
        };
        let generation = view.generation;
        if !self.tabs.advance(tab, generation, SwitchState::VerifyingHeader) {
            tracing::debug!(tab = %tab, state = ?view.state, "Response arrived outside of a reload");
            return Ok(NavigationOutcome::Stale);
        }

        let loop_url = view.loop_url.clone().unwrap_or_else(|| url.clone());
        let same_domain = view.loop_domain().as_deref() == Some(domain.as_str());

        match backend {
            Some(observed) if same_domain && observed == requested => {
                Ok(self.complete(tab, &domain, generation, observed).await)
            }
            observed => {
                if !same_domain {
                    tracing::debug!(tab = %tab, domain = %domain, "Navigation left the switching domain");
                } else if observed.is_none() {
                    tracing::debug!(tab = %tab, domain = %domain, "No backend header in response");
                }
                self.retry_or_give_up(tab, &loop_url, generation, requested, active.config.max_reloads)
                    .await
            }
        }
    }

    async fn complete(&self, tab: TabId, domain: &str, generation: u64, backend: BackendId) -> NavigationOutcome {
        let Some(retries) = self.tabs.finish_loop(tab, generation) else {
            return NavigationOutcome::Stale;
        };

        tracing::info!(
            tab = %tab,
            domain = %domain,
            backend = %backend,
            reloads = retries + 1,
            "Switched to requested backend"
        );
        metrics::record_switch_outcome("switched");

        self.bus.publish(SwitcherEvent::Status(self.domains.get_or_create(domain)));
        self.bus.publish(SwitcherEvent::Switched {
            tab,
            domain: domain.to_string(),
            backend: backend.clone(),
            retries,
        });
        if let Some(badge) = self.tabs.badge(tab) {
            badge.push(Some(backend.clone()));
        }
        self.reload_siblings(domain, tab).await;

        NavigationOutcome::Switched { backend, retries }
    }

    async fn retry_or_give_up(
        &self,
        tab: TabId,
        loop_url: &Url,
        generation: u64,
        target: BackendId,
        max_reloads: u32,
    ) -> Result<NavigationOutcome, SwitchError> {
        match self.tabs.register_retry(tab, generation, max_reloads) {
            None => Ok(NavigationOutcome::Stale),
            Some(RetryDecision::Retry { attempt }) => {
                metrics::record_retry();
                tracing::debug!(tab = %tab, target = %target, attempt, "Backend mismatch, retrying");
                self.browser.cancel_navigation(tab);
                if self.run_attempt(tab, loop_url, generation).await? {
                    Ok(NavigationOutcome::Retrying { attempt })
                } else {
                    Ok(NavigationOutcome::Stale)
                }
            }
            Some(RetryDecision::Exhausted { attempts }) => {
                let domain = domain_of(loop_url).unwrap_or_default();
                tracing::warn!(
                    tab = %tab,
                    domain = %domain,
                    target = %target,
                    retries = attempts,
                    "Retry budget exhausted, giving up"
                );
                metrics::record_switch_outcome("exhausted");
                self.bus.publish(SwitcherEvent::Exhausted {
                    tab,
                    domain: domain.clone(),
                    target: target.clone(),
                    retries: attempts,
                });
                self.reload_siblings(&domain, tab).await;
                Ok(NavigationOutcome::Exhausted {
                    target,
                    retries: attempts,
                })
            }
        }
    }

    /// Clear cookies for `url` and issue a cache-bypassing reload.
    ///
    /// Returns false if the loop was superseded along the way.
    async fn run_attempt(&self, tab: TabId, url: &Url, generation: u64) -> Result<bool, SwitchError> {
        let cookies = match self.browser.cookies(url).await {
            Ok(cookies) => cookies,
            Err(e) => return self.abort_attempt(tab, generation, SwitchError::Cookies(e)),
        };
        if !self.tabs.is_current(tab, generation) {
            tracing::debug!(tab = %tab, generation, "Dropping superseded attempt");
            return Ok(false);
        }

        for cookie in &cookies {
            tracing::debug!(tab = %tab, name = %cookie.name, domain = %cookie.domain, "Removing cookie");
            if let Err(e) = self.browser.remove_cookie(url, &cookie.name).await {
                return self.abort_attempt(tab, generation, SwitchError::Cookies(e));
            }
        }

        if !self.tabs.advance(tab, generation, SwitchState::Reloading) {
            tracing::debug!(tab = %tab, generation, "Dropping superseded attempt");
            return Ok(false);
        }
        let navigation = match self.browser.reload_tab(tab, true).await {
            Ok(navigation) => navigation,
            Err(e) => return self.abort_attempt(tab, generation, SwitchError::Reload(e)),
        };
        if !self.tabs.record_navigation(tab, generation, navigation) {
            tracing::debug!(tab = %tab, generation, "Reload issued for superseded attempt");
            return Ok(false);
        }
        Ok(true)
    }

    /// End the loop after a failed step. Failures of a superseded loop are
    /// dropped.
    fn abort_attempt(&self, tab: TabId, generation: u64, error: SwitchError) -> Result<bool, SwitchError> {
        let target = self.tabs.view(tab).and_then(|v| v.requested_backend);
        let reason = error_chain(&error);
        if !self.tabs.reset_loop_if_current(tab, generation) {
            tracing::debug!(tab = %tab, error = %reason, "Ignoring failure of superseded attempt");
            return Ok(false);
        }

        tracing::error!(tab = %tab, target = ?target, error = %reason, "Switch attempt failed, loop stopped");
        metrics::record_switch_outcome("aborted");
        self.bus.publish(SwitcherEvent::Aborted { tab, target, reason });
        Err(error)
    }

    /// Reload other tabs on `domain` (normal cache), when enabled.
    async fn reload_siblings(&self, domain: &str, except: TabId) {
        if !self.current().config.reload_other_tabs {
            return;
        }
        let tabs = match self.browser.tabs_on_domain(domain).await {
            Ok(tabs) => tabs,
            Err(e) => {
                tracing::warn!(domain = %domain, error = %error_chain(&e), "Failed to list sibling tabs");
                return;
            }
        };
        for sibling in tabs.into_iter().filter(|t| *t != except) {
            if let Err(e) = self.browser.reload_tab(sibling, false).await {
                tracing::warn!(tab = %sibling, error = %error_chain(&e), "Failed to reload sibling tab");
            }
        }
    }

    /// Start a loop that forces `tab` onto `target`.
    pub async fn switch_host(&self, tab: TabId, url: &Url, target: BackendId) -> Result<SwitchOutcome, SwitchError> {
        let domain = http_domain(url)?;
        let started = self.tabs.start_loop(tab, url, target.clone());
        let already_active = self.domains.active_backend(&domain).as_ref() == Some(&target);
        if started.superseded {
            tracing::debug!(tab = %tab, "Superseding running switch loop");
        }
        if started.superseded || !already_active {
            self.browser.cancel_navigation(tab);
        }

        if already_active {
            if self.tabs.finish_loop(tab, started.generation).is_some() {
                tracing::info!(tab = %tab, domain = %domain, backend = %target, "Already on requested backend");
                metrics::record_switch_outcome("switched");
                self.bus.publish(SwitcherEvent::Switched {
                    tab,
                    domain,
                    backend: target.clone(),
                    retries: 0,
                });
                if let Some(badge) = self.tabs.badge(tab) {
                    badge.push(Some(target.clone()));
                }
            }
            return Ok(SwitchOutcome::AlreadyActive { backend: target });
        }

        tracing::info!(tab = %tab, domain = %domain, target = %target, "Switching backend");
        if self.run_attempt(tab, url, started.generation).await? {
            Ok(SwitchOutcome::Started {
                generation: started.generation,
            })
        } else {
            Ok(SwitchOutcome::Superseded)
        }
    }

    /// Current snapshot, or start a probe if only the active backend is known.
    pub fn status(&self, tab: TabId, url: &Url) -> Result<ActionReply, SwitchError> {
        let domain = http_domain(url)?;
        self.tabs.get_or_create(tab);
        let snapshot = self.domains.get_or_create(&domain);
        if snapshot.active_backend.is_some() && snapshot.known_backends.is_empty() {
            self.spawn_probe(tab, url, &domain);
            return Ok(ActionReply::Probing);
        }
        Ok(ActionReply::Snapshot(snapshot))
    }

    /// Force a new probe round for the URL's domain.
    pub fn refresh(&self, tab: TabId, url: &Url) -> Result<ActionReply, SwitchError> {
        let domain = http_domain(url)?;
        self.tabs.get_or_create(tab);
        self.spawn_probe(tab, url, &domain);
        Ok(ActionReply::Probing)
    }

    /// Run a probe round in the background. The result lands in the
    /// registry only if no newer round started for the domain.
    pub fn spawn_probe(&self, tab: TabId, url: &Url, domain: &str) -> tokio::task::JoinHandle<()> {
        let epoch = self.domains.begin_probe(domain);
        let hint = self.domains.active_backend(domain);
        let active = self.current();
        let concurrency = active.config.seek_requests;

        let domains = self.domains.clone();
        let bus = self.bus.clone();
        let url = url.clone();
        let domain = domain.to_string();

        let task = tokio::spawn(async move {
            let backends = active.prober.probe(&url, hint, concurrency).await;
            if domains.replace_known_backends(&domain, epoch, backends) {
                if let Some(snapshot) = domains.snapshot(&domain) {
                    bus.publish(SwitcherEvent::Status(snapshot));
                }
            }
        });
        self.tabs.set_probe_task(tab, task.abort_handle());
        task
    }

    pub async fn on_action(&self, request: UserRequest) -> Result<ActionReply, SwitchError> {
        let UserRequest { tab, url, action } = request;
        match action {
            UserAction::Status => self.status(tab, &url),
            UserAction::Refresh => self.refresh(tab, &url),
            UserAction::SwitchHost(target) => self.switch_host(tab, &url, target).await.map(ActionReply::Switch),
        }
    }

    /// Top-level commit: update the indicator and publish the domain.
    pub fn on_navigation_committed(&self, nav: &NavigationInfo) -> Option<DomainSnapshot> {
        if !nav.frame.is_top() || !is_http(&nav.url) {
            return None;
        }
        let domain = domain_of(&nav.url)?;
        let snapshot = self.domains.get_or_create(&domain);
        self.browser.set_indicator(nav.tab, snapshot.active_backend.is_some());
        self.bus.publish(SwitcherEvent::Status(snapshot.clone()));
        Some(snapshot)
    }

    /// Page loaded: show the badge iff the domain's backend is known.
    pub async fn on_navigation_completed(&self, nav: &NavigationInfo) {
        if !nav.frame.is_top() || nav.url.scheme() == "about" {
            return;
        }
        if !self.current().config.show_content_hint {
            return;
        }
        let Some(domain) = domain_of(&nav.url) else {
            return;
        };
        let visible = self.domains.active_backend(&domain).is_some();
        if let Err(e) = self.browser.show_badge(nav.tab, visible).await {
            tracing::debug!(tab = %nav.tab, error = %error_chain(&e), "Failed to update page badge");
        }
    }

    /// A navigation failed. Returns true if a running loop was stopped.
    pub fn on_navigation_error(&self, failure: &NavigationFailure) -> bool {
        if !failure.frame.is_top() || failure.error == OWN_CANCELLATION {
            return false;
        }
        let Some(target) = self.tabs.reset_loop(failure.tab) else {
            return false;
        };

        tracing::warn!(
            tab = %failure.tab,
            url = %failure.url,
            target = %target,
            error = %failure.error,
            "Switch loop aborted by navigation error"
        );
        metrics::record_switch_outcome("aborted");
        self.bus.publish(SwitcherEvent::Aborted {
            tab: failure.tab,
            target: Some(target),
            reason: failure.error.clone(),
        });
        true
    }

    /// Register a page badge and push it the current backend.
    pub fn connect_badge(&self, tab: TabId, url: &Url, badge: BadgeHandle) {
        let backend = domain_of(url).and_then(|d| self.domains.active_backend(&d));
        badge.push(backend);
        self.tabs.set_badge(tab, badge);
    }

    pub fn disconnect_badge(&self, tab: TabId) {
        self.tabs.clear_badge(tab);
    }

    pub fn on_tab_closed(&self, tab: TabId) {
        if self.tabs.remove(tab) {
            tracing::debug!(tab = %tab, "Tab session removed");
        }
    }
}

fn http_domain(url: &Url) -> Result<String, SwitchError> {
    if !is_http(url) {
        return Err(SwitchError::InvalidUrl(url.clone()));
    }
    domain_of(url).ok_or_else(|| SwitchError::InvalidUrl(url.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserCall, RecordingBrowser};
    use crate::detection::{ResourceType, ResponseHeader};
    use crate::notification::BadgeChannel;
    use crate::types::{FrameId, NavigationId};
    use std::time::Duration;
    use tokio::sync::broadcast;

    const TAB: TabId = TabId(1);

    fn page() -> Url {
        Url::parse("https://example.com/app").unwrap()
    }

    fn response(url: &Url, backend: Option<&str>) -> NavigationResponse {
        response_of(NavigationId::default(), url, backend)
    }

    /// Headers of the navigation started by the latest reload.
    fn reloaded(browser: &RecordingBrowser, url: &Url, backend: Option<&str>) -> NavigationResponse {
        response_of(browser.last_navigation(), url, backend)
    }

    fn response_of(navigation: NavigationId, url: &Url, backend: Option<&str>) -> NavigationResponse {
        NavigationResponse {
            tab: TAB,
            navigation,
            url: url.clone(),
            frame: FrameId::TOP,
            resource: ResourceType::MainFrame,
            headers: backend
                .map(|b| vec![ResponseHeader::new("X-Server", b)])
                .unwrap_or_default(),
        }
    }

    fn setup(config: SwitcherConfig) -> (Switcher, Arc<RecordingBrowser>) {
        let browser = Arc::new(RecordingBrowser::new().with_cookies(&["lb", "session"]));
        let switcher = Switcher::new(config, browser.clone()).unwrap();
        (switcher, browser)
    }

    fn drain(rx: &mut broadcast::Receiver<SwitcherEvent>) -> Vec<SwitcherEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_switch_reaches_target_after_retries() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        let mut events = switcher.subscribe();

        let outcome = switcher.on_headers_received(response(&page(), Some("srv-1"))).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Observed { backend: Some("srv-1".into()) });

        let started = switcher.switch_host(TAB, &page(), "srv-2".into()).await.unwrap();
        assert!(matches!(started, SwitchOutcome::Started { .. }));
        assert_eq!(browser.count(|c| matches!(c, BrowserCall::RemoveCookie { .. })), 2);
        assert_eq!(switcher.tabs().view(TAB).unwrap().state, SwitchState::Reloading);

        let first = switcher.on_headers_received(reloaded(&browser, &page(), Some("srv-1"))).await.unwrap();
        assert_eq!(first, NavigationOutcome::Retrying { attempt: 1 });
        assert!(first.cancels_navigation());
        let second = switcher.on_headers_received(reloaded(&browser, &page(), Some("srv-3"))).await.unwrap();
        assert_eq!(second, NavigationOutcome::Retrying { attempt: 2 });

        let done = switcher.on_headers_received(reloaded(&browser, &page(), Some("srv-2"))).await.unwrap();
        assert_eq!(
            done,
            NavigationOutcome::Switched {
                backend: "srv-2".into(),
                retries: 2
            }
        );

        assert_eq!(browser.reloads(), vec![(TAB, true); 3]);
        assert_eq!(browser.count(|c| matches!(c, BrowserCall::Cancel(_))), 3);
        assert_eq!(switcher.domains().active_backend("example.com"), Some("srv-2".into()));

        let view = switcher.tabs().view(TAB).unwrap();
        assert!(!view.is_active());
        assert_eq!(view.retry_count, 0);
        assert_eq!(view.state, SwitchState::Succeeded);

        let switched = drain(&mut events)
            .into_iter()
            .find(|e| matches!(e, SwitcherEvent::Switched { .. }));
        assert_eq!(
            switched,
            Some(SwitcherEvent::Switched {
                tab: TAB,
                domain: "example.com".into(),
                backend: "srv-2".into(),
                retries: 2
            })
        );
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let config = SwitcherConfig {
            max_reloads: 3,
            ..Default::default()
        };
        let (switcher, browser) = setup(config);
        let mut events = switcher.subscribe();

        switcher.switch_host(TAB, &page(), "srv-9".into()).await.unwrap();
        for attempt in 1..=3 {
            let outcome = switcher.on_headers_received(reloaded(&browser, &page(), Some("srv-1"))).await.unwrap();
            assert_eq!(outcome, NavigationOutcome::Retrying { attempt });
        }
        let outcome = switcher.on_headers_received(reloaded(&browser, &page(), Some("srv-1"))).await.unwrap();
        assert_eq!(
            outcome,
            NavigationOutcome::Exhausted {
                target: "srv-9".into(),
                retries: 3
            }
        );
        assert!(!outcome.cancels_navigation());
        assert_eq!(browser.reloads().len(), 4);

        let view = switcher.tabs().view(TAB).unwrap();
        assert!(!view.is_active());
        assert_eq!(view.state, SwitchState::Exhausted);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, SwitcherEvent::Exhausted { retries: 3, .. })));

        // Later navigations are only observed.
        let after = switcher.on_headers_received(response(&page(), Some("srv-1"))).await.unwrap();
        assert_eq!(after, NavigationOutcome::Observed { backend: Some("srv-1".into()) });
    }

    #[tokio::test]
    async fn test_missing_header_counts_as_miss() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        switcher.switch_host(TAB, &page(), "srv-2".into()).await.unwrap();

        let outcome = switcher.on_headers_received(reloaded(&browser, &page(), None)).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Retrying { attempt: 1 });
        assert_eq!(switcher.domains().active_backend("example.com"), None);
    }

    #[tokio::test]
    async fn test_switch_to_active_backend_is_noop() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        switcher.on_headers_received(response(&page(), Some("srv-1"))).await.unwrap();
        browser.clear_calls();

        let outcome = switcher.switch_host(TAB, &page(), "srv-1".into()).await.unwrap();
        assert_eq!(
            outcome,
            SwitchOutcome::AlreadyActive {
                backend: "srv-1".into()
            }
        );
        assert!(browser.calls().is_empty());
        assert!(!switcher.tabs().view(TAB).unwrap().is_active());
    }

    #[tokio::test]
    async fn test_newer_request_supersedes_pending_attempt() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        let gate = browser.gate_cookies();

        let first = tokio::spawn({
            let switcher = switcher.clone();
            async move { switcher.switch_host(TAB, &page(), "srv-2".into()).await }
        });
        while browser.count(|c| matches!(c, BrowserCall::Cookies(_))) < 1 {
            tokio::task::yield_now().await;
        }

        let second = tokio::spawn({
            let switcher = switcher.clone();
            async move { switcher.switch_host(TAB, &page(), "srv-3".into()).await }
        });
        while browser.count(|c| matches!(c, BrowserCall::Cookies(_))) < 2 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(2);

        assert_eq!(first.await.unwrap().unwrap(), SwitchOutcome::Superseded);
        assert!(matches!(second.await.unwrap().unwrap(), SwitchOutcome::Started { .. }));

        assert_eq!(browser.reloads().len(), 1);
        assert_eq!(browser.count(|c| *c == BrowserCall::Cancel(TAB)), 2);
        let view = switcher.tabs().view(TAB).unwrap();
        assert_eq!(view.requested_backend, Some("srv-3".into()));
        assert_eq!(view.retry_count, 0);
    }

    #[tokio::test]
    async fn test_headers_of_superseded_navigation_are_stale() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        switcher.switch_host(TAB, &page(), "srv-2".into()).await.unwrap();
        let superseded = browser.last_navigation();
        switcher.switch_host(TAB, &page(), "srv-3".into()).await.unwrap();
        let before = switcher.tabs().view(TAB).unwrap();
        browser.clear_calls();

        // A miss and a would-be hit, both from the navigation the newer loop cancelled.
        for backend in ["srv-1", "srv-3"] {
            let outcome = switcher
                .on_headers_received(response_of(superseded, &page(), Some(backend)))
                .await
                .unwrap();
            assert_eq!(outcome, NavigationOutcome::Stale);
        }
        assert!(browser.calls().is_empty());
        assert_eq!(switcher.tabs().view(TAB).unwrap(), before);
        assert_eq!(switcher.domains().active_backend("example.com"), None);

        let outcome = switcher.on_headers_received(reloaded(&browser, &page(), Some("srv-1"))).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Retrying { attempt: 1 });
    }

    #[tokio::test]
    async fn test_headers_before_first_reload_are_stale() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        let gate = browser.gate_cookies();

        let pending = tokio::spawn({
            let switcher = switcher.clone();
            async move { switcher.switch_host(TAB, &page(), "srv-2".into()).await }
        });
        while browser.count(|c| matches!(c, BrowserCall::Cookies(_))) < 1 {
            tokio::task::yield_now().await;
        }

        let outcome = switcher.on_headers_received(response(&page(), Some("srv-2"))).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Stale);
        let view = switcher.tabs().view(TAB).unwrap();
        assert_eq!(view.state, SwitchState::AwaitingCookieClear);
        assert_eq!(view.retry_count, 0);

        gate.add_permits(1);
        assert!(matches!(pending.await.unwrap().unwrap(), SwitchOutcome::Started { .. }));
        assert_eq!(switcher.tabs().view(TAB).unwrap().navigation, Some(browser.last_navigation()));
    }

    #[tokio::test]
    async fn test_cookie_failure_aborts_loop() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        let mut events = switcher.subscribe();
        browser.fail_cookies(true);

        let err = switcher.switch_host(TAB, &page(), "srv-2".into()).await.unwrap_err();
        assert!(matches!(err, SwitchError::Cookies(_)));
        assert!(browser.reloads().is_empty());

        let view = switcher.tabs().view(TAB).unwrap();
        assert!(!view.is_active());
        assert_eq!(view.state, SwitchState::Idle);
        assert!(drain(&mut events).iter().any(|e| matches!(
            e,
            SwitcherEvent::Aborted { target: Some(t), .. } if t.as_str() == "srv-2"
        )));
    }

    #[tokio::test]
    async fn test_failure_reason_names_cause_once() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        let mut events = switcher.subscribe();
        browser.fail_cookies(true);

        let err = switcher.switch_host(TAB, &page(), "srv-2".into()).await.unwrap_err();
        assert_eq!(err.to_string(), "cookie operation failed");
        let cause = std::error::Error::source(&err).map(|e| e.to_string());
        assert_eq!(cause.as_deref(), Some("browser operation failed: cookie store unavailable"));

        let reason = drain(&mut events).into_iter().find_map(|e| match e {
            SwitcherEvent::Aborted { reason, .. } => Some(reason),
            _ => None,
        });
        let reason = reason.unwrap();
        assert_eq!(reason, "cookie operation failed: browser operation failed: cookie store unavailable");
        assert_eq!(reason.matches("cookie store unavailable").count(), 1);
    }

    #[tokio::test]
    async fn test_reload_failure_during_retry_aborts_loop() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        switcher.switch_host(TAB, &page(), "srv-2".into()).await.unwrap();
        browser.fail_reload(true);

        let err = switcher
            .on_headers_received(reloaded(&browser, &page(), Some("srv-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::Reload(_)));
        assert!(!switcher.tabs().view(TAB).unwrap().is_active());
    }

    #[tokio::test]
    async fn test_navigation_error_resets_loop() {
        let (switcher, _browser) = setup(SwitcherConfig::default());
        switcher.switch_host(TAB, &page(), "srv-2".into()).await.unwrap();

        let own = NavigationFailure {
            tab: TAB,
            url: page(),
            frame: FrameId::TOP,
            error: OWN_CANCELLATION.to_string(),
        };
        assert!(!switcher.on_navigation_error(&own));

        let sub_frame = NavigationFailure {
            frame: FrameId(4),
            error: "NS_ERROR_NET_RESET".into(),
            ..own.clone()
        };
        assert!(!switcher.on_navigation_error(&sub_frame));
        assert!(switcher.tabs().view(TAB).unwrap().is_active());

        let failure = NavigationFailure {
            error: "NS_ERROR_NET_RESET".into(),
            ..own
        };
        assert!(switcher.on_navigation_error(&failure));
        let view = switcher.tabs().view(TAB).unwrap();
        assert!(!view.is_active());
        assert_eq!(view.retry_count, 0);
        assert!(!switcher.on_navigation_error(&failure));
    }

    #[tokio::test]
    async fn test_cross_domain_navigation_retries_loop_url() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        switcher.switch_host(TAB, &page(), "srv-2".into()).await.unwrap();
        browser.clear_calls();

        let elsewhere = Url::parse("https://other.test/").unwrap();
        let outcome = switcher.on_headers_received(reloaded(&browser, &elsewhere, Some("srv-2"))).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Retrying { attempt: 1 });
        assert_eq!(browser.calls().first(), Some(&BrowserCall::Cancel(TAB)));
        assert!(browser.calls().contains(&BrowserCall::Cookies(page())));
        assert_eq!(switcher.domains().active_backend("other.test"), Some("srv-2".into()));
    }

    #[tokio::test]
    async fn test_sub_frame_ignored() {
        let (switcher, _browser) = setup(SwitcherConfig::default());
        let mut frame = response(&page(), Some("srv-1"));
        frame.frame = FrameId(2);
        frame.resource = ResourceType::SubFrame;

        assert_eq!(switcher.on_headers_received(frame).await.unwrap(), NavigationOutcome::Ignored);
        assert!(switcher.domains().is_empty());
        assert!(switcher.tabs().is_empty());
    }

    #[tokio::test]
    async fn test_siblings_reloaded_when_enabled() {
        let config = SwitcherConfig {
            reload_other_tabs: true,
            ..Default::default()
        };
        let (switcher, browser) = setup(config);
        browser.open_tab(TAB, page());
        browser.open_tab(TabId(2), Url::parse("https://example.com/other").unwrap());
        browser.open_tab(TabId(3), Url::parse("https://other.test/").unwrap());

        switcher.switch_host(TAB, &page(), "srv-2".into()).await.unwrap();
        switcher.on_headers_received(reloaded(&browser, &page(), Some("srv-2"))).await.unwrap();

        assert_eq!(browser.reloads(), vec![(TAB, true), (TabId(2), false)]);
    }

    #[tokio::test]
    async fn test_siblings_untouched_by_default() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        browser.open_tab(TabId(2), page());

        switcher.switch_host(TAB, &page(), "srv-2".into()).await.unwrap();
        switcher.on_headers_received(reloaded(&browser, &page(), Some("srv-2"))).await.unwrap();
        assert_eq!(browser.count(|c| matches!(c, BrowserCall::TabsOnDomain(_))), 0);
    }

    #[tokio::test]
    async fn test_status_starts_probe_once_backend_known() {
        let mut config = SwitcherConfig::default();
        config.probe.timeout_secs = 1;
        let (switcher, _browser) = setup(config);
        let mut events = switcher.subscribe();
        let url = Url::parse("http://127.0.0.1:1/").unwrap();

        let reply = switcher.status(TAB, &url).unwrap();
        assert!(matches!(reply, ActionReply::Snapshot(ref s) if s.known_backends.is_empty()));

        switcher.on_headers_received(response(&url, Some("srv-1"))).await.unwrap();
        assert_eq!(switcher.status(TAB, &url).unwrap(), ActionReply::Probing);

        // Every probe fails against a closed port; the hint survives.
        let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SwitcherEvent::Status(s)) = events.recv().await {
                    if !s.known_backends.is_empty() {
                        return s;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(snapshot.known_backends, vec![BackendId::from("srv-1")]);

        let reply = switcher.status(TAB, &url).unwrap();
        assert!(matches!(reply, ActionReply::Snapshot(ref s) if s.known_backends.len() == 1));
    }

    #[tokio::test]
    async fn test_refresh_replaces_known_set() {
        let mut config = SwitcherConfig::default();
        config.probe.timeout_secs = 1;
        let (switcher, _browser) = setup(config);
        let url = Url::parse("http://127.0.0.1:1/").unwrap();
        let domain = "127.0.0.1";

        switcher.on_headers_received(response(&url, Some("srv-2"))).await.unwrap();
        let epoch = switcher.domains().begin_probe(domain);
        let seeded = ["srv-1", "srv-2", "srv-3"].map(BackendId::from);
        assert!(switcher.domains().replace_known_backends(domain, epoch, seeded));
        let mut events = switcher.subscribe();

        assert_eq!(switcher.refresh(TAB, &url).unwrap(), ActionReply::Probing);
        assert!(switcher.domains().snapshot(domain).unwrap().known_backends.is_empty());

        // Nothing answers on the closed port, so only the active backend remains.
        let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SwitcherEvent::Status(s)) = events.recv().await {
                    return s;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(snapshot.known_backends, vec![BackendId::from("srv-2")]);
        assert_eq!(snapshot.active_backend, Some("srv-2".into()));
        assert_eq!(switcher.domains().snapshot(domain), Some(snapshot));
    }

    #[tokio::test]
    async fn test_status_rejects_non_http() {
        let (switcher, _browser) = setup(SwitcherConfig::default());
        let url = Url::parse("about:blank").unwrap();
        assert!(matches!(switcher.status(TAB, &url), Err(SwitchError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_commit_and_complete_update_page() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        let nav = NavigationInfo {
            tab: TAB,
            url: page(),
            frame: FrameId::TOP,
        };

        switcher.on_navigation_committed(&nav);
        switcher.on_headers_received(response(&page(), Some("srv-1"))).await.unwrap();
        let snapshot = switcher.on_navigation_committed(&nav).unwrap();
        assert_eq!(snapshot.active_backend, Some("srv-1".into()));
        switcher.on_navigation_completed(&nav).await;

        let blank = NavigationInfo {
            url: Url::parse("about:blank").unwrap(),
            ..nav
        };
        switcher.on_navigation_completed(&blank).await;

        assert_eq!(
            browser.calls(),
            vec![
                BrowserCall::Indicator { tab: TAB, visible: false },
                BrowserCall::Indicator { tab: TAB, visible: true },
                BrowserCall::Badge { tab: TAB, visible: true },
            ]
        );
    }

    #[tokio::test]
    async fn test_commit_of_non_http_page_ignored() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        let mut events = switcher.subscribe();
        let nav = NavigationInfo {
            tab: TAB,
            url: Url::parse("ftp://example.org/pub/").unwrap(),
            frame: FrameId::TOP,
        };

        assert_eq!(switcher.on_navigation_committed(&nav), None);
        assert!(switcher.domains().is_empty());
        assert!(browser.calls().is_empty());
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_badge_follows_active_backend() {
        let (switcher, browser) = setup(SwitcherConfig::default());
        switcher.on_headers_received(response(&page(), Some("srv-1"))).await.unwrap();

        let (channel, mut rx) = BadgeChannel::new();
        switcher.connect_badge(TAB, &page(), channel.handle());
        assert_eq!(rx.try_recv().unwrap(), Some("srv-1".into()));

        switcher.switch_host(TAB, &page(), "srv-2".into()).await.unwrap();
        switcher.on_headers_received(reloaded(&browser, &page(), Some("srv-2"))).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), Some("srv-2".into()));

        switcher.disconnect_badge(TAB);
        assert!(switcher.tabs().badge(TAB).is_none());
    }

    #[tokio::test]
    async fn test_apply_config_and_tab_close() {
        let (switcher, _browser) = setup(SwitcherConfig::default());
        assert!(switcher.apply_config(SwitcherConfig {
            max_reloads: 7,
            header_names: "x-backend".into(),
            ..Default::default()
        }));
        assert_eq!(switcher.config().max_reloads, 7);

        let mut invalid = SwitcherConfig {
            max_reloads: 2,
            header_names: String::new(),
            ..Default::default()
        };
        invalid.probe.timeout_secs = 0;
        assert!(!switcher.apply_config(invalid));
        let config = switcher.config();
        assert_eq!(config.max_reloads, 7);
        assert_eq!(config.header_names, "x-backend");
        assert_eq!(config.probe.timeout_secs, 10);

        let outcome = switcher.on_headers_received(response(&page(), Some("srv-1"))).await.unwrap();
        assert_eq!(outcome, NavigationOutcome::Observed { backend: None });

        switcher.on_tab_closed(TAB);
        assert!(!switcher.tabs().contains(TAB));
    }
}
