//! Headless browser.
//!
//! # Responsibilities
//! - Hold tabs (one URL each) and a per-host cookie jar
//! - Run each navigation as a task: fetch, report headers, wait for the
//!   switcher's verdict, then commit and complete
//! - Implement the outbound [`Browser`] effects against that state
//!
//! # Design Decisions
//! - A new navigation for a tab aborts the previous one. Headers it already
//!   queued carry its [`NavigationId`] and are dropped by the switcher
//! - Showing the badge opens a [`BadgeChannel`] owned by the tab; hiding it
//!   or closing the tab drops the channel

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::{HeaderMap, CACHE_CONTROL, COOKIE, PRAGMA, SET_COOKIE};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use url::Url;

use crate::browser::{Browser, BrowserError, BrowserResult, Cookie, CookieJar};
use crate::config::ProbeConfig;
use crate::detection::{ResourceType, ResponseHeader};
use crate::notification::BadgeChannel;
use crate::switch::{
    EventSender, InboundEvent, NavigationFailure, NavigationInfo, NavigationResponse, OWN_CANCELLATION,
};
use crate::types::{domain_of, BackendId, FrameId, NavigationId, TabId};

#[derive(Debug)]
struct HeadlessTab {
    url: Url,
    navigation: Option<AbortHandle>,
    indicator: bool,
    badge: Option<(BadgeChannel, mpsc::UnboundedReceiver<Option<BackendId>>)>,
    badge_text: Option<BackendId>,
}

/// Observable state of a headless tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabState {
    pub url: Url,
    pub indicator: bool,
    pub badge_visible: bool,
    /// Last backend pushed to the page badge.
    pub badge_text: Option<BackendId>,
}

struct Inner {
    client: reqwest::Client,
    jar: CookieJar,
    tabs: DashMap<TabId, HeadlessTab>,
    next_tab: AtomicU64,
    next_navigation: AtomicU64,
    events: EventSender,
}

/// A reqwest-backed browser with tabs and cookies.
#[derive(Clone)]
pub struct HeadlessBrowser {
    inner: Arc<Inner>,
}

impl HeadlessBrowser {
    pub fn new(config: &ProbeConfig, events: EventSender) -> BrowserResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self::with_client(client, events))
    }

    pub fn with_client(client: reqwest::Client, events: EventSender) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                jar: CookieJar::new(),
                tabs: DashMap::new(),
                next_tab: AtomicU64::new(1),
                next_navigation: AtomicU64::new(1),
                events,
            }),
        }
    }

    /// Open a tab and start loading `url`.
    pub fn open_tab(&self, url: Url) -> TabId {
        let tab = TabId(self.inner.next_tab.fetch_add(1, Ordering::Relaxed));
        self.inner.tabs.insert(
            tab,
            HeadlessTab {
                url: url.clone(),
                navigation: None,
                indicator: false,
                badge: None,
                badge_text: None,
            },
        );
        tracing::debug!(tab = %tab, url = %url, "Opened tab");
        self.start_navigation(tab, url, false);
        tab
    }

    /// Close a tab, aborting its navigation.
    pub fn close_tab(&self, tab: TabId) -> bool {
        match self.inner.tabs.remove(&tab) {
            Some((_, state)) => {
                if let Some(nav) = state.navigation {
                    nav.abort();
                }
                self.inner.events.send(InboundEvent::TabClosed(tab));
                true
            }
            None => false,
        }
    }

    pub fn tab_state(&self, tab: TabId) -> Option<TabState> {
        let mut state = self.inner.tabs.get_mut(&tab)?;
        let mut latest = None;
        if let Some((_, rx)) = state.badge.as_mut() {
            while let Ok(text) = rx.try_recv() {
                latest = Some(text);
            }
        }
        if let Some(text) = latest {
            state.badge_text = text;
        }
        Some(TabState {
            url: state.url.clone(),
            indicator: state.indicator,
            badge_visible: state.badge.is_some(),
            badge_text: state.badge_text.clone(),
        })
    }

    pub fn cookie_jar(&self) -> &CookieJar {
        &self.inner.jar
    }

    fn start_navigation(&self, tab: TabId, url: Url, bypass_cache: bool) -> NavigationId {
        let navigation = NavigationId(self.inner.next_navigation.fetch_add(1, Ordering::Relaxed));
        let inner = self.inner.clone();
        let task = tokio::spawn(run_navigation(inner, tab, navigation, url, bypass_cache));
        if let Some(mut state) = self.inner.tabs.get_mut(&tab) {
            if let Some(previous) = state.navigation.replace(task.abort_handle()) {
                previous.abort();
            }
        } else {
            task.abort();
        }
        navigation
    }
}

async fn run_navigation(inner: Arc<Inner>, tab: TabId, navigation: NavigationId, url: Url, bypass_cache: bool) {
    let host = domain_of(&url).unwrap_or_default();

    let mut request = inner.client.get(url.clone());
    if bypass_cache {
        request = request.header(CACHE_CONTROL, "no-cache").header(PRAGMA, "no-cache");
    }
    if let Some(cookie) = inner.jar.header_for(&host) {
        request = request.header(COOKIE, cookie);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(tab = %tab, url = %url, error = %e, "Navigation failed");
            inner.events.send(InboundEvent::Failed(NavigationFailure {
                tab,
                url,
                frame: FrameId::TOP,
                error: e.to_string(),
            }));
            return;
        }
    };

    for value in response.headers().get_all(SET_COOKIE) {
        inner.jar.store(&host, value);
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    let delivered = inner.events.send(InboundEvent::HeadersReceived {
        response: NavigationResponse {
            tab,
            navigation,
            url: url.clone(),
            frame: FrameId::TOP,
            resource: ResourceType::MainFrame,
            headers: response_headers(response.headers()),
        },
        reply: Some(reply_tx),
    });
    if !delivered {
        return;
    }

    match reply_rx.await {
        Ok(outcome) if outcome.cancels_navigation() => {
            tracing::trace!(tab = %tab, "Navigation cancelled by switcher");
            return;
        }
        Ok(_) => {}
        Err(_) => return,
    }

    let info = NavigationInfo {
        tab,
        url,
        frame: FrameId::TOP,
    };
    inner.events.send(InboundEvent::Committed(info.clone()));
    inner.events.send(InboundEvent::Completed(info));
}

fn response_headers(headers: &HeaderMap) -> Vec<ResponseHeader> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| ResponseHeader::new(name.as_str(), v))
        })
        .collect()
}

#[async_trait]
impl Browser for HeadlessBrowser {
    async fn cookies(&self, url: &Url) -> BrowserResult<Vec<Cookie>> {
        let host = domain_of(url).ok_or_else(|| BrowserError::Unavailable(format!("no host in {url}")))?;
        Ok(self
            .inner
            .jar
            .names(&host)
            .into_iter()
            .map(|name| Cookie {
                name,
                domain: host.clone(),
            })
            .collect())
    }

    async fn remove_cookie(&self, url: &Url, name: &str) -> BrowserResult<()> {
        let host = domain_of(url).ok_or_else(|| BrowserError::Unavailable(format!("no host in {url}")))?;
        self.inner.jar.remove(&host, name);
        Ok(())
    }

    async fn reload_tab(&self, tab: TabId, bypass_cache: bool) -> BrowserResult<NavigationId> {
        let url = self
            .inner
            .tabs
            .get(&tab)
            .map(|state| state.url.clone())
            .ok_or(BrowserError::UnknownTab(tab))?;
        Ok(self.start_navigation(tab, url, bypass_cache))
    }

    async fn tabs_on_domain(&self, domain: &str) -> BrowserResult<Vec<TabId>> {
        let mut tabs: Vec<TabId> = self
            .inner
            .tabs
            .iter()
            .filter(|entry| domain_of(&entry.url).as_deref() == Some(domain))
            .map(|entry| *entry.key())
            .collect();
        tabs.sort();
        Ok(tabs)
    }

    fn cancel_navigation(&self, tab: TabId) {
        if let Some(mut state) = self.inner.tabs.get_mut(&tab) {
            if let Some(nav) = state.navigation.take() {
                nav.abort();
                tracing::trace!(tab = %tab, code = OWN_CANCELLATION, "Navigation aborted");
            }
        }
    }

    fn set_indicator(&self, tab: TabId, visible: bool) {
        if let Some(mut state) = self.inner.tabs.get_mut(&tab) {
            state.indicator = visible;
        }
    }

    async fn show_badge(&self, tab: TabId, visible: bool) -> BrowserResult<()> {
        let url = {
            let mut state = self.inner.tabs.get_mut(&tab).ok_or(BrowserError::UnknownTab(tab))?;
            match (visible, state.badge.is_some()) {
                (true, false) => {
                    let (channel, rx) = BadgeChannel::new();
                    let handle = channel.handle();
                    state.badge = Some((channel, rx));
                    Some((state.url.clone(), handle))
                }
                (false, true) => {
                    state.badge = None;
                    state.badge_text = None;
                    None
                }
                _ => return Ok(()),
            }
        };

        match url {
            Some((url, badge)) => {
                self.inner.events.send(InboundEvent::BadgeConnected { tab, url, badge });
            }
            None => {
                self.inner.events.send(InboundEvent::BadgeDisconnected(tab));
            }
        }
        Ok(())
    }
}
