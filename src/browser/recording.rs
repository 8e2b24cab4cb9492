//! Browser double that records every call.
//!
//! Cookie enumeration can be made to fail or to wait on a gate so
//! overlapping switch requests can be staged deterministically.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use url::Url;

use crate::browser::{Browser, BrowserError, BrowserResult, Cookie};
use crate::types::{domain_of, NavigationId, TabId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserCall {
    Cookies(Url),
    RemoveCookie { url: Url, name: String },
    Reload { tab: TabId, bypass_cache: bool },
    TabsOnDomain(String),
    Cancel(TabId),
    Indicator { tab: TabId, visible: bool },
    Badge { tab: TabId, visible: bool },
}

#[derive(Debug, Default)]
pub struct RecordingBrowser {
    calls: Mutex<Vec<BrowserCall>>,
    cookies: Mutex<Vec<Cookie>>,
    tabs: Mutex<Vec<(TabId, Url)>>,
    fail_cookies: AtomicBool,
    fail_reload: AtomicBool,
    last_navigation: AtomicU64,
    cookie_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl RecordingBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cookies returned by every enumeration.
    pub fn with_cookies(self, names: &[&str]) -> Self {
        if let Ok(mut cookies) = self.cookies.lock() {
            *cookies = names
                .iter()
                .map(|n| Cookie {
                    name: n.to_string(),
                    domain: String::new(),
                })
                .collect();
        }
        self
    }

    /// Register an open tab for `tabs_on_domain`.
    pub fn open_tab(&self, tab: TabId, url: Url) {
        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.push((tab, url));
        }
    }

    pub fn fail_cookies(&self, fail: bool) {
        self.fail_cookies.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reload(&self, fail: bool) {
        self.fail_reload.store(fail, Ordering::SeqCst);
    }

    /// Make cookie enumeration wait for a permit on the returned semaphore.
    pub fn gate_cookies(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        if let Ok(mut slot) = self.cookie_gate.lock() {
            *slot = Some(gate.clone());
        }
        gate
    }

    pub fn calls(&self) -> Vec<BrowserCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    /// Reloads issued, in order.
    pub fn reloads(&self) -> Vec<(TabId, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BrowserCall::Reload { tab, bypass_cache } => Some((tab, bypass_cache)),
                _ => None,
            })
            .collect()
    }

    /// Id handed out by the latest reload.
    pub fn last_navigation(&self) -> NavigationId {
        NavigationId(self.last_navigation.load(Ordering::SeqCst))
    }

    pub fn count(&self, matches: impl Fn(&BrowserCall) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: BrowserCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl Browser for RecordingBrowser {
    async fn cookies(&self, url: &Url) -> BrowserResult<Vec<Cookie>> {
        self.record(BrowserCall::Cookies(url.clone()));

        let gate = self.cookie_gate.lock().ok().and_then(|g| g.clone());
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| BrowserError::Unavailable(e.to_string()))?;
            permit.forget();
        }

        if self.fail_cookies.load(Ordering::SeqCst) {
            return Err(BrowserError::Unavailable("cookie store unavailable".into()));
        }
        let domain = domain_of(url).unwrap_or_default();
        Ok(self
            .cookies
            .lock()
            .map(|c| {
                c.iter()
                    .map(|cookie| Cookie {
                        name: cookie.name.clone(),
                        domain: domain.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove_cookie(&self, url: &Url, name: &str) -> BrowserResult<()> {
        self.record(BrowserCall::RemoveCookie {
            url: url.clone(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn reload_tab(&self, tab: TabId, bypass_cache: bool) -> BrowserResult<NavigationId> {
        self.record(BrowserCall::Reload { tab, bypass_cache });
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(BrowserError::UnknownTab(tab));
        }
        Ok(NavigationId(self.last_navigation.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn tabs_on_domain(&self, domain: &str) -> BrowserResult<Vec<TabId>> {
        self.record(BrowserCall::TabsOnDomain(domain.to_string()));
        Ok(self
            .tabs
            .lock()
            .map(|tabs| {
                tabs.iter()
                    .filter(|(_, url)| domain_of(url).as_deref() == Some(domain))
                    .map(|(tab, _)| *tab)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn cancel_navigation(&self, tab: TabId) {
        self.record(BrowserCall::Cancel(tab));
    }

    fn set_indicator(&self, tab: TabId, visible: bool) {
        self.record(BrowserCall::Indicator { tab, visible });
    }

    async fn show_badge(&self, tab: TabId, visible: bool) -> BrowserResult<()> {
        self.record(BrowserCall::Badge { tab, visible });
        Ok(())
    }
}
