//! In-memory cookie jar for the headless browser.
//!
//! Cookies are keyed by exact host; attributes (`Path`, `Expires`, ...) are
//! ignored. Enough to carry session affinity, not a general cookie store.

use dashmap::DashMap;
use reqwest::header::HeaderValue;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    inner: Arc<DashMap<String, BTreeMap<String, String>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a `Set-Cookie` header value received from `host`.
    pub fn store(&self, host: &str, set_cookie: &HeaderValue) {
        let Some((name, value)) = set_cookie.to_str().ok().and_then(parse_set_cookie) else {
            tracing::debug!(host = %host, "Ignoring unparsable Set-Cookie header");
            return;
        };
        self.inner
            .entry(host.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    /// Value for a `Cookie` request header, if any cookie is stored.
    pub fn header_for(&self, host: &str) -> Option<String> {
        let cookies = self.inner.get(host)?;
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn names(&self, host: &str) -> Vec<String> {
        self.inner
            .get(host)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, host: &str, name: &str) -> Option<String> {
        self.inner.get(host).and_then(|c| c.get(name).cloned())
    }

    pub fn remove(&self, host: &str, name: &str) -> bool {
        self.inner
            .get_mut(host)
            .map(|mut c| c.remove(name).is_some())
            .unwrap_or(false)
    }
}

/// Name and value of a `Set-Cookie` header; attributes are dropped.
fn parse_set_cookie(header: &str) -> Option<(&str, &str)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}
