//! Identifier types shared across subsystems.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Name of the backend instance that served a response.
///
/// Opaque: compared by exact string match, never normalized.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BackendId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Browser tab identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TabId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identity of one navigation issued by the browser.
///
/// Ids grow monotonically per browser, so a response can be matched to the
/// reload that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NavigationId(pub u64);

impl fmt::Display for NavigationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nav-{}", self.0)
    }
}

/// Frame identifier within a tab. `0` is the top-level document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameId(pub u64);

impl FrameId {
    pub const TOP: FrameId = FrameId(0);

    pub fn is_top(&self) -> bool {
        self.0 == 0
    }
}

/// Domain key for a URL: its host name.
///
/// Returns `None` for URLs without a host (`about:blank`, `data:` ...).
pub fn domain_of(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_ascii_lowercase())
}

/// True for `http` and `https` URLs.
pub fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
