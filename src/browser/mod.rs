//! Browser collaborator seam.
//!
//! # Data Flow
//! ```text
//! Switcher (outbound effects)
//!     → Browser trait (cookies, reloads, cancellation, indicators)
//!     → headless.rs (reqwest-backed tabs, used by the CLI and tests)
//!     → recording.rs (test-only double: records calls, scripted failures)
//!
//! Browser (inbound events)
//!     → EventSender → SwitcherService queue
//! ```
//!
//! # Design Decisions
//! - The core never talks to a concrete browser; everything goes through
//!   the trait so a real extension host can plug in
//! - Indicator updates and cancellation are fire-and-forget

pub mod cookies;
pub mod headless;
#[cfg(test)]
pub mod recording;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::types::{NavigationId, TabId};

pub use cookies::CookieJar;
pub use headless::HeadlessBrowser;
#[cfg(test)]
pub use recording::{BrowserCall, RecordingBrowser};

pub type BrowserResult<T> = Result<T, BrowserError>;

/// A cookie visible to a URL, as enumerated by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub domain: String,
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("HTTP error")]
    Http(#[from] reqwest::Error),

    #[error("unknown tab {0}")]
    UnknownTab(TabId),

    #[error("browser operation failed: {0}")]
    Unavailable(String),
}

/// Outbound effects the switcher requests from the browser.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Enumerate cookies sent to `url`.
    async fn cookies(&self, url: &Url) -> BrowserResult<Vec<Cookie>>;

    async fn remove_cookie(&self, url: &Url, name: &str) -> BrowserResult<()>;

    /// Start a new navigation of the tab's current URL. Responses for it
    /// carry the returned id.
    async fn reload_tab(&self, tab: TabId, bypass_cache: bool) -> BrowserResult<NavigationId>;

    /// Tabs currently showing a page on `domain`.
    async fn tabs_on_domain(&self, domain: &str) -> BrowserResult<Vec<TabId>>;

    /// Abort the tab's in-flight navigation, if any.
    fn cancel_navigation(&self, tab: TabId);

    /// Show or hide the toolbar indicator for a tab.
    fn set_indicator(&self, tab: TabId, visible: bool);

    /// Insert or remove the in-page badge.
    async fn show_badge(&self, tab: TabId, visible: bool) -> BrowserResult<()>;
}
