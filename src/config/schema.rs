//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the switcher.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SwitcherConfig {
    /// Header names identifying the serving backend, in priority order.
    /// Separated by whitespace or `;`, matched case-insensitively.
    #[serde(alias = "headerNames")]
    pub header_names: String,

    /// Number of concurrent probe requests per domain.
    #[serde(alias = "seekRequests")]
    pub seek_requests: usize,

    /// Retry budget for a switch loop.
    pub max_reloads: u32,

    /// Show a badge in the page when the active backend is known.
    #[serde(alias = "showContentHint")]
    pub show_content_hint: bool,

    /// Reload other tabs on the same domain after a switch loop ends.
    #[serde(alias = "reloadOtherTabs")]
    pub reload_other_tabs: bool,

    /// Probe request settings.
    pub probe: ProbeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for SwitcherConfig {
    fn default() -> Self {
        Self {
            header_names: "x-server".to_string(),
            seek_requests: 5,
            max_reloads: 50,
            show_content_hint: true,
            reload_other_tabs: false,
            probe: ProbeConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Probe request settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// User agent sent with probe requests.
    pub user_agent: String,

    /// Record responses without a recognized header as an unknown backend
    /// instead of dropping them.
    pub report_unknown: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            user_agent: concat!("backend-switcher/", env!("CARGO_PKG_VERSION")).to_string(),
            report_unknown: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9091".to_string(),
        }
    }
}
