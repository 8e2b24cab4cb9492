//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Configure log level from environment or config
//! - Render error source chains for log fields and user-facing reasons
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - Safe to call more than once (later calls are ignored)

use std::error::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Build the filter used when `RUST_LOG` is not set.
pub fn default_filter(config: &ObservabilityConfig) -> String {
    format!("backend_switcher={},warn", config.log_level)
}

/// Install the global subscriber.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Render an error followed by its sources, `outer: inner: ...`.
///
/// Error messages never embed their source, so this is the one place the
/// chain gets flattened.
pub fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum Outer {
        #[error("reload failed")]
        Reload(#[source] Inner),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("tab is gone")]
    struct Inner;

    #[test]
    fn test_error_chain_lists_each_source_once() {
        let error = Outer::Reload(Inner);
        assert_eq!(error_chain(&error), "reload failed: tab is gone");
        assert_eq!(error_chain(&Inner), "tab is gone");
    }

    #[test]
    fn test_default_filter() {
        let mut config = ObservabilityConfig::default();
        config.log_level = "debug".to_string();
        assert_eq!(default_filter(&config), "backend_switcher=debug,warn");
    }
}
