//! Concurrent backend discovery.

use futures_util::future::join_all;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::ProbeConfig;
use crate::detection::{extract_backend_from_map, HeaderNames};
use crate::observability::logging::error_chain;
use crate::observability::metrics;
use crate::types::BackendId;

/// Recorded for a probe response that carried no recognized header.
pub const UNKNOWN_BACKEND: &str = "ERROR: UNKNOWN HOST !";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to build probe client")]
    Client(#[source] reqwest::Error),

    #[error("probe request failed")]
    Request(#[source] reqwest::Error),
}

/// Issues probe requests and aggregates the backends they reveal.
#[derive(Debug, Clone)]
pub struct HostProber {
    client: reqwest::Client,
    names: HeaderNames,
    report_unknown: bool,
}

impl HostProber {
    pub fn new(config: &ProbeConfig, names: HeaderNames) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .pool_max_idle_per_host(0)
            .build()
            .map_err(ProbeError::Client)?;

        Ok(Self {
            client,
            names,
            report_unknown: config.report_unknown,
        })
    }

    pub fn header_names(&self) -> &HeaderNames {
        &self.names
    }

    /// Run `concurrency` probes against `url`.
    ///
    /// `hint` (the active backend) is always part of the result, even when
    /// every probe fails.
    pub async fn probe(&self, url: &Url, hint: Option<BackendId>, concurrency: usize) -> Vec<BackendId> {
        tracing::debug!(url = %url, concurrency, hint = ?hint, "Probing for backends");

        let results = join_all((0..concurrency).map(|_| self.inspect(url))).await;
        let results = results.into_iter().map(|r| r.map_err(|e| error_chain(&e)));
        let backends = aggregate(hint, results, self.report_unknown);

        tracing::info!(url = %url, found = backends.len(), "Probe round finished");
        backends
    }

    /// One uncached, cookie-less request; returns the detected backend.
    pub async fn inspect(&self, url: &Url) -> Result<Option<BackendId>, ProbeError> {
        let response = self
            .client
            .get(url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .map_err(ProbeError::Request)?;

        Ok(extract_backend_from_map(response.headers(), &self.names))
    }
}

/// Merge probe results into a sorted, de-duplicated list.
///
/// Failed probes are skipped. Responses without a recognized header count
/// as [`UNKNOWN_BACKEND`] when `report_unknown` is set.
pub fn aggregate<E: Display>(
    hint: Option<BackendId>,
    results: impl IntoIterator<Item = Result<Option<BackendId>, E>>,
    report_unknown: bool,
) -> Vec<BackendId> {
    let mut backends: BTreeSet<BackendId> = hint.into_iter().collect();

    for result in results {
        match result {
            Ok(Some(backend)) => {
                metrics::record_probe_request("detected");
                backends.insert(backend);
            }
            Ok(None) => {
                metrics::record_probe_request("unknown");
                if report_unknown {
                    backends.insert(BackendId::from(UNKNOWN_BACKEND));
                }
            }
            Err(e) => {
                metrics::record_probe_request("failed");
                tracing::debug!(error = %e, "Probe request failed");
            }
        }
    }

    backends.into_iter().collect()
}
