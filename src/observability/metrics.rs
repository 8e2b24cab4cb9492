//! Metrics collection and exposition.
//!
//! # Metrics
//! - `switcher_navigations_total` (counter): inspected navigations by `detected`
//! - `switcher_retries_total` (counter): switch loop reloads after a miss
//! - `switcher_switch_outcomes_total` (counter): finished loops by `outcome`
//! - `switcher_probe_requests_total` (counter): probe requests by `result`
//! - `switcher_known_backends` (gauge): backends known per domain

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_navigation(detected: bool) {
    metrics::counter!(
        "switcher_navigations_total",
        "detected" => if detected { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_retry() {
    metrics::counter!("switcher_retries_total").increment(1);
}

pub fn record_switch_outcome(outcome: &'static str) {
    metrics::counter!("switcher_switch_outcomes_total", "outcome" => outcome).increment(1);
}

pub fn record_probe_request(result: &'static str) {
    metrics::counter!("switcher_probe_requests_total", "result" => result).increment(1);
}

pub fn record_known_backends(domain: &str, count: usize) {
    metrics::gauge!("switcher_known_backends", "domain" => domain.to_string()).set(count as f64);
}
