//! Metrics collection and Prometheus export.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Must run once, before any metric is
/// recorded; a second call is an error.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    METRICS_HANDLE
        .set(handle)
        .map_err(|_| anyhow::anyhow!("Metrics handle already initialized"))
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

pub fn record_registration(outcome: &'static str) {
    metrics::counter!("registrations_total", "outcome" => outcome).increment(1);
}

pub fn record_credential_issued(kind: &'static str) {
    metrics::counter!("credentials_issued_total", "kind" => kind).increment(1);
}

pub fn record_invite_redemption() {
    metrics::counter!("invite_redemptions_total").increment(1);
}

pub fn record_policy_resolution(decision: &'static str) {
    metrics::counter!("policy_resolutions_total", "decision" => decision).increment(1);
}

pub fn record_portal_grant(outcome: &'static str) {
    metrics::counter!("portal_grants_total", "outcome" => outcome).increment(1);
}

pub fn record_credentials_expired(count: usize) {
    metrics::counter!("credentials_expired_total").increment(count as u64);
}
