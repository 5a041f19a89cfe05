//! Metrics definitions for the JVS service.
//!
//! Prometheus naming conventions: `jvs_` prefix, `_total` suffix for
//! counters. Label values are bounded:
//! - `status`: success, error
//! - `action`: create, promote, disable, destroy

use metrics::counter;

/// Record the outcome of a token mint request.
///
/// Metric: `jvs_token_mint_total`
pub fn record_token_mint(status: &str) {
    counter!("jvs_token_mint_total", "status" => status.to_string()).increment(1);
}

/// Record one applied (or failed) rotation action.
///
/// Metric: `jvs_rotation_actions_total`
pub fn record_rotation_action(action: &str, status: &str) {
    counter!(
        "jvs_rotation_actions_total",
        "action" => action.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record the outcome of a JWKS request.
///
/// Metric: `jvs_jwks_requests_total`
pub fn record_jwks_request(status: &str) {
    counter!("jvs_jwks_requests_total", "status" => status.to_string()).increment(1);
}
