use axum::{
    http::StatusCode,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    cert_action_handler, jwks_handler, token_handler, validation_handler, AppState,
};

/// Install the global Prometheus recorder. Must run before any metric is
/// recorded.
///
/// # Errors
///
/// Returns `BuildError` when a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    Router::new()
        // Minting
        .route(
            "/api/v1/justifications",
            post(token_handler::create_justification),
        )
        // Operator overrides
        .route(
            "/api/v1/admin/certificate-actions",
            post(cert_action_handler::certificate_action),
        )
        // Validator display hints
        .route(
            "/api/v1/validations",
            get(validation_handler::list_validations),
        )
        // JWKS (well-known path, no /api/v1 prefix)
        .route("/.well-known/jwks", get(jwks_handler::handle_get_jwks))
        // Health check
        .route("/health", get(health_check))
        // Prometheus scrape endpoint
        .route("/metrics", get(move || async move { metrics_handle.render() }))
        // Tracing middleware
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}
