use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::Response;
use std::sync::Arc;
use tracing::instrument;

use super::AppState;
use crate::errors::JvsError;
use crate::observability::metrics::record_jwks_request;

/// Handle a JWKS request.
///
/// GET /.well-known/jwks
///
/// Serves the cached serialized key set with a `Cache-Control` lifetime
/// matching the server-side cache timeout.
#[instrument(name = "jvs.jwks.get", skip_all, fields(status))]
pub async fn handle_get_jwks(State(state): State<Arc<AppState>>) -> Result<Response, JvsError> {
    let result = state.jwks.jwks_body().await;

    let status = if result.is_ok() { "success" } else { "error" };
    tracing::Span::current().record("status", status);
    record_jwks_request(status);

    let body = result?;
    let max_age = state.jwks_cache_timeout.as_secs();

    Response::builder()
        .header(CONTENT_TYPE, "application/json")
        .header(CACHE_CONTROL, format!("max-age={max_age}"))
        .body(Body::from(body.as_str().to_owned()))
        .map_err(|e| JvsError::Internal(format!("response construction failed: {e}")))
}
