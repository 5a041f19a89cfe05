use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::instrument;

use super::AppState;
use crate::errors::JvsError;
use crate::middleware::requestor::requestor_from_headers;
use crate::models::{CreateJustificationRequest, CreateJustificationResponse};
use crate::observability::metrics::record_token_mint;

/// Handle a mint request.
///
/// POST /api/v1/justifications
///
/// The requestor is attributed from the (unverified) bearer token in the
/// `authorization` header; request contents are validated by the minting
/// service. Handler is instrumented with `skip_all` so justification text
/// never lands in spans.
#[instrument(name = "jvs.justifications.create", skip_all, fields(status))]
pub async fn create_justification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateJustificationRequest>,
) -> Result<Json<CreateJustificationResponse>, JvsError> {
    let requestor = requestor_from_headers(&headers)?;

    let result = state.minting.create_token(&requestor, request).await;

    let status = if result.is_ok() { "success" } else { "error" };
    tracing::Span::current().record("status", status);
    record_token_mint(status);

    Ok(Json(CreateJustificationResponse { token: result? }))
}
