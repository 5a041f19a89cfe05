use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::instrument;

use super::AppState;
use crate::errors::JvsError;
use crate::models::{CertificateActionRequest, CertificateActionResponse};

/// Handle operator key version overrides.
///
/// POST /api/v1/admin/certificate-actions
///
/// Actions apply independently; failures aggregate and surface as a single
/// internal error after every action has been attempted.
#[instrument(name = "jvs.admin.certificate_action", skip_all)]
pub async fn certificate_action(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CertificateActionRequest>,
) -> Result<Json<CertificateActionResponse>, JvsError> {
    state.rotation.certificate_action(&request.actions).await?;
    Ok(Json(CertificateActionResponse {}))
}
