use axum::{extract::State, Json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use super::AppState;
use crate::errors::JvsError;
use crate::validators::UiData;

/// List display hints for every registered justification category.
///
/// GET /api/v1/validations
#[instrument(name = "jvs.validations.list", skip_all)]
pub async fn list_validations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<String, UiData>>, JvsError> {
    Ok(Json(state.registry.ui_data().await?))
}
