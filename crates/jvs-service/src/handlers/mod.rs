pub mod cert_action_handler;
pub mod jwks_handler;
pub mod token_handler;
pub mod validation_handler;

use std::sync::Arc;
use std::time::Duration;

use crate::services::jwks_service::JwksService;
use crate::services::minting_service::MintingService;
use crate::services::rotation_service::RotationService;
use crate::validators::ValidatorRegistry;

/// Shared application state for the HTTP handlers.
pub struct AppState {
    pub minting: Arc<MintingService>,
    pub rotation: Arc<RotationService>,
    pub jwks: Arc<JwksService>,
    pub registry: Arc<ValidatorRegistry>,
    /// Mirrored into JWKS `Cache-Control` headers.
    pub jwks_cache_timeout: Duration,
}
