//! Business logic layer.
//!
//! - `primary` - the primary-version label codec
//! - `signer_service` - cached resolution of the primary signing version
//! - `minting_service` - request validation and token minting
//! - `rotation_service` - the key version lifecycle state machine
//! - `jwks_service` - JWKS assembly and caching

pub mod jwks_service;
pub mod minting_service;
pub mod primary;
pub mod rotation_service;
pub mod signer_service;
