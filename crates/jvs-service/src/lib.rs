//! Justification Verification Service (JVS) Library
//!
//! This library mints short-lived, asymmetrically signed justification
//! tokens, rotates the signing key versions backing them, and publishes
//! their verification material as a JWKS endpoint.
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `errors` - Error types
//! - `keystore` - Signing key store abstraction and in-memory implementation
//! - `validators` - Justification category validators
//! - `services` - Business logic (minting, signer cache, rotation, JWKS)
//! - `handlers` - HTTP request handlers
//! - `middleware` - Requestor extraction
//! - `models` - Wire types
//! - `cache` - Read-through cache with coalesced refresh
//! - `clock` - Injectable wall clock

pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod keystore;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod services;
pub mod validators;
