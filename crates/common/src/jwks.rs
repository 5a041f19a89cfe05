//! JSON Web Key Set document types (RFC 7517, ES256 profile).
//!
//! The publishing service serializes these; token consumers deserialize the
//! same shapes when fetching verification material.

use serde::{Deserialize, Serialize};

/// Public half of an enabled signing key version, expressed as an ES256 JWK.
///
/// `kid` carries the fully-qualified key version name. `x`/`y` are the
/// base64url (no padding) affine coordinates of the P-256 point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    pub crv: String,
    pub kid: String,
    pub x: String,
    pub y: String,
}

/// The published key set: exactly the currently enabled versions, sorted
/// ascending by `kid` for byte-stable output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<JsonWebKey>,
}
