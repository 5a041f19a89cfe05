//! Justification claim types shared between the minting service and its
//! token consumers.
//!
//! This module also provides `peek_header`/`peek_payload` for inspecting a
//! compact JWS without verifying it. Both are size-checked BEFORE any base64
//! decoding so oversized tokens are rejected with minimal resource usage.
//!
//! # Security
//!
//! - Peeked data is NOT authenticated. Callers must verify the token before
//!   trusting any claim, and may use peeked headers only for key lookup and
//!   algorithm routing.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::TokenError;

/// Maximum allowed JWT size in bytes (8KB).
///
/// Tokens larger than this are rejected before any parsing or cryptographic
/// operations. Typical justification tokens are well under 2KB even with
/// several annotated justifications.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Category under which breakglass self-attestations are recorded.
pub const BREAKGLASS_CATEGORY: &str = "breakglass";

/// A single justification: the category/value pair a caller supplies as the
/// reason for requesting a token, plus any annotations attached by the
/// category's validator (e.g. a resolved ticket URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Justification {
    pub category: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotation: HashMap<String, String>,
}

impl Justification {
    #[must_use]
    pub fn new(category: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            value: value.into(),
            annotation: HashMap::new(),
        }
    }
}

/// Claims carried by a justification token.
///
/// `justs` is a typed claim: justifications are encoded as structured objects,
/// never as strings. `req` is the requestor principal extracted from the
/// caller's own credential at mint time and may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JustificationClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(default)]
    pub justs: Vec<Justification>,
    #[serde(default)]
    pub req: String,
}

impl JustificationClaims {
    /// Look up the first justification recorded under `category`.
    #[must_use]
    pub fn justification(&self, category: &str) -> Option<&Justification> {
        self.justs.iter().find(|j| j.category == category)
    }
}

/// JOSE header fields relevant to routing and key lookup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default)]
    pub typ: Option<String>,
    #[serde(default)]
    pub kid: Option<String>,
}

/// Decode the JOSE header of a compact JWS without verifying the signature.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `Malformed` - wrong part count, bad base64, or invalid header JSON
pub fn peek_header(token: &str) -> Result<TokenHeader, TokenError> {
    let parts = split_compact(token)?;
    let header_bytes = URL_SAFE_NO_PAD.decode(parts.0).map_err(|e| {
        tracing::debug!(target: "common.claims", error = %e, "failed to decode JWS header base64");
        TokenError::Malformed
    })?;

    serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.claims", error = %e, "failed to parse JWS header JSON");
        TokenError::Malformed
    })
}

/// Decode the payload of a compact JWS without verifying the signature.
///
/// Used for extracting advisory fields (e.g. the requestor's `email`) from a
/// bearer credential the service does not itself authenticate.
///
/// # Errors
///
/// Same conditions as [`peek_header`].
pub fn peek_payload(token: &str) -> Result<serde_json::Value, TokenError> {
    let parts = split_compact(token)?;
    let payload_bytes = URL_SAFE_NO_PAD.decode(parts.1).map_err(|e| {
        tracing::debug!(target: "common.claims", error = %e, "failed to decode JWS payload base64");
        TokenError::Malformed
    })?;

    serde_json::from_slice(&payload_bytes).map_err(|e| {
        tracing::debug!(target: "common.claims", error = %e, "failed to parse JWS payload JSON");
        TokenError::Malformed
    })
}

fn split_compact(token: &str) -> Result<(&str, &str, &str), TokenError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.claims",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "token rejected: size exceeds maximum allowed"
        );
        return Err(TokenError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Ok((header, payload, signature)),
        _ => Err(TokenError::Malformed),
    }
}
