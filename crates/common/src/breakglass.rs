//! Breakglass token codec.
//!
//! Breakglass tokens are HS256 JWTs signed with a public, documented secret.
//! They carry no cryptographic trust: the HMAC only proves the token was
//! produced by tooling that follows this format, not by any particular
//! principal. Their value is the auditable self-declaration embedded in the
//! `breakglass` justification. Verifiers accept them only after an explicit
//! opt-in (see [`crate::verifier::TokenVerifier`]).

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::claims::{peek_header, Justification, JustificationClaims, BREAKGLASS_CATEGORY};
use crate::error::TokenError;

/// The shared HMAC key for breakglass tokens.
///
/// Deliberately public. Anyone can mint a breakglass token; the point is that
/// doing so leaves a well-formed, attributable record.
pub const BREAKGLASS_HMAC_SECRET: &[u8] = b"BREAKGLASS";

/// Mint a self-attested breakglass token.
///
/// The token carries a single justification under the `breakglass` category
/// with the caller's `explanation`. `req` mirrors `subject` since the caller
/// attests for themselves.
///
/// # Errors
///
/// - `MissingBreakglassJustification` - `explanation` is empty
/// - `Encoding` - JWT encoding failed
pub fn mint(
    issuer: &str,
    subject: &str,
    audiences: &[String],
    ttl: chrono::Duration,
    explanation: &str,
) -> Result<String, TokenError> {
    if explanation.is_empty() {
        return Err(TokenError::MissingBreakglassJustification);
    }

    let now = Utc::now();
    let claims = JustificationClaims {
        iss: issuer.to_string(),
        sub: subject.to_string(),
        aud: audiences.to_vec(),
        exp: (now + ttl).timestamp(),
        nbf: now.timestamp(),
        iat: now.timestamp(),
        jti: Uuid::new_v4().to_string(),
        justs: vec![Justification::new(BREAKGLASS_CATEGORY, explanation)],
        req: subject.to_string(),
    };

    let header = Header::new(Algorithm::HS256);
    encode(&header, &claims, &EncodingKey::from_secret(BREAKGLASS_HMAC_SECRET)).map_err(|e| {
        tracing::debug!(target: "common.breakglass", error = %e, "breakglass encoding failed");
        TokenError::Encoding
    })
}

/// Verify a breakglass token.
///
/// Accepts the token only when the JOSE header is `typ=JWT`/`alg=HS256`, the
/// HMAC verifies under [`BREAKGLASS_HMAC_SECRET`], the token is within its
/// validity window, and a non-empty `breakglass` justification is present.
///
/// # Errors
///
/// - `Malformed` - header is not `typ=JWT`/`alg=HS256`
/// - `SignatureInvalid` - HMAC or standard claim validation failed
/// - `MissingBreakglassJustification` - no non-empty `breakglass` entry
pub fn verify(token: &str) -> Result<JustificationClaims, TokenError> {
    let header = peek_header(token)?;
    if header.alg != "HS256" || header.typ.as_deref() != Some("JWT") {
        return Err(TokenError::Malformed);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;

    let data = decode::<JustificationClaims>(
        token,
        &DecodingKey::from_secret(BREAKGLASS_HMAC_SECRET),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(target: "common.breakglass", error = %e, "breakglass verification failed");
        TokenError::SignatureInvalid
    })?;

    let attested = data
        .claims
        .justification(BREAKGLASS_CATEGORY)
        .map_or(false, |j| !j.value.is_empty());
    if !attested {
        return Err(TokenError::MissingBreakglassJustification);
    }

    Ok(data.claims)
}
