//! Verification error types shared by token consumers.
//!
//! Outward-facing messages are intentionally generic so a failed verification
//! does not disclose which check rejected the token. Details are logged at
//! debug level by the code that produced the error.

use thiserror::Error;

/// Errors produced while verifying a justification token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Token size exceeds [`crate::claims::MAX_JWT_SIZE_BYTES`].
    #[error("The justification token is invalid or expired")]
    TokenTooLarge,

    /// Token is not a structurally valid compact JWS.
    #[error("The justification token is invalid or expired")]
    Malformed,

    /// Token header carries no usable `kid` for key lookup.
    #[error("The justification token is invalid or expired")]
    MissingKid,

    /// The `kid` does not match any key in the published JWKS.
    #[error("The justification token is invalid or expired")]
    UnknownKey,

    /// Signature or standard claim validation failed.
    #[error("The justification token is invalid or expired")]
    SignatureInvalid,

    /// An HS256 token was presented to a verifier that has not opted in.
    #[error("breakglass tokens are not allowed")]
    BreakglassNotAllowed,

    /// A breakglass token did not carry a non-empty breakglass justification.
    #[error("The justification token is invalid or expired")]
    MissingBreakglassJustification,

    /// Token encoding failed (breakglass minting only).
    #[error("failed to encode breakglass token")]
    Encoding,

    /// The JWKS document could not be fetched or parsed.
    #[error("failed to fetch verification keys: {0}")]
    JwksFetch(String),
}
