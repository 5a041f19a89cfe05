//! Breakglass-aware verification of justification tokens.
//!
//! [`TokenVerifier`] is the client-side entry point for services that gate
//! privileged actions on a justification token. Verification order is fixed:
//! the breakglass path is attempted first, and a token whose header indicates
//! HS256 never reaches JWKS verification. ES256 tokens are verified against
//! the service's published JWKS, fetched over HTTP and cached with an
//! absolute TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tokio::sync::RwLock;

use crate::breakglass;
use crate::claims::{peek_header, JustificationClaims};
use crate::error::TokenError;
use crate::jwks::{JsonWebKey, Jwks};

/// Default staleness bound for the cached JWKS document.
pub const DEFAULT_JWKS_CACHE_TTL: Duration = Duration::from_secs(300);

struct CachedKeys {
    keys: HashMap<String, JsonWebKey>,
    fetched_at: Instant,
}

/// Verifies justification tokens against a JWKS endpoint, with optional
/// breakglass acceptance.
pub struct TokenVerifier {
    jwks_url: String,
    allow_breakglass: bool,
    expected_audience: Option<String>,
    cache_ttl: Duration,
    http: reqwest::Client,
    cached: RwLock<Option<CachedKeys>>,
}

impl TokenVerifier {
    /// Create a verifier for the JWKS document at `jwks_url`.
    ///
    /// Breakglass tokens are rejected unless enabled via
    /// [`TokenVerifier::allow_breakglass`].
    #[must_use]
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            allow_breakglass: false,
            expected_audience: None,
            cache_ttl: DEFAULT_JWKS_CACHE_TTL,
            http: reqwest::Client::new(),
            cached: RwLock::new(None),
        }
    }

    /// Opt in (or out) of accepting HS256 breakglass tokens.
    #[must_use]
    pub fn allow_breakglass(mut self, allow: bool) -> Self {
        self.allow_breakglass = allow;
        self
    }

    /// Require a specific audience on verified tokens.
    #[must_use]
    pub fn expected_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    /// Override the JWKS cache TTL. Zero disables caching.
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Verify a justification token and return its claims.
    ///
    /// # Errors
    ///
    /// - `BreakglassNotAllowed` - HS256 token without breakglass opt-in
    /// - `Malformed` / `MissingKid` - unusable token structure or header
    /// - `UnknownKey` - `kid` absent from the published JWKS
    /// - `SignatureInvalid` - signature or standard claim validation failed
    /// - `JwksFetch` - the JWKS document could not be retrieved
    pub async fn verify(&self, token: &str) -> Result<JustificationClaims, TokenError> {
        let header = peek_header(token)?;

        if header.alg == "HS256" {
            if !self.allow_breakglass {
                return Err(TokenError::BreakglassNotAllowed);
            }
            return breakglass::verify(token);
        }

        if header.alg != "ES256" {
            tracing::debug!(target: "common.verifier", alg = %header.alg, "unsupported algorithm");
            return Err(TokenError::Malformed);
        }

        let kid = header
            .kid
            .filter(|k| !k.is_empty())
            .ok_or(TokenError::MissingKid)?;
        let jwk = self.key_for(&kid).await?;

        let decoding_key =
            DecodingKey::from_ec_components(&jwk.x, &jwk.y).map_err(|e| {
                tracing::debug!(target: "common.verifier", error = %e, "invalid JWK coordinates");
                TokenError::UnknownKey
            })?;

        let mut validation = Validation::new(Algorithm::ES256);
        match &self.expected_audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        decode::<JustificationClaims>(token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(target: "common.verifier", error = %e, "token verification failed");
                TokenError::SignatureInvalid
            })
    }

    async fn key_for(&self, kid: &str) -> Result<JsonWebKey, TokenError> {
        if let Some(jwk) = self.cached_key(kid).await {
            return Ok(jwk);
        }

        // Miss or unknown kid: refresh under the write lock so concurrent
        // misses fetch at most once. An unknown kid forces a refresh because
        // a rotation may have published a new version since the last fetch.
        let mut guard = self.cached.write().await;
        if let Some(cached) = guard.as_ref() {
            if self.is_fresh(cached) {
                if let Some(jwk) = cached.keys.get(kid) {
                    return Ok(jwk.clone());
                }
            }
        }

        let keys = self.fetch_keys().await?;
        let jwk = keys.get(kid).cloned();
        *guard = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });

        jwk.ok_or(TokenError::UnknownKey)
    }

    async fn cached_key(&self, kid: &str) -> Option<JsonWebKey> {
        let guard = self.cached.read().await;
        let cached = guard.as_ref()?;
        if !self.is_fresh(cached) {
            return None;
        }
        cached.keys.get(kid).cloned()
    }

    fn is_fresh(&self, cached: &CachedKeys) -> bool {
        !self.cache_ttl.is_zero() && cached.fetched_at.elapsed() < self.cache_ttl
    }

    async fn fetch_keys(&self) -> Result<HashMap<String, JsonWebKey>, TokenError> {
        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| TokenError::JwksFetch(e.to_string()))?;

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| TokenError::JwksFetch(e.to_string()))?;

        Ok(jwks
            .keys
            .into_iter()
            .map(|key| (key.kid.clone(), key))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::claims::{Justification, BREAKGLASS_CATEGORY};
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use p256::elliptic_curve::sec1::ToEncodedPoint;
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    use rand::rngs::OsRng;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// A generated ES256 keypair: the jsonwebtoken encoding key plus the JWK
    /// that a JWKS endpoint would publish for it.
    fn es256_keypair(kid: &str) -> (EncodingKey, JsonWebKey) {
        let secret = p256::SecretKey::random(&mut OsRng);
        let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();
        let encoding_key = EncodingKey::from_ec_pem(pem.as_bytes()).unwrap();

        let point = secret.public_key().to_encoded_point(false);
        let jwk = JsonWebKey {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            kid: kid.to_string(),
            x: URL_SAFE_NO_PAD.encode(point.x().unwrap()),
            y: URL_SAFE_NO_PAD.encode(point.y().unwrap()),
        };

        (encoding_key, jwk)
    }

    fn signed_claims() -> JustificationClaims {
        let now = Utc::now();
        JustificationClaims {
            iss: "test-iss".to_string(),
            sub: "u@example.com".to_string(),
            aud: vec!["dev.abcxyz.jvs".to_string()],
            exp: (now + chrono::Duration::hours(1)).timestamp(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            justs: vec![Justification::new("explanation", "fixing issue 42")],
            req: "u@example.com".to_string(),
        }
    }

    fn es256_token(encoding_key: &EncodingKey, kid: &str, claims: &JustificationClaims) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(kid.to_string());
        encode(&header, claims, encoding_key).unwrap()
    }

    async fn jwks_server(jwks: &Jwks) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
            .mount(&server)
            .await;
        server
    }

    fn verifier_for(server: &MockServer) -> TokenVerifier {
        TokenVerifier::new(format!("{}/.well-known/jwks", server.uri()))
    }

    #[tokio::test]
    async fn test_verify_es256_token_against_jwks() {
        let kid = "keys/signing/cryptoKeyVersions/1";
        let (encoding_key, jwk) = es256_keypair(kid);
        let server = jwks_server(&Jwks { keys: vec![jwk] }).await;

        let claims = signed_claims();
        let token = es256_token(&encoding_key, kid, &claims);

        let verified = verifier_for(&server).verify(&token).await.unwrap();
        assert_eq!(verified, claims);
    }

    #[tokio::test]
    async fn test_verify_rejects_unknown_kid() {
        let (encoding_key, _) = es256_keypair("keys/signing/cryptoKeyVersions/1");
        let (_, published_jwk) = es256_keypair("keys/signing/cryptoKeyVersions/2");
        let server = jwks_server(&Jwks { keys: vec![published_jwk] }).await;

        let token = es256_token(&encoding_key, "keys/signing/cryptoKeyVersions/1", &signed_claims());

        let result = verifier_for(&server).verify(&token).await;
        assert_eq!(result, Err(TokenError::UnknownKey));
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_key() {
        let kid = "keys/signing/cryptoKeyVersions/1";
        let (signing_key, _) = es256_keypair(kid);
        // Published JWK is a different keypair under the same kid.
        let (_, published_jwk) = es256_keypair(kid);
        let server = jwks_server(&Jwks { keys: vec![published_jwk] }).await;

        let token = es256_token(&signing_key, kid, &signed_claims());

        let result = verifier_for(&server).verify(&token).await;
        assert_eq!(result, Err(TokenError::SignatureInvalid));
    }

    #[tokio::test]
    async fn test_verify_rejects_missing_kid() {
        let (encoding_key, jwk) = es256_keypair("v1");
        let server = jwks_server(&Jwks { keys: vec![jwk] }).await;

        let token = encode(&Header::new(Algorithm::ES256), &signed_claims(), &encoding_key).unwrap();

        let result = verifier_for(&server).verify(&token).await;
        assert_eq!(result, Err(TokenError::MissingKid));
    }

    #[tokio::test]
    async fn test_verify_audience_enforcement() {
        let kid = "keys/signing/cryptoKeyVersions/1";
        let (encoding_key, jwk) = es256_keypair(kid);
        let server = jwks_server(&Jwks { keys: vec![jwk] }).await;

        let token = es256_token(&encoding_key, kid, &signed_claims());

        let accepted = verifier_for(&server)
            .expected_audience("dev.abcxyz.jvs")
            .verify(&token)
            .await;
        assert!(accepted.is_ok());

        let rejected = verifier_for(&server)
            .expected_audience("some-other-service")
            .verify(&token)
            .await;
        assert_eq!(rejected, Err(TokenError::SignatureInvalid));
    }

    #[tokio::test]
    async fn test_hs256_rejected_without_opt_in() {
        // The verifier must never send an HS256 token down the JWKS path, so
        // no JWKS server is needed here at all.
        let verifier = TokenVerifier::new("http://127.0.0.1:9/never-contacted");
        let token = breakglass::mint(
            "jvsctl",
            "me@example.com",
            &[],
            chrono::Duration::minutes(15),
            "prod outage",
        )
        .unwrap();

        let result = verifier.verify(&token).await;
        assert_eq!(result, Err(TokenError::BreakglassNotAllowed));
    }

    #[tokio::test]
    async fn test_hs256_accepted_with_opt_in() {
        let verifier = TokenVerifier::new("http://127.0.0.1:9/never-contacted").allow_breakglass(true);
        let token = breakglass::mint(
            "jvsctl",
            "me@example.com",
            &[],
            chrono::Duration::minutes(15),
            "prod outage",
        )
        .unwrap();

        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims.justification(BREAKGLASS_CATEGORY).unwrap().value, "prod outage");
    }

    #[tokio::test]
    async fn test_hs256_with_opt_in_still_requires_valid_hmac() {
        let verifier = TokenVerifier::new("http://127.0.0.1:9/never-contacted").allow_breakglass(true);
        let token = breakglass::mint(
            "jvsctl",
            "me@example.com",
            &[],
            chrono::Duration::minutes(15),
            "prod outage",
        )
        .unwrap();

        // Corrupt the signature.
        let mut parts: Vec<String> = token.split('.').map(ToString::to_string).collect();
        let signature = parts.pop().unwrap();
        let corrupted = format!("{}.{}.A{signature}", parts.first().unwrap(), parts.get(1).unwrap());

        let result = verifier.verify(&corrupted).await;
        assert_eq!(result, Err(TokenError::SignatureInvalid));
    }

    #[tokio::test]
    async fn test_unsupported_algorithm_rejected() {
        let verifier = TokenVerifier::new("http://127.0.0.1:9/never-contacted");
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT","kid":"v1"}"#);
        let token = format!("{header}.payload.signature");

        let result = verifier.verify(&token).await;
        assert_eq!(result, Err(TokenError::Malformed));
    }

    #[tokio::test]
    async fn test_jwks_cache_serves_repeat_verifications() {
        let kid = "keys/signing/cryptoKeyVersions/1";
        let (encoding_key, jwk) = es256_keypair(kid);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&Jwks { keys: vec![jwk] }))
            .expect(1)
            .mount(&server)
            .await;

        let verifier = verifier_for(&server);
        let token = es256_token(&encoding_key, kid, &signed_claims());

        for _ in 0..3 {
            verifier.verify(&token).await.unwrap();
        }
        // MockServer asserts the expected call count on drop.
    }

    #[tokio::test]
    async fn test_jwks_fetch_failure_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (encoding_key, _) = es256_keypair("v1");
        let token = es256_token(&encoding_key, "v1", &signed_claims());

        let result = verifier_for(&server).verify(&token).await;
        assert!(matches!(result, Err(TokenError::JwksFetch(_))));
    }
}
