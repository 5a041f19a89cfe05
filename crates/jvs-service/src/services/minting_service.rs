//! Request validation and token minting.
//!
//! A request passes through, in order: justification presence, per-value
//! byte limits, category lookup, validator approval, audience byte limits,
//! and TTL bounding. Accepted justifications absorb their validator's
//! annotations and appear in the token in request order. The token is a
//! compact JWS assembled here and signed by the current primary version
//! through the key store, since a KMS-backed signer only exposes a signing
//! operation, not key material.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::errors::JvsError;
use crate::models::{CreateJustificationRequest, JustificationClaims};
use crate::services::signer_service::SignerService;
use crate::validators::ValidatorRegistry;

/// Minting-relevant configuration, extracted from [`Config`].
#[derive(Debug, Clone)]
pub struct MintOptions {
    pub issuer: String,
    pub default_ttl: Duration,
    pub max_ttl: Duration,
    pub default_audience: String,
    pub max_justification_bytes: usize,
    pub max_audience_bytes: usize,
}

impl From<&Config> for MintOptions {
    fn from(config: &Config) -> Self {
        Self {
            issuer: config.issuer.clone(),
            default_ttl: config.default_ttl,
            max_ttl: config.max_ttl,
            default_audience: config.default_audience.clone(),
            max_justification_bytes: config.max_justification_bytes,
            max_audience_bytes: config.max_audience_bytes,
        }
    }
}

#[derive(Serialize)]
struct JoseHeader<'a> {
    typ: &'static str,
    alg: &'static str,
    kid: &'a str,
}

/// Orchestrates validation, claim construction, and signing for a single
/// mint request.
pub struct MintingService {
    registry: Arc<ValidatorRegistry>,
    signer: Arc<SignerService>,
    options: MintOptions,
    clock: Clock,
}

impl MintingService {
    #[must_use]
    pub fn new(
        registry: Arc<ValidatorRegistry>,
        signer: Arc<SignerService>,
        options: MintOptions,
        clock: Clock,
    ) -> Self {
        Self {
            registry,
            signer,
            options,
            clock,
        }
    }

    /// Validate `request` and mint a signed justification token.
    ///
    /// `requestor` is the principal extracted from the caller's credential
    /// and may be empty; it becomes the `req` claim and, when the request
    /// does not override the subject, the `sub` claim.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` - contract violations; the message is safe to
    ///   echo to the caller
    /// - `FailedPrecondition` / `KeyStore` / `Internal` - signer or backend
    ///   failures, surfaced to the wire as internal
    pub async fn create_token(
        &self,
        requestor: &str,
        request: CreateJustificationRequest,
    ) -> Result<String, JvsError> {
        if request.justifications.is_empty() {
            return Err(JvsError::InvalidArgument(
                "failed to validate request: no justifications specified".to_string(),
            ));
        }

        let mut justifications = Vec::with_capacity(request.justifications.len());
        let mut rejections: Vec<String> = Vec::new();

        for mut justification in request.justifications {
            if justification.value.len() > self.options.max_justification_bytes {
                return Err(JvsError::InvalidArgument(format!(
                    "justification value exceeds maximum length of {} bytes",
                    self.options.max_justification_bytes
                )));
            }

            let Some(validator) = self.registry.get(&justification.category) else {
                return Err(JvsError::InvalidArgument(format!(
                    "category \"{}\" is not supported",
                    justification.category
                )));
            };

            let result = validator.validate(&justification).await.map_err(|e| {
                JvsError::Internal(format!(
                    "validator for category \"{}\" failed: {e}",
                    justification.category
                ))
            })?;

            if result.valid {
                justification.annotation.extend(result.annotations);
                justifications.push(justification);
            } else {
                let mut message = format!(
                    "failed to validate justification for category \"{}\": {}",
                    justification.category,
                    result.errors.join(", ")
                );
                if !result.warnings.is_empty() {
                    message.push_str(&format!(" (warnings: {})", result.warnings.join(", ")));
                }
                rejections.push(message);
            }
        }

        if !rejections.is_empty() {
            return Err(JvsError::InvalidArgument(rejections.join("; ")));
        }

        for audience in &request.audiences {
            if audience.len() > self.options.max_audience_bytes {
                return Err(JvsError::InvalidArgument(format!(
                    "audience exceeds maximum length of {} bytes",
                    self.options.max_audience_bytes
                )));
            }
        }

        let effective_ttl = self.effective_ttl(request.ttl)?;

        let subject = if request.subject.is_empty() {
            requestor.to_string()
        } else {
            request.subject
        };
        let audiences = if request.audiences.is_empty() {
            vec![self.options.default_audience.clone()]
        } else {
            request.audiences
        };

        let iat = (self.clock)().timestamp();
        let ttl_seconds = i64::try_from(effective_ttl.as_secs())
            .map_err(|_| JvsError::Internal("effective ttl overflows".to_string()))?;

        let claims = JustificationClaims {
            iss: self.options.issuer.clone(),
            sub: subject,
            aud: audiences,
            exp: iat + ttl_seconds,
            nbf: iat,
            iat,
            jti: Uuid::new_v4().to_string(),
            justs: justifications,
            req: requestor.to_string(),
        };

        self.sign(&claims).await
    }

    fn effective_ttl(&self, requested_seconds: Option<i64>) -> Result<Duration, JvsError> {
        let requested_seconds = requested_seconds.unwrap_or(0);
        if requested_seconds <= 0 {
            return Ok(self.options.default_ttl);
        }

        let requested = Duration::from_secs(requested_seconds.unsigned_abs());
        if requested > self.options.max_ttl {
            return Err(JvsError::InvalidArgument(format!(
                "requested ttl ({}) cannot be greater than max tll ({})",
                humantime::format_duration(requested),
                humantime::format_duration(self.options.max_ttl)
            )));
        }
        Ok(requested)
    }

    async fn sign(&self, claims: &JustificationClaims) -> Result<String, JvsError> {
        let signer = self.signer.current().await?;

        let header = JoseHeader {
            typ: "JWT",
            alg: "ES256",
            kid: signer.version_name(),
        };

        let header_json = serde_json::to_vec(&header)
            .map_err(|e| JvsError::Internal(format!("header encoding failed: {e}")))?;
        let claims_json = serde_json::to_vec(claims)
            .map_err(|e| JvsError::Internal(format!("claims encoding failed: {e}")))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );

        let signature = signer.sign(signing_input.as_bytes()).await?;
        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::keystore::memory::MemoryKeyStore;
    use crate::keystore::KeyStore;
    use crate::models::Justification;
    use crate::services::primary;
    use crate::validators::{ExplanationValidator, UiData, ValidationResult, Validator};
    use async_trait::async_trait;
    use common::claims::peek_header;
    use std::collections::HashMap;

    const KEY: &str = "projects/test/keys/jvs-signer";

    fn options() -> MintOptions {
        MintOptions {
            issuer: "test-iss".to_string(),
            default_ttl: Duration::from_secs(900),
            max_ttl: Duration::from_secs(3600),
            default_audience: "dev.abcxyz.jvs".to_string(),
            max_justification_bytes: 4000,
            max_audience_bytes: 1000,
        }
    }

    async fn minting_service(registry: ValidatorRegistry) -> MintingService {
        let keystore = Arc::new(MemoryKeyStore::new());
        keystore.create_version(KEY).await.unwrap();
        let snapshot = keystore.get_labels(KEY).await.unwrap();
        let labels = HashMap::from([(
            primary::PRIMARY_LABEL_KEY.to_string(),
            primary::encode(1),
        )]);
        keystore.set_labels(KEY, labels, &snapshot.etag).await.unwrap();

        let signer = Arc::new(SignerService::new(
            Arc::clone(&keystore) as Arc<dyn KeyStore>,
            KEY.to_string(),
            Duration::from_secs(300),
        ));

        MintingService::new(
            Arc::new(registry),
            signer,
            options(),
            crate::clock::system_clock(),
        )
    }

    fn explanation_request(value: &str, ttl: Option<i64>) -> CreateJustificationRequest {
        CreateJustificationRequest {
            justifications: vec![Justification::new("explanation", value)],
            ttl,
            audiences: vec![],
            subject: String::new(),
        }
    }

    fn decode_claims(token: &str) -> JustificationClaims {
        let payload = token.split('.').nth(1).unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(payload).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_mint_happy_path_claims() {
        let service = minting_service(ValidatorRegistry::new()).await;
        let token = service
            .create_token("u@example.com", explanation_request("fixing issue 42", Some(3600)))
            .await
            .unwrap();

        let header = peek_header(&token).unwrap();
        assert_eq!(header.alg, "ES256");
        assert_eq!(header.typ.as_deref(), Some("JWT"));
        let expected_kid = format!("{KEY}/cryptoKeyVersions/1");
        assert_eq!(header.kid.as_deref(), Some(expected_kid.as_str()));

        let claims = decode_claims(&token);
        assert_eq!(claims.iss, "test-iss");
        assert_eq!(claims.sub, "u@example.com");
        assert_eq!(claims.req, "u@example.com");
        assert_eq!(claims.aud, vec!["dev.abcxyz.jvs".to_string()]);
        assert_eq!(claims.exp - claims.iat, 3600);
        assert_eq!(claims.nbf, claims.iat);
        assert!(!claims.jti.is_empty());
        assert_eq!(claims.justs.len(), 1);
        assert_eq!(claims.justs[0].category, "explanation");
        assert_eq!(claims.justs[0].value, "fixing issue 42");
    }

    #[tokio::test]
    async fn test_mint_unique_jti_per_token() {
        let service = minting_service(ValidatorRegistry::new()).await;
        let first = service
            .create_token("u@example.com", explanation_request("a", None))
            .await
            .unwrap();
        let second = service
            .create_token("u@example.com", explanation_request("a", None))
            .await
            .unwrap();

        assert_ne!(decode_claims(&first).jti, decode_claims(&second).jti);
    }

    #[tokio::test]
    async fn test_mint_rejects_empty_justifications() {
        let service = minting_service(ValidatorRegistry::new()).await;
        let request = CreateJustificationRequest::default();

        let result = service.create_token("u@example.com", request).await;
        match result {
            Err(JvsError::InvalidArgument(message)) => {
                assert_eq!(message, "failed to validate request: no justifications specified");
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mint_rejects_empty_explanation() {
        let service = minting_service(ValidatorRegistry::new()).await;

        let result = service
            .create_token("u@example.com", explanation_request("", Some(3600)))
            .await;
        match result {
            Err(JvsError::InvalidArgument(message)) => {
                assert!(message.contains("explanation cannot be empty"), "{message}");
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mint_rejects_unknown_category() {
        let service = minting_service(ValidatorRegistry::new()).await;
        let request = CreateJustificationRequest {
            justifications: vec![Justification::new("jira", "ABC-1")],
            ..Default::default()
        };

        let result = service.create_token("u@example.com", request).await;
        match result {
            Err(JvsError::InvalidArgument(message)) => {
                assert!(message.contains(r#"category "jira" is not supported"#), "{message}");
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mint_rejects_ttl_over_max() {
        let service = minting_service(ValidatorRegistry::new()).await;

        let result = service
            .create_token("u@example.com", explanation_request("ok", Some(36_000)))
            .await;
        match result {
            Err(JvsError::InvalidArgument(message)) => {
                assert!(
                    message.contains("requested ttl (10h) cannot be greater than max tll (1h)"),
                    "{message}"
                );
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mint_non_positive_ttl_uses_default() {
        let service = minting_service(ValidatorRegistry::new()).await;

        for ttl in [None, Some(0), Some(-5)] {
            let token = service
                .create_token("u@example.com", explanation_request("ok", ttl))
                .await
                .unwrap();
            let claims = decode_claims(&token);
            assert_eq!(claims.exp - claims.iat, 900, "ttl {ttl:?}");
        }
    }

    #[tokio::test]
    async fn test_mint_ttl_at_max_is_accepted() {
        let service = minting_service(ValidatorRegistry::new()).await;

        let token = service
            .create_token("u@example.com", explanation_request("ok", Some(3600)))
            .await
            .unwrap();
        assert_eq!(decode_claims(&token).exp - decode_claims(&token).iat, 3600);
    }

    #[tokio::test]
    async fn test_mint_rejects_oversized_justification_value() {
        let service = minting_service(ValidatorRegistry::new()).await;
        let oversized = "x".repeat(4001);

        let result = service
            .create_token("u@example.com", explanation_request(&oversized, None))
            .await;
        match result {
            Err(JvsError::InvalidArgument(message)) => {
                assert!(
                    message.contains("justification value exceeds maximum length of 4000 bytes"),
                    "{message}"
                );
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mint_rejects_oversized_audience() {
        let service = minting_service(ValidatorRegistry::new()).await;
        let request = CreateJustificationRequest {
            justifications: vec![Justification::new("explanation", "ok")],
            audiences: vec!["a".repeat(1001)],
            ..Default::default()
        };

        let result = service.create_token("u@example.com", request).await;
        match result {
            Err(JvsError::InvalidArgument(message)) => {
                assert!(
                    message.contains("audience exceeds maximum length of 1000 bytes"),
                    "{message}"
                );
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mint_subject_override_and_audiences() {
        let service = minting_service(ValidatorRegistry::new()).await;
        let request = CreateJustificationRequest {
            justifications: vec![Justification::new("explanation", "ok")],
            ttl: None,
            audiences: vec!["svc-a".to_string(), "svc-b".to_string()],
            subject: "override@example.com".to_string(),
        };

        let token = service.create_token("u@example.com", request).await.unwrap();
        let claims = decode_claims(&token);

        assert_eq!(claims.sub, "override@example.com");
        // The requestor is still recorded even when the subject is overridden.
        assert_eq!(claims.req, "u@example.com");
        assert_eq!(claims.aud, vec!["svc-a".to_string(), "svc-b".to_string()]);
    }

    #[tokio::test]
    async fn test_mint_empty_requestor_and_subject_is_permitted() {
        let service = minting_service(ValidatorRegistry::new()).await;

        let token = service
            .create_token("", explanation_request("ok", None))
            .await
            .unwrap();
        let claims = decode_claims(&token);
        assert!(claims.sub.is_empty());
        assert!(claims.req.is_empty());
    }

    struct TicketValidator;

    #[async_trait]
    impl Validator for TicketValidator {
        async fn validate(
            &self,
            justification: &Justification,
        ) -> Result<ValidationResult, JvsError> {
            let mut result = ValidationResult::valid();
            result.annotations.insert(
                "url".to_string(),
                format!("https://issues.example.com/{}", justification.value),
            );
            Ok(result)
        }

        async fn ui_data(&self) -> Result<UiData, JvsError> {
            Ok(UiData {
                display_name: "Ticket".to_string(),
                hint: "An issue tracker id".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_mint_merges_validator_annotations() {
        let mut registry = ValidatorRegistry::new();
        registry.register("jira", Arc::new(TicketValidator));
        let service = minting_service(registry).await;

        let request = CreateJustificationRequest {
            justifications: vec![Justification::new("jira", "ABC-123")],
            ..Default::default()
        };

        let token = service.create_token("u@example.com", request).await.unwrap();
        let claims = decode_claims(&token);

        assert_eq!(
            claims.justs[0].annotation.get("url"),
            Some(&"https://issues.example.com/ABC-123".to_string())
        );
    }

    #[tokio::test]
    async fn test_mint_preserves_justification_order() {
        let mut registry = ValidatorRegistry::new();
        registry.register("jira", Arc::new(TicketValidator));
        let service = minting_service(registry).await;

        let request = CreateJustificationRequest {
            justifications: vec![
                Justification::new("jira", "ABC-1"),
                Justification::new("explanation", "manual check"),
                Justification::new("jira", "ABC-2"),
            ],
            ..Default::default()
        };

        let token = service.create_token("u@example.com", request).await.unwrap();
        let claims = decode_claims(&token);

        let order: Vec<(&str, &str)> = claims
            .justs
            .iter()
            .map(|j| (j.category.as_str(), j.value.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("jira", "ABC-1"), ("explanation", "manual check"), ("jira", "ABC-2")]
        );
    }

    struct WarningValidator;

    #[async_trait]
    impl Validator for WarningValidator {
        async fn validate(&self, _: &Justification) -> Result<ValidationResult, JvsError> {
            Ok(ValidationResult {
                valid: false,
                warnings: vec!["ticket is closed".to_string()],
                errors: vec!["ticket not assigned to requestor".to_string()],
                annotations: HashMap::new(),
            })
        }

        async fn ui_data(&self) -> Result<UiData, JvsError> {
            Ok(UiData {
                display_name: "Warning".to_string(),
                hint: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_mint_reports_validator_errors_and_warnings() {
        let mut registry = ValidatorRegistry::new();
        registry.register("ticket", Arc::new(WarningValidator));
        let service = minting_service(registry).await;

        let request = CreateJustificationRequest {
            justifications: vec![Justification::new("ticket", "ABC-9")],
            ..Default::default()
        };

        let result = service.create_token("u@example.com", request).await;
        match result {
            Err(JvsError::InvalidArgument(message)) => {
                assert!(message.contains("ticket not assigned to requestor"), "{message}");
                assert!(message.contains("warnings: ticket is closed"), "{message}");
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    struct BrokenValidator;

    #[async_trait]
    impl Validator for BrokenValidator {
        async fn validate(&self, _: &Justification) -> Result<ValidationResult, JvsError> {
            Err(JvsError::Internal("plugin transport closed".to_string()))
        }

        async fn ui_data(&self) -> Result<UiData, JvsError> {
            Err(JvsError::Internal("plugin transport closed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_validator_transport_failure_is_internal() {
        let mut registry = ValidatorRegistry::new();
        registry.register("broken", Arc::new(BrokenValidator));
        let service = minting_service(registry).await;

        let request = CreateJustificationRequest {
            justifications: vec![Justification::new("broken", "whatever")],
            ..Default::default()
        };

        let result = service.create_token("u@example.com", request).await;
        assert!(matches!(result, Err(JvsError::Internal(_))));
    }
}
