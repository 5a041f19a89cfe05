//! Wire types for the service surface.
//!
//! Field names are stable: they match the `JVSService`,
//! `CertificateActionService`, and `JVSPlugin` message shapes that existing
//! clients already speak.

use serde::{Deserialize, Serialize};

pub use common::claims::{Justification, JustificationClaims};
pub use common::jwks::{JsonWebKey, Jwks};

/// Request body for minting a justification token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateJustificationRequest {
    pub justifications: Vec<Justification>,
    /// Requested token lifetime in seconds. Zero, negative, or absent means
    /// the configured default.
    #[serde(default)]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub audiences: Vec<String>,
    /// Overrides the token subject; empty inherits the requestor.
    #[serde(default)]
    pub subject: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJustificationResponse {
    pub token: String,
}

/// Operator override for a specific key version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateAction {
    Rotate,
    ForceDisable,
    ForceDestroy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Fully-qualified key version name the action applies to.
    pub version: String,
    pub action: CertificateAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateActionRequest {
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateActionResponse {}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_create_justification_request_minimal() {
        let json = r#"{"justifications":[{"category":"explanation","value":"fixing issue 42"}]}"#;
        let request: CreateJustificationRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.justifications.len(), 1);
        assert!(request.ttl.is_none());
        assert!(request.audiences.is_empty());
        assert!(request.subject.is_empty());
    }

    #[test]
    fn test_create_justification_request_full() {
        let json = r#"{
            "justifications": [{"category": "explanation", "value": "fixing issue 42"}],
            "ttl": 3600,
            "audiences": ["svc-a", "svc-b"],
            "subject": "override@example.com"
        }"#;
        let request: CreateJustificationRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.ttl, Some(3600));
        assert_eq!(request.audiences, vec!["svc-a", "svc-b"]);
        assert_eq!(request.subject, "override@example.com");
    }

    #[test]
    fn test_certificate_action_wire_names() {
        let json = r#"{
            "actions": [
                {"version": "keys/k/cryptoKeyVersions/1", "action": "ROTATE"},
                {"version": "keys/k/cryptoKeyVersions/2", "action": "FORCE_DISABLE"},
                {"version": "keys/k/cryptoKeyVersions/3", "action": "FORCE_DESTROY"}
            ]
        }"#;
        let request: CertificateActionRequest = serde_json::from_str(json).unwrap();

        let actions: Vec<CertificateAction> =
            request.actions.iter().map(|a| a.action).collect();
        assert_eq!(
            actions,
            vec![
                CertificateAction::Rotate,
                CertificateAction::ForceDisable,
                CertificateAction::ForceDestroy,
            ]
        );
    }

    #[test]
    fn test_certificate_action_response_is_empty_object() {
        let json = serde_json::to_string(&CertificateActionResponse {}).unwrap();
        assert_eq!(json, "{}");
    }
}
