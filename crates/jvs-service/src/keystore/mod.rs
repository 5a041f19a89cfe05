//! Signing key store abstraction.
//!
//! The service treats the asymmetric KMS as an opaque capability: it can
//! enumerate and mutate the versions of a logical key, read and CAS-update a
//! small label map on the key, and ask a specific version to sign or expose
//! its public half. [`memory::MemoryKeyStore`] implements the capability
//! with local ECDSA P-256 keypairs.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::errors::JvsError;

/// Path segment separating a key name from its version ordinal.
pub const VERSION_NAME_INFIX: &str = "cryptoKeyVersions";

/// Lifecycle state of a key version. Transitions only move forward in the
/// order `ENABLED -> DISABLED -> DESTROY_SCHEDULED -> DESTROYED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionState {
    PendingGeneration,
    PendingImport,
    Enabled,
    Disabled,
    DestroyScheduled,
    Destroyed,
    ImportFailed,
}

impl VersionState {
    /// True for versions still being materialized by the backing store.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::PendingGeneration | Self::PendingImport)
    }
}

/// A single version of a logical signing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVersion {
    /// Fully-qualified name: `<keyName>/cryptoKeyVersions/<n>`.
    pub name: String,
    pub state: VersionState,
    pub create_time: DateTime<Utc>,
}

impl KeyVersion {
    /// The numeric ordinal from the last path segment, if well-formed.
    #[must_use]
    pub fn ordinal(&self) -> Option<u64> {
        version_ordinal(&self.name)
    }

    /// Age relative to `now`, measured from creation.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.create_time
    }
}

/// Build a fully-qualified version name.
#[must_use]
pub fn version_name(key_name: &str, ordinal: u64) -> String {
    format!("{key_name}/{VERSION_NAME_INFIX}/{ordinal}")
}

/// Parse the version ordinal off a fully-qualified version name.
#[must_use]
pub fn version_ordinal(version_name: &str) -> Option<u64> {
    let mut segments = version_name.rsplit('/');
    let ordinal = segments.next()?.parse().ok()?;
    (segments.next() == Some(VERSION_NAME_INFIX)).then_some(ordinal)
}

/// Parse the parent key name off a fully-qualified version name.
#[must_use]
pub fn parent_key_name(version_name: &str) -> Option<&str> {
    let (parent, infix_and_ordinal) = version_name.rsplit_once('/').and_then(|(rest, ordinal)| {
        let (parent, infix) = rest.rsplit_once('/')?;
        Some((parent, (infix, ordinal)))
    })?;
    let (infix, ordinal) = infix_and_ordinal;
    (infix == VERSION_NAME_INFIX && ordinal.parse::<u64>().is_ok()).then_some(parent)
}

/// Point-in-time view of a key's labels, with an opaque etag for
/// compare-and-set updates.
#[derive(Debug, Clone)]
pub struct LabelSnapshot {
    pub labels: HashMap<String, String>,
    pub etag: String,
}

/// Capability interface over the asymmetric key management backend.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// List all versions of a key. A key with no versions yields an empty
    /// list.
    async fn list_versions(&self, key_name: &str) -> Result<Vec<KeyVersion>, JvsError>;

    /// Append a new version with the same algorithm as its siblings. The
    /// store assigns the next ordinal and returns the created version.
    async fn create_version(&self, key_name: &str) -> Result<KeyVersion, JvsError>;

    /// Transition an `ENABLED` version to `DISABLED`.
    async fn disable_version(&self, version_name: &str) -> Result<(), JvsError>;

    /// Transition a `DISABLED` version to `DESTROY_SCHEDULED`.
    async fn destroy_version(&self, version_name: &str) -> Result<(), JvsError>;

    /// Read the key's label map together with its current etag.
    async fn get_labels(&self, key_name: &str) -> Result<LabelSnapshot, JvsError>;

    /// Replace the key's labels if `expected_etag` still matches. The update
    /// is restricted to the labels field and may only change the primary
    /// pointer; writes that would alter other labels are rejected.
    async fn set_labels(
        &self,
        key_name: &str,
        labels: HashMap<String, String>,
        expected_etag: &str,
    ) -> Result<(), JvsError>;

    /// Fetch the PEM-encoded PKIX public key of a version.
    async fn public_key_pem(&self, version_name: &str) -> Result<String, JvsError>;

    /// Sign `message` with the named version. The version must be `ENABLED`.
    /// The signature is the raw ES256 form (r || s, 64 bytes).
    async fn sign(&self, version_name: &str, message: &[u8]) -> Result<Vec<u8>, JvsError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_version_name_round_trip() {
        let name = version_name("projects/p/keys/signing", 7);
        assert_eq!(name, "projects/p/keys/signing/cryptoKeyVersions/7");
        assert_eq!(version_ordinal(&name), Some(7));
        assert_eq!(parent_key_name(&name), Some("projects/p/keys/signing"));
    }

    #[test]
    fn test_version_ordinal_rejects_malformed_names() {
        for bad in [
            "",
            "no-slashes",
            "keys/k/cryptoKeyVersions/not-a-number",
            "keys/k/somethingElse/3",
            "cryptoKeyVersions/3",
        ] {
            assert_eq!(version_ordinal(bad), None, "{bad}");
        }
    }

    #[test]
    fn test_parent_key_name_rejects_malformed_names() {
        for bad in ["", "keys/k/3", "keys/k/somethingElse/3", "cryptoKeyVersions/3"] {
            assert_eq!(parent_key_name(bad), None, "{bad}");
        }
    }

    #[test]
    fn test_version_state_is_pending() {
        assert!(VersionState::PendingGeneration.is_pending());
        assert!(VersionState::PendingImport.is_pending());
        assert!(!VersionState::Enabled.is_pending());
        assert!(!VersionState::Disabled.is_pending());
        assert!(!VersionState::DestroyScheduled.is_pending());
    }

    #[test]
    fn test_key_version_age() {
        use chrono::TimeZone;
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let version = KeyVersion {
            name: version_name("keys/k", 1),
            state: VersionState::Enabled,
            create_time: created,
        };

        let now = created + chrono::Duration::seconds(90);
        assert_eq!(version.age(now), chrono::Duration::seconds(90));
    }
}
