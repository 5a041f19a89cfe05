//! In-memory [`KeyStore`] backed by local ECDSA P-256 keypairs.
//!
//! Used by the binary for local operation and by tests. Signing uses the
//! fixed-width (r || s) ECDSA form so signatures drop straight into a
//! compact JWS. Lifecycle transitions are enforced here: a version never
//! moves backwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use p256::pkcs8::EncodePublicKey;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{
    parent_key_name, version_name, version_ordinal, KeyStore, KeyVersion, LabelSnapshot,
    VersionState,
};
use crate::clock::{system_clock, Clock};
use crate::errors::JvsError;

struct VersionRecord {
    state: VersionState,
    create_time: DateTime<Utc>,
    pkcs8: Vec<u8>,
}

#[derive(Default)]
struct KeyRecord {
    labels: HashMap<String, String>,
    etag: u64,
    versions: BTreeMap<u64, VersionRecord>,
}

/// An in-memory key store. Cheap to clone handles via `Arc`.
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, KeyRecord>>,
    clock: Clock,
    rng: SystemRandom,
}

impl MemoryKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Build a store whose version create times come from `clock`.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            clock,
            rng: SystemRandom::new(),
        }
    }

    fn generate_pkcs8(&self) -> Result<Vec<u8>, JvsError> {
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &self.rng)
            .map_err(|e| {
                tracing::error!(target: "keystore", error = ?e, "keypair generation failed");
                JvsError::KeyStore("key generation failed".to_string())
            })?;
        Ok(document.as_ref().to_vec())
    }

    fn key_pair(&self, pkcs8: &[u8]) -> Result<EcdsaKeyPair, JvsError> {
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &self.rng).map_err(|e| {
            tracing::error!(target: "keystore", error = ?e, "keypair parsing failed");
            JvsError::KeyStore("stored key material is invalid".to_string())
        })
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn locate(version_name: &str) -> Result<(&str, u64), JvsError> {
    match (parent_key_name(version_name), version_ordinal(version_name)) {
        (Some(parent), Some(ordinal)) => Ok((parent, ordinal)),
        _ => Err(JvsError::KeyStore(format!(
            "malformed key version name {version_name}"
        ))),
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn list_versions(&self, key_name: &str) -> Result<Vec<KeyVersion>, JvsError> {
        let keys = self.keys.read().await;
        let Some(record) = keys.get(key_name) else {
            return Ok(Vec::new());
        };

        Ok(record
            .versions
            .iter()
            .map(|(ordinal, version)| KeyVersion {
                name: version_name(key_name, *ordinal),
                state: version.state,
                create_time: version.create_time,
            })
            .collect())
    }

    async fn create_version(&self, key_name: &str) -> Result<KeyVersion, JvsError> {
        let pkcs8 = self.generate_pkcs8()?;
        let create_time = (self.clock)();

        let mut keys = self.keys.write().await;
        let record = keys.entry(key_name.to_string()).or_default();
        let ordinal = record
            .versions
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
            .saturating_add(1);

        record.versions.insert(
            ordinal,
            VersionRecord {
                state: VersionState::Enabled,
                create_time,
                pkcs8,
            },
        );

        Ok(KeyVersion {
            name: version_name(key_name, ordinal),
            state: VersionState::Enabled,
            create_time,
        })
    }

    async fn disable_version(&self, version_name: &str) -> Result<(), JvsError> {
        let (key_name, ordinal) = locate(version_name)?;

        let mut keys = self.keys.write().await;
        let version = keys
            .get_mut(key_name)
            .and_then(|record| record.versions.get_mut(&ordinal))
            .ok_or_else(|| JvsError::KeyStore(format!("unknown key version {version_name}")))?;

        if version.state != VersionState::Enabled {
            return Err(JvsError::KeyStore(format!(
                "key version {version_name} is not enabled"
            )));
        }

        version.state = VersionState::Disabled;
        Ok(())
    }

    async fn destroy_version(&self, version_name: &str) -> Result<(), JvsError> {
        let (key_name, ordinal) = locate(version_name)?;

        let mut keys = self.keys.write().await;
        let version = keys
            .get_mut(key_name)
            .and_then(|record| record.versions.get_mut(&ordinal))
            .ok_or_else(|| JvsError::KeyStore(format!("unknown key version {version_name}")))?;

        if version.state != VersionState::Disabled {
            return Err(JvsError::KeyStore(format!(
                "key version {version_name} is not disabled"
            )));
        }

        version.state = VersionState::DestroyScheduled;
        Ok(())
    }

    async fn get_labels(&self, key_name: &str) -> Result<LabelSnapshot, JvsError> {
        let keys = self.keys.read().await;
        let Some(record) = keys.get(key_name) else {
            return Ok(LabelSnapshot {
                labels: HashMap::new(),
                etag: "0".to_string(),
            });
        };

        Ok(LabelSnapshot {
            labels: record.labels.clone(),
            etag: record.etag.to_string(),
        })
    }

    async fn set_labels(
        &self,
        key_name: &str,
        labels: HashMap<String, String>,
        expected_etag: &str,
    ) -> Result<(), JvsError> {
        let mut keys = self.keys.write().await;
        let record = keys.entry(key_name.to_string()).or_default();

        if record.etag.to_string() != expected_etag {
            return Err(JvsError::KeyStore(format!(
                "concurrent label update on key {key_name}"
            )));
        }

        // Only the primary pointer may change through this path.
        let touched_other_label = record
            .labels
            .keys()
            .chain(labels.keys())
            .filter(|label| label.as_str() != crate::services::primary::PRIMARY_LABEL_KEY)
            .any(|label| record.labels.get(label) != labels.get(label));
        if touched_other_label {
            return Err(JvsError::KeyStore(format!(
                "label update on key {key_name} may only modify the primary pointer"
            )));
        }

        record.labels = labels;
        record.etag = record.etag.saturating_add(1);
        Ok(())
    }

    async fn public_key_pem(&self, version_name: &str) -> Result<String, JvsError> {
        let (key_name, ordinal) = locate(version_name)?;

        let keys = self.keys.read().await;
        let version = keys
            .get(key_name)
            .and_then(|record| record.versions.get(&ordinal))
            .ok_or_else(|| JvsError::KeyStore(format!("unknown key version {version_name}")))?;

        if version.state == VersionState::Destroyed {
            return Err(JvsError::KeyStore(format!(
                "key version {version_name} is destroyed"
            )));
        }

        let key_pair = self.key_pair(&version.pkcs8)?;
        let public_key =
            p256::PublicKey::from_sec1_bytes(key_pair.public_key().as_ref()).map_err(|e| {
                tracing::error!(target: "keystore", error = %e, "public key extraction failed");
                JvsError::KeyStore("stored key material is invalid".to_string())
            })?;

        public_key
            .to_public_key_pem(p256::pkcs8::LineEnding::LF)
            .map_err(|e| {
                tracing::error!(target: "keystore", error = %e, "public key encoding failed");
                JvsError::KeyStore("public key encoding failed".to_string())
            })
    }

    async fn sign(&self, version_name: &str, message: &[u8]) -> Result<Vec<u8>, JvsError> {
        let (key_name, ordinal) = locate(version_name)?;

        let keys = self.keys.read().await;
        let version = keys
            .get(key_name)
            .and_then(|record| record.versions.get(&ordinal))
            .ok_or_else(|| JvsError::KeyStore(format!("unknown key version {version_name}")))?;

        if version.state != VersionState::Enabled {
            return Err(JvsError::KeyStore(format!(
                "key version {version_name} is not enabled"
            )));
        }

        let key_pair = self.key_pair(&version.pkcs8)?;
        let signature = key_pair.sign(&self.rng, message).map_err(|e| {
            tracing::error!(target: "keystore", error = ?e, "signing failed");
            JvsError::KeyStore("signing failed".to_string())
        })?;

        Ok(signature.as_ref().to_vec())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::services::primary;
    use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_FIXED};

    const KEY: &str = "projects/test/keys/jvs-signer";

    #[tokio::test]
    async fn test_list_versions_empty_for_unknown_key() {
        let store = MemoryKeyStore::new();
        assert!(store.list_versions(KEY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_version_assigns_sequential_ordinals() {
        let store = MemoryKeyStore::new();

        let first = store.create_version(KEY).await.unwrap();
        let second = store.create_version(KEY).await.unwrap();

        assert_eq!(first.name, format!("{KEY}/cryptoKeyVersions/1"));
        assert_eq!(second.name, format!("{KEY}/cryptoKeyVersions/2"));
        assert_eq!(first.state, VersionState::Enabled);

        let versions = store.list_versions(KEY).await.unwrap();
        assert_eq!(versions.len(), 2);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions_enforced() {
        let store = MemoryKeyStore::new();
        let version = store.create_version(KEY).await.unwrap();

        // Destroy before disable is refused.
        assert!(store.destroy_version(&version.name).await.is_err());

        store.disable_version(&version.name).await.unwrap();
        // Disabling twice is refused.
        assert!(store.disable_version(&version.name).await.is_err());

        store.destroy_version(&version.name).await.unwrap();
        let versions = store.list_versions(KEY).await.unwrap();
        assert_eq!(
            versions.first().unwrap().state,
            VersionState::DestroyScheduled
        );
    }

    #[tokio::test]
    async fn test_sign_requires_enabled_version() {
        let store = MemoryKeyStore::new();
        let version = store.create_version(KEY).await.unwrap();

        assert!(store.sign(&version.name, b"payload").await.is_ok());

        store.disable_version(&version.name).await.unwrap();
        assert!(store.sign(&version.name, b"payload").await.is_err());
    }

    #[tokio::test]
    async fn test_signature_verifies_against_published_public_key() {
        let store = MemoryKeyStore::new();
        let version = store.create_version(KEY).await.unwrap();

        let message = b"header.payload";
        let signature = store.sign(&version.name, message).await.unwrap();
        assert_eq!(signature.len(), 64, "ES256 signatures are raw r||s");

        let pem = store.public_key_pem(&version.name).await.unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

        use p256::elliptic_curve::sec1::ToEncodedPoint;
        use p256::pkcs8::DecodePublicKey;
        let public_key = p256::PublicKey::from_public_key_pem(&pem).unwrap();
        let point = public_key.to_encoded_point(false);

        let verifier = UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, point.as_bytes());
        verifier.verify(message, &signature).unwrap();
    }

    #[tokio::test]
    async fn test_labels_cas_round_trip() {
        let store = MemoryKeyStore::new();
        store.create_version(KEY).await.unwrap();

        let snapshot = store.get_labels(KEY).await.unwrap();
        assert!(snapshot.labels.is_empty());

        let mut labels = snapshot.labels.clone();
        labels.insert(primary::PRIMARY_LABEL_KEY.to_string(), primary::encode(1));
        store.set_labels(KEY, labels.clone(), &snapshot.etag).await.unwrap();

        let updated = store.get_labels(KEY).await.unwrap();
        assert_eq!(
            updated.labels.get(primary::PRIMARY_LABEL_KEY),
            Some(&"ver_1".to_string())
        );
        assert_ne!(updated.etag, snapshot.etag);

        // Stale etag is refused.
        let result = store.set_labels(KEY, labels, &snapshot.etag).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_set_labels_rejects_non_primary_changes() {
        let store = MemoryKeyStore::new();
        store.create_version(KEY).await.unwrap();

        let snapshot = store.get_labels(KEY).await.unwrap();
        let mut labels = snapshot.labels.clone();
        labels.insert("owner".to_string(), "someone".to_string());

        let result = store.set_labels(KEY, labels, &snapshot.etag).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_time_comes_from_injected_clock() {
        use crate::clock::ManualClock;
        use chrono::TimeZone;

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let manual = ManualClock::new(start);
        let store = MemoryKeyStore::with_clock(manual.clock());

        let first = store.create_version(KEY).await.unwrap();
        manual.advance(chrono::Duration::seconds(5));
        let second = store.create_version(KEY).await.unwrap();

        assert_eq!(first.create_time, start);
        assert_eq!(second.create_time, start + chrono::Duration::seconds(5));
    }
}
