//! JWKS assembly and caching.
//!
//! The published document contains exactly the versions that are `ENABLED`
//! at read time, keyed by their fully-qualified version names and sorted
//! ascending by `kid` so the serialized body is byte-stable. Per-version
//! public keys are fetched concurrently; any single failure fails the whole
//! response rather than emitting a partial key set, and a previously cached
//! body is not evicted by a failed refresh.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::DecodePublicKey;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Expiring;
use crate::errors::JvsError;
use crate::keystore::{KeyStore, VersionState};
use crate::models::{JsonWebKey, Jwks};

/// Lists enabled versions and serves their public halves as a cached,
/// serialized JWKS body.
pub struct JwksService {
    keystore: Arc<dyn KeyStore>,
    key_name: String,
    cache: Expiring<String, Arc<String>>,
}

impl JwksService {
    /// `cache_timeout` of zero disables caching.
    #[must_use]
    pub fn new(keystore: Arc<dyn KeyStore>, key_name: String, cache_timeout: Duration) -> Self {
        Self {
            keystore,
            key_name,
            cache: Expiring::new(cache_timeout),
        }
    }

    /// The serialized JWKS body. Served from cache when fresh; otherwise
    /// rebuilt from the key store.
    ///
    /// # Errors
    ///
    /// - `KeyStore` - listing or fetching a public key failed
    /// - `Internal` - a public key is not ECDSA P-256
    pub async fn jwks_body(&self) -> Result<Arc<String>, JvsError> {
        let keystore = Arc::clone(&self.keystore);
        let key_name = self.key_name.clone();

        self.cache
            .get_or_load(self.key_name.clone(), || async move {
                load_jwks(keystore.as_ref(), &key_name).await.map(Arc::new)
            })
            .await
    }
}

async fn load_jwks(keystore: &dyn KeyStore, key_name: &str) -> Result<String, JvsError> {
    let versions = keystore.list_versions(key_name).await?;
    let enabled: Vec<_> = versions
        .into_iter()
        .filter(|version| version.state == VersionState::Enabled)
        .collect();

    let fetches = enabled.iter().map(|version| async {
        let pem = keystore.public_key_pem(&version.name).await?;
        jwk_from_pem(&pem, &version.name)
    });

    let mut keys = futures::future::try_join_all(fetches).await?;
    keys.sort_by(|a, b| a.kid.cmp(&b.kid));

    serde_json::to_string(&Jwks { keys })
        .map_err(|e| JvsError::Internal(format!("jwks serialization failed: {e}")))
}

fn jwk_from_pem(pem: &str, kid: &str) -> Result<JsonWebKey, JvsError> {
    let public_key = p256::PublicKey::from_public_key_pem(pem).map_err(|e| {
        JvsError::Internal(format!(
            "public key of version {kid} is not ECDSA P-256: {e}"
        ))
    })?;

    let point = public_key.to_encoded_point(false);
    let x = point
        .x()
        .ok_or_else(|| JvsError::Internal(format!("public key of version {kid} has no affine x")))?;
    let y = point
        .y()
        .ok_or_else(|| JvsError::Internal(format!("public key of version {kid} has no affine y")))?;

    Ok(JsonWebKey {
        kty: "EC".to_string(),
        crv: "P-256".to_string(),
        kid: kid.to_string(),
        x: URL_SAFE_NO_PAD.encode(x),
        y: URL_SAFE_NO_PAD.encode(y),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::keystore::memory::MemoryKeyStore;
    use crate::keystore::{KeyVersion, LabelSnapshot};
    use async_trait::async_trait;
    use std::collections::HashMap;

    const KEY: &str = "projects/test/keys/jvs-signer";

    fn service(keystore: &Arc<MemoryKeyStore>, timeout: Duration) -> JwksService {
        JwksService::new(
            Arc::clone(keystore) as Arc<dyn KeyStore>,
            KEY.to_string(),
            timeout,
        )
    }

    fn parse(body: &str) -> Jwks {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn test_jwks_contains_exactly_enabled_versions() {
        let keystore = Arc::new(MemoryKeyStore::new());
        let first = keystore.create_version(KEY).await.unwrap();
        let second = keystore.create_version(KEY).await.unwrap();
        keystore.create_version(KEY).await.unwrap();
        keystore.disable_version(&first.name).await.unwrap();

        let body = service(&keystore, Duration::ZERO).jwks_body().await.unwrap();
        let jwks = parse(&body);

        let third = format!("{KEY}/cryptoKeyVersions/3");
        let kids: Vec<&str> = jwks.keys.iter().map(|k| k.kid.as_str()).collect();
        assert_eq!(kids, vec![second.name.as_str(), third.as_str()]);
        for key in &jwks.keys {
            assert_eq!(key.kty, "EC");
            assert_eq!(key.crv, "P-256");
            assert!(!key.x.is_empty());
            assert!(!key.y.is_empty());
        }
    }

    #[tokio::test]
    async fn test_jwks_empty_when_no_enabled_versions() {
        let keystore = Arc::new(MemoryKeyStore::new());
        let body = service(&keystore, Duration::ZERO).jwks_body().await.unwrap();
        assert_eq!(&**body, r#"{"keys":[]}"#);
    }

    #[tokio::test]
    async fn test_jwks_body_is_byte_stable() {
        let keystore = Arc::new(MemoryKeyStore::new());
        keystore.create_version(KEY).await.unwrap();
        keystore.create_version(KEY).await.unwrap();

        let service = service(&keystore, Duration::ZERO);
        let first = service.jwks_body().await.unwrap();
        let second = service.jwks_body().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_jwks_coordinates_decode_to_p256_sizes() {
        let keystore = Arc::new(MemoryKeyStore::new());
        keystore.create_version(KEY).await.unwrap();

        let body = service(&keystore, Duration::ZERO).jwks_body().await.unwrap();
        let jwks = parse(&body);

        let x = URL_SAFE_NO_PAD.decode(&jwks.keys[0].x).unwrap();
        let y = URL_SAFE_NO_PAD.decode(&jwks.keys[0].y).unwrap();
        assert_eq!(x.len(), 32);
        assert_eq!(y.len(), 32);
    }

    #[tokio::test]
    async fn test_cache_hit_avoids_keystore_reads() {
        let keystore = Arc::new(MemoryKeyStore::new());
        let version = keystore.create_version(KEY).await.unwrap();

        let service = service(&keystore, Duration::from_secs(300));
        let before = service.jwks_body().await.unwrap();

        // The change is invisible until the cache expires.
        keystore.disable_version(&version.name).await.unwrap();
        let after = service.jwks_body().await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_zero_timeout_reflects_changes_immediately() {
        let keystore = Arc::new(MemoryKeyStore::new());
        let version = keystore.create_version(KEY).await.unwrap();

        let service = service(&keystore, Duration::ZERO);
        assert_eq!(parse(&service.jwks_body().await.unwrap()).keys.len(), 1);

        keystore.disable_version(&version.name).await.unwrap();
        assert!(parse(&service.jwks_body().await.unwrap()).keys.is_empty());
    }

    /// Key store wrapper that fails public key fetches for one version.
    struct FailingPemKeyStore {
        inner: Arc<MemoryKeyStore>,
        failing_version: String,
    }

    #[async_trait]
    impl KeyStore for FailingPemKeyStore {
        async fn list_versions(&self, key_name: &str) -> Result<Vec<KeyVersion>, JvsError> {
            self.inner.list_versions(key_name).await
        }

        async fn create_version(&self, key_name: &str) -> Result<KeyVersion, JvsError> {
            self.inner.create_version(key_name).await
        }

        async fn disable_version(&self, version_name: &str) -> Result<(), JvsError> {
            self.inner.disable_version(version_name).await
        }

        async fn destroy_version(&self, version_name: &str) -> Result<(), JvsError> {
            self.inner.destroy_version(version_name).await
        }

        async fn get_labels(&self, key_name: &str) -> Result<LabelSnapshot, JvsError> {
            self.inner.get_labels(key_name).await
        }

        async fn set_labels(
            &self,
            key_name: &str,
            labels: HashMap<String, String>,
            expected_etag: &str,
        ) -> Result<(), JvsError> {
            self.inner.set_labels(key_name, labels, expected_etag).await
        }

        async fn public_key_pem(&self, version_name: &str) -> Result<String, JvsError> {
            if version_name == self.failing_version {
                return Err(JvsError::KeyStore("simulated fetch failure".to_string()));
            }
            self.inner.public_key_pem(version_name).await
        }

        async fn sign(&self, version_name: &str, message: &[u8]) -> Result<Vec<u8>, JvsError> {
            self.inner.sign(version_name, message).await
        }
    }

    #[tokio::test]
    async fn test_single_fetch_failure_fails_whole_response() {
        let inner = Arc::new(MemoryKeyStore::new());
        inner.create_version(KEY).await.unwrap();
        let second = inner.create_version(KEY).await.unwrap();

        let failing: Arc<dyn KeyStore> = Arc::new(FailingPemKeyStore {
            inner,
            failing_version: second.name,
        });
        let service = JwksService::new(failing, KEY.to_string(), Duration::ZERO);

        let result = service.jwks_body().await;
        assert!(matches!(result, Err(JvsError::KeyStore(_))));
    }

    #[tokio::test]
    async fn test_invalid_pem_is_internal_error() {
        assert!(matches!(
            jwk_from_pem("not a pem", "kid"),
            Err(JvsError::Internal(_))
        ));

        // A valid PEM of the wrong key type must also be rejected.
        let ed25519_pem = "-----BEGIN PUBLIC KEY-----\nMCowBQYDK2VwAyEAGb9ECWmEzf6FQbrBZ9w7lshQhqowtrbLDFw4rXAxZuE=\n-----END PUBLIC KEY-----\n";
        assert!(matches!(
            jwk_from_pem(ed25519_pem, "kid"),
            Err(JvsError::Internal(_))
        ));
    }
}
