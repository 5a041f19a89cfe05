//! Cached view of the primary signing version.
//!
//! Resolution reads the key's `primary` label, checks the referenced version
//! is `ENABLED`, and binds a signer handle to it. The result is cached for
//! the configured timeout; concurrent refreshes coalesce through the shared
//! cache. A missing or unusable primary is a `FailedPrecondition` that the
//! rotator's next tick is expected to heal.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::Expiring;
use crate::errors::JvsError;
use crate::keystore::{version_name, KeyStore, VersionState};
use crate::services::primary;

/// A signer bound to a specific enabled key version.
pub struct VersionSigner {
    keystore: Arc<dyn KeyStore>,
    version_name: String,
}

impl VersionSigner {
    /// The fully-qualified version name, stamped into the token's `kid`.
    #[must_use]
    pub fn version_name(&self) -> &str {
        &self.version_name
    }

    /// Sign `message` with this version (raw ES256 r || s signature).
    ///
    /// # Errors
    ///
    /// Propagates key store failures, including the version having been
    /// disabled since resolution.
    pub async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, JvsError> {
        self.keystore.sign(&self.version_name, message).await
    }
}

/// Resolves and caches the current primary signing version.
pub struct SignerService {
    keystore: Arc<dyn KeyStore>,
    key_name: String,
    cache: Expiring<String, String>,
}

impl SignerService {
    /// `cache_timeout` of zero disables caching.
    #[must_use]
    pub fn new(keystore: Arc<dyn KeyStore>, key_name: String, cache_timeout: Duration) -> Self {
        Self {
            keystore,
            key_name,
            cache: Expiring::new(cache_timeout),
        }
    }

    /// The current primary, refreshed when the cache entry has expired.
    ///
    /// # Errors
    ///
    /// - `FailedPrecondition` - primary label missing, malformed, or the
    ///   referenced version does not exist or is not enabled
    /// - `KeyStore` - backend failure
    pub async fn current(&self) -> Result<VersionSigner, JvsError> {
        let keystore = Arc::clone(&self.keystore);
        let key_name = self.key_name.clone();

        let version_name = self
            .cache
            .get_or_load(self.key_name.clone(), || async move {
                resolve_primary(keystore.as_ref(), &key_name).await
            })
            .await?;

        Ok(VersionSigner {
            keystore: Arc::clone(&self.keystore),
            version_name,
        })
    }
}

async fn resolve_primary(keystore: &dyn KeyStore, key_name: &str) -> Result<String, JvsError> {
    let snapshot = keystore.get_labels(key_name).await?;
    let ordinal = primary::primary_ordinal(&snapshot.labels).ok_or_else(|| {
        JvsError::FailedPrecondition(format!(
            "no valid primary version is set for key {key_name}"
        ))
    })?;

    let name = version_name(key_name, ordinal);
    let versions = keystore.list_versions(key_name).await?;
    let version = versions
        .into_iter()
        .find(|candidate| candidate.name == name)
        .ok_or_else(|| {
            JvsError::FailedPrecondition(format!("primary version {name} does not exist"))
        })?;

    if version.state != VersionState::Enabled {
        return Err(JvsError::FailedPrecondition(format!(
            "primary version {name} is not enabled"
        )));
    }

    tracing::debug!(target: "signer", version = %name, "resolved primary signing version");
    Ok(name)
}
