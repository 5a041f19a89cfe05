//! Key version lifecycle state machine.
//!
//! Planning is a pure function over `(versions, labels, now, policy)`; the
//! service executes the planned actions against the key store. All version
//! ages are measured from their create time. A plan emits at most one
//! `Create`, and every action touches a distinct version, so execution order
//! between distinct versions does not matter. `Promote` is the only action
//! that writes the `primary` label and goes through a compare-and-set update
//! restricted to labels.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::errors::JvsError;
use crate::keystore::{version_ordinal, KeyStore, KeyVersion, LabelSnapshot, VersionState};
use crate::models::{Action, CertificateAction};
use crate::observability::metrics::record_rotation_action;
use crate::services::primary;

/// Durations governing the lifecycle of key versions.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    /// Nominal lifetime of an enabled, primary version before rotation
    /// begins.
    pub key_ttl: chrono::Duration,
    /// Headroom before `key_ttl` at which a successor is created.
    pub grace_period: chrono::Duration,
    /// Minimum age of a successor before it is promoted, giving JWKS caches
    /// a chance to converge.
    pub propagation_delay: chrono::Duration,
    /// How long a non-primary enabled version may linger before it is
    /// disabled.
    pub disabled_period: chrono::Duration,
    /// How long a disabled version is kept before destruction is scheduled.
    pub destroy_age: chrono::Duration,
}

impl RotationPolicy {
    /// Primary age at which successor creation begins.
    #[must_use]
    pub fn rotation_age(&self) -> chrono::Duration {
        self.key_ttl - self.grace_period
    }
}

/// One planned mutation. Each version is classified into at most one action
/// per plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionAction {
    /// Append a new version (at most one per plan).
    Create,
    /// Make the named version the primary.
    Promote(String),
    /// Transition the named version to `DISABLED`.
    Disable(String),
    /// Schedule the named version for destruction.
    Destroy(String),
}

impl VersionAction {
    fn kind(&self) -> &'static str {
        match self {
            VersionAction::Create => "create",
            VersionAction::Promote(_) => "promote",
            VersionAction::Disable(_) => "disable",
            VersionAction::Destroy(_) => "destroy",
        }
    }
}

/// Creation order: create time, with the ordinal breaking ties for versions
/// created in the same instant.
fn newer_than(candidate: &KeyVersion, reference: &KeyVersion) -> bool {
    (candidate.create_time, candidate.ordinal()) > (reference.create_time, reference.ordinal())
}

/// Compute the actions that bring a key's version population in line with
/// `policy` at instant `now`.
///
/// Deterministic: the same inputs always produce the same plan. Tie-breaks
/// between candidate versions prefer the newest create time, then the
/// highest ordinal.
#[must_use]
pub fn plan(
    versions: &[KeyVersion],
    labels: &HashMap<String, String>,
    now: DateTime<Utc>,
    policy: &RotationPolicy,
) -> Vec<VersionAction> {
    let primary = primary::primary_ordinal(labels)
        .and_then(|ordinal| versions.iter().find(|v| v.ordinal() == Some(ordinal)))
        .filter(|v| v.state == VersionState::Enabled);

    let mut promote: Option<&KeyVersion> = None;
    let mut create = false;

    if let Some(current) = primary {
        if current.age(now) >= policy.rotation_age() {
            let successor = versions
                .iter()
                .filter(|&v| {
                    v.state == VersionState::Enabled
                        && newer_than(v, current)
                        && v.age(now) >= policy.propagation_delay
                })
                .max_by_key(|v| (v.create_time, v.ordinal()));

            if let Some(successor) = successor {
                promote = Some(successor);
            } else {
                // A newer version that is still pending, or enabled but not
                // yet past the propagation delay, is an in-flight successor:
                // keep the current primary one more tick rather than piling
                // up versions.
                let successor_in_flight = versions.iter().any(|v| {
                    newer_than(v, current)
                        && (v.state == VersionState::Enabled || v.state.is_pending())
                });
                if !successor_in_flight {
                    create = true;
                }
            }
        }
    } else {
        // Degenerate state: primary missing, malformed, or unusable. Heal by
        // promoting the newest enabled version still within its nominal
        // lifetime, or start a fresh one.
        let candidate = versions
            .iter()
            .filter(|v| v.state == VersionState::Enabled && v.age(now) < policy.key_ttl)
            .max_by_key(|v| (v.create_time, v.ordinal()));

        match candidate {
            Some(candidate) => promote = Some(candidate),
            None => create = true,
        }
    }

    let mut actions = Vec::new();
    if create {
        actions.push(VersionAction::Create);
    }
    if let Some(version) = promote {
        actions.push(VersionAction::Promote(version.name.clone()));
    }

    for version in versions {
        match version.state {
            VersionState::Enabled => {
                let is_primary = primary.is_some_and(|p| p.name == version.name);
                let is_new_primary = promote.is_some_and(|p| p.name == version.name);
                if !is_primary
                    && !is_new_primary
                    && version.age(now) >= policy.disabled_period
                {
                    actions.push(VersionAction::Disable(version.name.clone()));
                }
            }
            VersionState::Disabled => {
                if version.age(now) >= policy.destroy_age {
                    actions.push(VersionAction::Destroy(version.name.clone()));
                }
            }
            _ => {}
        }
    }

    actions
}

/// Drives the key store to execute rotation plans and operator overrides.
///
/// Concurrent invocations for the same key must be serialized by the caller
/// (one tick at a time per key).
pub struct RotationService {
    keystore: Arc<dyn KeyStore>,
    key_name: String,
    policy: RotationPolicy,
    clock: Clock,
}

impl RotationService {
    #[must_use]
    pub fn new(
        keystore: Arc<dyn KeyStore>,
        key_name: String,
        policy: RotationPolicy,
        clock: Clock,
    ) -> Self {
        Self {
            keystore,
            key_name,
            policy,
            clock,
        }
    }

    /// Run one rotation tick: list versions, plan, and apply every action.
    ///
    /// Action failures do not abort peer actions; they aggregate into a
    /// single `Rotation` error. On success the applied plan is returned.
    ///
    /// # Errors
    ///
    /// - `KeyStore` - listing versions or labels failed
    /// - `Rotation` - one or more actions failed
    pub async fn rotate(&self) -> Result<Vec<VersionAction>, JvsError> {
        let versions = self.keystore.list_versions(&self.key_name).await?;
        let snapshot = self.keystore.get_labels(&self.key_name).await?;
        let now = (self.clock)();

        let actions = plan(&versions, &snapshot.labels, now, &self.policy);

        let mut failures = Vec::new();
        for action in &actions {
            match self.apply(action, &snapshot).await {
                Ok(()) => {
                    record_rotation_action(action.kind(), "success");
                    tracing::info!(target: "rotation", key = %self.key_name, ?action, "applied rotation action");
                }
                Err(e) => {
                    record_rotation_action(action.kind(), "error");
                    tracing::error!(target: "rotation", key = %self.key_name, ?action, error = %e, "rotation action failed");
                    failures.push(format!("{action:?}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(actions)
        } else {
            Err(JvsError::Rotation(failures))
        }
    }

    /// Apply explicit per-version operator overrides.
    ///
    /// Failures aggregate like rotation failures and do not abort peer
    /// actions.
    ///
    /// # Errors
    ///
    /// `Rotation` with one entry per failed action.
    pub async fn certificate_action(&self, actions: &[Action]) -> Result<(), JvsError> {
        let mut failures = Vec::new();
        for action in actions {
            if let Err(e) = self.apply_certificate_action(action).await {
                tracing::error!(
                    target: "rotation",
                    version = %action.version,
                    requested = ?action.action,
                    error = %e,
                    "certificate action failed"
                );
                failures.push(format!("{} {:?}: {e}", action.version, action.action));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(JvsError::Rotation(failures))
        }
    }

    async fn apply(&self, action: &VersionAction, snapshot: &LabelSnapshot) -> Result<(), JvsError> {
        match action {
            VersionAction::Create => {
                self.keystore.create_version(&self.key_name).await?;
                Ok(())
            }
            VersionAction::Promote(version) => self.promote(version, snapshot).await,
            VersionAction::Disable(version) => self.keystore.disable_version(version).await,
            VersionAction::Destroy(version) => self.keystore.destroy_version(version).await,
        }
    }

    async fn promote(&self, version: &str, snapshot: &LabelSnapshot) -> Result<(), JvsError> {
        let ordinal = version_ordinal(version)
            .ok_or_else(|| JvsError::Internal(format!("malformed version name {version}")))?;

        let mut labels = snapshot.labels.clone();
        labels.insert(primary::PRIMARY_LABEL_KEY.to_string(), primary::encode(ordinal));
        self.keystore
            .set_labels(&self.key_name, labels, &snapshot.etag)
            .await
    }

    async fn apply_certificate_action(&self, action: &Action) -> Result<(), JvsError> {
        match action.action {
            CertificateAction::Rotate => self.rotate_version(&action.version).await,
            CertificateAction::ForceDisable => self.force_disable(&action.version).await,
            CertificateAction::ForceDestroy => {
                self.force_disable(&action.version).await?;
                self.keystore.destroy_version(&action.version).await
            }
        }
    }

    /// `ROTATE`: if the version is the current primary, start a rotation as
    /// if it had aged past the rotation threshold (the successor is promoted
    /// by the normal flow once it has propagated). On any other version this
    /// is a no-op.
    async fn rotate_version(&self, version: &str) -> Result<(), JvsError> {
        let snapshot = self.keystore.get_labels(&self.key_name).await?;
        let versions = self.keystore.list_versions(&self.key_name).await?;

        let Some(current) = self.find_primary(&versions, &snapshot) else {
            return Ok(());
        };
        if current.name != version {
            return Ok(());
        }

        let successor_in_flight = versions.iter().any(|v| {
            newer_than(v, current) && (v.state == VersionState::Enabled || v.state.is_pending())
        });
        if !successor_in_flight {
            self.keystore.create_version(&self.key_name).await?;
        }
        Ok(())
    }

    /// `FORCE_DISABLE`: immediately disable the version. If it is the
    /// primary, a successor is promoted first (created if necessary) so the
    /// key never loses its primary.
    async fn force_disable(&self, version: &str) -> Result<(), JvsError> {
        let snapshot = self.keystore.get_labels(&self.key_name).await?;
        let versions = self.keystore.list_versions(&self.key_name).await?;

        let target = versions
            .iter()
            .find(|v| v.name == version)
            .ok_or_else(|| JvsError::KeyStore(format!("unknown key version {version}")))?;

        let is_primary = self
            .find_primary(&versions, &snapshot)
            .is_some_and(|p| p.name == version);
        if is_primary {
            let successor = versions
                .iter()
                .filter(|v| v.state == VersionState::Enabled && v.name != version)
                .max_by_key(|v| (v.create_time, v.ordinal()));

            let successor_name = match successor {
                Some(successor) => successor.name.clone(),
                None => self.keystore.create_version(&self.key_name).await?.name,
            };
            self.promote(&successor_name, &snapshot).await?;
        }

        if target.state == VersionState::Enabled {
            self.keystore.disable_version(version).await?;
        }
        Ok(())
    }

    fn find_primary<'a>(
        &self,
        versions: &'a [KeyVersion],
        snapshot: &LabelSnapshot,
    ) -> Option<&'a KeyVersion> {
        let ordinal = primary::primary_ordinal(&snapshot.labels)?;
        versions
            .iter()
            .find(|v| v.ordinal() == Some(ordinal))
            .filter(|v| v.state == VersionState::Enabled)
    }
}
