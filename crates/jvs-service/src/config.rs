use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::services::rotation_service::RotationPolicy;

/// Default TTL applied to requests with a non-positive TTL (15 minutes).
pub const DEFAULT_TTL_SECONDS: i64 = 15 * 60;

/// Default hard upper bound on minted token TTL (1 hour).
pub const DEFAULT_MAX_TTL_SECONDS: i64 = 60 * 60;

/// Default signer and JWKS cache lifetime (5 minutes).
pub const DEFAULT_CACHE_TIMEOUT_SECONDS: i64 = 5 * 60;

/// Default background rotation tick period (5 minutes).
pub const DEFAULT_ROTATION_INTERVAL_SECONDS: i64 = 5 * 60;

/// Default per-justification value limit in bytes.
pub const DEFAULT_MAX_JUSTIFICATION_BYTES: usize = 4000;

/// Default per-audience limit in bytes.
pub const DEFAULT_MAX_AUDIENCE_BYTES: usize = 1000;

/// Default audience stamped on tokens when the request names none.
pub const DEFAULT_AUDIENCE: &str = "dev.abcxyz.jvs";

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Fully-qualified name of the logical signing key managed by the
    /// signer, rotator, and JWKS publisher.
    pub key_name: String,
    /// `iss` claim stamped on minted tokens.
    pub issuer: String,
    /// TTL substituted for requests with a non-positive TTL.
    pub default_ttl: Duration,
    /// Hard upper bound on minted TTL.
    pub max_ttl: Duration,
    /// Primary-version cache lifetime; zero disables caching.
    pub signer_cache_timeout: Duration,
    /// JWKS body cache lifetime; zero disables caching.
    pub jwks_cache_timeout: Duration,
    /// Key version lifecycle policy.
    pub rotation: RotationPolicy,
    /// Background rotation tick period.
    pub rotation_interval: Duration,
    /// Accept HS256 self-attested tokens on the verification path.
    pub allow_breakglass: bool,
    pub max_justification_bytes: usize,
    pub max_audience_bytes: usize,
    pub default_audience: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid rotation policy: {0}")]
    InvalidPolicy(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a required variable is missing or a value
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a map (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a required variable is missing or a value
    /// fails validation.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let key_name = require(vars, "JVS_KEY_NAME")?;
        let issuer = require(vars, "JVS_ISSUER")?;

        let default_ttl_seconds =
            parse_seconds(vars, "JVS_DEFAULT_TTL_SECONDS", Some(DEFAULT_TTL_SECONDS))?;
        let max_ttl_seconds =
            parse_seconds(vars, "JVS_MAX_TTL_SECONDS", Some(DEFAULT_MAX_TTL_SECONDS))?;
        if max_ttl_seconds < default_ttl_seconds {
            return Err(ConfigError::InvalidValue {
                key: "JVS_MAX_TTL_SECONDS".to_string(),
                reason: format!(
                    "max ttl ({max_ttl_seconds}s) must not be below default ttl ({default_ttl_seconds}s)"
                ),
            });
        }

        // Cache timeouts allow zero, which disables caching.
        let signer_cache_timeout = parse_nonneg_seconds(
            vars,
            "JVS_SIGNER_CACHE_TIMEOUT_SECONDS",
            DEFAULT_CACHE_TIMEOUT_SECONDS,
        )?;
        let jwks_cache_timeout = parse_nonneg_seconds(
            vars,
            "JVS_JWKS_CACHE_TIMEOUT_SECONDS",
            DEFAULT_CACHE_TIMEOUT_SECONDS,
        )?;

        let key_ttl = parse_seconds(vars, "JVS_KEY_TTL_SECONDS", None)?;
        let grace_period = parse_seconds(vars, "JVS_GRACE_PERIOD_SECONDS", None)?;
        let propagation_delay = parse_seconds(vars, "JVS_PROPAGATION_DELAY_SECONDS", None)?;
        let disabled_period = parse_seconds(vars, "JVS_DISABLED_PERIOD_SECONDS", None)?;
        let destroy_age = parse_seconds(vars, "JVS_DESTROY_AGE_SECONDS", None)?;

        if grace_period >= key_ttl {
            return Err(ConfigError::InvalidPolicy(format!(
                "grace period ({grace_period}s) must be shorter than key ttl ({key_ttl}s)"
            )));
        }

        let rotation = RotationPolicy {
            key_ttl: chrono::Duration::seconds(key_ttl),
            grace_period: chrono::Duration::seconds(grace_period),
            propagation_delay: chrono::Duration::seconds(propagation_delay),
            disabled_period: chrono::Duration::seconds(disabled_period),
            destroy_age: chrono::Duration::seconds(destroy_age),
        };

        let rotation_interval = parse_seconds(
            vars,
            "JVS_ROTATION_INTERVAL_SECONDS",
            Some(DEFAULT_ROTATION_INTERVAL_SECONDS),
        )?;

        let allow_breakglass = parse_bool(vars, "JVS_ALLOW_BREAKGLASS", false)?;

        let max_justification_bytes = parse_limit(
            vars,
            "JVS_MAX_JUSTIFICATION_BYTES",
            DEFAULT_MAX_JUSTIFICATION_BYTES,
        )?;
        let max_audience_bytes =
            parse_limit(vars, "JVS_MAX_AUDIENCE_BYTES", DEFAULT_MAX_AUDIENCE_BYTES)?;

        let default_audience = vars
            .get("JVS_DEFAULT_AUDIENCE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_AUDIENCE.to_string());

        Ok(Config {
            bind_address,
            key_name,
            issuer,
            default_ttl: to_std(default_ttl_seconds),
            max_ttl: to_std(max_ttl_seconds),
            signer_cache_timeout: to_std(signer_cache_timeout),
            jwks_cache_timeout: to_std(jwks_cache_timeout),
            rotation,
            rotation_interval: to_std(rotation_interval),
            allow_breakglass,
            max_justification_bytes,
            max_audience_bytes,
            default_audience,
        })
    }
}

fn require(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    key: &str,
    default: Option<i64>,
) -> Result<i64, ConfigError> {
    let Some(raw) = vars.get(key) else {
        return default.ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));
    };

    let value: i64 = raw.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("must be a valid integer, got '{raw}': {e}"),
    })?;

    if value <= 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("must be positive, got {value}"),
        });
    }

    Ok(value)
}

fn parse_nonneg_seconds(
    vars: &HashMap<String, String>,
    key: &str,
    default: i64,
) -> Result<i64, ConfigError> {
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };

    let value: i64 = raw.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("must be a valid integer, got '{raw}': {e}"),
    })?;

    if value < 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("must not be negative, got {value}"),
        });
    }

    Ok(value)
}

fn parse_limit(
    vars: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };

    let value: usize = raw.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("must be a valid positive integer, got '{raw}': {e}"),
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be positive, got 0".to_string(),
        });
    }

    Ok(value)
}

fn parse_bool(
    vars: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };

    match raw.as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("must be 'true' or 'false', got '{other}'"),
        }),
    }
}

fn to_std(seconds: i64) -> Duration {
    Duration::from_secs(seconds.unsigned_abs())
}
