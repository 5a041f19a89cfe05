//! Encoding of the primary-version pointer stored as a label on the key.
//!
//! The rotator is the only writer of this label; the signer reads it through
//! its cache. At most one entry exists under the reserved `primary` key,
//! holding `ver_<n>` where `<n>` is the version ordinal.

use std::collections::HashMap;

/// Reserved label key holding the primary pointer.
pub const PRIMARY_LABEL_KEY: &str = "primary";

/// Prefix of the primary pointer value.
pub const PRIMARY_LABEL_PREFIX: &str = "ver_";

/// Encode a version ordinal as a primary pointer value.
#[must_use]
pub fn encode(ordinal: u64) -> String {
    format!("{PRIMARY_LABEL_PREFIX}{ordinal}")
}

/// Decode a primary pointer value back to a version ordinal.
#[must_use]
pub fn decode(value: &str) -> Option<u64> {
    value.strip_prefix(PRIMARY_LABEL_PREFIX)?.parse().ok()
}

/// Read the primary version ordinal out of a key's label map, if present and
/// well-formed.
#[must_use]
pub fn primary_ordinal(labels: &HashMap<String, String>) -> Option<u64> {
    decode(labels.get(PRIMARY_LABEL_KEY)?)
}
