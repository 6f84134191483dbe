//! Domain primitive types used across the hdist workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix marking an import id as virtual (resolved by the caller).
pub const VIRTUAL_PREFIX: &str = "virtual:";

/// Opaque identifier of a built artifact.
///
/// Ids starting with `virtual:` are placeholders that the caller maps to
/// real ids at run time, so they contribute a stable string to the
/// hashable job spec without pinning an artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Creates an artifact ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether this is a `virtual:` id.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.0.starts_with(VIRTUAL_PREFIX)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 hash digest used for job-spec identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Creates a hash from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> crate::error::Result<Self> {
        let hex = hex.into();
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(crate::error::HdistError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self(hex))
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_id_virtual_predicate() {
        assert!(ArtifactId::new("virtual:unix").is_virtual());
        assert!(!ArtifactId::new("zlib/2d4kh7hw4uvml67q7npltyaau5xmn4pc").is_virtual());
    }

    #[test]
    fn sha256_rejects_short_hex() {
        assert!(Sha256Hash::from_hex("abc123").is_err());
    }

    #[test]
    fn sha256_accepts_valid_hex() {
        let hex = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        let hash = Sha256Hash::from_hex(hex).expect("valid hex");
        assert_eq!(hash.as_hex(), hex);
        assert_eq!(hash.to_string(), format!("sha256:{hex}"));
    }
}
