//! Errors produced while loading and merging profiles.

use std::path::PathBuf;

use thiserror::Error;

use hdist_common::error::HdistError;

/// Any failure of profile loading or merging.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Two profiles contribute conflicting entries, or one profile is
    /// reachable through more than one inheritance path.
    #[error("conflicting profiles: {0}")]
    ConflictingProfiles(String),

    /// A profile document or include record is malformed.
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A profile document failed to parse.
    #[error("profile YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The source cache failed to fetch or unpack a remote base.
    #[error(transparent)]
    Cache(#[from] HdistError),
}

/// Convenience alias for profile operations.
pub type Result<T> = std::result::Result<T, ProfileError>;
