//! Errors surfaced while running a job.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use hdist_common::types::ArtifactId;
use hdist_core::error::SpecError;

/// Any failure of a job run.
///
/// Nothing is recovered locally: every variant propagates out of
/// [`run_job`][crate::run_job] after the temp dir is cleaned up (when
/// owned) and any child process has been reaped.
#[derive(Debug, Error)]
pub enum JobError {
    /// Structural or substitution failure in the job spec.
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path or stream where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Serializing a run parameter failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A `virtual:` import has no entry in the caller's virtuals mapping.
    #[error("job spec contains a virtual dependency {0} that was not provided")]
    MissingVirtual(ArtifactId),

    /// An imported artifact is not present in the store.
    #[error("dependency {reference:?} = {id} is not already built, please build it first")]
    UnbuiltDependency {
        /// The import's `ref`, if any.
        reference: Option<String>,
        /// The (possibly virtual-substituted) artifact id.
        id: ArtifactId,
    },

    /// The child program does not exist.
    #[error("{0}")]
    CommandNotFound(String),

    /// The child exited with a non-zero status (negated signal number
    /// when it died to a signal).
    #[error("command failed with code {0}")]
    CommandFailed(i32),

    /// An in-process tool returned non-zero or failed outright.
    #[error("hit command failed: {0}")]
    HitFailed(String),

    /// `append_to_file` points into the run temp dir, which would
    /// deadlock against a log pipe.
    #[error("cannot redirect stdout into the run temp dir: {path}")]
    RedirectToTempForbidden {
        /// The refused target path.
        path: PathBuf,
    },

    /// The job registered log pipes but the platform only supports the
    /// simple supervision mode.
    #[error("log pipes are not supported on this platform")]
    LogPipesUnsupported,

    /// The interactive debug shell exited non-zero.
    #[error("debug shell manually aborted the job")]
    DebugAborted,

    /// A caller-supplied temp dir was not empty on entry.
    #[error("provided temp dir {path} is not empty")]
    TempDirNotEmpty {
        /// The offending directory.
        path: PathBuf,
    },
}

/// Convenience alias for runner operations.
pub type Result<T> = std::result::Result<T, JobError>;
