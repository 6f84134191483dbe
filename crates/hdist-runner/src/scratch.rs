//! The per-run scratch directory.
//!
//! Materialized inputs and log FIFOs live here. A runner-created scratch
//! dir is removed on every exit path; a caller-supplied one must be empty
//! on entry and is left in place for inspection.

use std::path::{Path, PathBuf};

use hdist_common::constants::TEMP_DIR_PREFIX;

use crate::error::{JobError, Result};

/// Scratch directory for one job run.
#[derive(Debug)]
pub(crate) struct Scratch {
    path: PathBuf,
    /// RAII handle for the runner-owned case; dropping removes the tree.
    owned: Option<tempfile::TempDir>,
}

impl Scratch {
    /// Creates or adopts the scratch directory.
    ///
    /// With `explicit = None` a fresh directory is created (and removed
    /// when the `Scratch` drops). An explicit directory must be empty
    /// and is never removed.
    pub fn create(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            None => {
                let owned = tempfile::Builder::new()
                    .prefix(TEMP_DIR_PREFIX)
                    .tempdir()
                    .map_err(|e| JobError::Io {
                        path: std::env::temp_dir(),
                        source: e,
                    })?;
                let path = owned.path().canonicalize().map_err(|e| JobError::Io {
                    path: owned.path().to_owned(),
                    source: e,
                })?;
                Ok(Self {
                    path,
                    owned: Some(owned),
                })
            }
            Some(dir) => {
                let mut entries = std::fs::read_dir(dir).map_err(|e| JobError::Io {
                    path: dir.to_owned(),
                    source: e,
                })?;
                if entries.next().is_some() {
                    return Err(JobError::TempDirNotEmpty {
                        path: dir.to_owned(),
                    });
                }
                let path = dir.canonicalize().map_err(|e| JobError::Io {
                    path: dir.to_owned(),
                    source: e,
                })?;
                Ok(Self { path, owned: None })
            }
        }
    }

    /// Returns the canonical scratch path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_scratch_is_removed_on_drop() {
        let scratch = Scratch::create(None).expect("create");
        let path = scratch.path().to_owned();
        assert!(path.is_dir());
        assert!(
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(TEMP_DIR_PREFIX))
        );
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn provided_scratch_survives_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scratch = Scratch::create(Some(dir.path())).expect("adopt");
        let path = scratch.path().to_owned();
        drop(scratch);
        assert!(path.is_dir());
    }

    #[test]
    fn provided_scratch_must_be_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("stale"), b"x").expect("write");
        let err = Scratch::create(Some(dir.path())).expect_err("must refuse");
        assert!(matches!(err, JobError::TempDirNotEmpty { .. }));
    }
}
