//! Artifact resolution.
//!
//! The runner never builds artifacts itself; it asks an [`ArtifactStore`]
//! to map ids to the directories of already-built artifacts.

use std::path::{Path, PathBuf};

use hdist_common::types::ArtifactId;

/// Maps artifact ids to the absolute directories of built artifacts.
pub trait ArtifactStore {
    /// Resolves an id, returning `None` when the artifact is not built.
    fn resolve(&self, id: &ArtifactId) -> Option<PathBuf>;
}

/// Store backed by a directory tree: artifact `foo/abc` lives at
/// `<root>/foo/abc`.
#[derive(Debug)]
pub struct DirArtifactStore {
    root: PathBuf,
}

impl DirArtifactStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for DirArtifactStore {
    fn resolve(&self, id: &ArtifactId) -> Option<PathBuf> {
        let path = self.root.join(id.as_str());
        path.is_dir().then_some(path)
    }
}
