//! The source-cache seam.
//!
//! Remote profile bases are fetched and unpacked through this trait; the
//! profile loader never talks to the network itself.

use std::path::Path;

use hdist_common::error::Result;

/// Fetches and unpacks keyed source trees.
pub trait SourceCache {
    /// Ensures the tree identified by `key` is available locally,
    /// downloading from `url` if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails or the key does not match.
    fn fetch(&self, url: &str, key: &str) -> Result<()>;

    /// Unpacks the tree identified by `key` into `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or extraction fails.
    fn unpack(&self, key: &str, target: &Path) -> Result<()>;
}
