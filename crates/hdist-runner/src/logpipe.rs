//! Registry of side-channel log FIFOs.
//!
//! `hit logpipe <HEADER> <LEVEL>` creates a named FIFO in the scratch dir
//! that child processes (or anything they spawn) can write lines to; the
//! supervisor polls it and forwards the lines to a sub-logger at the
//! registered level. Creation is idempotent per `(header, level)` key.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use hdist_common::constants::LOG_PIPE_PREFIX;
use hdist_common::log::LogLevel;

use crate::error::{JobError, Result};

/// FIFOs registered for the current run, keyed by `(header, level)`.
#[derive(Debug)]
pub(crate) struct LogPipeRegistry {
    dir: PathBuf,
    pipes: IndexMap<(String, LogLevel), PathBuf>,
}

impl LogPipeRegistry {
    /// Creates an empty registry rooted at the scratch dir.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            pipes: IndexMap::new(),
        }
    }

    /// Creates the FIFO for `(header, level)`, or returns the existing
    /// path if one was already registered under that key.
    pub fn create(&mut self, header: &str, level: LogLevel) -> Result<PathBuf> {
        let key = (header.to_owned(), level);
        if let Some(existing) = self.pipes.get(&key) {
            return Ok(existing.clone());
        }
        let path = self.dir.join(format!("{LOG_PIPE_PREFIX}{header}-{level}"));
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|errno| JobError::Io {
            path: path.clone(),
            source: errno.into(),
        })?;
        tracing::debug!(path = %path.display(), "created log pipe");
        let _ = self.pipes.insert(key, path.clone());
        Ok(path)
    }

    /// Returns whether any pipe has been registered.
    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    /// Iterates over registrations in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, LogLevel, &Path)> {
        self.pipes
            .iter()
            .map(|((header, level), path)| (header.as_str(), *level, path.as_path()))
    }
}
