//! The in-process tool seam.
//!
//! `hit` script nodes run without forking. The runner hands the tool an
//! explicit stdout sink rather than redirecting process-wide stdout, so
//! capture works without global state.

use std::io::Write;

use hdist_common::error::{HdistError, Result};
use hdist_common::log::Logger;

use crate::env::Env;

/// Entry point for in-process tools.
pub trait ToolRegistry {
    /// Runs the tool named by `argv[1]` (`argv[0]` is always `hit`).
    ///
    /// Writes stdout-destined output to `stdout` and returns the tool's
    /// exit code.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown tools or tool-internal failures; the
    /// runner reports either as a failed `hit` node.
    fn run(
        &self,
        argv: &[String],
        env: &Env,
        logger: &dyn Logger,
        stdout: &mut dyn Write,
    ) -> Result<i32>;
}

/// Registry with no tools; every dispatch fails.
///
/// `hit logpipe` still works against this registry because the runner
/// intercepts it before dispatching.
#[derive(Debug, Default)]
pub struct NoTools;

impl ToolRegistry for NoTools {
    fn run(
        &self,
        argv: &[String],
        _env: &Env,
        _logger: &dyn Logger,
        _stdout: &mut dyn Write,
    ) -> Result<i32> {
        Err(HdistError::NotFound {
            kind: "tool",
            id: argv.get(1).cloned().unwrap_or_default(),
        })
    }
}
