//! Interactive debug shell.
//!
//! In debug mode a `cmd` node is not spawned; instead the staged
//! environment is written to a shell init file, the intended argv is
//! printed, and an interactive shell is started in the node's working
//! directory. Exiting the shell with status 0 continues the script.

use std::fmt::Write as _;
use std::path::Path;
use std::process::Command;

use hdist_common::log::Logger;
use hdist_core::env::Env;
use hdist_core::error::SpecError;

use crate::error::{JobError, Result};

pub(crate) fn debug_call(
    logger: &dyn Logger,
    shell: &Path,
    args: &[String],
    env: &Env,
) -> Result<()> {
    let mut shell_env = env.clone();
    // Leak PS1 from the host environment, prefixed so the session is
    // recognizable.
    let host_ps1 = std::env::var("PS1").unwrap_or_default();
    let _ = shell_env.insert("PS1".to_owned(), format!("[hdist debug] {host_ps1}"));
    let pwd = shell_env
        .get("PWD")
        .cloned()
        .ok_or_else(|| JobError::Spec(SpecError::UnknownVariable("PWD".to_owned())))?;

    let staging = tempfile::tempdir().map_err(|e| JobError::Io {
        path: std::env::temp_dir(),
        source: e,
    })?;
    let rcfile = staging.path().join("env");
    std::fs::write(&rcfile, render_env_script(&shell_env)).map_err(|e| JobError::Io {
        path: rcfile.clone(),
        source: e,
    })?;

    eprintln!("Entering hdist debug mode. Please execute the following command:");
    eprintln!("  {args:?}");
    eprintln!();
    eprintln!("When you are done, \"exit 1\" to abort the job, or \"exit 0\" to continue.");
    eprintln!();

    let status = Command::new(shell)
        .arg("--noprofile")
        .arg("--rcfile")
        .arg(&rcfile)
        .current_dir(&pwd)
        .status()
        .map_err(|e| JobError::Io {
            path: shell.to_owned(),
            source: e,
        })?;
    if !status.success() {
        logger.error("debug shell manually aborted");
        return Err(JobError::DebugAborted);
    }
    Ok(())
}

/// Renders the staged environment as an `export K='V'` script.
fn render_env_script(env: &Env) -> String {
    let mut script = String::new();
    for (key, value) in env {
        let escaped = value.replace('\'', "'\\''");
        let _ = writeln!(script, "export {key}='{escaped}'");
    }
    script
}
