//! # hdist-runner
//!
//! Job execution in a controlled environment.
//!
//! Handles:
//! - **Imports**: resolving the spec's import list into env bindings.
//! - **Interpreter**: recursive, scoped evaluation of command nodes.
//! - **Supervisor**: spawning children and multiplexing their output
//!   (stdout, stderr, and side-channel log FIFOs) into the job log.
//! - **Hit**: in-process tool dispatch, including `hit logpipe`.
//! - **Scratch**: the per-run temp dir for inputs and FIFOs.
//! - **Debug**: the interactive debug shell.

mod debug;
pub mod error;
mod hit;
mod imports;
mod inputs;
mod interpreter;
mod logpipe;
mod scratch;
mod supervisor;

use std::path::PathBuf;

use hdist_common::constants::DEFAULT_DEBUG_SHELL;
use hdist_common::log::Logger;
use hdist_core::env::{Env, Virtuals, pack_virtuals};
use hdist_core::jobspec::{JobSpec, canonicalize_job_spec};
use hdist_core::paths::normalize_path;
use hdist_core::store::ArtifactStore;
use hdist_core::tools::ToolRegistry;

pub use crate::error::{JobError, Result};
use crate::interpreter::CommandTreeExecutor;
use crate::scratch::Scratch;

/// Caller-side parameters of a job run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Extra variables overlaid last over everything the imports
    /// produced (and over `PATH`), winning on conflict.
    pub override_env: Env,

    /// Value the synthetic first command assigns to `$ARTIFACT`.
    pub artifact_dir: PathBuf,

    /// Mapping from `virtual:` ids to real artifact ids.
    pub virtuals: Virtuals,

    /// Starting working directory of the job.
    pub cwd: PathBuf,

    /// Opaque caller configuration, serialized into `HDIST_CONFIG`.
    pub config: serde_json::Value,

    /// Scratch directory to use. `None` creates (and removes) one; a
    /// supplied directory must be empty and is kept.
    pub temp_dir: Option<PathBuf>,

    /// Divert plain `cmd` nodes into an interactive debug shell.
    pub debug: bool,

    /// Shell launched in debug mode.
    pub debug_shell: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            override_env: Env::new(),
            artifact_dir: PathBuf::from("."),
            virtuals: Virtuals::new(),
            cwd: PathBuf::from("."),
            config: serde_json::Value::Null,
            temp_dir: None,
            debug: false,
            debug_shell: PathBuf::from(DEFAULT_DEBUG_SHELL),
        }
    }
}

/// Runs a job in a controlled environment.
///
/// The child environment is built from scratch: imports are resolved
/// into `HDIST_IMPORT`/`HDIST_IMPORT_PATHS` and `<REF>_DIR`/`<REF>_ID`
/// bindings, `PATH` is cleared so nothing leaks from the host, the
/// caller's overrides win over everything, and `PWD` is always absolute.
///
/// Returns the environment after the last executed leaf command (empty
/// when nothing ran). A spec without a `commands` key still has its
/// imports validated.
///
/// # Errors
///
/// Every failure described in [`JobError`] propagates out of the run;
/// the scratch dir is cleaned up (when owned) and any child process is
/// reaped first.
pub fn run_job(
    logger: &dyn Logger,
    store: &dyn ArtifactStore,
    tools: &dyn ToolRegistry,
    spec: &JobSpec,
    options: &RunOptions,
) -> Result<Env> {
    let spec = canonicalize_job_spec(spec)?;
    let (mut env, commands) =
        imports::resolve_imports(&spec, store, &options.artifact_dir, &options.virtuals)?;

    if spec.commands.is_none() {
        // Imports are validated even when there is nothing to run.
        return Ok(Env::new());
    }

    // Explicitly clear PATH; process spawning would otherwise supply a
    // host default.
    let _ = env.insert("PATH".to_owned(), String::new());
    for (key, value) in &options.override_env {
        let _ = env.insert(key.clone(), value.clone());
    }
    let _ = env.insert(
        "HDIST_VIRTUALS".to_owned(),
        pack_virtuals(&options.virtuals),
    );
    let _ = env.insert(
        "HDIST_CONFIG".to_owned(),
        serde_json::to_string(&options.config)?,
    );
    let pwd = if options.cwd.is_absolute() {
        normalize_path(&options.cwd)
    } else {
        let current = std::env::current_dir().map_err(|e| JobError::Io {
            path: PathBuf::from("."),
            source: e,
        })?;
        normalize_path(&current.join(&options.cwd))
    };
    let _ = env.insert("PWD".to_owned(), pwd.display().to_string());

    tracing::info!(commands = commands.len(), cwd = %pwd.display(), "starting job");
    let scratch = Scratch::create(options.temp_dir.as_deref())?;
    let mut executor = CommandTreeExecutor::new(logger, tools, &scratch, options);
    executor.run_command_list(&commands, &mut env, &[])?;
    Ok(executor.into_last_env())
}
