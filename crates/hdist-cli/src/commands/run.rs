//! `hdist run` — execute a job specification.

use std::path::PathBuf;

use clap::Args;

use hdist_common::log::TracingLogger;
use hdist_common::types::ArtifactId;
use hdist_core::env::{Env, Virtuals};
use hdist_core::jobspec::JobSpec;
use hdist_core::store::DirArtifactStore;
use hdist_core::tools::NoTools;
use hdist_runner::{RunOptions, run_job};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the job specification (JSON).
    pub spec: PathBuf,

    /// Root directory of the artifact store.
    #[arg(long)]
    pub store: PathBuf,

    /// Directory the job's `$ARTIFACT` points at.
    #[arg(long)]
    pub artifact_dir: PathBuf,

    /// Starting working directory of the job.
    #[arg(long, default_value = ".")]
    pub cwd: PathBuf,

    /// Map a virtual import to a real artifact id (repeatable).
    #[arg(long = "virtual", value_name = "VIRTUAL=ID")]
    pub virtuals: Vec<String>,

    /// Extra environment overlaid over the import bindings (repeatable).
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub override_env: Vec<String>,

    /// Configuration document (JSON) serialized into `HDIST_CONFIG`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use this (empty) directory as the run scratch dir and keep it.
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Drop into an interactive shell instead of spawning commands.
    #[arg(long)]
    pub debug: bool,
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if the spec cannot be loaded or the job fails.
pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.spec)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", args.spec.display()))?;
    let spec = JobSpec::from_json(&text)?;

    let mut virtuals = Virtuals::new();
    for pair in &args.virtuals {
        let (virtual_id, real_id) = split_pair(pair, "--virtual")?;
        let _ = virtuals.insert(virtual_id.to_owned(), ArtifactId::new(real_id));
    }
    let mut override_env = Env::new();
    for pair in &args.override_env {
        let (key, value) = split_pair(pair, "--env")?;
        let _ = override_env.insert(key.to_owned(), value.to_owned());
    }

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
            serde_json::from_str(&text)?
        }
        None => serde_json::Value::Null,
    };

    let options = RunOptions {
        override_env,
        artifact_dir: args.artifact_dir,
        virtuals,
        cwd: args.cwd,
        config,
        temp_dir: args.temp_dir,
        debug: args.debug,
        ..RunOptions::default()
    };
    let store = DirArtifactStore::new(args.store);
    let logger = TracingLogger::new();

    let final_env = run_job(&logger, &store, &NoTools, &spec, &options)?;
    println!("{}", serde_json::to_string_pretty(&final_env)?);
    Ok(())
}

fn split_pair<'a>(pair: &'a str, flag: &str) -> anyhow::Result<(&'a str, &'a str)> {
    pair.split_once('=')
        .ok_or_else(|| anyhow::anyhow!("{flag} expects KEY=VALUE, got {pair:?}"))
}
