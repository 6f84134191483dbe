//! `hdist hash` — print the identity hash of a job spec.

use std::path::PathBuf;

use clap::Args;

use hdist_core::jobspec::{JobSpec, canonicalize_job_spec, spec_hash};

/// Arguments for the `hash` command.
#[derive(Args, Debug)]
pub struct HashArgs {
    /// Path to the job specification (JSON).
    pub spec: PathBuf,
}

/// Executes the `hash` command.
///
/// # Errors
///
/// Returns an error if the spec cannot be loaded or is malformed.
pub fn execute(args: HashArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.spec)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", args.spec.display()))?;
    let spec = canonicalize_job_spec(&JobSpec::from_json(&text)?)?;
    println!("{}", spec_hash(&spec)?);
    Ok(())
}
