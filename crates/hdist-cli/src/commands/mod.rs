//! CLI command definitions and dispatch.

pub mod hash;
pub mod run;

use clap::{Parser, Subcommand};

/// hdist — run hashable job specifications in controlled environments.
#[derive(Parser, Debug)]
#[command(name = "hdist", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a job spec and print the resulting environment.
    Run(run::RunArgs),
    /// Print the identity hash of a job spec.
    Hash(hash::HashArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => run::execute(args),
        Command::Hash(args) => hash::execute(args),
    }
}
