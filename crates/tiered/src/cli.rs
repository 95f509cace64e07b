//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

pub use crate::commands::policy::PolicyCommands;
pub use crate::commands::resolve::ResolveArgs;
pub use crate::commands::watch::WatchArgs;

/// Tiered - layered resolution of secrets, config and metadata
#[derive(Parser, Debug)]
#[command(name = "tiered")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to tiered.yaml (defaults to $TIERED_CONFIG, ./tiered.yaml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve one or more keys
    Resolve(ResolveArgs),

    /// Re-resolve keys periodically and report changes
    Watch(WatchArgs),

    /// Inspect the resolution policy
    #[command(subcommand)]
    Policy(PolicyCommands),
}
