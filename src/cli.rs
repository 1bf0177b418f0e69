use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "invctl")]
#[command(version)]
#[command(about = "Provision and converge inventory application instances", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Host configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH, env = "INVCTL_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse the configuration and check registry invariants
    Validate,

    /// Preview what apply would change, without mutating anything
    Plan {
        /// Limit to one instance
        instance: Option<String>,
    },

    /// Show per-instance convergence status
    Status,

    /// Converge the host to the declared instance set
    Apply(ApplyArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Show what would change without applying
    #[arg(long)]
    pub dry_run: bool,

    /// Parallel instance pipelines
    #[arg(short, long, default_value_t = 4)]
    pub jobs: u16,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Emit the convergence report as JSON
    #[arg(long)]
    pub json: bool,
}
