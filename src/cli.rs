//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;
use repo_sync::output::OutputConfig;

/// Repository Sync - Propagate template files into git repositories
#[derive(Parser, Debug)]
#[command(name = "repo-sync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synchronize the templates into every configured repository
    Sync(commands::sync::SyncArgs),

    /// Show what a sync would change, without changing anything
    Diff(commands::diff::DiffArgs),
}

impl Cli {
    /// Execute the CLI command, returning the process exit code
    pub fn execute(self) -> Result<u8> {
        init_logging(&self.log_level);

        let out = OutputConfig::from_env_and_flag(&self.color);
        console::set_colors_enabled(out.use_color);

        match self.command {
            Commands::Sync(args) => commands::sync::execute(args, &out),
            Commands::Diff(args) => commands::diff::execute(args, &out),
        }
    }
}

/// Logs go to stderr; `RUST_LOG` takes precedence over `--log-level`.
fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}
