//! # CLI Command Implementations
//!
//! This module contains the implementation for each subcommand of the
//! `repo-sync` command-line tool. Each subcommand is defined in its own file.
//!
//! ## Structure
//!
//! Each command module contains:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`.
//! - An `execute` function that takes the parsed `Args` and returns the
//!   process exit code.
//!
//! The arguments locating the configuration and the repositories are shared
//! by every command through [`ProviderArgs`].

pub mod diff;
pub mod sync;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};

use repo_sync::config::{self, SyncPlan};
use repo_sync::defaults::DEFAULT_CONFIG_FILE;
use repo_sync::gateway::bare::BareRepoGateway;
use repo_sync::gateway::User;

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

/// Where the configuration and the repositories are.
#[derive(Args, Debug)]
pub struct ProviderArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Directory holding the bare repositories, as `<root>/<owner>/<repository>.git`.
    #[arg(long, value_name = "DIR", env = "REPO_SYNC_ROOT")]
    pub root: PathBuf,

    /// Login the changes are made as; forks are created under this owner.
    #[arg(long, value_name = "LOGIN", env = "REPO_SYNC_USER", default_value = "repo-sync")]
    pub user: String,

    /// Author name of the commits (defaults to the login).
    #[arg(long, value_name = "NAME")]
    pub user_name: Option<String>,

    /// Author email of the commits.
    #[arg(long, value_name = "EMAIL")]
    pub user_email: Option<String>,

    /// Re-hash every blob before copying it into another repository.
    #[arg(long)]
    pub verify_hashes: bool,
}

impl ProviderArgs {
    pub fn plans(&self) -> Result<Vec<SyncPlan>> {
        if !self.config.exists() {
            bail!(
                "Configuration file not found: {}\nhint: pass --config or create {}",
                self.config.display(),
                DEFAULT_CONFIG_FILE
            );
        }
        let context = config::from_file(&self.config)
            .with_context(|| format!("Failed to load config from {}", self.config.display()))?;
        Ok(context.plans()?)
    }

    pub fn gateway(&self) -> Result<BareRepoGateway> {
        if !self.root.is_dir() {
            bail!("Repository root not found: {}", self.root.display());
        }
        let user = User::new(
            &self.user,
            self.user_name.as_deref().unwrap_or(&self.user),
            self.user_email.as_deref(),
        );
        Ok(BareRepoGateway::new(&self.root, user).with_verify_hashes(self.verify_hashes))
    }
}

/// `[(3 / 10)]`
pub fn progress_prefix(index: usize, total: usize) -> String {
    format!("[({} / {})]", index + 1, total)
}
