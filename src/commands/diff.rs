//! # Diff Command Implementation
//!
//! This module implements the `diff` subcommand, which shows what `sync`
//! would change in every configured repository.
//!
//! ## Functionality
//!
//! - **Change Detection**: lists the files each repository would receive,
//!   see updated or lose, with the template providing them.
//! - **Exit Codes**: 0 if every repository is in sync, 1 if changes are
//!   pending, 2 if a repository could not be compared.
//!
//! This command is a safe, read-only operation: nothing is written to the
//! repositories.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::{ProviderArgs, ReportFormat};
use repo_sync::address::Address;
use repo_sync::defaults::default_workspace_root;
use repo_sync::diff::ChangeKind;
use repo_sync::exit_codes;
use repo_sync::local_clone::GitCommandClone;
use repo_sync::output::{OutputConfig, Status};
use repo_sync::repo_sync::RepoSync;

/// Show what a sync would change, without changing anything
#[derive(Args, Debug)]
pub struct DiffArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,

    /// Show only a summary without listing individual files.
    #[arg(long)]
    pub summary: bool,

    /// Output format.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// One pending change.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileChange {
    kind: String,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

/// Pending changes of one repository.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryDiff {
    name: String,
    repository: String,
    branch: String,
    changes: Vec<FileChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn marker(kind: &str) -> &'static str {
    match kind {
        "create" => "+",
        "update" => "~",
        _ => "-",
    }
}

/// Execute the `diff` command.
pub fn execute(args: DiffArgs, out: &OutputConfig) -> Result<u8> {
    let plans = args.provider.plans()?;
    let gateway = args.provider.gateway()?;
    let local_clone = GitCommandClone::new();
    let workspace = default_workspace_root();

    let mut diffs = Vec::with_capacity(plans.len());
    for plan in &plans {
        let mut sync = RepoSync::new(&gateway, &local_clone, &workspace);
        for source in &plan.sources {
            sync.add_source_repository(source.clone());
        }

        let mut entry = RepositoryDiff {
            name: plan.name.clone(),
            repository: plan.target.display_name(),
            branch: plan.target.branch.clone(),
            changes: Vec::new(),
            error: None,
        };

        match sync.calculate_sync_context(&plan.target) {
            Ok(context) => {
                for change in &context.changes {
                    entry.changes.push(FileChange {
                        kind: change.kind.to_string(),
                        path: change.destination.path().unwrap_or_default().to_string(),
                        source: match &change.source {
                            Address::Path(source) if change.kind != ChangeKind::Removal => Some(format!(
                                "{}:{}",
                                source.repository_key(),
                                source.path().unwrap_or_default()
                            )),
                            _ => None,
                        },
                    });
                }
                entry.changes.sort_by(|a, b| a.path.cmp(&b.path));
            }
            Err(e) => entry.error = Some(e.to_string()),
        }
        diffs.push(entry);
    }

    let pending = diffs.iter().any(|d| !d.changes.is_empty());
    let errored = diffs.iter().any(|d| d.error.is_some());

    match args.format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&diffs)?),
        ReportFormat::Text => print_text(&diffs, args.summary, out),
    }

    Ok(if errored {
        exit_codes::ERROR
    } else if pending {
        exit_codes::CHANGES_PENDING
    } else {
        exit_codes::SUCCESS
    })
}

fn print_text(diffs: &[RepositoryDiff], summary: bool, out: &OutputConfig) {
    for diff in diffs {
        println!("{} ({} on '{}')", diff.name, diff.repository, diff.branch);

        if let Some(error) = &diff.error {
            println!("  {}", out.status_line(Status::Failed, error));
            continue;
        }
        if diff.changes.is_empty() {
            println!("  {}", out.status_line(Status::InSync, "No changes detected."));
            continue;
        }

        let count = |kind: &str| diff.changes.iter().filter(|c| c.kind == kind).count();
        if !summary {
            for change in &diff.changes {
                match &change.source {
                    Some(source) => println!("  {} {} (from {})", marker(&change.kind), change.path, source),
                    None => println!("  {} {}", marker(&change.kind), change.path),
                }
            }
        }
        println!(
            "  Summary: {} added, {} modified, {} deleted",
            count("create"),
            count("update"),
            count("remove")
        );
    }
}
