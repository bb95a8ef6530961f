//! # Sync Command Implementation
//!
//! This module implements the `sync` subcommand, which propagates the
//! templates of the configuration into every configured repository.
//!
//! ## Functionality
//!
//! - **Per-repository runs**: repositories are processed one after the other,
//!   each with its own set of templates. A failing repository is reported and
//!   the run continues with the next one.
//! - **Outputs**: a pull request by default, merged right away for
//!   repositories with `autoMerge: true`. `--output` overrides both.
//! - **Exit Codes**: 0 when every repository succeeded, 1 when at least one
//!   failed, 2 when the run could not start.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::{progress_prefix, ProviderArgs, ReportFormat};
use repo_sync::defaults::{
    default_branch_name, default_workspace_root, DEFAULT_COMMIT_MESSAGE, DEFAULT_PULL_REQUEST_TITLE,
};
use repo_sync::exit_codes;
use repo_sync::local_clone::GitCommandClone;
use repo_sync::output::{OutputConfig, Status};
use repo_sync::propagation::PropagationCache;
use repo_sync::repo_sync::{RepoSync, TargetOutcome};
use repo_sync::syncer::{SyncOutput, SyncRequest, UpdateResult};

/// Synchronize the templates into every configured repository
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub provider: ProviderArgs,

    /// What to produce: commit, branch, pull-request or merge.
    ///
    /// Defaults to pull-request, or merge for repositories with `autoMerge`.
    #[arg(long, value_name = "OUTPUT")]
    pub output: Option<SyncOutput>,

    /// Name of the branch carrying the changes.
    #[arg(long, value_name = "NAME")]
    pub branch: Option<String>,

    /// Title of the pull requests.
    #[arg(long, value_name = "TITLE", default_value = DEFAULT_PULL_REQUEST_TITLE)]
    pub title: String,

    /// Message of the commits.
    #[arg(long, value_name = "MESSAGE", default_value = DEFAULT_COMMIT_MESSAGE)]
    pub message: String,

    /// Assume write access to every repository.
    #[arg(long)]
    pub skip_collaborator_check: bool,

    /// Where local clones of forks are made.
    #[arg(long, value_name = "DIR", env = "REPO_SYNC_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Outcome of one repository, as printed in JSON.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryReport {
    name: String,
    repository: String,
    branch: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<UpdateResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

fn elapsed(started: Instant) -> String {
    let seconds = started.elapsed().as_secs();
    format!("{:02}:{:02}:{:02}", seconds / 3600, seconds / 60 % 60, seconds % 60)
}

/// Execute the `sync` command.
pub fn execute(args: SyncArgs, out: &OutputConfig) -> Result<u8> {
    let plans = args.provider.plans()?;
    let gateway = args.provider.gateway()?;
    let local_clone = GitCommandClone::new();
    let workspace = args.workspace.clone().unwrap_or_else(default_workspace_root);

    let branch = args.branch.clone().unwrap_or_else(|| {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        default_branch_name(now)
    });
    let request = SyncRequest::new(SyncOutput::CreatePullRequest, &branch, &args.message, &args.title)
        .skip_collaborator_check(args.skip_collaborator_check);

    // Objects copied for one repository are not checked again for the next.
    let cache = Arc::new(PropagationCache::new());

    let text = args.format == ReportFormat::Text;
    let mut reports = Vec::with_capacity(plans.len());
    let mut failed = false;

    for (index, plan) in plans.iter().enumerate() {
        let prefix = progress_prefix(index, plans.len());
        if text {
            println!("{} Setting up synchronization for '{}'", prefix, plan.name);
        }
        let started = Instant::now();

        let mut target = plan.target.clone();
        if let Some(output) = args.output {
            target.output = Some(output);
        }

        let mut sync = RepoSync::new(&gateway, &local_clone, &workspace).with_cache(Arc::clone(&cache));
        for source in &plan.sources {
            sync.add_source_repository(source.clone());
        }
        sync.add_target_repository(target.clone());

        let report = sync.sync(&request);
        let plan_failed = report.has_failures();
        for (target, outcome) in report.outcomes {
            let mut entry = RepositoryReport {
                name: plan.name.clone(),
                repository: target.display_name(),
                branch: target.branch.clone(),
                status: "",
                result: None,
                reason: None,
            };

            match outcome {
                TargetOutcome::Updated(result) => {
                    if text {
                        println!("{} {}", prefix, out.status_line(Status::InSync, &result.url));
                    }
                    entry.status = "updated";
                    entry.result = Some(result);
                }
                TargetOutcome::InSync => {
                    if text {
                        let message = format!("{} is in sync", target.display_name());
                        println!("{} {}", prefix, out.status_line(Status::InSync, &message));
                    }
                    entry.status = "in-sync";
                }
                TargetOutcome::Skipped { reason } => {
                    if text {
                        println!("{} {} Skipped: {}", prefix, out.badge(Status::Skipped), out.paint(Status::Skipped, &reason));
                    }
                    entry.status = "skipped";
                    entry.reason = Some(reason);
                }
                TargetOutcome::Failed(e) => {
                    failed = true;
                    if text {
                        println!(
                            "{} {} Failed to synchronize '{}': {}",
                            prefix,
                            out.badge(Status::Failed),
                            plan.name,
                            out.paint(Status::Failed, &e.to_string())
                        );
                    }
                    entry.status = "failed";
                    entry.reason = Some(e.to_string());
                }
            }
            reports.push(entry);
        }

        if text && !plan_failed {
            println!("{} Synchronized '{}', took {}", prefix, plan.name, elapsed(started));
        }
    }

    if !text {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    Ok(if failed {
        exit_codes::FAILURE
    } else {
        exit_codes::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_format() {
        assert_eq!(elapsed(Instant::now()), "00:00:00");
    }

    #[test]
    fn test_report_json_skips_empty_fields() {
        let report = RepositoryReport {
            name: "Service".to_string(),
            repository: "acme/svc".to_string(),
            branch: "main".to_string(),
            status: "in-sync",
            result: None,
            reason: None,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"status\":\"in-sync\""));
        assert!(!json.contains("result"));
        assert!(!json.contains("reason"));
    }
}
