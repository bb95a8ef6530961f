//! # Sync Orchestrator
//!
//! Turns a diff into one of the supported outputs for each target.
//!
//! For every target group of the diff, the current user's access decides the
//! path taken:
//!
//! - **collaborator**: the new tree is rebuilt remotely (see
//!   [`crate::target_tree`]), committed on top of the branch tip and then,
//!   depending on [`SyncOutput`], left as a dangling commit, pointed at by a
//!   branch, or proposed (and optionally merged) through a pull request;
//! - **anyone else**: only pull requests are possible. The repository is
//!   forked, the fork cloned locally, the changes written to disk, committed
//!   and pushed to the fork, and a pull request opened from
//!   `forkowner:branch`. Such pull requests are never merged automatically.
//!
//! Unsupported combinations fail before anything is written to the
//! provider.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::address::{Address, ObjectType, PathAddress, EXECUTABLE_MODE};
use crate::diff::{self, Diff};
use crate::error::{Error, Result};
use crate::gateway::{ProviderGateway, PullRequestRequest};
use crate::hash;
use crate::local_clone::LocalClone;
use crate::mapper::{Mapper, TargetGroup};
use crate::object::EntryKind;
use crate::path::encode_url_path;
use crate::propagation::{PropagationCache, Propagator};
use crate::target_tree::{TargetTree, TreeBuilder};

/// What a successful sync leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncOutput {
    /// A commit not referenced by any branch.
    CreateCommit,
    /// A branch pointing at the commit.
    CreateBranch,
    /// A branch and a pull request into the target branch.
    CreatePullRequest,
    /// A pull request merged right away.
    MergePullRequest,
}

impl SyncOutput {
    pub fn is_pull_request(&self) -> bool {
        matches!(self, SyncOutput::CreatePullRequest | SyncOutput::MergePullRequest)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutput::CreateCommit => "commit",
            SyncOutput::CreateBranch => "branch",
            SyncOutput::CreatePullRequest => "pull-request",
            SyncOutput::MergePullRequest => "merge",
        }
    }
}

impl fmt::Display for SyncOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOutput {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "commit" | "create-commit" => Ok(SyncOutput::CreateCommit),
            "branch" | "create-branch" => Ok(SyncOutput::CreateBranch),
            "pull-request" | "pr" | "create-pull-request" => Ok(SyncOutput::CreatePullRequest),
            "merge" | "merge-pull-request" => Ok(SyncOutput::MergePullRequest),
            other => Err(Error::ConfigParse {
                message: format!("Unknown output '{}'", other),
                hint: Some("Use one of: commit, branch, pull-request, merge".to_string()),
            }),
        }
    }
}

/// Reference to what a sync produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub url: String,
    pub commit_sha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request_id: Option<u64>,
}

/// How to materialize the changes of one sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub output: SyncOutput,
    pub branch_name: String,
    pub commit_message: String,
    pub pull_request_title: String,
    pub pull_request_description: Option<String>,
    pub labels: Vec<String>,
    /// Assume write access without asking the provider.
    pub skip_collaborator_check: bool,
}

impl SyncRequest {
    pub fn new(output: SyncOutput, branch_name: &str, commit_message: &str, pull_request_title: &str) -> Self {
        Self {
            output,
            branch_name: branch_name.to_string(),
            commit_message: commit_message.to_string(),
            pull_request_title: pull_request_title.to_string(),
            pull_request_description: None,
            labels: Vec::new(),
            skip_collaborator_check: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.pull_request_description = Some(description.into());
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn skip_collaborator_check(mut self, skip: bool) -> Self {
        self.skip_collaborator_check = skip;
        self
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

pub fn commit_url(host: &str, owner: &str, repository: &str, sha: &str) -> String {
    format!("{}/{}/{}/commit/{}", host, owner, repository, sha)
}

pub fn branch_url(host: &str, owner: &str, repository: &str, base: &str, branch: &str) -> String {
    format!(
        "{}/{}/{}/compare/{}...{}",
        host,
        owner,
        repository,
        base.replace('/', ";"),
        branch.replace('/', ";")
    )
}

pub fn pull_request_url(host: &str, owner: &str, repository: &str, id: u64) -> String {
    format!("{}/{}/{}/pull/{}", host, owner, repository, id)
}

/// Applies diffs through one gateway session.
pub struct Syncer<'a> {
    gateway: &'a dyn ProviderGateway,
    local_clone: &'a dyn LocalClone,
    cache: &'a PropagationCache,
    workspace: PathBuf,
}

impl<'a> Syncer<'a> {
    /// `workspace` is where fork clones are made.
    pub fn new(
        gateway: &'a dyn ProviderGateway,
        local_clone: &'a dyn LocalClone,
        cache: &'a PropagationCache,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            gateway,
            local_clone,
            cache,
            workspace: workspace.into(),
        }
    }

    pub fn diff(&self, input: &Mapper) -> Result<Diff> {
        diff::diff(self.gateway, input)
    }

    /// Whether `target` can receive this request.
    ///
    /// A pull request output is refused while an open pull request with the
    /// same title exists.
    pub fn can_synchronize(&self, target: &PathAddress, request: &SyncRequest) -> Result<bool> {
        if !request.output.is_pull_request() {
            return Ok(true);
        }

        if self.gateway.has_open_pull_request(
            target.owner(),
            target.repository(),
            &request.pull_request_title,
        )? {
            warn!(
                "Cannot create pull request, there is an existing open pull request '{}' in {}",
                request.pull_request_title,
                target.repository_key()
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Applies every target group of `diff`.
    ///
    /// Groups whose rebuilt tree equals the current one produce no result.
    pub fn sync(&self, diff: &Mapper, request: &SyncRequest) -> Result<Vec<UpdateResult>> {
        let mut results = Vec::new();
        for group in diff.transpose() {
            if let Some(result) = self.process_updates(&group, request)? {
                results.push(result);
            }
        }
        Ok(results)
    }

    fn process_updates(&self, group: &TargetGroup, request: &SyncRequest) -> Result<Option<UpdateResult>> {
        let root = group.root().ok_or_else(|| Error::InvalidAddress {
            message: format!("no directive for {}", group.key),
        })?;
        let (owner, repository) = (root.owner(), root.repository());

        if !request.labels.is_empty() && !request.output.is_pull_request() {
            return Err(Error::unsupported(
                "apply_labels",
                format!("labels can only be applied to a pull request, not with '{}' output", request.output),
            ));
        }

        let is_collaborator =
            request.skip_collaborator_check || self.gateway.is_collaborator(owner, repository)?;

        if !is_collaborator && request.output != SyncOutput::CreatePullRequest {
            return Err(Error::unsupported(
                request.output.as_str(),
                format!(
                    "the current user cannot push to {}, only the pull-request output is supported",
                    root.repository_key()
                ),
            ));
        }

        let (commit_sha, source_branch) = if is_collaborator {
            match self.process_in_target_repository(&root, group, &request.commit_message)? {
                Some(sha) => (sha, request.branch_name.clone()),
                None => {
                    info!("Repo {} is in sync", group.key);
                    return Ok(None);
                }
            }
        } else {
            info!("User is not a collaborator, need to create a fork");
            let (fork_owner, sha) = self.process_in_fork(&root, group, request)?;
            (sha, format!("{}:{}", fork_owner, request.branch_name))
        };

        let host = self.gateway.web_url();
        let result = match request.output {
            SyncOutput::CreateCommit => UpdateResult {
                url: commit_url(&host, owner, repository, &commit_sha),
                commit_sha,
                branch_name: None,
                pull_request_id: None,
            },
            SyncOutput::CreateBranch => {
                let branch = self
                    .gateway
                    .create_branch(owner, repository, &request.branch_name, &commit_sha)?;
                UpdateResult {
                    url: branch_url(&host, owner, repository, root.branch(), &branch),
                    commit_sha,
                    branch_name: Some(branch),
                    pull_request_id: None,
                }
            }
            SyncOutput::CreatePullRequest | SyncOutput::MergePullRequest => {
                if is_collaborator {
                    self.gateway
                        .create_branch(owner, repository, &request.branch_name, &commit_sha)?;
                }

                let id = self.gateway.create_pull_request(&PullRequestRequest {
                    owner: owner.to_string(),
                    repository: repository.to_string(),
                    source_branch,
                    target_branch: root.branch().to_string(),
                    title: request.pull_request_title.clone(),
                    description: request.pull_request_description.clone(),
                    merge: is_collaborator && request.output == SyncOutput::MergePullRequest,
                    delete_source_branch: true,
                })?;

                if is_collaborator && !request.labels.is_empty() {
                    let labels = self
                        .gateway
                        .apply_labels(owner, repository, id, &request.labels)?;
                    debug!("Labels of pull request {}: {}", id, labels.join(", "));
                }

                UpdateResult {
                    url: pull_request_url(&host, owner, repository, id),
                    commit_sha,
                    branch_name: Some(request.branch_name.clone()),
                    pull_request_id: Some(id),
                }
            }
        };

        info!("Sync - {} => {}", group.key, result.url);
        Ok(Some(result))
    }

    /// Rebuilds the tree remotely and commits it on the branch tip.
    ///
    /// Returns `None` when the rebuilt tree is the current one.
    fn process_in_target_repository(
        &self,
        root: &PathAddress,
        group: &TargetGroup,
        message: &str,
    ) -> Result<Option<String>> {
        let parent = self.gateway.root_commit_from(root)?;
        let tree = TargetTree::from_group(group)?;
        let builder = TreeBuilder::new(self.gateway, Propagator::new(self.gateway, self.cache));
        let tree_sha = builder.build(&tree)?;

        if hash::same_sha(&tree_sha, &parent.tree_sha) {
            return Ok(None);
        }

        let author = self.gateway.current_user()?.identity(now());
        let sha = self.gateway.create_commit(
            root.owner(),
            root.repository(),
            &tree_sha,
            &parent.sha,
            message,
            &author,
        )?;
        debug!("Created commit {} on top of {}", sha, parent.sha);
        Ok(Some(sha))
    }

    /// Prepares the changes in a local clone of a fork and pushes them.
    ///
    /// Returns the fork owner and the pushed commit sha.
    fn process_in_fork(
        &self,
        root: &PathAddress,
        group: &TargetGroup,
        request: &SyncRequest,
    ) -> Result<(String, String)> {
        let fork = self.gateway.fork(root.owner(), root.repository())?;
        let user = self.gateway.current_user()?;
        let signature = user.identity(now());

        fs::create_dir_all(&self.workspace)?;
        let workdir = tempfile::Builder::new()
            .prefix(&format!("{}-", encode_url_path(&group.key)))
            .tempdir_in(&self.workspace)?;
        let directory = workdir.path().join(root.repository());

        let clone = self.local_clone;
        clone.clone_repository(&fork.clone_url, root.branch(), &directory)?;
        clone.ensure_remote(
            &directory,
            "upstream",
            &self.gateway.clone_url(root.owner(), root.repository()),
        )?;
        clone.fetch(&directory, "upstream")?;
        clone.create_branch(&directory, &request.branch_name)?;
        clone.merge(&directory, &format!("upstream/{}", root.branch()), &signature)?;

        for directive in &group.directives {
            let path = directive.destination.path().unwrap_or_default();
            match &directive.source {
                Address::Path(source) => self.write_source(&directory, source, path)?,
                Address::Null => clone.delete_file(&directory, path)?,
            }
        }

        clone.stage_all(&directory)?;
        let sha = clone.commit(&directory, &request.commit_message, &signature)?;
        clone.push(&directory, "origin", &request.branch_name)?;
        debug!("Pushed {} to {}/{}", sha, fork.owner, fork.repository);

        Ok((fork.owner, sha))
    }

    /// Writes the object at `source` under `path` of the working copy.
    fn write_source(&self, directory: &Path, source: &PathAddress, path: &str) -> Result<()> {
        match source.object_type() {
            ObjectType::Blob => {
                let mut content = Vec::new();
                self.gateway.download_blob(source, &mut content)?;
                let executable = source.mode() == Some(EXECUTABLE_MODE);
                self.local_clone
                    .write_file(directory, path, &content, executable)
            }
            ObjectType::Tree => {
                let (located, listing) = self
                    .gateway
                    .tree_from(source, true)?
                    .ok_or_else(|| Error::NotFound {
                        object_type: source.object_type().to_string(),
                        url: source.url(),
                    })?;
                for entry in &listing.entries {
                    let child_path = format!("{}/{}", path, entry.name);
                    let child = match entry.kind {
                        EntryKind::Blob => located.combine(ObjectType::Blob, &entry.name, &entry.sha, &entry.mode)?,
                        EntryKind::Tree => located.combine(ObjectType::Tree, &entry.name, &entry.sha, &entry.mode)?,
                        EntryKind::Commit => continue,
                    };
                    self.write_source(directory, &child, &child_path)?;
                }
                Ok(())
            }
        }
    }
}
