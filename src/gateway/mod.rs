//! # Provider Gateway
//!
//! The boundary between the synchronization engine and a git hosting
//! provider. Everything the engine needs from a remote (listing trees,
//! moving objects between repositories, creating commits, branches and pull
//! requests, forking) goes through [`ProviderGateway`].
//!
//! Two implementations ship with the crate:
//!
//! - [`memory::MemoryGateway`]: a complete in-process forge, used by the test
//!   suite and for dry runs.
//! - [`bare::BareRepoGateway`]: a directory of bare repositories driven
//!   through the system `git` command.
//!
//! This module also holds the pieces every gateway shares: per-URL lookup
//! memoization ([`LookupCache`]), the owner/repository to project id cache
//! ([`ProjectIds`]) and the bounded, cancellable fork import wait
//! ([`wait_for_fork_import`]).

pub mod bare;
pub mod memory;

use std::collections::HashMap;
use std::hash::Hash;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::PathAddress;
use crate::error::{Error, Result};
use crate::object::{Commit, Identity, NewTree, TreeEntry, TreeListing};

/// The authenticated actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account name, also the owner of any fork created on its behalf.
    pub login: String,
    /// Display name used in commit signatures.
    pub name: String,
    /// Public email, when the provider exposes one.
    pub email: Option<String>,
}

impl User {
    /// Placeholder used when the provider hides the actor's email.
    pub const HIDDEN_EMAIL: &'static str = "hidden@protected.com";

    pub fn new(login: &str, name: &str, email: Option<&str>) -> Self {
        Self {
            login: login.to_string(),
            name: name.to_string(),
            email: email.map(str::to_string),
        }
    }

    /// Commit signature for this user at `timestamp`.
    pub fn identity(&self, timestamp: i64) -> Identity {
        Identity::new(
            &self.name,
            self.email.as_deref().unwrap_or(Self::HIDDEN_EMAIL),
            timestamp,
        )
    }
}

/// A fork owned by the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkedRepository {
    pub owner: String,
    pub repository: String,
    /// Location a local clone can be made from.
    pub clone_url: String,
}

/// Parameters of a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRequest {
    pub owner: String,
    pub repository: String,
    /// Branch holding the changes, `forkowner:branch` when it lives in a fork.
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub description: Option<String>,
    /// Merge immediately after creation.
    pub merge: bool,
    /// Delete the source branch once merged.
    pub delete_source_branch: bool,
}

/// Lifecycle of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Merged,
}

/// A pull request as recorded by a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub id: u64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    pub state: PullRequestState,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub delete_source_branch: bool,
}

impl PullRequest {
    /// Record for a freshly opened pull request.
    pub fn open(id: u64, request: &PullRequestRequest) -> Self {
        Self {
            id,
            title: request.title.clone(),
            description: request.description.clone(),
            source_branch: request.source_branch.clone(),
            target_branch: request.target_branch.clone(),
            state: PullRequestState::Open,
            labels: Vec::new(),
            delete_source_branch: request.delete_source_branch,
        }
    }

    /// Adds labels not already present, keeping their order.
    pub fn add_labels(&mut self, labels: &[String]) {
        for label in labels {
            if !self.labels.contains(label) {
                self.labels.push(label.clone());
            }
        }
    }

    /// Whether the source branch lives in another repository (`owner:branch`).
    pub fn fork_source(&self) -> Option<(&str, &str)> {
        self.source_branch.split_once(':')
    }
}

/// Operations the engine needs from a git hosting provider.
///
/// Implementations must be usable from several threads at once: the
/// orchestrator processes targets in parallel and the tree builder walks
/// sibling subtrees concurrently.
pub trait ProviderGateway: Send + Sync {
    /// Base URL used to build links to commits, branches and pull requests.
    fn web_url(&self) -> String;

    /// Location a local clone of `owner/repository` can be made from.
    fn clone_url(&self, owner: &str, repository: &str) -> String;

    fn current_user(&self) -> Result<User>;

    /// Whether the current user can push to `owner/repository`.
    fn is_collaborator(&self, owner: &str, repository: &str) -> Result<bool>;

    /// Forks `owner/repository` for the current user, waiting until the fork
    /// is ready to be cloned.
    fn fork(&self, owner: &str, repository: &str) -> Result<ForkedRepository>;

    /// Streams the raw content of the blob at `source`.
    fn download_blob(&self, source: &PathAddress, target: &mut dyn Write) -> Result<()>;

    /// Whether an open pull request titled `title` already exists.
    fn has_open_pull_request(&self, owner: &str, repository: &str, title: &str) -> Result<bool>;

    /// Tip commit of the branch of `address`.
    fn root_commit_from(&self, address: &PathAddress) -> Result<Commit>;

    /// Looks up the tree at `address`.
    ///
    /// Returns the address enriched with the tree sha along with its
    /// entries. A missing tree is `Ok(None)`, or `Err(NotFound)` when
    /// `throws_if_not_found` is set.
    fn tree_from(
        &self,
        address: &PathAddress,
        throws_if_not_found: bool,
    ) -> Result<Option<(PathAddress, TreeListing)>>;

    /// Looks up the blob at `address`, with the same contract as
    /// [`ProviderGateway::tree_from`].
    fn blob_from(
        &self,
        address: &PathAddress,
        throws_if_not_found: bool,
    ) -> Result<Option<(PathAddress, TreeEntry)>>;

    /// Paths of every blob reachable from the tip of `branch`.
    fn list_blobs_recursive(&self, owner: &str, repository: &str, branch: &str)
        -> Result<Vec<String>>;

    /// Downloads blob `sha` of `owner/repository` into local staging.
    fn fetch_blob(&self, owner: &str, repository: &str, sha: &str) -> Result<()>;

    /// Uploads the staged blob `sha` into `owner/repository`, returning the
    /// sha the provider computed.
    fn create_blob(&self, owner: &str, repository: &str, sha: &str) -> Result<String>;

    /// Creates `tree` in `owner/repository` and returns its sha.
    fn create_tree(&self, tree: &NewTree, owner: &str, repository: &str) -> Result<String>;

    /// Creates a commit of `tree_sha` on top of `parent_sha` and returns its
    /// sha.
    fn create_commit(
        &self,
        owner: &str,
        repository: &str,
        tree_sha: &str,
        parent_sha: &str,
        message: &str,
        author: &Identity,
    ) -> Result<String>;

    /// Points `branch` at `commit_sha`, creating it if needed.
    fn create_branch(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
        commit_sha: &str,
    ) -> Result<String>;

    /// Opens a pull request, merging it when requested, and returns its id.
    fn create_pull_request(&self, request: &PullRequestRequest) -> Result<u64>;

    /// Adds `labels` to pull request `id`, returning the full label set.
    fn apply_labels(
        &self,
        owner: &str,
        repository: &str,
        id: u64,
        labels: &[String],
    ) -> Result<Vec<String>>;
}

/// Per-URL memoization of successful tree and blob lookups.
#[derive(Debug, Default)]
pub struct LookupCache {
    trees: Mutex<HashMap<String, (PathAddress, TreeListing)>>,
    blobs: Mutex<HashMap<String, (PathAddress, TreeEntry)>>,
    commits: Mutex<HashMap<String, Commit>>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self, address: &PathAddress) -> Result<Option<(PathAddress, TreeListing)>> {
        let trees = self.trees.lock().map_err(|_| Error::poisoned("tree lookups"))?;
        Ok(trees.get(&address.url()).cloned())
    }

    pub fn remember_tree(&self, found: &(PathAddress, TreeListing)) -> Result<()> {
        let mut trees = self.trees.lock().map_err(|_| Error::poisoned("tree lookups"))?;
        trees.insert(found.0.url(), found.clone());
        Ok(())
    }

    pub fn blob(&self, address: &PathAddress) -> Result<Option<(PathAddress, TreeEntry)>> {
        let blobs = self.blobs.lock().map_err(|_| Error::poisoned("blob lookups"))?;
        Ok(blobs.get(&address.url()).cloned())
    }

    pub fn remember_blob(&self, found: &(PathAddress, TreeEntry)) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|_| Error::poisoned("blob lookups"))?;
        blobs.insert(found.0.url(), found.clone());
        Ok(())
    }

    pub fn commit(&self, address: &PathAddress) -> Result<Option<Commit>> {
        let commits = self.commits.lock().map_err(|_| Error::poisoned("commit lookups"))?;
        Ok(commits.get(&address.root().url()).cloned())
    }

    pub fn remember_commit(&self, address: &PathAddress, commit: &Commit) -> Result<()> {
        let mut commits = self.commits.lock().map_err(|_| Error::poisoned("commit lookups"))?;
        commits.insert(address.root().url(), commit.clone());
        Ok(())
    }

    /// Drops everything known about the branch of `address`.
    ///
    /// Called after the branch moved, so later lookups see the new tip.
    pub fn forget_branch(&self, address: &PathAddress) -> Result<()> {
        let key = address.target_key();

        self.trees
            .lock()
            .map_err(|_| Error::poisoned("tree lookups"))?
            .retain(|_, (found, _)| found.target_key() != key);
        self.blobs
            .lock()
            .map_err(|_| Error::poisoned("blob lookups"))?
            .retain(|_, (found, _)| found.target_key() != key);
        self.commits
            .lock()
            .map_err(|_| Error::poisoned("commit lookups"))?
            .remove(&address.root().url());
        Ok(())
    }
}

/// Cache of provider-side project identifiers, keyed by `owner/repository`.
///
/// Owned by one gateway instance; two gateways never share ids.
#[derive(Debug)]
pub struct ProjectIds<T> {
    ids: Mutex<HashMap<String, T>>,
}

impl<T> Default for ProjectIds<T> {
    fn default() -> Self {
        Self {
            ids: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> ProjectIds<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached id, resolving and caching it on first use.
    ///
    /// Failed resolutions are not cached.
    pub fn get_or_resolve<F>(&self, owner: &str, repository: &str, resolve: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let key = format!("{}/{}", owner, repository);
        {
            let ids = self.ids.lock().map_err(|_| Error::poisoned("project ids"))?;
            if let Some(id) = ids.get(&key) {
                return Ok(id.clone());
            }
        }

        let id = resolve()?;
        let mut ids = self.ids.lock().map_err(|_| Error::poisoned("project ids"))?;
        Ok(ids.entry(key).or_insert(id).clone())
    }

    pub fn len(&self) -> usize {
        self.ids.lock().map(|ids| ids.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounds of the fork import wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ForkPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            delay: Duration::from_secs(1),
        }
    }
}

impl ForkPolicy {
    /// A policy that polls `max_attempts` times without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }
}

/// Shared flag used to abort long-running waits.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Polls `is_ready` until it reports the fork as imported.
///
/// Gives up with `ForkImportTimeout` after `policy.max_attempts` polls and
/// with `Cancelled` as soon as `cancel` is triggered.
pub fn wait_for_fork_import<F>(
    repository: &str,
    policy: &ForkPolicy,
    cancel: &CancellationToken,
    mut is_ready: F,
) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                operation: format!("waiting for the fork of {}", repository),
            });
        }

        if is_ready()? {
            log::debug!("Fork of {} ready after {} attempt(s)", repository, attempt);
            return Ok(());
        }

        if attempt < policy.max_attempts && !policy.delay.is_zero() {
            thread::sleep(policy.delay);
        }
    }

    Err(Error::ForkImportTimeout {
        repository: repository.to_string(),
        attempts: policy.max_attempts,
    })
}

/// At-most-once execution per key.
///
/// The first caller for a key runs the work while later callers for the
/// same key wait for it; once the work succeeded it is never run again for
/// that key. A failed run leaves the key open for the next caller.
#[derive(Debug)]
pub(crate) struct KeyedOnce<K> {
    gates: Mutex<HashMap<K, Arc<Mutex<bool>>>>,
}

impl<K> Default for KeyedOnce<K> {
    fn default() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedOnce<K> {
    /// Runs `work` unless it already succeeded for `key`.
    ///
    /// Returns whether this call did the work. `work` must not re-enter
    /// the same `KeyedOnce` with `key`.
    pub(crate) fn run<F>(&self, key: &K, work: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        let gate = {
            let mut gates = self.gates.lock().map_err(|_| Error::poisoned("once gates"))?;
            gates.entry(key.clone()).or_default().clone()
        };

        let mut done = gate.lock().map_err(|_| Error::poisoned("once gate"))?;
        if *done {
            return Ok(false);
        }
        work()?;
        *done = true;
        Ok(true)
    }

    pub(crate) fn is_done(&self, key: &K) -> bool {
        let gate = match self.gates.lock() {
            Ok(gates) => gates.get(key).cloned(),
            Err(_) => None,
        };
        gate.and_then(|g| g.lock().ok().map(|done| *done))
            .unwrap_or(false)
    }
}
