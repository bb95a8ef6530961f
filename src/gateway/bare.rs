//! A provider made of bare repositories on disk.
//!
//! Repositories live at `<root>/<owner>/<repository>.git` and are driven
//! through the system `git` plumbing commands. Pull requests are YAML
//! records stored next to the refs, under `sync/pull-requests/`.
//!
//! The current user is a collaborator of the repositories it owns. For
//! other repositories a `sync/collaborators` file (one login per line) is
//! authoritative when present; without it, write access to the repository
//! directory counts.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Mutex;

use log::{debug, info};

use super::{
    wait_for_fork_import, CancellationToken, ForkPolicy, ForkedRepository, LookupCache,
    ProjectIds, ProviderGateway, PullRequest, PullRequestRequest, PullRequestState, User,
};
use crate::address::{ObjectType, PathAddress, TREE_MODE};
use crate::error::{Error, Result};
use crate::local_clone::signature_env;
use crate::object::{Commit, EntryKind, Identity, NewTree, TreeEntry, TreeListing};
use crate::staging::BlobStaging;

const PULL_REQUESTS_DIR: &str = "sync/pull-requests";
const COLLABORATORS_FILE: &str = "sync/collaborators";

/// [`ProviderGateway`] over a directory of bare repositories.
#[derive(Debug)]
pub struct BareRepoGateway {
    root: PathBuf,
    user: User,
    lookups: LookupCache,
    ids: ProjectIds<PathBuf>,
    staging: BlobStaging,
    fork_policy: ForkPolicy,
    cancel: CancellationToken,
    pull_requests: Mutex<()>,
}

impl BareRepoGateway {
    pub fn new(root: impl Into<PathBuf>, user: User) -> Self {
        Self {
            root: root.into(),
            user,
            lookups: LookupCache::new(),
            ids: ProjectIds::new(),
            staging: BlobStaging::default(),
            fork_policy: ForkPolicy::default(),
            cancel: CancellationToken::new(),
            pull_requests: Mutex::new(()),
        }
    }

    pub fn with_fork_policy(mut self, policy: ForkPolicy) -> Self {
        self.fork_policy = policy;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_verify_hashes(mut self, verify: bool) -> Self {
        self.staging = BlobStaging::new(verify);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `owner/repository` lives, whether or not it exists.
    pub fn repository_path(&self, owner: &str, repository: &str) -> PathBuf {
        self.root.join(owner).join(format!("{}.git", repository))
    }

    fn project_dir(&self, owner: &str, repository: &str) -> Result<PathBuf> {
        self.ids.get_or_resolve(owner, repository, || {
            let dir = self.repository_path(owner, repository);
            if dir.is_dir() {
                Ok(dir)
            } else {
                Err(Error::NotFound {
                    object_type: "Repository".to_string(),
                    url: dir.display().to_string(),
                })
            }
        })
    }

    fn git_output(
        &self,
        directory: &Path,
        args: &[&str],
        env: &[(&str, String)],
        input: Option<&[u8]>,
    ) -> Result<Output> {
        debug!("git {} ({})", args.join(" "), directory.display());

        let mut child = Command::new("git")
            .args(args)
            .current_dir(directory)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::provider(args[0], format!("cannot run git: {}", e)))?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input)?;
        }
        Ok(child.wait_with_output()?)
    }

    /// Runs a git command that must succeed.
    fn git(
        &self,
        directory: &Path,
        args: &[&str],
        env: &[(&str, String)],
        input: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let output = self.git_output(directory, args, env, input)?;
        if !output.status.success() {
            return Err(Error::provider(
                args[0],
                format!(
                    "git {} failed in {}: {}",
                    args.join(" "),
                    directory.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(output.stdout)
    }

    fn git_text(&self, directory: &Path, args: &[&str]) -> Result<String> {
        let stdout = self.git(directory, args, &[], None)?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    /// Sha of `reference`, `None` when it doesn't resolve.
    fn resolve(&self, directory: &Path, reference: &str) -> Result<Option<String>> {
        let output = self.git_output(
            directory,
            &["rev-parse", "--verify", "--quiet", reference],
            &[],
            None,
        )?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    fn branch_tip(&self, directory: &Path, branch: &str) -> Result<Option<String>> {
        self.resolve(directory, &format!("refs/heads/{}^{{commit}}", branch))
    }

    fn list_tree(&self, directory: &Path, args: &[&str]) -> Result<Vec<TreeEntry>> {
        let mut full = vec!["ls-tree", "-z"];
        full.extend_from_slice(args);
        let stdout = self.git(directory, &full, &[], None)?;
        parse_ls_tree(&stdout)
    }

    /// The entry at `address`, `None` when the branch or path is missing.
    fn lookup(&self, directory: &Path, address: &PathAddress) -> Result<Option<TreeEntry>> {
        let tip = match self.branch_tip(directory, address.branch())? {
            Some(tip) => tip,
            None => return Ok(None),
        };

        match address.path() {
            None => {
                let tree = self.git_text(directory, &["rev-parse", &format!("{}^{{tree}}", tip)])?;
                Ok(Some(TreeEntry::new(TREE_MODE, "", &tree, EntryKind::Tree)))
            }
            Some(path) => Ok(self
                .list_tree(directory, &[&tip, "--", path])?
                .into_iter()
                .find(|entry| entry.name == path)),
        }
    }

    fn pull_request_dir(&self, owner: &str, repository: &str) -> Result<PathBuf> {
        Ok(self.project_dir(owner, repository)?.join(PULL_REQUESTS_DIR))
    }

    fn load_pull_requests(&self, owner: &str, repository: &str) -> Result<Vec<PullRequest>> {
        let dir = self.pull_request_dir(owner, repository)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut pull_requests = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                let content = fs::read_to_string(&path)?;
                pull_requests.push(serde_yaml::from_str::<PullRequest>(&content)?);
            }
        }
        pull_requests.sort_by_key(|pr| pr.id);
        Ok(pull_requests)
    }

    fn save_pull_request(&self, owner: &str, repository: &str, pull_request: &PullRequest) -> Result<()> {
        let dir = self.pull_request_dir(owner, repository)?;
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join(format!("{}.yaml", pull_request.id)),
            serde_yaml::to_string(pull_request)?,
        )?;
        Ok(())
    }

    fn forget(&self, owner: &str, repository: &str, branch: &str) -> Result<()> {
        self.lookups
            .forget_branch(&PathAddress::tree(owner, repository, branch, None)?)
    }

    /// Pull requests of `owner/repository`, oldest first.
    pub fn pull_requests(&self, owner: &str, repository: &str) -> Result<Vec<PullRequest>> {
        self.load_pull_requests(owner, repository)
    }
}

fn not_found(address: &PathAddress) -> Error {
    Error::NotFound {
        object_type: address.object_type().to_string(),
        url: address.url(),
    }
}

/// Parses `git ls-tree -z` output.
fn parse_ls_tree(output: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    for record in output.split(|b| *b == 0).filter(|r| !r.is_empty()) {
        let record = String::from_utf8_lossy(record);
        let invalid = || Error::provider("ls-tree", format!("unexpected entry '{}'", record));

        let (meta, name) = record.split_once('\t').ok_or_else(invalid)?;
        let mut fields = meta.split(' ');
        let (mode, kind, sha) = match (fields.next(), fields.next(), fields.next()) {
            (Some(mode), Some(kind), Some(sha)) => (mode, kind, sha),
            _ => return Err(invalid()),
        };
        let kind = EntryKind::parse(kind).ok_or_else(invalid)?;
        entries.push(TreeEntry::new(mode, name, sha, kind));
    }
    Ok(entries)
}

impl ProviderGateway for BareRepoGateway {
    fn web_url(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn clone_url(&self, owner: &str, repository: &str) -> String {
        self.repository_path(owner, repository).display().to_string()
    }

    fn current_user(&self) -> Result<User> {
        Ok(self.user.clone())
    }

    fn is_collaborator(&self, owner: &str, repository: &str) -> Result<bool> {
        let dir = self.project_dir(owner, repository)?;
        if owner == self.user.login {
            return Ok(true);
        }

        let collaborators = dir.join(COLLABORATORS_FILE);
        if collaborators.is_file() {
            let content = fs::read_to_string(&collaborators)?;
            return Ok(content.lines().any(|line| line.trim() == self.user.login));
        }
        Ok(!fs::metadata(&dir)?.permissions().readonly())
    }

    fn fork(&self, owner: &str, repository: &str) -> Result<ForkedRepository> {
        let upstream = self.project_dir(owner, repository)?;
        let fork = self.repository_path(&self.user.login, repository);
        let fork_name = format!("{}/{}", self.user.login, repository);

        if fork.is_dir() {
            debug!("Reusing existing fork {}", fork_name);
        } else {
            info!("Forking {}/{} into {}", owner, repository, fork_name);
            let parent = fork.parent().unwrap_or(&self.root);
            fs::create_dir_all(parent)?;
            let upstream = upstream.display().to_string();
            let target = fork.display().to_string();
            self.git(parent, &["clone", "--bare", "--quiet", &upstream, &target], &[], None)?;
        }

        wait_for_fork_import(&fork_name, &self.fork_policy, &self.cancel, || {
            Ok(self
                .git_output(&fork, &["rev-parse", "--git-dir"], &[], None)?
                .status
                .success())
        })?;

        Ok(ForkedRepository {
            owner: self.user.login.clone(),
            repository: repository.to_string(),
            clone_url: self.clone_url(&self.user.login, repository),
        })
    }

    fn download_blob(&self, source: &PathAddress, target: &mut dyn Write) -> Result<()> {
        let (found, _) = self
            .blob_from(source, true)?
            .ok_or_else(|| not_found(source))?;
        let dir = self.project_dir(source.owner(), source.repository())?;
        let content = self.git(&dir, &["cat-file", "blob", found.sha().unwrap_or_default()], &[], None)?;
        target.write_all(&content)?;
        Ok(())
    }

    fn has_open_pull_request(&self, owner: &str, repository: &str, title: &str) -> Result<bool> {
        Ok(self
            .load_pull_requests(owner, repository)?
            .iter()
            .any(|pr| pr.state == PullRequestState::Open && pr.title == title))
    }

    fn root_commit_from(&self, address: &PathAddress) -> Result<Commit> {
        if let Some(commit) = self.lookups.commit(address)? {
            return Ok(commit);
        }

        let dir = self.project_dir(address.owner(), address.repository())?;
        let sha = self
            .branch_tip(&dir, address.branch())?
            .ok_or_else(|| not_found(&address.root()))?;
        let tree_sha = self.git_text(&dir, &["rev-parse", &format!("{}^{{tree}}", sha)])?;

        let commit = Commit { sha, tree_sha };
        self.lookups.remember_commit(address, &commit)?;
        Ok(commit)
    }

    fn tree_from(
        &self,
        address: &PathAddress,
        throws_if_not_found: bool,
    ) -> Result<Option<(PathAddress, TreeListing)>> {
        if let Some(found) = self.lookups.tree(address)? {
            return Ok(Some(found));
        }

        let dir = self.project_dir(address.owner(), address.repository())?;
        let entry = self
            .lookup(&dir, address)?
            .filter(|entry| entry.kind == EntryKind::Tree);

        let entry = match entry {
            Some(entry) => entry,
            None if throws_if_not_found => return Err(not_found(address)),
            None => return Ok(None),
        };

        let listing = TreeListing {
            path: address.path().unwrap_or_default().to_string(),
            sha: entry.sha.clone(),
            entries: self.list_tree(&dir, &[&entry.sha])?,
        };
        let found = (address.enriched(&entry.sha, TREE_MODE), listing);
        self.lookups.remember_tree(&found)?;
        Ok(Some(found))
    }

    fn blob_from(
        &self,
        address: &PathAddress,
        throws_if_not_found: bool,
    ) -> Result<Option<(PathAddress, TreeEntry)>> {
        if let Some(found) = self.lookups.blob(address)? {
            return Ok(Some(found));
        }

        let dir = self.project_dir(address.owner(), address.repository())?;
        let entry = match address.object_type() {
            ObjectType::Blob => self.lookup(&dir, address)?,
            ObjectType::Tree => None,
        }
        .filter(|entry| entry.kind == EntryKind::Blob);

        match entry {
            Some(entry) => {
                let found = (address.enriched(&entry.sha, &entry.mode), entry);
                self.lookups.remember_blob(&found)?;
                Ok(Some(found))
            }
            None if throws_if_not_found => Err(not_found(address)),
            None => Ok(None),
        }
    }

    fn list_blobs_recursive(&self, owner: &str, repository: &str, branch: &str) -> Result<Vec<String>> {
        let dir = self.project_dir(owner, repository)?;
        let tip = self.branch_tip(&dir, branch)?.ok_or_else(|| Error::NotFound {
            object_type: "Tree".to_string(),
            url: format!("{}/{}/tree/{}", owner, repository, branch),
        })?;

        let mut paths: Vec<String> = self
            .list_tree(&dir, &["-r", &tip])?
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::Blob)
            .map(|entry| entry.name)
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn fetch_blob(&self, owner: &str, repository: &str, sha: &str) -> Result<()> {
        let dir = self.project_dir(owner, repository)?;
        self.staging.stage_with(sha, |target| {
            let content = self.git(&dir, &["cat-file", "blob", sha], &[], None)?;
            target.write_all(&content)?;
            Ok(())
        })?;
        Ok(())
    }

    fn create_blob(&self, owner: &str, repository: &str, sha: &str) -> Result<String> {
        let dir = self.project_dir(owner, repository)?;
        self.staging.verify(sha)?;
        let staged = self.staging.path_for(sha)?.display().to_string();
        let created = self.git(&dir, &["hash-object", "-w", "--no-filters", &staged], &[], None)?;
        Ok(String::from_utf8_lossy(&created).trim().to_string())
    }

    fn create_tree(&self, tree: &NewTree, owner: &str, repository: &str) -> Result<String> {
        let dir = self.project_dir(owner, repository)?;

        let mut input = Vec::new();
        for entry in tree.entries() {
            write!(
                input,
                "{} {} {}\t{}\0",
                entry.mode.trim_start_matches('0'),
                entry.kind.as_str(),
                entry.sha,
                entry.name
            )?;
        }

        let created = self.git(&dir, &["mktree", "-z"], &[], Some(&input))?;
        Ok(String::from_utf8_lossy(&created).trim().to_string())
    }

    fn create_commit(
        &self,
        owner: &str,
        repository: &str,
        tree_sha: &str,
        parent_sha: &str,
        message: &str,
        author: &Identity,
    ) -> Result<String> {
        let dir = self.project_dir(owner, repository)?;
        let created = self.git(
            &dir,
            &["commit-tree", tree_sha, "-p", parent_sha, "-m", message],
            &signature_env(author),
            None,
        )?;
        Ok(String::from_utf8_lossy(&created).trim().to_string())
    }

    fn create_branch(&self, owner: &str, repository: &str, branch: &str, commit_sha: &str) -> Result<String> {
        let dir = self.project_dir(owner, repository)?;
        self.git(
            &dir,
            &["update-ref", &format!("refs/heads/{}", branch), commit_sha],
            &[],
            None,
        )?;
        self.forget(owner, repository, branch)?;
        Ok(branch.to_string())
    }

    fn create_pull_request(&self, request: &PullRequestRequest) -> Result<u64> {
        let _guard = self
            .pull_requests
            .lock()
            .map_err(|_| Error::poisoned("pull requests"))?;
        let dir = self.project_dir(&request.owner, &request.repository)?;

        let target_tip = self.branch_tip(&dir, &request.target_branch)?.ok_or_else(|| {
            Error::provider(
                "create_pull_request",
                format!("unknown target branch '{}'", request.target_branch),
            )
        })?;

        let existing = self.load_pull_requests(&request.owner, &request.repository)?;
        let next_id = existing.iter().map(|pr| pr.id).max().unwrap_or(0) + 1;
        let mut pull_request = PullRequest::open(next_id, request);

        if pull_request.fork_source().is_none() {
            let source_tip = self.branch_tip(&dir, &request.source_branch)?.ok_or_else(|| {
                Error::provider(
                    "create_pull_request",
                    format!("unknown source branch '{}'", request.source_branch),
                )
            })?;

            if request.merge {
                let fast_forward = self
                    .git_output(&dir, &["merge-base", "--is-ancestor", &target_tip, &source_tip], &[], None)?
                    .status
                    .success();
                if !fast_forward {
                    return Err(Error::provider(
                        "merge_pull_request",
                        format!(
                            "'{}' cannot be fast-forwarded to '{}'",
                            request.target_branch, request.source_branch
                        ),
                    ));
                }

                let target_ref = format!("refs/heads/{}", request.target_branch);
                self.git(&dir, &["update-ref", &target_ref, &source_tip], &[], None)?;
                self.forget(&request.owner, &request.repository, &request.target_branch)?;
                pull_request.state = PullRequestState::Merged;

                if request.delete_source_branch {
                    let source_ref = format!("refs/heads/{}", request.source_branch);
                    self.git(&dir, &["update-ref", "-d", &source_ref], &[], None)?;
                    self.forget(&request.owner, &request.repository, &request.source_branch)?;
                }
            }
        } else if request.merge {
            return Err(Error::unsupported(
                "merge_pull_request",
                "pull requests from forks cannot be merged on creation",
            ));
        }

        self.save_pull_request(&request.owner, &request.repository, &pull_request)?;
        Ok(pull_request.id)
    }

    fn apply_labels(&self, owner: &str, repository: &str, id: u64, labels: &[String]) -> Result<Vec<String>> {
        let _guard = self
            .pull_requests
            .lock()
            .map_err(|_| Error::poisoned("pull requests"))?;

        let mut pull_request = self
            .load_pull_requests(owner, repository)?
            .into_iter()
            .find(|pr| pr.id == id)
            .ok_or_else(|| Error::provider("apply_labels", format!("unknown pull request {}", id)))?;
        pull_request.add_labels(labels);
        self.save_pull_request(owner, repository, &pull_request)?;
        Ok(pull_request.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_ls_tree() {
        let output = b"100644 blob e69de29bb2d1d6434b8b29ae775ad8c2e48c5391\tREADME.md\0\
040000 tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\tdocs\0\
160000 commit 1234567890123456789012345678901234567890\tvendor/lib\0";
        let entries = parse_ls_tree(output).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "README.md");
        assert_eq!(entries[0].kind, EntryKind::Blob);
        assert_eq!(entries[1].kind, EntryKind::Tree);
        assert_eq!(entries[2].kind, EntryKind::Commit);
        assert_eq!(entries[2].name, "vendor/lib");
    }

    #[test]
    fn test_parse_ls_tree_rejects_garbage() {
        assert!(parse_ls_tree(b"not a tree entry\0").is_err());
        assert!(parse_ls_tree(b"").unwrap().is_empty());
    }

    #[test]
    fn test_missing_repository_is_not_found() {
        let root = TempDir::new().unwrap();
        let gateway = BareRepoGateway::new(root.path(), User::new("bot", "Sync Bot", None));
        assert!(matches!(
            gateway.is_collaborator("acme", "svc"),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(
            gateway.repository_path("acme", "svc"),
            root.path().join("acme").join("svc.git")
        );
    }

    #[test]
    fn test_collaborators_file_is_authoritative() {
        let root = TempDir::new().unwrap();
        let gateway = BareRepoGateway::new(root.path(), User::new("bot", "Sync Bot", None));
        let repo = gateway.repository_path("acme", "svc");
        fs::create_dir_all(repo.join("sync")).unwrap();

        assert!(gateway.is_collaborator("acme", "svc").unwrap());

        fs::write(repo.join(COLLABORATORS_FILE), "alice\n").unwrap();
        assert!(!gateway.is_collaborator("acme", "svc").unwrap());

        fs::write(repo.join(COLLABORATORS_FILE), "alice\nbot\n").unwrap();
        assert!(gateway.is_collaborator("acme", "svc").unwrap());
    }

    #[test]
    fn test_pull_request_records_round_trip_on_disk() {
        let root = TempDir::new().unwrap();
        let gateway = BareRepoGateway::new(root.path(), User::new("bot", "Sync Bot", None));
        fs::create_dir_all(gateway.repository_path("acme", "svc")).unwrap();

        let request = PullRequestRequest {
            owner: "acme".to_string(),
            repository: "svc".to_string(),
            source_branch: "bot:sync".to_string(),
            target_branch: "main".to_string(),
            title: "Sync templates".to_string(),
            description: None,
            merge: false,
            delete_source_branch: false,
        };
        gateway
            .save_pull_request("acme", "svc", &PullRequest::open(1, &request))
            .unwrap();

        assert!(gateway.has_open_pull_request("acme", "svc", "Sync templates").unwrap());
        assert!(!gateway.has_open_pull_request("acme", "svc", "Other").unwrap());

        let labels = gateway
            .apply_labels("acme", "svc", 1, &["sync".to_string()])
            .unwrap();
        assert_eq!(labels, vec!["sync".to_string()]);
        assert_eq!(gateway.pull_requests("acme", "svc").unwrap()[0].labels, labels);
    }
}
