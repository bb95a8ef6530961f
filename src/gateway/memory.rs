//! In-process forge.
//!
//! [`MemoryGateway`] keeps complete git object stores in memory: blobs,
//! trees and commits are content addressed with the same hashing as real
//! git, so shas match the ones a real provider would report. It supports
//! collaborators, forks (with a configurable number of "still importing"
//! polls), pull requests with fast-forward merges, and labels. Every
//! mutating call is counted, which lets tests assert that an operation
//! reached (or never reached) the provider.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::sync::Mutex;

use log::debug;

use super::{
    wait_for_fork_import, CancellationToken, ForkPolicy, ForkedRepository, ProjectIds,
    ProviderGateway, PullRequest, PullRequestRequest, PullRequestState, User,
};
use crate::address::{PathAddress, BLOB_MODE, TREE_MODE};
use crate::error::{Error, Result};
use crate::hash;
use crate::object::{Commit, EntryKind, Identity, NewTree, TreeEntry, TreeListing};
use crate::staging::BlobStaging;

/// Mode of a submodule entry.
pub const SUBMODULE_MODE: &str = "160000";

/// Calls that change provider state.
pub const MUTATIONS: &[&str] = &[
    "fork",
    "create_blob",
    "create_tree",
    "create_commit",
    "create_branch",
    "create_pull_request",
    "apply_labels",
];

#[derive(Debug, Clone)]
enum Object {
    Blob(Vec<u8>),
    Tree(Vec<TreeEntry>),
    Commit { tree: String, parent: Option<String> },
}

#[derive(Debug, Clone, Default)]
struct Project {
    owner: String,
    name: String,
    objects: HashMap<String, Object>,
    branches: BTreeMap<String, String>,
    collaborators: HashSet<String>,
    pull_requests: Vec<PullRequest>,
    pending_import_polls: u32,
}

impl Project {
    fn tip(&self, branch: &str) -> Option<&str> {
        self.branches.get(branch).map(String::as_str)
    }

    fn commit(&self, sha: &str) -> Option<(&str, Option<&str>)> {
        match self.objects.get(sha) {
            Some(Object::Commit { tree, parent }) => Some((tree.as_str(), parent.as_deref())),
            _ => None,
        }
    }

    fn tree(&self, sha: &str) -> Option<&[TreeEntry]> {
        match self.objects.get(sha) {
            Some(Object::Tree(entries)) => Some(entries.as_slice()),
            _ => None,
        }
    }

    /// Walks `path` from the tip of `branch`.
    fn lookup(&self, branch: &str, path: Option<&str>) -> Option<TreeEntry> {
        let (root, _) = self.commit(self.tip(branch)?)?;
        let mut current = TreeEntry::new(TREE_MODE, "", root, EntryKind::Tree);

        if let Some(path) = path {
            for segment in path.split('/') {
                if current.kind != EntryKind::Tree {
                    return None;
                }
                current = self
                    .tree(&current.sha)?
                    .iter()
                    .find(|e| e.name == segment)?
                    .clone();
            }
        }
        Some(current)
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        let mut cursor = Some(descendant);
        while let Some(sha) = cursor {
            if sha == ancestor {
                return true;
            }
            cursor = self.commit(sha).and_then(|(_, parent)| parent);
        }
        false
    }

    fn collect_blobs(&self, tree_sha: &str, prefix: &str, out: &mut Vec<String>) {
        for entry in self.tree(tree_sha).unwrap_or_default() {
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", prefix, entry.name)
            };
            match entry.kind {
                EntryKind::Blob => out.push(path),
                EntryKind::Tree => self.collect_blobs(&entry.sha, &path, out),
                EntryKind::Commit => {}
            }
        }
    }

    fn has_object(&self, kind: EntryKind, sha: &str) -> bool {
        matches!(
            (kind, self.objects.get(sha)),
            (EntryKind::Blob, Some(Object::Blob(_))) | (EntryKind::Tree, Some(Object::Tree(_)))
        )
    }
}

#[derive(Debug, Default)]
struct Forge {
    next_id: u64,
    projects: HashMap<u64, Project>,
    names: HashMap<String, u64>,
}

impl Forge {
    fn project(&self, id: u64) -> Result<&Project> {
        self.projects
            .get(&id)
            .ok_or_else(|| Error::provider("lookup", format!("unknown project id {}", id)))
    }

    fn project_mut(&mut self, id: u64) -> Result<&mut Project> {
        self.projects
            .get_mut(&id)
            .ok_or_else(|| Error::provider("lookup", format!("unknown project id {}", id)))
    }

    fn insert(&mut self, project: Project) -> u64 {
        self.next_id += 1;
        self.names
            .insert(format!("{}/{}", project.owner, project.name), self.next_id);
        self.projects.insert(self.next_id, project);
        self.next_id
    }
}

enum Node {
    File { mode: String, sha: String },
    Dir(BTreeMap<String, Node>),
}

/// A complete git forge held in memory.
#[derive(Debug)]
pub struct MemoryGateway {
    host: String,
    user: User,
    forge: Mutex<Forge>,
    ids: ProjectIds<u64>,
    staging: BlobStaging,
    fork_policy: ForkPolicy,
    fork_import_polls: u32,
    cancel: CancellationToken,
    calls: Mutex<HashMap<String, usize>>,
}

impl MemoryGateway {
    pub fn new(user: User) -> Self {
        Self {
            host: "https://forge.example.com".to_string(),
            user,
            forge: Mutex::new(Forge::default()),
            ids: ProjectIds::new(),
            staging: BlobStaging::default(),
            fork_policy: ForkPolicy::immediate(10),
            fork_import_polls: 0,
            cancel: CancellationToken::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.trim_end_matches('/').to_string();
        self
    }

    pub fn with_fork_policy(mut self, policy: ForkPolicy) -> Self {
        self.fork_policy = policy;
        self
    }

    /// Number of polls a new fork reports as still importing.
    pub fn with_fork_import_polls(mut self, polls: u32) -> Self {
        self.fork_import_polls = polls;
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

    fn count(&self, operation: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation.to_string()).or_default() += 1;
        }
    }

    /// Number of calls made to `operation`.
    pub fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(operation).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Total number of state-changing calls.
    pub fn mutation_calls(&self) -> usize {
        MUTATIONS.iter().map(|op| self.calls(op)).sum()
    }

    fn forge(&self) -> Result<std::sync::MutexGuard<'_, Forge>> {
        self.forge.lock().map_err(|_| Error::poisoned("memory forge"))
    }

    fn project_id(&self, owner: &str, repository: &str) -> Result<u64> {
        self.ids.get_or_resolve(owner, repository, || {
            let key = format!("{}/{}", owner, repository);
            self.forge()?
                .names
                .get(&key)
                .copied()
                .ok_or(Error::NotFound {
                    object_type: "Repository".to_string(),
                    url: key,
                })
        })
    }

    /// Creates an empty repository.
    pub fn create_repository(&self, owner: &str, repository: &str) -> Result<()> {
        let mut forge = self.forge()?;
        if forge.names.contains_key(&format!("{}/{}", owner, repository)) {
            return Err(Error::provider(
                "create_repository",
                format!("{}/{} already exists", owner, repository),
            ));
        }
        forge.insert(Project {
            owner: owner.to_string(),
            name: repository.to_string(),
            ..Project::default()
        });
        Ok(())
    }

    pub fn repository_exists(&self, owner: &str, repository: &str) -> bool {
        self.forge()
            .map(|f| f.names.contains_key(&format!("{}/{}", owner, repository)))
            .unwrap_or(false)
    }

    pub fn add_collaborator(&self, owner: &str, repository: &str, login: &str) -> Result<()> {
        let id = self.project_id(owner, repository)?;
        self.forge()?
            .project_mut(id)?
            .collaborators
            .insert(login.to_string());
        Ok(())
    }

    /// Commits text files with the regular file mode.
    pub fn commit_files(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
        files: &[(&str, &str)],
    ) -> Result<String> {
        let entries: Vec<(&str, &[u8], &str)> = files
            .iter()
            .map(|(path, content)| (*path, content.as_bytes(), BLOB_MODE))
            .collect();
        self.commit_entries(owner, repository, branch, &entries)
    }

    /// Replaces the content of `branch` with `entries` in a new commit.
    ///
    /// Each entry is `(path, content, mode)`. Entries with the submodule
    /// mode carry the referenced commit sha as their content.
    pub fn commit_entries(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
        entries: &[(&str, &[u8], &str)],
    ) -> Result<String> {
        let id = self.project_id(owner, repository)?;
        let mut forge = self.forge()?;
        let project = forge.project_mut(id)?;

        let mut root: BTreeMap<String, Node> = BTreeMap::new();
        for (path, content, mode) in entries {
            let sha = if *mode == SUBMODULE_MODE {
                String::from_utf8_lossy(content).trim().to_string()
            } else {
                let sha = hash::blob_sha(content);
                project.objects.insert(sha.clone(), Object::Blob(content.to_vec()));
                sha
            };

            let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
            let (file_name, dirs) = segments
                .split_last()
                .ok_or_else(|| Error::InvalidAddress {
                    message: format!("invalid path '{}'", path),
                })?;

            let mut level = &mut root;
            for dir in dirs {
                let node = level
                    .entry(dir.to_string())
                    .or_insert_with(|| Node::Dir(BTreeMap::new()));
                level = match node {
                    Node::Dir(children) => children,
                    Node::File { .. } => {
                        return Err(Error::MappingConflict {
                            message: format!("'{}' is both a file and a directory", dir),
                        })
                    }
                };
            }
            level.insert(
                file_name.to_string(),
                Node::File {
                    mode: mode.to_string(),
                    sha,
                },
            );
        }

        let tree = write_tree(&mut project.objects, &root)?;
        let parent = project.tip(branch).map(str::to_string);
        let author = self.user.identity(0);
        let message = format!("Seed {}", branch);
        let sha = hash::commit_sha(&tree, parent.as_deref(), &message, &author)?;
        project.objects.insert(sha.clone(), Object::Commit { tree, parent });
        project.branches.insert(branch.to_string(), sha.clone());
        Ok(sha)
    }

    pub fn branch_tip(&self, owner: &str, repository: &str, branch: &str) -> Option<String> {
        let id = self.project_id(owner, repository).ok()?;
        let forge = self.forge().ok()?;
        forge.project(id).ok()?.tip(branch).map(str::to_string)
    }

    pub fn branches(&self, owner: &str, repository: &str) -> Vec<String> {
        let Ok(id) = self.project_id(owner, repository) else {
            return Vec::new();
        };
        self.forge()
            .ok()
            .and_then(|f| f.project(id).ok().map(|p| p.branches.keys().cloned().collect()))
            .unwrap_or_default()
    }

    /// Mode and content of the file at `path` on `branch`.
    pub fn read_file(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
        path: &str,
    ) -> Option<(String, Vec<u8>)> {
        let id = self.project_id(owner, repository).ok()?;
        let forge = self.forge().ok()?;
        let project = forge.project(id).ok()?;
        let entry = project.lookup(branch, Some(path))?;
        match project.objects.get(&entry.sha) {
            Some(Object::Blob(content)) => Some((entry.mode, content.clone())),
            _ => None,
        }
    }

    /// Message-less view of the parent of `commit_sha`.
    pub fn parent_of(&self, owner: &str, repository: &str, commit_sha: &str) -> Option<String> {
        let id = self.project_id(owner, repository).ok()?;
        let forge = self.forge().ok()?;
        let project = forge.project(id).ok()?;
        project.commit(commit_sha)?.1.map(str::to_string)
    }

    pub fn has_object(&self, owner: &str, repository: &str, sha: &str) -> bool {
        let Ok(id) = self.project_id(owner, repository) else {
            return false;
        };
        self.forge()
            .ok()
            .and_then(|f| f.project(id).ok().map(|p| p.objects.contains_key(sha)))
            .unwrap_or(false)
    }

    pub fn pull_requests(&self, owner: &str, repository: &str) -> Vec<PullRequest> {
        let Ok(id) = self.project_id(owner, repository) else {
            return Vec::new();
        };
        self.forge()
            .ok()
            .and_then(|f| f.project(id).ok().map(|p| p.pull_requests.clone()))
            .unwrap_or_default()
    }

    /// Files of `branch`, as listed by [`ProviderGateway::list_blobs_recursive`].
    pub fn list_files(&self, owner: &str, repository: &str, branch: &str) -> Vec<String> {
        self.list_blobs_recursive(owner, repository, branch)
            .unwrap_or_default()
    }
}

fn write_tree(objects: &mut HashMap<String, Object>, dir: &BTreeMap<String, Node>) -> Result<String> {
    let mut entries = Vec::with_capacity(dir.len());
    for (name, node) in dir {
        match node {
            Node::File { mode, sha } => {
                let kind = if mode == SUBMODULE_MODE {
                    EntryKind::Commit
                } else {
                    EntryKind::Blob
                };
                entries.push(TreeEntry::new(mode, name, sha, kind));
            }
            Node::Dir(children) => {
                let sha = write_tree(objects, children)?;
                entries.push(TreeEntry::new(TREE_MODE, name, &sha, EntryKind::Tree));
            }
        }
    }
    let sha = hash::tree_sha(&entries)?;
    objects.insert(sha.clone(), Object::Tree(entries));
    Ok(sha)
}

fn not_found(address: &PathAddress) -> Error {
    Error::NotFound {
        object_type: address.object_type().to_string(),
        url: address.url(),
    }
}

impl ProviderGateway for MemoryGateway {
    fn web_url(&self) -> String {
        self.host.clone()
    }

    fn clone_url(&self, owner: &str, repository: &str) -> String {
        format!("{}/{}/{}.git", self.host, owner, repository)
    }

    fn current_user(&self) -> Result<User> {
        Ok(self.user.clone())
    }

    fn is_collaborator(&self, owner: &str, repository: &str) -> Result<bool> {
        let id = self.project_id(owner, repository)?;
        let forge = self.forge()?;
        let project = forge.project(id)?;
        Ok(project.owner == self.user.login || project.collaborators.contains(&self.user.login))
    }

    fn fork(&self, owner: &str, repository: &str) -> Result<ForkedRepository> {
        self.count("fork");
        let upstream = self.project_id(owner, repository)?;
        let fork_key = format!("{}/{}", self.user.login, repository);

        let fork_id = {
            let mut forge = self.forge()?;
            match forge.names.get(&fork_key).copied() {
                Some(existing) => {
                    debug!("Reusing existing fork {}", fork_key);
                    existing
                }
                None => {
                    let source = forge.project(upstream)?;
                    let fork = Project {
                        owner: self.user.login.clone(),
                        name: repository.to_string(),
                        objects: source.objects.clone(),
                        branches: source.branches.clone(),
                        pending_import_polls: self.fork_import_polls,
                        ..Project::default()
                    };
                    forge.insert(fork)
                }
            }
        };

        wait_for_fork_import(&fork_key, &self.fork_policy, &self.cancel, || {
            let mut forge = self.forge()?;
            let project = forge.project_mut(fork_id)?;
            if project.pending_import_polls == 0 {
                return Ok(true);
            }
            project.pending_import_polls -= 1;
            Ok(false)
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
        let sha = found.sha().unwrap_or_default().to_string();

        let id = self.project_id(source.owner(), source.repository())?;
        let content = match self.forge()?.project(id)?.objects.get(&sha) {
            Some(Object::Blob(content)) => content.clone(),
            _ => return Err(not_found(source)),
        };
        target.write_all(&content)?;
        Ok(())
    }

    fn has_open_pull_request(&self, owner: &str, repository: &str, title: &str) -> Result<bool> {
        let id = self.project_id(owner, repository)?;
        let forge = self.forge()?;
        Ok(forge
            .project(id)?
            .pull_requests
            .iter()
            .any(|pr| pr.state == PullRequestState::Open && pr.title == title))
    }

    fn root_commit_from(&self, address: &PathAddress) -> Result<Commit> {
        let id = self.project_id(address.owner(), address.repository())?;
        let forge = self.forge()?;
        let project = forge.project(id)?;
        let sha = project
            .tip(address.branch())
            .ok_or_else(|| not_found(&address.root()))?;
        let (tree, _) = project
            .commit(sha)
            .ok_or_else(|| not_found(&address.root()))?;
        Ok(Commit {
            sha: sha.to_string(),
            tree_sha: tree.to_string(),
        })
    }

    fn tree_from(
        &self,
        address: &PathAddress,
        throws_if_not_found: bool,
    ) -> Result<Option<(PathAddress, TreeListing)>> {
        let id = self.project_id(address.owner(), address.repository())?;
        let forge = self.forge()?;
        let project = forge.project(id)?;

        let found = project
            .lookup(address.branch(), address.path())
            .filter(|entry| entry.kind == EntryKind::Tree)
            .and_then(|entry| {
                project.tree(&entry.sha).map(|entries| TreeListing {
                    path: address.path().unwrap_or_default().to_string(),
                    sha: entry.sha.clone(),
                    entries: entries.to_vec(),
                })
            });

        match found {
            Some(listing) => Ok(Some((address.enriched(&listing.sha, TREE_MODE), listing))),
            None if throws_if_not_found => Err(not_found(address)),
            None => Ok(None),
        }
    }

    fn blob_from(
        &self,
        address: &PathAddress,
        throws_if_not_found: bool,
    ) -> Result<Option<(PathAddress, TreeEntry)>> {
        let id = self.project_id(address.owner(), address.repository())?;
        let forge = self.forge()?;
        let project = forge.project(id)?;

        let found = address
            .path()
            .and_then(|path| project.lookup(address.branch(), Some(path)))
            .filter(|entry| entry.kind == EntryKind::Blob);

        match found {
            Some(entry) => Ok(Some((address.enriched(&entry.sha, &entry.mode), entry))),
            None if throws_if_not_found => Err(not_found(address)),
            None => Ok(None),
        }
    }

    fn list_blobs_recursive(&self, owner: &str, repository: &str, branch: &str) -> Result<Vec<String>> {
        let id = self.project_id(owner, repository)?;
        let forge = self.forge()?;
        let project = forge.project(id)?;
        let root = project
            .lookup(branch, None)
            .ok_or_else(|| Error::NotFound {
                object_type: "Tree".to_string(),
                url: format!("{}/{}/tree/{}", owner, repository, branch),
            })?;

        let mut paths = Vec::new();
        project.collect_blobs(&root.sha, "", &mut paths);
        paths.sort();
        Ok(paths)
    }

    fn fetch_blob(&self, owner: &str, repository: &str, sha: &str) -> Result<()> {
        self.count("fetch_blob");
        let id = self.project_id(owner, repository)?;
        self.staging.stage_with(sha, |target| {
            let content = match self.forge()?.project(id)?.objects.get(sha) {
                Some(Object::Blob(content)) => content.clone(),
                _ => {
                    return Err(Error::NotFound {
                        object_type: "Blob".to_string(),
                        url: format!("{}/{}/blob/{}", owner, repository, sha),
                    })
                }
            };
            target.write_all(&content)?;
            Ok(())
        })?;
        Ok(())
    }

    fn create_blob(&self, owner: &str, repository: &str, sha: &str) -> Result<String> {
        self.count("create_blob");
        let id = self.project_id(owner, repository)?;
        self.staging.verify(sha)?;
        let content = self.staging.read(sha)?;
        let computed = hash::blob_sha(&content);

        self.forge()?
            .project_mut(id)?
            .objects
            .insert(computed.clone(), Object::Blob(content));
        Ok(computed)
    }

    fn create_tree(&self, tree: &NewTree, owner: &str, repository: &str) -> Result<String> {
        self.count("create_tree");
        let id = self.project_id(owner, repository)?;
        let mut forge = self.forge()?;
        let project = forge.project_mut(id)?;

        for entry in tree.entries() {
            if entry.kind != EntryKind::Commit && !project.has_object(entry.kind, &entry.sha) {
                return Err(Error::provider(
                    "create_tree",
                    format!(
                        "{} '{}' ({}) is missing from {}/{}",
                        entry.kind.as_str(),
                        tree.child_path(&entry.name),
                        entry.sha,
                        owner,
                        repository
                    ),
                ));
            }
        }

        let sha = hash::tree_sha(tree.entries())?;
        project
            .objects
            .insert(sha.clone(), Object::Tree(tree.entries().to_vec()));
        Ok(sha)
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
        self.count("create_commit");
        let id = self.project_id(owner, repository)?;
        let mut forge = self.forge()?;
        let project = forge.project_mut(id)?;

        if project.tree(tree_sha).is_none() {
            return Err(Error::provider("create_commit", format!("unknown tree {}", tree_sha)));
        }
        if project.commit(parent_sha).is_none() {
            return Err(Error::provider("create_commit", format!("unknown parent {}", parent_sha)));
        }

        let sha = hash::commit_sha(tree_sha, Some(parent_sha), message, author)?;
        project.objects.insert(
            sha.clone(),
            Object::Commit {
                tree: tree_sha.to_string(),
                parent: Some(parent_sha.to_string()),
            },
        );
        Ok(sha)
    }

    fn create_branch(&self, owner: &str, repository: &str, branch: &str, commit_sha: &str) -> Result<String> {
        self.count("create_branch");
        let id = self.project_id(owner, repository)?;
        let mut forge = self.forge()?;
        let project = forge.project_mut(id)?;

        if project.commit(commit_sha).is_none() {
            return Err(Error::provider("create_branch", format!("unknown commit {}", commit_sha)));
        }
        project.branches.insert(branch.to_string(), commit_sha.to_string());
        Ok(branch.to_string())
    }

    fn create_pull_request(&self, request: &PullRequestRequest) -> Result<u64> {
        self.count("create_pull_request");
        let id = self.project_id(&request.owner, &request.repository)?;
        let mut forge = self.forge()?;
        let project = forge.project_mut(id)?;

        let target_tip = project
            .tip(&request.target_branch)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::provider(
                    "create_pull_request",
                    format!("unknown target branch '{}'", request.target_branch),
                )
            })?;

        let mut pull_request = PullRequest::open(project.pull_requests.len() as u64 + 1, request);

        if pull_request.fork_source().is_none() {
            let source_tip = project
                .tip(&request.source_branch)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::provider(
                        "create_pull_request",
                        format!("unknown source branch '{}'", request.source_branch),
                    )
                })?;

            if request.merge {
                if !project.is_ancestor(&target_tip, &source_tip) {
                    return Err(Error::provider(
                        "merge_pull_request",
                        format!(
                            "'{}' cannot be fast-forwarded to '{}'",
                            request.target_branch, request.source_branch
                        ),
                    ));
                }
                project
                    .branches
                    .insert(request.target_branch.clone(), source_tip);
                pull_request.state = PullRequestState::Merged;
                if request.delete_source_branch {
                    project.branches.remove(&request.source_branch);
                }
            }
        } else if request.merge {
            return Err(Error::unsupported(
                "merge_pull_request",
                "pull requests from forks cannot be merged on creation",
            ));
        }

        let number = pull_request.id;
        project.pull_requests.push(pull_request);
        Ok(number)
    }

    fn apply_labels(&self, owner: &str, repository: &str, id: u64, labels: &[String]) -> Result<Vec<String>> {
        self.count("apply_labels");
        let project_id = self.project_id(owner, repository)?;
        let mut forge = self.forge()?;
        let pull_request = forge
            .project_mut(project_id)?
            .pull_requests
            .iter_mut()
            .find(|pr| pr.id == id)
            .ok_or_else(|| Error::provider("apply_labels", format!("unknown pull request {}", id)))?;
        pull_request.add_labels(labels);
        Ok(pull_request.labels.clone())
    }
}
