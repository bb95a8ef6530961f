//! # Repository Synchronization
//!
//! Synchronizes a set of source (template) repositories into a set of
//! target repositories.
//!
//! For every target, all sources are listed recursively and turned into
//! mapping directives according to the [`SyncMode`] and the manual items:
//!
//! - [`SyncMode::IncludeAllByDefault`]: every blob of every source goes to
//!   the same path in the target; manual items can only *remove* paths.
//! - [`SyncMode::ExcludeAllByDefault`]: nothing is synchronized except the
//!   manual items, which can only *add* paths.
//!
//! When several sources provide the same path, the source with the highest
//! priority wins. A source without an explicit priority ranks by
//! registration order, later sources ranking higher.
//!
//! Each target then goes through the [`Syncer`], independently of the
//! others: a failing target is reported in the [`SyncReport`] and never
//! stops the remaining ones.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use rayon::prelude::*;

use crate::address::{Address, ObjectType, PathAddress};
use crate::diff::{self, Change, ChangeKind};
use crate::error::{Error, Result};
use crate::gateway::ProviderGateway;
use crate::local_clone::LocalClone;
use crate::mapper::Mapper;
use crate::path::regex_rename;
use crate::propagation::PropagationCache;
use crate::syncer::{SyncOutput, SyncRequest, Syncer, UpdateResult};

/// Which source paths are synchronized when no manual item applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    IncludeAllByDefault,
    ExcludeAllByDefault,
}

/// Where a manual item lands in the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPath {
    /// A fixed path.
    Fixed(String),
    /// A regex rename of the source path, `$1`-style captures allowed.
    /// A source path the pattern does not match keeps its own path.
    Rename { pattern: String, replacement: String },
}

impl TargetPath {
    pub fn resolve(&self, source_path: &str) -> Result<String> {
        match self {
            TargetPath::Fixed(path) => Ok(path.clone()),
            TargetPath::Rename {
                pattern,
                replacement,
            } => Ok(regex_rename(pattern, replacement, source_path)?
                .unwrap_or_else(|| source_path.to_string())),
        }
    }
}

/// A path handled explicitly instead of by the sync mode default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualSyncItem {
    pub object_type: ObjectType,
    pub path: String,
    pub target: Option<TargetPath>,
}

impl ManualSyncItem {
    fn target_path(&self, source_path: &str) -> Result<String> {
        match &self.target {
            Some(target) => target.resolve(source_path),
            None => Ok(source_path.to_string()),
        }
    }
}

/// A template repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRepository {
    pub owner: String,
    pub repository: String,
    pub branch: String,
    /// Higher wins; defaults to the registration index.
    pub priority: Option<i32>,
}

impl SourceRepository {
    pub fn new(owner: &str, repository: &str, branch: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repository: repository.to_string(),
            branch: branch.to_string(),
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn display_name(&self) -> String {
        format!("{}/{}", self.owner, self.repository)
    }
}

/// A repository receiving the templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRepository {
    pub owner: String,
    pub repository: String,
    pub branch: String,
    /// Labels added to this target's pull requests.
    pub labels: Vec<String>,
    /// Overrides the output of the run for this target.
    pub output: Option<SyncOutput>,
}

impl TargetRepository {
    pub fn new(owner: &str, repository: &str, branch: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repository: repository.to_string(),
            branch: branch.to_string(),
            labels: Vec::new(),
            output: None,
        }
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_output(mut self, output: SyncOutput) -> Self {
        self.output = Some(output);
        self
    }

    pub fn display_name(&self) -> String {
        format!("{}/{}", self.owner, self.repository)
    }

    pub fn root(&self) -> Result<PathAddress> {
        PathAddress::tree(&self.owner, &self.repository, &self.branch, None)
    }
}

/// Everything needed to update one target.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub target: TargetRepository,
    /// Pull request description listing the contributing sources.
    pub description: String,
    /// Sources that contributed at least one change, highest priority first.
    pub sources: Vec<String>,
    pub changes: Vec<Change>,
    pub mapper: Mapper,
}

/// What happened to one target.
#[derive(Debug)]
pub enum TargetOutcome {
    Updated(UpdateResult),
    InSync,
    Skipped { reason: String },
    Failed(Error),
}

/// Per-target outcomes of a run, in target registration order.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<(TargetRepository, TargetOutcome)>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, outcome)| matches!(outcome, TargetOutcome::Failed(_)))
    }

    pub fn updated(&self) -> impl Iterator<Item = &UpdateResult> {
        self.outcomes.iter().filter_map(|(_, outcome)| match outcome {
            TargetOutcome::Updated(result) => Some(result),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

pub const DESCRIPTION_HEADER: &str = "This is an automated synchronization PR.";

/// Synchronizes sources into targets.
pub struct RepoSync<'a> {
    gateway: &'a dyn ProviderGateway,
    local_clone: &'a dyn LocalClone,
    cache: Arc<PropagationCache>,
    workspace: PathBuf,
    mode: SyncMode,
    manual_items: Vec<ManualSyncItem>,
    sources: Vec<SourceRepository>,
    targets: Vec<TargetRepository>,
    parallel_targets: bool,
}

impl<'a> RepoSync<'a> {
    /// `workspace` hosts the local clones of the fork path.
    pub fn new(
        gateway: &'a dyn ProviderGateway,
        local_clone: &'a dyn LocalClone,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            gateway,
            local_clone,
            cache: Arc::new(PropagationCache::new()),
            workspace: workspace.into(),
            mode: SyncMode::default(),
            manual_items: Vec::new(),
            sources: Vec::new(),
            targets: Vec::new(),
            parallel_targets: false,
        }
    }

    /// Shares `cache` with other runs, so that objects one run copied into
    /// a repository are not checked again by the next.
    pub fn with_cache(mut self, cache: Arc<PropagationCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Process targets concurrently.
    pub fn with_parallel_targets(mut self, parallel: bool) -> Self {
        self.parallel_targets = parallel;
        self
    }

    pub fn add_source_repository(&mut self, source: SourceRepository) {
        self.sources.push(source);
    }

    pub fn add_target_repository(&mut self, target: TargetRepository) {
        self.targets.push(target);
    }

    pub fn targets(&self) -> &[TargetRepository] {
        &self.targets
    }

    /// Synchronizes blob `path` (exclude-all mode only).
    pub fn add_blob(&mut self, path: &str, target: Option<TargetPath>) -> Result<()> {
        self.add_or_remove_source_item(true, ObjectType::Blob, path, target)
    }

    /// Removes blob `path` from the targets (include-all mode only).
    pub fn remove_blob(&mut self, path: &str, target: Option<TargetPath>) -> Result<()> {
        self.add_or_remove_source_item(false, ObjectType::Blob, path, target)
    }

    pub fn add_or_remove_source_item(
        &mut self,
        to_be_added: bool,
        object_type: ObjectType,
        path: &str,
        target: Option<TargetPath>,
    ) -> Result<()> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(Error::InvalidAddress {
                message: "a manual item needs a path".to_string(),
            });
        }

        if !to_be_added && object_type == ObjectType::Tree {
            return Err(Error::MappingConflict {
                message: format!("Removing a Tree isn't supported ({})", path),
            });
        }

        match (to_be_added, self.mode) {
            (true, SyncMode::IncludeAllByDefault) => {
                return Err(Error::unsupported(
                    "add_item",
                    "Adding items is not supported when mode is 'IncludeAllByDefault'",
                ))
            }
            (false, SyncMode::ExcludeAllByDefault) => {
                return Err(Error::unsupported(
                    "remove_item",
                    "Removing items is not supported when mode is 'ExcludeAllByDefault'",
                ))
            }
            _ => {}
        }

        self.manual_items.push(ManualSyncItem {
            object_type,
            path: path.to_string(),
            target,
        });
        Ok(())
    }

    fn syncer(&self) -> Syncer<'_> {
        Syncer::new(self.gateway, self.local_clone, &self.cache, self.workspace.clone())
    }

    /// Sources from highest to lowest priority.
    fn sources_by_priority(&self) -> Vec<&SourceRepository> {
        let mut ranked: Vec<(i32, usize, &SourceRepository)> = self
            .sources
            .iter()
            .enumerate()
            .map(|(index, source)| (source.priority.unwrap_or(index as i32), index, source))
            .collect();
        ranked.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        ranked.into_iter().map(|(_, _, source)| source).collect()
    }

    fn process_item(
        &self,
        mapper: &mut Mapper,
        source: &SourceRepository,
        target: &TargetRepository,
        object_type: ObjectType,
        path: &str,
    ) -> Result<()> {
        let source_address = PathAddress::new(
            source.owner.as_str(),
            source.repository.as_str(),
            object_type,
            source.branch.as_str(),
            Some(path),
        )?;
        let destination = |target_path: &str| {
            PathAddress::new(
                target.owner.as_str(),
                target.repository.as_str(),
                object_type,
                target.branch.as_str(),
                Some(target_path),
            )
        };

        let manual: Vec<&ManualSyncItem> = self
            .manual_items
            .iter()
            .filter(|item| item.object_type == object_type && item.path == path)
            .collect();

        if manual.is_empty() {
            if self.mode == SyncMode::IncludeAllByDefault {
                mapper.add(source_address, destination(path)?)?;
            }
            return Ok(());
        }

        for item in manual {
            let target_path = destination(&item.target_path(path)?)?;
            match self.mode {
                SyncMode::IncludeAllByDefault => mapper.remove(target_path)?,
                SyncMode::ExcludeAllByDefault => mapper.add(source_address.clone(), target_path)?,
            };
        }
        Ok(())
    }

    /// Works out what `target` needs from the sources.
    pub fn calculate_sync_context(&self, target: &TargetRepository) -> Result<SyncContext> {
        let syncer = self.syncer();
        // Lowercased: a path differing only by case is the same destination.
        let mut included: HashSet<String> = HashSet::new();
        let mut contributions = Vec::new();

        for source in self.sources_by_priority() {
            let mut mapper = Mapper::new();

            let paths = self
                .gateway
                .list_blobs_recursive(&source.owner, &source.repository, &source.branch)?;
            for path in paths {
                if included.insert(path.to_lowercase()) {
                    self.process_item(&mut mapper, source, target, ObjectType::Blob, &path)?;
                }
            }

            if self.mode == SyncMode::ExcludeAllByDefault {
                for item in self.manual_items.iter().filter(|i| i.object_type == ObjectType::Tree) {
                    let tree = PathAddress::tree(&source.owner, &source.repository, &source.branch, Some(&item.path))?;
                    let key = item.path.to_lowercase();
                    if !included.contains(&key) && self.gateway.tree_from(&tree, false)?.is_some() {
                        included.insert(key);
                        self.process_item(&mut mapper, source, target, ObjectType::Tree, &item.path)?;
                    }
                }
            }

            let diff = syncer.diff(&mapper)?;
            if !diff.is_empty() {
                contributions.push((source.display_name(), diff));
            }
        }

        let mut decided: HashSet<PathAddress> = HashSet::new();
        let mut mapper = Mapper::new();
        let mut changes = Vec::new();
        let mut sources = Vec::new();

        for (name, diff) in contributions {
            let mut contributed = false;
            for change in diff.changes() {
                if decided.contains(&change.destination) {
                    continue;
                }

                match &change.source {
                    Address::Path(source) => {
                        info!("Mapping '{}' => '{}'", source.url(), change.destination.url());
                        mapper.add(source.clone(), change.destination.clone())?;
                    }
                    Address::Null => {
                        if diff::enrich(self.gateway, &change.destination, false)?.is_none() {
                            continue;
                        }
                        info!("Removing '{}'", change.destination.url());
                        mapper.remove(change.destination.clone())?;
                    }
                }
                decided.insert(change.destination.clone());
                changes.push(change.clone());
                contributed = true;
            }
            if contributed {
                sources.push(name);
            }
        }

        let mut description = format!(
            "{}\n\nThe following source template repositories were used:\n",
            DESCRIPTION_HEADER
        );
        for name in &sources {
            description.push_str(&format!("* {}\n", name));
        }

        Ok(SyncContext {
            target: target.clone(),
            description,
            sources,
            changes,
            mapper,
        })
    }

    /// Synchronizes every target with `request`.
    pub fn sync(&self, request: &SyncRequest) -> SyncReport {
        let run = |target: &TargetRepository| {
            let outcome = match self.sync_target(target, request) {
                Ok(outcome) => outcome,
                Err(e) => {
                    let e = Error::for_target(
                        format!("Repository:{} Branch:{}", target.display_name(), target.branch),
                        e,
                    );
                    error!("{}", e);
                    TargetOutcome::Failed(e)
                }
            };
            (target.clone(), outcome)
        };

        let outcomes = if self.parallel_targets {
            self.targets.par_iter().map(run).collect()
        } else {
            self.targets.iter().map(run).collect()
        };
        SyncReport { outcomes }
    }

    fn sync_target(&self, target: &TargetRepository, request: &SyncRequest) -> Result<TargetOutcome> {
        let root = target.root()?;
        let mut request = request.clone();
        if let Some(output) = target.output {
            request.output = output;
        }
        for label in &target.labels {
            if !request.labels.contains(label) {
                request.labels.push(label.clone());
            }
        }

        let syncer = self.syncer();
        if !syncer.can_synchronize(&root, &request)? {
            return Ok(TargetOutcome::Skipped {
                reason: format!(
                    "an open pull request titled '{}' already exists",
                    request.pull_request_title
                ),
            });
        }

        let context = self.calculate_sync_context(target)?;
        if context.mapper.is_empty() {
            info!("Repo {} is in sync", target.display_name());
            return Ok(TargetOutcome::InSync);
        }
        info!(
            "{}: {} to create, {} to update, {} to remove",
            target.display_name(),
            context.changes.iter().filter(|c| c.kind == ChangeKind::Creation).count(),
            context.changes.iter().filter(|c| c.kind == ChangeKind::Update).count(),
            context.changes.iter().filter(|c| c.kind == ChangeKind::Removal).count()
        );

        if request.pull_request_description.is_none() {
            request.pull_request_description = Some(context.description.clone());
        }

        match syncer.sync(&context.mapper, &request)?.into_iter().next() {
            Some(result) => {
                info!(
                    "Pull created for {}, click here to review and pull: {}",
                    target.display_name(),
                    result.url
                );
                Ok(TargetOutcome::Updated(result))
            }
            None => {
                info!("Repo {} is in sync", target.display_name());
                Ok(TargetOutcome::InSync)
            }
        }
    }
}
