//! # Repository Synchronization Library
//!
//! This library propagates files from one or more template (source) git
//! repositories into target repositories through a git hosting provider. It
//! is used by the `repo-sync` command-line tool but works with any
//! [`gateway::ProviderGateway`] implementation.
//!
//! ## Quick Example
//!
//! ```
//! use repo_sync::gateway::memory::MemoryGateway;
//! use repo_sync::gateway::User;
//! use repo_sync::local_clone::GitCommandClone;
//! use repo_sync::repo_sync::{RepoSync, SourceRepository, TargetOutcome, TargetRepository};
//! use repo_sync::syncer::{SyncOutput, SyncRequest};
//!
//! let forge = MemoryGateway::new(User::new("bot", "Sync Bot", None));
//! forge.create_repository("bot", "templates").unwrap();
//! forge
//!     .commit_files("bot", "templates", "main", &[("LICENSE", "MIT")])
//!     .unwrap();
//! forge.create_repository("bot", "svc").unwrap();
//! forge
//!     .commit_files("bot", "svc", "main", &[("src/lib.rs", "")])
//!     .unwrap();
//!
//! let clone = GitCommandClone::new();
//! let mut sync = RepoSync::new(&forge, &clone, std::env::temp_dir());
//! sync.add_source_repository(SourceRepository::new("bot", "templates", "main"));
//! sync.add_target_repository(TargetRepository::new("bot", "svc", "main"));
//!
//! let request = SyncRequest::new(SyncOutput::CreateCommit, "sync", "Sync templates", "Sync templates");
//! let report = sync.sync(&request);
//! assert!(matches!(report.outcomes[0].1, TargetOutcome::Updated(_)));
//! ```
//!
//! ## Core Concepts
//!
//! - **Addresses (`address`)**: a repository location `(owner, repository,
//!   branch, path)` plus the git object type. Identity ignores the sha and
//!   mode learned from the provider.
//! - **Mapping (`mapper`)**: source to destination directives, plus removals.
//! - **Diff (`diff`)**: keeps only the directives whose destination differs.
//! - **Tree building (`target_tree`, `propagation`, `hash`)**: rebuilds the
//!   destination trees bottom-up, copying each missing blob or tree into the
//!   destination repository at most once.
//! - **Orchestration (`syncer`, `repo_sync`)**: turns the rebuilt tree into a
//!   commit, a branch or a pull request, falling back to a fork and a local
//!   clone (`local_clone`) when the user cannot push to the target.
//! - **Providers (`gateway`)**: the provider boundary, with an in-memory forge
//!   and a provider backed by bare repositories on disk.
//! - **Configuration (`config`)**: the YAML description of templates and
//!   target repositories used by the CLI.

pub mod address;
pub mod config;
pub mod defaults;
pub mod diff;
pub mod error;
pub mod exit_codes;
pub mod gateway;
pub mod hash;
pub mod local_clone;
pub mod mapper;
pub mod object;
pub mod output;
pub mod path;
pub mod propagation;
pub mod repo_sync;
pub mod staging;
pub mod syncer;
pub mod target_tree;

#[cfg(test)]
mod address_proptest;
