//! Shared test utilities for integration and E2E tests.
//!
//! This module provides common fixtures and helper functions to reduce
//! duplication across test files.
//!
//! ## Usage
//!
//! Add `mod common;` to your test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let forge = forge();
//!     seed(&forge, "acme", "templates", &[("LICENSE", "MIT")]);
//!     // ... test code
//! }
//! ```

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use assert_fs::prelude::*;
use repo_sync::gateway::memory::MemoryGateway;
use repo_sync::gateway::User;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_cmd::cargo::cargo_bin_cmd;
    #[allow(unused_imports)]
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::{forge, request, seed, TestFixture, BOT};
}

/// Login of the user every test acts as.
pub const BOT: &str = "bot";

/// An in-memory forge acting as [`BOT`].
pub fn forge() -> MemoryGateway {
    MemoryGateway::new(User::new(BOT, "Sync Bot", Some("bot@example.com")))
}

/// Creates `owner/repository` with `files` committed on `main`.
pub fn seed(forge: &MemoryGateway, owner: &str, repository: &str, files: &[(&str, &str)]) -> String {
    forge
        .create_repository(owner, repository)
        .expect("Failed to create repository");
    forge
        .commit_files(owner, repository, "main", files)
        .expect("Failed to seed repository")
}

/// A sync request on the `sync` branch.
pub fn request(output: repo_sync::syncer::SyncOutput) -> repo_sync::syncer::SyncRequest {
    repo_sync::syncer::SyncRequest::new(output, "sync", "Synchronize templates", "Synchronize templates")
}

/// A temporary directory with a configuration file and bare repositories.
///
/// Repositories are created under `<root>/<owner>/<repository>.git` using
/// the `git` binary, which must be on the `PATH`.
///
/// # Example
///
/// ```rust,ignore
/// let fixture = TestFixture::new()
///     .with_repository("acme", "templates", &[("LICENSE", "MIT")])
///     .with_config(CONFIG);
///
/// fixture.command().arg("diff").assert().code(1);
/// ```
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    /// Create a new test fixture with an empty temporary directory.
    pub fn new() -> Self {
        let fixture = Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        };
        std::fs::create_dir_all(fixture.root()).expect("Failed to create repository root");
        fixture
    }

    /// Add a `repo-sync.yaml` configuration file with the given content.
    ///
    /// `{root}` is replaced by the repository root.
    pub fn with_config(self, content: &str) -> Self {
        let content = content.replace("{root}", &self.root().display().to_string());
        self.temp_dir
            .child("repo-sync.yaml")
            .write_str(&content)
            .expect("Failed to write config file");
        self
    }

    /// Add a bare repository whose `main` branch holds `files`.
    pub fn with_repository(self, owner: &str, repository: &str, files: &[(&str, &str)]) -> Self {
        let work = self.temp_dir.child(format!("work-{}-{}", owner, repository));
        work.create_dir_all().expect("Failed to create work tree");
        for (path, content) in files {
            work.child(path).write_str(content).expect("Failed to write file");
        }

        git(work.path(), &["init", "--quiet", "--initial-branch=main"]);
        git(work.path(), &["add", "--all"]);
        git(
            work.path(),
            &[
                "-c",
                "user.name=Fixture",
                "-c",
                "user.email=fixture@example.com",
                "commit",
                "--quiet",
                "--message",
                "Seed",
            ],
        );

        let bare = self.bare_path(owner, repository);
        std::fs::create_dir_all(bare.parent().expect("bare path has a parent"))
            .expect("Failed to create owner directory");
        git(
            self.path(),
            &["clone", "--quiet", "--bare", &work.path().display().to_string(), &bare.display().to_string()],
        );
        self
    }

    /// Get the path to the temporary directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory holding the bare repositories.
    pub fn root(&self) -> PathBuf {
        self.temp_dir.path().join("forge")
    }

    pub fn bare_path(&self, owner: &str, repository: &str) -> PathBuf {
        self.root().join(owner).join(format!("{}.git", repository))
    }

    /// Get the path to the config file.
    pub fn config_path(&self) -> PathBuf {
        self.temp_dir.path().join("repo-sync.yaml")
    }

    /// Content of `path` on `branch` of a bare repository.
    pub fn read_file(&self, owner: &str, repository: &str, branch: &str, path: &str) -> Option<String> {
        let output = Command::new("git")
            .current_dir(self.bare_path(owner, repository))
            .args(["show", &format!("{}:{}", branch, path)])
            .output()
            .expect("Failed to run git");
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Create a command configured to run in this fixture's directory.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("repo-sync");
        cmd.current_dir(self.path())
            .env("REPO_SYNC_ROOT", self.root())
            .env("REPO_SYNC_WORKSPACE", self.path().join("workspace"))
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .current_dir(dir)
        .args(args)
        .status()
        .expect("Failed to run git");
    assert!(status.success(), "git {:?} failed", args);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_root() {
        let fixture = TestFixture::new();
        assert!(fixture.root().is_dir());
    }

    #[test]
    fn test_fixture_config_substitutes_root() {
        let fixture = TestFixture::new().with_config("root: {root}");
        let content = std::fs::read_to_string(fixture.config_path()).unwrap();
        assert!(content.contains(&fixture.root().display().to_string()));
    }

    #[test]
    fn test_seeded_forge() {
        let forge = forge();
        seed(&forge, "acme", "templates", &[("LICENSE", "MIT")]);
        assert_eq!(forge.list_files("acme", "templates", "main"), vec!["LICENSE"]);
    }
}
