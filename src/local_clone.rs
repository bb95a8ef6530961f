//! Working-copy git operations used by the fork path.
//!
//! When the actor cannot push to a target, the changes are prepared in a
//! local clone of a fork and pushed there. [`LocalClone`] is the seam the
//! orchestrator depends on; [`GitCommandClone`] implements it with the
//! system `git` command, which picks up SSH keys, credential helpers and any
//! other authentication configured for the user.

use std::fmt;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use log::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::object::Identity;

/// Username/password pair for HTTP(S) remotes.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Returns the credentials to use for a remote URL, if any.
pub type CredentialProvider = Arc<dyn Fn(&str) -> Option<Credentials> + Send + Sync>;

/// Operations on a local working copy.
pub trait LocalClone: Send + Sync {
    /// Clones `url` into `directory`, checking out `branch`.
    fn clone_repository(&self, url: &str, branch: &str, directory: &Path) -> Result<()>;

    /// Adds remote `name`, or repoints it at `url` when it exists.
    fn ensure_remote(&self, directory: &Path, name: &str, url: &str) -> Result<()>;

    fn fetch(&self, directory: &Path, remote: &str) -> Result<()>;

    /// Creates `branch` from the current checkout and switches to it.
    fn create_branch(&self, directory: &Path, branch: &str) -> Result<()>;

    /// Merges `reference` into the current branch.
    fn merge(&self, directory: &Path, reference: &str, signature: &Identity) -> Result<()>;

    /// Writes `content` at `path`, creating parent directories.
    fn write_file(&self, directory: &Path, path: &str, content: &[u8], executable: bool) -> Result<()> {
        write_worktree_file(directory, path, content, executable)
    }

    /// Deletes `path`; a missing file is not an error.
    fn delete_file(&self, directory: &Path, path: &str) -> Result<()> {
        delete_worktree_file(directory, path)
    }

    fn stage_all(&self, directory: &Path) -> Result<()>;

    /// Commits the staged changes and returns the new commit sha.
    fn commit(&self, directory: &Path, message: &str, signature: &Identity) -> Result<String>;

    /// Pushes `branch` to the same branch of `remote`.
    fn push(&self, directory: &Path, remote: &str, branch: &str) -> Result<()>;
}

/// Writes a file of the working copy.
pub fn write_worktree_file(directory: &Path, path: &str, content: &[u8], executable: bool) -> Result<()> {
    let full_path = directory.join(path);
    if let Some(parent) = full_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&full_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if executable { 0o755 } else { 0o644 };
        fs::set_permissions(&full_path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = executable;

    Ok(())
}

/// Deletes a file of the working copy.
pub fn delete_worktree_file(directory: &Path, path: &str) -> Result<()> {
    match fs::remove_file(directory.join(path)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Embeds `credentials` in an HTTP(S) `url`.
///
/// Other schemes are returned unchanged.
pub fn authenticated_url(url: &str, credentials: &Credentials) -> Result<String> {
    let mut parsed = Url::parse(url)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Ok(url.to_string());
    }
    parsed
        .set_username(&credentials.username)
        .map_err(|_| Error::InvalidAddress {
            message: format!("cannot set credentials on '{}'", url),
        })?;
    parsed
        .set_password(Some(&credentials.password))
        .map_err(|_| Error::InvalidAddress {
            message: format!("cannot set credentials on '{}'", url),
        })?;
    Ok(parsed.to_string())
}

pub(crate) fn signature_env(signature: &Identity) -> Vec<(&'static str, String)> {
    let date = format!("{} +0000", signature.timestamp);
    vec![
        ("GIT_AUTHOR_NAME", signature.name.clone()),
        ("GIT_AUTHOR_EMAIL", signature.email.clone()),
        ("GIT_AUTHOR_DATE", date.clone()),
        ("GIT_COMMITTER_NAME", signature.name.clone()),
        ("GIT_COMMITTER_EMAIL", signature.email.clone()),
        ("GIT_COMMITTER_DATE", date),
    ]
}

/// [`LocalClone`] backed by the system `git` command.
#[derive(Clone, Default)]
pub struct GitCommandClone {
    credentials: Option<CredentialProvider>,
}

impl fmt::Debug for GitCommandClone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitCommandClone")
            .field("credentials", &self.credentials.is_some())
            .finish()
    }
}

impl GitCommandClone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, provider: CredentialProvider) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Runs git in `directory`. `display` replaces the arguments in errors.
    fn run(
        &self,
        directory: &Path,
        args: &[&str],
        env: &[(&str, String)],
        display: Option<&str>,
    ) -> Result<String> {
        let command = display
            .map(str::to_string)
            .unwrap_or_else(|| args.join(" "));
        debug!("git {} ({})", command, directory.display());

        let output = Command::new("git")
            .args(args)
            .current_dir(directory)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .output()
            .map_err(|e| Error::LocalGit {
                command: command.clone(),
                path: directory.display().to_string(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::LocalGit {
                command,
                path: directory.display().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl LocalClone for GitCommandClone {
    fn clone_repository(&self, url: &str, branch: &str, directory: &Path) -> Result<()> {
        if directory.exists() {
            fs::remove_dir_all(directory)?;
        }
        let parent = directory.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;

        let target = directory.display().to_string();
        self.run(
            parent,
            &["clone", "--branch", branch, url, &target],
            &[],
            None,
        )?;
        Ok(())
    }

    fn ensure_remote(&self, directory: &Path, name: &str, url: &str) -> Result<()> {
        if self.run(directory, &["remote", "get-url", name], &[], None).is_ok() {
            self.run(directory, &["remote", "set-url", name, url], &[], None)?;
        } else {
            self.run(directory, &["remote", "add", name, url], &[], None)?;
        }
        Ok(())
    }

    fn fetch(&self, directory: &Path, remote: &str) -> Result<()> {
        self.run(directory, &["fetch", remote], &[], None)?;
        Ok(())
    }

    fn create_branch(&self, directory: &Path, branch: &str) -> Result<()> {
        self.run(directory, &["checkout", "-b", branch], &[], None)?;
        Ok(())
    }

    fn merge(&self, directory: &Path, reference: &str, signature: &Identity) -> Result<()> {
        self.run(
            directory,
            &["merge", "--no-edit", reference],
            &signature_env(signature),
            None,
        )?;
        Ok(())
    }

    fn stage_all(&self, directory: &Path) -> Result<()> {
        self.run(directory, &["add", "--all"], &[], None)?;
        Ok(())
    }

    fn commit(&self, directory: &Path, message: &str, signature: &Identity) -> Result<String> {
        self.run(
            directory,
            &["commit", "--no-verify", "-m", message],
            &signature_env(signature),
            None,
        )?;
        self.run(directory, &["rev-parse", "HEAD"], &[], None)
    }

    fn push(&self, directory: &Path, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("{}:{}", branch, branch);
        let remote_url = self.run(directory, &["remote", "get-url", remote], &[], None)?;

        let credentials = self
            .credentials
            .as_ref()
            .and_then(|provider| provider(&remote_url));

        match credentials {
            Some(credentials) => {
                let url = authenticated_url(&remote_url, &credentials)?;
                let display = format!("push {} {}", remote, refspec);
                self.run(directory, &["push", &url, &refspec], &[], Some(&display))?;
            }
            None => {
                self.run(directory, &["push", remote, &refspec], &[], None)?;
            }
        }
        Ok(())
    }
}
