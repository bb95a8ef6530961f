//! Default values shared by the commands.

use std::path::PathBuf;

/// Configuration file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "repo-sync.yaml";

pub const DEFAULT_PULL_REQUEST_TITLE: &str = "Synchronize template files";

pub const DEFAULT_COMMIT_MESSAGE: &str = "Synchronize template files";

/// Returns the default workspace for local clones.
///
/// Uses the platform-appropriate cache directory:
/// - Linux: `~/.cache/repo-sync` (XDG Base Directory)
/// - macOS: `~/Library/Caches/repo-sync`
/// - Windows: `{FOLDERID_LocalAppData}\repo-sync`
///
/// Falls back to `.repo-sync` in the current directory if the platform
/// cache directory cannot be determined. Overridden by `--workspace` or the
/// `REPO_SYNC_WORKSPACE` environment variable.
pub fn default_workspace_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".repo-sync"))
        .join("repo-sync")
}

/// Branch carrying the changes of a run started at `timestamp`.
pub fn default_branch_name(timestamp: u64) -> String {
    format!("repo-sync-{}", timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_workspace_root_returns_path() {
        assert!(default_workspace_root().ends_with("repo-sync"));
    }

    #[test]
    fn test_default_workspace_root_is_absolute_or_fallback() {
        let root = default_workspace_root();
        assert!(
            root.is_absolute() || root.starts_with(".repo-sync"),
            "Expected absolute path or fallback, got: {:?}",
            root
        );
    }

    #[test]
    fn test_default_branch_name() {
        assert_eq!(default_branch_name(1700000000), "repo-sync-1700000000");
    }
}
