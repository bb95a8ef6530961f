//! # Report Styling
//!
//! The `sync` and `diff` commands print one status line per repository.
//! [`OutputConfig`] decides whether those lines carry colors and symbols or
//! plain bracketed tags, so that logs captured by CI stay greppable.
//!
//! Colors are off when `--color=never` is given, when `NO_COLOR` is set,
//! when `TERM=dumb`, or when `console` reports that stdout cannot show them
//! (this covers `CLICOLOR` and `CLICOLOR_FORCE`). `--color=always` wins over
//! all of these.
//!
//! ```rust
//! use repo_sync::output::{OutputConfig, Status};
//!
//! let out = OutputConfig::plain();
//! assert_eq!(out.status_line(Status::InSync, "acme/svc is in sync"), "[OK] acme/svc is in sync");
//! assert_eq!(out.status_line(Status::Skipped, "pull request open"), "[WARN] pull request open");
//! ```

use std::env;

/// State of a repository as reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Updated, or nothing to do.
    InSync,
    /// Left alone on purpose, e.g. an open pull request already exists.
    Skipped,
    /// Could not be read or updated.
    Failed,
}

impl Status {
    fn symbol(self) -> &'static str {
        match self {
            Status::InSync => "✅",
            Status::Skipped => "⚠️",
            Status::Failed => "❌",
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Status::InSync => "[OK]",
            Status::Skipped => "[WARN]",
            Status::Failed => "[ERR]",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub use_color: bool,
}

impl OutputConfig {
    /// Resolves the `--color` flag (`always`, `never`, `auto`) against the
    /// environment.
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => terminal_wants_color(),
        };
        Self { use_color }
    }

    /// Output without colors or symbols.
    pub fn plain() -> Self {
        Self { use_color: false }
    }

    /// Symbol (or tag) for `status`.
    pub fn badge(&self, status: Status) -> &'static str {
        if self.use_color {
            status.symbol()
        } else {
            status.tag()
        }
    }

    /// `text` colored after `status`: green, yellow or bold red.
    pub fn paint(&self, status: Status, text: &str) -> String {
        if !self.use_color {
            return text.to_string();
        }
        let styled = console::style(text).force_styling(true);
        match status {
            Status::InSync => styled.green(),
            Status::Skipped => styled.yellow(),
            Status::Failed => styled.red().bold(),
        }
        .to_string()
    }

    /// Badge followed by the painted `text`.
    pub fn status_line(&self, status: Status, text: &str) -> String {
        format!("{} {}", self.badge(status), self.paint(status, text))
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

fn terminal_wants_color() -> bool {
    // https://no-color.org/: presence disables, even when empty
    if env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if env::var("TERM").is_ok_and(|v| v == "dumb") {
        return false;
    }
    console::colors_enabled()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_flag() {
        assert!(OutputConfig::from_env_and_flag("always").use_color);
        assert!(OutputConfig::from_env_and_flag("ALWAYS").use_color);
        assert!(!OutputConfig::from_env_and_flag("never").use_color);
    }

    #[test]
    fn test_plain_status_lines() {
        let out = OutputConfig::plain();
        assert_eq!(out.status_line(Status::InSync, "No changes detected."), "[OK] No changes detected.");
        assert_eq!(out.status_line(Status::Skipped, "open"), "[WARN] open");
        assert_eq!(out.status_line(Status::Failed, "boom"), "[ERR] boom");
    }

    #[test]
    fn test_colored_status_lines() {
        let out = OutputConfig { use_color: true };
        assert_eq!(out.badge(Status::Failed), "❌");
        let line = out.status_line(Status::Failed, "boom");
        assert!(line.starts_with("❌ "));
        assert!(line.contains("boom"));
        assert_ne!(line, "❌ boom");
    }
}
