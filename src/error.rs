//! # Error Handling
//!
//! This module defines the centralized error type for the synchronization
//! engine. It uses the `thiserror` library to build a single `Error` enum that
//! covers every anticipated failure mode, each variant carrying enough context
//! (URLs, shas, repository identity) to make the failure actionable.
//!
//! ## Key Components
//!
//! - **`Error`**: The main enum describing everything that can go wrong while
//!   mapping, diffing, propagating objects or talking to a provider.
//!
//! - **`Result<T>`**: A type alias for `std::result::Result<T, Error>`.
//!
//! The variants fall in a few families:
//!
//! - Mapping errors (`MappingConflict`, `InvalidAddress`).
//! - Lookup errors (`NotFound`), fatal for sources and tolerated for
//!   destinations.
//! - Capability errors (`UnsupportedOperation`), e.g. asking for a plain
//!   branch on a repository the actor cannot push to.
//! - Consistency errors (`HashMismatch`), which always indicate a defect.
//! - Remote and local git failures (`Provider`, `LocalGit`,
//!   `ForkImportTimeout`, `Cancelled`).
//! - Per-target wrapping (`Target`), used by the orchestrator to attach the
//!   target identity to whatever went wrong.
//! - Configuration and wrapped library errors.

use thiserror::Error;

/// Main error type for repo-sync operations
#[derive(Error, Debug)]
pub enum Error {
    /// A referenced path or branch does not exist.
    ///
    /// Fatal when raised for a source; destinations tolerate absence and
    /// treat it as "to be created".
    #[error("[{object_type}: {url}] doesn't exist")]
    NotFound { object_type: String, url: String },

    /// The same destination was scheduled for both addition and removal, or
    /// a tree removal was requested.
    #[error("Mapping conflict: {message}")]
    MappingConflict { message: String },

    /// The requested operation is not available in the current context.
    #[error("Unsupported operation '{operation}': {message}")]
    UnsupportedOperation { operation: String, message: String },

    /// A computed object hash did not match the expected one.
    ///
    /// This is an internal consistency failure and never user-recoverable.
    #[error("Hash mismatch for {object_type}: expected {expected}, computed {actual}")]
    HashMismatch {
        object_type: String,
        expected: String,
        actual: String,
    },

    /// A call to the provider failed.
    #[error("Provider operation '{operation}' failed: {message}")]
    Provider { operation: String, message: String },

    /// A local git command failed.
    #[error("Git command failed in {path}: {command} - {stderr}")]
    LocalGit {
        command: String,
        path: String,
        stderr: String,
    },

    /// A fork did not finish importing within the allowed number of polls.
    #[error("Fork of {repository} was not ready after {attempts} attempts")]
    ForkImportTimeout { repository: String, attempts: u32 },

    /// The caller cancelled a long-running operation.
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// Processing of a single target repository failed.
    #[error("Failed to sync {target}: {source}")]
    Target {
        target: String,
        #[source]
        source: Box<Error>,
    },

    /// An address could not be built from the given parts.
    #[error("Invalid address: {message}")]
    InvalidAddress { message: String },

    /// An error occurred while parsing the configuration file.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON serialization error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// A malformed hexadecimal sha, wrapped from `hex::FromHexError`.
    #[error("Invalid sha: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl Error {
    /// Wraps an error with the identity of the target being processed.
    pub fn for_target(target: impl Into<String>, source: Error) -> Self {
        Error::Target {
            target: target.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn provider(operation: &str, message: impl Into<String>) -> Self {
        Error::Provider {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(operation: &str, message: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn poisoned(context: &str) -> Self {
        Error::LockPoisoned {
            context: context.to_string(),
        }
    }

    /// Returns the innermost error, looking through `Target` wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Target { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let error = Error::NotFound {
            object_type: "Blob".to_string(),
            url: "https://example.com/acme/templates/blob/main/readme.md".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("[Blob: "));
        assert!(display.contains("readme.md"));
        assert!(display.contains("doesn't exist"));
    }

    #[test]
    fn test_error_display_config_parse_with_hint() {
        let error = Error::ConfigParse {
            message: "Unknown template 'base'".to_string(),
            hint: Some("Declare it under 'templates:'".to_string()),
        };
        let display = format!("{}", error);
        assert!(display.contains("Configuration parsing error"));
        assert!(display.contains("hint:"));
        assert!(display.contains("templates:"));
    }

    #[test]
    fn test_error_display_hash_mismatch() {
        let error = Error::HashMismatch {
            object_type: "Tree".to_string(),
            expected: "aaaa".to_string(),
            actual: "bbbb".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Hash mismatch for Tree"));
        assert!(display.contains("expected aaaa"));
        assert!(display.contains("computed bbbb"));
    }

    #[test]
    fn test_error_display_local_git() {
        let error = Error::LocalGit {
            command: "push origin sync".to_string(),
            path: "/tmp/clone".to_string(),
            stderr: "Permission denied".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Git command failed"));
        assert!(display.contains("push origin sync"));
        assert!(display.contains("Permission denied"));
    }

    #[test]
    fn test_target_wrapper_keeps_identity_and_cause() {
        let inner = Error::unsupported("CreateBranch", "not a collaborator");
        let error = Error::for_target("acme/svc/main", inner);
        let display = format!("{}", error);
        assert!(display.contains("acme/svc/main"));
        assert!(display.contains("not a collaborator"));
        assert!(matches!(
            error.root_cause(),
            Error::UnsupportedOperation { .. }
        ));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let error: Error = io_error.into();
        let display = format!("{}", error);
        assert!(display.contains("I/O error"));
        assert!(display.contains("File not found"));
    }

    #[test]
    fn test_error_from_hex_error() {
        let hex_error = hex::decode("zz").unwrap_err();
        let error: Error = hex_error.into();
        assert!(format!("{}", error).contains("Invalid sha"));
    }

    #[test]
    fn test_error_fork_timeout() {
        let error = Error::ForkImportTimeout {
            repository: "acme/svc".to_string(),
            attempts: 3,
        };
        let display = format!("{}", error);
        assert!(display.contains("acme/svc"));
        assert!(display.contains("3 attempts"));
    }
}
