//! # Address Model
//!
//! A [`PathAddress`] locates one object (blob or tree) inside one branch of one
//! repository. Identity is `(owner, repository, object_type, branch, path)`;
//! the `sha` and `mode` attributes are filled in by enrichment and never take
//! part in equality or hashing. A source and a destination describing "the
//! same logical file" therefore compare equal even when their content
//! differs, which is what lets the mapper and the diff engine pair them up.
//!
//! [`Address`] is the two-variant union handed to the mapper: either a real
//! location or [`Address::Null`], the "no source" marker that expresses a
//! removal.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mode used for every tree entry.
pub const TREE_MODE: &str = "040000";
/// Mode of a regular, non-executable file.
pub const BLOB_MODE: &str = "100644";
/// Mode of an executable file.
pub const EXECUTABLE_MODE: &str = "100755";

/// Kind of object an address points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Blob,
    Tree,
}

impl ObjectType {
    /// Lower-case form used in URLs and git plumbing (`blob`, `tree`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectType::Blob => write!(f, "Blob"),
            ObjectType::Tree => write!(f, "Tree"),
        }
    }
}

/// A located object in a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathAddress {
    owner: String,
    repository: String,
    object_type: ObjectType,
    branch: String,
    path: Option<String>,
    sha: Option<String>,
    mode: Option<String>,
}

impl PathAddress {
    /// Creates an address, validating its parts.
    ///
    /// `path` is `None` for the repository root, which is always a tree.
    pub fn new(
        owner: impl Into<String>,
        repository: impl Into<String>,
        object_type: ObjectType,
        branch: impl Into<String>,
        path: Option<&str>,
    ) -> Result<Self> {
        let owner = owner.into();
        let repository = repository.into();
        let branch = branch.into();

        for (field, value) in [
            ("owner", &owner),
            ("repository", &repository),
            ("branch", &branch),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidAddress {
                    message: format!("{} cannot be empty", field),
                });
            }
        }

        let path = match path {
            None => None,
            Some(p) => {
                let trimmed = p.trim_matches('/');
                if trimmed.is_empty() {
                    None
                } else if trimmed.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
                    return Err(Error::InvalidAddress {
                        message: format!("invalid path '{}'", p),
                    });
                } else {
                    Some(trimmed.to_string())
                }
            }
        };

        if path.is_none() && object_type == ObjectType::Blob {
            return Err(Error::InvalidAddress {
                message: format!(
                    "a blob needs a path ({}/{} on '{}')",
                    owner, repository, branch
                ),
            });
        }

        Ok(Self {
            owner,
            repository,
            object_type,
            branch,
            path,
            sha: None,
            mode: None,
        })
    }

    /// Shorthand for a blob address.
    pub fn blob(owner: &str, repository: &str, branch: &str, path: &str) -> Result<Self> {
        Self::new(owner, repository, ObjectType::Blob, branch, Some(path))
    }

    /// Shorthand for a tree address; `None` designates the root.
    pub fn tree(owner: &str, repository: &str, branch: &str, path: Option<&str>) -> Result<Self> {
        Self::new(owner, repository, ObjectType::Tree, branch, path)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn sha(&self) -> Option<&str> {
        self.sha.as_deref()
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    /// Last path segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.path.as_deref().and_then(|p| p.rsplit('/').next())
    }

    /// Number of path segments; the root has depth 0.
    pub fn depth(&self) -> usize {
        self.path.as_deref().map_or(0, |p| p.split('/').count())
    }

    /// `owner/repository`
    pub fn repository_key(&self) -> String {
        format!("{}/{}", self.owner, self.repository)
    }

    /// `owner/repository/branch`, the grouping key of a target commit.
    pub fn target_key(&self) -> String {
        format!("{}/{}/{}", self.owner, self.repository, self.branch)
    }

    /// Provider-neutral locator, `owner/repository/type/branch[/path]`.
    pub fn url(&self) -> String {
        let base = format!(
            "{}/{}/{}/{}",
            self.owner,
            self.repository,
            self.object_type.as_str(),
            self.branch
        );
        match &self.path {
            Some(p) => format!("{}/{}", base, p),
            None => base,
        }
    }

    /// Returns a copy carrying the given content attributes.
    pub fn enriched(&self, sha: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            sha: Some(sha.into()),
            mode: Some(mode.into()),
            ..self.clone()
        }
    }

    /// Returns a copy with the content attributes cleared.
    pub fn bare(&self) -> Self {
        Self {
            sha: None,
            mode: None,
            ..self.clone()
        }
    }

    /// Same location in another repository/branch, keeping the path and type.
    pub fn relocate(&self, owner: &str, repository: &str, branch: &str) -> Result<Self> {
        Self::new(owner, repository, self.object_type, branch, self.path())
    }

    /// Same repository/branch, another path (used for target path rewriting).
    pub fn with_path(&self, path: &str) -> Result<Self> {
        Self::new(
            self.owner.clone(),
            self.repository.clone(),
            self.object_type,
            self.branch.clone(),
            Some(path),
        )
    }

    /// Address of a child entry of this tree.
    pub fn combine(&self, object_type: ObjectType, name: &str, sha: &str, mode: &str) -> Result<Self> {
        let path = match &self.path {
            Some(p) => format!("{}/{}", p, name),
            None => name.to_string(),
        };
        Ok(Self::new(
            self.owner.clone(),
            self.repository.clone(),
            object_type,
            self.branch.clone(),
            Some(&path),
        )?
        .enriched(sha, mode))
    }

    /// The tree containing this object.
    pub fn parent(&self) -> Result<Self> {
        let path = self.path.as_deref().ok_or_else(|| Error::InvalidAddress {
            message: format!("cannot escape out of the root of {}", self.target_key()),
        })?;
        let parent_path = path.rfind('/').map(|i| &path[..i]);
        Self::tree(&self.owner, &self.repository, &self.branch, parent_path)
    }

    /// The root tree of this repository/branch.
    pub fn root(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            repository: self.repository.clone(),
            object_type: ObjectType::Tree,
            branch: self.branch.clone(),
            path: None,
            sha: None,
            mode: None,
        }
    }

    /// The tree made of the first `level + 1` segments of this path.
    pub fn segment_at_level(&self, level: usize) -> Result<Self> {
        let path = self.path.as_deref().ok_or_else(|| Error::InvalidAddress {
            message: format!("the root of {} has no segments", self.target_key()),
        })?;
        let prefix: Vec<&str> = path.split('/').take(level + 1).collect();
        Self::tree(
            &self.owner,
            &self.repository,
            &self.branch,
            Some(&prefix.join("/")),
        )
    }

    fn identity(&self) -> (&str, &str, ObjectType, &str, Option<&str>) {
        (
            &self.owner,
            &self.repository,
            self.object_type,
            &self.branch,
            self.path.as_deref(),
        )
    }
}

impl PartialEq for PathAddress {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for PathAddress {}

impl Hash for PathAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}: {}]", self.object_type, self.url())
    }
}

/// Either a located object or the "no source" marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Path(PathAddress),
    Null,
}

impl Address {
    pub fn as_path(&self) -> Option<&PathAddress> {
        match self {
            Address::Path(p) => Some(p),
            Address::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Address::Null)
    }
}

impl From<PathAddress> for Address {
    fn from(value: PathAddress) -> Self {
        Address::Path(value)
    }
}

/// First seven characters of a sha, for log lines.
pub fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
