//! Git object types shared by the hasher, the gateways and the tree builder.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::ObjectType;

/// Type of an entry inside a tree listing.
///
/// `Commit` entries are submodule references; they can be listed but are
/// never propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Blob,
    Tree,
    Commit,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Blob => "blob",
            EntryKind::Tree => "tree",
            EntryKind::Commit => "commit",
        }
    }

    /// Parses the type column of `git ls-tree`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "blob" => Some(EntryKind::Blob),
            "tree" => Some(EntryKind::Tree),
            "commit" => Some(EntryKind::Commit),
            _ => None,
        }
    }
}

impl From<ObjectType> for EntryKind {
    fn from(value: ObjectType) -> Self {
        match value {
            ObjectType::Blob => EntryKind::Blob,
            ObjectType::Tree => EntryKind::Tree,
        }
    }
}

/// One entry of a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub mode: String,
    pub name: String,
    pub sha: String,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn new(mode: &str, name: &str, sha: &str, kind: EntryKind) -> Self {
        Self {
            mode: mode.to_string(),
            name: name.to_string(),
            sha: sha.to_string(),
            kind,
        }
    }
}

impl fmt::Display for TreeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\t{}", self.mode, self.kind.as_str(), self.sha, self.name)
    }
}

/// A tree as listed by a provider at some (branch, path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeListing {
    /// Path of the tree inside the repository, empty for the root.
    pub path: String,
    pub sha: String,
    pub entries: Vec<TreeEntry>,
}

impl TreeListing {
    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// A tree being assembled before it is materialized by a gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTree {
    path: String,
    entries: Vec<TreeEntry>,
}

impl NewTree {
    /// Starts an empty tree located at `path` (`None` for the root).
    pub fn new(path: Option<&str>) -> Self {
        Self {
            path: path.unwrap_or_default().to_string(),
            entries: Vec::new(),
        }
    }

    /// Starts from the entries of an existing tree.
    pub fn from_listing(listing: &TreeListing) -> Self {
        Self {
            path: listing.path.clone(),
            entries: listing.entries.clone(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of a direct child of this tree.
    pub fn child_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.path, name)
        }
    }

    pub fn add(&mut self, mode: &str, name: &str, sha: &str, kind: EntryKind) {
        self.entries.push(TreeEntry::new(mode, name, sha, kind));
    }

    /// Removes the entry called `name`, if any.
    pub fn remove(&mut self, name: &str) -> Option<TreeEntry> {
        let index = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(index))
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<TreeEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Author/committer identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch, always rendered as `+0000`.
    pub timestamp: i64,
}

impl Identity {
    pub fn new(name: &str, email: &str, timestamp: i64) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            timestamp,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {} +0000", self.name, self.email, self.timestamp)
    }
}

/// The tip commit of a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub sha: String,
    pub tree_sha: String,
}
