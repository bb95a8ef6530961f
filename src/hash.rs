//! # Git Object Hashing
//!
//! Reproduces git's content addressing exactly, so that shas computed here
//! can be compared byte-for-byte with the ones a provider reports.
//!
//! Every object is hashed as `"<kind> <decimal length>\0" + payload` with
//! SHA-1 and rendered as 40 lower-case hex characters:
//!
//! - **blob**: the raw content.
//! - **tree**: entries sorted in git order, each serialized as
//!   `mode-without-leading-zeros SP name NUL 20-byte-binary-sha`.
//! - **commit**: `tree`, `parent`, `author`, `committer` header lines, a blank
//!   line, then the message.
//!
//! [`GitHasher`] is a streaming `Write` sink, so large blobs never need to be
//! held in memory.

use std::cmp::Ordering;
use std::io::{self, Read, Write};
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::object::{EntryKind, Identity, TreeEntry};

/// Hash of the empty tree.
pub const EMPTY_TREE_SHA: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";
/// Hash of the empty blob.
pub const EMPTY_BLOB_SHA: &str = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";

const BUFFER_SIZE: usize = 64 * 1024;

/// Streaming hasher for one git object of a known length.
pub struct GitHasher {
    hasher: Sha1,
    expected: u64,
    written: u64,
}

impl GitHasher {
    /// Starts hashing an object of `kind` whose payload is `len` bytes.
    pub fn new(kind: &str, len: u64) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(format!("{} {}\0", kind, len).as_bytes());
        Self {
            hasher,
            expected: len,
            written: 0,
        }
    }

    /// Returns the hex sha, failing if the payload length was not the
    /// announced one.
    pub fn finish(self) -> Result<String> {
        if self.written != self.expected {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "object announced {} bytes but {} were hashed",
                    self.expected, self.written
                ),
            )));
        }
        Ok(hex::encode(self.hasher.finalize()))
    }
}

impl Write for GitHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hashes an in-memory blob.
pub fn blob_sha(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Hashes a blob streamed from `reader`, which must yield exactly `len` bytes.
pub fn blob_sha_from_reader<R: Read>(len: u64, reader: R) -> Result<String> {
    let mut hasher = GitHasher::new("blob", len);
    let mut reader = io::BufReader::with_capacity(BUFFER_SIZE, reader);
    io::copy(&mut reader, &mut hasher)?;
    hasher.finish()
}

/// Hashes the content of a file on disk as a blob.
pub fn blob_sha_from_file(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    blob_sha_from_reader(len, file)
}

/// Git's tree ordering: names compare byte-wise, with sub-trees compared as
/// if their name ended with `/`.
fn git_tree_order(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    fn key(entry: &TreeEntry) -> impl Iterator<Item = u8> + '_ {
        let suffix: &[u8] = if entry.kind == EntryKind::Tree { b"/" } else { b"" };
        entry.name.bytes().chain(suffix.iter().copied())
    }
    key(a).cmp(key(b))
}

/// Serializes tree entries into git's binary tree payload.
pub fn serialize_tree(entries: &[TreeEntry]) -> Result<Vec<u8>> {
    let mut ordered: Vec<&TreeEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| git_tree_order(a, b));

    let mut payload = Vec::with_capacity(entries.len() * 48);
    for entry in ordered {
        let mode = entry.mode.trim_start_matches('0');
        payload.extend_from_slice(mode.as_bytes());
        payload.push(b' ');
        payload.extend_from_slice(entry.name.as_bytes());
        payload.push(0);

        let raw = hex::decode(&entry.sha)?;
        if raw.len() != 20 {
            return Err(Error::InvalidAddress {
                message: format!("'{}' is not a 20-byte sha ({})", entry.sha, entry.name),
            });
        }
        payload.extend_from_slice(&raw);
    }
    Ok(payload)
}

/// Hashes a tree made of `entries`, in any order.
pub fn tree_sha(entries: &[TreeEntry]) -> Result<String> {
    let payload = serialize_tree(entries)?;
    let mut hasher = GitHasher::new("tree", payload.len() as u64);
    hasher.write_all(&payload)?;
    hasher.finish()
}

/// Serializes a commit payload.
pub fn serialize_commit(
    tree_sha: &str,
    parent_sha: Option<&str>,
    message: &str,
    author: &Identity,
    committer: &Identity,
) -> Vec<u8> {
    let mut payload = format!("tree {}\n", tree_sha);
    if let Some(parent) = parent_sha {
        payload.push_str(&format!("parent {}\n", parent));
    }
    payload.push_str(&format!("author {}\n", author));
    payload.push_str(&format!("committer {}\n\n", committer));
    payload.push_str(message);
    payload.into_bytes()
}

/// Hashes a commit; author and committer are the same identity.
pub fn commit_sha(
    tree_sha: &str,
    parent_sha: Option<&str>,
    message: &str,
    identity: &Identity,
) -> Result<String> {
    let payload = serialize_commit(tree_sha, parent_sha, message, identity, identity);
    let mut hasher = GitHasher::new("commit", payload.len() as u64);
    hasher.write_all(&payload)?;
    hasher.finish()
}

/// Case-insensitive sha comparison.
pub fn same_sha(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{BLOB_MODE, TREE_MODE};

    const HELLO_WORLD_SHA: &str = "b45ef6fec89518d314f546fd6c3025367b721684";

    #[test]
    fn test_empty_blob() {
        assert_eq!(blob_sha(b""), EMPTY_BLOB_SHA);
    }

    #[test]
    fn test_known_blob() {
        assert_eq!(blob_sha(b"Hello, World!"), HELLO_WORLD_SHA);
    }

    #[test]
    fn test_empty_tree() {
        assert_eq!(tree_sha(&[]).unwrap(), EMPTY_TREE_SHA);
    }

    #[test]
    fn test_streaming_matches_in_memory() {
        let content = vec![7u8; 3 * BUFFER_SIZE + 11];
        let streamed = blob_sha_from_reader(content.len() as u64, content.as_slice()).unwrap();
        assert_eq!(streamed, blob_sha(&content));
    }

    #[test]
    fn test_streaming_rejects_wrong_length() {
        let result = blob_sha_from_reader(10, &b"short"[..]);
        assert!(result.is_err());
    }

    #[test]
    fn test_blob_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"Hello, World!").unwrap();
        assert_eq!(blob_sha_from_file(&path).unwrap(), HELLO_WORLD_SHA);
    }

    #[test]
    fn test_tree_hash_is_order_independent() {
        let a = TreeEntry::new(BLOB_MODE, "a.txt", HELLO_WORLD_SHA, EntryKind::Blob);
        let b = TreeEntry::new(TREE_MODE, "b", EMPTY_TREE_SHA, EntryKind::Tree);
        let first = tree_sha(&[a.clone(), b.clone()]).unwrap();
        let second = tree_sha(&[b, a]).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, EMPTY_TREE_SHA);
    }

    #[test]
    fn test_tree_mode_leading_zero_is_stripped() {
        let entry = TreeEntry::new(TREE_MODE, "dir", EMPTY_TREE_SHA, EntryKind::Tree);
        let payload = serialize_tree(&[entry]).unwrap();
        assert!(payload.starts_with(b"40000 dir\0"));
        assert_eq!(payload.len(), "40000 dir\0".len() + 20);
    }

    #[test]
    fn test_tree_uses_git_directory_ordering() {
        // "foo.txt" sorts before the directory "foo" because '.' < '/'.
        let file = TreeEntry::new(BLOB_MODE, "foo.txt", HELLO_WORLD_SHA, EntryKind::Blob);
        let dir = TreeEntry::new(TREE_MODE, "foo", EMPTY_TREE_SHA, EntryKind::Tree);
        let payload = serialize_tree(&[dir, file]).unwrap();
        assert!(payload.starts_with(b"100644 foo.txt\0"));
    }

    #[test]
    fn test_tree_rejects_bad_sha() {
        let entry = TreeEntry::new(BLOB_MODE, "a", "not-hex", EntryKind::Blob);
        assert!(tree_sha(&[entry]).is_err());

        let short = TreeEntry::new(BLOB_MODE, "a", "abcd", EntryKind::Blob);
        assert!(tree_sha(&[short]).is_err());
    }

    #[test]
    fn test_commit_serialization() {
        let identity = Identity::new("Bot", "bot@example.com", 1_600_000_000);
        let payload = serialize_commit(EMPTY_TREE_SHA, Some(HELLO_WORLD_SHA), "sync", &identity, &identity);
        let expected = format!(
            "tree {}\nparent {}\nauthor Bot <bot@example.com> 1600000000 +0000\ncommitter Bot <bot@example.com> 1600000000 +0000\n\nsync",
            EMPTY_TREE_SHA, HELLO_WORLD_SHA
        );
        assert_eq!(String::from_utf8(payload).unwrap(), expected);
    }

    #[test]
    fn test_commit_hash_depends_on_inputs() {
        let identity = Identity::new("Bot", "bot@example.com", 1_600_000_000);
        let one = commit_sha(EMPTY_TREE_SHA, None, "one", &identity).unwrap();
        let two = commit_sha(EMPTY_TREE_SHA, None, "two", &identity).unwrap();
        assert_ne!(one, two);
        assert_eq!(one.len(), 40);
        assert_eq!(one, commit_sha(EMPTY_TREE_SHA, None, "one", &identity).unwrap());
    }

    #[test]
    fn test_same_sha_ignores_case() {
        assert!(same_sha(EMPTY_TREE_SHA, &EMPTY_TREE_SHA.to_uppercase()));
        assert!(!same_sha(EMPTY_TREE_SHA, EMPTY_BLOB_SHA));
    }
}
