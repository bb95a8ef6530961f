//! # Object Propagation
//!
//! Copies blobs and whole trees from a source repository into a destination
//! repository, skipping anything already known to be there.
//!
//! [`PropagationCache`] remembers, for every `(kind, sha)`, the set of
//! `owner/repository` pairs the object has been uploaded to during this
//! session. Uploads go through a per-key gate so that concurrent workers
//! never upload the same object to the same repository twice.
//!
//! Locks are only held around single upload calls, never while waiting on
//! parallel work. A tree therefore propagates its children first, outside of
//! its own gate, and only takes the gate to create itself.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use log::debug;
use rayon::prelude::*;

use crate::address::{ObjectType, PathAddress};
use crate::error::{Error, Result};
use crate::gateway::{KeyedOnce, ProviderGateway};
use crate::hash;
use crate::object::{EntryKind, NewTree};

/// Kind of object tracked by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Blob,
    Tree,
}

impl From<ObjectType> for ObjectKind {
    fn from(value: ObjectType) -> Self {
        match value {
            ObjectType::Blob => ObjectKind::Blob,
            ObjectType::Tree => ObjectKind::Tree,
        }
    }
}

type GateKey = (ObjectKind, String, String);

/// Session-scoped record of which objects exist in which repositories.
#[derive(Debug, Default)]
pub struct PropagationCache {
    known_blobs: Mutex<HashMap<String, HashSet<String>>>,
    known_trees: Mutex<HashMap<String, HashSet<String>>>,
    gates: KeyedOnce<GateKey>,
}

impl PropagationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn known(&self, kind: ObjectKind) -> &Mutex<HashMap<String, HashSet<String>>> {
        match kind {
            ObjectKind::Blob => &self.known_blobs,
            ObjectKind::Tree => &self.known_trees,
        }
    }

    /// Whether object `sha` is known to exist in `owner/repository`.
    pub fn is_known(&self, kind: ObjectKind, sha: &str, owner: &str, repository: &str) -> Result<bool> {
        let known = self
            .known(kind)
            .lock()
            .map_err(|_| Error::poisoned("propagation cache"))?;
        Ok(known
            .get(&sha.to_ascii_lowercase())
            .is_some_and(|repos| repos.contains(&format!("{}/{}", owner, repository))))
    }

    /// Records that object `sha` exists in `owner/repository`.
    pub fn record(&self, kind: ObjectKind, sha: &str, owner: &str, repository: &str) -> Result<()> {
        let mut known = self
            .known(kind)
            .lock()
            .map_err(|_| Error::poisoned("propagation cache"))?;
        known
            .entry(sha.to_ascii_lowercase())
            .or_default()
            .insert(format!("{}/{}", owner, repository));
        Ok(())
    }

    /// Runs `create` unless object `sha` is already in `owner/repository`.
    ///
    /// At most one successful `create` happens per key, whatever the number
    /// of concurrent callers. Returns whether this call created the object.
    pub fn ensure<F>(
        &self,
        kind: ObjectKind,
        sha: &str,
        owner: &str,
        repository: &str,
        create: F,
    ) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        if self.is_known(kind, sha, owner, repository)? {
            return Ok(false);
        }

        let key = (kind, sha.to_ascii_lowercase(), format!("{}/{}", owner, repository));
        let mut created = false;
        self.gates.run(&key, || {
            if self.is_known(kind, sha, owner, repository)? {
                return Ok(());
            }
            create()?;
            created = true;
            self.record(kind, sha, owner, repository)
        })?;
        Ok(created)
    }
}

/// Moves objects between repositories through a gateway.
pub struct Propagator<'a> {
    gateway: &'a dyn ProviderGateway,
    cache: &'a PropagationCache,
}

impl<'a> Propagator<'a> {
    pub fn new(gateway: &'a dyn ProviderGateway, cache: &'a PropagationCache) -> Self {
        Self { gateway, cache }
    }

    /// Makes the object at enriched `source` available in the repository
    /// of `destination`.
    pub fn sync_leaf(&self, source: &PathAddress, destination: &PathAddress) -> Result<()> {
        let sha = source.sha().ok_or_else(|| Error::InvalidAddress {
            message: format!("{} has not been enriched", source),
        })?;

        match source.object_type() {
            ObjectType::Blob => self.sync_blob(
                source.owner(),
                source.repository(),
                sha,
                destination.owner(),
                destination.repository(),
            ),
            ObjectType::Tree => self.sync_tree(source, destination.owner(), destination.repository()),
        }
    }

    /// Copies blob `sha` unless the destination already has it.
    pub fn sync_blob(
        &self,
        source_owner: &str,
        source_repository: &str,
        sha: &str,
        destination_owner: &str,
        destination_repository: &str,
    ) -> Result<()> {
        debug!(
            "Sync - Determine if Blob '{}' requires to be created in '{}/{}'",
            crate::address::short_sha(sha),
            destination_owner,
            destination_repository
        );

        self.cache.ensure(
            ObjectKind::Blob,
            sha,
            destination_owner,
            destination_repository,
            || {
                self.gateway.fetch_blob(source_owner, source_repository, sha)?;
                let created = self
                    .gateway
                    .create_blob(destination_owner, destination_repository, sha)?;
                if !hash::same_sha(&created, sha) {
                    return Err(Error::HashMismatch {
                        object_type: "Blob".to_string(),
                        expected: sha.to_string(),
                        actual: created,
                    });
                }
                Ok(())
            },
        )?;
        Ok(())
    }

    /// Recursively copies the tree at enriched `source`.
    ///
    /// Submodule entries are listed in the copied tree but not followed.
    /// The created tree must hash to the source sha.
    pub fn sync_tree(&self, source: &PathAddress, destination_owner: &str, destination_repository: &str) -> Result<()> {
        let sha = source.sha().ok_or_else(|| Error::InvalidAddress {
            message: format!("{} has not been enriched", source),
        })?;

        debug!(
            "Sync - Determine if Tree '{}' requires to be created in '{}/{}'",
            crate::address::short_sha(sha),
            destination_owner,
            destination_repository
        );

        if self
            .cache
            .is_known(ObjectKind::Tree, sha, destination_owner, destination_repository)?
        {
            return Ok(());
        }

        let (located, listing) = self
            .gateway
            .tree_from(source, true)?
            .ok_or_else(|| Error::NotFound {
                object_type: source.object_type().to_string(),
                url: source.url(),
            })?;

        listing.entries.par_iter().try_for_each(|entry| match entry.kind {
            EntryKind::Blob => self.sync_blob(
                source.owner(),
                source.repository(),
                &entry.sha,
                destination_owner,
                destination_repository,
            ),
            EntryKind::Tree => {
                let child = located.combine(ObjectType::Tree, &entry.name, &entry.sha, &entry.mode)?;
                self.sync_tree(&child, destination_owner, destination_repository)
            }
            EntryKind::Commit => {
                debug!("Sync - Skip submodule '{}'", entry.name);
                Ok(())
            }
        })?;

        let mut tree = NewTree::new(source.path());
        for entry in &listing.entries {
            tree.add(&entry.mode, &entry.name, &entry.sha, entry.kind);
        }

        self.cache.ensure(
            ObjectKind::Tree,
            sha,
            destination_owner,
            destination_repository,
            || {
                let created = self
                    .gateway
                    .create_tree(&tree, destination_owner, destination_repository)?;
                if !hash::same_sha(&created, sha) {
                    return Err(Error::HashMismatch {
                        object_type: "Tree".to_string(),
                        expected: sha.to_string(),
                        actual: created,
                    });
                }
                Ok(())
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::gateway::memory::MemoryGateway;
    use crate::gateway::{ForkedRepository, PullRequestRequest, User};
    use crate::object::{Commit, Identity, TreeEntry, TreeListing};

    const BOGUS_SHA: &str = "0000000000000000000000000000000000000bad";

    /// Forge whose uploads may come back under a different sha.
    struct Tampering {
        inner: MemoryGateway,
        blobs: bool,
        trees: bool,
    }

    impl ProviderGateway for Tampering {
        fn web_url(&self) -> String {
            self.inner.web_url()
        }
        fn clone_url(&self, owner: &str, repository: &str) -> String {
            self.inner.clone_url(owner, repository)
        }
        fn current_user(&self) -> Result<User> {
            self.inner.current_user()
        }
        fn is_collaborator(&self, owner: &str, repository: &str) -> Result<bool> {
            self.inner.is_collaborator(owner, repository)
        }
        fn fork(&self, owner: &str, repository: &str) -> Result<ForkedRepository> {
            self.inner.fork(owner, repository)
        }
        fn download_blob(&self, source: &PathAddress, target: &mut dyn Write) -> Result<()> {
            self.inner.download_blob(source, target)
        }
        fn has_open_pull_request(&self, owner: &str, repository: &str, title: &str) -> Result<bool> {
            self.inner.has_open_pull_request(owner, repository, title)
        }
        fn root_commit_from(&self, address: &PathAddress) -> Result<Commit> {
            self.inner.root_commit_from(address)
        }
        fn tree_from(&self, address: &PathAddress, throws: bool) -> Result<Option<(PathAddress, TreeListing)>> {
            self.inner.tree_from(address, throws)
        }
        fn blob_from(&self, address: &PathAddress, throws: bool) -> Result<Option<(PathAddress, TreeEntry)>> {
            self.inner.blob_from(address, throws)
        }
        fn list_blobs_recursive(&self, owner: &str, repository: &str, branch: &str) -> Result<Vec<String>> {
            self.inner.list_blobs_recursive(owner, repository, branch)
        }
        fn fetch_blob(&self, owner: &str, repository: &str, sha: &str) -> Result<()> {
            self.inner.fetch_blob(owner, repository, sha)
        }
        fn create_blob(&self, owner: &str, repository: &str, sha: &str) -> Result<String> {
            let created = self.inner.create_blob(owner, repository, sha)?;
            Ok(if self.blobs { BOGUS_SHA.to_string() } else { created })
        }
        fn create_tree(&self, tree: &NewTree, owner: &str, repository: &str) -> Result<String> {
            let created = self.inner.create_tree(tree, owner, repository)?;
            Ok(if self.trees { BOGUS_SHA.to_string() } else { created })
        }
        fn create_commit(
            &self,
            owner: &str,
            repository: &str,
            tree_sha: &str,
            parent_sha: &str,
            message: &str,
            author: &Identity,
        ) -> Result<String> {
            self.inner
                .create_commit(owner, repository, tree_sha, parent_sha, message, author)
        }
        fn create_branch(&self, owner: &str, repository: &str, branch: &str, commit_sha: &str) -> Result<String> {
            self.inner.create_branch(owner, repository, branch, commit_sha)
        }
        fn create_pull_request(&self, request: &PullRequestRequest) -> Result<u64> {
            self.inner.create_pull_request(request)
        }
        fn apply_labels(&self, owner: &str, repository: &str, id: u64, labels: &[String]) -> Result<Vec<String>> {
            self.inner.apply_labels(owner, repository, id, labels)
        }
    }

    fn seeded_forge() -> MemoryGateway {
        let forge = MemoryGateway::new(User::new("bot", "Sync Bot", None));
        forge.create_repository("acme", "templates").unwrap();
        forge
            .commit_files("acme", "templates", "main", &[("docs/a.md", "a"), ("docs/b.md", "b")])
            .unwrap();
        forge.create_repository("acme", "svc").unwrap();
        forge
            .commit_files("acme", "svc", "main", &[("README.md", "svc")])
            .unwrap();
        forge
    }

    fn docs(gateway: &dyn ProviderGateway) -> PathAddress {
        let address = PathAddress::tree("acme", "templates", "main", Some("docs")).unwrap();
        gateway.tree_from(&address, true).unwrap().unwrap().0
    }

    #[test]
    fn test_blob_hash_mismatch_is_not_cached() {
        let sha = hash::blob_sha(b"a");
        let tampering = Tampering {
            inner: seeded_forge(),
            blobs: true,
            trees: false,
        };
        let cache = PropagationCache::new();

        let result = Propagator::new(&tampering, &cache).sync_blob("acme", "templates", &sha, "acme", "svc");
        match result {
            Err(Error::HashMismatch { expected, actual, .. }) => {
                assert_eq!(expected, sha);
                assert_eq!(actual, BOGUS_SHA);
            }
            other => panic!("expected a hash mismatch, got {:?}", other),
        }
        assert!(!cache.is_known(ObjectKind::Blob, &sha, "acme", "svc").unwrap());

        // A later honest upload goes through the same cache.
        let honest = tampering.inner;
        Propagator::new(&honest, &cache)
            .sync_blob("acme", "templates", &sha, "acme", "svc")
            .unwrap();
        assert!(cache.is_known(ObjectKind::Blob, &sha, "acme", "svc").unwrap());
    }

    #[test]
    fn test_tree_hash_mismatch_is_not_cached() {
        let tampering = Tampering {
            inner: seeded_forge(),
            blobs: false,
            trees: true,
        };
        let cache = PropagationCache::new();
        let source = docs(&tampering);
        let sha = source.sha().unwrap().to_string();

        let result = Propagator::new(&tampering, &cache).sync_tree(&source, "acme", "svc");
        assert!(matches!(result, Err(Error::HashMismatch { .. })), "{:?}", result);
        assert!(!cache.is_known(ObjectKind::Tree, &sha, "acme", "svc").unwrap());
        // The children went through before the tree itself failed.
        assert!(cache
            .is_known(ObjectKind::Blob, &hash::blob_sha(b"a"), "acme", "svc")
            .unwrap());
    }

    #[test]
    fn test_sync_tree_copies_children_once() {
        let forge = seeded_forge();
        let cache = PropagationCache::new();
        let source = docs(&forge);
        let propagator = Propagator::new(&forge, &cache);

        propagator.sync_tree(&source, "acme", "svc").unwrap();
        propagator.sync_tree(&source, "acme", "svc").unwrap();

        assert_eq!(forge.calls("create_blob"), 2);
        assert_eq!(forge.calls("create_tree"), 1);
        assert!(forge.has_object("acme", "svc", source.sha().unwrap()));
    }

    #[test]
    fn test_concurrent_blob_syncs_upload_once() {
        let forge = seeded_forge();
        let cache = PropagationCache::new();
        let sha = hash::blob_sha(b"a");

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    Propagator::new(&forge, &cache)
                        .sync_blob("acme", "templates", &sha, "acme", "svc")
                        .unwrap()
                });
            }
        });

        assert_eq!(forge.calls("create_blob"), 1);
        assert_eq!(forge.calls("fetch_blob"), 1);
        assert!(forge.has_object("acme", "svc", &sha));
    }

    #[test]
    fn test_record_and_lookup() {
        let cache = PropagationCache::new();
        assert!(!cache.is_known(ObjectKind::Blob, "abc", "acme", "svc").unwrap());
        cache.record(ObjectKind::Blob, "ABC", "acme", "svc").unwrap();
        assert!(cache.is_known(ObjectKind::Blob, "abc", "acme", "svc").unwrap());
        assert!(!cache.is_known(ObjectKind::Tree, "abc", "acme", "svc").unwrap());
        assert!(!cache.is_known(ObjectKind::Blob, "abc", "acme", "web").unwrap());
    }

    #[test]
    fn test_ensure_creates_once_per_repository() {
        let cache = PropagationCache::new();
        let uploads = AtomicU32::new(0);
        let upload = || {
            uploads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        assert!(cache.ensure(ObjectKind::Blob, "abc", "acme", "svc", upload).unwrap());
        assert!(!cache.ensure(ObjectKind::Blob, "abc", "acme", "svc", upload).unwrap());
        assert!(cache.ensure(ObjectKind::Blob, "abc", "acme", "web", upload).unwrap());
        assert_eq!(uploads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ensure_concurrent_callers_upload_once() {
        let cache = Arc::new(PropagationCache::new());
        let uploads = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let uploads = Arc::clone(&uploads);
                std::thread::spawn(move || {
                    cache
                        .ensure(ObjectKind::Tree, "abc", "acme", "svc", || {
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            uploads.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap()
                })
            })
            .collect();

        let created: u32 = handles
            .into_iter()
            .map(|h| h.join().unwrap() as u32)
            .sum();
        assert_eq!(created, 1);
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ensure_failure_is_not_recorded() {
        let cache = PropagationCache::new();
        let result = cache.ensure(ObjectKind::Blob, "abc", "acme", "svc", || {
            Err(Error::provider("create_blob", "boom"))
        });
        assert!(result.is_err());
        assert!(!cache.is_known(ObjectKind::Blob, "abc", "acme", "svc").unwrap());
    }
}
