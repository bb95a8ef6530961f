//! Local staging area for blobs travelling between repositories.
//!
//! Blobs are downloaded from the source repository into a temporary
//! directory, then uploaded from there into each destination. The directory
//! is created on first use and removed when the staging area is dropped,
//! unwinding included.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use log::debug;
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::gateway::KeyedOnce;
use crate::hash;

/// Temporary blob storage shared by all transfers of one gateway.
#[derive(Debug)]
pub struct BlobStaging {
    dir: Mutex<Option<TempDir>>,
    fetched: KeyedOnce<String>,
    verify_hashes: bool,
}

impl Default for BlobStaging {
    fn default() -> Self {
        Self::new(false)
    }
}

impl BlobStaging {
    /// Creates a staging area; nothing touches the disk until the first blob.
    ///
    /// With `verify_hashes`, every staged blob is re-hashed before upload.
    pub fn new(verify_hashes: bool) -> Self {
        Self {
            dir: Mutex::new(None),
            fetched: KeyedOnce::default(),
            verify_hashes,
        }
    }

    pub fn verifies_hashes(&self) -> bool {
        self.verify_hashes
    }

    /// Whether the temporary directory has been created.
    pub fn is_created(&self) -> bool {
        self.dir.lock().map(|dir| dir.is_some()).unwrap_or(false)
    }

    fn root(&self) -> Result<PathBuf> {
        let mut dir = self.dir.lock().map_err(|_| Error::poisoned("blob staging"))?;
        if let Some(existing) = dir.as_ref() {
            return Ok(existing.path().to_path_buf());
        }

        let created = tempfile::Builder::new().prefix("repo-sync-").tempdir()?;
        debug!("Create temp blob storage '{}'", created.path().display());
        let path = created.path().to_path_buf();
        *dir = Some(created);
        Ok(path)
    }

    /// Where blob `sha` is (or will be) stored.
    pub fn path_for(&self, sha: &str) -> Result<PathBuf> {
        Ok(self.root()?.join(sha.to_ascii_lowercase()))
    }

    pub fn is_staged(&self, sha: &str) -> bool {
        self.fetched.is_done(&sha.to_ascii_lowercase())
    }

    /// Stages blob `sha` by running `fetch` at most once.
    ///
    /// `fetch` writes the raw blob content. The file only appears under its
    /// final name once `fetch` completed.
    pub fn stage_with<F>(&self, sha: &str, fetch: F) -> Result<PathBuf>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        let key = sha.to_ascii_lowercase();
        let path = self.path_for(&key)?;

        self.fetched.run(&key, || {
            let root = self.root()?;
            let mut partial = tempfile::NamedTempFile::new_in(&root)?;
            fetch(partial.as_file_mut())?;
            partial.as_file_mut().flush()?;
            partial.persist(&path).map_err(|e| Error::Io(e.error))?;
            debug!("Staged blob {}", crate::address::short_sha(&key));
            Ok(())
        })?;

        Ok(path)
    }

    /// Content of a staged blob.
    pub fn read(&self, sha: &str) -> Result<Vec<u8>> {
        if !self.is_staged(sha) {
            return Err(Error::NotFound {
                object_type: "Blob".to_string(),
                url: format!("staging/{}", sha),
            });
        }
        Ok(fs::read(self.path_for(sha)?)?)
    }

    /// Re-hashes staged blob `sha` when verification is enabled.
    pub fn verify(&self, sha: &str) -> Result<()> {
        if !self.verify_hashes {
            return Ok(());
        }

        let actual = hash::blob_sha_from_file(&self.path_for(sha)?)?;
        if !hash::same_sha(&actual, sha) {
            return Err(Error::HashMismatch {
                object_type: "Blob".to_string(),
                expected: sha.to_string(),
                actual,
            });
        }
        Ok(())
    }
}

impl Drop for BlobStaging {
    fn drop(&mut self) {
        if let Ok(dir) = self.dir.get_mut() {
            if let Some(dir) = dir.as_ref() {
                debug!("Delete temp blob storage '{}'", dir.path().display());
            }
        }
    }
}
