//! File contents at historical revisions.
//!
//! Reads blobs straight from the object store, no checkout needed.

use std::collections::HashMap;
use std::path::Path;

use bstr::ByteSlice;

use crate::core::{Error, Result};

/// Reads a file as it was at a given revision.
pub trait RevisionSource: Send + Sync {
    /// Contents of `path` at `revision`, `None` when the path does not exist there.
    fn read(&self, revision: &str, path: &str) -> Result<Option<Vec<u8>>>;
}

/// Reads file contents from git tree objects.
///
/// Holds a thread-safe handle; every read works on its own thread-local
/// repository so workers never share one.
pub struct GitRevisionSource {
    repo: gix::ThreadSafeRepository,
}

impl GitRevisionSource {
    /// Open the repository at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let repo = gix::open(path.as_ref())
            .map_err(|e| Error::git(format!("Failed to open repository: {e}")))?;
        Ok(Self {
            repo: repo.into_sync(),
        })
    }
}

impl RevisionSource for GitRevisionSource {
    fn read(&self, revision: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let repo = self.repo.to_thread_local();

        let commit_id = repo
            .rev_parse_single(revision.as_bytes().as_bstr())
            .map_err(|e| Error::git(format!("Failed to parse revision {revision}: {e}")))?
            .detach();

        let tree = repo
            .find_object(commit_id)
            .map_err(|e| Error::git(format!("Failed to find commit {revision}: {e}")))?
            .try_into_commit()
            .map_err(|e| Error::git(format!("Not a commit: {e}")))?
            .tree()
            .map_err(|e| Error::git(format!("Failed to get tree of {revision}: {e}")))?;

        let Some(entry) = tree
            .lookup_entry_by_path(path)
            .map_err(|e| Error::git(format!("Failed to lookup {path}: {e}")))?
        else {
            return Ok(None);
        };

        let blob = entry
            .object()
            .map_err(|e| Error::git(format!("Failed to get object: {e}")))?
            .try_into_blob()
            .map_err(|_| Error::git(format!("Not a blob: {path}")))?;

        Ok(Some(blob.data.to_vec()))
    }
}

/// In-memory file contents keyed by revision and path.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    files: HashMap<(String, String), Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the contents of `path` at `revision`.
    pub fn insert(
        &mut self,
        revision: impl Into<String>,
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) {
        self.files
            .insert((revision.into(), path.into()), content.into());
    }

    /// Builder-style [`MemorySource::insert`].
    pub fn with(
        mut self,
        revision: impl Into<String>,
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        self.insert(revision, path, content);
        self
    }
}

impl RevisionSource for MemorySource {
    fn read(&self, revision: &str, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .files
            .get(&(revision.to_string(), path.to_string()))
            .cloned())
    }
}
