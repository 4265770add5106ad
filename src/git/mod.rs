//! Git operations for history mining.

mod blame;
mod content;
mod history;
mod log;

use std::path::{Path, PathBuf};

use crate::core::{Error, Result};

pub use blame::{Blamer, GitBlamer, LineOrigin};
pub use content::{GitRevisionSource, MemorySource, RevisionSource};
pub use history::History;
pub use log::{read_history, ChangeType, Commit, FileDiff, LinePatch, LogOptions};

/// Git repository wrapper for mining operations.
pub struct GitRepo {
    /// Work tree root.
    root: PathBuf,
}

impl GitRepo {
    /// Open a git repository at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo =
            gix::open(path).map_err(|e| Error::git(format!("Failed to open repository: {e}")))?;
        let root = repo
            .workdir()
            .ok_or_else(|| Error::git("Not a work tree"))?
            .to_path_buf();

        Ok(Self { root })
    }

    /// Read the commit history, oldest first.
    pub fn history(&self, options: &LogOptions) -> Result<Vec<Commit>> {
        log::read_history(&self.root, options)
    }

    /// Blame backend on this repository's object store.
    pub fn blamer(&self) -> Result<GitBlamer> {
        GitBlamer::open(&self.root)
    }

    /// File contents at historical revisions.
    pub fn revision_source(&self) -> Result<GitRevisionSource> {
        GitRevisionSource::open(&self.root)
    }
}
