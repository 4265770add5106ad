//! Line-level blame.

use std::path::Path;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Where a line came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineOrigin {
    /// Commit that introduced the line.
    pub commit: String,
    /// Path of the file in that commit, when known.
    pub path: Option<String>,
    /// Line number (1-indexed) in that commit's version of the file.
    pub line: u32,
    /// Line text as introduced, when known.
    pub text: Option<String>,
}

/// Historical blame queries.
///
/// Implementations must support concurrent callers.
pub trait Blamer: Send + Sync {
    /// Origins of `lines` (1-indexed) of `path` as of `revision`.
    ///
    /// Returns one entry per requested line, `None` where no origin can be
    /// traced.
    fn blame(&self, path: &str, revision: &str, lines: &[u32]) -> Result<Vec<Option<LineOrigin>>>;
}

/// Blame backed by gix.
pub struct GitBlamer {
    repo: gix::ThreadSafeRepository,
}

impl GitBlamer {
    /// Open the repository at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let repo = gix::open(path.as_ref())
            .map_err(|e| Error::git(format!("Failed to open repository: {e}")))?;
        Ok(Self {
            repo: repo.into_sync(),
        })
    }
}

impl Blamer for GitBlamer {
    fn blame(&self, path: &str, revision: &str, lines: &[u32]) -> Result<Vec<Option<LineOrigin>>> {
        let repo = self.repo.to_thread_local();

        let suspect = repo
            .rev_parse_single(revision.as_bytes().as_bstr())
            .map_err(|e| Error::git(format!("Failed to parse revision {revision}: {e}")))?
            .detach();

        let outcome = repo
            .blame_file(
                path.as_bytes().as_bstr(),
                suspect,
                gix::repository::blame_file::Options {
                    rewrites: Some(gix::diff::Rewrites::default()),
                    ..Default::default()
                },
            )
            .map_err(|e| Error::git(format!("Failed to blame {path}: {e}")))?;

        let mut origins = vec![None; lines.len()];

        for (entry, entry_lines) in outcome.entries_with_lines() {
            let start = entry.start_in_blamed_file;
            let len = entry.len.get();
            let commit = entry.commit_id.to_string();
            let source_path = entry
                .source_file_name
                .as_ref()
                .map(|name| name.to_str_lossy().into_owned())
                .or_else(|| Some(path.to_string()));

            for (slot, &line) in origins.iter_mut().zip(lines) {
                // blame ranges are 0-indexed
                let Some(index) = line.checked_sub(1) else {
                    continue;
                };
                if index < start || index >= start + len {
                    continue;
                }
                let offset = index - start;
                *slot = Some(LineOrigin {
                    commit: commit.clone(),
                    path: source_path.clone(),
                    line: entry.start_in_source_file + offset + 1,
                    text: entry_lines.get(offset as usize).map(|text| {
                        text.to_str_lossy()
                            .trim_end_matches(['\n', '\r'])
                            .to_string()
                    }),
                });
            }
        }

        Ok(origins)
    }
}
