//! Indexed commit history.

use std::collections::HashMap;

use super::log::Commit;
use crate::core::{Error, Result};

/// Commits in chronological order with lookup by id.
#[derive(Debug, Clone)]
pub struct History {
    commits: Vec<Commit>,
    index: HashMap<String, usize>,
}

impl History {
    /// Index a chronological list of commits.
    ///
    /// An empty history is fatal: nothing downstream can be computed from it.
    pub fn new(commits: Vec<Commit>) -> Result<Self> {
        if commits.is_empty() {
            return Err(Error::EmptyHistory(
                "no commits in the analysis window".to_string(),
            ));
        }

        let index = commits
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();

        Ok(Self { commits, index })
    }

    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Look up a commit by full id.
    pub fn get(&self, id: &str) -> Option<&Commit> {
        self.index.get(id).map(|&i| &self.commits[i])
    }

    /// Look up a commit by full id or unambiguous prefix.
    pub fn resolve(&self, id: &str) -> Option<&Commit> {
        if let Some(commit) = self.get(id) {
            return Some(commit);
        }
        let mut matches = self.commits.iter().filter(|c| c.id.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some(commit), None) if !id.is_empty() => Some(commit),
            _ => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Whether `commit` is a merge whose merged-in parents are all part of
    /// this history.
    pub fn branch_is_mined(&self, commit: &Commit) -> bool {
        commit.is_merge() && commit.parents[1..].iter().all(|p| self.contains(p))
    }
}
