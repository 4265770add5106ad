//! Blame over recorded diffs.
//!
//! Follows one line backward along first parents: a commit whose diff added
//! the line at its current number is the origin, otherwise the line number
//! is mapped through the diff to the parent's version and the walk goes on.
//!
//! A merge only records its diff against the first parent, so a line it
//! adds came from a merged branch. When that branch is part of the history
//! the nearest branch commit that added the same text is the origin.

use std::collections::{HashSet, VecDeque};

use crate::core::Result;
use crate::git::{Blamer, ChangeType, Commit, FileDiff, History, LineOrigin};

/// Line tracking over the diffs of a [`History`].
pub struct HistoryBlamer<'a> {
    history: &'a History,
}

impl<'a> HistoryBlamer<'a> {
    pub fn new(history: &'a History) -> Self {
        Self { history }
    }

    fn trace(&self, path: &str, revision: &str, line: u32) -> Option<LineOrigin> {
        let mut commit = self.history.get(revision)?;
        let mut path = path.to_string();
        let mut line = line;

        // every step moves to a parent, so one pass over the history bounds the walk
        for _ in 0..self.history.len() {
            if let Some(diff) = file_diff(commit, &path) {
                if let Some(added) = diff.added_lines.iter().find(|p| p.new_line == Some(line)) {
                    if self.history.branch_is_mined(commit) {
                        if let Some(origin) = self.merged_origin(commit, &path, &added.text) {
                            return Some(origin);
                        }
                    }
                    return Some(LineOrigin {
                        commit: commit.id.clone(),
                        path: Some(path),
                        line,
                        text: Some(added.text.clone()),
                    });
                }
                if diff.change_type == ChangeType::Added {
                    return None;
                }
                line = map_to_parent(diff, line);
                if let Some(old) = &diff.old_filename {
                    path = old.clone();
                }
            }
            commit = self.history.get(commit.first_parent()?)?;
        }

        None
    }

    /// Nearest commit on the branches merged by `merge` whose diff added
    /// `text` to `path`.
    fn merged_origin(&self, merge: &Commit, path: &str, text: &str) -> Option<LineOrigin> {
        let mut queue: VecDeque<(&Commit, String)> = merge.parents[1..]
            .iter()
            .filter_map(|id| self.history.get(id))
            .map(|commit| (commit, path.to_string()))
            .collect();
        let mut seen: HashSet<&str> = HashSet::new();

        while let Some((commit, mut path)) = queue.pop_front() {
            if !seen.insert(commit.id.as_str()) {
                continue;
            }

            if let Some(diff) = file_diff(commit, &path) {
                let added = diff
                    .added_lines
                    .iter()
                    .find_map(|p| if p.text == text { p.new_line } else { None });
                // a nested merge passes the line on from its own branch
                if let Some(line) = added.filter(|_| !self.history.branch_is_mined(commit)) {
                    return Some(LineOrigin {
                        commit: commit.id.clone(),
                        path: Some(path),
                        line,
                        text: Some(text.to_string()),
                    });
                }
                if diff.change_type == ChangeType::Added {
                    continue;
                }
                if let Some(old) = &diff.old_filename {
                    path = old.clone();
                }
            }

            for parent in commit.parents.iter().filter_map(|id| self.history.get(id)) {
                queue.push_back((parent, path.clone()));
            }
        }

        None
    }
}

impl Blamer for HistoryBlamer<'_> {
    fn blame(&self, path: &str, revision: &str, lines: &[u32]) -> Result<Vec<Option<LineOrigin>>> {
        Ok(lines
            .iter()
            .map(|&line| self.trace(path, revision, line))
            .collect())
    }
}

fn file_diff<'c>(commit: &'c Commit, path: &str) -> Option<&'c FileDiff> {
    commit
        .files
        .iter()
        .find(|f| f.filename == path && f.change_type != ChangeType::Deleted)
}

/// Map an unchanged line of the new version to its number in the old one.
fn map_to_parent(diff: &FileDiff, new_line: u32) -> u32 {
    let added_before = diff
        .added_lines
        .iter()
        .filter(|p| p.new_line.is_some_and(|n| n < new_line))
        .count() as u32;
    let unchanged_before = new_line.saturating_sub(1).saturating_sub(added_before);

    let mut removed: Vec<u32> = diff.removed_lines.iter().filter_map(|p| p.old_line).collect();
    removed.sort_unstable();

    let mut old_line = unchanged_before + 1;
    for r in removed {
        if r <= old_line {
            old_line += 1;
        }
    }
    old_line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::LinePatch;

    fn commit(id: &str, parent: Option<&str>, files: Vec<FileDiff>) -> Commit {
        Commit {
            id: id.to_string(),
            author: "dev".to_string(),
            author_email: String::new(),
            timestamp: 0,
            message: String::new(),
            parents: parent.into_iter().map(String::from).collect(),
            files,
        }
    }

    fn diff(name: &str, kind: ChangeType, added: &[(u32, &str)], removed: &[(u32, &str)]) -> FileDiff {
        let mut diff = FileDiff::new(name, kind);
        diff.added_lines = added.iter().map(|(n, t)| LinePatch::added(*n, *t)).collect();
        diff.removed_lines = removed.iter().map(|(n, t)| LinePatch::removed(*n, *t)).collect();
        diff
    }

    #[test]
    fn test_map_to_parent() {
        // old: a b c d   new: a X c d Y
        let d = diff(
            "f.c",
            ChangeType::Modified,
            &[(2, "X"), (5, "Y")],
            &[(2, "b")],
        );
        assert_eq!(map_to_parent(&d, 1), 1);
        assert_eq!(map_to_parent(&d, 3), 3);
        assert_eq!(map_to_parent(&d, 4), 4);

        // old: a b c   new: X Y a c
        let d = diff("f.c", ChangeType::Modified, &[(1, "X"), (2, "Y")], &[(2, "b")]);
        assert_eq!(map_to_parent(&d, 3), 1);
        assert_eq!(map_to_parent(&d, 4), 3);
    }

    #[test]
    fn test_trace_through_shifting_edits() {
        let history = History::new(vec![
            commit("a", None, vec![diff("F.java", ChangeType::Added, &[(1, "x();"), (2, "y();")], &[])]),
            commit("b", Some("a"), vec![diff("F.java", ChangeType::Modified, &[(1, "w();")], &[])]),
            commit("c", Some("b"), vec![diff("Other.java", ChangeType::Added, &[(1, "o();")], &[])]),
        ])
        .unwrap();

        let blamer = HistoryBlamer::new(&history);
        let origins = blamer.blame("F.java", "c", &[1, 2, 3, 4]).unwrap();

        let w = origins[0].as_ref().unwrap();
        assert_eq!((w.commit.as_str(), w.line), ("b", 1));
        let y = origins[2].as_ref().unwrap();
        assert_eq!((y.commit.as_str(), y.line), ("a", 2));
        assert_eq!(y.text.as_deref(), Some("y();"));
        assert!(origins[3].is_none());
    }

    #[test]
    fn test_trace_follows_renames() {
        let mut renamed = diff("New.java", ChangeType::Renamed, &[], &[]);
        renamed.old_filename = Some("Old.java".to_string());
        let history = History::new(vec![
            commit("a", None, vec![diff("Old.java", ChangeType::Added, &[(1, "k();")], &[])]),
            commit("b", Some("a"), vec![renamed]),
        ])
        .unwrap();

        let origin = HistoryBlamer::new(&history)
            .blame("New.java", "b", &[1])
            .unwrap()
            .remove(0)
            .unwrap();
        assert_eq!(origin.commit, "a");
        assert_eq!(origin.path.as_deref(), Some("Old.java"));
    }

    #[test]
    fn test_merged_lines_trace_to_branch_commit() {
        let history = History::new(vec![
            commit("base", None, vec![diff("F.java", ChangeType::Added, &[(1, "a();"), (2, "b();")], &[])]),
            commit("side", Some("base"), vec![diff("F.java", ChangeType::Modified, &[(2, "foo();")], &[])]),
            commit("main", Some("base"), vec![diff("G.java", ChangeType::Added, &[(1, "g();")], &[])]),
            Commit {
                parents: vec!["main".to_string(), "side".to_string()],
                ..commit(
                    "merge",
                    None,
                    vec![diff("F.java", ChangeType::Modified, &[(2, "foo();"), (4, "resolved();")], &[])],
                )
            },
        ])
        .unwrap();

        let origins = HistoryBlamer::new(&history)
            .blame("F.java", "merge", &[2, 3, 4])
            .unwrap();

        let foo = origins[0].as_ref().unwrap();
        assert_eq!((foo.commit.as_str(), foo.line), ("side", 2));
        assert_eq!(foo.text.as_deref(), Some("foo();"));
        let b = origins[1].as_ref().unwrap();
        assert_eq!((b.commit.as_str(), b.line), ("base", 2));
        // written while resolving the merge: no branch commit has it
        assert_eq!(origins[2].as_ref().unwrap().commit, "merge");
    }

    #[test]
    fn test_merge_of_unmined_branch_is_the_origin() {
        let history = History::new(vec![
            commit("base", None, vec![diff("F.java", ChangeType::Added, &[(1, "a();")], &[])]),
            Commit {
                parents: vec!["base".to_string(), "outside-window".to_string()],
                ..commit("merge", None, vec![diff("F.java", ChangeType::Modified, &[(2, "foo();")], &[])])
            },
        ])
        .unwrap();

        let origin = HistoryBlamer::new(&history)
            .blame("F.java", "merge", &[2])
            .unwrap()
            .remove(0)
            .unwrap();
        assert_eq!(origin.commit, "merge");
    }

    #[test]
    fn test_truncated_history_has_no_origin() {
        let history = History::new(vec![commit(
            "b",
            Some("outside-window"),
            vec![diff("F.java", ChangeType::Modified, &[(2, "n();")], &[])],
        )])
        .unwrap();

        let origins = HistoryBlamer::new(&history).blame("F.java", "b", &[1, 2]).unwrap();
        assert!(origins[0].is_none());
        assert_eq!(origins[1].as_ref().unwrap().commit, "b");
    }

    #[test]
    fn test_unknown_revision_has_no_origin() {
        let history = History::new(vec![commit("a", None, Vec::new())]).unwrap();
        let origins = HistoryBlamer::new(&history).blame("F.java", "zzz", &[1]).unwrap();
        assert_eq!(origins, vec![None]);
    }
}
