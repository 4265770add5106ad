//! Defect-inducing commit resolution.
//!
//! For every line a bug-fixing commit removes, blame the fix's parent to
//! find the commit that introduced that exact content, then apply the credit
//! policy. Lines that cannot be traced are reported, never fatal: each
//! fixing commit keeps whatever links it could resolve.

mod history;

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::SzzConfig;
use crate::core::{Error, PartitionFailure, Result, WorkerPool};
use crate::git::{Blamer, Commit, History, LineOrigin, LinePatch};
use crate::stages::extract::code_lines;
use crate::stages::filter::SourceFilter;
use crate::stages::link::BugFixingCommit;

pub use history::HistoryBlamer;

/// A fixing commit traced to a commit that introduced one of its removed lines.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BugInducingLink {
    pub fixing_commit: String,
    pub inducing_commit: String,
    /// Path of the file in the inducing commit.
    pub file: String,
    /// The removed line, trimmed.
    pub line: String,
    /// Line number in the inducing commit's version of the file.
    pub line_number: u32,
}

/// Why a removed line produced no link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No introducing commit within the available history.
    NoOrigin,
    /// The origin is a merge commit, which is never credited.
    MergeOrigin,
    /// The origin's text differs from the removed line.
    ContentMismatch,
    /// The origin was authored after the bug was reported.
    AfterReport,
    /// Blame failed for the whole file.
    BlameFailed,
}

/// A removed line with no traceable origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedLine {
    pub fixing_commit: String,
    /// Path in the fixing commit's parent.
    pub file: String,
    /// Line number in the fixing commit's parent.
    pub line_number: u32,
    pub reason: UnresolvedReason,
}

/// Links and unresolved lines of one fixing commit.
#[derive(Debug, Clone, Default)]
pub struct FixResolution {
    pub links: Vec<BugInducingLink>,
    pub unresolved: Vec<UnresolvedLine>,
}

/// Resolver output over all fixing commits.
#[derive(Debug, Clone, Default)]
pub struct SzzOutcome {
    /// Links in fixing-commit order.
    pub links: Vec<BugInducingLink>,
    pub unresolved: Vec<UnresolvedLine>,
    /// Fixing commits dropped under the skip policy.
    pub failures: Vec<PartitionFailure>,
}

/// Credit policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct SzzOptions {
    pub skip_merges: bool,
    pub ignore_whitespace: bool,
    pub filter_after_report: bool,
    pub code_lines_only: bool,
}

impl Default for SzzOptions {
    fn default() -> Self {
        Self::from(&SzzConfig::default())
    }
}

impl From<&SzzConfig> for SzzOptions {
    fn from(config: &SzzConfig) -> Self {
        Self {
            skip_merges: config.skip_merges,
            ignore_whitespace: config.ignore_whitespace,
            filter_after_report: config.filter_after_report,
            code_lines_only: config.code_lines_only,
        }
    }
}

/// Traces fixing commits back to their inducing commits.
pub struct Resolver<'a> {
    history: &'a History,
    blamer: &'a dyn Blamer,
    filter: &'a SourceFilter,
    options: SzzOptions,
}

impl<'a> Resolver<'a> {
    pub fn new(
        history: &'a History,
        blamer: &'a dyn Blamer,
        filter: &'a SourceFilter,
        options: SzzOptions,
    ) -> Self {
        Self {
            history,
            blamer,
            filter,
            options,
        }
    }

    /// Resolve every fixing commit on the worker pool.
    pub fn resolve(&self, pool: &WorkerPool, fixes: &[BugFixingCommit]) -> Result<SzzOutcome> {
        let start = Instant::now();
        let outcome = pool.map("szz", fixes, |f| f.commit_id.clone(), |f| self.resolve_fix(f))?;

        let mut result = SzzOutcome {
            failures: outcome.failures,
            ..SzzOutcome::default()
        };
        for resolution in outcome.results {
            result.links.extend(resolution.links);
            result.unresolved.extend(resolution.unresolved);
        }

        tracing::info!(
            "Resolved {} fixing commits: {} links, {} unresolved lines, {} failed in {:?}",
            fixes.len(),
            result.links.len(),
            result.unresolved.len(),
            result.failures.len(),
            start.elapsed()
        );
        Ok(result)
    }

    /// Resolve the removed lines of one fixing commit.
    pub fn resolve_fix(&self, fix: &BugFixingCommit) -> Result<FixResolution> {
        let commit = self.history.resolve(&fix.commit_id).ok_or_else(|| {
            Error::malformed(
                "szz",
                format!("fixing commit {} is not in the history", fix.commit_id),
            )
        })?;

        let mut resolution = FixResolution::default();
        let parent = commit.first_parent();

        for diff in commit.files.iter().filter(|d| self.filter.accepts_diff(d)) {
            let Some(old_path) = diff.previous_path() else {
                continue;
            };

            let lines: Vec<LinePatch> = if self.options.code_lines_only {
                code_lines(&diff.removed_lines)
                    .into_iter()
                    .map(|r| r.line)
                    .collect()
            } else {
                diff.removed_lines
                    .iter()
                    .filter(|p| !p.text.trim().is_empty())
                    .cloned()
                    .collect()
            };
            let lines: Vec<(u32, LinePatch)> = lines
                .into_iter()
                .filter_map(|p| p.old_line.map(|n| (n, p)))
                .collect();
            if lines.is_empty() {
                continue;
            }

            let unresolved = |line_number: u32, reason: UnresolvedReason| UnresolvedLine {
                fixing_commit: commit.id.clone(),
                file: old_path.to_string(),
                line_number,
                reason,
            };

            let Some(parent) = parent else {
                resolution
                    .unresolved
                    .extend(lines.iter().map(|(n, _)| unresolved(*n, UnresolvedReason::NoOrigin)));
                continue;
            };

            let numbers: Vec<u32> = lines.iter().map(|(n, _)| *n).collect();
            let origins = match self.blamer.blame(old_path, parent, &numbers) {
                Ok(origins) => origins,
                Err(e) => {
                    tracing::warn!("Blame failed for {old_path} at {parent}: {e}");
                    resolution.unresolved.extend(
                        numbers
                            .iter()
                            .map(|n| unresolved(*n, UnresolvedReason::BlameFailed)),
                    );
                    continue;
                }
            };

            for ((line_number, line), origin) in lines.iter().zip(origins) {
                let credited = match origin {
                    Some(origin) => self.credit(origin, old_path, line, fix),
                    None => Err(UnresolvedReason::NoOrigin),
                };
                match credited {
                    Ok(origin) => resolution.links.push(BugInducingLink {
                        fixing_commit: commit.id.clone(),
                        inducing_commit: origin.commit,
                        file: origin.path.unwrap_or_else(|| old_path.to_string()),
                        line: line.text.trim().to_string(),
                        line_number: origin.line,
                    }),
                    Err(reason) => {
                        tracing::debug!(
                            "{}: {old_path}:{line_number} unresolved ({reason:?})",
                            commit.id
                        );
                        resolution.unresolved.push(unresolved(*line_number, reason));
                    }
                }
            }
        }

        Ok(resolution)
    }

    /// Apply the credit policy to a blamed origin.
    fn credit(
        &self,
        mut origin: LineOrigin,
        blamed_path: &str,
        line: &LinePatch,
        fix: &BugFixingCommit,
    ) -> std::result::Result<LineOrigin, UnresolvedReason> {
        // each step moves to an older commit
        for _ in 0..=self.history.len() {
            if let Some(text) = &origin.text {
                if !self.same_content(text, &line.text) {
                    return Err(UnresolvedReason::ContentMismatch);
                }
            }

            let Some(commit) = self.history.get(&origin.commit) else {
                // outside the mined window: nothing more is known about it
                return Ok(origin);
            };

            if self.options.skip_merges && commit.is_merge() {
                return Err(UnresolvedReason::MergeOrigin);
            }

            if self.options.ignore_whitespace {
                let path = origin.path.as_deref().unwrap_or(blamed_path);
                if let Some(older) = self.whitespace_predecessor(commit, path, &origin) {
                    match older {
                        Some(older) => {
                            origin = older;
                            continue;
                        }
                        None => return Err(UnresolvedReason::NoOrigin),
                    }
                }
            }

            if self.options.filter_after_report {
                if let (Some(report), Some(authored)) = (fix.report_date, commit.datetime()) {
                    if authored > report {
                        return Err(UnresolvedReason::AfterReport);
                    }
                }
            }

            return Ok(origin);
        }

        Err(UnresolvedReason::NoOrigin)
    }

    /// When `commit` only re-indented the origin line, blame the line it replaced.
    ///
    /// Returns `None` for a real change, `Some(None)` when the replaced line
    /// has no traceable origin.
    fn whitespace_predecessor(
        &self,
        commit: &Commit,
        path: &str,
        origin: &LineOrigin,
    ) -> Option<Option<LineOrigin>> {
        let text = origin.text.as_deref()?;
        let parent = commit.first_parent()?;
        let diff = commit.files.iter().find(|f| f.filename == path)?;
        let old_path = diff.previous_path()?;

        let normalized = normalize_whitespace(text);
        let replaced = diff
            .removed_lines
            .iter()
            .filter(|p| p.text != text && normalize_whitespace(&p.text) == normalized)
            .find_map(|p| p.old_line)?;

        match self.blamer.blame(old_path, parent, &[replaced]) {
            Ok(mut origins) => Some(origins.pop().flatten()),
            Err(e) => {
                tracing::debug!("Blame failed while skipping whitespace change in {path}: {e}");
                Some(None)
            }
        }
    }

    fn same_content(&self, origin: &str, removed: &str) -> bool {
        if self.options.ignore_whitespace {
            normalize_whitespace(origin) == normalize_whitespace(removed)
        } else {
            origin.trim_end() == removed.trim_end()
        }
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FailurePolicy;
    use crate::git::{ChangeType, FileDiff};
    use chrono::{TimeZone, Utc};

    fn commit(id: &str, parents: &[&str], timestamp: i64, files: Vec<FileDiff>) -> Commit {
        Commit {
            id: id.to_string(),
            author: "dev".to_string(),
            author_email: String::new(),
            timestamp,
            message: String::new(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            files,
        }
    }

    fn diff(name: &str, kind: ChangeType, added: &[(u32, &str)], removed: &[(u32, &str)]) -> FileDiff {
        let mut diff = FileDiff::new(name, kind);
        diff.added_lines = added.iter().map(|(n, t)| LinePatch::added(*n, *t)).collect();
        diff.removed_lines = removed.iter().map(|(n, t)| LinePatch::removed(*n, *t)).collect();
        diff
    }

    fn fix(id: &str) -> BugFixingCommit {
        BugFixingCommit {
            commit_id: id.to_string(),
            issues: vec!["LANG-1".to_string()],
            report_date: None,
        }
    }

    fn resolve(history: &History, options: SzzOptions, fixing: &str) -> FixResolution {
        let blamer = HistoryBlamer::new(history);
        let filter = SourceFilter::default();
        Resolver::new(history, &blamer, &filter, options)
            .resolve_fix(&fix(fixing))
            .unwrap()
    }

    #[test]
    fn test_deleted_line_traced_to_introducing_commit() {
        let history = History::new(vec![
            commit("A", &[], 1, vec![diff("X.java", ChangeType::Added, &[(1, "foo();")], &[])]),
            commit("B", &["A"], 2, vec![diff("X.java", ChangeType::Modified, &[], &[(1, "foo();")])]),
        ])
        .unwrap();

        let resolution = resolve(&history, SzzOptions::default(), "B");
        assert_eq!(
            resolution.links,
            vec![BugInducingLink {
                fixing_commit: "B".to_string(),
                inducing_commit: "A".to_string(),
                file: "X.java".to_string(),
                line: "foo();".to_string(),
                line_number: 1,
            }]
        );
        assert!(resolution.unresolved.is_empty());
    }

    #[test]
    fn test_partial_results_when_one_line_is_unresolvable() {
        // A's parent lies outside the mined window, so line 3 has no origin.
        let history = History::new(vec![
            commit(
                "A",
                &["before-window"],
                1,
                vec![diff("X.java", ChangeType::Modified, &[(1, "a();"), (2, "b();")], &[])],
            ),
            commit(
                "B",
                &["A"],
                2,
                vec![diff(
                    "X.java",
                    ChangeType::Modified,
                    &[],
                    &[(1, "a();"), (2, "b();"), (3, "c();")],
                )],
            ),
        ])
        .unwrap();

        let resolution = resolve(&history, SzzOptions::default(), "B");
        let lines: Vec<&str> = resolution.links.iter().map(|l| l.line.as_str()).collect();
        assert_eq!(lines, vec!["a();", "b();"]);
        assert_eq!(
            resolution.unresolved,
            vec![UnresolvedLine {
                fixing_commit: "B".to_string(),
                file: "X.java".to_string(),
                line_number: 3,
                reason: UnresolvedReason::NoOrigin,
            }]
        );
    }

    #[test]
    fn test_comment_and_test_lines_are_not_traced() {
        let history = History::new(vec![
            commit(
                "A",
                &[],
                1,
                vec![
                    diff("X.java", ChangeType::Added, &[(1, "// note"), (2, "x();")], &[]),
                    diff("src/test/XTest.java", ChangeType::Added, &[(1, "t();")], &[]),
                ],
            ),
            commit(
                "B",
                &["A"],
                2,
                vec![
                    diff("X.java", ChangeType::Modified, &[], &[(1, "// note"), (2, "x();")]),
                    diff("src/test/XTest.java", ChangeType::Modified, &[], &[(1, "t();")]),
                ],
            ),
        ])
        .unwrap();

        let resolution = resolve(&history, SzzOptions::default(), "B");
        assert_eq!(resolution.links.len(), 1);
        assert_eq!(resolution.links[0].line, "x();");
        assert_eq!(resolution.links[0].line_number, 2);
    }

    #[test]
    fn test_merged_branch_commit_is_credited() {
        let history = History::new(vec![
            commit("A", &[], 1, vec![diff("X.java", ChangeType::Added, &[(1, "a();")], &[])]),
            commit("S", &["A"], 2, vec![diff("X.java", ChangeType::Modified, &[(2, "m();")], &[])]),
            commit("N", &["A"], 3, vec![diff("Y.java", ChangeType::Added, &[(1, "y();")], &[])]),
            commit("M", &["N", "S"], 4, vec![diff("X.java", ChangeType::Modified, &[(2, "m();")], &[])]),
            commit("B", &["M"], 5, vec![diff("X.java", ChangeType::Modified, &[], &[(2, "m();")])]),
        ])
        .unwrap();

        let resolution = resolve(&history, SzzOptions::default(), "B");
        assert!(resolution.unresolved.is_empty());
        assert_eq!(resolution.links.len(), 1);
        assert_eq!(resolution.links[0].inducing_commit, "S");
        assert_eq!(resolution.links[0].line_number, 2);
    }

    #[test]
    fn test_merge_of_unmined_branch_is_not_credited() {
        let history = History::new(vec![
            commit("A", &[], 1, vec![diff("X.java", ChangeType::Added, &[(1, "a();")], &[])]),
            commit("M", &["A", "side"], 2, vec![diff("X.java", ChangeType::Modified, &[(2, "m();")], &[])]),
            commit("B", &["M"], 3, vec![diff("X.java", ChangeType::Modified, &[], &[(2, "m();")])]),
        ])
        .unwrap();

        let resolution = resolve(&history, SzzOptions::default(), "B");
        assert!(resolution.links.is_empty());
        assert_eq!(resolution.unresolved[0].reason, UnresolvedReason::MergeOrigin);

        let lenient = SzzOptions {
            skip_merges: false,
            ..SzzOptions::default()
        };
        assert_eq!(resolve(&history, lenient, "B").links[0].inducing_commit, "M");
    }

    #[test]
    fn test_whitespace_only_changes_are_skipped_when_enabled() {
        let history = History::new(vec![
            commit("A", &[], 1, vec![diff("X.java", ChangeType::Added, &[(1, "if (a) {"), (2, "go();")], &[])]),
            commit(
                "W",
                &["A"],
                2,
                vec![diff("X.java", ChangeType::Modified, &[(2, "    go();")], &[(2, "go();")])],
            ),
            commit("B", &["W"], 3, vec![diff("X.java", ChangeType::Modified, &[], &[(2, "    go();")])]),
        ])
        .unwrap();

        let strict = resolve(&history, SzzOptions::default(), "B");
        assert_eq!(strict.links[0].inducing_commit, "W");

        let skipping = SzzOptions {
            ignore_whitespace: true,
            ..SzzOptions::default()
        };
        let resolution = resolve(&history, skipping, "B");
        assert_eq!(resolution.links[0].inducing_commit, "A");
        assert_eq!(resolution.links[0].line, "go();");
        assert_eq!(resolution.links[0].line_number, 2);
    }

    #[test]
    fn test_origins_after_report_are_dropped_when_enabled() {
        let report = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let history = History::new(vec![
            commit("A", &[], report.timestamp() - 10, vec![diff("X.java", ChangeType::Added, &[(1, "old();")], &[])]),
            commit("C", &["A"], report.timestamp() + 10, vec![diff("X.java", ChangeType::Modified, &[(2, "new();")], &[])]),
            commit(
                "B",
                &["C"],
                report.timestamp() + 20,
                vec![diff("X.java", ChangeType::Modified, &[], &[(1, "old();"), (2, "new();")])],
            ),
        ])
        .unwrap();

        let blamer = HistoryBlamer::new(&history);
        let filter = SourceFilter::default();
        let options = SzzOptions {
            filter_after_report: true,
            ..SzzOptions::default()
        };
        let mut fixing = fix("B");
        fixing.report_date = Some(report);

        let resolution = Resolver::new(&history, &blamer, &filter, options)
            .resolve_fix(&fixing)
            .unwrap();
        assert_eq!(resolution.links.len(), 1);
        assert_eq!(resolution.links[0].inducing_commit, "A");
        assert_eq!(resolution.unresolved[0].reason, UnresolvedReason::AfterReport);
    }

    struct FailingBlamer;

    impl Blamer for FailingBlamer {
        fn blame(&self, path: &str, _: &str, _: &[u32]) -> Result<Vec<Option<LineOrigin>>> {
            Err(Error::git(format!("cannot blame {path}")))
        }
    }

    #[test]
    fn test_blame_failure_marks_lines_unresolved() {
        let history = History::new(vec![
            commit("A", &[], 1, vec![diff("X.java", ChangeType::Added, &[(1, "a();")], &[])]),
            commit("B", &["A"], 2, vec![diff("X.java", ChangeType::Modified, &[], &[(1, "a();")])]),
        ])
        .unwrap();
        let filter = SourceFilter::default();
        let resolution = Resolver::new(&history, &FailingBlamer, &filter, SzzOptions::default())
            .resolve_fix(&fix("B"))
            .unwrap();
        assert!(resolution.links.is_empty());
        assert_eq!(resolution.unresolved[0].reason, UnresolvedReason::BlameFailed);
    }

    #[test]
    fn test_unknown_fixing_commit_under_each_policy() {
        let history = History::new(vec![
            commit("A", &[], 1, vec![diff("X.java", ChangeType::Added, &[(1, "a();")], &[])]),
            commit("B", &["A"], 2, vec![diff("X.java", ChangeType::Modified, &[], &[(1, "a();")])]),
        ])
        .unwrap();
        let blamer = HistoryBlamer::new(&history);
        let filter = SourceFilter::default();
        let resolver = Resolver::new(&history, &blamer, &filter, SzzOptions::default());
        let fixes = vec![fix("B"), fix("missing")];

        let skip = WorkerPool::new(Some(2), FailurePolicy::Skip).unwrap();
        let outcome = resolver.resolve(&skip, &fixes).unwrap();
        assert_eq!(outcome.links.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].partition, "missing");

        let abort = WorkerPool::new(Some(2), FailurePolicy::Abort).unwrap();
        assert!(matches!(
            resolver.resolve(&abort, &fixes),
            Err(Error::PartitionFailed { .. })
        ));
    }

    #[test]
    fn test_processing_order_does_not_change_links() {
        let history = History::new(vec![
            commit("A", &[], 1, vec![diff("X.java", ChangeType::Added, &[(1, "a();"), (2, "b();")], &[])]),
            commit("B", &["A"], 2, vec![diff("X.java", ChangeType::Modified, &[], &[(1, "a();")])]),
            commit("C", &["B"], 3, vec![diff("X.java", ChangeType::Modified, &[], &[(1, "b();")])]),
        ])
        .unwrap();
        let blamer = HistoryBlamer::new(&history);
        let filter = SourceFilter::default();
        let resolver = Resolver::new(&history, &blamer, &filter, SzzOptions::default());
        let pool = WorkerPool::new(Some(4), FailurePolicy::Skip).unwrap();

        let mut forward = resolver.resolve(&pool, &[fix("B"), fix("C")]).unwrap().links;
        let mut backward = resolver.resolve(&pool, &[fix("C"), fix("B")]).unwrap().links;
        forward.sort();
        backward.sort();
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 2);
    }
}
