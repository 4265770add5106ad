//! Issue-commit linker.
//!
//! Labels commits as bug fixes by joining tracker issues against the issue
//! keys mentioned in commit messages and the commit references recorded on
//! the issues themselves.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::LinkerConfig;
use crate::core::{Error, Result};
use crate::git::Commit;

/// Shortest abbreviated SHA accepted from issue metadata.
const MIN_SHA_PREFIX: usize = 7;

/// A tracker issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Tracker key, e.g. "LANG-1234".
    pub key: String,
    /// Issue type ("Bug", "Improvement", ...).
    pub issue_type: String,
    /// Workflow status.
    #[serde(default)]
    pub status: Option<String>,
    /// When the issue was reported.
    pub created: DateTime<Utc>,
    /// When the issue was resolved.
    #[serde(default)]
    pub resolved: Option<DateTime<Utc>>,
    /// Commit SHAs (possibly abbreviated) recorded on the issue.
    #[serde(default)]
    pub linked_commits: Vec<String>,
}

impl Issue {
    /// Whether this is a bug report that has been resolved.
    pub fn is_resolved_bug(&self) -> bool {
        if !self.issue_type.eq_ignore_ascii_case("bug") {
            return false;
        }
        if self.resolved.is_some() {
            return true;
        }
        self.status.as_deref().is_some_and(|s| {
            matches!(
                s.to_ascii_lowercase().as_str(),
                "resolved" | "closed" | "done" | "fixed"
            )
        })
    }
}

/// A commit with its fix label and the issues behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledCommit {
    pub commit_id: String,
    pub is_fix: bool,
    /// Resolved bug issues this commit fixes.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Earliest report date among the fixed issues.
    #[serde(default)]
    pub report_date: Option<DateTime<Utc>>,
    /// Latest resolution date among the fixed issues.
    #[serde(default)]
    pub resolution_date: Option<DateTime<Utc>>,
}

/// A commit labeled as a bug fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugFixingCommit {
    pub commit_id: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub report_date: Option<DateTime<Utc>>,
}

/// Output of the linker.
#[derive(Debug, Clone, Default)]
pub struct LinkOutcome {
    /// One label per input commit, in input order.
    pub labeled: Vec<LabeledCommit>,
    /// The fixing commits, in input order.
    pub fixes: Vec<BugFixingCommit>,
}

/// Joins issues and commits.
#[derive(Debug, Clone)]
pub struct Linker {
    key_pattern: Regex,
    project_key: Option<String>,
    keyword_fallback: bool,
}

impl Linker {
    /// Create a linker. Without a project key any `ABC-123` reference counts.
    pub fn new(project_key: Option<&str>, keyword_fallback: bool) -> Result<Self> {
        let project_key = project_key
            .map(|k| k.trim().to_ascii_uppercase())
            .filter(|k| !k.is_empty());

        let pattern = match &project_key {
            Some(key) => format!(r"(?i)\b({})-(\d+)\b", regex::escape(key)),
            None => r"\b([A-Z][A-Z0-9_]+)-(\d+)\b".to_string(),
        };
        let key_pattern = Regex::new(&pattern)
            .map_err(|e| Error::config(format!("Invalid project key: {e}")))?;

        Ok(Self {
            key_pattern,
            project_key,
            keyword_fallback,
        })
    }

    pub fn from_config(config: &LinkerConfig) -> Result<Self> {
        Self::new(config.project_key.as_deref(), config.keyword_fallback)
    }

    /// Issue keys referenced by a commit message, normalized and deduplicated.
    pub fn issue_keys(&self, message: &str) -> Vec<String> {
        let keys: BTreeSet<String> = self
            .key_pattern
            .captures_iter(message)
            .map(|caps| format!("{}-{}", caps[1].to_ascii_uppercase(), &caps[2]))
            .collect();
        keys.into_iter().collect()
    }

    /// Label every commit.
    pub fn link(&self, commits: &[Commit], issues: &[Issue]) -> LinkOutcome {
        let start = Instant::now();

        let by_key: HashMap<String, &Issue> = issues
            .iter()
            .filter(|issue| self.in_project(&issue.key))
            .map(|issue| (issue.key.to_ascii_uppercase(), issue))
            .collect();
        let by_sha = index_linked_commits(&by_key);
        let use_keywords = issues.is_empty() && self.keyword_fallback;

        let mut outcome = LinkOutcome::default();
        for commit in commits {
            let labeled = if use_keywords {
                LabeledCommit {
                    commit_id: commit.id.clone(),
                    is_fix: is_bug_fix_message(&commit.message),
                    issues: Vec::new(),
                    report_date: None,
                    resolution_date: None,
                }
            } else {
                self.label(commit, &by_key, &by_sha)
            };

            if labeled.is_fix {
                outcome.fixes.push(BugFixingCommit {
                    commit_id: labeled.commit_id.clone(),
                    issues: labeled.issues.clone(),
                    report_date: labeled.report_date,
                });
            }
            outcome.labeled.push(labeled);
        }

        tracing::info!(
            "Linked {} issues to {} commits: {} fixes in {:?}",
            issues.len(),
            commits.len(),
            outcome.fixes.len(),
            start.elapsed()
        );
        outcome
    }

    fn in_project(&self, key: &str) -> bool {
        match &self.project_key {
            Some(project) => key
                .to_ascii_uppercase()
                .strip_prefix(project.as_str())
                .is_some_and(|rest| rest.starts_with('-')),
            None => true,
        }
    }

    fn label(
        &self,
        commit: &Commit,
        by_key: &HashMap<String, &Issue>,
        by_sha: &HashMap<&str, Vec<(&str, &Issue)>>,
    ) -> LabeledCommit {
        let mut referenced: Vec<&Issue> = self
            .issue_keys(&commit.message)
            .iter()
            .filter_map(|key| by_key.get(key).copied())
            .collect();

        if let Some(bucket) = commit.id.get(..MIN_SHA_PREFIX).and_then(|p| by_sha.get(p)) {
            referenced.extend(
                bucket
                    .iter()
                    .filter(|(sha, _)| commit.id.starts_with(sha))
                    .map(|(_, issue)| *issue),
            );
        }

        let fixed: Vec<&Issue> = referenced
            .into_iter()
            .filter(|issue| issue.is_resolved_bug())
            .collect();

        let keys: BTreeSet<String> = fixed.iter().map(|i| i.key.to_ascii_uppercase()).collect();

        LabeledCommit {
            commit_id: commit.id.clone(),
            is_fix: !fixed.is_empty(),
            issues: keys.into_iter().collect(),
            report_date: fixed.iter().map(|i| i.created).min(),
            resolution_date: fixed.iter().filter_map(|i| i.resolved).max(),
        }
    }
}

/// Group issue commit references by their first characters.
fn index_linked_commits<'a>(
    by_key: &HashMap<String, &'a Issue>,
) -> HashMap<&'a str, Vec<(&'a str, &'a Issue)>> {
    let mut index: HashMap<&str, Vec<(&str, &Issue)>> = HashMap::new();
    for issue in by_key.values().copied() {
        for sha in &issue.linked_commits {
            let sha = sha.trim();
            if let Some(prefix) = sha.get(..MIN_SHA_PREFIX) {
                index.entry(prefix).or_default().push((sha, issue));
            }
        }
    }
    index
}

/// Whether a commit message reads like a bug fix.
pub fn is_bug_fix_message(message: &str) -> bool {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    static EXCLUDE: OnceLock<Vec<Regex>> = OnceLock::new();

    let exclude = EXCLUDE.get_or_init(|| {
        vec![
            Regex::new(r"(?i)^\s*Merge\s+(pull\s+request|branch)").expect("valid regex"),
            Regex::new(r"(?i)^\s*(docs?|style|ci):").expect("valid regex"),
        ]
    });
    if exclude.iter().any(|p| p.is_match(message)) {
        return false;
    }

    let patterns = PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)\bfix(es|ed|ing)?\b").expect("valid regex"),
            Regex::new(r"(?i)\bbug\b").expect("valid regex"),
            Regex::new(r"(?i)\bbugfix\b").expect("valid regex"),
            Regex::new(r"(?i)\bpatch(es|ed|ing)?\b").expect("valid regex"),
            Regex::new(r"(?i)\bresolve[sd]?\b").expect("valid regex"),
            Regex::new(r"(?i)\bclose[sd]?\s+#\d+").expect("valid regex"),
            Regex::new(r"(?i)\bdefect\b").expect("valid regex"),
            Regex::new(r"(?i)\bcrash(es|ed|ing)?\b").expect("valid regex"),
        ]
    });
    patterns.iter().any(|p| p.is_match(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn commit(id: &str, message: &str) -> Commit {
        Commit {
            id: id.to_string(),
            author: "dev".to_string(),
            author_email: String::new(),
            timestamp: 0,
            message: message.to_string(),
            parents: Vec::new(),
            files: Vec::new(),
        }
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, d, 0, 0, 0).unwrap()
    }

    fn bug(key: &str, created: u32, resolved: Option<u32>) -> Issue {
        Issue {
            key: key.to_string(),
            issue_type: "Bug".to_string(),
            status: None,
            created: day(created),
            resolved: resolved.map(day),
            linked_commits: Vec::new(),
        }
    }

    #[test]
    fn test_issue_keys_with_project() {
        let linker = Linker::new(Some("lang"), false).unwrap();
        assert_eq!(
            linker.issue_keys("lang-12: fix; see LANG-3 and LANG-12, not IO-4"),
            vec!["LANG-12", "LANG-3"]
        );
        assert!(linker.issue_keys("SLANG-1").is_empty());
    }

    #[test]
    fn test_issue_keys_without_project() {
        let linker = Linker::new(None, false).unwrap();
        assert_eq!(linker.issue_keys("IO-4 and LANG-7"), vec!["IO-4", "LANG-7"]);
    }

    #[test]
    fn test_link_by_message_and_resolution() {
        let linker = Linker::new(Some("LANG"), false).unwrap();
        let commits = vec![
            commit("aaa", "Initial"),
            commit("bbb", "LANG-1 fix overflow"),
            commit("ccc", "LANG-2 still open"),
            commit("ddd", "LANG-3 improvement"),
        ];
        let mut improvement = bug("LANG-3", 1, Some(4));
        improvement.issue_type = "Improvement".to_string();
        let issues = vec![bug("LANG-1", 2, Some(5)), bug("LANG-2", 1, None), improvement];

        let outcome = linker.link(&commits, &issues);
        assert_eq!(outcome.labeled.len(), 4);
        let flags: Vec<bool> = outcome.labeled.iter().map(|l| l.is_fix).collect();
        assert_eq!(flags, vec![false, true, false, false]);

        assert_eq!(outcome.fixes.len(), 1);
        let fix = &outcome.fixes[0];
        assert_eq!(fix.commit_id, "bbb");
        assert_eq!(fix.issues, vec!["LANG-1"]);
        assert_eq!(fix.report_date, Some(day(2)));
        assert_eq!(outcome.labeled[1].resolution_date, Some(day(5)));
    }

    #[test]
    fn test_link_by_issue_commit_reference() {
        let linker = Linker::new(None, false).unwrap();
        let commits = vec![commit("0123456789abcdef", "tidy up")];
        let mut issue = bug("IO-9", 1, Some(2));
        issue.linked_commits = vec!["0123456789".to_string(), "0123".to_string()];

        let outcome = linker.link(&commits, &[issue]);
        assert!(outcome.labeled[0].is_fix);
        assert_eq!(outcome.labeled[0].issues, vec!["IO-9"]);
    }

    #[test]
    fn test_status_counts_as_resolution() {
        let mut issue = bug("IO-1", 1, None);
        assert!(!issue.is_resolved_bug());
        issue.status = Some("Closed".to_string());
        assert!(issue.is_resolved_bug());
    }

    #[test]
    fn test_multiple_issues_per_commit() {
        let linker = Linker::new(Some("LANG"), false).unwrap();
        let commits = vec![commit("e1", "LANG-5, LANG-4: two fixes")];
        let issues = vec![bug("LANG-4", 3, Some(6)), bug("LANG-5", 2, Some(9))];
        let outcome = linker.link(&commits, &issues);
        let label = &outcome.labeled[0];
        assert_eq!(label.issues, vec!["LANG-4", "LANG-5"]);
        assert_eq!(label.report_date, Some(day(2)));
        assert_eq!(label.resolution_date, Some(day(9)));
    }

    #[test]
    fn test_keyword_fallback_only_without_issues() {
        let commits = vec![
            commit("a", "Fix null pointer in parser"),
            commit("b", "Add feature"),
            commit("c", "Merge branch 'fix-x'"),
        ];

        let linker = Linker::new(None, true).unwrap();
        let outcome = linker.link(&commits, &[]);
        let flags: Vec<bool> = outcome.labeled.iter().map(|l| l.is_fix).collect();
        assert_eq!(flags, vec![true, false, false]);

        let strict = Linker::new(None, false).unwrap();
        assert!(strict.link(&commits, &[]).fixes.is_empty());
    }

    #[test]
    fn test_issue_deserializes_with_defaults() {
        let json = r#"{"key":"LANG-1","issue_type":"Bug","created":"2021-03-02T00:00:00Z"}"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.created, day(2));
        assert!(issue.linked_commits.is_empty());
        assert!(issue.resolved.is_none());
    }
}
