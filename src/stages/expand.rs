//! Change granularity expander.
//!
//! Turns classified commits into one change record per (commit, file) and
//! one per (commit, method) whose body contains a changed code line. Added
//! lines are matched against the methods of the new version of the file,
//! removed lines against the methods of the parent's version.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::{PartitionFailure, Result, WorkerPool};
use crate::git::{Commit, RevisionSource};
use crate::parser::{MethodLocator, MethodSpan};
use crate::szz::BugInducingLink;

use super::extract::{ExtractedCommit, ExtractedFile};
use super::link::LabeledCommit;

/// Entity level of a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    File,
    Method,
}

/// One entity touched by one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub commit: String,
    pub granularity: Granularity,
    /// File path, or `{file}::{signature}` for methods.
    pub entity_key: String,
    /// File path after the commit.
    pub file: String,
    /// Method signature for method records.
    pub method: Option<String>,
    /// Code lines added.
    pub additions: u32,
    /// Code lines removed.
    pub deletions: u32,
    /// Method span, new version when it exists.
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
}

impl ChangeRecord {
    fn file(commit: &str, file: &ExtractedFile) -> Self {
        Self {
            commit: commit.to_string(),
            granularity: Granularity::File,
            entity_key: file.file.clone(),
            file: file.file.clone(),
            method: None,
            additions: file.additions() as u32,
            deletions: file.deletions() as u32,
            start_line: None,
            end_line: None,
        }
    }
}

/// Entity key of a method.
pub fn method_key(file: &str, signature: &str) -> String {
    format!("{file}::{signature}")
}

/// Per-commit totals over production source files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub id: String,
    pub author: String,
    pub timestamp: i64,
    pub additions: u32,
    pub deletions: u32,
    pub files_changed: u32,
    pub is_fix: bool,
    pub is_bug_inducing: bool,
}

/// Expander output.
#[derive(Debug, Clone, Default)]
pub struct ExpandOutcome {
    /// File records in commit order.
    pub file_changes: Vec<ChangeRecord>,
    /// Method records in commit order.
    pub method_changes: Vec<ChangeRecord>,
    pub failures: Vec<PartitionFailure>,
}

#[derive(Debug)]
struct MethodTouch {
    additions: u32,
    deletions: u32,
    start_line: u32,
    end_line: u32,
}

impl MethodTouch {
    fn new(span: &MethodSpan) -> Self {
        Self {
            additions: 0,
            deletions: 0,
            start_line: span.start_line,
            end_line: span.end_line,
        }
    }
}

/// Expands classified commits into change records.
pub struct Expander<'a> {
    methods: Option<(&'a dyn RevisionSource, &'a dyn MethodLocator)>,
}

impl<'a> Expander<'a> {
    /// Produce file records only.
    pub fn files_only() -> Self {
        Self { methods: None }
    }

    /// Produce file and method records, reading historical file versions
    /// from `source`.
    pub fn with_methods(source: &'a dyn RevisionSource, locator: &'a dyn MethodLocator) -> Self {
        Self {
            methods: Some((source, locator)),
        }
    }

    /// Expand every commit on the worker pool.
    pub fn expand(&self, pool: &WorkerPool, commits: &[ExtractedCommit]) -> Result<ExpandOutcome> {
        let start = Instant::now();
        let outcome = pool.map(
            "expand",
            commits,
            |c| c.commit.clone(),
            |c| Ok(self.expand_commit(c)),
        )?;

        let mut result = ExpandOutcome {
            failures: outcome.failures,
            ..ExpandOutcome::default()
        };
        for (files, methods) in outcome.results {
            result.file_changes.extend(files);
            result.method_changes.extend(methods);
        }

        tracing::info!(
            "Expanded {} commits into {} file and {} method records in {:?}",
            commits.len(),
            result.file_changes.len(),
            result.method_changes.len(),
            start.elapsed()
        );
        Ok(result)
    }

    /// File and method records of one commit.
    pub fn expand_commit(&self, commit: &ExtractedCommit) -> (Vec<ChangeRecord>, Vec<ChangeRecord>) {
        let mut files = Vec::with_capacity(commit.files.len());
        let mut methods = Vec::new();

        for file in &commit.files {
            files.push(ChangeRecord::file(&commit.commit, file));
            methods.extend(self.method_records(commit, file));
        }

        (files, methods)
    }

    fn method_records(&self, commit: &ExtractedCommit, file: &ExtractedFile) -> Vec<ChangeRecord> {
        let Some((source, locator)) = self.methods else {
            return Vec::new();
        };

        let added: Vec<u32> = file
            .added
            .iter()
            .filter(|r| r.is_code())
            .filter_map(|r| r.line.new_line)
            .collect();
        let removed: Vec<u32> = file
            .removed
            .iter()
            .filter(|r| r.is_code())
            .filter_map(|r| r.line.old_line)
            .collect();

        let new_spans = if added.is_empty() {
            Vec::new()
        } else {
            spans_at(source, locator, &commit.commit, &file.file)
        };
        let old_spans = match (&file.previous_path, &commit.parent) {
            (Some(path), Some(parent)) if !removed.is_empty() => {
                spans_at(source, locator, parent, path)
            }
            _ => Vec::new(),
        };

        let mut touched: BTreeMap<&str, MethodTouch> = BTreeMap::new();
        for line in added {
            if let Some(span) = innermost(&new_spans, line) {
                touched
                    .entry(span.signature.as_str())
                    .or_insert_with(|| MethodTouch::new(span))
                    .additions += 1;
            }
        }
        for line in removed {
            if let Some(span) = innermost(&old_spans, line) {
                touched
                    .entry(span.signature.as_str())
                    .or_insert_with(|| MethodTouch::new(span))
                    .deletions += 1;
            }
        }

        touched
            .into_iter()
            .map(|(signature, touch)| ChangeRecord {
                commit: commit.commit.clone(),
                granularity: Granularity::Method,
                entity_key: method_key(&file.file, signature),
                file: file.file.clone(),
                method: Some(signature.to_string()),
                additions: touch.additions,
                deletions: touch.deletions,
                start_line: Some(touch.start_line),
                end_line: Some(touch.end_line),
            })
            .collect()
    }
}

/// Method spans of `path` at `revision`; empty when unavailable.
fn spans_at(
    source: &dyn RevisionSource,
    locator: &dyn MethodLocator,
    revision: &str,
    path: &str,
) -> Vec<MethodSpan> {
    let content = match source.read(revision, path) {
        Ok(Some(content)) => content,
        Ok(None) => {
            tracing::debug!("{path} does not exist at {revision}");
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!("Failed to read {path} at {revision}: {e}");
            return Vec::new();
        }
    };

    locator.methods(path, &content).unwrap_or_else(|e| {
        tracing::warn!("Failed to locate methods in {path} at {revision}: {e}");
        Vec::new()
    })
}

/// The smallest span containing `line`.
fn innermost(spans: &[MethodSpan], line: u32) -> Option<&MethodSpan> {
    spans
        .iter()
        .filter(|s| s.contains(line))
        .min_by_key(|s| s.end_line - s.start_line)
}

/// Per-commit totals, one summary per commit in history order.
pub fn commit_summaries(
    commits: &[Commit],
    file_changes: &[ChangeRecord],
    labeled: &[LabeledCommit],
    links: &[BugInducingLink],
) -> Vec<CommitSummary> {
    let mut totals: HashMap<&str, (u32, u32, u32)> = HashMap::new();
    for record in file_changes {
        let entry = totals.entry(record.commit.as_str()).or_default();
        entry.0 += record.additions;
        entry.1 += record.deletions;
        entry.2 += 1;
    }

    let fixes: HashSet<&str> = labeled
        .iter()
        .filter(|l| l.is_fix)
        .map(|l| l.commit_id.as_str())
        .collect();
    let inducing: HashSet<&str> = links.iter().map(|l| l.inducing_commit.as_str()).collect();

    commits
        .iter()
        .map(|commit| {
            let (additions, deletions, files_changed) =
                totals.get(commit.id.as_str()).copied().unwrap_or_default();
            CommitSummary {
                id: commit.id.clone(),
                author: commit.author.clone(),
                timestamp: commit.timestamp,
                additions,
                deletions,
                files_changed,
                is_fix: fixes.contains(commit.id.as_str()),
                is_bug_inducing: inducing.contains(commit.id.as_str()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FailurePolicy;
    use crate::git::{ChangeType, FileDiff, LinePatch, MemorySource};
    use crate::parser::Parser;
    use crate::stages::extract::extract_commit;
    use crate::stages::filter::SourceFilter;

    const V1: &str = "class Calc {\n\
int add(int a, int b) {\n\
return a + b;\n\
}\n\
int neg(int a) {\n\
return -a;\n\
}\n\
}\n";

    const V2: &str = "class Calc {\n\
int add(int a, int b) {\n\
// sum\n\
return b + a;\n\
}\n\
int neg(int a) {\n\
return -a;\n\
}\n\
}\n";

    fn commit(id: &str, parent: Option<&str>, files: Vec<FileDiff>) -> Commit {
        Commit {
            id: id.to_string(),
            author: "dev".to_string(),
            author_email: String::new(),
            timestamp: 7,
            message: String::new(),
            parents: parent.into_iter().map(String::from).collect(),
            files,
        }
    }

    fn edit_add() -> Commit {
        let mut diff = FileDiff::new("src/Calc.java", ChangeType::Modified);
        diff.removed_lines = vec![LinePatch::removed(3, "return a + b;")];
        diff.added_lines = vec![
            LinePatch::added(3, "// sum"),
            LinePatch::added(4, "return b + a;"),
        ];
        commit("c2", Some("c1"), vec![diff])
    }

    fn source() -> MemorySource {
        MemorySource::new()
            .with("c1", "src/Calc.java", V1)
            .with("c2", "src/Calc.java", V2)
    }

    #[test]
    fn test_method_rows_join_diff_lines_with_spans() {
        let source = source();
        let parser = Parser::new();
        let expander = Expander::with_methods(&source, &parser);
        let extracted = extract_commit(&edit_add(), &SourceFilter::default());

        let (files, methods) = expander.expand_commit(&extracted);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].entity_key, "src/Calc.java");
        assert_eq!((files[0].additions, files[0].deletions), (1, 1));

        assert_eq!(methods.len(), 1);
        let method = &methods[0];
        assert_eq!(method.entity_key, "src/Calc.java::Calc.add(int a, int b)");
        assert_eq!(method.method.as_deref(), Some("Calc.add(int a, int b)"));
        assert_eq!((method.additions, method.deletions), (1, 1));
        assert_eq!((method.start_line, method.end_line), (Some(2), Some(5)));
        assert_eq!(method.granularity, Granularity::Method);
    }

    #[test]
    fn test_new_file_explodes_into_every_touched_method() {
        let mut diff = FileDiff::new("src/Calc.java", ChangeType::Added);
        diff.added_lines = V1
            .lines()
            .enumerate()
            .map(|(i, text)| LinePatch::added(i as u32 + 1, text))
            .collect();
        let source = source();
        let parser = Parser::new();
        let expander = Expander::with_methods(&source, &parser);
        let extracted = extract_commit(&commit("c1", None, vec![diff]), &SourceFilter::default());

        let (_, methods) = expander.expand_commit(&extracted);
        let keys: Vec<&str> = methods.iter().map(|m| m.method.as_deref().unwrap()).collect();
        assert_eq!(keys, vec!["Calc.add(int a, int b)", "Calc.neg(int a)"]);
        assert_eq!(methods[0].additions, 3);
    }

    #[test]
    fn test_lines_outside_methods_produce_no_method_rows() {
        let mut diff = FileDiff::new("src/Calc.java", ChangeType::Modified);
        diff.added_lines = vec![LinePatch::added(9, "// trailing comment")];
        let source = source();
        let parser = Parser::new();
        let expander = Expander::with_methods(&source, &parser);
        let extracted =
            extract_commit(&commit("c2", Some("c1"), vec![diff]), &SourceFilter::default());

        let (files, methods) = expander.expand_commit(&extracted);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].additions, 0);
        assert!(methods.is_empty());
    }

    #[test]
    fn test_renamed_method_is_a_distinct_entity() {
        // Method identity is (file, signature) per commit; renames are not tracked.
        let v3 = V2.replace("neg(int a)", "negate(int a)");
        let source = source().with("c3", "src/Calc.java", v3.as_str());
        let mut diff = FileDiff::new("src/Calc.java", ChangeType::Modified);
        diff.removed_lines = vec![LinePatch::removed(6, "int neg(int a) {")];
        diff.added_lines = vec![LinePatch::added(6, "int negate(int a) {")];
        let parser = Parser::new();
        let expander = Expander::with_methods(&source, &parser);
        let extracted =
            extract_commit(&commit("c3", Some("c2"), vec![diff]), &SourceFilter::default());

        let (_, methods) = expander.expand_commit(&extracted);
        let keys: Vec<&str> = methods.iter().map(|m| m.entity_key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["src/Calc.java::Calc.neg(int a)", "src/Calc.java::Calc.negate(int a)"]
        );
    }

    #[test]
    fn test_same_signature_in_nested_classes_are_distinct_rows() {
        let nested = "class A {\n\
void run() {\n\
x();\n\
}\n\
static class B {\n\
void run() {\n\
y();\n\
}\n\
}\n\
}\n";
        let source = MemorySource::new().with("c2", "src/A.java", nested);
        let mut diff = FileDiff::new("src/A.java", ChangeType::Modified);
        diff.added_lines = vec![LinePatch::added(3, "x();"), LinePatch::added(7, "y();")];
        let parser = Parser::new();
        let expander = Expander::with_methods(&source, &parser);
        let extracted =
            extract_commit(&commit("c2", Some("c1"), vec![diff]), &SourceFilter::default());

        let (_, methods) = expander.expand_commit(&extracted);
        let rows: Vec<(&str, u32, Option<u32>, Option<u32>)> = methods
            .iter()
            .map(|m| (m.entity_key.as_str(), m.additions, m.start_line, m.end_line))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("src/A.java::A.B.run()", 1, Some(6), Some(8)),
                ("src/A.java::A.run()", 1, Some(2), Some(4)),
            ]
        );
    }

    #[test]
    fn test_missing_source_yields_file_rows_only() {
        let source = MemorySource::new();
        let parser = Parser::new();
        let expander = Expander::with_methods(&source, &parser);
        let extracted = extract_commit(&edit_add(), &SourceFilter::default());
        let (files, methods) = expander.expand_commit(&extracted);
        assert_eq!(files.len(), 1);
        assert!(methods.is_empty());
    }

    #[test]
    fn test_expand_on_pool_and_summaries() {
        let mut test_diff = FileDiff::new("src/test/CalcTest.java", ChangeType::Modified);
        test_diff.added_lines = vec![LinePatch::added(1, "assertEquals(1, 1);")];
        let mut second = edit_add();
        second.files.push(test_diff);
        let commits = vec![commit("c1", None, Vec::new()), second];

        let filter = SourceFilter::default();
        let extracted: Vec<ExtractedCommit> =
            commits.iter().map(|c| extract_commit(c, &filter)).collect();
        let pool = WorkerPool::new(Some(2), FailurePolicy::Skip).unwrap();
        let outcome = Expander::files_only().expand(&pool, &extracted).unwrap();
        assert_eq!(outcome.file_changes.len(), 1);
        assert!(outcome.method_changes.is_empty());

        let labeled = vec![LabeledCommit {
            commit_id: "c2".to_string(),
            is_fix: true,
            issues: Vec::new(),
            report_date: None,
            resolution_date: None,
        }];
        let links = vec![BugInducingLink {
            fixing_commit: "c9".to_string(),
            inducing_commit: "c2".to_string(),
            file: "src/Calc.java".to_string(),
            line: "return b + a;".to_string(),
            line_number: 4,
        }];
        let summaries = commit_summaries(&commits, &outcome.file_changes, &labeled, &links);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].files_changed, 0);
        assert!(!summaries[0].is_fix);
        let summary = &summaries[1];
        assert_eq!((summary.additions, summary.deletions, summary.files_changed), (1, 1, 1));
        assert!(summary.is_fix && summary.is_bug_inducing);
        assert_eq!(summary.timestamp, 7);
    }
}
