//! Line-change extractor.
//!
//! Classifies the added and removed lines of a diff as code, comment or
//! blank using C-style comment rules, and tokenizes the code that survives.
//! Classification depends on block-comment state carried across the ordered
//! line sequence, so lines must be fed in diff order.

use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{PoolOutcome, Result, WorkerPool};
use crate::git::{Commit, History, LinePatch};

use super::filter::SourceFilter;

/// Classification of one physical line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Code,
    Comment,
    Blank,
}

/// A classified diff line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    /// The raw line with its numbers.
    pub line: LinePatch,
    /// Code, comment or blank.
    pub classification: Classification,
    /// Lexical tokens of the code part (empty unless code).
    pub tokens: Vec<String>,
}

impl LineRecord {
    pub fn is_code(&self) -> bool {
        self.classification == Classification::Code
    }
}

fn line_comment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"//.*").expect("valid regex"))
}

fn inline_block_comment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/\*.*?\*/").expect("valid regex"))
}

fn continuation_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\*.*").expect("valid regex"))
}

fn token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+|[^\w\s]+").expect("valid regex"))
}

/// Split code into word and punctuation tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    token()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Open block comments, one per line-number stream.
///
/// Holds the last line number known to be inside the comment.
#[derive(Debug, Default)]
struct CommentState {
    old: Option<u32>,
    new: Option<u32>,
}

impl CommentState {
    fn open(&mut self, line: &LinePatch) {
        if let Some(n) = line.old_line {
            self.old = Some(n);
        }
        if let Some(n) = line.new_line {
            self.new = Some(n);
        }
    }

    fn close(&mut self, line: &LinePatch) {
        if line.old_line.is_some() {
            self.old = None;
        }
        if line.new_line.is_some() {
            self.new = None;
        }
    }

    /// Advance past a line directly following an open comment.
    fn swallow(&mut self, line: &LinePatch) -> bool {
        if advance(&mut self.old, line.old_line) {
            return true;
        }
        advance(&mut self.new, line.new_line)
    }
}

fn advance(counter: &mut Option<u32>, line: Option<u32>) -> bool {
    match (*counter, line) {
        (Some(open), Some(n)) if open + 1 == n => {
            *counter = Some(n);
            true
        }
        _ => false,
    }
}

/// Strip comment markup from one line, updating the comment state.
fn strip(line: &LinePatch, state: &mut CommentState) -> String {
    let text = line_comment().replace(&line.text, "");
    let text = inline_block_comment().replace_all(&text, "").into_owned();

    let opener = text.find("/*");
    let closer = text.rfind("*/").map(|i| i + 2);

    match (opener, closer) {
        // "... */ code /* ..." closes one comment and opens the next, so the
        // line ends inside a comment (a closer-last reading would end it closed)
        (Some(open), Some(close)) if close <= open => {
            state.open(line);
            text[close..open].to_string()
        }
        (Some(open), _) => {
            state.open(line);
            text[..open].to_string()
        }
        (None, Some(close)) => {
            state.close(line);
            text[close..].to_string()
        }
        (None, None) => continuation_marker().replace(&text, "").into_owned(),
    }
}

/// Classify an ordered sequence of diff lines.
///
/// Returns one record per input line, in input order.
pub fn classify_lines(lines: &[LinePatch]) -> Vec<LineRecord> {
    let mut state = CommentState::default();

    lines
        .iter()
        .map(|line| {
            let stripped = strip(line, &mut state);

            let (classification, tokens) = if state.swallow(line) {
                (Classification::Comment, Vec::new())
            } else {
                let tokens = tokenize(&stripped);
                if !tokens.is_empty() {
                    (Classification::Code, tokens)
                } else if line.text.trim().is_empty() {
                    (Classification::Blank, tokens)
                } else {
                    (Classification::Comment, tokens)
                }
            };

            LineRecord {
                line: line.clone(),
                classification,
                tokens,
            }
        })
        .collect()
}

/// The code lines of an ordered sequence of diff lines.
pub fn code_lines(lines: &[LinePatch]) -> Vec<LineRecord> {
    classify_lines(lines)
        .into_iter()
        .filter(LineRecord::is_code)
        .collect()
}

/// Number of code lines in an ordered sequence of diff lines.
pub fn count_code_lines(lines: &[LinePatch]) -> usize {
    classify_lines(lines).iter().filter(|r| r.is_code()).count()
}

/// Classified lines of one source file in one commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFile {
    /// Path after the commit.
    pub file: String,
    /// Path in the parent commit, `None` for new files.
    #[serde(default)]
    pub previous_path: Option<String>,
    /// Classified added lines.
    pub added: Vec<LineRecord>,
    /// Classified removed lines.
    pub removed: Vec<LineRecord>,
}

impl ExtractedFile {
    pub fn additions(&self) -> usize {
        self.added.iter().filter(|r| r.is_code()).count()
    }

    pub fn deletions(&self) -> usize {
        self.removed.iter().filter(|r| r.is_code()).count()
    }
}

/// Classified lines of every source file in one commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedCommit {
    pub commit: String,
    /// First parent, the version removed lines are numbered against.
    #[serde(default)]
    pub parent: Option<String>,
    pub files: Vec<ExtractedFile>,
}

impl ExtractedCommit {
    pub fn additions(&self) -> usize {
        self.files.iter().map(ExtractedFile::additions).sum()
    }

    pub fn deletions(&self) -> usize {
        self.files.iter().map(ExtractedFile::deletions).sum()
    }
}

/// Classify the source files of one commit.
pub fn extract_commit(commit: &Commit, filter: &SourceFilter) -> ExtractedCommit {
    let files = commit
        .files
        .iter()
        .filter(|diff| filter.accepts_diff(diff))
        .map(|diff| ExtractedFile {
            file: diff.filename.clone(),
            previous_path: diff.previous_path().map(String::from),
            added: classify_lines(&diff.added_lines),
            removed: classify_lines(&diff.removed_lines),
        })
        .collect();

    ExtractedCommit {
        commit: commit.id.clone(),
        parent: commit.first_parent().map(String::from),
        files,
    }
}

/// Classify every commit on the worker pool, in commit order.
///
/// A merge whose branch commits are part of the history contributes no
/// files: its first-parent diff repeats changes those commits already carry.
pub fn extract_commits(
    pool: &WorkerPool,
    history: &History,
    filter: &SourceFilter,
) -> Result<PoolOutcome<ExtractedCommit>> {
    let start = Instant::now();
    let outcome = pool.map(
        "extract",
        history.commits(),
        |c| c.id.clone(),
        |commit| {
            if history.branch_is_mined(commit) {
                return Ok(ExtractedCommit {
                    commit: commit.id.clone(),
                    parent: commit.first_parent().map(String::from),
                    files: Vec::new(),
                });
            }
            Ok(extract_commit(commit, filter))
        },
    )?;
    tracing::info!(
        "Extracted lines from {} commits in {:?}",
        outcome.results.len(),
        start.elapsed()
    );
    Ok(outcome)
}
