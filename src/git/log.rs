//! Git log operations: commit enumeration with line-level diffs.

use std::path::Path;
use std::process::Command;
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Language, Result};

const RECORD_SEP: char = '\u{1e}';
const FIELD_SEP: char = '\u{1f}';
const HEADER_END: char = '\u{1d}';
const LOG_FORMAT: &str = "--format=%x1e%H%x1f%P%x1f%an%x1f%ae%x1f%at%x1f%B%x1d";

/// A git commit with its file-level diffs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit SHA.
    pub id: String,
    /// Author name.
    pub author: String,
    /// Author email.
    #[serde(default)]
    pub author_email: String,
    /// Author timestamp (unix seconds).
    pub timestamp: i64,
    /// Full commit message.
    #[serde(default)]
    pub message: String,
    /// Parent SHAs, first parent first.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Files changed in this commit.
    #[serde(default)]
    pub files: Vec<FileDiff>,
}

impl Commit {
    /// Whether this commit has more than one parent.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// First parent SHA, if any.
    pub fn first_parent(&self) -> Option<&str> {
        self.parents.first().map(String::as_str)
    }

    /// Find the diff for a file by its post-commit name.
    pub fn file(&self, filename: &str) -> Option<&FileDiff> {
        self.files.iter().find(|f| f.filename == filename)
    }

    /// Author time as a UTC datetime.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.timestamp, 0).single()
    }
}

/// Type of file change.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    #[default]
    Modified,
    Deleted,
    Renamed,
}

/// Line-level changes to one file in one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Path after the commit (the old path for deletions).
    pub filename: String,
    /// Path before the commit, when renamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_filename: Option<String>,
    /// Change type.
    #[serde(default)]
    pub change_type: ChangeType,
    /// Detected language.
    #[serde(default)]
    pub language: Option<Language>,
    /// Lines added, numbered in the new version.
    #[serde(default)]
    pub added_lines: Vec<LinePatch>,
    /// Lines removed, numbered in the old version.
    #[serde(default)]
    pub removed_lines: Vec<LinePatch>,
}

impl FileDiff {
    /// Create an empty diff for a file.
    pub fn new(filename: impl Into<String>, change_type: ChangeType) -> Self {
        let filename = filename.into();
        Self {
            language: Language::detect(&filename),
            filename,
            old_filename: None,
            change_type,
            added_lines: Vec::new(),
            removed_lines: Vec::new(),
        }
    }

    /// Path of this file in the parent commit, `None` for new files.
    pub fn previous_path(&self) -> Option<&str> {
        match self.change_type {
            ChangeType::Added => None,
            _ => Some(self.old_filename.as_deref().unwrap_or(&self.filename)),
        }
    }
}

/// One added or removed physical line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePatch {
    /// Line number in the old version (removed lines).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_line: Option<u32>,
    /// Line number in the new version (added lines).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_line: Option<u32>,
    /// Raw line text without the diff marker.
    pub text: String,
}

impl LinePatch {
    /// An added line at `new_line`.
    pub fn added(new_line: u32, text: impl Into<String>) -> Self {
        Self {
            old_line: None,
            new_line: Some(new_line),
            text: text.into(),
        }
    }

    /// A removed line at `old_line`.
    pub fn removed(old_line: u32, text: impl Into<String>) -> Self {
        Self {
            old_line: Some(old_line),
            new_line: None,
            text: text.into(),
        }
    }
}

/// Options for reading history.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Revision to walk from.
    pub revision: String,
    /// Follow first parents only. Merged branches are then visible only
    /// through the merge commit.
    pub first_parent: bool,
    /// Only commits after this date (git date syntax).
    pub since: Option<String>,
    /// Only commits before this date (git date syntax).
    pub until: Option<String>,
    /// Maximum number of commits overall.
    pub max_count: Option<usize>,
    /// Commits fetched per `git log` invocation.
    pub page_size: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            revision: "HEAD".to_string(),
            first_parent: false,
            since: None,
            until: None,
            max_count: None,
            page_size: 500,
        }
    }
}

/// Read the commit history of a repository, oldest commit first.
pub fn read_history(repo_root: &Path, options: &LogOptions) -> Result<Vec<Commit>> {
    let start = Instant::now();
    let page_size = options.page_size.max(1);
    let mut commits = Vec::new();
    let mut skip = 0usize;

    loop {
        let mut want = page_size;
        if let Some(max) = options.max_count {
            if commits.len() >= max {
                break;
            }
            want = want.min(max - commits.len());
        }

        let page = read_page(repo_root, options, skip, want)?;
        let fetched = page.len();
        tracing::debug!("git log page at {skip}: {fetched} commits");
        commits.extend(page);
        skip += fetched;

        if fetched < want {
            break;
        }
    }

    // git log lists newest first
    commits.reverse();
    tracing::info!(
        "Read {} commits from {} in {:?}",
        commits.len(),
        repo_root.display(),
        start.elapsed()
    );
    Ok(commits)
}

fn read_page(
    repo_root: &Path,
    options: &LogOptions,
    skip: usize,
    max_count: usize,
) -> Result<Vec<Commit>> {
    let mut cmd = Command::new("git");
    cmd.args(["-c", "core.quotePath=false", "log", "-p", "--no-color"])
        .args(["--no-ext-diff", "--unified=0", "-M", LOG_FORMAT])
        .arg(format!("--skip={skip}"))
        .arg(format!("--max-count={max_count}"));

    // merges carry their diff against the first parent in both modes
    if options.first_parent {
        cmd.args(["-m", "--first-parent"]);
    } else {
        cmd.args(["--diff-merges=first-parent", "--topo-order"]);
    }
    if let Some(since) = &options.since {
        cmd.arg(format!("--since={since}"));
    }
    if let Some(until) = &options.until {
        cmd.arg(format!("--until={until}"));
    }
    cmd.arg(&options.revision).arg("--").current_dir(repo_root);

    let output = cmd
        .output()
        .map_err(|e| Error::git(format!("Failed to run git log: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::git(format!("git log failed: {}", stderr.trim())));
    }

    parse_log(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `git log -p --unified=0` output produced with [`LOG_FORMAT`].
pub(crate) fn parse_log(output: &str) -> Result<Vec<Commit>> {
    let mut commits = Vec::new();

    for record in output.split(RECORD_SEP) {
        if record.trim().is_empty() {
            continue;
        }

        let (header, patch) = record
            .split_once(HEADER_END)
            .ok_or_else(|| Error::malformed("git log", "missing header terminator"))?;

        let fields: Vec<&str> = header.splitn(6, FIELD_SEP).collect();
        if fields.len() != 6 {
            return Err(Error::malformed(
                "git log",
                format!("expected 6 header fields, found {}", fields.len()),
            ));
        }

        let timestamp = fields[4].trim().parse::<i64>().map_err(|e| {
            Error::malformed("git log", format!("bad timestamp '{}': {e}", fields[4]))
        })?;

        commits.push(Commit {
            id: fields[0].trim().to_string(),
            parents: fields[1].split_whitespace().map(String::from).collect(),
            author: fields[2].to_string(),
            author_email: fields[3].to_string(),
            timestamp,
            message: fields[5].trim().to_string(),
            files: parse_patch(patch),
        });
    }

    Ok(commits)
}

/// Remaining line counts of the hunk being read.
#[derive(Default)]
struct Hunk {
    old_line: u32,
    new_line: u32,
    old_remaining: u32,
    new_remaining: u32,
}

impl Hunk {
    fn is_open(&self) -> bool {
        self.old_remaining > 0 || self.new_remaining > 0
    }
}

fn parse_patch(patch: &str) -> Vec<FileDiff> {
    let mut files = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut hunk = Hunk::default();

    for line in patch.lines() {
        if hunk.is_open() {
            if let Some(file) = current.as_mut() {
                if consume_hunk_line(file, &mut hunk, line) {
                    continue;
                }
            }
            hunk = Hunk::default();
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(file) = current.take() {
                files.push(finish_file(file));
            }
            current = Some(diff_header(rest));
            continue;
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if let Some(path) = line.strip_prefix("rename from ") {
            file.old_filename = Some(unquote(path).to_string());
            file.change_type = ChangeType::Renamed;
        } else if let Some(path) = line.strip_prefix("rename to ") {
            file.filename = unquote(path).to_string();
            file.change_type = ChangeType::Renamed;
        } else if line.starts_with("new file mode") {
            file.change_type = ChangeType::Added;
        } else if line.starts_with("deleted file mode") {
            file.change_type = ChangeType::Deleted;
        } else if let Some(path) = line.strip_prefix("--- ") {
            let path = unquote(path);
            if path == "/dev/null" {
                file.change_type = ChangeType::Added;
            } else if let Some(old) = path.strip_prefix("a/") {
                if old != file.filename {
                    file.old_filename = Some(old.to_string());
                }
            }
        } else if let Some(path) = line.strip_prefix("+++ ") {
            let path = unquote(path);
            if path == "/dev/null" {
                file.change_type = ChangeType::Deleted;
            } else if let Some(new) = path.strip_prefix("b/") {
                file.filename = new.to_string();
            }
        } else if line.starts_with("@@ ") {
            if let Some(parsed) = parse_hunk_header(line) {
                hunk = parsed;
            }
        }
    }

    if let Some(file) = current.take() {
        files.push(finish_file(file));
    }

    files
}

/// Returns false when the line does not belong to the open hunk.
fn consume_hunk_line(file: &mut FileDiff, hunk: &mut Hunk, line: &str) -> bool {
    if line.starts_with('\\') {
        return true;
    }

    match line.as_bytes().first() {
        Some(b'-') if hunk.old_remaining > 0 => {
            file.removed_lines
                .push(LinePatch::removed(hunk.old_line, &line[1..]));
            hunk.old_line += 1;
            hunk.old_remaining -= 1;
        }
        Some(b'+') if hunk.new_remaining > 0 => {
            file.added_lines
                .push(LinePatch::added(hunk.new_line, &line[1..]));
            hunk.new_line += 1;
            hunk.new_remaining -= 1;
        }
        Some(b' ') if hunk.old_remaining > 0 && hunk.new_remaining > 0 => {
            hunk.old_line += 1;
            hunk.new_line += 1;
            hunk.old_remaining -= 1;
            hunk.new_remaining -= 1;
        }
        _ => return false,
    }
    true
}

fn diff_header(rest: &str) -> FileDiff {
    // "a/<old> b/<new>"; ambiguous for paths containing " b/", later
    // ---/+++ and rename lines override this guess.
    let (old, new) = match rest.find(" b/") {
        Some(pos) => (
            rest[..pos].trim_start_matches("a/"),
            rest[pos + 3..].trim(),
        ),
        None => (rest, rest),
    };

    let mut file = FileDiff::new(unquote(new), ChangeType::Modified);
    if old != new {
        file.old_filename = Some(unquote(old).to_string());
    }
    file
}

fn finish_file(mut file: FileDiff) -> FileDiff {
    match file.change_type {
        ChangeType::Renamed => {}
        _ if file.old_filename.as_deref() == Some(file.filename.as_str()) => {
            file.old_filename = None;
        }
        ChangeType::Modified if file.old_filename.is_some() => {
            file.change_type = ChangeType::Renamed;
        }
        _ => {}
    }
    file.language = Language::detect(&file.filename);
    file
}

fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let mut parts = line.split_whitespace().skip(1);
    let (old_start, old_len) = parse_range(parts.next()?.strip_prefix('-')?)?;
    let (new_start, new_len) = parse_range(parts.next()?.strip_prefix('+')?)?;

    Some(Hunk {
        old_line: old_start,
        new_line: new_start,
        old_remaining: old_len,
        new_remaining: new_len,
    })
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

fn unquote(path: &str) -> &str {
    path.trim().trim_matches('"')
}
