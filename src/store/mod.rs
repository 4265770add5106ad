//! JSON Lines persistence for stage artifacts.
//!
//! Every record set is one JSON object per line. Readers report the file and
//! line of the first record that fails to decode.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::{Error, Result};
use crate::stages::Issue;

/// Artifact file names in the output directory.
pub mod artifacts {
    pub const COMMITS: &str = "commits.jsonl";
    pub const LABELED_COMMITS: &str = "labeled_commits.jsonl";
    pub const BUG_FIXING_COMMITS: &str = "bug_fixing_commits.jsonl";
    pub const BUG_INDUCING_LINKS: &str = "bug_inducing_links.jsonl";
    pub const UNRESOLVED_LINES: &str = "unresolved_lines.jsonl";
    pub const FAILURES: &str = "failures.jsonl";
    pub const COMMIT_SUMMARIES: &str = "commit_summaries.jsonl";
    pub const FILE_CHANGES: &str = "file_changes.jsonl";
    pub const METHOD_CHANGES: &str = "method_changes.jsonl";
    pub const FILE_RISK: &str = "file_risk.jsonl";
    pub const METHOD_RISK: &str = "method_risk.jsonl";
    pub const UNMATCHED_LINKS: &str = "unmatched_links.jsonl";
    pub const EXPERIMENT_COMMITS: &str = "experiment_commits.jsonl";
    pub const EXPERIMENT_FILES: &str = "experiment_files.jsonl";
    pub const EXPERIMENT_METHODS: &str = "experiment_methods.jsonl";
}

/// Directory holding the artifacts of one run.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Open `dir`, creating it when missing.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, artifact: &str) -> PathBuf {
        self.dir.join(artifact)
    }

    pub fn exists(&self, artifact: &str) -> bool {
        self.path(artifact).is_file()
    }

    pub fn write<T: Serialize>(&self, artifact: &str, records: &[T]) -> Result<()> {
        let path = self.path(artifact);
        write_jsonl(&path, records)?;
        tracing::debug!("Wrote {} records to {}", records.len(), path.display());
        Ok(())
    }

    /// Read an artifact written by an earlier stage.
    pub fn read<T: DeserializeOwned>(&self, artifact: &str) -> Result<Vec<T>> {
        let path = self.path(artifact);
        if !path.is_file() {
            return Err(Error::InvalidArgument(format!(
                "{} is missing; run the stage that produces it first",
                path.display()
            )));
        }
        read_jsonl(&path)
    }
}

/// Write records as JSON Lines, replacing any existing file.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read JSON Lines records. Blank lines are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            Error::malformed(format!("{}:{}", path.display(), index + 1), e.to_string())
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Read issues from a tracker export: a JSON array, or JSON Lines.
pub fn read_issues(path: &Path) -> Result<Vec<Issue>> {
    let content = std::fs::read_to_string(path)?;
    if content.trim_start().starts_with('[') {
        return serde_json::from_str(&content)
            .map_err(|e| Error::malformed(path.display().to_string(), e.to_string()));
    }
    read_jsonl(path)
}
