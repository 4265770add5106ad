//! Error types for the hindsight library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using hindsight's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while mining history or building risk tables.
///
/// Unresolvable line origins and join mismatches are not errors: they are
/// reported as data on the stage outputs so one bad line never fails a batch.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Git operation error.
    #[error("Git error: {0}")]
    Git(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Parse error from tree-sitter.
    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Unsupported language for the given file.
    #[error("Unsupported language for file: {path}")]
    UnsupportedLanguage { path: PathBuf },

    /// A record or diff could not be decoded.
    #[error("Malformed input in {context}: {message}")]
    MalformedInput { context: String, message: String },

    /// No commits were available; nothing downstream can run.
    #[error("Empty history: {0}")]
    EmptyHistory(String),

    /// A worker partition failed under the abort policy.
    #[error("Partition {partition} failed: {message}")]
    PartitionFailed { partition: String, message: String },

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Create a new git error.
    pub fn git(message: impl Into<String>) -> Self {
        Self::Git(message.into())
    }

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a malformed input error.
    pub fn malformed(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedInput {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a partition failure.
    pub fn partition(partition: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PartitionFailed {
            partition: partition.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::git("bad revision");
        assert_eq!(err.to_string(), "Git error: bad revision");

        let err = Error::UnsupportedLanguage {
            path: PathBuf::from("README.md"),
        };
        assert_eq!(err.to_string(), "Unsupported language for file: README.md");
    }

    #[test]
    fn test_malformed_input() {
        let err = Error::malformed("commits.jsonl:3", "expected value");
        match err {
            Error::MalformedInput { context, message } => {
                assert_eq!(context, "commits.jsonl:3");
                assert_eq!(message, "expected value");
            }
            _ => panic!("Expected MalformedInput"),
        }
    }

    #[test]
    fn test_partition_failure_display() {
        let err = Error::partition("abc123", "blame failed");
        assert_eq!(err.to_string(), "Partition abc123 failed: blame failed");
    }
}
