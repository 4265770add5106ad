//! Source file filter.
//!
//! Applied wherever additions and deletions are counted: test code and
//! files outside the configured languages never contribute.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::FilterConfig;
use crate::core::{Error, Language, Result};
use crate::git::FileDiff;

/// Decides which changed files count as production source.
#[derive(Debug, Clone)]
pub struct SourceFilter {
    languages: Vec<Language>,
    test_marker: String,
    exclude: GlobSet,
}

impl SourceFilter {
    /// Create a filter for the given languages.
    ///
    /// An empty `test_marker` disables the test-path check.
    pub fn new(
        languages: Vec<Language>,
        test_marker: impl Into<String>,
        exclude: &[String],
    ) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude {
            let glob = Glob::new(pattern)
                .map_err(|e| Error::config(format!("Invalid exclude pattern '{pattern}': {e}")))?;
            builder.add(glob);
        }
        let exclude = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build exclude set: {e}")))?;

        Ok(Self {
            languages,
            test_marker: test_marker.into(),
            exclude,
        })
    }

    /// Build the filter from configuration.
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        Self::new(config.language_set(), config.test_marker.clone(), &config.exclude)
    }

    /// Whether a path counts as production source.
    pub fn accepts(&self, path: &str) -> bool {
        match Language::detect(path) {
            Some(lang) => self.accepts_language(path, lang),
            None => false,
        }
    }

    /// Whether a diff counts as production source, judged by its new path.
    pub fn accepts_diff(&self, diff: &FileDiff) -> bool {
        match diff.language.or_else(|| Language::detect(&diff.filename)) {
            Some(lang) => self.accepts_language(&diff.filename, lang),
            None => false,
        }
    }

    fn accepts_language(&self, path: &str, lang: Language) -> bool {
        if !self.languages.contains(&lang) {
            return false;
        }
        if !self.test_marker.is_empty() && path.contains(&self.test_marker) {
            return false;
        }
        !self.exclude.is_match(Path::new(path))
    }
}

impl Default for SourceFilter {
    fn default() -> Self {
        Self {
            languages: vec![Language::Java],
            test_marker: "test".to_string(),
            exclude: GlobSet::empty(),
        }
    }
}
