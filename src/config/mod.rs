//! Configuration loading and management.

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::core::{FailurePolicy, Language, Result};
use crate::git::LogOptions;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// History reader settings.
    pub history: HistoryConfig,
    /// Source file filter shared by every stage that counts lines.
    pub filter: FilterConfig,
    /// Issue-commit linker settings.
    pub linker: LinkerConfig,
    /// Defect-inducing commit resolver settings.
    pub szz: SzzConfig,
    /// Worker pool settings.
    pub pool: PoolConfig,
}

impl Config {
    /// Load configuration from an explicit file path.
    ///
    /// Errors if the file does not exist. Use this for explicit `--config` flags.
    /// Env vars with `HINDSIGHT_` prefix override file values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(crate::core::Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file_exact(path))
            .merge(Env::prefixed("HINDSIGHT_").split("__"))
            .extract()
            .map_err(|e| crate::core::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a repository, looking for hindsight.toml or
    /// .hindsight/hindsight.toml.
    ///
    /// Missing files are silently skipped (defaults are used).
    /// Env vars with `HINDSIGHT_` prefix override file/default values.
    pub fn load_default(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(dir.join("hindsight.toml")))
            .merge(Toml::file(dir.join(".hindsight/hindsight.toml")))
            .merge(Env::prefixed("HINDSIGHT_").split("__"))
            .extract()
            .map_err(|e| crate::core::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Create default config file content.
    pub fn default_toml() -> &'static str {
        include_str!("default_config.toml")
    }

    fn validate(&self) -> Result<()> {
        for name in &self.filter.languages {
            if Language::from_name(name).is_none() {
                return Err(crate::core::Error::Config(format!(
                    "unknown language in [filter] languages: {name}"
                )));
            }
        }
        Ok(())
    }
}

/// History reader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Revision to walk back from.
    pub revision: String,
    /// Follow first parents only.
    pub first_parent: bool,
    /// Lower date bound, in git date syntax.
    pub since: Option<String>,
    /// Upper date bound, in git date syntax.
    pub until: Option<String>,
    /// Cap on the number of commits read.
    pub max_count: Option<usize>,
    /// Commits per `git log` page.
    pub page_size: usize,
}

impl Default for HistoryConfig {
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

impl HistoryConfig {
    /// Options for the git history reader.
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            revision: self.revision.clone(),
            first_parent: self.first_parent,
            since: self.since.clone(),
            until: self.until.clone(),
            max_count: self.max_count,
            page_size: self.page_size,
        }
    }
}

/// Source file filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Languages counted as source.
    pub languages: Vec<String>,
    /// Paths containing this marker are test code and skipped.
    pub test_marker: String,
    /// Additional glob patterns to exclude.
    pub exclude: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            languages: vec!["java".to_string()],
            test_marker: "test".to_string(),
            exclude: Vec::new(),
        }
    }
}

impl FilterConfig {
    /// Configured languages; unknown names are rejected at load time.
    pub fn language_set(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self
            .languages
            .iter()
            .filter_map(|name| Language::from_name(name))
            .collect();
        languages.sort();
        languages.dedup();
        languages
    }
}

/// Issue-commit linker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Issue key prefix, e.g. "LANG" for LANG-123.
    pub project_key: Option<String>,
    /// Label fixes from commit message keywords when no issues are given.
    pub keyword_fallback: bool,
}

/// Blame backend used by the resolver.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlameBackend {
    /// Line tracking over the recorded diffs.
    #[default]
    History,
    /// gix blame against the object store.
    Git,
}

impl std::str::FromStr for BlameBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "history" => Ok(Self::History),
            "git" => Ok(Self::Git),
            _ => Err(format!("Unknown blame backend: {s}. Use 'history' or 'git'")),
        }
    }
}

/// Defect-inducing commit resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SzzConfig {
    /// Blame backend.
    pub backend: BlameBackend,
    /// Never credit merge commits.
    pub skip_merges: bool,
    /// Walk past commits that only changed whitespace on the line.
    pub ignore_whitespace: bool,
    /// Drop origins authored after the earliest linked issue report.
    pub filter_after_report: bool,
    /// Only trace lines the extractor classifies as code.
    pub code_lines_only: bool,
}

impl Default for SzzConfig {
    fn default() -> Self {
        Self {
            backend: BlameBackend::History,
            skip_merges: true,
            ignore_whitespace: false,
            filter_after_report: false,
            code_lines_only: true,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker threads (all CPUs when unset).
    pub jobs: Option<usize>,
    /// Skip or abort on a failed partition.
    pub failure_policy: FailurePolicy,
    /// Show progress bars.
    pub progress: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            failure_policy: FailurePolicy::Skip,
            progress: true,
        }
    }
}
