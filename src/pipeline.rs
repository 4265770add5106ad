//! Stage orchestration over a repository and an artifact directory.
//!
//! Each stage reads what earlier stages wrote to the [`Store`] and writes
//! its own artifacts, so stages can run one at a time or all together.

use std::path::{Path, PathBuf};

use crate::config::{BlameBackend, Config};
use crate::core::{Error, PartitionFailure, Result, WorkerPool};
use crate::git::{Blamer, Commit, GitRepo, History};
use crate::output::StageReport;
use crate::parser::Parser;
use crate::stages::dataset::{build_tables, DatasetInputs, ExperimentRow};
use crate::stages::expand::{commit_summaries, ChangeRecord, CommitSummary, Expander, Granularity};
use crate::stages::extract::extract_commits;
use crate::stages::filter::SourceFilter;
use crate::stages::link::{BugFixingCommit, Issue, LabeledCommit, Linker};
use crate::stages::risk::{aggregate, RiskRecord};
use crate::store::{artifacts, read_issues, read_jsonl, Store};
use crate::szz::{BugInducingLink, HistoryBlamer, Resolver, SzzOptions};

/// Inputs of a full run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Issue tracker export.
    pub issues: Option<PathBuf>,
    /// External experiment table.
    pub experiment: Option<PathBuf>,
}

/// The mining pipeline for one repository.
pub struct Pipeline {
    repo_path: PathBuf,
    config: Config,
    store: Store,
    pool: WorkerPool,
    filter: SourceFilter,
}

impl Pipeline {
    pub fn new(repo_path: impl Into<PathBuf>, config: Config, out_dir: impl Into<PathBuf>) -> Result<Self> {
        let pool = WorkerPool::new(config.pool.jobs, config.pool.failure_policy)?
            .with_progress(config.pool.progress);
        let filter = SourceFilter::from_config(&config.filter)?;
        Ok(Self {
            repo_path: repo_path.into(),
            store: Store::create(out_dir)?,
            config,
            pool,
            filter,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Read the commit history into `commits.jsonl`.
    pub fn history(&self) -> Result<StageReport> {
        let repo = GitRepo::open(&self.repo_path)?;
        let commits = repo.history(&self.config.history.log_options())?;
        // an empty history stops the run before anything downstream
        let history = History::new(commits)?;

        self.store.write(artifacts::COMMITS, history.commits())?;
        let mut report = self.report("history");
        report.record(artifacts::COMMITS, history.len());
        Ok(report)
    }

    /// Label commits against an issue export, or commit message keywords.
    pub fn link(&self, issues: Option<&Path>) -> Result<StageReport> {
        let history = self.load_history()?;
        let issues: Vec<Issue> = match issues {
            Some(path) => read_issues(path)?,
            None => Vec::new(),
        };
        if issues.is_empty() && !self.config.linker.keyword_fallback {
            tracing::warn!("No issues supplied and keyword fallback is off; no commit will be labeled a fix");
        }

        let linker = Linker::from_config(&self.config.linker)?;
        let outcome = linker.link(history.commits(), &issues);

        self.store.write(artifacts::LABELED_COMMITS, &outcome.labeled)?;
        self.store.write(artifacts::BUG_FIXING_COMMITS, &outcome.fixes)?;
        let mut report = self.report("link");
        report.record(artifacts::LABELED_COMMITS, outcome.labeled.len());
        report.record(artifacts::BUG_FIXING_COMMITS, outcome.fixes.len());
        Ok(report)
    }

    /// Trace every fixing commit to its bug-inducing commits.
    pub fn szz(&self) -> Result<StageReport> {
        let history = self.load_history()?;
        let fixes: Vec<BugFixingCommit> = self.store.read(artifacts::BUG_FIXING_COMMITS)?;
        let options = SzzOptions::from(&self.config.szz);

        let outcome = match self.config.szz.backend {
            BlameBackend::History => {
                let blamer = HistoryBlamer::new(&history);
                self.resolve(&history, &blamer, options, &fixes)?
            }
            BlameBackend::Git => {
                let blamer = GitRepo::open(&self.repo_path)?.blamer()?;
                self.resolve(&history, &blamer, options, &fixes)?
            }
        };

        self.store.write(artifacts::BUG_INDUCING_LINKS, &outcome.links)?;
        self.store.write(artifacts::UNRESOLVED_LINES, &outcome.unresolved)?;
        self.record_failures("szz", &outcome.failures)?;

        let mut report = self.report("szz");
        report.record(artifacts::BUG_INDUCING_LINKS, outcome.links.len());
        report.record(artifacts::UNRESOLVED_LINES, outcome.unresolved.len());
        report.record(artifacts::FAILURES, outcome.failures.len());
        Ok(report)
    }

    fn resolve(
        &self,
        history: &History,
        blamer: &dyn Blamer,
        options: SzzOptions,
        fixes: &[BugFixingCommit],
    ) -> Result<crate::szz::SzzOutcome> {
        Resolver::new(history, blamer, &self.filter, options).resolve(&self.pool, fixes)
    }

    /// Expand the whole history into file and method change records.
    pub fn expand(&self) -> Result<StageReport> {
        let history = self.load_history()?;
        let labeled: Vec<LabeledCommit> = self.read_or_empty(artifacts::LABELED_COMMITS)?;
        let links: Vec<BugInducingLink> = self.read_or_empty(artifacts::BUG_INDUCING_LINKS)?;

        let extracted = extract_commits(&self.pool, &history, &self.filter)?;
        let source = GitRepo::open(&self.repo_path)?.revision_source()?;
        let parser = Parser::new();
        let outcome = Expander::with_methods(&source, &parser).expand(&self.pool, &extracted.results)?;

        let summaries = commit_summaries(history.commits(), &outcome.file_changes, &labeled, &links);
        let mut failures = extracted.failures;
        failures.extend(outcome.failures);

        self.store.write(artifacts::FILE_CHANGES, &outcome.file_changes)?;
        self.store.write(artifacts::METHOD_CHANGES, &outcome.method_changes)?;
        self.store.write(artifacts::COMMIT_SUMMARIES, &summaries)?;
        self.record_failures("expand", &failures)?;

        let mut report = self.report("expand");
        report.record(artifacts::FILE_CHANGES, outcome.file_changes.len());
        report.record(artifacts::METHOD_CHANGES, outcome.method_changes.len());
        report.record(artifacts::COMMIT_SUMMARIES, summaries.len());
        Ok(report)
    }

    /// Score every file and method.
    pub fn risk(&self) -> Result<StageReport> {
        // aggregation never runs without a history behind it
        self.load_history()?;
        let file_changes: Vec<ChangeRecord> = self.store.read(artifacts::FILE_CHANGES)?;
        let method_changes: Vec<ChangeRecord> = self.store.read(artifacts::METHOD_CHANGES)?;
        let links: Vec<BugInducingLink> = self.store.read(artifacts::BUG_INDUCING_LINKS)?;

        let files = aggregate(&file_changes, &links, Granularity::File);
        let methods = aggregate(&method_changes, &links, Granularity::Method);
        let mut unmatched = files.unmatched_links;
        unmatched.extend(methods.unmatched_links);

        self.store.write(artifacts::FILE_RISK, &files.records)?;
        self.store.write(artifacts::METHOD_RISK, &methods.records)?;
        self.store.write(artifacts::UNMATCHED_LINKS, &unmatched)?;

        let mut report = self.report("risk");
        report.record(artifacts::FILE_RISK, files.records.len());
        report.record(artifacts::METHOD_RISK, methods.records.len());
        report.record(artifacts::UNMATCHED_LINKS, unmatched.len());
        Ok(report)
    }

    /// Join an external experiment table against the risk tables.
    pub fn dataset(&self, experiment: &Path) -> Result<StageReport> {
        let rows: Vec<ExperimentRow> = read_jsonl(experiment)?;
        let summaries: Vec<CommitSummary> = self.store.read(artifacts::COMMIT_SUMMARIES)?;
        let file_changes: Vec<ChangeRecord> = self.store.read(artifacts::FILE_CHANGES)?;
        let method_changes: Vec<ChangeRecord> = self.store.read(artifacts::METHOD_CHANGES)?;
        let file_risk: Vec<RiskRecord> = self.store.read(artifacts::FILE_RISK)?;
        let method_risk: Vec<RiskRecord> = self.store.read(artifacts::METHOD_RISK)?;

        let tables = build_tables(
            &rows,
            DatasetInputs {
                summaries: &summaries,
                file_changes: &file_changes,
                method_changes: &method_changes,
                file_risk: &file_risk,
                method_risk: &method_risk,
            },
        );

        self.store.write(artifacts::EXPERIMENT_COMMITS, &tables.commits)?;
        self.store.write(artifacts::EXPERIMENT_FILES, &tables.files)?;
        self.store.write(artifacts::EXPERIMENT_METHODS, &tables.methods)?;

        let mut report = self.report("dataset");
        report.record(artifacts::EXPERIMENT_COMMITS, tables.commits.len());
        report.record(artifacts::EXPERIMENT_FILES, tables.files.len());
        report.record(artifacts::EXPERIMENT_METHODS, tables.methods.len());
        Ok(report)
    }

    /// Every stage in order. The dataset stage runs only with an experiment table.
    pub fn run(&self, options: &RunOptions) -> Result<StageReport> {
        let mut report = self.report("run");
        report.extend(self.history()?);
        report.extend(self.link(options.issues.as_deref())?);
        report.extend(self.szz()?);
        report.extend(self.expand()?);
        report.extend(self.risk()?);
        if let Some(experiment) = &options.experiment {
            report.extend(self.dataset(experiment)?);
        }
        Ok(report)
    }

    fn load_history(&self) -> Result<History> {
        if !self.store.exists(artifacts::COMMITS) {
            return Err(Error::EmptyHistory(format!(
                "{} not found; run the history stage first",
                self.store.path(artifacts::COMMITS).display()
            )));
        }
        let commits: Vec<Commit> = self.store.read(artifacts::COMMITS)?;
        History::new(commits)
    }

    fn read_or_empty<T: serde::de::DeserializeOwned>(&self, artifact: &str) -> Result<Vec<T>> {
        if self.store.exists(artifact) {
            self.store.read(artifact)
        } else {
            tracing::debug!("{artifact} not found, continuing without it");
            Ok(Vec::new())
        }
    }

    /// Replace one stage's entries in the failure report.
    fn record_failures(&self, stage: &str, failures: &[PartitionFailure]) -> Result<()> {
        let mut all: Vec<PartitionFailure> = self.read_or_empty(artifacts::FAILURES)?;
        all.retain(|f| !stage_owns(stage, &f.stage));
        all.extend(failures.iter().cloned());
        for failure in failures {
            tracing::warn!(
                "Skipped {} partition {}: {}",
                failure.stage,
                failure.partition,
                failure.error
            );
        }
        self.store.write(artifacts::FAILURES, &all)
    }

    fn report(&self, stage: &str) -> StageReport {
        StageReport::new(stage, self.store.dir())
    }
}

/// Pool stage names recorded under each pipeline stage.
fn stage_owns(stage: &str, pool_stage: &str) -> bool {
    match stage {
        "expand" => matches!(pool_stage, "extract" | "expand"),
        _ => stage == pool_stage,
    }
}
