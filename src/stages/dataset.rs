//! Experiment dataset builder.
//!
//! Left-joins an external (commit, practice, outcome) table against the
//! commit summaries and the risk tables. Every input row yields exactly one
//! output row per table; commits the mined history knows nothing about keep
//! null columns instead of disappearing.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::expand::{ChangeRecord, CommitSummary};
use super::risk::RiskRecord;

/// One row of the externally supplied experiment table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRow {
    /// Commit id.
    pub id: String,
    /// Treatment indicator, usually 0 or 1.
    pub practice: i64,
    /// Observed outcome count.
    pub bug_count: f64,
}

/// Commit-level experiment row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitExperimentRow {
    #[serde(flatten)]
    pub row: ExperimentRow,
    /// Whether the commit was found in the mined history.
    pub matched: bool,
    pub author: Option<String>,
    pub timestamp: Option<i64>,
    pub additions: Option<u32>,
    pub deletions: Option<u32>,
    pub files_changed: Option<u32>,
    pub is_fix: Option<bool>,
    pub is_bug_inducing: Option<bool>,
}

/// File- or method-level experiment row: risk of the entities the commit
/// touched. Aggregates are null when the commit touched no scored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityExperimentRow {
    #[serde(flatten)]
    pub row: ExperimentRow,
    /// Scored entities the commit touched.
    pub entities: u32,
    pub total_changes: Option<u32>,
    pub bug_inducing_changes: Option<u32>,
    pub max_risk: Option<f64>,
    pub mean_risk: Option<f64>,
}

/// The three experiment tables, each in input row order.
#[derive(Debug, Clone, Default)]
pub struct ExperimentTables {
    pub commits: Vec<CommitExperimentRow>,
    pub files: Vec<EntityExperimentRow>,
    pub methods: Vec<EntityExperimentRow>,
}

/// Mined artifacts the experiment table is joined against.
#[derive(Debug, Clone, Copy)]
pub struct DatasetInputs<'a> {
    pub summaries: &'a [CommitSummary],
    pub file_changes: &'a [ChangeRecord],
    pub method_changes: &'a [ChangeRecord],
    pub file_risk: &'a [RiskRecord],
    pub method_risk: &'a [RiskRecord],
}

/// Build all three tables.
pub fn build_tables(rows: &[ExperimentRow], inputs: DatasetInputs<'_>) -> ExperimentTables {
    let start = Instant::now();
    let tables = ExperimentTables {
        commits: commit_table(rows, inputs.summaries),
        files: entity_table(rows, inputs.file_changes, inputs.file_risk),
        methods: entity_table(rows, inputs.method_changes, inputs.method_risk),
    };

    let unmatched = tables.commits.iter().filter(|r| !r.matched).count();
    if unmatched > 0 {
        tracing::warn!("{unmatched} of {} experiment commits are not in the mined history", rows.len());
    }
    tracing::info!(
        "Built experiment tables for {} commits in {:?}",
        rows.len(),
        start.elapsed()
    );
    tables
}

/// Join experiment rows with commit summaries.
pub fn commit_table(rows: &[ExperimentRow], summaries: &[CommitSummary]) -> Vec<CommitExperimentRow> {
    let by_id: HashMap<&str, &CommitSummary> =
        summaries.iter().map(|s| (s.id.as_str(), s)).collect();

    rows.iter()
        .map(|row| {
            let summary = by_id.get(row.id.as_str()).copied();
            CommitExperimentRow {
                row: row.clone(),
                matched: summary.is_some(),
                author: summary.map(|s| s.author.clone()),
                timestamp: summary.map(|s| s.timestamp),
                additions: summary.map(|s| s.additions),
                deletions: summary.map(|s| s.deletions),
                files_changed: summary.map(|s| s.files_changed),
                is_fix: summary.map(|s| s.is_fix),
                is_bug_inducing: summary.map(|s| s.is_bug_inducing),
            }
        })
        .collect()
}

/// Join experiment rows with the risk of the entities each commit touched.
pub fn entity_table(
    rows: &[ExperimentRow],
    changes: &[ChangeRecord],
    risk: &[RiskRecord],
) -> Vec<EntityExperimentRow> {
    let mut touched: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for change in changes {
        touched
            .entry(change.commit.as_str())
            .or_default()
            .insert(change.entity_key.as_str());
    }
    let risk_by_key: HashMap<&str, &RiskRecord> =
        risk.iter().map(|r| (r.entity_key.as_str(), r)).collect();

    rows.iter()
        .map(|row| {
            let scored: Vec<&RiskRecord> = touched
                .get(row.id.as_str())
                .into_iter()
                .flatten()
                .filter_map(|key| risk_by_key.get(key).copied())
                .collect();
            entity_row(row, &scored)
        })
        .collect()
}

fn entity_row(row: &ExperimentRow, scored: &[&RiskRecord]) -> EntityExperimentRow {
    if scored.is_empty() {
        return EntityExperimentRow {
            row: row.clone(),
            entities: 0,
            total_changes: None,
            bug_inducing_changes: None,
            max_risk: None,
            mean_risk: None,
        };
    }

    let total_changes = scored.iter().map(|r| r.total_changes).sum();
    let bug_inducing_changes = scored.iter().map(|r| r.bug_inducing_changes).sum();
    let max_risk = scored.iter().map(|r| r.risk_score).fold(0.0, f64::max);
    let mean_risk = scored.iter().map(|r| r.risk_score).sum::<f64>() / scored.len() as f64;

    EntityExperimentRow {
        row: row.clone(),
        entities: scored.len() as u32,
        total_changes: Some(total_changes),
        bug_inducing_changes: Some(bug_inducing_changes),
        max_risk: Some(max_risk),
        mean_risk: Some(mean_risk),
    }
}
