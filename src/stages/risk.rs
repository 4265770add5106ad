//! Risk aggregation over change records and bug-inducing links.
//!
//! A full recomputation: every call derives the risk table from scratch, so
//! identical inputs always produce identical output in `entity_key` order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::szz::BugInducingLink;

use super::expand::{ChangeRecord, Granularity};

/// Historical defect risk of one file or method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub entity_key: String,
    /// Distinct commits touching the entity.
    pub total_changes: u32,
    /// Distinct linked inducing commits among them.
    pub bug_inducing_changes: u32,
    pub risk_score: f64,
}

impl RiskRecord {
    fn new(entity_key: &str, total_changes: u32, bug_inducing_changes: u32) -> Self {
        let risk_score = if total_changes > 0 {
            f64::from(bug_inducing_changes) / f64::from(total_changes)
        } else {
            0.0
        };
        Self {
            entity_key: entity_key.to_string(),
            total_changes,
            bug_inducing_changes,
            risk_score,
        }
    }
}

/// Why a link contributed to no entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// The inducing commit has no change records.
    UnknownCommit,
    /// The inducing commit has records, none for this file or line.
    NoEntity,
}

/// A bug-inducing link that found no change record to count against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedLink {
    pub granularity: Granularity,
    #[serde(flatten)]
    pub link: BugInducingLink,
    pub reason: UnmatchedReason,
}

/// Aggregator output for one granularity.
#[derive(Debug, Clone, Default)]
pub struct RiskOutcome {
    /// One record per entity, sorted by key.
    pub records: Vec<RiskRecord>,
    pub unmatched_links: Vec<UnmatchedLink>,
}

/// Join `changes` of one granularity against `links` and score every entity.
///
/// Records of other granularities are ignored. A link counts against an
/// entity when the inducing commit touched the link's file and, for
/// methods, the linked line lies in the method's span.
pub fn aggregate(
    changes: &[ChangeRecord],
    links: &[BugInducingLink],
    granularity: Granularity,
) -> RiskOutcome {
    let start = Instant::now();
    let changes: Vec<&ChangeRecord> = changes
        .iter()
        .filter(|c| c.granularity == granularity)
        .collect();

    let mut touched: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut by_commit_file: HashMap<(&str, &str), Vec<&ChangeRecord>> = HashMap::new();
    let mut commits: HashSet<&str> = HashSet::new();
    for change in &changes {
        touched
            .entry(change.entity_key.as_str())
            .or_default()
            .insert(change.commit.as_str());
        by_commit_file
            .entry((change.commit.as_str(), change.file.as_str()))
            .or_default()
            .push(change);
        commits.insert(change.commit.as_str());
    }

    let mut inducing: HashMap<&str, HashSet<&str>> = HashMap::new();
    let mut unmatched_links = Vec::new();
    for link in links {
        let candidates = by_commit_file
            .get(&(link.inducing_commit.as_str(), link.file.as_str()))
            .map(Vec::as_slice)
            .unwrap_or_default();

        match matching_entity(candidates, link, granularity) {
            Some(entity) => {
                inducing
                    .entry(entity)
                    .or_default()
                    .insert(link.inducing_commit.as_str());
            }
            None => {
                let reason = if commits.contains(link.inducing_commit.as_str()) {
                    UnmatchedReason::NoEntity
                } else {
                    UnmatchedReason::UnknownCommit
                };
                unmatched_links.push(UnmatchedLink {
                    granularity,
                    link: link.clone(),
                    reason,
                });
            }
        }
    }

    let records: Vec<RiskRecord> = touched
        .iter()
        .map(|(entity, commits)| {
            let bug_inducing = inducing.get(entity).map_or(0, HashSet::len);
            RiskRecord::new(entity, commits.len() as u32, bug_inducing as u32)
        })
        .collect();

    tracing::info!(
        "Aggregated {:?} risk for {} entities ({} unmatched links) in {:?}",
        granularity,
        records.len(),
        unmatched_links.len(),
        start.elapsed()
    );

    RiskOutcome {
        records,
        unmatched_links,
    }
}

fn matching_entity<'a>(
    candidates: &[&'a ChangeRecord],
    link: &BugInducingLink,
    granularity: Granularity,
) -> Option<&'a str> {
    match granularity {
        Granularity::File => candidates.first().map(|c| c.entity_key.as_str()),
        Granularity::Method => candidates
            .iter()
            .filter_map(|c| match (c.start_line, c.end_line) {
                (Some(start), Some(end)) if start <= link.line_number && link.line_number <= end => {
                    Some((end - start, c.entity_key.as_str()))
                }
                _ => None,
            })
            .min()
            .map(|(_, key)| key),
    }
}
