//! Worker pool for the data-parallel stages.
//!
//! Each partition is processed by a pure function with no shared mutable
//! state. Results come back in partition order regardless of which worker
//! finished first.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use super::progress::ProgressTracker;
use super::{Error, Result};

/// What to do when one partition fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Drop the failed partition, keep the rest, report the failure.
    #[default]
    Skip,
    /// Fail the whole stage with the first failing partition in input order.
    Abort,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" | "skip-and-report" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            _ => Err(format!("Unknown failure policy: {s}. Use 'skip' or 'abort'")),
        }
    }
}

/// A partition that failed under the skip policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionFailure {
    /// Stage that produced the failure.
    pub stage: String,
    /// Partition key (usually a commit id).
    pub partition: String,
    /// Rendered error.
    pub error: String,
}

/// Results of a pool run.
#[derive(Debug)]
pub struct PoolOutcome<R> {
    /// Successful results, in partition order.
    pub results: Vec<R>,
    /// Failed partitions, in partition order.
    pub failures: Vec<PartitionFailure>,
}

/// Dedicated rayon thread pool with an explicit failure policy.
pub struct WorkerPool {
    pool: ThreadPool,
    policy: FailurePolicy,
    progress: bool,
}

impl WorkerPool {
    /// Build a pool with `jobs` workers (all CPUs when `None` or zero).
    pub fn new(jobs: Option<usize>, policy: FailurePolicy) -> Result<Self> {
        let mut builder =
            ThreadPoolBuilder::new().thread_name(|i| format!("hindsight-worker-{i}"));
        if let Some(jobs) = jobs.filter(|&n| n > 0) {
            builder = builder.num_threads(jobs);
        }
        let pool = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build worker pool: {e}")))?;

        Ok(Self {
            pool,
            policy,
            progress: false,
        })
    }

    /// Show a progress bar while mapping.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Configured failure policy.
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Apply `f` to every partition in parallel.
    ///
    /// `key` names a partition in failure reports.
    pub fn map<T, R, K, F>(&self, stage: &str, items: &[T], key: K, f: F) -> Result<PoolOutcome<R>>
    where
        T: Sync,
        R: Send,
        K: Fn(&T) -> String,
        F: Fn(&T) -> Result<R> + Sync,
    {
        let tracker = if self.progress {
            ProgressTracker::new(items.len(), stage)
        } else {
            ProgressTracker::hidden(items.len())
        };

        let outcomes: Vec<Result<R>> = self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    let outcome = f(item);
                    tracker.inc();
                    outcome
                })
                .collect()
        });
        tracker.finish_and_clear();

        let mut results = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();

        for (item, outcome) in items.iter().zip(outcomes) {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) if self.policy == FailurePolicy::Abort => {
                    return Err(Error::partition(key(item), e.to_string()));
                }
                Err(e) => {
                    let partition = key(item);
                    tracing::warn!("{stage}: skipping partition {partition}: {e}");
                    failures.push(PartitionFailure {
                        stage: stage.to_string(),
                        partition,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(PoolOutcome { results, failures })
    }
}
