//! Pipeline stages, in data-flow order.

pub mod dataset;
pub mod expand;
pub mod extract;
pub mod filter;
pub mod link;
pub mod risk;

pub use dataset::{build_tables, DatasetInputs, ExperimentRow, ExperimentTables};
pub use expand::{commit_summaries, ChangeRecord, CommitSummary, Expander, Granularity};
pub use extract::{extract_commits, ExtractedCommit};
pub use filter::SourceFilter;
pub use link::{BugFixingCommit, Issue, LabeledCommit, Linker};
pub use risk::{aggregate, RiskOutcome, RiskRecord, UnmatchedLink};
