//! Core types shared by every stage.

mod error;
mod language;
pub mod pool;
pub mod progress;

pub use error::{Error, Result};
pub use language::Language;
pub use pool::{FailurePolicy, PartitionFailure, PoolOutcome, WorkerPool};
