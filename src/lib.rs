//! Hindsight - Defect-inducing commit mining and historical risk scoring.
//!
//! Hindsight reads a repository's history, labels bug-fixing commits from
//! an issue tracker export, traces each fix back to the commits that
//! introduced the lines it removed (SZZ), and turns the result into per-file
//! and per-method risk tables for downstream experiments.
//!
//! # Supported Languages
//!
//! Java, C, C++, C#, Go, Rust, JavaScript, TypeScript, TSX/JSX
//!
//! # Example
//!
//! ```no_run
//! use hindsight::config::Config;
//! use hindsight::pipeline::{Pipeline, RunOptions};
//!
//! let pipeline = Pipeline::new(".", Config::default(), "hindsight-out").unwrap();
//! let report = pipeline.run(&RunOptions::default()).unwrap();
//! println!("{} artifacts written", report.artifacts.len());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod git;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod szz;

pub use core::{Error, Result};
