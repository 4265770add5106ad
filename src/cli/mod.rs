//! CLI implementation using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Hindsight - Defect-inducing commit mining and file/method risk scoring.
#[derive(Parser)]
#[command(name = "hindsight")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the repository to mine
    #[arg(short, long, default_value = ".")]
    pub path: PathBuf,

    /// Directory for stage artifacts
    #[arg(short, long, default_value = "hindsight-out")]
    pub out: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Number of parallel workers (default: number of CPUs)
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Read the commit history with per-file diffs
    #[command(alias = "log")]
    History,

    /// Label bug-fixing commits from an issue export
    Link(LinkArgs),

    /// Trace bug-fixing commits to the commits that introduced the fixed lines
    #[command(alias = "blame")]
    Szz,

    /// Expand the history into file and method change records
    Expand,

    /// Aggregate file and method risk scores
    Risk,

    /// Join an experiment table against the risk tables
    #[command(alias = "experiment")]
    Dataset(DatasetArgs),

    /// Run every stage in order
    Run(RunArgs),

    /// Write a default hindsight.toml into the repository
    Init(InitArgs),
}

#[derive(Args)]
pub struct LinkArgs {
    /// Issue tracker export (JSON array or JSON Lines)
    #[arg(short, long)]
    pub issues: Option<PathBuf>,
}

#[derive(Args)]
pub struct DatasetArgs {
    /// Experiment table (JSON Lines of id, practice, bug_count)
    #[arg(short, long)]
    pub experiment: PathBuf,
}

#[derive(Args)]
pub struct RunArgs {
    /// Issue tracker export (JSON array or JSON Lines)
    #[arg(short, long)]
    pub issues: Option<PathBuf>,

    /// Experiment table; the dataset stage is skipped without one
    #[arg(short, long)]
    pub experiment: Option<PathBuf>,
}

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing hindsight.toml
    #[arg(long)]
    pub force: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["hindsight", "history"]).unwrap();
        assert_eq!(cli.path, PathBuf::from("."));
        assert_eq!(cli.out, PathBuf::from("hindsight-out"));
        assert!(matches!(cli.format, OutputFormat::Text));
        assert!(cli.jobs.is_none());
        assert!(matches!(cli.command, Command::History));
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "hindsight", "-p", "/repo", "-o", "/out", "-f", "json", "-j", "4", "-v", "szz",
        ])
        .unwrap();
        assert_eq!(cli.path, PathBuf::from("/repo"));
        assert_eq!(cli.out, PathBuf::from("/out"));
        assert!(matches!(cli.format, OutputFormat::Json));
        assert_eq!(cli.jobs, Some(4));
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_link_issues() {
        let cli = Cli::try_parse_from(["hindsight", "link", "--issues", "issues.json"]).unwrap();
        match cli.command {
            Command::Link(args) => assert_eq!(args.issues, Some(PathBuf::from("issues.json"))),
            _ => panic!("Expected Link command"),
        }
    }

    #[test]
    fn test_cli_dataset_requires_experiment() {
        assert!(Cli::try_parse_from(["hindsight", "dataset"]).is_err());
        let cli = Cli::try_parse_from(["hindsight", "experiment", "-e", "rows.jsonl"]).unwrap();
        assert!(matches!(cli.command, Command::Dataset(_)));
    }

    #[test]
    fn test_cli_run_optional_inputs() {
        let cli = Cli::try_parse_from(["hindsight", "run"]).unwrap();
        match cli.command {
            Command::Run(args) => {
                assert!(args.issues.is_none());
                assert!(args.experiment.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_blame_alias() {
        let cli = Cli::try_parse_from(["hindsight", "blame"]).unwrap();
        assert!(matches!(cli.command, Command::Szz));
    }

    #[test]
    fn test_cli_unknown_format() {
        assert!(Cli::try_parse_from(["hindsight", "-f", "markdown", "risk"]).is_err());
    }
}
