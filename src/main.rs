//! Hindsight CLI - Defect-inducing commit mining and risk scoring.

use std::io::stdout;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hindsight::cli::{Cli, Command, OutputFormat};
use hindsight::config::Config;
use hindsight::output::{Format, StageReport};
use hindsight::pipeline::{Pipeline, RunOptions};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::Init(args) = &cli.command {
        let target = cli.path.join("hindsight.toml");
        if target.exists() && !args.force {
            bail!("{} already exists (use --force to overwrite)", target.display());
        }
        std::fs::write(&target, Config::default_toml())
            .with_context(|| format!("writing {}", target.display()))?;
        println!("Wrote {}", target.display());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_default(&cli.path)?,
    };
    if cli.jobs.is_some() {
        config.pool.jobs = cli.jobs;
    }

    let format = match cli.format {
        OutputFormat::Json => Format::Json,
        OutputFormat::Text => Format::Text,
    };

    let pipeline = Pipeline::new(&cli.path, config, &cli.out)
        .with_context(|| format!("preparing output directory {}", cli.out.display()))?;

    let report: StageReport = match cli.command {
        Command::History => pipeline.history().context("reading history")?,
        Command::Link(args) => pipeline
            .link(args.issues.as_deref())
            .context("linking issues to commits")?,
        Command::Szz => pipeline.szz().context("resolving bug-inducing commits")?,
        Command::Expand => pipeline.expand().context("expanding change records")?,
        Command::Risk => pipeline.risk().context("aggregating risk")?,
        Command::Dataset(args) => pipeline
            .dataset(&args.experiment)
            .with_context(|| format!("building experiment tables from {}", args.experiment.display()))?,
        Command::Run(args) => pipeline
            .run(&RunOptions {
                issues: args.issues,
                experiment: args.experiment,
            })
            .context("running pipeline")?,
        Command::Init(_) => return Ok(()),
    };

    format.format(&report, &mut stdout())?;
    Ok(())
}
