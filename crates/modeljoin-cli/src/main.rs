//! Modeljoin CLI
//!
//! - `check`: resolve a query plan against its metamodels and parse its
//!   expressions
//! - `transform`: run a query plan over source models and write the target
//!   model as JSON

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use modeljoin_cli::{check, describe_error, describe_issue, transform, TransformArgs};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "modeljoin")]
#[command(author, version, about = "Modeljoin: model-to-model transformation from query plans")]
struct Cli {
    /// Log engine progress (`debug` level). `RUST_LOG` applies otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a plan against its source (and optionally target) metamodels.
    Check {
        /// Query plan JSON
        #[arg(short, long)]
        plan: PathBuf,
        /// Source metamodel JSON (repeatable)
        #[arg(short, long = "metamodel", required = true)]
        metamodels: Vec<PathBuf>,
        /// Target metamodel JSON
        #[arg(short, long)]
        target_metamodel: Option<PathBuf>,
    },

    /// Transform source models into a new target model.
    Transform {
        /// Query plan JSON
        #[arg(short, long)]
        plan: PathBuf,
        /// Source metamodel JSON (repeatable)
        #[arg(short = 'M', long = "metamodel", required = true)]
        metamodels: Vec<PathBuf>,
        /// Source model JSON (repeatable, one per source metamodel)
        #[arg(short = 'm', long = "model", required = true)]
        models: Vec<PathBuf>,
        /// Target metamodel JSON
        #[arg(short, long)]
        target_metamodel: PathBuf,
        /// Output file, or directory to write `<plan name>.json` into
        #[arg(short, long)]
        out: PathBuf,
        /// Engine options JSON
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{} {}", "[ERROR]".red().bold(), describe_error(&err));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `Ok(false)` when the command ran but found problems.
fn run(command: Commands) -> Result<bool> {
    match command {
        Commands::Check {
            plan,
            metamodels,
            target_metamodel,
        } => {
            let report = check(&plan, &metamodels, target_metamodel.as_deref())?;
            for issue in &report.plan_issues {
                eprintln!("{} {issue}", "[ERROR]".red().bold());
            }
            for issue in &report.expression_issues {
                eprintln!("{} {}", "[ERROR]".red().bold(), describe_issue(issue));
            }
            if report.is_ok() {
                println!("{} {}", "ok".green().bold(), plan.display());
            } else {
                eprintln!("{} {} problem(s)", "→".yellow(), report.len());
            }
            Ok(report.is_ok())
        }
        Commands::Transform {
            plan,
            metamodels,
            models,
            target_metamodel,
            out,
            config,
        } => {
            let written = transform(&TransformArgs {
                plan,
                metamodels,
                models,
                target_metamodel,
                out,
                config,
            })?;
            println!("{} {}", "wrote".green().bold(), written.display().to_string().bold());
            Ok(true)
        }
    }
}
