//! Command-line interface for fieldflow.
//!
//! # Usage
//!
//! ```bash
//! # Execute a fixture and print the initial result
//! fieldflow run fixture.json
//!
//! # Deliver deferred fields incrementally, with lifecycle tracing
//! fieldflow run fixture.json --incremental --trace -v
//!
//! # Validate a fixture without executing it
//! fieldflow check fixture.json
//! ```

pub mod fixture;

use clap::{Parser, Subcommand};
use colored::Colorize;
use fieldflow_runtime::{ExecutionResult, ExecutorConfig, FieldError, IncrementalPayload};
use fixture::{Fixture, FixtureOutput};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "fieldflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a fixture
    Run {
        /// Fixture file path
        fixture: PathBuf,

        /// Deliver deferred fields as incremental payloads
        #[arg(long)]
        incremental: bool,

        /// Trace every resolver invocation
        #[arg(long)]
        trace: bool,

        /// Print compact JSON
        #[arg(long)]
        compact: bool,
    },

    /// Check a fixture for errors
    Check {
        #[arg(required = true)]
        fixtures: Vec<PathBuf>,
    },

    /// Show version information
    Version,
}

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid fixture: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid type reference: {0}")]
    InvalidType(String),
}

pub async fn run(cli: Cli) -> Result<i32, CliError> {
    match cli.command {
        Commands::Run {
            fixture,
            incremental,
            trace,
            compact,
        } => {
            let loaded = Fixture::load(&fixture)?;
            let config = ExecutorConfig {
                enable_incremental_delivery: incremental
                    || loaded.config.enable_incremental_delivery,
                tracing: trace || loaded.config.tracing,
            };
            tracing::info!(fixture = %fixture.display(), ?config, "executing fixture");

            let output = loaded.execute(config).await?;
            print_output(&output, compact, cli.quiet)?;
            Ok(0)
        }
        Commands::Check { fixtures } => check_fixtures(&fixtures, cli.quiet),
        Commands::Version => {
            println!("fieldflow {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

fn check_fixtures(fixtures: &[PathBuf], quiet: bool) -> Result<i32, CliError> {
    let mut failed = 0;

    for path in fixtures {
        match Fixture::load(path).and_then(|fixture| fixture.selection_set()) {
            Ok(selection) => {
                if !quiet {
                    println!(
                        "{} {} ({} root fields)",
                        "OK".green(),
                        path.display(),
                        selection.len()
                    );
                }
            }
            Err(error) => {
                failed += 1;
                eprintln!("{} {}", "Error".red().bold(), path.display());
                eprintln!("  {} {}", "-->".blue(), error);
            }
        }
    }

    if failed == 0 {
        if !quiet {
            println!(
                "\n{} {} fixture(s) checked",
                "Success:".green().bold(),
                fixtures.len()
            );
        }
        Ok(0)
    } else {
        Ok(1)
    }
}

fn print_output(output: &FixtureOutput, compact: bool, quiet: bool) -> Result<(), CliError> {
    if !quiet {
        println!("{}", "Initial".green().bold());
    }
    println!("{}", render(&output.initial, compact)?);
    print_errors(&output.initial, quiet);

    for (index, payload) in output.payloads.iter().enumerate() {
        if !quiet {
            println!(
                "{} {} {}",
                format!("Payload {}", index + 1).blue().bold(),
                payload.path,
                label_suffix(payload).dimmed()
            );
        }
        println!("{}", render(payload, compact)?);
    }

    if !quiet {
        let errors: usize = output.initial.errors.len()
            + output.payloads.iter().map(|p| p.errors.len()).sum::<usize>();
        let summary = format!(
            "{} payload(s), {} error(s)",
            output.payloads.len(),
            errors
        );
        if errors == 0 {
            println!("\n{} {summary}", "Done:".green().bold());
        } else {
            println!("\n{} {summary}", "Done:".yellow().bold());
        }
    }
    Ok(())
}

fn print_errors(result: &ExecutionResult, quiet: bool) {
    if quiet {
        return;
    }
    for error in &result.errors {
        eprintln!("  {} {}", "-->".yellow(), describe(error));
    }
}

fn describe(error: &FieldError) -> String {
    match (&error.path, error.code()) {
        (Some(path), Some(code)) => format!("{path}: {} [{code}]", error.message),
        (Some(path), None) => format!("{path}: {}", error.message),
        (None, Some(code)) => format!("{} [{code}]", error.message),
        (None, None) => error.message.clone(),
    }
}

fn label_suffix(payload: &IncrementalPayload) -> String {
    payload
        .label
        .as_ref()
        .map(|label| format!("({label})"))
        .unwrap_or_default()
}

fn render<T: serde::Serialize>(value: &T, compact: bool) -> Result<String, CliError> {
    let rendered = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    Ok(rendered)
}
