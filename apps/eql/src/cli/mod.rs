//! # EQL CLI Module
//!
//! This module implements the CLI interface for EQL.
//!
//! ## Available Commands
//!
//! - `run` - Evaluate a query against a world and print the solutions
//! - `check` - Build and validate a query without running it
//! - `explain` - Print the expression tree of a query (or its negation)

mod commands;

use crate::Settings;
use clap::{Args, Parser, Subcommand};
use eql_core::EqlError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// EQL - Entity Query Runner
///
/// Resolves relational conditions over a world of entities.
#[derive(Parser, Debug)]
#[command(name = "eql")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress headers and summaries
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the TOML configuration file (defaults to ./eql.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// World and query document paths shared by every command.
#[derive(Args, Debug, Clone)]
pub struct DocumentArgs {
    /// Path to the world document (JSON)
    #[arg(short, long)]
    pub world: PathBuf,

    /// Path to the query document (JSON)
    #[arg(short = 'Q', long)]
    pub query: PathBuf,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate a query and print its solutions
    Run {
        #[command(flatten)]
        documents: DocumentArgs,

        /// Expect exactly one solution
        #[arg(long, conflicts_with_all = ["at_least", "at_most"])]
        the: bool,

        /// Minimum number of solutions
        #[arg(long)]
        at_least: Option<usize>,

        /// Maximum number of solutions
        #[arg(long)]
        at_most: Option<usize>,

        /// Override the cartesian product warning threshold
        #[arg(long)]
        cartesian_threshold: Option<usize>,
    },

    /// Build and validate a query without running it
    Check {
        #[command(flatten)]
        documents: DocumentArgs,
    },

    /// Print the expression tree of a query
    Explain {
        #[command(flatten)]
        documents: DocumentArgs,

        /// Print the negated tree instead
        #[arg(long)]
        negate: bool,
    },
}

/// Output switches shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputMode {
    pub json: bool,
    pub quiet: bool,
    pub verbose: bool,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), EqlError> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    let mode = OutputMode {
        json: cli.json,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let output = match cli.command {
        Commands::Run {
            documents,
            the,
            at_least,
            at_most,
            cartesian_threshold,
        } => {
            if let Some(threshold) = cartesian_threshold {
                settings.engine = settings
                    .engine
                    .with_cartesian_warning_threshold(threshold);
            }
            let request = RunRequest {
                the,
                at_least,
                at_most,
            };
            cmd_run(&documents, &settings, request, mode)?
        }
        Commands::Check { documents } => cmd_check(&documents, mode)?,
        Commands::Explain { documents, negate } => cmd_explain(&documents, negate, mode)?,
    };

    println!("{}", output);
    Ok(())
}
