//! # EQL - Entity Query Runner
//!
//! The command-line binary for the EQL resolution engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │             apps/eql (THE BINARY)             │
//! │                                               │
//! │  ┌─────────────┐        ┌─────────────────┐   │
//! │  │    CLI      │        │    Settings     │   │
//! │  │   (clap)    │        │ (eql.toml/toml) │   │
//! │  └──────┬──────┘        └────────┬────────┘   │
//! │         └────────────┬───────────┘            │
//! │                      ▼                        │
//! │              ┌───────────────┐                │
//! │              │   eql-core    │                │
//! │              │  (THE LOGIC)  │                │
//! │              └───────────────┘                │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! eql run --world kitchen.json --query drawers.json
//! eql run --world kitchen.json --query drawers.json --the --json
//! eql check --world kitchen.json --query drawers.json
//! eql explain --world kitchen.json --query drawers.json --negate
//! ```

use clap::Parser;
use eql::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // EQL_LOG_FORMAT=json enables machine-parseable logs.
    let log_format = std::env::var("EQL_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "eql=info,eql_core=warn".into());

    // Logs go to stderr so results on stdout stay pipeable.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
