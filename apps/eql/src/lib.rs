//! # eql
//!
//! Command-line front end for `eql-core`: loads world and query documents,
//! runs them, and prints the results.

pub mod cli;
pub mod settings;

pub use settings::Settings;
