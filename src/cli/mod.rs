//! Command-line interface for trapforge.
//!
//! Provides commands to run the workflow, serve it over HTTP, validate
//! assessment files and inspect stored runs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
