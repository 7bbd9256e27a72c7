//! CLI module for restplan
//!
//! Provides command-line interface for:
//! - serve: boot and serve the REST API
//! - check: validate configuration, schema, fixtures and resources
//! - compile: one-shot compilation of a query string

mod args;
mod commands;
mod config;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{boot, check, compile, run_command, serve};
pub use config::Config;
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    run_command(Cli::parse_args().command)
}
