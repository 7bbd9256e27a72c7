//! CLI argument definitions using clap
//!
//! Commands:
//! - restplan serve --config <path>
//! - restplan check --config <path>
//! - restplan compile --config <path> --resource <name> --query <qs>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// restplan - query-string driven REST layer over schema-registered collections
#[derive(Parser, Debug)]
#[command(name = "restplan")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the schema and fixtures, then serve the REST API
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./restplan.json")]
        config: PathBuf,

        /// Port overriding the configured one
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate configuration, schema, fixtures and resources, then exit
    Check {
        /// Path to configuration file
        #[arg(long, default_value = "./restplan.json")]
        config: PathBuf,
    },

    /// Compile one query string and print the plan
    Compile {
        /// Path to configuration file
        #[arg(long, default_value = "./restplan.json")]
        config: PathBuf,

        /// Resource name
        #[arg(long)]
        resource: String,

        /// Query string, without the leading '?'
        #[arg(long, default_value = "")]
        query: String,

        /// Execute the plan and include its results
        #[arg(long)]
        execute: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_arguments() {
        let cli = Cli::try_parse_from([
            "restplan",
            "compile",
            "--resource",
            "invoice",
            "--query",
            "sum=amount",
        ])
        .unwrap();
        match cli.command {
            Command::Compile {
                config,
                resource,
                query,
                execute,
            } => {
                assert_eq!(config, PathBuf::from("./restplan.json"));
                assert_eq!(resource, "invoice");
                assert_eq!(query, "sum=amount");
                assert!(!execute);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_resource_is_required_for_compile() {
        assert!(Cli::try_parse_from(["restplan", "compile"]).is_err());
    }
}
