// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS Reflexion CLI
//!
//! The `reflexion` binary is the operator surface of the failure memory.
//! It opens the same store the Agent Host writes to and lets an operator
//! inspect and override what the engine remembers.
//!
//! ## Commands
//!
//! - `reflexion check|record|clear|ignore` - Advisory operations for one tool call
//! - `reflexion sweep|stats|list` - Store maintenance and introspection
//! - `reflexion config show|validate` - Configuration management
//!
//! Tool parameters are passed as JSON (`--params '{"path":"missing.py"}'`).
//! The environment snapshot is taken from the current process unless
//! overridden with `--cwd`, `--platform`, `--runtime-version` and `--file`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

use commands::{CallArgs, ConfigCommand};

/// AEGIS Reflexion - Failure memory for tool execution
#[derive(Parser)]
#[command(name = "reflexion")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "REFLEXION_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "REFLEXION_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask for an advisory before running a tool call
    Check {
        #[command(flatten)]
        call: CallArgs,

        /// Print the advisory as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a failed tool call
    Record {
        #[command(flatten)]
        call: CallArgs,

        /// Error message produced by the tool
        #[arg(short, long)]
        error: String,
    },

    /// Mark pending failures of a tool call as resolved
    Clear {
        #[command(flatten)]
        call: CallArgs,

        /// Resolve the call in every environment, not only the current one
        #[arg(long)]
        all_envs: bool,
    },

    /// Mark pending failures of a tool call as ignored
    Ignore {
        #[command(flatten)]
        call: CallArgs,

        /// Ignore the call in every environment, not only the current one
        #[arg(long)]
        all_envs: bool,
    },

    /// Delete expired failure records
    Sweep,

    /// Show failure store statistics
    Stats {
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the most recently updated failure records
    List {
        /// Maximum number of records
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level)?;

    // Only `check` reports through the exit status.
    match cli.command {
        Commands::Check { call, json } => {
            let status = commands::advisory::check(call, json, cli.config).await?;
            return Ok(ExitCode::from(status));
        }
        Commands::Record { call, error } => {
            commands::advisory::record(call, &error, cli.config).await?
        }
        Commands::Clear { call, all_envs } => {
            commands::advisory::clear(call, all_envs, cli.config).await?
        }
        Commands::Ignore { call, all_envs } => {
            commands::advisory::ignore(call, all_envs, cli.config).await?
        }
        Commands::Sweep => commands::store::sweep(cli.config).await?,
        Commands::Stats { json } => commands::store::stats(json, cli.config).await?,
        Commands::List { limit, json } => commands::store::list(limit, json, cli.config).await?,
        Commands::Config { command } => {
            commands::config::handle_command(command, cli.config).await?
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check() {
        let cli = Cli::try_parse_from([
            "reflexion",
            "check",
            "file_read",
            "--params",
            r#"{"path":"missing.py"}"#,
            "--cwd",
            "/work",
            "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Check { call, json } => {
                assert!(json);
                assert_eq!(call.tool, "file_read");
                assert_eq!(call.env.cwd, Some(PathBuf::from("/work")));
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn test_record_requires_error() {
        assert!(Cli::try_parse_from(["reflexion", "record", "file_read"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["reflexion", "stats", "--config", "/tmp/reflexion.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/reflexion.yaml")));
    }
}
