// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # gkctl
//!
//! Command line front end for the gatekeeper assessment policy engine.
//! Every command builds the policy services in-process from the discovered
//! configuration.
//!
//! ## Commands
//!
//! - `gkctl assess <path>` - Assess an object for execute, install or open
//! - `gkctl rule add|remove|enable|disable|list` - Manage the authority table
//! - `gkctl control <opcode>` - Master switch, Developer ID toggles, rearm, legacy migration
//! - `gkctl db upgrade|import-explicit-set|purge` - Rule database maintenance
//! - `gkctl config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use gatekeeper_cli::commands::{self, AssessCommand, ConfigCommand, ControlCommand, DbCommand, RuleCommand};

/// Gatekeeper assessment policy control
#[derive(Parser)]
#[command(name = "gkctl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "GATEKEEPER_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "GATEKEEPER_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assess an object against system policy
    #[command(name = "assess")]
    Assess(AssessCommand),

    /// Rule management
    #[command(name = "rule")]
    Rule {
        #[command(subcommand)]
        command: RuleCommand,
    },

    /// Administrative control operations
    #[command(name = "control")]
    Control(ControlCommand),

    /// Rule database maintenance
    #[command(name = "db")]
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Assess(command) => commands::assess::execute(command, cli.config).await,
        Commands::Rule { command } => commands::rule::handle_command(command, cli.config).await,
        Commands::Control(command) => commands::control::execute(command, cli.config).await,
        Commands::Db { command } => commands::db::handle_command(command, cli.config).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}
