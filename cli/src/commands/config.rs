// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use gatekeeper_core::domain::config::PolicyConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default spelled out
    Generate {
        /// Output path (default: ./gatekeeper.yaml)
        #[arg(short, long, default_value = "./gatekeeper.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output } => generate(output),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = PolicyConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. GATEKEEPER_CONFIG_PATH: {}",
            std::env::var("GATEKEEPER_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./gatekeeper.yaml");
        println!("  4. ~/.gatekeeper/config.yaml");
        println!("  5. /etc/gatekeeper/config.yaml");
        println!();
    }

    println!("{}", "Rule Database:".bold());
    println!("  Path: {}", config.database.path.display());
    if let Some(legacy) = &config.database.legacy_path {
        println!("  Legacy: {}", legacy.display());
    }
    println!("  Max connections: {}", config.database.max_connections);
    println!();

    println!("{}", "Object Cache:".bold());
    println!("  Enabled: {}", config.cache.enabled);
    println!("  Negative hold: {:?}", config.cache.negative_hold);
    println!();

    println!("{}", "State Files:".bold());
    println!("  Preferences: {}", config.state.preferences.display());
    println!("  Last rejection: {}", config.state.last_rejection.display());
    println!("  Rearm: {} (after {:?})", config.state.rearm.display(), config.state.rearm_after);
    println!();

    println!("{}", "Scheduler:".bold());
    println!("  Poll interval: {:?}", config.scheduler.poll_interval);
    println!("  Require AC power: {}", config.scheduler.require_ac_power);
    println!();

    println!("{}", "Authorization:".bold());
    println!("  Allow root: {}", config.authorization.allow_root);
    println!("  Token digests: {}", config.authorization.token_digests.len());

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = PolicyConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf) -> Result<()> {
    PolicyConfig::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
