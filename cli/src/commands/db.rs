// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Rule database maintenance
//!
//! Commands: upgrade, import-explicit-set, purge

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use gatekeeper_core::application::explicit_set::ExplicitSetOutcome;
use gatekeeper_core::domain::config::PolicyConfig;
use gatekeeper_core::domain::repository::RuleRepository;
use gatekeeper_core::infrastructure::db::Database;
use gatekeeper_core::infrastructure::migrations;

use crate::embedded::EmbeddedPolicy;

#[derive(Subcommand)]
pub enum DbCommand {
    /// Create or upgrade the rule database schema
    Upgrade,

    /// Import the explicit allow-list bundle now
    ImportExplicitSet,

    /// Drop expired rules and cached verdicts
    Purge,
}

pub async fn handle_command(command: DbCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        DbCommand::Upgrade => upgrade(config_path).await,
        DbCommand::ImportExplicitSet => import_explicit_set(config_path).await,
        DbCommand::Purge => purge(config_path).await,
    }
}

async fn upgrade(config_path: Option<PathBuf>) -> Result<()> {
    let config = PolicyConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let db = Database::open(&config.database.path, config.database.max_connections)
        .await
        .context("Failed to open rule database")?;

    let report = migrations::upgrade(&db).await;
    if report.skipped_read_only {
        bail!("{} is read-only", config.database.path.display());
    }
    for name in &report.applied {
        println!("{}", format!("✓ Applied {}", name).green());
    }
    for (name, error) in &report.failed {
        println!("{}", format!("✗ {}: {}", name, error).red());
    }
    if report.applied.is_empty() && report.failed.is_empty() {
        println!("{}", "Schema is up to date".dimmed());
    }
    if !report.failed.is_empty() {
        bail!("{} migration(s) failed", report.failed.len());
    }
    Ok(())
}

async fn import_explicit_set(config_path: Option<PathBuf>) -> Result<()> {
    let policy = EmbeddedPolicy::new(config_path).await?;
    match policy.service.refresh_explicit_set().await {
        Some(ExplicitSetOutcome::Installed { rules, signatures }) => println!(
            "{}",
            format!("✓ Installed {} rule(s) and {} signature(s)", rules, signatures).green()
        ),
        Some(ExplicitSetOutcome::Unchanged) => println!("{}", "Explicit set already installed".dimmed()),
        Some(ExplicitSetOutcome::RateLimited) => println!("{}", "Checked recently; skipped".yellow()),
        Some(ExplicitSetOutcome::Missing) => println!(
            "{}",
            format!("No bundle at {}", policy.config.explicit_set.auth_file.display()).yellow()
        ),
        None => bail!("Explicit set import failed; see log output"),
    }
    Ok(())
}

async fn purge(config_path: Option<PathBuf>) -> Result<()> {
    let policy = EmbeddedPolicy::new(config_path).await?;
    let now = chrono::Utc::now();
    let rules = policy
        .repo
        .purge_expired_authority(now)
        .await
        .context("Failed to purge expired rules")?;
    let objects = policy
        .repo
        .purge_expired_objects(now)
        .await
        .context("Failed to purge expired verdicts")?;
    println!(
        "{}",
        format!("✓ Purged {} rule(s) and {} cached verdict(s)", rules, objects).green()
    );
    Ok(())
}
