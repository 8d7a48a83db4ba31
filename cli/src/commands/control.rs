// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `gkctl control`: administrative operations on the assessment subsystem.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use gatekeeper_core::application::assessment_service::{
    ControlArgument, ControlOperation, ControlOutcome,
};
use gatekeeper_core::domain::assessment::OperationType;
use gatekeeper_core::domain::authorization::AuthorizationToken;
use gatekeeper_core::infrastructure::RejectionRecord;

use crate::embedded::EmbeddedPolicy;

#[derive(Args)]
pub struct ControlCommand {
    /// Operation, e.g. ui-status, ui-disable-devid, rearm-reset, migrate-legacy
    #[arg(value_name = "OPCODE")]
    pub opcode: ControlOperation,

    #[arg(long, env = "GATEKEEPER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Rejected object (ui-record-reject only)
    #[arg(long, value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// Operation of the rejected assessment (ui-record-reject only)
    #[arg(long = "type", default_value = "execute")]
    pub operation: OperationType,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

impl ControlCommand {
    fn argument(&self) -> Result<ControlArgument> {
        if self.opcode == ControlOperation::RecordReject {
            let path = self
                .path
                .clone()
                .context("ui-record-reject needs --path")?;
            return Ok(ControlArgument::Rejection(RejectionRecord {
                path,
                operation: self.operation,
                authority: None,
                error: None,
                rejected_at: chrono::Utc::now(),
            }));
        }
        Ok(match &self.token {
            Some(token) => ControlArgument::Token(AuthorizationToken::new(token.clone())),
            None => ControlArgument::None,
        })
    }
}

pub async fn execute(command: ControlCommand, config_path: Option<PathBuf>) -> Result<()> {
    let policy = EmbeddedPolicy::new(config_path).await?;
    let outcome = policy
        .service
        .control(command.opcode, command.argument()?)
        .await
        .with_context(|| format!("{} failed", command.opcode))?;

    if command.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        ControlOutcome::Done => println!("{}", format!("✓ {}", command.opcode).green()),
        ControlOutcome::Status { enabled } => {
            let state = if enabled {
                "enabled".green()
            } else {
                "disabled".red()
            };
            println!("{}: {}", command.opcode, state);
        }
        ControlOutcome::Rejection { record: None } => println!("{}", "No rejection recorded".yellow()),
        ControlOutcome::Rejection { record: Some(record) } => {
            println!("{} ({})", record.path.display(), record.operation);
            println!("  rejected at: {}", record.rejected_at);
            if let Some(authority) = record.authority {
                println!("  source: {}", authority);
            }
            if let Some(error) = record.error {
                println!("  error: {}", error);
            }
        }
        ControlOutcome::Rearm { status } => match (status.disabled_at, status.due_at) {
            (Some(disabled), Some(due)) => {
                println!("Disabled since {}, re-enabled after {}", disabled, due)
            }
            _ => println!("{}", "No rearm pending".dimmed()),
        },
        ControlOutcome::Migrated { rules } => {
            println!("{}", format!("✓ {} legacy rule(s) migrated", rules).green())
        }
    }
    Ok(())
}
