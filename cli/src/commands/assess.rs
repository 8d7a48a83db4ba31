// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `gkctl assess`: run one assessment and print the result.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use gatekeeper_core::domain::assessment::{
    AssessmentContext, AssessmentFlags, OperationType, RiskCategory,
};
use gatekeeper_core::domain::result::AssessmentResult;

use crate::embedded::EmbeddedPolicy;

#[derive(Args)]
pub struct AssessCommand {
    /// Object to assess
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Operation: execute, install or open
    #[arg(long = "type", default_value = "execute")]
    pub operation: OperationType,

    /// Skip the object cache lookup
    #[arg(long)]
    pub ignore_cache: bool,

    /// Do not record the outcome in the object cache
    #[arg(long)]
    pub no_cache: bool,

    /// Start only when the deferred trigger fires
    #[arg(long)]
    pub low_priority: bool,

    /// Report the signing originator
    #[arg(long)]
    pub origin: bool,

    /// Report the raw verdict even when assessments are disabled
    #[arg(long)]
    pub enforce: bool,

    /// Document carries a quarantine marker (open only)
    #[arg(long)]
    pub quarantined: bool,

    /// Malware scanner risk category (open only)
    #[arg(long, value_name = "CATEGORY")]
    pub risk: Option<RiskCategory>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl AssessCommand {
    fn flags(&self) -> AssessmentFlags {
        AssessmentFlags {
            direct: true,
            ignore_cache: self.ignore_cache,
            no_cache: self.no_cache,
            low_priority: self.low_priority,
            request_origin: self.origin,
            enforce: self.enforce,
            ..AssessmentFlags::default()
        }
    }

    fn context(&self) -> AssessmentContext {
        let mut context = AssessmentContext::for_operation(self.operation);
        context.quarantined = Some(self.quarantined);
        context.risk_category = self.risk;
        context
    }
}

pub async fn execute(command: AssessCommand, config_path: Option<PathBuf>) -> Result<()> {
    let policy = EmbeddedPolicy::new(config_path).await?;
    let flags = command.flags();

    let assessment = policy
        .service
        .create_assessment(&command.path, flags, command.context())
        .await
        .with_context(|| format!("Assessment of {} failed", command.path.display()))?;
    let result = policy.service.copy_result(&assessment, flags);

    if command.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&command.path, command.operation, &result);
    }

    if !result.is_allowed() {
        std::process::exit(3);
    }
    Ok(())
}

fn print_result(path: &std::path::Path, operation: OperationType, result: &AssessmentResult) {
    let verdict = if result.is_allowed() {
        "accepted".green().bold()
    } else {
        "rejected".red().bold()
    };
    println!("{}: {} ({})", path.display(), verdict, operation);

    if let Some(source) = &result.authority.source {
        println!("  source: {}", source);
    }
    if let Some(row_id) = result.authority.row_id {
        println!("  rule: {}", row_id);
    }
    if result.authority.cached {
        println!("  {}", "(cached)".dimmed());
    }
    if let Some(reason) = &result.authority.override_reason {
        println!("  override: {}", reason.yellow());
    }
    if let Some(origin) = &result.originator {
        println!("  origin: {}", origin);
    }
    if let Some(error) = &result.error {
        println!("  error: {} ({})", error.message, error.code);
    }
}
