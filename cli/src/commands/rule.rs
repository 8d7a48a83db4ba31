// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Rule management commands
//!
//! Commands: add, remove, enable, disable, list

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use gatekeeper_core::application::rule_update::{
    RuleUpdate, UpdateOperation, UpdateOutcome, UpdateTarget,
};
use gatekeeper_core::domain::assessment::OperationType;
use gatekeeper_core::domain::authorization::AuthorizationToken;
use gatekeeper_core::domain::requirement::Requirement;
use gatekeeper_core::domain::rule::Rule;

use crate::embedded::EmbeddedPolicy;

/// Which rules a command addresses. Exactly one selector may be given;
/// none means every rule.
#[derive(Args, Clone)]
pub struct TargetArgs {
    /// Code whose designated requirement is the target
    #[arg(long, value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// Requirement text
    #[arg(long, value_name = "REQUIREMENT")]
    pub requirement: Option<String>,

    /// Rule row id
    #[arg(long, value_name = "ID")]
    pub id: Option<i64>,

    /// Rule label
    #[arg(long, value_name = "LABEL")]
    pub label: Option<String>,

    /// Restrict to one operation type
    #[arg(long = "type")]
    pub operation: Option<OperationType>,
}

impl TargetArgs {
    fn target(&self) -> Result<UpdateTarget> {
        let given = [
            self.path.is_some(),
            self.requirement.is_some(),
            self.id.is_some(),
            self.label.is_some(),
        ]
        .iter()
        .filter(|g| **g)
        .count();
        if given > 1 {
            bail!("--path, --requirement, --id and --label are mutually exclusive");
        }

        Ok(if let Some(path) = &self.path {
            UpdateTarget::Path(path.clone())
        } else if let Some(text) = &self.requirement {
            UpdateTarget::Requirement(
                text.parse::<Requirement>()
                    .with_context(|| format!("Invalid requirement: {}", text))?,
            )
        } else if let Some(id) = self.id {
            UpdateTarget::RuleId(id)
        } else if let Some(label) = &self.label {
            UpdateTarget::Label(label.clone())
        } else {
            UpdateTarget::All
        })
    }
}

#[derive(Subcommand)]
pub enum RuleCommand {
    /// Add a rule for a path or requirement
    Add {
        #[command(flatten)]
        target: TargetArgs,

        /// Create a denying rule
        #[arg(long)]
        deny: bool,

        /// Rule priority (higher wins)
        #[arg(long)]
        priority: Option<f64>,

        /// Label reported as the assessment source
        #[arg(long = "rule-label", value_name = "LABEL")]
        rule_label: Option<String>,

        /// Expiry as an RFC 3339 timestamp
        #[arg(long, value_name = "TIMESTAMP")]
        expires: Option<DateTime<Utc>>,

        /// Free-form remarks
        #[arg(long)]
        remarks: Option<String>,

        #[arg(long, env = "GATEKEEPER_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Remove matching rules
    Remove {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long, env = "GATEKEEPER_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Enable matching rules
    Enable {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long, env = "GATEKEEPER_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Disable matching rules
    Disable {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long, env = "GATEKEEPER_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// List matching rules
    List {
        #[command(flatten)]
        target: TargetArgs,

        /// Print rules as JSON
        #[arg(long)]
        json: bool,

        #[arg(long, env = "GATEKEEPER_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

pub async fn handle_command(command: RuleCommand, config_path: Option<PathBuf>) -> Result<()> {
    let policy = EmbeddedPolicy::new(config_path).await?;

    let (update, token, json) = match command {
        RuleCommand::Add {
            target,
            deny,
            priority,
            rule_label,
            expires,
            remarks,
            token,
        } => {
            let mut update = RuleUpdate::new(UpdateOperation::Add, target.target()?);
            update.rule_type = target.operation;
            update.allow = !deny;
            update.priority = priority;
            update.label = rule_label;
            update.expires = expires;
            update.remarks = remarks;
            (update, token, false)
        }
        RuleCommand::Remove { target, token } => (simple(UpdateOperation::Remove, &target)?, token, false),
        RuleCommand::Enable { target, token } => (simple(UpdateOperation::Enable, &target)?, token, false),
        RuleCommand::Disable { target, token } => (simple(UpdateOperation::Disable, &target)?, token, false),
        RuleCommand::List { target, json, token } => (simple(UpdateOperation::Find, &target)?, token, json),
    };

    let token = token.map(AuthorizationToken::new);
    let operation = update.operation;
    let outcome = policy
        .service
        .update(update, token.as_ref())
        .await
        .with_context(|| format!("Rule {} failed", operation.as_str()))?;

    match outcome {
        UpdateOutcome::Found(rules) if json => println!("{}", serde_json::to_string_pretty(&rules)?),
        UpdateOutcome::Found(rules) => print_rules(&rules),
        UpdateOutcome::Changed(outcome) => {
            let mut message = format!("✓ {} rule(s) affected", outcome.affected);
            if let Some(id) = outcome.inserted_id {
                message = format!("✓ Rule {} added", id);
            }
            println!("{}", message.green());
        }
    }
    Ok(())
}

fn simple(operation: UpdateOperation, target: &TargetArgs) -> Result<RuleUpdate> {
    let mut update = RuleUpdate::new(operation, target.target()?);
    update.rule_type = target.operation;
    Ok(update)
}

fn print_rules(rules: &[Rule]) {
    if rules.is_empty() {
        println!("{}", "No rules found".yellow());
        return;
    }

    println!(
        "{:<6} {:<8} {:<6} {:<9} {:<10} {:<24} {}",
        "ID", "TYPE", "ALLOW", "PRIORITY", "STATE", "LABEL", "REQUIREMENT"
    );
    for rule in rules {
        let state = if rule.disabled {
            "disabled".dimmed()
        } else {
            "enabled".normal()
        };
        println!(
            "{:<6} {:<8} {:<6} {:<9} {:<10} {:<24} {}",
            rule.id,
            rule.operation,
            if rule.allow { "yes" } else { "no" },
            rule.priority,
            state,
            rule.label.as_deref().unwrap_or("-").bold(),
            rule.requirement
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> TargetArgs {
        TargetArgs {
            path: None,
            requirement: None,
            id: None,
            label: None,
            operation: None,
        }
    }

    #[test]
    fn test_target_defaults_to_all() {
        assert_eq!(args().target().unwrap(), UpdateTarget::All);
    }

    #[test]
    fn test_target_parses_requirement() {
        let mut target = args();
        target.requirement = Some("identifier \"com.example.tool\"".to_string());
        assert_eq!(
            target.target().unwrap(),
            UpdateTarget::Requirement(Requirement::Identifier("com.example.tool".to_string()))
        );
    }

    #[test]
    fn test_target_selectors_are_exclusive() {
        let mut target = args();
        target.id = Some(4);
        target.label = Some("Developer ID".to_string());
        assert!(target.target().is_err());
    }
}
