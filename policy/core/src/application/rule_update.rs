// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Rule Updates
//!
//! Authorized add / remove / enable / disable / find over the authority
//! table, plus best-effort recording of rejected assessments.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Rule mutation use case on `PolicyEngine`

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::application::policy_engine::PolicyEngine;
use crate::domain::assessment::OperationType;
use crate::domain::authorization::{AuthorizationToken, RIGHT_ASSESSMENT_UPDATE};
use crate::domain::errors::AssessmentError;
use crate::domain::events::PolicyEvent;
use crate::domain::repository::RepositoryError;
use crate::domain::requirement::Requirement;
use crate::domain::result::AssessmentResult;
use crate::domain::rule::{
    MutationOutcome, NewRule, Rule, RuleFlags, RuleMatch, RuleMutation, RuleSelector,
};
use crate::infrastructure::preferences::RejectionRecord;

/// What an update addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateTarget {
    /// Resolved to the designated requirement of the code at this path.
    Path(PathBuf),
    Requirement(Requirement),
    RuleId(i64),
    Label(String),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperation {
    Add,
    Remove,
    Enable,
    Disable,
    Find,
}

impl UpdateOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateOperation::Add => "add",
            UpdateOperation::Remove => "remove",
            UpdateOperation::Enable => "enable",
            UpdateOperation::Disable => "disable",
            UpdateOperation::Find => "find",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleUpdate {
    pub operation: UpdateOperation,
    pub target: UpdateTarget,
    /// Restricts the target to one operation type; `Add` defaults to execute.
    pub rule_type: Option<OperationType>,
    pub allow: bool,
    pub priority: Option<f64>,
    pub label: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
}

impl RuleUpdate {
    pub fn new(operation: UpdateOperation, target: UpdateTarget) -> Self {
        Self {
            operation,
            target,
            rule_type: None,
            allow: true,
            priority: None,
            label: None,
            expires: None,
            remarks: None,
        }
    }

    pub fn with_type(mut self, rule_type: OperationType) -> Self {
        self.rule_type = Some(rule_type);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }
}

#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    Changed(MutationOutcome),
    Found(Vec<Rule>),
}

fn rejection(err: RepositoryError) -> AssessmentError {
    match err {
        RepositoryError::Rejected(reason) => AssessmentError::RuleRejected(reason),
        RepositoryError::NotFound(what) => AssessmentError::RuleRejected(format!("no rule matches {}", what)),
        other => other.into(),
    }
}

impl PolicyEngine {
    /// Checks the caller may modify assessment policy.
    pub fn authorize(&self, token: Option<&AuthorizationToken>) -> Result<(), AssessmentError> {
        self.authorizer.authorize(token, RIGHT_ASSESSMENT_UPDATE)
    }

    pub async fn update(
        &self,
        update: RuleUpdate,
        token: Option<&AuthorizationToken>,
    ) -> Result<UpdateOutcome, AssessmentError> {
        self.authorize(token)?;

        let matching = self.resolve_target(&update.target, update.operation).await?;
        let selector = RuleSelector::new(matching.clone(), update.rule_type);

        let mutation = match update.operation {
            UpdateOperation::Find => {
                let rules = self.repo.rules(&selector).await?;
                return Ok(UpdateOutcome::Found(rules));
            }
            UpdateOperation::Add => {
                let RuleMatch::Requirement(requirement) = matching else {
                    return Err(AssessmentError::InvalidArgument(
                        "a rule can only be added for a path or requirement".to_string(),
                    ));
                };
                RuleMutation::Add(NewRule {
                    operation: update.rule_type.unwrap_or(OperationType::Execute),
                    requirement,
                    allow: update.allow,
                    disabled: false,
                    expires: update.expires,
                    priority: update.priority.unwrap_or(0.0),
                    label: update.label.clone(),
                    flags: RuleFlags::NONE,
                    remarks: update.remarks.clone(),
                })
            }
            UpdateOperation::Remove => RuleMutation::Remove(selector),
            UpdateOperation::Enable => RuleMutation::Enable(selector),
            UpdateOperation::Disable => RuleMutation::Disable(selector),
        };

        let now = self.clock.now();
        let outcome = self.repo.apply(&mutation, now).await.map_err(rejection)?;
        info!(
            operation = mutation.name(),
            affected = outcome.affected,
            inserted_id = ?outcome.inserted_id,
            "Authority table updated"
        );
        self.event_bus.publish(PolicyEvent::RulesChanged {
            operation: mutation.name().to_string(),
            affected: outcome.affected,
            changed_at: now,
        });
        Ok(UpdateOutcome::Changed(outcome))
    }

    async fn resolve_target(
        &self,
        target: &UpdateTarget,
        operation: UpdateOperation,
    ) -> Result<RuleMatch, AssessmentError> {
        Ok(match target {
            UpdateTarget::Path(path) => {
                RuleMatch::Requirement(self.designated_requirement(path, operation).await?)
            }
            UpdateTarget::Requirement(requirement) => RuleMatch::Requirement(requirement.clone()),
            UpdateTarget::RuleId(id) => RuleMatch::Id(*id),
            UpdateTarget::Label(label) => RuleMatch::Label(label.clone()),
            UpdateTarget::All => RuleMatch::All,
        })
    }

    /// Unsigned code is ad-hoc signed only when a rule is being added.
    async fn designated_requirement(
        &self,
        path: &Path,
        operation: UpdateOperation,
    ) -> Result<Requirement, AssessmentError> {
        if let Some(signature) = self.validator.static_signature(path).await? {
            return Ok(signature.designated_requirement());
        }
        if operation != UpdateOperation::Add {
            return Err(AssessmentError::UnsignedTarget(path.display().to_string()));
        }
        let signature = self.validator.sign_adhoc(path).await?;
        info!(path = %path.display(), cdhash = %signature.cdhash, "Ad-hoc signed rule target");
        Ok(signature.designated_requirement())
    }

    /// Whether any rule carrying `label` is enabled.
    pub async fn label_enabled(&self, label: &str) -> Result<bool, AssessmentError> {
        let rules = self.repo.rules(&RuleSelector::label(label)).await?;
        Ok(rules.iter().any(|r| !r.disabled))
    }

    /// Persists the most recent denial for later recall. Never fails.
    pub fn record_failure(&self, path: &Path, operation: OperationType, result: &AssessmentResult) {
        let record = RejectionRecord {
            path: path.to_path_buf(),
            operation,
            authority: result.authority.source.clone(),
            error: result.error.as_ref().map(|e| e.message.clone()),
            rejected_at: self.clock.now(),
        };
        if let Err(e) = self.preferences.record_rejection(&record) {
            warn!(path = %path.display(), error = %e, "Failed to record rejection");
        }
    }
}
