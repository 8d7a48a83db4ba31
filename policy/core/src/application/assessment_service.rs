// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Assessment Service
//!
//! Public request surface: create an assessment, read its result, update
//! rules, and run administrative control operations.
//!
//! The global override switch is applied when a result is read
//! (`copy_result`), never when it is evaluated or cached.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Entry point for assessment clients
//! - **Related:** `evaluation_manager.rs`, `rule_update.rs`

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::application::evaluation_manager::EvaluationManager;
use crate::application::explicit_set::{install_explicit_set, ExplicitSetOutcome};
use crate::application::policy_engine::PolicyEngine;
use crate::application::repository_factory::open_legacy_repository;
use crate::application::rule_update::{RuleUpdate, UpdateOperation, UpdateOutcome, UpdateTarget};
use crate::domain::assessment::{Assessment, AssessmentContext, AssessmentFlags, OperationType};
use crate::domain::authorization::AuthorizationToken;
use crate::domain::config::ExplicitSetConfig;
use crate::domain::errors::AssessmentError;
use crate::domain::events::PolicyEvent;
use crate::domain::repository::features;
use crate::domain::result::{labels, AssessmentResult, ErrorInfo};
use crate::domain::rule::{NewRule, RuleFlags, RuleMutation, RuleSelector};
use crate::domain::signature::DetachedSignatureStore;
use crate::infrastructure::metrics;
use crate::infrastructure::preferences::{RearmStatus, RejectionRecord};

/// Relay to a privileged assessment daemon for non-direct requests.
#[async_trait]
pub trait RemoteAssessor: Send + Sync {
    async fn assess(
        &self,
        path: &Path,
        flags: AssessmentFlags,
        context: &AssessmentContext,
    ) -> Result<AssessmentResult, AssessmentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOperation {
    Enable,
    Disable,
    Status,
    EnableDevId,
    DisableDevId,
    DevIdStatus,
    EnableNotarized,
    DisableNotarized,
    NotarizedStatus,
    RecordReject,
    RecallReject,
    RearmStatus,
    RearmReset,
    MigrateLegacy,
}

impl ControlOperation {
    pub const ALL: [ControlOperation; 14] = [
        ControlOperation::Enable,
        ControlOperation::Disable,
        ControlOperation::Status,
        ControlOperation::EnableDevId,
        ControlOperation::DisableDevId,
        ControlOperation::DevIdStatus,
        ControlOperation::EnableNotarized,
        ControlOperation::DisableNotarized,
        ControlOperation::NotarizedStatus,
        ControlOperation::RecordReject,
        ControlOperation::RecallReject,
        ControlOperation::RearmStatus,
        ControlOperation::RearmReset,
        ControlOperation::MigrateLegacy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ControlOperation::Enable => "ui-enable",
            ControlOperation::Disable => "ui-disable",
            ControlOperation::Status => "ui-status",
            ControlOperation::EnableDevId => "ui-enable-devid",
            ControlOperation::DisableDevId => "ui-disable-devid",
            ControlOperation::DevIdStatus => "ui-get-devid",
            ControlOperation::EnableNotarized => "ui-enable-notarized",
            ControlOperation::DisableNotarized => "ui-disable-notarized",
            ControlOperation::NotarizedStatus => "ui-get-notarized",
            ControlOperation::RecordReject => "ui-record-reject",
            ControlOperation::RecallReject => "ui-recall-reject",
            ControlOperation::RearmStatus => "rearm-status",
            ControlOperation::RearmReset => "rearm-reset",
            ControlOperation::MigrateLegacy => "migrate-legacy",
        }
    }

    fn requires_authorization(self) -> bool {
        !matches!(
            self,
            ControlOperation::Status
                | ControlOperation::DevIdStatus
                | ControlOperation::NotarizedStatus
                | ControlOperation::RecordReject
                | ControlOperation::RecallReject
                | ControlOperation::RearmStatus
        )
    }
}

impl fmt::Display for ControlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlOperation {
    type Err = AssessmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControlOperation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| AssessmentError::UnknownControl(s.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub enum ControlArgument {
    #[default]
    None,
    Token(AuthorizationToken),
    Rejection(RejectionRecord),
}

impl ControlArgument {
    fn token(&self) -> Option<&AuthorizationToken> {
        match self {
            ControlArgument::Token(token) => Some(token),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlOutcome {
    Done,
    Status { enabled: bool },
    Rejection { record: Option<RejectionRecord> },
    Rearm { status: RearmStatus },
    Migrated { rules: u64 },
}

pub struct AssessmentService {
    manager: Arc<EvaluationManager>,
    engine: Arc<PolicyEngine>,
    remote: Option<Arc<dyn RemoteAssessor>>,
    explicit_set: Option<(ExplicitSetConfig, Arc<dyn DetachedSignatureStore>)>,
    legacy_path: Option<PathBuf>,
}

impl AssessmentService {
    pub fn new(manager: Arc<EvaluationManager>) -> Self {
        let engine = manager.engine().clone();
        Self {
            manager,
            engine,
            remote: None,
            explicit_set: None,
            legacy_path: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteAssessor>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_explicit_set(
        mut self,
        config: ExplicitSetConfig,
        store: Arc<dyn DetachedSignatureStore>,
    ) -> Self {
        self.explicit_set = Some((config, store));
        self
    }

    pub fn with_legacy_database(mut self, path: PathBuf) -> Self {
        self.legacy_path = Some(path);
        self
    }

    pub fn manager(&self) -> &Arc<EvaluationManager> {
        &self.manager
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.engine
    }

    /// Assesses `path` and returns the raw, un-overridden outcome.
    pub async fn create_assessment(
        &self,
        path: &Path,
        flags: AssessmentFlags,
        context: AssessmentContext,
    ) -> Result<Assessment, AssessmentError> {
        if flags.asynchronous {
            return Err(AssessmentError::Unimplemented);
        }
        if path.as_os_str().is_empty() {
            return Err(AssessmentError::InvalidArgument("empty path".to_string()));
        }
        if !path.exists() {
            return Err(AssessmentError::InvalidArgument(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let operation = context.operation();

        self.refresh_explicit_set().await;

        let outcome = match (&self.remote, flags.direct) {
            (Some(remote), false) => remote.assess(path, flags, &context).await,
            _ => self.manager.evaluate(path, operation, flags, context).await,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) if e.is_overridable() && self.engine.preferences().overrides_active() => {
                warn!(path = %path.display(), error = %e, "Assessment failed while overrides are active");
                AssessmentResult {
                    verdict: Some(false),
                    error: Some(ErrorInfo::from(&e)),
                    ..AssessmentResult::default()
                }
            }
            Err(e) => {
                self.publish_completed(path, &AssessmentResult::default(), operation, Some(&e));
                metrics::observe_assessment(operation, "error");
                return Err(e);
            }
        };

        if !result.is_allowed() {
            self.engine.record_failure(path, operation, &result);
        }
        self.publish_completed(path, &result, operation, None);
        metrics::observe_assessment(operation, if result.is_allowed() { "allow" } else { "deny" });
        info!(
            path = %path.display(),
            operation = %operation,
            allowed = result.is_allowed(),
            authority = ?result.authority.source,
            cached = result.authority.cached,
            "Assessment completed"
        );
        Ok(Assessment::new(path.to_path_buf(), operation, result))
    }

    /// Result as the caller should see it. A denial is reported as an
    /// allowance while overrides are active, unless `enforce` is set.
    pub fn copy_result(&self, assessment: &Assessment, flags: AssessmentFlags) -> AssessmentResult {
        let mut result = assessment.raw_result().clone();
        if !flags.enforce && self.engine.preferences().overrides_active() {
            result.apply_override(labels::OVERRIDE_SECURITY_DISABLED);
        }
        result
    }

    pub async fn update(
        &self,
        update: RuleUpdate,
        token: Option<&AuthorizationToken>,
    ) -> Result<UpdateOutcome, AssessmentError> {
        self.engine.update(update, token).await
    }

    pub async fn control(
        &self,
        operation: ControlOperation,
        argument: ControlArgument,
    ) -> Result<ControlOutcome, AssessmentError> {
        let token = argument.token();
        if operation.requires_authorization() {
            self.engine.authorize(token)?;
        }
        let preferences = self.engine.preferences();
        let now = self.engine.now();
        debug!(control = %operation, "Control operation");

        match operation {
            ControlOperation::Enable | ControlOperation::Disable => {
                let enabled = operation == ControlOperation::Enable;
                preferences
                    .set_assessments_enabled(enabled, now)
                    .map_err(|e| AssessmentError::Internal(e.to_string()))?;
                self.engine.event_bus().publish(PolicyEvent::AssessmentsToggled {
                    enabled,
                    toggled_at: now,
                });
                Ok(ControlOutcome::Done)
            }
            ControlOperation::Status => {
                if let Err(e) = preferences.check_rearm(now) {
                    warn!(error = %e, "Rearm check failed");
                }
                Ok(ControlOutcome::Status {
                    enabled: preferences.assessments_enabled(),
                })
            }
            ControlOperation::EnableDevId => self.toggle_label(labels::DEVELOPER_ID, true, token).await,
            ControlOperation::DisableDevId => self.toggle_label(labels::DEVELOPER_ID, false, token).await,
            ControlOperation::DevIdStatus => Ok(ControlOutcome::Status {
                enabled: self.engine.label_enabled(labels::DEVELOPER_ID).await?,
            }),
            ControlOperation::EnableNotarized => {
                self.toggle_label(labels::NOTARIZED_DEVELOPER_ID, true, token).await
            }
            ControlOperation::DisableNotarized => {
                self.toggle_label(labels::NOTARIZED_DEVELOPER_ID, false, token).await
            }
            ControlOperation::NotarizedStatus => Ok(ControlOutcome::Status {
                enabled: self.engine.label_enabled(labels::NOTARIZED_DEVELOPER_ID).await?,
            }),
            ControlOperation::RecordReject => {
                let ControlArgument::Rejection(record) = argument else {
                    return Err(AssessmentError::InvalidArgument(
                        "ui-record-reject needs a rejection record".to_string(),
                    ));
                };
                if let Err(e) = preferences.record_rejection(&record) {
                    warn!(error = %e, "Failed to record rejection");
                }
                Ok(ControlOutcome::Done)
            }
            ControlOperation::RecallReject => Ok(ControlOutcome::Rejection {
                record: preferences
                    .last_rejection()
                    .map_err(|e| AssessmentError::Internal(e.to_string()))?,
            }),
            ControlOperation::RearmStatus => Ok(ControlOutcome::Rearm {
                status: preferences
                    .rearm_status()
                    .map_err(|e| AssessmentError::Internal(e.to_string()))?,
            }),
            ControlOperation::RearmReset => {
                preferences
                    .reset_rearm(now)
                    .map_err(|e| AssessmentError::Internal(e.to_string()))?;
                Ok(ControlOutcome::Rearm {
                    status: preferences
                        .rearm_status()
                        .map_err(|e| AssessmentError::Internal(e.to_string()))?,
                })
            }
            ControlOperation::MigrateLegacy => Ok(ControlOutcome::Migrated {
                rules: self.migrate_legacy().await?,
            }),
        }
    }

    async fn toggle_label(
        &self,
        label: &str,
        enable: bool,
        token: Option<&AuthorizationToken>,
    ) -> Result<ControlOutcome, AssessmentError> {
        let operation = if enable {
            UpdateOperation::Enable
        } else {
            UpdateOperation::Disable
        };
        self.engine
            .update(RuleUpdate::new(operation, UpdateTarget::Label(label.to_string())), token)
            .await?;
        Ok(ControlOutcome::Done)
    }

    /// Copies user rules from the legacy database once.
    pub async fn migrate_legacy(&self) -> Result<u64, AssessmentError> {
        let repo = self.engine.repository();
        if repo.feature(features::LEGACY_MIGRATED).await?.is_some() {
            debug!("Legacy rules already migrated");
            return Ok(0);
        }
        let Some(path) = &self.legacy_path else {
            return Ok(0);
        };
        let Some(legacy) = open_legacy_repository(path).await else {
            return Ok(0);
        };

        let now = self.engine.now();
        let rules = legacy.rules(&RuleSelector::all()).await?;
        let mut migrated = 0;
        for rule in rules
            .into_iter()
            .filter(|r| !r.is_default() && !r.flags.contains(RuleFlags::WHITELIST))
        {
            let new_rule = NewRule {
                operation: rule.operation,
                requirement: rule.requirement,
                allow: rule.allow,
                disabled: rule.disabled,
                expires: rule.expires,
                priority: rule.priority,
                label: rule.label,
                flags: rule.flags,
                remarks: rule.remarks,
            };
            match repo.apply(&RuleMutation::Add(new_rule), now).await {
                Ok(_) => migrated += 1,
                Err(e) => warn!(rule_id = rule.id, error = %e, "Failed to migrate legacy rule"),
            }
        }
        repo.set_feature(features::LEGACY_MIGRATED, &now.to_rfc3339())
            .await?;
        if migrated > 0 {
            self.engine.event_bus().publish(PolicyEvent::RulesChanged {
                operation: "migrate".to_string(),
                affected: migrated,
                changed_at: now,
            });
        }
        info!(path = %path.display(), migrated, "Legacy rules migrated");
        Ok(migrated)
    }

    /// Best-effort explicit set import; failures are logged.
    pub async fn refresh_explicit_set(&self) -> Option<ExplicitSetOutcome> {
        let (config, store) = self.explicit_set.as_ref()?;
        let repo = self.engine.repository();
        if !repo.is_writable() {
            return None;
        }
        match install_explicit_set(repo.as_ref(), store.as_ref(), config, self.engine.now()).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "Explicit set import failed");
                None
            }
        }
    }

    fn publish_completed(
        &self,
        path: &Path,
        result: &AssessmentResult,
        operation: OperationType,
        error: Option<&AssessmentError>,
    ) {
        self.engine.event_bus().publish(PolicyEvent::AssessmentCompleted {
            path: path.to_path_buf(),
            operation,
            allowed: result.is_allowed(),
            authority: result.authority.source.clone(),
            cached: result.authority.cached,
            error: error
                .map(|e| e.to_string())
                .or_else(|| result.error.as_ref().map(|e| e.message.clone())),
            completed_at: self.engine.now(),
        });
    }
}
