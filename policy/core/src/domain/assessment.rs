// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Assessment Requests
//!
//! The inputs of a single assessment: the operation being attempted, the
//! request flags, and the caller context (feedback listener, installer
//! signature, download risk category).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::AssessmentError;
use crate::domain::result::AssessmentResult;
use crate::domain::signature::PackageSignature;

/// Operation whose permission is being assessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationType {
    Execute,
    Install,
    OpenDocument,
}

impl OperationType {
    /// Stable numeric code, also the `type` column of the rule tables.
    pub fn code(self) -> i64 {
        match self {
            OperationType::Execute => 1,
            OperationType::Install => 2,
            OperationType::OpenDocument => 3,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, AssessmentError> {
        match code {
            1 => Ok(OperationType::Execute),
            2 => Ok(OperationType::Install),
            3 => Ok(OperationType::OpenDocument),
            other => Err(AssessmentError::InvalidAttribute(format!(
                "unknown operation type {}",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Execute => "execute",
            OperationType::Install => "install",
            OperationType::OpenDocument => "open",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = AssessmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "execute" | "exec" => Ok(OperationType::Execute),
            "install" => Ok(OperationType::Install),
            "open" | "open-document" | "opendocument" => Ok(OperationType::OpenDocument),
            other => Err(AssessmentError::InvalidAttribute(format!(
                "unknown operation type '{}'",
                other
            ))),
        }
    }
}

/// Request flags. Immutable once the request is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentFlags {
    /// Evaluate in this process instead of relaying to the daemon.
    pub direct: bool,
    /// Asynchronous assessment; always rejected.
    pub asynchronous: bool,
    /// Skip the object cache lookup.
    pub ignore_cache: bool,
    /// Do not record the outcome in the object cache.
    pub no_cache: bool,
    /// Never attach to an in-flight evaluation of the same object.
    pub ignore_active_assessments: bool,
    /// Defer the evaluation until the deferred trigger fires.
    pub low_priority: bool,
    /// Report the signing originator.
    pub request_origin: bool,
    /// Report the raw verdict even when the override switch is engaged.
    pub enforce: bool,
}

impl AssessmentFlags {
    pub fn direct() -> Self {
        Self {
            direct: true,
            ..Self::default()
        }
    }
}

/// Progress notification relayed to feedback listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackEvent {
    /// Full signature validation is about to begin.
    Progress {
        path: PathBuf,
        current: u64,
        total: u64,
    },
}

/// Receives progress events; returning `false` votes to stop the evaluation.
pub trait FeedbackListener: Send + Sync {
    fn on_feedback(&self, event: &FeedbackEvent) -> bool;
}

impl<F> FeedbackListener for F
where
    F: Fn(&FeedbackEvent) -> bool + Send + Sync,
{
    fn on_feedback(&self, event: &FeedbackEvent) -> bool {
        self(event)
    }
}

/// Download risk category supplied by the caller for document opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskCategory {
    Safe,
    Neutral,
    Unknown,
    MayContainUnsafeExecutable,
    UnsafeExecutable,
}

impl FromStr for RiskCategory {
    type Err = AssessmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safe" => Ok(RiskCategory::Safe),
            "neutral" => Ok(RiskCategory::Neutral),
            "unknown" => Ok(RiskCategory::Unknown),
            "may-contain-unsafe-executable" => Ok(RiskCategory::MayContainUnsafeExecutable),
            "unsafe-executable" => Ok(RiskCategory::UnsafeExecutable),
            other => Err(AssessmentError::InvalidArgument(format!(
                "unknown risk category '{}'",
                other
            ))),
        }
    }
}

/// Caller context of an assessment request.
#[derive(Clone, Default)]
pub struct AssessmentContext {
    /// Operation; `Execute` when absent.
    pub operation: Option<OperationType>,
    pub feedback: Option<Arc<dyn FeedbackListener>>,
    /// Installer signature already extracted by the caller.
    pub package_signature: Option<PackageSignature>,
    pub risk_category: Option<RiskCategory>,
    /// Whether the document carries a quarantine marker.
    pub quarantined: Option<bool>,
}

impl AssessmentContext {
    pub fn for_operation(operation: OperationType) -> Self {
        Self {
            operation: Some(operation),
            ..Self::default()
        }
    }

    pub fn operation(&self) -> OperationType {
        self.operation.unwrap_or(OperationType::Execute)
    }

    pub fn with_feedback(mut self, listener: Arc<dyn FeedbackListener>) -> Self {
        self.feedback = Some(listener);
        self
    }
}

impl fmt::Debug for AssessmentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssessmentContext")
            .field("operation", &self.operation)
            .field("feedback", &self.feedback.is_some())
            .field("package_signature", &self.package_signature)
            .field("risk_category", &self.risk_category)
            .field("quarantined", &self.quarantined)
            .finish()
    }
}

/// Immutable snapshot returned by `create_assessment`.
#[derive(Debug, Clone)]
pub struct Assessment {
    path: PathBuf,
    operation: OperationType,
    result: AssessmentResult,
    assessed_at: DateTime<Utc>,
}

impl Assessment {
    pub fn new(path: PathBuf, operation: OperationType, result: AssessmentResult) -> Self {
        Self {
            path,
            operation,
            result,
            assessed_at: Utc::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn operation(&self) -> OperationType {
        self.operation
    }

    /// Raw result as evaluated, before any override is applied.
    pub fn raw_result(&self) -> &AssessmentResult {
        &self.result
    }

    pub fn assessed_at(&self) -> DateTime<Utc> {
        self.assessed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_codes_round_trip() {
        for op in [OperationType::Execute, OperationType::Install, OperationType::OpenDocument] {
            assert_eq!(OperationType::from_code(op.code()).unwrap(), op);
        }
        assert!(matches!(
            OperationType::from_code(9),
            Err(AssessmentError::InvalidAttribute(_))
        ));
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!("exec".parse::<OperationType>().unwrap(), OperationType::Execute);
        assert_eq!("open".parse::<OperationType>().unwrap(), OperationType::OpenDocument);
        assert!("print".parse::<OperationType>().is_err());
    }

    #[test]
    fn test_closure_is_a_feedback_listener() {
        let listener: Arc<dyn FeedbackListener> = Arc::new(|_: &FeedbackEvent| true);
        let event = FeedbackEvent::Progress {
            path: PathBuf::from("/Applications/Demo.app"),
            current: 0,
            total: 1,
        };
        assert!(listener.on_feedback(&event));
    }
}
