// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Result Dictionary
//!
//! Output of one evaluation, built incrementally by the policy engine and
//! the evaluation task, owned by the caller once returned.

use serde::{Deserialize, Serialize};

use crate::domain::errors::AssessmentError;

/// Authority labels used when no rule row is cited.
pub mod labels {
    pub const NO_MATCHING_RULE: &str = "No Matching Rule";
    pub const NO_USABLE_SIGNATURE: &str = "no usable signature";
    pub const UNSIGNED_CODE: &str = "Unsigned Code";
    pub const INSUFFICIENT_CONTEXT: &str = "Insufficient Context";
    pub const NOTARIZED_UNSIGNED: &str = "Notarized Unsigned Code";
    pub const NOTARIZATION_REVOKED: &str = "Notarization Revoked";
    pub const XPROTECT: &str = "_XProtect";
    pub const UNSAFE_EXECUTABLE: &str = "Unsafe Executable";
    pub const NO_QUARANTINE: &str = "No Quarantine";
    pub const EXPLICIT_SET: &str = "GKE";

    pub const APPLE_SYSTEM: &str = "Apple System";
    pub const MAC_APP_STORE: &str = "Mac App Store";
    pub const DEVELOPER_ID: &str = "Developer ID";
    pub const NOTARIZED_DEVELOPER_ID: &str = "Notarized Developer ID";
    pub const APPLE_INSTALLER: &str = "Apple Installer";

    /// Override reason recorded when assessments are globally disabled.
    pub const OVERRIDE_SECURITY_DISABLED: &str = "security disabled";
}

/// Which authority produced the verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorityInfo {
    /// Rule label or one of the fixed [`labels`].
    pub source: Option<String>,
    /// Row id of the deciding rule, when a rule decided.
    pub row_id: Option<i64>,
    /// Set when `copy_result` replaced a denial.
    pub override_reason: Option<String>,
    /// Verdict before the override was applied.
    pub original_verdict: Option<bool>,
    /// The verdict came from the object cache.
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl From<&AssessmentError> for ErrorInfo {
    fn from(err: &AssessmentError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    /// `None` until an evaluation decides.
    pub verdict: Option<bool>,
    pub authority: AuthorityInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub originator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl AssessmentResult {
    pub fn is_allowed(&self) -> bool {
        self.verdict.unwrap_or(false)
    }

    /// Records a verdict citing a fixed label.
    pub fn decide(&mut self, allow: bool, source: &str) {
        self.verdict = Some(allow);
        self.authority.source = Some(source.to_string());
        self.authority.row_id = None;
    }

    /// Records a verdict citing a rule row.
    pub fn decide_by_rule(&mut self, allow: bool, row_id: i64, label: Option<&str>) {
        self.verdict = Some(allow);
        self.authority.row_id = Some(row_id);
        self.authority.source = label.map(str::to_string);
    }

    /// Copies every field `other` has set into `self`.
    pub fn merge_from(&mut self, other: &AssessmentResult) {
        if other.verdict.is_some() {
            self.verdict = other.verdict;
        }
        if other.authority.source.is_some() {
            self.authority.source = other.authority.source.clone();
        }
        if other.authority.row_id.is_some() {
            self.authority.row_id = other.authority.row_id;
        }
        if other.authority.override_reason.is_some() {
            self.authority.override_reason = other.authority.override_reason.clone();
        }
        if other.authority.original_verdict.is_some() {
            self.authority.original_verdict = other.authority.original_verdict;
        }
        self.authority.cached |= other.authority.cached;
        if other.originator.is_some() {
            self.originator = other.originator.clone();
        }
        if other.error.is_some() {
            self.error = other.error.clone();
        }
    }

    /// Replaces a denial with an allowance, keeping the original verdict.
    pub fn apply_override(&mut self, reason: &str) {
        if self.is_allowed() {
            return;
        }
        self.authority.original_verdict = Some(self.verdict.unwrap_or(false));
        self.authority.override_reason = Some(reason.to_string());
        self.verdict = Some(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut caller = AssessmentResult {
            originator: Some("Developer ID Application: Example".into()),
            ..AssessmentResult::default()
        };
        let mut evaluated = AssessmentResult::default();
        evaluated.decide_by_rule(true, 7, Some("Developer ID"));

        caller.merge_from(&evaluated);
        assert_eq!(caller.verdict, Some(true));
        assert_eq!(caller.authority.row_id, Some(7));
        assert_eq!(caller.originator.as_deref(), Some("Developer ID Application: Example"));
    }

    #[test]
    fn test_override_records_original_verdict() {
        let mut result = AssessmentResult::default();
        result.decide(false, labels::NO_MATCHING_RULE);
        result.apply_override(labels::OVERRIDE_SECURITY_DISABLED);

        assert_eq!(result.verdict, Some(true));
        assert_eq!(result.authority.original_verdict, Some(false));
        assert_eq!(result.authority.source.as_deref(), Some(labels::NO_MATCHING_RULE));
    }

    #[test]
    fn test_override_leaves_allowance_untouched() {
        let mut result = AssessmentResult::default();
        result.decide(true, labels::APPLE_SYSTEM);
        result.apply_override(labels::OVERRIDE_SECURITY_DISABLED);
        assert!(result.authority.override_reason.is_none());
    }
}
