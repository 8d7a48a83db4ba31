// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Assessment Error Taxonomy
//!
//! | Class | Type | Surfaced |
//! |-------|------|----------|
//! | Policy deny | not an error, `verdict = false` | result dictionary |
//! | Validation | [`ValidationError`] | waiter of the evaluation task |
//! | Invalid argument | [`AssessmentError::InvalidArgument`] / [`AssessmentError::InvalidAttribute`] | synchronously |
//! | Best effort | logged and swallowed | never |
//!
//! Both error enums are `Clone`: one evaluation outcome is handed to every
//! caller attached to the task.

use thiserror::Error;

use crate::domain::repository::RepositoryError;
use crate::domain::requirement::RequirementError;

/// Failures reported by the signature-validation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("signature does not match the content of {0}")]
    Tampered(String),

    #[error("certificate revoked: {0}")]
    Revoked(String),

    #[error("notarization ticket revoked for {0}")]
    RevokedNotarization(String),

    #[error("certificate expired: {0}")]
    Expired(String),

    #[error("untrusted certificate chain: {0}")]
    Untrusted(String),

    #[error("malformed signature: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Tampered(_) => "validation.tampered",
            ValidationError::Revoked(_) => "validation.revoked",
            ValidationError::RevokedNotarization(_) => "validation.notarization_revoked",
            ValidationError::Expired(_) => "validation.expired",
            ValidationError::Untrusted(_) => "validation.untrusted",
            ValidationError::Malformed(_) => "validation.malformed",
            ValidationError::Io(_) => "validation.io",
        }
    }
}

impl From<std::io::Error> for ValidationError {
    fn from(err: std::io::Error) -> Self {
        ValidationError::Io(err.to_string())
    }
}

/// Public error type of the assessment API.
#[derive(Debug, Clone, Error)]
pub enum AssessmentError {
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("asynchronous assessment is not implemented")]
    Unimplemented,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("evaluation cancelled: no feedback listener agreed to proceed")]
    Cancelled,

    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("target {0} is not signed")]
    UnsignedTarget(String),

    #[error("rule operation rejected: {0}")]
    RuleRejected(String),

    #[error("invalid requirement: {0}")]
    Requirement(#[from] RequirementError),

    #[error("rule store error: {0}")]
    Repository(String),

    #[error("unknown control operation: {0}")]
    UnknownControl(String),

    #[error("remote assessment failed: {0}")]
    Remote(String),

    #[error("evaluation aborted: {0}")]
    Internal(String),
}

impl AssessmentError {
    /// Whether the global override switch may turn this failure into a
    /// synthetic denial. Revocation never qualifies.
    pub fn is_overridable(&self) -> bool {
        !matches!(
            self,
            AssessmentError::Validation(ValidationError::Revoked(_))
                | AssessmentError::Validation(ValidationError::RevokedNotarization(_))
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            AssessmentError::InvalidAttribute(_) => "assessment.invalid_attribute",
            AssessmentError::InvalidArgument(_) => "assessment.invalid_argument",
            AssessmentError::Unimplemented => "assessment.unimplemented",
            AssessmentError::Validation(e) => e.code(),
            AssessmentError::Cancelled => "assessment.cancelled",
            AssessmentError::AuthorizationDenied(_) => "assessment.authorization_denied",
            AssessmentError::UnsignedTarget(_) => "assessment.unsigned_target",
            AssessmentError::RuleRejected(_) => "assessment.rule_rejected",
            AssessmentError::Requirement(_) => "assessment.requirement",
            AssessmentError::Repository(_) => "assessment.repository",
            AssessmentError::UnknownControl(_) => "assessment.unknown_control",
            AssessmentError::Remote(_) => "assessment.remote",
            AssessmentError::Internal(_) => "assessment.internal",
        }
    }
}

impl From<RepositoryError> for AssessmentError {
    fn from(err: RepositoryError) -> Self {
        AssessmentError::Repository(err.to_string())
    }
}
