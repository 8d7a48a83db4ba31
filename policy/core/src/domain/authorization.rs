// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Authorization contract for rule updates and privileged control operations.

use std::fmt;

use crate::domain::errors::AssessmentError;

/// Right required to mutate the rule store.
pub const RIGHT_ASSESSMENT_UPDATE: &str = "com.apple.security.assessment.update";

/// Bearer token supplied by the caller of an update.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationToken(String);

impl AuthorizationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthorizationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthorizationToken(***)")
    }
}

pub trait Authorizer: Send + Sync {
    /// Fails with [`AssessmentError::AuthorizationDenied`] unless the caller
    /// holds `right`. A missing token may still succeed (e.g. for root).
    fn authorize(&self, token: Option<&AuthorizationToken>, right: &str)
        -> Result<(), AssessmentError>;
}
