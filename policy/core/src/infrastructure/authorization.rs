// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Token Authorizer
//!
//! Accepts callers presenting a token whose SHA-256 digest is configured,
//! and optionally any process running with effective uid 0.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `Authorizer`

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::domain::authorization::{AuthorizationToken, Authorizer};
use crate::domain::config::AuthorizationConfig;
use crate::domain::errors::AssessmentError;

pub struct TokenAuthorizer {
    digests: Vec<[u8; 32]>,
    allow_root: bool,
}

impl TokenAuthorizer {
    pub fn new(allow_root: bool) -> Self {
        Self {
            digests: Vec::new(),
            allow_root,
        }
    }

    /// Entries that are not 64-character hex digests are skipped.
    pub fn from_config(config: &AuthorizationConfig) -> Self {
        let mut authorizer = Self::new(config.allow_root);
        for digest in &config.token_digests {
            match hex::decode(digest).ok().and_then(|b| <[u8; 32]>::try_from(b).ok()) {
                Some(bytes) => authorizer.digests.push(bytes),
                None => warn!("Ignoring malformed token digest in authorization config"),
            }
        }
        authorizer
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.digests.push(Sha256::digest(token.as_bytes()).into());
        self
    }

    fn is_root() -> bool {
        #[cfg(unix)]
        {
            // SAFETY: geteuid has no preconditions and cannot fail.
            unsafe { libc::geteuid() == 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    fn token_matches(&self, token: &AuthorizationToken) -> bool {
        let presented: [u8; 32] = Sha256::digest(token.expose().as_bytes()).into();
        // Compares against every entry.
        self.digests
            .iter()
            .fold(subtle::Choice::from(0u8), |acc, d| acc | d[..].ct_eq(&presented[..]))
            .into()
    }
}

impl Authorizer for TokenAuthorizer {
    fn authorize(
        &self,
        token: Option<&AuthorizationToken>,
        right: &str,
    ) -> Result<(), AssessmentError> {
        if let Some(token) = token {
            if self.token_matches(token) {
                debug!(right, "Authorized by token");
                return Ok(());
            }
        }
        if self.allow_root && Self::is_root() {
            debug!(right, "Authorized as root");
            return Ok(());
        }
        Err(AssessmentError::AuthorizationDenied(right.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::authorization::RIGHT_ASSESSMENT_UPDATE;

    #[test]
    fn test_token_authorization() {
        let authorizer = TokenAuthorizer::new(false).with_token("s3cret");
        assert!(authorizer
            .authorize(Some(&AuthorizationToken::new("s3cret")), RIGHT_ASSESSMENT_UPDATE)
            .is_ok());
        assert!(matches!(
            authorizer.authorize(Some(&AuthorizationToken::new("guess")), RIGHT_ASSESSMENT_UPDATE),
            Err(AssessmentError::AuthorizationDenied(_))
        ));
        assert!(authorizer.authorize(None, RIGHT_ASSESSMENT_UPDATE).is_err());
    }

    #[test]
    fn test_config_digests() {
        let digest = hex::encode(Sha256::digest(b"from-config"));
        let config = AuthorizationConfig {
            allow_root: false,
            token_digests: vec![digest, "junk".into()],
        };
        let authorizer = TokenAuthorizer::from_config(&config);
        assert!(authorizer
            .authorize(Some(&AuthorizationToken::new("from-config")), RIGHT_ASSESSMENT_UPDATE)
            .is_ok());
    }
}
