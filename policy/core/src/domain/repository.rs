// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Rule Repository Interface
//!
//! Persistence contract for the authority table and the object cache. The
//! evaluation algorithm only sees this trait, so it can be exercised against
//! the in-memory implementation as well as the SQLite store.
//!
//! | Trait | Tables | Implementations |
//! |-------|--------|----------------|
//! | `RuleRepository` | `authority`, `object`, `feature` | `SqliteRuleStore`, `InMemoryRuleRepository` |
//!
//! Every read that depends on expiry takes `now` explicitly so tests can
//! drive time with a manual clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::assessment::OperationType;
use crate::domain::rule::{
    CachedObjectVerdict, MutationOutcome, NewRule, ObjectOutcome, Rule, RuleMutation, RuleSelector,
};
use crate::domain::signature::ContentHash;

#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Whether mutations can be attempted at all.
    fn is_writable(&self) -> bool;

    /// Unexpired rules for `operation`, highest priority first. Disabled
    /// rules are included so the caller can cite them.
    async fn find_matching_rules(
        &self,
        operation: OperationType,
        now: DateTime<Utc>,
    ) -> Result<Vec<Rule>, RepositoryError>;

    /// Unexpired cache row for `(operation, hash)` whose authority, if any,
    /// is still enabled.
    async fn cached_verdict(
        &self,
        operation: OperationType,
        hash: &ContentHash,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedObjectVerdict>, RepositoryError>;

    /// Inserts or replaces the cache row for the outcome's object.
    async fn record_outcome(&self, outcome: ObjectOutcome) -> Result<(), RepositoryError>;

    async fn purge_expired_authority(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;

    async fn purge_expired_objects(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;

    /// Drops cached verdicts whose authority priority is at or below
    /// `priority`, together with label-only negative entries.
    async fn purge_objects_at_or_below(&self, priority: f64) -> Result<u64, RepositoryError>;

    /// Applies a rule mutation and the cache purge it implies atomically.
    async fn apply(
        &self,
        mutation: &RuleMutation,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, RepositoryError>;

    /// Rules addressed by `selector`, highest priority first.
    async fn rules(&self, selector: &RuleSelector) -> Result<Vec<Rule>, RepositoryError>;

    async fn feature(&self, name: &str) -> Result<Option<String>, RepositoryError>;

    async fn set_feature(&self, name: &str, value: &str) -> Result<(), RepositoryError>;

    /// Replaces every whitelist-flagged rule with `rules` and records `uuid`
    /// as the imported bundle, in one transaction.
    async fn replace_explicit_set(
        &self,
        rules: Vec<NewRule>,
        uuid: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

/// Feature-row names shared by the stores and the services using them.
pub mod features {
    pub const EXPLICIT_SET_UUID: &str = "explicit_set_uuid";
    pub const EXPLICIT_SET_CHECKED: &str = "explicit_set_checked";
    pub const LEGACY_MIGRATED: &str = "legacy_migrated";
}

/// Repository errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Rule store is read-only")]
    ReadOnly,

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<crate::domain::requirement::RequirementError> for RepositoryError {
    fn from(err: crate::domain::requirement::RequirementError) -> Self {
        RepositoryError::Serialization(format!("stored requirement: {}", err))
    }
}
