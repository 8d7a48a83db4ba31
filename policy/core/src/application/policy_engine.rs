// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Policy Engine
//!
//! Decides the verdict for one `(path, operation)` pair by walking the
//! authority table in priority order and checking each rule's requirement
//! against the object's signing facts. Executables go through the object
//! cache first; installer packages go through chain trust evaluation;
//! document opens are decided from caller-supplied context alone.
//!
//! Rule mutation lives in `rule_update.rs` on the same type.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Assessment evaluation
//! - **Related:** `evaluation_manager.rs` runs this engine at most once per object

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::domain::assessment::{
    AssessmentContext, AssessmentFlags, FeedbackEvent, OperationType, RiskCategory,
};
use crate::domain::authorization::Authorizer;
use crate::domain::clock::Clock;
use crate::domain::config::CacheConfig;
use crate::domain::errors::{AssessmentError, ValidationError};
use crate::domain::repository::RuleRepository;
use crate::domain::result::{labels, AssessmentResult};
use crate::domain::rule::{ObjectOutcome, Rule};
use crate::domain::signature::{
    CodeSignature, ContentHash, SignatureValidator, SigningFacts, TicketService, TicketStatus,
    TrustOutcome, TrustPolicy,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::metrics;
use crate::infrastructure::preferences::PreferenceStore;

/// Outcome of walking a rule list against one set of signing facts.
#[derive(Debug, Default)]
pub struct RuleScan<'a> {
    /// First enabled rule whose requirement matched.
    pub decided: Option<&'a Rule>,
    /// First disabled rule whose requirement matched ahead of `decided`.
    pub first_disabled: Option<&'a Rule>,
}

/// Walks `rules` in the given order. Only disabled rules seen before the
/// deciding rule are remembered.
pub fn scan_rules<'a>(rules: &'a [Rule], facts: &SigningFacts<'_>) -> RuleScan<'a> {
    let mut scan = RuleScan::default();
    for rule in rules {
        if !rule.requirement.matches(facts) {
            continue;
        }
        if rule.disabled {
            if scan.first_disabled.is_none() {
                scan.first_disabled = Some(rule);
            }
            continue;
        }
        scan.decided = Some(rule);
        break;
    }
    scan
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Denial citing the nearest disabled authority, or `fallback`.
fn deny_unmatched(result: &mut AssessmentResult, first_disabled: Option<&Rule>, fallback: &str) {
    match first_disabled {
        Some(rule) => result.decide_by_rule(
            false,
            rule.id,
            Some(rule.label.as_deref().unwrap_or(fallback)),
        ),
        None => result.decide(false, fallback),
    }
}

pub struct PolicyEngine {
    pub(crate) repo: Arc<dyn RuleRepository>,
    pub(crate) validator: Arc<dyn SignatureValidator>,
    pub(crate) tickets: Arc<dyn TicketService>,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) preferences: Arc<PreferenceStore>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cache: CacheConfig,
}

impl PolicyEngine {
    pub fn new(
        repo: Arc<dyn RuleRepository>,
        validator: Arc<dyn SignatureValidator>,
        tickets: Arc<dyn TicketService>,
        authorizer: Arc<dyn Authorizer>,
        preferences: Arc<PreferenceStore>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            validator,
            tickets,
            authorizer,
            preferences,
            event_bus,
            clock,
            cache: CacheConfig::default(),
        }
    }

    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn repository(&self) -> &Arc<dyn RuleRepository> {
        &self.repo
    }

    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.preferences
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Evaluates `path` for `operation`, writing the verdict into `result`.
    pub async fn evaluate(
        &self,
        path: &Path,
        operation: OperationType,
        flags: AssessmentFlags,
        context: &AssessmentContext,
        result: &mut AssessmentResult,
    ) -> Result<(), AssessmentError> {
        match operation {
            OperationType::Execute => self.evaluate_code(path, operation, flags, context, result).await,
            OperationType::Install => self.evaluate_install(path, flags, context, result).await,
            OperationType::OpenDocument => self.evaluate_doc_open(path, context, result),
        }
    }

    pub async fn evaluate_code(
        &self,
        path: &Path,
        operation: OperationType,
        flags: AssessmentFlags,
        context: &AssessmentContext,
        result: &mut AssessmentResult,
    ) -> Result<(), AssessmentError> {
        let overrides = self.preferences.overrides_active();

        if !flags.ignore_cache && !flags.request_origin {
            if let Some(cached) = self.check_cache(path, operation, overrides).await {
                result.merge_from(&cached);
                return Ok(());
            }
        }

        let Some(signature) = self.validator.static_signature(path).await? else {
            return self.handle_unsigned(path, result).await;
        };

        let notarized = match self.tickets.lookup(&signature.cdhash).await {
            TicketStatus::Notarized => true,
            TicketStatus::Revoked => {
                return Err(ValidationError::RevokedNotarization(path.display().to_string()).into());
            }
            TicketStatus::Unknown => false,
        };

        if flags.request_origin {
            result.originator = signature.leaf().map(|c| c.subject_cn.clone());
        }

        let rules = self.repo.find_matching_rules(operation, self.clock.now()).await?;
        let scan = scan_rules(&rules, &signature.facts(notarized));

        let Some(rule) = scan.decided else {
            let fallback = if signature.is_adhoc() {
                labels::NO_USABLE_SIGNATURE
            } else {
                labels::NO_MATCHING_RULE
            };
            deny_unmatched(result, scan.first_disabled, fallback);
            self.record_negative(&signature.cdhash, operation, flags, result.authority.source.clone())
                .await;
            debug!(path = %path.display(), label = ?result.authority.source, "No rule matched");
            return Ok(());
        };

        if !overrides {
            let position = rules.iter().position(|r| r.id == rule.id).unwrap_or(0) as u64;
            report_progress(context, path, position, rules.len() as u64)?;
            self.validator.validate(path, &signature).await?;
        }

        result.decide_by_rule(rule.allow, rule.id, rule.label.as_deref());
        self.record_rule_outcome(&signature, operation, flags, rule).await;
        info!(
            path = %path.display(),
            rule_id = rule.id,
            label = ?rule.label,
            allow = rule.allow,
            "Code assessment decided by rule"
        );
        Ok(())
    }

    /// Notarization ticket lookup for code carrying no signature.
    async fn handle_unsigned(&self, path: &Path, result: &mut AssessmentResult) -> Result<(), AssessmentError> {
        let status = match self.validator.content_hash(path).await? {
            Some(hash) => self.tickets.lookup(&hash).await,
            None => TicketStatus::Unknown,
        };
        match status {
            TicketStatus::Notarized => result.decide(true, labels::NOTARIZED_UNSIGNED),
            TicketStatus::Revoked => result.decide(false, labels::NOTARIZATION_REVOKED),
            TicketStatus::Unknown => result.decide(false, labels::UNSIGNED_CODE),
        }
        debug!(path = %path.display(), ?status, "Unsigned code assessed");
        Ok(())
    }

    pub async fn evaluate_install(
        &self,
        path: &Path,
        flags: AssessmentFlags,
        context: &AssessmentContext,
        result: &mut AssessmentResult,
    ) -> Result<(), AssessmentError> {
        let package = match &context.package_signature {
            Some(package) => Some(package.clone()),
            None => self.validator.package_signature(path).await?,
        };
        let Some(package) = package else {
            result.decide(false, labels::NO_USABLE_SIGNATURE);
            return Ok(());
        };

        let trust = self
            .validator
            .evaluate_trust(&package, TrustPolicy::Installer { check_revocation: true })
            .await?;
        if let TrustOutcome::Untrusted(reason) = trust {
            debug!(path = %path.display(), reason = %reason, "Installer chain not trusted");
            result.decide(false, labels::NO_USABLE_SIGNATURE);
            return Ok(());
        }

        if flags.request_origin {
            result.originator = package.certificates.first().map(|c| c.subject_cn.clone());
        }

        let rules = self
            .repo
            .find_matching_rules(OperationType::Install, self.clock.now())
            .await?;
        let scan = scan_rules(&rules, &package.facts());
        match scan.decided {
            Some(rule) => {
                result.decide_by_rule(rule.allow, rule.id, rule.label.as_deref());
                info!(path = %path.display(), rule_id = rule.id, allow = rule.allow, "Install assessment decided by rule");
            }
            None => deny_unmatched(result, scan.first_disabled, labels::NO_MATCHING_RULE),
        }
        Ok(())
    }

    pub fn evaluate_doc_open(
        &self,
        path: &Path,
        context: &AssessmentContext,
        result: &mut AssessmentResult,
    ) -> Result<(), AssessmentError> {
        match context.risk_category {
            Some(RiskCategory::UnsafeExecutable) => result.decide(false, labels::UNSAFE_EXECUTABLE),
            Some(_) => result.decide(true, labels::XPROTECT),
            None if context.quarantined.unwrap_or(false) => {
                result.decide(false, labels::INSUFFICIENT_CONTEXT)
            }
            None => result.decide(true, labels::NO_QUARANTINE),
        }
        debug!(path = %path.display(), verdict = ?result.verdict, "Document open assessed");
        Ok(())
    }

    /// Cached verdict for an executable, if one is present and still valid.
    /// Any failure along the way is a miss.
    pub async fn check_cache(
        &self,
        path: &Path,
        operation: OperationType,
        overrides: bool,
    ) -> Option<AssessmentResult> {
        if operation != OperationType::Execute {
            return None;
        }
        let hit = self.lookup_cache(path, operation, overrides).await;
        if hit.is_some() {
            metrics::inc_cache_hit();
        } else {
            metrics::inc_cache_miss();
        }
        hit
    }

    async fn lookup_cache(
        &self,
        path: &Path,
        operation: OperationType,
        overrides: bool,
    ) -> Option<AssessmentResult> {
        let hash = self.validator.content_hash(path).await.ok()??;
        let cached = match self.repo.cached_verdict(operation, &hash, self.clock.now()).await {
            Ok(cached) => cached?,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Object cache unavailable");
                return None;
            }
        };

        if cached.allow && !overrides {
            let signature = self.validator.static_signature(path).await.ok()??;
            if let Err(e) = self.validator.validate(path, &signature).await {
                debug!(path = %path.display(), error = %e, "Cached allowance no longer validates");
                return None;
            }
        }

        let mut result = AssessmentResult::default();
        match cached.authority {
            Some(row_id) => result.decide_by_rule(cached.allow, row_id, cached.label.as_deref()),
            None => result.decide(
                cached.allow,
                cached.label.as_deref().unwrap_or(labels::NO_MATCHING_RULE),
            ),
        }
        result.authority.cached = true;
        debug!(path = %path.display(), hash = %hash, allow = cached.allow, "Object cache hit");
        Some(result)
    }

    fn caching(&self, flags: AssessmentFlags) -> bool {
        self.cache.enabled && !flags.no_cache
    }

    async fn record_rule_outcome(
        &self,
        signature: &CodeSignature,
        operation: OperationType,
        flags: AssessmentFlags,
        rule: &Rule,
    ) {
        if !self.caching(flags) || rule.inhibits_cache() {
            return;
        }
        let outcome = ObjectOutcome {
            hash: signature.cdhash.clone(),
            operation,
            allow: rule.allow,
            authority: Some(rule.id),
            label: rule.label.clone(),
            expires: earliest(rule.expires, signature.chain_expiry()),
        };
        self.record(outcome).await;
    }

    async fn record_negative(
        &self,
        hash: &ContentHash,
        operation: OperationType,
        flags: AssessmentFlags,
        label: Option<String>,
    ) {
        if !self.caching(flags) {
            return;
        }
        let hold = chrono::Duration::from_std(self.cache.negative_hold).unwrap_or(chrono::Duration::seconds(60));
        let outcome = ObjectOutcome {
            hash: hash.clone(),
            operation,
            allow: false,
            authority: None,
            label,
            expires: Some(self.clock.now() + hold),
        };
        self.record(outcome).await;
    }

    async fn record(&self, outcome: ObjectOutcome) {
        if !self.repo.is_writable() {
            return;
        }
        let hash = outcome.hash.clone();
        if let Err(e) = self.repo.record_outcome(outcome).await {
            warn!(hash = %hash, error = %e, "Failed to record verdict in object cache");
        }
    }
}

/// Sends a progress event; a declining listener cancels the evaluation.
fn report_progress(
    context: &AssessmentContext,
    path: &Path,
    current: u64,
    total: u64,
) -> Result<(), AssessmentError> {
    let Some(feedback) = &context.feedback else {
        return Ok(());
    };
    let event = FeedbackEvent::Progress {
        path: path.to_path_buf(),
        current,
        total,
    };
    if feedback.on_feedback(&event) {
        Ok(())
    } else {
        Err(AssessmentError::Cancelled)
    }
}
