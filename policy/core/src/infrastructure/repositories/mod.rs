// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the `RuleRepository` contract.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and query rules and cached verdicts
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **SqliteRuleStore** - the rule database file
//! - **InMemoryRuleRepository** - HashMap-backed storage for tests, and the
//!   empty read-only stand-in used when no database can be opened

pub mod sqlite;

pub use sqlite::SqliteRuleStore;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::assessment::OperationType;
use crate::domain::repository::{features, RepositoryError, RuleRepository};
use crate::domain::rule::{
    CachedObjectVerdict, MutationOutcome, NewRule, ObjectOutcome, Rule, RuleFlags, RuleMutation,
    RuleSelector,
};
use crate::domain::signature::ContentHash;

#[derive(Default)]
struct State {
    rules: Vec<Rule>,
    objects: HashMap<(OperationType, ContentHash), ObjectOutcome>,
    features: HashMap<String, String>,
    next_id: i64,
}

impl State {
    fn insert(&mut self, rule: &NewRule, now: DateTime<Utc>) -> i64 {
        self.next_id += 1;
        self.rules.push(Rule {
            id: self.next_id,
            operation: rule.operation,
            requirement: rule.requirement.clone(),
            allow: rule.allow,
            disabled: rule.disabled,
            expires: rule.expires,
            priority: rule.priority,
            label: rule.label.clone(),
            flags: rule.flags,
            remarks: rule.remarks.clone(),
            created_at: now,
            updated_at: now,
        });
        self.next_id
    }

    fn sorted(&self, selector: &RuleSelector) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self.rules.iter().filter(|r| selector.matches(r)).cloned().collect();
        rules.sort_by(|a, b| b.priority.total_cmp(&a.priority).then(a.id.cmp(&b.id)));
        rules
    }

    fn priority_of(&self, id: i64) -> Option<f64> {
        self.rules.iter().find(|r| r.id == id).map(|r| r.priority)
    }

    fn purge_at_or_below(&mut self, priority: f64) -> u64 {
        let doomed: Vec<(OperationType, ContentHash)> = self
            .objects
            .iter()
            .filter(|(_, o)| match o.authority {
                None => true,
                Some(id) => self.priority_of(id).is_some_and(|p| p <= priority),
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.objects.remove(key);
        }
        doomed.len() as u64
    }

    fn remove_rules(&mut self, ids: &[i64]) {
        self.rules.retain(|r| !ids.contains(&r.id));
        // ON DELETE CASCADE
        self.objects
            .retain(|_, o| o.authority.is_none_or(|id| !ids.contains(&id)));
    }

    fn purge_expired_authority(&mut self, now: DateTime<Utc>) -> u64 {
        let expired: Vec<i64> = self.rules.iter().filter(|r| r.is_expired(now)).map(|r| r.id).collect();
        self.remove_rules(&expired);
        expired.len() as u64
    }
}

#[derive(Clone)]
pub struct InMemoryRuleRepository {
    state: Arc<RwLock<State>>,
    writable: bool,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            writable: true,
        }
    }

    /// Seeded with `rules`, as a migrated database would be.
    pub fn with_rules(rules: &[NewRule]) -> Self {
        let repo = Self::new();
        if let Ok(mut state) = repo.state.write() {
            let now = Utc::now();
            for rule in rules {
                state.insert(rule, now);
            }
        }
        repo
    }

    /// Empty and read-only: what callers see when no database is available.
    pub fn unavailable() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            writable: false,
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, RepositoryError> {
        self.state
            .read()
            .map_err(|_| RepositoryError::Unknown("RwLock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, RepositoryError> {
        if !self.writable {
            return Err(RepositoryError::ReadOnly);
        }
        self.state
            .write()
            .map_err(|_| RepositoryError::Unknown("RwLock poisoned".to_string()))
    }
}

impl Default for InMemoryRuleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    fn is_writable(&self) -> bool {
        self.writable
    }

    async fn find_matching_rules(
        &self,
        operation: OperationType,
        now: DateTime<Utc>,
    ) -> Result<Vec<Rule>, RepositoryError> {
        let state = self.read()?;
        let selector = RuleSelector::new(crate::domain::rule::RuleMatch::All, Some(operation));
        Ok(state
            .sorted(&selector)
            .into_iter()
            .filter(|r| !r.is_expired(now))
            .collect())
    }

    async fn cached_verdict(
        &self,
        operation: OperationType,
        hash: &ContentHash,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedObjectVerdict>, RepositoryError> {
        let state = self.read()?;
        let Some(object) = state.objects.get(&(operation, hash.clone())) else {
            return Ok(None);
        };
        if object.expires.is_some_and(|e| e <= now) {
            return Ok(None);
        }
        let authority = match object.authority {
            Some(id) => match state.rules.iter().find(|r| r.id == id) {
                Some(rule) if !rule.disabled && !rule.is_expired(now) => Some(rule),
                _ => return Ok(None),
            },
            None => None,
        };
        Ok(Some(CachedObjectVerdict {
            hash: object.hash.clone(),
            operation,
            allow: object.allow,
            authority: object.authority,
            label: authority
                .and_then(|r| r.label.clone())
                .or_else(|| object.label.clone()),
            expires: object.expires,
        }))
    }

    async fn record_outcome(&self, outcome: ObjectOutcome) -> Result<(), RepositoryError> {
        let mut state = self.write()?;
        state
            .objects
            .insert((outcome.operation, outcome.hash.clone()), outcome);
        Ok(())
    }

    async fn purge_expired_authority(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        Ok(self.write()?.purge_expired_authority(now))
    }

    async fn purge_expired_objects(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut state = self.write()?;
        let before = state.objects.len();
        state.objects.retain(|_, o| o.expires.is_none_or(|e| e > now));
        Ok((before - state.objects.len()) as u64)
    }

    async fn purge_objects_at_or_below(&self, priority: f64) -> Result<u64, RepositoryError> {
        Ok(self.write()?.purge_at_or_below(priority))
    }

    async fn apply(
        &self,
        mutation: &RuleMutation,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, RepositoryError> {
        let mut state = self.write()?;
        let (affected, inserted_id, purge_priority) = match mutation {
            RuleMutation::Add(rule) => (1, Some(state.insert(rule, now)), Some(rule.priority)),
            RuleMutation::Remove(selector) => {
                let selected = state.sorted(selector);
                if selected.is_empty() {
                    return Err(RepositoryError::NotFound("no rule matches".to_string()));
                }
                let removable: Vec<&Rule> = selected.iter().filter(|r| !r.is_default()).collect();
                if removable.is_empty() {
                    return Err(RepositoryError::Rejected(
                        "default rules cannot be removed".to_string(),
                    ));
                }
                let priority = removable.iter().map(|r| r.priority).reduce(f64::max);
                let ids: Vec<i64> = removable.iter().map(|r| r.id).collect();
                // Purge against the rows being removed before they vanish.
                if let Some(p) = priority {
                    state.purge_at_or_below(p);
                }
                state.remove_rules(&ids);
                (ids.len() as u64, None, priority)
            }
            RuleMutation::Enable(selector) | RuleMutation::Disable(selector) => {
                let disabled = matches!(mutation, RuleMutation::Disable(_));
                let ids: Vec<i64> = state.sorted(selector).iter().map(|r| r.id).collect();
                if ids.is_empty() {
                    return Err(RepositoryError::NotFound("no rule matches".to_string()));
                }
                let mut priority: Option<f64> = None;
                for rule in state.rules.iter_mut().filter(|r| ids.contains(&r.id)) {
                    rule.disabled = disabled;
                    rule.updated_at = now;
                    priority = Some(priority.map_or(rule.priority, |p| p.max(rule.priority)));
                }
                (ids.len() as u64, None, priority)
            }
        };

        state.purge_expired_authority(now);
        if let Some(p) = purge_priority {
            state.purge_at_or_below(p);
        }
        Ok(MutationOutcome {
            affected,
            inserted_id,
            purged_at_or_below: purge_priority,
        })
    }

    async fn rules(&self, selector: &RuleSelector) -> Result<Vec<Rule>, RepositoryError> {
        Ok(self.read()?.sorted(selector))
    }

    async fn feature(&self, name: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.read()?.features.get(name).cloned())
    }

    async fn set_feature(&self, name: &str, value: &str) -> Result<(), RepositoryError> {
        self.write()?
            .features
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn replace_explicit_set(
        &self,
        rules: Vec<NewRule>,
        uuid: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.write()?;
        let old: Vec<(i64, f64)> = state
            .rules
            .iter()
            .filter(|r| r.flags.contains(RuleFlags::WHITELIST))
            .map(|r| (r.id, r.priority))
            .collect();
        let priority = old
            .iter()
            .map(|(_, p)| *p)
            .chain(rules.iter().map(|r| r.priority))
            .reduce(f64::max);
        if let Some(p) = priority {
            state.purge_at_or_below(p);
        }
        let ids: Vec<i64> = old.iter().map(|(id, _)| *id).collect();
        state.remove_rules(&ids);
        for rule in &rules {
            state.insert(rule, now);
        }
        state
            .features
            .insert(features::EXPLICIT_SET_UUID.to_string(), uuid.to_string());
        Ok(rules.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::requirement::Requirement;

    #[tokio::test]
    async fn test_unavailable_repository_is_read_only() {
        let repo = InMemoryRuleRepository::unavailable();
        assert!(!repo.is_writable());
        assert!(repo
            .find_matching_rules(OperationType::Execute, Utc::now())
            .await
            .unwrap()
            .is_empty());
        let err = repo
            .apply(
                &RuleMutation::Add(NewRule::allow(OperationType::Execute, Requirement::Always)),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ReadOnly));
    }

    #[tokio::test]
    async fn test_enable_disable_by_label() {
        let repo = InMemoryRuleRepository::with_rules(&[NewRule::allow(
            OperationType::Execute,
            Requirement::AnchorApple,
        )
        .with_label("Apple System")]);

        let outcome = repo
            .apply(&RuleMutation::Disable(RuleSelector::label("Apple System")), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.affected, 1);
        let rules = repo.rules(&RuleSelector::all()).await.unwrap();
        assert!(rules[0].disabled);
    }
}
