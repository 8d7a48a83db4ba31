// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Rules and Cached Verdicts
//!
//! A [`Rule`] is one row of the authority table: an allow/deny decision for
//! every object whose signature satisfies its [`Requirement`]. Higher
//! priority wins. A [`CachedObjectVerdict`] is one row of the object cache,
//! recording which rule last decided an object.

use std::fmt;
use std::ops::BitOr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::assessment::OperationType;
use crate::domain::requirement::Requirement;
use crate::domain::signature::ContentHash;

/// Marker bits stored in the `flags` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleFlags(u32);

impl RuleFlags {
    pub const NONE: RuleFlags = RuleFlags(0);
    /// Installed by the system; cannot be removed.
    pub const DEFAULT: RuleFlags = RuleFlags(1);
    /// Verdicts decided by this rule are never cached.
    pub const INHIBIT_CACHE: RuleFlags = RuleFlags(2);
    /// Imported from the explicit set.
    pub const WHITELIST: RuleFlags = RuleFlags(4);
    pub const WHITELIST_V2: RuleFlags = RuleFlags(8);
    /// Requirement carries a full SHA-256 digest.
    pub const SHA256: RuleFlags = RuleFlags(16);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        RuleFlags(bits)
    }

    pub const fn contains(self, other: RuleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: RuleFlags) {
        self.0 |= other.0;
    }
}

impl BitOr for RuleFlags {
    type Output = RuleFlags;

    fn bitor(self, rhs: RuleFlags) -> RuleFlags {
        RuleFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for RuleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (RuleFlags::DEFAULT, "default"),
            (RuleFlags::INHIBIT_CACHE, "inhibit-cache"),
            (RuleFlags::WHITELIST, "whitelist"),
            (RuleFlags::WHITELIST_V2, "whitelist-v2"),
            (RuleFlags::SHA256, "sha256"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&set.join(","))
        }
    }
}

/// One authority row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub operation: OperationType,
    pub requirement: Requirement,
    pub allow: bool,
    pub disabled: bool,
    /// `None` never expires.
    pub expires: Option<DateTime<Utc>>,
    pub priority: f64,
    pub label: Option<String>,
    pub flags: RuleFlags,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn is_default(&self) -> bool {
        self.flags.contains(RuleFlags::DEFAULT)
    }

    pub fn inhibits_cache(&self) -> bool {
        self.flags.contains(RuleFlags::INHIBIT_CACHE)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|e| e <= now)
    }
}

/// Rule to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRule {
    pub operation: OperationType,
    pub requirement: Requirement,
    pub allow: bool,
    pub disabled: bool,
    pub expires: Option<DateTime<Utc>>,
    pub priority: f64,
    pub label: Option<String>,
    pub flags: RuleFlags,
    pub remarks: Option<String>,
}

impl NewRule {
    /// An enabled allow rule with priority 0 and no label.
    pub fn allow(operation: OperationType, requirement: Requirement) -> Self {
        Self {
            operation,
            requirement,
            allow: true,
            disabled: false,
            expires: None,
            priority: 0.0,
            label: None,
            flags: RuleFlags::NONE,
            remarks: None,
        }
    }

    pub fn deny(operation: OperationType, requirement: Requirement) -> Self {
        Self {
            allow: false,
            ..Self::allow(operation, requirement)
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_flags(mut self, flags: RuleFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_expiry(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }
}

/// Which rows a mutation or query addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleMatch {
    Id(i64),
    Label(String),
    Requirement(Requirement),
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleSelector {
    pub matching: RuleMatch,
    /// Restricts the match to one operation type.
    pub operation: Option<OperationType>,
}

impl RuleSelector {
    pub fn new(matching: RuleMatch, operation: Option<OperationType>) -> Self {
        Self { matching, operation }
    }

    pub fn label(label: impl Into<String>) -> Self {
        Self::new(RuleMatch::Label(label.into()), None)
    }

    pub fn id(id: i64) -> Self {
        Self::new(RuleMatch::Id(id), None)
    }

    pub fn all() -> Self {
        Self::new(RuleMatch::All, None)
    }

    pub fn matches(&self, rule: &Rule) -> bool {
        if self.operation.is_some_and(|op| op != rule.operation) {
            return false;
        }
        match &self.matching {
            RuleMatch::Id(id) => rule.id == *id,
            RuleMatch::Label(label) => rule.label.as_deref() == Some(label.as_str()),
            RuleMatch::Requirement(req) => &rule.requirement == req,
            RuleMatch::All => true,
        }
    }
}

/// A change to the authority table, applied in one transaction together
/// with the object-cache purge it implies.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleMutation {
    Add(NewRule),
    Remove(RuleSelector),
    Enable(RuleSelector),
    Disable(RuleSelector),
}

impl RuleMutation {
    pub fn name(&self) -> &'static str {
        match self {
            RuleMutation::Add(_) => "add",
            RuleMutation::Remove(_) => "remove",
            RuleMutation::Enable(_) => "enable",
            RuleMutation::Disable(_) => "disable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MutationOutcome {
    /// Rows inserted, updated or deleted.
    pub affected: u64,
    pub inserted_id: Option<i64>,
    /// Cached verdicts at or below this priority were purged.
    pub purged_at_or_below: Option<f64>,
}

/// One row of the object cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedObjectVerdict {
    pub hash: ContentHash,
    pub operation: OperationType,
    pub allow: bool,
    /// `None` for negative entries that cite a fixed label.
    pub authority: Option<i64>,
    /// Label of the deciding rule, or of the negative entry.
    pub label: Option<String>,
    pub expires: Option<DateTime<Utc>>,
}

/// Verdict to record in the object cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectOutcome {
    pub hash: ContentHash,
    pub operation: OperationType,
    pub allow: bool,
    pub authority: Option<i64>,
    pub label: Option<String>,
    pub expires: Option<DateTime<Utc>>,
}
