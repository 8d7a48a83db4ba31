// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Policy Domain Events
//!
//! Published on the in-process event bus after the fact. Observers (trace
//! sinks, UI notifiers) must not be able to influence the outcome.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::assessment::OperationType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyEvent {
    /// The authority table changed; cached state derived from it is stale.
    RulesChanged {
        operation: String,
        affected: u64,
        changed_at: DateTime<Utc>,
    },
    AssessmentCompleted {
        path: PathBuf,
        operation: OperationType,
        allowed: bool,
        authority: Option<String>,
        cached: bool,
        error: Option<String>,
        completed_at: DateTime<Utc>,
    },
    /// The master switch was flipped.
    AssessmentsToggled {
        enabled: bool,
        toggled_at: DateTime<Utc>,
    },
}
