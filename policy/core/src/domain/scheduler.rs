// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Evaluation Identity and Deferred Start
//!
//! [`EvaluationKey`] names one `(path, operation)` pair. Low-priority
//! evaluations register a [`DeferredTrigger`] under that key; the trigger
//! later calls back to kick whichever task currently holds the key.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::domain::assessment::OperationType;

/// Lowercase hex SHA-256 of `"<operation code>:<path>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvaluationKey(String);

impl EvaluationKey {
    pub fn derive(path: &Path, operation: OperationType) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(operation.code().to_string().as_bytes());
        hasher.update(b":");
        hasher.update(path.as_os_str().as_encoded_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EvaluationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conditions under which a deferred evaluation may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredCriteria {
    pub require_ac_power: bool,
    /// Minimum delay before the trigger may fire.
    pub delay: Duration,
}

impl Default for DeferredCriteria {
    fn default() -> Self {
        Self {
            require_ac_power: true,
            delay: Duration::ZERO,
        }
    }
}

pub type DeferredCallback = Box<dyn FnOnce() + Send + 'static>;

/// Opportunistic scheduler for low-priority starts.
pub trait DeferredTrigger: Send + Sync {
    /// Registers a one-shot callback under `key`. A second registration for a
    /// key that is still pending is ignored.
    fn schedule_deferred(&self, key: EvaluationKey, criteria: DeferredCriteria, callback: DeferredCallback);

    /// Drops the pending registration for `key`, if any.
    fn cancel(&self, key: &EvaluationKey);
}
