// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Metric names and recording helpers. Nothing here installs an exporter;
//! without a recorder every call is a no-op.

use std::time::Duration;

use crate::domain::assessment::OperationType;

pub const ASSESSMENTS_TOTAL: &str = "gatekeeper_assessments_total";
pub const EVALUATIONS_STARTED_TOTAL: &str = "gatekeeper_evaluations_started_total";
pub const EVALUATION_TASKS_ACTIVE: &str = "gatekeeper_evaluation_tasks_active";
pub const CACHE_HITS_TOTAL: &str = "gatekeeper_cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "gatekeeper_cache_misses_total";
pub const EVALUATION_DURATION_SECONDS: &str = "gatekeeper_evaluation_duration_seconds";

pub fn observe_assessment(operation: OperationType, verdict: &'static str) {
    ::metrics::counter!(ASSESSMENTS_TOTAL, "operation" => operation.as_str(), "verdict" => verdict)
        .increment(1);
}

pub fn observe_evaluation(operation: OperationType, elapsed: Duration) {
    ::metrics::counter!(EVALUATIONS_STARTED_TOTAL, "operation" => operation.as_str()).increment(1);
    ::metrics::histogram!(EVALUATION_DURATION_SECONDS, "operation" => operation.as_str())
        .record(elapsed.as_secs_f64());
}

pub fn set_active_tasks(count: usize) {
    ::metrics::gauge!(EVALUATION_TASKS_ACTIVE).set(count as f64);
}

pub fn inc_cache_hit() {
    ::metrics::counter!(CACHE_HITS_TOTAL).increment(1);
}

pub fn inc_cache_miss() {
    ::metrics::counter!(CACHE_MISSES_TOTAL).increment(1);
}
