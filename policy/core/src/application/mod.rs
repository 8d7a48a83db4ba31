// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod policy_engine;
pub mod rule_update;
pub mod evaluation_task;
pub mod evaluation_manager;
pub mod assessment_service;
pub mod explicit_set;
pub mod repository_factory;

// Re-export use cases for convenience
pub use assessment_service::{
    AssessmentService, ControlArgument, ControlOperation, ControlOutcome, RemoteAssessor,
};
pub use evaluation_manager::{EvaluationManager, TaskLease};
pub use evaluation_task::{EvaluationTask, TaskState};
pub use policy_engine::PolicyEngine;
pub use rule_update::{RuleUpdate, UpdateOperation, UpdateOutcome, UpdateTarget};
