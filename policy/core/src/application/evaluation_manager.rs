// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Evaluation Manager
//!
//! Registry of live evaluation tasks keyed by `EvaluationKey`. Concurrent
//! requests for the same object attach to one task, so the engine runs at
//! most once per object at a time.
//!
//! Callers hold a [`TaskLease`] while attached. The lease count is only
//! changed under the registry lock; dropping the last lease removes the
//! task, so a task found in the registry is never on its way out.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Evaluation coalescing and deferred start
//! - **Related:** `evaluation_task.rs`

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::application::evaluation_task::EvaluationTask;
use crate::application::policy_engine::PolicyEngine;
use crate::domain::assessment::{AssessmentContext, AssessmentFlags, OperationType};
use crate::domain::errors::AssessmentError;
use crate::domain::result::AssessmentResult;
use crate::domain::scheduler::{DeferredCriteria, DeferredTrigger, EvaluationKey};
use crate::infrastructure::metrics;

struct Registry {
    tasks: Mutex<HashMap<EvaluationKey, Arc<EvaluationTask>>>,
    trigger: Option<Arc<dyn DeferredTrigger>>,
}

impl Registry {
    fn lookup(&self, key: &EvaluationKey) -> Option<Arc<EvaluationTask>> {
        self.tasks.lock().get(key).cloned()
    }

    fn release(&self, task: &Arc<EvaluationTask>) {
        let removed = {
            let mut tasks = self.tasks.lock();
            let remaining = task.leases.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining > 0 {
                return;
            }
            let registered = tasks.get(task.key()).is_some_and(|t| Arc::ptr_eq(t, task));
            if registered {
                tasks.remove(task.key());
                metrics::set_active_tasks(tasks.len());
            }
            registered
        };

        task.abandon();
        if removed {
            if let Some(trigger) = &self.trigger {
                trigger.cancel(task.key());
            }
        }
        debug!(key = %task.key(), "Evaluation task released");
    }
}

/// An attached caller's hold on a task.
pub struct TaskLease {
    task: Arc<EvaluationTask>,
    registry: Arc<Registry>,
}

impl TaskLease {
    pub fn task(&self) -> &Arc<EvaluationTask> {
        &self.task
    }
}

impl Drop for TaskLease {
    fn drop(&mut self) {
        self.registry.release(&self.task);
    }
}

pub struct EvaluationManager {
    engine: Arc<PolicyEngine>,
    registry: Arc<Registry>,
    deferral: DeferredCriteria,
}

impl EvaluationManager {
    pub fn new(engine: Arc<PolicyEngine>, trigger: Option<Arc<dyn DeferredTrigger>>) -> Self {
        Self {
            engine,
            registry: Arc::new(Registry {
                tasks: Mutex::new(HashMap::new()),
                trigger,
            }),
            deferral: DeferredCriteria::default(),
        }
    }

    pub fn with_deferral(mut self, criteria: DeferredCriteria) -> Self {
        self.deferral = criteria;
        self
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.engine
    }

    pub fn active_tasks(&self) -> usize {
        self.registry.tasks.lock().len()
    }

    /// Task currently registered for `(path, operation)`.
    pub fn task_for(&self, path: &Path, operation: OperationType) -> Option<Arc<EvaluationTask>> {
        self.registry.lookup(&EvaluationKey::derive(path, operation))
    }

    /// Attaches to the live task for `(path, operation)`, creating one when
    /// there is none or sharing is refused, and starts its evaluation.
    pub async fn acquire_task(
        &self,
        path: &Path,
        operation: OperationType,
        flags: AssessmentFlags,
        context: AssessmentContext,
    ) -> TaskLease {
        let key = EvaluationKey::derive(path, operation);
        let task = {
            let mut tasks = self.registry.tasks.lock();
            let task = match tasks.get(&key) {
                Some(task) if task.is_sharable() && !flags.ignore_active_assessments => task.clone(),
                _ => {
                    let task = Arc::new(EvaluationTask::new(key.clone(), path, operation));
                    if flags.ignore_active_assessments {
                        task.mark_unsharable();
                    }
                    tasks.insert(key.clone(), task.clone());
                    metrics::set_active_tasks(tasks.len());
                    task
                }
            };
            task.leases.fetch_add(1, Ordering::AcqRel);
            task
        };
        let lease = TaskLease {
            task,
            registry: self.registry.clone(),
        };

        lease.task.perform_evaluation(&self.engine, flags, context).await;
        if flags.low_priority {
            self.defer_start(&lease.task);
        }
        lease
    }

    fn defer_start(&self, task: &Arc<EvaluationTask>) {
        let Some(trigger) = &self.registry.trigger else {
            task.kick();
            return;
        };
        let key = task.key().clone();
        let registry: Weak<Registry> = Arc::downgrade(&self.registry);
        let callback_key = key.clone();
        trigger.schedule_deferred(
            key,
            self.deferral,
            Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    kick_registered(&registry, &callback_key);
                }
            }),
        );
        debug!(key = %task.key(), "Evaluation start deferred");
    }

    /// Waits for the lease's task, merges its result, then releases the
    /// lease. The evaluation's error, if any, is returned last.
    pub async fn finalize_task(
        &self,
        lease: TaskLease,
        flags: AssessmentFlags,
        result: &mut AssessmentResult,
    ) -> Result<(), AssessmentError> {
        debug!(key = %lease.task.key(), low_priority = flags.low_priority, "Waiting for evaluation");
        let error = lease.task.wait_for_completion(result).await;
        drop(lease);
        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Opens the start gate of whatever task is registered under `key`.
    pub fn kick(&self, key: &EvaluationKey) {
        kick_registered(&self.registry, key);
    }

    /// `acquire_task` followed by `finalize_task`.
    pub async fn evaluate(
        &self,
        path: &Path,
        operation: OperationType,
        flags: AssessmentFlags,
        context: AssessmentContext,
    ) -> Result<AssessmentResult, AssessmentError> {
        let lease = self.acquire_task(path, operation, flags, context).await;
        let mut result = AssessmentResult::default();
        self.finalize_task(lease, flags, &mut result).await?;
        Ok(result)
    }
}

fn kick_registered(registry: &Registry, key: &EvaluationKey) {
    match registry.lookup(key) {
        Some(task) => {
            task.kick();
        }
        None => debug!(key = %key, "No task to kick"),
    }
}
