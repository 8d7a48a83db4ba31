// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Evaluation Task
//!
//! One in-flight evaluation of a `(path, operation)` pair, shared by every
//! caller that attaches to it. Two independent controls govern it:
//!
//! - **Who runs it.** The first caller through `perform_evaluation` becomes
//!   the evaluator and spawns the body. Everyone else only waits.
//! - **When it runs.** The body parks on a start gate until `kick` opens it.
//!   Foreground callers kick immediately; low-priority callers leave that
//!   to a deferred trigger.
//!
//! ```text
//! Pending ──gate opens──▶ Running ──body returns──▶ Done
//!    │
//!    └──last lease dropped──▶ (abandoned, body exits without evaluating)
//! ```
//!
//! The outcome, including any error, is published once on a watch channel
//! and copied into each waiter's result.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Single-flight evaluation with deferred start

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, warn};

use crate::application::policy_engine::PolicyEngine;
use crate::domain::assessment::{
    AssessmentContext, AssessmentFlags, FeedbackEvent, FeedbackListener, OperationType,
};
use crate::domain::errors::AssessmentError;
use crate::domain::result::AssessmentResult;
use crate::domain::scheduler::EvaluationKey;
use crate::infrastructure::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Closed,
    Open,
    Abandoned,
}

/// What every waiter of a task observes.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub result: AssessmentResult,
    pub error: Option<AssessmentError>,
}

/// Fans progress events out to every attached caller's listener.
///
/// Evaluation proceeds when nobody is listening or at least one listener
/// agrees. A relay that finds no listeners, or only declining ones, takes
/// the task out of sharing.
pub struct FeedbackRelay {
    listeners: Mutex<Vec<Arc<dyn FeedbackListener>>>,
    sharable: Arc<AtomicBool>,
}

impl FeedbackRelay {
    fn new(sharable: Arc<AtomicBool>) -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            sharable,
        }
    }

    pub fn add(&self, listener: Arc<dyn FeedbackListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FeedbackListener for FeedbackRelay {
    fn on_feedback(&self, event: &FeedbackEvent) -> bool {
        let listeners = self.listeners.lock().clone();
        if listeners.is_empty() {
            self.sharable.store(false, Ordering::Release);
            return true;
        }
        let mut proceed = false;
        for listener in &listeners {
            proceed |= listener.on_feedback(event);
        }
        if !proceed {
            self.sharable.store(false, Ordering::Release);
        }
        proceed
    }
}

pub struct EvaluationTask {
    key: EvaluationKey,
    path: PathBuf,
    operation: OperationType,
    sharable: Arc<AtomicBool>,
    evaluators: AtomicUsize,
    /// Attached callers. Only changed under the manager's registry lock.
    pub(crate) leases: AtomicUsize,
    state: Mutex<TaskState>,
    gate: watch::Sender<Gate>,
    completion: watch::Sender<Option<TaskOutcome>>,
    relay: Arc<FeedbackRelay>,
}

impl EvaluationTask {
    pub fn new(key: EvaluationKey, path: &Path, operation: OperationType) -> Self {
        let sharable = Arc::new(AtomicBool::new(true));
        Self {
            key,
            path: path.to_path_buf(),
            operation,
            relay: Arc::new(FeedbackRelay::new(sharable.clone())),
            sharable,
            evaluators: AtomicUsize::new(0),
            leases: AtomicUsize::new(0),
            state: Mutex::new(TaskState::Pending),
            gate: watch::channel(Gate::Closed).0,
            completion: watch::channel(None).0,
        }
    }

    pub fn key(&self) -> &EvaluationKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn operation(&self) -> OperationType {
        self.operation
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn is_sharable(&self) -> bool {
        self.sharable.load(Ordering::Acquire)
    }

    pub fn mark_unsharable(&self) {
        self.sharable.store(false, Ordering::Release);
    }

    pub fn lease_count(&self) -> usize {
        self.leases.load(Ordering::Acquire)
    }

    /// Whether the start gate has been opened.
    pub fn is_kicked(&self) -> bool {
        *self.gate.borrow() == Gate::Open
    }

    /// Called by every attaching caller. The first one spawns the body and
    /// returns once the body is parked on the start gate.
    pub async fn perform_evaluation(
        self: &Arc<Self>,
        engine: &Arc<PolicyEngine>,
        flags: AssessmentFlags,
        context: AssessmentContext,
    ) {
        let is_evaluator = self.evaluators.fetch_add(1, Ordering::AcqRel) == 0;

        if let Some(listener) = &context.feedback {
            self.relay.add(listener.clone());
        }

        if is_evaluator {
            let mut body_context = context;
            body_context.feedback = Some(self.relay.clone() as Arc<dyn FeedbackListener>);
            let (ready_tx, ready_rx) = oneshot::channel();
            let task = self.clone();
            let engine = engine.clone();
            tokio::spawn(async move {
                task.run_body(engine, flags, body_context, ready_tx).await;
            });
            if ready_rx.await.is_err() {
                warn!(key = %self.key, "Evaluation body exited before signalling readiness");
            }
        }

        if !flags.low_priority {
            self.kick();
        }
    }

    /// Opens the start gate. Only the first call has an effect.
    pub fn kick(&self) -> bool {
        let opened = self.gate.send_if_modified(|gate| {
            if *gate == Gate::Closed {
                *gate = Gate::Open;
                true
            } else {
                false
            }
        });
        if opened {
            debug!(key = %self.key, "Evaluation start permitted");
        }
        opened
    }

    /// Releases a body still parked on the gate once nobody is attached.
    pub(crate) fn abandon(&self) {
        self.gate.send_if_modified(|gate| {
            if *gate == Gate::Closed {
                *gate = Gate::Abandoned;
                true
            } else {
                false
            }
        });
    }

    async fn run_body(
        self: Arc<Self>,
        engine: Arc<PolicyEngine>,
        flags: AssessmentFlags,
        context: AssessmentContext,
        ready: oneshot::Sender<()>,
    ) {
        let mut gate = self.gate.subscribe();
        let _ = ready.send(());

        let opened = match gate.wait_for(|g| *g != Gate::Closed).await {
            Ok(g) => *g == Gate::Open,
            Err(_) => false,
        };
        if !opened {
            debug!(key = %self.key, "Evaluation abandoned before start");
            self.complete(TaskOutcome {
                result: AssessmentResult::default(),
                error: Some(AssessmentError::Internal("evaluation abandoned".to_string())),
            });
            return;
        }

        *self.state.lock() = TaskState::Running;
        let started = Instant::now();
        let mut result = AssessmentResult::default();
        let evaluation = std::panic::AssertUnwindSafe(engine.evaluate(
            &self.path,
            self.operation,
            flags,
            &context,
            &mut result,
        ))
        .catch_unwind()
        .await;

        let error = match evaluation {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => {
                error!(key = %self.key, path = %self.path.display(), "Evaluation panicked");
                Some(AssessmentError::Internal("evaluation panicked".to_string()))
            }
        };
        metrics::observe_evaluation(self.operation, started.elapsed());
        self.complete(TaskOutcome { result, error });
    }

    fn complete(&self, outcome: TaskOutcome) {
        *self.state.lock() = TaskState::Done;
        self.completion.send_replace(Some(outcome));
    }

    /// Waits for the body to finish and merges its result into `result`.
    /// Returns the error the evaluation ended with, if any.
    pub async fn wait_for_completion(&self, result: &mut AssessmentResult) -> Option<AssessmentError> {
        let mut completion = self.completion.subscribe();
        let outcome = match completion.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        match outcome {
            Some(outcome) => {
                result.merge_from(&outcome.result);
                outcome.error
            }
            None => Some(AssessmentError::Internal("evaluation task dropped".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> EvaluationTask {
        let path = Path::new("/usr/bin/true");
        EvaluationTask::new(EvaluationKey::derive(path, OperationType::Execute), path, OperationType::Execute)
    }

    fn progress() -> FeedbackEvent {
        FeedbackEvent::Progress {
            path: PathBuf::from("/usr/bin/true"),
            current: 0,
            total: 1,
        }
    }

    #[test]
    fn test_kick_is_idempotent() {
        let t = task();
        assert!(t.kick());
        assert!(!t.kick());
        assert!(t.is_kicked());
        t.abandon();
        assert!(t.is_kicked());
    }

    #[test]
    fn test_abandon_blocks_later_kick() {
        let t = task();
        t.abandon();
        assert!(!t.kick());
        assert!(!t.is_kicked());
    }

    #[test]
    fn test_relay_proceeds_when_any_listener_agrees() {
        let t = task();
        t.relay.add(Arc::new(|_: &FeedbackEvent| false));
        t.relay.add(Arc::new(|_: &FeedbackEvent| true));
        assert!(t.relay.on_feedback(&progress()));
        assert!(t.is_sharable());
    }

    #[test]
    fn test_relay_without_consent_marks_unsharable() {
        let lonely = task();
        assert!(lonely.relay.on_feedback(&progress()));
        assert!(!lonely.is_sharable());

        let declined = task();
        declined.relay.add(Arc::new(|_: &FeedbackEvent| false));
        assert!(!declined.relay.on_feedback(&progress()));
        assert!(!declined.is_sharable());
    }

    #[tokio::test]
    async fn test_waiters_see_published_outcome() {
        let shared = Arc::new(task());
        let mut expected = AssessmentResult::default();
        expected.decide(false, "No Matching Rule");

        let waiter = {
            let task = shared.clone();
            tokio::spawn(async move {
                let mut result = AssessmentResult::default();
                let error = task.wait_for_completion(&mut result).await;
                (result, error)
            })
        };
        shared.complete(TaskOutcome {
            result: expected.clone(),
            error: Some(AssessmentError::Cancelled),
        });

        let (result, error) = waiter.await.unwrap();
        assert_eq!(result, expected);
        assert!(matches!(error, Some(AssessmentError::Cancelled)));
        assert_eq!(shared.state(), TaskState::Done);
    }
}
