// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for evaluation coalescing in the `EvaluationManager`.
//!
//! Covers:
//! - Concurrent callers for one object share a single evaluation
//! - Tasks leave the registry when the last caller detaches
//! - `ignore_active_assessments` callers never share
//! - Low-priority starts wait for the deferred trigger or a foreground caller
//! - A declining feedback listener cancels the evaluation
//! - Listeners of callers that join a running task hear its progress

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{developer_signature, eventually, FakeValidator, Harness};
use gatekeeper_core::application::evaluation_task::TaskState;
use gatekeeper_core::domain::assessment::{AssessmentContext, AssessmentFlags, FeedbackEvent, OperationType};
use gatekeeper_core::domain::errors::AssessmentError;
use gatekeeper_core::domain::requirement::Requirement;
use gatekeeper_core::domain::rule::NewRule;
use gatekeeper_core::domain::scheduler::{DeferredTrigger, EvaluationKey};
use gatekeeper_core::infrastructure::repositories::InMemoryRuleRepository;
use gatekeeper_core::infrastructure::ManualTrigger;

const EXECUTE: OperationType = OperationType::Execute;

fn editor_rules() -> Arc<InMemoryRuleRepository> {
    Arc::new(InMemoryRuleRepository::with_rules(&[NewRule::allow(
        EXECUTE,
        Requirement::Identifier("com.example.editor".to_string()),
    )
    .with_priority(10.0)
    .with_label("Editor")]))
}

fn low_priority() -> AssessmentFlags {
    AssessmentFlags {
        low_priority: true,
        ..AssessmentFlags::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_evaluation() {
    let harness = Harness::new(editor_rules(), FakeValidator::gated());
    let path = harness.object("Editor");
    harness.validator.sign(&path, developer_signature("com.example.editor", "ab"));
    let manager = harness.manager(None);

    let mut callers = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let path = path.clone();
        callers.push(tokio::spawn(async move {
            manager
                .evaluate(&path, EXECUTE, AssessmentFlags::default(), AssessmentContext::default())
                .await
        }));
    }

    assert!(
        eventually(|| manager
            .task_for(&path, EXECUTE)
            .is_some_and(|t| t.lease_count() == 8))
        .await
    );
    harness.validator.release();

    for caller in callers {
        let result = caller.await.unwrap().unwrap();
        assert_eq!(result.verdict, Some(true));
        assert_eq!(result.authority.source.as_deref(), Some("Editor"));
    }
    assert_eq!(harness.validator.lookups(), 1);
    assert_eq!(harness.validator.validations(), 1);
    assert_eq!(manager.active_tasks(), 0);
}

#[tokio::test]
async fn test_last_lease_removes_task() {
    let harness = Harness::new(editor_rules(), FakeValidator::gated());
    let path = harness.object("Editor");
    let manager = harness.manager(None);

    let first = manager
        .acquire_task(&path, EXECUTE, AssessmentFlags::default(), AssessmentContext::default())
        .await;
    let second = manager
        .acquire_task(&path, EXECUTE, AssessmentFlags::default(), AssessmentContext::default())
        .await;
    assert!(Arc::ptr_eq(first.task(), second.task()));
    assert_eq!(first.task().lease_count(), 2);
    assert_eq!(manager.active_tasks(), 1);

    drop(first);
    assert_eq!(second.task().lease_count(), 1);
    assert!(manager.task_for(&path, EXECUTE).is_some());

    drop(second);
    assert!(manager.task_for(&path, EXECUTE).is_none());
    assert_eq!(manager.active_tasks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ignore_active_assessments_runs_separately() {
    let harness = Harness::new(editor_rules(), FakeValidator::gated());
    let path = harness.object("Editor");
    harness.validator.sign(&path, developer_signature("com.example.editor", "cd"));
    let manager = harness.manager(None);

    let shared = {
        let manager = manager.clone();
        let path = path.clone();
        tokio::spawn(async move {
            manager
                .evaluate(&path, EXECUTE, AssessmentFlags::default(), AssessmentContext::default())
                .await
        })
    };
    assert!(eventually(|| manager.task_for(&path, EXECUTE).is_some()).await);
    let shared_task = manager.task_for(&path, EXECUTE).unwrap();

    let isolated = {
        let manager = manager.clone();
        let path = path.clone();
        let flags = AssessmentFlags {
            ignore_active_assessments: true,
            ..AssessmentFlags::default()
        };
        tokio::spawn(async move {
            manager
                .evaluate(&path, EXECUTE, flags, AssessmentContext::default())
                .await
        })
    };
    assert!(
        eventually(|| manager
            .task_for(&path, EXECUTE)
            .is_some_and(|t| !Arc::ptr_eq(&t, &shared_task)))
        .await
    );
    let isolated_task = manager.task_for(&path, EXECUTE).unwrap();
    assert!(!isolated_task.is_sharable());
    assert!(shared_task.is_sharable());

    harness.validator.release();
    assert_eq!(shared.await.unwrap().unwrap().verdict, Some(true));
    assert_eq!(isolated.await.unwrap().unwrap().verdict, Some(true));

    assert_eq!(harness.validator.lookups(), 2);
    assert_eq!(manager.active_tasks(), 0);
}

#[tokio::test]
async fn test_low_priority_waits_for_trigger() {
    let harness = Harness::new(editor_rules(), FakeValidator::new());
    let path = harness.object("Editor");
    harness.validator.sign(&path, developer_signature("com.example.editor", "ef"));
    let trigger = Arc::new(ManualTrigger::new());
    let manager = harness.manager(Some(trigger.clone() as Arc<dyn DeferredTrigger>));
    let key = EvaluationKey::derive(&path, EXECUTE);

    let deferred = {
        let manager = manager.clone();
        let path = path.clone();
        tokio::spawn(async move {
            manager
                .evaluate(&path, EXECUTE, low_priority(), AssessmentContext::default())
                .await
        })
    };
    assert!(eventually(|| trigger.is_pending(&key)).await);

    let task = manager.task_for(&path, EXECUTE).unwrap();
    assert!(!task.is_kicked());
    assert_eq!(task.state(), TaskState::Pending);
    assert_eq!(harness.validator.lookups(), 0);

    assert!(trigger.fire(&key));
    let result = deferred.await.unwrap().unwrap();
    assert_eq!(result.verdict, Some(true));
    assert_eq!(harness.validator.lookups(), 1);
    assert!(!trigger.is_pending(&key));
}

#[tokio::test]
async fn test_foreground_caller_starts_deferred_task() {
    let harness = Harness::new(editor_rules(), FakeValidator::new());
    let path = harness.object("Editor");
    harness.validator.sign(&path, developer_signature("com.example.editor", "12"));
    let trigger = Arc::new(ManualTrigger::new());
    let manager = harness.manager(Some(trigger.clone() as Arc<dyn DeferredTrigger>));
    let key = EvaluationKey::derive(&path, EXECUTE);

    let deferred = {
        let manager = manager.clone();
        let path = path.clone();
        tokio::spawn(async move {
            manager
                .evaluate(&path, EXECUTE, low_priority(), AssessmentContext::default())
                .await
        })
    };
    assert!(eventually(|| trigger.is_pending(&key)).await);

    let foreground = manager
        .evaluate(&path, EXECUTE, AssessmentFlags::default(), AssessmentContext::default())
        .await
        .unwrap();
    let background = deferred.await.unwrap().unwrap();

    assert_eq!(foreground, background);
    assert_eq!(harness.validator.lookups(), 1);
    assert!(!trigger.is_pending(&key));
    assert_eq!(manager.active_tasks(), 0);
}

#[tokio::test]
async fn test_manager_kick_opens_gate_once() {
    let harness = Harness::new(editor_rules(), FakeValidator::new());
    let path = harness.object("Editor");
    let trigger = Arc::new(ManualTrigger::new());
    let manager = harness.manager(Some(trigger.clone() as Arc<dyn DeferredTrigger>));
    let key = EvaluationKey::derive(&path, EXECUTE);

    let lease = manager
        .acquire_task(&path, EXECUTE, low_priority(), AssessmentContext::default())
        .await;
    assert!(!lease.task().is_kicked());

    manager.kick(&key);
    assert!(lease.task().is_kicked());
    assert!(!lease.task().kick());

    let mut result = Default::default();
    manager
        .finalize_task(lease, low_priority(), &mut result)
        .await
        .unwrap();
    // Unsigned object with no ticket.
    assert_eq!(result.authority.source.as_deref(), Some("Unsigned Code"));
}

#[tokio::test]
async fn test_abandoned_low_priority_request_cancels_registration() {
    let harness = Harness::new(editor_rules(), FakeValidator::new());
    let path = harness.object("Editor");
    let trigger = Arc::new(ManualTrigger::new());
    let manager = harness.manager(Some(trigger.clone() as Arc<dyn DeferredTrigger>));
    let key = EvaluationKey::derive(&path, EXECUTE);

    let deferred = {
        let manager = manager.clone();
        let path = path.clone();
        tokio::spawn(async move {
            manager
                .evaluate(&path, EXECUTE, low_priority(), AssessmentContext::default())
                .await
        })
    };
    assert!(eventually(|| trigger.is_pending(&key)).await);

    deferred.abort();
    assert!(deferred.await.unwrap_err().is_cancelled());

    assert!(eventually(|| manager.active_tasks() == 0).await);
    assert!(!trigger.is_pending(&key));
    assert!(!trigger.fire(&key));
    assert_eq!(harness.validator.lookups(), 0);
}

#[tokio::test]
async fn test_declined_feedback_cancels_evaluation() {
    let harness = Harness::new(editor_rules(), FakeValidator::new());
    let path = harness.object("Editor");
    harness.validator.sign(&path, developer_signature("com.example.editor", "34"));
    let manager = harness.manager(None);

    let context = AssessmentContext::default().with_feedback(Arc::new(|_: &FeedbackEvent| false));
    let error = manager
        .evaluate(&path, EXECUTE, AssessmentFlags::default(), context)
        .await
        .unwrap_err();
    assert!(matches!(error, AssessmentError::Cancelled));
    assert_eq!(harness.validator.validations(), 0);

    let result = manager
        .evaluate(&path, EXECUTE, AssessmentFlags::default(), AssessmentContext::default())
        .await
        .unwrap();
    assert_eq!(result.verdict, Some(true));
    assert_eq!(harness.validator.validations(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_joining_caller_listener_hears_progress() {
    let harness = Harness::new(editor_rules(), FakeValidator::gated());
    let path = harness.object("Editor");
    harness.validator.sign(&path, developer_signature("com.example.editor", "56"));
    let manager = harness.manager(None);

    let first = {
        let manager = manager.clone();
        let path = path.clone();
        tokio::spawn(async move {
            manager
                .evaluate(&path, EXECUTE, AssessmentFlags::default(), AssessmentContext::default())
                .await
        })
    };
    assert!(
        eventually(|| manager
            .task_for(&path, EXECUTE)
            .is_some_and(|t| t.lease_count() == 1))
        .await
    );

    let heard = Arc::new(AtomicUsize::new(0));
    let listener = {
        let heard = heard.clone();
        move |event: &FeedbackEvent| {
            if matches!(event, FeedbackEvent::Progress { .. }) {
                heard.fetch_add(1, Ordering::SeqCst);
            }
            true
        }
    };
    let second = {
        let manager = manager.clone();
        let path = path.clone();
        let context = AssessmentContext::default().with_feedback(Arc::new(listener));
        tokio::spawn(async move {
            manager
                .evaluate(&path, EXECUTE, AssessmentFlags::default(), context)
                .await
        })
    };
    assert!(
        eventually(|| manager
            .task_for(&path, EXECUTE)
            .is_some_and(|t| t.lease_count() == 2))
        .await
    );
    harness.validator.release();

    assert_eq!(first.await.unwrap().unwrap().verdict, Some(true));
    assert_eq!(second.await.unwrap().unwrap().verdict, Some(true));
    assert_eq!(heard.load(Ordering::SeqCst), 1);
    assert_eq!(harness.validator.lookups(), 1);
}
