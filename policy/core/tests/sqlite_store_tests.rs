// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests against a SQLite-backed rule store.
//!
//! Covers:
//! - Factory authorities installed by the schema upgrade
//! - Developer ID toggling through control operations
//! - One-time migration of user rules from a legacy database

mod common;

use std::sync::Arc;

use common::{developer_signature, FakeValidator, Harness, ADMIN_TOKEN};
use gatekeeper_core::application::assessment_service::{
    AssessmentService, ControlArgument, ControlOperation, ControlOutcome,
};
use gatekeeper_core::application::repository_factory::create_rule_repository;
use gatekeeper_core::domain::assessment::{AssessmentContext, AssessmentFlags, OperationType};
use gatekeeper_core::domain::authorization::AuthorizationToken;
use gatekeeper_core::domain::config::DatabaseConfig;
use gatekeeper_core::domain::repository::{features, RuleRepository};
use gatekeeper_core::domain::requirement::Requirement;
use gatekeeper_core::domain::result::labels;
use gatekeeper_core::domain::rule::{NewRule, RuleMutation, RuleSelector};
use gatekeeper_core::infrastructure::db::Database;
use gatekeeper_core::infrastructure::migrations;
use gatekeeper_core::infrastructure::repositories::SqliteRuleStore;
use tempfile::TempDir;

async fn sqlite_repo(dir: &TempDir, name: &str) -> Arc<dyn RuleRepository> {
    let config = DatabaseConfig {
        path: dir.path().join(name),
        legacy_path: None,
        max_connections: 2,
    };
    create_rule_repository(&config).await
}

fn admin() -> ControlArgument {
    ControlArgument::Token(AuthorizationToken::new(ADMIN_TOKEN))
}

#[tokio::test]
async fn test_factory_rules_allow_developer_id() {
    let db_dir = TempDir::new().unwrap();
    let repo = sqlite_repo(&db_dir, "policy.db").await;
    assert!(repo.is_writable());

    let defaults = repo.rules(&RuleSelector::all()).await.unwrap();
    assert_eq!(defaults.len(), migrations::default_rules().unwrap().len());
    assert!(defaults.iter().all(|r| r.is_default()));

    let harness = Harness::new(repo, FakeValidator::new());
    let path = harness.object("Signed.app");
    harness.validator.sign(&path, developer_signature("com.example.signed", "9a"));
    let service = AssessmentService::new(harness.manager(None));

    let result = service
        .create_assessment(&path, AssessmentFlags::direct(), AssessmentContext::default())
        .await
        .unwrap();
    assert_eq!(result.raw_result().verdict, Some(true));
    assert_eq!(result.raw_result().authority.source.as_deref(), Some(labels::DEVELOPER_ID));

    let cached = service
        .create_assessment(&path, AssessmentFlags::direct(), AssessmentContext::default())
        .await
        .unwrap();
    assert!(cached.raw_result().authority.cached);
}

#[tokio::test]
async fn test_developer_id_toggle() {
    let db_dir = TempDir::new().unwrap();
    let repo = sqlite_repo(&db_dir, "policy.db").await;
    let harness = Harness::new(repo, FakeValidator::new());
    let path = harness.object("Signed.app");
    harness.validator.sign(&path, developer_signature("com.example.signed", "8b"));
    let service = AssessmentService::new(harness.manager(None));

    assert_eq!(
        service.control(ControlOperation::DevIdStatus, ControlArgument::None).await.unwrap(),
        ControlOutcome::Status { enabled: true }
    );
    let allowed = service
        .create_assessment(&path, AssessmentFlags::direct(), AssessmentContext::default())
        .await
        .unwrap();
    assert!(allowed.raw_result().is_allowed());

    service.control(ControlOperation::DisableDevId, admin()).await.unwrap();
    assert_eq!(
        service.control(ControlOperation::DevIdStatus, ControlArgument::None).await.unwrap(),
        ControlOutcome::Status { enabled: false }
    );

    let denied = service
        .create_assessment(&path, AssessmentFlags::direct(), AssessmentContext::default())
        .await
        .unwrap();
    let result = denied.raw_result();
    assert_eq!(result.verdict, Some(false));
    assert!(!result.authority.cached);
    assert_eq!(result.authority.source.as_deref(), Some(labels::DEVELOPER_ID));
    assert!(result.authority.row_id.is_some());

    service.control(ControlOperation::EnableDevId, admin()).await.unwrap();
    let restored = service
        .create_assessment(&path, AssessmentFlags::direct(), AssessmentContext::default())
        .await
        .unwrap();
    assert!(restored.raw_result().is_allowed());
}

#[tokio::test]
async fn test_legacy_rules_migrate_once() {
    let dir = TempDir::new().unwrap();
    let legacy_path = dir.path().join("legacy.db");
    {
        let db = Database::open(&legacy_path, 1).await.unwrap();
        migrations::upgrade(&db).await;
        let legacy = SqliteRuleStore::new(db);
        legacy
            .apply(
                &RuleMutation::Add(
                    NewRule::allow(
                        OperationType::Execute,
                        Requirement::Identifier("com.example.legacy".to_string()),
                    )
                    .with_label("Legacy Tool"),
                ),
                common::start_time(),
            )
            .await
            .unwrap();
        legacy.database().get_pool().close().await;
    }

    let repo = sqlite_repo(&dir, "policy.db").await;
    let harness = Harness::new(repo.clone(), FakeValidator::new());
    let service = AssessmentService::new(harness.manager(None)).with_legacy_database(legacy_path);

    assert_eq!(
        service.control(ControlOperation::MigrateLegacy, admin()).await.unwrap(),
        ControlOutcome::Migrated { rules: 1 }
    );
    let migrated = repo.rules(&RuleSelector::label("Legacy Tool")).await.unwrap();
    assert_eq!(migrated.len(), 1);
    assert!(repo.feature(features::LEGACY_MIGRATED).await.unwrap().is_some());

    assert_eq!(
        service.control(ControlOperation::MigrateLegacy, admin()).await.unwrap(),
        ControlOutcome::Migrated { rules: 0 }
    );
    assert_eq!(repo.rules(&RuleSelector::label("Legacy Tool")).await.unwrap().len(), 1);
}
