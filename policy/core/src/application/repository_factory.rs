// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Opens the rule database named by configuration and wraps it in a
//! `RuleRepository`. A database that cannot be opened at all yields an
//! empty read-only repository instead of an error.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Composition of storage adapters

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::config::DatabaseConfig;
use crate::domain::repository::RuleRepository;
use crate::infrastructure::db::{AccessMode, Database};
use crate::infrastructure::migrations;
use crate::infrastructure::repositories::{InMemoryRuleRepository, SqliteRuleStore};

/// Opens the configured rule database, upgrading its schema when writable.
pub async fn create_rule_repository(config: &DatabaseConfig) -> Arc<dyn RuleRepository> {
    match Database::open(&config.path, config.max_connections).await {
        Ok(db) => {
            let report = migrations::upgrade(&db).await;
            if !report.applied.is_empty() {
                info!(applied = ?report.applied, "Rule database upgraded");
            }
            Arc::new(SqliteRuleStore::new(db))
        }
        Err(e) => {
            warn!(path = %config.path.display(), error = %e, "No rule database available");
            Arc::new(InMemoryRuleRepository::unavailable())
        }
    }
}

/// Read-only handle on a legacy rule database, if one exists at `path`.
pub async fn open_legacy_repository(path: &Path) -> Option<Arc<dyn RuleRepository>> {
    if !path.exists() {
        return None;
    }
    match Database::open_with_mode(path, 1, AccessMode::ReadOnly).await {
        Ok(db) => Some(Arc::new(SqliteRuleStore::new(db))),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot open legacy rule database");
            None
        }
    }
}
