// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Rule Database Schema Upgrade
//!
//! Ordered, named migrations. Each one runs in its own transaction and
//! records a `migration:<name>` row in the `feature` table, so repeated
//! upgrades are no-ops. Upgrades are best effort: a failing step is logged
//! and skipped, and nothing runs on a read-only handle.

use chrono::Utc;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info, warn};

use crate::domain::assessment::OperationType;
use crate::domain::requirement::{Requirement, RequirementError};
use crate::domain::result::labels;
use crate::domain::rule::{NewRule, RuleFlags};
use crate::infrastructure::db::Database;

const DEVELOPER_ID_REQUIREMENT: &str = "anchor apple generic and certificate 1[field.1.2.840.113635.100.6.2.6] exists and certificate leaf[field.1.2.840.113635.100.6.1.13] exists";

/// One factory-installed authority.
#[derive(Debug, Clone, Copy)]
pub struct DefaultAuthority {
    pub operation: OperationType,
    pub requirement: &'static str,
    pub priority: f64,
    pub label: &'static str,
}

pub const DEFAULT_AUTHORITIES: &[DefaultAuthority] = &[
    DefaultAuthority {
        operation: OperationType::Execute,
        requirement: "anchor apple",
        priority: 0.0,
        label: labels::APPLE_SYSTEM,
    },
    DefaultAuthority {
        operation: OperationType::Execute,
        requirement: "anchor apple generic and certificate leaf[field.1.2.840.113635.100.6.1.9] exists",
        priority: 0.0,
        label: labels::MAC_APP_STORE,
    },
    DefaultAuthority {
        operation: OperationType::Execute,
        requirement: DEVELOPER_ID_REQUIREMENT,
        priority: 0.0,
        label: labels::DEVELOPER_ID,
    },
    DefaultAuthority {
        operation: OperationType::Install,
        requirement: "anchor apple generic and certificate 1[subject.CN] = \"Apple Software Update Certification Authority\"",
        priority: 0.0,
        label: labels::APPLE_INSTALLER,
    },
    DefaultAuthority {
        operation: OperationType::Install,
        requirement: "anchor apple generic and certificate 1[field.1.2.840.113635.100.6.2.6] exists and certificate leaf[field.1.2.840.113635.100.6.1.14] exists",
        priority: 0.0,
        label: labels::DEVELOPER_ID,
    },
];

pub const NOTARIZED_AUTHORITIES: &[DefaultAuthority] = &[DefaultAuthority {
    operation: OperationType::Execute,
    requirement: concat!(
        "anchor apple generic and certificate 1[field.1.2.840.113635.100.6.2.6] exists and certificate leaf[field.1.2.840.113635.100.6.1.13] exists",
        " and notarized"
    ),
    priority: 5.0,
    label: labels::NOTARIZED_DEVELOPER_ID,
}];

impl DefaultAuthority {
    pub fn to_new_rule(&self) -> Result<NewRule, RequirementError> {
        Ok(NewRule::allow(self.operation, Requirement::parse(self.requirement)?)
            .with_priority(self.priority)
            .with_label(self.label)
            .with_flags(RuleFlags::DEFAULT))
    }
}

/// Every factory rule, in installation order.
pub fn default_rules() -> Result<Vec<NewRule>, RequirementError> {
    DEFAULT_AUTHORITIES
        .iter()
        .chain(NOTARIZED_AUTHORITIES)
        .map(DefaultAuthority::to_new_rule)
        .collect()
}

enum Step {
    Sql(&'static [&'static str]),
    Authorities(&'static [DefaultAuthority]),
}

struct Migration {
    name: &'static str,
    step: Step,
}

const SCHEMA_V1: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS authority (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type INTEGER NOT NULL,
        requirement TEXT NOT NULL,
        allow INTEGER NOT NULL DEFAULT 1,
        disabled INTEGER NOT NULL DEFAULT 0,
        expires INTEGER,
        priority REAL NOT NULL DEFAULT 0,
        label TEXT,
        flags INTEGER NOT NULL DEFAULT 0,
        ctime INTEGER NOT NULL,
        mtime INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS authority_type_priority ON authority (type, priority DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS object (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type INTEGER NOT NULL,
        hash TEXT NOT NULL,
        allow INTEGER NOT NULL,
        expires INTEGER,
        authority INTEGER REFERENCES authority (id) ON DELETE CASCADE,
        label TEXT,
        UNIQUE (type, hash)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS object_authority ON object (authority)",
];

const AUTHORITY_REMARKS: &[&str] = &["ALTER TABLE authority ADD COLUMN remarks TEXT"];

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "schema_v1",
        step: Step::Sql(SCHEMA_V1),
    },
    Migration {
        name: "authority_remarks",
        step: Step::Sql(AUTHORITY_REMARKS),
    },
    Migration {
        name: "default_authorities",
        step: Step::Authorities(DEFAULT_AUTHORITIES),
    },
    Migration {
        name: "notarized_authorities",
        step: Step::Authorities(NOTARIZED_AUTHORITIES),
    },
];

#[derive(Debug, Default, Clone)]
pub struct UpgradeReport {
    pub applied: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
    /// Nothing was attempted because the handle is read-only.
    pub skipped_read_only: bool,
}

/// Brings the schema up to date. Never fails.
pub async fn upgrade(db: &Database) -> UpgradeReport {
    let mut report = UpgradeReport::default();
    if !db.is_writable() {
        debug!(path = %db.location().display(), "Skipping schema upgrade on read-only database");
        report.skipped_read_only = true;
        return report;
    }

    if let Err(e) = sqlx::query(
        "CREATE TABLE IF NOT EXISTS feature (name TEXT PRIMARY KEY, value TEXT, remarks TEXT)",
    )
    .execute(db.get_pool())
    .await
    {
        warn!(error = %e, "Cannot create feature table; schema upgrade abandoned");
        report.failed.push(("feature", e.to_string()));
        return report;
    }

    for migration in MIGRATIONS {
        match apply_migration(db, migration).await {
            Ok(true) => {
                info!(migration = migration.name, "Applied rule database migration");
                report.applied.push(migration.name);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(migration = migration.name, error = %e, "Rule database migration failed");
                report.failed.push((migration.name, e.to_string()));
            }
        }
    }
    report
}

async fn apply_migration(db: &Database, migration: &Migration) -> Result<bool, sqlx::Error> {
    let marker = format!("migration:{}", migration.name);
    let mut tx = db.get_pool().begin().await?;

    let done = sqlx::query("SELECT value FROM feature WHERE name = ?")
        .bind(&marker)
        .fetch_optional(&mut *tx)
        .await?;
    if done.is_some() {
        return Ok(false);
    }

    match &migration.step {
        Step::Sql(statements) => {
            for statement in statements.iter() {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
        }
        Step::Authorities(authorities) => {
            for authority in authorities.iter() {
                insert_authority(&mut *tx, authority).await?;
            }
        }
    }

    sqlx::query("INSERT INTO feature (name, value, remarks) VALUES (?, ?, ?)")
        .bind(&marker)
        .bind(Utc::now().to_rfc3339())
        .bind("schema migration")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}

async fn insert_authority(
    conn: &mut SqliteConnection,
    authority: &DefaultAuthority,
) -> Result<(), sqlx::Error> {
    let existing = sqlx::query("SELECT id FROM authority WHERE type = ? AND requirement = ?")
        .bind(authority.operation.code())
        .bind(authority.requirement)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(row) = existing {
        let id: i64 = row.try_get("id")?;
        debug!(id, label = authority.label, "Default authority already present");
        return Ok(());
    }

    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO authority (type, requirement, allow, disabled, priority, label, flags, ctime, mtime)
        VALUES (?, ?, 1, 0, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(authority.operation.code())
    .bind(authority.requirement)
    .bind(authority.priority)
    .bind(authority.label)
    .bind(RuleFlags::DEFAULT.bits() as i64)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
