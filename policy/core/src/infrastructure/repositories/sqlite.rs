// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SQLite Rule Store
//!
//! Authority table, object cache and feature rows in one SQLite file.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `RuleRepository` over `sqlx::SqlitePool`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use crate::domain::assessment::OperationType;
use crate::domain::repository::{features, RepositoryError, RuleRepository};
use crate::domain::requirement::Requirement;
use crate::domain::rule::{
    CachedObjectVerdict, MutationOutcome, NewRule, ObjectOutcome, Rule, RuleFlags, RuleMutation,
    RuleSelector,
};
use crate::domain::signature::ContentHash;
use crate::infrastructure::db::Database;

pub struct SqliteRuleStore {
    db: Database,
}

impl SqliteRuleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn ensure_writable(&self) -> Result<(), RepositoryError> {
        if self.db.is_writable() {
            Ok(())
        } else {
            Err(RepositoryError::ReadOnly)
        }
    }
}

fn timestamp(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn parse_rule_row(row: &SqliteRow) -> Result<Rule, RepositoryError> {
    let operation = OperationType::from_code(row.try_get("type")?)
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
    let requirement_text: String = row.try_get("requirement")?;
    let requirement = Requirement::parse(&requirement_text)?;
    let flags: i64 = row.try_get("flags")?;
    let ctime: i64 = row.try_get("ctime")?;
    let mtime: i64 = row.try_get("mtime")?;

    Ok(Rule {
        id: row.try_get("id")?,
        operation,
        requirement,
        allow: row.try_get::<i64, _>("allow")? != 0,
        disabled: row.try_get::<i64, _>("disabled")? != 0,
        expires: timestamp(row.try_get("expires")?),
        priority: row.try_get("priority")?,
        label: row.try_get("label")?,
        flags: RuleFlags::from_bits(flags as u32),
        // Absent on databases that predate the remarks column.
        remarks: row.try_get::<Option<String>, _>("remarks").ok().flatten(),
        created_at: timestamp(Some(ctime)).unwrap_or_default(),
        updated_at: timestamp(Some(mtime)).unwrap_or_default(),
    })
}

async fn load_rules(
    conn: &mut SqliteConnection,
    operation: Option<OperationType>,
) -> Result<Vec<Rule>, RepositoryError> {
    let rows = match operation {
        Some(op) => {
            sqlx::query("SELECT * FROM authority WHERE type = ? ORDER BY priority DESC, id ASC")
                .bind(op.code())
                .fetch_all(&mut *conn)
                .await?
        }
        None => {
            sqlx::query("SELECT * FROM authority ORDER BY priority DESC, id ASC")
                .fetch_all(&mut *conn)
                .await?
        }
    };
    rows.iter().map(parse_rule_row).collect()
}

async fn select_rules(
    conn: &mut SqliteConnection,
    selector: &RuleSelector,
) -> Result<Vec<Rule>, RepositoryError> {
    let rules = load_rules(conn, selector.operation).await?;
    Ok(rules.into_iter().filter(|r| selector.matches(r)).collect())
}

async fn insert_rule(
    conn: &mut SqliteConnection,
    rule: &NewRule,
    now: DateTime<Utc>,
) -> Result<i64, RepositoryError> {
    let result = sqlx::query(
        r#"
        INSERT INTO authority (type, requirement, allow, disabled, expires, priority, label, flags, remarks, ctime, mtime)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(rule.operation.code())
    .bind(rule.requirement.to_string())
    .bind(rule.allow as i64)
    .bind(rule.disabled as i64)
    .bind(rule.expires.map(|e| e.timestamp()))
    .bind(rule.priority)
    .bind(&rule.label)
    .bind(rule.flags.bits() as i64)
    .bind(&rule.remarks)
    .bind(now.timestamp())
    .bind(now.timestamp())
    .execute(&mut *conn)
    .await
    .map_err(|e| RepositoryError::Database(format!("Failed to insert rule: {}", e)))?;
    Ok(result.last_insert_rowid())
}

async fn purge_at_or_below(conn: &mut SqliteConnection, priority: f64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM object
        WHERE authority IS NULL
           OR authority IN (SELECT id FROM authority WHERE priority <= ?)
        "#,
    )
    .bind(priority)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

async fn purge_expired_authority_rows(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM authority WHERE expires IS NOT NULL AND expires <= ?")
        .bind(now.timestamp())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

fn max_priority(rules: &[Rule]) -> Option<f64> {
    rules.iter().map(|r| r.priority).reduce(f64::max)
}

#[async_trait]
impl RuleRepository for SqliteRuleStore {
    fn is_writable(&self) -> bool {
        self.db.is_writable()
    }

    async fn find_matching_rules(
        &self,
        operation: OperationType,
        now: DateTime<Utc>,
    ) -> Result<Vec<Rule>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM authority
            WHERE type = ? AND (expires IS NULL OR expires > ?)
            ORDER BY priority DESC, id ASC
            "#,
        )
        .bind(operation.code())
        .bind(now.timestamp())
        .fetch_all(self.db.get_pool())
        .await?;
        rows.iter().map(parse_rule_row).collect()
    }

    async fn cached_verdict(
        &self,
        operation: OperationType,
        hash: &ContentHash,
        now: DateTime<Utc>,
    ) -> Result<Option<CachedObjectVerdict>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT object.allow AS allow, object.authority AS authority,
                   COALESCE(authority.label, object.label) AS label, object.expires AS expires
            FROM object LEFT JOIN authority ON object.authority = authority.id
            WHERE object.type = ? AND object.hash = ?
              AND (object.expires IS NULL OR object.expires > ?)
              AND (object.authority IS NULL OR authority.disabled = 0)
            "#,
        )
        .bind(operation.code())
        .bind(hash.as_str())
        .bind(now.timestamp())
        .fetch_optional(self.db.get_pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(CachedObjectVerdict {
            hash: hash.clone(),
            operation,
            allow: row.try_get::<i64, _>("allow")? != 0,
            authority: row.try_get("authority")?,
            label: row.try_get("label")?,
            expires: timestamp(row.try_get("expires")?),
        }))
    }

    async fn record_outcome(&self, outcome: ObjectOutcome) -> Result<(), RepositoryError> {
        self.ensure_writable()?;
        sqlx::query(
            r#"
            INSERT INTO object (type, hash, allow, expires, authority, label)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (type, hash) DO UPDATE SET
                allow = excluded.allow,
                expires = excluded.expires,
                authority = excluded.authority,
                label = excluded.label
            "#,
        )
        .bind(outcome.operation.code())
        .bind(outcome.hash.as_str())
        .bind(outcome.allow as i64)
        .bind(outcome.expires.map(|e| e.timestamp()))
        .bind(outcome.authority)
        .bind(&outcome.label)
        .execute(self.db.get_pool())
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to record verdict: {}", e)))?;
        Ok(())
    }

    async fn purge_expired_authority(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.ensure_writable()?;
        let mut conn = self.db.get_pool().acquire().await?;
        Ok(purge_expired_authority_rows(&mut conn, now).await?)
    }

    async fn purge_expired_objects(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.ensure_writable()?;
        let result = sqlx::query("DELETE FROM object WHERE expires IS NOT NULL AND expires <= ?")
            .bind(now.timestamp())
            .execute(self.db.get_pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_objects_at_or_below(&self, priority: f64) -> Result<u64, RepositoryError> {
        self.ensure_writable()?;
        let mut conn = self.db.get_pool().acquire().await?;
        Ok(purge_at_or_below(&mut conn, priority).await?)
    }

    async fn apply(
        &self,
        mutation: &RuleMutation,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, RepositoryError> {
        self.ensure_writable()?;
        let mut tx = self.db.get_pool().begin().await?;

        let (affected, inserted_id, purge_priority) = match mutation {
            RuleMutation::Add(rule) => {
                let id = insert_rule(&mut tx, rule, now).await?;
                (1, Some(id), Some(rule.priority))
            }
            RuleMutation::Remove(selector) => {
                let selected = select_rules(&mut tx, selector).await?;
                if selected.is_empty() {
                    return Err(RepositoryError::NotFound("no rule matches".to_string()));
                }
                let removable: Vec<Rule> = selected.into_iter().filter(|r| !r.is_default()).collect();
                if removable.is_empty() {
                    return Err(RepositoryError::Rejected(
                        "default rules cannot be removed".to_string(),
                    ));
                }
                let mut affected = 0;
                for rule in &removable {
                    affected += sqlx::query("DELETE FROM authority WHERE id = ?")
                        .bind(rule.id)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
                (affected, None, max_priority(&removable))
            }
            RuleMutation::Enable(selector) | RuleMutation::Disable(selector) => {
                let disabled = matches!(mutation, RuleMutation::Disable(_));
                let selected = select_rules(&mut tx, selector).await?;
                if selected.is_empty() {
                    return Err(RepositoryError::NotFound("no rule matches".to_string()));
                }
                let mut affected = 0;
                for rule in &selected {
                    affected += sqlx::query("UPDATE authority SET disabled = ?, mtime = ? WHERE id = ?")
                        .bind(disabled as i64)
                        .bind(now.timestamp())
                        .bind(rule.id)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
                (affected, None, max_priority(&selected))
            }
        };

        purge_expired_authority_rows(&mut tx, now).await?;
        if let Some(priority) = purge_priority {
            let purged = purge_at_or_below(&mut tx, priority).await?;
            debug!(priority, purged, "Purged superseded cached verdicts");
        }

        tx.commit().await?;
        Ok(MutationOutcome {
            affected,
            inserted_id,
            purged_at_or_below: purge_priority,
        })
    }

    async fn rules(&self, selector: &RuleSelector) -> Result<Vec<Rule>, RepositoryError> {
        let mut conn = self.db.get_pool().acquire().await?;
        select_rules(&mut conn, selector).await
    }

    async fn feature(&self, name: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM feature WHERE name = ?")
            .bind(name)
            .fetch_optional(self.db.get_pool())
            .await?;
        match row {
            Some(row) => Ok(row.try_get("value")?),
            None => Ok(None),
        }
    }

    async fn set_feature(&self, name: &str, value: &str) -> Result<(), RepositoryError> {
        self.ensure_writable()?;
        sqlx::query(
            "INSERT INTO feature (name, value) VALUES (?, ?) ON CONFLICT (name) DO UPDATE SET value = excluded.value",
        )
        .bind(name)
        .bind(value)
        .execute(self.db.get_pool())
        .await?;
        Ok(())
    }

    async fn replace_explicit_set(
        &self,
        rules: Vec<NewRule>,
        uuid: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        self.ensure_writable()?;
        let mut tx = self.db.get_pool().begin().await?;

        let old_priority: Option<f64> = sqlx::query("SELECT MAX(priority) AS p FROM authority WHERE (flags & ?) != 0")
            .bind(RuleFlags::WHITELIST.bits() as i64)
            .fetch_one(&mut *tx)
            .await?
            .try_get("p")?;

        sqlx::query("DELETE FROM authority WHERE (flags & ?) != 0")
            .bind(RuleFlags::WHITELIST.bits() as i64)
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0;
        for rule in &rules {
            insert_rule(&mut tx, rule, now).await?;
            inserted += 1;
        }

        sqlx::query(
            "INSERT INTO feature (name, value) VALUES (?, ?) ON CONFLICT (name) DO UPDATE SET value = excluded.value",
        )
        .bind(features::EXPLICIT_SET_UUID)
        .bind(uuid)
        .execute(&mut *tx)
        .await?;

        let new_priority = rules.iter().map(|r| r.priority).reduce(f64::max);
        if let Some(priority) = [old_priority, new_priority].into_iter().flatten().reduce(f64::max) {
            purge_at_or_below(&mut tx, priority).await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::migrations;
    use chrono::Duration;

    async fn store() -> SqliteRuleStore {
        let db = Database::in_memory().await.unwrap();
        let report = migrations::upgrade(&db).await;
        assert!(report.failed.is_empty(), "{:?}", report.failed);
        SqliteRuleStore::new(db)
    }

    fn hash(fill: &str) -> ContentHash {
        ContentHash::parse(&fill.repeat(40)).unwrap()
    }

    #[tokio::test]
    async fn test_rules_ordered_by_priority() {
        let store = store().await;
        let now = Utc::now();
        store
            .apply(
                &RuleMutation::Add(
                    NewRule::deny(OperationType::Execute, Requirement::Always)
                        .with_priority(10.0)
                        .with_label("High"),
                ),
                now,
            )
            .await
            .unwrap();

        let rules = store.find_matching_rules(OperationType::Execute, now).await.unwrap();
        assert_eq!(rules[0].label.as_deref(), Some("High"));
        assert!(rules.windows(2).all(|w| w[0].priority >= w[1].priority));
        assert!(rules.iter().all(|r| r.operation == OperationType::Execute));
    }

    #[tokio::test]
    async fn test_expired_rules_are_not_candidates() {
        let store = store().await;
        let now = Utc::now();
        store
            .apply(
                &RuleMutation::Add(
                    NewRule::allow(OperationType::OpenDocument, Requirement::Always)
                        .with_expiry(now + Duration::seconds(10)),
                ),
                now,
            )
            .await
            .unwrap();

        let later = now + Duration::seconds(11);
        assert_eq!(store.find_matching_rules(OperationType::OpenDocument, now).await.unwrap().len(), 1);
        assert!(store
            .find_matching_rules(OperationType::OpenDocument, later)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_cached_verdict_round_trip_and_expiry() {
        let store = store().await;
        let now = Utc::now();
        let outcome = store
            .apply(
                &RuleMutation::Add(
                    NewRule::allow(OperationType::Execute, Requirement::Always)
                        .with_priority(100.0)
                        .with_label("Everything"),
                ),
                now,
            )
            .await
            .unwrap();

        store
            .record_outcome(ObjectOutcome {
                hash: hash("a"),
                operation: OperationType::Execute,
                allow: true,
                authority: outcome.inserted_id,
                label: None,
                expires: Some(now + Duration::seconds(30)),
            })
            .await
            .unwrap();

        let hit = store
            .cached_verdict(OperationType::Execute, &hash("a"), now)
            .await
            .unwrap()
            .unwrap();
        assert!(hit.allow);
        assert_eq!(hit.label.as_deref(), Some("Everything"));
        assert_eq!(hit.authority, outcome.inserted_id);

        let expired = store
            .cached_verdict(OperationType::Execute, &hash("a"), now + Duration::seconds(31))
            .await
            .unwrap();
        assert!(expired.is_none());
    }

    #[tokio::test]
    async fn test_disabling_authority_hides_and_purges_cache() {
        let store = store().await;
        let now = Utc::now();
        let added = store
            .apply(
                &RuleMutation::Add(NewRule::allow(OperationType::Execute, Requirement::Always).with_label("Mine")),
                now,
            )
            .await
            .unwrap();
        store
            .record_outcome(ObjectOutcome {
                hash: hash("b"),
                operation: OperationType::Execute,
                allow: true,
                authority: added.inserted_id,
                label: None,
                expires: None,
            })
            .await
            .unwrap();

        store
            .apply(&RuleMutation::Disable(RuleSelector::label("Mine")), now)
            .await
            .unwrap();
        assert!(store
            .cached_verdict(OperationType::Execute, &hash("b"), now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_default_rules_cannot_be_removed() {
        let store = store().await;
        let err = store
            .apply(&RuleMutation::Remove(RuleSelector::label("Apple System")), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Rejected(_)));

        let missing = store
            .apply(&RuleMutation::Remove(RuleSelector::id(9999)), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(missing, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_purge_at_or_below_includes_label_only_entries() {
        let store = store().await;
        store
            .record_outcome(ObjectOutcome {
                hash: hash("c"),
                operation: OperationType::Execute,
                allow: false,
                authority: None,
                label: Some("No Matching Rule".into()),
                expires: None,
            })
            .await
            .unwrap();
        let purged = store.purge_objects_at_or_below(-1.0).await.unwrap();
        assert_eq!(purged, 1);
    }

    #[tokio::test]
    async fn test_replace_explicit_set() {
        let store = store().await;
        let now = Utc::now();
        let rule = |fill: &str| {
            NewRule::allow(OperationType::Execute, Requirement::CdHash(hash(fill)))
                .with_label("GKE")
                .with_flags(RuleFlags::WHITELIST | RuleFlags::WHITELIST_V2)
        };

        assert_eq!(store.replace_explicit_set(vec![rule("1"), rule("2")], "u-1", now).await.unwrap(), 2);
        assert_eq!(store.replace_explicit_set(vec![rule("3")], "u-2", now).await.unwrap(), 1);

        let gke = store.rules(&RuleSelector::label("GKE")).await.unwrap();
        assert_eq!(gke.len(), 1);
        assert_eq!(gke[0].requirement, Requirement::CdHash(hash("3")));
        assert_eq!(
            store.feature(features::EXPLICIT_SET_UUID).await.unwrap().as_deref(),
            Some("u-2")
        );
    }
}
