// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Explicit Set Import
//!
//! Imports an externally supplied allow-list bundle: an auth file naming the
//! bundle and its content hashes, and a signatures file carrying detached
//! signatures for those hashes. Each import replaces every previously
//! imported whitelist rule in one transaction.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Rate-limited allow-list refresh

use std::collections::HashMap;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::domain::assessment::OperationType;
use crate::domain::config::ExplicitSetConfig;
use crate::domain::repository::{features, RuleRepository};
use crate::domain::requirement::Requirement;
use crate::domain::result::labels;
use crate::domain::rule::{NewRule, RuleFlags};
use crate::domain::signature::{ContentHash, DetachedSignatureStore, SignatureManifest};

#[derive(Debug, Deserialize)]
struct ExplicitAuth {
    uuid: String,
    #[serde(default)]
    hashes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplicitSetOutcome {
    /// Checked too recently.
    RateLimited,
    /// No auth file present.
    Missing,
    /// The bundle on disk is the one already installed.
    Unchanged,
    Installed { rules: u64, signatures: usize },
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

fn explicit_rule(hash: &ContentHash) -> NewRule {
    let mut flags = RuleFlags::WHITELIST | RuleFlags::WHITELIST_V2;
    if hash.is_full() {
        flags.insert(RuleFlags::SHA256);
    }
    NewRule::allow(OperationType::Execute, Requirement::CdHash(hash.clone()))
        .with_label(labels::EXPLICIT_SET)
        .with_flags(flags)
}

async fn checked_recently(
    repo: &dyn RuleRepository,
    interval: std::time::Duration,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(stamp) = repo.feature(features::EXPLICIT_SET_CHECKED).await? else {
        return Ok(false);
    };
    let Ok(last) = DateTime::parse_from_rfc3339(&stamp) else {
        return Ok(false);
    };
    let interval = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero());
    Ok(now - last.with_timezone(&Utc) < interval)
}

/// Imports the bundle described by `config` unless it was checked within
/// `check_interval` or is already installed.
pub async fn install_explicit_set(
    repo: &dyn RuleRepository,
    store: &dyn DetachedSignatureStore,
    config: &ExplicitSetConfig,
    now: DateTime<Utc>,
) -> Result<ExplicitSetOutcome> {
    if checked_recently(repo, config.check_interval, now).await? {
        return Ok(ExplicitSetOutcome::RateLimited);
    }
    repo.set_feature(features::EXPLICIT_SET_CHECKED, &now.to_rfc3339())
        .await?;

    let Some(auth) = read_optional(&config.auth_file)? else {
        debug!(path = %config.auth_file.display(), "No explicit set present");
        return Ok(ExplicitSetOutcome::Missing);
    };
    let auth: ExplicitAuth = serde_json::from_slice(&auth)
        .with_context(|| format!("parsing {}", config.auth_file.display()))?;

    if repo.feature(features::EXPLICIT_SET_UUID).await?.as_deref() == Some(auth.uuid.as_str()) {
        return Ok(ExplicitSetOutcome::Unchanged);
    }

    let manifests: HashMap<String, SignatureManifest> = match read_optional(&config.signatures_file)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", config.signatures_file.display()))?,
        None => HashMap::new(),
    };
    let mut signatures = Vec::with_capacity(manifests.len());
    for (digest, manifest) in manifests {
        match ContentHash::parse(&digest) {
            Ok(digest) => signatures.push((digest, manifest.into_signature())),
            Err(e) => warn!(digest = %digest, error = %e, "Skipping detached signature"),
        }
    }
    let installed_signatures = store.install(signatures);

    let mut rules = Vec::with_capacity(auth.hashes.len());
    for hash in &auth.hashes {
        match ContentHash::parse(hash) {
            Ok(hash) => rules.push(explicit_rule(&hash)),
            Err(e) => warn!(hash = %hash, error = %e, "Skipping explicit set entry"),
        }
    }

    let inserted = repo.replace_explicit_set(rules, &auth.uuid, now).await?;
    info!(
        uuid = %auth.uuid,
        rules = inserted,
        signatures = installed_signatures,
        "Explicit set installed"
    );
    Ok(ExplicitSetOutcome::Installed {
        rules: inserted,
        signatures: installed_signatures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::RuleSelector;
    use crate::infrastructure::repositories::InMemoryRuleRepository;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingStore {
        installed: Mutex<usize>,
    }

    impl DetachedSignatureStore for CountingStore {
        fn install(&self, signatures: Vec<(ContentHash, crate::domain::signature::CodeSignature)>) -> usize {
            let count = signatures.len();
            *self.installed.lock().unwrap() += count;
            count
        }
    }

    fn config(dir: &TempDir) -> ExplicitSetConfig {
        ExplicitSetConfig {
            auth_file: dir.path().join("gke.auth"),
            signatures_file: dir.path().join("gke.sigs"),
            check_interval: Duration::from_secs(3600),
        }
    }

    fn write_auth(dir: &TempDir, uuid: &str, hashes: &[String]) {
        let body = serde_json::json!({ "uuid": uuid, "hashes": hashes });
        std::fs::write(dir.path().join("gke.auth"), body.to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_import_then_rate_limit_then_unchanged() {
        let dir = TempDir::new().unwrap();
        let repo = InMemoryRuleRepository::new();
        let store = CountingStore::default();
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();
        write_auth(&dir, "bundle-1", &["ab".repeat(20), "cd".repeat(32), "not-a-hash".into()]);

        let outcome = install_explicit_set(&repo, &store, &config(&dir), now).await.unwrap();
        assert_eq!(outcome, ExplicitSetOutcome::Installed { rules: 2, signatures: 0 });

        let rules = repo.rules(&RuleSelector::label(labels::EXPLICIT_SET)).await.unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.flags.contains(RuleFlags::WHITELIST)));
        assert_eq!(rules.iter().filter(|r| r.flags.contains(RuleFlags::SHA256)).count(), 1);

        let soon = now + chrono::Duration::minutes(5);
        assert_eq!(
            install_explicit_set(&repo, &store, &config(&dir), soon).await.unwrap(),
            ExplicitSetOutcome::RateLimited
        );

        let later = now + chrono::Duration::hours(2);
        assert_eq!(
            install_explicit_set(&repo, &store, &config(&dir), later).await.unwrap(),
            ExplicitSetOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_new_bundle_replaces_previous_rules() {
        let dir = TempDir::new().unwrap();
        let repo = InMemoryRuleRepository::new();
        let store = CountingStore::default();
        let mut cfg = config(&dir);
        cfg.check_interval = Duration::ZERO;
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();

        write_auth(&dir, "bundle-1", &["ab".repeat(20), "cd".repeat(20)]);
        install_explicit_set(&repo, &store, &cfg, now).await.unwrap();
        write_auth(&dir, "bundle-2", &["ef".repeat(20)]);
        install_explicit_set(&repo, &store, &cfg, now).await.unwrap();

        let rules = repo.rules(&RuleSelector::label(labels::EXPLICIT_SET)).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(
            repo.feature(features::EXPLICIT_SET_UUID).await.unwrap().as_deref(),
            Some("bundle-2")
        );
    }

    #[tokio::test]
    async fn test_missing_bundle() {
        let dir = TempDir::new().unwrap();
        let repo = InMemoryRuleRepository::new();
        let outcome = install_explicit_set(&repo, &CountingStore::default(), &config(&dir), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, ExplicitSetOutcome::Missing);
    }
}
