// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the integration tests: a scriptable signature
//! validator that counts calls and can hold evaluations open, plus builders
//! for an engine wired to in-memory collaborators.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use gatekeeper_core::application::evaluation_manager::EvaluationManager;
use gatekeeper_core::application::policy_engine::PolicyEngine;
use gatekeeper_core::domain::clock::ManualClock;
use gatekeeper_core::domain::errors::ValidationError;
use gatekeeper_core::domain::repository::RuleRepository;
use gatekeeper_core::domain::scheduler::DeferredTrigger;
use gatekeeper_core::domain::signature::{
    Anchor, CertificateInfo, CodeSignature, ContentHash, PackageSignature, SignatureValidator,
    TrustOutcome, TrustPolicy,
};
use gatekeeper_core::infrastructure::{EventBus, PreferenceStore, StaticTicketService, TokenAuthorizer};

pub const ADMIN_TOKEN: &str = "integration-admin-token";

pub const OID_DEVELOPER_ID_CA: &str = "1.2.840.113635.100.6.2.6";
pub const OID_DEVELOPER_ID_APPLICATION: &str = "1.2.840.113635.100.6.1.13";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()
}

pub fn chain_expiry() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2027, 2, 1, 0, 0, 0).unwrap()
}

/// Developer ID style signature: leaf and intermediate carry the marker
/// extensions the factory rules look for.
pub fn developer_signature(identifier: &str, byte: &str) -> CodeSignature {
    CodeSignature {
        identifier: identifier.to_string(),
        cdhash: ContentHash::parse(&byte.repeat(20)).unwrap(),
        team_id: Some("TEAM000001".to_string()),
        anchor: Anchor::AppleGeneric,
        certificates: vec![
            CertificateInfo {
                subject_cn: "Developer ID Application: Example Ltd (TEAM000001)".to_string(),
                subject_ou: Some("TEAM000001".to_string()),
                sha256: "11".repeat(32),
                not_after: chain_expiry(),
                extensions: vec![OID_DEVELOPER_ID_APPLICATION.to_string()],
            },
            CertificateInfo {
                subject_cn: "Developer ID Certification Authority".to_string(),
                subject_ou: None,
                sha256: "22".repeat(32),
                not_after: Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap(),
                extensions: vec![OID_DEVELOPER_ID_CA.to_string()],
            },
        ],
        info: BTreeMap::new(),
    }
}

/// Signature validator scripted per path.
///
/// `static_signature` waits on `gate` before answering, so a test can hold
/// an evaluation open while more callers attach. `fail_with` makes lookups
/// and validations report an error instead.
pub struct FakeValidator {
    signatures: Mutex<HashMap<PathBuf, CodeSignature>>,
    failure: Mutex<Option<ValidationError>>,
    pub gate: Arc<Semaphore>,
    pub lookups: AtomicUsize,
    pub validations: AtomicUsize,
}

impl FakeValidator {
    pub fn new() -> Self {
        Self {
            signatures: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            lookups: AtomicUsize::new(0),
            validations: AtomicUsize::new(0),
        }
    }

    /// Every `static_signature` call blocks until `release` is called.
    pub fn gated() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(1024);
    }

    pub fn sign(&self, path: &Path, signature: CodeSignature) {
        self.signatures.lock().insert(path.to_path_buf(), signature);
    }

    pub fn fail_with(&self, error: ValidationError) {
        *self.failure.lock() = Some(error);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignatureValidator for FakeValidator {
    async fn static_signature(&self, path: &Path) -> Result<Option<CodeSignature>, ValidationError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ValidationError::Io(e.to_string()))?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        Ok(self.signatures.lock().get(path).cloned())
    }

    async fn content_hash(&self, path: &Path) -> Result<Option<ContentHash>, ValidationError> {
        Ok(Some(match self.signatures.lock().get(path) {
            Some(signature) => signature.cdhash.clone(),
            None => ContentHash::from_digest(path.as_os_str().as_encoded_bytes()),
        }))
    }

    async fn validate(&self, _path: &Path, _signature: &CodeSignature) -> Result<(), ValidationError> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn package_signature(&self, _path: &Path) -> Result<Option<PackageSignature>, ValidationError> {
        Ok(None)
    }

    async fn evaluate_trust(
        &self,
        _package: &PackageSignature,
        _policy: TrustPolicy,
    ) -> Result<TrustOutcome, ValidationError> {
        Ok(TrustOutcome::Untrusted("no trust store".to_string()))
    }

    async fn sign_adhoc(&self, path: &Path) -> Result<CodeSignature, ValidationError> {
        let cdhash = ContentHash::from_digest(path.as_os_str().as_encoded_bytes());
        let signature = CodeSignature {
            identifier: path.display().to_string(),
            cdhash,
            team_id: None,
            anchor: Anchor::None,
            certificates: Vec::new(),
            info: BTreeMap::new(),
        };
        self.signatures.lock().insert(path.to_path_buf(), signature.clone());
        Ok(signature)
    }
}

/// Everything a test needs to poke at an assembled engine.
pub struct Harness {
    pub dir: TempDir,
    pub validator: Arc<FakeValidator>,
    pub tickets: Arc<StaticTicketService>,
    pub clock: Arc<ManualClock>,
    pub repo: Arc<dyn RuleRepository>,
    pub engine: Arc<PolicyEngine>,
}

impl Harness {
    pub fn new(repo: Arc<dyn RuleRepository>, validator: FakeValidator) -> Self {
        let dir = TempDir::new().unwrap();
        let validator = Arc::new(validator);
        let tickets = Arc::new(StaticTicketService::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let preferences = PreferenceStore::new(
            dir.path().join("assessment.yaml"),
            dir.path().join("last-rejection.json"),
            dir.path().join("rearm"),
            Duration::from_secs(30 * 24 * 3600),
        );
        let engine = PolicyEngine::new(
            repo.clone(),
            validator.clone(),
            tickets.clone(),
            Arc::new(TokenAuthorizer::new(false).with_token(ADMIN_TOKEN)),
            Arc::new(preferences),
            Arc::new(EventBus::with_default_capacity()),
            clock.clone(),
        );
        Self {
            dir,
            validator,
            tickets,
            clock,
            repo,
            engine: Arc::new(engine),
        }
    }

    pub fn manager(&self, trigger: Option<Arc<dyn DeferredTrigger>>) -> Arc<EvaluationManager> {
        Arc::new(EvaluationManager::new(self.engine.clone(), trigger))
    }

    /// Creates an empty file under the harness directory.
    pub fn object(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"\xcf\xfa\xed\xfe").unwrap();
        path
    }
}

/// Polls `condition` until it holds or a second passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
