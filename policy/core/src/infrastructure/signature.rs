// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Detached Signature Validator
//!
//! Signatures live in JSON sidecar manifests (`<file>.sig.json`) or in the
//! detached store filled by the explicit set. Content digests are SHA-256
//! over the file, or over every file of a bundle directory in path order.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `SignatureValidator` and `DetachedSignatureStore`

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::domain::clock::Clock;
use crate::domain::errors::ValidationError;
use crate::domain::signature::{
    Anchor, CertificateInfo, CodeSignature, ContentHash, DetachedSignatureStore, ManifestCertificate,
    PackageSignature, SignatureManifest, SignatureValidator, TrustOutcome, TrustPolicy,
};

pub const SIDECAR_SUFFIX: &str = ".sig.json";

pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// SHA-256 of a file, or of a directory tree walked in sorted order.
pub fn content_digest(path: &Path) -> io::Result<ContentHash> {
    let mut hasher = Sha256::new();
    digest_into(path, path, &mut hasher)?;
    Ok(ContentHash::from_digest(&hasher.finalize()))
}

fn digest_into(root: &Path, path: &Path, hasher: &mut Sha256) -> io::Result<()> {
    let metadata = fs::metadata(path)?;
    if metadata.is_dir() {
        let mut entries: Vec<PathBuf> = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<_>>()?;
        entries.sort();
        for entry in entries {
            if entry.as_os_str().to_string_lossy().ends_with(SIDECAR_SUFFIX) {
                continue;
            }
            digest_into(root, &entry, hasher)?;
        }
    } else {
        let relative = path.strip_prefix(root).unwrap_or(path);
        hasher.update(relative.as_os_str().as_encoded_bytes());
        hasher.update(fs::read(path)?);
    }
    Ok(())
}

pub struct DetachedSignatureValidator {
    clock: Arc<dyn Clock>,
    detached: RwLock<HashMap<ContentHash, CodeSignature>>,
    revoked: RwLock<HashSet<String>>,
}

impl DetachedSignatureValidator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            detached: RwLock::new(HashMap::new()),
            revoked: RwLock::new(HashSet::new()),
        }
    }

    /// Marks certificate fingerprints as revoked.
    pub fn revoke<I: IntoIterator<Item = String>>(&self, fingerprints: I) {
        if let Ok(mut revoked) = self.revoked.write() {
            revoked.extend(fingerprints.into_iter().map(|f| f.to_ascii_lowercase()));
        }
    }

    fn is_revoked(&self, cert: &CertificateInfo) -> bool {
        self.revoked
            .read()
            .map(|r| r.contains(&cert.sha256.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    async fn read_manifest(&self, path: &Path) -> Result<Option<SignatureManifest>, ValidationError> {
        let sidecar = sidecar_path(path);
        let bytes = match tokio::fs::read(&sidecar).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest: SignatureManifest = serde_json::from_slice(&bytes)
            .map_err(|e| ValidationError::Malformed(format!("{}: {}", sidecar.display(), e)))?;
        self.revoke(manifest.revoked_fingerprints());
        Ok(Some(manifest))
    }

    async fn digest(&self, path: &Path) -> Result<ContentHash, ValidationError> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || content_digest(&owned))
            .await
            .map_err(|e| ValidationError::Io(e.to_string()))?
            .map_err(ValidationError::from)
    }

    fn detached_signature(&self, digest: &ContentHash) -> Option<CodeSignature> {
        self.detached.read().ok().and_then(|d| d.get(digest).cloned())
    }

    fn check_chain(&self, certificates: &[CertificateInfo]) -> Result<(), ValidationError> {
        let now = self.clock.now();
        for cert in certificates {
            if self.is_revoked(cert) {
                return Err(ValidationError::Revoked(cert.subject_cn.clone()));
            }
            if cert.not_after <= now {
                return Err(ValidationError::Expired(cert.subject_cn.clone()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SignatureValidator for DetachedSignatureValidator {
    async fn static_signature(&self, path: &Path) -> Result<Option<CodeSignature>, ValidationError> {
        if let Some(manifest) = self.read_manifest(path).await? {
            return Ok(Some(manifest.into_signature()));
        }
        if self.detached.read().map(|d| d.is_empty()).unwrap_or(true) {
            return Ok(None);
        }
        let digest = self.digest(path).await?;
        Ok(self.detached_signature(&digest))
    }

    async fn content_hash(&self, path: &Path) -> Result<Option<ContentHash>, ValidationError> {
        match self.static_signature(path).await? {
            Some(signature) => Ok(Some(signature.cdhash)),
            None => self.digest(path).await.map(Some),
        }
    }

    async fn validate(&self, path: &Path, signature: &CodeSignature) -> Result<(), ValidationError> {
        let digest = self.digest(path).await?;
        if !digest.matches(&signature.cdhash) {
            debug!(path = %path.display(), expected = %signature.cdhash, actual = %digest, "Content digest mismatch");
            return Err(ValidationError::Tampered(path.display().to_string()));
        }
        self.check_chain(&signature.certificates)
    }

    async fn package_signature(&self, path: &Path) -> Result<Option<PackageSignature>, ValidationError> {
        Ok(self.read_manifest(path).await?.map(|m| PackageSignature {
            anchor: m.anchor,
            certificates: m.certificates.into_iter().map(|c| c.info).collect(),
        }))
    }

    async fn evaluate_trust(
        &self,
        package: &PackageSignature,
        policy: TrustPolicy,
    ) -> Result<TrustOutcome, ValidationError> {
        let TrustPolicy::Installer { check_revocation } = policy;
        if package.certificates.is_empty() || package.anchor == Anchor::None {
            return Ok(TrustOutcome::Untrusted("no certificate chain".to_string()));
        }
        if check_revocation {
            if let Some(cert) = package.certificates.iter().find(|c| self.is_revoked(c)) {
                return Err(ValidationError::Revoked(cert.subject_cn.clone()));
            }
        }
        let now = self.clock.now();
        if let Some(cert) = package.certificates.iter().find(|c| c.not_after <= now) {
            return Ok(TrustOutcome::Untrusted(format!("{} expired", cert.subject_cn)));
        }
        Ok(TrustOutcome::Trusted)
    }

    async fn sign_adhoc(&self, path: &Path) -> Result<CodeSignature, ValidationError> {
        let digest = self.digest(path).await?;
        let identifier = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| digest.truncated().to_string());
        let signature = CodeSignature {
            identifier,
            cdhash: digest,
            team_id: None,
            anchor: Anchor::None,
            certificates: Vec::new(),
            info: BTreeMap::new(),
        };

        let manifest = serde_json::to_vec_pretty(&SignatureManifest::from_signature(&signature))
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        tokio::fs::write(sidecar_path(path), manifest).await?;
        debug!(path = %path.display(), cdhash = %signature.cdhash, "Wrote ad-hoc signature");
        Ok(signature)
    }
}

impl DetachedSignatureStore for DetachedSignatureValidator {
    fn install(&self, signatures: Vec<(ContentHash, CodeSignature)>) -> usize {
        let Ok(mut detached) = self.detached.write() else {
            warn!("Detached signature store lock poisoned");
            return 0;
        };
        signatures
            .into_iter()
            .filter(|(digest, signature)| detached.insert(digest.clone(), signature.clone()).is_none())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn validator() -> DetachedSignatureValidator {
        DetachedSignatureValidator::new(Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(),
        )))
    }

    fn write_signed(dir: &TempDir, name: &str, body: &[u8], revoked: bool) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        let manifest = SignatureManifest {
            identifier: format!("com.example.{}", name),
            team_id: Some("TEAM".into()),
            anchor: Anchor::AppleGeneric,
            cdhash: content_digest(&path).unwrap(),
            certificates: vec![ManifestCertificate {
                info: CertificateInfo {
                    subject_cn: "Developer ID Application: Example".into(),
                    subject_ou: Some("TEAM".into()),
                    sha256: "cc".repeat(32),
                    not_after: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
                    extensions: vec![],
                },
                revoked,
            }],
            info: BTreeMap::new(),
        };
        fs::write(sidecar_path(&path), serde_json::to_vec(&manifest).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_signed_file_validates() {
        let dir = TempDir::new().unwrap();
        let path = write_signed(&dir, "tool", b"#!/bin/sh\necho hi\n", false);
        let validator = validator();

        let signature = validator.static_signature(&path).await.unwrap().unwrap();
        assert_eq!(signature.team_id.as_deref(), Some("TEAM"));
        validator.validate(&path, &signature).await.unwrap();
    }

    #[tokio::test]
    async fn test_modified_file_is_tampered() {
        let dir = TempDir::new().unwrap();
        let path = write_signed(&dir, "tool", b"original", false);
        let validator = validator();
        let signature = validator.static_signature(&path).await.unwrap().unwrap();

        fs::write(&path, b"modified").unwrap();
        assert!(matches!(
            validator.validate(&path, &signature).await,
            Err(ValidationError::Tampered(_))
        ));
    }

    #[tokio::test]
    async fn test_revoked_certificate() {
        let dir = TempDir::new().unwrap();
        let path = write_signed(&dir, "bad", b"payload", true);
        let validator = validator();
        let signature = validator.static_signature(&path).await.unwrap().unwrap();
        assert!(matches!(
            validator.validate(&path, &signature).await,
            Err(ValidationError::Revoked(_))
        ));
    }

    #[tokio::test]
    async fn test_unsigned_then_adhoc() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain");
        fs::write(&path, b"data").unwrap();
        let validator = validator();

        assert!(validator.static_signature(&path).await.unwrap().is_none());
        let adhoc = validator.sign_adhoc(&path).await.unwrap();
        assert!(adhoc.is_adhoc());
        let reread = validator.static_signature(&path).await.unwrap().unwrap();
        assert_eq!(reread.cdhash, adhoc.cdhash);
    }

    #[tokio::test]
    async fn test_detached_store_supplies_signature() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("whitelisted");
        fs::write(&path, b"known content").unwrap();
        let digest = content_digest(&path).unwrap();
        let validator = validator();

        let signature = CodeSignature {
            identifier: "whitelisted".into(),
            cdhash: digest.clone(),
            team_id: None,
            anchor: Anchor::None,
            certificates: vec![],
            info: BTreeMap::new(),
        };
        assert_eq!(validator.install(vec![(digest.clone(), signature.clone())]), 1);
        assert_eq!(validator.install(vec![(digest, signature)]), 0);
        assert!(validator.static_signature(&path).await.unwrap().is_some());
    }
}
