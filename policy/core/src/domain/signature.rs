// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Signature Collaborators
//!
//! Contracts for the external code-signing machinery: static signature
//! extraction and validation, installer trust evaluation, detached
//! signature storage and notarization tickets. The policy engine consumes
//! these; it never verifies cryptography itself.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::ValidationError;
use crate::domain::requirement::Requirement;

/// Lowercase hex digest identifying signed content.
///
/// Full digests are 64 hex characters; the classic code-directory hash is
/// the 40-character truncation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub const TRUNCATED_LEN: usize = 40;
    pub const FULL_LEN: usize = 64;

    pub fn parse(hex_digest: &str) -> Result<Self, ValidationError> {
        let normalized = hex_digest.trim().to_ascii_lowercase();
        let valid_len = normalized.len() == Self::TRUNCATED_LEN || normalized.len() == Self::FULL_LEN;
        if !valid_len || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::Malformed(format!(
                "'{}' is not a content hash",
                hex_digest
            )));
        }
        Ok(Self(normalized))
    }

    pub fn from_digest(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_full(&self) -> bool {
        self.0.len() == Self::FULL_LEN
    }

    /// The 40-character form used as the object cache key.
    pub fn truncated(&self) -> ContentHash {
        Self(self.0[..Self::TRUNCATED_LEN.min(self.0.len())].to_string())
    }

    /// Equal, or one is the truncation of the other.
    pub fn matches(&self, other: &ContentHash) -> bool {
        if self.0.len() == other.0.len() {
            return self.0 == other.0;
        }
        let (short, long) = if self.0.len() < other.0.len() {
            (&self.0, &other.0)
        } else {
            (&other.0, &self.0)
        };
        long.starts_with(short.as_str())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trust anchor class of a signing chain, as established by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    /// Apple's own platform code.
    Apple,
    /// Any certificate issued under Apple's root (Developer ID, App Store).
    AppleGeneric,
    /// Some other trusted anchor.
    Other,
    /// Ad-hoc signature, no chain.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject_cn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_ou: Option<String>,
    /// SHA-256 fingerprint, lowercase hex.
    pub sha256: String,
    pub not_after: DateTime<Utc>,
    /// Extension OIDs present on the certificate.
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl CertificateInfo {
    pub fn has_extension(&self, oid: &str) -> bool {
        self.extensions.iter().any(|e| e == oid)
    }
}

/// Static code signature of an executable object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSignature {
    pub identifier: String,
    pub cdhash: ContentHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub anchor: Anchor,
    /// Leaf first, anchor last.
    #[serde(default)]
    pub certificates: Vec<CertificateInfo>,
    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

impl CodeSignature {
    pub fn is_adhoc(&self) -> bool {
        self.certificates.is_empty()
    }

    pub fn leaf(&self) -> Option<&CertificateInfo> {
        self.certificates.first()
    }

    /// Earliest `not_after` along the chain.
    pub fn chain_expiry(&self) -> Option<DateTime<Utc>> {
        self.certificates.iter().map(|c| c.not_after).min()
    }

    /// Requirement that identifies this code across updates.
    pub fn designated_requirement(&self) -> Requirement {
        match (self.anchor, &self.team_id) {
            (Anchor::Apple, _) => Requirement::AnchorApple
                .and(Requirement::Identifier(self.identifier.clone())),
            (Anchor::AppleGeneric, Some(team)) => Requirement::AnchorAppleGeneric
                .and(Requirement::Identifier(self.identifier.clone()))
                .and(Requirement::Certificate {
                    position: crate::domain::requirement::CertPosition::Leaf,
                    field: crate::domain::requirement::CertField::SubjectOu,
                    matcher: crate::domain::requirement::CertMatch::Equals(team.clone()),
                }),
            _ => Requirement::CdHash(self.cdhash.truncated()),
        }
    }

    pub fn facts(&self, notarized: bool) -> SigningFacts<'_> {
        SigningFacts {
            identifier: Some(&self.identifier),
            cdhash: Some(&self.cdhash),
            anchor: self.anchor,
            certificates: &self.certificates,
            info: Some(&self.info),
            notarized,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestCertificate {
    #[serde(flatten)]
    pub info: CertificateInfo,
    #[serde(default)]
    pub revoked: bool,
}

/// Serialized signature as found in sidecar files and explicit-set bundles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureManifest {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub anchor: Anchor,
    pub cdhash: ContentHash,
    #[serde(default)]
    pub certificates: Vec<ManifestCertificate>,
    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

impl SignatureManifest {
    pub fn into_signature(self) -> CodeSignature {
        CodeSignature {
            identifier: self.identifier,
            cdhash: self.cdhash,
            team_id: self.team_id,
            anchor: self.anchor,
            certificates: self.certificates.into_iter().map(|c| c.info).collect(),
            info: self.info,
        }
    }

    pub fn from_signature(signature: &CodeSignature) -> Self {
        Self {
            identifier: signature.identifier.clone(),
            team_id: signature.team_id.clone(),
            anchor: signature.anchor,
            cdhash: signature.cdhash.clone(),
            certificates: signature
                .certificates
                .iter()
                .cloned()
                .map(|info| ManifestCertificate { info, revoked: false })
                .collect(),
            info: signature.info.clone(),
        }
    }

    /// Fingerprints of the certificates marked revoked, lowercase hex.
    pub fn revoked_fingerprints(&self) -> impl Iterator<Item = String> + '_ {
        self.certificates
            .iter()
            .filter(|c| c.revoked)
            .map(|c| c.info.sha256.to_ascii_lowercase())
    }
}

/// Signing chain of an installer package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSignature {
    pub anchor: Anchor,
    /// Leaf first, anchor last.
    pub certificates: Vec<CertificateInfo>,
}

impl PackageSignature {
    pub fn facts(&self) -> SigningFacts<'_> {
        SigningFacts {
            identifier: None,
            cdhash: None,
            anchor: self.anchor,
            certificates: &self.certificates,
            info: None,
            notarized: false,
        }
    }
}

/// What a requirement is matched against.
#[derive(Debug, Clone, Copy)]
pub struct SigningFacts<'a> {
    pub identifier: Option<&'a str>,
    pub cdhash: Option<&'a ContentHash>,
    pub anchor: Anchor,
    pub certificates: &'a [CertificateInfo],
    pub info: Option<&'a BTreeMap<String, String>>,
    pub notarized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustPolicy {
    /// X.509 chain evaluation for installer packages.
    Installer { check_revocation: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustOutcome {
    Trusted,
    Untrusted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TicketStatus {
    Notarized,
    Revoked,
    Unknown,
}

/// Static code validation and signing-chain extraction.
#[async_trait]
pub trait SignatureValidator: Send + Sync {
    /// `Ok(None)` means the object is unsigned.
    async fn static_signature(&self, path: &Path) -> Result<Option<CodeSignature>, ValidationError>;

    /// Content hash without validating the signature: the signed cdhash, or
    /// the raw content digest of unsigned code.
    async fn content_hash(&self, path: &Path) -> Result<Option<ContentHash>, ValidationError>;

    /// Full validation of the signature against the object's content.
    async fn validate(&self, path: &Path, signature: &CodeSignature) -> Result<(), ValidationError>;

    async fn package_signature(&self, path: &Path) -> Result<Option<PackageSignature>, ValidationError>;

    async fn evaluate_trust(
        &self,
        package: &PackageSignature,
        policy: TrustPolicy,
    ) -> Result<TrustOutcome, ValidationError>;

    /// Produces an ad-hoc signature for an unsigned object.
    async fn sign_adhoc(&self, path: &Path) -> Result<CodeSignature, ValidationError>;
}

/// Store of detached signatures for otherwise unsigned content.
pub trait DetachedSignatureStore: Send + Sync {
    /// Installs signatures keyed by content digest; returns how many were new.
    fn install(&self, signatures: Vec<(ContentHash, CodeSignature)>) -> usize;
}

/// Notarization ticket lookup.
#[async_trait]
pub trait TicketService: Send + Sync {
    async fn lookup(&self, hash: &ContentHash) -> TicketStatus;
}
