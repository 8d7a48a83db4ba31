// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Preference State Files
//!
//! Master switch, last rejection and rearm timestamp, each in its own file.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Persist the global override switch and rejection recall

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::assessment::OperationType;
use crate::domain::config::StateConfig;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file I/O: {0}")]
    Io(#[from] io::Error),

    #[error("malformed YAML state: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("malformed JSON state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MasterSwitch {
    enabled: bool,
}

/// Most recent denial, kept for unprivileged recall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub path: PathBuf,
    pub operation: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub rejected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RearmStatus {
    pub disabled_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PreferenceStore {
    preferences: PathBuf,
    last_rejection: PathBuf,
    rearm: PathBuf,
    rearm_after: Duration,
}

/// Writes `contents` to a private staging file beside `path` and renames it
/// into place.
fn write_atomically(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };
    let mut staging = NamedTempFile::new_in(parent)?;
    staging.write_all(contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staging
            .as_file()
            .set_permissions(fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    staging.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl PreferenceStore {
    pub fn new(preferences: PathBuf, last_rejection: PathBuf, rearm: PathBuf, rearm_after: Duration) -> Self {
        Self {
            preferences,
            last_rejection,
            rearm,
            rearm_after,
        }
    }

    pub fn from_config(config: &StateConfig) -> Self {
        Self::new(
            config.preferences.clone(),
            config.last_rejection.clone(),
            config.rearm.clone(),
            config.rearm_after,
        )
    }

    /// Assessments are on unless the switch file says otherwise.
    pub fn assessments_enabled(&self) -> bool {
        match fs::read_to_string(&self.preferences) {
            Ok(text) => match serde_yaml::from_str::<MasterSwitch>(&text) {
                Ok(switch) => switch.enabled,
                Err(e) => {
                    warn!(path = %self.preferences.display(), error = %e, "Ignoring malformed preferences");
                    true
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %self.preferences.display(), error = %e, "Cannot read preferences");
                true
            }
        }
    }

    /// Denials are reported as allowances while this holds.
    pub fn overrides_active(&self) -> bool {
        !self.assessments_enabled()
    }

    /// Flips the master switch. Disabling also stamps the rearm file.
    pub fn set_assessments_enabled(&self, enabled: bool, now: DateTime<Utc>) -> Result<(), StateError> {
        let yaml = serde_yaml::to_string(&MasterSwitch { enabled })?;
        write_atomically(&self.preferences, yaml.as_bytes(), 0o644)?;
        if !enabled {
            self.reset_rearm(now)?;
        }
        info!(enabled, "Assessment master switch updated");
        Ok(())
    }

    pub fn record_rejection(&self, record: &RejectionRecord) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomically(&self.last_rejection, &json, 0o644)?;
        Ok(())
    }

    pub fn last_rejection(&self) -> Result<Option<RejectionRecord>, StateError> {
        match fs::read(&self.last_rejection) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn rearm_status(&self) -> Result<RearmStatus, StateError> {
        let disabled_at = match fs::read_to_string(&self.rearm) {
            Ok(text) => Some(DateTime::parse_from_rfc3339(text.trim())?.with_timezone(&Utc)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let due_at = disabled_at.and_then(|at| {
            chrono::Duration::from_std(self.rearm_after)
                .ok()
                .map(|after| at + after)
        });
        Ok(RearmStatus { disabled_at, due_at })
    }

    pub fn reset_rearm(&self, now: DateTime<Utc>) -> Result<(), StateError> {
        write_atomically(&self.rearm, now.to_rfc3339().as_bytes(), 0o644)?;
        debug!(at = %now, "Rearm timestamp written");
        Ok(())
    }

    /// Re-enables assessments when the rearm deadline has passed. Returns
    /// whether the switch was flipped.
    pub fn check_rearm(&self, now: DateTime<Utc>) -> Result<bool, StateError> {
        if self.assessments_enabled() {
            return Ok(false);
        }
        let status = self.rearm_status()?;
        match status.due_at {
            Some(due) if due <= now => {
                info!(due = %due, "Rearm deadline passed, re-enabling assessments");
                self.set_assessments_enabled(true, now)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
