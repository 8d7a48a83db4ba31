// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Connection Pool
//!
//! Wraps `sqlx::sqlite::SqlitePool` in a thin `Database` newtype injected
//! into the rule store. Opening degrades from read-write to read-only; the
//! caller decides what to do when neither works.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    mode: AccessMode,
    location: PathBuf,
}

impl Database {
    /// Opens `path` for writing, creating it if needed, and falls back to a
    /// read-only handle when that fails.
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self> {
        match Self::open_with_mode(path, max_connections, AccessMode::ReadWrite).await {
            Ok(db) => Ok(db),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Rule database not writable, retrying read-only");
                Self::open_with_mode(path, max_connections, AccessMode::ReadOnly).await
            }
        }
    }

    pub async fn open_with_mode(path: &Path, max_connections: u32, mode: AccessMode) -> Result<Self> {
        let mut options = SqliteConnectOptions::new()
            .filename(path)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        options = match mode {
            AccessMode::ReadWrite => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                options
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
            }
            AccessMode::ReadOnly => options.read_only(true),
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("opening rule database {}", path.display()))?;

        debug!(path = %path.display(), ?mode, "Rule database opened");
        Ok(Self {
            pool,
            mode,
            location: path.to_path_buf(),
        })
    }

    /// Private in-memory database, kept on a single connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            mode: AccessMode::ReadWrite,
            location: PathBuf::from(":memory:"),
        })
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_writable(&self) -> bool {
        self.mode == AccessMode::ReadWrite
    }

    pub fn location(&self) -> &Path {
        &self.location
    }
}
