// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Notarization ticket lookup backed by an in-memory table, optionally
//! loaded from a JSON file mapping content hash to ticket status.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use anyhow::Context;
use async_trait::async_trait;

use crate::domain::signature::{ContentHash, TicketService, TicketStatus};

#[derive(Default)]
pub struct StaticTicketService {
    tickets: RwLock<HashMap<ContentHash, TicketStatus>>,
}

impl StaticTicketService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let raw: HashMap<String, TicketStatus> =
            serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
        let service = Self::new();
        for (hash, status) in raw {
            let hash = ContentHash::parse(&hash)?;
            service.insert(hash, status);
        }
        Ok(service)
    }

    pub fn insert(&self, hash: ContentHash, status: TicketStatus) {
        if let Ok(mut tickets) = self.tickets.write() {
            tickets.insert(hash.truncated(), status);
        }
    }
}

#[async_trait]
impl TicketService for StaticTicketService {
    async fn lookup(&self, hash: &ContentHash) -> TicketStatus {
        self.tickets
            .read()
            .ok()
            .and_then(|t| t.get(&hash.truncated()).copied())
            .unwrap_or(TicketStatus::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_by_full_or_truncated_hash() {
        let service = StaticTicketService::new();
        let full = ContentHash::parse(&"9a".repeat(32)).unwrap();
        service.insert(full.clone(), TicketStatus::Notarized);

        assert_eq!(service.lookup(&full).await, TicketStatus::Notarized);
        assert_eq!(service.lookup(&full.truncated()).await, TicketStatus::Notarized);
        assert_eq!(
            service.lookup(&ContentHash::parse(&"00".repeat(20)).unwrap()).await,
            TicketStatus::Unknown
        );
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tickets.json");
        std::fs::write(&path, format!("{{\"{}\": \"revoked\"}}", "ab".repeat(20))).unwrap();
        let service = StaticTicketService::from_file(&path).unwrap();
        let rt = tokio::runtime::Runtime::new().unwrap();
        assert_eq!(
            rt.block_on(service.lookup(&ContentHash::parse(&"ab".repeat(20)).unwrap())),
            TicketStatus::Revoked
        );
    }
}
