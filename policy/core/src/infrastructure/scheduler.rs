// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Deferred Trigger Adapters
//!
//! `PowerStateScheduler` polls the Linux power-supply class directory and
//! fires pending low-priority starts while the machine is on external
//! power. `ManualTrigger` fires only when told to.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `DeferredTrigger`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::domain::config::SchedulerConfig;
use crate::domain::scheduler::{DeferredCallback, DeferredCriteria, DeferredTrigger, EvaluationKey};

struct Pending {
    criteria: DeferredCriteria,
    callback: DeferredCallback,
    registered_at: Instant,
}

type PendingMap = Mutex<HashMap<EvaluationKey, Pending>>;

fn register(pending: &PendingMap, key: EvaluationKey, criteria: DeferredCriteria, callback: DeferredCallback) {
    let mut map = pending.lock();
    if map.contains_key(&key) {
        debug!(key = %key, "Deferred start already scheduled");
        return;
    }
    map.insert(
        key,
        Pending {
            criteria,
            callback,
            registered_at: Instant::now(),
        },
    );
}

/// Test double: callbacks run when `fire` is called.
#[derive(Default)]
pub struct ManualTrigger {
    pending: PendingMap,
}

impl ManualTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the callback registered under `key`. Returns whether one existed.
    pub fn fire(&self, key: &EvaluationKey) -> bool {
        let entry = self.pending.lock().remove(key);
        match entry {
            Some(pending) => {
                (pending.callback)();
                true
            }
            None => false,
        }
    }

    pub fn fire_all(&self) -> usize {
        let drained: Vec<Pending> = self.pending.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            (pending.callback)();
        }
        count
    }

    pub fn pending_keys(&self) -> Vec<EvaluationKey> {
        self.pending.lock().keys().cloned().collect()
    }

    pub fn is_pending(&self, key: &EvaluationKey) -> bool {
        self.pending.lock().contains_key(key)
    }
}

impl DeferredTrigger for ManualTrigger {
    fn schedule_deferred(&self, key: EvaluationKey, criteria: DeferredCriteria, callback: DeferredCallback) {
        register(&self.pending, key, criteria, callback);
    }

    fn cancel(&self, key: &EvaluationKey) {
        self.pending.lock().remove(key);
    }
}

/// Whether any mains supply under `dir` reports itself online. A machine
/// without power-supply entries is treated as mains powered.
pub fn on_ac_power(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return true;
    };
    let mut saw_mains = false;
    for entry in entries.flatten() {
        let supply = entry.path();
        let kind = std::fs::read_to_string(supply.join("type")).unwrap_or_default();
        if kind.trim() != "Mains" {
            continue;
        }
        saw_mains = true;
        if std::fs::read_to_string(supply.join("online")).is_ok_and(|s| s.trim() == "1") {
            return true;
        }
    }
    !saw_mains
}

pub struct PowerStateScheduler {
    pending: PendingMap,
    power_supply_dir: PathBuf,
    require_ac_power: bool,
}

impl PowerStateScheduler {
    /// Creates the scheduler and spawns its polling task on the current
    /// tokio runtime. The task ends when the scheduler is dropped.
    pub fn start(config: &SchedulerConfig) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            power_supply_dir: config.power_supply_dir.clone(),
            require_ac_power: config.require_ac_power,
        });
        let weak = Arc::downgrade(&scheduler);
        tokio::spawn(poll_loop(weak, config.poll_interval));
        info!(interval = ?config.poll_interval, "Power-state scheduler started");
        scheduler
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Fires every registration whose criteria currently hold.
    pub fn poll_once(&self) -> usize {
        let on_ac = on_ac_power(&self.power_supply_dir);
        let due: Vec<Pending> = {
            let mut map = self.pending.lock();
            let keys: Vec<EvaluationKey> = map
                .iter()
                .filter(|(_, p)| {
                    let power_ok = !(self.require_ac_power && p.criteria.require_ac_power) || on_ac;
                    power_ok && p.registered_at.elapsed() >= p.criteria.delay
                })
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| map.remove(k)).collect()
        };
        let fired = due.len();
        for pending in due {
            (pending.callback)();
        }
        if fired > 0 {
            debug!(fired, on_ac, "Deferred evaluations released");
        }
        fired
    }
}

async fn poll_loop(scheduler: Weak<PowerStateScheduler>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let Some(scheduler) = scheduler.upgrade() else {
            break;
        };
        scheduler.poll_once();
    }
}

impl DeferredTrigger for PowerStateScheduler {
    fn schedule_deferred(&self, key: EvaluationKey, criteria: DeferredCriteria, callback: DeferredCallback) {
        register(&self.pending, key, criteria, callback);
    }

    fn cancel(&self, key: &EvaluationKey) {
        self.pending.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::assessment::OperationType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn key(path: &str) -> EvaluationKey {
        EvaluationKey::derive(Path::new(path), OperationType::Execute)
    }

    fn counting(counter: &Arc<AtomicUsize>) -> DeferredCallback {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_manual_trigger_dedupes_by_key() {
        let trigger = ManualTrigger::new();
        let fired = Arc::new(AtomicUsize::new(0));
        trigger.schedule_deferred(key("/a"), DeferredCriteria::default(), counting(&fired));
        trigger.schedule_deferred(key("/a"), DeferredCriteria::default(), counting(&fired));

        assert_eq!(trigger.pending_keys().len(), 1);
        assert!(trigger.fire(&key("/a")));
        assert!(!trigger.fire(&key("/a")));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_drops_registration() {
        let trigger = ManualTrigger::new();
        let fired = Arc::new(AtomicUsize::new(0));
        trigger.schedule_deferred(key("/b"), DeferredCriteria::default(), counting(&fired));
        trigger.cancel(&key("/b"));
        assert_eq!(trigger.fire_all(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    fn supply(dir: &TempDir, name: &str, kind: &str, online: &str) {
        let path = dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("type"), kind).unwrap();
        std::fs::write(path.join("online"), online).unwrap();
    }

    #[test]
    fn test_ac_power_detection() {
        let dir = TempDir::new().unwrap();
        assert!(on_ac_power(dir.path()));
        supply(&dir, "AC", "Mains\n", "0\n");
        assert!(!on_ac_power(dir.path()));
        supply(&dir, "AC1", "Mains\n", "1\n");
        assert!(on_ac_power(dir.path()));
    }

    #[tokio::test]
    async fn test_power_scheduler_waits_for_mains() {
        let dir = TempDir::new().unwrap();
        supply(&dir, "AC", "Mains\n", "0\n");
        let config = SchedulerConfig {
            poll_interval: Duration::from_secs(3600),
            require_ac_power: true,
            power_supply_dir: dir.path().to_path_buf(),
        };
        let scheduler = PowerStateScheduler::start(&config);
        let fired = Arc::new(AtomicUsize::new(0));
        scheduler.schedule_deferred(key("/c"), DeferredCriteria::default(), counting(&fired));

        assert_eq!(scheduler.poll_once(), 0);
        supply(&dir, "AC", "Mains\n", "1\n");
        assert_eq!(scheduler.poll_once(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }
}
