//! Fleet tracker — the registry of live runners.
//!
//! Maps a runner's logical name to its VM name, zone, and busy flag.
//! Every operation takes the lock, touches the map, and releases it
//! before returning; callers iterate over snapshots.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{FleetError, FleetResult};

/// One tracked runner VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerRecord {
    /// Logical runner name, unique across the fleet.
    pub runner_name: String,
    /// Provider-side VM name.
    pub vm_name: String,
    pub zone: String,
    /// Set once the runner picks up a job; never cleared.
    pub busy: bool,
}

impl RunnerRecord {
    pub fn new(runner_name: &str, vm_name: &str, zone: &str) -> Self {
        Self {
            runner_name: runner_name.to_string(),
            vm_name: vm_name.to_string(),
            zone: zone.to_string(),
            busy: false,
        }
    }
}

/// Concurrency-safe runner table.
#[derive(Debug, Default)]
pub struct FleetTracker {
    runners: Mutex<HashMap<String, RunnerRecord>>,
}

impl FleetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunnerRecord>> {
        // Every mutation is a single map call, so a poisoned map is still consistent.
        self.runners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a newly created runner. Rejects a name that is already tracked.
    pub fn insert(&self, record: RunnerRecord) -> FleetResult<()> {
        let mut runners = self.lock();
        if runners.contains_key(&record.runner_name) {
            return Err(FleetError::DuplicateRunner(record.runner_name));
        }
        runners.insert(record.runner_name.clone(), record);
        Ok(())
    }

    pub fn contains(&self, runner_name: &str) -> bool {
        self.lock().contains_key(runner_name)
    }

    pub fn get(&self, runner_name: &str) -> Option<RunnerRecord> {
        self.lock().get(runner_name).cloned()
    }

    /// Mark a runner busy. Returns false if it is not tracked.
    pub fn mark_busy(&self, runner_name: &str) -> bool {
        match self.lock().get_mut(runner_name) {
            Some(record) => {
                record.busy = true;
                true
            }
            None => false,
        }
    }

    /// Remove by logical name. Only the first caller gets the record back.
    pub fn remove(&self, runner_name: &str) -> Option<RunnerRecord> {
        self.lock().remove(runner_name)
    }

    /// Remove the entry whose VM name is `vm_name`.
    pub fn remove_by_vm_name(&self, vm_name: &str) -> Option<RunnerRecord> {
        let mut runners = self.lock();
        let key = runners
            .iter()
            .find(|(_, r)| r.vm_name == vm_name)
            .map(|(k, _)| k.clone())?;
        runners.remove(&key)
    }

    /// Remove the entry matching `name` as a logical name, falling back to
    /// a VM-name match. Both lookups happen under one lock acquisition.
    pub fn remove_matching(&self, name: &str) -> Option<RunnerRecord> {
        let mut runners = self.lock();
        if let Some(record) = runners.remove(name) {
            return Some(record);
        }
        let key = runners
            .iter()
            .find(|(_, r)| r.vm_name == name)
            .map(|(k, _)| k.clone())?;
        runners.remove(&key)
    }

    /// Copy of every record.
    pub fn snapshot(&self) -> Vec<RunnerRecord> {
        self.lock().values().cloned().collect()
    }

    /// Copy of every record grouped by zone.
    pub fn snapshot_by_zone(&self) -> BTreeMap<String, Vec<RunnerRecord>> {
        let mut by_zone: BTreeMap<String, Vec<RunnerRecord>> = BTreeMap::new();
        for record in self.snapshot() {
            by_zone.entry(record.zone.clone()).or_default().push(record);
        }
        by_zone
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn runner_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(name: &str, zone: &str) -> RunnerRecord {
        RunnerRecord::new(name, name, zone)
    }

    #[test]
    fn insert_and_count() {
        let tracker = FleetTracker::new();
        tracker.insert(record("win-runner-a", "us-east1-c")).unwrap();
        tracker.insert(record("win-runner-b", "us-west1-a")).unwrap();

        assert_eq!(tracker.count(), 2);
        let mut names = tracker.runner_names();
        names.sort();
        assert_eq!(names, vec!["win-runner-a", "win-runner-b"]);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let tracker = FleetTracker::new();
        tracker.insert(record("win-runner-a", "us-east1-c")).unwrap();

        let err = tracker.insert(record("win-runner-a", "us-west1-a")).unwrap_err();
        assert!(matches!(err, FleetError::DuplicateRunner(name) if name == "win-runner-a"));
        assert_eq!(tracker.get("win-runner-a").unwrap().zone, "us-east1-c");
    }

    #[test]
    fn mark_busy_only_touches_tracked_runners() {
        let tracker = FleetTracker::new();
        tracker.insert(record("win-runner-a", "us-east1-c")).unwrap();

        assert!(tracker.mark_busy("win-runner-a"));
        assert!(!tracker.mark_busy("win-runner-zzz"));
        assert!(tracker.get("win-runner-a").unwrap().busy);
    }

    #[test]
    fn remove_returns_record_once() {
        let tracker = FleetTracker::new();
        tracker.insert(record("win-runner-a", "us-east1-c")).unwrap();

        assert!(tracker.remove("win-runner-a").is_some());
        assert!(tracker.remove("win-runner-a").is_none());
        assert!(tracker.remove_by_vm_name("win-runner-a").is_none());
    }

    #[test]
    fn remove_by_vm_name_finds_distinct_vm_identity() {
        let tracker = FleetTracker::new();
        tracker
            .insert(RunnerRecord::new("a", "win-runner-a", "us-east1-c"))
            .unwrap();

        let removed = tracker.remove_by_vm_name("win-runner-a").unwrap();
        assert_eq!(removed.runner_name, "a");
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn remove_matching_tries_logical_then_vm_name() {
        let tracker = FleetTracker::new();
        tracker
            .insert(RunnerRecord::new("a", "win-runner-a", "us-east1-c"))
            .unwrap();
        tracker.insert(record("win-runner-b", "us-west1-a")).unwrap();

        assert_eq!(tracker.remove_matching("win-runner-a").unwrap().runner_name, "a");
        assert_eq!(
            tracker.remove_matching("win-runner-b").unwrap().runner_name,
            "win-runner-b"
        );
        assert!(tracker.remove_matching("win-runner-c").is_none());
    }

    #[test]
    fn snapshot_by_zone_groups_records() {
        let tracker = FleetTracker::new();
        tracker.insert(record("a", "us-east1-c")).unwrap();
        tracker.insert(record("b", "us-east1-c")).unwrap();
        tracker.insert(record("c", "us-west1-a")).unwrap();

        let by_zone = tracker.snapshot_by_zone();
        assert_eq!(by_zone["us-east1-c"].len(), 2);
        assert_eq!(by_zone["us-west1-a"].len(), 1);
    }

    #[test]
    fn concurrent_removal_frees_exactly_once() {
        let tracker = Arc::new(FleetTracker::new());
        tracker.insert(record("win-runner-a", "us-east1-c")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    if i % 2 == 0 {
                        tracker.remove("win-runner-a").is_some()
                    } else {
                        tracker.remove_by_vm_name("win-runner-a").is_some()
                    }
                })
            })
            .collect();

        let freed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|removed| *removed)
            .count();
        assert_eq!(freed, 1);
    }
}
