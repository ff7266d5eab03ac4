//! Orphan reclaimer — background task that reconciles the fleet.
//!
//! Phase A deletes this fleet's TERMINATED VMs in every configured zone
//! and untracks them. Phase B compares the tracker against the RUNNING
//! listings of the zones it has entries in and evicts entries whose VM
//! is gone. Passes run one at a time, never overlapping.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use vmscale_core::{ConfigError, ScalerConfig, VmStatus};
use vmscale_fleet::{FleetResult, Listing, VmManager};

use crate::error::ReclaimError;
use crate::ticker::TickSource;

/// Settings for the orphan reclaimer.
#[derive(Debug, Clone)]
pub struct ReclaimConfig {
    /// Zones swept for TERMINATED VMs.
    pub zones: Vec<String>,
    pub vm_prefix: String,
    /// Time between passes.
    pub interval: Duration,
    pub list_timeout: Duration,
    pub delete_timeout: Duration,
}

impl ReclaimConfig {
    pub fn from_config(config: &ScalerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            zones: config.zones(),
            vm_prefix: config.vm_prefix(),
            interval: config.cleanup_interval()?,
            list_timeout: config.list_timeout()?,
            delete_timeout: config.delete_timeout()?,
        })
    }
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// TERMINATED VMs listed across all zones.
    pub terminated_found: usize,
    pub deleted: usize,
    pub delete_failures: usize,
    /// Tracker entries removed by the TERMINATED sweep.
    pub removed: usize,
    /// Tracker entries evicted because their VM is no longer RUNNING.
    pub evicted: usize,
    /// Zones whose listing failed during the pass.
    pub failed_zones: Vec<String>,
}

impl PassReport {
    fn zone_failed(&mut self, zone: &str) {
        if !self.failed_zones.iter().any(|z| z == zone) {
            self.failed_zones.push(zone.to_string());
        }
    }
}

/// Periodic sweeper of leaked and stale runner VMs.
pub struct OrphanReclaimer {
    manager: Arc<VmManager>,
    config: ReclaimConfig,
}

impl OrphanReclaimer {
    pub fn new(manager: Arc<VmManager>, config: ReclaimConfig) -> Self {
        Self { manager, config }
    }

    pub fn config(&self) -> &ReclaimConfig {
        &self.config
    }

    /// Run one pass now, then one per tick, until shutdown or the ticker
    /// ends. Returns the number of passes started.
    pub async fn run<T: TickSource>(&self, mut ticker: T, mut shutdown: watch::Receiver<bool>) -> usize {
        info!(
            zones = ?self.config.zones,
            vm_prefix = %self.config.vm_prefix,
            interval = ?self.config.interval,
            "orphan reclaimer started"
        );

        let mut passes = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            passes += 1;
            let report = self.run_pass(&mut shutdown).await;
            info!(
                pass = passes,
                terminated_found = report.terminated_found,
                deleted = report.deleted,
                delete_failures = report.delete_failures,
                removed = report.removed,
                evicted = report.evicted,
                failed_zones = ?report.failed_zones,
                "reclaim pass complete"
            );

            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                more = ticker.tick() => {
                    if !more {
                        debug!("reclaim ticker closed");
                        break;
                    }
                }
            }
        }

        info!(passes, "orphan reclaimer stopped");
        passes
    }

    /// One full pass: sweep TERMINATED, then reconcile RUNNING.
    pub async fn run_pass(&self, shutdown: &mut watch::Receiver<bool>) -> PassReport {
        let mut report = PassReport::default();
        self.sweep_terminated(shutdown, &mut report).await;
        if !*shutdown.borrow() {
            self.reconcile_running(shutdown, &mut report).await;
        }
        report
    }

    // ── Phase A ───────────────────────────────────────────────────

    async fn sweep_terminated(&self, shutdown: &mut watch::Receiver<bool>, report: &mut PassReport) {
        for zone in &self.config.zones {
            if *shutdown.borrow() {
                return;
            }
            let Listing { names, error } = tokio::select! {
                listing = self
                    .manager
                    .list_vms_partial(zone, VmStatus::Terminated, self.config.list_timeout) => listing,
                _ = cancelled(shutdown) => return,
            };

            // Names from pages received before a failure are still swept.
            if let Some(e) = error {
                let e = ReclaimError::from(e);
                if names.is_empty() {
                    warn!(%zone, error = %e, "failed to list terminated VMs, skipping zone");
                } else {
                    warn!(
                        %zone,
                        listed = names.len(),
                        error = %e,
                        "terminated VM listing failed partway, sweeping names already listed"
                    );
                }
                report.zone_failed(zone);
            }

            if names.is_empty() {
                continue;
            }
            debug!(%zone, count = names.len(), "found terminated VMs");
            report.terminated_found += names.len();

            for name in names {
                let deletion = self
                    .bounded(
                        shutdown,
                        self.manager
                            .delete_vm_within(zone, &name, self.config.delete_timeout),
                    )
                    .await;

                match deletion {
                    Ok(()) => {
                        report.deleted += 1;
                        info!(%zone, vm = %name, "deleted terminated VM");
                    }
                    Err(ReclaimError::Cancelled) => {
                        self.untrack(&name, report);
                        return;
                    }
                    Err(e) => {
                        report.delete_failures += 1;
                        error!(%zone, vm = %name, error = %e, "failed to delete terminated VM");
                    }
                }
                self.untrack(&name, report);
            }
        }
    }

    fn untrack(&self, name: &str, report: &mut PassReport) {
        if let Some(record) = self.manager.tracker().remove_matching(name) {
            report.removed += 1;
            info!(runner = %record.runner_name, vm = %record.vm_name, "untracked terminated runner");
        }
    }

    // ── Phase B ───────────────────────────────────────────────────

    async fn reconcile_running(&self, shutdown: &mut watch::Receiver<bool>, report: &mut PassReport) {
        let by_zone = self.manager.tracker().snapshot_by_zone();
        if by_zone.is_empty() {
            return;
        }

        let mut running: HashSet<String> = HashSet::new();
        let mut listed_zones = Vec::new();

        for zone in by_zone.keys() {
            let listing = self
                .bounded(
                    shutdown,
                    self.manager
                        .list_vms(zone, VmStatus::Running, self.config.list_timeout),
                )
                .await;

            match listing {
                Ok(names) => {
                    running.extend(names);
                    listed_zones.push(zone);
                }
                Err(ReclaimError::Cancelled) => return,
                Err(e) => {
                    warn!(%zone, error = %e, "failed to list running VMs, leaving zone entries untouched");
                    report.zone_failed(zone);
                }
            }
        }

        for zone in listed_zones {
            for record in &by_zone[zone] {
                if running.contains(&record.vm_name) {
                    continue;
                }
                if self.manager.tracker().remove(&record.runner_name).is_some() {
                    report.evicted += 1;
                    warn!(
                        runner = %record.runner_name,
                        vm = %record.vm_name,
                        %zone,
                        "evicted runner whose VM is no longer running"
                    );
                }
            }
        }
    }

    /// Await a manager call unless shutdown arrives first.
    async fn bounded<T, F>(&self, shutdown: &mut watch::Receiver<bool>, call: F) -> Result<T, ReclaimError>
    where
        F: Future<Output = FleetResult<T>>,
    {
        if *shutdown.borrow() {
            return Err(ReclaimError::Cancelled);
        }
        tokio::select! {
            result = call => result.map_err(ReclaimError::from),
            _ = cancelled(shutdown) => Err(ReclaimError::Cancelled),
        }
    }
}

/// Resolves once shutdown is signalled. Never resolves if the sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticker::ChannelTicker;
    use vmscale_core::{BootPayload, MemoryProvider, Platform};
    use vmscale_fleet::{ManagerConfig, RunnerRecord, Timeouts};

    const EAST: &str = "us-east1-c";
    const WEST: &str = "us-west1-a";

    fn setup(provider: &MemoryProvider) -> (Arc<VmManager>, OrphanReclaimer) {
        let zones = vec![EAST.to_string(), WEST.to_string()];
        let manager = Arc::new(VmManager::new(
            Arc::new(provider.clone()),
            ManagerConfig {
                zones: zones.clone(),
                instance_template: "windows-gpu-runner".to_string(),
                resource_class: "nvidia-tesla-t4".to_string(),
                platform: Platform::Windows,
                vm_prefix: "win-runner".to_string(),
                boot: BootPayload::default(),
                timeouts: Timeouts::default(),
            },
        ));
        let reclaimer = OrphanReclaimer::new(
            Arc::clone(&manager),
            ReclaimConfig {
                zones,
                vm_prefix: "win-runner".to_string(),
                interval: Duration::from_secs(120),
                list_timeout: Duration::from_secs(2),
                delete_timeout: Duration::from_secs(2),
            },
        );
        (manager, reclaimer)
    }

    fn track(manager: &VmManager, name: &str, zone: &str) {
        manager
            .tracker()
            .insert(RunnerRecord::new(name, name, zone))
            .unwrap();
    }

    /// A receiver whose sender is already gone, so it never signals.
    fn no_shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn failed_zone_is_skipped_and_other_zone_swept() {
        let provider = MemoryProvider::new();
        provider.add_instance(EAST, "win-runner-a", VmStatus::Running);
        provider.add_instance(WEST, "win-runner-b", VmStatus::Terminated);
        provider.fail_list(EAST);
        let (manager, reclaimer) = setup(&provider);
        track(&manager, "win-runner-a", EAST);
        track(&manager, "win-runner-b", WEST);

        let report = reclaimer.run_pass(&mut no_shutdown()).await;

        assert_eq!(report.terminated_found, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.evicted, 0);
        assert_eq!(report.failed_zones, vec![EAST.to_string()]);
        assert_eq!(provider.status_of(WEST, "win-runner-b"), None);
        assert_eq!(provider.status_of(EAST, "win-runner-a"), Some(VmStatus::Running));
        assert!(manager.tracker().contains("win-runner-a"));
        assert!(!manager.tracker().contains("win-runner-b"));
    }

    #[tokio::test]
    async fn failed_delete_still_untracks() {
        let provider = MemoryProvider::new();
        provider.add_instance(WEST, "win-runner-b", VmStatus::Terminated);
        provider.fail_deletes(true);
        let (manager, reclaimer) = setup(&provider);
        track(&manager, "win-runner-b", WEST);

        let report = reclaimer.run_pass(&mut no_shutdown()).await;

        assert_eq!(report.deleted, 0);
        assert_eq!(report.delete_failures, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(provider.status_of(WEST, "win-runner-b"), Some(VmStatus::Terminated));
    }

    #[tokio::test]
    async fn sweep_ignores_other_prefixes_and_untracked_terminated_vms_are_deleted() {
        let provider = MemoryProvider::new();
        provider.add_instance(EAST, "build-box", VmStatus::Terminated);
        provider.add_instance(EAST, "win-runner-leaked", VmStatus::Terminated);
        let (manager, reclaimer) = setup(&provider);

        let report = reclaimer.run_pass(&mut no_shutdown()).await;

        assert_eq!(report.deleted, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(provider.status_of(EAST, "build-box"), Some(VmStatus::Terminated));
        assert_eq!(provider.status_of(EAST, "win-runner-leaked"), None);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn vanished_vm_is_evicted() {
        let provider = MemoryProvider::new();
        provider.add_instance(EAST, "win-runner-a", VmStatus::Running);
        let (manager, reclaimer) = setup(&provider);
        track(&manager, "win-runner-a", EAST);
        track(&manager, "win-runner-gone", EAST);

        let report = reclaimer.run_pass(&mut no_shutdown()).await;

        assert_eq!(report.evicted, 1);
        assert!(manager.tracker().contains("win-runner-a"));
        assert!(!manager.tracker().contains("win-runner-gone"));
    }

    #[tokio::test]
    async fn failed_running_listing_evicts_nothing() {
        let provider = MemoryProvider::new();
        let (manager, reclaimer) = setup(&provider);
        track(&manager, "win-runner-a", EAST);
        track(&manager, "win-runner-b", WEST);
        provider.fail_list(EAST);
        provider.fail_list(WEST);

        let report = reclaimer.run_pass(&mut no_shutdown()).await;

        assert_eq!(report.evicted, 0);
        assert_eq!(manager.active_count(), 2);
        assert_eq!(report.failed_zones.len(), 2);
    }

    #[tokio::test]
    async fn sweep_spares_sibling_fleet_with_longer_prefix() {
        let provider = MemoryProvider::new();
        provider.add_instance(EAST, "win-runner2-other-fleet", VmStatus::Terminated);
        provider.add_instance(EAST, "win-runners-vm", VmStatus::Terminated);
        provider.add_instance(EAST, "win-runner-mine", VmStatus::Terminated);
        let (_manager, reclaimer) = setup(&provider);

        let report = reclaimer.run_pass(&mut no_shutdown()).await;

        assert_eq!(report.terminated_found, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(provider.status_of(EAST, "win-runner-mine"), None);
        assert_eq!(
            provider.status_of(EAST, "win-runner2-other-fleet"),
            Some(VmStatus::Terminated)
        );
        assert_eq!(provider.status_of(EAST, "win-runners-vm"), Some(VmStatus::Terminated));
        assert_eq!(provider.delete_calls(), vec!["win-runner-mine".to_string()]);
    }

    #[tokio::test]
    async fn names_listed_before_a_failed_page_are_still_swept() {
        let provider = MemoryProvider::new().with_page_size(1);
        provider.add_instance(WEST, "win-runner-a", VmStatus::Terminated);
        provider.add_instance(WEST, "win-runner-b", VmStatus::Terminated);
        provider.add_instance(WEST, "win-runner-c", VmStatus::Running);
        provider.add_instance(WEST, "win-runner-d", VmStatus::Running);
        provider.fail_list_after_first_page(WEST);
        let (manager, reclaimer) = setup(&provider);
        track(&manager, "win-runner-a", WEST);
        track(&manager, "win-runner-c", WEST);
        track(&manager, "win-runner-d", WEST);

        let report = reclaimer.run_pass(&mut no_shutdown()).await;

        assert_eq!(report.terminated_found, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed_zones, vec![WEST.to_string()]);
        assert_eq!(provider.delete_calls(), vec!["win-runner-a".to_string()]);
        assert_eq!(provider.status_of(WEST, "win-runner-b"), Some(VmStatus::Terminated));
        // A partial RUNNING listing is ambiguous: d was never listed but stays.
        assert_eq!(report.evicted, 0);
        assert!(manager.tracker().contains("win-runner-c"));
        assert!(manager.tracker().contains("win-runner-d"));
    }

    #[tokio::test]
    async fn eviction_only_in_zones_that_listed() {
        let provider = MemoryProvider::new();
        provider.add_instance(EAST, "win-runner-live", VmStatus::Running);
        provider.fail_list(WEST);
        let (manager, reclaimer) = setup(&provider);
        track(&manager, "win-runner-live", EAST);
        track(&manager, "win-runner-stale-east", EAST);
        track(&manager, "win-runner-stale-west", WEST);

        let report = reclaimer.run_pass(&mut no_shutdown()).await;

        assert_eq!(report.evicted, 1);
        assert_eq!(report.failed_zones, vec![WEST.to_string()]);
        assert!(manager.tracker().contains("win-runner-live"));
        assert!(!manager.tracker().contains("win-runner-stale-east"));
        assert!(manager.tracker().contains("win-runner-stale-west"));
    }

    #[tokio::test]
    async fn slow_listing_times_out_and_zone_is_skipped() {
        let provider = MemoryProvider::new();
        provider.add_instance(WEST, "win-runner-b", VmStatus::Terminated);
        provider.set_list_delay(Some(Duration::from_millis(200)));
        let (manager, mut reclaimer) = setup(&provider);
        reclaimer.config.list_timeout = Duration::from_millis(20);
        track(&manager, "win-runner-b", WEST);

        let report = reclaimer.run_pass(&mut no_shutdown()).await;

        assert_eq!(report.deleted, 0);
        assert_eq!(report.evicted, 0);
        assert!(manager.tracker().contains("win-runner-b"));
        assert_eq!(report.failed_zones.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_listing() {
        let provider = MemoryProvider::new();
        provider.set_list_delay(Some(Duration::from_secs(10)));
        let (_manager, reclaimer) = setup(&provider);
        let (tx, mut rx) = watch::channel(false);

        let pass = reclaimer.run_pass(&mut rx);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        };
        let (report, ()) = tokio::time::timeout(Duration::from_secs(1), async {
            tokio::join!(pass, stop)
        })
        .await
        .expect("pass should stop promptly on shutdown");

        assert_eq!(report, PassReport::default());
    }

    #[tokio::test]
    async fn runs_startup_pass_plus_one_per_tick() {
        let provider = MemoryProvider::new();
        let (_manager, reclaimer) = setup(&provider);
        let (ticks, ticker) = ChannelTicker::channel(4);
        ticks.send(()).await.unwrap();
        ticks.send(()).await.unwrap();
        drop(ticks);

        let passes = reclaimer.run(ticker, no_shutdown()).await;
        assert_eq!(passes, 3);
    }

    #[tokio::test]
    async fn no_pass_starts_after_shutdown() {
        let provider = MemoryProvider::new();
        provider.add_instance(EAST, "win-runner-old", VmStatus::Terminated);
        let (_manager, reclaimer) = setup(&provider);
        let reclaimer = Arc::new(reclaimer);
        let (ticks, ticker) = ChannelTicker::channel(4);
        let (tx, rx) = watch::channel(false);

        let handle = {
            let reclaimer = Arc::clone(&reclaimer);
            tokio::spawn(async move { reclaimer.run(ticker, rx).await })
        };

        tokio::time::timeout(Duration::from_secs(1), async {
            while provider.delete_calls().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        let _ = ticks.send(()).await;
        let _ = ticks.send(()).await;

        let passes = handle.await.unwrap();
        assert_eq!(passes, 1);
        assert_eq!(provider.delete_calls().len(), 1);
    }

    #[tokio::test]
    async fn already_cancelled_runs_nothing() {
        let provider = MemoryProvider::new();
        provider.add_instance(EAST, "win-runner-old", VmStatus::Terminated);
        let (_manager, reclaimer) = setup(&provider);
        let (_ticks, ticker) = ChannelTicker::channel(1);
        let (_tx, rx) = watch::channel(true);

        assert_eq!(reclaimer.run(ticker, rx).await, 0);
        assert!(provider.delete_calls().is_empty());
    }
}
