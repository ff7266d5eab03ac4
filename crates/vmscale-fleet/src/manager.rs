//! VM manager — creates and deletes runner VMs.
//!
//! Creation picks a zone by quota headroom, inserts a VM from the
//! instance template with the runner's credential and boot script in
//! its metadata, waits for the operation, and only then tracks the
//! runner. Deletion untracks first and deletes second, so a stuck
//! delete never inflates the fleet size; anything that leaks is picked
//! up by the orphan reclaimer.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use vmscale_capacity::select_zone;
use vmscale_core::{
    BootPayload, CREDENTIAL_METADATA_KEY, ComputeProvider, ConfigError, InsertRequest, ListFilter,
    Platform, ProviderResult, ScalerConfig, VmStatus, list_into,
};

use crate::error::{FleetError, FleetResult};
use crate::tracker::{FleetTracker, RunnerRecord};

/// Time budgets for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Per-zone list call.
    pub list: Duration,
    /// Delete start + wait.
    pub delete: Duration,
    /// Quota lookups and insert start + wait.
    pub operation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(30),
            delete: Duration::from_secs(45),
            operation: Duration::from_secs(300),
        }
    }
}

/// Static settings for the VM manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Candidate zones in preference order.
    pub zones: Vec<String>,
    pub instance_template: String,
    /// Accelerator type used for quota-based zone selection.
    pub resource_class: String,
    pub platform: Platform,
    /// Name prefix shared by every VM of this fleet.
    pub vm_prefix: String,
    pub boot: BootPayload,
    pub timeouts: Timeouts,
}

impl ManagerConfig {
    /// Build from a validated configuration file.
    pub fn from_config(config: &ScalerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            zones: config.zones(),
            instance_template: config.provider.instance_template.clone(),
            resource_class: config.provider.resource_class.clone(),
            platform: config.provider.platform,
            vm_prefix: config.vm_prefix(),
            boot: config.boot_payload()?,
            timeouts: Timeouts {
                list: config.list_timeout()?,
                delete: config.delete_timeout()?,
                operation: config.operation_timeout()?,
            },
        })
    }
}

/// Names returned by a listing that may have stopped partway.
#[derive(Debug)]
pub struct Listing {
    /// Every name received before the listing ended.
    pub names: Vec<String>,
    /// Set when a page failed or the budget ran out.
    pub error: Option<FleetError>,
}

impl Listing {
    /// Collapse to a result, discarding partial names on failure.
    pub fn into_result(self) -> FleetResult<Vec<String>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.names),
        }
    }
}

/// Creates, deletes, and tracks runner VMs.
pub struct VmManager {
    provider: Arc<dyn ComputeProvider>,
    config: ManagerConfig,
    tracker: Arc<FleetTracker>,
}

impl VmManager {
    pub fn new(provider: Arc<dyn ComputeProvider>, config: ManagerConfig) -> Self {
        info!(
            zones = ?config.zones,
            template = %config.instance_template,
            resource_class = %config.resource_class,
            platform = %config.platform,
            vm_prefix = %config.vm_prefix,
            "VM manager initialized"
        );
        Self {
            provider,
            config,
            tracker: Arc::new(FleetTracker::new()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<FleetTracker> {
        &self.tracker
    }

    /// Create a VM for `runner_name` carrying `credential`.
    ///
    /// The runner is tracked only after the insert operation completes.
    /// On error nothing is tracked; revoking the credential is the
    /// caller's job.
    pub async fn create_vm(&self, runner_name: &str, credential: &str) -> FleetResult<String> {
        if self.tracker.contains(runner_name) {
            return Err(FleetError::DuplicateRunner(runner_name.to_string()));
        }

        let placement = select_zone(
            self.provider.as_ref(),
            &self.config.zones,
            &self.config.resource_class,
            self.config.timeouts.operation,
        )
        .await?;

        let request = self.insert_request(runner_name, credential);
        let zone = placement.zone.as_str();
        let provider = self.provider.as_ref();

        let created = bounded("create", runner_name, self.config.timeouts.operation, async {
            let op = provider.insert(zone, request).await?;
            provider.wait(&op).await
        })
        .await;
        if let Err(e @ FleetError::Timeout { .. }) = &created {
            warn!(
                runner = %runner_name,
                %zone,
                error = %e,
                "create timed out, VM may exist untracked until it terminates"
            );
        }
        created?;

        self.tracker
            .insert(RunnerRecord::new(runner_name, runner_name, zone))?;

        info!(runner = %runner_name, %zone, fleet_size = self.tracker.count(), "created runner VM");
        Ok(runner_name.to_string())
    }

    fn insert_request(&self, vm_name: &str, credential: &str) -> InsertRequest {
        let (boot_key, boot_content) = self.config.boot.metadata_for(self.config.platform);
        let metadata = BTreeMap::from([
            (CREDENTIAL_METADATA_KEY.to_string(), credential.to_string()),
            (boot_key.to_string(), boot_content.to_string()),
        ]);
        InsertRequest {
            name: vm_name.to_string(),
            template: self.config.instance_template.clone(),
            metadata,
        }
    }

    /// Untrack `runner_name`, then delete its VM.
    ///
    /// The entry is gone before the delete is issued; a failed delete is
    /// logged and returned but does not restore it.
    pub async fn delete_by_name(&self, runner_name: &str) -> FleetResult<()> {
        let Some(record) = self.tracker.remove(runner_name) else {
            debug!(runner = %runner_name, "runner not tracked, nothing to delete");
            return Ok(());
        };

        match self.delete_vm(&record.zone, &record.vm_name).await {
            Ok(()) => {
                info!(runner = %runner_name, vm = %record.vm_name, zone = %record.zone, "deleted runner VM");
                Ok(())
            }
            Err(e) => {
                error!(
                    runner = %runner_name,
                    vm = %record.vm_name,
                    zone = %record.zone,
                    error = %e,
                    "failed to delete runner VM, left for orphan reclaim"
                );
                Err(e)
            }
        }
    }

    /// Delete a VM without touching the tracker, within the default budget.
    pub async fn delete_vm(&self, zone: &str, vm_name: &str) -> FleetResult<()> {
        self.delete_vm_within(zone, vm_name, self.config.timeouts.delete)
            .await
    }

    /// Delete a VM without touching the tracker, within `budget`.
    pub async fn delete_vm_within(
        &self,
        zone: &str,
        vm_name: &str,
        budget: Duration,
    ) -> FleetResult<()> {
        let provider = self.provider.as_ref();
        bounded("delete", vm_name, budget, async {
            let op = provider.delete(zone, vm_name).await?;
            provider.wait(&op).await
        })
        .await
    }

    /// List this fleet's VM names in `zone` with the given status.
    pub async fn list_vms(
        &self,
        zone: &str,
        status: VmStatus,
        budget: Duration,
    ) -> FleetResult<Vec<String>> {
        self.list_vms_partial(zone, status, budget)
            .await
            .into_result()
    }

    /// Like [`list_vms`](Self::list_vms), but keeps the names from pages
    /// received before a failure or timeout.
    pub async fn list_vms_partial(&self, zone: &str, status: VmStatus, budget: Duration) -> Listing {
        let filter = ListFilter::new(self.config.vm_prefix.clone(), status);
        let mut names = Vec::new();
        let result = bounded(
            "list",
            zone,
            budget,
            list_into(self.provider.as_ref(), zone, &filter, &mut names),
        )
        .await;
        Listing {
            names,
            error: result.err(),
        }
    }

    /// Delete every tracked VM and untrack each regardless of outcome.
    /// Returns the number of successful deletions.
    pub async fn delete_all(&self) -> usize {
        let records = self.tracker.snapshot();
        info!(count = records.len(), "deleting all runner VMs");

        let mut deleted = 0;
        for record in records {
            match self.delete_vm(&record.zone, &record.vm_name).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(vm = %record.vm_name, zone = %record.zone, "deleted runner VM");
                }
                Err(e) => {
                    warn!(vm = %record.vm_name, zone = %record.zone, error = %e, "failed to delete runner VM");
                }
            }
            self.tracker.remove(&record.runner_name);
        }
        deleted
    }

    pub fn mark_busy(&self, runner_name: &str) -> bool {
        self.tracker.mark_busy(runner_name)
    }

    pub fn active_count(&self) -> usize {
        self.tracker.count()
    }

    pub fn active_runner_names(&self) -> Vec<String> {
        self.tracker.runner_names()
    }
}

/// Run a provider call under a time budget.
async fn bounded<T, F>(
    operation: &'static str,
    target: &str,
    budget: Duration,
    call: F,
) -> FleetResult<T>
where
    F: Future<Output = ProviderResult<T>>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result.map_err(FleetError::from),
        Err(_) => Err(FleetError::Timeout {
            operation,
            target: target.to_string(),
            after: budget,
        }),
    }
}
