//! In-memory compute provider.
//!
//! Behaves like a single-project compute API: instances live in zones,
//! quota usage tracks live instances, list calls paginate, and every
//! mutating call returns an [`Operation`] that must be waited on. Fault
//! injection hooks let tests fail listings per zone, deletes, inserts,
//! and quota fetches.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::ComputeProvider;
use crate::types::{
    InsertRequest, ListFilter, ListPage, Operation, OperationKind, QuotaRecord, VmStatus,
};
use crate::zone::region_of;

const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone)]
struct Instance {
    status: VmStatus,
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Faults {
    list_zones: HashSet<String>,
    /// Zones whose first page lists fine but every later page fails.
    list_continuation_zones: HashSet<String>,
    quota_regions: HashSet<String>,
    deletes: bool,
    inserts: bool,
    list_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    /// (zone, name) → instance. Ordered so list output is deterministic.
    instances: BTreeMap<(String, String), Instance>,
    /// region → base quota records (usage excludes live instances).
    quotas: HashMap<String, Vec<QuotaRecord>>,
    /// Outcome of each started operation, consumed by `wait`.
    operations: HashMap<String, ProviderResult<()>>,
    faults: Faults,
    inserts: Vec<InsertRequest>,
    deletes: Vec<String>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    next_op: AtomicU64,
    page_size: usize,
    /// Quota metric each live instance consumes one unit of.
    usage_metric: Option<String>,
}

/// A compute provider backed by process memory.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    inner: Arc<Inner>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// Create an empty provider with the default page size.
    pub fn new() -> Self {
        Self::build(DEFAULT_PAGE_SIZE, None)
    }

    /// Set the number of names returned per list page. Call before seeding.
    pub fn with_page_size(self, page_size: usize) -> Self {
        Self::build(page_size.max(1), self.inner.usage_metric.clone())
    }

    /// Count every live instance as one unit of `metric` in its region.
    /// Call before seeding.
    pub fn with_usage_metric(self, metric: &str) -> Self {
        Self::build(self.inner.page_size, Some(metric.to_string()))
    }

    fn build(page_size: usize, usage_metric: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                next_op: AtomicU64::new(1),
                page_size,
                usage_metric,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ── Seeding ───────────────────────────────────────────────────

    /// Set (or replace) a region's quota for `metric`.
    pub fn set_quota(&self, region: &str, metric: &str, limit: f64, usage: f64) {
        let mut state = self.state();
        let records = state.quotas.entry(region.to_string()).or_default();
        records.retain(|r| r.metric != metric);
        records.push(QuotaRecord {
            metric: metric.to_string(),
            limit,
            usage,
        });
    }

    /// Place an instance directly, bypassing insert.
    pub fn add_instance(&self, zone: &str, name: &str, status: VmStatus) {
        self.state().instances.insert(
            (zone.to_string(), name.to_string()),
            Instance {
                status,
                metadata: BTreeMap::new(),
            },
        );
    }

    /// Change an existing instance's status. Returns false if absent.
    pub fn set_status(&self, zone: &str, name: &str, status: VmStatus) -> bool {
        match self
            .state()
            .instances
            .get_mut(&(zone.to_string(), name.to_string()))
        {
            Some(inst) => {
                inst.status = status;
                true
            }
            None => false,
        }
    }

    // ── Inspection ────────────────────────────────────────────────

    pub fn status_of(&self, zone: &str, name: &str) -> Option<VmStatus> {
        self.state()
            .instances
            .get(&(zone.to_string(), name.to_string()))
            .map(|i| i.status)
    }

    pub fn metadata_of(&self, zone: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.state()
            .instances
            .get(&(zone.to_string(), name.to_string()))
            .map(|i| i.metadata.clone())
    }

    /// All instances as (zone, name, status).
    pub fn instances(&self) -> Vec<(String, String, VmStatus)> {
        self.state()
            .instances
            .iter()
            .map(|((zone, name), inst)| (zone.clone(), name.clone(), inst.status))
            .collect()
    }

    /// Every insert request received, in order.
    pub fn insert_calls(&self) -> Vec<InsertRequest> {
        self.state().inserts.clone()
    }

    /// Every VM name a delete was requested for, in order.
    pub fn delete_calls(&self) -> Vec<String> {
        self.state().deletes.clone()
    }

    // ── Fault injection ───────────────────────────────────────────

    /// Make list calls for `zone` fail until cleared.
    pub fn fail_list(&self, zone: &str) {
        self.state().faults.list_zones.insert(zone.to_string());
    }

    pub fn clear_list_failure(&self, zone: &str) {
        let mut state = self.state();
        state.faults.list_zones.remove(zone);
        state.faults.list_continuation_zones.remove(zone);
    }

    /// Serve the first list page for `zone`, then fail every page after it.
    pub fn fail_list_after_first_page(&self, zone: &str) {
        self.state()
            .faults
            .list_continuation_zones
            .insert(zone.to_string());
    }

    /// Make quota fetches for `region` fail.
    pub fn fail_quota(&self, region: &str) {
        self.state().faults.quota_regions.insert(region.to_string());
    }

    /// Make every delete operation fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.state().faults.deletes = fail;
    }

    /// Make every insert operation fail.
    pub fn fail_inserts(&self, fail: bool) {
        self.state().faults.inserts = fail;
    }

    /// Delay every list page by `delay`.
    pub fn set_list_delay(&self, delay: Option<Duration>) {
        self.state().faults.list_delay = delay;
    }

    fn start_operation(
        &self,
        state: &mut State,
        kind: OperationKind,
        zone: &str,
        target: &str,
        outcome: ProviderResult<()>,
    ) -> Operation {
        let id = format!(
            "operation-{}",
            self.inner.next_op.fetch_add(1, Ordering::Relaxed)
        );
        state.operations.insert(id.clone(), outcome);
        Operation {
            id,
            kind,
            zone: zone.to_string(),
            target: target.to_string(),
        }
    }
}

#[async_trait]
impl ComputeProvider for MemoryProvider {
    async fn insert(&self, zone: &str, request: InsertRequest) -> ProviderResult<Operation> {
        let mut state = self.state();
        state.inserts.push(request.clone());

        let key = (zone.to_string(), request.name.clone());
        let outcome = if state.faults.inserts {
            Err(ProviderError::Operation {
                operation: "insert".to_string(),
                message: format!("injected failure creating {}", request.name),
            })
        } else if state.instances.contains_key(&key) {
            Err(ProviderError::Operation {
                operation: "insert".to_string(),
                message: format!("instance {} already exists", request.name),
            })
        } else {
            state.instances.insert(
                key,
                Instance {
                    status: VmStatus::Running,
                    metadata: request.metadata.clone(),
                },
            );
            Ok(())
        };

        debug!(%zone, name = %request.name, ok = outcome.is_ok(), "memory insert");
        Ok(self.start_operation(&mut state, OperationKind::Insert, zone, &request.name, outcome))
    }

    async fn delete(&self, zone: &str, vm_name: &str) -> ProviderResult<Operation> {
        let mut state = self.state();
        state.deletes.push(vm_name.to_string());

        let key = (zone.to_string(), vm_name.to_string());
        if !state.instances.contains_key(&key) {
            return Err(ProviderError::NotFound(format!("{zone}/{vm_name}")));
        }

        let outcome = if state.faults.deletes {
            Err(ProviderError::Operation {
                operation: "delete".to_string(),
                message: format!("injected failure deleting {vm_name}"),
            })
        } else {
            state.instances.remove(&key);
            Ok(())
        };

        debug!(%zone, %vm_name, ok = outcome.is_ok(), "memory delete");
        Ok(self.start_operation(&mut state, OperationKind::Delete, zone, vm_name, outcome))
    }

    async fn wait(&self, operation: &Operation) -> ProviderResult<()> {
        self.state()
            .operations
            .remove(&operation.id)
            .unwrap_or_else(|| Err(ProviderError::NotFound(operation.id.clone())))
    }

    async fn list_page(
        &self,
        zone: &str,
        filter: &ListFilter,
        page_token: Option<String>,
    ) -> ProviderResult<ListPage> {
        let delay = self.state().faults.list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        if state.faults.list_zones.contains(zone) {
            return Err(ProviderError::Unavailable(format!(
                "injected list failure in {zone}"
            )));
        }
        if page_token.is_some() && state.faults.list_continuation_zones.contains(zone) {
            return Err(ProviderError::Unavailable(format!(
                "injected list failure in {zone} after first page"
            )));
        }

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ProviderError::Unavailable(format!("bad page token {token:?}")))?,
            None => 0,
        };

        let matching: Vec<String> = state
            .instances
            .iter()
            .filter(|((z, name), inst)| z == zone && filter.matches(name, inst.status))
            .map(|((_, name), _)| name.clone())
            .collect();

        let end = (offset + self.inner.page_size).min(matching.len());
        let names = matching.get(offset..end).map(<[String]>::to_vec).unwrap_or_default();
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(ListPage {
            names,
            next_page_token,
        })
    }

    async fn region_quotas(&self, region: &str) -> ProviderResult<Vec<QuotaRecord>> {
        let state = self.state();
        if state.faults.quota_regions.contains(region) {
            return Err(ProviderError::Unavailable(format!(
                "injected quota failure in {region}"
            )));
        }

        let mut records = state.quotas.get(region).cloned().unwrap_or_default();

        if let Some(metric) = &self.inner.usage_metric {
            let live = state
                .instances
                .iter()
                .filter(|((zone, _), inst)| {
                    region_of(zone) == Some(region) && inst.status != VmStatus::Terminated
                })
                .count();
            for record in records.iter_mut().filter(|r| &r.metric == metric) {
                record.usage += live as f64;
            }
        }

        Ok(records)
    }
}
