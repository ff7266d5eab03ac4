//! The compute provider capability.
//!
//! The autoscaler never talks to a cloud SDK directly. Everything it needs
//! from the compute API goes through [`ComputeProvider`], which is injected
//! as `Arc<dyn ComputeProvider>` so tests and the daemon's local mode can
//! substitute [`MemoryProvider`](crate::MemoryProvider).

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::types::{InsertRequest, ListFilter, ListPage, Operation, QuotaRecord};

/// Compute API operations used by the lifecycle manager.
///
/// Insert and delete only *start* an operation; callers must [`wait`]
/// on the returned handle to learn the outcome.
///
/// [`wait`]: ComputeProvider::wait
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Start creating a VM in `zone`.
    async fn insert(&self, zone: &str, request: InsertRequest) -> ProviderResult<Operation>;

    /// Start deleting `vm_name` in `zone`.
    async fn delete(&self, zone: &str, vm_name: &str) -> ProviderResult<Operation>;

    /// Block until `operation` completes, returning its error if it failed.
    async fn wait(&self, operation: &Operation) -> ProviderResult<()>;

    /// Fetch one page of VM names in `zone` matching `filter`.
    async fn list_page(
        &self,
        zone: &str,
        filter: &ListFilter,
        page_token: Option<String>,
    ) -> ProviderResult<ListPage>;

    /// Fetch the quota records of a region.
    async fn region_quotas(&self, region: &str) -> ProviderResult<Vec<QuotaRecord>>;
}

/// List every VM name in `zone` matching `filter`, following page tokens.
pub async fn list_all(
    provider: &dyn ComputeProvider,
    zone: &str,
    filter: &ListFilter,
) -> ProviderResult<Vec<String>> {
    let mut names = Vec::new();
    list_into(provider, zone, filter, &mut names).await?;
    Ok(names)
}

/// Like [`list_all`], but appends each page to `names` as it arrives.
///
/// If a later page fails, or the future is dropped mid-listing, `names`
/// keeps every name from the pages already received.
pub async fn list_into(
    provider: &dyn ComputeProvider,
    zone: &str,
    filter: &ListFilter,
    names: &mut Vec<String>,
) -> ProviderResult<()> {
    let mut token = None;

    loop {
        let page = provider.list_page(zone, filter, token).await?;
        names.extend(page.names);
        match page.next_page_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => return Ok(()),
        }
    }
}
