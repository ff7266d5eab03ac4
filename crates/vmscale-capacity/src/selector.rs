//! Zone selection by regional quota headroom.
//!
//! Quota is regional, so candidates are ranked per region and the first
//! listed zone of the winning region is returned. Ranking is a stable
//! sort, so regions with equal headroom keep their input order.

use std::time::Duration;

use tracing::{debug, info, warn};

use vmscale_core::{ComputeProvider, region_of};

use crate::error::CapacityError;
use crate::metric::quota_metric;

/// Candidate zones belonging to one region, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCandidates {
    pub region: String,
    pub zones: Vec<String>,
}

/// Available headroom for one region, with its representative zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneQuota {
    pub region: String,
    pub zone: String,
    pub available: f64,
}

/// Group zones by region. Regions appear in order of first mention;
/// malformed zone names are dropped with a warning.
pub fn group_by_region(zones: &[String]) -> Vec<RegionCandidates> {
    let mut groups: Vec<RegionCandidates> = Vec::new();

    for zone in zones {
        let Some(region) = region_of(zone) else {
            warn!(%zone, "ignoring malformed zone name");
            continue;
        };
        match groups.iter_mut().find(|g| g.region == region) {
            Some(group) => group.zones.push(zone.clone()),
            None => groups.push(RegionCandidates {
                region: region.to_string(),
                zones: vec![zone.clone()],
            }),
        }
    }

    groups
}

/// Sort by headroom, best first. Ties keep their relative order.
pub fn rank_regions(mut quotas: Vec<ZoneQuota>) -> Vec<ZoneQuota> {
    quotas.sort_by(|a, b| {
        b.available
            .partial_cmp(&a.available)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    quotas
}

/// Pick a zone for a new VM of `resource_class`.
///
/// Regions whose quota fetch fails or times out are skipped. Fails with
/// [`CapacityError::NotFound`] when no region reports the metric and with
/// [`CapacityError::CapacityExhausted`] when none has positive headroom.
pub async fn select_zone(
    provider: &dyn ComputeProvider,
    zones: &[String],
    resource_class: &str,
    timeout: Duration,
) -> Result<ZoneQuota, CapacityError> {
    let metric = quota_metric(resource_class);
    let mut candidates = Vec::new();

    for group in group_by_region(zones) {
        let records = match tokio::time::timeout(timeout, provider.region_quotas(&group.region)).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                warn!(region = %group.region, error = %e, "failed to fetch region quota, skipping");
                continue;
            }
            Err(_) => {
                warn!(region = %group.region, ?timeout, "region quota fetch timed out, skipping");
                continue;
            }
        };

        let Some(record) = records.iter().find(|r| r.metric == metric) else {
            debug!(region = %group.region, %metric, "region does not expose metric");
            continue;
        };

        debug!(
            region = %group.region,
            %metric,
            limit = record.limit,
            usage = record.usage,
            available = record.available(),
            "region quota"
        );
        candidates.push(ZoneQuota {
            region: group.region.clone(),
            zone: group.zones[0].clone(),
            available: record.available(),
        });
    }

    let best = rank_regions(candidates)
        .into_iter()
        .next()
        .ok_or_else(|| CapacityError::NotFound {
            metric: metric.clone(),
        })?;

    if best.available <= 0.0 {
        return Err(CapacityError::CapacityExhausted {
            resource_class: resource_class.to_string(),
            metric,
        });
    }

    info!(
        region = %best.region,
        zone = %best.zone,
        available = best.available,
        %metric,
        "selected zone"
    );
    Ok(best)
}
