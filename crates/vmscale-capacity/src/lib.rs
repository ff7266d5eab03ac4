//! vmscale capacity oracle — pick the least-contended zone for a new VM.
//!
//! Given candidate zones and an accelerator type, the oracle groups
//! zones by region, reads each region's quota, and returns a zone from
//! the region with the most headroom.
//!
//! # Components
//!
//! - **`metric`** — accelerator type → quota metric name
//! - **`selector`** — region grouping, headroom ranking, zone selection

pub mod error;
pub mod metric;
pub mod selector;

pub use error::CapacityError;
pub use metric::quota_metric;
pub use selector::{RegionCandidates, ZoneQuota, group_by_region, rank_regions, select_zone};
