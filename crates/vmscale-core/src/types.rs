//! Provider-facing domain types.
//!
//! These mirror the subset of a cloud compute API the autoscaler needs:
//! instance status, name/status list filters, insert requests carrying
//! metadata, asynchronous operation handles, and region quota records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata key under which the one-time job credential is passed to a VM.
pub const CREDENTIAL_METADATA_KEY: &str = "runner-jit-config";

/// Lifecycle status of a VM as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VmStatus {
    Provisioning,
    Running,
    Stopping,
    Terminated,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "PROVISIONING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// "name is `<name_prefix>-*` AND status = `status`".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilter {
    pub name_prefix: String,
    pub status: VmStatus,
}

impl ListFilter {
    pub fn new(name_prefix: impl Into<String>, status: VmStatus) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            status,
        }
    }

    /// Whether an instance with this name and status passes the filter.
    pub fn matches(&self, name: &str, status: VmStatus) -> bool {
        status == self.status
            && name
                .strip_prefix(self.name_prefix.as_str())
                .is_some_and(|rest| rest.starts_with('-'))
    }
}

impl fmt::Display for ListFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(name eq {}-.*) AND (status eq {})",
            self.name_prefix, self.status
        )
    }
}

/// One page of a list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub names: Vec<String>,
    /// Token for the next page, `None` on the last page.
    pub next_page_token: Option<String>,
}

/// Request to create one VM from an instance template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRequest {
    /// Instance name (also the runner's logical name).
    pub name: String,
    /// Instance template the provider expands into a full VM definition.
    pub template: String,
    /// Instance metadata items (credential and boot script).
    pub metadata: BTreeMap<String, String>,
}

/// Kind of asynchronous provider operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => f.write_str("insert"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// Handle to an asynchronous provider operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
    pub zone: String,
    /// VM the operation targets.
    pub target: String,
}

/// A quota metric for a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub metric: String,
    pub limit: f64,
    pub usage: f64,
}

impl QuotaRecord {
    /// Remaining headroom. Provider usage already counts this fleet's VMs.
    pub fn available(&self) -> f64 {
        self.limit - self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_prefix_and_status() {
        let filter = ListFilter::new("win-runner", VmStatus::Terminated);
        assert!(filter.matches("win-runner-ab12", VmStatus::Terminated));
        assert!(!filter.matches("win-runner-ab12", VmStatus::Running));
        assert!(!filter.matches("linux-runner-ab12", VmStatus::Terminated));
    }

    #[test]
    fn filter_does_not_match_sibling_fleet_prefix() {
        let filter = ListFilter::new("gpu", VmStatus::Terminated);
        assert!(filter.matches("gpu-0a1b2c", VmStatus::Terminated));
        assert!(!filter.matches("gpu2-0a1b2c", VmStatus::Terminated));
        assert!(!filter.matches("gpus-0a1b2c", VmStatus::Terminated));
        assert!(!filter.matches("gpu", VmStatus::Terminated));
    }

    #[test]
    fn filter_renders_provider_expression() {
        let filter = ListFilter::new("win-runner", VmStatus::Running);
        assert_eq!(
            filter.to_string(),
            "(name eq win-runner-.*) AND (status eq RUNNING)"
        );
    }

    #[test]
    fn quota_available_is_limit_minus_usage() {
        let q = QuotaRecord {
            metric: "NVIDIA_T4_GPUS".to_string(),
            limit: 8.0,
            usage: 3.0,
        };
        assert_eq!(q.available(), 5.0);
    }
}
