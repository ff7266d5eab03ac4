//! vmscale.toml configuration.
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Durations are written as strings (`"90s"`, `"2m"`, `"1m30s"`) and
//! parsed on access.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::platform::{BootPayload, Platform};
use crate::zone::{parse_zone_list, region_of};

/// Environment variable overriding `reclaim.interval`.
pub const CLEANUP_INTERVAL_ENV: &str = "VMSCALE_CLEANUP_INTERVAL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    pub provider: ProviderConfig,
    pub scaling: ScalingConfig,
    pub reclaim: ReclaimConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub project: String,
    /// Comma-separated candidate zones in preference order.
    pub zones: String,
    pub instance_template: String,
    /// Accelerator type whose quota drives zone selection.
    pub resource_class: String,
    pub platform: Platform,
    /// Fleet VM name prefix; defaults to the platform's prefix.
    pub vm_prefix: Option<String>,
    /// Replaces the embedded boot script for the configured platform.
    pub boot_script: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            project: "slang-runners".to_string(),
            zones: "us-east1-c,us-east1-d,us-central1-a,us-west1-a".to_string(),
            instance_template: "windows-gpu-runner".to_string(),
            resource_class: "nvidia-tesla-t4".to_string(),
            platform: Platform::Windows,
            vm_prefix: None,
            boot_script: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Runners kept warm even with an empty queue.
    pub min_runners: u32,
    /// Upper bound on concurrent runners.
    pub max_runners: u32,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_runners: 0,
            max_runners: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimConfig {
    /// Time between orphan reclaim passes.
    pub interval: String,
    /// Budget for each per-zone list call.
    pub list_timeout: String,
    /// Budget for each delete (start + wait).
    pub delete_timeout: String,
    /// Budget for quota lookups and VM creation (start + wait).
    pub operation_timeout: String,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            interval: "2m".to_string(),
            list_timeout: "30s".to_string(),
            delete_timeout: "45s".to_string(),
            operation_timeout: "5m".to_string(),
        }
    }
}

/// Settings for the daemon's in-memory provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub page_size: usize,
    /// region → quota limit for the configured resource class.
    pub quotas: BTreeMap<String, f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            quotas: BTreeMap::new(),
        }
    }
}

impl ScalerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Apply environment overrides. `lookup` is usually `std::env::var(..).ok()`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(CLEANUP_INTERVAL_ENV).filter(|v| !v.is_empty()) {
            parse_duration(&value)?;
            self.reclaim.interval = value;
        }
        Ok(())
    }

    /// Check the configuration eagerly so bad zones or bounds fail at
    /// startup instead of at the first scale-up.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zones = self.zones();
        if zones.is_empty() {
            return Err(ConfigError::Invalid("provider.zones is empty".to_string()));
        }
        if let Some(bad) = zones.iter().find(|z| region_of(z).is_none()) {
            return Err(ConfigError::Invalid(format!(
                "zone {bad:?} does not match <region>-<letter>"
            )));
        }
        if self.provider.instance_template.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "provider.instance_template is empty".to_string(),
            ));
        }
        if self.provider.resource_class.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "provider.resource_class is empty".to_string(),
            ));
        }
        if self.vm_prefix().is_empty() {
            return Err(ConfigError::Invalid("provider.vm_prefix is empty".to_string()));
        }
        if self.scaling.max_runners == 0 {
            return Err(ConfigError::Invalid("scaling.max_runners must be > 0".to_string()));
        }
        if self.scaling.min_runners > self.scaling.max_runners {
            return Err(ConfigError::Invalid(format!(
                "scaling.min_runners ({}) exceeds scaling.max_runners ({})",
                self.scaling.min_runners, self.scaling.max_runners
            )));
        }
        for (name, value) in [
            ("reclaim.interval", &self.reclaim.interval),
            ("reclaim.list_timeout", &self.reclaim.list_timeout),
            ("reclaim.delete_timeout", &self.reclaim.delete_timeout),
            ("reclaim.operation_timeout", &self.reclaim.operation_timeout),
        ] {
            if parse_duration(value)?.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }

    /// Candidate zones in preference order.
    pub fn zones(&self) -> Vec<String> {
        parse_zone_list(&self.provider.zones)
    }

    pub fn vm_prefix(&self) -> String {
        self.provider
            .vm_prefix
            .clone()
            .unwrap_or_else(|| self.provider.platform.default_vm_prefix().to_string())
    }

    pub fn boot_payload(&self) -> Result<BootPayload, ConfigError> {
        let boot = BootPayload::default();
        match &self.provider.boot_script {
            Some(path) => boot.with_script_file(self.provider.platform, path),
            None => Ok(boot),
        }
    }

    pub fn cleanup_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.reclaim.interval)
    }

    pub fn list_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.reclaim.list_timeout)
    }

    pub fn delete_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.reclaim.delete_timeout)
    }

    pub fn operation_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.reclaim.operation_timeout)
    }
}

/// Parse a duration such as `"90s"`, `"500ms"`, `"2m"`, `"1h"` or a
/// compound like `"1m30s"`. A bare integer is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let err = |reason: &str| ConfigError::Duration {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let s = input.trim();
    if s.is_empty() {
        return Err(err("empty"));
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(err("expected a number"));
        }
        let value: u64 = rest[..digits].parse().map_err(|_| err("number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            "" => return Err(err("missing unit")),
            _ => return Err(err("unknown unit")),
        };
        total = total.saturating_add(part);
        rest = &rest[unit_len..];
    }

    Ok(total)
}
