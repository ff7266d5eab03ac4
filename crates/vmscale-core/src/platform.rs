//! Runner platform and boot payload selection.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const WINDOWS_BOOT_SCRIPT: &str = include_str!("../boot/startup.ps1");
const LINUX_BOOT_SCRIPT: &str = include_str!("../boot/startup.sh");

/// Operating system the runner VMs boot into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Windows,
    Linux,
}

impl Platform {
    /// Metadata key the guest agent executes at boot.
    pub fn boot_metadata_key(&self) -> &'static str {
        match self {
            Self::Windows => "windows-startup-script-ps1",
            Self::Linux => "startup-script",
        }
    }

    /// Default VM name prefix for this platform's fleet.
    pub fn default_vm_prefix(&self) -> &'static str {
        match self {
            Self::Windows => "win-runner",
            Self::Linux => "linux-runner",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "windows" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            other => Err(ConfigError::Invalid(format!(
                "platform must be 'windows' or 'linux', got {other:?}"
            ))),
        }
    }
}

/// The two opaque boot scripts, one per platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootPayload {
    pub windows: String,
    pub linux: String,
}

impl Default for BootPayload {
    fn default() -> Self {
        Self {
            windows: WINDOWS_BOOT_SCRIPT.to_string(),
            linux: LINUX_BOOT_SCRIPT.to_string(),
        }
    }
}

impl BootPayload {
    /// Replace one platform's script with the contents of `path`.
    pub fn with_script_file(mut self, platform: Platform, path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        match platform {
            Platform::Windows => self.windows = content,
            Platform::Linux => self.linux = content,
        }
        Ok(self)
    }

    /// The (metadata key, content) pair for `platform`.
    pub fn metadata_for(&self, platform: Platform) -> (&'static str, &str) {
        let content = match platform {
            Platform::Windows => &self.windows,
            Platform::Linux => &self.linux,
        };
        (platform.boot_metadata_key(), content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn metadata_pair_follows_platform() {
        let boot = BootPayload::default();

        let (key, content) = boot.metadata_for(Platform::Windows);
        assert_eq!(key, "windows-startup-script-ps1");
        assert!(content.contains("Stop-Computer"));

        let (key, content) = boot.metadata_for(Platform::Linux);
        assert_eq!(key, "startup-script");
        assert!(content.contains("poweroff"));
    }

    #[test]
    fn parse_platform() {
        assert_eq!("Windows".parse::<Platform>().unwrap(), Platform::Windows);
        assert_eq!("linux".parse::<Platform>().unwrap(), Platform::Linux);
        assert!("macos".parse::<Platform>().is_err());
    }

    #[test]
    fn script_file_overrides_one_platform() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "echo custom").unwrap();

        let boot = BootPayload::default()
            .with_script_file(Platform::Linux, file.path())
            .unwrap();
        assert_eq!(boot.linux, "echo custom");
        assert_eq!(boot.windows, BootPayload::default().windows);
    }
}
