//! Command line and configuration loading.
//!
//! Precedence, lowest to highest: built-in defaults, the TOML file,
//! `VMSCALE_CLEANUP_INTERVAL`, command line flags.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};

use vmscale_core::{Platform, ScalerConfig, parse_duration};

#[derive(Parser)]
#[command(name = "vmscaled", about = "Autoscaler for ephemeral runner VMs")]
pub struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the autoscaler until shutdown or drain completion.
    Run(ConfigArgs),
    /// Load and validate the configuration, then print it.
    CheckConfig(ConfigArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Path to vmscale.toml. Defaults apply when omitted.
    #[arg(long, short, env = "VMSCALE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Comma-separated candidate zones, in preference order.
    #[arg(long)]
    pub zones: Option<String>,

    /// Runner platform (windows or linux).
    #[arg(long)]
    pub platform: Option<Platform>,

    #[arg(long)]
    pub min_runners: Option<u32>,

    #[arg(long)]
    pub max_runners: Option<u32>,

    /// Time between orphan reclaim passes, e.g. "2m" or "90s".
    #[arg(long)]
    pub cleanup_interval: Option<String>,
}

impl ConfigArgs {
    /// Load, override, and validate the configuration.
    pub fn load(&self) -> anyhow::Result<ScalerConfig> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(&self, env: F) -> anyhow::Result<ScalerConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.config {
            Some(path) => ScalerConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ScalerConfig::default(),
        };

        config
            .apply_env_overrides(env)
            .context("Invalid environment override")?;
        self.apply(&mut config)?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn apply(&self, config: &mut ScalerConfig) -> anyhow::Result<()> {
        if let Some(zones) = &self.zones {
            config.provider.zones = zones.clone();
        }
        if let Some(platform) = self.platform {
            config.provider.platform = platform;
        }
        if let Some(min) = self.min_runners {
            config.scaling.min_runners = min;
        }
        if let Some(max) = self.max_runners {
            config.scaling.max_runners = max;
        }
        if let Some(interval) = &self.cleanup_interval {
            parse_duration(interval).context("Invalid --cleanup-interval")?;
            config.reclaim.interval = interval.clone();
        }
        Ok(())
    }
}
