//! Process flags and the autoscaler configuration document.

use crate::inventory::InventoryConfig;
use crate::manager::ScalingPolicy;
use crate::monitor::MonitorConfig;
use crate::strategy::StrategyConfig;
use clap::Parser;
use config_loader::{ConfigError, ConfigManager};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Process flags for the autoscaler binary
#[derive(Debug, Clone, Parser)]
#[command(name = "fleet-autoscaler")]
#[command(about = "Samples utilization metrics and scales fleets to match demand")]
pub struct Args {
    /// Path to the YAML or JSON configuration document
    #[arg(long, env = "AUTOSCALER_CONFIG", default_value = "autoscaler.yaml")]
    pub config: PathBuf,

    /// JSON Schema the configuration document is validated against
    #[arg(long, env = "AUTOSCALER_SCHEMA")]
    pub schema: Option<PathBuf>,

    /// Output logs in JSON format
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Run a single cycle for every manager and exit
    #[arg(long, env = "AUTOSCALER_ONCE")]
    pub once: bool,
}

impl Args {
    pub fn config_manager(&self) -> ConfigManager {
        match &self.schema {
            Some(schema) => ConfigManager::with_schema(schema),
            None => ConfigManager::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoscalerConfig {
    /// Pause between scheduler cycles
    #[serde(default = "default_interval", deserialize_with = "duration::deserialize")]
    pub interval: Duration,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub managers: BTreeMap<String, ManagerConfig>,
}

fn default_interval() -> Duration {
    Duration::from_secs(120)
}

impl AutoscalerConfig {
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        args.config_manager().load(&args.config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One managed fleet: where readings come from, how they are judged, and
/// what gets scaled.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "enabled")]
    pub scale_up: bool,

    #[serde(default = "enabled")]
    pub scale_down: bool,

    pub inventory: InventoryConfig,
    pub monitor: MonitorConfig,
    pub strategy: StrategyConfig,
}

fn enabled() -> bool {
    true
}

impl ManagerConfig {
    pub fn policy(&self) -> ScalingPolicy {
        ScalingPolicy {
            scale_up: self.scale_up,
            scale_down: self.scale_down,
        }
    }
}

/// `humantime` strings such as `"2m"` or `"30s"`.
pub(crate) mod duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
