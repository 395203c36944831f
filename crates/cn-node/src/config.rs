//! Node configuration, loadable from TOML.

use std::collections::HashMap;

use cn_runner::RunnerConfig;
use serde::Deserialize;

/// Top-level configuration for one CAN node.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Node name as declared in the database (`BU_`).
    pub node: String,
    /// JSON database produced by the DBC parser.
    pub database_path: String,
    /// CAN interface name (e.g., "can0", "vcan0").
    #[serde(default = "default_can_interface")]
    pub can_interface: String,
    /// Health log interval in seconds.
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Per-message period overrides in milliseconds, keyed by message name.
    #[serde(default)]
    pub periods: HashMap<String, u64>,
    /// Initial physical values, keyed by message name then signal name.
    #[serde(default)]
    pub signals: HashMap<String, HashMap<String, f64>>,
}

fn default_can_interface() -> String {
    "can0".to_string()
}

fn default_status_interval() -> u64 {
    30
}

impl NodeConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the binary cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.status_interval_secs == 0 {
            anyhow::bail!("status_interval_secs must be at least 1");
        }
        if let Some((name, _)) = self.periods.iter().find(|(_, ms)| **ms == 0) {
            anyhow::bail!("period for message {name} must be at least 1 ms");
        }
        Ok(())
    }
}
