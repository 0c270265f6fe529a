//! Agent configuration, loadable from TOML.

use serde::Deserialize;

use elm_link::LinkConfig;

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Where the adapter is.
    pub adapter: AdapterConfig,
    /// Setup and timeout settings.
    #[serde(default)]
    pub link: LinkConfig,
    /// Live-data polling.
    #[serde(default)]
    pub poll: PollConfig,
}

/// How to reach the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterConfig {
    /// Wi-Fi dongle, e.g. `192.168.0.10:35000`.
    Tcp { address: String },
    /// Built-in simulated vehicle, no hardware needed.
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Request strings, e.g. `"010C"`.
    #[serde(default = "default_commands")]
    pub commands: Vec<String>,
    /// Read the VIN once after setup.
    #[serde(default = "default_read_vin")]
    pub read_vin: bool,
    /// Stop after this many cycles. None polls until interrupted.
    #[serde(default)]
    pub max_cycles: Option<u64>,
}

fn default_interval_ms() -> u64 {
    250
}

fn default_commands() -> Vec<String> {
    ["010C", "010D", "0105", "0104", "0111", "010F"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_read_vin() -> bool {
    true
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            commands: default_commands(),
            read_vin: default_read_vin(),
            max_cycles: None,
        }
    }
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }
}
