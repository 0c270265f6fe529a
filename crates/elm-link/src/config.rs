//! Link and setup settings.

use std::time::Duration;

use serde::Deserialize;

use elm_protocol::Protocol;

/// How to bring an adapter up and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkConfig {
    /// Protocol to select: `"auto"` or an ELM327 number `"1"`–`"C"`.
    #[serde(default)]
    pub protocol: Protocol,
    /// Per-step timeout during setup. `ATZ` and the first probe can take
    /// several seconds while the adapter searches.
    #[serde(default = "default_setup_timeout_ms")]
    pub setup_timeout_ms: u64,
    /// Timeout for ordinary OBD requests.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Attempts per setup step before giving up.
    #[serde(default = "default_step_attempts")]
    pub step_attempts: u32,
    /// Show CAN/legacy headers (`ATH1`), needed to tell ECUs apart.
    #[serde(default = "default_true")]
    pub headers: bool,
    /// Request used to check that a protocol actually reaches the vehicle.
    #[serde(default = "default_probe_command")]
    pub probe_command: String,
    /// Let the adapter adapt its response timing (`ATAT1`).
    #[serde(default = "default_true")]
    pub adaptive_timing: bool,
}

fn default_setup_timeout_ms() -> u64 {
    4000
}

fn default_command_timeout_ms() -> u64 {
    2000
}

fn default_step_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_probe_command() -> String {
    "0100".to_string()
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Auto,
            setup_timeout_ms: default_setup_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            step_attempts: default_step_attempts(),
            headers: true,
            probe_command: default_probe_command(),
            adaptive_timing: true,
        }
    }
}

impl LinkConfig {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// `step_attempts`, never less than one.
    pub fn attempts(&self) -> u32 {
        self.step_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_uses_defaults() {
        let config: LinkConfig = toml::from_str("").unwrap();
        assert_eq!(config, LinkConfig::default());
        assert_eq!(config.setup_timeout(), Duration::from_secs(4));
        assert_eq!(config.command_timeout(), Duration::from_secs(2));
        assert!(config.headers);
    }

    #[test]
    fn explicit_protocol_and_timeouts() {
        let toml = r#"
protocol = "6"
command_timeout_ms = 500
step_attempts = 0
headers = false
"#;
        let config: LinkConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.protocol, Protocol::Iso15765_4Can11bit500);
        assert_eq!(config.command_timeout_ms, 500);
        assert_eq!(config.attempts(), 1);
        assert!(!config.headers);
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        assert!(toml::from_str::<LinkConfig>(r#"protocol = "Z""#).is_err());
    }
}
