//! Runtime configuration.
//!
//! Defaults can be overridden by an optional TOML file and finally by
//! CLI flags, in that order, the same
//! layering the reference client uses for its own `Config`/`SettingsForm`
//! pair (file first, UI/CLI override second).

use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_udp_port() -> u16 {
    5000
}
fn default_tcp_port() -> u16 {
    5001
}
fn default_tcp_port_range() -> u16 {
    100
}
fn default_heartbeat_interval_ms() -> u64 {
    1_000
}
fn default_discovery_grace_ms() -> u64 {
    1_500
}
fn default_host_timeout_ms() -> u64 {
    3_100
}
fn default_election_timeout_ms() -> u64 {
    3_000
}
fn default_uptime_threshold_secs() -> u64 {
    60
}
fn default_pending_ttl_secs() -> u64 {
    30
}
fn default_discovery_interval_secs() -> u64 {
    2
}
fn default_max_frame_bytes() -> u32 {
    1024 * 1024
}
fn default_pending_buffer_cap() -> usize {
    256
}
fn default_history_cap() -> usize {
    32
}

/// Tunables for every timeout and port a node cares about.
///
/// All fields have defaults so a node can start with zero configuration;
/// an operator may override any subset via a TOML file or CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// How many successive ports to try when `tcp_port` is already in use.
    #[serde(default = "default_tcp_port_range")]
    pub tcp_port_range: u16,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// How long a freshly-started node waits for discovery/connect before
    /// campaigning unopposed, so it doesn't self-elect ahead of peers that
    /// just haven't finished connecting yet.
    #[serde(default = "default_discovery_grace_ms")]
    pub discovery_grace_ms: u64,
    /// Defaults to the snappier end of the documented 3.1-6.0s range.
    #[serde(default = "default_host_timeout_ms")]
    pub host_timeout_ms: u64,
    #[serde(default = "default_election_timeout_ms")]
    pub election_timeout_ms: u64,
    #[serde(default = "default_uptime_threshold_secs")]
    pub uptime_threshold_secs: u64,
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u32,
    #[serde(default = "default_pending_buffer_cap")]
    pub pending_buffer_cap: usize,
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            udp_port: default_udp_port(),
            tcp_port: default_tcp_port(),
            tcp_port_range: default_tcp_port_range(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            discovery_grace_ms: default_discovery_grace_ms(),
            host_timeout_ms: default_host_timeout_ms(),
            election_timeout_ms: default_election_timeout_ms(),
            uptime_threshold_secs: default_uptime_threshold_secs(),
            pending_ttl_secs: default_pending_ttl_secs(),
            discovery_interval_secs: default_discovery_interval_secs(),
            max_frame_bytes: default_max_frame_bytes(),
            pending_buffer_cap: default_pending_buffer_cap(),
            history_cap: default_history_cap(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults for any field the
    /// file omits. Missing file is not an error — it just means "use
    /// defaults", matching the reference client's tolerant config loading.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&text)?;
        Ok(cfg)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.heartbeat_interval_ms)
    }
    pub fn discovery_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.discovery_grace_ms)
    }
    pub fn host_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.host_timeout_ms)
    }
    pub fn election_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.election_timeout_ms)
    }
    pub fn uptime_threshold(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.uptime_threshold_secs)
    }
    pub fn pending_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pending_ttl_secs)
    }
    pub fn discovery_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.discovery_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.udp_port, 5000);
        assert_eq!(cfg.tcp_port, 5001);
        assert_eq!(cfg.discovery_grace_ms, 1_500);
        assert_eq!(cfg.host_timeout_ms, 3_100);
        assert_eq!(cfg.election_timeout_ms, 3_000);
        assert_eq!(cfg.uptime_threshold_secs, 60);
        assert_eq!(cfg.pending_ttl_secs, 30);
        assert_eq!(cfg.discovery_interval_secs, 2);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load_from_file(Path::new("/nonexistent/lantrack.toml")).unwrap();
        assert_eq!(cfg.udp_port, default_udp_port());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: Config = toml::from_str("tcp_port = 7001\n").unwrap();
        assert_eq!(cfg.tcp_port, 7001);
        assert_eq!(cfg.udp_port, default_udp_port());
    }
}
