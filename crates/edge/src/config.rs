//! Edge controller configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Edge configuration, loaded from `edge.toml` (if present) with `EDGE_*`
/// environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfig {
    /// Public IP the NAT rewrites.
    #[serde(default = "default_public_ip")]
    pub public_ip: String,

    /// Interface carrying the public traffic.
    #[serde(default = "default_public_interface")]
    pub public_interface: String,

    /// Forwarded service port.
    #[serde(default = "default_service_port")]
    pub service_port: u16,

    /// Status replica shipped by the central controller.
    #[serde(default = "default_status_path")]
    pub status_path: PathBuf,

    /// Metrics time-series database endpoint.
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    /// Selection cadence in seconds.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Replica older than this many seconds must not drive selection.
    #[serde(default = "default_staleness_cap_secs")]
    pub staleness_cap_secs: u64,

    /// Journal file for edge-side alerts.
    #[serde(default = "default_alerts_path")]
    pub alerts_path: PathBuf,
}

fn default_public_ip() -> String {
    "203.80.21.39".to_string()
}

fn default_public_interface() -> String {
    "eno3".to_string()
}

fn default_service_port() -> u16 {
    80
}

fn default_status_path() -> PathBuf {
    PathBuf::from("active_servers_status.json")
}

fn default_prometheus_url() -> String {
    "http://192.168.126.2:9090".to_string()
}

fn default_tick_secs() -> u64 {
    10
}

fn default_staleness_cap_secs() -> u64 {
    120
}

fn default_alerts_path() -> PathBuf {
    PathBuf::from("edge_alerts.json")
}

impl EdgeConfig {
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("edge").required(false))
            .add_source(config::Environment::with_prefix("EDGE"))
            .build()
            .context("failed to assemble configuration")?;
        config.try_deserialize().context("configuration is invalid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize() {
        let config: EdgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.service_port, 80);
        assert_eq!(config.tick_secs, 10);
        assert_eq!(config.staleness_cap_secs, 120);
    }
}
