//! Central controller configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use control_lib::models::Backend;
use serde::Deserialize;

/// Controller configuration, loaded from `controller.toml` (if present) with
/// `CONTROLLER_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// HTTP API port.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory for persisted state and output documents.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Metrics time-series database endpoint.
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    /// SDN controller REST endpoint.
    #[serde(default = "default_onos_url")]
    pub onos_url: String,
    #[serde(default)]
    pub onos_username: String,
    #[serde(default)]
    pub onos_password: String,

    /// libvirt connection URI for power actuation.
    #[serde(default = "default_hypervisor_uri")]
    pub hypervisor_uri: String,

    /// "user@host" of the edge box; unset ships to a local path instead.
    #[serde(default)]
    pub edge_destination: Option<String>,
    /// Status replica path on the edge box (or local fallback path).
    #[serde(default = "default_edge_status_path")]
    pub edge_status_path: String,

    /// "user@host" of the SDN controller box; unset ships locally.
    #[serde(default)]
    pub sdn_destination: Option<String>,
    /// Weight document path on the SDN controller host.
    #[serde(default = "default_sdn_weights_path")]
    pub sdn_weights_path: String,

    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_stabilization_secs")]
    pub stabilization_secs: u64,
    #[serde(default = "default_drain_secs")]
    pub drain_secs: u64,

    /// Lower endpoints of the tier-2 and tier-3 forecast intervals.
    #[serde(default = "default_tier2_from")]
    pub tier2_from: f64,
    #[serde(default = "default_tier3_from")]
    pub tier3_from: f64,

    /// Path weight mode: "realtime", "prediction" or "hybrid".
    #[serde(default = "default_balancing_mode")]
    pub balancing_mode: String,
    #[serde(default = "default_hybrid_weight")]
    pub hybrid_weight: f64,

    /// Synthetic probe target.
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// ONNX artifact for the traffic forecaster; absent means the
    /// seasonal-naive fallback.
    #[serde(default)]
    pub forecast_model_path: Option<PathBuf>,

    /// Directory of per-path ONNX artifacts named `<path>.onnx` (e.g.
    /// `leaf1-spine1-leaf6.onnx`); missing models fall back per path.
    #[serde(default)]
    pub path_model_dir: Option<PathBuf>,

    /// External trainer invocation for model retraining.
    #[serde(default)]
    pub trainer_command: Option<Vec<String>>,

    /// The static backend pool, one per tier.
    #[serde(default = "default_backends")]
    pub backends: Vec<Backend>,
}

fn default_api_port() -> u16 {
    5000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_prometheus_url() -> String {
    "http://192.168.126.2:9090".to_string()
}

fn default_onos_url() -> String {
    "http://192.168.126.1:8181".to_string()
}

fn default_hypervisor_uri() -> String {
    "qemu:///system".to_string()
}

fn default_edge_status_path() -> String {
    "active_servers_status.json".to_string()
}

fn default_sdn_weights_path() -> String {
    "onos_path_selection.json".to_string()
}

fn default_tick_secs() -> u64 {
    5
}

fn default_stabilization_secs() -> u64 {
    80
}

fn default_drain_secs() -> u64 {
    30
}

fn default_tier2_from() -> f64 {
    140_000.0
}

fn default_tier3_from() -> f64 {
    420_000.0
}

fn default_balancing_mode() -> String {
    "prediction".to_string()
}

fn default_hybrid_weight() -> f64 {
    0.3
}

fn default_probe_port() -> u16 {
    80
}

fn default_probe_path() -> String {
    "/index.html".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    3
}

fn default_backends() -> Vec<Backend> {
    vec![
        Backend {
            id: "ubuntu-guest".to_string(),
            address: "192.168.6.2".to_string(),
            tier: 1,
            capacity_cores: 1,
            capacity_memory_bytes: 1 << 30,
        },
        Backend {
            id: "apache-vm-1".to_string(),
            address: "192.168.6.3".to_string(),
            tier: 2,
            capacity_cores: 2,
            capacity_memory_bytes: 2 << 30,
        },
        Backend {
            id: "apache-vm-2".to_string(),
            address: "192.168.6.4".to_string(),
            tier: 3,
            capacity_cores: 4,
            capacity_memory_bytes: 4 << 30,
        },
    ]
}

impl ControllerConfig {
    /// Load configuration; a malformed file or environment is fatal.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("controller").required(false))
            .add_source(config::Environment::with_prefix("CONTROLLER"))
            .build()
            .context("failed to assemble configuration")?;

        let config: ControllerConfig = config
            .try_deserialize()
            .context("configuration is invalid")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            anyhow::bail!("at least one backend must be configured");
        }
        let mut tiers: Vec<u8> = self.backends.iter().map(|b| b.tier).collect();
        tiers.sort_unstable();
        tiers.dedup();
        if tiers.len() != self.backends.len() {
            anyhow::bail!("backend tiers must be unique");
        }
        if !(self.tier2_from > 0.0 && self.tier3_from > self.tier2_from) {
            anyhow::bail!("tier boundaries must satisfy 0 < tier2_from < tier3_from");
        }
        match self.balancing_mode.as_str() {
            "realtime" | "prediction" | "hybrid" => Ok(()),
            other => anyhow::bail!("unknown balancing mode {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ControllerConfig {
        serde_json::from_str("{}").unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let config = defaults();
        config.validate().unwrap();
        assert_eq!(config.api_port, 5000);
        assert_eq!(config.backends.len(), 3);
        assert_eq!(config.backends[0].tier, 1);
    }

    #[test]
    fn duplicate_tiers_rejected() {
        let mut config = defaults();
        config.backends[1].tier = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_mode_rejected() {
        let mut config = defaults();
        config.balancing_mode = "psychic".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_tier_boundaries_rejected() {
        let mut config = defaults();
        config.tier2_from = 500_000.0;
        assert!(config.validate().is_err());
    }
}
