//! Fabric telemetry from the SDN controller
//!
//! Polls the controller's port-statistics REST endpoint and turns pairs of
//! cumulative snapshots into per-port byte deltas. A counter that went
//! backwards (port reset) yields zero for the window.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

/// Cumulative counters for one switch port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortCounters {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Bytes moved through one port during a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortUsage {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// One cumulative snapshot: device id -> port number -> counters.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub devices: HashMap<String, HashMap<u32, PortCounters>>,
}

/// Source of cumulative port statistics.
#[async_trait]
pub trait PortStatsSource: Send + Sync {
    async fn snapshot(&self) -> Result<StatsSnapshot>;
}

/// Compute per-port usage between two snapshots.
///
/// Ports or devices missing from either snapshot are omitted. A decreasing
/// counter is treated as a reset and reported as zero with a warning.
pub fn delta_usage(
    prev: &StatsSnapshot,
    next: &StatsSnapshot,
) -> HashMap<String, HashMap<u32, PortUsage>> {
    let mut usage = HashMap::new();

    for (device, next_ports) in &next.devices {
        let Some(prev_ports) = prev.devices.get(device) else { continue };
        let mut device_usage = HashMap::new();

        for (port, next_counters) in next_ports {
            let Some(prev_counters) = prev_ports.get(port) else { continue };

            let tx = counter_delta(prev_counters.bytes_sent, next_counters.bytes_sent, device, *port, "tx");
            let rx = counter_delta(prev_counters.bytes_received, next_counters.bytes_received, device, *port, "rx");

            device_usage.insert(*port, PortUsage { tx_bytes: tx, rx_bytes: rx });
        }
        usage.insert(device.clone(), device_usage);
    }
    usage
}

fn counter_delta(prev: u64, next: u64, device: &str, port: u32, direction: &str) -> u64 {
    if next < prev {
        warn!(device, port, direction, prev, next, "Counter regression, zeroing window");
        return 0;
    }
    next - prev
}

#[derive(Debug, Deserialize)]
struct OnosStatsResponse {
    statistics: Vec<OnosDeviceStats>,
}

#[derive(Debug, Deserialize)]
struct OnosDeviceStats {
    device: String,
    ports: Vec<OnosPort>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnosPort {
    port: u32,
    #[serde(default)]
    bytes_sent: u64,
    #[serde(default)]
    bytes_received: u64,
}

/// Configuration for the ONOS-style port statistics client.
#[derive(Debug, Clone)]
pub struct OnosConfig {
    /// Base URL, e.g. "http://192.168.126.1:8181".
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl Default for OnosConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8181".to_string(),
            username: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// REST client for the SDN controller's port statistics.
pub struct OnosPortStats {
    config: OnosConfig,
    client: reqwest::Client,
}

impl OnosPortStats {
    pub fn new(config: OnosConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build SDN controller client")?;
        Ok(Self { config, client })
    }

    fn parse(body: &str, taken_at: DateTime<Utc>) -> Result<StatsSnapshot> {
        let response: OnosStatsResponse =
            serde_json::from_str(body).context("port statistics response is not valid JSON")?;

        let mut devices = HashMap::new();
        for device_stats in response.statistics {
            let ports = device_stats
                .ports
                .into_iter()
                .map(|p| {
                    (
                        p.port,
                        PortCounters { bytes_sent: p.bytes_sent, bytes_received: p.bytes_received },
                    )
                })
                .collect();
            devices.insert(device_stats.device, ports);
        }
        Ok(StatsSnapshot { taken_at, devices })
    }
}

#[async_trait]
impl PortStatsSource for OnosPortStats {
    async fn snapshot(&self) -> Result<StatsSnapshot> {
        let url = format!("{}/onos/v1/statistics/ports", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .context("port statistics request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("port statistics returned status {}", response.status());
        }

        let body = response.text().await.context("failed to read port statistics body")?;
        let snapshot = Self::parse(&body, Utc::now())?;
        debug!(devices = snapshot.devices.len(), "Captured port statistics snapshot");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, u32, u64, u64)]) -> StatsSnapshot {
        let mut devices: HashMap<String, HashMap<u32, PortCounters>> = HashMap::new();
        for (device, port, tx, rx) in entries {
            devices.entry(device.to_string()).or_default().insert(
                *port,
                PortCounters { bytes_sent: *tx, bytes_received: *rx },
            );
        }
        StatsSnapshot { taken_at: Utc::now(), devices }
    }

    #[test]
    fn delta_subtracts_counters() {
        let prev = snapshot(&[("leaf1", 1, 1000, 2000)]);
        let next = snapshot(&[("leaf1", 1, 1500, 2600)]);

        let usage = delta_usage(&prev, &next);
        let port = usage["leaf1"][&1];
        assert_eq!(port.tx_bytes, 500);
        assert_eq!(port.rx_bytes, 600);
    }

    #[test]
    fn regression_yields_zero() {
        let prev = snapshot(&[("leaf1", 1, 9000, 100)]);
        let next = snapshot(&[("leaf1", 1, 50, 300)]);

        let usage = delta_usage(&prev, &next);
        let port = usage["leaf1"][&1];
        assert_eq!(port.tx_bytes, 0);
        assert_eq!(port.rx_bytes, 200);
    }

    #[test]
    fn missing_port_is_omitted() {
        let prev = snapshot(&[("leaf1", 1, 0, 0)]);
        let next = snapshot(&[("leaf1", 1, 10, 10), ("leaf1", 2, 99, 99)]);

        let usage = delta_usage(&prev, &next);
        assert!(usage["leaf1"].contains_key(&1));
        assert!(!usage["leaf1"].contains_key(&2));
    }

    #[test]
    fn onos_response_parses() {
        let body = r#"{
            "statistics": [
                {
                    "device": "of:000072ecfb3ccb4c",
                    "ports": [
                        {"port": 1, "bytesSent": 123, "bytesReceived": 456, "packetsSent": 1, "packetsReceived": 2}
                    ]
                }
            ]
        }"#;
        let snapshot = OnosPortStats::parse(body, Utc::now()).unwrap();
        let counters = snapshot.devices["of:000072ecfb3ccb4c"][&1];
        assert_eq!(counters.bytes_sent, 123);
        assert_eq!(counters.bytes_received, 456);
    }
}
