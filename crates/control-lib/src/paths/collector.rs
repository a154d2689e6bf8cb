//! Per-path bandwidth windows
//!
//! Turns two consecutive port-statistics snapshots into per-path byte counts.
//! A directed path's bytes are the maximum of what the source leaf sent up
//! to the spine and what the destination leaf received down from it; the two
//! directions of a leaf pair are then summed into the canonical path figure.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::FabricTopology;
use crate::telemetry::{delta_usage, PortStatsSource, PortUsage, StatsSnapshot};

/// One completed collection window.
#[derive(Debug, Clone)]
pub struct PathWindow {
    /// Start of the minute the window covers.
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Canonical path name ("leaf1-spine1-leaf6") -> bytes.
    pub path_bytes: HashMap<String, u64>,
    /// Total bytes moved across all measured ports.
    pub total_bytes: u64,
    /// Devices present in both snapshots.
    pub devices: usize,
}

/// Collects cumulative snapshots and produces windows.
pub struct PathCollector {
    topology: FabricTopology,
    source: Arc<dyn PortStatsSource>,
    previous: Option<StatsSnapshot>,
}

impl PathCollector {
    pub fn new(topology: FabricTopology, source: Arc<dyn PortStatsSource>) -> Self {
        Self { topology, source, previous: None }
    }

    /// Take a snapshot and, when a previous one exists, emit the window
    /// between them. The first call only primes the collector.
    pub async fn collect(&mut self) -> Result<Option<PathWindow>> {
        let snapshot = self.source.snapshot().await?;

        let Some(previous) = self.previous.take() else {
            debug!("Primed path collector with initial snapshot");
            self.previous = Some(snapshot);
            return Ok(None);
        };

        let usage = delta_usage(&previous, &snapshot);
        let window = self.window_from_usage(&usage, previous.taken_at, snapshot.taken_at);
        self.previous = Some(snapshot);
        Ok(Some(window))
    }

    fn window_from_usage(
        &self,
        usage: &HashMap<String, HashMap<u32, PortUsage>>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> PathWindow {
        let mut path_bytes: HashMap<String, u64> = HashMap::new();

        for pair in self.topology.leaf_pairs() {
            for spine in &self.topology.spines {
                let name = self.topology.path_name(&pair, spine);
                let forward = self.directed_bytes(usage, &pair.src, spine, &pair.dst);
                let reverse = self.directed_bytes(usage, &pair.dst, spine, &pair.src);
                path_bytes.insert(name, forward + reverse);
            }
        }

        let total_bytes = usage
            .values()
            .flat_map(|ports| ports.values())
            .map(|u| u.tx_bytes + u.rx_bytes)
            .sum();

        if total_bytes == 0 {
            warn!("No traffic observed in this window; all path costs are zero");
        }

        PathWindow {
            window_start,
            window_end,
            path_bytes,
            total_bytes,
            devices: usage.len(),
        }
    }

    /// Bytes for the directed path `src -> spine -> dst`: the larger of the
    /// source leaf's uplink tx and the destination leaf's downlink rx.
    fn directed_bytes(
        &self,
        usage: &HashMap<String, HashMap<u32, PortUsage>>,
        src: &str,
        spine: &str,
        dst: &str,
    ) -> u64 {
        let uplink_tx = self
            .port_usage(usage, src, self.topology.uplink(src, spine).ok())
            .map(|u| u.tx_bytes)
            .unwrap_or(0);
        let downlink_rx = self
            .port_usage(usage, dst, self.topology.uplink(dst, spine).ok())
            .map(|u| u.rx_bytes)
            .unwrap_or(0);
        uplink_tx.max(downlink_rx)
    }

    fn port_usage(
        &self,
        usage: &HashMap<String, HashMap<u32, PortUsage>>,
        device_name: &str,
        port: Option<u32>,
    ) -> Option<PortUsage> {
        let port = port?;
        let device_id = self.topology.device_id(device_name).ok()?;
        usage.get(device_id)?.get(&port).copied()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{async_trait, PortCounters};
    use std::sync::Mutex;

    struct ScriptedSource {
        snapshots: Mutex<Vec<StatsSnapshot>>,
    }

    #[async_trait]
    impl PortStatsSource for ScriptedSource {
        async fn snapshot(&self) -> Result<StatsSnapshot> {
            let mut snapshots = self.snapshots.lock().unwrap();
            if snapshots.is_empty() {
                anyhow::bail!("no more snapshots");
            }
            Ok(snapshots.remove(0))
        }
    }

    fn snapshot(counters: &[(&str, u32, u64, u64)]) -> StatsSnapshot {
        let mut devices: HashMap<String, HashMap<u32, PortCounters>> = HashMap::new();
        for (device, port, tx, rx) in counters {
            devices.entry(device.to_string()).or_default().insert(
                *port,
                PortCounters { bytes_sent: *tx, bytes_received: *rx },
            );
        }
        StatsSnapshot { taken_at: Utc::now(), devices }
    }

    fn zeros() -> Vec<(&'static str, u32, u64, u64)> {
        // Every leaf uplink and spine downlink the testbed topology uses.
        vec![
            ("of:000072ecfb3ccb4c", 1, 0, 0),
            ("of:000072ecfb3ccb4c", 5, 0, 0),
            ("of:000042b1a1405d41", 1, 0, 0),
            ("of:000042b1a1405d41", 3, 0, 0),
            ("of:000032095cbf1043", 1, 0, 0),
            ("of:000032095cbf1043", 2, 0, 0),
            ("of:0000ca44716bdf4b", 1, 0, 0),
            ("of:0000ca44716bdf4b", 2, 0, 0),
            ("of:0000d6dee87ca841", 1, 0, 0),
            ("of:0000d6dee87ca841", 2, 0, 0),
            ("of:0000d6dee87ca841", 3, 0, 0),
            ("of:0000d6dee87ca841", 4, 0, 0),
            ("of:00000ac352fff34c", 1, 0, 0),
            ("of:00000ac352fff34c", 2, 0, 0),
            ("of:00000ac352fff34c", 3, 0, 0),
            ("of:00000ac352fff34c", 4, 0, 0),
        ]
    }

    #[tokio::test]
    async fn first_collect_only_primes() {
        let source = ScriptedSource {
            snapshots: Mutex::new(vec![snapshot(&zeros())]),
        };
        let mut collector = PathCollector::new(FabricTopology::testbed(), Arc::new(source));

        let window = collector.collect().await.unwrap();
        assert!(window.is_none());
    }

    #[tokio::test]
    async fn window_uses_max_of_uplink_tx_and_downlink_rx() {
        // leaf1's uplink to spine1 is its port 1; leaf6 receives from spine1
        // on its port 1. Send 1000 bytes up while only 400 arrive below.
        let mut second = zeros();
        for entry in second.iter_mut() {
            if entry.0 == "of:000072ecfb3ccb4c" && entry.1 == 1 {
                entry.2 = 1000; // leaf1 port1 tx
            }
            if entry.0 == "of:0000ca44716bdf4b" && entry.1 == 1 {
                entry.3 = 400; // leaf6 port1 rx
            }
        }

        let source = ScriptedSource {
            snapshots: Mutex::new(vec![snapshot(&zeros()), snapshot(&second)]),
        };
        let mut collector = PathCollector::new(FabricTopology::testbed(), Arc::new(source));

        collector.collect().await.unwrap();
        let window = collector.collect().await.unwrap().unwrap();

        // leaf1->leaf6 via spine1: max(1000, 400) = 1000; reverse adds 0.
        assert_eq!(window.path_bytes["leaf1-spine1-leaf6"], 1000);
        assert_eq!(window.path_bytes["leaf1-spine2-leaf6"], 0);
    }

    #[tokio::test]
    async fn counter_reset_window_reads_zero() {
        let mut first = zeros();
        for entry in first.iter_mut() {
            if entry.0 == "of:000072ecfb3ccb4c" && entry.1 == 1 {
                entry.2 = 50_000;
            }
        }
        // Counters went backwards (port reset).
        let source = ScriptedSource {
            snapshots: Mutex::new(vec![snapshot(&first), snapshot(&zeros())]),
        };
        let mut collector = PathCollector::new(FabricTopology::testbed(), Arc::new(source));

        collector.collect().await.unwrap();
        let window = collector.collect().await.unwrap().unwrap();
        assert_eq!(window.path_bytes["leaf1-spine1-leaf6"], 0);
        assert_eq!(window.path_bytes["leaf1-spine1-leaf2"], 0);
    }

    #[tokio::test]
    async fn every_model_path_appears() {
        let source = ScriptedSource {
            snapshots: Mutex::new(vec![snapshot(&zeros()), snapshot(&zeros())]),
        };
        let mut collector = PathCollector::new(FabricTopology::testbed(), Arc::new(source));

        collector.collect().await.unwrap();
        let window = collector.collect().await.unwrap().unwrap();
        assert_eq!(window.path_bytes.len(), 12);
    }
}
