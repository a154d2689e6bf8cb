//! Spine-leaf fabric description
//!
//! Every leaf connects to every spine, so a directed leaf pair has exactly
//! one path per spine. Port numbers come from deployment configuration.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::RouteKey;

/// Static description of the fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricTopology {
    pub leaves: Vec<String>,
    pub spines: Vec<String>,
    /// Switch name -> dataplane device id (e.g. "of:000072ecfb3ccb4c").
    pub device_ids: HashMap<String, String>,
    /// (leaf, spine) -> leaf port facing that spine.
    pub uplinks: HashMap<String, u32>,
    /// (spine, leaf) -> spine port facing that leaf.
    pub downlinks: HashMap<String, u32>,
}

fn link_key(a: &str, b: &str) -> String {
    format!("{a}->{b}")
}

impl FabricTopology {
    /// The four-leaf, two-spine testbed this system was built against.
    pub fn testbed() -> Self {
        let mut device_ids = HashMap::new();
        device_ids.insert("leaf1".into(), "of:000072ecfb3ccb4c".into());
        device_ids.insert("leaf2".into(), "of:000042b1a1405d41".into());
        device_ids.insert("leaf3".into(), "of:000032095cbf1043".into());
        device_ids.insert("leaf6".into(), "of:0000ca44716bdf4b".into());
        device_ids.insert("spine1".into(), "of:0000d6dee87ca841".into());
        device_ids.insert("spine2".into(), "of:00000ac352fff34c".into());

        let mut uplinks = HashMap::new();
        for (leaf, s1, s2) in [
            ("leaf1", 1, 5),
            ("leaf2", 3, 1),
            ("leaf3", 1, 2),
            ("leaf6", 1, 2),
        ] {
            uplinks.insert(link_key(leaf, "spine1"), s1);
            uplinks.insert(link_key(leaf, "spine2"), s2);
        }

        let mut downlinks = HashMap::new();
        for (leaf, p) in [("leaf1", 1), ("leaf6", 2), ("leaf2", 3), ("leaf3", 4)] {
            downlinks.insert(link_key("spine1", leaf), p);
        }
        for (leaf, p) in [("leaf1", 1), ("leaf2", 2), ("leaf3", 3), ("leaf6", 4)] {
            downlinks.insert(link_key("spine2", leaf), p);
        }

        Self {
            leaves: vec!["leaf1".into(), "leaf2".into(), "leaf3".into(), "leaf6".into()],
            spines: vec!["spine1".into(), "spine2".into()],
            device_ids,
            uplinks,
            downlinks,
        }
    }

    /// All directed leaf pairs.
    pub fn routes(&self) -> Vec<RouteKey> {
        let mut routes = Vec::new();
        for src in &self.leaves {
            for dst in &self.leaves {
                if src != dst {
                    routes.push(RouteKey::new(src.clone(), dst.clone()));
                }
            }
        }
        routes
    }

    /// Unordered leaf pairs in canonical order (smaller leaf first).
    pub fn leaf_pairs(&self) -> Vec<RouteKey> {
        let mut pairs = Vec::new();
        for (i, a) in self.leaves.iter().enumerate() {
            for b in self.leaves.iter().skip(i + 1) {
                pairs.push(RouteKey::new(a.clone(), b.clone()));
            }
        }
        pairs
    }

    /// Canonical path name shared by both directions: `leaf1-spine1-leaf6`.
    pub fn path_name(&self, pair: &RouteKey, spine: &str) -> String {
        let canonical = pair.canonical();
        format!("{}-{}-{}", canonical.src, spine, canonical.dst)
    }

    pub fn device_id(&self, name: &str) -> Result<&str> {
        self.device_ids
            .get(name)
            .map(|s| s.as_str())
            .with_context(|| format!("unknown device {name}"))
    }

    pub fn device_name(&self, device_id: &str) -> Option<&str> {
        self.device_ids
            .iter()
            .find(|(_, id)| id.as_str() == device_id)
            .map(|(name, _)| name.as_str())
    }

    /// Leaf port facing `spine`.
    pub fn uplink(&self, leaf: &str, spine: &str) -> Result<u32> {
        self.uplinks
            .get(&link_key(leaf, spine))
            .copied()
            .with_context(|| format!("no uplink from {leaf} to {spine}"))
    }

    /// Spine port facing `leaf`.
    pub fn downlink(&self, spine: &str, leaf: &str) -> Result<u32> {
        self.downlinks
            .get(&link_key(spine, leaf))
            .copied()
            .with_context(|| format!("no downlink from {spine} to {leaf}"))
    }

    /// Number of per-spine models: one per unordered pair per spine.
    pub fn model_count(&self) -> usize {
        self.leaf_pairs().len() * self.spines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testbed_has_twelve_directed_routes_and_six_pairs() {
        let topology = FabricTopology::testbed();
        assert_eq!(topology.routes().len(), 12);
        assert_eq!(topology.leaf_pairs().len(), 6);
        assert_eq!(topology.model_count(), 12);
    }

    #[test]
    fn path_name_is_direction_independent() {
        let topology = FabricTopology::testbed();
        let forward = RouteKey::new("leaf6", "leaf1");
        let reverse = RouteKey::new("leaf1", "leaf6");
        assert_eq!(topology.path_name(&forward, "spine1"), "leaf1-spine1-leaf6");
        assert_eq!(topology.path_name(&reverse, "spine1"), "leaf1-spine1-leaf6");
    }

    #[test]
    fn uplink_and_downlink_lookups() {
        let topology = FabricTopology::testbed();
        assert_eq!(topology.uplink("leaf1", "spine2").unwrap(), 5);
        assert_eq!(topology.downlink("spine1", "leaf3").unwrap(), 4);
        assert!(topology.uplink("leaf9", "spine1").is_err());
    }

    #[test]
    fn device_mapping_round_trips() {
        let topology = FabricTopology::testbed();
        let id = topology.device_id("leaf2").unwrap().to_string();
        assert_eq!(topology.device_name(&id), Some("leaf2"));
    }
}
