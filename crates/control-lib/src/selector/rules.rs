//! Forwarding decisions and flow-rule installation
//!
//! For the first packet of an unknown inter-leaf flow: pick a spine, then
//! install six rules — forward on source leaf, spine and destination leaf,
//! plus the three reverse rules on the same spine. Same-leaf flows get a
//! single rule to the host port. Multicast, broadcast and unknown hosts are
//! dropped; ARP is left to an external ProxyARP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use super::{FlowKey, FlowTable, Protocol, SwrrTable, FLOW_IDLE_TIMEOUT};
use crate::models::RouteKey;
use crate::paths::{FabricTopology, PathSelectionDocument};

/// Priority for installed flow rules.
pub const FLOW_PRIORITY: u16 = 40_000;

/// Where a host attaches to the fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLocation {
    pub leaf: String,
    pub port: u32,
}

/// First packet of a flow as seen by the selector.
#[derive(Debug, Clone)]
pub struct PacketContext {
    pub key: FlowKey,
    pub src_host: Option<HostLocation>,
    pub dst_host: Option<HostLocation>,
    /// Destination MAC was multicast or broadcast.
    pub multicast: bool,
}

/// One match-and-output rule for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRule {
    pub device: String,
    pub selector: FlowKey,
    pub out_port: u32,
    pub priority: u16,
    pub idle_timeout_secs: u32,
}

/// The selector's verdict for a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forwarding {
    /// Dropped: multicast/broadcast or unknown host; no flooding.
    Drop,
    /// Same-leaf delivery through one rule.
    SameLeaf { rules: Vec<FlowRule> },
    /// Inter-leaf delivery across the chosen spine, six rules.
    InterLeaf { spine_index: usize, rules: Vec<FlowRule> },
}

/// Sink that applies rules to the dataplane.
#[async_trait]
pub trait RuleSink: Send + Sync {
    async fn install(&self, rules: &[FlowRule]) -> Result<()>;
}

/// Installs rules through the SDN controller's flow REST API.
pub struct OnosFlowSink {
    base_url: String,
    username: String,
    password: String,
    topology: FabricTopology,
    client: reqwest::Client,
}

impl OnosFlowSink {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        topology: FabricTopology,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build flow API client")?;
        Ok(Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            topology,
            client,
        })
    }

    fn rule_body(&self, rule: &FlowRule, device_id: &str) -> serde_json::Value {
        let key = &rule.selector;
        let mut criteria = vec![
            json!({"type": "ETH_TYPE", "ethType": "0x0800"}),
            json!({"type": "IPV4_SRC", "ip": format!("{}/32", key.src_ip)}),
            json!({"type": "IPV4_DST", "ip": format!("{}/32", key.dst_ip)}),
            json!({"type": "IP_PROTO", "protocol": key.protocol.number()}),
        ];
        match key.protocol {
            Protocol::Tcp => {
                criteria.push(json!({"type": "TCP_SRC", "tcpPort": key.src_port}));
                criteria.push(json!({"type": "TCP_DST", "tcpPort": key.dst_port}));
            }
            Protocol::Udp => {
                criteria.push(json!({"type": "UDP_SRC", "udpPort": key.src_port}));
                criteria.push(json!({"type": "UDP_DST", "udpPort": key.dst_port}));
            }
            Protocol::Icmp => {
                criteria.push(json!({"type": "ICMPV4_TYPE", "icmpType": key.src_port}));
                criteria.push(json!({"type": "ICMPV4_CODE", "icmpCode": key.dst_port}));
            }
        }

        json!({
            "priority": rule.priority,
            "timeout": rule.idle_timeout_secs,
            "isPermanent": false,
            "deviceId": device_id,
            "treatment": {"instructions": [{"type": "OUTPUT", "port": rule.out_port.to_string()}]},
            "selector": {"criteria": criteria},
        })
    }
}

#[async_trait]
impl RuleSink for OnosFlowSink {
    async fn install(&self, rules: &[FlowRule]) -> Result<()> {
        for rule in rules {
            let device_id = self.topology.device_id(&rule.device)?;
            let url = format!("{}/onos/v1/flows/{}", self.base_url, device_id);
            let body = self.rule_body(rule, device_id);

            let response = self
                .client
                .post(&url)
                .basic_auth(&self.username, Some(&self.password))
                .json(&body)
                .send()
                .await
                .with_context(|| format!("flow install on {} failed", rule.device))?;
            if !response.status().is_success() {
                anyhow::bail!(
                    "flow install on {} returned status {}",
                    rule.device,
                    response.status()
                );
            }
            debug!(device = %rule.device, port = rule.out_port, "Flow rule installed");
        }
        Ok(())
    }
}

/// Decides forwarding for first packets and programs the dataplane.
pub struct PathProgrammer {
    topology: FabricTopology,
    swrr: SwrrTable,
    flows: FlowTable,
    sink: Arc<dyn RuleSink>,
}

impl PathProgrammer {
    pub fn new(topology: FabricTopology, sink: Arc<dyn RuleSink>) -> Self {
        Self {
            topology,
            swrr: SwrrTable::new(),
            flows: FlowTable::new(FLOW_IDLE_TIMEOUT),
            sink,
        }
    }

    /// Apply a freshly loaded weight document: ratios replace the old ones
    /// and the SWRR accumulators reset. Cached flows keep their spine.
    pub fn apply_weights(&self, document: &PathSelectionDocument) {
        for (route, entry) in &document.path_selection_weights {
            let r0 = entry
                .path_details
                .get("path_0")
                .map(|d| d.selection_ratio)
                .unwrap_or(0.5);
            let r1 = entry
                .path_details
                .get("path_1")
                .map(|d| d.selection_ratio)
                .unwrap_or(0.5);
            self.swrr.set_ratios(route, [r0, r1]);
        }
        debug!(
            routes = document.path_selection_weights.len(),
            iteration = document.metadata.iteration,
            "Applied path-selection weights"
        );
    }

    /// Decide the fate of a first packet. Pure with respect to the dataplane;
    /// `program` performs the installation.
    pub fn decide(&self, packet: &PacketContext) -> Forwarding {
        if packet.multicast {
            return Forwarding::Drop;
        }
        let (Some(src), Some(dst)) = (&packet.src_host, &packet.dst_host) else {
            // Unknown host: no flooding, host discovery will learn it.
            return Forwarding::Drop;
        };

        if src.leaf == dst.leaf {
            return Forwarding::SameLeaf {
                rules: vec![FlowRule {
                    device: dst.leaf.clone(),
                    selector: packet.key,
                    out_port: dst.port,
                    priority: FLOW_PRIORITY,
                    idle_timeout_secs: FLOW_IDLE_TIMEOUT.as_secs() as u32,
                }],
            };
        }

        let route = RouteKey::new(src.leaf.clone(), dst.leaf.clone());
        let route_label = route.label();
        let spine_index = self
            .flows
            .spine_for(packet.key, || self.swrr.select(&route_label));

        match self.build_bidirectional(packet.key, src, dst, spine_index) {
            Ok(rules) => Forwarding::InterLeaf { spine_index, rules },
            Err(e) => {
                warn!(error = %e, "Port mapping missing, dropping flow");
                Forwarding::Drop
            }
        }
    }

    /// Decide and install in one step.
    pub async fn process(&self, packet: &PacketContext) -> Result<Forwarding> {
        let forwarding = self.decide(packet);
        match &forwarding {
            Forwarding::Drop => {}
            Forwarding::SameLeaf { rules } | Forwarding::InterLeaf { rules, .. } => {
                self.sink.install(rules).await?;
            }
        }
        Ok(forwarding)
    }

    /// Six symmetric rules across source leaf, spine and destination leaf.
    fn build_bidirectional(
        &self,
        key: FlowKey,
        src: &HostLocation,
        dst: &HostLocation,
        spine_index: usize,
    ) -> Result<Vec<FlowRule>> {
        let spine = self
            .topology
            .spines
            .get(spine_index)
            .context("spine index out of range")?
            .clone();

        let timeout = FLOW_IDLE_TIMEOUT.as_secs() as u32;
        let rule = |device: &str, selector: FlowKey, out_port: u32| FlowRule {
            device: device.to_string(),
            selector,
            out_port,
            priority: FLOW_PRIORITY,
            idle_timeout_secs: timeout,
        };

        let reverse = key.reversed();
        Ok(vec![
            // Forward: src leaf -> spine -> dst leaf -> host.
            rule(&src.leaf, key, self.topology.uplink(&src.leaf, &spine)?),
            rule(&spine, key, self.topology.downlink(&spine, &dst.leaf)?),
            rule(&dst.leaf, key, dst.port),
            // Reverse on the same spine.
            rule(&dst.leaf, reverse, self.topology.uplink(&dst.leaf, &spine)?),
            rule(&spine, reverse, self.topology.downlink(&spine, &src.leaf)?),
            rule(&src.leaf, reverse, src.port),
        ])
    }

    /// Expire idle flows from the stickiness cache.
    pub fn purge_idle_flows(&self) {
        self.flows.purge_idle();
    }

    /// Number of live cached flows.
    pub fn cached_flows(&self) -> usize {
        self.flows.len()
    }
}
