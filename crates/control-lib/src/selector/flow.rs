//! Flow identity and stickiness
//!
//! A flow is its IPv4 5-tuple (ports for TCP/UDP, type/code for ICMP). The
//! first packet of a flow picks a spine; every later packet of the same flow
//! reuses it until the flow's rules idle out.

use std::net::Ipv4Addr;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Installed flow rules expire after this idle period.
pub const FLOW_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// IPv4 protocol of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub fn number(&self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Icmp => 1,
        }
    }
}

/// Directed 5-tuple identifying a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: Protocol,
    /// Source port, or ICMP type.
    pub src_port: u16,
    /// Destination port, or ICMP code.
    pub dst_port: u16,
}

impl FlowKey {
    /// The same flow seen from the other direction.
    pub fn reversed(&self) -> FlowKey {
        FlowKey {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            protocol: self.protocol,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FlowEntry {
    spine: usize,
    last_seen: Instant,
}

/// Concurrent flow -> spine cache with idle expiry.
pub struct FlowTable {
    entries: DashMap<FlowKey, FlowEntry>,
    idle_timeout: Duration,
}

impl Default for FlowTable {
    fn default() -> Self {
        Self::new(FLOW_IDLE_TIMEOUT)
    }
}

impl FlowTable {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { entries: DashMap::new(), idle_timeout }
    }

    /// Spine for this flow, selecting via `select` only on first sight.
    /// Touching a cached entry refreshes its idle timer, mirroring the
    /// dataplane rules' idle timeout; an entry that already idled out is
    /// treated as a new flow.
    pub fn spine_for(&self, key: FlowKey, select: impl FnOnce() -> usize) -> usize {
        use dashmap::mapref::entry::Entry;

        let now = Instant::now();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if now.duration_since(occupied.get().last_seen) > self.idle_timeout {
                    occupied.insert(FlowEntry { spine: select(), last_seen: now });
                } else {
                    occupied.get_mut().last_seen = now;
                }
                occupied.get().spine
            }
            Entry::Vacant(vacant) => {
                vacant.insert(FlowEntry { spine: select(), last_seen: now }).spine
            }
        }
    }

    /// Remove entries whose rules have idled out.
    pub fn purge_idle(&self) {
        let now = Instant::now();
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_seen) <= self.idle_timeout);
    }

    /// Whether the flow is currently cached.
    pub fn contains(&self, key: &FlowKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(src_port: u16) -> FlowKey {
        FlowKey {
            src_ip: Ipv4Addr::new(10, 0, 1, 5),
            dst_ip: Ipv4Addr::new(10, 0, 6, 9),
            protocol: Protocol::Tcp,
            src_port,
            dst_port: 80,
        }
    }

    #[test]
    fn reversed_swaps_endpoints_and_ports() {
        let forward = key(43210);
        let reverse = forward.reversed();
        assert_eq!(reverse.src_ip, forward.dst_ip);
        assert_eq!(reverse.dst_ip, forward.src_ip);
        assert_eq!(reverse.src_port, 80);
        assert_eq!(reverse.dst_port, 43210);
        assert_eq!(reverse.reversed(), forward);
    }

    #[test]
    fn same_flow_keeps_its_spine() {
        let table = FlowTable::default();
        let mut calls = 0;

        let first = table.spine_for(key(1000), || {
            calls += 1;
            1
        });
        let second = table.spine_for(key(1000), || {
            calls += 1;
            0
        });

        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(calls, 1, "selector must run once per flow");
    }

    #[test]
    fn distinct_flows_select_independently() {
        let table = FlowTable::default();
        table.spine_for(key(1000), || 0);
        let other = table.spine_for(key(2000), || 1);
        assert_eq!(other, 1);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_flows_are_purged() {
        let table = FlowTable::new(Duration::from_secs(300));
        table.spine_for(key(1000), || 0);

        tokio::time::advance(Duration::from_secs(301)).await;
        table.purge_idle();
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn active_flows_survive_purge() {
        let table = FlowTable::new(Duration::from_secs(300));
        table.spine_for(key(1000), || 0);

        tokio::time::advance(Duration::from_secs(200)).await;
        table.spine_for(key(1000), || 1); // refreshes idle timer
        tokio::time::advance(Duration::from_secs(200)).await;

        table.purge_idle();
        assert!(table.contains(&key(1000)));
    }
}
