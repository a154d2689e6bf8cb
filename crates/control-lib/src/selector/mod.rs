//! Fabric-side path selection: smooth WRR, 5-tuple stickiness, flow install

mod flow;
mod rules;
mod swrr;
mod watcher;

pub use flow::{FlowKey, FlowTable, Protocol, FLOW_IDLE_TIMEOUT};
pub use rules::{
    Forwarding, FlowRule, HostLocation, OnosFlowSink, PacketContext, PathProgrammer,
    RuleSink, FLOW_PRIORITY,
};
pub use swrr::{SmoothWrr, SwrrTable};
pub use watcher::{WeightWatcher, WatcherConfig};
