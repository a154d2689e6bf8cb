//! Capacity management: tier ladder, backend lifecycle and the scaling loop

mod controller;
mod history;
mod lifecycle;
mod tiers;

pub use controller::{CapacityConfig, CapacityController};
pub use history::{ReactiveSignal, Thresholds, UsageHistory};
pub use lifecycle::{BackendLifecycle, LifecycleState};
pub use tiers::TierLadder;
