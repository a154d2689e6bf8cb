//! Core library for the fabric control plane
//!
//! This crate provides both halves of the closed control loop:
//! - Server capacity management: telemetry, forecasting, the tier ladder
//!   state machine, power actuation, health probing with blacklisting, and
//!   status document publication
//! - Multipath forwarding: per-path bandwidth collection and prediction,
//!   inverse-occupancy weight derivation, and the fabric-side smooth-WRR
//!   selector with 5-tuple flow stickiness

pub mod alerts;
pub mod balancer;
pub mod capacity;
pub mod forecast;
pub mod health;
pub mod models;
pub mod observability;
pub mod paths;
pub mod power;
pub mod probe;
pub mod selector;
pub mod status;
pub mod store;
pub mod telemetry;

pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse};
pub use models::*;
pub use observability::ControlMetrics;
