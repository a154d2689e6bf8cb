//! CLI command implementations

pub mod alerts;
pub mod stats;
pub mod weights;
