//! Core data models for the fabric control plane

use serde::{Deserialize, Serialize};

/// Capacity tier of a backend. Exactly one backend exists per tier.
pub type Tier = u8;

/// Static descriptor of a backend server. Never mutated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backend {
    pub id: String,
    pub address: String,
    pub tier: Tier,
    pub capacity_cores: u32,
    pub capacity_memory_bytes: u64,
}

/// Mutable scheduling state of a backend.
///
/// The central controller holds the authoritative copy; the edge reads a
/// replica from the status document. Invariant: `draining` implies `active`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendState {
    pub active: bool,
    pub draining: bool,
    pub healthy: bool,
}

impl BackendState {
    /// True when the edge may route traffic to this backend.
    pub fn schedulable(&self) -> bool {
        self.active && !self.draining && self.healthy
    }
}

/// One telemetry sample for a backend, derived from the metrics database.
///
/// `fresh = false` means the sample is missing or stale; the backend is
/// treated as unreachable for scheduling and its readings carry no weight
/// in reactive threshold evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSample {
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub rps: f64,
    pub total_memory_bytes: u64,
    pub total_cpu_cores: u32,
    pub fresh: bool,
}

/// Hourly traffic forecast with its validity horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// Predicted requests per hour.
    pub value: f64,
    /// Wallclock instant after which a new forecast must be produced.
    pub valid_until: chrono::DateTime<chrono::Utc>,
}

/// Bytes observed on one directed leaf-spine-leaf path over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSample {
    pub route: RouteKey,
    pub spine: String,
    pub bytes: u64,
}

/// Predicted next-window bytes for one path. Always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPrediction {
    pub bytes: f64,
}

impl PathPrediction {
    pub fn new(bytes: f64) -> Self {
        Self { bytes: bytes.max(0.0) }
    }
}

/// Ordered leaf pair identifying a route through the fabric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub src: String,
    pub dst: String,
}

impl RouteKey {
    pub fn new(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self { src: src.into(), dst: dst.into() }
    }

    /// Document key format, e.g. `leaf1->leaf6`.
    pub fn label(&self) -> String {
        format!("{}->{}", self.src, self.dst)
    }

    /// Canonical unordered form (smaller leaf first), used to share one
    /// prediction model between the two directions of a leaf pair.
    pub fn canonical(&self) -> RouteKey {
        if self.src <= self.dst {
            self.clone()
        } else {
            RouteKey::new(self.dst.clone(), self.src.clone())
        }
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

/// Selection weights for the two paths of a route. `ratios` sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteWeights {
    /// Ratio per path index (0 = first spine, 1 = second spine).
    pub ratios: [f64; 2],
    /// Cost in bytes that produced each ratio.
    pub costs: [f64; 2],
    /// Where the costs came from: "realtime", "prediction" or "hybrid".
    pub source: WeightSource,
}

/// Origin of the bandwidth figures behind a weight pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightSource {
    Realtime,
    Prediction,
    Hybrid,
}

impl std::fmt::Display for WeightSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightSource::Realtime => write!(f, "realtime"),
            WeightSource::Prediction => write!(f, "prediction"),
            WeightSource::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_state_schedulable() {
        let mut state = BackendState { active: true, draining: false, healthy: true };
        assert!(state.schedulable());

        state.draining = true;
        assert!(!state.schedulable());

        state.draining = false;
        state.healthy = false;
        assert!(!state.schedulable());
    }

    #[test]
    fn path_prediction_clamps_negative() {
        assert_eq!(PathPrediction::new(-5.0).bytes, 0.0);
        assert_eq!(PathPrediction::new(42.0).bytes, 42.0);
    }

    #[test]
    fn route_key_canonical_orders_leaves() {
        let forward = RouteKey::new("leaf6", "leaf1");
        let canonical = forward.canonical();
        assert_eq!(canonical.src, "leaf1");
        assert_eq!(canonical.dst, "leaf6");
        assert_eq!(forward.label(), "leaf6->leaf1");
    }
}
