//! Weight derivation and the path-selection document
//!
//! Raw weights are the inverse of each path's cost in bytes; within a leaf
//! pair the two weights are normalised to sum to one. The published document
//! carries a directed entry per route so the fabric-side selector can look
//! up either direction.

use std::collections::BTreeMap;

use chrono::{FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use super::FabricTopology;
use crate::models::{RouteKey, RouteWeights, WeightSource};

/// Guard against division by zero when a path carried no bytes.
pub const EPSILON_BYTES: f64 = 1.0;

/// Operator timezone used for document timestamps (UTC+8).
const DOC_TZ_OFFSET_HOURS: i32 = 8;

/// Inverse-cost ratios for a path pair. All-zero costs split evenly.
pub fn inverse_ratios(costs: [f64; 2], epsilon: f64) -> [f64; 2] {
    if costs[0] <= 0.0 && costs[1] <= 0.0 {
        return [0.5, 0.5];
    }
    let w0 = 1.0 / (costs[0].max(0.0) + epsilon);
    let w1 = 1.0 / (costs[1].max(0.0) + epsilon);
    let total = w0 + w1;
    [w0 / total, w1 / total]
}

/// Metadata block of the published document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub timestamp_utc8: String,
    pub iteration: u64,
    pub load_balancing_mode: String,
    pub using_predictions: bool,
    pub description: String,
}

/// Cost annotation for one path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthCost {
    pub bytes: f64,
    pub megabytes: f64,
    pub source: String,
}

/// One path entry under a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathDetail {
    pub via_spine: String,
    pub selection_ratio: f64,
    pub bandwidth_cost: BandwidthCost,
}

/// Per-route block: `path_0` and `path_1` keyed by spine index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub path_details: BTreeMap<String, PathDetail>,
}

/// The full path-selection document shipped to the SDN controller host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSelectionDocument {
    pub metadata: DocumentMetadata,
    pub path_selection_weights: BTreeMap<String, RouteEntry>,
}

/// Build the document from per-pair weights.
///
/// `weights` is keyed by canonical (unordered) pair; the document receives
/// one entry per directed route so both directions resolve.
pub fn build_document(
    topology: &FabricTopology,
    weights: &BTreeMap<String, RouteWeights>,
    iteration: u64,
    mode: &str,
    using_predictions: bool,
) -> PathSelectionDocument {
    let tz = FixedOffset::east_opt(DOC_TZ_OFFSET_HOURS * 3600)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
    let timestamp = Utc::now().with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string();

    let mut routes = BTreeMap::new();
    for route in topology.routes() {
        let canonical = route.canonical().label();
        let Some(route_weights) = weights.get(&canonical) else { continue };

        let mut path_details = BTreeMap::new();
        for (index, spine) in topology.spines.iter().enumerate() {
            let bytes = route_weights.costs[index];
            path_details.insert(
                format!("path_{index}"),
                PathDetail {
                    via_spine: spine.clone(),
                    selection_ratio: (route_weights.ratios[index] * 10_000.0).round() / 10_000.0,
                    bandwidth_cost: BandwidthCost {
                        bytes,
                        megabytes: (bytes / (1024.0 * 1024.0) * 100.0).round() / 100.0,
                        source: route_weights.source.to_string(),
                    },
                },
            );
        }
        routes.insert(route.label(), RouteEntry { path_details });
    }

    let description = format!(
        "Path selection weights based on {} bandwidth usage",
        if using_predictions { "predicted" } else { "real-time cumulative" }
    );

    PathSelectionDocument {
        metadata: DocumentMetadata {
            timestamp_utc8: timestamp,
            iteration,
            load_balancing_mode: mode.to_string(),
            using_predictions,
            description,
        },
        path_selection_weights: routes,
    }
}

/// Derive the weight pair for one canonical leaf pair from its two costs.
pub fn weigh_pair(costs: [f64; 2], source: WeightSource) -> RouteWeights {
    RouteWeights {
        ratios: inverse_ratios(costs, EPSILON_BYTES),
        costs,
        source,
    }
}

/// Canonical label helper for map keys.
pub fn pair_label(pair: &RouteKey) -> String {
    pair.canonical().label()
}
