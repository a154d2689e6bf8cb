//! Multipath weight control over the spine-leaf fabric

mod collector;
mod history;
mod path_loop;
mod predictor;
mod publisher;
mod topology;
mod weights;

pub use collector::{PathCollector, PathWindow};
pub use history::{HistoryEntry, PathFigures, PathHistoryStore, StagedPredictions};
pub use path_loop::{ForceSyncRequest, LastCollection, PathLoop, PathLoopConfig, SharedCollection};
pub use predictor::{
    trend_and_volatility, BalancingMode, FallbackPathModel, OnnxPathModel, PathModel,
    PathPredictorBank, PredictorConfig, MIN_HISTORY_WINDOWS,
};
pub use publisher::{PushStats, SharedPushStats, WeightPublisher};
pub use topology::FabricTopology;
pub use weights::{
    build_document, inverse_ratios, pair_label, weigh_pair, BandwidthCost, DocumentMetadata,
    PathDetail, PathSelectionDocument, RouteEntry, EPSILON_BYTES,
};
