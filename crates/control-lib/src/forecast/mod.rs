//! Hourly web-traffic forecasting
//!
//! Wraps a sequence model behind a trait, caches one forecast per natural
//! clock hour, and triggers asynchronous retraining after repeated failures.

mod cache;
mod model;
mod retrain;

pub use cache::{ForecastConfig, ForecastEngine, ForecastOutcome, ModelSlot};
pub use model::{FallbackModel, OnnxSequenceModel, LOOK_BACK_HOURS};
pub use retrain::{verify_artifact, ModelValidity, Retrainer, RetrainerConfig};

use anyhow::Result;

/// A black-box next-value predictor over an hourly series.
///
/// Implementations must be cheap enough to evaluate within one control tick;
/// training happens out of band and replaces the model atomically.
pub trait SequenceModel: Send + Sync {
    /// Predict the next hourly value from `history` (oldest first).
    fn predict(&self, history: &[f64]) -> Result<f64>;

    /// Identifier reported in logs and alerts.
    fn version(&self) -> String;
}
