//! Per-path bandwidth prediction
//!
//! One small time-series model per (leaf pair, spine) path. Raw windows are
//! smoothed with a centered rolling mean and paired with a rolling-std
//! volatility channel before inference, matching the training pipeline.
//! Until ten windows of history exist the bank stays in realtime mode.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tract_onnx::prelude::*;
use tracing::{debug, warn};

use crate::models::{PathPrediction, WeightSource};
use crate::store::{read_json, write_json_atomic};

/// Windows of history required before prediction mode activates.
pub const MIN_HISTORY_WINDOWS: usize = 10;

/// Rolling window used for the smoothing and volatility transforms.
const SMOOTHING_WINDOW: usize = 5;

/// Windows of history retained per path.
const MAX_HISTORY_WINDOWS: usize = 60;

/// Load balancing mode for weight derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancingMode {
    /// Weights from observed bytes only.
    Realtime,
    /// Weights from model predictions once history suffices.
    Prediction,
    /// Weighted blend of prediction and observation.
    Hybrid,
}

impl std::fmt::Display for BalancingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalancingMode::Realtime => write!(f, "realtime"),
            BalancingMode::Prediction => write!(f, "prediction"),
            BalancingMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Centered rolling mean and rolling standard deviation over `values`.
pub fn trend_and_volatility(values: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = values.len();
    let half = SMOOTHING_WINDOW / 2;
    let mut trend = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        let slice = &values[lo..hi];
        trend.push(slice.iter().sum::<f64>() / slice.len() as f64);
    }

    let mut volatility = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        let slice = &trend[lo..hi];
        let mean = slice.iter().sum::<f64>() / slice.len() as f64;
        let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / (slice.len().max(2) - 1) as f64;
        volatility.push(var.sqrt());
    }
    (trend, volatility)
}

/// A next-window bandwidth model for one path.
pub trait PathModel: Send + Sync {
    fn predict(&self, trend: &[f64], volatility: &[f64]) -> Result<f64>;
    fn version(&self) -> String;
}

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX path model evaluated with tract: input `[1, window, 2]` of
/// log-scaled trend and volatility.
pub struct OnnxPathModel {
    plan: TractModel,
    window: usize,
    version: String,
}

impl OnnxPathModel {
    pub fn from_bytes(bytes: &[u8], window: usize, version: impl Into<String>) -> Result<Self> {
        let plan = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(bytes))
            .context("failed to parse path model")?
            .with_input_fact(0, f32::fact([1, window, 2]).into())
            .context("failed to fix path model input shape")?
            .into_optimized()
            .context("failed to optimize path model")?
            .into_runnable()
            .context("failed to build runnable path model")?;
        Ok(Self { plan, window, version: version.into() })
    }
}

impl PathModel for OnnxPathModel {
    fn predict(&self, trend: &[f64], volatility: &[f64]) -> Result<f64> {
        if trend.len() < self.window {
            anyhow::bail!("path history has {} windows, model needs {}", trend.len(), self.window);
        }
        let start = trend.len() - self.window;
        let mut data = Vec::with_capacity(self.window * 2);
        for i in start..trend.len() {
            data.push((trend[i].max(0.0).ln_1p()) as f32);
            data.push((volatility[i].max(0.0).ln_1p()) as f32);
        }
        let input = tract_ndarray::Array3::from_shape_vec((1, self.window, 2), data)
            .context("failed to shape path model input")?;

        let result = self
            .plan
            .run(tvec!(Tensor::from(input).into()))
            .context("path model evaluation failed")?;
        let output = result.first().context("path model produced no output")?;
        let scaled = output
            .to_array_view::<f32>()
            .context("path model output is not f32")?
            .iter()
            .next()
            .copied()
            .context("path model output is empty")? as f64;

        // Invert the log1p scaling.
        Ok(scaled.exp_m1().max(0.0))
    }

    fn version(&self) -> String {
        self.version.clone()
    }
}

/// Last-trend fallback used when a model is missing or failing.
pub struct FallbackPathModel;

impl PathModel for FallbackPathModel {
    fn predict(&self, trend: &[f64], _volatility: &[f64]) -> Result<f64> {
        Ok(trend.last().copied().unwrap_or(0.0).max(0.0))
    }

    fn version(&self) -> String {
        "fallback".to_string()
    }
}

/// Predictor bank configuration.
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    pub mode: BalancingMode,
    /// Prediction share in hybrid mode.
    pub hybrid_weight: f64,
    /// Where the history buffer is persisted across restarts.
    pub history_path: PathBuf,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            mode: BalancingMode::Prediction,
            hybrid_weight: 0.3,
            history_path: PathBuf::from("path_history.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryFile {
    iteration: u64,
    history: HashMap<String, Vec<f64>>,
}

/// Per-path accuracy bookkeeping.
#[derive(Debug, Default, Clone)]
struct Accuracy {
    staged_prediction: Option<f64>,
    error_sum: f64,
    graded: u64,
}

/// The bank of per-path models plus their shared history buffer.
pub struct PathPredictorBank {
    config: PredictorConfig,
    models: HashMap<String, Box<dyn PathModel>>,
    history: HashMap<String, VecDeque<f64>>,
    accuracy: HashMap<String, Accuracy>,
    iteration: u64,
}

impl PathPredictorBank {
    /// Create the bank, rehydrating persisted history so prediction mode
    /// resumes immediately after a restart.
    pub fn new(config: PredictorConfig) -> Self {
        let mut iteration = 0;
        let mut history: HashMap<String, VecDeque<f64>> = HashMap::new();

        if config.history_path.exists() {
            match read_json::<HistoryFile>(&config.history_path) {
                Ok(file) => {
                    iteration = file.iteration;
                    history = file
                        .history
                        .into_iter()
                        .map(|(k, v)| (k, v.into_iter().collect()))
                        .collect();
                    debug!(iteration, paths = history.len(), "Rehydrated path history");
                }
                Err(e) => warn!(error = %e, "Could not load path history, starting fresh"),
            }
        }

        Self {
            config,
            models: HashMap::new(),
            history,
            accuracy: HashMap::new(),
            iteration,
        }
    }

    /// Install a model for one path.
    pub fn install_model(&mut self, path_name: impl Into<String>, model: Box<dyn PathModel>) {
        self.models.insert(path_name.into(), model);
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Whether enough history exists for prediction-backed weights.
    pub fn predictions_active(&self) -> bool {
        self.config.mode != BalancingMode::Realtime
            && self.iteration >= MIN_HISTORY_WINDOWS as u64
    }

    pub fn mode(&self) -> BalancingMode {
        self.config.mode
    }

    /// Record a finished window for every path and advance the iteration.
    /// Previously staged predictions are graded against these observations.
    pub fn record_window(&mut self, observations: &HashMap<String, u64>) {
        self.iteration += 1;
        for (path, bytes) in observations {
            let series = self.history.entry(path.clone()).or_default();
            series.push_back(*bytes as f64);
            while series.len() > MAX_HISTORY_WINDOWS {
                series.pop_front();
            }

            let tracker = self.accuracy.entry(path.clone()).or_default();
            if let Some(predicted) = tracker.staged_prediction.take() {
                let actual = *bytes as f64;
                if actual > 0.0 {
                    tracker.error_sum += (predicted - actual).abs() / actual;
                    tracker.graded += 1;
                }
            }
        }
        self.persist();
    }

    /// Predict next-window bytes for one path, staging the figure for
    /// accuracy grading. Falls back to the last observation on failure.
    pub fn predict(&mut self, path_name: &str) -> PathPrediction {
        let series: Vec<f64> = self
            .history
            .get(path_name)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default();
        let (trend, volatility) = trend_and_volatility(&series);
        let last_observed = series.last().copied().unwrap_or(0.0);

        let predicted = match self.models.get(path_name) {
            Some(model) => match model.predict(&trend, &volatility) {
                Ok(value) => value,
                Err(e) => {
                    warn!(path = path_name, error = %e, "Path model failed, using last observation");
                    last_observed
                }
            },
            None => FallbackPathModel
                .predict(&trend, &volatility)
                .unwrap_or(last_observed),
        };

        let prediction = PathPrediction::new(predicted);
        self.accuracy
            .entry(path_name.to_string())
            .or_default()
            .staged_prediction = Some(prediction.bytes);
        prediction
    }

    /// Cost figure for weight derivation under the configured mode.
    pub fn cost_for(&mut self, path_name: &str, observed_bytes: u64) -> (f64, WeightSource) {
        if !self.predictions_active() {
            return (observed_bytes as f64, WeightSource::Realtime);
        }
        match self.config.mode {
            BalancingMode::Realtime => (observed_bytes as f64, WeightSource::Realtime),
            BalancingMode::Prediction => {
                (self.predict(path_name).bytes, WeightSource::Prediction)
            }
            BalancingMode::Hybrid => {
                let predicted = self.predict(path_name).bytes;
                let w = self.config.hybrid_weight.clamp(0.0, 1.0);
                let blended = w * predicted + (1.0 - w) * observed_bytes as f64;
                (blended, WeightSource::Hybrid)
            }
        }
    }

    /// Mean absolute percentage error per path, for the accuracy gauges.
    pub fn accuracy_mape(&self) -> HashMap<String, f64> {
        self.accuracy
            .iter()
            .filter(|(_, a)| a.graded > 0)
            .map(|(path, a)| (path.clone(), a.error_sum / a.graded as f64))
            .collect()
    }

    /// Last observed bytes for a path.
    pub fn last_observed(&self, path_name: &str) -> Option<f64> {
        self.history.get(path_name).and_then(|h| h.back()).copied()
    }

    fn persist(&self) {
        let file = HistoryFile {
            iteration: self.iteration,
            history: self
                .history
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().copied().collect()))
                .collect(),
        };
        if let Err(e) = write_json_atomic(&self.config.history_path, &file) {
            warn!(error = %e, "Failed to persist path history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir, mode: BalancingMode) -> PredictorConfig {
        PredictorConfig {
            mode,
            hybrid_weight: 0.3,
            history_path: dir.path().join("path_history.json"),
        }
    }

    fn window(bytes: u64) -> HashMap<String, u64> {
        let mut map = HashMap::new();
        map.insert("leaf1-spine1-leaf6".to_string(), bytes);
        map.insert("leaf1-spine2-leaf6".to_string(), bytes / 2);
        map
    }

    #[test]
    fn trend_smooths_and_volatility_tracks_spread() {
        let flat = vec![100.0; 10];
        let (trend, volatility) = trend_and_volatility(&flat);
        assert!(trend.iter().all(|v| (*v - 100.0).abs() < 1e-9));
        assert!(volatility.iter().all(|v| *v < 1e-9));

        let noisy = vec![0.0, 100.0, 0.0, 100.0, 0.0, 100.0];
        let (_, noisy_vol) = trend_and_volatility(&noisy);
        assert!(noisy_vol.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn realtime_until_min_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut bank = PathPredictorBank::new(config(&dir, BalancingMode::Prediction));

        for i in 0..MIN_HISTORY_WINDOWS - 1 {
            bank.record_window(&window(1000 + i as u64));
        }
        assert!(!bank.predictions_active());
        let (cost, source) = bank.cost_for("leaf1-spine1-leaf6", 5000);
        assert_eq!(source, WeightSource::Realtime);
        assert_eq!(cost, 5000.0);

        bank.record_window(&window(2000));
        assert!(bank.predictions_active());
        let (_, source) = bank.cost_for("leaf1-spine1-leaf6", 5000);
        assert_eq!(source, WeightSource::Prediction);
    }

    #[test]
    fn missing_model_falls_back_to_last_observation() {
        let dir = tempfile::tempdir().unwrap();
        let mut bank = PathPredictorBank::new(config(&dir, BalancingMode::Prediction));
        for _ in 0..MIN_HISTORY_WINDOWS {
            bank.record_window(&window(4000));
        }

        let prediction = bank.predict("leaf1-spine1-leaf6");
        // Smoothed trend of a constant series is that constant.
        assert!((prediction.bytes - 4000.0).abs() < 1e-6);
    }

    #[test]
    fn hybrid_blends_prediction_and_observation() {
        let dir = tempfile::tempdir().unwrap();
        let mut bank = PathPredictorBank::new(config(&dir, BalancingMode::Hybrid));
        for _ in 0..MIN_HISTORY_WINDOWS {
            bank.record_window(&window(1000));
        }

        let (cost, source) = bank.cost_for("leaf1-spine1-leaf6", 2000);
        assert_eq!(source, WeightSource::Hybrid);
        // 0.3 * 1000 + 0.7 * 2000 = 1700
        assert!((cost - 1700.0).abs() < 1.0);
    }

    #[test]
    fn accuracy_grades_staged_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let mut bank = PathPredictorBank::new(config(&dir, BalancingMode::Prediction));
        for _ in 0..MIN_HISTORY_WINDOWS {
            bank.record_window(&window(1000));
        }

        bank.predict("leaf1-spine1-leaf6"); // stages ~1000
        bank.record_window(&window(2000)); // actual 2000 -> 50% error

        let mape = bank.accuracy_mape();
        let err = mape["leaf1-spine1-leaf6"];
        assert!((err - 0.5).abs() < 0.01, "unexpected error {err}");
    }

    #[test]
    fn history_resumes_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut bank = PathPredictorBank::new(config(&dir, BalancingMode::Prediction));
            for _ in 0..MIN_HISTORY_WINDOWS {
                bank.record_window(&window(1234));
            }
        }

        let bank = PathPredictorBank::new(config(&dir, BalancingMode::Prediction));
        assert!(bank.predictions_active());
        assert_eq!(bank.last_observed("leaf1-spine1-leaf6"), Some(1234.0));
    }

    #[test]
    fn prediction_is_never_negative() {
        let dir = tempfile::tempdir().unwrap();
        let mut bank = PathPredictorBank::new(config(&dir, BalancingMode::Prediction));
        let prediction = bank.predict("never-seen");
        assert!(prediction.bytes >= 0.0);
    }
}
