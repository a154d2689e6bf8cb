//! Sequence model implementations
//!
//! The production model is an exported ONNX network evaluated with tract.
//! When no artifact is available the fallback model keeps the capacity loop
//! alive with a seasonal-naive estimate.

use anyhow::{Context, Result};
use tract_onnx::prelude::*;
use tracing::debug;

use super::SequenceModel;

/// Input window the traffic model was exported with: 24 hours.
pub const LOOK_BACK_HOURS: usize = 24;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX-backed hourly traffic model.
pub struct OnnxSequenceModel {
    plan: TractModel,
    window: usize,
    version: String,
}

impl OnnxSequenceModel {
    /// Load a model from raw ONNX bytes.
    pub fn from_bytes(bytes: &[u8], version: impl Into<String>) -> Result<Self> {
        Self::with_window(bytes, LOOK_BACK_HOURS, version)
    }

    pub fn with_window(bytes: &[u8], window: usize, version: impl Into<String>) -> Result<Self> {
        let plan = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(bytes))
            .context("failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, window, 1]).into())
            .context("failed to fix input shape")?
            .into_optimized()
            .context("failed to optimize model")?
            .into_runnable()
            .context("failed to build runnable plan")?;
        Ok(Self { plan, window, version: version.into() })
    }

    pub fn from_path(path: &std::path::Path, version: impl Into<String>) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read model artifact {}", path.display()))?;
        Self::from_bytes(&bytes, version)
    }

    /// Scale the window into [0, 1] by its own maximum; the network was
    /// trained on similarly normalised series.
    fn scaled_window(&self, history: &[f64]) -> Result<(Vec<f32>, f64)> {
        if history.len() < self.window {
            anyhow::bail!(
                "history has {} points, model needs {}",
                history.len(),
                self.window
            );
        }
        let window = &history[history.len() - self.window..];
        let max = window.iter().cloned().fold(0.0f64, f64::max).max(1.0);
        let scaled = window.iter().map(|v| (v / max) as f32).collect();
        Ok((scaled, max))
    }
}

impl SequenceModel for OnnxSequenceModel {
    fn predict(&self, history: &[f64]) -> Result<f64> {
        let (scaled, max) = self.scaled_window(history)?;
        let input = tract_ndarray::Array3::from_shape_vec((1, self.window, 1), scaled)
            .context("failed to shape model input")?;

        let result = self
            .plan
            .run(tvec!(Tensor::from(input).into()))
            .context("model evaluation failed")?;
        let output = result.first().context("model produced no output")?;
        let value = output
            .to_array_view::<f32>()
            .context("model output is not f32")?
            .iter()
            .next()
            .copied()
            .context("model output is empty")? as f64;

        let denormalised = (value * max).max(0.0);
        debug!(predicted = denormalised, version = %self.version, "Traffic forecast evaluated");
        Ok(denormalised)
    }

    fn version(&self) -> String {
        self.version.clone()
    }
}

/// Seasonal-naive fallback: the value from 24 hours ago, else the last
/// observation, else zero.
pub struct FallbackModel;

impl SequenceModel for FallbackModel {
    fn predict(&self, history: &[f64]) -> Result<f64> {
        if history.len() >= LOOK_BACK_HOURS {
            return Ok(history[history.len() - LOOK_BACK_HOURS].max(0.0));
        }
        Ok(history.last().copied().unwrap_or(0.0).max(0.0))
    }

    fn version(&self) -> String {
        "fallback".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_uses_seasonal_value() {
        let mut history = vec![10.0; LOOK_BACK_HOURS];
        history[0] = 777.0;
        history.extend([1.0, 2.0]);
        // 24 hours before the next point is index len-24.
        let predicted = FallbackModel.predict(&history).unwrap();
        assert_eq!(predicted, history[history.len() - LOOK_BACK_HOURS]);
    }

    #[test]
    fn fallback_short_history_uses_last() {
        assert_eq!(FallbackModel.predict(&[3.0, 9.0]).unwrap(), 9.0);
        assert_eq!(FallbackModel.predict(&[]).unwrap(), 0.0);
    }
}
