//! Asynchronous model retraining
//!
//! Retraining runs as a detached task: an external trainer produces a new
//! ONNX artifact plus a checksum sidecar, the artifact is verified and the
//! model slot is swapped atomically. The capacity loop is never blocked.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{info, warn};

use super::{ModelSlot, OnnxSequenceModel};
use crate::alerts::{AlertCategory, AlertJournal, AlertSeverity};
use crate::store::read_json;

/// Training metadata written by the trainer next to the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelValidity {
    pub valid_start: DateTime<Utc>,
    pub valid_end: DateTime<Utc>,
    pub trained_at: DateTime<Utc>,
    #[serde(default)]
    pub r2_score: Option<f64>,
    #[serde(default)]
    pub accuracy_pct: Option<f64>,
    #[serde(default)]
    pub smape: Option<f64>,
}

/// Compare the artifact's SHA-256 against its `.sha256` sidecar.
pub fn verify_artifact(artifact: &Path) -> Result<()> {
    let bytes = std::fs::read(artifact)
        .with_context(|| format!("failed to read artifact {}", artifact.display()))?;

    let sidecar = artifact.with_extension("onnx.sha256");
    let expected = std::fs::read_to_string(&sidecar)
        .with_context(|| format!("failed to read checksum {}", sidecar.display()))?;
    let expected = expected.split_whitespace().next().unwrap_or("").to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let actual = format!("{:x}", hasher.finalize());

    if actual != expected {
        anyhow::bail!(
            "artifact checksum mismatch: expected {expected}, computed {actual}"
        );
    }
    Ok(())
}

/// Retrainer configuration.
#[derive(Debug, Clone)]
pub struct RetrainerConfig {
    /// Trainer invocation: program followed by arguments. The history file
    /// path is appended as the final argument.
    pub trainer: Vec<String>,
    /// Where the trainer leaves the new model.
    pub artifact_path: PathBuf,
    /// Metadata file written alongside the artifact.
    pub validity_path: PathBuf,
}

/// Spawns retraining tasks and swaps the model slot on success.
pub struct Retrainer {
    config: RetrainerConfig,
    slot: ModelSlot,
    journal: Arc<AlertJournal>,
    in_flight: Arc<tokio::sync::Mutex<()>>,
}

impl Retrainer {
    pub fn new(config: RetrainerConfig, slot: ModelSlot, journal: Arc<AlertJournal>) -> Self {
        Self {
            config,
            slot,
            journal,
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Kick off retraining in the background. A request while a run is in
    /// flight is dropped.
    pub fn request(&self, history: Vec<f64>) {
        let config = self.config.clone();
        let slot = self.slot.clone();
        let journal = self.journal.clone();
        let in_flight = self.in_flight.clone();

        tokio::spawn(async move {
            let Ok(_guard) = in_flight.try_lock() else {
                info!("Retraining already in flight, dropping request");
                return;
            };

            journal.push(
                AlertSeverity::Info,
                AlertCategory::ForecastModel,
                "Model Retraining Started",
                format!("Retraining requested with {} history points", history.len()),
            );

            match run_retraining(&config, &slot, &history).await {
                Ok(validity) => {
                    let detail = match (&validity.accuracy_pct, &validity.smape) {
                        (Some(acc), Some(smape)) => {
                            format!("Accuracy: {acc:.1}%, sMAPE: {smape:.1}%")
                        }
                        _ => "metrics unavailable".to_string(),
                    };
                    journal.push(
                        AlertSeverity::Success,
                        AlertCategory::ForecastModel,
                        "Model Retraining Complete",
                        format!("New traffic model active until {} ({detail})", validity.valid_end),
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Retraining failed, keeping previous model");
                    journal.push(
                        AlertSeverity::Critical,
                        AlertCategory::ForecastModel,
                        "Model Retraining Failed",
                        format!("Retraining failed: {e}"),
                    );
                }
            }
        });
    }
}

async fn run_retraining(
    config: &RetrainerConfig,
    slot: &ModelSlot,
    history: &[f64],
) -> Result<ModelValidity> {
    let (program, args) = config
        .trainer
        .split_first()
        .context("trainer command is empty")?;

    let history_file = tempfile::NamedTempFile::new().context("failed to stage history")?;
    serde_json::to_writer(&history_file, history).context("failed to serialize history")?;

    let output = Command::new(program)
        .args(args)
        .arg(history_file.path())
        .output()
        .await
        .with_context(|| format!("failed to spawn trainer {program}"))?;
    if !output.status.success() {
        anyhow::bail!(
            "trainer exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    verify_artifact(&config.artifact_path)?;

    let validity: ModelValidity = read_json(&config.validity_path)
        .context("trainer did not write a validity file")?;

    let model = OnnxSequenceModel::from_path(
        &config.artifact_path,
        format!("retrained-{}", validity.trained_at.format("%Y%m%d%H%M")),
    )?;

    // Atomic swap: readers holding the old model finish undisturbed.
    *slot.write().await = Box::new(model);
    info!(valid_end = %validity.valid_end, "Model slot swapped");
    Ok(validity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_accepts_matching_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("model.onnx");
        std::fs::write(&artifact, b"model-bytes").unwrap();

        let mut hasher = Sha256::new();
        hasher.update(b"model-bytes");
        let digest = format!("{:x}", hasher.finalize());
        std::fs::write(dir.path().join("model.onnx.sha256"), format!("{digest}  model.onnx")).unwrap();

        verify_artifact(&artifact).unwrap();
    }

    #[test]
    fn checksum_rejects_tampered_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("model.onnx");
        std::fs::write(&artifact, b"model-bytes").unwrap();

        let mut hasher = Sha256::new();
        hasher.update(b"other-bytes");
        let digest = format!("{:x}", hasher.finalize());
        std::fs::write(dir.path().join("model.onnx.sha256"), digest).unwrap();

        assert!(verify_artifact(&artifact).is_err());
    }

    #[test]
    fn checksum_requires_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("model.onnx");
        std::fs::write(&artifact, b"model-bytes").unwrap();
        assert!(verify_artifact(&artifact).is_err());
    }

    #[test]
    fn validity_deserializes_with_optional_metrics() {
        let raw = r#"{
            "valid_start": "2026-03-02T00:00:00Z",
            "valid_end": "2026-03-08T23:59:59Z",
            "trained_at": "2026-03-02T01:30:00Z"
        }"#;
        let validity: ModelValidity = serde_json::from_str(raw).unwrap();
        assert!(validity.r2_score.is_none());
    }
}
