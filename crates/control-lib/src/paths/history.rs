//! Predicted-versus-actual path bandwidth history
//!
//! Keeps a short sliding window of per-path megabyte figures for the
//! dashboard sparklines. Predictions for a window are staged one iteration
//! ahead as `next_predictions` and graded when that window's actuals land.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{read_json, write_json_atomic};

/// Entries kept in the sliding window (minutes of history).
const MAX_ENTRIES: usize = 15;

/// Figures for one path within one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathFigures {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_mb: Option<f64>,
    pub source: String,
}

/// Staged predictions for the window that just started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedPredictions {
    pub timestamp: String,
    pub iteration: u64,
    pub mode: String,
    pub paths: BTreeMap<String, PathFigures>,
}

/// One graded history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub paths: BTreeMap<String, PathFigures>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryFile {
    last_updated: Option<String>,
    iteration: u64,
    using_predictions: bool,
    max_entries: usize,
    next_predictions: Option<StagedPredictions>,
    history: Vec<HistoryEntry>,
}

/// Persisted sliding window of path bandwidth history.
pub struct PathHistoryStore {
    path: PathBuf,
    file: HistoryFile,
}

impl PathHistoryStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file = if path.exists() {
            match read_json::<HistoryFile>(&path) {
                Ok(file) => file,
                Err(e) => {
                    warn!(error = %e, "Could not load path bandwidth history, starting fresh");
                    HistoryFile::default()
                }
            }
        } else {
            HistoryFile::default()
        };
        Self { path, file }
    }

    /// Stage the predictions made for the window that starts at `timestamp`.
    /// Before enough history exists callers pass no predictions and the
    /// staging slot is cleared.
    pub fn stage_predictions(
        &mut self,
        timestamp: &str,
        iteration: u64,
        mode: &str,
        predictions: Option<BTreeMap<String, f64>>,
    ) -> Result<()> {
        self.file.iteration = iteration;
        self.file.using_predictions = predictions.is_some();
        self.file.next_predictions = predictions.map(|paths| StagedPredictions {
            timestamp: timestamp.to_string(),
            iteration,
            mode: mode.to_string(),
            paths: paths
                .into_iter()
                .map(|(path, mb)| {
                    (
                        path,
                        PathFigures {
                            predicted_mb: Some((mb * 100.0).round() / 100.0),
                            actual_mb: None,
                            source: mode.to_string(),
                        },
                    )
                })
                .collect(),
        });
        self.save()
    }

    /// Record the actual megabytes for the window labelled `timestamp`,
    /// joining them with any predictions staged for that same window.
    pub fn record_actuals(
        &mut self,
        timestamp: &str,
        actuals: &BTreeMap<String, f64>,
    ) -> Result<()> {
        let staged = match &self.file.next_predictions {
            Some(staged) if staged.timestamp == timestamp => Some(staged.paths.clone()),
            Some(staged) => {
                warn!(
                    expected = timestamp,
                    staged = %staged.timestamp,
                    "Staged predictions are for a different window"
                );
                None
            }
            None => None,
        };

        let mut paths = BTreeMap::new();
        for (path, mb) in actuals {
            let predicted = staged
                .as_ref()
                .and_then(|s| s.get(path))
                .and_then(|f| f.predicted_mb);
            let source = staged
                .as_ref()
                .and_then(|s| s.get(path))
                .map(|f| f.source.clone())
                .unwrap_or_else(|| "realtime".to_string());
            paths.insert(
                path.clone(),
                PathFigures {
                    predicted_mb: predicted,
                    actual_mb: Some((mb * 100.0).round() / 100.0),
                    source,
                },
            );
        }

        self.file.history.push(HistoryEntry { timestamp: timestamp.to_string(), paths });
        if self.file.history.len() > MAX_ENTRIES {
            let excess = self.file.history.len() - MAX_ENTRIES;
            self.file.history.drain(0..excess);
        }
        self.file.last_updated = Some(timestamp.to_string());
        self.save()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.file.history
    }

    pub fn staged(&self) -> Option<&StagedPredictions> {
        self.file.next_predictions.as_ref()
    }

    fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.file)
    }
}
