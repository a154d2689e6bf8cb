//! Path weight control loop
//!
//! Once a minute: close the collection window, feed the predictor bank,
//! derive inverse-occupancy weights per leaf pair, publish the document to
//! the SDN controller host, and maintain the predicted-vs-actual history.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::{
    pair_label, weigh_pair, FabricTopology, PathCollector, PathHistoryStore, PathPredictorBank,
    PathWindow, WeightPublisher,
};
use crate::alerts::{AlertCategory, AlertJournal, AlertSeverity};
use crate::observability::ControlMetrics;

/// Collection summary exposed through `/stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LastCollection {
    pub total_bytes: u64,
    pub total_mb: f64,
    pub devices: usize,
    pub window_end: String,
}

/// Shared handle onto the last collection summary.
pub type SharedCollection = Arc<Mutex<Option<LastCollection>>>;

/// A manual resync request; the loop replies with the ship outcome.
pub type ForceSyncRequest = tokio::sync::oneshot::Sender<bool>;

/// Configuration for the path loop.
#[derive(Debug, Clone)]
pub struct PathLoopConfig {
    /// Collection window length.
    pub interval: Duration,
    /// Paths moving more than this many megabytes per window raise a
    /// congestion warning.
    pub congestion_threshold_mb: f64,
}

impl Default for PathLoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            congestion_threshold_mb: 500.0,
        }
    }
}

/// The path weight controller.
pub struct PathLoop {
    config: PathLoopConfig,
    topology: FabricTopology,
    collector: PathCollector,
    bank: PathPredictorBank,
    publisher: WeightPublisher,
    history: PathHistoryStore,
    journal: Arc<AlertJournal>,
    metrics: ControlMetrics,
    last_collection: SharedCollection,
    force_sync_rx: tokio::sync::mpsc::Receiver<ForceSyncRequest>,
}

impl PathLoop {
    /// Build the loop plus the handle the HTTP API uses to request a manual
    /// resync.
    pub fn new(
        config: PathLoopConfig,
        topology: FabricTopology,
        collector: PathCollector,
        bank: PathPredictorBank,
        publisher: WeightPublisher,
        history: PathHistoryStore,
        journal: Arc<AlertJournal>,
    ) -> (Self, tokio::sync::mpsc::Sender<ForceSyncRequest>) {
        let (force_sync_tx, force_sync_rx) = tokio::sync::mpsc::channel(4);
        let path_loop = Self {
            config,
            topology,
            collector,
            bank,
            publisher,
            history,
            journal,
            metrics: ControlMetrics::new(),
            last_collection: Arc::new(Mutex::new(None)),
            force_sync_rx,
        };
        (path_loop, force_sync_tx)
    }

    /// Handle for the HTTP API.
    pub fn collection_handle(&self) -> SharedCollection {
        self.last_collection.clone()
    }

    /// Run until shutdown, aligned to the collection interval.
    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            models = self.topology.model_count(),
            "Starting path weight loop"
        );
        let mut ticker = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                Some(reply) = self.force_sync_rx.recv() => {
                    let shipped = self.publisher.force_sync().await.unwrap_or(false);
                    let _ = reply.send(shipped);
                }
                _ = shutdown.recv() => {
                    info!("Shutting down path weight loop");
                    break;
                }
            }
        }
    }

    /// One collection-and-publish round. Public for tests.
    pub async fn tick(&mut self) {
        // Collection is retried within the tick; a failed window is skipped
        // and the next tick starts over.
        let mut attempt = 0u32;
        let collected = loop {
            match self.collector.collect().await {
                Ok(window) => break Ok(window),
                Err(e) => {
                    attempt += 1;
                    if attempt >= crate::telemetry::RETRY_ATTEMPTS {
                        break Err(e);
                    }
                    tokio::time::sleep(crate::telemetry::RETRY_BACKOFF * (1u32 << (attempt - 1)))
                        .await;
                }
            }
        };
        let window = match collected {
            Ok(Some(window)) => window,
            Ok(None) => return, // primed the first snapshot
            Err(e) => {
                warn!(error = %e, "Port statistics collection failed");
                self.journal.push(
                    AlertSeverity::Warning,
                    AlertCategory::SystemTelemetry,
                    "SDN Controller Unreachable",
                    format!("Cannot collect port statistics - {e}"),
                );
                return;
            }
        };

        {
            let mut last = self.last_collection.lock().unwrap();
            *last = Some(LastCollection {
                total_bytes: window.total_bytes,
                total_mb: (window.total_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
                devices: window.devices,
                window_end: Self::doc_timestamp(&window, false),
            });
        }

        self.bank.record_window(&window.path_bytes);
        self.check_congestion(&window);
        for (path, bytes) in &window.path_bytes {
            self.metrics.set_path_window_bytes(path, *bytes as f64);
        }
        for (path, mape) in self.bank.accuracy_mape() {
            self.metrics.set_path_mape(&path, mape);
        }

        // Grade the window that just closed against its staged predictions.
        let window_label = Self::doc_timestamp(&window, true);
        let actual_mb: BTreeMap<String, f64> = window
            .path_bytes
            .iter()
            .map(|(path, bytes)| (path.clone(), *bytes as f64 / (1024.0 * 1024.0)))
            .collect();
        if let Err(e) = self.history.record_actuals(&window_label, &actual_mb) {
            warn!(error = %e, "Could not record path bandwidth history");
        }

        // Weights per unordered pair under the configured mode.
        let mut weights = BTreeMap::new();
        for pair in self.topology.leaf_pairs() {
            let mut costs = [0.0f64; 2];
            let mut source = crate::models::WeightSource::Realtime;
            for (index, spine) in self.topology.spines.clone().iter().enumerate() {
                let name = self.topology.path_name(&pair, spine);
                let observed = window.path_bytes.get(&name).copied().unwrap_or(0);
                let (cost, cost_source) = self.bank.cost_for(&name, observed);
                costs[index] = cost;
                source = cost_source;
            }
            weights.insert(pair_label(&pair), weigh_pair(costs, source));
        }

        let using_predictions = self.bank.predictions_active();
        let document = super::build_document(
            &self.topology,
            &weights,
            self.bank.iteration(),
            &self.bank.mode().to_string(),
            using_predictions,
        );

        match self.publisher.publish(&document).await {
            Ok(true) => {
                self.metrics.inc_weight_push("success");
            }
            Ok(false) => {
                self.metrics.inc_weight_push("failure");
                self.journal.push(
                    AlertSeverity::Warning,
                    AlertCategory::NetworkPath,
                    "Weight Sync Failed",
                    "Path-selection document could not be shipped to the SDN host",
                );
            }
            Err(e) => {
                self.metrics.inc_weight_push("failure");
                warn!(error = %e, "Could not write path-selection document");
            }
        }

        // Stage predictions for the window that is now starting.
        let staged = if using_predictions {
            let mut predictions = BTreeMap::new();
            for pair in self.topology.leaf_pairs() {
                for spine in self.topology.spines.clone() {
                    let name = self.topology.path_name(&pair, &spine);
                    let bytes = self.bank.predict(&name).bytes;
                    predictions.insert(name, bytes / (1024.0 * 1024.0));
                }
            }
            Some(predictions)
        } else {
            None
        };
        let next_label = Self::doc_timestamp(&window, false);
        if let Err(e) = self.history.stage_predictions(
            &next_label,
            self.bank.iteration(),
            &self.bank.mode().to_string(),
            staged,
        ) {
            warn!(error = %e, "Could not stage next predictions");
        }

        info!(
            iteration = self.bank.iteration(),
            total_mb = window.total_bytes / (1024 * 1024),
            using_predictions,
            "Path weights published"
        );
    }

    fn check_congestion(&self, window: &PathWindow) {
        let threshold_bytes = (self.config.congestion_threshold_mb * 1024.0 * 1024.0) as u64;
        for (path, bytes) in &window.path_bytes {
            if *bytes > threshold_bytes {
                self.journal.push(
                    AlertSeverity::Warning,
                    AlertCategory::NetworkPath,
                    "High Path Congestion",
                    format!(
                        "Path {path} moved {:.1} MB in one window - may affect traffic routing",
                        *bytes as f64 / (1024.0 * 1024.0)
                    ),
                );
            }
        }
    }

    /// Window label in the operator timezone; `start` selects the window's
    /// beginning (grading) vs end (staging).
    fn doc_timestamp(window: &PathWindow, start: bool) -> String {
        let tz = FixedOffset::east_opt(8 * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        let at = if start { window.window_start } else { window.window_end };
        at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
