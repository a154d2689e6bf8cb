//! Central controller binary
//!
//! Runs the capacity loop, the path weight loop and the HTTP API, wired
//! through the shared alert journal. Shutdown is cooperative: loops abort
//! at their next suspension point, bounded by a join deadline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use control_lib::alerts::AlertJournal;
use control_lib::capacity::{CapacityConfig, CapacityController, Thresholds, TierLadder};
use control_lib::forecast::{
    FallbackModel, ForecastConfig, ForecastEngine, ModelSlot, OnnxSequenceModel, Retrainer,
    RetrainerConfig, SequenceModel,
};
use control_lib::health::components;
use control_lib::paths::{
    BalancingMode, FabricTopology, OnnxPathModel, PathCollector, PathHistoryStore, PathLoop,
    PathLoopConfig, PathPredictorBank, PredictorConfig, WeightPublisher, MIN_HISTORY_WINDOWS,
};
use control_lib::power::VirshActuator;
use control_lib::probe::{Blacklist, HttpProbe};
use control_lib::status::{DocumentShipper, LocalShipper, ScpShipper, StatusSyncer, SyncConfig};
use control_lib::store::{DailyPredictionTracker, TrafficStore};
use control_lib::telemetry::{OnosConfig, OnosPortStats, PrometheusTelemetry, TelemetryConfig};
use control_lib::{ControlMetrics, HealthRegistry};
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long in-flight work may take to finish after shutdown is signalled.
const JOIN_DEADLINE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = CONTROLLER_VERSION, "Starting fabric controller");

    let config = config::ControllerConfig::load()?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;
    info!(backends = config.backends.len(), data_dir = %config.data_dir.display(), "Controller configured");

    let metrics = ControlMetrics::new();
    let journal = Arc::new(AlertJournal::with_persistence(
        config.data_dir.join("system_alerts.json"),
    ));

    let health = HealthRegistry::new();
    health.register(components::CAPACITY_LOOP).await;
    health.register(components::PATH_LOOP).await;
    health.register(components::FORECASTER).await;
    health.register(components::TELEMETRY).await;

    // --- Capacity half ---

    let telemetry = Arc::new(PrometheusTelemetry::new(TelemetryConfig {
        base_url: config.prometheus_url.clone(),
        ..Default::default()
    })?);
    let power = Arc::new(VirshActuator::new(
        config.hypervisor_uri.clone(),
        Duration::from_secs(10),
    ));
    let probe = Arc::new(HttpProbe::new(
        config.probe_port,
        config.probe_path.clone(),
        Duration::from_secs(config.probe_timeout_secs),
    )?);

    let model: Box<dyn SequenceModel> = match &config.forecast_model_path {
        Some(path) => match OnnxSequenceModel::from_path(path, "v1") {
            Ok(model) => Box::new(model),
            Err(e) => {
                warn!(error = %e, "Could not load forecast model, using fallback");
                health
                    .set_degraded(components::FORECASTER, "model artifact unavailable")
                    .await;
                Box::new(FallbackModel)
            }
        },
        None => Box::new(FallbackModel),
    };
    let slot: ModelSlot = Arc::new(RwLock::new(model));

    let forecast = ForecastEngine::new(
        ForecastConfig {
            cache_path: config.data_dir.join("forecast_cache.json"),
            ..Default::default()
        },
        slot.clone(),
    );
    let retrainer = config.trainer_command.clone().map(|trainer| {
        Retrainer::new(
            RetrainerConfig {
                trainer,
                artifact_path: config.data_dir.join("traffic_model.onnx"),
                validity_path: config.data_dir.join("model_validity.json"),
            },
            slot.clone(),
            journal.clone(),
        )
    });

    let status_path = config.data_dir.join("local_active_servers_status.json");
    let status_shipper: Box<dyn DocumentShipper> = match &config.edge_destination {
        Some(destination) => Box::new(ScpShipper {
            destination: destination.clone(),
            remote_path: config.edge_status_path.clone(),
            timeout: Duration::from_secs(10),
        }),
        None => Box::new(LocalShipper { destination: config.edge_status_path.clone().into() }),
    };
    let syncer = StatusSyncer::new(status_shipper, SyncConfig::default());

    let mut capacity_config =
        CapacityConfig::defaults_with(config.backends.clone(), status_path);
    capacity_config.tick = Duration::from_secs(config.tick_secs);
    capacity_config.stabilization = Duration::from_secs(config.stabilization_secs);
    capacity_config.drain = Duration::from_secs(config.drain_secs);
    capacity_config.thresholds = Thresholds::default();
    capacity_config.ladder = TierLadder::new(config.tier2_from, config.tier3_from)?;

    let capacity = CapacityController::new(
        capacity_config,
        telemetry,
        power,
        probe,
        forecast,
        retrainer,
        syncer,
        TrafficStore::open(config.data_dir.join("hourly_traffic.json"), 24 * 90),
        DailyPredictionTracker::open(config.data_dir.join("daily_predictions.json")),
        Blacklist::open(config.data_dir.join("blacklist.json")),
        journal.clone(),
    );

    // --- Path half ---

    let topology = FabricTopology::testbed();
    let ports = Arc::new(OnosPortStats::new(OnosConfig {
        base_url: config.onos_url.clone(),
        username: config.onos_username.clone(),
        password: config.onos_password.clone(),
        ..Default::default()
    })?);
    let collector = PathCollector::new(topology.clone(), ports);

    let mode = match config.balancing_mode.as_str() {
        "realtime" => BalancingMode::Realtime,
        "hybrid" => BalancingMode::Hybrid,
        _ => BalancingMode::Prediction,
    };
    let mut bank = PathPredictorBank::new(PredictorConfig {
        mode,
        hybrid_weight: config.hybrid_weight,
        history_path: config.data_dir.join("path_history.json"),
    });
    if let Some(model_dir) = &config.path_model_dir {
        let mut loaded = 0usize;
        for pair in topology.leaf_pairs() {
            for spine in &topology.spines {
                let name = topology.path_name(&pair, spine);
                let artifact = model_dir.join(format!("{name}.onnx"));
                if !artifact.exists() {
                    continue;
                }
                match std::fs::read(&artifact)
                    .map_err(anyhow::Error::from)
                    .and_then(|bytes| {
                        OnnxPathModel::from_bytes(&bytes, MIN_HISTORY_WINDOWS, &name)
                    }) {
                    Ok(model) => {
                        bank.install_model(&name, Box::new(model));
                        loaded += 1;
                    }
                    Err(e) => warn!(path = %name, error = %e, "Could not load path model"),
                }
            }
        }
        info!(loaded, total = topology.model_count(), "Path models installed");
    }

    let weights_path = config.data_dir.join("onos_path_selection.json");
    let weights_shipper: Box<dyn DocumentShipper> = match &config.sdn_destination {
        Some(destination) => Box::new(ScpShipper {
            destination: destination.clone(),
            remote_path: config.sdn_weights_path.clone(),
            timeout: Duration::from_secs(10),
        }),
        None => Box::new(LocalShipper { destination: config.sdn_weights_path.clone().into() }),
    };
    let publisher = WeightPublisher::new(weights_path.clone(), weights_shipper);
    let push_stats = publisher.stats_handle();

    let (path_loop, force_sync) = PathLoop::new(
        PathLoopConfig::default(),
        topology,
        collector,
        bank,
        publisher,
        PathHistoryStore::open(config.data_dir.join("path_bandwidth_history.json")),
        journal.clone(),
    );
    let collection = path_loop.collection_handle();

    // --- Wire up and run ---

    let state = Arc::new(api::AppState {
        health: health.clone(),
        journal: journal.clone(),
        push_stats,
        collection,
        weights_path,
        force_sync,
    });

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let capacity_handle = tokio::spawn(capacity.run(shutdown_tx.subscribe()));
    let path_handle = tokio::spawn(path_loop.run(shutdown_tx.subscribe()));
    let api_handle = tokio::spawn(api::serve(config.api_port, state));

    // Periodic journal retention sweep.
    let cleanup_journal = journal.clone();
    let mut cleanup_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cleanup_journal.cleanup();
                    if removed > 0 {
                        info!(removed, "Pruned expired alerts");
                    }
                }
                _ = cleanup_shutdown.recv() => break,
            }
        }
    });

    metrics.set_backends_online(0);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        result = api_handle => {
            // The API exiting on its own means the port bind failed or the
            // server crashed; both are fatal.
            match result {
                Ok(Ok(())) => warn!("API server exited"),
                Ok(Err(e)) => return Err(e.context("API server failed")),
                Err(e) => return Err(anyhow::anyhow!("API task panicked: {e}")),
            }
        }
    }

    let _ = shutdown_tx.send(());
    let joins = async {
        let _ = capacity_handle.await;
        let _ = path_handle.await;
    };
    if tokio::time::timeout(JOIN_DEADLINE, joins).await.is_err() {
        warn!("Loops did not stop within the join deadline");
    }
    info!("Controller stopped");
    Ok(())
}
