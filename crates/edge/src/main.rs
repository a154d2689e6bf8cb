//! Edge controller binary
//!
//! Runs at the NAT box: reads the status replica, selects a backend with
//! DWRS every tick, and commits it as the single DNAT destination. Must run
//! with the privileges needed to manage the dataplane.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use control_lib::alerts::AlertJournal;
use control_lib::balancer::{EdgeConfig as LoopConfig, EdgeLoop, NatCommitter, NatConfig, SystemRunner};
use control_lib::telemetry::{PrometheusTelemetry, TelemetryConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const EDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = EDGE_VERSION, "Starting edge controller");

    let config = config::EdgeConfig::load()?;
    info!(
        public_ip = %config.public_ip,
        status_path = %config.status_path.display(),
        "Edge configured"
    );

    let telemetry = Arc::new(PrometheusTelemetry::new(TelemetryConfig {
        base_url: config.prometheus_url.clone(),
        ..Default::default()
    })?);

    let mut nat = NatCommitter::new(
        NatConfig {
            public_ip: config.public_ip.clone(),
            public_interface: config.public_interface.clone(),
            port: config.service_port,
        },
        Box::new(SystemRunner),
    );
    nat.enable_forwarding().await?;

    let journal = Arc::new(AlertJournal::with_persistence(&config.alerts_path));

    let edge_loop = EdgeLoop::new(
        LoopConfig {
            status_path: config.status_path.clone(),
            tick: Duration::from_secs(config.tick_secs),
            staleness_cap: Duration::from_secs(config.staleness_cap_secs),
        },
        telemetry,
        nat,
        journal,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let loop_handle = tokio::spawn(edge_loop.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(5), loop_handle).await;

    info!("Edge controller stopped");
    Ok(())
}
