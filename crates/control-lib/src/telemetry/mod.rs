//! Telemetry clients for the two control halves
//!
//! `backends` queries the metrics time-series database for per-server
//! CPU/memory/traffic samples; `fabric` polls the SDN controller's
//! port-statistics API for leaf and spine byte counters.

mod backends;
mod fabric;

pub use backends::{BackendTelemetry, PrometheusTelemetry, TelemetryConfig};
pub use fabric::{
    delta_usage, OnosConfig, OnosPortStats, PortCounters, PortStatsSource, PortUsage,
    StatsSnapshot,
};

pub use async_trait::async_trait;

use std::future::Future;
use std::time::Duration;

use anyhow::Result;

/// Attempts made for one external call within a tick.
pub const RETRY_ATTEMPTS: u32 = 3;

/// Starting backoff between attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Run `op` with exponential backoff. The error of the final attempt is
/// returned; the caller alerts and skips to the next tick.
pub async fn with_retries<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = RETRY_BACKOFF;
    let mut last_err = None;
    for attempt in 1..=RETRY_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_err = Some(e);
                if attempt < RETRY_ATTEMPTS {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("operation failed")))
}
