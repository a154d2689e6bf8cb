//! Edge control loop
//!
//! Every tick: reload the status replica, build the candidate set, run DWRS
//! and commit the winner to the NAT dataplane. An unreadable replica keeps
//! the last-known state; a replica older than the staleness cap stops
//! selection entirely until a fresh one arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

use super::{dwrs, CommitOutcome, NatCommitter};
use crate::alerts::{AlertCategory, AlertJournal, AlertSeverity};
use crate::status::StatusDocument;
use crate::telemetry::BackendTelemetry;

/// Configuration for the edge loop.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Where the central controller ships the status replica.
    pub status_path: PathBuf,
    /// Selection cadence.
    pub tick: Duration,
    /// A replica older than this must not drive selection.
    pub staleness_cap: Duration,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            status_path: PathBuf::from("active_servers_status.json"),
            tick: Duration::from_secs(10),
            staleness_cap: Duration::from_secs(120),
        }
    }
}

/// The edge controller's selection loop.
pub struct EdgeLoop {
    config: EdgeConfig,
    telemetry: Arc<dyn BackendTelemetry>,
    nat: NatCommitter,
    journal: Arc<AlertJournal>,
    last_document: Option<StatusDocument>,
    last_loaded: Option<Instant>,
}

impl EdgeLoop {
    pub fn new(
        config: EdgeConfig,
        telemetry: Arc<dyn BackendTelemetry>,
        nat: NatCommitter,
        journal: Arc<AlertJournal>,
    ) -> Self {
        Self {
            config,
            telemetry,
            nat,
            journal,
            last_document: None,
            last_loaded: None,
        }
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(tick_secs = self.config.tick.as_secs(), "Starting edge selection loop");
        let mut ticker = interval(self.config.tick);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down edge selection loop");
                    break;
                }
            }
        }
    }

    /// One selection round. Public for tests.
    pub async fn tick(&mut self) {
        match StatusDocument::load(&self.config.status_path) {
            Ok(doc) => {
                self.last_document = Some(doc);
                self.last_loaded = Some(Instant::now());
            }
            Err(e) => {
                warn!(error = %e, "Status replica unreadable, keeping last-known state");
                self.journal.push(
                    AlertSeverity::Warning,
                    AlertCategory::SystemTelemetry,
                    "Status Replica Unreadable",
                    format!("Edge could not read the status document: {e}"),
                );
            }
        }

        let stale = match self.last_loaded {
            None => true,
            Some(at) => at.elapsed() > self.config.staleness_cap,
        };
        if stale {
            warn!("Status replica exceeds staleness cap, retaining current NAT target");
            return;
        }
        let Some(document) = self.last_document.clone() else { return };

        let telemetry = self.telemetry.clone();
        let sampled = crate::telemetry::with_retries(|| {
            let telemetry = telemetry.clone();
            async move { telemetry.sample_all().await }
        })
        .await;
        let samples = match sampled {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "Backend telemetry failed, skipping selection");
                self.journal.push(
                    AlertSeverity::Warning,
                    AlertCategory::SystemTelemetry,
                    "Metrics Database Unreachable",
                    format!("Edge telemetry query failed: {e}"),
                );
                return;
            }
        };

        // Stable order comes from the document's sorted keys.
        let mut eligible = Vec::new();
        for address in document.schedulable_addresses() {
            if let Some(sample) = samples.get(&address) {
                if sample.fresh {
                    eligible.push((address, sample.clone()));
                }
            }
        }

        let candidates = dwrs::weigh(eligible.iter().map(|(a, s)| (a.as_str(), s)));
        if candidates.is_empty() {
            warn!("No eligible backend, retaining previous NAT target");
            self.journal.push(
                AlertSeverity::Warning,
                AlertCategory::ServerHealth,
                "No Eligible Backend",
                "DWRS candidate set is empty; previous NAT target retained",
            );
            return;
        }

        let total = dwrs::total_weight(&candidates);
        let pick = rand::thread_rng().gen_range(1..=total.max(1));
        let Some(selected) = dwrs::select(&candidates, pick) else { return };
        let target = selected.address.clone();

        match self.nat.commit(&target).await {
            Ok(CommitOutcome::Unchanged) => {
                debug!(%target, "Selection unchanged");
            }
            Ok(CommitOutcome::Installed) => {
                info!(%target, load = selected.load, "NAT target switched");
            }
            Err(e) => {
                warn!(%target, error = %e, "NAT commit failed, previous rule preserved");
                self.journal.push(
                    AlertSeverity::Critical,
                    AlertCategory::SystemTelemetry,
                    "NAT Commit Failed",
                    format!("Could not install DNAT rule for {target}: {e}"),
                );
            }
        }
    }

    /// Currently committed target, for observability.
    pub fn current_target(&self) -> Option<&str> {
        self.nat.installed_target()
    }
}
