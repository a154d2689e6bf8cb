//! Path-selection document publication
//!
//! Writes the document atomically, ships it to the SDN controller host with
//! bounded retry, and keeps the push counters the HTTP API reports.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use super::PathSelectionDocument;
use crate::status::DocumentShipper;
use crate::store::{read_json, write_json_atomic};

/// Counters exposed through `/stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PushStats {
    pub total_pushes: u64,
    pub successful_pushes: u64,
    pub failed_pushes: u64,
    pub last_push_time: Option<String>,
    pub last_error: Option<String>,
}

/// Shared handle onto the push counters.
pub type SharedPushStats = Arc<Mutex<PushStats>>;

/// Publishes weight documents and tracks outcomes.
pub struct WeightPublisher {
    local_path: PathBuf,
    shipper: Box<dyn DocumentShipper>,
    attempts: u32,
    initial_backoff: Duration,
    stats: SharedPushStats,
}

impl WeightPublisher {
    pub fn new(local_path: impl Into<PathBuf>, shipper: Box<dyn DocumentShipper>) -> Self {
        Self {
            local_path: local_path.into(),
            shipper,
            attempts: 3,
            initial_backoff: Duration::from_millis(500),
            stats: Arc::new(Mutex::new(PushStats::default())),
        }
    }

    pub fn with_retry(mut self, attempts: u32, initial_backoff: Duration) -> Self {
        self.attempts = attempts;
        self.initial_backoff = initial_backoff;
        self
    }

    /// Handle for the HTTP API.
    pub fn stats_handle(&self) -> SharedPushStats {
        self.stats.clone()
    }

    pub fn local_path(&self) -> &std::path::Path {
        &self.local_path
    }

    /// Read back the currently published document.
    pub fn current_document(&self) -> Result<PathSelectionDocument> {
        read_json(&self.local_path)
    }

    /// Write the document atomically and ship it. Returns whether the ship
    /// succeeded; a local write failure is an error.
    pub async fn publish(&mut self, document: &PathSelectionDocument) -> Result<bool> {
        write_json_atomic(&self.local_path, document)?;
        Ok(self.ship(&document.metadata.timestamp_utc8).await)
    }

    /// Re-ship the last written document (manual resync).
    pub async fn force_sync(&mut self) -> Result<bool> {
        let document = self.current_document()?;
        Ok(self.ship(&document.metadata.timestamp_utc8).await)
    }

    async fn ship(&mut self, timestamp: &str) -> bool {
        let mut backoff = self.initial_backoff;
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            match self.shipper.ship(&self.local_path).await {
                Ok(()) => {
                    let mut stats = self.stats.lock().unwrap();
                    stats.total_pushes += 1;
                    stats.successful_pushes += 1;
                    stats.last_push_time = Some(timestamp.to_string());
                    stats.last_error = None;
                    info!(attempt, "Path-selection document shipped");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Weight document ship failed");
                    last_error = Some(e.to_string());
                    if attempt < self.attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        let mut stats = self.stats.lock().unwrap();
        stats.total_pushes += 1;
        stats.failed_pushes += 1;
        stats.last_error = last_error;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WeightSource;
    use crate::paths::{build_document, weigh_pair, FabricTopology};
    use crate::status::LocalShipper;
    use crate::telemetry::async_trait;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn document() -> PathSelectionDocument {
        let topology = FabricTopology::testbed();
        let mut weights = BTreeMap::new();
        weights.insert(
            "leaf1->leaf6".to_string(),
            weigh_pair([100.0, 300.0], WeightSource::Realtime),
        );
        build_document(&topology, &weights, 1, "realtime", false)
    }

    #[tokio::test]
    async fn publish_writes_and_ships() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("onos_path_selection.json");
        let remote = dir.path().join("remote.json");

        let mut publisher = WeightPublisher::new(
            &local,
            Box::new(LocalShipper { destination: remote.clone() }),
        );

        let shipped = publisher.publish(&document()).await.unwrap();
        assert!(shipped);
        assert!(remote.exists());

        let stats = publisher.stats_handle();
        let stats = stats.lock().unwrap();
        assert_eq!(stats.total_pushes, 1);
        assert_eq!(stats.successful_pushes, 1);
        assert!(stats.last_push_time.is_some());
    }

    struct AlwaysFails {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl DocumentShipper for AlwaysFails {
        async fn ship(&self, _local: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("unreachable host")
        }
    }

    #[tokio::test]
    async fn failed_ship_is_bounded_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let mut publisher = WeightPublisher::new(
            dir.path().join("weights.json"),
            Box::new(AlwaysFails { calls: calls.clone() }),
        )
        .with_retry(3, Duration::from_millis(1));

        let shipped = publisher.publish(&document()).await.unwrap();
        assert!(!shipped);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stats = publisher.stats_handle();
        let stats = stats.lock().unwrap();
        assert_eq!(stats.failed_pushes, 1);
        assert!(stats.last_error.is_some());
    }

    #[tokio::test]
    async fn force_sync_reships_existing_document() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("weights.json");
        let remote = dir.path().join("remote.json");

        let mut publisher = WeightPublisher::new(
            &local,
            Box::new(LocalShipper { destination: remote.clone() }),
        );
        publisher.publish(&document()).await.unwrap();
        std::fs::remove_file(&remote).unwrap();

        assert!(publisher.force_sync().await.unwrap());
        assert!(remote.exists());
    }

    #[tokio::test]
    async fn force_sync_without_document_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = WeightPublisher::new(
            dir.path().join("missing.json"),
            Box::new(LocalShipper { destination: dir.path().join("remote.json") }),
        );
        assert!(publisher.force_sync().await.is_err());
    }
}
