//! Weight-document reload
//!
//! Watches the path-selection document for modification and re-applies it to
//! the programmer. Filesystem events wake the watcher immediately; a
//! periodic mtime check covers transports that do not emit events.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::PathProgrammer;
use crate::paths::PathSelectionDocument;
use crate::store::read_json;

/// Watcher configuration.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// The path-selection document location.
    pub document_path: PathBuf,
    /// Fallback mtime poll cadence.
    pub check_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            document_path: PathBuf::from("onos_path_selection.json"),
            check_interval: Duration::from_secs(5),
        }
    }
}

/// Reloads weights whenever the document changes.
pub struct WeightWatcher {
    config: WatcherConfig,
    programmer: Arc<PathProgrammer>,
    last_modified: Option<SystemTime>,
}

impl WeightWatcher {
    pub fn new(config: WatcherConfig, programmer: Arc<PathProgrammer>) -> Self {
        Self { config, programmer, last_modified: None }
    }

    /// Apply the document if its mtime advanced. Returns whether a reload
    /// happened. Public for tests.
    pub fn check_and_reload(&mut self) -> Result<bool> {
        let path = &self.config.document_path;
        if !path.exists() {
            return Ok(false);
        }

        let modified = std::fs::metadata(path)?.modified()?;
        if let Some(last) = self.last_modified {
            if modified <= last {
                return Ok(false);
            }
        }

        let document: PathSelectionDocument = read_json(path)?;
        self.programmer.apply_weights(&document);
        self.last_modified = Some(modified);
        info!(
            iteration = document.metadata.iteration,
            mode = %document.metadata.load_balancing_mode,
            "Reloaded path-selection weights"
        );
        Ok(true)
    }

    /// Run until shutdown. Filesystem notifications are folded into the same
    /// mtime-guarded reload as the periodic check, so duplicate events are
    /// harmless.
    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let (event_tx, mut event_rx) = mpsc::channel::<()>(16);

        let mut watcher: Option<RecommendedWatcher> = None;
        if let Some(parent) = self.config.document_path.parent() {
            let tx = event_tx.clone();
            match notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                if event.is_ok() {
                    let _ = tx.try_send(());
                }
            }) {
                Ok(mut w) => {
                    if let Err(e) = w.watch(parent, RecursiveMode::NonRecursive) {
                        warn!(error = %e, "Could not watch document directory, polling only");
                    } else {
                        watcher = Some(w);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Could not create file watcher, polling only");
                }
            }
        }
        let _watcher = watcher;

        let mut ticker = tokio::time::interval(self.config.check_interval);
        info!(path = %self.config.document_path.display(), "Watching path-selection document");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_and_reload() {
                        debug!(error = %e, "Weight reload check failed");
                    }
                    self.programmer.purge_idle_flows();
                }
                _ = event_rx.recv() => {
                    if let Err(e) = self.check_and_reload() {
                        debug!(error = %e, "Weight reload after event failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down weight watcher");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WeightSource;
    use crate::paths::{build_document, weigh_pair, FabricTopology};
    use crate::selector::{RuleSink, FlowRule};
    use crate::store::write_json_atomic;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct NullSink;

    #[async_trait]
    impl RuleSink for NullSink {
        async fn install(&self, _rules: &[FlowRule]) -> Result<()> {
            Ok(())
        }
    }

    fn document(costs: [f64; 2], iteration: u64) -> crate::paths::PathSelectionDocument {
        let mut weights = BTreeMap::new();
        weights.insert(
            "leaf1->leaf6".to_string(),
            weigh_pair(costs, WeightSource::Realtime),
        );
        build_document(&FabricTopology::testbed(), &weights, iteration, "realtime", false)
    }

    #[test]
    fn missing_document_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let programmer = Arc::new(PathProgrammer::new(
            FabricTopology::testbed(),
            Arc::new(NullSink),
        ));
        let mut watcher = WeightWatcher::new(
            WatcherConfig {
                document_path: dir.path().join("absent.json"),
                check_interval: Duration::from_secs(5),
            },
            programmer,
        );
        assert!(!watcher.check_and_reload().unwrap());
    }

    #[test]
    fn reloads_once_per_modification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");
        write_json_atomic(&path, &document([100.0, 100.0], 1)).unwrap();

        let programmer = Arc::new(PathProgrammer::new(
            FabricTopology::testbed(),
            Arc::new(NullSink),
        ));
        let mut watcher = WeightWatcher::new(
            WatcherConfig { document_path: path.clone(), check_interval: Duration::from_secs(5) },
            programmer,
        );

        assert!(watcher.check_and_reload().unwrap());
        // Unchanged file: no reload.
        assert!(!watcher.check_and_reload().unwrap());
    }

    #[test]
    fn applying_same_document_twice_resets_accumulators_once() {
        // First application resets accumulators; re-checking without a new
        // write must leave the SWRR state untouched.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");
        write_json_atomic(&path, &document([4_000_000.0, 1_000_000.0], 1)).unwrap();

        let programmer = Arc::new(PathProgrammer::new(
            FabricTopology::testbed(),
            Arc::new(NullSink),
        ));
        let mut watcher = WeightWatcher::new(
            WatcherConfig { document_path: path.clone(), check_interval: Duration::from_secs(5) },
            programmer.clone(),
        );

        watcher.check_and_reload().unwrap();
        let first = {
            // Drive a few selections to move the accumulators.
            use crate::selector::{HostLocation, PacketContext, Protocol};
            use std::net::Ipv4Addr;
            for i in 0..3u16 {
                let packet = PacketContext {
                    key: crate::selector::FlowKey {
                        src_ip: Ipv4Addr::new(10, 0, 1, 1),
                        dst_ip: Ipv4Addr::new(10, 0, 6, 1),
                        protocol: Protocol::Tcp,
                        src_port: 5000 + i,
                        dst_port: 80,
                    },
                    src_host: Some(HostLocation { leaf: "leaf1".into(), port: 9 }),
                    dst_host: Some(HostLocation { leaf: "leaf6".into(), port: 9 }),
                    multicast: false,
                };
                programmer.decide(&packet);
            }
            programmer.cached_flows()
        };
        assert_eq!(first, 3);

        // No new write: the second check is a no-op and flows survive.
        assert!(!watcher.check_and_reload().unwrap());
        assert_eq!(programmer.cached_flows(), 3);
    }
}
