//! Status document propagation to the edge host
//!
//! The central state is the truth; shipping the replica is best-effort with
//! bounded retry. A failed sync is retried on the next transition or by the
//! heartbeat, at most one heartbeat per minute.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Transport that places a local file at the edge controller's expected path.
#[async_trait]
pub trait DocumentShipper: Send + Sync {
    async fn ship(&self, local: &Path) -> Result<()>;
}

/// Ships via `scp` to a remote host.
pub struct ScpShipper {
    /// "user@host" for the edge box.
    pub destination: String,
    /// Absolute path expected by the edge controller.
    pub remote_path: String,
    pub timeout: Duration,
}

#[async_trait]
impl DocumentShipper for ScpShipper {
    async fn ship(&self, local: &Path) -> Result<()> {
        let target = format!("{}:{}", self.destination, self.remote_path);
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("scp")
                .arg("-q")
                .arg(local)
                .arg(&target)
                .output(),
        )
        .await
        .context("scp timed out")?
        .context("failed to spawn scp")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("scp to {} failed: {}", target, stderr.trim());
        }
        Ok(())
    }
}

/// Copies into a local directory; used when the edge shares a mount, and in
/// tests.
pub struct LocalShipper {
    pub destination: PathBuf,
}

#[async_trait]
impl DocumentShipper for LocalShipper {
    async fn ship(&self, local: &Path) -> Result<()> {
        tokio::fs::copy(local, &self.destination)
            .await
            .with_context(|| format!("failed to copy into {}", self.destination.display()))?;
        Ok(())
    }
}

/// Sync policy knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub heartbeat: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(500),
            heartbeat: Duration::from_secs(60),
        }
    }
}

/// Drives shipping with retry and the periodic heartbeat.
pub struct StatusSyncer {
    shipper: Box<dyn DocumentShipper>,
    config: SyncConfig,
    last_shipped: Option<Instant>,
}

impl StatusSyncer {
    pub fn new(shipper: Box<dyn DocumentShipper>, config: SyncConfig) -> Self {
        Self { shipper, config, last_shipped: None }
    }

    /// Ship `local` with exponential backoff. Returns Ok even after retries;
    /// Err only once every attempt is exhausted.
    pub async fn ship(&mut self, local: &Path) -> Result<()> {
        let mut backoff = self.config.initial_backoff;
        let mut last_err = None;

        for attempt in 1..=self.config.attempts {
            match self.shipper.ship(local).await {
                Ok(()) => {
                    debug!(attempt, "Status document shipped");
                    self.last_shipped = Some(Instant::now());
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Status sync attempt failed");
                    last_err = Some(e);
                    if attempt < self.config.attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("status sync failed")))
    }

    /// Re-ship on the heartbeat cadence when no transition has fired.
    pub async fn heartbeat(&mut self, local: &Path) -> Result<bool> {
        let due = match self.last_shipped {
            None => true,
            Some(at) => at.elapsed() >= self.config.heartbeat,
        };
        if !due {
            return Ok(false);
        }
        info!("Heartbeat re-ship of status document");
        self.ship(local).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyShipper {
        calls: Arc<AtomicU32>,
        fail_first: u32,
    }

    #[async_trait]
    impl DocumentShipper for FlakyShipper {
        async fn ship(&self, _local: &Path) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("transient");
            }
            Ok(())
        }
    }

    fn config() -> SyncConfig {
        SyncConfig {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
            heartbeat: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut syncer = StatusSyncer::new(
            Box::new(FlakyShipper { calls: calls.clone(), fail_first: 2 }),
            config(),
        );

        syncer.ship(Path::new("/tmp/doc.json")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut syncer = StatusSyncer::new(
            Box::new(FlakyShipper { calls: calls.clone(), fail_first: 10 }),
            config(),
        );

        assert!(syncer.ship(Path::new("/tmp/doc.json")).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn heartbeat_skips_when_recent() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut syncer = StatusSyncer::new(
            Box::new(FlakyShipper { calls: calls.clone(), fail_first: 0 }),
            config(),
        );

        syncer.ship(Path::new("/tmp/doc.json")).await.unwrap();
        let shipped = syncer.heartbeat(Path::new("/tmp/doc.json")).await.unwrap();
        assert!(!shipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn local_shipper_copies() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.json");
        let dst = dir.path().join("dst.json");
        std::fs::write(&src, b"{\"ok\": true}").unwrap();

        let shipper = LocalShipper { destination: dst.clone() };
        shipper.ship(&src).await.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"{\"ok\": true}");
    }
}
