//! Append-only alert journal with persistence
//!
//! Handles:
//! - Thread-safe append from any loop
//! - Acknowledge / dismiss by stable id
//! - Size-capped retention with oldest-first eviction
//! - Atomic-rename persistence so the journal survives restarts

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::store::write_json_atomic;

/// Maximum number of alerts kept in the journal.
pub const DEFAULT_MAX_ALERTS: usize = 100;

/// Alerts older than this are discarded during cleanup.
const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Success,
    Info,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Critical => write!(f, "critical"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Success => write!(f, "success"),
            AlertSeverity::Info => write!(f, "info"),
        }
    }
}

/// Subsystem an alert belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    ServerPower,
    ServerHealth,
    ForecastModel,
    ConnectionDraining,
    ResourceThreshold,
    SystemTelemetry,
    NetworkPath,
}

/// One journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
    pub acknowledged: bool,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// On-disk journal layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct JournalFile {
    alerts: Vec<Alert>,
    last_cleanup: Option<DateTime<Utc>>,
}

/// Journal configuration.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub path: Option<PathBuf>,
    pub max_alerts: usize,
    pub retention: Duration,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_alerts: DEFAULT_MAX_ALERTS,
            retention: Duration::hours(DEFAULT_RETENTION_HOURS),
        }
    }
}

/// Thread-safe, bounded alert journal.
pub struct AlertJournal {
    config: JournalConfig,
    inner: RwLock<JournalFile>,
    counter: std::sync::atomic::AtomicU64,
}

impl AlertJournal {
    /// Create an in-memory journal (tests and ephemeral deployments).
    pub fn in_memory() -> Self {
        Self::with_config(JournalConfig::default())
    }

    /// Create a journal persisted at `path`, loading any previous contents.
    pub fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut journal = Self::with_config(JournalConfig {
            path: Some(path.clone()),
            ..Default::default()
        });

        if path.exists() {
            match Self::load(&path) {
                Ok(file) => journal.inner = RwLock::new(file),
                Err(e) => warn!(error = %e, path = %path.display(), "Could not load alert journal, starting empty"),
            }
        }
        journal
    }

    pub fn with_config(config: JournalConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(JournalFile::default()),
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn load(path: &Path) -> Result<JournalFile> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read alert journal {}", path.display()))?;
        serde_json::from_slice(&bytes).context("alert journal is not valid JSON")
    }

    fn persist(&self, file: &JournalFile) {
        if let Some(path) = &self.config.path {
            if let Err(e) = write_json_atomic(path, file) {
                warn!(error = %e, "Failed to persist alert journal");
            }
        }
    }

    /// Stable id: timestamp plus a per-process counter, eight hex digits.
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let secs = Utc::now().timestamp() as u64;
        format!("{:08x}", (secs.wrapping_mul(31).wrapping_add(n)) & 0xffff_ffff)
    }

    /// Append an alert and return its id. Evicts beyond the size cap.
    pub fn push(
        &self,
        severity: AlertSeverity,
        category: AlertCategory,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> String {
        self.push_with(severity, category, title, message, None, None, HashMap::new())
    }

    /// Append an alert carrying server context and extra structured data.
    pub fn push_with(
        &self,
        severity: AlertSeverity,
        category: AlertCategory,
        title: impl Into<String>,
        message: impl Into<String>,
        server_name: Option<String>,
        server_ip: Option<String>,
        extra: HashMap<String, Value>,
    ) -> String {
        let alert = Alert {
            id: self.next_id(),
            severity,
            category,
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
            server_name,
            server_ip,
            acknowledged: false,
            extra,
        };
        let id = alert.id.clone();

        let mut inner = self.inner.write().unwrap();
        // Most recent first.
        inner.alerts.insert(0, alert);
        if inner.alerts.len() > self.config.max_alerts {
            inner.alerts.truncate(self.config.max_alerts);
        }
        self.persist(&inner);
        id
    }

    /// Drop alerts older than the retention window.
    pub fn cleanup(&self) -> usize {
        let cutoff = Utc::now() - self.config.retention;
        let mut inner = self.inner.write().unwrap();
        let before = inner.alerts.len();
        inner.alerts.retain(|a| a.timestamp > cutoff);
        inner.last_cleanup = Some(Utc::now());
        let removed = before - inner.alerts.len();
        if removed > 0 {
            self.persist(&inner);
        }
        removed
    }

    /// Mark an alert as read. Returns false when the id is unknown.
    pub fn acknowledge(&self, id: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        let mut found = false;
        for alert in inner.alerts.iter_mut() {
            if alert.id == id {
                alert.acknowledged = true;
                found = true;
                break;
            }
        }
        if found {
            self.persist(&inner);
        }
        found
    }

    /// Remove an alert entirely. Returns false when the id is unknown.
    pub fn dismiss(&self, id: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        let before = inner.alerts.len();
        inner.alerts.retain(|a| a.id != id);
        let removed = inner.alerts.len() < before;
        if removed {
            self.persist(&inner);
        }
        removed
    }

    /// Snapshot of the most recent alerts, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        let inner = self.inner.read().unwrap();
        inner.alerts.iter().take(limit).cloned().collect()
    }

    /// Count of alerts not yet acknowledged.
    pub fn unacknowledged(&self) -> usize {
        let inner = self.inner.read().unwrap();
        inner.alerts.iter().filter(|a| !a.acknowledged).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_recent_order() {
        let journal = AlertJournal::in_memory();
        journal.push(AlertSeverity::Info, AlertCategory::ServerPower, "first", "a");
        journal.push(AlertSeverity::Warning, AlertCategory::ServerHealth, "second", "b");

        let recent = journal.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].title, "second");
        assert_eq!(recent[1].title, "first");
    }

    #[test]
    fn size_cap_evicts_oldest() {
        let journal = AlertJournal::with_config(JournalConfig {
            max_alerts: 3,
            ..Default::default()
        });
        for i in 0..5 {
            journal.push(
                AlertSeverity::Info,
                AlertCategory::SystemTelemetry,
                format!("alert-{i}"),
                "m",
            );
        }
        let recent = journal.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].title, "alert-4");
        assert_eq!(recent[2].title, "alert-2");
    }

    #[test]
    fn acknowledge_marks_without_removing() {
        let journal = AlertJournal::in_memory();
        let id = journal.push(AlertSeverity::Critical, AlertCategory::ServerHealth, "t", "m");

        assert_eq!(journal.unacknowledged(), 1);
        assert!(journal.acknowledge(&id));
        assert_eq!(journal.unacknowledged(), 0);
        assert_eq!(journal.recent(10).len(), 1);
        assert!(!journal.acknowledge("ffffffff"));
    }

    #[test]
    fn dismiss_removes() {
        let journal = AlertJournal::in_memory();
        let id = journal.push(AlertSeverity::Info, AlertCategory::NetworkPath, "t", "m");

        assert!(journal.dismiss(&id));
        assert!(journal.recent(10).is_empty());
        assert!(!journal.dismiss(&id));
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");

        {
            let journal = AlertJournal::with_persistence(&path);
            journal.push(AlertSeverity::Warning, AlertCategory::ServerPower, "kept", "m");
        }

        let reloaded = AlertJournal::with_persistence(&path);
        let recent = reloaded.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].title, "kept");
        assert_eq!(recent[0].severity, AlertSeverity::Warning);
    }

    #[test]
    fn ids_are_unique() {
        let journal = AlertJournal::in_memory();
        let a = journal.push(AlertSeverity::Info, AlertCategory::ServerPower, "a", "m");
        let b = journal.push(AlertSeverity::Info, AlertCategory::ServerPower, "b", "m");
        assert_ne!(a, b);
    }
}
