//! Hourly traffic history
//!
//! Persisted record of observed requests per hour. The forecaster reads the
//! most recent window from here and retraining consumes the full series.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{read_json, write_json_atomic};

/// One observed hour of traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficEntry {
    /// Start of the hour the count covers.
    pub hour: DateTime<Utc>,
    pub requests: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TrafficFile {
    entries: Vec<TrafficEntry>,
}

/// Append-only store of hourly request counts.
pub struct TrafficStore {
    path: PathBuf,
    entries: Vec<TrafficEntry>,
    /// Entries beyond this are dropped from the front.
    max_entries: usize,
}

impl TrafficStore {
    /// Open the store at `path`, loading existing history if present.
    pub fn open(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        let path = path.into();
        let entries = if path.exists() {
            match read_json::<TrafficFile>(&path) {
                Ok(file) => file.entries,
                Err(e) => {
                    warn!(error = %e, "Could not load traffic history, starting empty");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        Self { path, entries, max_entries }
    }

    /// Record the request count for an hour. A repeated hour replaces the
    /// previous value rather than duplicating the entry.
    pub fn record(&mut self, hour: DateTime<Utc>, requests: u64) -> Result<()> {
        match self.entries.iter_mut().find(|e| e.hour == hour) {
            Some(existing) => existing.requests = requests,
            None => self.entries.push(TrafficEntry { hour, requests }),
        }
        self.entries.sort_by_key(|e| e.hour);
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(0..excess);
        }
        write_json_atomic(&self.path, &TrafficFile { entries: self.entries.clone() })
    }

    /// The most recent `n` hourly counts, oldest first.
    pub fn last_hours(&self, n: usize) -> Vec<f64> {
        let start = self.entries.len().saturating_sub(n);
        self.entries[start..].iter().map(|e| e.requests as f64).collect()
    }

    /// Full series for retraining, oldest first.
    pub fn all(&self) -> &[TrafficEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn record_and_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TrafficStore::open(dir.path().join("traffic.json"), 100);

        store.record(hour(0), 1000).unwrap();
        store.record(hour(1), 2000).unwrap();
        store.record(hour(2), 3000).unwrap();

        assert_eq!(store.last_hours(2), vec![2000.0, 3000.0]);
        assert_eq!(store.last_hours(10), vec![1000.0, 2000.0, 3000.0]);
    }

    #[test]
    fn repeated_hour_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TrafficStore::open(dir.path().join("traffic.json"), 100);

        store.record(hour(0), 1000).unwrap();
        store.record(hour(0), 1500).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.last_hours(1), vec![1500.0]);
    }

    #[test]
    fn cap_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TrafficStore::open(dir.path().join("traffic.json"), 2);

        store.record(hour(0), 1).unwrap();
        store.record(hour(1), 2).unwrap();
        store.record(hour(2), 3).unwrap();

        assert_eq!(store.last_hours(10), vec![2.0, 3.0]);
    }

    #[test]
    fn reload_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.json");
        {
            let mut store = TrafficStore::open(&path, 100);
            store.record(hour(5), 777).unwrap();
        }
        let store = TrafficStore::open(&path, 100);
        assert_eq!(store.last_hours(1), vec![777.0]);
    }
}
