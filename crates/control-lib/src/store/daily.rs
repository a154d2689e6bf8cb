//! Daily forecast accuracy tracking
//!
//! Each hour gets a `{predicted, actual}` pair: the prediction lands when the
//! forecast is produced, the actual a hour later once the metrics database
//! has the real count. The file rolls over at local midnight.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{read_json, write_json_atomic};

/// Predicted vs observed requests for one hour of the current day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlyRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DailyFile {
    date: Option<NaiveDate>,
    /// Keyed by "HH:00".
    hours: BTreeMap<String, HourlyRecord>,
}

/// Tracks forecast accuracy over the current day.
pub struct DailyPredictionTracker {
    path: PathBuf,
    file: DailyFile,
}

impl DailyPredictionTracker {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file = if path.exists() {
            match read_json::<DailyFile>(&path) {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "Could not load daily predictions, starting empty");
                    DailyFile::default()
                }
            }
        } else {
            DailyFile::default()
        };
        Self { path, file }
    }

    fn hour_key(at: DateTime<Utc>) -> String {
        at.format("%H:00").to_string()
    }

    /// Clear stored pairs when the day has rolled over.
    pub fn roll_over_if_new_day(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let today = now.date_naive();
        if self.file.date == Some(today) {
            return Ok(false);
        }
        self.file = DailyFile { date: Some(today), hours: BTreeMap::new() };
        self.save()?;
        Ok(true)
    }

    /// Record the forecast produced for the hour containing `at`.
    pub fn add_prediction(&mut self, at: DateTime<Utc>, predicted: u64) -> Result<()> {
        self.roll_over_if_new_day(at)?;
        self.file
            .hours
            .entry(Self::hour_key(at))
            .or_default()
            .predicted = Some(predicted);
        self.save()
    }

    /// Record the observed count for the hour containing `at`. Returns true
    /// when a matching prediction existed.
    pub fn update_actual(&mut self, at: DateTime<Utc>, actual: u64) -> Result<bool> {
        let key = Self::hour_key(at);
        let record = self.file.hours.entry(key).or_default();
        record.actual = Some(actual);
        let graded = record.predicted.is_some();
        self.save()?;
        Ok(graded)
    }

    /// Mean absolute percentage error over graded hours, if any exist.
    pub fn accuracy_pct(&self) -> Option<f64> {
        let mut errors = Vec::new();
        for record in self.file.hours.values() {
            if let (Some(p), Some(a)) = (record.predicted, record.actual) {
                if a > 0 {
                    let err = (p as f64 - a as f64).abs() / a as f64;
                    errors.push(err);
                }
            }
        }
        if errors.is_empty() {
            return None;
        }
        let mape = errors.iter().sum::<f64>() / errors.len() as f64;
        Some(((1.0 - mape).max(0.0)) * 100.0)
    }

    /// Snapshot of the day's records keyed by "HH:00".
    pub fn records(&self) -> BTreeMap<String, HourlyRecord> {
        self.file.hours.clone()
    }

    fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, h, 0, 0).unwrap()
    }

    #[test]
    fn prediction_then_actual_grades() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = DailyPredictionTracker::open(dir.path().join("daily.json"));

        tracker.add_prediction(at(1, 10), 1000).unwrap();
        assert!(tracker.update_actual(at(1, 10), 900).unwrap());

        let acc = tracker.accuracy_pct().unwrap();
        // |1000 - 900| / 900 ≈ 11.1% error
        assert!((acc - 88.88).abs() < 0.1);
    }

    #[test]
    fn actual_without_prediction_is_not_graded() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = DailyPredictionTracker::open(dir.path().join("daily.json"));

        assert!(!tracker.update_actual(at(1, 3), 500).unwrap());
        assert!(tracker.accuracy_pct().is_none());
    }

    #[test]
    fn new_day_clears() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = DailyPredictionTracker::open(dir.path().join("daily.json"));

        tracker.add_prediction(at(1, 23), 100).unwrap();
        assert!(tracker.roll_over_if_new_day(at(2, 0)).unwrap());
        assert!(tracker.records().is_empty());
    }

    #[test]
    fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily.json");
        {
            let mut tracker = DailyPredictionTracker::open(&path);
            tracker.add_prediction(at(1, 8), 42).unwrap();
        }
        let tracker = DailyPredictionTracker::open(&path);
        assert_eq!(tracker.records()["08:00"].predicted, Some(42));
    }
}
