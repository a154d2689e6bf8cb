//! Forecast cache and evaluation engine
//!
//! At most one forecast is produced per natural clock hour. The cached value
//! is returned verbatim while valid; on evaluation failure the previous value
//! is reused and two consecutive failures flag retraining.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Timelike, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::SequenceModel;
use crate::models::Forecast;
use crate::store::{read_json, write_json_atomic};

/// Forecast engine configuration.
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    /// On-disk cache so a restart inside the hour reuses the forecast.
    pub cache_path: PathBuf,
    /// Hours of history handed to the model.
    pub look_back: usize,
    /// Consecutive failures that trigger a retraining request.
    pub retrain_after_failures: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("forecast_cache.json"),
            look_back: super::LOOK_BACK_HOURS,
            retrain_after_failures: 2,
        }
    }
}

/// Outcome of one forecast request.
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastOutcome {
    /// The cache was still valid.
    Cached(Forecast),
    /// A new forecast was produced for this hour.
    Fresh(Forecast),
    /// Evaluation failed; the previous value is being reused.
    Reused { forecast: Forecast, retrain_due: bool },
}

impl ForecastOutcome {
    pub fn forecast(&self) -> &Forecast {
        match self {
            ForecastOutcome::Cached(f) | ForecastOutcome::Fresh(f) => f,
            ForecastOutcome::Reused { forecast, .. } => forecast,
        }
    }
}

/// Shared slot holding the active model; retraining swaps it atomically.
pub type ModelSlot = Arc<RwLock<Box<dyn SequenceModel>>>;

/// Produces and caches hourly forecasts.
pub struct ForecastEngine {
    config: ForecastConfig,
    model: ModelSlot,
    cached: Option<Forecast>,
    consecutive_failures: u32,
}

impl ForecastEngine {
    /// Create the engine, rehydrating a still-valid cache from disk.
    pub fn new(config: ForecastConfig, model: ModelSlot) -> Self {
        let cached = match read_json::<Forecast>(&config.cache_path) {
            Ok(forecast) if forecast.valid_until > Utc::now() => {
                info!(value = forecast.value, "Loaded valid forecast from cache");
                Some(forecast)
            }
            Ok(_) => None,
            Err(_) => None,
        };
        Self { config, model, cached, consecutive_failures: 0 }
    }

    /// The cached forecast while still valid.
    pub fn current(&self, now: DateTime<Utc>) -> Option<&Forecast> {
        self.cached.as_ref().filter(|f| f.valid_until > now)
    }

    /// End of the hour containing `now`: the next natural hour boundary.
    fn next_hour_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
        let truncated = now
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        truncated + Duration::hours(1)
    }

    /// Return the hourly forecast, evaluating the model only when the cache
    /// has expired.
    pub async fn hourly_forecast(
        &mut self,
        now: DateTime<Utc>,
        history: &[f64],
    ) -> Result<ForecastOutcome> {
        if let Some(current) = self.current(now) {
            return Ok(ForecastOutcome::Cached(current.clone()));
        }

        let evaluation = {
            let model = self.model.read().await;
            let window_start = history.len().saturating_sub(self.config.look_back);
            model.predict(&history[window_start..])
        };

        match evaluation {
            Ok(value) => {
                let forecast = Forecast {
                    value: value.max(0.0),
                    valid_until: Self::next_hour_boundary(now),
                };
                self.cached = Some(forecast.clone());
                self.consecutive_failures = 0;
                if let Err(e) = write_json_atomic(&self.config.cache_path, &forecast) {
                    warn!(error = %e, "Could not persist forecast cache");
                }
                info!(value = forecast.value, valid_until = %forecast.valid_until, "New hourly forecast");
                Ok(ForecastOutcome::Fresh(forecast))
            }
            Err(e) => {
                self.consecutive_failures += 1;
                let retrain_due = self.consecutive_failures >= self.config.retrain_after_failures;
                warn!(
                    error = %e,
                    failures = self.consecutive_failures,
                    retrain_due,
                    "Forecast evaluation failed"
                );
                let previous = self
                    .cached
                    .clone()
                    .context("forecast failed and no previous value is cached")?;
                Ok(ForecastOutcome::Reused { forecast: previous, retrain_due })
            }
        }
    }

    /// Number of consecutive evaluation failures.
    pub fn failure_streak(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct ScriptedModel {
        calls: AtomicU32,
        fail: AtomicBool,
        value: f64,
    }

    impl SequenceModel for ScriptedModel {
        fn predict(&self, _history: &[f64]) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("evaluation error");
            }
            Ok(self.value)
        }

        fn version(&self) -> String {
            "scripted".to_string()
        }
    }

    fn slot(value: f64) -> (ModelSlot, Arc<ScriptedModel>) {
        // The returned Arc lets tests flip the scripted behaviour while the
        // slot holds a forwarding wrapper over the same instance.
        let model = Arc::new(ScriptedModel {
            calls: AtomicU32::new(0),
            fail: AtomicBool::new(false),
            value,
        });
        struct Shared(Arc<ScriptedModel>);
        impl SequenceModel for Shared {
            fn predict(&self, history: &[f64]) -> Result<f64> {
                self.0.predict(history)
            }
            fn version(&self) -> String {
                self.0.version()
            }
        }
        let slot: ModelSlot = Arc::new(RwLock::new(Box::new(Shared(model.clone()))));
        (slot, model)
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
    }

    fn config(dir: &tempfile::TempDir) -> ForecastConfig {
        ForecastConfig {
            cache_path: dir.path().join("forecast_cache.json"),
            look_back: 24,
            retrain_after_failures: 2,
        }
    }

    #[tokio::test]
    async fn one_forecast_per_hour() {
        let dir = tempfile::tempdir().unwrap();
        let (slot, model) = slot(50_000.0);
        let mut engine = ForecastEngine::new(config(&dir), slot);

        let first = engine.hourly_forecast(at(10, 5), &[1.0; 24]).await.unwrap();
        assert!(matches!(first, ForecastOutcome::Fresh(_)));
        assert_eq!(first.forecast().valid_until, at(11, 0));

        let second = engine.hourly_forecast(at(10, 40), &[1.0; 24]).await.unwrap();
        assert!(matches!(second, ForecastOutcome::Cached(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        // Next hour evaluates again.
        let third = engine.hourly_forecast(at(11, 1), &[1.0; 24]).await.unwrap();
        assert!(matches!(third, ForecastOutcome::Fresh(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_reuses_previous_and_flags_retrain() {
        let dir = tempfile::tempdir().unwrap();
        let (slot, model) = slot(42.0);
        let mut engine = ForecastEngine::new(config(&dir), slot);

        engine.hourly_forecast(at(9, 0), &[1.0; 24]).await.unwrap();
        model.fail.store(true, Ordering::SeqCst);

        let first_failure = engine.hourly_forecast(at(10, 1), &[1.0; 24]).await.unwrap();
        match first_failure {
            ForecastOutcome::Reused { forecast, retrain_due } => {
                assert_eq!(forecast.value, 42.0);
                assert!(!retrain_due);
            }
            other => panic!("expected Reused, got {other:?}"),
        }

        let second_failure = engine.hourly_forecast(at(10, 2), &[1.0; 24]).await.unwrap();
        match second_failure {
            ForecastOutcome::Reused { retrain_due, .. } => assert!(retrain_due),
            other => panic!("expected Reused, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_without_cache_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (slot, model) = slot(0.0);
        model.fail.store(true, Ordering::SeqCst);
        let mut engine = ForecastEngine::new(config(&dir), slot);

        assert!(engine.hourly_forecast(at(8, 0), &[1.0; 24]).await.is_err());
    }

    #[tokio::test]
    async fn cache_survives_restart_within_hour() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let (slot, _) = slot(123.0);
        {
            let mut engine = ForecastEngine::new(cfg.clone(), slot.clone());
            let now = Utc::now();
            engine.hourly_forecast(now, &[1.0; 24]).await.unwrap();
        }

        let engine = ForecastEngine::new(cfg, slot);
        assert!(engine.current(Utc::now()).is_some());
    }
}
