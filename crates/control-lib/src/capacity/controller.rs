//! Capacity control loop
//!
//! One tick: integrate lifecycle timers, run health checks, refresh the
//! forecast, resolve the target tier from the proactive and reactive signals,
//! schedule the minimal transitions, and publish the status document.
//!
//! Ordering guarantee: on any scale movement the incoming backend must reach
//! ON before any outgoing backend begins draining.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::{
    BackendLifecycle, LifecycleState, ReactiveSignal, Thresholds, TierLadder, UsageHistory,
};
use crate::alerts::{AlertCategory, AlertJournal, AlertSeverity};
use crate::forecast::{ForecastEngine, ForecastOutcome, Retrainer, LOOK_BACK_HOURS};
use crate::models::{Backend, LiveSample, Tier};
use crate::observability::ControlMetrics;
use crate::power::{PowerActuator, PowerState};
use crate::probe::{Blacklist, HealthTracker, ProbeOutcome, SyntheticProbe};
use crate::status::{StatusDocument, StatusSyncer};
use crate::store::{DailyPredictionTracker, TrafficStore};
use crate::telemetry::BackendTelemetry;

/// Wallclock source, injectable for tests.
type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Configuration for the capacity loop.
#[derive(Debug, Clone)]
pub struct CapacityConfig {
    /// The static backend pool, one backend per tier.
    pub backends: Vec<Backend>,
    pub tick: Duration,
    /// STARTING → ON gate.
    pub stabilization: Duration,
    /// DRAINING → STOPPING gate.
    pub drain: Duration,
    pub status_path: PathBuf,
    pub thresholds: Thresholds,
    pub ladder: TierLadder,
}

impl CapacityConfig {
    pub fn defaults_with(backends: Vec<Backend>, status_path: PathBuf) -> Self {
        Self {
            backends,
            tick: Duration::from_secs(5),
            stabilization: Duration::from_secs(80),
            drain: Duration::from_secs(30),
            status_path,
            thresholds: Thresholds::default(),
            ladder: TierLadder::default(),
        }
    }
}

/// Why a scale movement was initiated, for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScaleTrigger {
    Proactive,
    Reactive,
}

/// The central capacity controller.
pub struct CapacityController {
    config: CapacityConfig,
    telemetry: Arc<dyn BackendTelemetry>,
    power: Arc<dyn PowerActuator>,
    probe: Arc<dyn SyntheticProbe>,
    forecast: ForecastEngine,
    retrainer: Option<Retrainer>,
    journal: Arc<AlertJournal>,
    syncer: StatusSyncer,
    traffic: TrafficStore,
    daily: DailyPredictionTracker,
    lifecycles: BTreeMap<String, BackendLifecycle>,
    tracker: HealthTracker,
    blacklist: Blacklist,
    history: UsageHistory,
    last_published: Option<StatusDocument>,
    /// Tier elevation from the reactive rule; holds until the next fresh
    /// forecast or a sustained-idle signal supersedes it.
    reactive_hold: Option<Tier>,
    metrics: ControlMetrics,
    clock: Clock,
}

impl CapacityController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CapacityConfig,
        telemetry: Arc<dyn BackendTelemetry>,
        power: Arc<dyn PowerActuator>,
        probe: Arc<dyn SyntheticProbe>,
        forecast: ForecastEngine,
        retrainer: Option<Retrainer>,
        syncer: StatusSyncer,
        traffic: TrafficStore,
        daily: DailyPredictionTracker,
        blacklist: Blacklist,
        journal: Arc<AlertJournal>,
    ) -> Self {
        let mut lifecycles = BTreeMap::new();
        for backend in &config.backends {
            let mut lifecycle = BackendLifecycle::new(config.stabilization, config.drain);
            // Backends quarantined before a restart come back unhealthy.
            if blacklist.contains(&backend.id) {
                lifecycle.set_healthy(false);
            }
            lifecycles.insert(backend.id.clone(), lifecycle);
        }
        let history = UsageHistory::new(config.thresholds);

        Self {
            config,
            telemetry,
            power,
            probe,
            forecast,
            retrainer,
            journal,
            syncer,
            traffic,
            daily,
            lifecycles,
            tracker: HealthTracker::new(),
            blacklist,
            history,
            last_published: None,
            reactive_hold: None,
            metrics: ControlMetrics::new(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wallclock source; used by tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Run the loop until shutdown.
    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            tick_secs = self.config.tick.as_secs(),
            backends = self.config.backends.len(),
            "Starting capacity loop"
        );
        let mut ticker = interval(self.config.tick);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down capacity loop");
                    break;
                }
            }
        }
    }

    /// One control round. Public for tests.
    pub async fn tick(&mut self) {
        let telemetry = self.telemetry.clone();
        let sampled = crate::telemetry::with_retries(|| {
            let telemetry = telemetry.clone();
            async move { telemetry.sample_all().await }
        })
        .await;
        let samples = match sampled {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "Backend telemetry failed, skipping capacity tick");
                self.journal.push(
                    AlertSeverity::Warning,
                    AlertCategory::SystemTelemetry,
                    "Metrics Database Unreachable",
                    format!("Capacity loop telemetry query failed: {e}"),
                );
                return;
            }
        };

        self.advance_lifecycles(&samples).await;
        self.run_health_checks().await;
        self.run_recovery_probes().await;

        let proactive_tier = self.refresh_forecast().await;

        self.record_usage(&samples);
        let signal = self.history.evaluate();

        let current = self.current_top_tier();
        match signal {
            ReactiveSignal::Overloaded => {
                let elevated = TierLadder::clamp(current as i32 + 1);
                self.reactive_hold =
                    Some(self.reactive_hold.map_or(elevated, |h| h.max(elevated)));
            }
            ReactiveSignal::Idle => self.reactive_hold = None,
            ReactiveSignal::None => {}
        }

        let effective = match (proactive_tier, self.reactive_hold) {
            (Some(p), Some(h)) => Some(p.max(h)),
            (p, h) => p.or(h),
        };
        let target = Self::resolve_target_tier(effective, current, signal);
        let trigger = if self.reactive_hold.map_or(false, |h| h > proactive_tier.unwrap_or(1)) {
            ScaleTrigger::Reactive
        } else if signal == ReactiveSignal::Idle && Some(target) != proactive_tier {
            ScaleTrigger::Reactive
        } else {
            ScaleTrigger::Proactive
        };
        self.emit_reactive_alerts(signal, current);

        self.converge_to_tier(target, trigger).await;

        let online = self
            .lifecycles
            .values()
            .filter(|lc| lc.state() == LifecycleState::On)
            .count() as i64;
        self.metrics.set_backends_online(online);

        self.publish().await;
    }

    /// Tie-break between the proactive tier and the reactive signal:
    /// overload can only elevate, idle can only depress, both within 1..=3.
    fn resolve_target_tier(
        proactive: Option<Tier>,
        current: Tier,
        signal: ReactiveSignal,
    ) -> Tier {
        let base = proactive.unwrap_or(current).max(1);
        let elevated = match signal {
            ReactiveSignal::Overloaded => base.max(TierLadder::clamp(current as i32 + 1)),
            _ => base,
        };
        let depressed = match signal {
            ReactiveSignal::Idle => elevated.min(TierLadder::clamp(current as i32 - 1)),
            _ => elevated,
        };
        TierLadder::clamp(depressed as i32)
    }

    /// Highest tier currently ON; tier 1 when nothing is on yet.
    fn current_top_tier(&self) -> Tier {
        self.config
            .backends
            .iter()
            .filter(|b| self.state_of(&b.id) == LifecycleState::On)
            .map(|b| b.tier)
            .max()
            .unwrap_or(1)
    }

    fn state_of(&self, backend_id: &str) -> LifecycleState {
        self.lifecycles
            .get(backend_id)
            .map(|lc| lc.state())
            .unwrap_or(LifecycleState::Off)
    }

    fn backend_of_tier(&self, tier: Tier) -> Option<&Backend> {
        self.config.backends.iter().find(|b| b.tier == tier)
    }

    /// Integrate lifecycle timers: STARTING→ON, DRAINING→STOPPING→OFF.
    async fn advance_lifecycles(&mut self, samples: &HashMap<String, LiveSample>) {
        let backends = self.config.backends.clone();
        for backend in &backends {
            let fresh = samples.get(&backend.address).map(|s| s.fresh).unwrap_or(false);

            let became_on = self
                .lifecycles
                .get_mut(&backend.id)
                .map(|lc| lc.try_mark_on(fresh))
                .unwrap_or(false);
            if became_on {
                info!(backend = %backend.id, "Backend stabilized and is ON");
            }

            let drained = self
                .lifecycles
                .get_mut(&backend.id)
                .map(|lc| lc.try_finish_drain())
                .unwrap_or(false);
            if drained {
                self.journal.push_with(
                    AlertSeverity::Info,
                    AlertCategory::ConnectionDraining,
                    "Connection Draining Complete",
                    format!("{} draining complete - server will be powered off", backend.id),
                    Some(backend.id.clone()),
                    Some(backend.address.clone()),
                    HashMap::new(),
                );
            }

            if self.state_of(&backend.id) == LifecycleState::Stopping {
                match self.power.set_power(&backend.id, PowerState::Off).await {
                    Ok(()) => {
                        if let Some(lc) = self.lifecycles.get_mut(&backend.id) {
                            let _ = lc.mark_off();
                        }
                        self.tracker.reset(&backend.address);
                        self.journal.push_with(
                            AlertSeverity::Success,
                            AlertCategory::ConnectionDraining,
                            "Server Gracefully Shutdown",
                            format!("{} gracefully shutdown after connection draining", backend.id),
                            Some(backend.id.clone()),
                            Some(backend.address.clone()),
                            HashMap::new(),
                        );
                    }
                    Err(e) => {
                        warn!(backend = %backend.id, error = %e, "Power-off failed, will retry");
                    }
                }
            }
        }
    }

    /// Probe every ON, healthy backend and react to exhausted streaks.
    async fn run_health_checks(&mut self) {
        let backends = self.config.backends.clone();
        for backend in &backends {
            let probe_it = self
                .lifecycles
                .get(&backend.id)
                .map(|lc| lc.state() == LifecycleState::On && lc.is_healthy())
                .unwrap_or(false);
            if !probe_it {
                continue;
            }

            let ok = self.probe.probe(&backend.address).await;
            if !ok {
                self.metrics.inc_probe_failure(&backend.id);
            }
            match self.tracker.record(&backend.address, ok) {
                ProbeOutcome::Ok => {}
                ProbeOutcome::Failing(streak) => {
                    debug!(backend = %backend.id, streak, "Probe failure streak");
                }
                ProbeOutcome::Exhausted => {
                    self.handle_probe_exhaustion(backend).await;
                }
            }
        }
    }

    async fn handle_probe_exhaustion(&mut self, failed: &Backend) {
        warn!(backend = %failed.id, "Health checks exhausted, isolating backend");
        self.journal.push_with(
            AlertSeverity::Critical,
            AlertCategory::ServerHealth,
            "Server Health Check Failed",
            format!(
                "{} ({}) failed synthetic health check - {} consecutive failures",
                failed.id,
                failed.address,
                crate::probe::FAILURE_THRESHOLD
            ),
            Some(failed.id.clone()),
            Some(failed.address.clone()),
            HashMap::new(),
        );

        if let Some(lc) = self.lifecycles.get_mut(&failed.id) {
            lc.set_healthy(false);
        }

        // A redundant backend just drops out of the candidate set; the edge
        // stops selecting it as soon as the replica lands.
        let redundant = self.config.backends.iter().any(|b| {
            b.id != failed.id
                && self
                    .lifecycles
                    .get(&b.id)
                    .map(|lc| lc.state() == LifecycleState::On && lc.is_healthy())
                    .unwrap_or(false)
        });

        if !redundant {
            // Unique target of its tier: bring a replacement online first.
            match self.find_replacement(failed) {
                Some(replacement) => {
                    self.journal.push_with(
                        AlertSeverity::Critical,
                        AlertCategory::ServerHealth,
                        "Server Failover Initiated",
                        format!(
                            "Initiating failover for {} - replacement server: {}",
                            failed.id, replacement.id
                        ),
                        Some(failed.id.clone()),
                        Some(failed.address.clone()),
                        HashMap::new(),
                    );
                    self.power_on_backend(&replacement, ScaleTrigger::Reactive, None).await;
                }
                None => {
                    self.journal.push_with(
                        AlertSeverity::Warning,
                        AlertCategory::ServerHealth,
                        "No Replacement Available",
                        format!("{} failed but no healthy replacement server available", failed.id),
                        Some(failed.id.clone()),
                        Some(failed.address.clone()),
                        HashMap::new(),
                    );
                    // Undefined in the source system: the edge keeps its
                    // last-known target and operators get a critical alert.
                    self.journal.push(
                        AlertSeverity::Critical,
                        AlertCategory::ServerHealth,
                        "Cluster Without Healthy Backend",
                        "All backends are blacklisted or failed; edge retains its last target",
                    );
                }
            }
        }

        // Quarantine and hard-reset the failed backend.
        self.blacklist.insert(failed.id.clone());
        self.journal.push_with(
            AlertSeverity::Warning,
            AlertCategory::ServerHealth,
            "Server Added to Blacklist",
            format!("{} ({}) added to failed server blacklist", failed.id, failed.address),
            Some(failed.id.clone()),
            Some(failed.address.clone()),
            HashMap::new(),
        );
        if let Err(e) = self.power.set_power(&failed.id, PowerState::Restart).await {
            warn!(backend = %failed.id, error = %e, "Hard reset failed");
        }
        if let Some(lc) = self.lifecycles.get_mut(&failed.id) {
            lc.force_off();
        }
        self.tracker.reset(&failed.address);
        self.history.clear();
    }

    /// Replacement pick from the OFF pool: same tier first, else the next
    /// tier up, else the smallest available tier. Never a blacklisted one.
    fn find_replacement(&self, failed: &Backend) -> Option<Backend> {
        let mut available: Vec<&Backend> = self
            .config
            .backends
            .iter()
            .filter(|b| {
                b.id != failed.id
                    && !self.blacklist.contains(&b.id)
                    && self.state_of(&b.id) == LifecycleState::Off
            })
            .collect();
        available.sort_by_key(|b| b.tier);

        available
            .iter()
            .find(|b| b.tier == failed.tier)
            .or_else(|| available.iter().find(|b| b.tier > failed.tier))
            .or_else(|| available.first())
            .map(|b| (*b).clone())
    }

    /// When the planned target is blacklisted, stand in another backend:
    /// one already ON or STARTING wins, else the replacement ordering.
    fn find_substitute(&self, target: &Backend) -> Option<Backend> {
        let mut active: Vec<&Backend> = self
            .config
            .backends
            .iter()
            .filter(|b| {
                b.id != target.id
                    && !self.blacklist.contains(&b.id)
                    && matches!(
                        self.state_of(&b.id),
                        LifecycleState::On | LifecycleState::Starting
                    )
            })
            .collect();
        active.sort_by_key(|b| b.tier);
        if let Some(backend) = active.last() {
            return Some((*backend).clone());
        }
        self.find_replacement(target)
    }

    /// Probe blacklisted backends; two consecutive successes delist them.
    async fn run_recovery_probes(&mut self) {
        let quarantined: Vec<Backend> = self
            .config
            .backends
            .iter()
            .filter(|b| self.blacklist.contains(&b.id))
            .cloned()
            .collect();

        for backend in quarantined {
            let ok = self.probe.probe(&backend.address).await;
            if self.tracker.record_recovery(&backend.address, ok) {
                self.blacklist.remove(&backend.id);
                if let Some(lc) = self.lifecycles.get_mut(&backend.id) {
                    lc.set_healthy(true);
                }
                self.journal.push_with(
                    AlertSeverity::Success,
                    AlertCategory::ServerHealth,
                    "Server Recovered",
                    format!(
                        "{} ({}) recovered and removed from failed server blacklist",
                        backend.id, backend.address
                    ),
                    Some(backend.id.clone()),
                    Some(backend.address.clone()),
                    HashMap::new(),
                );
            }
        }
    }

    /// Refresh the hourly forecast, recording actuals and requesting
    /// retraining on repeated failures. Returns the proactive tier.
    async fn refresh_forecast(&mut self) -> Option<Tier> {
        let now = self.now();

        // Cache expiry marks a new hour: grade the previous hour first.
        if self.forecast.current(now).is_none() {
            match self.telemetry.hourly_request_count().await {
                Ok(count) => {
                    let prev_hour = (now - ChronoDuration::hours(1))
                        .with_minute(0)
                        .and_then(|t| t.with_second(0))
                        .and_then(|t| t.with_nanosecond(0))
                        .unwrap_or(now);
                    if let Err(e) = self.traffic.record(prev_hour, count) {
                        warn!(error = %e, "Could not persist hourly traffic");
                    }
                    let _ = self.daily.roll_over_if_new_day(now);
                    if let Err(e) = self.daily.update_actual(prev_hour, count) {
                        warn!(error = %e, "Could not grade previous forecast");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Hourly request count unavailable");
                }
            }
        }

        let history = self.traffic.last_hours(LOOK_BACK_HOURS);
        match self.forecast.hourly_forecast(now, &history).await {
            Ok(ForecastOutcome::Cached(forecast)) => {
                Some(self.config.ladder.tier_for(forecast.value))
            }
            Ok(ForecastOutcome::Fresh(forecast)) => {
                if let Err(e) = self.daily.add_prediction(now, forecast.value as u64) {
                    warn!(error = %e, "Could not record prediction");
                }
                self.metrics.set_forecast(forecast.value);
                // A new hour's forecast supersedes any reactive elevation.
                self.reactive_hold = None;
                Some(self.config.ladder.tier_for(forecast.value))
            }
            Ok(ForecastOutcome::Reused { forecast, retrain_due }) => {
                self.journal.push(
                    AlertSeverity::Warning,
                    AlertCategory::ForecastModel,
                    "Forecast Generation Failed",
                    "Traffic forecast failed - reusing previous cached value",
                );
                if retrain_due {
                    self.journal.push(
                        AlertSeverity::Critical,
                        AlertCategory::ForecastModel,
                        "Forecast Model Degraded",
                        "Two consecutive forecast failures - retraining scheduled",
                    );
                    if let Some(retrainer) = &self.retrainer {
                        let series: Vec<f64> =
                            self.traffic.all().iter().map(|e| e.requests as f64).collect();
                        retrainer.request(series);
                    }
                }
                Some(self.config.ladder.tier_for(forecast.value))
            }
            Err(e) => {
                warn!(error = %e, "No forecast available");
                None
            }
        }
    }

    /// Record the cluster-average load of stable, non-draining backends.
    fn record_usage(&mut self, samples: &HashMap<String, LiveSample>) {
        let mut readings = Vec::new();
        for backend in &self.config.backends {
            if self.state_of(&backend.id) != LifecycleState::On {
                continue;
            }
            if let Some(sample) = samples.get(&backend.address) {
                if sample.fresh {
                    readings.push((sample.cpu_pct, sample.memory_pct));
                }
            }
        }
        if readings.is_empty() {
            return;
        }
        let n = readings.len() as f64;
        let cpu = readings.iter().map(|(c, _)| c).sum::<f64>() / n;
        let memory = readings.iter().map(|(_, m)| m).sum::<f64>() / n;
        self.history.record(cpu, memory);
    }

    fn emit_reactive_alerts(&mut self, signal: ReactiveSignal, current: Tier) {
        match signal {
            ReactiveSignal::Overloaded => {
                if let Some((cpu, memory)) = self.history.recent_averages() {
                    let t = &self.config.thresholds;
                    if cpu >= t.high_cpu {
                        self.journal.push(
                            AlertSeverity::Warning,
                            AlertCategory::ResourceThreshold,
                            "High CPU Usage Detected",
                            format!(
                                "Sustained CPU at {cpu:.1}% (threshold: {:.1}%) on tier {current}",
                                t.high_cpu
                            ),
                        );
                    }
                    if memory >= t.high_memory {
                        self.journal.push(
                            AlertSeverity::Warning,
                            AlertCategory::ResourceThreshold,
                            "High Memory Usage Detected",
                            format!(
                                "Sustained memory at {memory:.1}% (threshold: {:.1}%) on tier {current}",
                                t.high_memory
                            ),
                        );
                    }
                }
            }
            ReactiveSignal::Idle => {
                self.journal.push(
                    AlertSeverity::Info,
                    AlertCategory::ResourceThreshold,
                    "Low Resource Utilization",
                    "Sustained low load for 30 minutes - scale down opportunity",
                );
            }
            ReactiveSignal::None => {}
        }
    }

    /// Schedule the minimal transitions toward the target tier. The target
    /// backend powers up first; only once it is ON do others drain.
    async fn converge_to_tier(&mut self, target_tier: Tier, trigger: ScaleTrigger) {
        let Some(mut target) = self.backend_of_tier(target_tier).cloned() else { return };

        // A blacklisted target is substituted exactly like a failed one.
        if self.blacklist.contains(&target.id) {
            match self.find_substitute(&target) {
                Some(substitute) => target = substitute,
                None => {
                    let any_on = self
                        .lifecycles
                        .values()
                        .any(|lc| lc.state() == LifecycleState::On);
                    if !any_on {
                        self.journal.push(
                            AlertSeverity::Critical,
                            AlertCategory::ServerHealth,
                            "Cluster Without Healthy Backend",
                            "All backends are blacklisted; edge retains its last target",
                        );
                    }
                    return;
                }
            }
        }

        match self.state_of(&target.id) {
            LifecycleState::Off => {
                let forecast_value = self.forecast.current(self.now()).map(|f| f.value);
                self.power_on_backend(&target, trigger, forecast_value).await;
            }
            LifecycleState::Starting | LifecycleState::Stopping => {
                // Wait for the in-flight transition.
            }
            LifecycleState::Draining => {
                // The plan flipped mid-drain; let the drain complete and
                // power the backend back up on a later cycle.
            }
            LifecycleState::On => {
                self.drain_out_of_tier(&target, trigger).await;
            }
        }
    }

    async fn power_on_backend(
        &mut self,
        backend: &Backend,
        trigger: ScaleTrigger,
        forecast_value: Option<f64>,
    ) {
        if self.state_of(&backend.id) != LifecycleState::Off {
            return;
        }

        if let Err(e) = self.power.set_power(&backend.id, PowerState::On).await {
            warn!(backend = %backend.id, error = %e, "Power-on failed");
            return;
        }
        if let Some(lc) = self.lifecycles.get_mut(&backend.id) {
            let _ = lc.power_on();
        }
        self.history.clear();
        self.metrics.inc_scale_action(
            match trigger {
                ScaleTrigger::Proactive => "proactive",
                ScaleTrigger::Reactive => "reactive",
            },
            "up",
        );

        let (severity, title, message) = match trigger {
            ScaleTrigger::Proactive => (
                AlertSeverity::Success,
                "Proactive Scale-Up",
                format!(
                    "{} powered on proactively based on traffic forecast of {} requests/hour",
                    backend.id,
                    forecast_value.map(|v| v as u64).unwrap_or(0)
                ),
            ),
            ScaleTrigger::Reactive => (
                AlertSeverity::Warning,
                "Reactive Scale-Up",
                format!("{} powered on reactively - sustained threshold breach", backend.id),
            ),
        };
        self.journal.push_with(
            severity,
            AlertCategory::ServerPower,
            title,
            message,
            Some(backend.id.clone()),
            Some(backend.address.clone()),
            HashMap::new(),
        );
    }

    /// Drain every other ON backend now that the target is ON.
    async fn drain_out_of_tier(&mut self, target: &Backend, trigger: ScaleTrigger) {
        let outgoing: Vec<Backend> = self
            .config
            .backends
            .iter()
            .filter(|b| b.id != target.id && self.state_of(&b.id) == LifecycleState::On)
            .cloned()
            .collect();

        for backend in outgoing {
            let began = self
                .lifecycles
                .get_mut(&backend.id)
                .map(|lc| lc.begin_drain().is_ok())
                .unwrap_or(false);
            if !began {
                continue;
            }
            self.history.clear();
            self.metrics.inc_scale_action(
                match trigger {
                    ScaleTrigger::Proactive => "proactive",
                    ScaleTrigger::Reactive => "reactive",
                },
                "down",
            );
            self.journal.push_with(
                AlertSeverity::Info,
                AlertCategory::ConnectionDraining,
                "Connection Draining Started",
                format!(
                    "{} entering connection draining mode - excluded from load balancer",
                    backend.id
                ),
                Some(backend.id.clone()),
                Some(backend.address.clone()),
                HashMap::new(),
            );
            let (severity, title) = match trigger {
                ScaleTrigger::Proactive => (AlertSeverity::Success, "Proactive Scale-Down"),
                ScaleTrigger::Reactive => (AlertSeverity::Info, "Reactive Scale-Down"),
            };
            self.journal.push_with(
                severity,
                AlertCategory::ServerPower,
                title,
                format!("{} will power off after the drain window", backend.id),
                Some(backend.id.clone()),
                Some(backend.address.clone()),
                HashMap::new(),
            );
        }
    }

    /// Write and ship the status document when it changed; heartbeat when not.
    async fn publish(&mut self) {
        let states: Vec<_> = self
            .config
            .backends
            .iter()
            .map(|b| {
                let published = self
                    .lifecycles
                    .get(&b.id)
                    .map(|lc| lc.published_state())
                    .unwrap_or_default();
                (b, published)
            })
            .collect();
        let document = StatusDocument::from_states(states.iter().map(|(b, s)| (*b, s)));

        let changed = self.last_published.as_ref() != Some(&document);
        if changed {
            if let Err(e) = document.save(&self.config.status_path) {
                warn!(error = %e, "Could not write status document");
                return;
            }
            self.last_published = Some(document);
            if let Err(e) = self.syncer.ship(&self.config.status_path).await {
                self.journal.push(
                    AlertSeverity::Warning,
                    AlertCategory::SystemTelemetry,
                    "Status Sync Failed",
                    format!("Failed to sync server status to the edge - {e}"),
                );
            }
        } else if let Err(e) = self.syncer.heartbeat(&self.config.status_path).await {
            warn!(error = %e, "Status heartbeat failed");
        }
    }

    /// Lifecycle state of one backend, for tests and the API.
    pub fn lifecycle_state(&self, backend_id: &str) -> Option<LifecycleState> {
        self.lifecycles.get(backend_id).map(|lc| lc.state())
    }

    /// Whether a backend is currently blacklisted.
    pub fn is_blacklisted(&self, backend_id: &str) -> bool {
        self.blacklist.contains(backend_id)
    }
}
