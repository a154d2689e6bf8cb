//! Observability for the control plane
//!
//! Prometheus gauges and counters registered once in a global registry; the
//! controller's `/metrics` endpoint exposes them. Handles are cheap clones
//! over the same underlying metrics.

use prometheus::{
    register_gauge, register_gauge_vec, register_int_counter_vec, register_int_gauge, Gauge,
    GaugeVec, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;

static GLOBAL_METRICS: OnceLock<ControlMetricsInner> = OnceLock::new();

struct ControlMetricsInner {
    forecast_requests_per_hour: Gauge,
    backends_online: IntGauge,
    scale_actions_total: IntCounterVec,
    probe_failures_total: IntCounterVec,
    path_model_mape: GaugeVec,
    path_window_bytes: GaugeVec,
    weight_pushes_total: IntCounterVec,
}

impl ControlMetricsInner {
    fn new() -> Self {
        Self {
            forecast_requests_per_hour: register_gauge!(
                "fabric_forecast_requests_per_hour",
                "Most recent hourly traffic forecast"
            )
            .expect("Failed to register forecast_requests_per_hour"),

            backends_online: register_int_gauge!(
                "fabric_backends_online",
                "Backends currently in the ON lifecycle state"
            )
            .expect("Failed to register backends_online"),

            scale_actions_total: register_int_counter_vec!(
                "fabric_scale_actions_total",
                "Scale movements by trigger and direction",
                &["trigger", "direction"]
            )
            .expect("Failed to register scale_actions_total"),

            probe_failures_total: register_int_counter_vec!(
                "fabric_probe_failures_total",
                "Synthetic health probe failures per backend",
                &["backend"]
            )
            .expect("Failed to register probe_failures_total"),

            path_model_mape: register_gauge_vec!(
                "fabric_path_model_mape",
                "Mean absolute percentage error per path model",
                &["path"]
            )
            .expect("Failed to register path_model_mape"),

            path_window_bytes: register_gauge_vec!(
                "fabric_path_window_bytes",
                "Bytes observed on each path in the last window",
                &["path"]
            )
            .expect("Failed to register path_window_bytes"),

            weight_pushes_total: register_int_counter_vec!(
                "fabric_weight_pushes_total",
                "Path-selection document pushes by outcome",
                &["outcome"]
            )
            .expect("Failed to register weight_pushes_total"),
        }
    }
}

/// Handle onto the global control-plane metrics.
#[derive(Clone)]
pub struct ControlMetrics {
    _private: (),
}

impl Default for ControlMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControlMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControlMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn set_forecast(&self, requests_per_hour: f64) {
        self.inner().forecast_requests_per_hour.set(requests_per_hour);
    }

    pub fn set_backends_online(&self, count: i64) {
        self.inner().backends_online.set(count);
    }

    pub fn inc_scale_action(&self, trigger: &str, direction: &str) {
        self.inner()
            .scale_actions_total
            .with_label_values(&[trigger, direction])
            .inc();
    }

    pub fn inc_probe_failure(&self, backend: &str) {
        self.inner()
            .probe_failures_total
            .with_label_values(&[backend])
            .inc();
    }

    pub fn set_path_mape(&self, path: &str, mape: f64) {
        self.inner().path_model_mape.with_label_values(&[path]).set(mape);
    }

    pub fn set_path_window_bytes(&self, path: &str, bytes: f64) {
        self.inner().path_window_bytes.with_label_values(&[path]).set(bytes);
    }

    pub fn inc_weight_push(&self, outcome: &str) {
        self.inner()
            .weight_pushes_total
            .with_label_values(&[outcome])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_handle_updates_do_not_panic() {
        let metrics = ControlMetrics::new();
        metrics.set_forecast(123_456.0);
        metrics.set_backends_online(2);
        metrics.inc_scale_action("proactive", "up");
        metrics.inc_probe_failure("vm-tier1");
        metrics.set_path_mape("leaf1-spine1-leaf6", 0.12);
        metrics.set_path_window_bytes("leaf1-spine1-leaf6", 4_000_000.0);
        metrics.inc_weight_push("success");

        // A second handle shares the same registry.
        let again = ControlMetrics::new();
        again.set_backends_online(3);
    }
}
