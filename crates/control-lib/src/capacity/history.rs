//! Sliding usage history for reactive scaling
//!
//! Stores per-tick cluster-average CPU/memory readings and evaluates the two
//! sustained-threshold rules: every sample high for 5 minutes scales up,
//! every sample low for 30 minutes scales down. Backends without fresh
//! telemetry contribute nothing, so thin evidence never triggers an action.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Threshold configuration for the reactive rules.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub high_cpu: f64,
    pub high_memory: f64,
    pub low_cpu: f64,
    pub low_memory: f64,
    pub high_window: Duration,
    pub low_window: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high_cpu: 90.0,
            high_memory: 90.0,
            low_cpu: 3.0,
            low_memory: 20.0,
            high_window: Duration::from_secs(5 * 60),
            low_window: Duration::from_secs(30 * 60),
        }
    }
}

/// Outcome of a reactive evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactiveSignal {
    /// Sustained saturation: elevate the target tier by one.
    Overloaded,
    /// Sustained idleness: depress the target tier by one.
    Idle,
    /// Not enough evidence either way.
    None,
}

#[derive(Debug, Clone, Copy)]
struct Record {
    at: Instant,
    cpu: f64,
    memory: f64,
}

/// Bounded history of cluster-average load samples.
pub struct UsageHistory {
    records: VecDeque<Record>,
    thresholds: Thresholds,
    /// Records older than this are trimmed.
    retention: Duration,
}

impl UsageHistory {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            records: VecDeque::new(),
            thresholds,
            retention: Duration::from_secs(60 * 60),
        }
    }

    /// Record one tick's cluster-average reading.
    pub fn record(&mut self, cpu: f64, memory: f64) {
        self.records.push_back(Record { at: Instant::now(), cpu, memory });
        if let Some(cutoff) = Instant::now().checked_sub(self.retention) {
            while self.records.front().map(|r| r.at < cutoff).unwrap_or(false) {
                self.records.pop_front();
            }
        }
    }

    /// History is wiped after any scaling action so the stabilization period
    /// starts from a clean slate.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn window(&self, span: Duration) -> Option<Vec<&Record>> {
        let now = Instant::now();
        let start = now.checked_sub(span)?;
        let in_window: Vec<&Record> = self.records.iter().filter(|r| r.at >= start).collect();

        // The window only counts once its oldest record actually spans it;
        // otherwise a single fresh sample would satisfy "every sample".
        let covered = self
            .records
            .front()
            .map(|oldest| now.duration_since(oldest.at) >= span)
            .unwrap_or(false);
        if !covered || in_window.is_empty() {
            return None;
        }
        Some(in_window)
    }

    /// Evaluate both sustained rules. Overload wins when both would fire.
    pub fn evaluate(&self) -> ReactiveSignal {
        let t = &self.thresholds;

        if let Some(window) = self.window(t.high_window) {
            let all_high = window
                .iter()
                .all(|r| r.cpu >= t.high_cpu || r.memory >= t.high_memory);
            if all_high {
                return ReactiveSignal::Overloaded;
            }
        }

        if let Some(window) = self.window(t.low_window) {
            let all_low = window
                .iter()
                .all(|r| r.cpu <= t.low_cpu && r.memory <= t.low_memory);
            if all_low {
                return ReactiveSignal::Idle;
            }
        }

        ReactiveSignal::None
    }

    /// Most recent averages over the high window, for alert context.
    pub fn recent_averages(&self) -> Option<(f64, f64)> {
        let window = self.window(self.thresholds.high_window)?;
        let n = window.len() as f64;
        let cpu = window.iter().map(|r| r.cpu).sum::<f64>() / n;
        let memory = window.iter().map(|r| r.memory).sum::<f64>() / n;
        Some((cpu, memory))
    }
}
