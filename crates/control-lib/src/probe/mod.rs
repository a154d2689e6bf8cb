//! Synthetic health probing
//!
//! Issues a plain HTTP GET against each powered-on backend and tracks
//! consecutive failures. Three failures in a row mark a backend unhealthy;
//! a blacklisted backend needs two consecutive successes to be delisted.

mod blacklist;

pub use blacklist::Blacklist;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

/// Consecutive probe failures before a backend is declared unhealthy.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Consecutive probe successes before a blacklisted backend is delisted.
pub const RECOVERY_THRESHOLD: u32 = 2;

/// A synthetic check against one backend.
#[async_trait]
pub trait SyntheticProbe: Send + Sync {
    /// True when the backend served the probe acceptably.
    async fn probe(&self, address: &str) -> bool;
}

/// HTTP GET probe against the backend's service port.
pub struct HttpProbe {
    client: reqwest::Client,
    port: u16,
    path: String,
}

impl HttpProbe {
    pub fn new(port: u16, path: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, port, path: path.into() })
    }
}

#[async_trait]
impl SyntheticProbe for HttpProbe {
    async fn probe(&self, address: &str) -> bool {
        let url = format!("http://{}:{}{}", address, self.port, self.path);
        match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status();
                // Server errors fail the probe; anything else (including
                // auth or redirect noise) proves the server is alive.
                let ok = !status.is_server_error();
                if !ok {
                    debug!(%address, status = %status, "Probe returned server error");
                }
                ok
            }
            Err(e) => {
                debug!(%address, error = %e, "Probe transport failure");
                false
            }
        }
    }
}

/// Outcome of recording one probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Probe succeeded; any streak was cleared.
    Ok,
    /// Probe failed but the threshold has not been reached.
    Failing(u32),
    /// The failure threshold was just crossed.
    Exhausted,
}

/// Tracks per-backend failure and recovery streaks.
#[derive(Debug, Default)]
pub struct HealthTracker {
    failures: HashMap<String, u32>,
    recoveries: HashMap<String, u32>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a routine probe of an active backend.
    pub fn record(&mut self, address: &str, success: bool) -> ProbeOutcome {
        if success {
            self.failures.remove(address);
            return ProbeOutcome::Ok;
        }
        let streak = self.failures.entry(address.to_string()).or_insert(0);
        *streak += 1;
        if *streak == FAILURE_THRESHOLD {
            ProbeOutcome::Exhausted
        } else {
            ProbeOutcome::Failing(*streak)
        }
    }

    /// Record a probe of a blacklisted backend. Returns true once the
    /// recovery threshold of consecutive successes is met.
    pub fn record_recovery(&mut self, address: &str, success: bool) -> bool {
        if !success {
            self.recoveries.remove(address);
            return false;
        }
        let streak = self.recoveries.entry(address.to_string()).or_insert(0);
        *streak += 1;
        if *streak >= RECOVERY_THRESHOLD {
            self.recoveries.remove(address);
            self.failures.remove(address);
            true
        } else {
            false
        }
    }

    /// Forget all streaks for a backend (e.g. after power-off).
    pub fn reset(&mut self, address: &str) {
        self.failures.remove(address);
        self.recoveries.remove(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_failures_exhaust() {
        let mut tracker = HealthTracker::new();
        assert_eq!(tracker.record("10.0.0.1", false), ProbeOutcome::Failing(1));
        assert_eq!(tracker.record("10.0.0.1", false), ProbeOutcome::Failing(2));
        assert_eq!(tracker.record("10.0.0.1", false), ProbeOutcome::Exhausted);
    }

    #[test]
    fn success_clears_streak() {
        let mut tracker = HealthTracker::new();
        tracker.record("10.0.0.1", false);
        tracker.record("10.0.0.1", false);
        assert_eq!(tracker.record("10.0.0.1", true), ProbeOutcome::Ok);
        assert_eq!(tracker.record("10.0.0.1", false), ProbeOutcome::Failing(1));
    }

    #[test]
    fn streaks_are_per_backend() {
        let mut tracker = HealthTracker::new();
        tracker.record("10.0.0.1", false);
        tracker.record("10.0.0.1", false);
        assert_eq!(tracker.record("10.0.0.2", false), ProbeOutcome::Failing(1));
    }

    #[test]
    fn recovery_needs_two_consecutive_successes() {
        let mut tracker = HealthTracker::new();
        assert!(!tracker.record_recovery("10.0.0.1", true));
        assert!(tracker.record_recovery("10.0.0.1", true));
    }

    #[test]
    fn recovery_streak_resets_on_failure() {
        let mut tracker = HealthTracker::new();
        assert!(!tracker.record_recovery("10.0.0.1", true));
        assert!(!tracker.record_recovery("10.0.0.1", false));
        assert!(!tracker.record_recovery("10.0.0.1", true));
        assert!(tracker.record_recovery("10.0.0.1", true));
    }
}
