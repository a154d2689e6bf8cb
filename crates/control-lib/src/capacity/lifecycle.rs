//! Per-backend lifecycle state machine
//!
//! States: OFF → STARTING → ON → DRAINING → STOPPING → OFF. Transitions for
//! one backend are totally ordered; a health flip alone never changes power.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::models::BackendState;

/// Power/lifecycle state of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Off,
    Starting,
    On,
    Draining,
    Stopping,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Off => write!(f, "off"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::On => write!(f, "on"),
            LifecycleState::Draining => write!(f, "draining"),
            LifecycleState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Tracks one backend's lifecycle and the timers gating its transitions.
#[derive(Debug, Clone)]
pub struct BackendLifecycle {
    state: LifecycleState,
    healthy: bool,
    /// When STARTING began; release after the stabilization window and a
    /// fresh sample.
    started_at: Option<Instant>,
    /// When DRAINING began; release to STOPPING after the drain window.
    draining_since: Option<Instant>,
    stabilization: Duration,
    drain: Duration,
}

impl BackendLifecycle {
    pub fn new(stabilization: Duration, drain: Duration) -> Self {
        Self {
            state: LifecycleState::Off,
            healthy: true,
            started_at: None,
            draining_since: None,
            stabilization,
            drain,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Health is orthogonal to power: flipping it keeps the state.
    pub fn set_healthy(&mut self, healthy: bool) {
        self.healthy = healthy;
    }

    /// The BackendState published to the edge for this lifecycle state.
    pub fn published_state(&self) -> BackendState {
        let active = matches!(
            self.state,
            LifecycleState::Starting | LifecycleState::On | LifecycleState::Draining
        );
        BackendState {
            active,
            draining: self.state == LifecycleState::Draining,
            healthy: self.healthy,
        }
    }

    /// OFF → STARTING on a scale-up directive.
    pub fn power_on(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Off => {
                self.state = LifecycleState::Starting;
                self.started_at = Some(Instant::now());
                Ok(())
            }
            other => anyhow::bail!("cannot power on from {other}"),
        }
    }

    /// STARTING → ON once stabilization elapsed and a fresh sample arrived.
    pub fn try_mark_on(&mut self, has_fresh_sample: bool) -> bool {
        if self.state != LifecycleState::Starting {
            return false;
        }
        let stabilized = self
            .started_at
            .map(|at| at.elapsed() >= self.stabilization)
            .unwrap_or(false);
        if stabilized && has_fresh_sample {
            self.state = LifecycleState::On;
            self.started_at = None;
            return true;
        }
        false
    }

    /// ON → DRAINING on a scale-down directive or tier downgrade.
    pub fn begin_drain(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::On => {
                self.state = LifecycleState::Draining;
                self.draining_since = Some(Instant::now());
                Ok(())
            }
            other => anyhow::bail!("cannot drain from {other}"),
        }
    }

    /// DRAINING → STOPPING after the drain window.
    pub fn try_finish_drain(&mut self) -> bool {
        if self.state != LifecycleState::Draining {
            return false;
        }
        let drained = self
            .draining_since
            .map(|at| at.elapsed() >= self.drain)
            .unwrap_or(false);
        if drained {
            self.state = LifecycleState::Stopping;
            self.draining_since = None;
            return true;
        }
        false
    }

    /// STOPPING → OFF when the power actuation completed.
    pub fn mark_off(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Stopping => {
                self.state = LifecycleState::Off;
                Ok(())
            }
            other => anyhow::bail!("cannot complete power-off from {other}"),
        }
    }

    /// Forced OFF after a hard reset of a failed backend.
    pub fn force_off(&mut self) {
        self.state = LifecycleState::Off;
        self.started_at = None;
        self.draining_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> BackendLifecycle {
        BackendLifecycle::new(Duration::from_millis(0), Duration::from_millis(0))
    }

    #[test]
    fn full_cycle() {
        let mut lc = lifecycle();
        assert_eq!(lc.state(), LifecycleState::Off);

        lc.power_on().unwrap();
        assert_eq!(lc.state(), LifecycleState::Starting);

        assert!(lc.try_mark_on(true));
        assert_eq!(lc.state(), LifecycleState::On);

        lc.begin_drain().unwrap();
        assert_eq!(lc.state(), LifecycleState::Draining);

        assert!(lc.try_finish_drain());
        assert_eq!(lc.state(), LifecycleState::Stopping);

        lc.mark_off().unwrap();
        assert_eq!(lc.state(), LifecycleState::Off);
    }

    #[test]
    fn starting_needs_fresh_sample() {
        let mut lc = lifecycle();
        lc.power_on().unwrap();
        assert!(!lc.try_mark_on(false));
        assert_eq!(lc.state(), LifecycleState::Starting);
        assert!(lc.try_mark_on(true));
    }

    #[tokio::test(start_paused = true)]
    async fn stabilization_window_gates_on() {
        let mut lc = BackendLifecycle::new(Duration::from_secs(80), Duration::from_secs(30));
        lc.power_on().unwrap();

        assert!(!lc.try_mark_on(true));
        tokio::time::advance(Duration::from_secs(81)).await;
        assert!(lc.try_mark_on(true));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_window_gates_stop() {
        let mut lc = BackendLifecycle::new(Duration::from_secs(0), Duration::from_secs(30));
        lc.power_on().unwrap();
        lc.try_mark_on(true);
        lc.begin_drain().unwrap();

        assert!(!lc.try_finish_drain());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(lc.try_finish_drain());
    }

    #[test]
    fn invalid_transitions_rejected() {
        let mut lc = lifecycle();
        assert!(lc.begin_drain().is_err());
        assert!(lc.mark_off().is_err());

        lc.power_on().unwrap();
        assert!(lc.power_on().is_err());
    }

    #[test]
    fn health_flip_keeps_power_state() {
        let mut lc = lifecycle();
        lc.power_on().unwrap();
        lc.try_mark_on(true);

        lc.set_healthy(false);
        assert_eq!(lc.state(), LifecycleState::On);
        assert!(!lc.published_state().healthy);
    }

    #[test]
    fn published_state_upholds_draining_implies_active() {
        let mut lc = lifecycle();
        for _ in 0..2 {
            let published = lc.published_state();
            assert!(!published.draining || published.active);
            lc.power_on().unwrap();
            lc.try_mark_on(true);
            lc.begin_drain().unwrap();
            let published = lc.published_state();
            assert!(published.draining && published.active);
            lc.try_finish_drain();
            lc.mark_off().unwrap();
        }
    }
}
