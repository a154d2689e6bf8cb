//! Three-tier capacity ladder
//!
//! The forecast-requests axis is partitioned into three half-open intervals
//! `[0, b0) [b0, b1) [b1, ∞)`. A value on a boundary belongs to the interval
//! it is the lower endpoint of.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::Tier;

/// Tier boundaries in requests per hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierLadder {
    /// Lower endpoint of tier 2.
    pub tier2_from: f64,
    /// Lower endpoint of tier 3.
    pub tier3_from: f64,
}

impl Default for TierLadder {
    fn default() -> Self {
        Self { tier2_from: 140_000.0, tier3_from: 420_000.0 }
    }
}

impl TierLadder {
    pub fn new(tier2_from: f64, tier3_from: f64) -> Result<Self> {
        if !(tier2_from > 0.0 && tier3_from > tier2_from) {
            anyhow::bail!(
                "tier boundaries must satisfy 0 < tier2_from < tier3_from, got {tier2_from} / {tier3_from}"
            );
        }
        Ok(Self { tier2_from, tier3_from })
    }

    /// The unique tier whose interval contains `forecast_value`.
    pub fn tier_for(&self, forecast_value: f64) -> Tier {
        if forecast_value < self.tier2_from {
            1
        } else if forecast_value < self.tier3_from {
            2
        } else {
            3
        }
    }

    /// Clamp an arbitrary tier arithmetic result into the ladder.
    pub fn clamp(tier: i32) -> Tier {
        tier.clamp(1, 3) as Tier
    }
}
