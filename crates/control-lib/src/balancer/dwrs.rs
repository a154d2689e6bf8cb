//! Dynamic Weighted Random Selection
//!
//! Maps per-backend CPU/memory load to an integer weight and picks a target
//! with probability proportional to its weight. The random draw is injected
//! so selection is a pure function of `(candidates, samples, pick)`.

use crate::models::LiveSample;

/// Share of the comprehensive load contributed by CPU.
pub const CPU_WEIGHT: f64 = 0.55;

/// Share of the comprehensive load contributed by memory.
pub const MEMORY_WEIGHT: f64 = 0.45;

/// A weighed backend eligible for selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub address: String,
    pub load: f64,
    pub weight: u64,
}

/// Weighted average of CPU and memory utilisation, in percent.
pub fn comprehensive_load(sample: &LiveSample) -> f64 {
    sample.cpu_pct * CPU_WEIGHT + sample.memory_pct * MEMORY_WEIGHT
}

/// Convert a load percentage to a selection weight in `1..=100`.
///
/// A saturated backend still gets weight 1 so it stays reachable when it is
/// the only candidate.
pub fn load_to_weight(load: f64) -> u64 {
    if load >= 100.0 {
        return 1;
    }
    (100 - load.floor() as i64).max(1) as u64
}

/// Weigh each `(address, sample)` pair. Caller supplies a stable order.
pub fn weigh<'a>(
    candidates: impl IntoIterator<Item = (&'a str, &'a LiveSample)>,
) -> Vec<Candidate> {
    candidates
        .into_iter()
        .map(|(address, sample)| {
            let load = comprehensive_load(sample);
            Candidate {
                address: address.to_string(),
                load,
                weight: load_to_weight(load),
            }
        })
        .collect()
}

/// Pick the candidate whose cumulative weight first reaches `pick`.
///
/// `pick` must be drawn uniformly from `1..=total_weight`. With a single
/// candidate the pick is ignored. Returns `None` for an empty set.
pub fn select(candidates: &[Candidate], pick: u64) -> Option<&Candidate> {
    match candidates {
        [] => None,
        [only] => Some(only),
        _ => {
            let mut cumulative = 0u64;
            for candidate in candidates {
                cumulative += candidate.weight;
                if cumulative >= pick {
                    return Some(candidate);
                }
            }
            // pick > total weight; callers drawing within bounds never get here.
            candidates.last()
        }
    }
}

/// Sum of all candidate weights, the upper bound of the uniform draw.
pub fn total_weight(candidates: &[Candidate]) -> u64 {
    candidates.iter().map(|c| c.weight).sum()
}
