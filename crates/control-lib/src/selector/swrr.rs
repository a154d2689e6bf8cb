//! Smooth Weighted Round Robin
//!
//! Effective weights are the route ratios scaled to 100. Each selection adds
//! the effective weights to the accumulators, picks the larger, and subtracts
//! the total from the winner, which yields weight-proportional selection
//! without bursts.

use std::collections::HashMap;
use std::sync::Mutex;

/// SWRR state for one route's two paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmoothWrr {
    current: [i64; 2],
    effective: [i64; 2],
}

impl SmoothWrr {
    /// Build from a ratio pair; degenerate input falls back to an even split.
    pub fn from_ratios(ratios: [f64; 2]) -> Self {
        let sum = ratios[0] + ratios[1];
        let (r0, r1) = if sum <= 0.0 || !sum.is_finite() {
            (0.5, 0.5)
        } else {
            (ratios[0] / sum, ratios[1] / sum)
        };
        Self {
            current: [0, 0],
            effective: [(r0 * 100.0).round() as i64, (r1 * 100.0).round() as i64],
        }
    }

    /// Select the next path index.
    pub fn select(&mut self) -> usize {
        let total = self.effective[0] + self.effective[1];
        self.current[0] += self.effective[0];
        self.current[1] += self.effective[1];

        let selected = if self.current[0] > self.current[1] { 0 } else { 1 };
        self.current[selected] -= total;
        selected
    }

    /// Accumulators back to zero; effective weights are kept.
    pub fn reset(&mut self) {
        self.current = [0, 0];
    }

    pub fn effective_weights(&self) -> [i64; 2] {
        self.effective
    }
}

/// Per-route SWRR table guarded for concurrent selectors.
pub struct SwrrTable {
    routes: Mutex<HashMap<String, SmoothWrr>>,
}

impl Default for SwrrTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SwrrTable {
    pub fn new() -> Self {
        Self { routes: Mutex::new(HashMap::new()) }
    }

    /// Select a path for `route`; unknown routes start at an even split.
    pub fn select(&self, route: &str) -> usize {
        let mut routes = self.routes.lock().unwrap();
        routes
            .entry(route.to_string())
            .or_insert_with(|| SmoothWrr::from_ratios([0.5, 0.5]))
            .select()
    }

    /// Install new ratios for a route and reset its accumulator so new flows
    /// see the distribution immediately.
    pub fn set_ratios(&self, route: &str, ratios: [f64; 2]) {
        let mut routes = self.routes.lock().unwrap();
        routes.insert(route.to_string(), SmoothWrr::from_ratios(ratios));
    }

    /// Accumulators of one route, for tests.
    pub fn accumulators(&self, route: &str) -> Option<[i64; 2]> {
        let routes = self.routes.lock().unwrap();
        routes.get(route).map(|s| s.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frequencies(swrr: &mut SmoothWrr, n: usize) -> [usize; 2] {
        let mut counts = [0usize; 2];
        for _ in 0..n {
            counts[swrr.select()] += 1;
        }
        counts
    }

    #[test]
    fn even_split_alternates() {
        let mut swrr = SmoothWrr::from_ratios([0.5, 0.5]);
        let counts = frequencies(&mut swrr, 100);
        assert_eq!(counts, [50, 50]);
    }

    #[test]
    fn eighty_twenty_long_run_frequency() {
        let mut swrr = SmoothWrr::from_ratios([0.2, 0.8]);
        let counts = frequencies(&mut swrr, 100);
        assert_eq!(counts[0], 20);
        assert_eq!(counts[1], 80);
    }

    #[test]
    fn selection_is_smooth_not_bursty() {
        // With 0.2/0.8 the minority path must never be chosen twice in a row.
        let mut swrr = SmoothWrr::from_ratios([0.2, 0.8]);
        let mut previous = None;
        for _ in 0..200 {
            let pick = swrr.select();
            if pick == 0 {
                assert_ne!(previous, Some(0), "minority path picked consecutively");
            }
            previous = Some(pick);
        }
    }

    #[test]
    fn degenerate_ratios_fall_back_to_even() {
        let swrr = SmoothWrr::from_ratios([0.0, 0.0]);
        assert_eq!(swrr.effective_weights(), [50, 50]);
        let swrr = SmoothWrr::from_ratios([f64::NAN, 0.5]);
        assert_eq!(swrr.effective_weights(), [50, 50]);
    }

    #[test]
    fn reset_zeroes_accumulators_only() {
        let mut swrr = SmoothWrr::from_ratios([0.3, 0.7]);
        swrr.select();
        swrr.select();
        swrr.reset();
        assert_eq!(swrr.current, [0, 0]);
        assert_eq!(swrr.effective_weights(), [30, 70]);
    }

    #[test]
    fn table_set_ratios_resets_accumulators() {
        let table = SwrrTable::new();
        table.select("leaf1->leaf6");
        table.select("leaf1->leaf6");
        assert_ne!(table.accumulators("leaf1->leaf6"), Some([0, 0]));

        table.set_ratios("leaf1->leaf6", [0.9, 0.1]);
        assert_eq!(table.accumulators("leaf1->leaf6"), Some([0, 0]));
    }

    #[test]
    fn table_applies_new_distribution_to_selections() {
        let table = SwrrTable::new();
        table.set_ratios("r", [0.9, 0.1]);
        let mut counts = [0usize; 2];
        for _ in 0..100 {
            counts[table.select("r")] += 1;
        }
        assert_eq!(counts, [90, 10]);
    }
}
