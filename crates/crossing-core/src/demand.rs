//! Demand scoring and adaptive green durations.
//!
//! [`DemandCalculator`] is a plain `Copy` value holding the configured
//! weights and timing bounds. Every method is a pure function of its
//! arguments, so it can be used from any task without synchronisation.
//!
//! Counts reaching this module are already non-negative; the protocol codec
//! clamps raw input once with [`clamp_count`] as it decodes each update.
//!
//! [`clamp_count`]: crossing_types::clamp_count

use std::collections::BTreeMap;

use crossing_types::{PairDemands, Route, RouteGroup, TrafficSample};

use crate::config::{TimingConfig, WeightsConfig};

/// Share of the green range one group can claim even under total demand skew.
pub const DEMAND_DAMPING: f64 = 0.8;

/// Converts traffic samples into demand scores and green durations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandCalculator {
    normal_weight: f64,
    heavy_weight: f64,
    min_green_secs: u64,
    max_green_secs: u64,
    yellow_secs: u64,
}

impl DemandCalculator {
    /// Build a calculator from validated config sections.
    pub const fn new(weights: &WeightsConfig, timing: &TimingConfig) -> Self {
        Self {
            normal_weight: weights.normal,
            heavy_weight: weights.heavy,
            min_green_secs: timing.min_green_secs,
            max_green_secs: timing.max_green_secs,
            yellow_secs: timing.yellow_secs,
        }
    }

    /// Shortest green phase in seconds.
    pub const fn min_green_secs(&self) -> u64 {
        self.min_green_secs
    }

    /// Longest green phase in seconds.
    pub const fn max_green_secs(&self) -> u64 {
        self.max_green_secs
    }

    /// Fixed yellow phase length in seconds.
    pub const fn yellow_secs(&self) -> u64 {
        self.yellow_secs
    }

    /// Weighted demand of one route: `normal * w_normal + heavy * w_heavy`.
    pub fn demand(&self, normal: u32, heavy: u32) -> f64 {
        f64::from(normal).mul_add(
            self.normal_weight,
            f64::from(heavy) * self.heavy_weight,
        )
    }

    /// Weighted demand of a stored sample.
    pub fn sample_demand(&self, sample: &TrafficSample) -> f64 {
        self.demand(sample.vehicles, sample.heavy_vehicles)
    }

    /// Summed demand of the two routes in `group`. Missing routes count as zero.
    pub fn pair_demand(&self, samples: &BTreeMap<Route, TrafficSample>, group: RouteGroup) -> f64 {
        group
            .routes()
            .iter()
            .filter_map(|route| samples.get(route))
            .map(|sample| self.sample_demand(sample))
            .sum()
    }

    /// Demand of both groups at once.
    pub fn pair_demands(&self, samples: &BTreeMap<Route, TrafficSample>) -> PairDemands {
        PairDemands {
            group1: self.pair_demand(samples, RouteGroup::Group1),
            group2: self.pair_demand(samples, RouteGroup::Group2),
        }
    }

    /// Green duration for a group whose demand is `pair` while the
    /// conflicting group's demand is `other`.
    ///
    /// Both zero gives `MIN_GREEN`. Otherwise the result is
    /// `round(MIN + (MAX - MIN) * pair / (pair + other) * 0.8)` clamped into
    /// `[MIN, MAX]`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn green_duration(&self, pair: f64, other: f64) -> u64 {
        let pair = sanitize(pair);
        let other = sanitize(other);
        let total = pair + other;
        if total <= 0.0 {
            return self.min_green_secs;
        }

        let ratio = pair / total;
        let min = self.min_green_secs as f64;
        let range = self.max_green_secs.saturating_sub(self.min_green_secs) as f64;
        let raw = (range * ratio).mul_add(DEMAND_DAMPING, min).round();

        // Float-to-int `as` casts saturate; the clamp enforces the bounds.
        (raw as u64).clamp(self.min_green_secs, self.max_green_secs)
    }
}

impl Default for DemandCalculator {
    fn default() -> Self {
        Self::new(&WeightsConfig::default(), &TimingConfig::default())
    }
}

/// Non-finite or negative demand is treated as no demand.
fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use rand::Rng;

    use super::*;

    fn samples(entries: &[(Route, u32, u32)]) -> BTreeMap<Route, TrafficSample> {
        entries
            .iter()
            .map(|(route, normal, heavy)| (*route, TrafficSample::new(*normal, *heavy)))
            .collect()
    }

    #[test]
    fn demand_weights_heavy_vehicles() {
        let calc = DemandCalculator::default();
        assert_eq!(calc.demand(30, 5), 42.5);
        assert_eq!(calc.demand(25, 4), 35.0);
        assert_eq!(calc.demand(0, 0), 0.0);
    }

    #[test]
    fn demand_is_exact_for_random_counts() {
        let calc = DemandCalculator::default();
        let mut rng = rand::rng();
        for _ in 0..1_000 {
            let normal: u32 = rng.random_range(0..100_000);
            let heavy: u32 = rng.random_range(0..100_000);
            let expected = f64::from(normal) + 2.5 * f64::from(heavy);
            assert_eq!(calc.demand(normal, heavy), expected);
        }
    }

    #[test]
    fn zero_demand_gives_min_green() {
        let calc = DemandCalculator::default();
        assert_eq!(calc.green_duration(0.0, 0.0), 5);
    }

    #[test]
    fn equal_demand_gives_midpoint_damped() {
        let calc = DemandCalculator::default();
        // round(5 + 55 * 0.5 * 0.8) = round(27.0) = 27
        assert_eq!(calc.green_duration(10.0, 10.0), 27);
        assert_eq!(calc.green_duration(0.5, 0.5), 27);
    }

    #[test]
    fn reference_intersection_example() {
        let calc = DemandCalculator::default();
        let traffic = samples(&[
            (Route::A, 30, 5),
            (Route::C, 25, 4),
            (Route::B, 2, 0),
            (Route::D, 3, 0),
        ]);
        let pairs = calc.pair_demands(&traffic);
        assert_eq!(pairs.group1, 77.5);
        assert_eq!(pairs.group2, 5.0);
        assert_eq!(calc.green_duration(pairs.group1, pairs.group2), 46);
    }

    #[test]
    fn damping_caps_a_single_pair() {
        let calc = DemandCalculator::default();
        // All demand on one side: 5 + 55 * 0.8 = 49, never 60.
        assert_eq!(calc.green_duration(1_000.0, 0.0), 49);
        assert_eq!(calc.green_duration(0.0, 1_000.0), 5);
    }

    #[test]
    fn duration_always_within_bounds() {
        let calc = DemandCalculator::default();
        let mut rng = rand::rng();
        for _ in 0..1_000 {
            let pair: f64 = rng.random_range(0.0..10_000.0);
            let other: f64 = rng.random_range(0.0..10_000.0);
            let secs = calc.green_duration(pair, other);
            assert!((5..=60).contains(&secs), "{secs} out of bounds");
        }
    }

    #[test]
    fn non_finite_input_is_no_demand() {
        let calc = DemandCalculator::default();
        assert_eq!(calc.green_duration(f64::NAN, 0.0), 5);
        assert_eq!(calc.green_duration(-3.0, -4.0), 5);
    }

    #[test]
    fn missing_routes_count_as_zero() {
        let calc = DemandCalculator::default();
        let traffic = samples(&[(Route::A, 4, 0)]);
        assert_eq!(calc.pair_demand(&traffic, RouteGroup::Group1), 4.0);
        assert_eq!(calc.pair_demand(&traffic, RouteGroup::Group2), 0.0);
    }

    #[test]
    fn narrow_bounds_clamp() {
        let timing = TimingConfig {
            min_green_secs: 10,
            max_green_secs: 10,
            yellow_secs: 2,
            min_cycle_secs: 0,
        };
        let calc = DemandCalculator::new(&WeightsConfig::default(), &timing);
        assert_eq!(calc.green_duration(50.0, 1.0), 10);
        assert_eq!(calc.yellow_secs(), 2);
    }
}
