//! Phase state machine for the four-route intersection.
//!
//! [`PhaseController`] owns the authoritative intersection state: the active
//! phase, the signal colour of every route, the latest traffic sample per
//! route, and the timing of the active phase. It is a plain synchronous
//! struct; [`SharedController`](crate::shared::SharedController) supplies
//! the single lock every caller goes through.
//!
//! # Timing
//!
//! Transitions happen only in [`PhaseController::advance`]. The caller may
//! invoke it at any frequency; it does nothing until the active phase's
//! committed duration has elapsed. A green phase's duration is computed
//! once, from demand at the instant the phase begins, and is never revised
//! while that phase runs. Traffic updates therefore only influence the next
//! yellow-to-green transition.
//!
//! All methods take the current instant explicitly so tests can step the
//! machine to exact phase boundaries.

use std::collections::BTreeMap;
use std::time::Duration;

use crossing_types::{
    ControllerSnapshot, Phase, PhaseTimingView, Route, SignalColor, TrafficReport, TrafficSample,
};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::demand::DemandCalculator;

/// Errors raised by controller operations invoked with bad internal input.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// A caller named a route outside the closed `A`-`D` set.
    #[error("unknown route: {0}")]
    UnknownRoute(#[from] crossing_types::RouteParseError),
}

/// A completed phase change, returned by [`PhaseController::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    /// The phase that ended.
    pub from: Phase,
    /// The phase that began.
    pub to: Phase,
    /// Committed duration of the new phase in seconds.
    pub duration_secs: u64,
}

/// Authoritative state of the intersection.
#[derive(Debug, Clone)]
pub struct PhaseController {
    /// Demand weights and duration bounds.
    calculator: DemandCalculator,

    /// The active phase.
    phase: Phase,

    /// Colour per route, rewritten for all four routes on every transition.
    signals: BTreeMap<Route, SignalColor>,

    /// Latest sample per route (last write wins).
    traffic: BTreeMap<Route, TrafficSample>,

    /// When the active phase began.
    started_at: Instant,

    /// Committed duration of the active phase.
    duration_secs: u64,

    /// Completed cycles (returns to `GROUP1_GREEN`).
    cycle_count: u64,

    /// Signal set at the last broadcast check. `None` until the first check.
    last_broadcast: Option<BTreeMap<Route, SignalColor>>,
}

impl PhaseController {
    /// Create a controller in `GROUP1_GREEN` with a `MIN_GREEN` duration,
    /// starting at `now`. All traffic samples start at zero.
    pub fn new(calculator: DemandCalculator, now: Instant) -> Self {
        let phase = Phase::Group1Green;
        Self {
            calculator,
            phase,
            signals: signals_for(phase),
            traffic: Route::ALL
                .into_iter()
                .map(|route| (route, TrafficSample::default()))
                .collect(),
            started_at: now,
            duration_secs: calculator.min_green_secs(),
            cycle_count: 0,
            last_broadcast: None,
        }
    }

    /// The active phase.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Committed duration of the active phase in seconds.
    pub const fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    /// When the active phase began.
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Number of completed cycles.
    pub const fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// The calculator used for demand and durations.
    pub const fn calculator(&self) -> &DemandCalculator {
        &self.calculator
    }

    /// Current colour of one route.
    pub fn signal(&self, route: Route) -> SignalColor {
        self.signals
            .get(&route)
            .copied()
            .unwrap_or(SignalColor::Red)
    }

    /// Current colours of all routes.
    pub const fn signals(&self) -> &BTreeMap<Route, SignalColor> {
        &self.signals
    }

    /// Latest sample of one route.
    pub fn traffic_sample(&self, route: Route) -> TrafficSample {
        self.traffic.get(&route).copied().unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Phase advancement
    // -----------------------------------------------------------------------

    /// Move to the next phase if the active one has run its full duration.
    ///
    /// Returns the transition that happened, or `None` when the active
    /// phase still has time left. At most one transition happens per call.
    pub fn advance(&mut self, now: Instant) -> Option<PhaseTransition> {
        let elapsed = now.saturating_duration_since(self.started_at);
        if elapsed < Duration::from_secs(self.duration_secs) {
            return None;
        }

        let from = self.phase;
        let to = from.next();
        let duration_secs = if to.is_green() {
            self.green_duration_for(to)
        } else {
            self.calculator.yellow_secs()
        };

        self.phase = to;
        self.signals = signals_for(to);
        // Tick time, not the due time: a phase may overrun by one advance period.
        self.started_at = now;
        self.duration_secs = duration_secs;
        if to == Phase::Group1Green {
            self.cycle_count = self.cycle_count.saturating_add(1);
        }

        info!(
            from = %from,
            to = %to,
            duration_secs,
            cycle = self.cycle_count,
            "Phase transition"
        );

        Some(PhaseTransition {
            from,
            to,
            duration_secs,
        })
    }

    /// Green duration for `phase` from the demand recorded right now.
    fn green_duration_for(&self, phase: Phase) -> u64 {
        let group = phase.active_group();
        let pairs = self.calculator.pair_demands(&self.traffic);
        self.calculator
            .green_duration(pairs.for_group(group), pairs.for_group(group.other()))
    }

    // -----------------------------------------------------------------------
    // Traffic updates
    // -----------------------------------------------------------------------

    /// Overwrite the sample of one route.
    ///
    /// Has no effect on the active phase or its committed duration.
    pub fn update_traffic(&mut self, route: Route, sample: TrafficSample) {
        debug!(
            route = %route,
            vehicles = sample.vehicles,
            heavy_vehicles = sample.heavy_vehicles,
            "Traffic sample updated"
        );
        self.traffic.insert(route, sample);
    }

    /// Overwrite the samples of several routes in one step.
    pub fn update_traffic_batch<I>(&mut self, samples: I)
    where
        I: IntoIterator<Item = (Route, TrafficSample)>,
    {
        for (route, sample) in samples {
            self.update_traffic(route, sample);
        }
    }

    /// Overwrite the sample of the route named by `route_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnknownRoute`] and leaves every sample
    /// untouched when `route_id` is not one of `A`-`D`.
    pub fn update_traffic_by_id(
        &mut self,
        route_id: &str,
        sample: TrafficSample,
    ) -> Result<Route, ControllerError> {
        let route: Route = route_id.parse()?;
        self.update_traffic(route, sample);
        Ok(route)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Immutable copy of the full controller state at `now`.
    pub fn snapshot(&self, now: Instant) -> ControllerSnapshot {
        let (elapsed_ms, remaining_ms) = self.timing_ms(now);
        let demands = self.route_demands();
        ControllerSnapshot {
            phase: self.phase,
            signals: self.signals.clone(),
            duration_secs: self.duration_secs,
            elapsed_ms,
            remaining_ms,
            traffic: self.traffic.clone(),
            demands,
            pair_demands: self.calculator.pair_demands(&self.traffic),
            cycle_count: self.cycle_count,
        }
    }

    /// Timing-only view at `now`.
    pub fn phase_timing(&self, now: Instant) -> PhaseTimingView {
        let (elapsed_ms, remaining_ms) = self.timing_ms(now);
        PhaseTimingView {
            phase: self.phase,
            duration_secs: self.duration_secs,
            elapsed_ms,
            remaining_ms,
            cycle_count: self.cycle_count,
        }
    }

    /// Raw samples plus computed demands.
    pub fn traffic_report(&self) -> TrafficReport {
        TrafficReport {
            traffic: self.traffic.clone(),
            demands: self.route_demands(),
            pair_demands: self.calculator.pair_demands(&self.traffic),
        }
    }

    fn route_demands(&self) -> BTreeMap<Route, f64> {
        self.traffic
            .iter()
            .map(|(route, sample)| (*route, self.calculator.sample_demand(sample)))
            .collect()
    }

    fn timing_ms(&self, now: Instant) -> (u64, u64) {
        let elapsed = now.saturating_duration_since(self.started_at);
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let duration_ms = self.duration_secs.saturating_mul(1_000);
        (elapsed_ms, duration_ms.saturating_sub(elapsed_ms))
    }

    // -----------------------------------------------------------------------
    // Change detection
    // -----------------------------------------------------------------------

    /// Report whether the signal set differs from the one seen at the last
    /// call, and record the current set as seen.
    ///
    /// Consume-once: a second call without an intervening transition
    /// returns `false`. The first call ever returns `true`.
    pub fn state_changed_since_last_broadcast(&mut self) -> bool {
        if self.last_broadcast.as_ref() == Some(&self.signals) {
            return false;
        }
        self.last_broadcast = Some(self.signals.clone());
        true
    }
}

/// Colour of every route during `phase`.
fn signals_for(phase: Phase) -> BTreeMap<Route, SignalColor> {
    Route::ALL
        .into_iter()
        .map(|route| (route, phase.color_for(route)))
        .collect()
}
