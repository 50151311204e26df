//! Core structs: traffic samples, controller snapshots, and the payloads
//! carried inside `STATUS` frames.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{Phase, Route, RouteGroup, SignalColor};
use crate::ids::SessionId;

// ---------------------------------------------------------------------------
// Traffic samples
// ---------------------------------------------------------------------------

/// The most recent vehicle counts reported for one route.
///
/// Samples are overwritten, never accumulated. Counts are non-negative by
/// construction; raw input is clamped with [`clamp_count`] when it is
/// decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct TrafficSample {
    /// Normal vehicles currently queued.
    pub vehicles: u32,
    /// Heavy vehicles (trucks, buses) currently queued.
    pub heavy_vehicles: u32,
}

impl TrafficSample {
    /// Create a sample from already-valid counts.
    pub const fn new(vehicles: u32, heavy_vehicles: u32) -> Self {
        Self {
            vehicles,
            heavy_vehicles,
        }
    }
}

/// Clamp a raw numeric count into a non-negative integer.
///
/// Negative values and NaN become 0, fractional values are floored, and
/// anything above `u32::MAX` saturates.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn clamp_count(value: f64) -> u32 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    // Float-to-int `as` casts saturate.
    value.floor() as u32
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Summed demand of each movement group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PairDemands {
    /// Demand on routes `A` + `C`.
    pub group1: f64,
    /// Demand on routes `B` + `D`.
    pub group2: f64,
}

impl PairDemands {
    /// Demand for one group.
    pub const fn for_group(&self, group: RouteGroup) -> f64 {
        match group {
            RouteGroup::Group1 => self.group1,
            RouteGroup::Group2 => self.group2,
        }
    }
}

/// Immutable point-in-time copy of the full controller state.
///
/// This is both the `QUERY status` response body and the payload of every
/// unsolicited broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ControllerSnapshot {
    /// The active phase.
    pub phase: Phase,
    /// Signal colour per route.
    pub signals: BTreeMap<Route, SignalColor>,
    /// Committed duration of the active phase in seconds.
    pub duration_secs: u64,
    /// Milliseconds since the active phase began.
    pub elapsed_ms: u64,
    /// Milliseconds until the active phase is due to end (0 when overdue).
    pub remaining_ms: u64,
    /// Latest traffic sample per route.
    pub traffic: BTreeMap<Route, TrafficSample>,
    /// Weighted demand per route.
    pub demands: BTreeMap<Route, f64>,
    /// Weighted demand per movement group.
    pub pair_demands: PairDemands,
    /// Number of completed cycles (returns to `GROUP1_GREEN`).
    pub cycle_count: u64,
}

/// Timing-only view returned by `QUERY phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PhaseTimingView {
    /// The active phase.
    pub phase: Phase,
    /// Committed duration of the active phase in seconds.
    pub duration_secs: u64,
    /// Milliseconds since the active phase began.
    pub elapsed_ms: u64,
    /// Milliseconds until the active phase is due to end.
    pub remaining_ms: u64,
    /// Number of completed cycles.
    pub cycle_count: u64,
}

/// Traffic view returned by `QUERY traffic`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TrafficReport {
    /// Latest traffic sample per route.
    pub traffic: BTreeMap<Route, TrafficSample>,
    /// Weighted demand per route.
    pub demands: BTreeMap<Route, f64>,
    /// Weighted demand per movement group.
    pub pair_demands: PairDemands,
}

impl From<&ControllerSnapshot> for PhaseTimingView {
    fn from(snapshot: &ControllerSnapshot) -> Self {
        Self {
            phase: snapshot.phase,
            duration_secs: snapshot.duration_secs,
            elapsed_ms: snapshot.elapsed_ms,
            remaining_ms: snapshot.remaining_ms,
            cycle_count: snapshot.cycle_count,
        }
    }
}

impl From<&ControllerSnapshot> for TrafficReport {
    fn from(snapshot: &ControllerSnapshot) -> Self {
        Self {
            traffic: snapshot.traffic.clone(),
            demands: snapshot.demands.clone(),
            pair_demands: snapshot.pair_demands,
        }
    }
}

// ---------------------------------------------------------------------------
// Session events
// ---------------------------------------------------------------------------

/// Acknowledgements and notices a session receives about its own requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "event", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SessionEvent {
    /// Sent once, unsolicited, right after the connection is accepted.
    Welcome {
        /// The identifier assigned to this session.
        session_id: SessionId,
        /// Human-readable greeting.
        message: String,
    },
    /// Reply to `SUBSCRIBE`.
    Subscribed {
        /// Routes named in the request.
        routes: Vec<Route>,
        /// The session's full subscription set afterwards.
        subscriptions: Vec<Route>,
    },
    /// Reply to `UNSUBSCRIBE`.
    Unsubscribed {
        /// Routes named in the request.
        routes: Vec<Route>,
        /// The session's full subscription set afterwards.
        subscriptions: Vec<Route>,
    },
    /// Reply to `CAMERA_UPDATE`.
    CameraUpdate {
        /// Routes whose samples were overwritten.
        routes: Vec<Route>,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn clamp_count_floors_and_saturates() {
        assert_eq!(clamp_count(-1.5), 0);
        assert_eq!(clamp_count(f64::NAN), 0);
        assert_eq!(clamp_count(3.9), 3);
        assert_eq!(clamp_count(1e12), u32::MAX);
    }

    #[test]
    fn sample_uses_camel_case_on_the_wire() {
        let json = serde_json::to_value(TrafficSample::new(10, 2)).unwrap();
        assert_eq!(json["vehicles"], 10);
        assert_eq!(json["heavyVehicles"], 2);
    }

    #[test]
    fn session_event_is_tagged() {
        let event = SessionEvent::Welcome {
            session_id: SessionId(7),
            message: String::from("hi"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "welcome");
        assert_eq!(json["session_id"], 7);
    }
}
