//! Enumeration types for the Crossing intersection.
//!
//! Every set here is closed: the four routes, the two movement groups,
//! the three signal colours, the four phases, and the three query views.
//! Text parsing lives next to each type so the wire codec never has to
//! match on raw strings.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Routes and movement groups
// ---------------------------------------------------------------------------

/// One of the four approaches into the intersection.
///
/// Routes pair into two mutually exclusive movement groups:
/// `A`/`C` move together ([`RouteGroup::Group1`]) and `B`/`D` move
/// together ([`RouteGroup::Group2`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum Route {
    /// Route A (group 1).
    A,
    /// Route B (group 2).
    B,
    /// Route C (group 1).
    C,
    /// Route D (group 2).
    D,
}

impl Route {
    /// All four routes in canonical order.
    pub const ALL: [Self; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// The movement group this route belongs to.
    pub const fn group(self) -> RouteGroup {
        match self {
            Self::A | Self::C => RouteGroup::Group1,
            Self::B | Self::D => RouteGroup::Group2,
        }
    }

    /// The canonical single-letter identifier used on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when text does not name one of the four routes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown route: {value}")]
pub struct RouteParseError {
    /// The rejected input.
    pub value: String,
}

impl FromStr for Route {
    type Err = RouteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            other => Err(RouteParseError {
                value: other.to_owned(),
            }),
        }
    }
}

/// A pair of routes that receive the same signal colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum RouteGroup {
    /// Routes `A` and `C`.
    Group1,
    /// Routes `B` and `D`.
    Group2,
}

impl RouteGroup {
    /// The two routes of this group.
    pub const fn routes(self) -> [Route; 2] {
        match self {
            Self::Group1 => [Route::A, Route::C],
            Self::Group2 => [Route::B, Route::D],
        }
    }

    /// The conflicting group.
    pub const fn other(self) -> Self {
        match self {
            Self::Group1 => Self::Group2,
            Self::Group2 => Self::Group1,
        }
    }
}

// ---------------------------------------------------------------------------
// Signals and phases
// ---------------------------------------------------------------------------

/// The colour shown to one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum SignalColor {
    /// Stop.
    Red,
    /// Clearing; the group is about to turn red.
    Yellow,
    /// Go.
    Green,
}

/// The intersection's position in its fixed four-step cycle.
///
/// `Group1Green -> Group1Yellow -> Group2Green -> Group2Yellow -> Group1Green`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum Phase {
    /// `A`/`C` green, `B`/`D` red.
    Group1Green,
    /// `A`/`C` yellow, `B`/`D` red.
    Group1Yellow,
    /// `B`/`D` green, `A`/`C` red.
    Group2Green,
    /// `B`/`D` yellow, `A`/`C` red.
    Group2Yellow,
}

impl Phase {
    /// The phase that follows this one in the cycle.
    pub const fn next(self) -> Self {
        match self {
            Self::Group1Green => Self::Group1Yellow,
            Self::Group1Yellow => Self::Group2Green,
            Self::Group2Green => Self::Group2Yellow,
            Self::Group2Yellow => Self::Group1Green,
        }
    }

    /// The group that is not red during this phase.
    pub const fn active_group(self) -> RouteGroup {
        match self {
            Self::Group1Green | Self::Group1Yellow => RouteGroup::Group1,
            Self::Group2Green | Self::Group2Yellow => RouteGroup::Group2,
        }
    }

    /// Whether this is one of the two green phases.
    pub const fn is_green(self) -> bool {
        matches!(self, Self::Group1Green | Self::Group2Green)
    }

    /// The colour shown to the active group during this phase.
    pub const fn active_color(self) -> SignalColor {
        if self.is_green() {
            SignalColor::Green
        } else {
            SignalColor::Yellow
        }
    }

    /// The colour `route` shows during this phase.
    pub fn color_for(self, route: Route) -> SignalColor {
        if route.group() == self.active_group() {
            self.active_color()
        } else {
            SignalColor::Red
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Group1Green => "GROUP1_GREEN",
            Self::Group1Yellow => "GROUP1_YELLOW",
            Self::Group2Green => "GROUP2_GREEN",
            Self::Group2Yellow => "GROUP2_YELLOW",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Query views
// ---------------------------------------------------------------------------

/// Which view of controller state a `QUERY` asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum QueryType {
    /// Full controller snapshot.
    #[default]
    Status,
    /// Phase timing only.
    Phase,
    /// Raw traffic samples and computed demands.
    Traffic,
}

/// Error returned when text does not name a query view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown query type: {value}")]
pub struct QueryTypeParseError {
    /// The rejected input.
    pub value: String,
}

impl FromStr for QueryType {
    type Err = QueryTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(Self::Status),
            "phase" => Ok(Self::Phase),
            "traffic" => Ok(Self::Traffic),
            other => Err(QueryTypeParseError {
                value: other.to_owned(),
            }),
        }
    }
}
