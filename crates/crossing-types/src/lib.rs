//! Shared type definitions for the Crossing traffic-phase controller.
//!
//! This crate is the single source of truth for the intersection vocabulary
//! and for the payloads that travel inside protocol frames. Types flow
//! downstream to `TypeScript` via `ts-rs` for protocol consumers.
//!
//! # Modules
//!
//! - [`ids`] -- Counter-backed session identifiers
//! - [`enums`] -- Routes, movement groups, signal colours, phases, query views
//! - [`structs`] -- Traffic samples, controller snapshots, session events

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{
    Phase, QueryType, QueryTypeParseError, Route, RouteGroup, RouteParseError, SignalColor,
};
pub use ids::SessionId;
pub use structs::{
    ControllerSnapshot, PairDemands, PhaseTimingView, SessionEvent, TrafficReport, TrafficSample,
    clamp_count,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation for protocol consumers.

    #[test]
    fn export_bindings() {
        // ts-rs writes the files to `bindings/` relative to the crate root.
        use ts_rs::TS;

        let _ = crate::ids::SessionId::export_all();

        let _ = crate::enums::Route::export_all();
        let _ = crate::enums::RouteGroup::export_all();
        let _ = crate::enums::SignalColor::export_all();
        let _ = crate::enums::Phase::export_all();
        let _ = crate::enums::QueryType::export_all();

        let _ = crate::structs::TrafficSample::export_all();
        let _ = crate::structs::PairDemands::export_all();
        let _ = crate::structs::ControllerSnapshot::export_all();
        let _ = crate::structs::PhaseTimingView::export_all();
        let _ = crate::structs::TrafficReport::export_all();
        let _ = crate::structs::SessionEvent::export_all();
    }
}
