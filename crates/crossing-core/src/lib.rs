//! Phase state machine, demand calculation, and configuration for the
//! Crossing traffic-phase controller.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `crossing-config.yaml` into
//!   strongly-typed structs.
//! - [`demand`] -- [`DemandCalculator`]: weighted demand and adaptive green
//!   durations.
//! - [`controller`] -- [`PhaseController`]: the timed four-phase state
//!   machine with broadcast change detection.
//! - [`shared`] -- [`SharedController`]: the lock every caller goes through.
//!
//! [`DemandCalculator`]: demand::DemandCalculator
//! [`PhaseController`]: controller::PhaseController
//! [`SharedController`]: shared::SharedController

pub mod config;
pub mod controller;
pub mod demand;
pub mod shared;
