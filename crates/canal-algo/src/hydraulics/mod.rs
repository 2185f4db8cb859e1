//! Closed-form open-channel hydraulics.
//!
//! Every function here is pure and defined for zero depth or zero opening
//! (returning zero flow), so callers never need to guard against a dry
//! channel before asking a question.
//!
//! - [`geometry`]: trapezoidal section properties
//! - [`manning`]: uniform flow, its depth derivative and the friction slope
//! - [`gate`]: free/submerged sluice-gate discharge and its inverse
//! - [`energy`]: energy head, Froude number, grade-line profiles

pub mod energy;
pub mod gate;
pub mod geometry;
pub mod manning;

pub use energy::{energy_head, froude_number, velocity_head, EnergyProfile, ProfilePoint};
pub use gate::{gate_discharge, gate_opening_for_flow, FlowRegime, GateFlow, OpeningSolution};
pub use geometry::TrapezoidalSection;
pub use manning::{friction_slope, manning_flow, manning_flow_derivative, manning_flow_in};

/// Standard gravity (m/s²)
pub const GRAVITY: f64 = 9.81;
