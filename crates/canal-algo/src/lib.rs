//! # canal-algo: Hydraulic Feasibility and Flow Optimization
//!
//! This crate decides how a gravity-fed irrigation network should be operated:
//! which gate openings meet the zones' delivery requests without pumps, in
//! what order competing deliveries should run, and what to do when part of
//! the network fails.
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`hydraulics`] | Manning flow, trapezoidal geometry, sluice-gate discharge, energy head |
//! | [`feasibility`] | Can gravity deliver along a path? Head budget with shortfall |
//! | [`normal_depth`] | Newton-Raphson normal depth for a discharge |
//! | [`gate_opt`] | Constrained multi-objective gate-setting optimizer |
//! | [`flow_split`] | Priority-weighted water-filling at one junction |
//! | [`travel_time`] | Transit and dry-start filling time along a path |
//! | [`sequencer`] | Scoring, greedy construction and 2-opt ordering of deliveries |
//! | [`energy_recovery`] | Micro-hydro potential at gates and drops |
//! | [`contingency`] | Alternative routes around blocked gates and channels |
//! | [`collaborators`] | Provider contracts and last-known-value fallbacks |
//! | [`workflows`] | One call that runs a complete optimization cycle |
//!
//! ## Failure model
//!
//! Only structurally invalid input is an error ([`canal_core::CanalError`]).
//! Non-convergence, infeasibility, unreachable zones and timeouts come back
//! as flags on the results, so callers can tell "no solution exists" from
//! "no solution found in time".
//!
//! ## Example
//!
//! ```ignore
//! use canal_algo::{optimize, OptimizationRequest, OptimizerConfig};
//!
//! let request: OptimizationRequest = serde_json::from_str(&json)?;
//! let result = optimize(&request, &OptimizerConfig::default())?;
//! println!("{}: {:?}", result.quality, result.gate_openings());
//! ```

pub mod collaborators;
pub mod config;
pub mod contingency;
pub mod energy_recovery;
pub mod feasibility;
pub mod flow_split;
pub mod gate_opt;
pub mod hydraulics;
pub mod normal_depth;
pub mod request;
pub mod sequencer;
pub mod travel_time;
pub mod workflows;

pub use config::OptimizerConfig;
pub use contingency::{Blockage, ContingencyConfig, ContingencyReport};
pub use feasibility::{FeasibilityConfig, FeasibilityReport, PathSegment};
pub use flow_split::{split_flow, Branch, FlowSplitResult};
pub use gate_opt::{optimize_gates, GateOptimizerConfig, GateSettingSolution, SolutionQuality};
pub use normal_depth::{NormalDepthSolution, NormalDepthSolver};
pub use request::{CropContext, DeliveryRequest, OptimizationRequest};
pub use sequencer::{Schedule, SequencerConfig};
pub use workflows::{optimize, DeliveryOptimization, OptimizationResult};
