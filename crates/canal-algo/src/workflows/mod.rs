//! High-level workflow facades.
//!
//! These tie the individual analyses together into the single call a
//! scheduler or operator console makes each cycle.

pub mod optimization;

pub use optimization::{
    delivery_path, optimize, ContingencyOutcome, DeliveryOptimization, DeliveryPath, JunctionSplit,
    OptimizationResult, RequestOutcome,
};
