//! Flow split at a single junction.
//!
//! One inflow is divided over N branches:
//!
//! - **Enough water** (Σ demand ≤ inflow): every branch gets its demand (up to
//!   its capacity); the surplus is water-filled over the remaining capacity in
//!   proportion to priority.
//! - **Short of water** (Σ demand > inflow): the inflow is water-filled in
//!   proportion to `priority × demand`, each branch capped at its demand, its
//!   channel capacity and what its gate passes fully open.
//!
//! Water-filling is iterative: a branch that hits its cap is frozen and its
//! unused share is redistributed over the rest. Water the weighted branches
//! cannot take goes to zero-priority branches (by demand in a shortage,
//! equally otherwise). Whatever no branch can take is reported as `spill`,
//! so `Σ flow + spill = inflow` always holds.
//!
//! Gate openings for the allocated flows come from inverting the sluice
//! relation ([`gate_opening_for_flow`]).

use canal_core::{CanalError, CanalResult};
use serde::{Deserialize, Serialize};

use crate::hydraulics::{gate_discharge, gate_opening_for_flow};

/// Relative slack when deciding a branch has reached its cap.
const CAP_EPS: f64 = 1e-12;

/// Gate controlling a branch, with sill-referenced heads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchGate {
    pub width: f64,
    pub discharge_coefficient: f64,
    pub max_opening: f64,
    pub upstream_head: f64,
    pub downstream_head: f64,
}

impl BranchGate {
    /// Discharge with the gate fully open.
    pub fn max_flow(&self) -> f64 {
        gate_discharge(
            self.max_opening,
            self.width,
            self.discharge_coefficient,
            self.upstream_head,
            self.downstream_head,
        )
        .flow
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: usize,
    pub demand: f64,
    pub priority: f64,
    pub capacity: f64,
    #[serde(default)]
    pub gate: Option<BranchGate>,
}

impl Branch {
    /// Most this branch can carry (capacity and gate limit).
    pub fn limit(&self) -> f64 {
        let gate_limit = self.gate.map(|g| g.max_flow()).unwrap_or(f64::INFINITY);
        self.capacity.min(gate_limit).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchAllocation {
    pub id: usize,
    pub flow: f64,
    pub demand: f64,
    /// flow / inflow
    pub ratio: f64,
    /// Opening that passes `flow`; None for ungated branches
    pub opening: Option<f64>,
    /// Discharge at `opening` (may differ slightly inside the regime jump)
    pub achieved_flow: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSplitResult {
    pub inflow: f64,
    pub allocations: Vec<BranchAllocation>,
    /// Inflow no branch could take
    pub spill: f64,
    /// Demand exceeded inflow
    pub over_allocated: bool,
}

impl FlowSplitResult {
    pub fn total_allocated(&self) -> f64 {
        self.allocations.iter().map(|a| a.flow).sum()
    }

    pub fn flow_of(&self, id: usize) -> Option<f64> {
        self.allocations.iter().find(|a| a.id == id).map(|a| a.flow)
    }
}

/// Distribute `amount` over branches in proportion to `weights`, never
/// pushing `alloc[i]` past `caps[i]`. Returns what could not be placed.
fn fill_weighted(mut amount: f64, weights: &[f64], caps: &[f64], alloc: &mut [f64]) -> f64 {
    let mut active: Vec<usize> = (0..weights.len())
        .filter(|&i| weights[i] > 0.0 && caps[i] - alloc[i] > CAP_EPS)
        .collect();

    while amount > CAP_EPS && !active.is_empty() {
        let total_weight: f64 = active.iter().map(|&i| weights[i]).sum();
        let saturated: Vec<usize> = active
            .iter()
            .copied()
            .filter(|&i| alloc[i] + amount * weights[i] / total_weight >= caps[i] - CAP_EPS)
            .collect();

        if saturated.is_empty() {
            for &i in &active {
                alloc[i] += amount * weights[i] / total_weight;
            }
            return 0.0;
        }
        for &i in &saturated {
            amount -= caps[i] - alloc[i];
            alloc[i] = caps[i];
        }
        active.retain(|i| !saturated.contains(i));
    }
    amount.max(0.0)
}

/// Weighted fill, then `fallback` weights for whatever is left.
fn water_fill(amount: f64, weights: &[f64], fallback: &[f64], caps: &[f64], alloc: &mut [f64]) -> f64 {
    let rest = fill_weighted(amount, weights, caps, alloc);
    if rest > CAP_EPS {
        fill_weighted(rest, fallback, caps, alloc)
    } else {
        rest
    }
}

/// Split `inflow` over `branches`.
///
/// Negative inflow, demand, priority or capacity is rejected as a validation
/// error; nothing else fails.
pub fn split_flow(inflow: f64, branches: &[Branch]) -> CanalResult<FlowSplitResult> {
    if !(inflow >= 0.0) {
        return Err(CanalError::validation("flow_split", "inflow must not be negative"));
    }
    for branch in branches {
        if !(branch.demand >= 0.0) || !(branch.priority >= 0.0) || !(branch.capacity >= 0.0) {
            return Err(CanalError::validation(
                "flow_split",
                &format!("branch {} has a negative demand, priority or capacity", branch.id),
            ));
        }
    }

    let limits: Vec<f64> = branches.iter().map(Branch::limit).collect();
    let mut alloc = vec![0.0; branches.len()];
    let total_demand: f64 = branches.iter().map(|b| b.demand).sum();
    let over_allocated = total_demand > inflow;

    let mut remaining = if over_allocated {
        let weights: Vec<f64> = branches.iter().map(|b| b.priority * b.demand).collect();
        let caps: Vec<f64> = branches
            .iter()
            .zip(&limits)
            .map(|(b, &limit)| b.demand.min(limit))
            .collect();
        let demands: Vec<f64> = branches.iter().map(|b| b.demand).collect();
        water_fill(inflow, &weights, &demands, &caps, &mut alloc)
    } else {
        for (i, branch) in branches.iter().enumerate() {
            alloc[i] = branch.demand.min(limits[i]);
        }
        inflow - alloc.iter().sum::<f64>()
    };

    // Surplus (or what capped branches could not absorb) goes to spare capacity by priority
    if remaining > CAP_EPS {
        let weights: Vec<f64> = branches.iter().map(|b| b.priority).collect();
        let equal = vec![1.0; branches.len()];
        remaining = water_fill(remaining, &weights, &equal, &limits, &mut alloc);
    }

    let allocations = branches
        .iter()
        .zip(&alloc)
        .map(|(branch, &flow)| {
            let flow = flow.max(0.0);
            let (opening, achieved_flow) = match branch.gate {
                Some(gate) => {
                    let sol = gate_opening_for_flow(
                        flow,
                        gate.width,
                        gate.discharge_coefficient,
                        gate.upstream_head,
                        gate.downstream_head,
                        gate.max_opening,
                        1e-6,
                        100,
                    );
                    (Some(sol.opening.max(0.0)), Some(sol.flow))
                }
                None => (None, None),
            };
            BranchAllocation {
                id: branch.id,
                flow,
                demand: branch.demand,
                ratio: if inflow > 0.0 { flow / inflow } else { 0.0 },
                opening,
                achieved_flow,
            }
        })
        .collect();

    Ok(FlowSplitResult {
        inflow,
        allocations,
        spill: remaining.max(0.0),
        over_allocated,
    })
}
