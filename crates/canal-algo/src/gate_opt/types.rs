//! Result types for gate-setting optimization.

use canal_core::{ChannelId, GateId, NodeId};
use serde::{Deserialize, Serialize};

use crate::hydraulics::FlowRegime;

/// How far the caller can trust a gate-setting solution.
///
/// `Infeasible` and `TimedOut` are different operator situations: the first
/// means no admissible opening vector was found, the second that the solver
/// ran out of time and the point returned is only the best seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionQuality {
    /// All constraints met and the inner solver reported convergence
    Optimal,
    /// All constraints met within tolerance, iteration budget exhausted
    Feasible,
    /// At least one constraint violated beyond tolerance
    #[default]
    Infeasible,
    /// Deadline expired; best-so-far point returned
    TimedOut,
}

impl SolutionQuality {
    pub fn is_actionable(&self) -> bool {
        matches!(self, SolutionQuality::Optimal | SolutionQuality::Feasible)
    }
}

impl std::fmt::Display for SolutionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SolutionQuality::Optimal => "optimal",
            SolutionQuality::Feasible => "feasible",
            SolutionQuality::Infeasible => "infeasible",
            SolutionQuality::TimedOut => "timed out",
        };
        f.write_str(label)
    }
}

/// Constraint families checked on every candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Junction inflow must equal outflow
    JunctionBalance,
    /// A zone may not export more than it receives
    NegativeDelivery,
    ChannelCapacity,
    MinDepth,
    MinVelocity,
    MaxVelocity,
    OpeningBounds,
}

/// One violated constraint with its size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    /// "Node 4", "Channel 2", "Gate 7"
    pub entity: String,
    /// Value at the returned point
    pub value: f64,
    pub limit: f64,
    /// How far past the limit (always positive)
    pub amount: f64,
}

impl std::fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} on {}: {:.4} vs limit {:.4} (by {:.4})",
            self.kind, self.entity, self.value, self.limit, self.amount
        )
    }
}

/// Solved state of one gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateSetting {
    pub gate: GateId,
    pub channel: ChannelId,
    pub controllable: bool,
    pub opening: f64,
    pub previous_opening: f64,
    pub flow: f64,
    pub regime: FlowRegime,
    /// Water-level drop across the gate (m)
    pub head_loss: f64,
    pub upstream_level: f64,
    pub downstream_level: f64,
    /// Mean velocity in the hosting channel
    pub velocity: f64,
    pub froude: f64,
}

impl GateSetting {
    pub fn movement(&self) -> f64 {
        (self.opening - self.previous_opening).abs()
    }
}

/// Solved state of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelState {
    pub channel: ChannelId,
    pub flow: f64,
    /// Normal depth at `flow`
    pub depth: f64,
    pub velocity: f64,
    pub froude: f64,
    /// Friction head loss over the channel length (m)
    pub friction_loss: f64,
    pub depth_converged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneDelivery {
    pub node: NodeId,
    pub target: f64,
    pub delivered: f64,
}

impl ZoneDelivery {
    pub fn deviation(&self) -> f64 {
        self.delivered - self.target
    }
}

/// Weighted objective terms at the returned point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ObjectiveBreakdown {
    pub head_loss: f64,
    pub flow_deviation: f64,
    pub gate_movement: f64,
    pub total: f64,
}

/// Full output of the gate-setting optimizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GateSettingSolution {
    pub quality: SolutionQuality,
    pub gates: Vec<GateSetting>,
    pub channels: Vec<ChannelState>,
    pub deliveries: Vec<ZoneDelivery>,
    pub objective: ObjectiveBreakdown,
    pub violations: Vec<ConstraintViolation>,
    /// Total inner (L-BFGS) iterations
    pub iterations: usize,
    pub penalty_rounds: usize,
    pub converged: bool,
    pub timed_out: bool,
    pub solve_time_ms: u128,
}

impl GateSettingSolution {
    pub fn gate(&self, id: GateId) -> Option<&GateSetting> {
        self.gates.iter().find(|g| g.gate == id)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&ChannelState> {
        self.channels.iter().find(|c| c.channel == id)
    }

    pub fn delivered_at(&self, node: NodeId) -> Option<f64> {
        self.deliveries
            .iter()
            .find(|d| d.node == node)
            .map(|d| d.delivered)
    }

    pub fn max_violation(&self) -> f64 {
        self.violations.iter().map(|v| v.amount).fold(0.0, f64::max)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} after {} iterations ({} penalty rounds), objective {:.4}, {} violation(s), {} ms",
            self.quality,
            self.iterations,
            self.penalty_rounds,
            self.objective.total,
            self.violations.len(),
            self.solve_time_ms
        )
    }
}
