//! Flow model, objective and constraints for one gate-setting pass.

use std::collections::HashMap;

use canal_core::{CanalError, CanalResult, ChannelId, GateId, Network, NodeId, NodeRole};
use petgraph::visit::EdgeRef;

use super::types::{ConstraintKind, ConstraintViolation, ObjectiveBreakdown};
use super::GateOptimizerConfig;
use crate::hydraulics::{
    friction_slope, froude_number, gate_discharge, manning_flow_in, GateFlow, TrapezoidalSection,
};
use crate::normal_depth::NormalDepthSolver;

/// Width of the smoothed |x| used in the deviation and movement terms.
const SMOOTH_ABS_WIDTH: f64 = 1e-4;

/// Stage depth below which a channel is treated as dry.
const DRY_STAGE: f64 = 0.01;

fn smooth_abs(v: f64) -> f64 {
    (v * v + SMOOTH_ABS_WIDTH * SMOOTH_ABS_WIDTH).sqrt() - SMOOTH_ABS_WIDTH
}

#[derive(Debug, Clone)]
pub(crate) struct GateSlot {
    pub gate: GateId,
    /// Position in the decision vector; None for manual gates
    pub variable: Option<usize>,
    pub current_opening: f64,
    pub max_opening: f64,
    pub width: f64,
    pub discharge_coefficient: f64,
    pub upstream_head: f64,
    pub downstream_head: f64,
}

impl GateSlot {
    pub fn discharge(&self, opening: f64) -> GateFlow {
        gate_discharge(
            opening,
            self.width,
            self.discharge_coefficient,
            self.upstream_head,
            self.downstream_head,
        )
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Control {
    Gated(GateSlot),
    /// Ungated channel with its stage-driven flow
    Open(f64),
}

#[derive(Debug, Clone)]
pub(crate) struct ChannelModel {
    pub id: ChannelId,
    pub from: usize,
    pub to: usize,
    pub section: TrapezoidalSection,
    pub slope: f64,
    pub manning_n: f64,
    pub length: f64,
    pub capacity: f64,
    pub in_service: bool,
    /// Upstream stage depth used for friction loss; None when dry
    pub stage_depth: Option<f64>,
    pub upstream_level: f64,
    pub downstream_level: f64,
    pub control: Control,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Variable {
    pub gate: GateId,
    pub current: f64,
    pub max: f64,
}

/// Hydraulic state of a channel at a candidate point.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelEval {
    pub flow: f64,
    pub depth: f64,
    pub velocity: f64,
    pub froude: f64,
    pub friction_loss: f64,
    pub depth_converged: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Evaluation {
    pub channels: Vec<ChannelEval>,
    /// Inflow minus outflow per node index
    pub net_inflow: Vec<f64>,
}

pub(crate) struct GateProblem<'a> {
    pub network: &'a Network,
    pub config: &'a GateOptimizerConfig,
    pub channels: Vec<ChannelModel>,
    pub variables: Vec<Variable>,
    /// (node index, node id, role, target)
    pub nodes: Vec<(usize, NodeId, NodeRole, f64)>,
    depth_solver: NormalDepthSolver,
}

impl<'a> GateProblem<'a> {
    pub fn new(
        network: &'a Network,
        targets: &HashMap<NodeId, f64>,
        config: &'a GateOptimizerConfig,
    ) -> CanalResult<Self> {
        for (&node, &target) in targets {
            let role = network
                .node(node)
                .map(|n| n.role)
                .ok_or_else(|| CanalError::Network(format!("delivery target {node} not in network")))?;
            if role != NodeRole::Zone {
                return Err(CanalError::validation(
                    "request",
                    &format!("delivery target {node} is not a zone node"),
                ));
            }
            if !(target >= 0.0) {
                return Err(CanalError::validation(
                    "request",
                    &format!("target flow for {node} must not be negative"),
                ));
            }
        }

        let graph = &network.graph;
        let mut variables = Vec::new();
        let mut channels = Vec::with_capacity(graph.edge_count());

        for edge in graph.edge_references() {
            let channel = edge.weight();
            let up = &graph[edge.source()];
            let down = &graph[edge.target()];
            let section = TrapezoidalSection::of(channel);
            let stage = up.depth().value();

            let control = match network.gate_on_channel(channel.id) {
                Some(gate) => {
                    let sill = up.bed_elevation.value();
                    let max_opening = gate.max_opening.value().max(0.0);
                    let current = gate.opening.value().clamp(0.0, max_opening);
                    let variable = if gate.is_controllable() && channel.status {
                        variables.push(Variable {
                            gate: gate.id,
                            current,
                            max: max_opening,
                        });
                        Some(variables.len() - 1)
                    } else {
                        None
                    };
                    Control::Gated(GateSlot {
                        gate: gate.id,
                        variable,
                        current_opening: current,
                        max_opening,
                        width: gate.width.value(),
                        discharge_coefficient: gate.discharge_coefficient,
                        upstream_head: up.water_level.value() - sill,
                        downstream_head: down.water_level.value() - sill,
                    })
                }
                None => {
                    let flow = if channel.status && up.water_level > down.water_level {
                        manning_flow_in(&section, stage, channel.bed_slope, channel.manning_n)
                    } else {
                        0.0
                    };
                    Control::Open(flow)
                }
            };

            channels.push(ChannelModel {
                id: channel.id,
                from: edge.source().index(),
                to: edge.target().index(),
                section,
                slope: channel.bed_slope,
                manning_n: channel.manning_n,
                length: channel.length.value(),
                capacity: channel.capacity.value(),
                in_service: channel.status,
                stage_depth: (stage > DRY_STAGE).then_some(stage),
                upstream_level: up.water_level.value(),
                downstream_level: down.water_level.value(),
                control,
            });
        }

        let nodes = graph
            .node_indices()
            .map(|idx| {
                let node = &graph[idx];
                let target = targets.get(&node.id).copied().unwrap_or(0.0);
                (idx.index(), node.id, node.role, target)
            })
            .collect();

        Ok(Self {
            network,
            config,
            channels,
            variables,
            nodes,
            depth_solver: NormalDepthSolver::new().with_tolerance(1e-6),
        })
    }

    pub fn initial_point(&self) -> Vec<f64> {
        self.variables.iter().map(|v| v.current).collect()
    }

    pub fn variable_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let lb = vec![0.0; self.variables.len()];
        let ub = self.variables.iter().map(|v| v.max).collect();
        (lb, ub)
    }

    /// Opening applied to a gated channel at point `x`.
    pub fn opening(&self, slot: &GateSlot, x: &[f64]) -> f64 {
        match slot.variable {
            Some(i) => x[i],
            None => slot.current_opening,
        }
    }

    pub fn channel_flow(&self, model: &ChannelModel, x: &[f64]) -> f64 {
        if !model.in_service {
            return 0.0;
        }
        match &model.control {
            Control::Gated(slot) => slot.discharge(self.opening(slot, x)).flow,
            Control::Open(flow) => *flow,
        }
    }

    pub fn evaluate(&self, x: &[f64]) -> Evaluation {
        let mut net_inflow = vec![0.0; self.nodes.len()];
        let channels = self
            .channels
            .iter()
            .map(|model| {
                let flow = self.channel_flow(model, x);
                net_inflow[model.to] += flow;
                net_inflow[model.from] -= flow;
                self.channel_state(model, flow)
            })
            .collect();
        Evaluation {
            channels,
            net_inflow,
        }
    }

    fn channel_state(&self, model: &ChannelModel, flow: f64) -> ChannelEval {
        if flow <= 0.0 {
            return ChannelEval {
                flow: 0.0,
                depth: 0.0,
                velocity: 0.0,
                froude: 0.0,
                friction_loss: 0.0,
                depth_converged: true,
            };
        }
        let normal = self
            .depth_solver
            .solve(&model.section, model.slope, model.manning_n, flow);
        let loss_depth = model.stage_depth.unwrap_or(normal.depth);
        let sf = friction_slope(flow, loss_depth, &model.section, model.manning_n);
        ChannelEval {
            flow,
            depth: normal.depth,
            velocity: normal.velocity,
            froude: froude_number(normal.velocity, model.section.hydraulic_depth(normal.depth)),
            friction_loss: model.length * sf,
            depth_converged: normal.converged,
        }
    }

    pub fn objective(&self, x: &[f64], eval: &Evaluation) -> ObjectiveBreakdown {
        let weights = self.config.weights;
        let head_loss: f64 = eval
            .channels
            .iter()
            .map(|c| c.friction_loss)
            .filter(|l| l.is_finite())
            .sum();
        let flow_deviation: f64 = self
            .nodes
            .iter()
            .filter(|(_, _, role, _)| *role == NodeRole::Zone)
            .map(|&(idx, _, _, target)| smooth_abs(eval.net_inflow[idx] - target))
            .sum();
        let gate_movement: f64 = self
            .variables
            .iter()
            .zip(x)
            .map(|(v, &a)| smooth_abs(a - v.current))
            .sum();

        let head_loss = weights.head_loss * head_loss;
        let flow_deviation = weights.flow_deviation * flow_deviation;
        let gate_movement = weights.gate_movement * gate_movement;
        ObjectiveBreakdown {
            head_loss,
            flow_deviation,
            gate_movement,
            total: head_loss + flow_deviation + gate_movement,
        }
    }

    /// Every constraint residual with a positive amount, in network order.
    pub fn violations(&self, x: &[f64], eval: &Evaluation) -> Vec<ConstraintViolation> {
        let cfg = self.config;
        let mut out = Vec::new();
        let mut push = |kind, entity: String, value: f64, limit: f64, amount: f64| {
            if amount > 0.0 {
                out.push(ConstraintViolation {
                    kind,
                    entity,
                    value,
                    limit,
                    amount,
                });
            }
        };

        for &(idx, id, role, _) in &self.nodes {
            let net = eval.net_inflow[idx];
            match role {
                NodeRole::Junction => {
                    push(ConstraintKind::JunctionBalance, id.to_string(), net, 0.0, net.abs())
                }
                NodeRole::Zone => {
                    push(ConstraintKind::NegativeDelivery, id.to_string(), net, 0.0, -net)
                }
                NodeRole::Source => {}
            }
        }

        for (model, state) in self.channels.iter().zip(&eval.channels) {
            let entity = model.id.to_string();
            push(
                ConstraintKind::ChannelCapacity,
                entity.clone(),
                state.flow,
                model.capacity,
                state.flow - model.capacity,
            );
            if state.flow > cfg.active_flow_threshold {
                push(
                    ConstraintKind::MinDepth,
                    entity.clone(),
                    state.depth,
                    cfg.min_depth,
                    cfg.min_depth - state.depth,
                );
                push(
                    ConstraintKind::MinVelocity,
                    entity.clone(),
                    state.velocity,
                    cfg.min_velocity,
                    cfg.min_velocity - state.velocity,
                );
                push(
                    ConstraintKind::MaxVelocity,
                    entity,
                    state.velocity,
                    cfg.max_velocity,
                    state.velocity - cfg.max_velocity,
                );
            }
        }

        for (v, &a) in self.variables.iter().zip(x) {
            push(ConstraintKind::OpeningBounds, v.gate.to_string(), a, 0.0, -a);
            push(ConstraintKind::OpeningBounds, v.gate.to_string(), a, v.max, a - v.max);
        }
        out
    }

    /// Σ amount² over all violated constraints.
    pub fn penalty_sum(&self, x: &[f64], eval: &Evaluation) -> f64 {
        self.violations(x, eval)
            .iter()
            .map(|v| v.amount * v.amount)
            .sum()
    }
}
