//! End-to-end optimization of one delivery cycle.
//!
//! ```text
//! snapshot ─► validate ─► delivery paths ─► feasibility filter
//!                                               │
//!                                               ▼
//!                                      gate optimization ─► travel time, energy profiles
//!                                               │
//!            solo optimizations (parallel) ─► sequencer
//!                                               │
//!                      energy recovery, junction splits, contingency
//! ```
//!
//! The call is pure: it owns its network copy, touches no shared state and
//! can run concurrently with other calls. Only structural input errors abort
//! it; everything else is annotated on the result.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use canal_core::{
    CanalError, CanalResult, ChannelId, Diagnostics, GateId, Network, NodeId, NodeRole, RequestId,
};
use chrono::{DateTime, Utc};
use petgraph::algo::astar;
use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
#[cfg(feature = "desktop")]
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};
use web_time::Instant;

use crate::config::OptimizerConfig;
use crate::contingency::{find_routes, reduced_network, ContingencyReport, RouteDemand};
use crate::energy_recovery::{self, EnergyRecoveryReport};
use crate::feasibility::{self, gates_on_path, segments_for_path, FeasibilityReport};
use crate::flow_split::{split_flow, Branch, BranchGate, FlowSplitResult};
use crate::gate_opt::{optimize_gates, GateSettingSolution, SolutionQuality};
use crate::hydraulics::EnergyProfile;
use crate::request::{validate_requests, DeliveryRequest, OptimizationRequest};
use crate::sequencer::{sequence, DeliveryCandidate, Schedule};
use crate::travel_time::{self, SegmentInput, TravelTimeEstimate};

/// Priority assumed for a branch nobody has requested water on.
const DEFAULT_BRANCH_PRIORITY: f64 = 5.0;

/// Shortest in-service route from a source to a zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryPath {
    pub source: NodeId,
    pub nodes: Vec<NodeId>,
    pub channels: Vec<ChannelId>,
    pub length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestOutcome {
    pub request: RequestId,
    pub target: NodeId,
    /// None when no source reaches the target
    pub path: Option<DeliveryPath>,
    pub feasibility: Option<FeasibilityReport>,
    pub feasible: bool,
    /// Head shortfall (m); negative values are spare head
    pub shortfall: Option<f64>,
    /// Net inflow at the target in the optimized state
    pub delivered_flow: Option<f64>,
    pub travel_time: Option<TravelTimeEstimate>,
    pub energy_profile: Option<EnergyProfile>,
}

/// Advisory split at a junction with two or more outgoing channels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JunctionSplit {
    pub node: NodeId,
    pub split: FlowSplitResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContingencyOutcome {
    pub routes: ContingencyReport,
    /// Gate settings re-optimized on the network with the blockages applied
    pub gate_settings: GateSettingSolution,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub generated_at: DateTime<Utc>,
    /// Reference time used for deadlines
    pub as_of: DateTime<Utc>,
    /// Gates this result wants to move; callers arbitrate overlapping scopes
    pub scope: Vec<GateId>,
    pub quality: SolutionQuality,
    pub timed_out: bool,
    pub gate_settings: GateSettingSolution,
    pub request_outcomes: Vec<RequestOutcome>,
    pub junction_splits: Vec<JunctionSplit>,
    pub schedule: Schedule,
    pub energy_recovery: EnergyRecoveryReport,
    pub contingency: Option<ContingencyOutcome>,
    pub diagnostics: Diagnostics,
    pub solve_time_ms: u128,
}

impl OptimizationResult {
    pub fn outcome(&self, request: RequestId) -> Option<&RequestOutcome> {
        self.request_outcomes.iter().find(|o| o.request == request)
    }

    /// Openings for SCADA, keyed by gate.
    pub fn gate_openings(&self) -> BTreeMap<GateId, f64> {
        controllable_openings(&self.gate_settings)
    }
}

/// Fluent facade over [`optimize`].
pub struct DeliveryOptimization<'a> {
    request: &'a OptimizationRequest,
    config: OptimizerConfig,
}

impl<'a> DeliveryOptimization<'a> {
    pub fn new(request: &'a OptimizationRequest) -> Self {
        Self {
            request,
            config: OptimizerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.config.gate.max_iterations = max_iter;
        self
    }

    pub fn run(self) -> CanalResult<OptimizationResult> {
        optimize(self.request, &self.config)
    }
}

fn in_service_lengths(network: &Network) -> DiGraph<NodeId, (ChannelId, f64)> {
    network.graph.filter_map(
        |_, node| Some(node.id),
        |_, channel| channel.status.then_some((channel.id, channel.length.value())),
    )
}

/// Shortest in-service path (by length) from any source to `target`; ties go
/// to the source with the lower id.
pub fn delivery_path(network: &Network, target: NodeId) -> Option<DeliveryPath> {
    let graph = in_service_lengths(network);
    let goal = network.node_index(target)?;

    let mut best: Option<(f64, NodeId, Vec<_>)> = None;
    for source in network.sources() {
        let Some((cost, nodes)) = astar(&graph, source, |n| n == goal, |e| e.weight().1, |_| 0.0) else {
            continue;
        };
        let source_id = graph[source];
        let better = match &best {
            None => true,
            Some((best_cost, best_id, _)) => cost < *best_cost || (cost == *best_cost && source_id < *best_id),
        };
        if better {
            best = Some((cost, source_id, nodes));
        }
    }

    let (length, source, nodes) = best?;
    let channels = nodes
        .windows(2)
        .filter_map(|pair| {
            graph
                .edges_connecting(pair[0], pair[1])
                .map(|e| *e.weight())
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
                .map(|(id, _)| id)
        })
        .collect();

    Some(DeliveryPath {
        source,
        nodes: nodes.iter().map(|&idx| graph[idx]).collect(),
        channels,
        length,
    })
}

fn controllable_openings(solution: &GateSettingSolution) -> BTreeMap<GateId, f64> {
    solution
        .gates
        .iter()
        .filter(|g| g.controllable)
        .map(|g| (g.gate, g.opening))
        .collect()
}

fn path_flows(path: &DeliveryPath, solution: &GateSettingSolution) -> Vec<f64> {
    path.channels
        .iter()
        .map(|&id| solution.channel(id).map(|c| c.flow.max(0.0)).unwrap_or(0.0))
        .collect()
}

fn travel_along(
    network: &Network,
    path: &DeliveryPath,
    solution: &GateSettingSolution,
    config: &OptimizerConfig,
) -> CanalResult<TravelTimeEstimate> {
    let segments = path
        .channels
        .iter()
        .zip(path_flows(path, solution))
        .map(|(&id, flow)| SegmentInput::from_network(network, id, flow))
        .collect::<CanalResult<Vec<_>>>()?;
    Ok(travel_time::estimate(&segments, &config.normal_depth, &config.travel_time))
}

fn energy_profile(network: &Network, path: &DeliveryPath, solution: &GateSettingSolution) -> EnergyProfile {
    let mut profile = EnergyProfile::new();
    let mut chainage = 0.0;
    if let Some(source) = network.node(path.source) {
        profile.push(
            source.id,
            None,
            0.0,
            source.bed_elevation.value(),
            source.water_level.value(),
            0.0,
        );
    }
    for &id in &path.channels {
        let Some(channel) = network.channel(id) else {
            continue;
        };
        let Some(node) = network.node(channel.downstream) else {
            continue;
        };
        chainage += channel.length.value();
        let velocity = solution.channel(id).map(|c| c.velocity).unwrap_or(0.0);
        profile.push(
            node.id,
            Some(id),
            chainage,
            node.bed_elevation.value(),
            node.water_level.value(),
            velocity,
        );
    }
    profile
}

struct SoloRun {
    openings: BTreeMap<GateId, f64>,
    travel_seconds: Option<f64>,
    quality: SolutionQuality,
}

fn solo_run(
    network: &Network,
    request: &DeliveryRequest,
    path: &DeliveryPath,
    config: &OptimizerConfig,
    deadline: Option<Instant>,
) -> CanalResult<SoloRun> {
    let targets = HashMap::from([(request.target, request.required_flow)]);
    let solution = optimize_gates(network, &targets, &config.gate, deadline)?;
    let travel = travel_along(network, path, &solution, config)?;
    Ok(SoloRun {
        openings: controllable_openings(&solution),
        travel_seconds: travel.total_seconds,
        quality: solution.quality,
    })
}

#[cfg(feature = "desktop")]
fn solo_runs(
    network: &Network,
    jobs: &[(&DeliveryRequest, &DeliveryPath)],
    config: &OptimizerConfig,
    deadline: Option<Instant>,
) -> CanalResult<Vec<SoloRun>> {
    jobs.par_iter()
        .map(|(request, path)| solo_run(network, request, path, config, deadline))
        .collect()
}

#[cfg(not(feature = "desktop"))]
fn solo_runs(
    network: &Network,
    jobs: &[(&DeliveryRequest, &DeliveryPath)],
    config: &OptimizerConfig,
    deadline: Option<Instant>,
) -> CanalResult<Vec<SoloRun>> {
    jobs.iter()
        .map(|(request, path)| solo_run(network, request, path, config, deadline))
        .collect()
}

fn junction_splits(
    network: &Network,
    solution: &GateSettingSolution,
    targets: &HashMap<NodeId, f64>,
    requests: &[DeliveryRequest],
) -> CanalResult<Vec<JunctionSplit>> {
    let graph = &network.graph;
    let mut splits = Vec::new();

    for junction in network.junctions() {
        let node = &graph[junction];
        let outgoing: Vec<_> = graph
            .edges_directed(junction, Direction::Outgoing)
            .filter(|e| e.weight().status)
            .collect();
        if outgoing.len() < 2 {
            continue;
        }
        let inflow: f64 = graph
            .edges_directed(junction, Direction::Incoming)
            .filter_map(|e| solution.channel(e.weight().id))
            .map(|c| c.flow.max(0.0))
            .sum();

        let branches: Vec<Branch> = outgoing
            .iter()
            .map(|edge| {
                let channel = edge.weight();
                let down = &graph[edge.target()];
                let demand = if down.role == NodeRole::Zone {
                    targets.get(&down.id).copied().unwrap_or(0.0)
                } else {
                    solution.channel(channel.id).map(|c| c.flow.max(0.0)).unwrap_or(0.0)
                };
                let priority = requests
                    .iter()
                    .filter(|r| r.target == down.id)
                    .map(|r| f64::from(r.priority))
                    .reduce(f64::max)
                    .unwrap_or(DEFAULT_BRANCH_PRIORITY);
                let gate = network.gate_on_channel(channel.id).and_then(|g| {
                    let sill = network.gate_sill(g)?.value();
                    Some(BranchGate {
                        width: g.width.value(),
                        discharge_coefficient: g.discharge_coefficient,
                        max_opening: g.max_opening.value(),
                        upstream_head: (node.water_level.value() - sill).max(0.0),
                        downstream_head: (down.water_level.value() - sill).max(0.0),
                    })
                });
                Branch {
                    id: channel.id.value(),
                    demand,
                    priority,
                    capacity: channel.capacity.value(),
                    gate,
                }
            })
            .collect();

        splits.push(JunctionSplit {
            node: node.id,
            split: split_flow(inflow, &branches)?,
        });
    }
    Ok(splits)
}

fn run_contingency(
    network: &Network,
    request: &OptimizationRequest,
    targets: &HashMap<NodeId, f64>,
    config: &OptimizerConfig,
    deadline: Option<Instant>,
) -> CanalResult<ContingencyOutcome> {
    let mut demands: BTreeMap<NodeId, RouteDemand> = BTreeMap::new();
    for r in &request.requests {
        let entry = demands.entry(r.target).or_insert(RouteDemand {
            node: r.target,
            flow: 0.0,
            target_elevation: r.target_elevation,
        });
        entry.flow += r.required_flow;
        entry.target_elevation = entry.target_elevation.max(r.target_elevation);
    }
    let demands: Vec<RouteDemand> = demands.into_values().collect();

    let routes = find_routes(
        network,
        &request.blockages,
        &demands,
        &config.feasibility,
        &config.normal_depth,
        &config.contingency,
        deadline,
    )?;
    let reduced = reduced_network(network, &request.blockages)?;
    let gate_settings = optimize_gates(&reduced, targets, &config.gate, deadline)?;
    Ok(ContingencyOutcome { routes, gate_settings })
}

/// Run one optimization cycle.
pub fn optimize(request: &OptimizationRequest, config: &OptimizerConfig) -> CanalResult<OptimizationResult> {
    let start = Instant::now();
    let deadline = request.timeout_ms.map(|ms| start + Duration::from_millis(ms));
    let as_of = request.as_of.unwrap_or_else(Utc::now);
    let _span = info_span!("optimize", requests = request.requests.len()).entered();

    config.validate()?;
    let network = Network::from_snapshot(request.network.clone())?;

    let mut diag = Diagnostics::new();
    network.validate_into(&mut diag);
    validate_requests(&network, &request.requests, &mut diag);
    if diag.has_errors() {
        warn!("rejecting request: {}", diag.summary());
        return Err(CanalError::Validation(diag));
    }
    info!("network: {}", network.stats());

    // Paths and feasibility
    let mut outcomes = Vec::with_capacity(request.requests.len());
    let mut targets: HashMap<NodeId, f64> = HashMap::new();
    for r in &request.requests {
        let path = delivery_path(&network, r.target);
        let report = match &path {
            Some(path) => {
                let segments = segments_for_path(&network, &path.channels, r.required_flow, &config.normal_depth)?;
                let source_level = network
                    .node(path.source)
                    .map(|n| n.water_level.value())
                    .unwrap_or(f64::NEG_INFINITY);
                Some(feasibility::analyze(
                    &segments,
                    gates_on_path(&network, &path.channels),
                    source_level,
                    r.target_elevation,
                    &config.feasibility,
                ))
            }
            None => None,
        };
        let feasible = report.is_some_and(|rep| rep.feasible);
        let entity = r.id.to_string();
        match (&path, &report) {
            (None, _) => diag.add_warning_with_entity("delivery", &format!("no source reaches {}", r.target), &entity),
            (Some(_), Some(rep)) if !rep.feasible => diag.add_warning_with_entity(
                "delivery",
                &format!("head shortfall of {:.3} m", rep.shortfall),
                &entity,
            ),
            (Some(_), Some(rep)) if !rep.meets_safety_factor => {
                diag.add_warning_with_entity("delivery", "feasible but inside the safety margin", &entity)
            }
            _ => {}
        }
        if feasible {
            *targets.entry(r.target).or_insert(0.0) += r.required_flow;
        }
        outcomes.push(RequestOutcome {
            request: r.id,
            target: r.target,
            shortfall: report.map(|rep| rep.shortfall),
            feasibility: report,
            feasible,
            path,
            delivered_flow: None,
            travel_time: None,
            energy_profile: None,
        });
    }
    debug!(feasible = targets.len(), "feasibility filter applied");

    // Joint gate optimization
    let gate_settings = optimize_gates(&network, &targets, &config.gate, deadline)?;
    for state in gate_settings.channels.iter().filter(|c| c.flow > 0.0 && !c.depth_converged) {
        diag.add_warning_with_entity(
            "hydraulics",
            "normal depth did not converge; depth is approximate",
            &state.channel.to_string(),
        );
    }

    for outcome in &mut outcomes {
        let Some(path) = &outcome.path else { continue };
        outcome.delivered_flow = gate_settings.delivered_at(outcome.target);
        if outcome.feasible {
            outcome.travel_time = Some(travel_along(&network, path, &gate_settings, config)?);
            outcome.energy_profile = Some(energy_profile(&network, path, &gate_settings));
        }
    }

    // Per-request openings and travel times for the sequencer
    let jobs: Vec<(&DeliveryRequest, &DeliveryPath)> = request
        .requests
        .iter()
        .zip(&outcomes)
        .filter(|(_, o)| o.feasible)
        .filter_map(|(r, o)| o.path.as_ref().map(|p| (r, p)))
        .collect();
    let solo: Vec<Option<SoloRun>> = if config.solo_runs {
        solo_runs(&network, &jobs, config, deadline)?.into_iter().map(Some).collect()
    } else {
        jobs.iter().map(|_| None).collect()
    };
    let mut solo_by_request: HashMap<RequestId, SoloRun> = HashMap::new();
    for ((r, _), run) in jobs.iter().zip(solo) {
        if let Some(run) = run {
            if run.quality == SolutionQuality::Infeasible {
                diag.add_warning_with_entity(
                    "sequencer",
                    "no admissible gate setting when served alone",
                    &r.id.to_string(),
                );
            }
            solo_by_request.insert(r.id, run);
        }
    }

    let joint_openings = controllable_openings(&gate_settings);
    let candidates: Vec<DeliveryCandidate> = request
        .requests
        .iter()
        .zip(&outcomes)
        .map(|(r, o)| {
            let (openings, travel_seconds) = match solo_by_request.remove(&r.id) {
                Some(run) => (run.openings, run.travel_seconds),
                None => (
                    joint_openings.clone(),
                    o.travel_time.as_ref().and_then(|t| t.total_seconds),
                ),
            };
            DeliveryCandidate {
                request: r.id,
                priority: r.priority,
                zone_elevation: network.node(r.target).map(|n| n.bed_elevation.value()).unwrap_or(0.0),
                deadline: r.deadline,
                volume: r.required_volume,
                flow: r.required_flow,
                feasible: o.feasible,
                openings,
                travel_seconds,
            }
        })
        .collect();
    let current: BTreeMap<GateId, f64> = network
        .gates
        .iter()
        .map(|g| (g.id, g.opening.value()))
        .collect();
    let schedule = sequence(
        &candidates,
        &current,
        network.max_zone_elevation().value(),
        as_of,
        &config.sequencer,
        deadline,
    );

    let splits = junction_splits(&network, &gate_settings, &targets, &request.requests)?;
    let energy = energy_recovery::analyze(&network, &gate_settings, &config.energy);

    let contingency = if request.blockages.is_empty() {
        None
    } else {
        Some(run_contingency(&network, request, &targets, config, deadline)?)
    };

    let timed_out = gate_settings.timed_out
        || schedule.timed_out
        || contingency
            .as_ref()
            .is_some_and(|c| c.routes.timed_out || c.gate_settings.timed_out);

    let mut scope: Vec<GateId> = gate_settings
        .gates
        .iter()
        .filter(|g| g.controllable)
        .map(|g| g.gate)
        .collect();
    scope.sort();

    let result = OptimizationResult {
        generated_at: Utc::now(),
        as_of,
        scope,
        quality: gate_settings.quality,
        timed_out,
        gate_settings,
        request_outcomes: outcomes,
        junction_splits: splits,
        schedule,
        energy_recovery: energy,
        contingency,
        diagnostics: diag,
        solve_time_ms: start.elapsed().as_millis(),
    };

    if result.quality.is_actionable() {
        info!(
            "cycle finished: {}, {} scheduled, {} unscheduled, {} ms",
            result.quality,
            result.schedule.slots.len(),
            result.schedule.unscheduled.len(),
            result.solve_time_ms
        );
    } else {
        warn!("cycle finished with {} result", result.quality);
    }
    Ok(result)
}
