//! Alternative-route search on a reduced network.
//!
//! ## Algorithm
//!
//! ```text
//! for each destination d (sorted by id):
//!     for each source s:
//!         for each simple path s → d with at most max_hops channels:
//!             bottleneck = min capacity along the path
//!             feasibility re-run at the requested flow
//!             keep if head margin ≥ feasibility_threshold
//!     rank: bottleneck desc, length asc, hops asc
//! ```
//!
//! Cycles are harmless because only simple paths are enumerated. Between
//! two nodes joined by parallel channels the one with the larger capacity is
//! used. A destination no source reaches gets an empty candidate list; sources
//! that cannot reach it are skipped before any path is enumerated.

use std::collections::HashSet;

use canal_core::{CanalResult, ChannelId, Network, NodeId, NodeIndex};
use petgraph::algo::{all_simple_paths, has_path_connecting};
use petgraph::graph::DiGraph;
use serde::Serialize;
use tracing::{debug, info, warn};
use web_time::Instant;

use super::{reduced_network, Blockage, ContingencyConfig};
use crate::feasibility::{self, gates_on_path, segments_for_path, FeasibilityConfig, FeasibilityReport};
use crate::normal_depth::NormalDepthSolver;

/// A zone that needs an alternative route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteDemand {
    pub node: NodeId,
    /// m³/s
    pub flow: f64,
    pub target_elevation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteCandidate {
    pub source: NodeId,
    pub nodes: Vec<NodeId>,
    pub channels: Vec<ChannelId>,
    /// Smallest channel capacity on the route (m³/s)
    pub bottleneck: f64,
    pub length: f64,
    pub feasibility: FeasibilityReport,
    /// Bottleneck covers the requested flow
    pub carries_demand: bool,
}

impl RouteCandidate {
    pub fn hops(&self) -> usize {
        self.channels.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationRoutes {
    pub destination: NodeId,
    /// Ranked, best first; empty when disconnected
    pub candidates: Vec<RouteCandidate>,
    pub paths_examined: usize,
    /// Hit `max_paths` before enumeration finished
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContingencyReport {
    pub blockages: Vec<Blockage>,
    pub destinations: Vec<DestinationRoutes>,
    pub timed_out: bool,
}

impl ContingencyReport {
    pub fn routes_for(&self, node: NodeId) -> Option<&DestinationRoutes> {
        self.destinations.iter().find(|d| d.destination == node)
    }

    /// Destinations left without any acceptable route.
    pub fn stranded(&self) -> Vec<NodeId> {
        self.destinations
            .iter()
            .filter(|d| d.candidates.is_empty())
            .map(|d| d.destination)
            .collect()
    }
}

/// In-service view: node weights are node ids, edge weights (channel id,
/// capacity). Node indices match the source network.
fn in_service_graph(network: &Network) -> DiGraph<NodeId, (ChannelId, f64)> {
    network.graph.filter_map(
        |_, node| Some(node.id),
        |_, channel| channel.status.then_some((channel.id, channel.capacity.value())),
    )
}

fn widest_channel(graph: &DiGraph<NodeId, (ChannelId, f64)>, a: NodeIndex, b: NodeIndex) -> Option<(ChannelId, f64)> {
    graph
        .edges_connecting(a, b)
        .map(|e| *e.weight())
        .max_by(|x, y| x.1.total_cmp(&y.1).then(y.0.cmp(&x.0)))
}

fn evaluate_path(
    network: &Network,
    graph: &DiGraph<NodeId, (ChannelId, f64)>,
    path: &[NodeIndex],
    demand: &RouteDemand,
    feasibility_config: &FeasibilityConfig,
    solver: &NormalDepthSolver,
) -> CanalResult<Option<RouteCandidate>> {
    let mut channels = Vec::with_capacity(path.len().saturating_sub(1));
    let mut bottleneck = f64::INFINITY;
    for pair in path.windows(2) {
        let Some((id, capacity)) = widest_channel(graph, pair[0], pair[1]) else {
            return Ok(None);
        };
        channels.push(id);
        bottleneck = bottleneck.min(capacity);
    }

    let segments = segments_for_path(network, &channels, demand.flow, solver)?;
    let length = segments.iter().map(|s| s.length).sum();
    let source = &network.graph[path[0]];
    let report = feasibility::analyze(
        &segments,
        gates_on_path(network, &channels),
        source.water_level.value(),
        demand.target_elevation,
        feasibility_config,
    );

    Ok(Some(RouteCandidate {
        source: source.id,
        nodes: path.iter().map(|&idx| graph[idx]).collect(),
        channels,
        bottleneck,
        length,
        feasibility: report,
        carries_demand: bottleneck >= demand.flow,
    }))
}

/// Search alternative routes to each demand around the given blockages.
///
/// Only structural errors (unknown blockage references, invalid derates)
/// fail. A passed `deadline` stops enumeration and sets `timed_out`; routes
/// found so far are kept.
pub fn find_routes(
    network: &Network,
    blockages: &[Blockage],
    demands: &[RouteDemand],
    feasibility_config: &FeasibilityConfig,
    solver: &NormalDepthSolver,
    config: &ContingencyConfig,
    deadline: Option<Instant>,
) -> CanalResult<ContingencyReport> {
    let reduced = reduced_network(network, blockages)?;
    let graph = in_service_graph(&reduced);
    let sources = reduced.sources();
    let max_intermediate = config.max_hops.saturating_sub(1);

    let mut demands = demands.to_vec();
    demands.sort_by_key(|d| d.node);

    let mut destinations = Vec::with_capacity(demands.len());
    let mut timed_out = false;

    'demands: for demand in &demands {
        let mut routes = DestinationRoutes {
            destination: demand.node,
            candidates: Vec::new(),
            paths_examined: 0,
            truncated: false,
        };
        let Some(target) = reduced.node_index(demand.node) else {
            warn!(node = %demand.node, "contingency destination not in network");
            destinations.push(routes);
            continue;
        };

        let mut seen: HashSet<Vec<NodeIndex>> = HashSet::new();
        'sources: for &source in &sources {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                timed_out = true;
                destinations.push(routes);
                break 'demands;
            }
            if source == target || !has_path_connecting(&graph, source, target, None) {
                continue;
            }
            let paths = all_simple_paths::<Vec<NodeIndex>, _>(&graph, source, target, 0, Some(max_intermediate));
            for path in paths {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    timed_out = true;
                    destinations.push(routes);
                    break 'demands;
                }
                if routes.paths_examined >= config.max_paths {
                    routes.truncated = true;
                    break 'sources;
                }
                // Parallel channels yield the same node sequence twice
                if !seen.insert(path.clone()) {
                    continue;
                }
                routes.paths_examined += 1;

                if let Some(candidate) = evaluate_path(&reduced, &graph, &path, demand, feasibility_config, solver)? {
                    if candidate.feasibility.margin() >= config.feasibility_threshold {
                        routes.candidates.push(candidate);
                    }
                }
            }
        }

        routes.candidates.sort_by(|a, b| {
            b.bottleneck
                .total_cmp(&a.bottleneck)
                .then(a.length.total_cmp(&b.length))
                .then(a.hops().cmp(&b.hops()))
                .then(a.channels.cmp(&b.channels))
        });
        debug!(
            destination = %demand.node,
            examined = routes.paths_examined,
            kept = routes.candidates.len(),
            "routes enumerated"
        );
        destinations.push(routes);
    }

    let report = ContingencyReport {
        blockages: blockages.to_vec(),
        destinations,
        timed_out,
    };
    if report.timed_out {
        warn!("contingency routing timed out after {} destination(s)", report.destinations.len());
    } else {
        info!(
            "contingency routing: {} destination(s), {} stranded",
            report.destinations.len(),
            report.stranded().len()
        );
    }
    Ok(report)
}
