use crate::{ChannelId, GateId, Network, NetworkSnapshot, NodeId, NodeRole};
use anyhow::{anyhow, Result};
use petgraph::algo::connected_components;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// Summary statistics produced by `canal graph stats`.
#[derive(Debug)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    /// Weakly connected components (channel direction ignored)
    pub connected_components: usize,
    pub max_in_degree: usize,
    pub max_out_degree: usize,
    pub avg_degree: f64,
    /// Nodes with more than one in-service inflow (cross-connections)
    pub merge_points: usize,
}

/// One weakly connected piece of the network.
#[derive(Debug)]
pub struct IslandSummary {
    pub island_id: usize,
    pub node_count: usize,
    /// Whether the island contains a source; zones in sourceless islands
    /// can never be served
    pub has_source: bool,
}

#[derive(Debug)]
pub struct NodeAssignment {
    pub node_id: NodeId,
    pub label: String,
    pub island_id: usize,
}

#[derive(Debug)]
pub struct IslandAnalysis {
    pub islands: Vec<IslandSummary>,
    pub assignments: Vec<NodeAssignment>,
}

/// Degree and component statistics over the directed channel graph.
pub fn graph_stats(network: &Network) -> Result<GraphStats> {
    let graph = &network.graph;
    let node_count = graph.node_count();
    let edge_count = graph.edge_count();

    let mut max_in_degree = 0;
    let mut max_out_degree = 0;
    let mut merge_points = 0;
    for node in graph.node_indices() {
        let incoming = graph.edges_directed(node, Direction::Incoming).count();
        let outgoing = graph.edges_directed(node, Direction::Outgoing).count();
        max_in_degree = max_in_degree.max(incoming);
        max_out_degree = max_out_degree.max(outgoing);

        let live_inflows = graph
            .edges_directed(node, Direction::Incoming)
            .filter(|e| e.weight().status)
            .count();
        if live_inflows > 1 {
            merge_points += 1;
        }
    }
    let avg_degree = if node_count == 0 {
        0.0
    } else {
        2.0 * edge_count as f64 / node_count as f64
    };

    Ok(GraphStats {
        node_count,
        edge_count,
        connected_components: connected_components(graph),
        max_in_degree,
        max_out_degree,
        avg_degree,
        merge_points,
    })
}

/// Label weakly connected components with a breadth-first sweep.
pub fn find_islands(network: &Network) -> Result<IslandAnalysis> {
    let graph = &network.graph;
    let mut visited = HashSet::new();
    let mut islands = Vec::new();
    let mut assignments = Vec::new();

    for start in graph.node_indices() {
        if visited.contains(&start) {
            continue;
        }
        let island_id = islands.len();
        let mut queue = VecDeque::from([start]);
        let mut members = Vec::new();
        while let Some(node) = queue.pop_front() {
            if !visited.insert(node) {
                continue;
            }
            members.push(node);
            queue.extend(
                graph
                    .neighbors_undirected(node)
                    .filter(|n| !visited.contains(n)),
            );
        }

        islands.push(IslandSummary {
            island_id,
            node_count: members.len(),
            has_source: members
                .iter()
                .any(|&idx| graph[idx].role == NodeRole::Source),
        });
        assignments.extend(members.into_iter().map(|idx| NodeAssignment {
            node_id: graph[idx].id,
            label: graph[idx].label(),
            island_id,
        }));
    }
    assignments.sort_by_key(|a| a.node_id);
    Ok(IslandAnalysis {
        islands,
        assignments,
    })
}

/// Export the topology as Graphviz DOT. Gated channels carry the gate id in
/// the edge label; out-of-service channels are dashed.
pub fn export_graph(network: &Network, format: &str) -> Result<String> {
    match format.to_ascii_lowercase().as_str() {
        "graphviz" | "dot" => Ok(render_dot(network)),
        other => Err(anyhow!("unsupported graph export format '{other}'")),
    }
}

fn render_dot(network: &Network) -> String {
    let mut buffer = String::from("digraph canal_network {\n");
    for idx in network.graph.node_indices() {
        let node = &network.graph[idx];
        let shape = match node.role {
            NodeRole::Source => "house",
            NodeRole::Junction => "point",
            NodeRole::Zone => "box",
        };
        buffer.push_str(&format!(
            "  n{} [label=\"{}\", shape={}];\n",
            node.id.value(),
            sanitize_label(&node.label()),
            shape
        ));
    }
    for edge in network.graph.edge_references() {
        let channel = edge.weight();
        let source = network.graph[edge.source()].id.value();
        let target = network.graph[edge.target()].id.value();
        let mut label = format!("C{}", channel.id.value());
        if let Some(gate) = network.gate_on_channel(channel.id) {
            label.push_str(&format!(" / G{}", gate.id.value()));
        }
        let style = if channel.status { "solid" } else { "dashed" };
        buffer.push_str(&format!(
            "  n{source} -> n{target} [label=\"{label}\", style={style}];\n"
        ));
    }
    buffer.push('}');
    buffer
}

fn sanitize_label(label: &str) -> String {
    label.replace('"', "\\\"")
}

/// Nodes reachable from any source following channel direction over
/// in-service channels.
pub fn reachable_from_sources(network: &Network) -> HashSet<NodeIndex> {
    let graph = &network.graph;
    let mut visited = HashSet::new();
    let mut queue: VecDeque<NodeIndex> = network.sources().into_iter().collect();
    while let Some(node) = queue.pop_front() {
        if !visited.insert(node) {
            continue;
        }
        for edge in graph.edges_directed(node, Direction::Outgoing) {
            if edge.weight().status && !visited.contains(&edge.target()) {
                queue.push_back(edge.target());
            }
        }
    }
    visited
}

/// Zones no source can feed by gravity.
pub fn unreachable_zones(network: &Network) -> Vec<NodeId> {
    let reachable = reachable_from_sources(network);
    let mut zones: Vec<NodeId> = network
        .zones()
        .into_iter()
        .filter(|idx| !reachable.contains(idx))
        .map(|idx| network.graph[idx].id)
        .collect();
    zones.sort();
    zones
}

/// Elements to drop or weaken when deriving a contingency network.
#[derive(Debug, Clone, Default)]
pub struct Outage {
    pub channels: HashSet<ChannelId>,
    /// A blocked gate takes its hosting channel out of service
    pub gates: HashSet<GateId>,
    /// Capacity multipliers in (0, 1]
    pub derates: HashMap<ChannelId, f64>,
}

impl Outage {
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.gates.is_empty() && self.derates.is_empty()
    }
}

/// Copy of the network with blocked channels marked out of service and
/// derated channels' capacity scaled. Ids and indices are preserved.
pub fn without_elements(network: &Network, outage: &Outage) -> Result<Network> {
    let blocked_by_gate: HashSet<ChannelId> = outage
        .gates
        .iter()
        .map(|id| {
            network
                .gate(*id)
                .map(|g| g.channel)
                .ok_or_else(|| anyhow!("outage references unknown {id}"))
        })
        .collect::<Result<_>>()?;

    let mut snapshot: NetworkSnapshot = network.to_snapshot();
    for channel in &mut snapshot.channels {
        if outage.channels.contains(&channel.id) || blocked_by_gate.contains(&channel.id) {
            channel.status = false;
        }
        if let Some(&factor) = outage.derates.get(&channel.id) {
            if !(factor > 0.0 && factor <= 1.0) {
                return Err(anyhow!(
                    "derate factor {factor} for {} must lie in (0, 1]",
                    channel.id
                ));
            }
            channel.capacity = channel.capacity * factor;
        }
    }
    Network::from_snapshot(snapshot).map_err(|e| anyhow!(e))
}
