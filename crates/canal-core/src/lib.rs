//! # canal-core: Gravity Canal Network Model
//!
//! Provides the data structures for a pump-free irrigation canal network and
//! the structural checks every optimization pass relies on.
//!
//! ## Design Philosophy
//!
//! Networks are modeled as **directed multigraphs** where:
//! - **Nodes**: water-level control points with a role (source, junction,
//!   zone delivery point)
//! - **Edges**: open channels, directed downstream
//! - **Gates**: structures hosted on a channel, kept in a side table keyed by
//!   channel so a channel carries at most one gate
//!
//! The graph is generally a tree with a few cross-connections; cycles are
//! allowed and every path search tolerates them.
//!
//! A [`Network`] is an immutable snapshot for the duration of one
//! optimization call. Topology changes happen upstream (GIS) and arrive as a
//! fresh [`NetworkSnapshot`].
//!
//! ## Quick Start
//!
//! ```rust
//! use canal_core::*;
//!
//! let mut network = Network::new();
//! network.add_node(Node::new(NodeId::new(1), "Headworks", NodeRole::Source, 218.0, 221.0));
//! network.add_node(Node::new(NodeId::new(2), "Block A", NodeRole::Zone, 216.5, 217.5));
//!
//! network
//!     .add_channel(Channel::trapezoidal(
//!         ChannelId::new(1),
//!         NodeId::new(1),
//!         NodeId::new(2),
//!         2000.0,
//!         4.0,
//!         1.5,
//!     ))
//!     .unwrap();
//! network
//!     .add_gate(Gate::automated(GateId::new(1), ChannelId::new(1), 0.4, 1.5, 3.0))
//!     .unwrap();
//!
//! let warnings = network.ensure_valid().unwrap();
//! assert!(!warnings.has_errors());
//! ```
//!
//! ## Modules
//!
//! - [`diagnostics`] - Validation issue collection
//! - [`graph_utils`] - Topology queries (islands, reachability, reduced copies)
//! - [`units`] - Unit newtypes for levels, discharges, velocities
//! - [`error`] - Unified error type

use std::collections::HashMap;

use petgraph::graph::EdgeIndex;
use petgraph::prelude::*;
use serde::{Deserialize, Serialize};

pub mod diagnostics;
pub mod error;
pub mod graph_utils;
pub mod units;

pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{CanalError, CanalResult};
pub use graph_utils::*;
pub use petgraph::graph::NodeIndex;
pub use units::{CubicMetersPerSecond, Kilowatts, Meters, MetersPerSecond, Seconds};

macro_rules! impl_id {
    ($type:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $type(usize);

        impl $type {
            #[inline]
            pub fn new(value: usize) -> Self {
                $type(value)
            }
            #[inline]
            pub fn value(&self) -> usize {
                self.0
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{} {}", $label, self.0)
            }
        }
    };
}

impl_id!(NodeId, "Node");
impl_id!(ChannelId, "Channel");
impl_id!(GateId, "Gate");
impl_id!(RequestId, "Request");

/// What a node does in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Reservoir or river offtake; supplies water by gravity
    Source,
    /// Interior division point where inflow must equal outflow
    Junction,
    /// Zone delivery point where water leaves the network
    Zone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub name: String,
    pub role: NodeRole,
    /// Bed (invert) or ground elevation, m MSL
    pub bed_elevation: Meters,
    /// Current water surface elevation, m MSL
    pub water_level: Meters,
}

impl Node {
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        role: NodeRole,
        bed_elevation: f64,
        water_level: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            role,
            bed_elevation: Meters(bed_elevation),
            water_level: Meters(water_level),
        }
    }

    /// Water depth above the bed; zero when the node is dry.
    pub fn depth(&self) -> Meters {
        (self.water_level - self.bed_elevation).max(Meters::ZERO)
    }

    pub fn is_wetted(&self) -> bool {
        self.depth().value() > 0.0
    }
}

/// Cross-section shape of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelShape {
    /// Trapezoid with side slope `z` (horizontal run per unit rise)
    Trapezoidal { bed_width: Meters, side_slope: f64 },
    /// Lined rectangular section
    Rectangular { width: Meters },
}

impl ChannelShape {
    pub fn bed_width(&self) -> Meters {
        match self {
            ChannelShape::Trapezoidal { bed_width, .. } => *bed_width,
            ChannelShape::Rectangular { width } => *width,
        }
    }

    pub fn side_slope(&self) -> f64 {
        match self {
            ChannelShape::Trapezoidal { side_slope, .. } => *side_slope,
            ChannelShape::Rectangular { .. } => 0.0,
        }
    }
}

fn default_condition_factor() -> f64 {
    1.0
}

fn default_in_service() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    #[serde(default)]
    pub name: String,
    pub upstream: NodeId,
    pub downstream: NodeId,
    pub length: Meters,
    pub shape: ChannelShape,
    /// Manning roughness coefficient (s/m^1/3)
    pub manning_n: f64,
    /// Longitudinal bed slope (m/m)
    pub bed_slope: f64,
    /// Sediment-derived velocity multiplier in (0, 1]
    #[serde(default = "default_condition_factor")]
    pub condition_factor: f64,
    /// Maximum safe discharge
    pub capacity: CubicMetersPerSecond,
    /// In-service flag; out-of-service channels carry no flow
    #[serde(default = "default_in_service")]
    pub status: bool,
}

impl Channel {
    /// Earthen trapezoidal channel with typical roughness, slope and a
    /// generous capacity; adjust fields with the builder methods.
    pub fn trapezoidal(
        id: ChannelId,
        upstream: NodeId,
        downstream: NodeId,
        length: f64,
        bed_width: f64,
        side_slope: f64,
    ) -> Self {
        Self {
            id,
            name: String::new(),
            upstream,
            downstream,
            length: Meters(length),
            shape: ChannelShape::Trapezoidal {
                bed_width: Meters(bed_width),
                side_slope,
            },
            manning_n: 0.025,
            bed_slope: 0.0002,
            condition_factor: 1.0,
            capacity: CubicMetersPerSecond(20.0),
            status: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_roughness(mut self, manning_n: f64) -> Self {
        self.manning_n = manning_n;
        self
    }

    pub fn with_slope(mut self, bed_slope: f64) -> Self {
        self.bed_slope = bed_slope;
        self
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = CubicMetersPerSecond(capacity);
        self
    }

    pub fn with_condition_factor(mut self, factor: f64) -> Self {
        self.condition_factor = factor;
        self
    }
}

/// How a gate is operated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    /// Remotely actuated; the optimizer may move it
    Automated,
    /// Needs a field crew; held at its current opening during optimization
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub id: GateId,
    #[serde(default)]
    pub name: String,
    /// Channel hosting the gate; the sill sits at the channel's upstream bed
    pub channel: ChannelId,
    pub kind: GateKind,
    /// Current vertical opening
    pub opening: Meters,
    pub max_opening: Meters,
    pub discharge_coefficient: f64,
    pub width: Meters,
}

impl Gate {
    /// Automated sluice gate with a typical discharge coefficient of 0.6.
    pub fn automated(
        id: GateId,
        channel: ChannelId,
        opening: f64,
        max_opening: f64,
        width: f64,
    ) -> Self {
        Self {
            id,
            name: String::new(),
            channel,
            kind: GateKind::Automated,
            opening: Meters(opening),
            max_opening: Meters(max_opening),
            discharge_coefficient: 0.6,
            width: Meters(width),
        }
    }

    pub fn manual(
        id: GateId,
        channel: ChannelId,
        opening: f64,
        max_opening: f64,
        width: f64,
    ) -> Self {
        Self {
            kind: GateKind::Manual,
            ..Self::automated(id, channel, opening, max_opening, width)
        }
    }

    pub fn with_discharge_coefficient(mut self, cd: f64) -> Self {
        self.discharge_coefficient = cd;
        self
    }

    /// Whether the optimizer is allowed to move this gate.
    pub fn is_controllable(&self) -> bool {
        match self.kind {
            GateKind::Automated => true,
            GateKind::Manual => false,
        }
    }
}

/// Serializable, flat form of a [`Network`] as supplied by the topology
/// provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub nodes: Vec<Node>,
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub gates: Vec<Gate>,
}

/// The canal network graph
#[derive(Debug, Clone, Default)]
pub struct Network {
    pub graph: DiGraph<Node, Channel>,
    pub gates: Vec<Gate>,
    node_lookup: HashMap<NodeId, NodeIndex>,
    channel_lookup: HashMap<ChannelId, EdgeIndex>,
    gate_lookup: HashMap<GateId, usize>,
    gate_by_channel: HashMap<ChannelId, usize>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a network from a flat snapshot, rejecting duplicate ids and
    /// dangling references.
    pub fn from_snapshot(snapshot: NetworkSnapshot) -> CanalResult<Self> {
        let mut network = Network::new();
        for node in snapshot.nodes {
            if network.node_lookup.contains_key(&node.id) {
                return Err(CanalError::Network(format!("duplicate {}", node.id)));
            }
            network.add_node(node);
        }
        for channel in snapshot.channels {
            network.add_channel(channel)?;
        }
        for gate in snapshot.gates {
            network.add_gate(gate)?;
        }
        Ok(network)
    }

    /// Flatten back into a snapshot (node and channel insertion order kept).
    pub fn to_snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            nodes: self.graph.node_weights().cloned().collect(),
            channels: self.graph.edge_weights().cloned().collect(),
            gates: self.gates.clone(),
        }
    }

    /// Add a node; a node with an existing id replaces the lookup entry.
    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        let id = node.id;
        let idx = self.graph.add_node(node);
        self.node_lookup.insert(id, idx);
        idx
    }

    pub fn add_channel(&mut self, channel: Channel) -> CanalResult<EdgeIndex> {
        if self.channel_lookup.contains_key(&channel.id) {
            return Err(CanalError::Network(format!("duplicate {}", channel.id)));
        }
        let from = self.node_index(channel.upstream).ok_or_else(|| {
            CanalError::Network(format!(
                "{} references unknown upstream {}",
                channel.id, channel.upstream
            ))
        })?;
        let to = self.node_index(channel.downstream).ok_or_else(|| {
            CanalError::Network(format!(
                "{} references unknown downstream {}",
                channel.id, channel.downstream
            ))
        })?;
        let id = channel.id;
        let edge = self.graph.add_edge(from, to, channel);
        self.channel_lookup.insert(id, edge);
        Ok(edge)
    }

    pub fn add_gate(&mut self, gate: Gate) -> CanalResult<()> {
        if self.gate_lookup.contains_key(&gate.id) {
            return Err(CanalError::Network(format!("duplicate {}", gate.id)));
        }
        if !self.channel_lookup.contains_key(&gate.channel) {
            return Err(CanalError::Network(format!(
                "{} references unknown {}",
                gate.id, gate.channel
            )));
        }
        if let Some(&existing) = self.gate_by_channel.get(&gate.channel) {
            return Err(CanalError::Network(format!(
                "{} already hosts {}; cannot add {}",
                gate.channel, self.gates[existing].id, gate.id
            )));
        }
        let slot = self.gates.len();
        self.gate_lookup.insert(gate.id, slot);
        self.gate_by_channel.insert(gate.channel, slot);
        self.gates.push(gate);
        Ok(())
    }

    pub fn node_index(&self, id: NodeId) -> Option<NodeIndex> {
        self.node_lookup.get(&id).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.node_index(id).map(|idx| &self.graph[idx])
    }

    pub fn channel_index(&self, id: ChannelId) -> Option<EdgeIndex> {
        self.channel_lookup.get(&id).copied()
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channel_index(id).map(|idx| &self.graph[idx])
    }

    pub fn gate(&self, id: GateId) -> Option<&Gate> {
        self.gate_lookup.get(&id).map(|&slot| &self.gates[slot])
    }

    /// Gate hosted on a channel, if any.
    pub fn gate_on_channel(&self, channel: ChannelId) -> Option<&Gate> {
        self.gate_by_channel
            .get(&channel)
            .map(|&slot| &self.gates[slot])
    }

    /// Sill elevation of a gate (upstream bed of the hosting channel).
    pub fn gate_sill(&self, gate: &Gate) -> Option<Meters> {
        let channel = self.channel(gate.channel)?;
        self.node(channel.upstream).map(|n| n.bed_elevation)
    }

    fn indices_with_role(&self, role: NodeRole) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].role == role)
            .collect()
    }

    pub fn sources(&self) -> Vec<NodeIndex> {
        self.indices_with_role(NodeRole::Source)
    }

    pub fn junctions(&self) -> Vec<NodeIndex> {
        self.indices_with_role(NodeRole::Junction)
    }

    pub fn zones(&self) -> Vec<NodeIndex> {
        self.indices_with_role(NodeRole::Zone)
    }

    /// Highest bed elevation among zone nodes (used to normalise scores).
    pub fn max_zone_elevation(&self) -> Meters {
        self.zones()
            .into_iter()
            .map(|idx| self.graph[idx].bed_elevation)
            .fold(Meters::ZERO, Meters::max)
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats::default();

        for node in self.graph.node_weights() {
            match node.role {
                NodeRole::Source => stats.num_sources += 1,
                NodeRole::Junction => stats.num_junctions += 1,
                NodeRole::Zone => stats.num_zones += 1,
            }
        }
        for channel in self.graph.edge_weights() {
            stats.num_channels += 1;
            stats.total_length_m += channel.length.value();
            if !channel.status {
                stats.num_out_of_service += 1;
            }
        }
        for gate in &self.gates {
            match gate.kind {
                GateKind::Automated => stats.num_automated_gates += 1,
                GateKind::Manual => stats.num_manual_gates += 1,
            }
        }
        stats
    }

    /// Validate the snapshot for problems that make optimization meaningless.
    ///
    /// Errors are structural (negative geometry, out-of-range coefficients);
    /// warnings flag conditions the optimizer tolerates (dry nodes, zones no
    /// source can reach).
    pub fn validate_into(&self, diag: &mut Diagnostics) {
        let stats = self.stats();

        if self.graph.node_count() == 0 {
            diag.add_error("structure", "Network has no nodes");
            return;
        }
        if stats.num_sources == 0 {
            diag.add_error("structure", "Network has no source node");
        }
        if stats.num_channels == 0 && self.graph.node_count() > 1 {
            diag.add_error("structure", "Network has multiple nodes but no channels");
        }

        for node in self.graph.node_weights() {
            let entity = node.id.to_string();
            if !node.bed_elevation.is_finite() || !node.water_level.is_finite() {
                diag.add_error_with_entity("level", "Elevation is not a finite number", &entity);
            } else if node.water_level < node.bed_elevation {
                diag.add_warning_with_entity(
                    "level",
                    "Water level below bed elevation; treated as dry",
                    &entity,
                );
            }
        }

        for channel in self.graph.edge_weights() {
            validate_channel(channel, diag);
        }

        for gate in &self.gates {
            validate_gate(gate, diag);
        }

        for zone in unreachable_zones(self) {
            diag.add_warning_with_entity(
                "topology",
                "Zone cannot be reached from any source over in-service channels",
                &zone.to_string(),
            );
        }
    }

    /// Run [`Network::validate_into`] and turn errors into a
    /// [`CanalError::Validation`]. Returns the warnings on success.
    pub fn ensure_valid(&self) -> CanalResult<Diagnostics> {
        let mut diag = Diagnostics::new();
        self.validate_into(&mut diag);
        if diag.has_errors() {
            return Err(CanalError::Validation(diag));
        }
        Ok(diag)
    }
}

fn validate_channel(channel: &Channel, diag: &mut Diagnostics) {
    let entity = channel.id.to_string();
    if channel.upstream == channel.downstream {
        diag.add_error_with_entity("structure", "Channel starts and ends at the same node", &entity);
    }
    if !(channel.length.value() > 0.0) {
        diag.add_error_with_entity("geometry", "Length must be positive", &entity);
    }
    if !(channel.manning_n > 0.0) {
        diag.add_error_with_entity("geometry", "Manning n must be positive", &entity);
    }
    if !(channel.bed_slope > 0.0) {
        diag.add_error_with_entity("geometry", "Bed slope must be positive for gravity flow", &entity);
    }
    match channel.shape {
        ChannelShape::Trapezoidal {
            bed_width,
            side_slope,
        } => {
            if !(side_slope >= 0.0) {
                diag.add_error_with_entity("geometry", "Side slope must not be negative", &entity);
            }
            if !(bed_width.value() >= 0.0) || (bed_width.value() == 0.0 && side_slope <= 0.0) {
                diag.add_error_with_entity(
                    "geometry",
                    "Bed width must be positive (or zero for a triangular section)",
                    &entity,
                );
            }
        }
        ChannelShape::Rectangular { width } => {
            if !(width.value() > 0.0) {
                diag.add_error_with_entity("geometry", "Width must be positive", &entity);
            }
        }
    }
    if !(channel.condition_factor > 0.0 && channel.condition_factor <= 1.0) {
        diag.add_error_with_entity("geometry", "Condition factor must lie in (0, 1]", &entity);
    }
    if !(channel.capacity.value() > 0.0) {
        diag.add_error_with_entity("capacity", "Capacity must be positive", &entity);
    }
}

fn validate_gate(gate: &Gate, diag: &mut Diagnostics) {
    let entity = gate.id.to_string();
    if !(gate.max_opening.value() > 0.0) {
        diag.add_error_with_entity("gate", "Max opening must be positive", &entity);
    }
    if !(gate.opening.value() >= 0.0) {
        diag.add_error_with_entity("gate", "Opening must not be negative", &entity);
    } else if gate.opening > gate.max_opening {
        diag.add_warning_with_entity(
            "gate",
            "Opening exceeds max opening; clamped when seeding the optimizer",
            &entity,
        );
    }
    if !(gate.discharge_coefficient > 0.0 && gate.discharge_coefficient <= 1.0) {
        diag.add_error_with_entity("gate", "Discharge coefficient must lie in (0, 1]", &entity);
    }
    if !(gate.width.value() > 0.0) {
        diag.add_error_with_entity("gate", "Width must be positive", &entity);
    }
}

/// Statistics about a network's size
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkStats {
    pub num_sources: usize,
    pub num_junctions: usize,
    pub num_zones: usize,
    pub num_channels: usize,
    pub num_out_of_service: usize,
    pub num_automated_gates: usize,
    pub num_manual_gates: usize,
    pub total_length_m: f64,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sources, {} junctions, {} zones, {} channels ({:.1} km), {} gates ({} manual)",
            self.num_sources,
            self.num_junctions,
            self.num_zones,
            self.num_channels,
            self.total_length_m / 1000.0,
            self.num_automated_gates + self.num_manual_gates,
            self.num_manual_gates
        )
    }
}

impl Node {
    /// Human-readable label (name, falling back to the id).
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            self.id.to_string()
        } else {
            self.name.clone()
        }
    }
}
