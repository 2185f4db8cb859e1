//! Contingency routing around blocked gates and channels.
//!
//! When a gate jams or a channel section fails, zones fed through it need an
//! alternative way to receive water. This module provides:
//!
//! 1. **Blockages:** channels out of service, gates out of service (taking
//!    their hosting channel with them) and capacity derates
//! 2. **Reduced network:** a copy of the network with the blockages applied
//! 3. **Route search:** bounded simple-path enumeration from every source to
//!    each affected destination, with bottleneck capacity and feasibility per
//!    path (see [`router`])

pub mod router;

use canal_core::{without_elements, CanalResult, ChannelId, GateId, Network, Outage};
use serde::{Deserialize, Serialize};

pub use router::{find_routes, ContingencyReport, DestinationRoutes, RouteCandidate, RouteDemand};

/// One failed or weakened element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Blockage {
    Channel { channel: ChannelId },
    Gate { gate: GateId },
    /// Capacity scaled by `factor` in (0, 1]
    Derate { channel: ChannelId, factor: f64 },
}

impl Blockage {
    pub fn channel(id: ChannelId) -> Self {
        Blockage::Channel { channel: id }
    }

    pub fn gate(id: GateId) -> Self {
        Blockage::Gate { gate: id }
    }

    pub fn derate(id: ChannelId, factor: f64) -> Self {
        Blockage::Derate { channel: id, factor }
    }
}

impl std::fmt::Display for Blockage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Blockage::Channel { channel } => write!(f, "{channel} blocked"),
            Blockage::Gate { gate } => write!(f, "{gate} blocked"),
            Blockage::Derate { channel, factor } => write!(f, "{channel} derated to {:.0}%", factor * 100.0),
        }
    }
}

/// Configuration for route search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContingencyConfig {
    /// Maximum channels on a route
    pub max_hops: usize,
    /// Paths examined per destination
    pub max_paths: usize,
    /// Minimum head margin (m) for a route to be kept
    pub feasibility_threshold: f64,
}

impl Default for ContingencyConfig {
    fn default() -> Self {
        Self {
            max_hops: 10,
            max_paths: 64,
            feasibility_threshold: 0.0,
        }
    }
}

/// Collect blockages into the outage form understood by the graph layer.
pub fn to_outage(blockages: &[Blockage]) -> Outage {
    let mut outage = Outage::default();
    for blockage in blockages {
        match *blockage {
            Blockage::Channel { channel } => {
                outage.channels.insert(channel);
            }
            Blockage::Gate { gate } => {
                outage.gates.insert(gate);
            }
            Blockage::Derate { channel, factor } => {
                // Repeated derates on one channel compound
                let entry = outage.derates.entry(channel).or_insert(1.0);
                *entry *= factor;
            }
        }
    }
    outage
}

/// Network with the blockages applied.
pub fn reduced_network(network: &Network, blockages: &[Blockage]) -> CanalResult<Network> {
    let outage = to_outage(blockages);
    if outage.is_empty() {
        return Ok(network.clone());
    }
    Ok(without_elements(network, &outage)?)
}
